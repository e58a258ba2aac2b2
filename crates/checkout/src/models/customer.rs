//! Customer and shipping snapshots stored on an order.
//!
//! Empty strings mean "not provided"; address rendering skips them.

use serde::{Deserialize, Serialize};

use mercato_core::Email;

/// Billing contact details captured at checkout.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CustomerDetails {
    pub first_name: String,
    pub surname: String,
    pub email: Option<Email>,
    pub notes: Option<String>,
    pub address: String,
    pub address_line2: String,
    pub city: String,
    pub postal_code: String,
    pub state: String,
    pub country: String,
    pub home_phone: String,
    pub mobile_phone: String,
}

impl CustomerDetails {
    /// First name and surname, or just the first name when no surname is set.
    #[must_use]
    pub fn name(&self) -> String {
        if self.surname.is_empty() {
            self.first_name.clone()
        } else {
            format!("{} {}", self.first_name, self.surname)
                .trim()
                .to_string()
        }
    }

    /// Non-empty billing lines in display order.
    #[must_use]
    pub fn address_lines(&self) -> Vec<String> {
        let email = self.email.as_ref().map(ToString::to_string).unwrap_or_default();
        [
            self.name(),
            self.address.clone(),
            self.address_line2.clone(),
            self.city.clone(),
            self.country.clone(),
            email,
            self.home_phone.clone(),
            self.mobile_phone.clone(),
        ]
        .into_iter()
        .filter(|line| !line.is_empty())
        .collect()
    }
}

/// Separate delivery details, used when the order asks for them.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShippingDetails {
    pub name: String,
    pub address: String,
    pub address2: String,
    pub city: String,
    pub postal_code: String,
    pub state: String,
    pub country: String,
    pub phone: String,
}

impl ShippingDetails {
    /// Non-empty shipping lines in display order.
    #[must_use]
    pub fn address_lines(&self) -> Vec<String> {
        [
            &self.name,
            &self.address,
            &self.address2,
            &self.city,
            &self.postal_code,
            &self.state,
            &self.country,
            &self.phone,
        ]
        .into_iter()
        .filter(|line| !line.is_empty())
        .cloned()
        .collect()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_name_without_surname() {
        let customer = CustomerDetails {
            first_name: "Ana".to_string(),
            ..CustomerDetails::default()
        };
        assert_eq!(customer.name(), "Ana");
    }

    #[test]
    fn test_billing_lines_skip_blanks() {
        let customer = CustomerDetails {
            first_name: "Ana".to_string(),
            surname: "Lee".to_string(),
            email: Some(Email::parse("ana@example.com").unwrap()),
            address: "1 Main St".to_string(),
            city: "Wellington".to_string(),
            ..CustomerDetails::default()
        };
        assert_eq!(
            customer.address_lines(),
            vec!["Ana Lee", "1 Main St", "Wellington", "ana@example.com"]
        );
    }
}
