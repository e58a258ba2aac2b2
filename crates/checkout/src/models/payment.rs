//! Payments made against orders.

use core::fmt;
use core::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use mercato_core::{Money, OrderId, PaymentId, PaymentStatus};

/// Payment implementations the shop knows how to create.
///
/// Gateways themselves live outside this crate; the method only records which
/// one the shopper chose.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentMethod {
    Manual,
    Cheque,
    CreditCard,
    PayPal,
}

impl PaymentMethod {
    pub const ALL: [Self; 4] = [Self::Manual, Self::Cheque, Self::CreditCard, Self::PayPal];

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Manual => "manual",
            Self::Cheque => "cheque",
            Self::CreditCard => "credit_card",
            Self::PayPal => "paypal",
        }
    }
}

impl fmt::Display for PaymentMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PaymentMethod {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_ascii_lowercase().replace(['-', ' '], "_");
        Self::ALL
            .into_iter()
            .find(|method| method.as_str() == wanted)
            .ok_or_else(|| format!("unknown payment method: {s}"))
    }
}

/// The payment methods enabled for this shop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaymentMethods(Vec<PaymentMethod>);

impl PaymentMethods {
    #[must_use]
    pub fn new(methods: impl IntoIterator<Item = PaymentMethod>) -> Self {
        let mut enabled = Vec::new();
        for method in methods {
            if !enabled.contains(&method) {
                enabled.push(method);
            }
        }
        Self(enabled)
    }

    /// Look up an enabled method by name.
    ///
    /// Returns `None` for unknown names and for known methods the shop has
    /// not enabled.
    #[must_use]
    pub fn resolve(&self, name: &str) -> Option<PaymentMethod> {
        let method = name.parse::<PaymentMethod>().ok()?;
        self.0.contains(&method).then_some(method)
    }

    #[must_use]
    pub fn enabled(&self) -> &[PaymentMethod] {
        &self.0
    }
}

impl Default for PaymentMethods {
    fn default() -> Self {
        Self(vec![PaymentMethod::Manual])
    }
}

/// A payment record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Payment {
    pub id: PaymentId,
    pub order_id: OrderId,
    pub method: PaymentMethod,
    pub amount: Money,
    pub status: PaymentStatus,
    /// Gateway response text, if any.
    pub message: Option<String>,
    pub ip_address: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Input for creating a payment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewPayment {
    pub order_id: OrderId,
    pub method: PaymentMethod,
    pub amount: Money,
    pub ip_address: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_enabled_method() {
        let methods = PaymentMethods::new([PaymentMethod::Cheque, PaymentMethod::PayPal]);
        assert_eq!(methods.resolve("PayPal"), Some(PaymentMethod::PayPal));
        assert_eq!(methods.resolve("cheque"), Some(PaymentMethod::Cheque));
    }

    #[test]
    fn test_resolve_rejects_disabled_and_unknown() {
        let methods = PaymentMethods::default();
        assert_eq!(methods.resolve("credit-card"), None);
        assert_eq!(methods.resolve("BitcoinPayment"), None);
        assert_eq!(methods.resolve("manual"), Some(PaymentMethod::Manual));
    }

    #[test]
    fn test_new_removes_duplicates() {
        let methods = PaymentMethods::new([PaymentMethod::Manual, PaymentMethod::Manual]);
        assert_eq!(methods.enabled(), &[PaymentMethod::Manual]);
    }
}
