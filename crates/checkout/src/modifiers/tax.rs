use rust_decimal::Decimal;

use super::{ModifierKey, ModifierRule, PricingContext};

/// Percentage tax on the running total.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SalesTax {
    /// Fraction, e.g. `0.15` for 15%.
    rate: Decimal,
    title: String,
}

impl SalesTax {
    pub const KEY: &'static str = "sales_tax";

    #[must_use]
    pub const fn new(rate: Decimal, title: String) -> Self {
        Self { rate, title }
    }
}

impl ModifierRule for SalesTax {
    fn key(&self) -> ModifierKey {
        ModifierKey::new(Self::KEY)
    }

    fn title(&self, _ctx: &PricingContext) -> String {
        let percent = (self.rate * Decimal::ONE_HUNDRED).normalize();
        format!("{} ({percent}%)", self.title)
    }

    fn adjustment(&self, running: Decimal, _ctx: &PricingContext) -> Decimal {
        running * self.rate
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx() -> PricingContext {
        PricingContext {
            subtotal: Decimal::from(10),
            quantity: 1,
            country: None,
        }
    }

    #[test]
    fn test_tax_rounds_to_cents() {
        let rule = SalesTax::new(Decimal::new(15, 2), "GST".to_string());
        // 10.05 * 0.15 = 1.5075 -> 1.51
        assert_eq!(
            rule.modify(Decimal::new(1005, 2), &ctx()),
            Decimal::new(1156, 2)
        );
    }

    #[test]
    fn test_title_shows_percentage() {
        let rule = SalesTax::new(Decimal::new(125, 3), "VAT".to_string());
        assert_eq!(rule.title(&ctx()), "VAT (12.5%)");
    }
}
