use rust_decimal::Decimal;

use super::{ModifierKey, ModifierRule, PricingContext};
use crate::models::OrderModifier;

/// Fixed discount, applied only once attached to a cart.
///
/// The discount never takes the running total below zero, and the voucher
/// drops off a cart whose subtotal falls under `minimum`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Voucher {
    discount: Decimal,
    minimum: Decimal,
}

impl Voucher {
    pub const KEY: &'static str = "voucher";

    #[must_use]
    pub const fn new(discount: Decimal, minimum: Decimal) -> Self {
        Self { discount, minimum }
    }
}

impl ModifierRule for Voucher {
    fn key(&self) -> ModifierKey {
        ModifierKey::new(Self::KEY)
    }

    fn title(&self, _ctx: &PricingContext) -> String {
        "Voucher".to_string()
    }

    fn required(&self, _ctx: &PricingContext) -> bool {
        false
    }

    fn valid(&self, _modifier: &OrderModifier, ctx: &PricingContext) -> bool {
        ctx.subtotal >= self.minimum
    }

    fn adjustment(&self, running: Decimal, _ctx: &PricingContext) -> Decimal {
        -self.discount.min(running.max(Decimal::ZERO))
    }
}

#[cfg(test)]
mod tests {
    use mercato_core::OrderId;

    use super::*;

    fn ctx(subtotal: i64) -> PricingContext {
        PricingContext {
            subtotal: Decimal::from(subtotal),
            quantity: 1,
            country: None,
        }
    }

    #[test]
    fn test_discount_capped_at_running_total() {
        let rule = Voucher::new(Decimal::from(10), Decimal::ZERO);
        assert_eq!(rule.modify(Decimal::from(25), &ctx(25)), Decimal::from(15));
        assert_eq!(rule.modify(Decimal::from(6), &ctx(6)), Decimal::ZERO);
    }

    #[test]
    fn test_minimum_spend() {
        let rule = Voucher::new(Decimal::from(10), Decimal::from(50));
        let modifier = OrderModifier::new(OrderId::new(1), rule.key(), "Voucher");
        assert!(!rule.valid(&modifier, &ctx(49)));
        assert!(rule.valid(&modifier, &ctx(50)));
        assert!(!rule.required(&ctx(50)));
    }
}
