use rust_decimal::Decimal;

use super::{ModifierKey, ModifierRule, PricingContext};

/// Fixed shipping charge, waived when the subtotal reaches `free_over`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlatShipping {
    charge: Decimal,
    free_over: Option<Decimal>,
}

impl FlatShipping {
    pub const KEY: &'static str = "flat_shipping";

    #[must_use]
    pub const fn new(charge: Decimal, free_over: Option<Decimal>) -> Self {
        Self { charge, free_over }
    }

    fn is_free(&self, ctx: &PricingContext) -> bool {
        self.free_over
            .is_some_and(|threshold| ctx.subtotal >= threshold)
    }
}

impl ModifierRule for FlatShipping {
    fn key(&self) -> ModifierKey {
        ModifierKey::new(Self::KEY)
    }

    fn title(&self, ctx: &PricingContext) -> String {
        if self.is_free(ctx) {
            "Free Shipping".to_string()
        } else {
            "Shipping".to_string()
        }
    }

    fn adjustment(&self, _running: Decimal, ctx: &PricingContext) -> Decimal {
        if self.is_free(ctx) || ctx.quantity == 0 {
            Decimal::ZERO
        } else {
            self.charge
        }
    }
}
