//! Pricing modifier rules.
//!
//! A [`ModifierRule`] turns a running total into an adjustment (shipping,
//! tax, a discount). Rules are registered under a [`ModifierKey`] in a
//! [`ModifierRegistry`]; the shop's configured key list becomes a
//! [`ModifierPipeline`], validated once at startup.

mod shipping;
mod tax;
mod voucher;

use std::collections::HashMap;
use std::fmt::Debug;
use std::sync::Arc;

use rust_decimal::{Decimal, RoundingStrategy};

pub use shipping::FlatShipping;
pub use tax::SalesTax;
pub use voucher::Voucher;

pub use crate::models::ModifierKey;
use crate::config::{ConfigError, ModifierSettings};
use crate::models::{Order, OrderModifier};

/// Decimal places adjustments are rounded to.
pub const ROUNDING_PRECISION: u32 = 2;

/// Round to [`ROUNDING_PRECISION`] places, midpoint away from zero.
#[must_use]
pub fn round_amount(amount: Decimal) -> Decimal {
    amount.round_dp_with_strategy(ROUNDING_PRECISION, RoundingStrategy::MidpointAwayFromZero)
}

/// Order facts a rule may price against.
///
/// Copied out of the order so rules can run while the order's modifiers are
/// being updated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PricingContext {
    pub subtotal: Decimal,
    pub quantity: u32,
    /// Delivery country, when known.
    pub country: Option<String>,
}

impl PricingContext {
    #[must_use]
    pub fn for_order(order: &Order) -> Self {
        let country = if order.use_shipping_address {
            &order.shipping.country
        } else {
            &order.customer.country
        };
        Self {
            subtotal: order.subtotal(),
            quantity: order.quantity(),
            country: (!country.is_empty()).then(|| country.clone()),
        }
    }
}

/// A pricing rule applied to carts.
pub trait ModifierRule: Send + Sync + Debug {
    fn key(&self) -> ModifierKey;

    /// Display title for the order line.
    fn title(&self, ctx: &PricingContext) -> String;

    /// Whether the rule attaches itself to every cart.
    ///
    /// Optional rules (vouchers) are only applied once attached explicitly.
    fn required(&self, _ctx: &PricingContext) -> bool {
        true
    }

    /// Whether an attached modifier still applies to this cart.
    fn valid(&self, _modifier: &OrderModifier, _ctx: &PricingContext) -> bool {
        true
    }

    /// Signed adjustment for the running total.
    fn adjustment(&self, running: Decimal, ctx: &PricingContext) -> Decimal;

    /// Apply the rule: `running` plus the rounded adjustment.
    fn modify(&self, running: Decimal, ctx: &PricingContext) -> Decimal {
        running + round_amount(self.adjustment(running, ctx))
    }
}

/// Modifier rules by key.
#[derive(Debug, Clone, Default)]
pub struct ModifierRegistry {
    rules: HashMap<ModifierKey, Arc<dyn ModifierRule>>,
}

impl ModifierRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry holding the built-in rules configured from `settings`.
    #[must_use]
    pub fn with_builtins(settings: &ModifierSettings) -> Self {
        let mut registry = Self::new();
        registry.register(FlatShipping::new(
            settings.shipping_charge,
            settings.free_shipping_over,
        ));
        registry.register(SalesTax::new(settings.tax_rate, settings.tax_title.clone()));
        registry.register(Voucher::new(
            settings.voucher_discount,
            settings.voucher_minimum,
        ));
        registry
    }

    /// Register a rule, replacing any rule with the same key.
    pub fn register(&mut self, rule: impl ModifierRule + 'static) {
        self.rules.insert(rule.key(), Arc::new(rule));
    }

    #[must_use]
    pub fn get(&self, key: &ModifierKey) -> Option<Arc<dyn ModifierRule>> {
        self.rules.get(key).cloned()
    }

    #[must_use]
    pub fn contains(&self, key: &ModifierKey) -> bool {
        self.rules.contains_key(key)
    }
}

/// The configured, ordered list of rules applied to carts.
#[derive(Debug, Clone, Default)]
pub struct ModifierPipeline {
    rules: Vec<Arc<dyn ModifierRule>>,
}

impl ModifierPipeline {
    /// Resolve `keys` against `registry`, preserving order.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::UnknownModifier`] for a key with no registered
    /// rule and [`ConfigError::DuplicateModifier`] for a key listed twice.
    pub fn new(registry: &ModifierRegistry, keys: &[ModifierKey]) -> Result<Self, ConfigError> {
        let mut rules: Vec<Arc<dyn ModifierRule>> = Vec::with_capacity(keys.len());
        for key in keys {
            // An order holds one modifier per key.
            if rules.iter().any(|rule| &rule.key() == key) {
                return Err(ConfigError::DuplicateModifier(key.to_string()));
            }
            let rule = registry
                .get(key)
                .ok_or_else(|| ConfigError::UnknownModifier(key.to_string()))?;
            rules.push(rule);
        }
        Ok(Self { rules })
    }

    #[must_use]
    pub fn rules(&self) -> &[Arc<dyn ModifierRule>] {
        &self.rules
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    #[must_use]
    pub fn contains(&self, key: &ModifierKey) -> bool {
        self.rules.iter().any(|rule| &rule.key() == key)
    }

    /// 1-based position of `key` and its rule.
    #[must_use]
    pub fn position(&self, key: &ModifierKey) -> Option<(i32, Arc<dyn ModifierRule>)> {
        self.rules
            .iter()
            .zip(1..)
            .find(|(rule, _)| &rule.key() == key)
            .map(|(rule, sort)| (sort, Arc::clone(rule)))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_round_amount_midpoint_away_from_zero() {
        assert_eq!(round_amount(Decimal::new(1_005, 3)), Decimal::new(101, 2));
        assert_eq!(round_amount(Decimal::new(-1_005, 3)), Decimal::new(-101, 2));
        assert_eq!(round_amount(Decimal::new(1_004, 3)), Decimal::new(100, 2));
    }

    #[test]
    fn test_pipeline_rejects_unknown_key() {
        let registry = ModifierRegistry::with_builtins(&ModifierSettings::default());
        let err = ModifierPipeline::new(
            &registry,
            &[ModifierKey::new("flat_shipping"), ModifierKey::new("gift_wrap")],
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::UnknownModifier(key) if key == "gift_wrap"));
    }

    #[test]
    fn test_pipeline_rejects_repeated_key() {
        let registry = ModifierRegistry::with_builtins(&ModifierSettings::default());
        let err = ModifierPipeline::new(
            &registry,
            &[
                ModifierKey::new("flat_shipping"),
                ModifierKey::new("sales_tax"),
                ModifierKey::new("flat_shipping"),
            ],
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::DuplicateModifier(key) if key == "flat_shipping"));
    }

    #[test]
    fn test_pipeline_positions_are_one_based() {
        let registry = ModifierRegistry::with_builtins(&ModifierSettings::default());
        let pipeline = ModifierPipeline::new(
            &registry,
            &[ModifierKey::new("sales_tax"), ModifierKey::new("flat_shipping")],
        )
        .unwrap();
        let (sort, rule) = pipeline.position(&ModifierKey::new("flat_shipping")).unwrap();
        assert_eq!(sort, 2);
        assert_eq!(rule.key(), ModifierKey::new("flat_shipping"));
        assert!(pipeline.position(&ModifierKey::new("voucher")).is_none());
    }
}
