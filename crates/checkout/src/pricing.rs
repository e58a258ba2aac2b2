//! Order total calculation.
//!
//! Carts are priced live: the configured [`ModifierPipeline`] decides which
//! modifiers are attached and what they contribute. Placed orders are priced
//! from the amounts frozen on their modifiers at placement, so later rule or
//! configuration changes never alter what a customer was charged.

use rust_decimal::Decimal;

use crate::error::{CheckoutError, Result};
use crate::modifiers::{ModifierKey, ModifierPipeline, PricingContext};
use crate::models::{Order, OrderModifier};

impl Order {
    /// Recompute the total, update the modifiers and cache the result.
    ///
    /// Idempotent: running it twice leaves the same modifiers, amounts and
    /// total, and only changed modifiers are marked for saving.
    pub fn calculate(&mut self, pipeline: &ModifierPipeline) -> Decimal {
        let subtotal = self.subtotal();
        let total = if self.status.is_cart() {
            self.queue_stale_modifiers(pipeline);
            self.apply_pipeline(pipeline, subtotal)
        } else {
            self.apply_stored_amounts(subtotal)
        };
        self.total = total;
        total
    }

    /// Attach a configured modifier that is not attached automatically, such
    /// as a voucher, then recalculate.
    ///
    /// # Errors
    ///
    /// Returns a validation error if the order is not a cart or the rule
    /// rejects this cart, and a configuration error if `key` is not part of
    /// the pipeline.
    pub fn attach_modifier(
        &mut self,
        pipeline: &ModifierPipeline,
        key: &ModifierKey,
    ) -> Result<Decimal> {
        if !self.status.is_cart() {
            return Err(CheckoutError::Validation("Order is not a cart".to_string()));
        }
        let (sort, rule) = pipeline.position(key).ok_or_else(|| {
            CheckoutError::Configuration(format!("Modifier {key} is not configured"))
        })?;

        if self.modifier(key).is_none() {
            let ctx = PricingContext::for_order(self);
            let mut modifier = OrderModifier::new(self.id, key.clone(), rule.title(&ctx));
            if !rule.valid(&modifier, &ctx) {
                return Err(CheckoutError::Validation(format!(
                    "{} does not apply to this order",
                    modifier.title
                )));
            }
            modifier.set_sort(sort);
            self.modifiers.push(modifier);
        }
        Ok(self.calculate(pipeline))
    }

    /// Drop modifiers whose key is no longer configured.
    ///
    /// Rows already persisted are queued and deleted by the next save.
    pub(crate) fn queue_stale_modifiers(&mut self, pipeline: &ModifierPipeline) -> usize {
        let stale: Vec<ModifierKey> = self
            .modifiers
            .iter()
            .filter(|modifier| !pipeline.contains(&modifier.key))
            .map(|modifier| modifier.key.clone())
            .collect();
        for key in &stale {
            self.detach_modifier(key);
        }
        stale.len()
    }

    fn apply_pipeline(&mut self, pipeline: &ModifierPipeline, subtotal: Decimal) -> Decimal {
        let ctx = PricingContext::for_order(self);
        let mut running = subtotal;

        for (rule, sort) in pipeline.rules().iter().zip(1..) {
            let key = rule.key();
            let attached_and_valid = self
                .modifier(&key)
                .map(|modifier| rule.valid(modifier, &ctx));

            match attached_and_valid {
                Some(false) => {
                    self.detach_modifier(&key);
                    continue;
                }
                None if rule.required(&ctx) => {
                    self.modifiers
                        .push(OrderModifier::new(self.id, key.clone(), rule.title(&ctx)));
                }
                None => continue,
                Some(true) => {}
            }

            let Some(modifier) = self.modifiers.iter_mut().find(|m| m.key == key) else {
                continue;
            };
            let next = rule.modify(running, &ctx);
            modifier.set_sort(sort);
            modifier.set_title(rule.title(&ctx));
            modifier.record_amount(next - running);
            running = next;
        }

        self.sort_modifiers();
        running
    }

    fn apply_stored_amounts(&mut self, subtotal: Decimal) -> Decimal {
        self.sort_modifiers();
        let mut running = subtotal;
        for modifier in &mut self.modifiers {
            running += modifier.amount;
            modifier.mark_dirty();
        }
        running
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use chrono::{TimeZone, Utc};
    use mercato_core::{CurrencyCode, OrderId, OrderModifierId, ProductId};

    use super::*;
    use crate::config::ModifierSettings;
    use crate::modifiers::{FlatShipping, ModifierRegistry, SalesTax, Voucher};
    use crate::models::Buyable;

    fn registry() -> ModifierRegistry {
        ModifierRegistry::with_builtins(&ModifierSettings {
            shipping_charge: Decimal::from(5),
            tax_rate: Decimal::new(10, 2),
            voucher_discount: Decimal::from(3),
            ..ModifierSettings::default()
        })
    }

    fn pipeline(keys: &[&str]) -> ModifierPipeline {
        let keys: Vec<ModifierKey> = keys.iter().map(|k| ModifierKey::new(*k)).collect();
        ModifierPipeline::new(&registry(), &keys).unwrap()
    }

    fn cart_with_subtotal_20() -> Order {
        let now = Utc.with_ymd_and_hms(2026, 10, 18, 9, 0, 0).unwrap();
        let mut order = Order::new_cart(OrderId::new(1), None, CurrencyCode::USD, now);
        order
            .add_item(
                Buyable::Product(ProductId::new(1)),
                "Mug",
                Decimal::from(10),
                2,
            )
            .unwrap();
        order
    }

    #[test]
    fn test_empty_pipeline_total_is_subtotal() {
        let mut order = cart_with_subtotal_20();
        assert_eq!(order.calculate(&pipeline(&[])), Decimal::from(20));
        assert!(order.modifiers().is_empty());
    }

    #[test]
    fn test_modifier_order_matters() {
        let mut shipping_first = cart_with_subtotal_20();
        let total = shipping_first.calculate(&pipeline(&[FlatShipping::KEY, SalesTax::KEY]));
        // (20 + 5) * 1.1
        assert_eq!(total, Decimal::new(2750, 2));

        let mut tax_first = cart_with_subtotal_20();
        let total = tax_first.calculate(&pipeline(&[SalesTax::KEY, FlatShipping::KEY]));
        // 20 * 1.1 + 5
        assert_eq!(total, Decimal::from(27));
    }

    #[test]
    fn test_calculate_is_idempotent() {
        let pipeline = pipeline(&[FlatShipping::KEY, SalesTax::KEY]);
        let mut order = cart_with_subtotal_20();
        let first = order.calculate(&pipeline);
        for modifier in &mut order.modifiers {
            modifier.mark_clean();
        }

        let second = order.calculate(&pipeline);
        assert_eq!(first, second);
        assert_eq!(order.modifiers().len(), 2);
        assert!(order.modifiers().iter().all(|m| !m.is_dirty()));

        let sorts: Vec<i32> = order.modifiers().iter().map(|m| m.sort).collect();
        assert_eq!(sorts, vec![1, 2]);
    }

    #[test]
    fn test_total_equals_subtotal_plus_adjustments() {
        let mut order = cart_with_subtotal_20();
        let total = order.calculate(&pipeline(&[FlatShipping::KEY, SalesTax::KEY]));
        let adjustments: Decimal = order.modifiers().iter().map(|m| m.amount).sum();
        assert_eq!(total, order.subtotal() + adjustments);
    }

    #[test]
    fn test_optional_modifier_needs_attaching() {
        let pipeline = pipeline(&[FlatShipping::KEY, Voucher::KEY]);
        let mut order = cart_with_subtotal_20();
        assert_eq!(order.calculate(&pipeline), Decimal::from(25));
        assert!(order.modifier(&ModifierKey::new(Voucher::KEY)).is_none());

        let total = order
            .attach_modifier(&pipeline, &ModifierKey::new(Voucher::KEY))
            .unwrap();
        assert_eq!(total, Decimal::from(22));
        let voucher = order.modifier(&ModifierKey::new(Voucher::KEY)).unwrap();
        assert_eq!(voucher.amount, Decimal::from(-3));
        assert_eq!(voucher.sort, 2);
    }

    #[test]
    fn test_attach_unconfigured_modifier_rejected() {
        let mut order = cart_with_subtotal_20();
        let err = order
            .attach_modifier(&pipeline(&[FlatShipping::KEY]), &ModifierKey::new(Voucher::KEY))
            .unwrap_err();
        assert!(matches!(err, CheckoutError::Configuration(_)));
    }

    #[test]
    fn test_stale_modifiers_are_queued_not_counted() {
        let mut order = cart_with_subtotal_20();
        order.calculate(&pipeline(&[FlatShipping::KEY, SalesTax::KEY]));
        for (modifier, id) in order.modifiers.iter_mut().zip(1..) {
            modifier.id = Some(OrderModifierId::new(id));
        }

        let total = order.calculate(&pipeline(&[SalesTax::KEY]));
        assert_eq!(total, Decimal::from(22));
        assert_eq!(order.modifiers().len(), 1);
        assert_eq!(order.removed_modifiers, vec![OrderModifierId::new(1)]);
    }

    #[test]
    fn test_placed_order_uses_stored_amounts() {
        let mut order = cart_with_subtotal_20();
        order.calculate(&pipeline(&[FlatShipping::KEY, SalesTax::KEY]));
        order.place(Utc::now());
        for modifier in &mut order.modifiers {
            modifier.mark_clean();
        }

        // A different configuration no longer affects the placed order.
        let total = order.calculate(&pipeline(&[SalesTax::KEY]));
        assert_eq!(total, Decimal::new(2750, 2));
        assert_eq!(order.modifiers().len(), 2);
        assert!(order.modifiers().iter().all(OrderModifier::is_dirty));
    }
}
