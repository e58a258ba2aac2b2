//! Order line items.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use mercato_core::{OrderId, OrderItemId, ProductId, VariationId};

/// Something that can be put in a cart.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "snake_case")]
pub enum Buyable {
    Product(ProductId),
    Variation(VariationId),
}

/// A line on an order: what was bought, at what unit price, how many.
///
/// The title and unit price are snapshots taken when the line was added, so
/// later catalog edits do not alter placed orders.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderItem {
    /// `None` until the item has been persisted.
    pub id: Option<OrderItemId>,
    pub order_id: OrderId,
    pub buyable: Buyable,
    pub title: String,
    pub unit_price: Decimal,
    pub quantity: u32,
    #[serde(skip)]
    pub(crate) dirty: bool,
}

impl OrderItem {
    /// Create an unsaved line item.
    #[must_use]
    pub fn new(
        order_id: OrderId,
        buyable: Buyable,
        title: impl Into<String>,
        unit_price: Decimal,
        quantity: u32,
    ) -> Self {
        Self {
            id: None,
            order_id,
            buyable,
            title: title.into(),
            unit_price,
            quantity,
            dirty: true,
        }
    }

    /// Unit price multiplied by quantity.
    #[must_use]
    pub fn line_total(&self) -> Decimal {
        self.unit_price * Decimal::from(self.quantity)
    }

    /// Whether this item has unsaved changes.
    #[must_use]
    pub const fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub(crate) fn set_quantity(&mut self, quantity: u32) {
        if self.quantity != quantity {
            self.quantity = quantity;
            self.dirty = true;
        }
    }

    pub(crate) const fn mark_dirty(&mut self) {
        self.dirty = true;
    }

    pub(crate) const fn mark_clean(&mut self) {
        self.dirty = false;
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_line_total() {
        let item = OrderItem::new(
            OrderId::new(1),
            Buyable::Product(ProductId::new(7)),
            "Socks",
            Decimal::new(450, 2),
            3,
        );
        assert_eq!(item.line_total(), Decimal::new(1350, 2));
        assert!(item.is_dirty());
        assert!(item.id.is_none());
    }

    #[test]
    fn test_set_same_quantity_stays_clean() {
        let mut item = OrderItem::new(
            OrderId::new(1),
            Buyable::Variation(VariationId::new(2)),
            "Ball - Red/Large",
            Decimal::from(22),
            1,
        );
        item.mark_clean();
        item.set_quantity(1);
        assert!(!item.is_dirty());
        item.set_quantity(4);
        assert!(item.is_dirty());
    }

    #[test]
    fn test_buyable_serialization() {
        let json = serde_json::to_value(Buyable::Variation(VariationId::new(9))).unwrap();
        assert_eq!(json, serde_json::json!({"kind": "variation", "id": 9}));
    }
}
