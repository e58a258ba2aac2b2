//! Order modifier records.
//!
//! A modifier is the persisted result of applying a [`crate::modifiers::ModifierRule`]
//! to an order: which rule (`key`), where it sits in the pipeline (`sort`) and
//! the signed adjustment it contributed (`amount`).

use core::fmt;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use mercato_core::{OrderId, OrderModifierId};

/// Registry key naming a modifier rule, e.g. `flat_shipping`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ModifierKey(String);

impl ModifierKey {
    #[must_use]
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ModifierKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ModifierKey {
    fn from(key: &str) -> Self {
        Self::new(key)
    }
}

/// An adjustment attached to an order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderModifier {
    /// `None` until the modifier has been persisted.
    pub id: Option<OrderModifierId>,
    pub order_id: OrderId,
    pub key: ModifierKey,
    pub title: String,
    /// 1-based position in the pipeline.
    pub sort: i32,
    /// Signed adjustment: positive for charges, negative for discounts.
    pub amount: Decimal,
    #[serde(skip)]
    pub(crate) dirty: bool,
}

impl OrderModifier {
    /// Create an unsaved modifier with a zero adjustment.
    #[must_use]
    pub fn new(order_id: OrderId, key: ModifierKey, title: impl Into<String>) -> Self {
        Self {
            id: None,
            order_id,
            key,
            title: title.into(),
            sort: 0,
            amount: Decimal::ZERO,
            dirty: true,
        }
    }

    /// Whether this modifier has unsaved changes.
    #[must_use]
    pub const fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub(crate) fn set_sort(&mut self, sort: i32) {
        if self.sort != sort {
            self.sort = sort;
            self.dirty = true;
        }
    }

    pub(crate) fn set_title(&mut self, title: String) {
        if self.title != title {
            self.title = title;
            self.dirty = true;
        }
    }

    pub(crate) fn record_amount(&mut self, amount: Decimal) {
        if self.amount != amount {
            self.amount = amount;
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
