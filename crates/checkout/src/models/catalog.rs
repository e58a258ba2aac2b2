//! Catalog entities: products, variation axes and variations.

use std::collections::BTreeSet;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use mercato_core::{AttributeTypeId, AttributeValueId, ProductId, VariationId};

/// A sellable product.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Product {
    pub id: ProductId,
    pub title: String,
    pub price: Decimal,
    /// SKU; also the prefix of generated variation SKUs.
    pub internal_item_id: String,
    /// Attribute types this product is varied on, in the order they were added.
    pub variation_attribute_types: Vec<AttributeTypeId>,
}

/// Input for creating a product.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewProduct {
    pub title: String,
    pub price: Decimal,
    pub internal_item_id: String,
}

/// A variation axis such as "Size" or "Color".
///
/// `name` is for back-end use and `label` for display.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttributeType {
    pub id: AttributeTypeId,
    pub name: String,
    pub label: String,
}

impl AttributeType {
    /// Fill in whichever of name or label is blank from the other.
    ///
    /// Returns `None` when both are blank.
    #[must_use]
    pub fn name_and_label(name: &str, label: &str) -> Option<(String, String)> {
        let (name, label) = (name.trim(), label.trim());
        match (name.is_empty(), label.is_empty()) {
            (true, true) => None,
            (true, false) => Some((label.to_string(), label.to_string())),
            (false, true) => Some((name.to_string(), name.to_string())),
            (false, false) => Some((name.to_string(), label.to_string())),
        }
    }
}

/// One value on a variation axis, e.g. "Large".
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttributeValue {
    pub id: AttributeValueId,
    pub type_id: AttributeTypeId,
    pub value: String,
    pub sort: i32,
}

/// A concrete variant of a product, distinguished by its set of attribute values.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProductVariation {
    pub id: VariationId,
    pub product_id: ProductId,
    pub internal_item_id: String,
    pub price: Decimal,
    pub stock: i32,
    /// Inactive variations are kept for historical order items but not sold.
    pub active: bool,
    pub attribute_values: BTreeSet<AttributeValueId>,
}

impl ProductVariation {
    /// Whether this variation carries exactly the given set of values.
    #[must_use]
    pub fn matches(&self, values: &BTreeSet<AttributeValueId>) -> bool {
        &self.attribute_values == values
    }
}

/// A variation to be created.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewVariation {
    pub price: Decimal,
    pub stock: i32,
    pub attribute_values: BTreeSet<AttributeValueId>,
}

/// Changes computed by the variation generator, applied atomically by the
/// catalog repository.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VariationPlan {
    pub product_id: ProductId,
    pub attribute_type_id: AttributeTypeId,
    pub create: Vec<NewVariation>,
    /// Existing inactive variations whose value set was requested again.
    pub reactivate: Vec<VariationId>,
    /// Base variations that were extended by the new axis.
    pub deactivate: Vec<VariationId>,
}

impl VariationPlan {
    /// Whether applying the plan would change nothing except recording the
    /// attribute type on the product.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.create.is_empty() && self.reactivate.is_empty() && self.deactivate.is_empty()
    }
}
