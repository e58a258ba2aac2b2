//! Generating product variations from attribute axes.
//!
//! Adding an axis (say Color = Black, Blue) to a product crosses the new
//! values with every combination the product already sells (say Size =
//! Large) and creates one variation per resulting value set. Variations are
//! identified by their full, unordered set of attribute values.

use std::collections::{BTreeMap, BTreeSet};

use rust_decimal::Decimal;
use tracing::instrument;

use mercato_core::{AttributeTypeId, AttributeValueId, ProductId};

use crate::error::{CheckoutError, Result};
use crate::models::{
    AttributeType, AttributeValue, NewVariation, Product, ProductVariation, VariationPlan,
};
use crate::state::ShopState;

/// Work out which variations to create, reactivate and deactivate when
/// `new_values` of `attribute_type` are added to `product`.
///
/// `type_values` holds every value of the attribute type, so variations
/// that already carry the axis can be recognised. `existing` holds all of
/// the product's variations, active or not.
#[must_use]
pub fn plan_variations(
    product: &Product,
    attribute_type: AttributeTypeId,
    type_values: &BTreeSet<AttributeValueId>,
    new_values: &[AttributeValueId],
    existing: &[ProductVariation],
) -> VariationPlan {
    let mut plan = VariationPlan {
        product_id: product.id,
        attribute_type_id: attribute_type,
        create: Vec::new(),
        reactivate: Vec::new(),
        deactivate: Vec::new(),
    };
    if new_values.is_empty() {
        return plan;
    }

    // Combinations of the other axes, each with the price it sells at.
    let mut bases: BTreeMap<BTreeSet<AttributeValueId>, Decimal> = BTreeMap::new();
    for variation in existing.iter().filter(|variation| variation.active) {
        let base: BTreeSet<_> = variation
            .attribute_values
            .difference(type_values)
            .copied()
            .collect();
        if base.len() == variation.attribute_values.len() {
            // Extended by the new axis, so no longer sold on its own.
            plan.deactivate.push(variation.id);
        }
        bases.entry(base).or_insert(variation.price);
    }
    if bases.is_empty() {
        bases.insert(BTreeSet::new(), product.price);
    }

    for (base, price) in &bases {
        for value in new_values {
            let mut values = base.clone();
            values.insert(*value);

            match existing.iter().find(|variation| variation.matches(&values)) {
                Some(variation) if variation.active => {}
                Some(variation) => {
                    if !plan.reactivate.contains(&variation.id) {
                        plan.reactivate.push(variation.id);
                    }
                }
                None => {
                    if !plan.create.iter().any(|new| new.attribute_values == values) {
                        plan.create.push(NewVariation {
                            price: *price,
                            stock: 0,
                            attribute_values: values,
                        });
                    }
                }
            }
        }
    }

    plan
}

/// What a generation run changed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenerationReport {
    pub attribute_type: AttributeType,
    pub values: Vec<AttributeValue>,
    pub created: Vec<ProductVariation>,
    pub reactivated: usize,
    pub deactivated: usize,
}

/// Catalog operations for attribute axes and variations.
#[derive(Debug, Clone)]
pub struct VariationGenerator {
    state: ShopState,
}

impl VariationGenerator {
    #[must_use]
    pub fn new(state: &ShopState) -> Self {
        Self {
            state: state.clone(),
        }
    }

    /// Find an attribute type by name, ignoring case, or create one named
    /// and labelled with the lower-cased name.
    ///
    /// # Errors
    ///
    /// Returns a validation error for a blank name.
    #[instrument(skip(self))]
    pub async fn find_or_make_attribute_type(&self, name: &str) -> Result<AttributeType> {
        let name = name.trim().to_lowercase();
        let (name, label) = AttributeType::name_and_label(&name, "").ok_or_else(|| {
            CheckoutError::Validation("Attribute type name is required".to_string())
        })?;

        let catalog = self.state.catalog();
        if let Some(found) = catalog.find_attribute_type(&name).await? {
            return Ok(found);
        }
        let created = catalog.insert_attribute_type(&name, &label).await?;
        tracing::info!(attribute_type_id = %created.id, name = %created.name, "Attribute type created");
        Ok(created)
    }

    /// Find or create values of `type_id` for `labels`, matching trimmed
    /// labels without regard to case. Blank and repeated labels are skipped.
    ///
    /// # Errors
    ///
    /// Returns repository errors.
    pub async fn find_or_make_values(
        &self,
        type_id: AttributeTypeId,
        labels: &[String],
    ) -> Result<Vec<AttributeValue>> {
        let catalog = self.state.catalog();
        let mut known = catalog.attribute_values(type_id).await?;
        let mut resolved: Vec<AttributeValue> = Vec::new();

        for label in labels.iter().map(|label| label.trim()).filter(|l| !l.is_empty()) {
            let found = known
                .iter()
                .find(|value| value.value.trim().eq_ignore_ascii_case(label))
                .cloned();
            let value = match found {
                Some(value) => value,
                None => {
                    let value = catalog.insert_attribute_value(type_id, label).await?;
                    known.push(value.clone());
                    value
                }
            };
            if !resolved.iter().any(|existing| existing.id == value.id) {
                resolved.push(value);
            }
        }
        Ok(resolved)
    }

    /// Add an axis with the given value labels to a product.
    ///
    /// # Errors
    ///
    /// Returns a not-found error for unknown products or attribute types.
    #[instrument(skip(self, labels), fields(product_id = %product_id, attribute_type_id = %type_id))]
    pub async fn generate_variations(
        &self,
        product_id: ProductId,
        type_id: AttributeTypeId,
        labels: &[String],
    ) -> Result<GenerationReport> {
        let catalog = self.state.catalog();
        let product = catalog
            .get_product(product_id)
            .await?
            .ok_or_else(|| CheckoutError::NotFound(format!("product {product_id}")))?;
        let attribute_type = catalog
            .get_attribute_type(type_id)
            .await?
            .ok_or_else(|| CheckoutError::NotFound(format!("attribute type {type_id}")))?;

        let values = self.find_or_make_values(type_id, labels).await?;
        let type_values: BTreeSet<_> = catalog
            .attribute_values(type_id)
            .await?
            .into_iter()
            .map(|value| value.id)
            .collect();
        let new_values: Vec<_> = values.iter().map(|value| value.id).collect();
        let existing = catalog.variations(product_id).await?;

        let plan = plan_variations(&product, type_id, &type_values, &new_values, &existing);
        let created = catalog.commit_variations(&plan).await?;

        tracing::info!(
            created = created.len(),
            reactivated = plan.reactivate.len(),
            deactivated = plan.deactivate.len(),
            "Variations generated"
        );

        Ok(GenerationReport {
            attribute_type,
            values,
            created,
            reactivated: plan.reactivate.len(),
            deactivated: plan.deactivate.len(),
        })
    }

    /// The product's variation with exactly `values`, preferring an active
    /// one.
    ///
    /// # Errors
    ///
    /// Returns repository errors.
    pub async fn variation_by_attributes(
        &self,
        product_id: ProductId,
        values: &BTreeSet<AttributeValueId>,
    ) -> Result<Option<ProductVariation>> {
        let mut matches: Vec<_> = self
            .state
            .catalog()
            .variations(product_id)
            .await?
            .into_iter()
            .filter(|variation| variation.matches(values))
            .collect();
        matches.sort_by_key(|variation| !variation.active);
        Ok(matches.into_iter().next())
    }
}

#[cfg(test)]
mod tests {
    use mercato_core::VariationId;

    use super::*;

    fn product() -> Product {
        Product {
            id: ProductId::new(1),
            title: "Shirt".to_string(),
            price: Decimal::new(2000, 2),
            internal_item_id: "SHIRT".to_string(),
            variation_attribute_types: Vec::new(),
        }
    }

    fn variation(id: i32, values: &[i32], active: bool) -> ProductVariation {
        ProductVariation {
            id: VariationId::new(id),
            product_id: ProductId::new(1),
            internal_item_id: format!("SHIRT-{id}"),
            price: Decimal::new(2500, 2),
            stock: 5,
            active,
            attribute_values: values.iter().copied().map(AttributeValueId::new).collect(),
        }
    }

    fn ids(values: &[i32]) -> Vec<AttributeValueId> {
        values.iter().copied().map(AttributeValueId::new).collect()
    }

    // Size: Large = 1. Color: Black = 10, Blue = 11.
    fn colors() -> BTreeSet<AttributeValueId> {
        ids(&[10, 11]).into_iter().collect()
    }

    #[test]
    fn test_first_axis_uses_product_price() {
        let plan = plan_variations(
            &product(),
            AttributeTypeId::new(2),
            &colors(),
            &ids(&[10, 11]),
            &[],
        );
        assert_eq!(plan.create.len(), 2);
        assert!(plan.create.iter().all(|new| new.price == Decimal::new(2000, 2)));
        assert!(plan.create.iter().all(|new| new.stock == 0));
        assert!(plan.deactivate.is_empty());
    }

    #[test]
    fn test_crosses_with_existing_axis() {
        let existing = [variation(5, &[1], true)];
        let plan = plan_variations(
            &product(),
            AttributeTypeId::new(2),
            &colors(),
            &ids(&[10, 11]),
            &existing,
        );

        let sets: Vec<_> = plan.create.iter().map(|new| new.attribute_values.clone()).collect();
        assert_eq!(sets.len(), 2);
        assert!(sets.contains(&ids(&[1, 10]).into_iter().collect()));
        assert!(sets.contains(&ids(&[1, 11]).into_iter().collect()));
        assert!(plan.create.iter().all(|new| new.price == Decimal::new(2500, 2)));
        assert_eq!(plan.deactivate, vec![VariationId::new(5)]);
    }

    #[test]
    fn test_existing_combination_is_not_duplicated() {
        let existing = [variation(5, &[1], true), variation(6, &[1, 10], true)];
        let plan = plan_variations(
            &product(),
            AttributeTypeId::new(2),
            &colors(),
            &ids(&[10, 11]),
            &existing,
        );

        assert_eq!(plan.create.len(), 1);
        let blue = AttributeValueId::new(11);
        assert!(plan.create.iter().all(|new| new.attribute_values.contains(&blue)));
    }

    #[test]
    fn test_inactive_match_is_reactivated() {
        let existing = [variation(5, &[1], true), variation(6, &[10, 1], false)];
        let plan = plan_variations(
            &product(),
            AttributeTypeId::new(2),
            &colors(),
            &ids(&[10]),
            &existing,
        );

        assert!(plan.create.is_empty());
        assert_eq!(plan.reactivate, vec![VariationId::new(6)]);
    }

    #[test]
    fn test_no_values_is_a_no_op() {
        let existing = [variation(5, &[1], true)];
        let plan = plan_variations(&product(), AttributeTypeId::new(2), &colors(), &[], &existing);
        assert!(plan.is_empty());
    }
}
