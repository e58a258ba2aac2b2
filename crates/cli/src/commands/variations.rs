//! Product variation commands.
//!
//! # Usage
//!
//! ```bash
//! mercato variations generate --product 12 --attribute color --values Black,Blue
//! ```

use mercato_checkout::services::VariationGenerator;
use mercato_core::ProductId;

use super::{CommandError, offline_state};

/// Add an attribute axis to a product.
pub async fn generate(product: i32, attribute: &str, values: &[String]) -> Result<(), CommandError> {
    let state = offline_state().await?;
    let generator = VariationGenerator::new(&state);

    let attribute_type = generator.find_or_make_attribute_type(attribute).await?;
    tracing::info!("Generating {} variations for product {}", attribute_type.label, product);

    let report = generator
        .generate_variations(ProductId::new(product), attribute_type.id, values)
        .await?;

    for variation in &report.created {
        tracing::info!("  Created {} ({})", variation.internal_item_id, variation.id);
    }
    tracing::info!(
        "Done: {} created, {} reactivated, {} deactivated",
        report.created.len(),
        report.reactivated,
        report.deactivated
    );
    Ok(())
}
