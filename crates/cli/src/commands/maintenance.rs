//! Cart housekeeping.

use mercato_checkout::services::prune_stale_modifiers;

use super::{CommandError, offline_state};

/// Remove modifiers that are no longer configured from every cart.
pub async fn prune_modifiers() -> Result<(), CommandError> {
    let state = offline_state().await?;

    let report = prune_stale_modifiers(&state).await?;

    tracing::info!(
        "Scanned {} carts, updated {}, removed {} modifiers",
        report.carts_scanned,
        report.carts_updated,
        report.modifiers_removed
    );
    Ok(())
}
