//! Housekeeping over stored orders.

use tracing::instrument;

use crate::db::SaveMode;
use crate::error::Result;
use crate::state::ShopState;

/// Outcome of [`prune_stale_modifiers`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PruneReport {
    pub carts_scanned: usize,
    pub carts_updated: usize,
    pub modifiers_removed: usize,
}

/// Delete modifiers whose key is no longer configured from every cart and
/// recalculate the affected totals.
///
/// # Errors
///
/// Returns the first repository error; carts processed before it stay
/// pruned.
#[instrument(skip(state))]
pub async fn prune_stale_modifiers(state: &ShopState) -> Result<PruneReport> {
    let mut report = PruneReport::default();

    for id in state.orders().cart_ids().await? {
        let _guard = state.locks().acquire(id).await;
        let Some(mut order) = state.orders().load(id).await? else {
            continue;
        };
        if !order.status().is_cart() {
            continue;
        }
        report.carts_scanned += 1;

        let removed = order.queue_stale_modifiers(state.pipeline());
        if removed == 0 {
            continue;
        }
        order.calculate(state.pipeline());
        state.orders().save(&mut order, SaveMode::Changed).await?;

        tracing::debug!(order_id = %id, removed, "Stale modifiers removed");
        report.carts_updated += 1;
        report.modifiers_removed += removed;
    }

    tracing::info!(
        carts = report.carts_scanned,
        updated = report.carts_updated,
        removed = report.modifiers_removed,
        "Stale modifier pruning finished"
    );
    Ok(report)
}
