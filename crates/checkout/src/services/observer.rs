//! Hooks for code that reacts to order lifecycle events.

use async_trait::async_trait;

use crate::models::Order;

/// Receives order lifecycle events.
///
/// Hooks run after the order has been saved, inside the order's lock, so
/// they see the persisted state. They cannot fail the operation; errors
/// should be handled inside the hook.
#[async_trait]
pub trait OrderObserver: Send + Sync {
    /// The order left the cart and is awaiting payment.
    async fn on_placed(&self, _order: &Order) {}

    /// Successful payments now cover the order's total.
    async fn on_paid(&self, _order: &Order) {}
}
