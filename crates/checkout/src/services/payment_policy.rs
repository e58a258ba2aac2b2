//! What happens when a payment gateway reports back.
//!
//! A successful payment marks the order paid once nothing is outstanding
//! and sends the receipt exactly once. Repeated or concurrent callbacks for
//! the same order are harmless: they run under the order's lock and the
//! receipt is claimed atomically in the repository before sending.

use tracing::instrument;

use mercato_core::{PaymentId, PaymentStatus};

use crate::db::{RepositoryError, SaveMode};
use crate::error::{CheckoutError, Result};
use crate::models::{Order, Payment};
use crate::services::notifications::Notifier;
use crate::state::ShopState;

/// Result of processing a gateway callback.
#[derive(Debug, Clone)]
pub struct PaymentOutcome {
    pub payment: Payment,
    /// The order moved to Paid during this call.
    pub order_paid: bool,
    /// A receipt was delivered during this call.
    pub receipt_sent: bool,
}

/// Record a gateway result for `payment_id` and apply its consequences.
///
/// # Errors
///
/// Returns [`CheckoutError::NotFound`] for unknown payments or orders, and
/// repository errors. A failed receipt is logged, not returned: the claim is
/// released so the next callback tries again.
#[instrument(skip(state, message), fields(payment_id = %payment_id, status = %status))]
pub async fn record_gateway_result(
    state: &ShopState,
    payment_id: PaymentId,
    status: PaymentStatus,
    message: Option<String>,
) -> Result<PaymentOutcome> {
    let existing = state
        .payments()
        .get(payment_id)
        .await?
        .ok_or_else(|| CheckoutError::NotFound("payment".to_string()))?;

    let _guard = state.locks().acquire(existing.order_id).await;

    let payment = state
        .payments()
        .update_status(payment_id, status, message)
        .await
        .map_err(|e| match e {
            RepositoryError::NotFound => CheckoutError::NotFound("payment".to_string()),
            other => CheckoutError::Repository(other),
        })?;

    let mut order = state
        .orders()
        .load(payment.order_id)
        .await?
        .ok_or_else(|| CheckoutError::NotFound("order".to_string()))?;

    on_payment_written(state, &mut order, payment).await
}

/// Apply a stored payment to its order. The caller holds the order's lock.
///
/// # Errors
///
/// Returns repository errors from claiming the receipt or saving the order.
pub async fn on_payment_written(
    state: &ShopState,
    order: &mut Order,
    payment: Payment,
) -> Result<PaymentOutcome> {
    if !payment.status.is_success() {
        tracing::info!(order_id = %order.id(), status = %payment.status, "Payment not successful");
        return Ok(PaymentOutcome {
            payment,
            order_paid: false,
            receipt_sent: false,
        });
    }

    order.attach_payment(payment.clone());
    let order_paid = order.update_payment_status(state.config().outstanding_epsilon, state.now());

    let mut receipt_sent = false;
    if !order.receipt_sent() && state.orders().claim_receipt(order.id()).await? {
        order.mark_receipt_sent();
        match Notifier::new(state).send_receipt(order).await {
            Ok(()) => receipt_sent = true,
            Err(e) => {
                tracing::error!(order_id = %order.id(), error = %e, "Receipt failed, releasing claim");
                state.orders().release_receipt(order.id()).await?;
                order.receipt_sent = false;
            }
        }
    }

    if order_paid || receipt_sent {
        state.orders().save(order, SaveMode::Changed).await?;
    }

    if order_paid {
        tracing::info!(order_id = %order.id(), total = %order.total(), "Order paid");
        for observer in state.observers() {
            observer.on_paid(order).await;
        }
    }

    Ok(PaymentOutcome {
        payment,
        order_paid,
        receipt_sent,
    })
}
