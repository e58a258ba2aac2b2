//! Placing orders and handling what happens to them afterwards.
//!
//! [`OrderProcessor`] is bound to one order. Every operation takes the
//! order's lock, loads the aggregate, changes it and saves it before the
//! lock is released. Failures the customer should see are also kept as the
//! processor's last error message.

use rust_decimal::Decimal;
use tokio::sync::OwnedMutexGuard;
use tracing::instrument;

use mercato_core::{MemberId, Money, OrderId, OrderStatus, PaymentId, PaymentStatus, SessionId};

use crate::db::SaveMode;
use crate::error::{CheckoutError, Result};
use crate::models::{NewPayment, Order, Payment, StatusNote};
use crate::services::notifications::Notifier;
use crate::services::payment_policy::{self, PaymentOutcome};
use crate::state::ShopState;

/// Checkout and fulfilment operations on a single order.
#[derive(Debug, Clone)]
pub struct OrderProcessor {
    state: ShopState,
    order_id: OrderId,
    error: Option<String>,
}

impl OrderProcessor {
    #[must_use]
    pub fn new(state: &ShopState, order_id: OrderId) -> Self {
        Self {
            state: state.clone(),
            order_id,
            error: None,
        }
    }

    #[must_use]
    pub const fn order_id(&self) -> OrderId {
        self.order_id
    }

    /// Message of the last failed operation.
    #[must_use]
    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    /// Keep the message of customer-facing failures.
    fn record<T>(&mut self, result: Result<T>) -> Result<T> {
        match &result {
            Ok(_) => self.error = None,
            Err(e) if e.is_user_facing() => self.error = Some(e.to_string()),
            Err(e) => {
                self.error = None;
                tracing::warn!(order_id = %self.order_id, error = %e, "Order operation failed");
            }
        }
        result
    }

    async fn lock_and_load(&self) -> Result<(OwnedMutexGuard<()>, Order)> {
        let guard = self.state.locks().acquire(self.order_id).await;
        let order = self
            .state
            .orders()
            .load(self.order_id)
            .await?
            .ok_or_else(|| CheckoutError::NotFound(format!("order {}", self.order_id)))?;
        Ok((guard, order))
    }

    /// Check an order can leave the cart.
    ///
    /// # Errors
    ///
    /// Returns a validation error if the order is not a cart or has no
    /// items.
    pub fn can_place(order: &Order) -> Result<()> {
        if !order.status().is_cart() {
            return Err(CheckoutError::Validation("Order is not a cart".to_string()));
        }
        if order.items().is_empty() {
            return Err(CheckoutError::Validation("Order has no items".to_string()));
        }
        Ok(())
    }

    /// Recompute and persist the order's total.
    ///
    /// # Errors
    ///
    /// Returns an error if the order does not exist or cannot be saved.
    #[instrument(skip(self), fields(order_id = %self.order_id))]
    pub async fn calculate(&mut self) -> Result<Decimal> {
        let result = self.calculate_inner().await;
        self.record(result)
    }

    async fn calculate_inner(&self) -> Result<Decimal> {
        let (_guard, mut order) = self.lock_and_load().await?;
        let total = order.calculate(self.state.pipeline());
        self.state.orders().save(&mut order, SaveMode::Changed).await?;
        Ok(total)
    }

    /// Take the order from cart to awaiting payment.
    ///
    /// Totals are recalculated one last time, every item and modifier is
    /// rewritten, and the order is remembered against `session`.
    ///
    /// # Errors
    ///
    /// Returns a validation error if the order does not exist, is not a cart
    /// or has no items; the message is also available from [`Self::error`].
    #[instrument(skip(self, session), fields(order_id = %self.order_id))]
    pub async fn place_order(&mut self, session: SessionId) -> Result<Order> {
        let result = self.place_order_inner(session).await;
        self.record(result)
    }

    async fn place_order_inner(&self, session: SessionId) -> Result<Order> {
        let _guard = self.state.locks().acquire(self.order_id).await;
        let mut order = self.state.orders().load(self.order_id).await?.ok_or_else(|| {
            CheckoutError::Validation("A new order has not yet been started.".to_string())
        })?;

        order.calculate(self.state.pipeline());
        Self::can_place(&order)?;

        order.place(self.state.now());
        self.state.orders().save(&mut order, SaveMode::Everything).await?;

        let sessions = self.state.sessions();
        sessions.record_placed_order(session, order.id()).await;
        if sessions.current_order(session).await == Some(order.id()) {
            sessions.clear(session).await;
        }

        for observer in self.state.observers() {
            observer.on_placed(&order).await;
        }

        tracing::info!(total = %order.total(), items = order.items().len(), "Order placed");
        Ok(order)
    }

    /// Start a payment for the outstanding amount.
    ///
    /// # Errors
    ///
    /// Returns an authorization error when nothing is owed and a
    /// configuration error for payment methods the shop does not accept.
    #[instrument(skip(self, ip_address), fields(order_id = %self.order_id))]
    pub async fn create_payment(
        &mut self,
        method: &str,
        ip_address: Option<String>,
    ) -> Result<Payment> {
        let result = self.create_payment_inner(method, ip_address).await;
        self.record(result)
    }

    async fn create_payment_inner(
        &self,
        method: &str,
        ip_address: Option<String>,
    ) -> Result<Payment> {
        let (_guard, mut order) = self.lock_and_load().await?;
        let epsilon = self.state.config().outstanding_epsilon;

        if !order.can_pay(epsilon) {
            return Err(CheckoutError::Authorization("Order is not payable".to_string()));
        }
        let method = self
            .state
            .config()
            .payment_methods
            .resolve(method)
            .ok_or_else(|| CheckoutError::Configuration("Incorrect payment class.".to_string()))?;

        let payment = self
            .state
            .payments()
            .insert(NewPayment {
                order_id: order.id(),
                method,
                amount: Money::new(order.total_outstanding(epsilon), order.currency()),
                ip_address,
            })
            .await?;
        order.attach_payment(payment.clone());

        tracing::info!(payment_id = %payment.id, amount = %payment.amount, method = method.as_str(), "Payment created");
        Ok(payment)
    }

    /// Record the gateway's verdict on one of this order's payments.
    ///
    /// # Errors
    ///
    /// Returns a not-found error for unknown payments or payments of other
    /// orders.
    #[instrument(skip(self, message), fields(order_id = %self.order_id, payment_id = %payment_id))]
    pub async fn complete_payment(
        &mut self,
        payment_id: PaymentId,
        status: PaymentStatus,
        message: Option<String>,
    ) -> Result<PaymentOutcome> {
        let result = self.complete_payment_inner(payment_id, status, message).await;
        self.record(result)
    }

    async fn complete_payment_inner(
        &self,
        payment_id: PaymentId,
        status: PaymentStatus,
        message: Option<String>,
    ) -> Result<PaymentOutcome> {
        let belongs = self
            .state
            .payments()
            .get(payment_id)
            .await?
            .is_some_and(|payment| payment.order_id == self.order_id);
        if !belongs {
            return Err(CheckoutError::NotFound("payment".to_string()));
        }
        payment_policy::record_gateway_result(&self.state, payment_id, status, message).await
    }

    /// Email the receipt and mark it sent, whether or not it was sent before.
    ///
    /// # Errors
    ///
    /// Returns an error if the receipt cannot be delivered or the order
    /// cannot be saved.
    #[instrument(skip(self), fields(order_id = %self.order_id))]
    pub async fn send_receipt(&mut self) -> Result<()> {
        let result = self.send_receipt_inner().await;
        self.record(result)
    }

    async fn send_receipt_inner(&self) -> Result<()> {
        let (_guard, mut order) = self.lock_and_load().await?;
        Notifier::new(&self.state).send_receipt(&order).await?;
        order.mark_receipt_sent();
        self.state.orders().save(&mut order, SaveMode::Changed).await?;
        Ok(())
    }

    /// Email the member about the order's status.
    ///
    /// # Errors
    ///
    /// Returns a not-found error when the order has no member.
    #[instrument(skip(self, title, note), fields(order_id = %self.order_id))]
    pub async fn send_status_change(
        &mut self,
        title: Option<String>,
        note: Option<String>,
    ) -> Result<()> {
        let result = self.send_status_change_inner(title, note).await;
        self.record(result)
    }

    async fn send_status_change_inner(
        &self,
        title: Option<String>,
        note: Option<String>,
    ) -> Result<()> {
        let (_guard, order) = self.lock_and_load().await?;
        Notifier::new(&self.state)
            .send_status_change(&order, title, note)
            .await
    }

    /// Move a placed order along the fulfilment lifecycle.
    ///
    /// Customer-visible changes are emailed to the order's member.
    ///
    /// # Errors
    ///
    /// Returns a validation error for transitions the lifecycle does not
    /// allow.
    #[instrument(skip(self, note), fields(order_id = %self.order_id, status = %next))]
    pub async fn update_status(&mut self, next: OrderStatus, note: StatusNote) -> Result<Order> {
        let result = self.update_status_inner(next, note).await;
        self.record(result)
    }

    async fn update_status_inner(&self, next: OrderStatus, note: StatusNote) -> Result<Order> {
        let (_guard, mut order) = self.lock_and_load().await?;
        let notify = note.notify_customer.then(|| (note.title.clone(), note.note.clone()));

        order.transition_to(next, note, self.state.now())?;
        self.state.orders().save(&mut order, SaveMode::Changed).await?;
        tracing::info!("Order status updated");

        if let Some((title, note)) = notify {
            if let Err(e) = Notifier::new(&self.state)
                .send_status_change(&order, title, note)
                .await
            {
                tracing::warn!(error = %e, "Status change email not sent");
            }
        }
        Ok(order)
    }

    /// Cancel on behalf of `member`, if the cancellation policy allows it.
    ///
    /// # Errors
    ///
    /// Returns an authorization error when the order belongs to someone else
    /// or can no longer be cancelled.
    #[instrument(skip(self), fields(order_id = %self.order_id))]
    pub async fn cancel_by_member(&mut self, member: MemberId) -> Result<Order> {
        let result = self.cancel_by_member_inner(member).await;
        self.record(result)
    }

    async fn cancel_by_member_inner(&self, member: MemberId) -> Result<Order> {
        let (_guard, mut order) = self.lock_and_load().await?;
        if order.member_id != Some(member) {
            return Err(CheckoutError::Authorization(
                "This order belongs to another customer".to_string(),
            ));
        }
        order.cancel_by_member(&self.state.config().cancellation, self.state.now())?;
        self.state.orders().save(&mut order, SaveMode::Changed).await?;
        tracing::info!("Order cancelled by member");
        Ok(order)
    }

    /// Cancel from the back office.
    ///
    /// # Errors
    ///
    /// Returns a validation error for carts and closed orders.
    #[instrument(skip(self, note), fields(order_id = %self.order_id))]
    pub async fn cancel_by_admin(&mut self, note: StatusNote) -> Result<Order> {
        let result = self.cancel_by_admin_inner(note).await;
        self.record(result)
    }

    async fn cancel_by_admin_inner(&self, note: StatusNote) -> Result<Order> {
        let (_guard, mut order) = self.lock_and_load().await?;
        order.cancel_by_admin(note, self.state.now())?;
        self.state.orders().save(&mut order, SaveMode::Changed).await?;
        tracing::info!("Order cancelled by admin");
        Ok(order)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::sync::Arc;

    use mercato_core::{CurrencyCode, Email, ProductId};

    use super::*;
    use crate::config::{DeliveryPolicy, ShopConfig};
    use crate::db::{MemoryStore, OrderRepository};
    use crate::models::Buyable;
    use crate::services::email::MemoryMailer;

    fn state() -> ShopState {
        let config = ShopConfig::new(Email::parse("admin@example.com").unwrap());
        ShopState::builder(config, Arc::new(MemoryStore::new()))
            .mailer(Arc::new(MemoryMailer::new()))
            .build()
            .unwrap()
    }

    async fn cart_with_item(state: &ShopState) -> OrderId {
        let mut order = state.orders().create_cart(None, CurrencyCode::USD).await.unwrap();
        order
            .add_item(Buyable::Product(ProductId::new(1)), "Mug", Decimal::new(1000, 2), 2)
            .unwrap();
        state.orders().save(&mut order, SaveMode::Changed).await.unwrap();
        order.id()
    }

    #[tokio::test]
    async fn test_place_order_moves_to_unpaid() {
        let state = state();
        let id = cart_with_item(&state).await;
        let mut processor = OrderProcessor::new(&state, id);

        let order = processor.place_order(SessionId::generate()).await.unwrap();

        assert_eq!(order.status(), OrderStatus::Unpaid);
        assert_eq!(order.total(), Decimal::new(2000, 2));
        assert_eq!(processor.error(), None);
    }

    #[tokio::test]
    async fn test_place_empty_cart_records_error() {
        let state = state();
        let order = state.orders().create_cart(None, CurrencyCode::USD).await.unwrap();
        let mut processor = OrderProcessor::new(&state, order.id());

        let err = processor.place_order(SessionId::generate()).await.unwrap_err();

        assert!(matches!(err, CheckoutError::Validation(_)));
        assert_eq!(processor.error(), Some("Order has no items"));
        let stored = state.orders().load(order.id()).await.unwrap().unwrap();
        assert_eq!(stored.status(), OrderStatus::Cart);
    }

    #[tokio::test]
    async fn test_place_missing_order() {
        let state = state();
        let mut processor = OrderProcessor::new(&state, OrderId::new(404));

        processor.place_order(SessionId::generate()).await.unwrap_err();

        assert_eq!(processor.error(), Some("A new order has not yet been started."));
    }

    #[tokio::test]
    async fn test_create_payment_requires_known_method() {
        let state = state();
        let id = cart_with_item(&state).await;
        let mut processor = OrderProcessor::new(&state, id);
        processor.place_order(SessionId::generate()).await.unwrap();

        processor.create_payment("bitcoin", None).await.unwrap_err();
        assert_eq!(processor.error(), Some("Incorrect payment class."));

        let payment = processor.create_payment("manual", None).await.unwrap();
        assert_eq!(payment.amount.amount, Decimal::new(2000, 2));
        assert_eq!(payment.status, PaymentStatus::Incomplete);
    }

    #[tokio::test]
    async fn test_infrastructure_failure_clears_last_error() {
        let mailer = MemoryMailer::new();
        let mut config = ShopConfig::new(Email::parse("admin@example.com").unwrap());
        config.delivery = DeliveryPolicy {
            max_attempts: 1,
            initial_backoff: std::time::Duration::from_millis(1),
        };
        let state = ShopState::builder(config, Arc::new(MemoryStore::new()))
            .mailer(Arc::new(mailer.clone()))
            .build()
            .unwrap();
        let id = cart_with_item(&state).await;
        let mut processor = OrderProcessor::new(&state, id);

        processor.create_payment("manual", None).await.unwrap_err();
        assert_eq!(processor.error(), Some("Order is not payable"));

        let mut order = state.orders().load(id).await.unwrap().unwrap();
        order.customer.email = Some(Email::parse("jane@example.com").unwrap());
        state.orders().save(&mut order, SaveMode::Changed).await.unwrap();
        mailer.fail_next(u32::MAX);
        let err = processor.send_receipt().await.unwrap_err();

        assert!(matches!(err, CheckoutError::Email(_)));
        assert_eq!(processor.error(), None);
    }

    #[tokio::test]
    async fn test_cart_is_not_payable() {
        let state = state();
        let order = state.orders().create_cart(None, CurrencyCode::USD).await.unwrap();
        let mut processor = OrderProcessor::new(&state, order.id());

        let err = processor.create_payment("manual", None).await.unwrap_err();

        assert!(matches!(err, CheckoutError::Authorization(_)));
        assert_eq!(processor.error(), Some("Order is not payable"));
    }
}
