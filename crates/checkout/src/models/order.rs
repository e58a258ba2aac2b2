//! The order aggregate.
//!
//! An [`Order`] starts life as a shopper's cart and, once placed, moves through
//! the fulfilment states in [`OrderStatus`]. Cart editing is only possible
//! while the order is a cart; after placement the items and modifiers are
//! frozen and only status, payments and customer-facing flags change.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;

use mercato_core::{
    CurrencyCode, Email, MemberId, Money, OrderId, OrderItemId, OrderModifierId, OrderStatus,
};

use super::{
    Buyable, CustomerDetails, Member, ModifierKey, OrderItem, OrderModifier, OrderStatusLog,
    Payment, ShippingDetails, StatusNote,
};
use crate::config::CancellationPolicy;
use crate::error::{CheckoutError, Result};

/// Payment differences below this are ignored: 0.01.
pub const DEFAULT_OUTSTANDING_EPSILON: Decimal = Decimal::from_parts(1, 0, 0, false, 2);

/// An order and everything it owns.
#[derive(Debug, Clone)]
pub struct Order {
    pub(crate) id: OrderId,
    pub(crate) status: OrderStatus,
    pub member_id: Option<MemberId>,
    pub customer: CustomerDetails,
    /// Ship to [`Self::shipping`] instead of the billing address.
    pub use_shipping_address: bool,
    pub shipping: ShippingDetails,
    pub printed: bool,
    pub(crate) currency: CurrencyCode,
    pub(crate) total: Decimal,
    pub(crate) receipt_sent: bool,
    pub(crate) created_at: DateTime<Utc>,
    pub(crate) updated_at: DateTime<Utc>,
    /// Optimistic lock, bumped on every save.
    pub(crate) version: i32,
    pub(crate) items: Vec<OrderItem>,
    /// Kept sorted by `sort`.
    pub(crate) modifiers: Vec<OrderModifier>,
    pub(crate) status_logs: Vec<OrderStatusLog>,
    pub(crate) payments: Vec<Payment>,
    pub(crate) removed_items: Vec<OrderItemId>,
    pub(crate) removed_modifiers: Vec<OrderModifierId>,
}

impl Order {
    /// A fresh, empty cart.
    #[must_use]
    pub fn new_cart(
        id: OrderId,
        member_id: Option<MemberId>,
        currency: CurrencyCode,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            status: OrderStatus::Cart,
            member_id,
            customer: CustomerDetails::default(),
            use_shipping_address: false,
            shipping: ShippingDetails::default(),
            printed: false,
            currency,
            total: Decimal::ZERO,
            receipt_sent: false,
            created_at: now,
            updated_at: now,
            version: 0,
            items: Vec::new(),
            modifiers: Vec::new(),
            status_logs: Vec::new(),
            payments: Vec::new(),
            removed_items: Vec::new(),
            removed_modifiers: Vec::new(),
        }
    }

    #[must_use]
    pub const fn id(&self) -> OrderId {
        self.id
    }

    #[must_use]
    pub const fn status(&self) -> OrderStatus {
        self.status
    }

    #[must_use]
    pub const fn currency(&self) -> CurrencyCode {
        self.currency
    }

    /// Total cached by the last calculation.
    #[must_use]
    pub const fn total(&self) -> Decimal {
        self.total
    }

    #[must_use]
    pub const fn total_money(&self) -> Money {
        Money::new(self.total, self.currency)
    }

    #[must_use]
    pub const fn receipt_sent(&self) -> bool {
        self.receipt_sent
    }

    #[must_use]
    pub const fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    #[must_use]
    pub const fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    #[must_use]
    pub const fn version(&self) -> i32 {
        self.version
    }

    #[must_use]
    pub fn items(&self) -> &[OrderItem] {
        &self.items
    }

    #[must_use]
    pub fn item(&self, buyable: Buyable) -> Option<&OrderItem> {
        self.items.iter().find(|item| item.buyable == buyable)
    }

    /// Total quantity across all lines.
    #[must_use]
    pub fn quantity(&self) -> u32 {
        self.items.iter().map(|item| item.quantity).sum()
    }

    /// Modifiers in ascending `sort` order.
    #[must_use]
    pub fn modifiers(&self) -> &[OrderModifier] {
        &self.modifiers
    }

    #[must_use]
    pub fn modifier(&self, key: &ModifierKey) -> Option<&OrderModifier> {
        self.modifiers.iter().find(|modifier| &modifier.key == key)
    }

    #[must_use]
    pub fn status_logs(&self) -> &[OrderStatusLog] {
        &self.status_logs
    }

    #[must_use]
    pub fn payments(&self) -> &[Payment] {
        &self.payments
    }

    /// Sum of line totals.
    #[must_use]
    pub fn subtotal(&self) -> Decimal {
        self.items.iter().map(OrderItem::line_total).sum()
    }

    // ------------------------------------------------------------------
    // Cart editing
    // ------------------------------------------------------------------

    fn ensure_cart(&self) -> Result<()> {
        if self.status.is_cart() {
            Ok(())
        } else {
            Err(CheckoutError::Validation("Order is not a cart".to_string()))
        }
    }

    /// Add `quantity` of a buyable, merging with an existing line.
    ///
    /// # Errors
    ///
    /// Returns a validation error if the order is not a cart or `quantity`
    /// is zero.
    pub fn add_item(
        &mut self,
        buyable: Buyable,
        title: impl Into<String>,
        unit_price: Decimal,
        quantity: u32,
    ) -> Result<()> {
        self.ensure_cart()?;
        if quantity == 0 {
            return Err(CheckoutError::Validation(
                "Quantity must be at least 1".to_string(),
            ));
        }

        if let Some(item) = self.items.iter_mut().find(|item| item.buyable == buyable) {
            item.set_quantity(item.quantity.saturating_add(quantity));
        } else {
            self.items
                .push(OrderItem::new(self.id, buyable, title, unit_price, quantity));
        }
        Ok(())
    }

    /// Set the quantity of an existing line; zero removes it.
    ///
    /// # Errors
    ///
    /// Returns a validation error if the order is not a cart, or not found if
    /// the buyable is not in the cart.
    pub fn set_quantity(&mut self, buyable: Buyable, quantity: u32) -> Result<()> {
        self.ensure_cart()?;
        if quantity == 0 {
            self.remove_item(buyable)?;
            return Ok(());
        }
        let item = self
            .items
            .iter_mut()
            .find(|item| item.buyable == buyable)
            .ok_or_else(|| CheckoutError::NotFound("cart item".to_string()))?;
        item.set_quantity(quantity);
        Ok(())
    }

    /// Remove a line. Returns whether anything was removed.
    ///
    /// # Errors
    ///
    /// Returns a validation error if the order is not a cart.
    pub fn remove_item(&mut self, buyable: Buyable) -> Result<bool> {
        self.ensure_cart()?;
        let Some(index) = self.items.iter().position(|item| item.buyable == buyable) else {
            return Ok(false);
        };
        let item = self.items.remove(index);
        if let Some(id) = item.id {
            self.removed_items.push(id);
        }
        Ok(true)
    }

    /// Remove every line.
    ///
    /// # Errors
    ///
    /// Returns a validation error if the order is not a cart.
    pub fn clear(&mut self) -> Result<()> {
        self.ensure_cart()?;
        self.removed_items
            .extend(self.items.drain(..).filter_map(|item| item.id));
        Ok(())
    }

    // ------------------------------------------------------------------
    // Customer helpers
    // ------------------------------------------------------------------

    /// Customer name from the billing snapshot.
    #[must_use]
    pub fn name(&self) -> String {
        self.customer.name()
    }

    #[must_use]
    pub fn full_billing_address(&self) -> String {
        self.customer.address_lines().join("\n")
    }

    /// Shipping address, or the billing address when no separate shipping
    /// address is used.
    #[must_use]
    pub fn full_shipping_address(&self) -> String {
        if self.use_shipping_address {
            self.shipping.address_lines().join("\n")
        } else {
            self.full_billing_address()
        }
    }

    /// Address to send customer email to.
    ///
    /// Prefers the member's address when the member record was edited after
    /// the order, so a changed address is picked up.
    #[must_use]
    pub fn latest_email<'a>(&'a self, member: Option<&'a Member>) -> Option<&'a Email> {
        match member {
            Some(member) if member.last_edited > self.updated_at => Some(&member.email),
            Some(member) => self.customer.email.as_ref().or(Some(&member.email)),
            None => self.customer.email.as_ref(),
        }
    }

    // ------------------------------------------------------------------
    // Payments
    // ------------------------------------------------------------------

    /// Sum of successful payments.
    #[must_use]
    pub fn total_paid(&self) -> Decimal {
        self.payments
            .iter()
            .filter(|payment| payment.status.is_success())
            .map(|payment| payment.amount.amount)
            .sum()
    }

    /// What is still owed; differences smaller than `epsilon` count as zero.
    #[must_use]
    pub fn total_outstanding(&self, epsilon: Decimal) -> Decimal {
        let outstanding = self.total - self.total_paid();
        if outstanding.abs() < epsilon {
            Decimal::ZERO
        } else {
            outstanding
        }
    }

    #[must_use]
    pub fn can_pay(&self, epsilon: Decimal) -> bool {
        self.total_outstanding(epsilon) > Decimal::ZERO
    }

    /// Insert or refresh a payment in the snapshot.
    pub(crate) fn attach_payment(&mut self, payment: Payment) {
        if let Some(existing) = self.payments.iter_mut().find(|p| p.id == payment.id) {
            *existing = payment;
        } else {
            self.payments.push(payment);
        }
    }

    /// Mark the order paid once nothing is outstanding.
    ///
    /// Only unpaid or queried orders with a positive total move to Paid.
    /// Returns whether the status changed.
    pub fn update_payment_status(&mut self, epsilon: Decimal, now: DateTime<Utc>) -> bool {
        let awaiting = matches!(self.status, OrderStatus::Unpaid | OrderStatus::Query);
        if !awaiting || self.total <= Decimal::ZERO || self.total_outstanding(epsilon) > Decimal::ZERO
        {
            return false;
        }
        self.status = OrderStatus::Paid;
        self.updated_at = now;
        self.log_status(OrderStatus::Paid, "Paid".to_string(), None, false, now);
        true
    }

    pub(crate) const fn mark_receipt_sent(&mut self) {
        self.receipt_sent = true;
    }

    // ------------------------------------------------------------------
    // Status
    // ------------------------------------------------------------------

    /// Append a status log entry.
    pub fn log_status(
        &mut self,
        status: OrderStatus,
        title: String,
        note: Option<String>,
        sent_to_customer: bool,
        now: DateTime<Utc>,
    ) {
        self.status_logs.push(OrderStatusLog {
            id: None,
            order_id: self.id,
            status,
            title,
            note,
            sent_to_customer,
            created_at: now,
        });
    }

    /// Most recent log entry the customer may see.
    #[must_use]
    pub fn latest_customer_log(&self) -> Option<&OrderStatusLog> {
        self.status_logs
            .iter()
            .filter(|log| log.sent_to_customer)
            .max_by_key(|log| (log.created_at, log.id))
    }

    /// Move a placed order along the fulfilment lifecycle.
    ///
    /// # Errors
    ///
    /// Returns a validation error for carts (which are placed through
    /// checkout) and for transitions the lifecycle does not allow.
    pub fn transition_to(
        &mut self,
        next: OrderStatus,
        note: StatusNote,
        now: DateTime<Utc>,
    ) -> Result<()> {
        if self.status.is_cart() {
            return Err(CheckoutError::Validation(
                "Orders can only leave the cart by being placed".to_string(),
            ));
        }
        if !self.status.can_transition_to(next) {
            return Err(CheckoutError::Validation(format!(
                "Cannot change order status from {} to {}",
                self.status, next
            )));
        }
        self.status = next;
        self.updated_at = now;
        let title = note.title.unwrap_or_else(|| next.as_str().to_string());
        self.log_status(next, title, note.note, note.notify_customer, now);
        Ok(())
    }

    /// Flag a problem with the order.
    ///
    /// # Errors
    ///
    /// See [`Self::transition_to`].
    pub fn mark_query(&mut self, note: StatusNote, now: DateTime<Utc>) -> Result<()> {
        self.transition_to(OrderStatus::Query, note, now)
    }

    /// Start preparing a paid order.
    ///
    /// # Errors
    ///
    /// See [`Self::transition_to`].
    pub fn mark_processing(&mut self, note: StatusNote, now: DateTime<Utc>) -> Result<()> {
        self.transition_to(OrderStatus::Processing, note, now)
    }

    /// Record dispatch.
    ///
    /// # Errors
    ///
    /// See [`Self::transition_to`].
    pub fn mark_sent(&mut self, note: StatusNote, now: DateTime<Utc>) -> Result<()> {
        self.transition_to(OrderStatus::Sent, note, now)
    }

    /// Close a delivered order.
    ///
    /// # Errors
    ///
    /// See [`Self::transition_to`].
    pub fn mark_complete(&mut self, note: StatusNote, now: DateTime<Utc>) -> Result<()> {
        self.transition_to(OrderStatus::Complete, note, now)
    }

    /// Cancel on behalf of the order's member.
    ///
    /// # Errors
    ///
    /// Returns an authorization error when the policy does not allow
    /// cancelling from the current status.
    pub fn cancel_by_member(
        &mut self,
        policy: &CancellationPolicy,
        now: DateTime<Utc>,
    ) -> Result<()> {
        if !policy.can_cancel(self.status) {
            return Err(CheckoutError::Authorization(
                "This order can no longer be cancelled".to_string(),
            ));
        }
        self.status = OrderStatus::MemberCancelled;
        self.updated_at = now;
        self.log_status(
            OrderStatus::MemberCancelled,
            "Cancelled by customer".to_string(),
            None,
            true,
            now,
        );
        Ok(())
    }

    /// Cancel from the back office.
    ///
    /// # Errors
    ///
    /// Returns a validation error for carts and already-closed orders.
    pub fn cancel_by_admin(&mut self, note: StatusNote, now: DateTime<Utc>) -> Result<()> {
        if self.status.is_cart() || self.status.is_terminal() {
            return Err(CheckoutError::Validation(format!(
                "Cannot cancel an order with status {}",
                self.status
            )));
        }
        self.status = OrderStatus::AdminCancelled;
        self.updated_at = now;
        let title = note.title.unwrap_or_else(|| "Cancelled".to_string());
        self.log_status(
            OrderStatus::AdminCancelled,
            title,
            note.note,
            note.notify_customer,
            now,
        );
        Ok(())
    }

    /// Cart to Unpaid; marks every item and modifier for rewriting.
    pub(crate) fn place(&mut self, now: DateTime<Utc>) {
        self.status = OrderStatus::Unpaid;
        self.updated_at = now;
        self.items.iter_mut().for_each(OrderItem::mark_dirty);
        self.modifiers.iter_mut().for_each(OrderModifier::mark_dirty);
    }

    // ------------------------------------------------------------------
    // Persistence bookkeeping
    // ------------------------------------------------------------------

    pub(crate) fn sort_modifiers(&mut self) {
        self.modifiers.sort_by_key(|modifier| modifier.sort);
    }

    /// Drop a modifier, queueing its row for deletion.
    pub(crate) fn detach_modifier(&mut self, key: &ModifierKey) -> Option<OrderModifier> {
        let index = self.modifiers.iter().position(|m| &m.key == key)?;
        let modifier = self.modifiers.remove(index);
        if let Some(id) = modifier.id {
            self.removed_modifiers.push(id);
        }
        Some(modifier)
    }

    #[must_use]
    pub fn has_pending_removals(&self) -> bool {
        !self.removed_items.is_empty() || !self.removed_modifiers.is_empty()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use chrono::TimeZone;
    use mercato_core::{PaymentId, PaymentStatus, ProductId};

    use super::*;
    use crate::models::PaymentMethod;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 10, 18, 9, 0, 0).unwrap()
    }

    fn cart() -> Order {
        Order::new_cart(OrderId::new(1), None, CurrencyCode::USD, now())
    }

    fn payment(id: i32, amount: Decimal, status: PaymentStatus) -> Payment {
        Payment {
            id: PaymentId::new(id),
            order_id: OrderId::new(1),
            method: PaymentMethod::Manual,
            amount: Money::new(amount, CurrencyCode::USD),
            status,
            message: None,
            ip_address: None,
            created_at: now(),
            updated_at: now(),
        }
    }

    fn product(id: i32) -> Buyable {
        Buyable::Product(ProductId::new(id))
    }

    #[test]
    fn test_add_item_merges_quantity() {
        let mut order = cart();
        order.add_item(product(1), "Mug", Decimal::from(8), 1).unwrap();
        order.add_item(product(1), "Mug", Decimal::from(8), 2).unwrap();
        assert_eq!(order.items().len(), 1);
        assert_eq!(order.item(product(1)).unwrap().quantity, 3);
        assert_eq!(order.subtotal(), Decimal::from(24));
    }

    #[test]
    fn test_add_zero_quantity_rejected() {
        let mut order = cart();
        let err = order.add_item(product(1), "Mug", Decimal::from(8), 0).unwrap_err();
        assert!(matches!(err, CheckoutError::Validation(_)));
    }

    #[test]
    fn test_set_quantity_zero_removes_and_queues_delete() {
        let mut order = cart();
        order.add_item(product(1), "Mug", Decimal::from(8), 1).unwrap();
        order.items.first_mut().unwrap().id = Some(OrderItemId::new(10));
        order.set_quantity(product(1), 0).unwrap();
        assert!(order.items().is_empty());
        assert_eq!(order.removed_items, vec![OrderItemId::new(10)]);
    }

    #[test]
    fn test_remove_missing_item_returns_false() {
        let mut order = cart();
        assert!(!order.remove_item(product(3)).unwrap());
    }

    #[test]
    fn test_placed_order_rejects_cart_edits() {
        let mut order = cart();
        order.add_item(product(1), "Mug", Decimal::from(8), 1).unwrap();
        order.place(now());
        assert!(order.add_item(product(2), "Cup", Decimal::ONE, 1).is_err());
        assert!(order.set_quantity(product(1), 5).is_err());
        assert!(order.remove_item(product(1)).is_err());
        assert!(order.clear().is_err());
    }

    #[test]
    fn test_total_outstanding_ignores_rounding_noise() {
        let mut order = cart();
        order.total = Decimal::new(19_995, 3);
        order.attach_payment(payment(1, Decimal::new(2000, 2), PaymentStatus::Success));
        assert_eq!(order.total_outstanding(DEFAULT_OUTSTANDING_EPSILON), Decimal::ZERO);
        assert!(!order.can_pay(DEFAULT_OUTSTANDING_EPSILON));
    }

    #[test]
    fn test_total_outstanding_counts_only_successful_payments() {
        let mut order = cart();
        order.total = Decimal::from(20);
        order.attach_payment(payment(1, Decimal::from(15), PaymentStatus::Success));
        order.attach_payment(payment(2, Decimal::from(5), PaymentStatus::Failure));
        assert_eq!(
            order.total_outstanding(DEFAULT_OUTSTANDING_EPSILON),
            Decimal::from(5)
        );
        assert!(order.can_pay(DEFAULT_OUTSTANDING_EPSILON));
    }

    #[test]
    fn test_update_payment_status_marks_paid_once() {
        let mut order = cart();
        order.total = Decimal::from(20);
        order.place(now());
        order.attach_payment(payment(1, Decimal::from(20), PaymentStatus::Success));

        assert!(order.update_payment_status(DEFAULT_OUTSTANDING_EPSILON, now()));
        assert_eq!(order.status(), OrderStatus::Paid);
        assert_eq!(order.status_logs().len(), 1);

        assert!(!order.update_payment_status(DEFAULT_OUTSTANDING_EPSILON, now()));
        assert_eq!(order.status_logs().len(), 1);
    }

    #[test]
    fn test_zero_total_never_becomes_paid() {
        let mut order = cart();
        order.place(now());
        assert!(!order.update_payment_status(DEFAULT_OUTSTANDING_EPSILON, now()));
        assert_eq!(order.status(), OrderStatus::Unpaid);
    }

    #[test]
    fn test_sent_order_cancellation_follows_policy() {
        let mut order = cart();
        order.status = OrderStatus::Sent;

        let err = order
            .cancel_by_member(&CancellationPolicy::default(), now())
            .unwrap_err();
        assert!(matches!(err, CheckoutError::Authorization(_)));

        let policy = CancellationPolicy {
            after_sending: true,
            ..CancellationPolicy::default()
        };
        order.cancel_by_member(&policy, now()).unwrap();
        assert_eq!(order.status(), OrderStatus::MemberCancelled);
    }

    #[test]
    fn test_fulfilment_transitions() {
        let mut order = cart();
        order.status = OrderStatus::Paid;
        order.mark_processing(StatusNote::default(), now()).unwrap();
        order
            .mark_sent(StatusNote::for_customer("Shipped", "Tracking 123"), now())
            .unwrap();
        order.mark_complete(StatusNote::default(), now()).unwrap();
        assert_eq!(order.status(), OrderStatus::Complete);

        let log = order.latest_customer_log().unwrap();
        assert_eq!(log.title, "Shipped");
        assert_eq!(log.note.as_deref(), Some("Tracking 123"));

        let err = order.mark_processing(StatusNote::default(), now()).unwrap_err();
        assert!(matches!(err, CheckoutError::Validation(_)));
    }

    #[test]
    fn test_cart_cannot_transition_directly() {
        let mut order = cart();
        assert!(order
            .transition_to(OrderStatus::Unpaid, StatusNote::default(), now())
            .is_err());
        assert!(order.cancel_by_admin(StatusNote::default(), now()).is_err());
    }

    #[test]
    fn test_shipping_address_falls_back_to_billing() {
        let mut order = cart();
        order.customer.first_name = "Ana".to_string();
        order.customer.address = "1 Main St".to_string();
        order.shipping.name = "Warehouse".to_string();
        assert_eq!(order.full_shipping_address(), "Ana\n1 Main St");

        order.use_shipping_address = true;
        assert_eq!(order.full_shipping_address(), "Warehouse");
    }

    #[test]
    fn test_latest_email_prefers_recently_edited_member() {
        let mut order = cart();
        order.customer.email = Some(Email::parse("old@example.com").unwrap());
        let mut member = Member {
            id: MemberId::new(1),
            email: Email::parse("new@example.com").unwrap(),
            first_name: "Ana".to_string(),
            surname: "Lee".to_string(),
            last_edited: now() - chrono::Duration::days(1),
        };
        assert_eq!(
            order.latest_email(Some(&member)).unwrap().as_str(),
            "old@example.com"
        );

        member.last_edited = now() + chrono::Duration::days(1);
        assert_eq!(
            order.latest_email(Some(&member)).unwrap().as_str(),
            "new@example.com"
        );
    }
}
