//! Payment completion, outstanding balances and receipt delivery.

#![allow(clippy::unwrap_used)]

use mercato_checkout::CheckoutError;
use mercato_checkout::db::{OrderRepository, PaymentRepository};
use mercato_checkout::models::{Buyable, NewPayment, PaymentMethod};
use mercato_checkout::services::{OrderProcessor, ShoppingCart};
use mercato_core::{Money, OrderId, OrderStatus, PaymentId, PaymentStatus, SessionId};
use mercato_integration_tests::{ADMIN_EMAIL, CUSTOMER_EMAIL, TestShop, customer, dollars};
use rust_decimal::Decimal;

/// Place an order for one product at `price`.
async fn placed_order(shop: &TestShop, price: Decimal) -> OrderId {
    let product = shop.product("Lamp", price).await;
    let session = SessionId::generate();
    let cart = ShoppingCart::new(&shop.state, session);
    cart.add(Buyable::Product(product.id), 1, None).await.unwrap();
    let order = cart.set_customer_details(customer(), None).await.unwrap();
    OrderProcessor::new(&shop.state, order.id())
        .place_order(session)
        .await
        .unwrap();
    order.id()
}

/// An incomplete manual payment of `amount` against `order_id`.
async fn new_payment(shop: &TestShop, order_id: OrderId, amount: Decimal) -> PaymentId {
    let order = shop.state.orders().load(order_id).await.unwrap().unwrap();
    shop.state
        .payments()
        .insert(NewPayment {
            order_id,
            method: PaymentMethod::Manual,
            amount: Money::new(amount, order.currency()),
            ip_address: None,
        })
        .await
        .unwrap()
        .id
}

async fn status_of(shop: &TestShop, order_id: OrderId) -> OrderStatus {
    shop.state
        .orders()
        .load(order_id)
        .await
        .unwrap()
        .unwrap()
        .status()
}

#[tokio::test]
async fn test_full_payment_marks_paid_and_sends_receipt() {
    let shop = TestShop::new();
    let id = placed_order(&shop, dollars(2000)).await;
    let mut processor = OrderProcessor::new(&shop.state, id);

    let payment = processor
        .create_payment("manual", Some("10.0.0.1".to_string()))
        .await
        .unwrap();
    assert_eq!(payment.amount.amount, dollars(2000));
    assert_eq!(payment.status, PaymentStatus::Incomplete);

    let outcome = processor
        .complete_payment(payment.id, PaymentStatus::Success, None)
        .await
        .unwrap();

    assert!(outcome.order_paid);
    assert!(outcome.receipt_sent);
    let order = shop.state.orders().load(id).await.unwrap().unwrap();
    assert_eq!(order.status(), OrderStatus::Paid);
    assert!(order.receipt_sent());
    assert_eq!(shop.observer.paid(), 1);

    let sent = shop.mailer.sent();
    assert_eq!(sent.len(), 1);
    let receipt = sent.first().unwrap();
    assert_eq!(receipt.email.to.as_str(), CUSTOMER_EMAIL);
    assert_eq!(receipt.email.bcc.as_ref().map(|e| e.as_str()), Some(ADMIN_EMAIL));
    assert_eq!(receipt.email.subject, format!("Shop Sale Information #{id}"));
    assert!(receipt.rendered.text.contains("Lamp"));
}

#[tokio::test]
async fn test_sub_cent_difference_counts_as_paid() {
    let shop = TestShop::new();
    let id = placed_order(&shop, Decimal::new(19995, 3)).await;
    let payment = new_payment(&shop, id, dollars(2000)).await;

    OrderProcessor::new(&shop.state, id)
        .complete_payment(payment, PaymentStatus::Success, None)
        .await
        .unwrap();

    let order = shop.state.orders().load(id).await.unwrap().unwrap();
    assert_eq!(order.total_outstanding(Decimal::new(1, 2)), Decimal::ZERO);
    assert_eq!(order.status(), OrderStatus::Paid);
}

#[tokio::test]
async fn test_partial_payment_leaves_order_unpaid() {
    let shop = TestShop::new();
    let id = placed_order(&shop, dollars(2000)).await;
    let payment = new_payment(&shop, id, dollars(1500)).await;
    let mut processor = OrderProcessor::new(&shop.state, id);

    let outcome = processor
        .complete_payment(payment, PaymentStatus::Success, None)
        .await
        .unwrap();

    assert!(!outcome.order_paid);
    let order = shop.state.orders().load(id).await.unwrap().unwrap();
    assert_eq!(order.total_outstanding(Decimal::new(1, 2)), dollars(500));
    assert_eq!(order.status(), OrderStatus::Unpaid);

    // The next payment is for what remains.
    let rest = processor.create_payment("manual", None).await.unwrap();
    assert_eq!(rest.amount.amount, dollars(500));
}

#[tokio::test]
async fn test_repeated_callbacks_send_one_receipt() {
    let shop = TestShop::new();
    let id = placed_order(&shop, dollars(2000)).await;
    let payment = new_payment(&shop, id, dollars(2000)).await;
    let mut processor = OrderProcessor::new(&shop.state, id);

    for _ in 0..3 {
        processor
            .complete_payment(payment, PaymentStatus::Success, None)
            .await
            .unwrap();
    }

    assert_eq!(shop.mailer.sent().len(), 1);
    assert_eq!(shop.observer.paid(), 1);
}

#[tokio::test]
async fn test_concurrent_callbacks_send_one_receipt() {
    let shop = TestShop::new();
    let id = placed_order(&shop, dollars(2000)).await;
    let first = new_payment(&shop, id, dollars(1000)).await;
    let second = new_payment(&shop, id, dollars(1000)).await;

    let mut a = OrderProcessor::new(&shop.state, id);
    let mut b = OrderProcessor::new(&shop.state, id);
    let (ra, rb) = tokio::join!(
        a.complete_payment(first, PaymentStatus::Success, None),
        b.complete_payment(second, PaymentStatus::Success, None),
    );
    ra.unwrap();
    rb.unwrap();

    assert_eq!(status_of(&shop, id).await, OrderStatus::Paid);
    assert_eq!(shop.mailer.sent().len(), 1);
    assert_eq!(shop.observer.paid(), 1);
}

#[tokio::test]
async fn test_failed_receipt_is_retried_on_next_callback() {
    let shop = TestShop::new();
    let id = placed_order(&shop, dollars(2000)).await;
    let payment = new_payment(&shop, id, dollars(2000)).await;
    let mut processor = OrderProcessor::new(&shop.state, id);

    // Both delivery attempts fail.
    shop.mailer.fail_next(2);
    let outcome = processor
        .complete_payment(payment, PaymentStatus::Success, None)
        .await
        .unwrap();

    assert!(outcome.order_paid);
    assert!(!outcome.receipt_sent);
    let order = shop.state.orders().load(id).await.unwrap().unwrap();
    assert_eq!(order.status(), OrderStatus::Paid);
    assert!(!order.receipt_sent());
    assert!(shop.mailer.sent().is_empty());

    let outcome = processor
        .complete_payment(payment, PaymentStatus::Success, None)
        .await
        .unwrap();

    assert!(outcome.receipt_sent);
    assert_eq!(shop.mailer.sent().len(), 1);
}

#[tokio::test]
async fn test_failed_payment_changes_nothing() {
    let shop = TestShop::new();
    let id = placed_order(&shop, dollars(2000)).await;
    let payment = new_payment(&shop, id, dollars(2000)).await;

    let outcome = OrderProcessor::new(&shop.state, id)
        .complete_payment(payment, PaymentStatus::Failure, Some("Declined".to_string()))
        .await
        .unwrap();

    assert!(!outcome.order_paid);
    assert_eq!(outcome.payment.message.as_deref(), Some("Declined"));
    assert_eq!(status_of(&shop, id).await, OrderStatus::Unpaid);
    assert!(shop.mailer.sent().is_empty());
}

#[tokio::test]
async fn test_unknown_payment_method_is_rejected() {
    let shop = TestShop::new();
    let id = placed_order(&shop, dollars(2000)).await;
    let mut processor = OrderProcessor::new(&shop.state, id);

    let err = processor.create_payment("bitcoin", None).await.unwrap_err();

    assert!(matches!(err, CheckoutError::Configuration(_)));
    assert_eq!(processor.error(), Some("Incorrect payment class."));
}

#[tokio::test]
async fn test_paid_order_is_not_payable() {
    let shop = TestShop::new();
    let id = placed_order(&shop, dollars(2000)).await;
    let payment = new_payment(&shop, id, dollars(2000)).await;
    let mut processor = OrderProcessor::new(&shop.state, id);
    processor
        .complete_payment(payment, PaymentStatus::Success, None)
        .await
        .unwrap();

    let err = processor.create_payment("manual", None).await.unwrap_err();

    assert!(matches!(err, CheckoutError::Authorization(_)));
}

#[tokio::test]
async fn test_payment_for_another_order_is_not_found() {
    let shop = TestShop::new();
    let first = placed_order(&shop, dollars(2000)).await;
    let second = placed_order(&shop, dollars(1000)).await;
    let payment = new_payment(&shop, second, dollars(1000)).await;

    let err = OrderProcessor::new(&shop.state, first)
        .complete_payment(payment, PaymentStatus::Success, None)
        .await
        .unwrap_err();

    assert!(matches!(err, CheckoutError::NotFound(_)));
    assert_eq!(status_of(&shop, second).await, OrderStatus::Unpaid);
}
