//! End-to-end tests for Mercato.
//!
//! Tests run the checkout services against the in-memory store and mailer,
//! so they need no database or mail relay.
//!
//! ```bash
//! cargo test -p mercato-integration-tests
//! ```
//!
//! # Test Files
//!
//! - `checkout_flow` - Carts, pricing, placement and fulfilment
//! - `payments` - Payment completion and receipts
//! - `variations` - Variation generation

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use rust_decimal::Decimal;

use mercato_checkout::config::DeliveryPolicy;
use mercato_checkout::db::{CatalogRepository, MemoryStore};
use mercato_checkout::models::{CustomerDetails, Member, NewProduct, Order, Product};
use mercato_checkout::modifiers::ModifierKey;
use mercato_checkout::services::{MemoryMailer, OrderObserver};
use mercato_checkout::{ShopConfig, ShopState};
use mercato_core::{Email, MemberId};

pub const ADMIN_EMAIL: &str = "admin@shop.example";
pub const CUSTOMER_EMAIL: &str = "jane@example.com";

/// Amount in cents as a decimal.
#[must_use]
pub fn dollars(cents: i64) -> Decimal {
    Decimal::new(cents, 2)
}

#[must_use]
pub fn email(address: &str) -> Email {
    Email::parse(address).expect("valid test email")
}

/// Configuration without modifiers and with fast email retries.
#[must_use]
pub fn config() -> ShopConfig {
    let mut config = ShopConfig::new(email(ADMIN_EMAIL));
    config.delivery = DeliveryPolicy {
        max_attempts: 2,
        initial_backoff: Duration::from_millis(1),
    };
    config
}

/// Configuration with a $5 flat shipping charge and 10% sales tax, applied
/// in the given order.
#[must_use]
pub fn config_with_modifiers(keys: &[&str]) -> ShopConfig {
    let mut config = config();
    config.modifier_settings.shipping_charge = dollars(500);
    config.modifier_settings.tax_rate = Decimal::new(10, 2);
    config.modifiers = keys.iter().copied().map(ModifierKey::from).collect();
    config
}

/// Counts observer callbacks.
#[derive(Debug, Default)]
pub struct CountingObserver {
    pub placed: AtomicUsize,
    pub paid: AtomicUsize,
}

impl CountingObserver {
    #[must_use]
    pub fn placed(&self) -> usize {
        self.placed.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn paid(&self) -> usize {
        self.paid.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl OrderObserver for CountingObserver {
    async fn on_placed(&self, _order: &Order) {
        self.placed.fetch_add(1, Ordering::SeqCst);
    }

    async fn on_paid(&self, _order: &Order) {
        self.paid.fetch_add(1, Ordering::SeqCst);
    }
}

/// A shop wired to in-memory infrastructure.
pub struct TestShop {
    pub state: ShopState,
    pub store: Arc<MemoryStore>,
    pub mailer: MemoryMailer,
    pub observer: Arc<CountingObserver>,
}

impl TestShop {
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(config())
    }

    #[must_use]
    pub fn with_config(config: ShopConfig) -> Self {
        Self::with_store(config, Arc::new(MemoryStore::new()))
    }

    /// A shop over an existing store, e.g. to change configuration between
    /// runs.
    #[must_use]
    pub fn with_store(config: ShopConfig, store: Arc<MemoryStore>) -> Self {
        let mailer = MemoryMailer::new();
        let observer = Arc::new(CountingObserver::default());
        let state = ShopState::builder(config, Arc::clone(&store))
            .mailer(Arc::new(mailer.clone()))
            .observer(Arc::clone(&observer) as Arc<dyn OrderObserver>)
            .build()
            .expect("valid shop configuration");
        Self {
            state,
            store,
            mailer,
            observer,
        }
    }

    pub async fn product(&self, title: &str, price: Decimal) -> Product {
        self.store
            .insert_product(NewProduct {
                title: title.to_string(),
                price,
                internal_item_id: title.to_uppercase().replace(' ', "-"),
            })
            .await
            .expect("product inserted")
    }

    pub fn member(&self, id: i32, address: &str) -> Member {
        let member = Member {
            id: MemberId::new(id),
            email: email(address),
            first_name: "Jane".to_string(),
            surname: "Doe".to_string(),
            last_edited: Utc::now() - chrono::Duration::days(30),
        };
        self.store.insert_member(member.clone());
        member
    }
}

impl Default for TestShop {
    fn default() -> Self {
        Self::new()
    }
}

/// Billing details for Jane Doe.
#[must_use]
pub fn customer() -> CustomerDetails {
    CustomerDetails {
        first_name: "Jane".to_string(),
        surname: "Doe".to_string(),
        email: Some(email(CUSTOMER_EMAIL)),
        address: "1 Main Street".to_string(),
        city: "Springfield".to_string(),
        country: "US".to_string(),
        ..CustomerDetails::default()
    }
}
