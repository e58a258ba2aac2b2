//! Persistence for orders, payments, the catalog and members.
//!
//! # Repositories
//!
//! - [`OrderRepository`] - Order aggregates (items, modifiers, status logs)
//! - [`PaymentRepository`] - Payments, referencing orders
//! - [`CatalogRepository`] - Products, attribute types/values and variations
//! - [`MemberDirectory`] - Read-only access to registered customers
//!
//! # Implementations
//!
//! - [`MemoryStore`] - In-process store for tests and tooling
//! - `PgStore` - `PostgreSQL`, behind the `postgres` feature
//!
//! # Migrations
//!
//! Migrations are stored in `crates/checkout/migrations/` and run via:
//! ```bash
//! mercato migrate
//! ```

pub mod memory;
#[cfg(feature = "postgres")]
pub mod postgres;

use std::collections::BTreeSet;

use async_trait::async_trait;
use thiserror::Error;

use mercato_core::{
    AttributeTypeId, AttributeValueId, CurrencyCode, MemberId, OrderId, PaymentId, PaymentStatus,
    ProductId, VariationId,
};

pub use memory::{MemoryStore, WriteStats};
#[cfg(feature = "postgres")]
pub use postgres::{PgStore, create_pool};

use crate::models::{
    AttributeType, AttributeValue, Member, NewPayment, NewProduct, Order, OrderStatusLog, Payment,
    Product, ProductVariation, VariationPlan,
};

/// Errors that can occur during repository operations.
#[derive(Debug, Error)]
pub enum RepositoryError {
    /// Database error from sqlx.
    #[cfg(feature = "postgres")]
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Data in the database is corrupted or invalid.
    #[error("data corruption: {0}")]
    DataCorruption(String),

    /// Requested entity was not found.
    #[error("not found")]
    NotFound,

    /// Concurrent modification or constraint violation.
    #[error("conflict: {0}")]
    Conflict(String),
}

/// Which parts of an order aggregate a save writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SaveMode {
    /// The order row, new status logs, and items and modifiers marked dirty.
    Changed,
    /// Every item and modifier, dirty or not.
    Everything,
}

/// Storage for order aggregates.
#[async_trait]
pub trait OrderRepository: Send + Sync {
    /// Create and persist an empty cart.
    async fn create_cart(
        &self,
        member_id: Option<MemberId>,
        currency: CurrencyCode,
    ) -> Result<Order, RepositoryError>;

    /// Load an order with its items, modifiers (sorted by `sort`), status
    /// logs and payments.
    async fn load(&self, id: OrderId) -> Result<Option<Order>, RepositoryError>;

    /// Persist the aggregate in one transaction.
    ///
    /// Deletes queued removals, assigns ids to new rows, clears dirty flags
    /// and bumps the version. Fails with [`RepositoryError::Conflict`] when
    /// the stored version differs from the order's.
    async fn save(&self, order: &mut Order, mode: SaveMode) -> Result<(), RepositoryError>;

    /// Ids of every order still in Cart status.
    async fn cart_ids(&self) -> Result<Vec<OrderId>, RepositoryError>;

    /// Set `receipt_sent` if it is not already set. Returns whether this
    /// call set it.
    async fn claim_receipt(&self, id: OrderId) -> Result<bool, RepositoryError>;

    /// Clear `receipt_sent` after a failed send.
    async fn release_receipt(&self, id: OrderId) -> Result<(), RepositoryError>;

    /// Most recent customer-visible status log.
    async fn latest_customer_log(
        &self,
        id: OrderId,
    ) -> Result<Option<OrderStatusLog>, RepositoryError>;
}

/// Storage for payments.
#[async_trait]
pub trait PaymentRepository: Send + Sync {
    async fn insert(&self, payment: NewPayment) -> Result<Payment, RepositoryError>;

    async fn get(&self, id: PaymentId) -> Result<Option<Payment>, RepositoryError>;

    /// Record a gateway result. Fails with [`RepositoryError::NotFound`] for
    /// unknown payments.
    async fn update_status(
        &self,
        id: PaymentId,
        status: PaymentStatus,
        message: Option<String>,
    ) -> Result<Payment, RepositoryError>;

    async fn for_order(&self, order_id: OrderId) -> Result<Vec<Payment>, RepositoryError>;
}

/// Storage for the product catalog.
#[async_trait]
pub trait CatalogRepository: Send + Sync {
    async fn get_product(&self, id: ProductId) -> Result<Option<Product>, RepositoryError>;

    async fn insert_product(&self, product: NewProduct) -> Result<Product, RepositoryError>;

    /// Find an attribute type by name, ignoring case.
    async fn find_attribute_type(
        &self,
        name: &str,
    ) -> Result<Option<AttributeType>, RepositoryError>;

    async fn get_attribute_type(
        &self,
        id: AttributeTypeId,
    ) -> Result<Option<AttributeType>, RepositoryError>;

    async fn insert_attribute_type(
        &self,
        name: &str,
        label: &str,
    ) -> Result<AttributeType, RepositoryError>;

    /// Values of a type, ordered by `sort`.
    async fn attribute_values(
        &self,
        type_id: AttributeTypeId,
    ) -> Result<Vec<AttributeValue>, RepositoryError>;

    /// Append a value to a type, after the existing ones.
    async fn insert_attribute_value(
        &self,
        type_id: AttributeTypeId,
        value: &str,
    ) -> Result<AttributeValue, RepositoryError>;

    async fn get_attribute_values(
        &self,
        ids: &BTreeSet<AttributeValueId>,
    ) -> Result<Vec<AttributeValue>, RepositoryError>;

    /// All variations of a product, active or not, ordered by id.
    async fn variations(
        &self,
        product_id: ProductId,
    ) -> Result<Vec<ProductVariation>, RepositoryError>;

    async fn get_variation(
        &self,
        id: VariationId,
    ) -> Result<Option<ProductVariation>, RepositoryError>;

    /// Apply a variation plan in one transaction and return the created
    /// variations.
    ///
    /// New variations get the SKU `{product_sku}-{variation_id}`.
    async fn commit_variations(
        &self,
        plan: &VariationPlan,
    ) -> Result<Vec<ProductVariation>, RepositoryError>;
}

/// Read access to registered customers.
#[async_trait]
pub trait MemberDirectory: Send + Sync {
    async fn get(&self, id: MemberId) -> Result<Option<Member>, RepositoryError>;
}

/// SKU for a generated variation.
#[must_use]
pub fn variation_sku(product_sku: &str, id: VariationId) -> String {
    format!("{product_sku}-{id}")
}
