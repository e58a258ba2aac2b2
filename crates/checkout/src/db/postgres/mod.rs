//! `PostgreSQL` repositories.
//!
//! # Tables
//!
//! - `shop_order` - Order header, customer and shipping snapshot, cached total
//! - `order_item` - Line items (product or variation)
//! - `order_modifier` - Modifier adjustments, unique per order and key
//! - `order_status_log` - Status history
//! - `payment` - Payments against orders
//! - `member` - Registered customers
//! - `product`, `product_attribute_type`, `product_attribute_value`,
//!   `product_variation`, `product_variation_value`,
//!   `product_variation_attribute_type` - Catalog and variation axes
//!
//! Queries are built at runtime with `sqlx::query_as` and mapped through
//! internal row types, so the crate builds without a live database.

mod catalog;
mod members;
mod orders;
mod payments;

use std::time::Duration;

use secrecy::{ExposeSecret, SecretString};
use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;

use super::RepositoryError;

/// Repository implementation backed by a `PostgreSQL` pool.
#[derive(Debug, Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    #[must_use]
    pub const fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Apply the migrations in `crates/checkout/migrations/`.
    ///
    /// # Errors
    ///
    /// Returns an error if a migration fails to apply.
    pub async fn migrate(&self) -> Result<(), sqlx::migrate::MigrateError> {
        sqlx::migrate!("./migrations").run(&self.pool).await
    }
}

/// Create a `PostgreSQL` connection pool with sensible defaults.
///
/// # Errors
///
/// Returns `sqlx::Error` if the connection cannot be established.
pub async fn create_pool(database_url: &SecretString) -> Result<PgPool, sqlx::Error> {
    PgPoolOptions::new()
        .max_connections(10)
        .min_connections(2)
        .acquire_timeout(Duration::from_secs(10))
        .connect(database_url.expose_secret())
        .await
}

fn corrupt(what: &str, detail: impl std::fmt::Display) -> RepositoryError {
    RepositoryError::DataCorruption(format!("{what}: {detail}"))
}
