//! Mercato Checkout library.
//!
//! Order lifecycle, totals calculation, placement, payment handling and
//! product variation generation, written against narrow persistence, mail and
//! session interfaces so the rules can be exercised without a database.
//!
//! # Layout
//!
//! - [`models`] - Order aggregate, payments, members and catalog entities
//! - [`modifiers`] - Pluggable order adjustments (shipping, tax, vouchers)
//! - [`pricing`] - The `calculate()` pipeline over an order
//! - [`db`] - Repository traits with in-memory and `PostgreSQL` implementations
//! - [`services`] - Placement, payments, notifications, carts, variations
//! - [`config`] - Shop configuration loaded from the environment
//! - [`state`] - Wiring of configuration, repositories and services
//!
//! # Features
//!
//! - `postgres` - Enables [`db::postgres::PgStore`] and migrations support.

#![cfg_attr(not(test), forbid(unsafe_code))]

pub mod config;
pub mod db;
pub mod error;
pub mod models;
pub mod modifiers;
pub mod pricing;
pub mod services;
pub mod state;

pub use config::{CancellationPolicy, ConfigError, EmailSettings, ShopConfig};
pub use error::CheckoutError;
pub use state::{ShopState, ShopStateBuilder};
