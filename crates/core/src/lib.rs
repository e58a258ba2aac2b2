//! Mercato Core - Shared types library.
//!
//! This crate provides the vocabulary shared by every Mercato component:
//! - `checkout` - Order aggregate, pricing pipeline, placement and payments
//! - `cli` - Command-line tools for migrations and maintenance
//!
//! # Architecture
//!
//! The core crate contains only types - no I/O, no database access, no mail
//! transport. Enabling the `postgres` feature adds `sqlx` encoding for IDs,
//! emails and status enums so repositories can bind them directly.
//!
//! # Modules
//!
//! - [`types`] - Newtype wrappers for type-safe IDs, money, emails, and statuses

#![cfg_attr(not(test), forbid(unsafe_code))]

pub mod types;

pub use types::*;
