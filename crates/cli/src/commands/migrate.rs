//! Database migration command.
//!
//! # Usage
//!
//! ```bash
//! mercato migrate
//! ```
//!
//! # Environment Variables
//!
//! - `DATABASE_URL` - `PostgreSQL` connection string
//!
//! # Migration Files
//!
//! Migrations live in `crates/checkout/migrations/`:
//! ```text
//! migrations/
//! └── 20261018000001_create_shop.sql
//! ```

use super::{CommandError, connect};

/// Apply pending migrations.
pub async fn run() -> Result<(), CommandError> {
    let (_config, store) = connect().await?;

    tracing::info!("Running migrations...");
    store.migrate().await?;

    tracing::info!("Migrations complete!");
    Ok(())
}
