//! CLI command implementations.

pub mod maintenance;
pub mod migrate;
pub mod orders;
pub mod variations;

use std::sync::Arc;

use mercato_checkout::db::{PgStore, create_pool};
use mercato_checkout::services::MemoryMailer;
use mercato_checkout::{CheckoutError, ConfigError, ShopConfig, ShopState};
use thiserror::Error;

/// Errors that can occur while running a command.
#[derive(Debug, Error)]
pub enum CommandError {
    /// Required environment variable is missing.
    #[error("Missing environment variable: {0}")]
    MissingEnvVar(&'static str),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Database connection error.
    #[error("Database connection error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("{0}")]
    Checkout(#[from] CheckoutError),
}

/// Load configuration and connect to the database.
async fn connect() -> Result<(ShopConfig, PgStore), CommandError> {
    let config = ShopConfig::from_env()?;
    let database_url = config
        .database_url
        .as_ref()
        .ok_or(CommandError::MissingEnvVar("DATABASE_URL"))?;

    tracing::info!("Connecting to database...");
    let pool = create_pool(database_url).await?;
    Ok((config, PgStore::new(pool)))
}

/// Shop state for commands that send no email.
async fn offline_state() -> Result<ShopState, CommandError> {
    let (config, store) = connect().await?;
    let state = ShopState::builder(config, Arc::new(store))
        .mailer(Arc::new(MemoryMailer::new()))
        .build()?;
    Ok(state)
}

/// Shop state delivering email over SMTP.
async fn mailing_state() -> Result<ShopState, CommandError> {
    let (config, store) = connect().await?;
    Ok(ShopState::builder(config, Arc::new(store)).build()?)
}
