//! Checkout error types.

use thiserror::Error;

use crate::db::RepositoryError;
use crate::services::email::MailError;

/// Errors returned by order, checkout and catalog operations.
#[derive(Debug, Error)]
pub enum CheckoutError {
    /// The request is not valid for the order's current state.
    #[error("{0}")]
    Validation(String),

    /// The action is not permitted for this order.
    #[error("{0}")]
    Authorization(String),

    /// The request names something the shop is not configured for.
    #[error("{0}")]
    Configuration(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Repository error: {0}")]
    Repository(#[from] RepositoryError),

    #[error("Email error: {0}")]
    Email(#[from] MailError),
}

impl CheckoutError {
    /// Whether the error describes the caller's request rather than an
    /// infrastructure failure.
    #[must_use]
    pub const fn is_user_facing(&self) -> bool {
        matches!(
            self,
            Self::Validation(_) | Self::Authorization(_) | Self::Configuration(_) | Self::NotFound(_)
        )
    }
}

pub type Result<T, E = CheckoutError> = std::result::Result<T, E>;
