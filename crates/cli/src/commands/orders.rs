//! Order commands.
//!
//! # Usage
//!
//! ```bash
//! mercato receipt resend --order 1001
//! ```
//!
//! # Environment Variables
//!
//! - `SMTP_HOST`, `SMTP_PORT`, `SMTP_USERNAME`, `SMTP_PASSWORD` - Mail relay

use mercato_checkout::services::OrderProcessor;
use mercato_core::OrderId;

use super::{CommandError, mailing_state};

/// Email an order's receipt again.
pub async fn resend_receipt(order: i32) -> Result<(), CommandError> {
    let state = mailing_state().await?;
    let mut processor = OrderProcessor::new(&state, OrderId::new(order));

    tracing::info!("Sending receipt for order {}", order);
    processor.send_receipt().await?;

    tracing::info!("Receipt sent");
    Ok(())
}
