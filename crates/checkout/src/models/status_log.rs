//! Order status history.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use mercato_core::{OrderId, OrderStatus, OrderStatusLogId};

/// One entry in an order's status history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderStatusLog {
    /// `None` until the entry has been persisted.
    pub id: Option<OrderStatusLogId>,
    pub order_id: OrderId,
    pub status: OrderStatus,
    pub title: String,
    pub note: Option<String>,
    /// Whether the customer may see this entry (and was emailed about it).
    pub sent_to_customer: bool,
    pub created_at: DateTime<Utc>,
}

/// Title and note accompanying a manual status change.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StatusNote {
    pub title: Option<String>,
    pub note: Option<String>,
    /// Email the customer about this change.
    pub notify_customer: bool,
}

impl StatusNote {
    /// A customer-visible note that triggers a status email.
    #[must_use]
    pub fn for_customer(title: impl Into<String>, note: impl Into<String>) -> Self {
        Self {
            title: Some(title.into()),
            note: Some(note.into()),
            notify_customer: true,
        }
    }
}
