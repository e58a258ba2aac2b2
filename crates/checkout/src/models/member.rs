//! Registered customers.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use mercato_core::{Email, MemberId};

/// A registered customer account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Member {
    pub id: MemberId,
    pub email: Email,
    pub first_name: String,
    pub surname: String,
    /// Last time the member record was edited.
    pub last_edited: DateTime<Utc>,
}

impl Member {
    /// Full display name.
    #[must_use]
    pub fn name(&self) -> String {
        format!("{} {}", self.first_name, self.surname)
            .trim()
            .to_string()
    }
}
