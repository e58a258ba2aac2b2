//! Member lookups.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use mercato_core::{Email, MemberId};

use super::{PgStore, corrupt};
use crate::db::{MemberDirectory, RepositoryError};
use crate::models::Member;

#[derive(Debug, sqlx::FromRow)]
struct MemberRow {
    id: i32,
    email: String,
    first_name: String,
    surname: String,
    last_edited: DateTime<Utc>,
}

impl TryFrom<MemberRow> for Member {
    type Error = RepositoryError;

    fn try_from(row: MemberRow) -> Result<Self, Self::Error> {
        let email =
            Email::parse(&row.email).map_err(|e| corrupt("invalid email in database", e))?;

        Ok(Self {
            id: MemberId::new(row.id),
            email,
            first_name: row.first_name,
            surname: row.surname,
            last_edited: row.last_edited,
        })
    }
}

#[async_trait]
impl MemberDirectory for PgStore {
    async fn get(&self, id: MemberId) -> Result<Option<Member>, RepositoryError> {
        let row = sqlx::query_as::<_, MemberRow>(
            "SELECT id, email, first_name, surname, last_edited FROM member WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(self.pool())
        .await?;

        row.map(TryInto::try_into).transpose()
    }
}
