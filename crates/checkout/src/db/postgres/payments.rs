//! Payment persistence.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;

use mercato_core::{CurrencyCode, Money, OrderId, PaymentId, PaymentStatus};

use super::{PgStore, corrupt};
use crate::db::{PaymentRepository, RepositoryError};
use crate::models::{NewPayment, Payment, PaymentMethod};

const PAYMENT_COLUMNS: &str =
    "id, order_id, method, amount, currency, status, message, ip_address, created_at, updated_at";

#[derive(Debug, sqlx::FromRow)]
struct PaymentRow {
    id: i32,
    order_id: i32,
    method: String,
    amount: Decimal,
    currency: String,
    status: PaymentStatus,
    message: Option<String>,
    ip_address: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<PaymentRow> for Payment {
    type Error = RepositoryError;

    fn try_from(row: PaymentRow) -> Result<Self, Self::Error> {
        let method = row
            .method
            .parse::<PaymentMethod>()
            .map_err(|e| corrupt("invalid payment method in database", e))?;
        let currency = row
            .currency
            .parse::<CurrencyCode>()
            .map_err(|e| corrupt("invalid currency in database", e))?;

        Ok(Self {
            id: PaymentId::new(row.id),
            order_id: OrderId::new(row.order_id),
            method,
            amount: Money::new(row.amount, currency),
            status: row.status,
            message: row.message,
            ip_address: row.ip_address,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

#[async_trait]
impl PaymentRepository for PgStore {
    async fn insert(&self, payment: NewPayment) -> Result<Payment, RepositoryError> {
        let row = sqlx::query_as::<_, PaymentRow>(&format!(
            r"
            INSERT INTO payment (order_id, method, amount, currency, ip_address)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING {PAYMENT_COLUMNS}
            "
        ))
        .bind(payment.order_id)
        .bind(payment.method.as_str())
        .bind(payment.amount.amount)
        .bind(payment.amount.currency_code.code())
        .bind(payment.ip_address)
        .fetch_one(self.pool())
        .await?;

        row.try_into()
    }

    async fn get(&self, id: PaymentId) -> Result<Option<Payment>, RepositoryError> {
        let row = sqlx::query_as::<_, PaymentRow>(&format!(
            "SELECT {PAYMENT_COLUMNS} FROM payment WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(self.pool())
        .await?;

        row.map(TryInto::try_into).transpose()
    }

    async fn update_status(
        &self,
        id: PaymentId,
        status: PaymentStatus,
        message: Option<String>,
    ) -> Result<Payment, RepositoryError> {
        let row = sqlx::query_as::<_, PaymentRow>(&format!(
            r"
            UPDATE payment SET status = $2, message = $3, updated_at = now()
            WHERE id = $1
            RETURNING {PAYMENT_COLUMNS}
            "
        ))
        .bind(id)
        .bind(status)
        .bind(message)
        .fetch_optional(self.pool())
        .await?
        .ok_or(RepositoryError::NotFound)?;

        row.try_into()
    }

    async fn for_order(&self, order_id: OrderId) -> Result<Vec<Payment>, RepositoryError> {
        let rows = sqlx::query_as::<_, PaymentRow>(&format!(
            "SELECT {PAYMENT_COLUMNS} FROM payment WHERE order_id = $1 ORDER BY id"
        ))
        .bind(order_id)
        .fetch_all(self.pool())
        .await?;

        rows.into_iter().map(TryInto::try_into).collect()
    }
}
