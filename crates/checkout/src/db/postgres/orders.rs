//! Order aggregate persistence.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::{Postgres, Transaction};

use mercato_core::{
    CurrencyCode, Email, MemberId, OrderId, OrderItemId, OrderModifierId, OrderStatus,
    OrderStatusLogId, ProductId, VariationId,
};

use super::{PgStore, corrupt};
use crate::db::{OrderRepository, PaymentRepository, RepositoryError, SaveMode};
use crate::models::{
    Buyable, CustomerDetails, ModifierKey, Order, OrderItem, OrderModifier, OrderStatusLog,
    ShippingDetails,
};

// =============================================================================
// Internal Row Types
// =============================================================================

const ORDER_COLUMNS: &str = r"
    id, status, member_id,
    first_name, surname, email, notes, address, address_line2, city, postal_code,
    state, country, home_phone, mobile_phone,
    use_shipping_address, shipping_name, shipping_address, shipping_address2,
    shipping_city, shipping_postal_code, shipping_state, shipping_country, shipping_phone,
    currency, total, receipt_sent, printed, version, created_at, updated_at
";

#[derive(Debug, sqlx::FromRow)]
struct OrderRow {
    id: i32,
    status: OrderStatus,
    member_id: Option<i32>,
    first_name: String,
    surname: String,
    email: Option<String>,
    notes: Option<String>,
    address: String,
    address_line2: String,
    city: String,
    postal_code: String,
    state: String,
    country: String,
    home_phone: String,
    mobile_phone: String,
    use_shipping_address: bool,
    shipping_name: String,
    shipping_address: String,
    shipping_address2: String,
    shipping_city: String,
    shipping_postal_code: String,
    shipping_state: String,
    shipping_country: String,
    shipping_phone: String,
    currency: String,
    total: Decimal,
    receipt_sent: bool,
    printed: bool,
    version: i32,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<OrderRow> for Order {
    type Error = RepositoryError;

    fn try_from(row: OrderRow) -> Result<Self, Self::Error> {
        let email = row
            .email
            .map(|email| Email::parse(&email))
            .transpose()
            .map_err(|e| corrupt("invalid email in database", e))?;
        let currency = row
            .currency
            .parse::<CurrencyCode>()
            .map_err(|e| corrupt("invalid currency in database", e))?;

        let mut order = Self::new_cart(
            OrderId::new(row.id),
            row.member_id.map(MemberId::new),
            currency,
            row.created_at,
        );
        order.status = row.status;
        order.customer = CustomerDetails {
            first_name: row.first_name,
            surname: row.surname,
            email,
            notes: row.notes,
            address: row.address,
            address_line2: row.address_line2,
            city: row.city,
            postal_code: row.postal_code,
            state: row.state,
            country: row.country,
            home_phone: row.home_phone,
            mobile_phone: row.mobile_phone,
        };
        order.use_shipping_address = row.use_shipping_address;
        order.shipping = ShippingDetails {
            name: row.shipping_name,
            address: row.shipping_address,
            address2: row.shipping_address2,
            city: row.shipping_city,
            postal_code: row.shipping_postal_code,
            state: row.shipping_state,
            country: row.shipping_country,
            phone: row.shipping_phone,
        };
        order.total = row.total;
        order.receipt_sent = row.receipt_sent;
        order.printed = row.printed;
        order.version = row.version;
        order.updated_at = row.updated_at;
        Ok(order)
    }
}

#[derive(Debug, sqlx::FromRow)]
struct ItemRow {
    id: i32,
    order_id: i32,
    product_id: Option<i32>,
    variation_id: Option<i32>,
    title: String,
    unit_price: Decimal,
    quantity: i32,
}

impl TryFrom<ItemRow> for OrderItem {
    type Error = RepositoryError;

    fn try_from(row: ItemRow) -> Result<Self, Self::Error> {
        let buyable = match (row.product_id, row.variation_id) {
            (Some(product), None) => Buyable::Product(ProductId::new(product)),
            (None, Some(variation)) => Buyable::Variation(VariationId::new(variation)),
            _ => {
                return Err(corrupt(
                    "order item must reference exactly one buyable",
                    row.id,
                ));
            }
        };
        let quantity =
            u32::try_from(row.quantity).map_err(|e| corrupt("invalid item quantity", e))?;

        let mut item = Self::new(
            OrderId::new(row.order_id),
            buyable,
            row.title,
            row.unit_price,
            quantity,
        );
        item.id = Some(OrderItemId::new(row.id));
        item.mark_clean();
        Ok(item)
    }
}

#[derive(Debug, sqlx::FromRow)]
struct ModifierRow {
    id: i32,
    order_id: i32,
    modifier_key: String,
    title: String,
    sort: i32,
    amount: Decimal,
}

impl From<ModifierRow> for OrderModifier {
    fn from(row: ModifierRow) -> Self {
        let mut modifier = Self::new(
            OrderId::new(row.order_id),
            ModifierKey::new(row.modifier_key),
            row.title,
        );
        modifier.id = Some(OrderModifierId::new(row.id));
        modifier.sort = row.sort;
        modifier.amount = row.amount;
        modifier.mark_clean();
        modifier
    }
}

#[derive(Debug, sqlx::FromRow)]
struct StatusLogRow {
    id: i32,
    order_id: i32,
    status: OrderStatus,
    title: String,
    note: Option<String>,
    sent_to_customer: bool,
    created_at: DateTime<Utc>,
}

impl From<StatusLogRow> for OrderStatusLog {
    fn from(row: StatusLogRow) -> Self {
        Self {
            id: Some(OrderStatusLogId::new(row.id)),
            order_id: OrderId::new(row.order_id),
            status: row.status,
            title: row.title,
            note: row.note,
            sent_to_customer: row.sent_to_customer,
            created_at: row.created_at,
        }
    }
}

// =============================================================================
// Repository
// =============================================================================

#[async_trait]
impl OrderRepository for PgStore {
    async fn create_cart(
        &self,
        member_id: Option<MemberId>,
        currency: CurrencyCode,
    ) -> Result<Order, RepositoryError> {
        let row = sqlx::query_as::<_, OrderRow>(&format!(
            "INSERT INTO shop_order (member_id, currency) VALUES ($1, $2) RETURNING {ORDER_COLUMNS}"
        ))
        .bind(member_id)
        .bind(currency.code())
        .fetch_one(self.pool())
        .await?;

        row.try_into()
    }

    async fn load(&self, id: OrderId) -> Result<Option<Order>, RepositoryError> {
        let Some(row) = sqlx::query_as::<_, OrderRow>(&format!(
            "SELECT {ORDER_COLUMNS} FROM shop_order WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(self.pool())
        .await?
        else {
            return Ok(None);
        };
        let mut order = Order::try_from(row)?;

        order.items = sqlx::query_as::<_, ItemRow>(
            r"
            SELECT id, order_id, product_id, variation_id, title, unit_price, quantity
            FROM order_item
            WHERE order_id = $1
            ORDER BY id
            ",
        )
        .bind(id)
        .fetch_all(self.pool())
        .await?
        .into_iter()
        .map(TryInto::try_into)
        .collect::<Result<_, _>>()?;

        order.modifiers = sqlx::query_as::<_, ModifierRow>(
            r"
            SELECT id, order_id, modifier_key, title, sort, amount
            FROM order_modifier
            WHERE order_id = $1
            ORDER BY sort, id
            ",
        )
        .bind(id)
        .fetch_all(self.pool())
        .await?
        .into_iter()
        .map(Into::into)
        .collect();

        order.status_logs = sqlx::query_as::<_, StatusLogRow>(
            r"
            SELECT id, order_id, status, title, note, sent_to_customer, created_at
            FROM order_status_log
            WHERE order_id = $1
            ORDER BY created_at, id
            ",
        )
        .bind(id)
        .fetch_all(self.pool())
        .await?
        .into_iter()
        .map(Into::into)
        .collect();

        order.payments = self.for_order(id).await?;
        Ok(Some(order))
    }

    async fn save(&self, order: &mut Order, mode: SaveMode) -> Result<(), RepositoryError> {
        let mut tx = self.pool().begin().await?;

        let stored: Option<i32> =
            sqlx::query_scalar("SELECT version FROM shop_order WHERE id = $1 FOR UPDATE")
                .bind(order.id)
                .fetch_optional(&mut *tx)
                .await?;
        match stored {
            None => return Err(RepositoryError::NotFound),
            Some(version) if version != order.version => {
                return Err(RepositoryError::Conflict(format!(
                    "order {} was modified concurrently",
                    order.id
                )));
            }
            Some(_) => {}
        }

        delete_removed(&mut tx, order).await?;

        let everything = mode == SaveMode::Everything;
        let mut item_ids = Vec::new();
        for (index, item) in order.items.iter().enumerate() {
            match item.id {
                None => item_ids.push((index, insert_item(&mut tx, item).await?)),
                Some(id) if everything || item.is_dirty() => update_item(&mut tx, id, item).await?,
                Some(_) => {}
            }
        }

        let mut modifier_ids = Vec::new();
        for (index, modifier) in order.modifiers.iter().enumerate() {
            match modifier.id {
                None => modifier_ids.push((index, insert_modifier(&mut tx, modifier).await?)),
                Some(id) if everything || modifier.is_dirty() => {
                    update_modifier(&mut tx, id, modifier).await?;
                }
                Some(_) => {}
            }
        }

        let mut log_ids = Vec::new();
        for (index, log) in order.status_logs.iter().enumerate() {
            if log.id.is_none() {
                log_ids.push((index, insert_status_log(&mut tx, log).await?));
            }
        }

        update_header(&mut tx, order).await?;
        tx.commit().await?;

        for (index, id) in item_ids {
            if let Some(item) = order.items.get_mut(index) {
                item.id = Some(id);
            }
        }
        for (index, id) in modifier_ids {
            if let Some(modifier) = order.modifiers.get_mut(index) {
                modifier.id = Some(id);
            }
        }
        for (index, id) in log_ids {
            if let Some(log) = order.status_logs.get_mut(index) {
                log.id = Some(id);
            }
        }
        order.items.iter_mut().for_each(OrderItem::mark_clean);
        order.modifiers.iter_mut().for_each(OrderModifier::mark_clean);
        order.removed_items.clear();
        order.removed_modifiers.clear();
        order.version += 1;

        tracing::debug!(order_id = %order.id, version = order.version, ?mode, "Order saved");
        Ok(())
    }

    async fn cart_ids(&self) -> Result<Vec<OrderId>, RepositoryError> {
        let ids: Vec<i32> =
            sqlx::query_scalar("SELECT id FROM shop_order WHERE status = 'cart' ORDER BY id")
                .fetch_all(self.pool())
                .await?;
        Ok(ids.into_iter().map(OrderId::new).collect())
    }

    async fn claim_receipt(&self, id: OrderId) -> Result<bool, RepositoryError> {
        let result = sqlx::query(
            "UPDATE shop_order SET receipt_sent = TRUE WHERE id = $1 AND receipt_sent = FALSE",
        )
        .bind(id)
        .execute(self.pool())
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn release_receipt(&self, id: OrderId) -> Result<(), RepositoryError> {
        let result = sqlx::query("UPDATE shop_order SET receipt_sent = FALSE WHERE id = $1")
            .bind(id)
            .execute(self.pool())
            .await?;
        if result.rows_affected() == 0 {
            return Err(RepositoryError::NotFound);
        }
        Ok(())
    }

    async fn latest_customer_log(
        &self,
        id: OrderId,
    ) -> Result<Option<OrderStatusLog>, RepositoryError> {
        let row = sqlx::query_as::<_, StatusLogRow>(
            r"
            SELECT id, order_id, status, title, note, sent_to_customer, created_at
            FROM order_status_log
            WHERE order_id = $1 AND sent_to_customer
            ORDER BY created_at DESC, id DESC
            LIMIT 1
            ",
        )
        .bind(id)
        .fetch_optional(self.pool())
        .await?;
        Ok(row.map(Into::into))
    }
}

// =============================================================================
// Save helpers
// =============================================================================

async fn delete_removed(
    tx: &mut Transaction<'_, Postgres>,
    order: &Order,
) -> Result<(), RepositoryError> {
    if !order.removed_items.is_empty() {
        let ids: Vec<i32> = order.removed_items.iter().map(OrderItemId::as_i32).collect();
        sqlx::query("DELETE FROM order_item WHERE order_id = $1 AND id = ANY($2)")
            .bind(order.id)
            .bind(ids)
            .execute(&mut **tx)
            .await?;
    }
    if !order.removed_modifiers.is_empty() {
        let ids: Vec<i32> = order
            .removed_modifiers
            .iter()
            .map(OrderModifierId::as_i32)
            .collect();
        sqlx::query("DELETE FROM order_modifier WHERE order_id = $1 AND id = ANY($2)")
            .bind(order.id)
            .bind(ids)
            .execute(&mut **tx)
            .await?;
    }
    Ok(())
}

fn buyable_columns(buyable: Buyable) -> (Option<ProductId>, Option<VariationId>) {
    match buyable {
        Buyable::Product(id) => (Some(id), None),
        Buyable::Variation(id) => (None, Some(id)),
    }
}

fn quantity_column(item: &OrderItem) -> Result<i32, RepositoryError> {
    i32::try_from(item.quantity)
        .map_err(|_| RepositoryError::Conflict(format!("quantity {} too large", item.quantity)))
}

async fn insert_item(
    tx: &mut Transaction<'_, Postgres>,
    item: &OrderItem,
) -> Result<OrderItemId, RepositoryError> {
    let (product_id, variation_id) = buyable_columns(item.buyable);
    let id: i32 = sqlx::query_scalar(
        r"
        INSERT INTO order_item (order_id, product_id, variation_id, title, unit_price, quantity)
        VALUES ($1, $2, $3, $4, $5, $6)
        RETURNING id
        ",
    )
    .bind(item.order_id)
    .bind(product_id)
    .bind(variation_id)
    .bind(&item.title)
    .bind(item.unit_price)
    .bind(quantity_column(item)?)
    .fetch_one(&mut **tx)
    .await?;
    Ok(OrderItemId::new(id))
}

async fn update_item(
    tx: &mut Transaction<'_, Postgres>,
    id: OrderItemId,
    item: &OrderItem,
) -> Result<(), RepositoryError> {
    sqlx::query(
        "UPDATE order_item SET title = $2, unit_price = $3, quantity = $4 WHERE id = $1",
    )
    .bind(id)
    .bind(&item.title)
    .bind(item.unit_price)
    .bind(quantity_column(item)?)
    .execute(&mut **tx)
    .await?;
    Ok(())
}

async fn insert_modifier(
    tx: &mut Transaction<'_, Postgres>,
    modifier: &OrderModifier,
) -> Result<OrderModifierId, RepositoryError> {
    let id: i32 = sqlx::query_scalar(
        r"
        INSERT INTO order_modifier (order_id, modifier_key, title, sort, amount)
        VALUES ($1, $2, $3, $4, $5)
        RETURNING id
        ",
    )
    .bind(modifier.order_id)
    .bind(modifier.key.as_str())
    .bind(&modifier.title)
    .bind(modifier.sort)
    .bind(modifier.amount)
    .fetch_one(&mut **tx)
    .await?;
    Ok(OrderModifierId::new(id))
}

async fn update_modifier(
    tx: &mut Transaction<'_, Postgres>,
    id: OrderModifierId,
    modifier: &OrderModifier,
) -> Result<(), RepositoryError> {
    sqlx::query("UPDATE order_modifier SET title = $2, sort = $3, amount = $4 WHERE id = $1")
        .bind(id)
        .bind(&modifier.title)
        .bind(modifier.sort)
        .bind(modifier.amount)
        .execute(&mut **tx)
        .await?;
    Ok(())
}

async fn insert_status_log(
    tx: &mut Transaction<'_, Postgres>,
    log: &OrderStatusLog,
) -> Result<OrderStatusLogId, RepositoryError> {
    let id: i32 = sqlx::query_scalar(
        r"
        INSERT INTO order_status_log (order_id, status, title, note, sent_to_customer, created_at)
        VALUES ($1, $2, $3, $4, $5, $6)
        RETURNING id
        ",
    )
    .bind(log.order_id)
    .bind(log.status)
    .bind(&log.title)
    .bind(&log.note)
    .bind(log.sent_to_customer)
    .bind(log.created_at)
    .fetch_one(&mut **tx)
    .await?;
    Ok(OrderStatusLogId::new(id))
}

async fn update_header(
    tx: &mut Transaction<'_, Postgres>,
    order: &Order,
) -> Result<(), RepositoryError> {
    let customer = &order.customer;
    let shipping = &order.shipping;
    sqlx::query(
        r"
        UPDATE shop_order SET
            status = $2, member_id = $3,
            first_name = $4, surname = $5, email = $6, notes = $7,
            address = $8, address_line2 = $9, city = $10, postal_code = $11,
            state = $12, country = $13, home_phone = $14, mobile_phone = $15,
            use_shipping_address = $16, shipping_name = $17, shipping_address = $18,
            shipping_address2 = $19, shipping_city = $20, shipping_postal_code = $21,
            shipping_state = $22, shipping_country = $23, shipping_phone = $24,
            total = $25, receipt_sent = $26, printed = $27,
            updated_at = $28, version = version + 1
        WHERE id = $1
        ",
    )
    .bind(order.id)
    .bind(order.status)
    .bind(order.member_id)
    .bind(&customer.first_name)
    .bind(&customer.surname)
    .bind(customer.email.as_ref().map(Email::as_str))
    .bind(&customer.notes)
    .bind(&customer.address)
    .bind(&customer.address_line2)
    .bind(&customer.city)
    .bind(&customer.postal_code)
    .bind(&customer.state)
    .bind(&customer.country)
    .bind(&customer.home_phone)
    .bind(&customer.mobile_phone)
    .bind(order.use_shipping_address)
    .bind(&shipping.name)
    .bind(&shipping.address)
    .bind(&shipping.address2)
    .bind(&shipping.city)
    .bind(&shipping.postal_code)
    .bind(&shipping.state)
    .bind(&shipping.country)
    .bind(&shipping.phone)
    .bind(order.total)
    .bind(order.receipt_sent)
    .bind(order.printed)
    .bind(order.updated_at)
    .execute(&mut **tx)
    .await?;
    Ok(())
}
