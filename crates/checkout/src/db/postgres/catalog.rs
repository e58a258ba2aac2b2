//! Catalog persistence: products, attribute axes and variations.

use std::collections::{BTreeSet, HashMap};

use async_trait::async_trait;
use rust_decimal::Decimal;

use mercato_core::{AttributeTypeId, AttributeValueId, ProductId, VariationId};

use super::PgStore;
use crate::db::{CatalogRepository, RepositoryError, variation_sku};
use crate::models::{
    AttributeType, AttributeValue, NewProduct, Product, ProductVariation, VariationPlan,
};

// =============================================================================
// Internal Row Types
// =============================================================================

#[derive(Debug, sqlx::FromRow)]
struct ProductRow {
    id: i32,
    title: String,
    price: Decimal,
    internal_item_id: String,
}

#[derive(Debug, sqlx::FromRow)]
struct AttributeTypeRow {
    id: i32,
    name: String,
    label: String,
}

impl From<AttributeTypeRow> for AttributeType {
    fn from(row: AttributeTypeRow) -> Self {
        Self {
            id: AttributeTypeId::new(row.id),
            name: row.name,
            label: row.label,
        }
    }
}

#[derive(Debug, sqlx::FromRow)]
struct AttributeValueRow {
    id: i32,
    type_id: i32,
    value: String,
    sort: i32,
}

impl From<AttributeValueRow> for AttributeValue {
    fn from(row: AttributeValueRow) -> Self {
        Self {
            id: AttributeValueId::new(row.id),
            type_id: AttributeTypeId::new(row.type_id),
            value: row.value,
            sort: row.sort,
        }
    }
}

#[derive(Debug, sqlx::FromRow)]
struct VariationRow {
    id: i32,
    product_id: i32,
    internal_item_id: String,
    price: Decimal,
    stock: i32,
    active: bool,
}

#[derive(Debug, sqlx::FromRow)]
struct VariationValueRow {
    variation_id: i32,
    attribute_value_id: i32,
}

const VARIATION_COLUMNS: &str = "id, product_id, internal_item_id, price, stock, active";

impl PgStore {
    async fn product_attribute_types(
        &self,
        product_id: ProductId,
    ) -> Result<Vec<AttributeTypeId>, RepositoryError> {
        let ids: Vec<i32> = sqlx::query_scalar(
            r"
            SELECT attribute_type_id FROM product_variation_attribute_type
            WHERE product_id = $1
            ORDER BY position
            ",
        )
        .bind(product_id)
        .fetch_all(self.pool())
        .await?;
        Ok(ids.into_iter().map(AttributeTypeId::new).collect())
    }

    /// Attach value sets to variation rows.
    async fn with_values(
        &self,
        rows: Vec<VariationRow>,
    ) -> Result<Vec<ProductVariation>, RepositoryError> {
        let ids: Vec<i32> = rows.iter().map(|row| row.id).collect();
        let links = sqlx::query_as::<_, VariationValueRow>(
            r"
            SELECT variation_id, attribute_value_id FROM product_variation_value
            WHERE variation_id = ANY($1)
            ",
        )
        .bind(&ids)
        .fetch_all(self.pool())
        .await?;

        let mut values: HashMap<i32, BTreeSet<AttributeValueId>> = HashMap::new();
        for link in links {
            values
                .entry(link.variation_id)
                .or_default()
                .insert(AttributeValueId::new(link.attribute_value_id));
        }

        Ok(rows
            .into_iter()
            .map(|row| ProductVariation {
                id: VariationId::new(row.id),
                product_id: ProductId::new(row.product_id),
                internal_item_id: row.internal_item_id,
                price: row.price,
                stock: row.stock,
                active: row.active,
                attribute_values: values.remove(&row.id).unwrap_or_default(),
            })
            .collect())
    }
}

// =============================================================================
// Repository
// =============================================================================

#[async_trait]
impl CatalogRepository for PgStore {
    async fn get_product(&self, id: ProductId) -> Result<Option<Product>, RepositoryError> {
        let Some(row) = sqlx::query_as::<_, ProductRow>(
            "SELECT id, title, price, internal_item_id FROM product WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(self.pool())
        .await?
        else {
            return Ok(None);
        };

        Ok(Some(Product {
            id: ProductId::new(row.id),
            title: row.title,
            price: row.price,
            internal_item_id: row.internal_item_id,
            variation_attribute_types: self.product_attribute_types(id).await?,
        }))
    }

    async fn insert_product(&self, product: NewProduct) -> Result<Product, RepositoryError> {
        let row = sqlx::query_as::<_, ProductRow>(
            r"
            INSERT INTO product (title, price, internal_item_id)
            VALUES ($1, $2, $3)
            RETURNING id, title, price, internal_item_id
            ",
        )
        .bind(&product.title)
        .bind(product.price)
        .bind(&product.internal_item_id)
        .fetch_one(self.pool())
        .await?;

        Ok(Product {
            id: ProductId::new(row.id),
            title: row.title,
            price: row.price,
            internal_item_id: row.internal_item_id,
            variation_attribute_types: Vec::new(),
        })
    }

    async fn find_attribute_type(
        &self,
        name: &str,
    ) -> Result<Option<AttributeType>, RepositoryError> {
        let row = sqlx::query_as::<_, AttributeTypeRow>(
            "SELECT id, name, label FROM product_attribute_type WHERE lower(name) = lower($1)",
        )
        .bind(name)
        .fetch_optional(self.pool())
        .await?;
        Ok(row.map(Into::into))
    }

    async fn get_attribute_type(
        &self,
        id: AttributeTypeId,
    ) -> Result<Option<AttributeType>, RepositoryError> {
        let row = sqlx::query_as::<_, AttributeTypeRow>(
            "SELECT id, name, label FROM product_attribute_type WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(self.pool())
        .await?;
        Ok(row.map(Into::into))
    }

    async fn insert_attribute_type(
        &self,
        name: &str,
        label: &str,
    ) -> Result<AttributeType, RepositoryError> {
        let row = sqlx::query_as::<_, AttributeTypeRow>(
            r"
            INSERT INTO product_attribute_type (name, label)
            VALUES ($1, $2)
            RETURNING id, name, label
            ",
        )
        .bind(name)
        .bind(label)
        .fetch_one(self.pool())
        .await?;
        Ok(row.into())
    }

    async fn attribute_values(
        &self,
        type_id: AttributeTypeId,
    ) -> Result<Vec<AttributeValue>, RepositoryError> {
        let rows = sqlx::query_as::<_, AttributeValueRow>(
            r"
            SELECT id, type_id, value, sort FROM product_attribute_value
            WHERE type_id = $1
            ORDER BY sort, id
            ",
        )
        .bind(type_id)
        .fetch_all(self.pool())
        .await?;
        Ok(rows.into_iter().map(Into::into).collect())
    }

    async fn insert_attribute_value(
        &self,
        type_id: AttributeTypeId,
        value: &str,
    ) -> Result<AttributeValue, RepositoryError> {
        let row = sqlx::query_as::<_, AttributeValueRow>(
            r"
            INSERT INTO product_attribute_value (type_id, value, sort)
            VALUES (
                $1, $2,
                (SELECT COALESCE(MAX(sort), 0) + 1 FROM product_attribute_value WHERE type_id = $1)
            )
            RETURNING id, type_id, value, sort
            ",
        )
        .bind(type_id)
        .bind(value)
        .fetch_one(self.pool())
        .await?;
        Ok(row.into())
    }

    async fn get_attribute_values(
        &self,
        ids: &BTreeSet<AttributeValueId>,
    ) -> Result<Vec<AttributeValue>, RepositoryError> {
        let ids: Vec<i32> = ids.iter().map(AttributeValueId::as_i32).collect();
        let rows = sqlx::query_as::<_, AttributeValueRow>(
            r"
            SELECT id, type_id, value, sort FROM product_attribute_value
            WHERE id = ANY($1)
            ORDER BY id
            ",
        )
        .bind(ids)
        .fetch_all(self.pool())
        .await?;
        Ok(rows.into_iter().map(Into::into).collect())
    }

    async fn variations(
        &self,
        product_id: ProductId,
    ) -> Result<Vec<ProductVariation>, RepositoryError> {
        let rows = sqlx::query_as::<_, VariationRow>(&format!(
            "SELECT {VARIATION_COLUMNS} FROM product_variation WHERE product_id = $1 ORDER BY id"
        ))
        .bind(product_id)
        .fetch_all(self.pool())
        .await?;
        self.with_values(rows).await
    }

    async fn get_variation(
        &self,
        id: VariationId,
    ) -> Result<Option<ProductVariation>, RepositoryError> {
        let rows = sqlx::query_as::<_, VariationRow>(&format!(
            "SELECT {VARIATION_COLUMNS} FROM product_variation WHERE id = $1"
        ))
        .bind(id)
        .fetch_all(self.pool())
        .await?;
        Ok(self.with_values(rows).await?.into_iter().next())
    }

    async fn commit_variations(
        &self,
        plan: &VariationPlan,
    ) -> Result<Vec<ProductVariation>, RepositoryError> {
        let mut tx = self.pool().begin().await?;

        let product_sku: String = sqlx::query_scalar(
            "SELECT internal_item_id FROM product WHERE id = $1 FOR UPDATE",
        )
        .bind(plan.product_id)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or(RepositoryError::NotFound)?;

        for (ids, active) in [(&plan.deactivate, false), (&plan.reactivate, true)] {
            if ids.is_empty() {
                continue;
            }
            let ids: Vec<i32> = ids.iter().map(VariationId::as_i32).collect();
            sqlx::query(
                "UPDATE product_variation SET active = $3 WHERE product_id = $1 AND id = ANY($2)",
            )
            .bind(plan.product_id)
            .bind(ids)
            .bind(active)
            .execute(&mut *tx)
            .await?;
        }

        let mut created = Vec::with_capacity(plan.create.len());
        for new in &plan.create {
            let id: i32 = sqlx::query_scalar(
                r"
                INSERT INTO product_variation (product_id, price, stock)
                VALUES ($1, $2, $3)
                RETURNING id
                ",
            )
            .bind(plan.product_id)
            .bind(new.price)
            .bind(new.stock)
            .fetch_one(&mut *tx)
            .await?;
            let id = VariationId::new(id);
            let sku = variation_sku(&product_sku, id);

            sqlx::query("UPDATE product_variation SET internal_item_id = $2 WHERE id = $1")
                .bind(id)
                .bind(&sku)
                .execute(&mut *tx)
                .await?;

            let value_ids: Vec<i32> = new
                .attribute_values
                .iter()
                .map(AttributeValueId::as_i32)
                .collect();
            sqlx::query(
                r"
                INSERT INTO product_variation_value (variation_id, attribute_value_id)
                SELECT $1, UNNEST($2::int[])
                ",
            )
            .bind(id)
            .bind(value_ids)
            .execute(&mut *tx)
            .await?;

            created.push(ProductVariation {
                id,
                product_id: plan.product_id,
                internal_item_id: sku,
                price: new.price,
                stock: new.stock,
                active: true,
                attribute_values: new.attribute_values.clone(),
            });
        }

        sqlx::query(
            r"
            INSERT INTO product_variation_attribute_type (product_id, attribute_type_id, position)
            VALUES (
                $1, $2,
                (SELECT COALESCE(MAX(position), 0) + 1
                 FROM product_variation_attribute_type WHERE product_id = $1)
            )
            ON CONFLICT (product_id, attribute_type_id) DO NOTHING
            ",
        )
        .bind(plan.product_id)
        .bind(plan.attribute_type_id)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(created)
    }
}
