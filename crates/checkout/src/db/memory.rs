//! In-process implementation of every repository.
//!
//! Used by tests and by tooling that does not need a database. Each save
//! stores a clean copy of the aggregate, so the store never shares state
//! with callers.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use chrono::Utc;

use mercato_core::{
    AttributeTypeId, AttributeValueId, CurrencyCode, MemberId, OrderId, OrderItemId,
    OrderModifierId, OrderStatusLogId, PaymentId, PaymentStatus, ProductId, VariationId,
};

use super::{
    CatalogRepository, MemberDirectory, OrderRepository, PaymentRepository, RepositoryError,
    SaveMode, variation_sku,
};
use crate::models::{
    AttributeType, AttributeValue, Member, NewPayment, NewProduct, Order, OrderStatusLog, Payment,
    Product, ProductVariation, VariationPlan,
};

/// Row writes performed by [`MemoryStore::save`](OrderRepository::save).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WriteStats {
    pub saves: usize,
    pub item_writes: usize,
    pub modifier_writes: usize,
    pub log_writes: usize,
    pub deletes: usize,
}

#[derive(Debug, Default)]
struct Sequences {
    order: i32,
    item: i32,
    modifier: i32,
    log: i32,
    payment: i32,
    product: i32,
    attribute_type: i32,
    attribute_value: i32,
    variation: i32,
}

fn next(counter: &mut i32) -> i32 {
    *counter += 1;
    *counter
}

#[derive(Debug, Default)]
struct Inner {
    sequences: Sequences,
    stats: WriteStats,
    orders: BTreeMap<OrderId, Order>,
    payments: BTreeMap<PaymentId, Payment>,
    members: BTreeMap<MemberId, Member>,
    products: BTreeMap<ProductId, Product>,
    attribute_types: BTreeMap<AttributeTypeId, AttributeType>,
    attribute_values: BTreeMap<AttributeValueId, AttributeValue>,
    variations: BTreeMap<VariationId, ProductVariation>,
}

/// Repository implementation backed by in-process maps.
#[derive(Debug, Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Add or replace a member.
    pub fn insert_member(&self, member: Member) {
        self.lock().members.insert(member.id, member);
    }

    /// Row writes performed so far.
    #[must_use]
    pub fn write_stats(&self) -> WriteStats {
        self.lock().stats
    }
}

#[async_trait]
impl OrderRepository for MemoryStore {
    async fn create_cart(
        &self,
        member_id: Option<MemberId>,
        currency: CurrencyCode,
    ) -> Result<Order, RepositoryError> {
        let mut inner = self.lock();
        let id = OrderId::new(next(&mut inner.sequences.order));
        let order = Order::new_cart(id, member_id, currency, Utc::now());
        inner.orders.insert(id, order.clone());
        Ok(order)
    }

    async fn load(&self, id: OrderId) -> Result<Option<Order>, RepositoryError> {
        let inner = self.lock();
        let Some(stored) = inner.orders.get(&id) else {
            return Ok(None);
        };
        let mut order = stored.clone();
        order.payments = inner
            .payments
            .values()
            .filter(|payment| payment.order_id == id)
            .cloned()
            .collect();
        order.sort_modifiers();
        Ok(Some(order))
    }

    async fn save(&self, order: &mut Order, mode: SaveMode) -> Result<(), RepositoryError> {
        let mut guard = self.lock();
        let Inner {
            sequences,
            stats,
            orders,
            ..
        } = &mut *guard;

        let stored = orders.get(&order.id).ok_or(RepositoryError::NotFound)?;
        if stored.version != order.version {
            return Err(RepositoryError::Conflict(format!(
                "order {} was modified concurrently",
                order.id
            )));
        }

        stats.deletes += order.removed_items.len() + order.removed_modifiers.len();
        order.removed_items.clear();
        order.removed_modifiers.clear();

        let everything = mode == SaveMode::Everything;
        for item in &mut order.items {
            if item.id.is_none() {
                item.id = Some(OrderItemId::new(next(&mut sequences.item)));
                stats.item_writes += 1;
            } else if everything || item.is_dirty() {
                stats.item_writes += 1;
            }
            item.mark_clean();
        }
        for modifier in &mut order.modifiers {
            if modifier.id.is_none() {
                modifier.id = Some(OrderModifierId::new(next(&mut sequences.modifier)));
                stats.modifier_writes += 1;
            } else if everything || modifier.is_dirty() {
                stats.modifier_writes += 1;
            }
            modifier.mark_clean();
        }
        for log in &mut order.status_logs {
            if log.id.is_none() {
                log.id = Some(OrderStatusLogId::new(next(&mut sequences.log)));
                stats.log_writes += 1;
            }
        }

        order.version += 1;
        stats.saves += 1;

        let mut stored = order.clone();
        stored.payments.clear();
        orders.insert(order.id, stored);
        Ok(())
    }

    async fn cart_ids(&self) -> Result<Vec<OrderId>, RepositoryError> {
        Ok(self
            .lock()
            .orders
            .values()
            .filter(|order| order.status.is_cart())
            .map(|order| order.id)
            .collect())
    }

    async fn claim_receipt(&self, id: OrderId) -> Result<bool, RepositoryError> {
        let mut inner = self.lock();
        let order = inner.orders.get_mut(&id).ok_or(RepositoryError::NotFound)?;
        if order.receipt_sent {
            return Ok(false);
        }
        order.receipt_sent = true;
        Ok(true)
    }

    async fn release_receipt(&self, id: OrderId) -> Result<(), RepositoryError> {
        let mut inner = self.lock();
        let order = inner.orders.get_mut(&id).ok_or(RepositoryError::NotFound)?;
        order.receipt_sent = false;
        Ok(())
    }

    async fn latest_customer_log(
        &self,
        id: OrderId,
    ) -> Result<Option<OrderStatusLog>, RepositoryError> {
        let inner = self.lock();
        let order = inner.orders.get(&id).ok_or(RepositoryError::NotFound)?;
        Ok(order.latest_customer_log().cloned())
    }
}

#[async_trait]
impl PaymentRepository for MemoryStore {
    async fn insert(&self, payment: NewPayment) -> Result<Payment, RepositoryError> {
        let mut inner = self.lock();
        if !inner.orders.contains_key(&payment.order_id) {
            return Err(RepositoryError::NotFound);
        }
        let now = Utc::now();
        let payment = Payment {
            id: PaymentId::new(next(&mut inner.sequences.payment)),
            order_id: payment.order_id,
            method: payment.method,
            amount: payment.amount,
            status: PaymentStatus::Incomplete,
            message: None,
            ip_address: payment.ip_address,
            created_at: now,
            updated_at: now,
        };
        inner.payments.insert(payment.id, payment.clone());
        Ok(payment)
    }

    async fn get(&self, id: PaymentId) -> Result<Option<Payment>, RepositoryError> {
        Ok(self.lock().payments.get(&id).cloned())
    }

    async fn update_status(
        &self,
        id: PaymentId,
        status: PaymentStatus,
        message: Option<String>,
    ) -> Result<Payment, RepositoryError> {
        let mut inner = self.lock();
        let payment = inner.payments.get_mut(&id).ok_or(RepositoryError::NotFound)?;
        payment.status = status;
        payment.message = message;
        payment.updated_at = Utc::now();
        Ok(payment.clone())
    }

    async fn for_order(&self, order_id: OrderId) -> Result<Vec<Payment>, RepositoryError> {
        Ok(self
            .lock()
            .payments
            .values()
            .filter(|payment| payment.order_id == order_id)
            .cloned()
            .collect())
    }
}

#[async_trait]
impl CatalogRepository for MemoryStore {
    async fn get_product(&self, id: ProductId) -> Result<Option<Product>, RepositoryError> {
        Ok(self.lock().products.get(&id).cloned())
    }

    async fn insert_product(&self, product: NewProduct) -> Result<Product, RepositoryError> {
        let mut inner = self.lock();
        let product = Product {
            id: ProductId::new(next(&mut inner.sequences.product)),
            title: product.title,
            price: product.price,
            internal_item_id: product.internal_item_id,
            variation_attribute_types: Vec::new(),
        };
        inner.products.insert(product.id, product.clone());
        Ok(product)
    }

    async fn find_attribute_type(
        &self,
        name: &str,
    ) -> Result<Option<AttributeType>, RepositoryError> {
        let wanted = name.to_lowercase();
        Ok(self
            .lock()
            .attribute_types
            .values()
            .find(|attribute_type| attribute_type.name.to_lowercase() == wanted)
            .cloned())
    }

    async fn get_attribute_type(
        &self,
        id: AttributeTypeId,
    ) -> Result<Option<AttributeType>, RepositoryError> {
        Ok(self.lock().attribute_types.get(&id).cloned())
    }

    async fn insert_attribute_type(
        &self,
        name: &str,
        label: &str,
    ) -> Result<AttributeType, RepositoryError> {
        let mut inner = self.lock();
        let attribute_type = AttributeType {
            id: AttributeTypeId::new(next(&mut inner.sequences.attribute_type)),
            name: name.to_string(),
            label: label.to_string(),
        };
        inner
            .attribute_types
            .insert(attribute_type.id, attribute_type.clone());
        Ok(attribute_type)
    }

    async fn attribute_values(
        &self,
        type_id: AttributeTypeId,
    ) -> Result<Vec<AttributeValue>, RepositoryError> {
        let mut values: Vec<AttributeValue> = self
            .lock()
            .attribute_values
            .values()
            .filter(|value| value.type_id == type_id)
            .cloned()
            .collect();
        values.sort_by_key(|value| (value.sort, value.id));
        Ok(values)
    }

    async fn insert_attribute_value(
        &self,
        type_id: AttributeTypeId,
        value: &str,
    ) -> Result<AttributeValue, RepositoryError> {
        let mut inner = self.lock();
        if !inner.attribute_types.contains_key(&type_id) {
            return Err(RepositoryError::NotFound);
        }
        let sort = inner
            .attribute_values
            .values()
            .filter(|existing| existing.type_id == type_id)
            .map(|existing| existing.sort)
            .max()
            .unwrap_or(0)
            + 1;
        let value = AttributeValue {
            id: AttributeValueId::new(next(&mut inner.sequences.attribute_value)),
            type_id,
            value: value.to_string(),
            sort,
        };
        inner.attribute_values.insert(value.id, value.clone());
        Ok(value)
    }

    async fn get_attribute_values(
        &self,
        ids: &BTreeSet<AttributeValueId>,
    ) -> Result<Vec<AttributeValue>, RepositoryError> {
        let inner = self.lock();
        Ok(ids
            .iter()
            .filter_map(|id| inner.attribute_values.get(id).cloned())
            .collect())
    }

    async fn variations(
        &self,
        product_id: ProductId,
    ) -> Result<Vec<ProductVariation>, RepositoryError> {
        Ok(self
            .lock()
            .variations
            .values()
            .filter(|variation| variation.product_id == product_id)
            .cloned()
            .collect())
    }

    async fn get_variation(
        &self,
        id: VariationId,
    ) -> Result<Option<ProductVariation>, RepositoryError> {
        Ok(self.lock().variations.get(&id).cloned())
    }

    async fn commit_variations(
        &self,
        plan: &VariationPlan,
    ) -> Result<Vec<ProductVariation>, RepositoryError> {
        let mut guard = self.lock();
        let Inner {
            sequences,
            products,
            variations,
            ..
        } = &mut *guard;

        let product = products
            .get_mut(&plan.product_id)
            .ok_or(RepositoryError::NotFound)?;

        for id in &plan.deactivate {
            if let Some(variation) = variations.get_mut(id) {
                variation.active = false;
            }
        }
        for id in &plan.reactivate {
            if let Some(variation) = variations.get_mut(id) {
                variation.active = true;
            }
        }

        let mut created = Vec::with_capacity(plan.create.len());
        for new in &plan.create {
            let id = VariationId::new(next(&mut sequences.variation));
            let variation = ProductVariation {
                id,
                product_id: plan.product_id,
                internal_item_id: variation_sku(&product.internal_item_id, id),
                price: new.price,
                stock: new.stock,
                active: true,
                attribute_values: new.attribute_values.clone(),
            };
            variations.insert(id, variation.clone());
            created.push(variation);
        }

        if !product
            .variation_attribute_types
            .contains(&plan.attribute_type_id)
        {
            product
                .variation_attribute_types
                .push(plan.attribute_type_id);
        }
        Ok(created)
    }
}

#[async_trait]
impl MemberDirectory for MemoryStore {
    async fn get(&self, id: MemberId) -> Result<Option<Member>, RepositoryError> {
        Ok(self.lock().members.get(&id).cloned())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use rust_decimal::Decimal;

    use mercato_core::Money;

    use super::*;
    use crate::models::{Buyable, PaymentMethod};

    #[tokio::test]
    async fn test_save_assigns_ids_and_bumps_version() {
        let store = MemoryStore::new();
        let mut order = store.create_cart(None, CurrencyCode::USD).await.unwrap();
        order
            .add_item(Buyable::Product(ProductId::new(1)), "Mug", Decimal::from(8), 1)
            .unwrap();

        store.save(&mut order, SaveMode::Changed).await.unwrap();
        assert_eq!(order.version(), 1);
        assert!(order.items().iter().all(|item| item.id.is_some() && !item.is_dirty()));

        let loaded = store.load(order.id()).await.unwrap().unwrap();
        assert_eq!(loaded.items(), order.items());
    }

    #[tokio::test]
    async fn test_stale_version_conflicts() {
        let store = MemoryStore::new();
        let order = store.create_cart(None, CurrencyCode::USD).await.unwrap();
        let mut first = store.load(order.id()).await.unwrap().unwrap();
        let mut second = store.load(order.id()).await.unwrap().unwrap();

        store.save(&mut first, SaveMode::Changed).await.unwrap();
        let err = store.save(&mut second, SaveMode::Changed).await.unwrap_err();
        assert!(matches!(err, RepositoryError::Conflict(_)));
    }

    #[tokio::test]
    async fn test_claim_receipt_only_once() {
        let store = MemoryStore::new();
        let order = store.create_cart(None, CurrencyCode::USD).await.unwrap();
        assert!(store.claim_receipt(order.id()).await.unwrap());
        assert!(!store.claim_receipt(order.id()).await.unwrap());
        store.release_receipt(order.id()).await.unwrap();
        assert!(store.claim_receipt(order.id()).await.unwrap());
    }

    #[tokio::test]
    async fn test_load_includes_payments() {
        let store = MemoryStore::new();
        let order = store.create_cart(None, CurrencyCode::USD).await.unwrap();
        let payment = store
            .insert(NewPayment {
                order_id: order.id(),
                method: PaymentMethod::Manual,
                amount: Money::new(Decimal::from(10), CurrencyCode::USD),
                ip_address: None,
            })
            .await
            .unwrap();
        assert_eq!(payment.status, PaymentStatus::Incomplete);

        let loaded = store.load(order.id()).await.unwrap().unwrap();
        assert_eq!(loaded.payments(), &[payment]);
    }

    #[tokio::test]
    async fn test_attribute_values_sorted_after_existing() {
        let store = MemoryStore::new();
        let size = store.insert_attribute_type("size", "Size").await.unwrap();
        let small = store.insert_attribute_value(size.id, "Small").await.unwrap();
        let large = store.insert_attribute_value(size.id, "Large").await.unwrap();
        assert_eq!((small.sort, large.sort), (1, 2));

        let found = store.find_attribute_type("SIZE").await.unwrap().unwrap();
        assert_eq!(found.id, size.id);
    }
}
