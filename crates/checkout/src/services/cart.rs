//! The shopper's cart for a session.

use tracing::instrument;

use mercato_core::{MemberId, OrderId, SessionId};

use crate::db::SaveMode;
use crate::error::{CheckoutError, Result};
use crate::models::{Buyable, CustomerDetails, Order, ShippingDetails};
use crate::modifiers::ModifierKey;
use crate::state::ShopState;

/// Cart operations for one session.
///
/// The session remembers its cart; the first edit creates one. Every edit
/// recalculates the total before saving.
#[derive(Debug, Clone)]
pub struct ShoppingCart {
    state: ShopState,
    session: SessionId,
}

impl ShoppingCart {
    #[must_use]
    pub fn new(state: &ShopState, session: SessionId) -> Self {
        Self {
            state: state.clone(),
            session,
        }
    }

    #[must_use]
    pub const fn session(&self) -> SessionId {
        self.session
    }

    /// The session's cart, if it has one that is still a cart.
    ///
    /// # Errors
    ///
    /// Returns repository errors.
    pub async fn current(&self) -> Result<Option<Order>> {
        let Some(id) = self.state.sessions().current_order(self.session).await else {
            return Ok(None);
        };
        let order = self.state.orders().load(id).await?;
        Ok(order.filter(|order| order.status().is_cart()))
    }

    /// The session's cart, creating one if needed.
    ///
    /// # Errors
    ///
    /// Returns repository errors.
    #[instrument(skip(self), fields(session = %self.session))]
    pub async fn get_or_create(&self, member_id: Option<MemberId>) -> Result<Order> {
        if let Some(order) = self.current().await? {
            return Ok(order);
        }
        let _guard = self.state.session_locks().acquire(self.session).await;
        // Another request in this session may have created the cart meanwhile.
        if let Some(order) = self.current().await? {
            return Ok(order);
        }
        let order = self
            .state
            .orders()
            .create_cart(member_id, self.state.config().currency)
            .await?;
        self.state
            .sessions()
            .set_current_order(self.session, order.id())
            .await;
        tracing::debug!(order_id = %order.id(), "Cart created");
        Ok(order)
    }

    /// Title and unit price of a buyable, from the catalog.
    async fn describe(&self, buyable: Buyable) -> Result<(String, rust_decimal::Decimal)> {
        let catalog = self.state.catalog();
        match buyable {
            Buyable::Product(id) => {
                let product = catalog
                    .get_product(id)
                    .await?
                    .ok_or_else(|| CheckoutError::NotFound(format!("product {id}")))?;
                Ok((product.title, product.price))
            }
            Buyable::Variation(id) => {
                let variation = catalog
                    .get_variation(id)
                    .await?
                    .filter(|variation| variation.active)
                    .ok_or_else(|| CheckoutError::NotFound(format!("variation {id}")))?;
                let product = catalog
                    .get_product(variation.product_id)
                    .await?
                    .ok_or_else(|| {
                        CheckoutError::NotFound(format!("product {}", variation.product_id))
                    })?;
                let values = catalog
                    .get_attribute_values(&variation.attribute_values)
                    .await?
                    .into_iter()
                    .map(|value| value.value)
                    .collect::<Vec<_>>();
                let title = if values.is_empty() {
                    product.title
                } else {
                    format!("{} ({})", product.title, values.join(", "))
                };
                Ok((title, variation.price))
            }
        }
    }

    /// Run `edit` on the session's cart under its lock, recalculate and save.
    async fn edit<F>(&self, member_id: Option<MemberId>, edit: F) -> Result<Order>
    where
        F: FnOnce(&mut Order) -> Result<()> + Send,
    {
        let id = self.get_or_create(member_id).await?.id();
        self.edit_order(id, edit).await
    }

    async fn edit_order<F>(&self, id: OrderId, edit: F) -> Result<Order>
    where
        F: FnOnce(&mut Order) -> Result<()> + Send,
    {
        let _guard = self.state.locks().acquire(id).await;
        let mut order = self
            .state
            .orders()
            .load(id)
            .await?
            .ok_or_else(|| CheckoutError::NotFound(format!("order {id}")))?;
        edit(&mut order)?;
        order.calculate(self.state.pipeline());
        self.state.orders().save(&mut order, SaveMode::Changed).await?;
        Ok(order)
    }

    async fn existing_cart_id(&self) -> Result<OrderId> {
        self.current()
            .await?
            .map(|order| order.id())
            .ok_or_else(|| {
                CheckoutError::Validation("A new order has not yet been started.".to_string())
            })
    }

    /// Add `quantity` of a buyable, merging with an existing line.
    ///
    /// # Errors
    ///
    /// Returns a not-found error for unknown or inactive buyables and a
    /// validation error for a zero quantity.
    #[instrument(skip(self), fields(session = %self.session))]
    pub async fn add(
        &self,
        buyable: Buyable,
        quantity: u32,
        member_id: Option<MemberId>,
    ) -> Result<Order> {
        let (title, price) = self.describe(buyable).await?;
        self.edit(member_id, |order| order.add_item(buyable, title, price, quantity))
            .await
    }

    /// Change a line's quantity; zero removes it.
    ///
    /// # Errors
    ///
    /// Returns a validation error without a cart and a not-found error for
    /// lines not in the cart.
    #[instrument(skip(self), fields(session = %self.session))]
    pub async fn set_quantity(&self, buyable: Buyable, quantity: u32) -> Result<Order> {
        let id = self.existing_cart_id().await?;
        self.edit_order(id, |order| order.set_quantity(buyable, quantity))
            .await
    }

    /// Remove a line.
    ///
    /// # Errors
    ///
    /// Returns a validation error without a cart.
    #[instrument(skip(self), fields(session = %self.session))]
    pub async fn remove(&self, buyable: Buyable) -> Result<Order> {
        let id = self.existing_cart_id().await?;
        self.edit_order(id, |order| order.remove_item(buyable).map(|_| ()))
            .await
    }

    /// Empty the cart but keep it as the session's cart.
    ///
    /// # Errors
    ///
    /// Returns a validation error without a cart.
    #[instrument(skip(self), fields(session = %self.session))]
    pub async fn clear(&self) -> Result<Order> {
        let id = self.existing_cart_id().await?;
        self.edit_order(id, Order::clear).await
    }

    /// Attach an optional modifier, such as a voucher.
    ///
    /// # Errors
    ///
    /// Returns a configuration error for modifiers not in the pipeline and
    /// a validation error when the modifier does not apply.
    #[instrument(skip(self), fields(session = %self.session, modifier = %key))]
    pub async fn attach_modifier(&self, key: &ModifierKey) -> Result<Order> {
        let id = self.existing_cart_id().await?;
        let pipeline = self.state.pipeline().clone();
        self.edit_order(id, move |order| order.attach_modifier(&pipeline, key).map(|_| ()))
            .await
    }

    /// Record who is buying and where to ship. Without `shipping` the order
    /// ships to the billing address.
    ///
    /// # Errors
    ///
    /// Returns a validation error without a cart.
    #[instrument(skip(self, customer, shipping), fields(session = %self.session))]
    pub async fn set_customer_details(
        &self,
        customer: CustomerDetails,
        shipping: Option<ShippingDetails>,
    ) -> Result<Order> {
        let id = self.existing_cart_id().await?;
        let now = self.state.now();
        self.edit_order(id, move |order| {
            order.customer = customer;
            order.use_shipping_address = shipping.is_some();
            order.shipping = shipping.unwrap_or_default();
            order.updated_at = now;
            Ok(())
        })
        .await
    }

    /// Detach the session from its cart. The cart itself is kept.
    pub async fn forget(&self) {
        self.state.sessions().clear(self.session).await;
    }
}
