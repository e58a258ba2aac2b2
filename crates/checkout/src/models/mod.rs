//! Domain models for the checkout.
//!
//! The [`Order`] aggregate owns its items, modifiers and status logs and
//! holds a snapshot of the payments that reference it. Catalog entities
//! describe products and their variation axes.

pub mod catalog;
pub mod customer;
pub mod item;
pub mod member;
pub mod modifier;
pub mod order;
pub mod payment;
pub mod status_log;

pub use catalog::{
    AttributeType, AttributeValue, NewProduct, NewVariation, Product, ProductVariation,
    VariationPlan,
};
pub use customer::{CustomerDetails, ShippingDetails};
pub use item::{Buyable, OrderItem};
pub use member::Member;
pub use modifier::{ModifierKey, OrderModifier};
pub use order::{DEFAULT_OUTSTANDING_EPSILON, Order};
pub use payment::{NewPayment, Payment, PaymentMethod, PaymentMethods};
pub use status_log::{OrderStatusLog, StatusNote};
