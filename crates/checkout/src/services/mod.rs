//! Services that work on orders and the catalog.
//!
//! - [`cart`] - Session carts
//! - [`processor`] - Placement, payments and fulfilment of one order
//! - [`payment_policy`] - Consequences of gateway results
//! - [`notifications`] - Receipts and status-change email
//! - [`email`] - Mail rendering and delivery
//! - [`variations`] - Variation generation
//! - [`maintenance`] - Housekeeping over stored carts
//! - [`locks`], [`session`], [`observer`] - Supporting infrastructure

pub mod cart;
pub mod email;
pub mod locks;
pub mod maintenance;
pub mod notifications;
pub mod observer;
pub mod payment_policy;
pub mod processor;
pub mod session;
pub mod variations;

pub use cart::ShoppingCart;
pub use email::{Mailer, MemoryMailer, RetryingMailer, SmtpMailer};
pub use locks::{KeyedLocks, OrderLocks, SessionLocks};
pub use maintenance::{PruneReport, prune_stale_modifiers};
pub use notifications::Notifier;
pub use observer::OrderObserver;
pub use payment_policy::PaymentOutcome;
pub use processor::OrderProcessor;
pub use session::{MemorySessionStore, SessionStore};
pub use variations::{GenerationReport, VariationGenerator, plan_variations};
