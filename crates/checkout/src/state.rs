//! Shop state shared by every service.

use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::config::{ConfigError, ShopConfig};
use crate::db::{CatalogRepository, MemberDirectory, OrderRepository, PaymentRepository};
use crate::modifiers::{ModifierPipeline, ModifierRegistry, ModifierRule};
use crate::services::email::{Mailer, RetryingMailer, SmtpMailer};
use crate::services::locks::{OrderLocks, SessionLocks};
use crate::services::observer::OrderObserver;
use crate::services::session::{MemorySessionStore, SessionStore};

/// Configuration, repositories and services used by the checkout.
///
/// This struct is cheaply cloneable via `Arc`.
#[derive(Clone)]
pub struct ShopState {
    inner: Arc<ShopStateInner>,
}

struct ShopStateInner {
    config: ShopConfig,
    pipeline: ModifierPipeline,
    orders: Arc<dyn OrderRepository>,
    payments: Arc<dyn PaymentRepository>,
    catalog: Arc<dyn CatalogRepository>,
    members: Arc<dyn MemberDirectory>,
    mailer: Arc<dyn Mailer>,
    sessions: Arc<dyn SessionStore>,
    locks: OrderLocks,
    session_locks: SessionLocks,
    observers: Vec<Arc<dyn OrderObserver>>,
}

impl ShopState {
    /// Start building a state over a store that implements every repository.
    pub fn builder<S>(config: ShopConfig, store: Arc<S>) -> ShopStateBuilder
    where
        S: OrderRepository + PaymentRepository + CatalogRepository + MemberDirectory + 'static,
    {
        ShopStateBuilder::new(config, store)
    }

    #[must_use]
    pub fn config(&self) -> &ShopConfig {
        &self.inner.config
    }

    /// Modifier rules applied to carts, in configured order.
    #[must_use]
    pub fn pipeline(&self) -> &ModifierPipeline {
        &self.inner.pipeline
    }

    #[must_use]
    pub fn orders(&self) -> &dyn OrderRepository {
        self.inner.orders.as_ref()
    }

    #[must_use]
    pub fn payments(&self) -> &dyn PaymentRepository {
        self.inner.payments.as_ref()
    }

    #[must_use]
    pub fn catalog(&self) -> &dyn CatalogRepository {
        self.inner.catalog.as_ref()
    }

    #[must_use]
    pub fn members(&self) -> &dyn MemberDirectory {
        self.inner.members.as_ref()
    }

    #[must_use]
    pub fn mailer(&self) -> &dyn Mailer {
        self.inner.mailer.as_ref()
    }

    #[must_use]
    pub fn sessions(&self) -> &dyn SessionStore {
        self.inner.sessions.as_ref()
    }

    #[must_use]
    pub fn locks(&self) -> &OrderLocks {
        &self.inner.locks
    }

    /// Serialises cart creation per session.
    pub(crate) fn session_locks(&self) -> &SessionLocks {
        &self.inner.session_locks
    }

    pub(crate) fn observers(&self) -> &[Arc<dyn OrderObserver>] {
        &self.inner.observers
    }

    #[allow(clippy::unused_self)]
    pub(crate) fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

impl std::fmt::Debug for ShopState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ShopState")
            .field("config", &self.inner.config)
            .field("pipeline", &self.inner.pipeline)
            .field("observers", &self.inner.observers.len())
            .finish_non_exhaustive()
    }
}

/// Assembles a [`ShopState`], validating the modifier pipeline.
pub struct ShopStateBuilder {
    config: ShopConfig,
    registry: ModifierRegistry,
    orders: Arc<dyn OrderRepository>,
    payments: Arc<dyn PaymentRepository>,
    catalog: Arc<dyn CatalogRepository>,
    members: Arc<dyn MemberDirectory>,
    mailer: Option<Arc<dyn Mailer>>,
    sessions: Option<Arc<dyn SessionStore>>,
    observers: Vec<Arc<dyn OrderObserver>>,
}

impl ShopStateBuilder {
    /// Builder with the built-in modifier rules registered.
    pub fn new<S>(config: ShopConfig, store: Arc<S>) -> Self
    where
        S: OrderRepository + PaymentRepository + CatalogRepository + MemberDirectory + 'static,
    {
        let registry = ModifierRegistry::with_builtins(&config.modifier_settings);
        Self {
            config,
            registry,
            orders: store.clone(),
            payments: store.clone(),
            catalog: store.clone(),
            members: store,
            mailer: None,
            sessions: None,
            observers: Vec::new(),
        }
    }

    /// Make a custom rule available to the configured modifier list.
    #[must_use]
    pub fn register_modifier(mut self, rule: impl ModifierRule + 'static) -> Self {
        self.registry.register(rule);
        self
    }

    /// Read members from a separate directory.
    #[must_use]
    pub fn members(mut self, members: Arc<dyn MemberDirectory>) -> Self {
        self.members = members;
        self
    }

    /// Deliver email through `mailer` instead of SMTP. Retries still apply.
    #[must_use]
    pub fn mailer(mut self, mailer: Arc<dyn Mailer>) -> Self {
        self.mailer = Some(mailer);
        self
    }

    #[must_use]
    pub fn sessions(mut self, sessions: Arc<dyn SessionStore>) -> Self {
        self.sessions = Some(sessions);
        self
    }

    #[must_use]
    pub fn observer(mut self, observer: Arc<dyn OrderObserver>) -> Self {
        self.observers.push(observer);
        self
    }

    /// Validate and assemble.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::UnknownModifier`] or
    /// [`ConfigError::DuplicateModifier`] when the configured modifier list
    /// names an unregistered rule or repeats one, and an SMTP configuration error when
    /// no mailer was supplied and SMTP is missing or invalid.
    pub fn build(self) -> Result<ShopState, ConfigError> {
        let pipeline = ModifierPipeline::new(&self.registry, &self.config.modifiers)?;

        let transport = match self.mailer {
            Some(mailer) => mailer,
            None => {
                let smtp = self
                    .config
                    .smtp
                    .as_ref()
                    .ok_or_else(|| ConfigError::MissingEnvVar("SMTP_HOST".to_string()))?;
                let mailer = SmtpMailer::new(smtp).map_err(|e| {
                    ConfigError::InvalidEnvVar("SMTP_HOST".to_string(), e.to_string())
                })?;
                Arc::new(mailer)
            }
        };
        let mailer: Arc<dyn Mailer> =
            Arc::new(RetryingMailer::new(transport, self.config.delivery));

        let sessions = self
            .sessions
            .unwrap_or_else(|| Arc::new(MemorySessionStore::new(self.config.session_idle)));

        tracing::debug!(
            modifiers = pipeline.rules().len(),
            observers = self.observers.len(),
            "Shop state assembled"
        );

        Ok(ShopState {
            inner: Arc::new(ShopStateInner {
                config: self.config,
                pipeline,
                orders: self.orders,
                payments: self.payments,
                catalog: self.catalog,
                members: self.members,
                mailer,
                sessions,
                locks: OrderLocks::new(),
                session_locks: SessionLocks::new(),
                observers: self.observers,
            }),
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use mercato_core::Email;

    use super::*;
    use crate::db::MemoryStore;
    use crate::modifiers::ModifierKey;
    use crate::services::email::MemoryMailer;

    fn config() -> ShopConfig {
        ShopConfig::new(Email::parse("admin@example.com").unwrap())
    }

    #[test]
    fn test_build_with_memory_mailer() {
        let mut config = config();
        config.modifiers = vec![ModifierKey::from("flat_shipping"), ModifierKey::from("sales_tax")];
        let state = ShopState::builder(config, Arc::new(MemoryStore::new()))
            .mailer(Arc::new(MemoryMailer::new()))
            .build()
            .unwrap();
        assert_eq!(state.pipeline().rules().len(), 2);
    }

    #[test]
    fn test_unknown_modifier_fails_fast() {
        let mut config = config();
        config.modifiers = vec![ModifierKey::from("gift_wrap")];
        let result = ShopState::builder(config, Arc::new(MemoryStore::new()))
            .mailer(Arc::new(MemoryMailer::new()))
            .build();
        assert!(matches!(result, Err(ConfigError::UnknownModifier(key)) if key == "gift_wrap"));
    }

    #[test]
    fn test_repeated_modifier_fails_fast() {
        let mut config = config();
        config.modifiers = vec![
            ModifierKey::from("flat_shipping"),
            ModifierKey::from("flat_shipping"),
        ];
        let result = ShopState::builder(config, Arc::new(MemoryStore::new()))
            .mailer(Arc::new(MemoryMailer::new()))
            .build();
        assert!(matches!(result, Err(ConfigError::DuplicateModifier(key)) if key == "flat_shipping"));
    }

    #[test]
    fn test_missing_smtp_without_mailer() {
        let result = ShopState::builder(config(), Arc::new(MemoryStore::new())).build();
        assert!(matches!(result, Err(ConfigError::MissingEnvVar(var)) if var == "SMTP_HOST"));
    }
}
