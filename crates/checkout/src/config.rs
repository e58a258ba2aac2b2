//! Shop configuration loaded from environment variables.
//!
//! # Environment Variables
//!
//! ## Required
//! - `MERCATO_ADMIN_EMAIL` - Site administrator address (receipt fallback sender and BCC)
//!
//! ## Optional
//! - `MERCATO_CURRENCY` - Shop currency code (default: USD)
//! - `MERCATO_MODIFIERS` - Comma-separated modifier pipeline (default: empty)
//! - `MERCATO_PAYMENT_METHODS` - Comma-separated enabled payment methods (default: manual)
//! - `MERCATO_CANCEL_BEFORE_PAYMENT` - Members may cancel unpaid orders (default: true)
//! - `MERCATO_CANCEL_BEFORE_PROCESSING` - Members may cancel paid orders (default: false)
//! - `MERCATO_CANCEL_BEFORE_SENDING` - Members may cancel processing or queried orders (default: false)
//! - `MERCATO_CANCEL_AFTER_SENDING` - Members may cancel sent or complete orders (default: false)
//! - `MERCATO_EMAIL_FROM` - Receipt sender address (default: admin address)
//! - `MERCATO_EMAIL_COPY_ADMIN` - BCC the admin on receipts (default: true)
//! - `MERCATO_RECEIPT_SUBJECT` - Receipt subject, `{order_id}` is substituted
//! - `MERCATO_PURCHASE_COMPLETE_MESSAGE` - Message included in receipts
//! - `MERCATO_OUTSTANDING_EPSILON` - Ignorable payment difference (default: 0.01)
//! - `MERCATO_SHIPPING_CHARGE` - Flat shipping charge (default: 0)
//! - `MERCATO_FREE_SHIPPING_OVER` - Subtotal from which shipping is free
//! - `MERCATO_TAX_RATE` - Sales tax rate as a fraction, e.g. 0.15 (default: 0)
//! - `MERCATO_TAX_TITLE` - Display title for the tax line (default: Tax)
//! - `MERCATO_VOUCHER_DISCOUNT` - Fixed voucher discount (default: 0)
//! - `MERCATO_VOUCHER_MINIMUM` - Minimum subtotal for the voucher (default: 0)
//! - `MERCATO_EMAIL_ATTEMPTS` - Delivery attempts per email (default: 3)
//! - `MERCATO_EMAIL_BACKOFF_MS` - Initial retry backoff in milliseconds (default: 500)
//! - `MERCATO_SESSION_IDLE_SECS` - Cart session idle expiry (default: 86400)
//! - `DATABASE_URL` - `PostgreSQL` connection string
//!
//! ## Optional (SMTP - all four must be set together)
//! - `SMTP_HOST`, `SMTP_PORT`, `SMTP_USERNAME`, `SMTP_PASSWORD`

use std::time::Duration;

use rust_decimal::Decimal;
use secrecy::SecretString;
use thiserror::Error;

use mercato_core::{CurrencyCode, Email, OrderStatus};

use crate::models::{DEFAULT_OUTSTANDING_EPSILON, ModifierKey, PaymentMethod, PaymentMethods};

/// Receipt subject used when none is configured.
pub const DEFAULT_RECEIPT_SUBJECT: &str = "Shop Sale Information #{order_id}";

/// Configuration errors that can occur during loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid environment variable {0}: {1}")]
    InvalidEnvVar(String, String),

    #[error("Unknown modifier in pipeline: {0}")]
    UnknownModifier(String),

    #[error("Modifier listed more than once in pipeline: {0}")]
    DuplicateModifier(String),
}

/// Which placed statuses a member may still cancel from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CancellationPolicy {
    pub before_payment: bool,
    pub before_processing: bool,
    pub before_sending: bool,
    pub after_sending: bool,
}

impl Default for CancellationPolicy {
    fn default() -> Self {
        Self {
            before_payment: true,
            before_processing: false,
            before_sending: false,
            after_sending: false,
        }
    }
}

impl CancellationPolicy {
    /// Whether an order in `status` may be cancelled by its member.
    #[must_use]
    pub const fn can_cancel(&self, status: OrderStatus) -> bool {
        match status {
            OrderStatus::Unpaid => self.before_payment,
            OrderStatus::Paid => self.before_processing,
            OrderStatus::Processing | OrderStatus::Query => self.before_sending,
            OrderStatus::Sent | OrderStatus::Complete => self.after_sending,
            _ => false,
        }
    }
}

/// Receipt and notification settings.
#[derive(Debug, Clone)]
pub struct EmailSettings {
    /// Sender for receipts; falls back to `admin`.
    pub from: Option<Email>,
    /// Site administrator address.
    pub admin: Email,
    /// BCC the admin on receipts.
    pub copy_admin: bool,
    /// Subject template; `{order_id}` is replaced.
    pub receipt_subject: String,
    pub purchase_complete_message: String,
}

impl EmailSettings {
    #[must_use]
    pub fn new(admin: Email) -> Self {
        Self {
            from: None,
            admin,
            copy_admin: true,
            receipt_subject: DEFAULT_RECEIPT_SUBJECT.to_string(),
            purchase_complete_message: String::new(),
        }
    }

    /// Effective sender address.
    #[must_use]
    pub fn sender(&self) -> &Email {
        self.from.as_ref().unwrap_or(&self.admin)
    }
}

/// Parameters for the built-in modifier rules.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModifierSettings {
    pub shipping_charge: Decimal,
    pub free_shipping_over: Option<Decimal>,
    pub tax_rate: Decimal,
    pub tax_title: String,
    pub voucher_discount: Decimal,
    pub voucher_minimum: Decimal,
}

impl Default for ModifierSettings {
    fn default() -> Self {
        Self {
            shipping_charge: Decimal::ZERO,
            free_shipping_over: None,
            tax_rate: Decimal::ZERO,
            tax_title: "Tax".to_string(),
            voucher_discount: Decimal::ZERO,
            voucher_minimum: Decimal::ZERO,
        }
    }
}

/// Retry behaviour for outgoing email.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeliveryPolicy {
    /// Total attempts, including the first.
    pub max_attempts: u32,
    /// Wait before the second attempt; doubled for each attempt after.
    pub initial_backoff: Duration,
}

impl Default for DeliveryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff: Duration::from_millis(500),
        }
    }
}

/// SMTP transport configuration.
///
/// Implements `Debug` manually to redact the password.
#[derive(Clone)]
pub struct SmtpConfig {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: SecretString,
}

impl std::fmt::Debug for SmtpConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SmtpConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("password", &"[REDACTED]")
            .finish()
    }
}

/// Shop configuration.
#[derive(Clone)]
pub struct ShopConfig {
    pub currency: CurrencyCode,
    /// Ordered modifier pipeline applied to carts.
    pub modifiers: Vec<ModifierKey>,
    pub modifier_settings: ModifierSettings,
    pub payment_methods: PaymentMethods,
    pub cancellation: CancellationPolicy,
    pub email: EmailSettings,
    /// Payment differences smaller than this are treated as settled.
    pub outstanding_epsilon: Decimal,
    pub delivery: DeliveryPolicy,
    pub session_idle: Duration,
    pub database_url: Option<SecretString>,
    pub smtp: Option<SmtpConfig>,
}

impl std::fmt::Debug for ShopConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ShopConfig")
            .field("currency", &self.currency)
            .field("modifiers", &self.modifiers)
            .field("modifier_settings", &self.modifier_settings)
            .field("payment_methods", &self.payment_methods)
            .field("cancellation", &self.cancellation)
            .field("email", &self.email)
            .field("outstanding_epsilon", &self.outstanding_epsilon)
            .field("delivery", &self.delivery)
            .field("session_idle", &self.session_idle)
            .field("database_url", &self.database_url.as_ref().map(|_| "[REDACTED]"))
            .field("smtp", &self.smtp)
            .finish()
    }
}

impl ShopConfig {
    /// Defaults for everything except the admin address.
    #[must_use]
    pub fn new(admin: Email) -> Self {
        Self {
            currency: CurrencyCode::default(),
            modifiers: Vec::new(),
            modifier_settings: ModifierSettings::default(),
            payment_methods: PaymentMethods::default(),
            cancellation: CancellationPolicy::default(),
            email: EmailSettings::new(admin),
            outstanding_epsilon: DEFAULT_OUTSTANDING_EPSILON,
            delivery: DeliveryPolicy::default(),
            session_idle: Duration::from_secs(86_400),
            database_url: None,
            smtp: None,
        }
    }

    /// Load configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if a required variable is missing or a value cannot
    /// be parsed.
    pub fn from_env() -> Result<Self, ConfigError> {
        // Load .env file if present (ignore errors if not found)
        let _ = dotenvy::dotenv();

        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration through an arbitrary variable lookup.
    ///
    /// # Errors
    ///
    /// Returns an error if a required variable is missing or a value cannot
    /// be parsed.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let env = Env(&lookup);

        let admin = parse_email("MERCATO_ADMIN_EMAIL", &env.required("MERCATO_ADMIN_EMAIL")?)?;
        let mut config = Self::new(admin);

        if let Some(currency) = env.optional("MERCATO_CURRENCY") {
            config.currency = currency
                .parse()
                .map_err(|e: String| invalid("MERCATO_CURRENCY", e))?;
        }

        config.modifiers = env
            .list("MERCATO_MODIFIERS")
            .into_iter()
            .map(ModifierKey::new)
            .collect();

        let methods = env.list("MERCATO_PAYMENT_METHODS");
        if !methods.is_empty() {
            let parsed = methods
                .iter()
                .map(|name| name.parse::<PaymentMethod>())
                .collect::<Result<Vec<_>, _>>()
                .map_err(|e| invalid("MERCATO_PAYMENT_METHODS", e))?;
            config.payment_methods = PaymentMethods::new(parsed);
        }

        config.cancellation = CancellationPolicy {
            before_payment: env.flag("MERCATO_CANCEL_BEFORE_PAYMENT", true)?,
            before_processing: env.flag("MERCATO_CANCEL_BEFORE_PROCESSING", false)?,
            before_sending: env.flag("MERCATO_CANCEL_BEFORE_SENDING", false)?,
            after_sending: env.flag("MERCATO_CANCEL_AFTER_SENDING", false)?,
        };

        config.email.from = env
            .optional("MERCATO_EMAIL_FROM")
            .map(|from| parse_email("MERCATO_EMAIL_FROM", &from))
            .transpose()?;
        config.email.copy_admin = env.flag("MERCATO_EMAIL_COPY_ADMIN", true)?;
        if let Some(subject) = env.optional("MERCATO_RECEIPT_SUBJECT") {
            config.email.receipt_subject = subject;
        }
        if let Some(message) = env.optional("MERCATO_PURCHASE_COMPLETE_MESSAGE") {
            config.email.purchase_complete_message = message;
        }

        if let Some(epsilon) = env.decimal("MERCATO_OUTSTANDING_EPSILON")? {
            config.outstanding_epsilon = epsilon;
        }

        let settings = &mut config.modifier_settings;
        settings.shipping_charge = env
            .decimal("MERCATO_SHIPPING_CHARGE")?
            .unwrap_or(Decimal::ZERO);
        settings.free_shipping_over = env.decimal("MERCATO_FREE_SHIPPING_OVER")?;
        settings.tax_rate = env.decimal("MERCATO_TAX_RATE")?.unwrap_or(Decimal::ZERO);
        if let Some(title) = env.optional("MERCATO_TAX_TITLE") {
            settings.tax_title = title;
        }
        settings.voucher_discount = env
            .decimal("MERCATO_VOUCHER_DISCOUNT")?
            .unwrap_or(Decimal::ZERO);
        settings.voucher_minimum = env
            .decimal("MERCATO_VOUCHER_MINIMUM")?
            .unwrap_or(Decimal::ZERO);

        config.delivery = DeliveryPolicy {
            max_attempts: env.number("MERCATO_EMAIL_ATTEMPTS", 3)?.max(1),
            initial_backoff: Duration::from_millis(env.number("MERCATO_EMAIL_BACKOFF_MS", 500)?),
        };
        config.session_idle = Duration::from_secs(env.number("MERCATO_SESSION_IDLE_SECS", 86_400)?);

        config.database_url = env.optional("DATABASE_URL").map(SecretString::from);
        config.smtp = SmtpConfig::from_env(&env)?;

        Ok(config)
    }
}

impl SmtpConfig {
    fn from_env(env: &Env<'_>) -> Result<Option<Self>, ConfigError> {
        let host = env.optional("SMTP_HOST");
        let username = env.optional("SMTP_USERNAME");
        let password = env.optional("SMTP_PASSWORD");

        match (host, username, password) {
            (Some(host), Some(username), Some(password)) => Ok(Some(Self {
                host,
                port: env.number("SMTP_PORT", 587)?,
                username,
                password: SecretString::from(password),
            })),
            (None, None, None) => Ok(None),
            _ => Err(invalid(
                "SMTP_*",
                "SMTP_HOST, SMTP_USERNAME and SMTP_PASSWORD must be set together",
            )),
        }
    }
}

struct Env<'a>(&'a dyn Fn(&str) -> Option<String>);

impl Env<'_> {
    fn optional(&self, key: &str) -> Option<String> {
        (self.0)(key)
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty())
    }

    fn required(&self, key: &str) -> Result<String, ConfigError> {
        self.optional(key)
            .ok_or_else(|| ConfigError::MissingEnvVar(key.to_string()))
    }

    fn list(&self, key: &str) -> Vec<String> {
        self.optional(key)
            .map(|value| {
                value
                    .split(',')
                    .map(str::trim)
                    .filter(|part| !part.is_empty())
                    .map(ToString::to_string)
                    .collect()
            })
            .unwrap_or_default()
    }

    fn flag(&self, key: &str, default: bool) -> Result<bool, ConfigError> {
        match self.optional(key) {
            None => Ok(default),
            Some(value) => match value.to_ascii_lowercase().as_str() {
                "1" | "true" | "yes" | "on" => Ok(true),
                "0" | "false" | "no" | "off" => Ok(false),
                other => Err(invalid(key, format!("expected a boolean, got {other}"))),
            },
        }
    }

    fn decimal(&self, key: &str) -> Result<Option<Decimal>, ConfigError> {
        self.optional(key)
            .map(|value| {
                value
                    .parse::<Decimal>()
                    .map_err(|e| invalid(key, e.to_string()))
            })
            .transpose()
    }

    fn number<T>(&self, key: &str, default: T) -> Result<T, ConfigError>
    where
        T: std::str::FromStr,
        T::Err: std::fmt::Display,
    {
        self.optional(key).map_or(Ok(default), |value| {
            value.parse::<T>().map_err(|e| invalid(key, e.to_string()))
        })
    }
}

fn invalid(key: &str, reason: impl Into<String>) -> ConfigError {
    ConfigError::InvalidEnvVar(key.to_string(), reason.into())
}

fn parse_email(key: &str, value: &str) -> Result<Email, ConfigError> {
    Email::parse(value).map_err(|e| invalid(key, e.to_string()))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::collections::HashMap;

    use secrecy::ExposeSecret;

    use super::*;

    fn load(vars: &[(&str, &str)]) -> Result<ShopConfig, ConfigError> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        ShopConfig::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn test_missing_admin_email() {
        let err = load(&[]).unwrap_err();
        assert!(matches!(err, ConfigError::MissingEnvVar(key) if key == "MERCATO_ADMIN_EMAIL"));
    }

    #[test]
    fn test_defaults() {
        let config = load(&[("MERCATO_ADMIN_EMAIL", "admin@shop.test")]).unwrap();
        assert_eq!(config.currency, CurrencyCode::USD);
        assert!(config.modifiers.is_empty());
        assert_eq!(config.payment_methods, PaymentMethods::default());
        assert_eq!(config.cancellation, CancellationPolicy::default());
        assert_eq!(config.outstanding_epsilon, Decimal::new(1, 2));
        assert_eq!(config.email.receipt_subject, DEFAULT_RECEIPT_SUBJECT);
        assert_eq!(config.email.sender().as_str(), "admin@shop.test");
        assert!(config.email.copy_admin);
        assert!(config.smtp.is_none());
    }

    #[test]
    fn test_lists_and_flags() {
        let config = load(&[
            ("MERCATO_ADMIN_EMAIL", "admin@shop.test"),
            ("MERCATO_MODIFIERS", "flat_shipping, sales_tax,"),
            ("MERCATO_PAYMENT_METHODS", "cheque,paypal"),
            ("MERCATO_CANCEL_AFTER_SENDING", "yes"),
            ("MERCATO_TAX_RATE", "0.15"),
        ])
        .unwrap();
        assert_eq!(
            config.modifiers,
            vec![ModifierKey::new("flat_shipping"), ModifierKey::new("sales_tax")]
        );
        assert_eq!(
            config.payment_methods.enabled(),
            &[PaymentMethod::Cheque, PaymentMethod::PayPal]
        );
        assert!(config.cancellation.after_sending);
        assert_eq!(config.modifier_settings.tax_rate, Decimal::new(15, 2));
    }

    #[test]
    fn test_invalid_flag() {
        let err = load(&[
            ("MERCATO_ADMIN_EMAIL", "admin@shop.test"),
            ("MERCATO_CANCEL_BEFORE_PAYMENT", "sometimes"),
        ])
        .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidEnvVar(..)));
    }

    #[test]
    fn test_partial_smtp_rejected() {
        let err = load(&[
            ("MERCATO_ADMIN_EMAIL", "admin@shop.test"),
            ("SMTP_HOST", "smtp.shop.test"),
        ])
        .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidEnvVar(key, _) if key == "SMTP_*"));
    }

    #[test]
    fn test_smtp_password_redacted() {
        let config = load(&[
            ("MERCATO_ADMIN_EMAIL", "admin@shop.test"),
            ("SMTP_HOST", "smtp.shop.test"),
            ("SMTP_USERNAME", "mailer"),
            ("SMTP_PASSWORD", "hunter2-but-longer"),
            ("DATABASE_URL", "postgres://u:p@localhost/shop"),
        ])
        .unwrap();
        let smtp = config.smtp.as_ref().unwrap();
        assert_eq!(smtp.port, 587);
        assert_eq!(smtp.password.expose_secret(), "hunter2-but-longer");
        let debug = format!("{config:?}");
        assert!(!debug.contains("hunter2"));
        assert!(!debug.contains("u:p@"));
    }

    #[test]
    fn test_cancellation_table() {
        let policy = CancellationPolicy::default();
        assert!(policy.can_cancel(OrderStatus::Unpaid));
        assert!(!policy.can_cancel(OrderStatus::Paid));
        assert!(!policy.can_cancel(OrderStatus::Sent));
        assert!(!policy.can_cancel(OrderStatus::Cart));

        let lenient = CancellationPolicy {
            after_sending: true,
            ..policy
        };
        assert!(lenient.can_cancel(OrderStatus::Sent));
        assert!(lenient.can_cancel(OrderStatus::Complete));
        assert!(!lenient.can_cancel(OrderStatus::AdminCancelled));
    }
}
