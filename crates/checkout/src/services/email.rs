//! Transactional email: receipts and order status updates.
//!
//! Messages are described by [`OutgoingEmail`] and rendered into plain text
//! and HTML with Askama templates. [`SmtpMailer`] delivers them through
//! lettre, [`MemoryMailer`] records them for tests, and [`RetryingMailer`]
//! wraps either with bounded retries for transient failures.

use std::sync::{Arc, Mutex, PoisonError};

use askama::Template;
use async_trait::async_trait;
use lettre::{
    AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor,
    message::{Mailbox, MultiPart, SinglePart, header::ContentType},
    transport::smtp::{Error as SmtpError, authentication::Credentials},
};
use secrecy::ExposeSecret;
use thiserror::Error;

use mercato_core::{Email, Money, OrderId};

use crate::config::{DeliveryPolicy, SmtpConfig};
use crate::models::Order;

// =============================================================================
// Templates
// =============================================================================

#[derive(Template)]
#[template(path = "email/receipt.html")]
struct ReceiptHtml<'a> {
    data: &'a ReceiptData,
}

#[derive(Template)]
#[template(path = "email/receipt.txt")]
struct ReceiptText<'a> {
    data: &'a ReceiptData,
}

#[derive(Template)]
#[template(path = "email/status_change.html")]
struct StatusChangeHtml<'a> {
    data: &'a StatusChangeData,
}

#[derive(Template)]
#[template(path = "email/status_change.txt")]
struct StatusChangeText<'a> {
    data: &'a StatusChangeData,
}

// =============================================================================
// Messages
// =============================================================================

/// Errors that can occur when sending email.
#[derive(Debug, Error)]
pub enum MailError {
    /// SMTP transport error.
    #[error("SMTP error: {0}")]
    Smtp(#[from] SmtpError),

    /// Failed to build email message.
    #[error("Failed to build message: {0}")]
    MessageBuild(#[from] lettre::error::Error),

    /// Invalid email address.
    #[error("Invalid email address: {0}")]
    InvalidAddress(String),

    /// Template rendering error.
    #[error("Template error: {0}")]
    Template(#[from] askama::Error),

    /// The mail service could not be reached.
    #[error("Mail service unavailable: {0}")]
    Unavailable(String),
}

impl MailError {
    /// Whether a later attempt may succeed.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Smtp(e) => !e.is_permanent(),
            Self::Unavailable(_) => true,
            Self::MessageBuild(_) | Self::InvalidAddress(_) | Self::Template(_) => false,
        }
    }
}

/// One line of a receipt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReceiptLine {
    pub title: String,
    pub quantity: Option<u32>,
    /// Formatted amount, e.g. `$19.99`.
    pub amount: String,
}

/// Everything a receipt shows.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReceiptData {
    pub order_id: OrderId,
    pub customer_name: String,
    pub items: Vec<ReceiptLine>,
    pub modifiers: Vec<ReceiptLine>,
    pub subtotal: String,
    pub total: String,
    pub billing_address: String,
    pub shipping_address: String,
    /// Shop-configured closing message.
    pub message: String,
}

impl ReceiptData {
    #[must_use]
    pub fn for_order(order: &Order, message: &str) -> Self {
        let money = |amount| Money::new(amount, order.currency()).display();
        Self {
            order_id: order.id(),
            customer_name: order.name(),
            items: order
                .items()
                .iter()
                .map(|item| ReceiptLine {
                    title: item.title.clone(),
                    quantity: Some(item.quantity),
                    amount: money(item.line_total()),
                })
                .collect(),
            modifiers: order
                .modifiers()
                .iter()
                .map(|modifier| ReceiptLine {
                    title: modifier.title.clone(),
                    quantity: None,
                    amount: money(modifier.amount),
                })
                .collect(),
            subtotal: money(order.subtotal()),
            total: order.total_money().display(),
            billing_address: order.full_billing_address(),
            shipping_address: order.full_shipping_address(),
            message: message.to_string(),
        }
    }
}

/// A status update for the customer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusChangeData {
    pub order_id: OrderId,
    pub customer_name: String,
    pub title: String,
    pub note: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EmailTemplate {
    Receipt(ReceiptData),
    StatusChange(StatusChangeData),
}

/// A message ready to be rendered and delivered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutgoingEmail {
    pub from: Email,
    pub to: Email,
    pub bcc: Option<Email>,
    pub subject: String,
    pub template: EmailTemplate,
}

/// Text and HTML bodies of a message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedEmail {
    pub text: String,
    pub html: String,
}

impl OutgoingEmail {
    /// Render both bodies.
    ///
    /// # Errors
    ///
    /// Returns [`MailError::Template`] if a template fails to render.
    pub fn render(&self) -> Result<RenderedEmail, MailError> {
        let (text, html) = match &self.template {
            EmailTemplate::Receipt(data) => (
                ReceiptText { data }.render()?,
                ReceiptHtml { data }.render()?,
            ),
            EmailTemplate::StatusChange(data) => (
                StatusChangeText { data }.render()?,
                StatusChangeHtml { data }.render()?,
            ),
        };
        Ok(RenderedEmail { text, html })
    }
}

// =============================================================================
// Mailers
// =============================================================================

/// Delivers rendered email.
#[async_trait]
pub trait Mailer: Send + Sync {
    async fn send(&self, email: &OutgoingEmail) -> Result<(), MailError>;
}

/// SMTP delivery through lettre.
#[derive(Clone)]
pub struct SmtpMailer {
    transport: AsyncSmtpTransport<Tokio1Executor>,
}

impl SmtpMailer {
    /// Create a mailer from SMTP settings.
    ///
    /// # Errors
    ///
    /// Returns error if the relay address is invalid.
    pub fn new(config: &SmtpConfig) -> Result<Self, SmtpError> {
        let credentials = Credentials::new(
            config.username.clone(),
            config.password.expose_secret().to_string(),
        );

        let transport = AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&config.host)?
            .port(config.port)
            .credentials(credentials)
            .build();

        Ok(Self { transport })
    }
}

impl std::fmt::Debug for SmtpMailer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SmtpMailer").finish_non_exhaustive()
    }
}

fn mailbox(email: &Email) -> Result<Mailbox, MailError> {
    email
        .as_str()
        .parse()
        .map_err(|_| MailError::InvalidAddress(email.to_string()))
}

#[async_trait]
impl Mailer for SmtpMailer {
    async fn send(&self, email: &OutgoingEmail) -> Result<(), MailError> {
        let rendered = email.render()?;

        let mut builder = Message::builder()
            .from(mailbox(&email.from)?)
            .to(mailbox(&email.to)?)
            .subject(&email.subject);
        if let Some(bcc) = &email.bcc {
            builder = builder.bcc(mailbox(bcc)?);
        }

        let message = builder.multipart(
            MultiPart::alternative()
                .singlepart(
                    SinglePart::builder()
                        .header(ContentType::TEXT_PLAIN)
                        .body(rendered.text),
                )
                .singlepart(
                    SinglePart::builder()
                        .header(ContentType::TEXT_HTML)
                        .body(rendered.html),
                ),
        )?;

        self.transport.send(message).await?;

        tracing::info!(to = %email.to, subject = %email.subject, "Email sent successfully");

        Ok(())
    }
}

/// A message captured by [`MemoryMailer`].
#[derive(Debug, Clone)]
pub struct SentEmail {
    pub email: OutgoingEmail,
    pub rendered: RenderedEmail,
}

#[derive(Debug, Default)]
struct MemoryOutbox {
    sent: Vec<SentEmail>,
    failures: u32,
    attempts: u32,
}

/// Mailer that keeps messages in memory.
#[derive(Debug, Clone, Default)]
pub struct MemoryMailer {
    outbox: Arc<Mutex<MemoryOutbox>>,
}

impl MemoryMailer {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail the next `count` sends with a transient error.
    pub fn fail_next(&self, count: u32) {
        self.outbox().failures = count;
    }

    /// Messages delivered so far.
    #[must_use]
    pub fn sent(&self) -> Vec<SentEmail> {
        self.outbox().sent.clone()
    }

    /// Number of send calls, failed ones included.
    #[must_use]
    pub fn attempts(&self) -> u32 {
        self.outbox().attempts
    }

    fn outbox(&self) -> std::sync::MutexGuard<'_, MemoryOutbox> {
        self.outbox.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl Mailer for MemoryMailer {
    async fn send(&self, email: &OutgoingEmail) -> Result<(), MailError> {
        let rendered = email.render()?;
        let mut outbox = self.outbox();
        outbox.attempts += 1;
        if outbox.failures > 0 {
            outbox.failures -= 1;
            return Err(MailError::Unavailable("simulated outage".to_string()));
        }
        outbox.sent.push(SentEmail {
            email: email.clone(),
            rendered,
        });
        Ok(())
    }
}

/// Retries transient failures with exponential backoff.
pub struct RetryingMailer {
    inner: Arc<dyn Mailer>,
    policy: DeliveryPolicy,
}

impl RetryingMailer {
    #[must_use]
    pub fn new(inner: Arc<dyn Mailer>, policy: DeliveryPolicy) -> Self {
        Self { inner, policy }
    }
}

impl std::fmt::Debug for RetryingMailer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RetryingMailer")
            .field("policy", &self.policy)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl Mailer for RetryingMailer {
    async fn send(&self, email: &OutgoingEmail) -> Result<(), MailError> {
        let max_attempts = self.policy.max_attempts.max(1);
        let mut backoff = self.policy.initial_backoff;
        let mut attempt = 1;
        loop {
            match self.inner.send(email).await {
                Ok(()) => {
                    tracing::info!(to = %email.to, subject = %email.subject, attempt, "Email delivered");
                    return Ok(());
                }
                Err(e) if e.is_transient() && attempt < max_attempts => {
                    tracing::warn!(
                        to = %email.to,
                        attempt,
                        retry_in_ms = u64::try_from(backoff.as_millis()).unwrap_or(u64::MAX),
                        error = %e,
                        "Email delivery failed, retrying"
                    );
                    tokio::time::sleep(backoff).await;
                    backoff = backoff.saturating_mul(2);
                    attempt += 1;
                }
                Err(e) => {
                    tracing::error!(to = %email.to, attempt, error = %e, "Email delivery failed");
                    return Err(e);
                }
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::time::Duration;

    use super::*;

    fn status_email() -> OutgoingEmail {
        OutgoingEmail {
            from: Email::parse("shop@example.com").unwrap(),
            to: Email::parse("jane@example.com").unwrap(),
            bcc: None,
            subject: "Your order".to_string(),
            template: EmailTemplate::StatusChange(StatusChangeData {
                order_id: OrderId::new(12),
                customer_name: "Jane Doe".to_string(),
                title: "Sent".to_string(),
                note: Some("Tracking <ABC123>".to_string()),
            }),
        }
    }

    fn fast_policy(max_attempts: u32) -> DeliveryPolicy {
        DeliveryPolicy {
            max_attempts,
            initial_backoff: Duration::from_millis(1),
        }
    }

    #[test]
    fn test_status_change_renders_both_bodies() {
        let rendered = status_email().render().unwrap();
        assert!(rendered.text.contains("Jane Doe"));
        assert!(rendered.text.contains("Tracking <ABC123>"));
        assert!(rendered.html.contains("Tracking &lt;ABC123&gt;"));
        assert!(rendered.html.contains("#12"));
    }

    #[test]
    fn test_transient_classification() {
        assert!(MailError::Unavailable("down".to_string()).is_transient());
        assert!(!MailError::InvalidAddress("x".to_string()).is_transient());
    }

    #[tokio::test]
    async fn test_retry_recovers_from_transient_failures() {
        let memory = MemoryMailer::new();
        memory.fail_next(2);
        let mailer = RetryingMailer::new(Arc::new(memory.clone()), fast_policy(3));

        mailer.send(&status_email()).await.unwrap();

        assert_eq!(memory.attempts(), 3);
        assert_eq!(memory.sent().len(), 1);
    }

    #[tokio::test]
    async fn test_retry_gives_up_after_max_attempts() {
        let memory = MemoryMailer::new();
        memory.fail_next(5);
        let mailer = RetryingMailer::new(Arc::new(memory.clone()), fast_policy(2));

        let err = mailer.send(&status_email()).await.unwrap_err();

        assert!(matches!(err, MailError::Unavailable(_)));
        assert_eq!(memory.attempts(), 2);
        assert!(memory.sent().is_empty());
    }
}
