//! Customer email for placed orders.

use tracing::instrument;

use crate::error::{CheckoutError, Result};
use crate::models::{Member, Order};
use crate::services::email::{EmailTemplate, OutgoingEmail, ReceiptData, StatusChangeData};
use crate::state::ShopState;

/// Builds and sends receipt and status-change email.
#[derive(Debug, Clone, Copy)]
pub struct Notifier<'a> {
    state: &'a ShopState,
}

impl<'a> Notifier<'a> {
    #[must_use]
    pub const fn new(state: &'a ShopState) -> Self {
        Self { state }
    }

    async fn member(&self, order: &Order) -> Result<Option<Member>> {
        match order.member_id {
            Some(id) => Ok(self.state.members().get(id).await?),
            None => Ok(None),
        }
    }

    /// Build the receipt for `order` without sending it.
    ///
    /// # Errors
    ///
    /// Returns a validation error when neither the order nor its member has
    /// an email address.
    pub async fn receipt(&self, order: &Order) -> Result<OutgoingEmail> {
        let settings = &self.state.config().email;
        let member = self.member(order).await?;
        let to = order
            .latest_email(member.as_ref())
            .cloned()
            .ok_or_else(|| CheckoutError::Validation("Order has no email address".to_string()))?;

        Ok(OutgoingEmail {
            from: settings.sender().clone(),
            to,
            bcc: settings.copy_admin.then(|| settings.admin.clone()),
            subject: settings
                .receipt_subject
                .replace("{order_id}", &order.id().to_string()),
            template: EmailTemplate::Receipt(ReceiptData::for_order(
                order,
                &settings.purchase_complete_message,
            )),
        })
    }

    /// Email the receipt. Does not touch `receipt_sent`.
    ///
    /// # Errors
    ///
    /// Returns an error if the receipt cannot be built or delivered.
    #[instrument(skip(self, order), fields(order_id = %order.id()))]
    pub async fn send_receipt(&self, order: &Order) -> Result<()> {
        let email = self.receipt(order).await?;
        self.state.mailer().send(&email).await?;
        tracing::info!(to = %email.to, "Receipt sent");
        Ok(())
    }

    /// Tell the order's member about a status change.
    ///
    /// Without a note, the title and note of the most recent
    /// customer-visible status log are used.
    ///
    /// # Errors
    ///
    /// Returns [`CheckoutError::NotFound`] when the order has no member.
    #[instrument(skip(self, order, title, note), fields(order_id = %order.id()))]
    pub async fn send_status_change(
        &self,
        order: &Order,
        title: Option<String>,
        note: Option<String>,
    ) -> Result<()> {
        let member = self
            .member(order)
            .await?
            .ok_or_else(|| CheckoutError::NotFound("member".to_string()))?;

        let (title, note) = if note.is_some() {
            (title, note)
        } else {
            match self.state.orders().latest_customer_log(order.id()).await? {
                Some(log) => (Some(log.title), log.note),
                None => (title, None),
            }
        };
        let title = title.unwrap_or_else(|| order.status().as_str().to_string());

        let email = OutgoingEmail {
            from: self.state.config().email.sender().clone(),
            to: member.email.clone(),
            bcc: None,
            subject: title.clone(),
            template: EmailTemplate::StatusChange(StatusChangeData {
                order_id: order.id(),
                customer_name: member.name(),
                title,
                note,
            }),
        };
        self.state.mailer().send(&email).await?;
        tracing::info!(to = %email.to, status = %order.status(), "Status change sent");
        Ok(())
    }
}
