//! Status enums for orders and payments.
//!
//! Order lifecycle:
//!
//! ```text
//! Cart -> Unpaid -> Paid -> Processing -> Sent -> Complete
//!            \        \          \
//!             Query    AdminCancelled / MemberCancelled
//! ```
//!
//! `Cart` is the initial state. `Complete`, `AdminCancelled` and
//! `MemberCancelled` are terminal.

use core::fmt;
use core::str::FromStr;

use serde::{Deserialize, Serialize};

/// Order lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[cfg_attr(feature = "postgres", derive(sqlx::Type))]
#[cfg_attr(
    feature = "postgres",
    sqlx(type_name = "order_status", rename_all = "snake_case")
)]
pub enum OrderStatus {
    /// Still being assembled by the shopper.
    #[default]
    Cart,
    /// Placed, no successful payment yet.
    Unpaid,
    /// Not being processed: the customer has a query or stock is short.
    Query,
    /// Paid in full.
    Paid,
    /// Paid and being prepared for shipping.
    Processing,
    /// Dispatched to the customer.
    Sent,
    /// Paid, shipped and assumed received.
    Complete,
    /// Cancelled by a shop administrator.
    AdminCancelled,
    /// Cancelled by the customer.
    MemberCancelled,
}

impl OrderStatus {
    /// Every status, in lifecycle order.
    pub const ALL: [Self; 9] = [
        Self::Cart,
        Self::Unpaid,
        Self::Query,
        Self::Paid,
        Self::Processing,
        Self::Sent,
        Self::Complete,
        Self::AdminCancelled,
        Self::MemberCancelled,
    ];

    /// Statuses of orders that have been placed and not abandoned.
    pub const PLACED: [Self; 5] = [
        Self::Paid,
        Self::Unpaid,
        Self::Processing,
        Self::Sent,
        Self::Complete,
    ];

    /// Statuses that are not listed in a customer's order history.
    pub const HIDDEN: [Self; 4] = [
        Self::Cart,
        Self::AdminCancelled,
        Self::MemberCancelled,
        Self::Query,
    ];

    #[must_use]
    pub const fn is_cart(self) -> bool {
        matches!(self, Self::Cart)
    }

    #[must_use]
    pub const fn is_sent(self) -> bool {
        matches!(self, Self::Sent)
    }

    /// Sent or currently being processed.
    #[must_use]
    pub const fn is_processing(self) -> bool {
        matches!(self, Self::Sent | Self::Processing)
    }

    /// Paid for, including orders already being processed or sent.
    #[must_use]
    pub const fn is_paid(self) -> bool {
        matches!(self, Self::Paid | Self::Processing | Self::Sent)
    }

    #[must_use]
    pub const fn is_placed(self) -> bool {
        matches!(
            self,
            Self::Paid | Self::Unpaid | Self::Processing | Self::Sent | Self::Complete
        )
    }

    #[must_use]
    pub const fn is_hidden(self) -> bool {
        matches!(
            self,
            Self::Cart | Self::AdminCancelled | Self::MemberCancelled | Self::Query
        )
    }

    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(
            self,
            Self::Complete | Self::AdminCancelled | Self::MemberCancelled
        )
    }

    /// Whether an order may move from `self` to `next`.
    ///
    /// `Cart -> Unpaid` is listed here but only placement performs it.
    /// Cancellations are further restricted by the shop's cancellation
    /// policy.
    #[must_use]
    pub const fn can_transition_to(self, next: Self) -> bool {
        use OrderStatus::{
            AdminCancelled, Cart, Complete, MemberCancelled, Paid, Processing, Query, Sent,
            Unpaid,
        };
        matches!(
            (self, next),
            (Cart, Unpaid)
                | (Unpaid, Paid | Query | AdminCancelled | MemberCancelled)
                | (Query, Unpaid | Paid | Processing | AdminCancelled | MemberCancelled)
                | (Paid, Processing | Query | AdminCancelled | MemberCancelled)
                | (Processing, Sent | Query | AdminCancelled | MemberCancelled)
                | (Sent, Complete | AdminCancelled | MemberCancelled)
        )
    }

    /// Name as stored and shown, e.g. `AdminCancelled`.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Cart => "Cart",
            Self::Unpaid => "Unpaid",
            Self::Query => "Query",
            Self::Paid => "Paid",
            Self::Processing => "Processing",
            Self::Sent => "Sent",
            Self::Complete => "Complete",
            Self::AdminCancelled => "AdminCancelled",
            Self::MemberCancelled => "MemberCancelled",
        }
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OrderStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().replace('_', "");
        Self::ALL
            .into_iter()
            .find(|status| status.as_str().eq_ignore_ascii_case(&wanted))
            .ok_or_else(|| format!("invalid order status: {s}"))
    }
}

/// Payment status as reported by the gateway.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[cfg_attr(feature = "postgres", derive(sqlx::Type))]
#[cfg_attr(
    feature = "postgres",
    sqlx(type_name = "payment_status", rename_all = "snake_case")
)]
pub enum PaymentStatus {
    /// Created, not yet submitted to the gateway.
    #[default]
    Incomplete,
    /// Submitted, awaiting the gateway's answer.
    Pending,
    /// Funds captured.
    Success,
    /// Declined or errored.
    Failure,
}

impl PaymentStatus {
    #[must_use]
    pub const fn is_success(self) -> bool {
        matches!(self, Self::Success)
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Incomplete => "Incomplete",
            Self::Pending => "Pending",
            Self::Success => "Success",
            Self::Failure => "Failure",
        }
    }
}

impl fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PaymentStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "incomplete" => Ok(Self::Incomplete),
            "pending" => Ok(Self::Pending),
            "success" => Ok(Self::Success),
            "failure" => Ok(Self::Failure),
            _ => Err(format!("invalid payment status: {s}")),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_cart() {
        assert_eq!(OrderStatus::default(), OrderStatus::Cart);
    }

    #[test]
    fn test_placed_and_hidden_sets_are_disjoint() {
        for status in OrderStatus::PLACED {
            assert!(status.is_placed());
            assert!(!status.is_hidden());
        }
        for status in OrderStatus::HIDDEN {
            assert!(status.is_hidden());
        }
    }

    #[test]
    fn test_paid_includes_processing_and_sent() {
        assert!(OrderStatus::Paid.is_paid());
        assert!(OrderStatus::Processing.is_paid());
        assert!(OrderStatus::Sent.is_paid());
        assert!(!OrderStatus::Complete.is_paid());
        assert!(!OrderStatus::Unpaid.is_paid());
    }

    #[test]
    fn test_terminal_states_have_no_exits() {
        for from in OrderStatus::ALL.into_iter().filter(|s| s.is_terminal()) {
            for to in OrderStatus::ALL {
                assert!(!from.can_transition_to(to), "{from} -> {to}");
            }
        }
    }

    #[test]
    fn test_only_cart_reaches_unpaid_from_start() {
        assert!(OrderStatus::Cart.can_transition_to(OrderStatus::Unpaid));
        assert!(!OrderStatus::Cart.can_transition_to(OrderStatus::Paid));
        assert!(!OrderStatus::Unpaid.can_transition_to(OrderStatus::Cart));
    }

    #[test]
    fn test_order_status_parse() {
        assert_eq!(
            "admin_cancelled".parse::<OrderStatus>().unwrap(),
            OrderStatus::AdminCancelled
        );
        assert_eq!("Sent".parse::<OrderStatus>().unwrap(), OrderStatus::Sent);
        assert!("shipped".parse::<OrderStatus>().is_err());
    }

    #[test]
    fn test_order_status_serde_uses_variant_names() {
        let json = serde_json::to_string(&OrderStatus::MemberCancelled).unwrap();
        assert_eq!(json, "\"MemberCancelled\"");
    }

    #[test]
    fn test_payment_status_parse() {
        assert_eq!(
            "SUCCESS".parse::<PaymentStatus>().unwrap(),
            PaymentStatus::Success
        );
        assert!(PaymentStatus::Success.is_success());
        assert!(!PaymentStatus::Pending.is_success());
    }
}
