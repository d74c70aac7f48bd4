//! Payment Transaction Aggregate

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;
use crate::domain::value_objects::GatewayOrderCode;

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PaymentTransaction {
    pub(crate) id: Uuid,
    pub(crate) order_id: Uuid,
    pub(crate) gateway_order_code: GatewayOrderCode,
    pub(crate) amount: Decimal,
    pub(crate) status: PaymentStatus,
    pub(crate) gateway_status: Option<String>,
    pub(crate) checkout_url: String,
    pub(crate) cancellation_reason: Option<String>,
    pub(crate) created_at: DateTime<Utc>,
    pub(crate) updated_at: DateTime<Utc>,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PaymentStatus {
    #[default]
    Pending,
    Processing,
    Completed,
    Cancelled,
    Failed,
}

impl PaymentStatus {
    pub fn is_terminal(&self) -> bool { matches!(self, Self::Completed | Self::Cancelled | Self::Failed) }

    /// Statuses only move forward: `PENDING -> PROCESSING -> terminal`, or
    /// straight from `PENDING` to a terminal status.
    pub fn can_advance_to(&self, next: PaymentStatus) -> bool {
        match self {
            Self::Pending => next != Self::Pending,
            Self::Processing => next.is_terminal(),
            Self::Completed | Self::Cancelled | Self::Failed => false,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Processing => "PROCESSING",
            Self::Completed => "COMPLETED",
            Self::Cancelled => "CANCELLED",
            Self::Failed => "FAILED",
        }
    }
}

impl fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(self.as_str()) }
}

impl FromStr for PaymentStatus {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        [Self::Pending, Self::Processing, Self::Completed, Self::Cancelled, Self::Failed]
            .into_iter()
            .find(|st| st.as_str() == s)
            .ok_or_else(|| format!("unknown payment status {s}"))
    }
}

impl PaymentTransaction {
    pub fn open(order_id: Uuid, gateway_order_code: GatewayOrderCode, amount: Decimal, checkout_url: impl Into<String>, gateway_status: Option<String>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::now_v7(), order_id, gateway_order_code, amount, status: PaymentStatus::Pending,
            gateway_status, checkout_url: checkout_url.into(), cancellation_reason: None,
            created_at: now, updated_at: now,
        }
    }

    pub fn id(&self) -> Uuid { self.id }
    pub fn order_id(&self) -> Uuid { self.order_id }
    pub fn gateway_order_code(&self) -> GatewayOrderCode { self.gateway_order_code }
    pub fn amount(&self) -> Decimal { self.amount }
    pub fn status(&self) -> PaymentStatus { self.status }
    pub fn gateway_status(&self) -> Option<&str> { self.gateway_status.as_deref() }
    pub fn checkout_url(&self) -> &str { &self.checkout_url }
    pub fn cancellation_reason(&self) -> Option<&str> { self.cancellation_reason.as_deref() }
    pub fn created_at(&self) -> DateTime<Utc> { self.created_at }
    pub fn updated_at(&self) -> DateTime<Utc> { self.updated_at }
    pub fn is_open(&self) -> bool { !self.status.is_terminal() }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_moves_forward_only() {
        use PaymentStatus::*;
        assert!(Pending.can_advance_to(Processing));
        assert!(Pending.can_advance_to(Completed));
        assert!(Processing.can_advance_to(Failed));
        assert!(!Processing.can_advance_to(Pending));
        assert!(!Completed.can_advance_to(Cancelled));
        assert!(!Cancelled.can_advance_to(Cancelled));
    }

    #[test]
    fn test_new_transaction_is_pending() {
        let txn = PaymentTransaction::open(Uuid::new_v4(), GatewayOrderCode::new(42), Decimal::ONE, "https://pay.example/42", None);
        assert_eq!(txn.status(), PaymentStatus::Pending);
        assert!(txn.is_open());
    }
}
