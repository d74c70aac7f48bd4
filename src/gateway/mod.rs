//! External payment gateway contract.
//!
//! Everything the gateway says is normalised here: raw status strings become
//! [`GatewayStatus`] and response envelopes become plain structs, so nothing
//! downstream matches on gateway string literals.

mod http;
mod signature;

pub use http::HttpPaymentGateway;
pub use signature::{sign_fields, WebhookPayload};

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::domain::aggregates::PaymentStatus;
use crate::domain::value_objects::GatewayOrderCode;
use crate::GatewayError;

/// Status vocabulary reported by the gateway.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum GatewayStatus {
    Paid,
    Pending,
    Processing,
    Cancelled,
    Expired,
    Failed,
    /// Anything the adapter has no mapping for, kept verbatim.
    Unknown(String),
}

impl GatewayStatus {
    pub fn parse(raw: &str) -> Self {
        match raw.trim().to_ascii_uppercase().as_str() {
            "PAID" => Self::Paid,
            "PENDING" => Self::Pending,
            "PROCESSING" => Self::Processing,
            "CANCELLED" | "CANCELED" => Self::Cancelled,
            "EXPIRED" => Self::Expired,
            "FAILED" => Self::Failed,
            _ => Self::Unknown(raw.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Self::Paid => "PAID",
            Self::Pending => "PENDING",
            Self::Processing => "PROCESSING",
            Self::Cancelled => "CANCELLED",
            Self::Expired => "EXPIRED",
            Self::Failed => "FAILED",
            Self::Unknown(raw) => raw,
        }
    }

    /// Local status for this gateway status. Unmapped statuses are treated as
    /// still in flight.
    pub fn local(&self) -> PaymentStatus {
        match self {
            Self::Paid => PaymentStatus::Completed,
            Self::Pending => PaymentStatus::Pending,
            Self::Processing | Self::Unknown(_) => PaymentStatus::Processing,
            Self::Cancelled | Self::Expired => PaymentStatus::Cancelled,
            Self::Failed => PaymentStatus::Failed,
        }
    }
}

impl Serialize for GatewayStatus {
    fn serialize<S: serde::Serializer>(&self, s: S) -> Result<S::Ok, S::Error> { s.serialize_str(self.as_str()) }
}

impl<'de> Deserialize<'de> for GatewayStatus {
    fn deserialize<D: serde::Deserializer<'de>>(d: D) -> Result<Self, D::Error> {
        String::deserialize(d).map(|raw| Self::parse(&raw))
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct PaymentLinkRequest {
    pub order_code: GatewayOrderCode,
    pub amount: Decimal,
    pub description: String,
    pub return_url: String,
    pub cancel_url: String,
}

#[derive(Clone, Debug, PartialEq)]
pub struct PaymentLink {
    pub order_code: GatewayOrderCode,
    pub checkout_url: String,
    pub status: GatewayStatus,
}

/// The gateway's view of one payment attempt.
#[derive(Clone, Debug, PartialEq)]
pub struct GatewayPayment {
    pub order_code: GatewayOrderCode,
    pub amount: Decimal,
    pub amount_paid: Decimal,
    pub status: GatewayStatus,
    pub cancellation_reason: Option<String>,
}

#[async_trait]
pub trait PaymentGateway: Send + Sync {
    async fn create_payment_link(&self, request: &PaymentLinkRequest) -> Result<PaymentLink, GatewayError>;

    /// Read-only status lookup.
    async fn payment_info(&self, order_code: GatewayOrderCode) -> Result<GatewayPayment, GatewayError>;

    async fn cancel_payment_link(&self, order_code: GatewayOrderCode, reason: &str) -> Result<GatewayPayment, GatewayError>;
}
