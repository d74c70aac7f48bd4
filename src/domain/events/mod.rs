//! Domain events
use crate::domain::aggregates::{OrderStatus, PaymentStatus};
use crate::domain::value_objects::GatewayOrderCode;
use rust_decimal::Decimal;
use serde::Serialize;
use uuid::Uuid;

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DomainEvent {
    Order(OrderEvent),
    Payment(PaymentEvent),
}

/// Emitted once per successful order transition, plus once at creation.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum OrderEvent {
    Created { order_id: Uuid, customer_id: String, total: Decimal },
    StatusChanged { order_id: Uuid, customer_id: String, from: OrderStatus, to: OrderStatus, reason: Option<String> },
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum PaymentEvent {
    StatusChanged { transaction_id: Uuid, order_id: Uuid, gateway_order_code: GatewayOrderCode, from: PaymentStatus, to: PaymentStatus },
}

impl OrderEvent {
    pub fn order_id(&self) -> Uuid {
        match self {
            Self::Created { order_id, .. } | Self::StatusChanged { order_id, .. } => *order_id,
        }
    }
}

impl DomainEvent {
    /// Subject suffix used when the event leaves the process.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Order(OrderEvent::Created { .. }) => "order.created",
            Self::Order(OrderEvent::StatusChanged { to, .. }) => match to {
                OrderStatus::Created => "order.created",
                OrderStatus::Confirmed => "order.confirmed",
                OrderStatus::TransferToShipping => "order.transfer_to_shipping",
                OrderStatus::Shipping => "order.shipping",
                OrderStatus::Delivered => "order.delivered",
                OrderStatus::Cancelled => "order.cancelled",
            },
            Self::Payment(PaymentEvent::StatusChanged { .. }) => "payment.status_changed",
        }
    }
}
