//! Order Aggregate
//!
//! An order is created once by checkout with its prices frozen, then only
//! moves through the lifecycle below. It is never removed; cancellation is a
//! terminal state.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;
use validator::Validate;
use crate::domain::events::{DomainEvent, OrderEvent};
use crate::domain::value_objects::{round_money, GatewayOrderCode, Quantity, VoucherCode};
use crate::StateError;

#[derive(Clone, Debug, Serialize)]
pub struct Order {
    pub(crate) id: Uuid,
    pub(crate) order_number: String,
    pub(crate) customer_id: String,
    pub(crate) email: String,
    pub(crate) status: OrderStatus,
    pub(crate) payment_method: PaymentMethod,
    pub(crate) items: Vec<LineItem>,
    pub(crate) shipping: ShippingInfo,
    pub(crate) voucher_code: Option<VoucherCode>,
    pub(crate) currency: String,
    pub(crate) subtotal: Decimal,
    pub(crate) discount: Decimal,
    pub(crate) tax: Decimal,
    pub(crate) total: Decimal,
    pub(crate) payment_ref: Option<GatewayOrderCode>,
    pub(crate) cancellation_reason: Option<String>,
    pub(crate) created_at: DateTime<Utc>,
    pub(crate) updated_at: DateTime<Utc>,
    #[serde(skip)]
    pub(crate) events: Vec<DomainEvent>,
}

/// Line with the unit price captured at checkout time.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LineItem {
    pub product_id: Uuid,
    pub sku: String,
    pub name: String,
    pub unit_price: Decimal,
    pub quantity: Quantity,
    pub total: Decimal,
}

impl LineItem {
    pub fn new(product_id: Uuid, sku: impl Into<String>, name: impl Into<String>, unit_price: Decimal, quantity: Quantity) -> Self {
        Self {
            product_id, sku: sku.into(), name: name.into(), unit_price, quantity,
            total: unit_price * Decimal::from(quantity.value()),
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize, Validate)]
pub struct ShippingInfo {
    #[validate(length(min = 1, max = 120))]
    pub recipient_name: String,
    #[validate(length(min = 6, max = 20))]
    pub phone: String,
    #[validate(length(min = 1, max = 255))]
    pub address_line: String,
    pub ward: Option<String>,
    pub district: Option<String>,
    #[validate(length(min = 1, max = 120))]
    pub city: String,
    #[validate(length(max = 500))]
    pub note: Option<String>,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderStatus {
    #[default]
    Created,
    Confirmed,
    TransferToShipping,
    Shipping,
    Delivered,
    Cancelled,
}

impl OrderStatus {
    pub fn successors(&self) -> &'static [OrderStatus] {
        use OrderStatus::*;
        match self {
            Created => &[Confirmed, Cancelled],
            Confirmed => &[TransferToShipping, Cancelled],
            TransferToShipping => &[Shipping, Cancelled],
            Shipping => &[Delivered],
            Delivered | Cancelled => &[],
        }
    }

    pub fn can_transition_to(&self, next: OrderStatus) -> bool { self.successors().contains(&next) }
    pub fn is_terminal(&self) -> bool { self.successors().is_empty() }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Created => "CREATED",
            Self::Confirmed => "CONFIRMED",
            Self::TransferToShipping => "TRANSFER_TO_SHIPPING",
            Self::Shipping => "SHIPPING",
            Self::Delivered => "DELIVERED",
            Self::Cancelled => "CANCELLED",
        }
    }

    /// Validates `self -> next` without touching any record.
    pub fn check_transition(&self, next: OrderStatus) -> Result<(), StateError> {
        if self.can_transition_to(next) {
            Ok(())
        } else {
            Err(StateError::InvalidTransition { from: self.as_str().into(), to: next.as_str().into() })
        }
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(self.as_str()) }
}

impl FromStr for OrderStatus {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        [Self::Created, Self::Confirmed, Self::TransferToShipping, Self::Shipping, Self::Delivered, Self::Cancelled]
            .into_iter()
            .find(|st| st.as_str() == s)
            .ok_or_else(|| format!("unknown order status {s}"))
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PaymentMethod {
    #[default]
    BankTransfer,
    CashOnDelivery,
}

impl PaymentMethod {
    /// Whether checkout must open a gateway transaction.
    pub fn is_online(&self) -> bool { matches!(self, Self::BankTransfer) }

    pub fn as_str(&self) -> &'static str {
        match self { Self::BankTransfer => "BANK_TRANSFER", Self::CashOnDelivery => "CASH_ON_DELIVERY" }
    }
}

impl FromStr for PaymentMethod {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "BANK_TRANSFER" => Ok(Self::BankTransfer),
            "CASH_ON_DELIVERY" => Ok(Self::CashOnDelivery),
            other => Err(format!("unknown payment method {other}")),
        }
    }
}

/// Everything checkout has resolved before the order exists.
#[derive(Clone, Debug)]
pub struct OrderDraft {
    pub customer_id: String,
    pub email: String,
    pub payment_method: PaymentMethod,
    pub items: Vec<LineItem>,
    pub shipping: ShippingInfo,
    pub voucher: Option<(VoucherCode, Decimal)>,
    pub currency: String,
    pub tax_rate: Decimal,
    pub scale: u32,
}

impl Order {
    /// Builds a new order in `CREATED`, computing
    /// `total = subtotal - discount + tax` with tax on the discounted amount.
    pub fn place(draft: OrderDraft) -> Result<Self, OrderError> {
        if draft.items.is_empty() { return Err(OrderError::NoItems); }
        if draft.tax_rate.is_sign_negative() { return Err(OrderError::NegativeTaxRate); }

        let subtotal: Decimal = draft.items.iter().map(|i| i.total).sum();
        let discount = draft.voucher.as_ref().map(|(_, d)| *d).unwrap_or(Decimal::ZERO).max(Decimal::ZERO).min(subtotal);
        let tax = round_money((subtotal - discount) * draft.tax_rate, draft.scale);
        let total = subtotal - discount + tax;

        let id = Uuid::now_v7();
        let now = Utc::now();
        let mut order = Self {
            id, order_number: Self::number_for(&id, now), customer_id: draft.customer_id, email: draft.email,
            status: OrderStatus::Created, payment_method: draft.payment_method, items: draft.items,
            shipping: draft.shipping, voucher_code: draft.voucher.map(|(code, _)| code), currency: draft.currency,
            subtotal, discount, tax, total, payment_ref: None, cancellation_reason: None,
            created_at: now, updated_at: now, events: vec![],
        };
        order.raise_event(DomainEvent::Order(OrderEvent::Created { order_id: id, customer_id: order.customer_id.clone(), total }));
        Ok(order)
    }

    /// The suffix is the random tail of the v7 id (48 bits), so numbers
    /// issued on the same day do not collide in practice.
    fn number_for(id: &Uuid, at: DateTime<Utc>) -> String {
        let simple = id.simple().to_string();
        format!("ORD-{}-{}", at.format("%Y%m%d"), simple[simple.len() - 12..].to_uppercase())
    }

    pub fn id(&self) -> Uuid { self.id }
    pub fn order_number(&self) -> &str { &self.order_number }
    pub fn customer_id(&self) -> &str { &self.customer_id }
    pub fn email(&self) -> &str { &self.email }
    pub fn status(&self) -> OrderStatus { self.status }
    pub fn payment_method(&self) -> PaymentMethod { self.payment_method }
    pub fn items(&self) -> &[LineItem] { &self.items }
    pub fn shipping(&self) -> &ShippingInfo { &self.shipping }
    pub fn voucher_code(&self) -> Option<&VoucherCode> { self.voucher_code.as_ref() }
    pub fn currency(&self) -> &str { &self.currency }
    pub fn subtotal(&self) -> Decimal { self.subtotal }
    pub fn discount(&self) -> Decimal { self.discount }
    pub fn tax(&self) -> Decimal { self.tax }
    pub fn total(&self) -> Decimal { self.total }
    pub fn payment_ref(&self) -> Option<GatewayOrderCode> { self.payment_ref }
    pub fn cancellation_reason(&self) -> Option<&str> { self.cancellation_reason.as_deref() }
    pub fn created_at(&self) -> DateTime<Utc> { self.created_at }
    pub fn updated_at(&self) -> DateTime<Utc> { self.updated_at }

    /// Applies a lifecycle transition, rejecting it without mutation if the
    /// current state does not allow it.
    pub fn transition_to(&mut self, next: OrderStatus, reason: Option<String>) -> Result<OrderEvent, StateError> {
        self.status.check_transition(next)?;
        let from = self.status;
        self.status = next;
        if next == OrderStatus::Cancelled { self.cancellation_reason = reason.clone(); }
        self.touch();
        let event = OrderEvent::StatusChanged { order_id: self.id, customer_id: self.customer_id.clone(), from, to: next, reason };
        self.raise_event(DomainEvent::Order(event.clone()));
        Ok(event)
    }

    pub fn take_events(&mut self) -> Vec<DomainEvent> { std::mem::take(&mut self.events) }
    fn raise_event(&mut self, e: DomainEvent) { self.events.push(e); }
    pub(crate) fn touch(&mut self) { self.updated_at = Utc::now(); }
}

#[derive(Debug, Clone, PartialEq, Eq)] pub enum OrderError { NoItems, NegativeTaxRate }
impl std::error::Error for OrderError {}
impl std::fmt::Display for OrderError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self { Self::NoItems => write!(f, "order has no items"), Self::NegativeTaxRate => write!(f, "tax rate is negative") }
    }
}
