//! Storefront Checkout
//!
//! Turns a cart into an order, applies vouchers, opens a transaction at the
//! external payment gateway and keeps order/payment state consistent with what
//! the gateway eventually reports.
//!
//! ## Components
//! - Voucher validation (`services::voucher`)
//! - Order lifecycle (`domain::aggregates::order`, `services::orders`)
//! - Payment gateway adapter (`gateway`, `services::payments`)
//! - Reconciliation poller (`services::reconciliation`)
//! - Checkout orchestration (`services::checkout`)

pub mod api;
pub mod config;
pub mod domain;
pub mod gateway;
pub mod services;
pub mod store;

use rust_decimal::Decimal;
use thiserror::Error;
use uuid::Uuid;

pub use domain::aggregates::{
    Cart, CartItem, CustomerRanking, DiscountKind, LineItem, Order, OrderStatus, PaymentMethod,
    PaymentStatus, PaymentTransaction, Product, ShippingInfo, Voucher,
};
pub use domain::events::{DomainEvent, OrderEvent, PaymentEvent};
pub use domain::value_objects::{GatewayOrderCode, Quantity, VoucherCode};

// =============================================================================
// Error Types
// =============================================================================

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum VoucherError {
    #[error("voucher not found")]
    NotFound,

    #[error("voucher is not valid at this time")]
    Expired,

    #[error("order subtotal is below the voucher minimum of {minimum}")]
    BelowMinimum { minimum: Decimal },

    #[error("voucher has no remaining uses")]
    UsageExhausted,

    #[error("voucher requires customer ranking {required}")]
    RankingNotEligible { required: CustomerRanking },
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum InventoryError {
    #[error("product {product_id} is out of stock (requested {requested}, available {available})")]
    OutOfStock { product_id: Uuid, requested: u32, available: u32 },
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GatewayError {
    #[error("payment gateway unreachable: {0}")]
    Unreachable(String),

    #[error("payment gateway timed out")]
    Timeout,

    #[error("payment gateway rejected the request ({code}): {message}")]
    Rejected { code: String, message: String },
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StateError {
    #[error("cannot move from {from} to {to}")]
    InvalidTransition { from: String, to: String },

    #[error("payment has already been settled")]
    AlreadySettled,

    #[error("order {order_number} has no settled payment")]
    PaymentNotSettled { order_number: String },
}

#[derive(Error, Debug)]
pub enum Error {
    #[error("validation failed: {0}")]
    Validation(String),

    #[error(transparent)]
    Voucher(#[from] VoucherError),

    #[error(transparent)]
    Inventory(#[from] InventoryError),

    #[error(transparent)]
    Gateway(#[from] GatewayError),

    #[error(transparent)]
    State(#[from] StateError),

    #[error("{0} not found")]
    NotFound(String),

    #[error("storage error: {0}")]
    Storage(String),
}

impl Error {
    /// Stable machine-readable code surfaced to API clients.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Validation(_) => "VALIDATION_ERROR",
            Self::Voucher(VoucherError::NotFound) => "VOUCHER_NOT_FOUND",
            Self::Voucher(VoucherError::Expired) => "VOUCHER_EXPIRED",
            Self::Voucher(VoucherError::BelowMinimum { .. }) => "VOUCHER_BELOW_MINIMUM",
            Self::Voucher(VoucherError::UsageExhausted) => "VOUCHER_USAGE_EXHAUSTED",
            Self::Voucher(VoucherError::RankingNotEligible { .. }) => "VOUCHER_RANKING_NOT_ELIGIBLE",
            Self::Inventory(InventoryError::OutOfStock { .. }) => "OUT_OF_STOCK",
            Self::Gateway(GatewayError::Unreachable(_)) => "GATEWAY_UNREACHABLE",
            Self::Gateway(GatewayError::Timeout) => "GATEWAY_TIMEOUT",
            Self::Gateway(GatewayError::Rejected { .. }) => "GATEWAY_REJECTED",
            Self::State(StateError::InvalidTransition { .. }) => "INVALID_TRANSITION",
            Self::State(StateError::AlreadySettled) => "ALREADY_SETTLED",
            Self::State(StateError::PaymentNotSettled { .. }) => "PAYMENT_NOT_SETTLED",
            Self::NotFound(_) => "NOT_FOUND",
            Self::Storage(_) => "STORAGE_ERROR",
        }
    }
}

impl From<store::StoreError> for Error {
    fn from(e: store::StoreError) -> Self {
        match e {
            store::StoreError::OutOfStock { product_id, requested, available } => {
                InventoryError::OutOfStock { product_id, requested, available }.into()
            }
            store::StoreError::VoucherExhausted(_) => VoucherError::UsageExhausted.into(),
            store::StoreError::NotFound(what) => Self::NotFound(what),
            other => Self::Storage(other.to_string()),
        }
    }
}

impl From<domain::aggregates::CartError> for Error {
    fn from(e: domain::aggregates::CartError) -> Self {
        use domain::aggregates::CartError;
        match e {
            CartError::OutOfStock { product_id, requested, available } => {
                InventoryError::OutOfStock { product_id, requested, available }.into()
            }
            other => Self::Validation(other.to_string()),
        }
    }
}

impl From<validator::ValidationErrors> for Error {
    fn from(e: validator::ValidationErrors) -> Self { Self::Validation(e.to_string()) }
}

pub type Result<T> = std::result::Result<T, Error>;
