//! Persistence for orders, vouchers and payment transactions.
//!
//! Every mutation that can race is expressed as a conditional update so that
//! concurrent checkouts and concurrent reconciliations stay correct without
//! read-modify-write cycles in the services.

mod memory;
mod postgres;

pub use memory::MemoryStore;
pub use postgres::PgStore;

use async_trait::async_trait;
use thiserror::Error;
use uuid::Uuid;

use crate::domain::aggregates::{CustomerRanking, Order, OrderStatus, PaymentStatus, PaymentTransaction, Product, Voucher};
use crate::domain::value_objects::{GatewayOrderCode, VoucherCode};

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("product {product_id} has {available} units, {requested} requested")]
    OutOfStock { product_id: Uuid, requested: u32, available: u32 },

    #[error("voucher {0} has no remaining uses")]
    VoucherExhausted(String),

    #[error("order {0} already has an open payment transaction")]
    OpenTransactionExists(Uuid),

    #[error("{0} not found")]
    NotFound(String),

    #[error("corrupt record: {0}")]
    Corrupt(String),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Outcome of a status compare-and-swap.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Swap {
    Applied,
    /// The record was not in the expected status; nothing was written.
    Stale,
}

/// One page of the transaction history.
#[derive(Debug, Clone)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub total: u64,
}

#[async_trait]
pub trait Store: Send + Sync {
    /// Products by id; unknown ids are simply absent from the result.
    async fn products(&self, ids: &[Uuid]) -> StoreResult<Vec<Product>>;

    async fn voucher(&self, code: &VoucherCode) -> StoreResult<Option<Voucher>>;

    async fn customer_ranking(&self, customer_id: &str) -> StoreResult<Option<CustomerRanking>>;

    /// Persists the order and its lines, decrements stock for every line and
    /// claims one use of the order's voucher, all or nothing.
    async fn insert_order(&self, order: &Order) -> StoreResult<()>;

    async fn order(&self, id: Uuid) -> StoreResult<Option<Order>>;

    /// Moves `id` from `from` to `to` if it is still in `from`.
    async fn swap_order_status(&self, id: Uuid, from: OrderStatus, to: OrderStatus) -> StoreResult<Swap>;

    /// Cancels `id` if it is still in `from`, returning its stock and voucher
    /// use in the same write.
    async fn cancel_order(&self, id: Uuid, from: OrderStatus, reason: &str) -> StoreResult<Swap>;

    /// Stores a new transaction and links it to its order. Fails with
    /// [`StoreError::OpenTransactionExists`] if the order already has one.
    async fn insert_transaction(&self, txn: &PaymentTransaction) -> StoreResult<()>;

    async fn transaction_by_code(&self, code: GatewayOrderCode) -> StoreResult<Option<PaymentTransaction>>;

    async fn open_transaction_for_order(&self, order_id: Uuid) -> StoreResult<Option<PaymentTransaction>>;

    /// Moves a transaction from `from` to `to`, recording the raw gateway
    /// status alongside.
    async fn swap_transaction_status(
        &self,
        id: Uuid,
        from: PaymentStatus,
        to: PaymentStatus,
        gateway_status: &str,
        reason: Option<&str>,
    ) -> StoreResult<Swap>;

    /// Refreshes the raw gateway status without changing the local one.
    async fn record_gateway_status(&self, id: Uuid, gateway_status: &str) -> StoreResult<()>;

    async fn open_transactions(&self) -> StoreResult<Vec<PaymentTransaction>>;

    /// Newest first. `page` starts at 1.
    async fn transactions(&self, page: u32, per_page: u32) -> StoreResult<Page<PaymentTransaction>>;
}
