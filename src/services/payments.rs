//! Payment gateway adapter.
//!
//! Turns payment intents into gateway calls, bounds every call with a
//! timeout and keeps at most one open transaction per order. It never changes
//! a transaction's status itself; that is the reconciler's job.

use parking_lot::Mutex;
use rust_decimal::Decimal;
use serde::Serialize;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::config::GatewayConfig;
use crate::domain::aggregates::{OrderStatus, PaymentStatus, PaymentTransaction};
use crate::domain::value_objects::GatewayOrderCode;
use crate::gateway::{GatewayStatus, PaymentGateway, PaymentLinkRequest};
use crate::store::{Store, StoreError};
use crate::{Error, GatewayError, Result, StateError};

/// What the caller needs to send the customer to the gateway.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PaymentHandle {
    pub transaction_id: Uuid,
    pub gateway_order_code: GatewayOrderCode,
    pub checkout_url: String,
    pub status: PaymentStatus,
    pub amount: Decimal,
}

impl From<&PaymentTransaction> for PaymentHandle {
    fn from(txn: &PaymentTransaction) -> Self {
        Self {
            transaction_id: txn.id(),
            gateway_order_code: txn.gateway_order_code(),
            checkout_url: txn.checkout_url().to_string(),
            status: txn.status(),
            amount: txn.amount(),
        }
    }
}

/// The gateway's answer, already mapped onto the local vocabulary.
#[derive(Debug, Clone, PartialEq)]
pub struct VerifiedPayment {
    pub status: PaymentStatus,
    pub gateway_status: GatewayStatus,
    pub amount_paid: Decimal,
    pub cancellation_reason: Option<String>,
}

impl VerifiedPayment {
    fn from_gateway(status: GatewayStatus, amount_paid: Decimal, cancellation_reason: Option<String>) -> Self {
        Self { status: status.local(), gateway_status: status, amount_paid, cancellation_reason }
    }
}

pub struct PaymentAdapter {
    gateway: Arc<dyn PaymentGateway>,
    store: Arc<dyn Store>,
    timeout: Duration,
    return_url: String,
    cancel_url: String,
    order_locks: Mutex<HashMap<Uuid, Arc<tokio::sync::Mutex<()>>>>,
}

impl PaymentAdapter {
    pub fn new(gateway: Arc<dyn PaymentGateway>, store: Arc<dyn Store>, cfg: &GatewayConfig) -> Self {
        Self {
            gateway, store, timeout: cfg.timeout,
            return_url: cfg.return_url.clone(), cancel_url: cfg.cancel_url.clone(),
            order_locks: Mutex::new(HashMap::new()),
        }
    }

    /// Opens a gateway transaction for `order_id`, or returns the one that is
    /// already open for it.
    #[instrument(skip(self, description))]
    pub async fn create_payment(&self, order_id: Uuid, amount: Decimal, description: &str) -> Result<PaymentHandle> {
        let lock = self.order_lock(order_id);
        let handle = {
            let _guard = lock.lock().await;
            self.open_or_reuse(order_id, amount, description).await
        };
        drop(lock);
        self.release_order_lock(order_id);
        handle
    }

    /// Explicit payment creation for an order that is still awaiting payment.
    pub async fn create_payment_for_order(&self, order_id: Uuid) -> Result<PaymentHandle> {
        let order = self.store.order(order_id).await?.ok_or_else(|| Error::NotFound(format!("order {order_id}")))?;
        if !order.payment_method().is_online() {
            return Err(Error::Validation(format!("order {} is paid {}", order.order_number(), order.payment_method().as_str())));
        }
        if order.status() != OrderStatus::Created {
            return Err(Error::Validation(format!("order {} is {} and takes no new payment", order.order_number(), order.status())));
        }
        self.create_payment(order_id, order.total(), order.order_number()).await
    }

    /// Asks the gateway for the authoritative status. Read-only.
    #[instrument(skip(self))]
    pub async fn verify_payment(&self, code: GatewayOrderCode) -> Result<VerifiedPayment> {
        let info = self.bounded(self.gateway.payment_info(code)).await?;
        Ok(VerifiedPayment::from_gateway(info.status, info.amount_paid, info.cancellation_reason))
    }

    /// Asks the gateway to cancel a transaction that is still open locally.
    /// The local record is left alone; the caller applies the answer.
    #[instrument(skip(self))]
    pub async fn cancel_payment(&self, code: GatewayOrderCode, reason: &str) -> Result<VerifiedPayment> {
        let txn = self.store.transaction_by_code(code).await?
            .ok_or_else(|| Error::NotFound(format!("transaction {code}")))?;
        match txn.status() {
            PaymentStatus::Completed => return Err(StateError::AlreadySettled.into()),
            status @ (PaymentStatus::Cancelled | PaymentStatus::Failed) => {
                return Err(StateError::InvalidTransition {
                    from: status.to_string(),
                    to: PaymentStatus::Cancelled.to_string(),
                }.into());
            }
            PaymentStatus::Pending | PaymentStatus::Processing => {}
        }
        let info = self.bounded(self.gateway.cancel_payment_link(code, reason)).await?;
        Ok(VerifiedPayment::from_gateway(info.status, info.amount_paid, info.cancellation_reason))
    }

    async fn open_or_reuse(&self, order_id: Uuid, amount: Decimal, description: &str) -> Result<PaymentHandle> {
        if let Some(existing) = self.store.open_transaction_for_order(order_id).await? {
            info!(%order_id, gateway_order_code = %existing.gateway_order_code(), "Reusing open payment transaction");
            return Ok(PaymentHandle::from(&existing));
        }

        let request = PaymentLinkRequest {
            order_code: GatewayOrderCode::generate(),
            amount,
            description: description.to_string(),
            return_url: self.return_url.clone(),
            cancel_url: self.cancel_url.clone(),
        };
        let link = self.bounded(self.gateway.create_payment_link(&request)).await?;
        let txn = PaymentTransaction::open(order_id, link.order_code, amount, link.checkout_url, Some(link.status.as_str().to_string()));

        match self.store.insert_transaction(&txn).await {
            Ok(()) => {
                info!(%order_id, gateway_order_code = %txn.gateway_order_code(), %amount, "Payment transaction opened");
                Ok(PaymentHandle::from(&txn))
            }
            Err(StoreError::OpenTransactionExists(_)) => {
                self.discard_link(txn.gateway_order_code()).await;
                let existing = self.store.open_transaction_for_order(order_id).await?
                    .ok_or_else(|| Error::Storage(format!("open transaction for order {order_id} vanished")))?;
                Ok(PaymentHandle::from(&existing))
            }
            Err(e) => {
                self.discard_link(txn.gateway_order_code()).await;
                Err(e.into())
            }
        }
    }

    /// Best-effort cancel of a link that has no local record.
    async fn discard_link(&self, code: GatewayOrderCode) {
        if let Err(e) = self.bounded(self.gateway.cancel_payment_link(code, "superseded")).await {
            warn!(gateway_order_code = %code, error = %e, "Could not cancel orphaned payment link");
        }
    }

    async fn bounded<T>(&self, call: impl Future<Output = std::result::Result<T, GatewayError>>) -> std::result::Result<T, GatewayError> {
        match tokio::time::timeout(self.timeout, call).await {
            Ok(result) => result,
            Err(_) => Err(GatewayError::Timeout),
        }
    }

    fn order_lock(&self, order_id: Uuid) -> Arc<tokio::sync::Mutex<()>> {
        self.order_locks.lock().entry(order_id).or_default().clone()
    }

    fn release_order_lock(&self, order_id: Uuid) {
        let mut locks = self.order_locks.lock();
        if locks.get(&order_id).is_some_and(|l| Arc::strong_count(l) == 1) {
            locks.remove(&order_id);
        }
    }
}
