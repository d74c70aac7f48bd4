//! Reconciliation of local payment state with the gateway.
//!
//! [`Reconciler::apply`] is the only place a transaction's status changes.
//! It compare-and-swaps the transaction, so a background poll, a manual
//! refresh and a webhook-triggered refresh can all race on one transaction:
//! whichever writes first wins and the others see no change.

use parking_lot::Mutex;
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use crate::domain::aggregates::{Order, OrderStatus, PaymentStatus, PaymentTransaction};
use crate::domain::events::{DomainEvent, PaymentEvent};
use crate::domain::value_objects::GatewayOrderCode;
use crate::services::notifications::Notifier;
use crate::services::orders::OrderLifecycle;
use crate::services::payments::{PaymentAdapter, VerifiedPayment};
use crate::store::{Store, Swap};
use crate::{Error, GatewayError, Result, StateError};

const MAX_SWAP_ATTEMPTS: usize = 5;

/// A transaction that stayed open through every allowed poll. Reported, not
/// fatal: it needs someone to look at it.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
#[error("transaction {gateway_order_code} still {status} after {attempts} reconciliation attempts")]
pub struct ReconciliationTimeout {
    pub transaction_id: Uuid,
    pub gateway_order_code: GatewayOrderCode,
    pub status: PaymentStatus,
    pub attempts: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconcileOutcome {
    /// Local status already matched, or the gateway's answer cannot move it.
    Unchanged,
    Advanced { from: PaymentStatus, to: PaymentStatus },
    /// Another reconciliation of the same transaction is running.
    InFlight,
}

#[derive(Debug, Clone, Serialize)]
pub struct RefreshResult {
    pub transaction: PaymentTransaction,
    /// `false` when the gateway could not be reached and the local status is
    /// returned as last reconciled.
    pub reconciled: bool,
}

pub struct Reconciler {
    store: Arc<dyn Store>,
    payments: Arc<PaymentAdapter>,
    orders: Arc<OrderLifecycle>,
    notifier: Arc<dyn Notifier>,
    in_flight: Mutex<HashSet<Uuid>>,
}

/// Removes its transaction from the in-flight set when dropped.
struct InFlightGuard<'a> {
    set: &'a Mutex<HashSet<Uuid>>,
    id: Uuid,
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) { self.set.lock().remove(&self.id); }
}

impl Reconciler {
    pub fn new(store: Arc<dyn Store>, payments: Arc<PaymentAdapter>, orders: Arc<OrderLifecycle>, notifier: Arc<dyn Notifier>) -> Self {
        Self { store, payments, orders, notifier, in_flight: Mutex::new(HashSet::new()) }
    }

    /// Transactions currently being reconciled by a poll.
    pub fn in_progress(&self) -> HashSet<Uuid> { self.in_flight.lock().clone() }

    fn claim(&self, id: Uuid) -> Option<InFlightGuard<'_>> {
        self.in_flight.lock().insert(id).then(|| InFlightGuard { set: &self.in_flight, id })
    }

    /// One poll of one transaction. Skips it if another poll holds it.
    #[instrument(skip(self, txn), fields(gateway_order_code = %txn.gateway_order_code()))]
    pub async fn reconcile(&self, txn: &PaymentTransaction) -> Result<ReconcileOutcome> {
        let Some(_guard) = self.claim(txn.id()) else {
            debug!("Reconciliation already in flight");
            return Ok(ReconcileOutcome::InFlight);
        };
        let verified = self.payments.verify_payment(txn.gateway_order_code()).await?;
        self.apply(txn, &verified).await
    }

    /// Writes a verified gateway answer into the transaction and its order.
    ///
    /// Applying the same answer twice leaves everything as the first
    /// application did and emits nothing the second time.
    pub async fn apply(&self, txn: &PaymentTransaction, verified: &VerifiedPayment) -> Result<ReconcileOutcome> {
        let target = verified.status;
        let raw = verified.gateway_status.as_str();
        let mut current = txn.clone();

        for _ in 0..MAX_SWAP_ATTEMPTS {
            let from = current.status();
            if from == target || !from.can_advance_to(target) {
                if from != target {
                    warn!(gateway_order_code = %current.gateway_order_code(), local = %from, gateway = raw, "Gateway status cannot move local status");
                }
                self.store.record_gateway_status(current.id(), raw).await?;
                self.sync_order(&current).await?;
                return Ok(ReconcileOutcome::Unchanged);
            }

            let reason = verified.cancellation_reason.as_deref().filter(|_| target != PaymentStatus::Completed);
            match self.store.swap_transaction_status(current.id(), from, target, raw, reason).await? {
                Swap::Applied => {
                    info!(gateway_order_code = %current.gateway_order_code(), %from, to = %target, gateway = raw, "Payment status reconciled");
                    self.notifier.notify(&DomainEvent::Payment(PaymentEvent::StatusChanged {
                        transaction_id: current.id(),
                        order_id: current.order_id(),
                        gateway_order_code: current.gateway_order_code(),
                        from,
                        to: target,
                    })).await;
                    let updated = self.reload(current.gateway_order_code()).await?;
                    self.sync_order(&updated).await?;
                    return Ok(ReconcileOutcome::Advanced { from, to: target });
                }
                Swap::Stale => current = self.reload(current.gateway_order_code()).await?,
            }
        }
        Err(Error::Storage(format!("transaction {} kept changing during reconciliation", txn.gateway_order_code())))
    }

    /// On-demand reconciliation of one transaction. Gateway trouble is not an
    /// error here: the last reconciled local status is returned instead.
    #[instrument(skip(self))]
    pub async fn refresh(&self, code: GatewayOrderCode) -> Result<RefreshResult> {
        let txn = self.reload(code).await?;
        let reconciled = match self.payments.verify_payment(code).await {
            Ok(verified) => {
                self.apply(&txn, &verified).await?;
                true
            }
            Err(Error::Gateway(e)) => {
                warn!(gateway_order_code = %code, error = %e, "Gateway unavailable during refresh");
                false
            }
            Err(e) => return Err(e),
        };
        Ok(RefreshResult { transaction: self.reload(code).await?, reconciled })
    }

    /// User- or system-initiated cancellation.
    ///
    /// The status is refreshed first so a payment the gateway already settled
    /// is reported as [`StateError::AlreadySettled`] rather than cancelled.
    #[instrument(skip(self))]
    pub async fn cancel(&self, code: GatewayOrderCode, reason: &str) -> Result<PaymentTransaction> {
        self.refresh(code).await?;
        match self.payments.cancel_payment(code, reason).await {
            Ok(mut verified) => {
                verified.cancellation_reason.get_or_insert_with(|| reason.to_string());
                let txn = self.reload(code).await?;
                self.apply(&txn, &verified).await?;
                let txn = self.reload(code).await?;
                if txn.status() == PaymentStatus::Completed {
                    return Err(StateError::AlreadySettled.into());
                }
                Ok(txn)
            }
            Err(Error::Gateway(rejected @ GatewayError::Rejected { .. })) => {
                // The gateway refuses to cancel links it has settled.
                let refreshed = self.refresh(code).await?;
                if refreshed.transaction.status() == PaymentStatus::Completed {
                    return Err(StateError::AlreadySettled.into());
                }
                Err(rejected.into())
            }
            Err(e) => Err(e),
        }
    }

    /// Operator-driven order status change.
    ///
    /// Cancelling an order that still has an open payment cancels the payment
    /// at the gateway first, so the link stops being payable before stock is
    /// handed back. A payment that settled in the meantime surfaces as
    /// [`StateError::AlreadySettled`] and the order is confirmed instead.
    #[instrument(skip(self))]
    pub async fn update_order(&self, order_id: Uuid, to: OrderStatus, reason: Option<String>) -> Result<Order> {
        if to != OrderStatus::Cancelled {
            return self.orders.transition(order_id, to, reason).await;
        }
        let order = self.orders.order(order_id).await?;
        order.status().check_transition(to)?;

        let Some(open) = self.store.open_transaction_for_order(order_id).await? else {
            return self.orders.transition(order_id, to, reason).await;
        };
        let reason = reason.unwrap_or_else(|| "cancelled by operator".to_string());
        self.cancel(open.gateway_order_code(), &reason).await?;
        Ok(self.orders.ensure(order_id, to, Some(reason)).await?.into_order())
    }

    async fn reload(&self, code: GatewayOrderCode) -> Result<PaymentTransaction> {
        self.store.transaction_by_code(code).await?.ok_or_else(|| Error::NotFound(format!("transaction {code}")))
    }

    /// Brings the order in line with its transaction's status.
    async fn sync_order(&self, txn: &PaymentTransaction) -> Result<()> {
        let order = self.orders.order(txn.order_id()).await?;
        match (txn.status(), order.status()) {
            (PaymentStatus::Completed, OrderStatus::Created) => {
                self.orders.ensure(order.id(), OrderStatus::Confirmed, None).await?;
            }
            (PaymentStatus::Completed, OrderStatus::Cancelled) => {
                error!(order_id = %order.id(), gateway_order_code = %txn.gateway_order_code(), amount = %txn.amount(), "Payment settled for a cancelled order, refund required");
            }
            (PaymentStatus::Cancelled | PaymentStatus::Failed, OrderStatus::Created | OrderStatus::Confirmed) => {
                let reason = txn.cancellation_reason().map(str::to_string)
                    .unwrap_or_else(|| format!("payment {}", txn.status().as_str().to_lowercase()));
                self.orders.ensure(order.id(), OrderStatus::Cancelled, Some(reason)).await?;
            }
            _ => {}
        }
        Ok(())
    }
}

/// Counts of one pass over the open transactions.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct CycleReport {
    pub checked: usize,
    pub advanced: usize,
    pub failed: usize,
    pub skipped: usize,
    pub timed_out: Vec<ReconciliationTimeout>,
}

/// Background loop re-verifying every open transaction.
pub struct ReconciliationPoller {
    reconciler: Arc<Reconciler>,
    store: Arc<dyn Store>,
    interval: Duration,
    max_attempts: u32,
    attempts: Mutex<HashMap<Uuid, u32>>,
}

pub struct PollerHandle {
    cancel: watch::Sender<bool>,
    join: JoinHandle<()>,
}

impl PollerHandle {
    /// Signals the loop and waits for the current cycle to finish.
    pub async fn stop(self) {
        let _ = self.cancel.send(true);
        if let Err(e) = self.join.await {
            warn!(error = %e, "Reconciliation poller ended abnormally");
        }
    }
}

impl ReconciliationPoller {
    pub fn new(reconciler: Arc<Reconciler>, store: Arc<dyn Store>, interval: Duration, max_attempts: u32) -> Self {
        Self { reconciler, store, interval, max_attempts, attempts: Mutex::new(HashMap::new()) }
    }

    pub fn attempts(&self, transaction_id: Uuid) -> u32 {
        self.attempts.lock().get(&transaction_id).copied().unwrap_or(0)
    }

    /// Polls every open transaction once.
    pub async fn run_cycle(&self) -> Result<CycleReport> {
        let open = self.store.open_transactions().await?;
        {
            let ids: HashSet<Uuid> = open.iter().map(PaymentTransaction::id).collect();
            self.attempts.lock().retain(|id, _| ids.contains(id));
        }

        let mut report = CycleReport::default();
        for txn in open {
            let attempt = {
                let mut attempts = self.attempts.lock();
                let n = attempts.entry(txn.id()).or_insert(0);
                if *n >= self.max_attempts {
                    None
                } else {
                    *n += 1;
                    Some(*n)
                }
            };
            let Some(attempt) = attempt else {
                report.skipped += 1;
                continue;
            };

            report.checked += 1;
            let still_open = match self.reconciler.reconcile(&txn).await {
                Ok(ReconcileOutcome::Advanced { to, .. }) => {
                    report.advanced += 1;
                    !to.is_terminal()
                }
                Ok(ReconcileOutcome::Unchanged) => true,
                Ok(ReconcileOutcome::InFlight) => {
                    report.skipped += 1;
                    true
                }
                Err(e) => {
                    report.failed += 1;
                    warn!(gateway_order_code = %txn.gateway_order_code(), attempt, error = %e, "Reconciliation attempt failed");
                    true
                }
            };

            if !still_open {
                self.attempts.lock().remove(&txn.id());
            } else if attempt >= self.max_attempts {
                let timeout = ReconciliationTimeout {
                    transaction_id: txn.id(),
                    gateway_order_code: txn.gateway_order_code(),
                    status: txn.status(),
                    attempts: attempt,
                };
                warn!(error = %timeout, "Reconciliation timed out, manual follow-up needed");
                report.timed_out.push(timeout);
            }
        }
        Ok(report)
    }

    pub fn spawn(self: Arc<Self>) -> PollerHandle {
        let (cancel, mut cancel_rx) = watch::channel(false);
        let join = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            info!(interval_secs = self.interval.as_secs(), max_attempts = self.max_attempts, "Reconciliation poller started");

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        match self.run_cycle().await {
                            Ok(report) if report.checked > 0 => {
                                debug!(checked = report.checked, advanced = report.advanced, failed = report.failed, "Reconciliation cycle done");
                            }
                            Ok(_) => {}
                            Err(e) => error!(error = %e, "Reconciliation cycle failed"),
                        }
                    }
                    changed = cancel_rx.changed() => {
                        if changed.is_err() || *cancel_rx.borrow() {
                            info!("Reconciliation poller stopped");
                            break;
                        }
                    }
                }
            }
        });
        PollerHandle { cancel, join }
    }
}

