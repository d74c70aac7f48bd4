//! Persisted order transitions.
//!
//! The allowed-successor table lives on [`OrderStatus`]; this service
//! validates against it, writes with a compare-and-swap, and emits the event
//! only for the writer that won.

use std::sync::Arc;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::domain::aggregates::{Order, OrderStatus, PaymentStatus};
use crate::domain::events::DomainEvent;
use crate::services::notifications::Notifier;
use crate::store::{Store, Swap};
use crate::{Error, Result, StateError};

const MAX_SWAP_ATTEMPTS: usize = 5;

#[derive(Debug, Clone)]
pub enum Transition {
    Applied(Order),
    /// The order was already in the requested status; nothing was written.
    Unchanged(Order),
}

impl Transition {
    pub fn into_order(self) -> Order {
        match self { Self::Applied(o) | Self::Unchanged(o) => o }
    }
}

pub struct OrderLifecycle {
    store: Arc<dyn Store>,
    notifier: Arc<dyn Notifier>,
}

impl OrderLifecycle {
    pub fn new(store: Arc<dyn Store>, notifier: Arc<dyn Notifier>) -> Self { Self { store, notifier } }

    pub async fn order(&self, id: Uuid) -> Result<Order> {
        self.store.order(id).await?.ok_or_else(|| Error::NotFound(format!("order {id}")))
    }

    /// Strict transition: `to` must be a successor of the current status.
    ///
    /// An online order with something to pay is only confirmed once its
    /// payment has settled.
    #[instrument(skip(self))]
    pub async fn transition(&self, id: Uuid, to: OrderStatus, reason: Option<String>) -> Result<Order> {
        if to == OrderStatus::Confirmed {
            self.require_settled(&self.order(id).await?).await?;
        }
        self.apply(id, to, reason, false).await.map(Transition::into_order)
    }

    /// Idempotent transition: reaching a status the order already holds is a
    /// no-op, any other disallowed move is still an error.
    #[instrument(skip(self))]
    pub async fn ensure(&self, id: Uuid, to: OrderStatus, reason: Option<String>) -> Result<Transition> {
        self.apply(id, to, reason, true).await
    }

    /// Sends the events an order raised before it was first persisted.
    pub async fn announce(&self, order: &mut Order) {
        for event in order.take_events() {
            self.notifier.notify(&event).await;
        }
    }

    /// Cancels a freshly created order whose checkout could not finish. The
    /// order was never announced, so no event is emitted.
    #[instrument(skip(self))]
    pub async fn abandon(&self, id: Uuid, reason: &str) -> Result<()> {
        match self.store.cancel_order(id, OrderStatus::Created, reason).await? {
            Swap::Applied => info!(order_id = %id, reason, "Order abandoned"),
            Swap::Stale => warn!(order_id = %id, "Order left CREATED before it could be abandoned"),
        }
        Ok(())
    }

    async fn require_settled(&self, order: &Order) -> Result<()> {
        if !order.payment_method().is_online() || order.total().is_zero() {
            return Ok(());
        }
        let settled = match order.payment_ref() {
            Some(code) => self.store.transaction_by_code(code).await?
                .is_some_and(|txn| txn.status() == PaymentStatus::Completed),
            None => false,
        };
        if settled {
            Ok(())
        } else {
            Err(StateError::PaymentNotSettled { order_number: order.order_number().to_string() }.into())
        }
    }

    async fn apply(&self, id: Uuid, to: OrderStatus, reason: Option<String>, idempotent: bool) -> Result<Transition> {
        for _ in 0..MAX_SWAP_ATTEMPTS {
            let mut order = self.order(id).await?;
            if idempotent && order.status() == to {
                return Ok(Transition::Unchanged(order));
            }

            let from = order.status();
            let event = order.transition_to(to, reason.clone())?;
            let swap = if to == OrderStatus::Cancelled {
                let reason = reason.as_deref().unwrap_or("cancelled");
                self.store.cancel_order(id, from, reason).await?
            } else {
                self.store.swap_order_status(id, from, to).await?
            };

            if swap == Swap::Applied {
                info!(order_id = %id, %from, %to, "Order transitioned");
                order.take_events();
                self.notifier.notify(&DomainEvent::Order(event)).await;
                return Ok(Transition::Applied(order));
            }
            // Lost the race to another writer; re-read and re-validate.
        }
        Err(Error::Storage(format!("order {id} kept changing while moving to {to}")))
    }
}
