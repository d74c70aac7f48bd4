//! Hand-off of domain events to the customer notification pipeline.
//!
//! Delivery is someone else's job: failures are logged and never bubble back
//! into checkout or reconciliation.

use async_trait::async_trait;
use parking_lot::Mutex;
use tracing::{info, warn};

use crate::domain::events::DomainEvent;

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, event: &DomainEvent);
}

/// Writes events to the log only. Used when no broker is configured.
#[derive(Debug, Default, Clone)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify(&self, event: &DomainEvent) {
        info!(event = event.name(), payload = ?event, "Domain event");
    }
}

/// Publishes events as JSON on `<prefix>.<event name>`.
#[derive(Clone)]
pub struct NatsNotifier {
    client: async_nats::Client,
    prefix: String,
}

impl NatsNotifier {
    pub fn new(client: async_nats::Client) -> Self { Self { client, prefix: "orders.events".into() } }
}

#[async_trait]
impl Notifier for NatsNotifier {
    async fn notify(&self, event: &DomainEvent) {
        let subject = format!("{}.{}", self.prefix, event.name());
        let payload = match serde_json::to_vec(event) {
            Ok(p) => p,
            Err(e) => { warn!(error = %e, subject, "Could not encode domain event"); return; }
        };
        if let Err(e) = self.client.publish(subject.clone(), payload.into()).await {
            warn!(error = %e, subject, "Could not publish domain event");
        }
    }
}

/// Keeps every event in memory; handy for tests and local tooling.
#[derive(Debug, Default)]
pub struct RecordingNotifier {
    events: Mutex<Vec<DomainEvent>>,
}

impl RecordingNotifier {
    pub fn new() -> Self { Self::default() }
    pub fn events(&self) -> Vec<DomainEvent> { self.events.lock().clone() }
    pub fn count(&self, name: &str) -> usize { self.events.lock().iter().filter(|e| e.name() == name).count() }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn notify(&self, event: &DomainEvent) {
        self.events.lock().push(event.clone());
    }
}
