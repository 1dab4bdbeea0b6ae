//! Event emission helper.
//!
//! Each worker owns one emitter: it stamps events with the worker id and
//! a monotonic per-worker sequence number, and publishes best-effort. A
//! broker outage must never fail the controller action that emitted the
//! event, so publish errors are logged and swallowed.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tracing::warn;

use artzain_server_domain::event_bus::EventBus;
use artzain_server_domain::events::{DomainEvent, EventMetadata};
use artzain_server_domain::shared_kernel::CorrelationId;

#[derive(Clone)]
pub struct EventEmitter {
    bus: Arc<dyn EventBus>,
    worker_id: String,
    sequence: Arc<AtomicU64>,
}

impl EventEmitter {
    pub fn new(bus: Arc<dyn EventBus>, worker_id: impl Into<String>) -> Self {
        Self {
            bus,
            worker_id: worker_id.into(),
            sequence: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Metadata for the next event from this worker.
    pub fn next_meta(&self, correlation_id: Option<CorrelationId>) -> EventMetadata {
        let sequence = self.sequence.fetch_add(1, Ordering::Relaxed);
        EventMetadata::new(self.worker_id.clone(), sequence, correlation_id)
    }

    /// Publish an event, logging (not propagating) broker failures.
    pub async fn emit(&self, event: DomainEvent) {
        if let Err(error) = self.bus.publish(&event).await {
            warn!(
                event_type = event.event_type(),
                worker_id = %self.worker_id,
                %error,
                "failed to publish event"
            );
        }
    }

    pub fn worker_id(&self) -> &str {
        &self.worker_id
    }
}
