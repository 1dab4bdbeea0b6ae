//! In-memory event bus.
//!
//! Broadcast-channel bus used for broker-less operation and tests. The
//! full publish history is retained so tests can assert on emitted
//! events without racing the subscribers.

use async_trait::async_trait;
use futures::stream::BoxStream;
use futures::StreamExt;
use parking_lot::Mutex;
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;

use artzain_server_domain::event_bus::{EventBus, EventBusError};
use artzain_server_domain::events::DomainEvent;

const CHANNEL_CAPACITY: usize = 1024;

pub struct InMemoryEventBus {
    sender: broadcast::Sender<DomainEvent>,
    history: Mutex<Vec<DomainEvent>>,
}

impl Default for InMemoryEventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryEventBus {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self {
            sender,
            history: Mutex::new(Vec::new()),
        }
    }

    /// Every event published so far, in publish order.
    pub fn published(&self) -> Vec<DomainEvent> {
        self.history.lock().clone()
    }

    /// Published events whose wire type matches `event_type`.
    pub fn published_of_type(&self, event_type: &str) -> Vec<DomainEvent> {
        self.history
            .lock()
            .iter()
            .filter(|e| e.event_type() == event_type)
            .cloned()
            .collect()
    }
}

/// NATS-style subject matching: exact, or a `.>` multi-level wildcard
/// suffix.
fn subject_matches(pattern: &str, subject: &str) -> bool {
    if pattern == subject {
        return true;
    }
    if let Some(prefix) = pattern.strip_suffix(".>") {
        return subject.starts_with(prefix)
            && subject.as_bytes().get(prefix.len()) == Some(&b'.');
    }
    false
}

#[async_trait]
impl EventBus for InMemoryEventBus {
    async fn publish(&self, event: &DomainEvent) -> Result<(), EventBusError> {
        self.history.lock().push(event.clone());
        // No receivers is fine: publishing is fire-and-forget here
        let _ = self.sender.send(event.clone());
        Ok(())
    }

    async fn subscribe(
        &self,
        subject: &str,
    ) -> Result<BoxStream<'static, Result<DomainEvent, EventBusError>>, EventBusError> {
        let pattern = subject.to_string();
        let receiver = self.sender.subscribe();
        let stream = BroadcastStream::new(receiver)
            .filter_map(move |item| {
                let pattern = pattern.clone();
                async move {
                    match item {
                        Ok(event) if subject_matches(&pattern, event.subject()) => {
                            Some(Ok(event))
                        }
                        Ok(_) => None,
                        Err(error) => {
                            Some(Err(EventBusError::SubscribeError(error.to_string())))
                        }
                    }
                }
            })
            .boxed();
        Ok(stream)
    }
}
