use async_trait::async_trait;
use futures::stream::BoxStream;
use thiserror::Error;

use crate::events::DomainEvent;

#[derive(Error, Debug)]
pub enum EventBusError {
    #[error("Failed to publish event: {0}")]
    PublishError(String),
    #[error("Failed to subscribe to subject: {0}")]
    SubscribeError(String),
    #[error("Serialization error: {0}")]
    SerializationError(String),
    #[error("Connection error: {0}")]
    ConnectionError(String),
}

/// Port to the external event broker.
///
/// Events emitted from a single worker are totally ordered; across
/// workers ordering is best-effort with non-decreasing timestamps and
/// per-worker sequence numbers.
#[async_trait]
pub trait EventBus: Send + Sync {
    /// Publish a domain event to its subject.
    async fn publish(&self, event: &DomainEvent) -> Result<(), EventBusError>;

    /// Subscribe to a subject (wildcards allowed) and stream events.
    async fn subscribe(
        &self,
        subject: &str,
    ) -> Result<BoxStream<'static, Result<DomainEvent, EventBusError>>, EventBusError>;
}

impl From<EventBusError> for crate::shared_kernel::DomainError {
    fn from(err: EventBusError) -> Self {
        crate::shared_kernel::DomainError::InfrastructureError {
            message: err.to_string(),
        }
    }
}
