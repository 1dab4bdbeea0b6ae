//! NATS JetStream EventBus implementation.
//!
//! Durable, at-least-once delivery of controller events. One stream
//! captures every `artzain.events.>` subject; consumers filter by
//! subject hierarchy.

use async_nats::jetstream::consumer::pull::Config as PullConsumerConfig;
use async_nats::jetstream::consumer::{AckPolicy, DeliverPolicy};
use async_nats::jetstream::stream::Config as StreamConfig;
use async_nats::jetstream::Context as JetStreamContext;
use async_nats::ConnectOptions;
use async_trait::async_trait;
use futures::stream::BoxStream;
use futures::StreamExt;
use std::time::Duration;
use tracing::{debug, info};

use artzain_shared::config::NatsConfig;
use artzain_shared::event_topics::{ALL_EVENTS, EVENTS_STREAM_NAME};
use artzain_server_domain::event_bus::{EventBus, EventBusError};
use artzain_server_domain::events::DomainEvent;

/// JetStream-backed event bus.
pub struct NatsEventBus {
    jetstream: JetStreamContext,
    stream_name: String,
}

impl NatsEventBus {
    /// Connect and ensure the events stream exists.
    pub async fn connect(config: &NatsConfig) -> Result<Self, EventBusError> {
        let mut options = ConnectOptions::new()
            .connection_timeout(Duration::from_secs(config.connection_timeout_secs));
        if let Some(name) = &config.name {
            options = options.name(name);
        }

        let client = options
            .connect(&config.url)
            .await
            .map_err(|e| EventBusError::ConnectionError(e.to_string()))?;
        let jetstream = async_nats::jetstream::new(client);

        jetstream
            .get_or_create_stream(StreamConfig {
                name: EVENTS_STREAM_NAME.to_string(),
                subjects: vec![ALL_EVENTS.to_string()],
                ..Default::default()
            })
            .await
            .map_err(|e| EventBusError::ConnectionError(e.to_string()))?;

        info!(url = %config.url, stream = EVENTS_STREAM_NAME, "connected NATS event bus");
        Ok(Self {
            jetstream,
            stream_name: EVENTS_STREAM_NAME.to_string(),
        })
    }
}

#[async_trait]
impl EventBus for NatsEventBus {
    async fn publish(&self, event: &DomainEvent) -> Result<(), EventBusError> {
        let payload = serde_json::to_vec(event)
            .map_err(|e| EventBusError::SerializationError(e.to_string()))?;

        let ack = self
            .jetstream
            .publish(event.subject().to_string(), payload.into())
            .await
            .map_err(|e| EventBusError::PublishError(e.to_string()))?;
        ack.await
            .map_err(|e| EventBusError::PublishError(e.to_string()))?;

        debug!(subject = event.subject(), "published event");
        Ok(())
    }

    async fn subscribe(
        &self,
        subject: &str,
    ) -> Result<BoxStream<'static, Result<DomainEvent, EventBusError>>, EventBusError> {
        let stream = self
            .jetstream
            .get_stream(&self.stream_name)
            .await
            .map_err(|e| EventBusError::SubscribeError(e.to_string()))?;

        let consumer = stream
            .create_consumer(PullConsumerConfig {
                filter_subject: subject.to_string(),
                deliver_policy: DeliverPolicy::New,
                ack_policy: AckPolicy::Explicit,
                ..Default::default()
            })
            .await
            .map_err(|e| EventBusError::SubscribeError(e.to_string()))?;

        let messages = consumer
            .messages()
            .await
            .map_err(|e| EventBusError::SubscribeError(e.to_string()))?;

        let events = messages.then(|message| async {
            let message = message.map_err(|e| EventBusError::SubscribeError(e.to_string()))?;
            let event: DomainEvent = serde_json::from_slice(&message.payload)
                .map_err(|e| EventBusError::SerializationError(e.to_string()))?;
            let _ = message.ack().await;
            Ok(event)
        });

        Ok(events.boxed())
    }
}
