use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;

use crate::envelope::{BusEvent, encode};
use crate::{Ack, EventLog, Result};

/// Publishes encoded events to a stream.
#[async_trait]
pub trait EventPublisher: Send + Sync {
    /// Appends already-encoded bytes under `key`.
    async fn publish_raw(&self, stream: &str, key: &str, payload: Vec<u8>) -> Result<Ack>;
}

/// Extension trait for publishing typed events.
#[async_trait]
pub trait EventPublisherExt: EventPublisher {
    /// Encodes and publishes a value under an explicit key.
    async fn publish<E: Serialize + Sync + ?Sized>(
        &self,
        stream: &str,
        key: &str,
        event: &E,
    ) -> Result<Ack> {
        let payload = encode(event)?;
        self.publish_raw(stream, key, payload).await
    }

    /// Encodes and publishes an event keyed by its own partition key.
    async fn publish_event<E: BusEvent>(&self, stream: &str, event: &E) -> Result<Ack> {
        let payload = encode(event)?;
        self.publish_raw(stream, &event.partition_key(), payload)
            .await
    }
}

impl<T: EventPublisher + ?Sized> EventPublisherExt for T {}

/// Publisher that appends straight to an [`EventLog`].
#[derive(Clone)]
pub struct LogPublisher {
    log: Arc<dyn EventLog>,
}

impl LogPublisher {
    pub fn new(log: Arc<dyn EventLog>) -> Self {
        Self { log }
    }
}

#[async_trait]
impl EventPublisher for LogPublisher {
    #[tracing::instrument(skip(self, payload), fields(bytes = payload.len()))]
    async fn publish_raw(&self, stream: &str, key: &str, payload: Vec<u8>) -> Result<Ack> {
        let ack = self.log.append(stream, key, payload).await?;
        metrics::counter!("events_published_total", "stream" => stream.to_string()).increment(1);
        tracing::debug!(partition = %ack.partition, offset = %ack.offset, "event published");
        Ok(ack)
    }
}
