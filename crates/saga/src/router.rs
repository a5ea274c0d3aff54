//! Dispatches stream records to a participant by event type.

use std::sync::Arc;

use async_trait::async_trait;
use event_bus::{Envelope, EventPublisher, HandlerResult, MessageHandler, Record};

use crate::error::Result;
use crate::events::{EventKind, SagaEvent};

/// A service taking part in the saga.
#[async_trait]
pub trait Participant: Send + Sync {
    /// Name used in logs and metrics.
    fn name(&self) -> &str;

    /// Event types this participant emits. They are never fed back to it.
    fn produces(&self) -> &[EventKind];

    /// Event types this participant reacts to.
    fn subscribes(&self) -> &[EventKind];

    async fn handle(&self, event: SagaEvent) -> Result<()>;
}

/// What the router did with a record. Every disposition counts as handled
/// for offset purposes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    Malformed,
    Unknown,
    OwnEvent,
    NotSubscribed,
    Handled,
    Failed,
}

impl Disposition {
    pub fn as_str(&self) -> &'static str {
        match self {
            Disposition::Malformed => "malformed",
            Disposition::Unknown => "unknown",
            Disposition::OwnEvent => "own_event",
            Disposition::NotSubscribed => "not_subscribed",
            Disposition::Handled => "handled",
            Disposition::Failed => "failed",
        }
    }

    fn dead_letters(&self) -> bool {
        matches!(self, Disposition::Malformed | Disposition::Failed)
    }
}

struct DeadLetter {
    publisher: Arc<dyn EventPublisher>,
    suffix: String,
}

/// Routes records from a consumer group to one participant.
pub struct EventRouter {
    participant: Arc<dyn Participant>,
    dead_letter: Option<DeadLetter>,
}

impl EventRouter {
    pub fn new(participant: Arc<dyn Participant>) -> Self {
        Self {
            participant,
            dead_letter: None,
        }
    }

    /// Republishes malformed and failed records to `<stream>.dlq`.
    pub fn with_dead_letter(mut self, publisher: Arc<dyn EventPublisher>) -> Self {
        self.dead_letter = Some(DeadLetter {
            publisher,
            suffix: ".dlq".to_string(),
        });
        self
    }

    /// Classifies and dispatches one record. Never fails.
    #[tracing::instrument(
        skip(self, record),
        fields(
            participant = %self.participant.name(),
            partition = %record.partition,
            offset = %record.offset,
        )
    )]
    pub async fn route(&self, record: &Record) -> Disposition {
        let disposition = self.dispatch(record).await;

        metrics::counter!(
            "router_dispositions_total",
            "participant" => self.participant.name().to_string(),
            "disposition" => disposition.as_str()
        )
        .increment(1);

        if disposition.dead_letters() {
            self.dead_letter(record).await;
        }
        disposition
    }

    async fn dispatch(&self, record: &Record) -> Disposition {
        let envelope = match Envelope::decode(&record.payload) {
            Ok(envelope) => envelope,
            Err(e) => {
                tracing::warn!(error = %e, "discarding undecodable record");
                return Disposition::Malformed;
            }
        };

        let Some(kind) = EventKind::from_wire(envelope.event_type()) else {
            tracing::info!(event_type = envelope.event_type(), "skipping unknown event type");
            return Disposition::Unknown;
        };

        if self.participant.produces().contains(&kind) {
            tracing::debug!(event_type = %kind, "ignoring own event");
            return Disposition::OwnEvent;
        }
        if !self.participant.subscribes().contains(&kind) {
            tracing::debug!(event_type = %kind, "not subscribed");
            return Disposition::NotSubscribed;
        }

        let event = match kind.decode(&envelope) {
            Ok(event) => event,
            Err(e) => {
                tracing::warn!(event_type = %kind, error = %e, "discarding malformed event");
                return Disposition::Malformed;
            }
        };

        let order_id = event.order_id();
        match self.participant.handle(event).await {
            Ok(()) => {
                tracing::debug!(event_type = %kind, %order_id, "event handled");
                Disposition::Handled
            }
            Err(e) => {
                tracing::error!(event_type = %kind, %order_id, error = %e, "handler failed");
                Disposition::Failed
            }
        }
    }

    async fn dead_letter(&self, record: &Record) {
        let Some(dlq) = &self.dead_letter else {
            return;
        };
        let stream = format!("{}{}", record.stream, dlq.suffix);
        if let Err(e) = dlq
            .publisher
            .publish_raw(&stream, &record.key, record.payload.clone())
            .await
        {
            tracing::error!(%stream, error = %e, "failed to dead-letter record");
        }
    }
}

#[async_trait]
impl MessageHandler for EventRouter {
    async fn handle(&self, record: &Record) -> HandlerResult {
        self.route(record).await;
        Ok(())
    }
}
