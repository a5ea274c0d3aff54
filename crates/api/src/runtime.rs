//! Wires backends, participants and consumer groups from [`Config`].

use std::sync::Arc;

use event_bus::{
    ConsumerGroup, EventBusError, EventLog, EventPublisher, GroupCoordinator, InMemoryEventLog,
    LogPublisher, PostgresEventLog,
};
use futures_util::future::join_all;
use saga::{
    EventRouter, HttpIdentityClient, IdentityLookup, InMemoryOrderStore, InMemoryPaymentStore,
    MockCardGateway, NotificationParticipant, Notifier, OrderParticipant, Participant,
    PaymentParticipant, PaymentStore, PostgresPaymentStore, SagaError,
};
use sqlx::postgres::PgPoolOptions;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::config::Config;
use crate::state::{AppState, Backend};

pub const PAYMENT_GROUP: &str = "payment-service";
pub const NOTIFICATION_GROUP: &str = "notification-service";

#[derive(Debug, thiserror::Error)]
pub enum StartupError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Event bus error: {0}")]
    EventBus(#[from] EventBusError),

    #[error("Saga error: {0}")]
    Saga(#[from] SagaError),
}

/// Everything the process runs: HTTP state plus one consumer group per
/// subscribing service.
pub struct Runtime {
    pub state: Arc<AppState>,
    pub log: Arc<dyn EventLog>,
    consumers: Vec<ConsumerGroup>,
}

impl Runtime {
    /// Builds the runtime. Without `DATABASE_URL` the log and stores are in memory.
    pub async fn build(config: &Config) -> Result<Self, StartupError> {
        let (log, payment_store, backend): (Arc<dyn EventLog>, Arc<dyn PaymentStore>, Backend) =
            match &config.database_url {
                Some(url) => {
                    let pool = PgPoolOptions::new().max_connections(10).connect(url).await?;
                    let log = PostgresEventLog::new(pool.clone())
                        .with_default_partitions(config.stream_partitions);
                    log.run_migrations().await?;
                    tracing::info!("using PostgreSQL event log and payment store");
                    (
                        Arc::new(log),
                        Arc::new(PostgresPaymentStore::new(pool)),
                        Backend::Postgres,
                    )
                }
                None => {
                    tracing::info!("DATABASE_URL not set, using in-memory event log and stores");
                    (
                        Arc::new(
                            InMemoryEventLog::new()
                                .with_default_partitions(config.stream_partitions),
                        ),
                        Arc::new(InMemoryPaymentStore::new()),
                        Backend::Memory,
                    )
                }
            };

        let identity: Arc<dyn IdentityLookup> = Arc::new(HttpIdentityClient::new(
            config.identity_url.as_str(),
            config.identity_timeout,
        )?);
        let notifier = Notifier::logging(&config.notify_channels, config.notify_send_timeout);

        Ok(Self::assemble(config, log, payment_store, identity, notifier, backend))
    }

    /// Assembles a runtime from already constructed parts.
    pub fn assemble(
        config: &Config,
        log: Arc<dyn EventLog>,
        payment_store: Arc<dyn PaymentStore>,
        identity: Arc<dyn IdentityLookup>,
        notifier: Notifier,
        backend: Backend,
    ) -> Self {
        let publisher: Arc<dyn EventPublisher> = Arc::new(LogPublisher::new(Arc::clone(&log)));

        let orders = Arc::new(OrderParticipant::new(
            Arc::new(InMemoryOrderStore::new()),
            Arc::clone(&publisher),
            config.event_stream.as_str(),
        ));
        let payments = Arc::new(PaymentParticipant::new(
            payment_store,
            Arc::new(MockCardGateway),
            Arc::clone(&publisher),
            config.event_stream.as_str(),
        ));
        let notifications = Arc::new(NotificationParticipant::new(identity, notifier));

        let coordinator = GroupCoordinator::new();
        let subscribers: [(&str, Arc<dyn Participant>); 2] = [
            (PAYMENT_GROUP, payments.clone()),
            (NOTIFICATION_GROUP, notifications),
        ];
        let consumers = subscribers
            .into_iter()
            .map(|(group, participant)| {
                let mut router = EventRouter::new(participant);
                if config.dead_letter {
                    router = router.with_dead_letter(Arc::clone(&publisher));
                }
                ConsumerGroup::new(
                    Arc::clone(&log),
                    coordinator.clone(),
                    config.consumer(group),
                    Arc::new(router),
                )
            })
            .collect();

        Self {
            state: Arc::new(AppState {
                orders,
                payments,
                backend,
            }),
            log,
            consumers,
        }
    }

    /// Starts every consumer group in the background until `cancel` fires.
    pub fn spawn_consumers(&self, cancel: &CancellationToken) -> Vec<JoinHandle<()>> {
        self.consumers
            .iter()
            .cloned()
            .map(|consumer| {
                let cancel = cancel.clone();
                tokio::spawn(async move {
                    let group = consumer.config().group.clone();
                    if let Err(e) = consumer.start(cancel).await {
                        tracing::error!(%group, error = %e, "consumer group stopped");
                    }
                })
            })
            .collect()
    }
}

/// Waits for spawned consumers to wind down.
pub async fn join_consumers(handles: Vec<JoinHandle<()>>) {
    for result in join_all(handles).await {
        if let Err(e) = result {
            tracing::error!(error = %e, "consumer task panicked");
        }
    }
}
