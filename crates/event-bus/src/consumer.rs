//! Consumer groups over a partitioned log.
//!
//! A [`ConsumerGroup`] runs a number of worker tasks that join the same group.
//! Each worker reads its assigned partitions in offset order, hands every
//! record to the [`MessageHandler`] and commits the following offset once the
//! handler returns, whatever its outcome. Handling and commit happen under the
//! group's commit fence, so membership changes wait for in-flight records.
//! Delivery is at-least-once: a record whose commit was lost to a crash or a
//! log outage is delivered again.
//!
//! Handlers must not call the [`GroupCoordinator`] that fences them.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::coordinator::{Assignment, GroupCoordinator};
use crate::{EventLog, Offset, Partition, Record, Result};

/// Outcome of handling one record. Errors are logged and never block the
/// partition.
pub type HandlerResult = std::result::Result<(), Box<dyn std::error::Error + Send + Sync>>;

/// Processes records delivered to a consumer group.
#[async_trait]
pub trait MessageHandler: Send + Sync {
    async fn handle(&self, record: &Record) -> HandlerResult;
}

/// Where a group starts reading a partition it has never committed on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum InitialOffset {
    /// From the first retained record.
    #[default]
    Earliest,
    /// From the end of the partition at the moment of joining.
    Latest,
}

impl std::str::FromStr for InitialOffset {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "earliest" | "oldest" => Ok(Self::Earliest),
            "latest" | "newest" => Ok(Self::Latest),
            other => Err(format!("unknown initial offset: {other}")),
        }
    }
}

/// Configuration for a consumer group.
#[derive(Debug, Clone)]
pub struct ConsumerConfig {
    pub group: String,
    pub stream: String,
    /// Partition count used when the stream does not exist yet.
    pub partitions: u32,
    pub workers: usize,
    pub batch_size: usize,
    pub poll_interval: Duration,
    pub retry_backoff: Duration,
    pub initial_offset: InitialOffset,
}

impl ConsumerConfig {
    pub fn new(group: impl Into<String>, stream: impl Into<String>) -> Self {
        Self {
            group: group.into(),
            stream: stream.into(),
            partitions: crate::memory::DEFAULT_PARTITIONS,
            workers: 1,
            batch_size: 100,
            poll_interval: Duration::from_millis(100),
            retry_backoff: Duration::from_secs(5),
            initial_offset: InitialOffset::Earliest,
        }
    }

    pub fn with_partitions(mut self, partitions: u32) -> Self {
        self.partitions = partitions.max(1);
        self
    }

    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers.max(1);
        self
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    pub fn with_retry_backoff(mut self, retry_backoff: Duration) -> Self {
        self.retry_backoff = retry_backoff;
        self
    }

    pub fn with_initial_offset(mut self, initial_offset: InitialOffset) -> Self {
        self.initial_offset = initial_offset;
        self
    }
}

/// Why a consume session ended without error.
enum SessionEnd {
    Cancelled,
    Rebalanced,
}

/// A set of workers consuming one stream as one group.
#[derive(Clone)]
pub struct ConsumerGroup {
    log: Arc<dyn EventLog>,
    coordinator: GroupCoordinator,
    config: ConsumerConfig,
    handler: Arc<dyn MessageHandler>,
}

impl ConsumerGroup {
    pub fn new(
        log: Arc<dyn EventLog>,
        coordinator: GroupCoordinator,
        config: ConsumerConfig,
        handler: Arc<dyn MessageHandler>,
    ) -> Self {
        Self {
            log,
            coordinator,
            config,
            handler,
        }
    }

    pub fn config(&self) -> &ConsumerConfig {
        &self.config
    }

    /// Runs all workers until `cancel` fires.
    ///
    /// Fails only if the stream cannot be created up front. Errors after that
    /// are retried by each worker after `retry_backoff`.
    pub async fn start(&self, cancel: CancellationToken) -> Result<()> {
        let partitions = self
            .log
            .create_stream(&self.config.stream, self.config.partitions)
            .await?;

        tracing::info!(
            group = %self.config.group,
            stream = %self.config.stream,
            partitions,
            workers = self.config.workers,
            "starting consumer group"
        );

        let workers = (0..self.config.workers).map(|index| {
            let member = format!("{}-{}-{}", self.config.group, index, Uuid::new_v4().simple());
            self.run_worker(member, partitions, cancel.clone())
        });
        futures_util::future::join_all(workers).await;

        tracing::info!(group = %self.config.group, "consumer group stopped");
        Ok(())
    }

    #[tracing::instrument(skip(self, cancel), fields(group = %self.config.group))]
    async fn run_worker(&self, member: String, partitions: u32, cancel: CancellationToken) {
        let group = self.config.group.as_str();
        let mut joined = false;

        loop {
            if cancel.is_cancelled() {
                break;
            }

            // A fenced or rebalanced member picks up its new assignment
            // without rejoining, so one rebalance does not trigger another.
            let assignment = match self.coordinator.assignment(group, &member).await {
                Ok(current) if joined => current,
                _ => {
                    joined = true;
                    self.coordinator.join(group, &member, partitions).await
                }
            };

            match self.consume(&member, assignment, &cancel).await {
                Ok(SessionEnd::Cancelled) => break,
                Ok(SessionEnd::Rebalanced) => continue,
                Err(e) if e.requires_rejoin() => {
                    tracing::debug!(error = %e, "member fenced, refreshing assignment");
                    continue;
                }
                Err(e) => {
                    tracing::warn!(
                        error = %e,
                        backoff_ms = self.config.retry_backoff.as_millis() as u64,
                        "consumer session failed, backing off"
                    );
                    metrics::counter!("consumer_errors_total", "group" => group.to_string())
                        .increment(1);
                    self.coordinator.leave(group, &member).await;
                    joined = false;

                    tokio::select! {
                        _ = cancel.cancelled() => break,
                        _ = tokio::time::sleep(self.config.retry_backoff) => {}
                    }
                }
            }
        }

        self.coordinator.leave(group, &member).await;
        tracing::debug!("worker left group");
    }

    /// Consumes the assigned partitions until cancellation, a generation
    /// change or an error.
    async fn consume(
        &self,
        member: &str,
        assignment: Assignment,
        cancel: &CancellationToken,
    ) -> Result<SessionEnd> {
        let group = self.config.group.as_str();
        let stream = self.config.stream.as_str();
        let mut positions = self.resolve_positions(member, &assignment).await?;

        tracing::debug!(
            generation = assignment.generation,
            partitions = ?assignment.partitions,
            "consuming assignment"
        );

        loop {
            if cancel.is_cancelled() {
                return Ok(SessionEnd::Cancelled);
            }

            let current = self.coordinator.assignment(group, member).await?;
            if current.generation != assignment.generation {
                return Ok(SessionEnd::Rebalanced);
            }

            let mut delivered = 0usize;
            for &partition in &assignment.partitions {
                let from = positions
                    .get(&partition)
                    .copied()
                    .unwrap_or_else(Offset::earliest);
                let records = self
                    .log
                    .fetch(stream, partition, from, self.config.batch_size)
                    .await?;

                for record in records {
                    let next = record.offset.next();
                    {
                        // Held from delivery through commit: a rebalance
                        // waits for the in-flight record instead of voiding
                        // its commit.
                        let _fence = self
                            .coordinator
                            .fence(group, member, assignment.generation)
                            .await?;
                        self.deliver(&record).await;
                        self.log.commit(group, stream, partition, next).await?;
                    }
                    positions.insert(partition, next);
                    delivered += 1;

                    if cancel.is_cancelled() {
                        return Ok(SessionEnd::Cancelled);
                    }
                }
            }

            if delivered == 0 {
                tokio::select! {
                    _ = cancel.cancelled() => return Ok(SessionEnd::Cancelled),
                    _ = tokio::time::sleep(self.config.poll_interval) => {}
                }
            }
        }
    }

    async fn deliver(&self, record: &Record) {
        let group = self.config.group.clone();
        match self.handler.handle(record).await {
            Ok(()) => {
                metrics::counter!("consumer_records_total", "group" => group, "outcome" => "ok")
                    .increment(1);
            }
            Err(e) => {
                tracing::warn!(
                    partition = %record.partition,
                    offset = %record.offset,
                    error = %e,
                    "handler failed, committing offset anyway"
                );
                metrics::counter!("consumer_records_total", "group" => group, "outcome" => "error")
                    .increment(1);
            }
        }
    }

    /// Finds the start offset of every assigned partition. Partitions without
    /// a committed offset start at the configured initial position, which is
    /// committed right away so later owners resume from the same point.
    async fn resolve_positions(
        &self,
        member: &str,
        assignment: &Assignment,
    ) -> Result<HashMap<Partition, Offset>> {
        let group = self.config.group.as_str();
        let stream = self.config.stream.as_str();
        let mut positions = HashMap::with_capacity(assignment.partitions.len());

        for &partition in &assignment.partitions {
            let position = match self.log.committed(group, stream, partition).await? {
                Some(offset) => offset,
                None => {
                    let start = match self.config.initial_offset {
                        InitialOffset::Earliest => Offset::earliest(),
                        InitialOffset::Latest => self.log.end_offset(stream, partition).await?,
                    };
                    let _fence = self
                        .coordinator
                        .fence(group, member, assignment.generation)
                        .await?;
                    self.log.commit(group, stream, partition, start).await?;
                    start
                }
            };
            positions.insert(partition, position);
        }

        Ok(positions)
    }
}
