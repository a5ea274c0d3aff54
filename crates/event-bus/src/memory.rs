use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::RwLock;

use crate::log::{check_partition, check_partition_count};
use crate::{Ack, EventBusError, EventLog, Offset, Partition, Record, Result};

/// Partition count used when a stream is created implicitly by `append`.
pub const DEFAULT_PARTITIONS: u32 = 4;

#[derive(Default)]
struct LogState {
    streams: HashMap<String, Vec<Vec<Record>>>,
    offsets: HashMap<(String, String, Partition), Offset>,
}

/// In-memory partitioned log for tests and single-process deployments.
///
/// Provides the same interface as the PostgreSQL implementation. Appending to
/// a missing stream creates it with the configured default partition count.
#[derive(Clone)]
pub struct InMemoryEventLog {
    state: Arc<RwLock<LogState>>,
    default_partitions: u32,
    unavailable: Arc<AtomicBool>,
}

impl Default for InMemoryEventLog {
    fn default() -> Self {
        Self {
            state: Arc::default(),
            default_partitions: DEFAULT_PARTITIONS,
            unavailable: Arc::default(),
        }
    }
}

impl InMemoryEventLog {
    /// Creates a new empty in-memory log.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the partition count for implicitly created streams.
    pub fn with_default_partitions(mut self, partitions: u32) -> Self {
        self.default_partitions = partitions.max(1);
        self
    }

    /// Simulates the log becoming unreachable; every call fails while set.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Returns the total number of records in a stream.
    pub async fn record_count(&self, stream: &str) -> usize {
        self.state
            .read()
            .await
            .streams
            .get(stream)
            .map(|partitions| partitions.iter().map(Vec::len).sum())
            .unwrap_or(0)
    }

    /// Returns every record of a stream, partition by partition.
    pub async fn records(&self, stream: &str) -> Vec<Record> {
        self.state
            .read()
            .await
            .streams
            .get(stream)
            .map(|partitions| partitions.iter().flatten().cloned().collect())
            .unwrap_or_default()
    }

    fn ensure_available(&self) -> Result<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(EventBusError::Unavailable(
                "in-memory log marked unavailable".to_string(),
            ));
        }
        Ok(())
    }
}

#[async_trait]
impl EventLog for InMemoryEventLog {
    async fn create_stream(&self, stream: &str, partitions: u32) -> Result<u32> {
        self.ensure_available()?;
        check_partition_count(stream, partitions)?;

        let mut state = self.state.write().await;
        let entry = state
            .streams
            .entry(stream.to_string())
            .or_insert_with(|| vec![Vec::new(); partitions as usize]);
        Ok(entry.len() as u32)
    }

    async fn partition_count(&self, stream: &str) -> Result<u32> {
        self.ensure_available()?;
        let state = self.state.read().await;
        state
            .streams
            .get(stream)
            .map(|partitions| partitions.len() as u32)
            .ok_or_else(|| EventBusError::UnknownStream(stream.to_string()))
    }

    async fn append(&self, stream: &str, key: &str, payload: Vec<u8>) -> Result<Ack> {
        self.ensure_available()?;
        let mut state = self.state.write().await;

        let partitions = state
            .streams
            .entry(stream.to_string())
            .or_insert_with(|| vec![Vec::new(); self.default_partitions as usize]);

        let partition = Partition::for_key(key, partitions.len() as u32);
        let records = &mut partitions[partition.as_u32() as usize];
        let offset = Offset::new(records.len() as i64);

        records.push(Record {
            stream: stream.to_string(),
            partition,
            offset,
            key: key.to_string(),
            payload,
            appended_at: Utc::now(),
        });

        Ok(Ack { partition, offset })
    }

    async fn fetch(
        &self,
        stream: &str,
        partition: Partition,
        from: Offset,
        max: usize,
    ) -> Result<Vec<Record>> {
        self.ensure_available()?;
        let state = self.state.read().await;
        let partitions = state
            .streams
            .get(stream)
            .ok_or_else(|| EventBusError::UnknownStream(stream.to_string()))?;
        check_partition(stream, partition, partitions.len() as u32)?;

        let start = from.as_i64().max(0) as usize;
        Ok(partitions[partition.as_u32() as usize]
            .iter()
            .skip(start)
            .take(max)
            .cloned()
            .collect())
    }

    async fn end_offset(&self, stream: &str, partition: Partition) -> Result<Offset> {
        self.ensure_available()?;
        let state = self.state.read().await;
        let partitions = state
            .streams
            .get(stream)
            .ok_or_else(|| EventBusError::UnknownStream(stream.to_string()))?;
        check_partition(stream, partition, partitions.len() as u32)?;

        Ok(Offset::new(
            partitions[partition.as_u32() as usize].len() as i64,
        ))
    }

    async fn commit(
        &self,
        group: &str,
        stream: &str,
        partition: Partition,
        next: Offset,
    ) -> Result<()> {
        self.ensure_available()?;
        let mut state = self.state.write().await;
        state
            .offsets
            .insert((group.to_string(), stream.to_string(), partition), next);
        Ok(())
    }

    async fn committed(
        &self,
        group: &str,
        stream: &str,
        partition: Partition,
    ) -> Result<Option<Offset>> {
        self.ensure_available()?;
        let state = self.state.read().await;
        Ok(state
            .offsets
            .get(&(group.to_string(), stream.to_string(), partition))
            .copied())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const STREAM: &str = "order-events";

    #[tokio::test]
    async fn append_creates_stream_with_default_partitions() {
        let log = InMemoryEventLog::new().with_default_partitions(3);
        log.append(STREAM, "1", b"a".to_vec()).await.unwrap();
        assert_eq!(log.partition_count(STREAM).await.unwrap(), 3);
    }

    #[tokio::test]
    async fn create_stream_is_idempotent() {
        let log = InMemoryEventLog::new();
        assert_eq!(log.create_stream(STREAM, 2).await.unwrap(), 2);
        assert_eq!(log.create_stream(STREAM, 8).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn same_key_records_are_ordered_in_one_partition() {
        let log = InMemoryEventLog::new();
        log.create_stream(STREAM, 4).await.unwrap();

        let mut acks = Vec::new();
        for i in 0..5 {
            acks.push(
                log.append(STREAM, "42", format!("m{i}").into_bytes())
                    .await
                    .unwrap(),
            );
        }

        let partition = acks[0].partition;
        assert!(acks.iter().all(|a| a.partition == partition));
        assert_eq!(
            acks.iter().map(|a| a.offset.as_i64()).collect::<Vec<_>>(),
            vec![0, 1, 2, 3, 4]
        );

        let records = log
            .fetch(STREAM, partition, Offset::earliest(), 10)
            .await
            .unwrap();
        let payloads: Vec<_> = records.iter().map(|r| r.payload.clone()).collect();
        assert_eq!(
            payloads,
            (0..5).map(|i| format!("m{i}").into_bytes()).collect::<Vec<_>>()
        );
    }

    #[tokio::test]
    async fn fetch_respects_start_and_max() {
        let log = InMemoryEventLog::new().with_default_partitions(1);
        for i in 0..6 {
            log.append(STREAM, "k", vec![i]).await.unwrap();
        }

        let records = log
            .fetch(STREAM, Partition::new(0), Offset::new(2), 3)
            .await
            .unwrap();
        assert_eq!(
            records.iter().map(|r| r.offset.as_i64()).collect::<Vec<_>>(),
            vec![2, 3, 4]
        );
        assert_eq!(
            log.end_offset(STREAM, Partition::new(0)).await.unwrap(),
            Offset::new(6)
        );
    }

    #[tokio::test]
    async fn fetch_unknown_stream_or_partition_fails() {
        let log = InMemoryEventLog::new();
        assert!(matches!(
            log.fetch("missing", Partition::new(0), Offset::earliest(), 1)
                .await,
            Err(EventBusError::UnknownStream(_))
        ));

        log.create_stream(STREAM, 2).await.unwrap();
        assert!(matches!(
            log.fetch(STREAM, Partition::new(2), Offset::earliest(), 1)
                .await,
            Err(EventBusError::PartitionOutOfRange { .. })
        ));
    }

    #[tokio::test]
    async fn offsets_are_tracked_per_group() {
        let log = InMemoryEventLog::new();
        let p = Partition::new(1);

        assert_eq!(log.committed("a", STREAM, p).await.unwrap(), None);
        log.commit("a", STREAM, p, Offset::new(5)).await.unwrap();
        log.commit("b", STREAM, p, Offset::new(2)).await.unwrap();

        assert_eq!(
            log.committed("a", STREAM, p).await.unwrap(),
            Some(Offset::new(5))
        );
        assert_eq!(
            log.committed("b", STREAM, p).await.unwrap(),
            Some(Offset::new(2))
        );
    }

    #[tokio::test]
    async fn unavailable_log_fails_transiently() {
        let log = InMemoryEventLog::new();
        log.set_unavailable(true);

        let err = log.append(STREAM, "1", vec![]).await.unwrap_err();
        assert!(err.is_transient());

        log.set_unavailable(false);
        assert!(log.append(STREAM, "1", vec![]).await.is_ok());
        assert_eq!(log.record_count(STREAM).await, 1);
    }
}
