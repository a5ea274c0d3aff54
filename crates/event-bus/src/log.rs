use async_trait::async_trait;

use crate::{Ack, EventBusError, Offset, Partition, Record, Result};

/// Core trait for partitioned event log implementations.
///
/// A log holds named streams split into a fixed number of partitions. Records
/// are appended to the partition selected by their key and are read back in
/// offset order. Consumer groups store their progress in the log as well.
/// All implementations must be thread-safe (Send + Sync).
#[async_trait]
pub trait EventLog: Send + Sync {
    /// Creates a stream if it does not exist yet.
    ///
    /// Returns the partition count of the stream, which is the existing count
    /// when the stream was already present.
    async fn create_stream(&self, stream: &str, partitions: u32) -> Result<u32>;

    /// Returns the partition count of a stream.
    async fn partition_count(&self, stream: &str) -> Result<u32>;

    /// Appends a record to the partition selected by `key`.
    ///
    /// The record is durable once this returns. Records sharing a key are
    /// readable in append order.
    async fn append(&self, stream: &str, key: &str, payload: Vec<u8>) -> Result<Ack>;

    /// Reads up to `max` records of one partition starting at `from`.
    async fn fetch(
        &self,
        stream: &str,
        partition: Partition,
        from: Offset,
        max: usize,
    ) -> Result<Vec<Record>>;

    /// Returns the offset the next appended record of a partition will get.
    async fn end_offset(&self, stream: &str, partition: Partition) -> Result<Offset>;

    /// Stores the next offset to deliver for a group on one partition.
    async fn commit(
        &self,
        group: &str,
        stream: &str,
        partition: Partition,
        next: Offset,
    ) -> Result<()>;

    /// Returns the committed next offset for a group on one partition.
    async fn committed(
        &self,
        group: &str,
        stream: &str,
        partition: Partition,
    ) -> Result<Option<Offset>>;
}

/// Checks that a partition index is valid for a stream.
pub(crate) fn check_partition(stream: &str, partition: Partition, partitions: u32) -> Result<()> {
    if partition.as_u32() >= partitions {
        return Err(EventBusError::PartitionOutOfRange {
            stream: stream.to_string(),
            partition,
            partitions,
        });
    }
    Ok(())
}

/// Checks that a requested partition count is usable.
pub(crate) fn check_partition_count(stream: &str, partitions: u32) -> Result<()> {
    if partitions == 0 {
        return Err(EventBusError::PartitionOutOfRange {
            stream: stream.to_string(),
            partition: Partition::new(0),
            partitions,
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partition_bounds() {
        assert!(check_partition("s", Partition::new(0), 1).is_ok());
        assert!(check_partition("s", Partition::new(3), 4).is_ok());
        assert!(matches!(
            check_partition("s", Partition::new(4), 4),
            Err(EventBusError::PartitionOutOfRange { partitions: 4, .. })
        ));
    }

    #[test]
    fn zero_partitions_rejected() {
        assert!(check_partition_count("s", 0).is_err());
        assert!(check_partition_count("s", 1).is_ok());
    }
}
