use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Index of a partition within a stream.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Partition(u32);

impl Partition {
    /// Creates a partition index from a raw value.
    pub fn new(index: u32) -> Self {
        Self(index)
    }

    /// Returns the raw partition index.
    pub fn as_u32(&self) -> u32 {
        self.0
    }

    /// Selects the partition for a key.
    ///
    /// The mapping is a pure function of the key bytes and the partition
    /// count, so every publisher sends a given key to the same partition.
    pub fn for_key(key: &str, partitions: u32) -> Self {
        debug_assert!(partitions > 0, "stream must have at least one partition");
        Self(crc32fast::hash(key.as_bytes()) % partitions.max(1))
    }
}

impl std::fmt::Display for Partition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Position of a record within one partition.
///
/// Offsets start at 0 and increase by 1 per appended record. A committed
/// offset names the *next* record to deliver.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Offset(i64);

impl Offset {
    /// Creates an offset from a raw value.
    pub fn new(value: i64) -> Self {
        Self(value)
    }

    /// Returns the offset of the first record in a partition.
    pub fn earliest() -> Self {
        Self(0)
    }

    /// Returns the following offset.
    pub fn next(&self) -> Self {
        Self(self.0 + 1)
    }

    /// Returns the raw offset value.
    pub fn as_i64(&self) -> i64 {
        self.0
    }
}

impl std::fmt::Display for Offset {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A record stored in a stream partition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    /// Stream the record was appended to.
    pub stream: String,

    /// Partition holding the record.
    pub partition: Partition,

    /// Offset of the record within its partition.
    pub offset: Offset,

    /// Partition key supplied by the publisher.
    pub key: String,

    /// Encoded event bytes.
    pub payload: Vec<u8>,

    /// When the log accepted the record.
    pub appended_at: DateTime<Utc>,
}

/// Acknowledgement returned once a record is durably appended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ack {
    pub partition: Partition,
    pub offset: Offset,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_key_always_maps_to_same_partition() {
        let first = Partition::for_key("42", 8);
        for _ in 0..10 {
            assert_eq!(Partition::for_key("42", 8), first);
        }
        assert!(first.as_u32() < 8);
    }

    #[test]
    fn keys_spread_across_partitions() {
        let used: std::collections::HashSet<_> = (1..=64)
            .map(|order_id| Partition::for_key(&order_id.to_string(), 4))
            .collect();
        assert!(used.len() > 1);
    }

    #[test]
    fn single_partition_stream_uses_partition_zero() {
        assert_eq!(Partition::for_key("anything", 1), Partition::new(0));
    }

    #[test]
    fn offset_ordering() {
        let o = Offset::earliest();
        assert_eq!(o.as_i64(), 0);
        assert!(o < o.next());
        assert_eq!(o.next(), Offset::new(1));
    }
}
