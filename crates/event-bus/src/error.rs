use thiserror::Error;

use crate::Partition;

/// Errors that can occur when interacting with the event bus.
#[derive(Debug, Error)]
pub enum EventBusError {
    /// A record does not match the shape expected for its declared type.
    ///
    /// `event_type` is `None` when the discriminator itself could not be read.
    #[error("Malformed payload (event_type: {}): {reason}", event_type.as_deref().unwrap_or("<missing>"))]
    MalformedPayload {
        event_type: Option<String>,
        reason: String,
    },

    /// The log backend is temporarily unreachable.
    #[error("Event log unavailable: {0}")]
    Unavailable(String),

    /// The stream has not been created.
    #[error("Unknown stream: {0}")]
    UnknownStream(String),

    /// The requested partition does not exist on the stream.
    #[error("Partition {partition} out of range for stream {stream} ({partitions} partitions)")]
    PartitionOutOfRange {
        stream: String,
        partition: Partition,
        partitions: u32,
    },

    /// The member is not part of the consumer group (it left or was never joined).
    #[error("Member {member} is not part of group {group}")]
    UnknownMember { group: String, member: String },

    /// The member acted on an assignment from an older group generation.
    #[error(
        "Stale generation for member {member} of group {group}: held {held}, current {current}"
    )]
    StaleGeneration {
        group: String,
        member: String,
        held: u64,
        current: u64,
    },

    /// A database error occurred.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// A database migration error occurred.
    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    /// A serialization error occurred while encoding an event.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl EventBusError {
    /// Creates a malformed payload error.
    pub fn malformed(event_type: Option<&str>, reason: impl Into<String>) -> Self {
        EventBusError::MalformedPayload {
            event_type: event_type.map(str::to_string),
            reason: reason.into(),
        }
    }

    /// Returns true if retrying the connection may succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            EventBusError::Unavailable(_) => true,
            EventBusError::Database(e) => matches!(
                e,
                sqlx::Error::Io(_)
                    | sqlx::Error::PoolTimedOut
                    | sqlx::Error::PoolClosed
                    | sqlx::Error::WorkerCrashed
                    | sqlx::Error::Tls(_)
            ),
            _ => false,
        }
    }

    /// Returns true if the error means the member must rejoin its group.
    pub fn requires_rejoin(&self) -> bool {
        matches!(
            self,
            EventBusError::UnknownMember { .. } | EventBusError::StaleGeneration { .. }
        )
    }
}

/// Result type for event bus operations.
pub type Result<T> = std::result::Result<T, EventBusError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn malformed_without_type_mentions_missing_discriminator() {
        let err = EventBusError::malformed(None, "expected value at line 1");
        assert_eq!(
            err.to_string(),
            "Malformed payload (event_type: <missing>): expected value at line 1"
        );
    }

    #[test]
    fn transient_classification() {
        assert!(EventBusError::Unavailable("broker down".into()).is_transient());
        assert!(EventBusError::Database(sqlx::Error::PoolTimedOut).is_transient());
        assert!(!EventBusError::UnknownStream("order-events".into()).is_transient());
        assert!(!EventBusError::malformed(Some("order_created"), "missing order_id").is_transient());
    }

    #[test]
    fn rejoin_classification() {
        let stale = EventBusError::StaleGeneration {
            group: "payment-service".into(),
            member: "m-1".into(),
            held: 1,
            current: 2,
        };
        assert!(stale.requires_rejoin());
        assert!(!EventBusError::Unavailable("x".into()).requires_rejoin());
    }
}
