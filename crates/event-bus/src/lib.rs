pub mod consumer;
pub mod coordinator;
pub mod envelope;
pub mod error;
pub mod log;
pub mod memory;
pub mod postgres;
pub mod publisher;
pub mod record;

pub use consumer::{ConsumerConfig, ConsumerGroup, HandlerResult, InitialOffset, MessageHandler};
pub use coordinator::{Assignment, CommitFence, GroupCoordinator};
pub use envelope::{BusEvent, Envelope, decode_envelope, encode};
pub use error::{EventBusError, Result};
pub use log::EventLog;
pub use memory::InMemoryEventLog;
pub use postgres::PostgresEventLog;
pub use publisher::{EventPublisher, EventPublisherExt, LogPublisher};
pub use record::{Ack, Offset, Partition, Record};
