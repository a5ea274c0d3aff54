//! Saga error types.

use event_bus::EventBusError;
use thiserror::Error;

/// Errors that can occur in a saga participant.
#[derive(Debug, Error)]
pub enum SagaError {
    /// The event log or a store is unreachable. Retried after a back-off.
    #[error("Transient infrastructure failure: {0}")]
    TransientInfra(String),

    /// A record could not be decoded into the shape its type requires.
    #[error("Malformed payload: {0}")]
    MalformedPayload(String),

    /// A business rule refused the operation. Never retried.
    #[error("Rejected: {0}")]
    BusinessRejection(String),

    /// An external collaborator (identity service, channel gateway) failed.
    #[error("Downstream unavailable: {0}")]
    DownstreamUnavailable(String),

    /// Request input failed validation.
    #[error("Validation failed: {0}")]
    Validation(String),

    /// The requested entity does not exist.
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },
}

impl SagaError {
    pub fn not_found(entity: &'static str, id: impl ToString) -> Self {
        SagaError::NotFound {
            entity,
            id: id.to_string(),
        }
    }

    /// Returns true if retrying later may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, SagaError::TransientInfra(_))
    }
}

impl From<EventBusError> for SagaError {
    fn from(e: EventBusError) -> Self {
        match e {
            EventBusError::MalformedPayload { .. } | EventBusError::Serialization(_) => {
                SagaError::MalformedPayload(e.to_string())
            }
            other => SagaError::TransientInfra(other.to_string()),
        }
    }
}

impl From<sqlx::Error> for SagaError {
    fn from(e: sqlx::Error) -> Self {
        SagaError::TransientInfra(format!("database: {e}"))
    }
}

impl From<validator::ValidationErrors> for SagaError {
    fn from(e: validator::ValidationErrors) -> Self {
        SagaError::Validation(e.to_string())
    }
}

/// Convenience type alias for saga results.
pub type Result<T> = std::result::Result<T, SagaError>;
