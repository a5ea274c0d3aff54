use std::sync::Arc;

use saga::{OrderParticipant, PaymentParticipant};

/// Storage behind the event log and payment store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backend {
    Memory,
    Postgres,
}

impl Backend {
    pub fn as_str(&self) -> &'static str {
        match self {
            Backend::Memory => "memory",
            Backend::Postgres => "postgres",
        }
    }
}

/// Shared application state accessible from all handlers.
pub struct AppState {
    pub orders: Arc<OrderParticipant>,
    pub payments: Arc<PaymentParticipant>,
    pub backend: Backend,
}
