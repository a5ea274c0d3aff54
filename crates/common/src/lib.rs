//! Identifiers and value types shared by every saga participant.

mod money;
mod types;

pub use money::Money;
pub use types::{OrderId, PaymentId, ProductId, UserId};
