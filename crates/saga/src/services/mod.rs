//! Saga participants.

pub mod notification;
pub mod order;
pub mod payment;

pub use notification::NotificationParticipant;
pub use order::{CreateOrderRequest, OrderParticipant, UpdateOrderStatusRequest};
pub use payment::{
    CreatePaymentRequest, MockCardGateway, PaymentGateway, PaymentParticipant, PaymentResponse,
    ProcessPaymentRequest,
};
