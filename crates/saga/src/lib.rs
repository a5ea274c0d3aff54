//! Choreography saga for order processing.
//!
//! No central coordinator drives the workflow. Each participant consumes the
//! shared `order-events` stream under its own consumer group and reacts to the
//! event types it subscribes to:
//!
//! 1. The order participant emits `order_created` and `order_status_updated`.
//! 2. The payment participant opens a pending payment per order and emits
//!    `payment_required`, then `payment_completed` once the payment settles.
//! 3. The notification participant fans every event out to the client (and,
//!    for new orders, the supplier) over email, SMS and push.
//!
//! Delivery is at least once, so every handler tolerates redelivery.

pub mod channels;
pub mod content;
pub mod error;
pub mod events;
pub mod fanout;
pub mod identity;
pub mod model;
pub mod postgres;
pub mod router;
pub mod services;
pub mod store;

pub use channels::{Channel, ChannelSender, LoggingSender, Message, RecordingSender, parse_channels};
pub use error::{Result, SagaError};
pub use events::{EventKind, OrderEvent, PaymentEvent, SagaEvent};
pub use fanout::{ChannelResult, DeliveryStatus, Notification, Notifier};
pub use identity::{HttpIdentityClient, IdentityLookup, UserInfo, UserRole, resolve_user};
pub use model::{Order, OrderStatus, Payment, PaymentMethod, PaymentStatus, Settlement};
pub use postgres::PostgresPaymentStore;
pub use router::{Disposition, EventRouter, Participant};
pub use services::{
    CreateOrderRequest, CreatePaymentRequest, MockCardGateway, NotificationParticipant,
    OrderParticipant, PaymentGateway, PaymentParticipant, PaymentResponse, ProcessPaymentRequest,
    UpdateOrderStatusRequest,
};
pub use store::{
    Created, InMemoryOrderStore, InMemoryPaymentStore, NewOrder, OrderStore, PaymentStore,
};
