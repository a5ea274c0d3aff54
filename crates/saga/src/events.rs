//! Events exchanged between saga participants on the order stream.

use std::fmt;

use chrono::{DateTime, Utc};
use common::{Money, OrderId, PaymentId, ProductId, UserId};
use event_bus::{BusEvent, Envelope};
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::model::{Order, OrderStatus, Payment, PaymentStatus};

/// Event types known to the saga. Anything else on the stream is skipped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    OrderCreated,
    OrderStatusUpdated,
    PaymentRequired,
    PaymentCompleted,
}

impl EventKind {
    pub const ALL: [EventKind; 4] = [
        EventKind::OrderCreated,
        EventKind::OrderStatusUpdated,
        EventKind::PaymentRequired,
        EventKind::PaymentCompleted,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::OrderCreated => "order_created",
            EventKind::OrderStatusUpdated => "order_status_updated",
            EventKind::PaymentRequired => "payment_required",
            EventKind::PaymentCompleted => "payment_completed",
        }
    }

    /// Maps a wire discriminator onto a known kind.
    pub fn from_wire(event_type: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|k| k.as_str() == event_type)
    }

    /// Decodes the full payload selected by this kind.
    pub fn decode(&self, envelope: &Envelope<'_>) -> Result<SagaEvent> {
        Ok(match self {
            EventKind::OrderCreated | EventKind::OrderStatusUpdated => {
                SagaEvent::Order(envelope.decode_typed()?)
            }
            EventKind::PaymentRequired | EventKind::PaymentCompleted => {
                SagaEvent::Payment(envelope.decode_typed()?)
            }
        })
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Order lifecycle event, emitted by the order participant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderEvent {
    pub event_type: EventKind,
    pub order_id: OrderId,
    #[serde(default)]
    pub product_id: ProductId,
    #[serde(default)]
    pub product_name: String,
    pub supplier_id: UserId,
    pub client_id: UserId,
    pub amount: Money,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<OrderStatus>,
    #[serde(default = "Utc::now")]
    pub timestamp: DateTime<Utc>,
}

impl OrderEvent {
    pub fn created(order: &Order) -> Self {
        Self::from_order(EventKind::OrderCreated, order)
    }

    pub fn status_updated(order: &Order) -> Self {
        Self::from_order(EventKind::OrderStatusUpdated, order)
    }

    fn from_order(event_type: EventKind, order: &Order) -> Self {
        Self {
            event_type,
            order_id: order.id,
            product_id: order.product_id,
            product_name: order.product_name.clone(),
            supplier_id: order.supplier_id,
            client_id: order.client_id,
            amount: order.amount,
            status: Some(order.status),
            timestamp: Utc::now(),
        }
    }
}

/// Payment lifecycle event, emitted by the payment participant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaymentEvent {
    pub event_type: EventKind,
    pub payment_id: PaymentId,
    pub order_id: OrderId,
    pub client_id: UserId,
    pub amount: Money,
    pub status: PaymentStatus,
    #[serde(default = "Utc::now")]
    pub timestamp: DateTime<Utc>,
}

impl PaymentEvent {
    pub fn required(payment: &Payment) -> Self {
        Self::from_payment(EventKind::PaymentRequired, payment)
    }

    pub fn completed(payment: &Payment) -> Self {
        Self::from_payment(EventKind::PaymentCompleted, payment)
    }

    fn from_payment(event_type: EventKind, payment: &Payment) -> Self {
        Self {
            event_type,
            payment_id: payment.id,
            order_id: payment.order_id,
            client_id: payment.client_id,
            amount: payment.amount,
            status: payment.status,
            timestamp: Utc::now(),
        }
    }
}

/// Any event a participant can receive.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum SagaEvent {
    Order(OrderEvent),
    Payment(PaymentEvent),
}

impl SagaEvent {
    /// Decodes a raw record in two phases. `Ok(None)` means the type is not
    /// one the saga knows.
    pub fn decode(raw: &[u8]) -> Result<Option<SagaEvent>> {
        let envelope = Envelope::decode(raw)?;
        match EventKind::from_wire(envelope.event_type()) {
            Some(kind) => kind.decode(&envelope).map(Some),
            None => Ok(None),
        }
    }

    pub fn kind(&self) -> EventKind {
        match self {
            SagaEvent::Order(e) => e.event_type,
            SagaEvent::Payment(e) => e.event_type,
        }
    }

    pub fn order_id(&self) -> OrderId {
        match self {
            SagaEvent::Order(e) => e.order_id,
            SagaEvent::Payment(e) => e.order_id,
        }
    }

    pub fn client_id(&self) -> UserId {
        match self {
            SagaEvent::Order(e) => e.client_id,
            SagaEvent::Payment(e) => e.client_id,
        }
    }
}

impl From<OrderEvent> for SagaEvent {
    fn from(e: OrderEvent) -> Self {
        SagaEvent::Order(e)
    }
}

impl From<PaymentEvent> for SagaEvent {
    fn from(e: PaymentEvent) -> Self {
        SagaEvent::Payment(e)
    }
}

/// All saga events are keyed by order id so one order's history stays ordered.
impl BusEvent for SagaEvent {
    fn event_type(&self) -> &str {
        self.kind().as_str()
    }

    fn partition_key(&self) -> String {
        self.order_id().to_string()
    }
}

impl BusEvent for OrderEvent {
    fn event_type(&self) -> &str {
        self.event_type.as_str()
    }

    fn partition_key(&self) -> String {
        self.order_id.to_string()
    }
}

impl BusEvent for PaymentEvent {
    fn event_type(&self) -> &str {
        self.event_type.as_str()
    }

    fn partition_key(&self) -> String {
        self.order_id.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SagaError;

    #[test]
    fn order_created_decodes_from_wire() {
        let raw = br#"{"event_type":"order_created","order_id":42,"product_id":3,
            "product_name":"Lamp","supplier_id":9,"client_id":7,"amount":100.0,
            "status":"pending","timestamp":"2024-05-01T10:00:00Z","trace":"x"}"#;

        let event = SagaEvent::decode(raw).unwrap().unwrap();
        let SagaEvent::Order(order) = event else {
            panic!("expected order event");
        };
        assert_eq!(order.event_type, EventKind::OrderCreated);
        assert_eq!(order.order_id, OrderId::new(42));
        assert_eq!(order.amount, Money::from_cents(10_000));
        assert_eq!(order.status, Some(OrderStatus::Pending));
    }

    #[test]
    fn payment_event_decodes_from_wire() {
        let raw = br#"{"event_type":"payment_required",
            "payment_id":"0b7e7a3c-8f4e-4a7d-9a51-3f1d2b6c5e4f","order_id":42,
            "client_id":7,"amount":100.0,"status":"pending","timestamp":"2024-05-01T10:00:00Z"}"#;

        let event = SagaEvent::decode(raw).unwrap().unwrap();
        assert_eq!(event.kind(), EventKind::PaymentRequired);
        assert_eq!(event.order_id(), OrderId::new(42));
        assert_eq!(event.partition_key(), "42");
    }

    #[test]
    fn unknown_type_is_not_an_error() {
        assert!(
            SagaEvent::decode(br#"{"event_type":"order_shipped","order_id":1}"#)
                .unwrap()
                .is_none()
        );
    }

    #[test]
    fn missing_required_field_is_malformed() {
        let err = SagaEvent::decode(br#"{"event_type":"payment_completed","order_id":1}"#)
            .unwrap_err();
        assert!(matches!(err, SagaError::MalformedPayload(_)));
    }

    #[test]
    fn encoded_event_carries_discriminator_and_decimal_amount() {
        let order = Order {
            id: OrderId::new(42),
            product_id: ProductId::new(3),
            product_name: "Lamp".into(),
            supplier_id: UserId::new(9),
            client_id: UserId::new(7),
            amount: Money::from_cents(10_000),
            status: OrderStatus::Pending,
        };
        let event = SagaEvent::from(OrderEvent::created(&order));
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["event_type"], "order_created");
        assert_eq!(json["amount"], 100.0);
        assert_eq!(json["client_id"], 7);
        assert!(json.get("timestamp").is_some());
    }
}
