//! Payment participant: opens a payment per order and settles it on request.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{Datelike, Utc};
use common::{Money, OrderId, PaymentId, UserId};
use event_bus::{EventPublisher, EventPublisherExt};
use serde::{Deserialize, Serialize};
use validator::{Validate, ValidationError};

use crate::error::{Result, SagaError};
use crate::events::{EventKind, OrderEvent, PaymentEvent, SagaEvent};
use crate::model::{Payment, PaymentMethod, PaymentStatus, Settlement};
use crate::router::Participant;
use crate::store::{Created, PaymentStore};

/// Request to open a payment for an order.
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct CreatePaymentRequest {
    #[validate(range(min = 1, message = "Invalid order ID"))]
    pub order_id: i64,
    #[validate(range(min = 1, message = "Invalid client ID"))]
    pub client_id: i64,
    #[validate(range(exclusive_min = 0.0, message = "Invalid amount"))]
    pub amount: f64,
    #[serde(default)]
    pub payment_method: PaymentMethod,
}

/// Request to settle a pending payment.
#[derive(Debug, Clone, Default, Deserialize, Validate)]
#[validate(schema(function = "validate_card_details"))]
pub struct ProcessPaymentRequest {
    #[serde(default)]
    pub payment_method: PaymentMethod,
    #[validate(length(min = 13, max = 19, message = "Invalid card number length"))]
    pub card_number: Option<String>,
    #[validate(range(min = 1, max = 12, message = "Invalid expiry month"))]
    pub expiry_month: Option<u32>,
    pub expiry_year: Option<i32>,
    #[validate(length(min = 3, max = 4, message = "Invalid CVV"))]
    pub cvv: Option<String>,
    pub cardholder_name: Option<String>,
}

fn validate_card_details(request: &ProcessPaymentRequest) -> std::result::Result<(), ValidationError> {
    if request.payment_method != PaymentMethod::Card {
        return Ok(());
    }

    let (Some(_), Some(month), Some(year), Some(_)) = (
        &request.card_number,
        request.expiry_month,
        request.expiry_year,
        &request.cvv,
    ) else {
        return Err(ValidationError::new("card_details")
            .with_message("Card details are required for card payment".into()));
    };

    let today = Utc::now().date_naive();
    if (year, month) < (today.year(), today.month()) {
        return Err(ValidationError::new("card_expired").with_message("Card has expired".into()));
    }
    Ok(())
}

/// Payment as returned from `create_payment`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PaymentResponse {
    #[serde(flatten)]
    pub payment: Payment,
    pub payment_url: String,
}

impl From<Payment> for PaymentResponse {
    fn from(payment: Payment) -> Self {
        let payment_url = format!("/payments/{}/process", payment.id);
        Self {
            payment,
            payment_url,
        }
    }
}

/// Charges a payment instrument.
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    async fn charge(&self, payment: &Payment, request: &ProcessPaymentRequest) -> Settlement;
}

/// Gateway that approves cards starting with `4` and every non-card method.
#[derive(Debug, Clone, Default)]
pub struct MockCardGateway;

pub const DECLINE_REASON: &str = "Payment processing failed";

#[async_trait]
impl PaymentGateway for MockCardGateway {
    async fn charge(&self, payment: &Payment, request: &ProcessPaymentRequest) -> Settlement {
        tracing::debug!(payment_id = %payment.id, method = request.payment_method.as_str(), "charging");

        let approved = match request.card_number.as_deref() {
            Some(number) if request.payment_method == PaymentMethod::Card => number.starts_with('4'),
            _ => true,
        };

        if approved {
            Settlement::Completed {
                transaction_id: format!("txn_{}", uuid::Uuid::new_v4().simple()),
            }
        } else {
            Settlement::Failed {
                reason: DECLINE_REASON.to_string(),
            }
        }
    }
}

/// Owns payments; reacts to `order_created` and emits `payment_required`
/// and `payment_completed`.
pub struct PaymentParticipant {
    store: Arc<dyn PaymentStore>,
    gateway: Arc<dyn PaymentGateway>,
    publisher: Arc<dyn EventPublisher>,
    stream: String,
}

impl PaymentParticipant {
    pub fn new(
        store: Arc<dyn PaymentStore>,
        gateway: Arc<dyn PaymentGateway>,
        publisher: Arc<dyn EventPublisher>,
        stream: impl Into<String>,
    ) -> Self {
        Self {
            store,
            gateway,
            publisher,
            stream: stream.into(),
        }
    }

    /// Opens the payment for a newly created order.
    ///
    /// Redelivery for an order that already has a payment in any status is a
    /// no-op: nothing is stored and nothing is emitted.
    #[tracing::instrument(skip(self, event), fields(order_id = %event.order_id))]
    pub async fn handle_order_created(&self, event: &OrderEvent) -> Result<Option<Payment>> {
        if !event.order_id.is_valid() || event.amount.is_negative() {
            return Err(SagaError::Validation(format!(
                "order_created for order {} carries invalid id or amount",
                event.order_id
            )));
        }

        let payment = Payment::pending(
            event.order_id,
            event.client_id,
            event.amount,
            PaymentMethod::Card,
        );

        match self.store.create(payment).await? {
            Created::Existing(existing) => {
                tracing::info!(payment_id = %existing.id, "payment already exists, skipping");
                Ok(None)
            }
            Created::New(payment) => {
                metrics::counter!("payments_created_total", "source" => "event").increment(1);
                tracing::info!(payment_id = %payment.id, "payment created");
                self.emit(PaymentEvent::required(&payment)).await;
                Ok(Some(payment))
            }
        }
    }

    /// Returns the order's payment in whatever status, creating one if needed.
    ///
    /// A newly created payment emits `payment_required` so that its eventual
    /// `payment_completed` follows a request on the stream.
    #[tracing::instrument(skip(self, request), fields(order_id = request.order_id))]
    pub async fn create_payment(&self, request: CreatePaymentRequest) -> Result<PaymentResponse> {
        request.validate()?;
        let amount = Money::from_major(request.amount)
            .ok_or_else(|| SagaError::Validation("Invalid amount".to_string()))?;

        let payment = Payment::pending(
            OrderId::new(request.order_id),
            UserId::new(request.client_id),
            amount,
            request.payment_method,
        );

        let payment = match self.store.create(payment).await? {
            Created::Existing(existing) => existing,
            Created::New(payment) => {
                metrics::counter!("payments_created_total", "source" => "http").increment(1);
                tracing::info!(payment_id = %payment.id, "payment created");
                self.emit(PaymentEvent::required(&payment)).await;
                payment
            }
        };
        Ok(payment.into())
    }

    /// Settles a pending payment and emits `payment_completed`.
    #[tracing::instrument(skip(self, request))]
    pub async fn process_payment(
        &self,
        id: PaymentId,
        request: ProcessPaymentRequest,
    ) -> Result<Payment> {
        request.validate()?;

        let payment = self.get_payment(id).await?;
        if payment.status != PaymentStatus::Pending {
            return Err(SagaError::BusinessRejection(format!(
                "payment {id} is {}, not pending",
                payment.status
            )));
        }

        let settlement = self.gateway.charge(&payment, &request).await;
        let settled = self.store.settle(id, settlement).await?.ok_or_else(|| {
            SagaError::BusinessRejection(format!("payment {id} was settled concurrently"))
        })?;

        metrics::counter!("payments_settled_total", "status" => settled.status.as_str())
            .increment(1);
        tracing::info!(status = %settled.status, order_id = %settled.order_id, "payment settled");

        self.emit(PaymentEvent::completed(&settled)).await;
        Ok(settled)
    }

    pub async fn get_payment(&self, id: PaymentId) -> Result<Payment> {
        self.store
            .get(id)
            .await?
            .ok_or_else(|| SagaError::not_found("Payment", id))
    }

    pub async fn payments_for_client(&self, client_id: UserId) -> Result<Vec<Payment>> {
        if !client_id.is_valid() {
            return Err(SagaError::Validation("Invalid client ID".to_string()));
        }
        self.store.for_client(client_id).await
    }

    /// Publish failures are logged; the stored payment stands.
    async fn emit(&self, event: PaymentEvent) {
        let event = SagaEvent::from(event);
        if let Err(e) = self.publisher.publish_event(&self.stream, &event).await {
            tracing::error!(
                event_type = %event.kind(),
                order_id = %event.order_id(),
                error = %e,
                "failed to publish payment event"
            );
        }
    }
}

#[async_trait]
impl Participant for PaymentParticipant {
    fn name(&self) -> &str {
        "payment"
    }

    fn produces(&self) -> &[EventKind] {
        &[EventKind::PaymentRequired, EventKind::PaymentCompleted]
    }

    fn subscribes(&self) -> &[EventKind] {
        &[EventKind::OrderCreated]
    }

    async fn handle(&self, event: SagaEvent) -> Result<()> {
        match event {
            SagaEvent::Order(order) if order.event_type == EventKind::OrderCreated => {
                self.handle_order_created(&order).await.map(|_| ())
            }
            other => {
                tracing::debug!(event_type = %other.kind(), "ignored by payment participant");
                Ok(())
            }
        }
    }
}
