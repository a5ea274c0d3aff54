//! Order participant: stores orders and announces their lifecycle.

use std::sync::Arc;

use common::{Money, OrderId, ProductId, UserId};
use event_bus::{EventPublisher, EventPublisherExt};
use serde::Deserialize;
use validator::Validate;

use crate::error::{Result, SagaError};
use crate::events::{OrderEvent, SagaEvent};
use crate::model::{Order, OrderStatus};
use crate::store::{NewOrder, OrderStore};

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct CreateOrderRequest {
    #[validate(range(min = 1, message = "Invalid product ID"))]
    pub product_id: i64,
    #[serde(default)]
    pub product_name: String,
    #[validate(range(min = 1, message = "Invalid supplier ID"))]
    pub supplier_id: i64,
    #[validate(range(min = 1, message = "Invalid client ID"))]
    pub client_id: i64,
    #[validate(range(min = 0.0, message = "Invalid amount"))]
    pub amount: f64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct UpdateOrderStatusRequest {
    pub status: String,
}

/// Emits `order_created` and `order_status_updated` keyed by order id.
/// It consumes nothing from the stream.
pub struct OrderParticipant {
    store: Arc<dyn OrderStore>,
    publisher: Arc<dyn EventPublisher>,
    stream: String,
}

impl OrderParticipant {
    pub fn new(
        store: Arc<dyn OrderStore>,
        publisher: Arc<dyn EventPublisher>,
        stream: impl Into<String>,
    ) -> Self {
        Self {
            store,
            publisher,
            stream: stream.into(),
        }
    }

    #[tracing::instrument(skip(self, request), fields(client_id = request.client_id))]
    pub async fn create_order(&self, request: CreateOrderRequest) -> Result<Order> {
        request.validate()?;
        let amount = Money::from_major(request.amount)
            .ok_or_else(|| SagaError::Validation("Invalid amount".to_string()))?;

        let order = self
            .store
            .create(NewOrder {
                product_id: ProductId::new(request.product_id),
                product_name: request.product_name,
                supplier_id: UserId::new(request.supplier_id),
                client_id: UserId::new(request.client_id),
                amount,
            })
            .await?;

        tracing::info!(order_id = %order.id, "order created");
        self.emit(OrderEvent::created(&order)).await;
        Ok(order)
    }

    #[tracing::instrument(skip(self, request))]
    pub async fn update_status(
        &self,
        id: OrderId,
        request: UpdateOrderStatusRequest,
    ) -> Result<Order> {
        let status: OrderStatus = request.status.parse()?;

        let order = self
            .store
            .update_status(id, status)
            .await?
            .ok_or_else(|| SagaError::not_found("Order", id))?;

        tracing::info!(%status, "order status updated");
        self.emit(OrderEvent::status_updated(&order)).await;
        Ok(order)
    }

    pub async fn get_order(&self, id: OrderId) -> Result<Order> {
        self.store
            .get(id)
            .await?
            .ok_or_else(|| SagaError::not_found("Order", id))
    }

    async fn emit(&self, event: OrderEvent) {
        let event = SagaEvent::from(event);
        if let Err(e) = self.publisher.publish_event(&self.stream, &event).await {
            tracing::error!(
                event_type = %event.kind(),
                order_id = %event.order_id(),
                error = %e,
                "failed to publish order event"
            );
        }
    }
}
