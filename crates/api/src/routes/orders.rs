//! Order endpoints. Creating or updating an order publishes the matching event.

use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use common::OrderId;
use saga::{CreateOrderRequest, Order, UpdateOrderStatusRequest};

use crate::error::ApiError;
use crate::state::AppState;

/// POST /orders: create an order and emit `order_created`.
#[tracing::instrument(skip(state, req))]
pub async fn create(
    State(state): State<Arc<AppState>>,
    Json(req): Json<CreateOrderRequest>,
) -> Result<(StatusCode, Json<Order>), ApiError> {
    let order = state.orders.create_order(req).await?;
    Ok((StatusCode::CREATED, Json(order)))
}

/// GET /orders/{id}
#[tracing::instrument(skip(state))]
pub async fn get(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
) -> Result<Json<Order>, ApiError> {
    let order = state.orders.get_order(OrderId::new(id)).await?;
    Ok(Json(order))
}

/// PUT /orders/{id}/status: change the status and emit `order_status_updated`.
#[tracing::instrument(skip(state, req))]
pub async fn update_status(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
    Json(req): Json<UpdateOrderStatusRequest>,
) -> Result<Json<Order>, ApiError> {
    let order = state.orders.update_status(OrderId::new(id), req).await?;
    Ok(Json(order))
}
