//! Payment endpoints.

use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use common::{PaymentId, UserId};
use saga::{CreatePaymentRequest, Payment, PaymentResponse, ProcessPaymentRequest};

use crate::error::ApiError;
use crate::state::AppState;

fn parse_payment_id(raw: &str) -> Result<PaymentId, ApiError> {
    raw.parse()
        .map_err(|_| ApiError::BadRequest(format!("Invalid payment ID: {raw}")))
}

/// POST /payments: open a payment, or return the order's active one.
#[tracing::instrument(skip(state, req))]
pub async fn create(
    State(state): State<Arc<AppState>>,
    Json(req): Json<CreatePaymentRequest>,
) -> Result<(StatusCode, Json<PaymentResponse>), ApiError> {
    let payment = state.payments.create_payment(req).await?;
    Ok((StatusCode::CREATED, Json(payment)))
}

/// POST /payments/{id}/process: settle a pending payment.
#[tracing::instrument(skip(state, req))]
pub async fn process(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(req): Json<ProcessPaymentRequest>,
) -> Result<Json<Payment>, ApiError> {
    let id = parse_payment_id(&id)?;
    let payment = state.payments.process_payment(id, req).await?;
    Ok(Json(payment))
}

/// GET /payments/{id}
#[tracing::instrument(skip(state))]
pub async fn get(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<Payment>, ApiError> {
    let id = parse_payment_id(&id)?;
    let payment = state.payments.get_payment(id).await?;
    Ok(Json(payment))
}

/// GET /payments/client/{client_id}: newest first.
#[tracing::instrument(skip(state))]
pub async fn by_client(
    State(state): State<Arc<AppState>>,
    Path(client_id): Path<i64>,
) -> Result<Json<Vec<Payment>>, ApiError> {
    let payments = state
        .payments
        .payments_for_client(UserId::new(client_id))
        .await?;
    Ok(Json(payments))
}
