//! API error types with HTTP response mapping.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use saga::SagaError;

/// API-level error type that maps to HTTP responses.
#[derive(Debug)]
pub enum ApiError {
    /// Malformed path or query input, rejected before any saga call.
    BadRequest(String),
    /// Saga step error.
    Saga(SagaError),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::Saga(err) => saga_error_to_response(err),
        };

        let body = serde_json::json!({ "error": message });
        (status, axum::Json(body)).into_response()
    }
}

fn saga_error_to_response(err: SagaError) -> (StatusCode, String) {
    match &err {
        SagaError::Validation(msg) => (StatusCode::BAD_REQUEST, msg.clone()),
        SagaError::MalformedPayload(_) => (StatusCode::BAD_REQUEST, err.to_string()),
        SagaError::NotFound { .. } => (StatusCode::NOT_FOUND, err.to_string()),
        SagaError::BusinessRejection(_) => (StatusCode::CONFLICT, err.to_string()),
        SagaError::TransientInfra(_) | SagaError::DownstreamUnavailable(_) => {
            tracing::warn!(error = %err, "dependency unavailable");
            (StatusCode::SERVICE_UNAVAILABLE, err.to_string())
        }
    }
}

impl From<SagaError> for ApiError {
    fn from(err: SagaError) -> Self {
        ApiError::Saga(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn status_of(err: ApiError) -> StatusCode {
        err.into_response().status()
    }

    #[test]
    fn saga_errors_map_to_status_codes() {
        assert_eq!(
            status_of(SagaError::Validation("Invalid amount".into()).into()),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            status_of(SagaError::not_found("Payment", "abc").into()),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            status_of(SagaError::BusinessRejection("not pending".into()).into()),
            StatusCode::CONFLICT
        );
        assert_eq!(
            status_of(SagaError::TransientInfra("pool closed".into()).into()),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            status_of(ApiError::BadRequest("Invalid payment ID: x".into())),
            StatusCode::BAD_REQUEST
        );
    }
}
