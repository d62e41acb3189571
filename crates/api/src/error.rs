//! API error types with HTTP response mapping.

use axum::extract::rejection::JsonRejection;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use domain::DomainError;
use instance_store::InstanceStoreError;
use saga::SagaError;
use thiserror::Error;

/// API-level error type that maps to HTTP responses.
#[derive(Debug, Error)]
pub enum ApiError {
    /// Bad request from the client.
    #[error("{0}")]
    BadRequest(String),

    /// Saga engine error.
    #[error(transparent)]
    Saga(#[from] SagaError),

    /// Credit approval error.
    #[error(transparent)]
    Domain(#[from] DomainError),
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Saga(err) => saga_status(err),
            ApiError::Domain(DomainError::Storage(err)) if err.is_transient() => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            ApiError::Domain(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

fn saga_status(err: &SagaError) -> StatusCode {
    match err {
        SagaError::DefinitionNotFound(_) | SagaError::InstanceNotFound(_) => StatusCode::NOT_FOUND,
        SagaError::InvalidState { .. }
        | SagaError::Store(
            InstanceStoreError::ConcurrencyConflict { .. }
            | InstanceStoreError::IdempotencyConflict { .. },
        ) => StatusCode::CONFLICT,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(error = %self, "request failed");
        }

        let body = serde_json::json!({ "error": self.to_string() });
        (status, axum::Json(body)).into_response()
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        ApiError::BadRequest(rejection.body_text())
    }
}
