//! Error handling module
//!
//! HTTP-facing error type and response conversion.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

use crate::domain::LedgerError;

/// Application-wide Result type
pub type AppResult<T> = Result<T, AppError>;

/// Application error types
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    // Client errors (4xx)
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Invalid header: {0}")]
    InvalidHeader(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    // Ledger errors
    #[error(transparent)]
    Ledger(#[from] LedgerError),
}

/// Error response body
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub error_code: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

impl AppError {
    /// HTTP status, stable error code and optional details
    fn parts(&self) -> (StatusCode, &'static str, Option<String>) {
        match self {
            AppError::InvalidRequest(msg) => {
                (StatusCode::BAD_REQUEST, "invalid_request", Some(msg.clone()))
            }
            AppError::InvalidHeader(header) => {
                (StatusCode::BAD_REQUEST, "invalid_header", Some(header.clone()))
            }
            AppError::Forbidden(msg) => (StatusCode::FORBIDDEN, "forbidden", Some(msg.clone())),

            AppError::Ledger(err) => match err {
                LedgerError::Validation { field, .. } => {
                    (StatusCode::BAD_REQUEST, "validation_failed", Some(field.clone()))
                }
                LedgerError::InsufficientFunds { required, available } => (
                    StatusCode::BAD_REQUEST,
                    "insufficient_funds",
                    Some(format!("required {required}, available {available}")),
                ),
                LedgerError::NotFound { entity, id } => {
                    (StatusCode::NOT_FOUND, "not_found", Some(format!("{entity} {id}")))
                }
                LedgerError::Conflict { .. } => (StatusCode::CONFLICT, "conflict", None),
                LedgerError::ProviderUnavailable { provider, .. } => (
                    StatusCode::SERVICE_UNAVAILABLE,
                    "provider_unavailable",
                    Some(provider.to_string()),
                ),
                LedgerError::Infrastructure {
                    correlation_id,
                    message,
                } => {
                    tracing::error!(correlation_id = %correlation_id, "Infrastructure error: {}", message);
                    (
                        StatusCode::INTERNAL_SERVER_ERROR,
                        "internal_error",
                        Some(correlation_id.to_string()),
                    )
                }
            },
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error_code, details) = self.parts();

        // Infrastructure details stay in the logs
        let error = match &self {
            AppError::Ledger(LedgerError::Infrastructure { correlation_id, .. }) => {
                format!("Internal error (correlation id {correlation_id})")
            }
            other => other.to_string(),
        };

        let body = ErrorResponse {
            error,
            error_code: error_code.to_string(),
            details,
        };

        (status, Json(body)).into_response()
    }
}
