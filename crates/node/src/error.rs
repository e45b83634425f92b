//! Node startup errors and HTTP error responses.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use domain::DomainError;
use log_store::LogStoreError;
use saga::SagaError;
use thiserror::Error;

/// Errors that stop a node from starting.
#[derive(Debug, Error)]
pub enum NodeError {
    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Log store error: {0}")]
    LogStore(#[from] LogStoreError),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("Telemetry error: {0}")]
    Telemetry(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Convenience type alias for node results.
pub type Result<T> = std::result::Result<T, NodeError>;

/// API-level error type that maps to HTTP responses.
#[derive(Debug)]
pub enum ApiError {
    /// Resource not found.
    NotFound(String),
    /// Bad request from the client.
    BadRequest(String),
    Domain(DomainError),
    Saga(SagaError),
    LogStore(LogStoreError),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::Domain(err) => domain_error_to_response(err),
            ApiError::Saga(err) => saga_error_to_response(err),
            ApiError::LogStore(err) => {
                tracing::error!(error = %err, "log store request failed");
                (StatusCode::BAD_GATEWAY, err.to_string())
            }
        };

        let body = serde_json::json!({ "error": message });
        (status, axum::Json(body)).into_response()
    }
}

fn domain_error_to_response(err: DomainError) -> (StatusCode, String) {
    match &err {
        DomainError::NotFound { .. } => (StatusCode::NOT_FOUND, err.to_string()),
        DomainError::InvalidStatus { .. } => (StatusCode::BAD_REQUEST, err.to_string()),
        DomainError::InsufficientStock { .. } => (StatusCode::CONFLICT, err.to_string()),
        DomainError::Database(_) | DomainError::Serialization(_) => {
            tracing::error!(error = %err, "internal server error");
            (StatusCode::INTERNAL_SERVER_ERROR, err.to_string())
        }
    }
}

fn saga_error_to_response(err: SagaError) -> (StatusCode, String) {
    match err {
        SagaError::Domain(err) => domain_error_to_response(err),
        SagaError::PaymentNotFound(_) => (StatusCode::NOT_FOUND, err.to_string()),
        SagaError::UnknownTransactionStatus(_) => (StatusCode::BAD_REQUEST, err.to_string()),
        SagaError::Provider(_) | SagaError::Publish(_) => {
            tracing::error!(error = %err, "saga operation failed");
            (StatusCode::BAD_GATEWAY, err.to_string())
        }
    }
}

impl From<DomainError> for ApiError {
    fn from(err: DomainError) -> Self {
        ApiError::Domain(err)
    }
}

impl From<SagaError> for ApiError {
    fn from(err: SagaError) -> Self {
        ApiError::Saga(err)
    }
}

impl From<LogStoreError> for ApiError {
    fn from(err: LogStoreError) -> Self {
        ApiError::LogStore(err)
    }
}
