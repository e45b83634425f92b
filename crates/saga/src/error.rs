//! Saga error types.

use choreography::HandlerError;
use common::OrderId;
use domain::DomainError;
use log_store::LogStoreError;
use thiserror::Error;

use crate::services::payment::ProviderError;

/// Errors that can occur in saga participants.
#[derive(Debug, Error)]
pub enum SagaError {
    /// The service's own store failed.
    #[error("Domain error: {0}")]
    Domain(#[from] DomainError),

    /// A follow-up event could not be published.
    #[error("Publish error: {0}")]
    Publish(#[from] LogStoreError),

    /// The payment provider failed.
    #[error("Payment provider error: {0}")]
    Provider(#[from] ProviderError),

    /// No payment exists for the order.
    #[error("Payment not found for order {0}")]
    PaymentNotFound(OrderId),

    /// A provider notification carried a status this service does not know.
    #[error("Unknown transaction status: {0}")]
    UnknownTransactionStatus(String),
}

impl From<SagaError> for HandlerError {
    fn from(err: SagaError) -> Self {
        match err {
            SagaError::Domain(err) => HandlerError::domain(err),
            SagaError::Publish(err) => HandlerError::Publish(err),
            SagaError::Provider(err) => HandlerError::External(err.to_string()),
            other => HandlerError::Rejected(other.to_string()),
        }
    }
}

/// Convenience type alias for saga results.
pub type Result<T> = std::result::Result<T, SagaError>;
