//! Domain error types.

use choreography::{HandlerError, OutboxError};
use thiserror::Error;

/// Errors that can occur during domain operations.
#[derive(Debug, Error)]
pub enum DomainError {
    /// The entity does not exist.
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    /// Applying a stock batch would drive a product below zero.
    #[error("Insufficient stock for product {product_id}")]
    InsufficientStock { product_id: u64 },

    /// A status value could not be parsed.
    #[error("Invalid {entity} status: {value}")]
    InvalidStatus { entity: &'static str, value: String },

    /// An error occurred in the database.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Serialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl DomainError {
    pub(crate) fn not_found(entity: &'static str, id: impl ToString) -> Self {
        DomainError::NotFound {
            entity,
            id: id.to_string(),
        }
    }
}

impl From<DomainError> for HandlerError {
    fn from(err: DomainError) -> Self {
        HandlerError::domain(err)
    }
}

impl From<DomainError> for OutboxError {
    fn from(err: DomainError) -> Self {
        OutboxError::store(err)
    }
}

/// Convenience type alias for domain results.
pub type Result<T> = std::result::Result<T, DomainError>;
