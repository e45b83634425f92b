use log_store::LogStoreError;
use thiserror::Error;

/// Boxed error used to carry failures of service-owned stores.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Failure of a saga handler.
///
/// Every variant is retryable: the entry stays pending and is redelivered
/// until the retry budget is exhausted.
#[derive(Debug, Error)]
pub enum HandlerError {
    /// A business rule rejected the event for now.
    #[error("Rejected: {0}")]
    Rejected(String),

    /// The service's own store failed.
    #[error("Domain error: {0}")]
    Domain(#[source] BoxError),

    /// Publishing a follow-up event failed.
    #[error("Publish error: {0}")]
    Publish(#[from] LogStoreError),

    /// An external collaborator (payment provider, peer service) failed.
    #[error("External service error: {0}")]
    External(String),
}

impl HandlerError {
    /// Wraps a store error.
    pub fn domain(err: impl std::error::Error + Send + Sync + 'static) -> Self {
        HandlerError::Domain(Box::new(err))
    }
}

/// Errors raised by the outbox relay.
#[derive(Debug, Error)]
pub enum OutboxError {
    /// The outbox table could not be read or updated.
    #[error("Outbox store error: {0}")]
    Store(#[source] BoxError),

    /// The event could not be appended to the log.
    #[error("Publish error: {0}")]
    Publish(#[from] LogStoreError),
}

impl OutboxError {
    /// Wraps a store error.
    pub fn store(err: impl std::error::Error + Send + Sync + 'static) -> Self {
        OutboxError::Store(Box::new(err))
    }
}
