//! Binds a service's reaction to one event type to a consumer worker.

use std::marker::PhantomData;
use std::sync::Arc;

use async_trait::async_trait;
use choreography::{EntryHandler, HandlerError, StreamEvent};

/// A service's reaction to one event type.
///
/// Reactions run at least once per event and must be idempotent.
#[async_trait]
pub trait Reaction<E: StreamEvent>: Send + Sync {
    async fn react(&self, event: E) -> Result<(), HandlerError>;
}

/// The [`EntryHandler`] of a service for the stream of `E`.
pub struct Subscription<S, E> {
    service: Arc<S>,
    _event: PhantomData<fn() -> E>,
}

impl<S, E> Subscription<S, E> {
    pub fn new(service: Arc<S>) -> Self {
        Self {
            service,
            _event: PhantomData,
        }
    }
}

impl<S, E> Clone for Subscription<S, E> {
    fn clone(&self) -> Self {
        Self::new(Arc::clone(&self.service))
    }
}

#[async_trait]
impl<S, E> EntryHandler for Subscription<S, E>
where
    S: Reaction<E> + 'static,
    E: StreamEvent,
{
    type Event = E;

    async fn handle(&self, event: E) -> Result<(), HandlerError> {
        self.service.react(event).await
    }
}
