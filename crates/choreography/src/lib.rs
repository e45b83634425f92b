//! Event choreography over an append-only log.
//!
//! Services announce state changes by appending entries to streams and react
//! to each other's announcements through consumer-group workers. This crate
//! holds the pieces every service shares:
//!
//! - [`StreamEvent`]: typed events encoded as flat field maps
//! - [`Publisher`]: appends events to their stream with a retention cap
//! - [`ConsumerWorker`]: at-least-once consumption with bounded retries
//! - [`DeadLetterRouter`]: parks poison entries in `<stream>:dlq`
//! - [`OutboxPublisher`]: relays committed outbox rows to the log

pub mod dead_letter;
pub mod error;
pub mod event;
pub mod outbox;
pub mod publisher;
pub mod worker;

pub use dead_letter::{DeadLetterRouter, exceeded_retries_reason};
pub use error::{BoxError, HandlerError, OutboxError};
pub use event::{DecodeError, FieldReader, StreamEvent};
pub use outbox::{DrainReport, OutboxMessage, OutboxPublisher, OutboxRoute, OutboxStore};
pub use publisher::{DEFAULT_STREAM_MAX_LEN, Publisher};
pub use worker::{
    ConsumerWorker, CycleReport, EntryHandler, Outcome, Phase, WorkerConfig,
};
