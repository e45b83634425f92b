//! Generic consumer-group worker.
//!
//! A worker owns one `(stream, group, consumer)` triple. It starts in the
//! backlog phase, re-reading entries this consumer was handed before but never
//! acknowledged, and switches to the live phase once the backlog is drained.
//! Live reads block for new entries. Entries whose handler failed stay pending;
//! after a short backoff the worker sweeps the backlog again, so a failing
//! entry is retried until its delivery count reaches the retry budget and it is
//! dead-lettered.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use log_store::{Entry, EntryId, LogStore, LogStoreExt, ReadCursor, ReadGroup};
use tokio::sync::watch;

use crate::dead_letter::{DeadLetterRouter, exceeded_retries_reason};
use crate::error::HandlerError;
use crate::event::StreamEvent;

/// Deliveries after which an entry is dead-lettered instead of handled.
pub const DEFAULT_RETRY_BUDGET: u64 = 5;
/// How long a live read waits for a new entry.
pub const DEFAULT_BLOCK_TIMEOUT: Duration = Duration::from_secs(5);
/// Entries fetched per read.
pub const DEFAULT_BATCH_SIZE: usize = 10;
/// Pause before re-sweeping the backlog after a failure.
pub const DEFAULT_RETRY_BACKOFF: Duration = Duration::from_secs(1);

/// Per-worker settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerConfig {
    pub group: String,
    pub consumer: String,
    pub retry_budget: u64,
    pub block_timeout: Duration,
    pub batch_size: usize,
    pub retry_backoff: Duration,
}

impl WorkerConfig {
    pub fn new(group: impl Into<String>, consumer: impl Into<String>) -> Self {
        Self {
            group: group.into(),
            consumer: consumer.into(),
            retry_budget: DEFAULT_RETRY_BUDGET,
            block_timeout: DEFAULT_BLOCK_TIMEOUT,
            batch_size: DEFAULT_BATCH_SIZE,
            retry_backoff: DEFAULT_RETRY_BACKOFF,
        }
    }

    pub fn with_retry_budget(mut self, retry_budget: u64) -> Self {
        self.retry_budget = retry_budget;
        self
    }

    pub fn with_block_timeout(mut self, block_timeout: Duration) -> Self {
        self.block_timeout = block_timeout;
        self
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    pub fn with_retry_backoff(mut self, retry_backoff: Duration) -> Self {
        self.retry_backoff = retry_backoff;
        self
    }
}

/// Reacts to one typed event.
///
/// Returning an error leaves the entry pending for redelivery. Handlers must
/// therefore tolerate seeing the same event more than once.
#[async_trait]
pub trait EntryHandler: Send + Sync {
    type Event: StreamEvent;

    async fn handle(&self, event: Self::Event) -> Result<(), HandlerError>;
}

#[async_trait]
impl<H: EntryHandler + ?Sized> EntryHandler for Arc<H> {
    type Event = H::Event;

    async fn handle(&self, event: Self::Event) -> Result<(), HandlerError> {
        (**self).handle(event).await
    }
}

/// Where the next read starts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Re-reading this consumer's unacknowledged entries after `after`.
    Backlog { after: EntryId },
    /// Waiting for entries never delivered to the group.
    Live,
}

/// What happened to a single delivered entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Handled and acknowledged.
    Acked,
    /// Could not be decoded; acknowledged without handling.
    Dropped,
    /// Exceeded the retry budget; copied to the dead-letter stream and acknowledged.
    DeadLettered,
    /// Left pending for a later delivery.
    Retrying,
}

/// Tally of one read cycle.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CycleReport {
    pub acked: usize,
    pub dropped: usize,
    pub dead_lettered: usize,
    pub retrying: usize,
}

impl CycleReport {
    fn record(&mut self, outcome: Outcome) {
        match outcome {
            Outcome::Acked => self.acked += 1,
            Outcome::Dropped => self.dropped += 1,
            Outcome::DeadLettered => self.dead_lettered += 1,
            Outcome::Retrying => self.retrying += 1,
        }
    }

    /// Number of entries delivered in the cycle.
    pub fn delivered(&self) -> usize {
        self.acked + self.dropped + self.dead_lettered + self.retrying
    }
}

/// Consumes one stream on behalf of one consumer group.
pub struct ConsumerWorker<L, H> {
    store: L,
    dead_letters: DeadLetterRouter<L>,
    handler: H,
    config: WorkerConfig,
    phase: Phase,
    retry_pending: bool,
}

impl<L, H> ConsumerWorker<L, H>
where
    L: LogStore + Clone,
    H: EntryHandler,
{
    /// Creates a worker for the stream of `H::Event`, starting with a backlog sweep.
    pub fn new(store: L, handler: H, config: WorkerConfig) -> Self {
        Self {
            dead_letters: DeadLetterRouter::new(store.clone()),
            store,
            handler,
            config,
            phase: Phase::Backlog {
                after: EntryId::ZERO,
            },
            retry_pending: false,
        }
    }

    /// Stream this worker consumes.
    pub fn stream(&self) -> &'static str {
        H::Event::STREAM
    }

    pub fn config(&self) -> &WorkerConfig {
        &self.config
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// Starts a new sweep of the backlog from its beginning.
    pub fn restart_backlog(&mut self) {
        self.phase = Phase::Backlog {
            after: EntryId::ZERO,
        };
        self.retry_pending = false;
    }

    /// Performs one read and processes what it returned.
    ///
    /// An empty backlog read switches the worker to the live phase. An empty
    /// live read (timeout) leaves the phase unchanged.
    pub async fn poll_once(&mut self) -> log_store::Result<CycleReport> {
        let (cursor, block) = match self.phase {
            Phase::Backlog { after } => (ReadCursor::Pending { after }, None),
            Phase::Live => (ReadCursor::New, Some(self.config.block_timeout)),
        };
        let request = ReadGroup {
            stream: H::Event::STREAM,
            group: &self.config.group,
            consumer: &self.config.consumer,
            count: self.config.batch_size,
            block,
        };
        let entries = self.store.read_group(&request, cursor).await?;

        let mut report = CycleReport::default();
        let Some(last) = entries.last().map(|entry| entry.id) else {
            if matches!(self.phase, Phase::Backlog { .. }) {
                tracing::debug!(stream = H::Event::STREAM, "backlog drained");
                self.phase = Phase::Live;
            }
            return Ok(report);
        };

        for entry in &entries {
            report.record(self.process(entry).await);
        }

        if report.retrying > 0 {
            self.retry_pending = true;
        }
        if matches!(self.phase, Phase::Backlog { .. }) {
            self.phase = Phase::Backlog { after: last };
        }
        Ok(report)
    }

    /// Runs until `shutdown` turns true.
    ///
    /// Shutdown is observed between reads, so an in-flight read and the
    /// handlers of the entries it returned always complete.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        let stream = H::Event::STREAM;
        tracing::info!(
            stream,
            group = %self.config.group,
            consumer = %self.config.consumer,
            "consumer worker started"
        );

        while !*shutdown.borrow() {
            if self.phase == Phase::Live && self.retry_pending {
                if !pause(&mut shutdown, self.config.retry_backoff).await {
                    break;
                }
                self.restart_backlog();
            }

            if let Err(err) = self.poll_once().await {
                tracing::error!(stream, error = %err, "stream read failed");
                if !pause(&mut shutdown, self.config.retry_backoff).await {
                    break;
                }
            }
        }

        tracing::info!(stream, group = %self.config.group, "consumer worker stopped");
    }

    async fn process(&self, entry: &Entry) -> Outcome {
        let stream = H::Event::STREAM;
        let group = self.config.group.as_str();

        let delivery_count = match self.store.delivery_count(stream, group, entry.id).await {
            Ok(count) => count,
            Err(err) => {
                tracing::warn!(
                    stream,
                    entry_id = %entry.id,
                    error = %err,
                    "failed to read delivery count"
                );
                return Outcome::Retrying;
            }
        };

        if delivery_count >= self.config.retry_budget {
            let reason = exceeded_retries_reason(self.config.retry_budget);
            if let Err(err) = self.dead_letters.move_to_dlq(stream, entry, &reason).await {
                tracing::error!(
                    stream,
                    entry_id = %entry.id,
                    error = %err,
                    "failed to dead-letter entry"
                );
            }
            metrics::counter!(
                "bus_entries_dead_lettered_total",
                "stream" => stream,
                "group" => self.config.group.clone()
            )
            .increment(1);
            return if self.ack(entry.id).await {
                Outcome::DeadLettered
            } else {
                Outcome::Retrying
            };
        }

        let event = match H::Event::from_fields(&entry.fields) {
            Ok(event) => event,
            Err(err) => {
                tracing::warn!(stream, entry_id = %entry.id, error = %err, "dropping malformed entry");
                metrics::counter!(
                    "bus_entries_malformed_total",
                    "stream" => stream,
                    "group" => self.config.group.clone()
                )
                .increment(1);
                return if self.ack(entry.id).await {
                    Outcome::Dropped
                } else {
                    Outcome::Retrying
                };
            }
        };

        let started = Instant::now();
        let result = self.handler.handle(event).await;
        metrics::histogram!("bus_handler_duration_seconds", "stream" => stream)
            .record(started.elapsed().as_secs_f64());

        match result {
            Ok(()) => {
                tracing::debug!(stream, entry_id = %entry.id, delivery_count, "entry handled");
                if self.ack(entry.id).await {
                    Outcome::Acked
                } else {
                    Outcome::Retrying
                }
            }
            Err(err) => {
                tracing::warn!(
                    stream,
                    entry_id = %entry.id,
                    delivery_count,
                    error = %err,
                    "handler failed, entry left pending"
                );
                metrics::counter!(
                    "bus_entries_failed_total",
                    "stream" => stream,
                    "group" => self.config.group.clone()
                )
                .increment(1);
                Outcome::Retrying
            }
        }
    }

    async fn ack(&self, id: EntryId) -> bool {
        let stream = H::Event::STREAM;
        match self.store.ack(stream, &self.config.group, &[id]).await {
            Ok(_) => {
                metrics::counter!(
                    "bus_entries_acked_total",
                    "stream" => stream,
                    "group" => self.config.group.clone()
                )
                .increment(1);
                true
            }
            Err(err) => {
                tracing::error!(stream, entry_id = %id, error = %err, "ack failed");
                false
            }
        }
    }
}

/// Sleeps for `duration`; returns false if shutdown was requested meanwhile.
async fn pause(shutdown: &mut watch::Receiver<bool>, duration: Duration) -> bool {
    let slept = tokio::select! {
        _ = tokio::time::sleep(duration) => true,
        changed = shutdown.changed() => changed.is_ok(),
    };
    slept && !*shutdown.borrow()
}
