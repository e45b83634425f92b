use log_store::{AppendOptions, EntryId, Fields, LogStore, Result, Trim};

use crate::event::StreamEvent;

/// Retention cap applied to producer-facing streams.
pub const DEFAULT_STREAM_MAX_LEN: usize = 1000;

/// Appends events to their streams.
#[derive(Debug, Clone)]
pub struct Publisher<L> {
    store: L,
    trim: Option<Trim>,
}

impl<L: LogStore> Publisher<L> {
    /// Creates a publisher that trims streams to roughly
    /// [`DEFAULT_STREAM_MAX_LEN`] entries.
    pub fn new(store: L) -> Self {
        Self {
            store,
            trim: Some(Trim::ApproxMaxLen(DEFAULT_STREAM_MAX_LEN)),
        }
    }

    /// Replaces the retention cap. `None` keeps every entry.
    pub fn with_trim(mut self, trim: Option<Trim>) -> Self {
        self.trim = trim;
        self
    }

    /// Returns the underlying log store.
    pub fn store(&self) -> &L {
        &self.store
    }

    /// Encodes and appends an event to its stream.
    pub async fn publish<E: StreamEvent>(&self, event: &E) -> Result<EntryId> {
        self.publish_fields(E::STREAM, &event.to_fields()).await
    }

    /// Appends raw fields to a stream.
    pub async fn publish_fields(&self, stream: &str, fields: &Fields) -> Result<EntryId> {
        let options = match self.trim {
            Some(trim) => AppendOptions::capped(trim),
            None => AppendOptions::new(),
        };
        let id = self.store.append(stream, fields, options).await?;
        metrics::counter!("bus_entries_published_total", "stream" => stream.to_string())
            .increment(1);
        tracing::debug!(stream, entry_id = %id, "event published");
        Ok(id)
    }
}
