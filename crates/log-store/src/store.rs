use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::{Entry, EntryId, Fields, Result};

/// Retention cap applied to a stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trim {
    /// Keep exactly the newest `n` entries.
    MaxLen(usize),
    /// Keep at least the newest `n` entries; the store may retain more so
    /// that trimming never has to split its internal storage units.
    ApproxMaxLen(usize),
}

impl Trim {
    /// Returns the requested cap.
    pub fn cap(&self) -> usize {
        match self {
            Trim::MaxLen(n) | Trim::ApproxMaxLen(n) => *n,
        }
    }
}

/// Options for appending an entry.
#[derive(Debug, Clone, Copy, Default)]
pub struct AppendOptions {
    /// Trim applied to the stream as part of the append.
    pub trim: Option<Trim>,
}

impl AppendOptions {
    /// Appends without trimming.
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends and trims the stream to the given cap.
    pub fn capped(trim: Trim) -> Self {
        Self { trim: Some(trim) }
    }
}

/// Where a newly created consumer group starts reading.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GroupStart {
    /// Deliver every entry already in the stream.
    Beginning,
    /// Deliver only entries appended after the group was created.
    Tail,
}

/// Position a consumer reads from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadCursor {
    /// Entries previously delivered to this consumer and not yet
    /// acknowledged, with IDs greater than `after`. Every read from the
    /// pending history increments the delivery count of the returned entries.
    Pending { after: EntryId },
    /// Entries never delivered to the group.
    New,
}

impl ReadCursor {
    /// Start of this consumer's pending history.
    pub fn pending_start() -> Self {
        ReadCursor::Pending {
            after: EntryId::ZERO,
        }
    }
}

/// Parameters of a consumer-group read.
#[derive(Debug, Clone, Copy)]
pub struct ReadGroup<'a> {
    pub stream: &'a str,
    pub group: &'a str,
    pub consumer: &'a str,
    /// Maximum number of entries returned.
    pub count: usize,
    /// How long a read of [`ReadCursor::New`] may wait for an entry to
    /// arrive. `None` returns immediately. Pending reads never block.
    pub block: Option<Duration>,
}

/// An entry in a group's pending entries list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingEntry {
    pub id: EntryId,
    pub consumer: String,
    /// Number of times the entry has been delivered.
    pub delivery_count: u64,
    /// Time since the last delivery.
    pub idle: Duration,
}

/// Append-only partitioned log with consumer-group bookkeeping.
///
/// Implementations are shared by every worker of a process and must be
/// thread-safe.
#[async_trait]
pub trait LogStore: Send + Sync {
    /// Appends an entry and returns its auto-generated ID.
    ///
    /// Appending never depends on consumer state; a stream without groups
    /// simply accumulates entries up to its trim cap.
    async fn append(&self, stream: &str, fields: &Fields, options: AppendOptions)
    -> Result<EntryId>;

    /// Trims a stream and returns the number of entries removed.
    async fn trim(&self, stream: &str, trim: Trim) -> Result<usize>;

    /// Number of entries currently retained by a stream.
    async fn len(&self, stream: &str) -> Result<usize>;

    /// Returns up to `count` of the oldest retained entries.
    async fn range(&self, stream: &str, count: usize) -> Result<Vec<Entry>>;

    /// Creates a consumer group, creating the stream if needed.
    ///
    /// Creating a group that already exists succeeds without changes.
    async fn create_group(&self, stream: &str, group: &str, start: GroupStart) -> Result<()>;

    /// Reads entries for a consumer of a group.
    async fn read_group(&self, request: &ReadGroup<'_>, cursor: ReadCursor) -> Result<Vec<Entry>>;

    /// Looks up one entry in the group's pending list.
    async fn pending_entry(
        &self,
        stream: &str,
        group: &str,
        id: EntryId,
    ) -> Result<Option<PendingEntry>>;

    /// Returns up to `count` entries of the group's pending list, oldest first.
    async fn pending(&self, stream: &str, group: &str, count: usize) -> Result<Vec<PendingEntry>>;

    /// Acknowledges entries, removing them from the group's pending list.
    ///
    /// Returns how many entries were actually pending.
    async fn ack(&self, stream: &str, group: &str, ids: &[EntryId]) -> Result<usize>;
}

/// Convenience methods for log stores.
#[async_trait]
pub trait LogStoreExt: LogStore {
    /// Current delivery count of an entry, or 0 when it is not pending.
    async fn delivery_count(&self, stream: &str, group: &str, id: EntryId) -> Result<u64> {
        Ok(self
            .pending_entry(stream, group, id)
            .await?
            .map(|pending| pending.delivery_count)
            .unwrap_or(0))
    }

    /// Creates every `(stream, group)` pair, starting at the tail.
    async fn ensure_groups(&self, pairs: &[(&str, &str)]) -> Result<()> {
        for (stream, group) in pairs {
            self.create_group(stream, group, GroupStart::Tail).await?;
            tracing::info!(stream, group, "consumer group ready");
        }
        Ok(())
    }
}

impl<T: LogStore + ?Sized> LogStoreExt for T {}

#[async_trait]
impl<T: LogStore + ?Sized> LogStore for Arc<T> {
    async fn append(
        &self,
        stream: &str,
        fields: &Fields,
        options: AppendOptions,
    ) -> Result<EntryId> {
        (**self).append(stream, fields, options).await
    }

    async fn trim(&self, stream: &str, trim: Trim) -> Result<usize> {
        (**self).trim(stream, trim).await
    }

    async fn len(&self, stream: &str) -> Result<usize> {
        (**self).len(stream).await
    }

    async fn range(&self, stream: &str, count: usize) -> Result<Vec<Entry>> {
        (**self).range(stream, count).await
    }

    async fn create_group(&self, stream: &str, group: &str, start: GroupStart) -> Result<()> {
        (**self).create_group(stream, group, start).await
    }

    async fn read_group(&self, request: &ReadGroup<'_>, cursor: ReadCursor) -> Result<Vec<Entry>> {
        (**self).read_group(request, cursor).await
    }

    async fn pending_entry(
        &self,
        stream: &str,
        group: &str,
        id: EntryId,
    ) -> Result<Option<PendingEntry>> {
        (**self).pending_entry(stream, group, id).await
    }

    async fn pending(&self, stream: &str, group: &str, count: usize) -> Result<Vec<PendingEntry>> {
        (**self).pending(stream, group, count).await
    }

    async fn ack(&self, stream: &str, group: &str, ids: &[EntryId]) -> Result<usize> {
        (**self).ack(stream, group, ids).await
    }
}
