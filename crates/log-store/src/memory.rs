use std::collections::{BTreeMap, HashMap};
use std::ops::Bound;
use std::sync::Arc;
use std::time::{Instant, SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use tokio::sync::{Notify, RwLock};

use crate::{
    Entry, EntryId, Fields, LogStoreError, Result,
    store::{AppendOptions, GroupStart, LogStore, PendingEntry, ReadCursor, ReadGroup, Trim},
};

/// Approximate trims only remove whole blocks of this many entries.
const APPROX_TRIM_BLOCK: usize = 100;

#[derive(Debug)]
struct PendingState {
    consumer: String,
    delivery_count: u64,
    delivered_at: Instant,
}

#[derive(Debug, Default)]
struct GroupState {
    last_delivered: EntryId,
    pending: BTreeMap<EntryId, PendingState>,
}

#[derive(Debug, Default)]
struct StreamLog {
    entries: BTreeMap<EntryId, Fields>,
    last_id: EntryId,
    groups: HashMap<String, GroupState>,
}

impl StreamLog {
    fn trim(&mut self, trim: Trim) -> usize {
        let excess = self.entries.len().saturating_sub(trim.cap());
        let removable = match trim {
            Trim::MaxLen(_) => excess,
            Trim::ApproxMaxLen(_) => excess - excess % APPROX_TRIM_BLOCK,
        };
        for _ in 0..removable {
            self.entries.pop_first();
        }
        removable
    }

    fn group_mut(&mut self, stream: &str, group: &str) -> Result<&mut GroupState> {
        self.groups
            .get_mut(group)
            .ok_or_else(|| LogStoreError::NoGroup {
                stream: stream.to_string(),
                group: group.to_string(),
            })
    }
}

#[derive(Default)]
struct Inner {
    streams: RwLock<HashMap<String, StreamLog>>,
    appended: Notify,
}

/// In-memory log store for tests and single-process runs.
///
/// Mirrors the Redis Streams semantics the workers rely on: monotonic IDs,
/// approximate trimming, per-group cursors and pending lists whose delivery
/// counts grow on every history read.
#[derive(Clone, Default)]
pub struct InMemoryLogStore {
    inner: Arc<Inner>,
}

impl InMemoryLogStore {
    /// Creates a new empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns every retained entry of a stream, oldest first.
    pub async fn entries(&self, stream: &str) -> Vec<Entry> {
        let streams = self.inner.streams.read().await;
        streams
            .get(stream)
            .map(|log| {
                log.entries
                    .iter()
                    .map(|(id, fields)| Entry::new(*id, fields.clone()))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Returns the names of all streams.
    pub async fn stream_names(&self) -> Vec<String> {
        let streams = self.inner.streams.read().await;
        let mut names: Vec<_> = streams.keys().cloned().collect();
        names.sort();
        names
    }
}

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}

#[async_trait]
impl LogStore for InMemoryLogStore {
    async fn append(
        &self,
        stream: &str,
        fields: &Fields,
        options: AppendOptions,
    ) -> Result<EntryId> {
        if fields.is_empty() {
            return Err(LogStoreError::EmptyEntry {
                stream: stream.to_string(),
            });
        }

        let id = {
            let mut streams = self.inner.streams.write().await;
            let log = streams.entry(stream.to_string()).or_default();
            let id = log.last_id.successor(now_millis());
            log.entries.insert(id, fields.clone());
            log.last_id = id;
            if let Some(trim) = options.trim {
                log.trim(trim);
            }
            id
        };

        self.inner.appended.notify_waiters();
        Ok(id)
    }

    async fn trim(&self, stream: &str, trim: Trim) -> Result<usize> {
        let mut streams = self.inner.streams.write().await;
        Ok(streams.get_mut(stream).map(|log| log.trim(trim)).unwrap_or(0))
    }

    async fn len(&self, stream: &str) -> Result<usize> {
        let streams = self.inner.streams.read().await;
        Ok(streams.get(stream).map(|log| log.entries.len()).unwrap_or(0))
    }

    async fn range(&self, stream: &str, count: usize) -> Result<Vec<Entry>> {
        let streams = self.inner.streams.read().await;
        Ok(streams
            .get(stream)
            .map(|log| {
                log.entries
                    .iter()
                    .take(count)
                    .map(|(id, fields)| Entry::new(*id, fields.clone()))
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn create_group(&self, stream: &str, group: &str, start: GroupStart) -> Result<()> {
        let mut streams = self.inner.streams.write().await;
        let log = streams.entry(stream.to_string()).or_default();
        if log.groups.contains_key(group) {
            return Ok(());
        }
        let last_delivered = match start {
            GroupStart::Beginning => EntryId::ZERO,
            GroupStart::Tail => log.last_id,
        };
        log.groups.insert(
            group.to_string(),
            GroupState {
                last_delivered,
                pending: BTreeMap::new(),
            },
        );
        Ok(())
    }

    async fn read_group(&self, request: &ReadGroup<'_>, cursor: ReadCursor) -> Result<Vec<Entry>> {
        let deadline = request.block.map(|block| tokio::time::Instant::now() + block);

        loop {
            // Registered before inspecting the stream so an append racing
            // with this read still wakes it.
            let appended = self.inner.appended.notified();

            {
                let mut streams = self.inner.streams.write().await;
                let log = streams
                    .get_mut(request.stream)
                    .ok_or_else(|| LogStoreError::NoGroup {
                        stream: request.stream.to_string(),
                        group: request.group.to_string(),
                    })?;
                let StreamLog {
                    entries, groups, ..
                } = log;
                let group = groups
                    .get_mut(request.group)
                    .ok_or_else(|| LogStoreError::NoGroup {
                        stream: request.stream.to_string(),
                        group: request.group.to_string(),
                    })?;

                match cursor {
                    ReadCursor::Pending { after } => {
                        let now = Instant::now();
                        let delivered = group
                            .pending
                            .range_mut((Bound::Excluded(after), Bound::Unbounded))
                            .filter(|(_, state)| state.consumer == request.consumer)
                            .take(request.count)
                            .map(|(id, state)| {
                                state.delivery_count += 1;
                                state.delivered_at = now;
                                // Trimmed entries stay pending with no fields.
                                Entry::new(*id, entries.get(id).cloned().unwrap_or_default())
                            })
                            .collect();
                        return Ok(delivered);
                    }
                    ReadCursor::New => {
                        let fresh: Vec<Entry> = entries
                            .range((Bound::Excluded(group.last_delivered), Bound::Unbounded))
                            .take(request.count)
                            .map(|(id, fields)| Entry::new(*id, fields.clone()))
                            .collect();
                        if let Some(last) = fresh.last() {
                            group.last_delivered = last.id;
                            let now = Instant::now();
                            for entry in &fresh {
                                group.pending.insert(
                                    entry.id,
                                    PendingState {
                                        consumer: request.consumer.to_string(),
                                        delivery_count: 1,
                                        delivered_at: now,
                                    },
                                );
                            }
                            return Ok(fresh);
                        }
                    }
                }
            }

            let Some(deadline) = deadline else {
                return Ok(Vec::new());
            };
            if tokio::time::timeout_at(deadline, appended).await.is_err() {
                return Ok(Vec::new());
            }
        }
    }

    async fn pending_entry(
        &self,
        stream: &str,
        group: &str,
        id: EntryId,
    ) -> Result<Option<PendingEntry>> {
        let mut streams = self.inner.streams.write().await;
        let Some(log) = streams.get_mut(stream) else {
            return Ok(None);
        };
        let group = log.group_mut(stream, group)?;
        Ok(group.pending.get(&id).map(|state| PendingEntry {
            id,
            consumer: state.consumer.clone(),
            delivery_count: state.delivery_count,
            idle: state.delivered_at.elapsed(),
        }))
    }

    async fn pending(&self, stream: &str, group: &str, count: usize) -> Result<Vec<PendingEntry>> {
        let mut streams = self.inner.streams.write().await;
        let Some(log) = streams.get_mut(stream) else {
            return Ok(Vec::new());
        };
        let group = log.group_mut(stream, group)?;
        Ok(group
            .pending
            .iter()
            .take(count)
            .map(|(id, state)| PendingEntry {
                id: *id,
                consumer: state.consumer.clone(),
                delivery_count: state.delivery_count,
                idle: state.delivered_at.elapsed(),
            })
            .collect())
    }

    async fn ack(&self, stream: &str, group: &str, ids: &[EntryId]) -> Result<usize> {
        let mut streams = self.inner.streams.write().await;
        let Some(group) = streams
            .get_mut(stream)
            .and_then(|log| log.groups.get_mut(group))
        else {
            return Ok(0);
        };
        Ok(ids
            .iter()
            .filter(|id| group.pending.remove(id).is_some())
            .count())
    }
}
