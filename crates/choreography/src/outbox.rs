//! Transactional outbox relay.
//!
//! Services write an outbox row in the same local transaction as the state
//! change it announces. The relay polls unpublished rows, appends the event
//! each row describes and marks the row published only once the append
//! succeeded. A row whose append or mark fails is simply seen again on a later
//! poll, so an event can be published more than once but never lost.

use std::time::Duration;

use async_trait::async_trait;
use log_store::{Fields, LogStore};
use tokio::sync::watch;

use crate::error::OutboxError;
use crate::publisher::Publisher;

/// Default pause between polls that found nothing to publish.
pub const DEFAULT_IDLE_INTERVAL: Duration = Duration::from_millis(500);

/// A committed announcement waiting to be published.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboxMessage {
    pub id: i64,
    /// Status the aggregate moved to, e.g. `delivered`.
    pub aggregate_status: String,
    /// Aggregate that changed (a delivery).
    pub aggregate_id: u64,
    /// Aggregate the change relates to (the delivery's order).
    pub related_id: u64,
    pub published: bool,
}

/// Storage of outbox rows.
#[async_trait]
pub trait OutboxStore: Send + Sync {
    /// Returns every row not yet marked published, oldest first.
    async fn unpublished(&self) -> Result<Vec<OutboxMessage>, OutboxError>;

    /// Marks a row published. Rows are never deleted.
    async fn mark_published(&self, id: i64) -> Result<(), OutboxError>;
}

#[async_trait]
impl<T: OutboxStore + ?Sized> OutboxStore for std::sync::Arc<T> {
    async fn unpublished(&self) -> Result<Vec<OutboxMessage>, OutboxError> {
        (**self).unpublished().await
    }

    async fn mark_published(&self, id: i64) -> Result<(), OutboxError> {
        (**self).mark_published(id).await
    }
}

/// Maps an outbox row to the stream and fields of the event it announces.
pub trait OutboxRoute: Send + Sync {
    fn route(&self, message: &OutboxMessage) -> (String, Fields);
}

/// Result of one outbox poll.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct DrainReport {
    pub published: usize,
    pub failed: usize,
}

/// Polls an outbox store and publishes its rows.
pub struct OutboxPublisher<S, R, L> {
    store: S,
    route: R,
    publisher: Publisher<L>,
    idle_interval: Duration,
}

impl<S, R, L> OutboxPublisher<S, R, L>
where
    S: OutboxStore,
    R: OutboxRoute,
    L: LogStore,
{
    pub fn new(store: S, route: R, publisher: Publisher<L>) -> Self {
        Self {
            store,
            route,
            publisher,
            idle_interval: DEFAULT_IDLE_INTERVAL,
        }
    }

    pub fn with_idle_interval(mut self, idle_interval: Duration) -> Self {
        self.idle_interval = idle_interval;
        self
    }

    /// Publishes every currently unpublished row once.
    ///
    /// Rows are independent: a failed row is left unpublished and does not
    /// stop the others.
    pub async fn drain_once(&self) -> Result<DrainReport, OutboxError> {
        let messages = self.store.unpublished().await?;
        let mut report = DrainReport::default();

        for message in messages {
            let (stream, fields) = self.route.route(&message);
            let entry_id = match self.publisher.publish_fields(&stream, &fields).await {
                Ok(entry_id) => entry_id,
                Err(err) => {
                    tracing::warn!(outbox_id = message.id, stream = %stream, error = %err, "outbox publish failed");
                    metrics::counter!("outbox_publish_failures_total").increment(1);
                    report.failed += 1;
                    continue;
                }
            };

            match self.store.mark_published(message.id).await {
                Ok(()) => {
                    tracing::info!(outbox_id = message.id, stream = %stream, %entry_id, "outbox message published");
                    metrics::counter!("outbox_messages_published_total").increment(1);
                    report.published += 1;
                }
                Err(err) => {
                    // Published but not marked: the next poll publishes it again.
                    tracing::error!(outbox_id = message.id, error = %err, "failed to mark outbox message published");
                    metrics::counter!("outbox_publish_failures_total").increment(1);
                    report.failed += 1;
                }
            }
        }

        Ok(report)
    }

    /// Polls until `shutdown` turns true, sleeping the idle interval whenever
    /// a poll published nothing.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        tracing::info!("outbox publisher started");

        while !*shutdown.borrow() {
            let idle = match self.drain_once().await {
                Ok(report) => report.published == 0,
                Err(err) => {
                    tracing::error!(error = %err, "outbox poll failed");
                    true
                }
            };
            if idle {
                tokio::select! {
                    _ = tokio::time::sleep(self.idle_interval) => {}
                    changed = shutdown.changed() => {
                        if changed.is_err() {
                            break;
                        }
                    }
                }
            }
        }

        tracing::info!("outbox publisher stopped");
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;
    use std::sync::Arc;

    use log_store::{InMemoryLogStore, LogStoreError};
    use tokio::sync::Mutex;

    use super::*;

    #[derive(Default)]
    struct MemoryOutbox {
        rows: Mutex<Vec<OutboxMessage>>,
        fail_mark: Mutex<HashSet<i64>>,
    }

    impl MemoryOutbox {
        async fn push(&self, id: i64, status: &str) {
            self.rows.lock().await.push(OutboxMessage {
                id,
                aggregate_status: status.to_string(),
                aggregate_id: id as u64 * 10,
                related_id: 42,
                published: false,
            });
        }
    }

    #[async_trait]
    impl OutboxStore for MemoryOutbox {
        async fn unpublished(&self) -> Result<Vec<OutboxMessage>, OutboxError> {
            Ok(self
                .rows
                .lock()
                .await
                .iter()
                .filter(|row| !row.published)
                .cloned()
                .collect())
        }

        async fn mark_published(&self, id: i64) -> Result<(), OutboxError> {
            if self.fail_mark.lock().await.contains(&id) {
                return Err(OutboxError::store(std::io::Error::other("disk full")));
            }
            for row in self.rows.lock().await.iter_mut() {
                if row.id == id {
                    row.published = true;
                }
            }
            Ok(())
        }
    }

    struct StatusRoute;

    impl OutboxRoute for StatusRoute {
        fn route(&self, message: &OutboxMessage) -> (String, Fields) {
            let fields = if message.aggregate_status == "EMPTY" {
                Fields::new()
            } else {
                Fields::from([
                    ("delivery_id".to_string(), message.aggregate_id.to_string()),
                    ("order_id".to_string(), message.related_id.to_string()),
                ])
            };
            (
                format!("stream:test:{}", message.aggregate_status.to_lowercase()),
                fields,
            )
        }
    }

    fn relay(
        outbox: &Arc<MemoryOutbox>,
        store: &InMemoryLogStore,
    ) -> OutboxPublisher<Arc<MemoryOutbox>, StatusRoute, InMemoryLogStore> {
        OutboxPublisher::new(outbox.clone(), StatusRoute, Publisher::new(store.clone()))
            .with_idle_interval(Duration::from_millis(10))
    }

    #[tokio::test]
    async fn publishes_and_marks_rows() {
        let outbox = Arc::new(MemoryOutbox::default());
        outbox.push(1, "DELIVERED").await;
        outbox.push(2, "FAILED").await;
        let store = InMemoryLogStore::new();

        let report = relay(&outbox, &store).drain_once().await.unwrap();

        assert_eq!(report, DrainReport { published: 2, failed: 0 });
        let delivered = store.entries("stream:test:delivered").await;
        assert_eq!(delivered[0].field("delivery_id"), Some("10"));
        assert_eq!(delivered[0].field("order_id"), Some("42"));
        assert_eq!(store.entries("stream:test:failed").await.len(), 1);
        assert!(outbox.unpublished().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn failed_append_leaves_row_unpublished_without_blocking_others() {
        let outbox = Arc::new(MemoryOutbox::default());
        outbox.push(1, "EMPTY").await;
        outbox.push(2, "DELIVERED").await;
        let store = InMemoryLogStore::new();

        let report = relay(&outbox, &store).drain_once().await.unwrap();

        assert_eq!(report, DrainReport { published: 1, failed: 1 });
        let left = outbox.unpublished().await.unwrap();
        assert_eq!(left.len(), 1);
        assert_eq!(left[0].id, 1);
    }

    #[tokio::test]
    async fn unmarked_rows_are_republished() {
        let outbox = Arc::new(MemoryOutbox::default());
        outbox.push(1, "DELIVERED").await;
        outbox.fail_mark.lock().await.insert(1);
        let store = InMemoryLogStore::new();
        let relay = relay(&outbox, &store);

        relay.drain_once().await.unwrap();
        outbox.fail_mark.lock().await.clear();
        relay.drain_once().await.unwrap();

        // At-least-once: the event went out twice, the row is now done.
        assert_eq!(store.entries("stream:test:delivered").await.len(), 2);
        assert!(outbox.unpublished().await.unwrap().is_empty());
        assert_eq!(relay.drain_once().await.unwrap(), DrainReport::default());
    }

    #[tokio::test]
    async fn run_publishes_new_rows_until_shutdown() {
        let outbox = Arc::new(MemoryOutbox::default());
        let store = InMemoryLogStore::new();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let task = tokio::spawn(relay(&outbox, &store).run(shutdown_rx));

        outbox.push(1, "DELIVERED").await;
        tokio::time::timeout(Duration::from_secs(5), async {
            while store.len("stream:test:delivered").await.unwrap() == 0 {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();

        shutdown_tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(5), task)
            .await
            .unwrap()
            .unwrap();
    }

    #[test]
    fn store_errors_keep_their_source() {
        let err = OutboxError::from(LogStoreError::InvalidEntryId("x".to_string()));
        assert_eq!(err.to_string(), "Publish error: Invalid entry ID: x");
    }
}
