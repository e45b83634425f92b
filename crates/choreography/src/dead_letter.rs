use chrono::{SecondsFormat, Utc};
use common::dlq_stream;
use log_store::{AppendOptions, Entry, EntryId, LogStore, Result};

/// Failure reason recorded for entries that exhausted their retry budget.
pub fn exceeded_retries_reason(budget: u64) -> String {
    format!("Exceeded max retries ({budget})")
}

/// Copies poison entries to the dead-letter sibling of their stream.
#[derive(Debug, Clone)]
pub struct DeadLetterRouter<L> {
    store: L,
}

impl<L: LogStore> DeadLetterRouter<L> {
    pub fn new(store: L) -> Self {
        Self { store }
    }

    /// Appends a copy of `entry` to `<stream>:dlq` annotated with
    /// `error_reason`, `failed_at` and `original_id`.
    ///
    /// The source entry is left untouched; acknowledging it is up to the
    /// caller.
    #[tracing::instrument(skip(self, entry), fields(entry_id = %entry.id))]
    pub async fn move_to_dlq(&self, stream: &str, entry: &Entry, reason: &str) -> Result<EntryId> {
        let mut fields = entry.fields.clone();
        fields.insert("error_reason".to_string(), reason.to_string());
        fields.insert(
            "failed_at".to_string(),
            Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
        );
        fields.insert("original_id".to_string(), entry.id.to_string());

        let dlq = dlq_stream(stream);
        let id = self.store.append(&dlq, &fields, AppendOptions::new()).await?;
        tracing::error!(dlq = %dlq, reason, "entry moved to dead-letter queue");
        Ok(id)
    }
}
