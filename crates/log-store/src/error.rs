use thiserror::Error;

/// Errors that can occur when interacting with the log store.
#[derive(Debug, Error)]
pub enum LogStoreError {
    /// The consumer group does not exist on the stream.
    #[error("No such consumer group {group} on stream {stream}")]
    NoGroup { stream: String, group: String },

    /// An entry must carry at least one field.
    #[error("Cannot append an empty entry to stream {stream}")]
    EmptyEntry { stream: String },

    /// An entry ID could not be parsed.
    #[error("Invalid entry ID: {0}")]
    InvalidEntryId(String),

    /// The Redis backend returned an error.
    #[error("Redis error: {0}")]
    Redis(#[from] ::redis::RedisError),
}

/// Result type for log store operations.
pub type Result<T> = std::result::Result<T, LogStoreError>;
