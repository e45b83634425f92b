pub mod entry;
pub mod error;
pub mod memory;
pub mod redis_store;
pub mod store;

pub use entry::{Entry, EntryId, Fields};
pub use error::{LogStoreError, Result};
pub use memory::InMemoryLogStore;
pub use redis_store::RedisLogStore;
pub use store::{
    AppendOptions, GroupStart, LogStore, LogStoreExt, PendingEntry, ReadCursor, ReadGroup, Trim,
};
