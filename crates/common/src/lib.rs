//! Shared identifiers, service names and stream names.

pub mod streams;
pub mod types;

pub use streams::{ServiceName, dlq_stream};
pub use types::{DeliveryId, OrderId, ParseIdError, ProductId, UserId};
