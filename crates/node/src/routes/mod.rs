//! HTTP handlers.

pub mod carts;
pub mod deliveries;
pub mod dlq;
pub mod health;
pub mod metrics;
pub mod orders;
pub mod payments;
pub mod products;

use std::str::FromStr;

use crate::error::ApiError;

/// Parses a path identifier, answering 400 when it is malformed.
pub(crate) fn parse_id<T>(raw: &str) -> Result<T, ApiError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    raw.parse()
        .map_err(|e| ApiError::BadRequest(format!("Invalid id {raw:?}: {e}")))
}
