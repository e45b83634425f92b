//! Node configuration loaded from environment variables.

use std::time::Duration;

use choreography::{DEFAULT_STREAM_MAX_LEN, WorkerConfig};
use common::ServiceName;

use crate::error::NodeError;

/// Which services a node runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceSelection {
    All,
    Only(ServiceName),
}

impl ServiceSelection {
    pub fn services(&self) -> Vec<ServiceName> {
        match self {
            ServiceSelection::All => ServiceName::ALL.to_vec(),
            ServiceSelection::Only(service) => vec![*service],
        }
    }

    pub fn includes(&self, service: ServiceName) -> bool {
        match self {
            ServiceSelection::All => true,
            ServiceSelection::Only(only) => *only == service,
        }
    }
}

impl std::str::FromStr for ServiceSelection {
    type Err = NodeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.trim().eq_ignore_ascii_case("all") {
            return Ok(ServiceSelection::All);
        }
        s.parse().map(ServiceSelection::Only).map_err(NodeError::Config)
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Plain,
    Json,
}

/// Node configuration with sensible defaults.
///
/// Reads from environment variables:
/// - `SERVICE`: `order`, `product`, `payment`, `delivery`, `cart`, `user` or `all` (default: `all`)
/// - `HOST` / `PORT`: bind address (default: `0.0.0.0:3000`)
/// - `REDIS_URL`: Redis Streams bus; unset runs an in-process log
/// - `DATABASE_URL`: PostgreSQL stores; unset keeps state in memory
/// - `RUST_LOG`: tracing filter directive (default: `info`)
/// - `LOG_FORMAT`: `plain` or `json` (default: `plain`)
/// - `WORKER_BLOCK_MS`, `WORKER_RETRY_BUDGET`, `WORKER_RETRY_BACKOFF_MS`
/// - `STREAM_MAX_LEN`, `OUTBOX_IDLE_MS`
/// - `PAYMENT_SWEEP_SECS`, `PAYMENT_EXPIRY_SECS` (the sweeper only runs on
///   in-memory stores)
///
/// Numeric values that fail to parse fall back to their defaults.
#[derive(Debug, Clone)]
pub struct Config {
    pub service: ServiceSelection,
    pub host: String,
    pub port: u16,
    pub redis_url: Option<String>,
    pub database_url: Option<String>,
    pub log_level: String,
    pub log_format: LogFormat,
    pub worker_block: Duration,
    pub retry_budget: u64,
    pub retry_backoff: Duration,
    pub stream_max_len: usize,
    pub outbox_idle: Duration,
    pub payment_sweep_interval: Duration,
    pub payment_expiry: Duration,
}

impl Config {
    /// Loads configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Result<Self, NodeError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Loads configuration from an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, NodeError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let number = |key: &str, default: u64| {
            lookup(key)
                .and_then(|value| value.trim().parse().ok())
                .unwrap_or(default)
        };
        let non_empty = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());

        let service = match non_empty("SERVICE") {
            Some(value) => value.parse::<ServiceSelection>()?,
            None => defaults.service,
        };
        let log_format = match non_empty("LOG_FORMAT").as_deref() {
            Some(value) if value.eq_ignore_ascii_case("json") => LogFormat::Json,
            _ => LogFormat::Plain,
        };

        Ok(Self {
            service,
            host: non_empty("HOST").unwrap_or(defaults.host),
            port: lookup("PORT")
                .and_then(|p| p.trim().parse().ok())
                .unwrap_or(defaults.port),
            redis_url: non_empty("REDIS_URL"),
            database_url: non_empty("DATABASE_URL"),
            log_level: non_empty("RUST_LOG").unwrap_or(defaults.log_level),
            log_format,
            worker_block: Duration::from_millis(number("WORKER_BLOCK_MS", 5000)),
            retry_budget: number("WORKER_RETRY_BUDGET", 5).max(1),
            retry_backoff: Duration::from_millis(number("WORKER_RETRY_BACKOFF_MS", 1000)),
            stream_max_len: number("STREAM_MAX_LEN", DEFAULT_STREAM_MAX_LEN as u64) as usize,
            outbox_idle: Duration::from_millis(number("OUTBOX_IDLE_MS", 500)),
            payment_sweep_interval: Duration::from_secs(number("PAYMENT_SWEEP_SECS", 300)),
            payment_expiry: Duration::from_secs(number("PAYMENT_EXPIRY_SECS", 120)),
        })
    }

    /// Returns the `"host:port"` bind address string.
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Worker settings for the consumers of a service.
    pub fn worker_config(&self, service: ServiceName) -> WorkerConfig {
        WorkerConfig::new(service.group(), service.consumer())
            .with_block_timeout(self.worker_block)
            .with_retry_budget(self.retry_budget)
            .with_retry_backoff(self.retry_backoff)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            service: ServiceSelection::All,
            host: "0.0.0.0".to_string(),
            port: 3000,
            redis_url: None,
            database_url: None,
            log_level: "info".to_string(),
            log_format: LogFormat::Plain,
            worker_block: Duration::from_millis(5000),
            retry_budget: 5,
            retry_backoff: Duration::from_millis(1000),
            stream_max_len: DEFAULT_STREAM_MAX_LEN,
            outbox_idle: Duration::from_millis(500),
            payment_sweep_interval: Duration::from_secs(300),
            payment_expiry: Duration::from_secs(120),
        }
    }
}
