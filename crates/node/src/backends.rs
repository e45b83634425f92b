//! Bus and store backends selected by configuration.

use std::sync::Arc;

use choreography::OutboxStore;
use domain::{
    CartRepository, DeliveryRepository, InMemoryCartRepository, InMemoryDeliveryRepository,
    InMemoryOrderRepository, InMemoryPaymentRepository, InMemoryProductRepository,
    OrderRepository, PaymentRepository, PostgresDeliveryRepository, PostgresOrderRepository,
    PostgresPaymentRepository, PostgresProductRepository, ProductRepository,
};
use log_store::{InMemoryLogStore, LogStore, RedisLogStore};
use sqlx::postgres::PgPoolOptions;

use crate::config::Config;
use crate::error::Result;

/// Log store handle shared across tasks.
pub type SharedLog = Arc<dyn LogStore>;

/// The event bus a node publishes to and consumes from.
#[derive(Clone)]
pub enum Bus {
    /// In-process log; every service of the node shares it.
    Memory(InMemoryLogStore),
    Redis(RedisLogStore),
}

impl Bus {
    /// Connects to Redis when `REDIS_URL` is set, otherwise opens an
    /// in-process log.
    pub async fn connect(config: &Config) -> Result<Self> {
        match &config.redis_url {
            Some(url) => Ok(Bus::Redis(RedisLogStore::connect(url).await?)),
            None => {
                tracing::warn!("REDIS_URL not set, using an in-process log");
                Ok(Bus::Memory(InMemoryLogStore::new()))
            }
        }
    }

    /// Handle for publishing and short commands.
    pub fn shared(&self) -> SharedLog {
        match self {
            Bus::Memory(store) => Arc::new(store.clone()),
            Bus::Redis(store) => Arc::new(store.clone()),
        }
    }

    /// Handle for a consumer worker. Blocking Redis reads get a connection
    /// of their own.
    pub async fn for_worker(&self) -> Result<SharedLog> {
        match self {
            Bus::Memory(store) => Ok(Arc::new(store.clone())),
            Bus::Redis(store) => Ok(Arc::new(store.dedicated().await?)),
        }
    }
}

/// Repositories of every service.
#[derive(Clone)]
pub struct Stores {
    pub orders: Arc<dyn OrderRepository>,
    pub products: Arc<dyn ProductRepository>,
    pub payments: Arc<dyn PaymentRepository>,
    pub deliveries: Arc<dyn DeliveryRepository>,
    /// The delivery outbox; the same rows `deliveries` writes.
    pub delivery_outbox: Arc<dyn OutboxStore>,
    /// Carts are held in memory on every backend.
    pub carts: Arc<dyn CartRepository>,
    /// True when the repositories outlive the process.
    pub durable: bool,
}

impl Stores {
    /// Opens PostgreSQL stores when `DATABASE_URL` is set, otherwise keeps
    /// state in memory.
    pub async fn open(config: &Config) -> Result<Self> {
        match &config.database_url {
            Some(url) => Self::postgres(url).await,
            None => {
                tracing::warn!("DATABASE_URL not set, keeping state in memory");
                Ok(Self::in_memory())
            }
        }
    }

    pub fn in_memory() -> Self {
        let deliveries = Arc::new(InMemoryDeliveryRepository::new());
        Self {
            orders: Arc::new(InMemoryOrderRepository::new()),
            products: Arc::new(InMemoryProductRepository::new()),
            payments: Arc::new(InMemoryPaymentRepository::new()),
            deliveries: deliveries.clone(),
            delivery_outbox: deliveries,
            carts: Arc::new(InMemoryCartRepository::new()),
            durable: false,
        }
    }

    /// Connects, runs the migrations and opens the PostgreSQL repositories.
    pub async fn postgres(url: &str) -> Result<Self> {
        let pool = PgPoolOptions::new().max_connections(10).connect(url).await?;
        domain::run_migrations(&pool).await?;
        tracing::info!("connected to postgres, migrations applied");

        let deliveries = Arc::new(PostgresDeliveryRepository::new(pool.clone()));
        Ok(Self {
            orders: Arc::new(PostgresOrderRepository::new(pool.clone())),
            products: Arc::new(PostgresProductRepository::new(pool.clone())),
            payments: Arc::new(PostgresPaymentRepository::new(pool)),
            deliveries: deliveries.clone(),
            delivery_outbox: deliveries,
            carts: Arc::new(InMemoryCartRepository::new()),
            durable: true,
        })
    }
}
