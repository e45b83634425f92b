//! PostgreSQL repositories.
//!
//! Every service owns its tables; the repositories share a schema only
//! because one migration set creates them all.

mod delivery;
mod order;
mod payment;
mod product;

pub use delivery::PostgresDeliveryRepository;
pub use order::PostgresOrderRepository;
pub use payment::PostgresPaymentRepository;
pub use product::PostgresProductRepository;

use sqlx::PgPool;

/// Runs the database migrations.
pub async fn run_migrations(pool: &PgPool) -> std::result::Result<(), sqlx::migrate::MigrateError> {
    sqlx::migrate!("../../migrations").run(pool).await
}

/// Identifiers are stored as BIGINT.
pub(crate) fn to_db_id(id: u64) -> i64 {
    id as i64
}

pub(crate) fn from_db_id(id: i64) -> u64 {
    id as u64
}
