use async_trait::async_trait;
use chrono::{Duration, Utc};
use common::OrderId;
use sqlx::{PgPool, Row, postgres::PgRow};

use super::{from_db_id, to_db_id};
use crate::error::{DomainError, Result};
use crate::payment::{Payment, PaymentRepository, PaymentStatus};

const SELECT_PAYMENT: &str =
    "SELECT order_id, amount, payment_url, status, created_at, updated_at FROM payments";

/// PostgreSQL-backed payment repository.
#[derive(Clone)]
pub struct PostgresPaymentRepository {
    pool: PgPool,
}

impl PostgresPaymentRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn row_to_payment(row: PgRow) -> Result<Payment> {
        let status: String = row.try_get("status")?;
        Ok(Payment {
            order_id: OrderId::new(from_db_id(row.try_get("order_id")?)),
            amount: row.try_get("amount")?,
            payment_url: row.try_get("payment_url")?,
            status: status.parse()?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }
}

#[async_trait]
impl PaymentRepository for PostgresPaymentRepository {
    async fn insert_pending(
        &self,
        order_id: OrderId,
        amount: i64,
        payment_url: &str,
    ) -> Result<Payment> {
        sqlx::query(
            r#"
            INSERT INTO payments (order_id, amount, payment_url, status)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (order_id) DO NOTHING
            "#,
        )
        .bind(to_db_id(order_id.get()))
        .bind(amount)
        .bind(payment_url)
        .bind(PaymentStatus::Pending.as_str())
        .execute(&self.pool)
        .await?;

        self.get_by_order(order_id)
            .await?
            .ok_or_else(|| DomainError::not_found("payment", order_id))
    }

    async fn get_by_order(&self, order_id: OrderId) -> Result<Option<Payment>> {
        let sql = format!("{SELECT_PAYMENT} WHERE order_id = $1");
        sqlx::query(&sql)
            .bind(to_db_id(order_id.get()))
            .fetch_optional(&self.pool)
            .await?
            .map(Self::row_to_payment)
            .transpose()
    }

    async fn update_status(&self, order_id: OrderId, status: PaymentStatus) -> Result<()> {
        let updated =
            sqlx::query("UPDATE payments SET status = $2, updated_at = NOW() WHERE order_id = $1")
                .bind(to_db_id(order_id.get()))
                .bind(status.as_str())
                .execute(&self.pool)
                .await?;

        if updated.rows_affected() == 0 {
            return Err(DomainError::not_found("payment", order_id));
        }
        Ok(())
    }

    async fn pending_older_than(&self, age: Duration) -> Result<Vec<Payment>> {
        let cutoff = Utc::now() - age;
        let sql =
            format!("{SELECT_PAYMENT} WHERE status = $1 AND created_at < $2 ORDER BY created_at");
        sqlx::query(&sql)
            .bind(PaymentStatus::Pending.as_str())
            .bind(cutoff)
            .fetch_all(&self.pool)
            .await?
            .into_iter()
            .map(Self::row_to_payment)
            .collect()
    }
}
