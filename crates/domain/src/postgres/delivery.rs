use async_trait::async_trait;
use choreography::{OutboxError, OutboxMessage, OutboxStore};
use common::{DeliveryId, OrderId};
use sqlx::{PgPool, Row, postgres::PgRow};

use super::{from_db_id, to_db_id};
use crate::delivery::{Delivery, DeliveryRepository, DeliveryStatus};
use crate::error::{DomainError, Result};

/// PostgreSQL-backed delivery repository and outbox.
#[derive(Clone)]
pub struct PostgresDeliveryRepository {
    pool: PgPool,
}

impl PostgresDeliveryRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn row_to_delivery(row: PgRow) -> Result<Delivery> {
        let status: String = row.try_get("status")?;
        Ok(Delivery {
            id: DeliveryId::new(from_db_id(row.try_get("id")?)),
            order_id: OrderId::new(from_db_id(row.try_get("order_id")?)),
            status: status.parse()?,
        })
    }

    fn row_to_message(row: PgRow) -> Result<OutboxMessage> {
        Ok(OutboxMessage {
            id: row.try_get("id")?,
            aggregate_status: row.try_get("status")?,
            aggregate_id: from_db_id(row.try_get("delivery_id")?),
            related_id: from_db_id(row.try_get("order_id")?),
            published: row.try_get("published")?,
        })
    }
}

#[async_trait]
impl DeliveryRepository for PostgresDeliveryRepository {
    async fn create_for_order(&self, order_id: OrderId) -> Result<(Delivery, bool)> {
        let created = sqlx::query(
            r#"
            INSERT INTO deliveries (order_id, status)
            VALUES ($1, $2)
            ON CONFLICT (order_id) DO NOTHING
            RETURNING id, order_id, status
            "#,
        )
        .bind(to_db_id(order_id.get()))
        .bind(DeliveryStatus::Received.as_str())
        .fetch_optional(&self.pool)
        .await?;

        if let Some(row) = created {
            return Ok((Self::row_to_delivery(row)?, true));
        }

        let existing = self
            .get_by_order(order_id)
            .await?
            .ok_or_else(|| DomainError::not_found("delivery", order_id))?;
        Ok((existing, false))
    }

    async fn get(&self, id: DeliveryId) -> Result<Option<Delivery>> {
        sqlx::query("SELECT id, order_id, status FROM deliveries WHERE id = $1")
            .bind(to_db_id(id.get()))
            .fetch_optional(&self.pool)
            .await?
            .map(Self::row_to_delivery)
            .transpose()
    }

    async fn get_by_order(&self, order_id: OrderId) -> Result<Option<Delivery>> {
        sqlx::query("SELECT id, order_id, status FROM deliveries WHERE order_id = $1")
            .bind(to_db_id(order_id.get()))
            .fetch_optional(&self.pool)
            .await?
            .map(Self::row_to_delivery)
            .transpose()
    }

    async fn update_status(&self, id: DeliveryId, status: DeliveryStatus) -> Result<Delivery> {
        let mut tx = self.pool.begin().await?;

        let row = sqlx::query(
            r#"
            UPDATE deliveries SET status = $2, updated_at = NOW()
            WHERE id = $1
            RETURNING id, order_id, status
            "#,
        )
        .bind(to_db_id(id.get()))
        .bind(status.as_str())
        .fetch_optional(&mut *tx)
        .await?
        .ok_or_else(|| DomainError::not_found("delivery", id))?;
        let delivery = Self::row_to_delivery(row)?;

        if status.is_announced() {
            sqlx::query(
                r#"
                INSERT INTO delivery_outbox (status, delivery_id, order_id)
                VALUES ($1, $2, $3)
                "#,
            )
            .bind(status.event_name())
            .bind(to_db_id(delivery.id.get()))
            .bind(to_db_id(delivery.order_id.get()))
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(delivery)
    }
}

#[async_trait]
impl OutboxStore for PostgresDeliveryRepository {
    async fn unpublished(&self) -> std::result::Result<Vec<OutboxMessage>, OutboxError> {
        let rows = sqlx::query(
            r#"
            SELECT id, status, delivery_id, order_id, published
            FROM delivery_outbox
            WHERE published = FALSE
            ORDER BY id
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .map_err(OutboxError::store)?;

        let messages = rows
            .into_iter()
            .map(Self::row_to_message)
            .collect::<Result<Vec<_>>>()?;
        Ok(messages)
    }

    async fn mark_published(&self, id: i64) -> std::result::Result<(), OutboxError> {
        sqlx::query("UPDATE delivery_outbox SET published = TRUE WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(OutboxError::store)?;
        Ok(())
    }
}
