use async_trait::async_trait;
use common::{OrderId, ProductId, UserId};
use sqlx::{PgPool, Row, postgres::PgRow};

use super::{from_db_id, to_db_id};
use crate::error::{DomainError, Result};
use crate::order::{NewOrder, Order, OrderItem, OrderRepository, OrderStatus, Transition};

/// PostgreSQL-backed order repository.
#[derive(Clone)]
pub struct PostgresOrderRepository {
    pool: PgPool,
}

impl PostgresOrderRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn row_to_item(row: PgRow) -> Result<OrderItem> {
        let quantity: i32 = row.try_get("quantity")?;
        Ok(OrderItem {
            product_id: ProductId::new(from_db_id(row.try_get("product_id")?)),
            quantity: quantity as u32,
            price: row.try_get("price")?,
        })
    }
}

#[async_trait]
impl OrderRepository for PostgresOrderRepository {
    async fn create(&self, order: NewOrder) -> Result<Order> {
        let total_amount = order.total_amount();
        let mut tx = self.pool.begin().await?;

        let row = sqlx::query(
            r#"
            INSERT INTO orders (user_id, total_amount, status)
            VALUES ($1, $2, $3)
            RETURNING id, created_at
            "#,
        )
        .bind(to_db_id(order.user_id.get()))
        .bind(total_amount)
        .bind(OrderStatus::Received.as_str())
        .fetch_one(&mut *tx)
        .await?;
        let id = OrderId::new(from_db_id(row.try_get("id")?));

        for item in &order.items {
            sqlx::query(
                r#"
                INSERT INTO order_items (order_id, product_id, quantity, price)
                VALUES ($1, $2, $3, $4)
                "#,
            )
            .bind(to_db_id(id.get()))
            .bind(to_db_id(item.product_id.get()))
            .bind(item.quantity as i32)
            .bind(item.price)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;

        Ok(Order {
            id,
            user_id: order.user_id,
            total_amount,
            status: OrderStatus::Received,
            items: order.items,
            created_at: row.try_get("created_at")?,
        })
    }

    async fn get(&self, id: OrderId) -> Result<Option<Order>> {
        let Some(row) = sqlx::query(
            "SELECT id, user_id, total_amount, status, created_at FROM orders WHERE id = $1",
        )
        .bind(to_db_id(id.get()))
        .fetch_optional(&self.pool)
        .await?
        else {
            return Ok(None);
        };

        let items = sqlx::query(
            "SELECT product_id, quantity, price FROM order_items WHERE order_id = $1 ORDER BY product_id",
        )
        .bind(to_db_id(id.get()))
        .fetch_all(&self.pool)
        .await?
        .into_iter()
        .map(Self::row_to_item)
        .collect::<Result<Vec<_>>>()?;

        let status: String = row.try_get("status")?;
        Ok(Some(Order {
            id,
            user_id: UserId::new(from_db_id(row.try_get("user_id")?)),
            total_amount: row.try_get("total_amount")?,
            status: status.parse()?,
            items,
            created_at: row.try_get("created_at")?,
        }))
    }

    async fn advance(&self, id: OrderId, target: OrderStatus) -> Result<Transition> {
        let mut tx = self.pool.begin().await?;

        let current: Option<String> =
            sqlx::query_scalar("SELECT status FROM orders WHERE id = $1 FOR UPDATE")
                .bind(to_db_id(id.get()))
                .fetch_optional(&mut *tx)
                .await?;
        let current: OrderStatus = current
            .ok_or_else(|| DomainError::not_found("order", id))?
            .parse()?;

        let transition = current.transition_to(target);
        if let Transition::Applied { .. } = transition {
            sqlx::query("UPDATE orders SET status = $2, updated_at = NOW() WHERE id = $1")
                .bind(to_db_id(id.get()))
                .bind(target.as_str())
                .execute(&mut *tx)
                .await?;
        }

        tx.commit().await?;
        Ok(transition)
    }
}
