use async_trait::async_trait;
use common::{OrderId, ProductId};
use sqlx::{PgConnection, PgPool, Row};

use super::{from_db_id, to_db_id};
use crate::error::{DomainError, Result};
use crate::product::{Product, ProductRepository, ReservationOutcome, StockDeltas, StockLine};

/// PostgreSQL-backed product repository.
#[derive(Clone)]
pub struct PostgresProductRepository {
    pool: PgPool,
}

impl PostgresProductRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

/// Applies each delta with a guarded update. The caller owns the transaction
/// and must roll back on error.
async fn apply_deltas(conn: &mut PgConnection, deltas: &StockDeltas) -> Result<()> {
    for (product_id, delta) in deltas.iter() {
        let updated = sqlx::query(
            "UPDATE products SET stock = stock + $2 WHERE id = $1 AND stock + $2 >= 0",
        )
        .bind(to_db_id(product_id.get()))
        .bind(delta)
        .execute(&mut *conn)
        .await?;

        // Zero rows: the product is unknown or would go negative.
        if updated.rows_affected() == 0 {
            return Err(DomainError::InsufficientStock {
                product_id: product_id.get(),
            });
        }
    }
    Ok(())
}

#[async_trait]
impl ProductRepository for PostgresProductRepository {
    async fn insert(&self, name: &str, price: i64, stock: i64) -> Result<Product> {
        let id: i64 = sqlx::query_scalar(
            "INSERT INTO products (name, price, stock) VALUES ($1, $2, $3) RETURNING id",
        )
        .bind(name)
        .bind(price)
        .bind(stock)
        .fetch_one(&self.pool)
        .await?;

        Ok(Product {
            id: ProductId::new(from_db_id(id)),
            name: name.to_string(),
            price,
            stock,
        })
    }

    async fn get(&self, id: ProductId) -> Result<Option<Product>> {
        let row = sqlx::query("SELECT id, name, price, stock FROM products WHERE id = $1")
            .bind(to_db_id(id.get()))
            .fetch_optional(&self.pool)
            .await?;

        row.map(|row| {
            Ok(Product {
                id: ProductId::new(from_db_id(row.try_get("id")?)),
                name: row.try_get("name")?,
                price: row.try_get("price")?,
                stock: row.try_get("stock")?,
            })
        })
        .transpose()
    }

    async fn apply_stock_deltas(&self, deltas: &StockDeltas) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        // Dropping the transaction on error rolls it back.
        apply_deltas(&mut tx, deltas).await?;
        tx.commit().await?;
        Ok(())
    }

    async fn reserve(&self, order_id: OrderId, lines: &[StockLine]) -> Result<ReservationOutcome> {
        let mut tx = self.pool.begin().await?;

        let inserted = sqlx::query(
            r#"
            INSERT INTO stock_reservations (order_id, items)
            VALUES ($1, $2)
            ON CONFLICT (order_id) DO NOTHING
            "#,
        )
        .bind(to_db_id(order_id.get()))
        .bind(serde_json::to_value(lines)?)
        .execute(&mut *tx)
        .await?;
        if inserted.rows_affected() == 0 {
            return Ok(ReservationOutcome::AlreadyReserved);
        }

        match apply_deltas(&mut tx, &StockDeltas::deduct(lines)).await {
            Ok(()) => {
                tx.commit().await?;
                Ok(ReservationOutcome::Reserved)
            }
            Err(DomainError::InsufficientStock { product_id }) => {
                tx.rollback().await?;
                tracing::debug!(%order_id, product_id, "reservation rolled back");
                Ok(ReservationOutcome::Insufficient {
                    product_id: ProductId::new(product_id),
                })
            }
            Err(err) => Err(err),
        }
    }

    async fn release(&self, order_id: OrderId) -> Result<bool> {
        let mut tx = self.pool.begin().await?;

        let items: Option<serde_json::Value> = sqlx::query_scalar(
            "SELECT items FROM stock_reservations WHERE order_id = $1 AND NOT released FOR UPDATE",
        )
        .bind(to_db_id(order_id.get()))
        .fetch_optional(&mut *tx)
        .await?;
        let Some(items) = items else {
            return Ok(false);
        };

        let lines: Vec<StockLine> = serde_json::from_value(items)?;
        apply_deltas(&mut tx, &StockDeltas::restock(&lines)).await?;

        sqlx::query("UPDATE stock_reservations SET released = TRUE WHERE order_id = $1")
            .bind(to_db_id(order_id.get()))
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(true)
    }
}
