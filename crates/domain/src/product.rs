//! Product stock and per-order reservations.

use std::collections::BTreeMap;

use async_trait::async_trait;
use common::{OrderId, ProductId};
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// A product with its available stock.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Product {
    pub id: ProductId,
    pub name: String,
    pub price: i64,
    pub stock: i64,
}

/// A quantity of one product requested by an order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockLine {
    pub product_id: ProductId,
    pub quantity: u32,
}

impl StockLine {
    pub fn new(product_id: ProductId, quantity: u32) -> Self {
        Self {
            product_id,
            quantity,
        }
    }
}

/// Signed stock changes applied as one batch.
///
/// Lines for the same product are merged, so a batch touches each product once.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StockDeltas(BTreeMap<ProductId, i64>);

impl StockDeltas {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds `delta` to the change of `product_id`.
    pub fn add(&mut self, product_id: ProductId, delta: i64) {
        *self.0.entry(product_id).or_default() += delta;
    }

    /// Deltas that take `lines` out of stock.
    pub fn deduct(lines: &[StockLine]) -> Self {
        let mut deltas = Self::new();
        for line in lines {
            deltas.add(line.product_id, -i64::from(line.quantity));
        }
        deltas
    }

    /// Deltas that put `lines` back into stock.
    pub fn restock(lines: &[StockLine]) -> Self {
        let mut deltas = Self::new();
        for line in lines {
            deltas.add(line.product_id, i64::from(line.quantity));
        }
        deltas
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (ProductId, i64)> + '_ {
        self.0.iter().map(|(id, delta)| (*id, *delta))
    }
}

/// Outcome of reserving stock for an order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReservationOutcome {
    /// Stock was deducted and the reservation recorded.
    Reserved,
    /// The order already holds a reservation; nothing changed.
    AlreadyReserved,
    /// At least one product lacked stock; nothing changed.
    Insufficient { product_id: ProductId },
}

impl ReservationOutcome {
    /// Label used in metrics and logs.
    pub fn as_str(&self) -> &'static str {
        match self {
            ReservationOutcome::Reserved => "reserved",
            ReservationOutcome::AlreadyReserved => "already_reserved",
            ReservationOutcome::Insufficient { .. } => "insufficient",
        }
    }
}

/// Storage of products and reservations, owned by the product service.
#[async_trait]
pub trait ProductRepository: Send + Sync {
    /// Stores a new product.
    async fn insert(&self, name: &str, price: i64, stock: i64) -> Result<Product>;

    /// Loads a product.
    async fn get(&self, id: ProductId) -> Result<Option<Product>>;

    /// Applies every delta in one transaction.
    ///
    /// Fails with [`DomainError::InsufficientStock`](crate::DomainError::InsufficientStock)
    /// and changes nothing if any product is unknown or would go negative.
    async fn apply_stock_deltas(&self, deltas: &StockDeltas) -> Result<()>;

    /// Deducts the order's lines and records the reservation, once per order.
    async fn reserve(&self, order_id: OrderId, lines: &[StockLine]) -> Result<ReservationOutcome>;

    /// Returns a live reservation's stock and marks it released.
    ///
    /// Returns false when the order holds no live reservation.
    async fn release(&self, order_id: OrderId) -> Result<bool>;
}

#[async_trait]
impl<T: ProductRepository + ?Sized> ProductRepository for std::sync::Arc<T> {
    async fn insert(&self, name: &str, price: i64, stock: i64) -> Result<Product> {
        (**self).insert(name, price, stock).await
    }

    async fn get(&self, id: ProductId) -> Result<Option<Product>> {
        (**self).get(id).await
    }

    async fn apply_stock_deltas(&self, deltas: &StockDeltas) -> Result<()> {
        (**self).apply_stock_deltas(deltas).await
    }

    async fn reserve(&self, order_id: OrderId, lines: &[StockLine]) -> Result<ReservationOutcome> {
        (**self).reserve(order_id, lines).await
    }

    async fn release(&self, order_id: OrderId) -> Result<bool> {
        (**self).release(order_id).await
    }
}
