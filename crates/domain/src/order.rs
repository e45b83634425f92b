//! Order aggregate and status machine.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::{OrderId, ProductId, UserId};
use serde::{Deserialize, Serialize};

use crate::error::{DomainError, Result};

/// The status of an order in the purchase saga.
///
/// State transitions:
/// ```text
/// Received ──► AwaitingPayment ──► Paid ──► Shipped
///     │               │
///     └───────────────┴──► Cancelled
/// ```
///
/// Saga events can arrive out of order, so an order may jump forward over
/// intermediate statuses (a delivery confirmation seen before the payment).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderStatus {
    /// Order stored, stock not yet reserved.
    #[default]
    Received,

    /// Stock reserved, waiting for the customer to pay.
    AwaitingPayment,

    /// Payment collected.
    Paid,

    /// Delivered to the customer (terminal state).
    Shipped,

    /// Stock or payment failed (terminal state).
    Cancelled,
}

/// Result of asking an order to move to a status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// The order moved from `from` to the target.
    Applied { from: OrderStatus },
    /// The order already had the target status.
    Duplicate,
    /// The target is not reachable from `from`; nothing changed.
    Ignored { from: OrderStatus },
}

impl OrderStatus {
    fn rank(&self) -> u8 {
        match self {
            OrderStatus::Received => 0,
            OrderStatus::AwaitingPayment => 1,
            OrderStatus::Paid => 2,
            OrderStatus::Shipped => 3,
            OrderStatus::Cancelled => 4,
        }
    }

    /// Returns true if the order can be cancelled in this status.
    pub fn can_cancel(&self) -> bool {
        matches!(self, OrderStatus::Received | OrderStatus::AwaitingPayment)
    }

    /// Returns true if `target` lies ahead of this status.
    pub fn can_advance_to(&self, target: OrderStatus) -> bool {
        if self.is_terminal() {
            return false;
        }
        match target {
            OrderStatus::Cancelled => self.can_cancel(),
            _ => target.rank() > self.rank(),
        }
    }

    /// Returns true if this is a terminal status.
    pub fn is_terminal(&self) -> bool {
        matches!(self, OrderStatus::Shipped | OrderStatus::Cancelled)
    }

    /// Decides what moving to `target` means from this status.
    pub fn transition_to(&self, target: OrderStatus) -> Transition {
        if *self == target {
            Transition::Duplicate
        } else if self.can_advance_to(target) {
            Transition::Applied { from: *self }
        } else {
            Transition::Ignored { from: *self }
        }
    }

    /// Returns the status name as stored and published.
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::Received => "RECEIVED",
            OrderStatus::AwaitingPayment => "AWAITING_PAYMENT",
            OrderStatus::Paid => "PAID",
            OrderStatus::Shipped => "SHIPPED",
            OrderStatus::Cancelled => "CANCELLED",
        }
    }
}

impl std::fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for OrderStatus {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "RECEIVED" => Ok(OrderStatus::Received),
            "AWAITING_PAYMENT" => Ok(OrderStatus::AwaitingPayment),
            "PAID" => Ok(OrderStatus::Paid),
            "SHIPPED" => Ok(OrderStatus::Shipped),
            "CANCELLED" => Ok(OrderStatus::Cancelled),
            other => Err(DomainError::InvalidStatus {
                entity: "order",
                value: other.to_string(),
            }),
        }
    }
}

/// A line item of an order, priced at the time the order was placed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderItem {
    pub product_id: ProductId,
    pub quantity: u32,
    pub price: i64,
}

impl OrderItem {
    pub fn new(product_id: ProductId, quantity: u32, price: i64) -> Self {
        Self {
            product_id,
            quantity,
            price,
        }
    }

    /// Returns price × quantity.
    pub fn subtotal(&self) -> i64 {
        self.price * i64::from(self.quantity)
    }
}

/// An order to be stored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewOrder {
    pub user_id: UserId,
    pub items: Vec<OrderItem>,
}

impl NewOrder {
    pub fn new(user_id: UserId, items: Vec<OrderItem>) -> Self {
        Self { user_id, items }
    }

    /// Sum of the item subtotals.
    pub fn total_amount(&self) -> i64 {
        self.items.iter().map(OrderItem::subtotal).sum()
    }
}

/// A stored order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Order {
    pub id: OrderId,
    pub user_id: UserId,
    pub total_amount: i64,
    pub status: OrderStatus,
    pub items: Vec<OrderItem>,
    pub created_at: DateTime<Utc>,
}

/// Storage of orders, owned by the order service.
#[async_trait]
pub trait OrderRepository: Send + Sync {
    /// Stores a new order with status [`OrderStatus::Received`].
    async fn create(&self, order: NewOrder) -> Result<Order>;

    /// Loads an order.
    async fn get(&self, id: OrderId) -> Result<Option<Order>>;

    /// Atomically moves an order towards `target` following
    /// [`OrderStatus::transition_to`].
    async fn advance(&self, id: OrderId, target: OrderStatus) -> Result<Transition>;
}

#[async_trait]
impl<T: OrderRepository + ?Sized> OrderRepository for std::sync::Arc<T> {
    async fn create(&self, order: NewOrder) -> Result<Order> {
        (**self).create(order).await
    }

    async fn get(&self, id: OrderId) -> Result<Option<Order>> {
        (**self).get(id).await
    }

    async fn advance(&self, id: OrderId, target: OrderStatus) -> Result<Transition> {
        (**self).advance(id, target).await
    }
}
