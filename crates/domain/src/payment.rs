//! Payment records.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use common::OrderId;

use crate::error::{DomainError, Result};

/// Status of a payment as tracked by the payment service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum PaymentStatus {
    /// Waiting for the customer or the provider.
    #[default]
    Pending,
    /// Captured or settled.
    Success,
    /// Denied, cancelled or expired.
    Failed,
    /// Captured but flagged for manual fraud review.
    Challenge,
}

impl PaymentStatus {
    /// Returns true if the payment is settled one way or the other.
    pub fn is_final(&self) -> bool {
        matches!(self, PaymentStatus::Success | PaymentStatus::Failed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentStatus::Pending => "PENDING",
            PaymentStatus::Success => "SUCCESS",
            PaymentStatus::Failed => "FAILED",
            PaymentStatus::Challenge => "CHALLENGE",
        }
    }
}

impl std::fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for PaymentStatus {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "PENDING" => Ok(PaymentStatus::Pending),
            "SUCCESS" => Ok(PaymentStatus::Success),
            "FAILED" => Ok(PaymentStatus::Failed),
            "CHALLENGE" => Ok(PaymentStatus::Challenge),
            other => Err(DomainError::InvalidStatus {
                entity: "payment",
                value: other.to_string(),
            }),
        }
    }
}

/// A payment requested for an order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Payment {
    pub order_id: OrderId,
    pub amount: i64,
    pub payment_url: String,
    pub status: PaymentStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Storage of payments, owned by the payment service. One payment per order.
#[async_trait]
pub trait PaymentRepository: Send + Sync {
    /// Stores a pending payment. An existing payment for the order is
    /// returned unchanged.
    async fn insert_pending(
        &self,
        order_id: OrderId,
        amount: i64,
        payment_url: &str,
    ) -> Result<Payment>;

    async fn get_by_order(&self, order_id: OrderId) -> Result<Option<Payment>>;

    async fn update_status(&self, order_id: OrderId, status: PaymentStatus) -> Result<()>;

    /// Pending payments created more than `age` ago.
    async fn pending_older_than(&self, age: Duration) -> Result<Vec<Payment>>;
}

#[async_trait]
impl<T: PaymentRepository + ?Sized> PaymentRepository for std::sync::Arc<T> {
    async fn insert_pending(
        &self,
        order_id: OrderId,
        amount: i64,
        payment_url: &str,
    ) -> Result<Payment> {
        (**self).insert_pending(order_id, amount, payment_url).await
    }

    async fn get_by_order(&self, order_id: OrderId) -> Result<Option<Payment>> {
        (**self).get_by_order(order_id).await
    }

    async fn update_status(&self, order_id: OrderId, status: PaymentStatus) -> Result<()> {
        (**self).update_status(order_id, status).await
    }

    async fn pending_older_than(&self, age: Duration) -> Result<Vec<Payment>> {
        (**self).pending_older_than(age).await
    }
}
