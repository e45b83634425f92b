//! Deliveries and the delivery outbox.

use async_trait::async_trait;
use choreography::OutboxMessage;
use common::{DeliveryId, OrderId};

use crate::error::{DomainError, Result};

/// Status of a delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum DeliveryStatus {
    /// Created after payment, not yet dispatched.
    #[default]
    Received,
    InTransit,
    /// Handed to the customer (terminal state).
    Delivered,
    /// Could not be completed (terminal state).
    Failed,
}

impl DeliveryStatus {
    /// Returns true if reaching this status must be announced to other services.
    pub fn is_announced(&self) -> bool {
        matches!(self, DeliveryStatus::Delivered | DeliveryStatus::Failed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            DeliveryStatus::Received => "RECEIVED",
            DeliveryStatus::InTransit => "IN_TRANSIT",
            DeliveryStatus::Delivered => "DELIVERED",
            DeliveryStatus::Failed => "FAILED",
        }
    }

    /// Status recorded on outbox rows and used as the stream suffix.
    pub fn event_name(&self) -> String {
        self.as_str().to_lowercase()
    }
}

impl std::fmt::Display for DeliveryStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for DeliveryStatus {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "RECEIVED" => Ok(DeliveryStatus::Received),
            "IN_TRANSIT" => Ok(DeliveryStatus::InTransit),
            "DELIVERED" => Ok(DeliveryStatus::Delivered),
            "FAILED" => Ok(DeliveryStatus::Failed),
            other => Err(DomainError::InvalidStatus {
                entity: "delivery",
                value: other.to_string(),
            }),
        }
    }
}

/// A delivery of a paid order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Delivery {
    pub id: DeliveryId,
    pub order_id: OrderId,
    pub status: DeliveryStatus,
}

/// Builds the outbox row announcing that `delivery` reached its status.
pub fn outbox_message(id: i64, delivery: &Delivery) -> OutboxMessage {
    OutboxMessage {
        id,
        aggregate_status: delivery.status.event_name(),
        aggregate_id: delivery.id.get(),
        related_id: delivery.order_id.get(),
        published: false,
    }
}

/// Storage of deliveries and their outbox, owned by the delivery service.
///
/// Implementations also implement [`choreography::OutboxStore`] over the
/// same outbox rows.
#[async_trait]
pub trait DeliveryRepository: Send + Sync {
    /// Creates the delivery of an order unless one exists.
    ///
    /// Returns the delivery and whether it was created by this call.
    async fn create_for_order(&self, order_id: OrderId) -> Result<(Delivery, bool)>;

    async fn get(&self, id: DeliveryId) -> Result<Option<Delivery>>;

    async fn get_by_order(&self, order_id: OrderId) -> Result<Option<Delivery>>;

    /// Changes a delivery's status. Reaching an announced status writes an
    /// outbox row in the same transaction.
    async fn update_status(&self, id: DeliveryId, status: DeliveryStatus) -> Result<Delivery>;
}

#[async_trait]
impl<T: DeliveryRepository + ?Sized> DeliveryRepository for std::sync::Arc<T> {
    async fn create_for_order(&self, order_id: OrderId) -> Result<(Delivery, bool)> {
        (**self).create_for_order(order_id).await
    }

    async fn get(&self, id: DeliveryId) -> Result<Option<Delivery>> {
        (**self).get(id).await
    }

    async fn get_by_order(&self, order_id: OrderId) -> Result<Option<Delivery>> {
        (**self).get_by_order(order_id).await
    }

    async fn update_status(&self, id: DeliveryId, status: DeliveryStatus) -> Result<Delivery> {
        (**self).update_status(id, status).await
    }
}
