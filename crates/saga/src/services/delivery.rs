//! Delivery service: opens a delivery for every paid order and announces
//! terminal delivery states through its outbox.

use async_trait::async_trait;
use choreography::{HandlerError, OutboxMessage, OutboxRoute};
use common::{DeliveryId, OrderId};
use domain::{Delivery, DeliveryRepository, DeliveryStatus};
use log_store::Fields;

use crate::error::Result;
use crate::events::PaymentSucceeded;
use crate::subscription::Reaction;

pub struct DeliveryService<R> {
    deliveries: R,
}

impl<R: DeliveryRepository> DeliveryService<R> {
    pub fn new(deliveries: R) -> Self {
        Self { deliveries }
    }

    pub fn deliveries(&self) -> &R {
        &self.deliveries
    }

    /// Opens the delivery of a paid order, once per order.
    #[tracing::instrument(skip(self))]
    pub async fn open_delivery(&self, order_id: OrderId) -> Result<Delivery> {
        let (delivery, created) = self.deliveries.create_for_order(order_id).await?;
        if created {
            tracing::info!(delivery_id = %delivery.id, "delivery created");
        } else {
            tracing::debug!(delivery_id = %delivery.id, "delivery already exists");
        }
        Ok(delivery)
    }

    /// Changes a delivery's status. DELIVERED and FAILED are announced by the
    /// outbox publisher once committed.
    #[tracing::instrument(skip(self))]
    pub async fn update_status(&self, id: DeliveryId, status: DeliveryStatus) -> Result<Delivery> {
        let delivery = self.deliveries.update_status(id, status).await?;
        tracing::info!(order_id = %delivery.order_id, %status, "delivery status updated");
        Ok(delivery)
    }
}

#[async_trait]
impl<R: DeliveryRepository> Reaction<PaymentSucceeded> for DeliveryService<R> {
    async fn react(&self, event: PaymentSucceeded) -> std::result::Result<(), HandlerError> {
        self.open_delivery(event.order_id).await?;
        Ok(())
    }
}

/// Routes delivery outbox rows to `stream:delivery:<status>`.
#[derive(Debug, Clone, Copy, Default)]
pub struct DeliveryOutboxRoute;

impl OutboxRoute for DeliveryOutboxRoute {
    fn route(&self, message: &OutboxMessage) -> (String, Fields) {
        let stream = format!("stream:delivery:{}", message.aggregate_status);
        let fields = Fields::from([
            ("delivery_id".to_string(), message.aggregate_id.to_string()),
            ("order_id".to_string(), message.related_id.to_string()),
        ]);
        (stream, fields)
    }
}
