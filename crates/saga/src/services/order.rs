//! Order service: places orders and follows them through the saga.

use async_trait::async_trait;
use choreography::{HandlerError, Publisher};
use common::OrderId;
use domain::{NewOrder, Order, OrderRepository, OrderStatus, Transition};
use log_store::LogStore;

use crate::error::Result;
use crate::events::{
    DeliveryDelivered, DeliveryFailed, OrderCreated, PaymentFailed, PaymentSucceeded,
    StockInsufficient, StockReserved,
};
use crate::subscription::Reaction;

/// Asks the payment service for a payment of an order.
#[async_trait]
pub trait PaymentRequester: Send + Sync {
    /// Returns the URL the customer pays at. Requesting twice for the same
    /// order returns the same URL.
    async fn request_payment(&self, order: &Order) -> Result<String>;
}

#[async_trait]
impl<T: PaymentRequester + ?Sized> PaymentRequester for std::sync::Arc<T> {
    async fn request_payment(&self, order: &Order) -> Result<String> {
        (**self).request_payment(order).await
    }
}

pub struct OrderService<R, P, L> {
    orders: R,
    payments: P,
    publisher: Publisher<L>,
}

impl<R, P, L> OrderService<R, P, L>
where
    R: OrderRepository,
    P: PaymentRequester,
    L: LogStore,
{
    pub fn new(orders: R, payments: P, publisher: Publisher<L>) -> Self {
        Self {
            orders,
            payments,
            publisher,
        }
    }

    pub fn orders(&self) -> &R {
        &self.orders
    }

    /// Stores an order and announces it.
    ///
    /// If the announcement fails the order stays RECEIVED and the error is
    /// returned to the caller.
    #[tracing::instrument(skip(self, order), fields(user_id = %order.user_id))]
    pub async fn place_order(&self, order: NewOrder) -> Result<Order> {
        let order = self.orders.create(order).await?;
        self.publisher.publish(&OrderCreated::from(&order)).await?;
        tracing::info!(order_id = %order.id, total_amount = order.total_amount, "order placed");
        Ok(order)
    }

    /// Moves an order towards `target`, logging what happened.
    async fn advance(&self, order_id: OrderId, target: OrderStatus) -> Result<Transition> {
        let transition = self.orders.advance(order_id, target).await?;
        match transition {
            Transition::Applied { from } => {
                metrics::counter!("order_status_transitions_total", "status" => target.as_str())
                    .increment(1);
                tracing::info!(%order_id, %from, to = %target, "order status changed");
            }
            Transition::Duplicate => {
                tracing::debug!(%order_id, status = %target, "order already in status");
            }
            Transition::Ignored { from } => {
                tracing::info!(%order_id, current = %from, requested = %target, "stale status change ignored");
            }
        }
        Ok(transition)
    }

    /// Stock is reserved: wait for payment and request it.
    #[tracing::instrument(skip(self))]
    pub async fn on_stock_reserved(&self, order_id: OrderId) -> Result<Transition> {
        let transition = self.advance(order_id, OrderStatus::AwaitingPayment).await?;
        if matches!(transition, Transition::Ignored { .. }) {
            return Ok(transition);
        }

        let Some(order) = self.orders.get(order_id).await? else {
            return Ok(transition);
        };
        let payment_url = self.payments.request_payment(&order).await?;
        tracing::info!(%payment_url, "payment requested");
        Ok(transition)
    }
}

#[async_trait]
impl<R, P, L> Reaction<StockReserved> for OrderService<R, P, L>
where
    R: OrderRepository,
    P: PaymentRequester,
    L: LogStore,
{
    async fn react(&self, event: StockReserved) -> std::result::Result<(), HandlerError> {
        self.on_stock_reserved(event.order_id).await?;
        Ok(())
    }
}

#[async_trait]
impl<R, P, L> Reaction<StockInsufficient> for OrderService<R, P, L>
where
    R: OrderRepository,
    P: PaymentRequester,
    L: LogStore,
{
    async fn react(&self, event: StockInsufficient) -> std::result::Result<(), HandlerError> {
        self.advance(event.order_id, OrderStatus::Cancelled).await?;
        Ok(())
    }
}

#[async_trait]
impl<R, P, L> Reaction<PaymentSucceeded> for OrderService<R, P, L>
where
    R: OrderRepository,
    P: PaymentRequester,
    L: LogStore,
{
    async fn react(&self, event: PaymentSucceeded) -> std::result::Result<(), HandlerError> {
        self.advance(event.order_id, OrderStatus::Paid).await?;
        Ok(())
    }
}

#[async_trait]
impl<R, P, L> Reaction<PaymentFailed> for OrderService<R, P, L>
where
    R: OrderRepository,
    P: PaymentRequester,
    L: LogStore,
{
    async fn react(&self, event: PaymentFailed) -> std::result::Result<(), HandlerError> {
        self.advance(event.order_id, OrderStatus::Cancelled).await?;
        Ok(())
    }
}

#[async_trait]
impl<R, P, L> Reaction<DeliveryDelivered> for OrderService<R, P, L>
where
    R: OrderRepository,
    P: PaymentRequester,
    L: LogStore,
{
    async fn react(&self, event: DeliveryDelivered) -> std::result::Result<(), HandlerError> {
        self.advance(event.order_id, OrderStatus::Shipped).await?;
        Ok(())
    }
}

#[async_trait]
impl<R, P, L> Reaction<DeliveryFailed> for OrderService<R, P, L>
where
    R: OrderRepository,
    P: PaymentRequester,
    L: LogStore,
{
    async fn react(&self, event: DeliveryFailed) -> std::result::Result<(), HandlerError> {
        // A paid order cannot be cancelled; refunds are handled outside the saga.
        tracing::warn!(
            order_id = %event.order_id,
            delivery_id = %event.delivery_id,
            "delivery failed for paid order"
        );
        Ok(())
    }
}
