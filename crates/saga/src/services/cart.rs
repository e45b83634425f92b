//! Cart service: holds ordered items while the order is paid.

use async_trait::async_trait;
use choreography::HandlerError;
use domain::CartRepository;

use crate::events::{OrderCreated, PaymentFailed, PaymentSucceeded, StockInsufficient};
use crate::subscription::Reaction;

pub struct CartService<R> {
    carts: R,
}

impl<R: CartRepository> CartService<R> {
    pub fn new(carts: R) -> Self {
        Self { carts }
    }

    pub fn carts(&self) -> &R {
        &self.carts
    }
}

#[async_trait]
impl<R: CartRepository> Reaction<OrderCreated> for CartService<R> {
    async fn react(&self, event: OrderCreated) -> Result<(), HandlerError> {
        let products: Vec<_> = event.items.iter().map(|line| line.product_id).collect();
        let held = self
            .carts
            .hold(event.order_id, event.user_id, &products)
            .await?;
        tracing::info!(order_id = %event.order_id, held, "cart items held");
        Ok(())
    }
}

#[async_trait]
impl<R: CartRepository> Reaction<PaymentSucceeded> for CartService<R> {
    async fn react(&self, event: PaymentSucceeded) -> Result<(), HandlerError> {
        let removed = self.carts.clear_held(event.order_id).await?;
        tracing::info!(order_id = %event.order_id, removed, "paid items removed from cart");
        Ok(())
    }
}

impl<R: CartRepository> CartService<R> {
    async fn release(&self, order_id: common::OrderId) -> Result<(), HandlerError> {
        if self.carts.release_hold(order_id).await? {
            tracing::info!(%order_id, "cart hold released");
        }
        Ok(())
    }
}

#[async_trait]
impl<R: CartRepository> Reaction<PaymentFailed> for CartService<R> {
    async fn react(&self, event: PaymentFailed) -> Result<(), HandlerError> {
        self.release(event.order_id).await
    }
}

#[async_trait]
impl<R: CartRepository> Reaction<StockInsufficient> for CartService<R> {
    async fn react(&self, event: StockInsufficient) -> Result<(), HandlerError> {
        self.release(event.order_id).await
    }
}
