//! Product service: reserves stock for new orders and releases it when
//! their payment fails.

use async_trait::async_trait;
use choreography::{HandlerError, Publisher};
use common::OrderId;
use domain::{ProductRepository, ReservationOutcome};
use log_store::LogStore;

use crate::error::Result;
use crate::events::{OrderCreated, PaymentFailed, StockInsufficient, StockReserved};
use crate::subscription::Reaction;

pub struct ProductService<R, L> {
    products: R,
    publisher: Publisher<L>,
}

impl<R, L> ProductService<R, L>
where
    R: ProductRepository,
    L: LogStore,
{
    pub fn new(products: R, publisher: Publisher<L>) -> Self {
        Self {
            products,
            publisher,
        }
    }

    pub fn products(&self) -> &R {
        &self.products
    }

    /// Reserves the order's items and announces the outcome.
    ///
    /// A redelivered order announces its existing reservation again.
    #[tracing::instrument(skip(self, event), fields(order_id = %event.order_id))]
    pub async fn reserve_stock(&self, event: &OrderCreated) -> Result<ReservationOutcome> {
        let outcome = self.products.reserve(event.order_id, &event.items).await?;
        metrics::counter!("stock_reservations_total", "outcome" => outcome.as_str()).increment(1);

        match outcome {
            ReservationOutcome::Reserved | ReservationOutcome::AlreadyReserved => {
                self.publisher
                    .publish(&StockReserved::new(event.order_id))
                    .await?;
                tracing::info!(outcome = outcome.as_str(), "stock reserved");
            }
            ReservationOutcome::Insufficient { product_id } => {
                self.publisher
                    .publish(&StockInsufficient::new(event.order_id))
                    .await?;
                tracing::info!(%product_id, "insufficient stock");
            }
        }
        Ok(outcome)
    }

    /// Puts a reserved order's stock back.
    #[tracing::instrument(skip(self))]
    pub async fn release_stock(&self, order_id: OrderId) -> Result<bool> {
        let released = self.products.release(order_id).await?;
        if released {
            tracing::info!("reservation released");
        } else {
            tracing::debug!("no live reservation to release");
        }
        Ok(released)
    }
}

#[async_trait]
impl<R, L> Reaction<OrderCreated> for ProductService<R, L>
where
    R: ProductRepository,
    L: LogStore,
{
    async fn react(&self, event: OrderCreated) -> std::result::Result<(), HandlerError> {
        self.reserve_stock(&event).await?;
        Ok(())
    }
}

#[async_trait]
impl<R, L> Reaction<PaymentFailed> for ProductService<R, L>
where
    R: ProductRepository,
    L: LogStore,
{
    async fn react(&self, event: PaymentFailed) -> std::result::Result<(), HandlerError> {
        self.release_stock(event.order_id).await?;
        Ok(())
    }
}
