//! Background tasks of a node: one consumer worker per consumed stream,
//! the delivery outbox relay and the expired-payment sweeper.

use std::sync::Arc;

use choreography::{ConsumerWorker, OutboxPublisher, StreamEvent};
use common::ServiceName;
use log_store::LogStoreExt;
use saga::{
    DeliveryDelivered, DeliveryFailed, DeliveryOutboxRoute, OrderCreated, PaymentFailed,
    PaymentSucceeded, Reaction, StockInsufficient, StockReserved, Subscription,
};
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::backends::Bus;
use crate::config::Config;
use crate::error::Result;
use crate::services::Services;

/// A running background task.
pub struct Task {
    pub name: String,
    pub handle: JoinHandle<()>,
}

/// Spawns the background tasks of the selected services.
pub struct Launcher<'a> {
    bus: &'a Bus,
    config: &'a Config,
    shutdown: watch::Receiver<bool>,
    tasks: Vec<Task>,
}

impl<'a> Launcher<'a> {
    pub fn new(bus: &'a Bus, config: &'a Config, shutdown: watch::Receiver<bool>) -> Self {
        Self {
            bus,
            config,
            shutdown,
            tasks: Vec::new(),
        }
    }

    /// Creates the consumer groups of every selected service, starting at
    /// the tail of each stream.
    pub async fn ensure_groups(&self) -> Result<()> {
        let store = self.bus.shared();
        for service in self.config.service.services() {
            let group = service.group();
            let pairs: Vec<(&str, &str)> = service
                .consumed_streams()
                .iter()
                .map(|stream| (*stream, group.as_str()))
                .collect();
            store.ensure_groups(&pairs).await?;
        }
        Ok(())
    }

    /// Spawns every task of the selected services.
    pub async fn launch(mut self, services: &Services) -> Result<Vec<Task>> {
        for service in self.config.service.services() {
            self.launch_service(service, services).await?;
        }
        Ok(self.tasks)
    }

    async fn launch_service(&mut self, service: ServiceName, services: &Services) -> Result<()> {
        use ServiceName::{Cart, Delivery, Order, Payment, Product, User};

        match service {
            Product => {
                self.consume::<_, OrderCreated>(Product, &services.products).await?;
                self.consume::<_, PaymentFailed>(Product, &services.products).await?;
            }
            Cart => {
                self.consume::<_, OrderCreated>(Cart, &services.carts).await?;
                self.consume::<_, StockInsufficient>(Cart, &services.carts).await?;
                self.consume::<_, PaymentSucceeded>(Cart, &services.carts).await?;
                self.consume::<_, PaymentFailed>(Cart, &services.carts).await?;
            }
            Order => {
                self.consume::<_, StockReserved>(Order, &services.orders).await?;
                self.consume::<_, StockInsufficient>(Order, &services.orders).await?;
                self.consume::<_, PaymentSucceeded>(Order, &services.orders).await?;
                self.consume::<_, PaymentFailed>(Order, &services.orders).await?;
                self.consume::<_, DeliveryDelivered>(Order, &services.orders).await?;
                self.consume::<_, DeliveryFailed>(Order, &services.orders).await?;
            }
            Delivery => {
                self.consume::<_, PaymentSucceeded>(Delivery, &services.deliveries)
                    .await?;
                let relay = OutboxPublisher::new(
                    Arc::clone(&services.delivery_outbox),
                    DeliveryOutboxRoute,
                    services.publisher.clone(),
                )
                .with_idle_interval(self.config.outbox_idle);
                self.spawn("delivery-outbox".to_string(), relay.run(self.shutdown.clone()));
            }
            Payment if services.sweep_payments => {
                let sweeper = Arc::clone(&services.payments)
                    .run_sweeper(self.config.payment_sweep_interval, self.shutdown.clone());
                self.spawn("payment-sweeper".to_string(), sweeper);
            }
            Payment => {
                tracing::warn!(
                    "payment sweeper disabled: sandbox provider cannot settle stored payments"
                );
            }
            User => {}
        }
        Ok(())
    }

    async fn consume<S, E>(&mut self, service: ServiceName, target: &Arc<S>) -> Result<()>
    where
        S: Reaction<E> + 'static,
        E: StreamEvent,
    {
        let worker = ConsumerWorker::new(
            self.bus.for_worker().await?,
            Subscription::<S, E>::new(Arc::clone(target)),
            self.config.worker_config(service),
        );
        let name = format!("{}:{}", service.group(), E::STREAM);
        self.spawn(name, worker.run(self.shutdown.clone()));
        Ok(())
    }

    fn spawn<F>(&mut self, name: String, task: F)
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        tracing::debug!(task = %name, "spawning task");
        self.tasks.push(Task {
            name,
            handle: tokio::spawn(task),
        });
    }
}
