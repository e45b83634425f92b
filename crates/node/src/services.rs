//! The saga participants of a node, wired to its backends.

use std::sync::Arc;

use choreography::{OutboxStore, Publisher};
use domain::{
    CartRepository, DeliveryRepository, OrderRepository, PaymentRepository, ProductRepository,
};
use log_store::Trim;
use saga::{
    CartService, DeliveryService, InMemoryPaymentProvider, OrderService, PaymentService,
    ProductService,
};

use crate::backends::{SharedLog, Stores};
use crate::config::Config;

pub type Payments =
    PaymentService<Arc<dyn PaymentRepository>, InMemoryPaymentProvider, SharedLog>;
pub type Orders = OrderService<Arc<dyn OrderRepository>, Arc<Payments>, SharedLog>;
pub type Products = ProductService<Arc<dyn ProductRepository>, SharedLog>;
pub type Deliveries = DeliveryService<Arc<dyn DeliveryRepository>>;
pub type Carts = CartService<Arc<dyn CartRepository>>;

/// Every service of the platform. A node constructs all of them and runs
/// the consumers of the selected ones.
#[derive(Clone)]
pub struct Services {
    pub orders: Arc<Orders>,
    pub products: Arc<Products>,
    pub payments: Arc<Payments>,
    pub deliveries: Arc<Deliveries>,
    pub carts: Arc<Carts>,
    pub delivery_outbox: Arc<dyn OutboxStore>,
    pub publisher: Publisher<SharedLog>,
    /// Whether the expired-payment sweeper runs. Off on durable stores: the
    /// sandbox provider forgets its transactions on restart.
    pub sweep_payments: bool,
}

impl Services {
    pub fn new(stores: Stores, log: SharedLog, config: &Config) -> Self {
        let publisher =
            Publisher::new(log).with_trim(Some(Trim::ApproxMaxLen(config.stream_max_len)));
        let payments = Arc::new(
            PaymentService::new(
                stores.payments,
                InMemoryPaymentProvider::new(),
                publisher.clone(),
            )
            .with_expiry(config.payment_expiry),
        );
        let orders = Arc::new(OrderService::new(
            stores.orders,
            Arc::clone(&payments),
            publisher.clone(),
        ));
        let products = Arc::new(ProductService::new(stores.products, publisher.clone()));
        let sweep_payments = !stores.durable;

        Self {
            orders,
            products,
            payments,
            deliveries: Arc::new(DeliveryService::new(stores.deliveries)),
            carts: Arc::new(CartService::new(stores.carts)),
            delivery_outbox: stores.delivery_outbox,
            publisher,
            sweep_payments,
        }
    }
}
