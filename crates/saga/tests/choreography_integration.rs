//! End-to-end purchase saga over the in-memory log store.
//!
//! Every service runs its consumer workers against one shared log; the tests
//! pump the workers by hand until no entry is left to deliver.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use choreography::{
    ConsumerWorker, EntryHandler, OutboxPublisher, Publisher, StreamEvent, WorkerConfig,
};
use common::{DeliveryId, OrderId, ProductId, ServiceName, UserId, dlq_stream};
use domain::{
    CartItem, CartRepository, DeliveryRepository, DeliveryStatus, InMemoryCartRepository,
    InMemoryDeliveryRepository, InMemoryOrderRepository, InMemoryPaymentRepository,
    InMemoryProductRepository, NewOrder, OrderItem, OrderStatus, PaymentRepository,
    PaymentStatus, ProductRepository,
};
use log_store::{AppendOptions, InMemoryLogStore, LogStore, LogStoreExt};
use saga::{
    CartService, DeliveryOutboxRoute, DeliveryService, InMemoryPaymentProvider, OrderCreated,
    OrderService, PaymentNotification, PaymentService, PaymentSucceeded, ProductService,
    ProviderTransaction, StockInsufficient, StockReserved, Subscription,
};

type Payments = PaymentService<InMemoryPaymentRepository, InMemoryPaymentProvider, InMemoryLogStore>;
type Orders = OrderService<InMemoryOrderRepository, Arc<Payments>, InMemoryLogStore>;
type Products = ProductService<InMemoryProductRepository, InMemoryLogStore>;
type Deliveries = DeliveryService<InMemoryDeliveryRepository>;
type Carts = CartService<InMemoryCartRepository>;

#[async_trait]
trait Pump: Send {
    async fn pump(&mut self) -> usize;
}

#[async_trait]
impl<H: EntryHandler + 'static> Pump for ConsumerWorker<InMemoryLogStore, H> {
    async fn pump(&mut self) -> usize {
        let report = self.poll_once().await.unwrap();
        if report.retrying > 0 {
            self.restart_backlog();
        }
        report.delivered()
    }
}

fn config(service: ServiceName) -> WorkerConfig {
    WorkerConfig::new(service.group(), service.consumer())
        .with_block_timeout(Duration::from_millis(5))
        .with_retry_backoff(Duration::from_millis(1))
}

fn worker<S, E>(log: &InMemoryLogStore, service: ServiceName, target: &Arc<S>) -> Box<dyn Pump>
where
    S: saga::Reaction<E> + 'static,
    E: StreamEvent,
{
    Box::new(ConsumerWorker::new(
        log.clone(),
        Subscription::<S, E>::new(Arc::clone(target)),
        config(service),
    ))
}

struct Shop {
    log: InMemoryLogStore,
    products: Arc<Products>,
    orders: Arc<Orders>,
    payments: Arc<Payments>,
    deliveries: Arc<Deliveries>,
    carts: Arc<Carts>,
    delivery_repo: InMemoryDeliveryRepository,
    workers: Vec<Box<dyn Pump>>,
}

impl Shop {
    async fn open() -> Self {
        let log = InMemoryLogStore::new();
        for service in ServiceName::ALL {
            let group = service.group();
            let pairs: Vec<(&str, &str)> = service
                .consumed_streams()
                .iter()
                .map(|stream| (*stream, group.as_str()))
                .collect();
            log.ensure_groups(&pairs).await.unwrap();
        }

        let publisher = Publisher::new(log.clone());
        let payments = Arc::new(PaymentService::new(
            InMemoryPaymentRepository::new(),
            InMemoryPaymentProvider::new(),
            publisher.clone(),
        ));
        let orders = Arc::new(OrderService::new(
            InMemoryOrderRepository::new(),
            Arc::clone(&payments),
            publisher.clone(),
        ));
        let products = Arc::new(ProductService::new(
            InMemoryProductRepository::new(),
            publisher.clone(),
        ));
        let delivery_repo = InMemoryDeliveryRepository::new();
        let deliveries = Arc::new(DeliveryService::new(delivery_repo.clone()));
        let carts = Arc::new(CartService::new(InMemoryCartRepository::new()));

        use ServiceName::{Cart, Delivery, Order, Product};
        let workers = vec![
            worker::<_, OrderCreated>(&log, Product, &products),
            worker::<_, saga::PaymentFailed>(&log, Product, &products),
            worker::<_, OrderCreated>(&log, Cart, &carts),
            worker::<_, StockInsufficient>(&log, Cart, &carts),
            worker::<_, PaymentSucceeded>(&log, Cart, &carts),
            worker::<_, saga::PaymentFailed>(&log, Cart, &carts),
            worker::<_, StockReserved>(&log, Order, &orders),
            worker::<_, StockInsufficient>(&log, Order, &orders),
            worker::<_, PaymentSucceeded>(&log, Order, &orders),
            worker::<_, saga::PaymentFailed>(&log, Order, &orders),
            worker::<_, saga::DeliveryDelivered>(&log, Order, &orders),
            worker::<_, saga::DeliveryFailed>(&log, Order, &orders),
            worker::<_, PaymentSucceeded>(&log, Delivery, &deliveries),
        ];

        Self {
            log,
            products,
            orders,
            payments,
            deliveries,
            carts,
            delivery_repo,
            workers,
        }
    }

    /// Polls every worker until two consecutive rounds deliver nothing.
    async fn settle(&mut self) {
        let mut quiet_rounds = 0;
        for _ in 0..100 {
            let mut delivered = 0;
            for worker in &mut self.workers {
                delivered += worker.pump().await;
            }
            quiet_rounds = if delivered == 0 { quiet_rounds + 1 } else { 0 };
            if quiet_rounds == 2 {
                return;
            }
        }
        panic!("saga did not settle");
    }

    async fn order_status(&self, id: OrderId) -> OrderStatus {
        self.orders.orders().status(id).await.unwrap()
    }

    async fn notify(&self, order_id: OrderId, transaction: ProviderTransaction) {
        self.payments
            .handle_notification(&PaymentNotification {
                order_id,
                transaction,
            })
            .await
            .unwrap();
    }
}

async fn stock_product(shop: &Shop, stock: i64) -> ProductId {
    shop.products
        .products()
        .insert("Widget", 50_000, stock)
        .await
        .unwrap()
        .id
}

async fn fill_cart(shop: &Shop, user: UserId, product: ProductId) {
    shop.carts
        .carts()
        .put_item(
            user,
            CartItem {
                product_id: product,
                quantity: 2,
                price: 50_000,
            },
        )
        .await
        .unwrap();
}

#[tokio::test]
async fn paid_order_is_shipped() {
    let mut shop = Shop::open().await;
    let user = UserId::new(1);
    let product = stock_product(&shop, 5).await;
    fill_cart(&shop, user, product).await;

    let order = shop
        .orders
        .place_order(NewOrder::new(
            user,
            vec![OrderItem::new(product, 2, 50_000)],
        ))
        .await
        .unwrap();
    shop.settle().await;

    assert_eq!(shop.order_status(order.id).await, OrderStatus::AwaitingPayment);
    assert_eq!(shop.products.products().stock(product).await, Some(3));
    assert!(shop.carts.carts().is_held(order.id).await);
    let payment = shop
        .payments
        .payments()
        .get_by_order(order.id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(payment.status, PaymentStatus::Pending);
    assert_eq!(payment.amount, 100_000);

    shop.notify(order.id, ProviderTransaction::new("settlement"))
        .await;
    shop.settle().await;

    assert_eq!(shop.order_status(order.id).await, OrderStatus::Paid);
    assert!(shop.carts.carts().items(user).await.unwrap().is_empty());
    let delivery = shop
        .deliveries
        .deliveries()
        .get_by_order(order.id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(delivery.status, DeliveryStatus::Received);

    shop.deliveries
        .update_status(delivery.id, DeliveryStatus::Delivered)
        .await
        .unwrap();
    let relay = OutboxPublisher::new(
        shop.delivery_repo.clone(),
        DeliveryOutboxRoute,
        Publisher::new(shop.log.clone()),
    );
    assert_eq!(relay.drain_once().await.unwrap().published, 1);
    shop.settle().await;

    assert_eq!(shop.order_status(order.id).await, OrderStatus::Shipped);
}

#[tokio::test]
async fn insufficient_stock_cancels_without_touching_stock() {
    let mut shop = Shop::open().await;
    let user = UserId::new(1);
    let product = stock_product(&shop, 2).await;
    fill_cart(&shop, user, product).await;

    let order = shop
        .orders
        .place_order(NewOrder::new(
            user,
            vec![OrderItem::new(product, 3, 50_000)],
        ))
        .await
        .unwrap();
    shop.settle().await;

    assert!(!shop.carts.carts().is_held(order.id).await);
    assert_eq!(shop.carts.carts().items(user).await.unwrap().len(), 1);

    assert_eq!(shop.order_status(order.id).await, OrderStatus::Cancelled);
    assert_eq!(shop.products.products().stock(product).await, Some(2));
    assert!(shop.log.entries(StockReserved::STREAM).await.is_empty());
    assert_eq!(shop.log.entries(StockInsufficient::STREAM).await.len(), 1);
    assert!(
        shop.payments
            .payments()
            .get_by_order(order.id)
            .await
            .unwrap()
            .is_none()
    );
}

#[tokio::test]
async fn failed_payment_releases_stock_and_cart() {
    let mut shop = Shop::open().await;
    let user = UserId::new(1);
    let product = stock_product(&shop, 5).await;
    fill_cart(&shop, user, product).await;

    let order = shop
        .orders
        .place_order(NewOrder::new(
            user,
            vec![OrderItem::new(product, 2, 50_000)],
        ))
        .await
        .unwrap();
    shop.settle().await;
    assert_eq!(shop.products.products().stock(product).await, Some(3));

    shop.notify(order.id, ProviderTransaction::new("deny")).await;
    shop.settle().await;

    assert_eq!(shop.order_status(order.id).await, OrderStatus::Cancelled);
    assert_eq!(shop.products.products().stock(product).await, Some(5));
    assert!(!shop.carts.carts().is_held(order.id).await);
    assert_eq!(shop.carts.carts().items(user).await.unwrap().len(), 1);
    assert!(
        shop.deliveries
            .deliveries()
            .get_by_order(order.id)
            .await
            .unwrap()
            .is_none()
    );
}

#[tokio::test]
async fn raw_order_created_entry_reserves_stock() {
    let mut shop = Shop::open().await;
    // Product ids are assigned sequentially; the seventh product has id 7.
    let mut product = ProductId::new(0);
    for _ in 0..7 {
        product = stock_product(&shop, 10).await;
    }
    assert_eq!(product, ProductId::new(7));

    let fields: log_store::Fields = [
        ("order_id", "42"),
        ("user_id", "9"),
        ("total_amount", "100000"),
        ("items", r#"[{"product_id":7,"quantity":2}]"#),
        ("created_at", "2024-05-01T10:00:00.000Z"),
    ]
    .into_iter()
    .map(|(k, v)| (k.to_string(), v.to_string()))
    .collect();
    shop.log
        .append(OrderCreated::STREAM, &fields, AppendOptions::new())
        .await
        .unwrap();
    shop.settle().await;

    assert_eq!(shop.products.products().stock(product).await, Some(8));
    assert!(shop.products.products().has_reservation(OrderId::new(42)).await);
    let reserved = shop.log.entries(StockReserved::STREAM).await;
    assert_eq!(reserved.len(), 1);
    assert_eq!(reserved[0].field("order_id"), Some("42"));
}

#[tokio::test]
async fn event_for_unknown_order_is_dead_lettered_after_five_deliveries() {
    let mut shop = Shop::open().await;
    let entry_id = shop
        .log
        .append(
            PaymentSucceeded::STREAM,
            &PaymentSucceeded::new(OrderId::new(999)).to_fields(),
            AppendOptions::new(),
        )
        .await
        .unwrap();
    shop.settle().await;

    let group = ServiceName::Order.group();
    assert!(
        shop.log
            .pending(PaymentSucceeded::STREAM, &group, 10)
            .await
            .unwrap()
            .is_empty()
    );

    let dead = shop.log.entries(&dlq_stream(PaymentSucceeded::STREAM)).await;
    assert_eq!(dead.len(), 1);
    assert_eq!(dead[0].field("error_reason"), Some("Exceeded max retries (5)"));
    assert_eq!(
        dead[0].field("original_id"),
        Some(entry_id.to_string().as_str())
    );
    assert_eq!(dead[0].field("order_id"), Some("999"));

    // The delivery service is a separate group and handled it normally.
    assert!(
        shop.deliveries
            .deliveries()
            .get_by_order(OrderId::new(999))
            .await
            .unwrap()
            .is_some()
    );
}

#[tokio::test]
async fn duplicate_events_are_harmless() {
    let mut shop = Shop::open().await;
    let product = stock_product(&shop, 5).await;
    let order = shop
        .orders
        .place_order(NewOrder::new(
            UserId::new(1),
            vec![OrderItem::new(product, 1, 50_000)],
        ))
        .await
        .unwrap();
    shop.settle().await;

    let publisher = Publisher::new(shop.log.clone());
    publisher.publish(&StockReserved::new(order.id)).await.unwrap();
    publisher.publish(&PaymentSucceeded::new(order.id)).await.unwrap();
    publisher.publish(&PaymentSucceeded::new(order.id)).await.unwrap();
    shop.settle().await;

    assert_eq!(shop.order_status(order.id).await, OrderStatus::Paid);
    let delivery = shop
        .delivery_repo
        .get_by_order(order.id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(delivery.id, DeliveryId::new(1));
    assert_eq!(shop.products.products().stock(product).await, Some(4));
}
