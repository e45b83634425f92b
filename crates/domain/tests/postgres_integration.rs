//! PostgreSQL repository integration tests.
//!
//! These tests share one PostgreSQL container and need Docker. Run with:
//!
//! ```bash
//! cargo test -p domain --test postgres_integration -- --ignored --test-threads=1
//! ```

use std::sync::Arc;

use chrono::Duration;
use choreography::OutboxStore;
use common::{OrderId, ProductId, UserId};
use domain::{
    DeliveryRepository, DeliveryStatus, DomainError, NewOrder, OrderItem, OrderRepository,
    OrderStatus, PaymentRepository, PaymentStatus, PostgresDeliveryRepository,
    PostgresOrderRepository, PostgresPaymentRepository, PostgresProductRepository,
    ProductRepository, ReservationOutcome, StockDeltas, StockLine, Transition,
};
use serial_test::serial;
use sqlx::PgPool;
use testcontainers::{ContainerAsync, runners::AsyncRunner};
use testcontainers_modules::postgres::Postgres;
use tokio::sync::OnceCell;

struct ContainerInfo {
    #[allow(dead_code)] // Container must stay alive for tests
    container: ContainerAsync<Postgres>,
    connection_string: String,
}

static CONTAINER: OnceCell<Arc<ContainerInfo>> = OnceCell::const_new();

async fn get_container_info() -> Arc<ContainerInfo> {
    CONTAINER
        .get_or_init(|| async {
            let container = Postgres::default().start().await.unwrap();

            let host = container.get_host().await.unwrap();
            let port = container.get_host_port_ipv4(5432).await.unwrap();

            let connection_string =
                format!("postgres://postgres:postgres@{}:{}/postgres", host, port);

            let temp_pool = PgPool::connect(&connection_string).await.unwrap();
            sqlx::raw_sql(include_str!(
                "../../../migrations/001_create_commerce_tables.sql"
            ))
            .execute(&temp_pool)
            .await
            .unwrap();
            temp_pool.close().await;

            Arc::new(ContainerInfo {
                container,
                connection_string,
            })
        })
        .await
        .clone()
}

/// Returns a fresh pool over truncated tables.
async fn get_test_pool() -> PgPool {
    let info = get_container_info().await;

    let pool = sqlx::postgres::PgPoolOptions::new()
        .max_connections(5)
        .connect(&info.connection_string)
        .await
        .unwrap();

    sqlx::query(
        "TRUNCATE TABLE order_items, orders, products, stock_reservations, payments, delivery_outbox, deliveries RESTART IDENTITY",
    )
    .execute(&pool)
    .await
    .unwrap();

    pool
}

#[tokio::test]
#[ignore = "requires Docker"]
#[serial]
async fn order_is_stored_with_items_and_advances() {
    let repo = PostgresOrderRepository::new(get_test_pool().await);

    let order = repo
        .create(NewOrder::new(
            UserId::new(7),
            vec![
                OrderItem::new(ProductId::new(1), 2, 50_000),
                OrderItem::new(ProductId::new(2), 1, 25_000),
            ],
        ))
        .await
        .unwrap();
    assert_eq!(order.total_amount, 125_000);

    let loaded = repo.get(order.id).await.unwrap().unwrap();
    assert_eq!(loaded.items.len(), 2);
    assert_eq!(loaded.status, OrderStatus::Received);
    assert_eq!(loaded.user_id, UserId::new(7));

    assert_eq!(
        repo.advance(order.id, OrderStatus::AwaitingPayment)
            .await
            .unwrap(),
        Transition::Applied {
            from: OrderStatus::Received
        }
    );
    assert_eq!(
        repo.advance(order.id, OrderStatus::AwaitingPayment)
            .await
            .unwrap(),
        Transition::Duplicate
    );
    repo.advance(order.id, OrderStatus::Paid).await.unwrap();
    assert_eq!(
        repo.advance(order.id, OrderStatus::Cancelled).await.unwrap(),
        Transition::Ignored {
            from: OrderStatus::Paid
        }
    );

    let loaded = repo.get(order.id).await.unwrap().unwrap();
    assert_eq!(loaded.status, OrderStatus::Paid);
}

#[tokio::test]
#[ignore = "requires Docker"]
#[serial]
async fn advancing_unknown_order_is_not_found() {
    let repo = PostgresOrderRepository::new(get_test_pool().await);
    let err = repo
        .advance(OrderId::new(404), OrderStatus::Paid)
        .await
        .unwrap_err();
    assert!(matches!(err, DomainError::NotFound { .. }));
}

#[tokio::test]
#[ignore = "requires Docker"]
#[serial]
async fn stock_batch_rolls_back_when_one_product_would_go_negative() {
    let repo = PostgresProductRepository::new(get_test_pool().await);
    let a = repo.insert("A", 10, 2).await.unwrap();
    let b = repo.insert("B", 10, 5).await.unwrap();

    let mut deltas = StockDeltas::new();
    deltas.add(b.id, -1);
    deltas.add(a.id, -3);
    let err = repo.apply_stock_deltas(&deltas).await.unwrap_err();
    assert!(matches!(err, DomainError::InsufficientStock { .. }));

    assert_eq!(repo.get(a.id).await.unwrap().unwrap().stock, 2);
    assert_eq!(repo.get(b.id).await.unwrap().unwrap().stock, 5);
}

#[tokio::test]
#[ignore = "requires Docker"]
#[serial]
async fn reservation_is_idempotent_and_release_restocks_once() {
    let repo = PostgresProductRepository::new(get_test_pool().await);
    let a = repo.insert("A", 10, 5).await.unwrap();
    let order = OrderId::new(1);
    let lines = [StockLine::new(a.id, 2)];

    assert_eq!(
        repo.reserve(order, &lines).await.unwrap(),
        ReservationOutcome::Reserved
    );
    assert_eq!(
        repo.reserve(order, &lines).await.unwrap(),
        ReservationOutcome::AlreadyReserved
    );
    assert_eq!(repo.get(a.id).await.unwrap().unwrap().stock, 3);

    assert!(repo.release(order).await.unwrap());
    assert!(!repo.release(order).await.unwrap());
    assert_eq!(repo.get(a.id).await.unwrap().unwrap().stock, 5);
}

#[tokio::test]
#[ignore = "requires Docker"]
#[serial]
async fn insufficient_reservation_leaves_no_trace() {
    let repo = PostgresProductRepository::new(get_test_pool().await);
    let a = repo.insert("A", 10, 2).await.unwrap();
    let order = OrderId::new(1);

    let outcome = repo
        .reserve(order, &[StockLine::new(a.id, 3)])
        .await
        .unwrap();
    assert_eq!(outcome, ReservationOutcome::Insufficient { product_id: a.id });
    assert!(!repo.release(order).await.unwrap());

    // The rolled-back reservation does not block a later attempt.
    repo.apply_stock_deltas(&{
        let mut d = StockDeltas::new();
        d.add(a.id, 1);
        d
    })
    .await
    .unwrap();
    assert_eq!(
        repo.reserve(order, &[StockLine::new(a.id, 3)])
            .await
            .unwrap(),
        ReservationOutcome::Reserved
    );
}

#[tokio::test]
#[ignore = "requires Docker"]
#[serial]
async fn payment_lifecycle() {
    let pool = get_test_pool().await;
    let repo = PostgresPaymentRepository::new(pool.clone());

    let first = repo
        .insert_pending(OrderId::new(1), 500, "https://pay/1")
        .await
        .unwrap();
    let again = repo
        .insert_pending(OrderId::new(1), 999, "https://pay/other")
        .await
        .unwrap();
    assert_eq!(again.payment_url, first.payment_url);
    assert_eq!(again.status, PaymentStatus::Pending);

    repo.insert_pending(OrderId::new(2), 700, "https://pay/2")
        .await
        .unwrap();
    sqlx::query("UPDATE payments SET created_at = NOW() - INTERVAL '25 hours'")
        .execute(&pool)
        .await
        .unwrap();
    repo.update_status(OrderId::new(2), PaymentStatus::Success)
        .await
        .unwrap();

    let expired = repo.pending_older_than(Duration::hours(24)).await.unwrap();
    assert_eq!(expired.len(), 1);
    assert_eq!(expired[0].order_id, OrderId::new(1));

    let err = repo
        .update_status(OrderId::new(3), PaymentStatus::Failed)
        .await
        .unwrap_err();
    assert!(matches!(err, DomainError::NotFound { .. }));
}

#[tokio::test]
#[ignore = "requires Docker"]
#[serial]
async fn delivery_status_change_writes_outbox_row_atomically() {
    let repo = PostgresDeliveryRepository::new(get_test_pool().await);

    let (delivery, created) = repo.create_for_order(OrderId::new(42)).await.unwrap();
    assert!(created);
    assert_eq!(delivery.status, DeliveryStatus::Received);
    let (again, created) = repo.create_for_order(OrderId::new(42)).await.unwrap();
    assert!(!created);
    assert_eq!(again.id, delivery.id);

    repo.update_status(delivery.id, DeliveryStatus::InTransit)
        .await
        .unwrap();
    assert!(repo.unpublished().await.unwrap().is_empty());

    repo.update_status(delivery.id, DeliveryStatus::Delivered)
        .await
        .unwrap();
    let pending = repo.unpublished().await.unwrap();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].aggregate_status, "delivered");
    assert_eq!(pending[0].aggregate_id, delivery.id.get());
    assert_eq!(pending[0].related_id, 42);

    repo.mark_published(pending[0].id).await.unwrap();
    assert!(repo.unpublished().await.unwrap().is_empty());
    assert_eq!(
        repo.get_by_order(OrderId::new(42))
            .await
            .unwrap()
            .unwrap()
            .status,
        DeliveryStatus::Delivered
    );
}
