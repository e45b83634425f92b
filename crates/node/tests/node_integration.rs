//! Integration tests for a node running every service on in-memory backends.

use std::sync::OnceLock;
use std::time::Duration;

use axum::Router;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use common::streams;
use log_store::{AppendOptions, Fields, LogStore};
use metrics_exporter_prometheus::PrometheusHandle;
use node::Node;
use node::config::Config;
use serde_json::{Value, json};
use tower::ServiceExt;

static METRICS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

fn get_metrics_handle() -> PrometheusHandle {
    METRICS_HANDLE
        .get_or_init(|| {
            metrics_exporter_prometheus::PrometheusBuilder::new()
                .install_recorder()
                .expect("failed to install Prometheus recorder")
        })
        .clone()
}

fn fast_config() -> Config {
    Config {
        worker_block: Duration::from_millis(20),
        retry_backoff: Duration::from_millis(10),
        outbox_idle: Duration::from_millis(10),
        ..Config::default()
    }
}

async fn setup() -> (Router, Node) {
    let node = Node::start(&fast_config()).await.unwrap();
    let app = node::create_app(node.state(), get_metrics_handle());
    (app, node)
}

async fn send(app: &Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let request = Request::builder().method(method).uri(uri);
    let request = match body {
        Some(body) => request
            .header("content-type", "application/json")
            .body(Body::from(body.to_string())),
        None => request.body(Body::empty()),
    }
    .unwrap();

    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let json = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or(Value::Null)
    };
    (status, json)
}

/// Polls `uri` until `accept` holds for a 200 response.
async fn wait_for<F>(app: &Router, uri: &str, accept: F) -> Value
where
    F: Fn(&Value) -> bool,
{
    for _ in 0..300 {
        let (status, json) = send(app, "GET", uri, None).await;
        if status == StatusCode::OK && accept(&json) {
            return json;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("{uri} never reached the expected state");
}

async fn wait_for_order_status(app: &Router, order_id: u64, status: &str) -> Value {
    wait_for(app, &format!("/orders/{order_id}"), |order| {
        order["status"] == status
    })
    .await
}

async fn create_product(app: &Router, stock: i64) -> u64 {
    let (status, product) = send(
        app,
        "POST",
        "/products",
        Some(json!({ "name": "Keyboard", "price": 500, "stock": stock })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    product["id"].as_u64().unwrap()
}

async fn place_order(app: &Router, product_id: u64, quantity: u32) -> u64 {
    let (status, order) = send(
        app,
        "POST",
        "/orders",
        Some(json!({
            "user_id": 1,
            "items": [{ "product_id": product_id, "quantity": quantity }]
        })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(order["status"], "RECEIVED");
    assert_eq!(order["total_amount"], 500 * i64::from(quantity));
    order["id"].as_u64().unwrap()
}

#[tokio::test]
async fn test_health_check() {
    let (app, node) = setup().await;

    let (status, json) = send(&app, "GET", "/health", None).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["status"], "ok");
    assert_eq!(json["services"].as_array().unwrap().len(), 6);
    node.shutdown().await;
}

#[tokio::test]
async fn test_metrics_endpoint() {
    let (app, node) = setup().await;

    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .uri("/metrics")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let content_type = response.headers()["content-type"].to_str().unwrap();
    assert!(content_type.starts_with("text/plain"));
    node.shutdown().await;
}

#[tokio::test]
async fn test_paid_order_is_delivered_and_shipped() {
    let (app, node) = setup().await;
    let product_id = create_product(&app, 5).await;
    let (status, _) = send(
        &app,
        "PUT",
        "/carts/1/items",
        Some(json!({ "product_id": product_id, "quantity": 2, "price": 500 })),
    )
    .await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let order_id = place_order(&app, product_id, 2).await;
    wait_for_order_status(&app, order_id, "AWAITING_PAYMENT").await;

    let payment = wait_for(&app, &format!("/payments/{order_id}"), |_| true).await;
    assert_eq!(payment["status"], "PENDING");
    assert_eq!(payment["amount"], 1000);
    assert!(payment["payment_url"].as_str().unwrap().contains(&order_id.to_string()));

    let (_, product) = send(&app, "GET", &format!("/products/{product_id}"), None).await;
    assert_eq!(product["stock"], 3);

    let (status, settled) = send(
        &app,
        "POST",
        "/payments/notifications",
        Some(json!({ "order_id": order_id, "transaction_status": "settlement" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(settled["status"], "SUCCESS");

    wait_for_order_status(&app, order_id, "PAID").await;
    let delivery = wait_for(&app, &format!("/orders/{order_id}/delivery"), |_| true).await;
    assert_eq!(delivery["status"], "RECEIVED");
    wait_for(&app, "/carts/1", |items| items.as_array().is_some_and(Vec::is_empty)).await;

    let delivery_id = delivery["id"].as_u64().unwrap();
    let (status, updated) = send(
        &app,
        "PUT",
        &format!("/deliveries/{delivery_id}/status"),
        Some(json!({ "status": "DELIVERED" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(updated["status"], "DELIVERED");

    wait_for_order_status(&app, order_id, "SHIPPED").await;
    node.shutdown().await;
}

#[tokio::test]
async fn test_insufficient_stock_cancels_order() {
    let (app, node) = setup().await;
    let product_id = create_product(&app, 1).await;

    let order_id = place_order(&app, product_id, 2).await;
    wait_for_order_status(&app, order_id, "CANCELLED").await;

    let (_, product) = send(&app, "GET", &format!("/products/{product_id}"), None).await;
    assert_eq!(product["stock"], 1);
    let (status, _) = send(&app, "GET", &format!("/payments/{order_id}"), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    node.shutdown().await;
}

#[tokio::test]
async fn test_failed_payment_cancels_order_and_restores_stock() {
    let (app, node) = setup().await;
    let product_id = create_product(&app, 5).await;
    let order_id = place_order(&app, product_id, 2).await;
    wait_for_order_status(&app, order_id, "AWAITING_PAYMENT").await;
    wait_for(&app, &format!("/payments/{order_id}"), |_| true).await;

    let (status, settled) = send(
        &app,
        "POST",
        "/payments/notifications",
        Some(json!({ "order_id": order_id, "transaction_status": "expire" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(settled["status"], "FAILED");

    wait_for_order_status(&app, order_id, "CANCELLED").await;
    wait_for(&app, &format!("/products/{product_id}"), |product| {
        product["stock"] == 5
    })
    .await;
    node.shutdown().await;
}

#[tokio::test]
async fn test_dlq_lists_dead_lettered_entries() {
    let (app, node) = setup().await;
    let fields: Fields = [("order_id".to_string(), "999".to_string())]
        .into_iter()
        .collect();
    let entry_id = node
        .state()
        .bus
        .append(streams::STOCK_RESERVED, &fields, AppendOptions::new())
        .await
        .unwrap();

    let dlq = wait_for(&app, "/dlq/stream:stock:reserved", |dlq| dlq["length"] == 1).await;

    assert_eq!(dlq["dlq_stream"], "stream:stock:reserved:dlq");
    let entry = &dlq["entries"][0]["fields"];
    assert_eq!(entry["order_id"], "999");
    assert_eq!(entry["error_reason"], "Exceeded max retries (5)");
    assert_eq!(entry["original_id"], entry_id.to_string());
    node.shutdown().await;
}

#[tokio::test]
async fn test_dlq_of_unknown_stream_is_not_found() {
    let (app, node) = setup().await;

    let (status, json) = send(&app, "GET", "/dlq/stream:inventory:reserved", None).await;

    assert_eq!(status, StatusCode::NOT_FOUND);
    assert!(json["error"].as_str().unwrap().contains("Unknown stream"));
    node.shutdown().await;
}

#[tokio::test]
async fn test_order_is_priced_from_catalogue() {
    let (app, node) = setup().await;
    let product_id = create_product(&app, 5).await;

    let (status, order) = send(
        &app,
        "POST",
        "/orders",
        Some(json!({
            "user_id": 1,
            "items": [{ "product_id": product_id, "quantity": 2, "price": 1 }]
        })),
    )
    .await;

    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(order["total_amount"], 1000);
    assert_eq!(order["items"][0]["price"], 500);

    let (status, json) = send(
        &app,
        "POST",
        "/orders",
        Some(json!({ "user_id": 1, "items": [{ "product_id": 404, "quantity": 1 }] })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(json["error"].as_str().unwrap().contains("404"));
    node.shutdown().await;
}

#[tokio::test]
async fn test_rejects_invalid_requests() {
    let (app, node) = setup().await;

    let (status, _) = send(&app, "GET", "/orders/not-a-number", None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = send(&app, "GET", "/orders/404", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = send(
        &app,
        "POST",
        "/orders",
        Some(json!({ "user_id": 1, "items": [] })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = send(
        &app,
        "PUT",
        "/deliveries/1/status",
        Some(json!({ "status": "LOST" })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, json) = send(
        &app,
        "POST",
        "/payments/notifications",
        Some(json!({ "order_id": 77, "transaction_status": "settlement" })),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert!(json["error"].as_str().unwrap().contains("77"));
    node.shutdown().await;
}
