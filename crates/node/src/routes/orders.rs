//! Order placement and lookup endpoints.

use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use chrono::{DateTime, Utc};
use common::{OrderId, ProductId, UserId};
use domain::{DeliveryRepository, NewOrder, Order, OrderItem, OrderRepository, ProductRepository};
use serde::{Deserialize, Serialize};

use super::deliveries::DeliveryResponse;
use super::parse_id;
use crate::AppState;
use crate::error::ApiError;

// -- Request types --

#[derive(Deserialize)]
pub struct PlaceOrderRequest {
    pub user_id: UserId,
    pub items: Vec<OrderItemRequest>,
}

/// An ordered line; the price is taken from the product catalogue.
#[derive(Deserialize)]
pub struct OrderItemRequest {
    pub product_id: ProductId,
    pub quantity: u32,
}

// -- Response types --

#[derive(Serialize)]
pub struct OrderResponse {
    pub id: OrderId,
    pub user_id: UserId,
    pub status: String,
    pub total_amount: i64,
    pub items: Vec<OrderItemResponse>,
    pub created_at: DateTime<Utc>,
}

#[derive(Serialize)]
pub struct OrderItemResponse {
    pub product_id: ProductId,
    pub quantity: u32,
    pub price: i64,
}

impl From<Order> for OrderResponse {
    fn from(order: Order) -> Self {
        Self {
            id: order.id,
            user_id: order.user_id,
            status: order.status.to_string(),
            total_amount: order.total_amount,
            items: order
                .items
                .into_iter()
                .map(|item| OrderItemResponse {
                    product_id: item.product_id,
                    quantity: item.quantity,
                    price: item.price,
                })
                .collect(),
            created_at: order.created_at,
        }
    }
}

// -- Handlers --

/// POST /orders — prices the items from the catalogue, stores the order and
/// announces it on `stream:orders:created`.
#[tracing::instrument(skip(state, req), fields(user_id = %req.user_id))]
pub async fn place(
    State(state): State<Arc<AppState>>,
    Json(req): Json<PlaceOrderRequest>,
) -> Result<(StatusCode, Json<OrderResponse>), ApiError> {
    if req.items.is_empty() {
        return Err(ApiError::BadRequest("Order has no items".to_string()));
    }
    let mut items = Vec::with_capacity(req.items.len());
    for item in req.items {
        if item.quantity == 0 {
            return Err(ApiError::BadRequest(format!(
                "Quantity of product {} must be positive",
                item.product_id
            )));
        }
        let product = state
            .services
            .products
            .products()
            .get(item.product_id)
            .await?
            .ok_or_else(|| {
                ApiError::BadRequest(format!("Unknown product: {}", item.product_id))
            })?;
        items.push(OrderItem::new(item.product_id, item.quantity, product.price));
    }

    let order = state
        .services
        .orders
        .place_order(NewOrder::new(req.user_id, items))
        .await?;
    Ok((StatusCode::CREATED, Json(order.into())))
}

/// GET /orders/{id}
#[tracing::instrument(skip(state))]
pub async fn get(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<OrderResponse>, ApiError> {
    let order_id: OrderId = parse_id(&id)?;
    let order = state
        .services
        .orders
        .orders()
        .get(order_id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("Order not found: {order_id}")))?;
    Ok(Json(order.into()))
}

/// GET /orders/{id}/delivery — the delivery opened once the order was paid.
#[tracing::instrument(skip(state))]
pub async fn delivery(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<DeliveryResponse>, ApiError> {
    let order_id: OrderId = parse_id(&id)?;
    let delivery = state
        .services
        .deliveries
        .deliveries()
        .get_by_order(order_id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("No delivery for order {order_id}")))?;
    Ok(Json(delivery.into()))
}
