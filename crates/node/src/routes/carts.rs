//! Cart endpoints.

use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use common::{ProductId, UserId};
use domain::{CartItem, CartRepository};
use serde::{Deserialize, Serialize};

use super::parse_id;
use crate::AppState;
use crate::error::ApiError;

#[derive(Deserialize, Serialize)]
pub struct CartItemBody {
    pub product_id: ProductId,
    pub quantity: u32,
    pub price: i64,
}

impl From<CartItem> for CartItemBody {
    fn from(item: CartItem) -> Self {
        Self {
            product_id: item.product_id,
            quantity: item.quantity,
            price: item.price,
        }
    }
}

/// PUT /carts/{user_id}/items — adds or replaces the line of a product.
#[tracing::instrument(skip(state, req), fields(product_id = %req.product_id))]
pub async fn put_item(
    State(state): State<Arc<AppState>>,
    Path(user_id): Path<String>,
    Json(req): Json<CartItemBody>,
) -> Result<StatusCode, ApiError> {
    let user_id: UserId = parse_id(&user_id)?;
    if req.quantity == 0 {
        return Err(ApiError::BadRequest("Quantity must be positive".to_string()));
    }

    let item = CartItem {
        product_id: req.product_id,
        quantity: req.quantity,
        price: req.price,
    };
    state.services.carts.carts().put_item(user_id, item).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// GET /carts/{user_id}
#[tracing::instrument(skip(state))]
pub async fn items(
    State(state): State<Arc<AppState>>,
    Path(user_id): Path<String>,
) -> Result<Json<Vec<CartItemBody>>, ApiError> {
    let user_id: UserId = parse_id(&user_id)?;
    let items = state.services.carts.carts().items(user_id).await?;
    Ok(Json(items.into_iter().map(CartItemBody::from).collect()))
}
