//! Product catalogue endpoints.

use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use common::ProductId;
use domain::{Product, ProductRepository};
use serde::{Deserialize, Serialize};

use super::parse_id;
use crate::AppState;
use crate::error::ApiError;

#[derive(Deserialize)]
pub struct CreateProductRequest {
    pub name: String,
    pub price: i64,
    pub stock: i64,
}

#[derive(Serialize)]
pub struct ProductResponse {
    pub id: ProductId,
    pub name: String,
    pub price: i64,
    pub stock: i64,
}

impl From<Product> for ProductResponse {
    fn from(product: Product) -> Self {
        Self {
            id: product.id,
            name: product.name,
            price: product.price,
            stock: product.stock,
        }
    }
}

/// POST /products
#[tracing::instrument(skip(state, req), fields(name = %req.name))]
pub async fn create(
    State(state): State<Arc<AppState>>,
    Json(req): Json<CreateProductRequest>,
) -> Result<(StatusCode, Json<ProductResponse>), ApiError> {
    if req.name.trim().is_empty() {
        return Err(ApiError::BadRequest("Product name is required".to_string()));
    }
    if req.price < 0 || req.stock < 0 {
        return Err(ApiError::BadRequest(
            "Price and stock must not be negative".to_string(),
        ));
    }

    let product = state
        .services
        .products
        .products()
        .insert(req.name.trim(), req.price, req.stock)
        .await?;
    Ok((StatusCode::CREATED, Json(product.into())))
}

/// GET /products/{id} — current stock included.
#[tracing::instrument(skip(state))]
pub async fn get(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<ProductResponse>, ApiError> {
    let product_id: ProductId = parse_id(&id)?;
    let product = state
        .services
        .products
        .products()
        .get(product_id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("Product not found: {product_id}")))?;
    Ok(Json(product.into()))
}
