//! Delivery status endpoint.

use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, State};
use common::{DeliveryId, OrderId};
use domain::{Delivery, DeliveryStatus};
use serde::{Deserialize, Serialize};

use super::parse_id;
use crate::AppState;
use crate::error::ApiError;

#[derive(Deserialize)]
pub struct UpdateStatusRequest {
    /// `RECEIVED`, `IN_TRANSIT`, `DELIVERED` or `FAILED`.
    pub status: String,
}

#[derive(Serialize)]
pub struct DeliveryResponse {
    pub id: DeliveryId,
    pub order_id: OrderId,
    pub status: String,
}

impl From<Delivery> for DeliveryResponse {
    fn from(delivery: Delivery) -> Self {
        Self {
            id: delivery.id,
            order_id: delivery.order_id,
            status: delivery.status.to_string(),
        }
    }
}

/// PUT /deliveries/{id}/status — DELIVERED and FAILED are announced through
/// the delivery outbox.
#[tracing::instrument(skip(state, req), fields(status = %req.status))]
pub async fn update_status(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(req): Json<UpdateStatusRequest>,
) -> Result<Json<DeliveryResponse>, ApiError> {
    let delivery_id: DeliveryId = parse_id(&id)?;
    let status: DeliveryStatus = req.status.trim().to_ascii_uppercase().parse()?;
    let delivery = state
        .services
        .deliveries
        .update_status(delivery_id, status)
        .await?;
    Ok(Json(delivery.into()))
}
