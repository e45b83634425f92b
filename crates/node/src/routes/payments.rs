//! Payment lookup and provider notification endpoints.

use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, State};
use common::OrderId;
use domain::{Payment, PaymentRepository};
use saga::{PaymentNotification, ProviderTransaction};
use serde::{Deserialize, Serialize};

use super::parse_id;
use crate::AppState;
use crate::error::ApiError;

/// Transaction-state callback sent by the payment provider.
#[derive(Deserialize)]
pub struct NotificationRequest {
    pub order_id: OrderId,
    pub transaction_status: String,
    pub fraud_status: Option<String>,
}

#[derive(Serialize)]
pub struct PaymentResponse {
    pub order_id: OrderId,
    pub amount: i64,
    pub payment_url: String,
    pub status: String,
}

impl From<Payment> for PaymentResponse {
    fn from(payment: Payment) -> Self {
        Self {
            order_id: payment.order_id,
            amount: payment.amount,
            payment_url: payment.payment_url,
            status: payment.status.to_string(),
        }
    }
}

#[derive(Serialize)]
pub struct NotificationResponse {
    pub order_id: OrderId,
    pub status: String,
}

/// POST /payments/notifications — settles the order's payment and publishes
/// payment-success or payment-failed.
#[tracing::instrument(skip(state, req), fields(order_id = %req.order_id))]
pub async fn notify(
    State(state): State<Arc<AppState>>,
    Json(req): Json<NotificationRequest>,
) -> Result<Json<NotificationResponse>, ApiError> {
    let mut transaction = ProviderTransaction::new(req.transaction_status);
    if let Some(fraud_status) = req.fraud_status {
        transaction = transaction.with_fraud_status(fraud_status);
    }
    let notification = PaymentNotification {
        order_id: req.order_id,
        transaction,
    };

    let status = state
        .services
        .payments
        .handle_notification(&notification)
        .await?;
    Ok(Json(NotificationResponse {
        order_id: req.order_id,
        status: status.to_string(),
    }))
}

/// GET /payments/{order_id}
#[tracing::instrument(skip(state))]
pub async fn get(
    State(state): State<Arc<AppState>>,
    Path(order_id): Path<String>,
) -> Result<Json<PaymentResponse>, ApiError> {
    let order_id: OrderId = parse_id(&order_id)?;
    let payment = state
        .services
        .payments
        .payments()
        .get_by_order(order_id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("No payment for order {order_id}")))?;
    Ok(Json(payment.into()))
}
