//! Health check endpoint.

use std::sync::Arc;

use axum::Json;
use axum::extract::State;
use serde::Serialize;

use crate::AppState;

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    /// Services whose consumers run on this node.
    pub services: Vec<&'static str>,
}

/// GET /health — returns node health and the services it runs.
pub async fn check(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        services: state.running.iter().map(|service| service.as_str()).collect(),
    })
}
