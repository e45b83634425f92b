//! Dead-letter inspection endpoint.

use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, Query, State};
use common::{dlq_stream, streams};
use log_store::{Fields, LogStore};
use serde::{Deserialize, Serialize};

use crate::AppState;
use crate::error::ApiError;

const DEFAULT_LIMIT: usize = 100;

#[derive(Deserialize)]
pub struct DlqQuery {
    pub limit: Option<usize>,
}

#[derive(Serialize)]
pub struct DlqResponse {
    pub stream: String,
    pub dlq_stream: String,
    /// Entries currently parked, including those past `limit`.
    pub length: usize,
    pub entries: Vec<DlqEntryResponse>,
}

#[derive(Serialize)]
pub struct DlqEntryResponse {
    pub id: String,
    /// The source entry's fields plus `error_reason`, `failed_at` and `original_id`.
    pub fields: Fields,
}

/// GET /dlq/{stream} — lists the oldest dead-lettered entries of a saga stream.
#[tracing::instrument(skip(state, query))]
pub async fn list(
    State(state): State<Arc<AppState>>,
    Path(stream): Path<String>,
    Query(query): Query<DlqQuery>,
) -> Result<Json<DlqResponse>, ApiError> {
    if !streams::ALL.contains(&stream.as_str()) {
        return Err(ApiError::NotFound(format!("Unknown stream: {stream}")));
    }

    let dlq = dlq_stream(&stream);
    let limit = query.limit.unwrap_or(DEFAULT_LIMIT);
    let length = state.bus.len(&dlq).await?;
    let entries = state
        .bus
        .range(&dlq, limit)
        .await?
        .into_iter()
        .map(|entry| DlqEntryResponse {
            id: entry.id.to_string(),
            fields: entry.fields,
        })
        .collect();

    Ok(Json(DlqResponse {
        stream,
        dlq_stream: dlq,
        length,
        entries,
    }))
}
