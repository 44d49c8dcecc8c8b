//! System statistics endpoints

use axum::{Json, extract::State};
use serde_json::{Value, json};

use crate::actors::CleanupReport;
use crate::api::{error::ApiResult, state::ApiState};

/// GET /api/v1/stats
///
/// Storage statistics plus what is currently scheduled
pub async fn get_stats(State(state): State<ApiState>) -> ApiResult<Json<Value>> {
    let storage = state.storage.get_stats().await?;
    let scheduled = state.scheduler.scheduled().await?;

    Ok(Json(json!({
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "storage": storage,
        "scheduled": scheduled,
        "stream_clients": state.hub.client_count(),
    })))
}

/// POST /api/v1/storage/cleanup
pub async fn run_cleanup(State(state): State<ApiState>) -> ApiResult<Json<CleanupReport>> {
    Ok(Json(state.storage.run_cleanup().await?))
}
