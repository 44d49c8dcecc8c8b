//! Health check endpoint

use axum::{Json, extract::State};
use serde::Serialize;

use crate::api::{error::ApiResult, state::ApiState};
use crate::storage::BackendHealth;

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub timestamp: String,
    pub storage: BackendHealth,
    pub stream_clients: usize,
}

/// GET /api/v1/health
///
/// `ok` when the storage backend answers its health check, `degraded` otherwise
pub async fn health_check(State(state): State<ApiState>) -> ApiResult<Json<HealthResponse>> {
    let storage = state.backend().health_check().await?;

    Ok(Json(HealthResponse {
        status: if storage.healthy { "ok" } else { "degraded" },
        timestamp: chrono::Utc::now().to_rfc3339(),
        storage,
        stream_clients: state.hub.client_count(),
    }))
}
