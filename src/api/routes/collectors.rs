//! Collector registry endpoints

use std::time::Duration;

use axum::{
    Json,
    extract::{Path, Query, State},
};
use serde::Deserialize;
use serde_json::{Value, json};

use crate::api::{
    error::{ApiError, ApiResult},
    state::ApiState,
};
use crate::collector::HealthReport;
use crate::registry::CollectorStatus;

#[derive(Debug, Deserialize)]
pub struct IntervalUpdate {
    interval_secs: u64,
}

#[derive(Debug, Deserialize)]
pub struct ExecutionQuery {
    /// Max records (default: 50)
    limit: Option<usize>,
}

/// GET /api/v1/collectors
///
/// Every registration with its health and whether a worker is running for it
pub async fn list_collectors(State(state): State<ApiState>) -> ApiResult<Json<Value>> {
    let statuses = state.registry.statuses().await?;
    let scheduled = state.scheduler.scheduled().await?;

    let collectors: Vec<Value> = statuses
        .into_iter()
        .map(|status| {
            let is_scheduled = scheduled
                .iter()
                .any(|s| s.collector_id == status.registration.id);
            let mut value = json!(status);
            value["scheduled"] = json!(is_scheduled);
            value
        })
        .collect();

    Ok(Json(json!({
        "collectors": collectors,
        "count": collectors.len(),
    })))
}

/// GET /api/v1/collectors/:id
pub async fn get_collector(
    State(state): State<ApiState>,
    Path(id): Path<String>,
) -> ApiResult<Json<CollectorStatus>> {
    Ok(Json(state.registry.status(&id).await?))
}

async fn set_enabled(
    state: &ApiState,
    id: &str,
    enabled: bool,
) -> ApiResult<Json<CollectorStatus>> {
    state.registry.set_enabled(id, enabled).await?;
    state.scheduler.refresh().await?;
    Ok(Json(state.registry.status(id).await?))
}

/// POST /api/v1/collectors/:id/enable
pub async fn enable_collector(
    State(state): State<ApiState>,
    Path(id): Path<String>,
) -> ApiResult<Json<CollectorStatus>> {
    set_enabled(&state, &id, true).await
}

/// POST /api/v1/collectors/:id/disable
///
/// Soft-disable: the registration and its history are kept
pub async fn disable_collector(
    State(state): State<ApiState>,
    Path(id): Path<String>,
) -> ApiResult<Json<CollectorStatus>> {
    set_enabled(&state, &id, false).await
}

/// PUT /api/v1/collectors/:id/config
///
/// Takes effect on the next run
pub async fn update_config(
    State(state): State<ApiState>,
    Path(id): Path<String>,
    Json(config): Json<Value>,
) -> ApiResult<Json<CollectorStatus>> {
    state.registry.update_config(&id, config).await?;
    Ok(Json(state.registry.status(&id).await?))
}

/// PUT /api/v1/collectors/:id/interval
pub async fn update_interval(
    State(state): State<ApiState>,
    Path(id): Path<String>,
    Json(update): Json<IntervalUpdate>,
) -> ApiResult<Json<CollectorStatus>> {
    if update.interval_secs == 0 {
        return Err(ApiError::InvalidRequest(
            "interval_secs must be at least 1".to_string(),
        ));
    }

    state
        .registry
        .update_interval(&id, Duration::from_secs(update.interval_secs))
        .await?;
    state.scheduler.refresh().await?;
    Ok(Json(state.registry.status(&id).await?))
}

/// POST /api/v1/collectors/:id/run
///
/// Runs the collector now and returns its execution record. `null` when the
/// run was cancelled.
pub async fn run_now(
    State(state): State<ApiState>,
    Path(id): Path<String>,
) -> ApiResult<Json<Value>> {
    let registration = state.registry.get(&id).await?;
    if !registration.enabled {
        return Err(ApiError::Conflict(format!("collector '{id}' is disabled")));
    }

    let record = state.scheduler.run_now(&id).await?;
    Ok(Json(json!({ "execution": record })))
}

/// GET /api/v1/collectors/:id/probe
pub async fn probe(
    State(state): State<ApiState>,
    Path(id): Path<String>,
) -> ApiResult<Json<HealthReport>> {
    let registration = state.registry.get(&id).await?;
    if !registration.enabled {
        return Err(ApiError::Conflict(format!("collector '{id}' is disabled")));
    }

    Ok(Json(state.scheduler.probe(&id).await?))
}

/// GET /api/v1/collectors/:id/executions
pub async fn list_executions(
    State(state): State<ApiState>,
    Path(id): Path<String>,
    Query(query): Query<ExecutionQuery>,
) -> ApiResult<Json<Value>> {
    state.registry.get(&id).await?;
    let limit = query.limit.unwrap_or(50).min(1000);

    let executions = state.backend().query_executions(&id, limit).await?;

    Ok(Json(json!({
        "collector_id": id,
        "count": executions.len(),
        "executions": executions,
    })))
}
