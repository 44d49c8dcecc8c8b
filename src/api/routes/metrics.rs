//! Metric query endpoints

use axum::{
    Json,
    extract::{Path, Query, State},
};
use chrono::{DateTime, Duration, Utc};
use serde::Deserialize;
use serde_json::{Value, json};

use crate::api::{
    error::{ApiError, ApiResult},
    state::ApiState,
};
use crate::storage::MetricQuery;

/// Query parameters for a time range
#[derive(Debug, Deserialize)]
pub struct RangeParams {
    /// Only this metric
    metric: Option<String>,

    /// Start time (ISO 8601 format, default: 1 hour ago)
    start: Option<DateTime<Utc>>,

    /// End time (ISO 8601 format, default: now)
    end: Option<DateTime<Utc>>,

    /// Max results (default: 1000)
    limit: Option<usize>,
}

impl RangeParams {
    fn bounds(&self) -> ApiResult<(DateTime<Utc>, DateTime<Utc>)> {
        let end = self.end.unwrap_or_else(Utc::now);
        let start = self.start.unwrap_or_else(|| end - Duration::hours(1));
        if start > end {
            return Err(ApiError::InvalidRequest(
                "start must not be after end".to_string(),
            ));
        }
        Ok((start, end))
    }
}

/// GET /api/v1/collectors/:id/metrics
///
/// Points of a collector in `[start, end]`, ordered by time then metric name
pub async fn get_metrics(
    State(state): State<ApiState>,
    Path(collector_id): Path<String>,
    Query(params): Query<RangeParams>,
) -> ApiResult<Json<Value>> {
    let (start, end) = params.bounds()?;
    let limit = params.limit.unwrap_or(1000).min(10000);

    let mut query = MetricQuery::new(&collector_id, start, end).limit(limit);
    if let Some(metric) = &params.metric {
        query = query.metric(metric);
    }

    let metrics = state.store.query_range(query).await?;

    Ok(Json(json!({
        "collector_id": collector_id,
        "start": start.to_rfc3339(),
        "end": end.to_rfc3339(),
        "count": metrics.len(),
        "metrics": metrics,
    })))
}

/// GET /api/v1/collectors/:id/metrics/latest
///
/// Newest point of every metric the collector reported
pub async fn get_latest(
    State(state): State<ApiState>,
    Path(collector_id): Path<String>,
) -> ApiResult<Json<Value>> {
    let metrics = state.store.latest(&collector_id).await?;

    Ok(Json(json!({
        "collector_id": collector_id,
        "count": metrics.len(),
        "metrics": metrics,
    })))
}

/// GET /api/v1/collectors/:id/metrics/:name/summary
pub async fn get_summary(
    State(state): State<ApiState>,
    Path((collector_id, metric)): Path<(String, String)>,
    Query(params): Query<RangeParams>,
) -> ApiResult<Json<Value>> {
    let (start, end) = params.bounds()?;
    let summary = state.store.summary(&collector_id, &metric, start, end).await?;

    Ok(Json(json!({
        "collector_id": collector_id,
        "metric": metric,
        "start": start.to_rfc3339(),
        "end": end.to_rfc3339(),
        "summary": summary,
    })))
}
