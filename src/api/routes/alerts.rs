//! Alert instance endpoints

use axum::{
    Json,
    extract::{Path, Query, State},
};
use chrono::{DateTime, Duration, Utc};
use serde::Deserialize;
use serde_json::{Value, json};

use crate::actors::SweepReport;
use crate::alerts::{AlertFilter, AlertInstance};
use crate::api::{
    error::{ApiError, ApiResult},
    state::ApiState,
};

/// Body of acknowledge and resolve
#[derive(Debug, Default, Deserialize)]
pub struct OperatorAction {
    by: Option<String>,
}

/// Body of snooze: an absolute time or a number of minutes from now
#[derive(Debug, Deserialize)]
pub struct SnoozeRequest {
    until: Option<DateTime<Utc>>,
    minutes: Option<i64>,
}

/// GET /api/v1/alerts
///
/// Newest first. Filters: `status`, `rule_id`, `resource_id`, `open_only`, `limit`
pub async fn list_alerts(
    State(state): State<ApiState>,
    Query(filter): Query<AlertFilter>,
) -> ApiResult<Json<Value>> {
    let alerts = state.backend().list_alerts(filter).await?;

    Ok(Json(json!({
        "alerts": alerts,
        "count": alerts.len(),
    })))
}

/// POST /api/v1/alerts/evaluate
pub async fn evaluate_now(State(state): State<ApiState>) -> ApiResult<Json<SweepReport>> {
    Ok(Json(state.alerts.evaluate_now().await?))
}

/// POST /api/v1/alerts/:id/acknowledge
pub async fn acknowledge(
    State(state): State<ApiState>,
    Path(id): Path<i64>,
    body: Option<Json<OperatorAction>>,
) -> ApiResult<Json<AlertInstance>> {
    let action = body.map(|Json(action)| action).unwrap_or_default();
    Ok(Json(state.alerts.acknowledge(id, action.by).await?))
}

/// POST /api/v1/alerts/:id/resolve
pub async fn resolve(
    State(state): State<ApiState>,
    Path(id): Path<i64>,
    body: Option<Json<OperatorAction>>,
) -> ApiResult<Json<AlertInstance>> {
    let action = body.map(|Json(action)| action).unwrap_or_default();
    Ok(Json(state.alerts.resolve(id, action.by).await?))
}

/// POST /api/v1/alerts/:id/snooze
pub async fn snooze(
    State(state): State<ApiState>,
    Path(id): Path<i64>,
    Json(request): Json<SnoozeRequest>,
) -> ApiResult<Json<AlertInstance>> {
    let until = match (request.until, request.minutes) {
        (Some(until), None) => until,
        (None, Some(minutes)) if minutes > 0 => Utc::now() + Duration::minutes(minutes),
        _ => {
            return Err(ApiError::InvalidRequest(
                "expected either 'until' or a positive 'minutes'".to_string(),
            ));
        }
    };

    Ok(Json(state.alerts.snooze(id, until).await?))
}

/// GET /api/v1/alerts/:id/notifications
///
/// Delivery attempts for one alert, in the order they were made
pub async fn list_notifications(
    State(state): State<ApiState>,
    Path(id): Path<i64>,
) -> ApiResult<Json<Value>> {
    if state.backend().get_alert(id).await?.is_none() {
        return Err(ApiError::NotFound(format!("alert not found: {id}")));
    }
    let notifications = state.backend().list_notifications(Some(id)).await?;

    Ok(Json(json!({
        "alert_id": id,
        "count": notifications.len(),
        "notifications": notifications,
    })))
}
