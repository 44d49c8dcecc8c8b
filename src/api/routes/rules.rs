//! Alert rule endpoints

use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
};
use serde_json::{Value, json};

use crate::alerts::AlertRule;
use crate::api::{
    error::{ApiError, ApiResult},
    state::ApiState,
};

/// GET /api/v1/rules
///
/// Every rule, plus the rules that failed to evaluate in the last sweep
pub async fn list_rules(State(state): State<ApiState>) -> ApiResult<Json<Value>> {
    let rules = state.backend().list_rules().await?;
    let errors = state.alerts.rule_errors().await?;

    Ok(Json(json!({
        "rules": rules,
        "count": rules.len(),
        "errors": errors,
    })))
}

/// POST /api/v1/rules
pub async fn create_rule(
    State(state): State<ApiState>,
    Json(rule): Json<AlertRule>,
) -> ApiResult<(StatusCode, Json<AlertRule>)> {
    if state.backend().get_rule(&rule.id).await?.is_some() {
        return Err(ApiError::Conflict(format!("rule '{}' already exists", rule.id)));
    }

    state.alerts.upsert_rule(rule.clone()).await?;
    Ok((StatusCode::CREATED, Json(rule)))
}

/// PUT /api/v1/rules/:id
///
/// Creates or replaces; the id in the path wins over the body
pub async fn update_rule(
    State(state): State<ApiState>,
    Path(id): Path<String>,
    Json(mut rule): Json<AlertRule>,
) -> ApiResult<Json<AlertRule>> {
    rule.id = id;
    state.alerts.upsert_rule(rule.clone()).await?;
    Ok(Json(rule))
}
