//! Integration tests for the HTTP API and the live stream
//!
//! These tests verify that:
//! - Routes map registry, store and actor results to the right status codes
//! - Operator actions on alerts are validated
//! - Rules can be created and replaced over HTTP
//! - The bearer token is enforced when configured
//! - WebSocket clients receive filtered events after subscribing

use std::sync::Arc;
use std::time::Duration;

use axum::{
    Router,
    body::{Body, to_bytes},
    http::{Request, StatusCode, header},
};
use chrono::Duration as ChronoDuration;
use futures::{SinkExt, StreamExt};
use hearth::{
    actors::{SchedulerHandle, StorageHandle},
    alerts::{AlertFilter, AlertRule, ComparisonOp},
    api::{ApiState, router, spawn_api_server},
    config::ApiConfig,
    notify::Dispatcher,
    storage::StorageBackend,
    util::SystemClock,
};
use pretty_assertions::assert_eq;
use serde_json::{Value, json};
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tower::ServiceExt;

use crate::helpers::{HOUR, TestBed, manual_clock, ok, scheduler_config};

struct Api {
    bed: TestBed,
    state: ApiState,
    scheduler: SchedulerHandle,
}

impl Api {
    async fn new() -> Self {
        let bed = TestBed::new(vec![ok("nas", HOUR), ok("pi", HOUR)]).await;
        let scheduler = bed.scheduler(&scheduler_config()).await;
        let alerts = bed.alerts(
            manual_clock(),
            Dispatcher::new(bed.backend.clone(), Duration::from_secs(1)),
        );
        let storage = StorageHandle::spawn(bed.backend.clone(), None, Arc::new(SystemClock));

        let state = ApiState {
            registry: bed.registry.clone(),
            store: bed.store.clone(),
            hub: bed.hub.clone(),
            scheduler: scheduler.clone(),
            alerts,
            storage,
        };

        Self {
            bed,
            state,
            scheduler,
        }
    }

    fn app(&self) -> Router {
        self.app_with(&open_config())
    }

    fn app_with(&self, config: &ApiConfig) -> Router {
        router(config, self.state.clone())
    }

    async fn shutdown(self) {
        self.scheduler.shutdown().await.unwrap();
        self.state.alerts.shutdown().await;
        self.state.storage.shutdown().await;
    }
}

fn open_config() -> ApiConfig {
    ApiConfig {
        enable_cors: false,
        ..ApiConfig::default()
    }
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

fn send(method: &str, uri: &str, body: Option<Value>) -> Request<Body> {
    let builder = Request::builder().method(method).uri(uri);
    match body {
        Some(body) => builder
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    }
}

async fn call(app: Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = app.oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let body = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or(Value::Null)
    };
    (status, body)
}

#[tokio::test]
async fn test_health_and_collectors() {
    let api = Api::new().await;

    let (status, body) = call(api.app(), get("/api/v1/health")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
    assert_eq!(body["storage"]["healthy"], true);

    let (status, body) = call(api.app(), get("/api/v1/collectors")).await;
    assert_eq!(status, StatusCode::OK);
    let collectors = body["collectors"].as_array().unwrap();
    assert_eq!(collectors.len(), 2);
    assert!(collectors.iter().all(|c| c["scheduled"] == true));

    let (status, body) = call(api.app(), get("/api/v1/collectors/ghost")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert!(body["error"].as_str().unwrap().contains("ghost"));

    api.shutdown().await;
}

#[tokio::test]
async fn test_disabled_collector_cannot_run() {
    let api = Api::new().await;

    let (status, body) = call(api.app(), send("POST", "/api/v1/collectors/pi/disable", None)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["enabled"], false);

    let (status, _) = call(api.app(), send("POST", "/api/v1/collectors/pi/run", None)).await;
    assert_eq!(status, StatusCode::CONFLICT);
    let (status, _) = call(api.app(), get("/api/v1/collectors/pi/probe")).await;
    assert_eq!(status, StatusCode::CONFLICT);

    let (status, _) = call(api.app(), send("POST", "/api/v1/collectors/pi/enable", None)).await;
    assert_eq!(status, StatusCode::OK);
    let (status, body) = call(api.app(), send("POST", "/api/v1/collectors/pi/run", None)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["execution"]["status"], "success");

    api.shutdown().await;
}

#[tokio::test]
async fn test_interval_update_is_validated() {
    let api = Api::new().await;

    let (status, _) = call(
        api.app(),
        send("PUT", "/api/v1/collectors/nas/interval", Some(json!({ "interval_secs": 0 }))),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, body) = call(
        api.app(),
        send("PUT", "/api/v1/collectors/nas/interval", Some(json!({ "interval_secs": 120 }))),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["interval_secs"], 120);

    api.shutdown().await;
}

#[tokio::test]
async fn test_metrics_after_run() {
    let api = Api::new().await;
    api.scheduler.run_now("nas").await.unwrap();

    let (status, body) = call(api.app(), get("/api/v1/collectors/nas/metrics/latest")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["metrics"][0]["metric_name"], "value");
    assert_eq!(body["metrics"][0]["value"], 1.0);

    let (status, body) = call(api.app(), get("/api/v1/collectors/nas/executions?limit=1")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["count"], 1);

    let (status, _) = call(
        api.app(),
        get("/api/v1/collectors/nas/metrics?start=2030-01-02T00:00:00Z&end=2030-01-01T00:00:00Z"),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    api.shutdown().await;
}

#[tokio::test]
async fn test_alert_actions_are_validated() {
    let api = Api::new().await;

    let (status, _) = call(api.app(), send("POST", "/api/v1/alerts/999/acknowledge", None)).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    api.bed
        .rule(AlertRule::threshold("cpu", "host", "value", ComparisonOp::Lt, 5.0))
        .await;
    api.scheduler.run_now("nas").await.unwrap();
    let (status, body) = call(api.app(), send("POST", "/api/v1/alerts/evaluate", None)).await;
    assert_eq!(status, StatusCode::OK);
    assert!(body["triggered"].as_u64().unwrap() >= 1);

    let open = api.bed.backend.list_alerts(AlertFilter::open()).await.unwrap();
    let id = open[0].id;

    let (status, body) = call(
        api.app(),
        send(
            "POST",
            &format!("/api/v1/alerts/{id}/acknowledge"),
            Some(json!({ "by": "alice" })),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "acknowledged");
    assert_eq!(body["acknowledged_by"], "alice");

    // acknowledging twice is not a valid transition
    let acknowledge = format!("/api/v1/alerts/{id}/acknowledge");
    let (status, _) = call(api.app(), send("POST", &acknowledge, None)).await;
    assert_eq!(status, StatusCode::CONFLICT);

    let (status, _) = call(
        api.app(),
        send("POST", &format!("/api/v1/alerts/{id}/snooze"), Some(json!({ "minutes": 0 }))),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let until = chrono::Utc::now() + ChronoDuration::hours(2);
    let (status, _) = call(
        api.app(),
        send("POST", &format!("/api/v1/alerts/{id}/snooze"), Some(json!({ "until": until }))),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = call(api.app(), get("/api/v1/alerts?open_only=true")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["count"], open.len());

    let (status, _) = call(api.app(), get("/api/v1/alerts/999/notifications")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    api.shutdown().await;
}

#[tokio::test]
async fn test_rules_create_conflict_and_replace() {
    let api = Api::new().await;
    let rule = json!({
        "id": "disk",
        "resource_type": "host",
        "metric_name": "disk_percent",
        "severity": "warning",
        "condition": { "type": "leaf", "metric": "disk_percent", "op": "gt", "threshold": 90 }
    });

    let (status, _) = call(api.app(), send("POST", "/api/v1/rules", Some(rule.clone()))).await;
    assert_eq!(status, StatusCode::CREATED);

    let (status, _) = call(api.app(), send("POST", "/api/v1/rules", Some(rule.clone()))).await;
    assert_eq!(status, StatusCode::CONFLICT);

    let mut replaced = rule.clone();
    replaced["severity"] = json!("critical");
    let (status, body) = call(api.app(), send("PUT", "/api/v1/rules/disk", Some(replaced))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["severity"], "critical");

    let mut invalid = rule;
    invalid["id"] = json!("empty");
    invalid["condition"] = json!({ "type": "group", "operator": "and", "children": [] });
    let (status, _) = call(api.app(), send("POST", "/api/v1/rules", Some(invalid))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, body) = call(api.app(), get("/api/v1/rules")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["count"], 1);
    assert_eq!(body["rules"][0]["severity"], "critical");

    api.shutdown().await;
}

#[tokio::test]
async fn test_auth_token_is_enforced() {
    let api = Api::new().await;
    let config = ApiConfig {
        auth_token: Some("s3cret".to_string()),
        ..open_config()
    };

    let (status, _) = call(api.app_with(&config), get("/api/v1/health")).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let request = Request::builder()
        .uri("/api/v1/health")
        .header(header::AUTHORIZATION, "Bearer wrong")
        .body(Body::empty())
        .unwrap();
    let (status, _) = call(api.app_with(&config), request).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let request = Request::builder()
        .uri("/api/v1/health")
        .header(header::AUTHORIZATION, "Bearer s3cret")
        .body(Body::empty())
        .unwrap();
    let (status, _) = call(api.app_with(&config), request).await;
    assert_eq!(status, StatusCode::OK);

    let (status, _) = call(api.app_with(&config), get("/api/v1/health?token=s3cret")).await;
    assert_eq!(status, StatusCode::OK);

    api.shutdown().await;
}

async fn next_text<S>(socket: &mut S) -> Value
where
    S: StreamExt<Item = Result<Message, tokio_tungstenite::tungstenite::Error>> + Unpin,
{
    loop {
        let message = tokio::time::timeout(Duration::from_secs(5), socket.next())
            .await
            .expect("no frame within 5s")
            .unwrap()
            .unwrap();
        if let Message::Text(text) = message {
            return serde_json::from_str(&text).unwrap();
        }
    }
}

#[tokio::test]
async fn test_stream_subscription_filters_events() {
    let api = Api::new().await;
    let config = ApiConfig {
        bind_addr: "127.0.0.1:0".parse().unwrap(),
        ..open_config()
    };
    let addr = spawn_api_server(&config, api.state.clone()).await.unwrap();

    let (mut socket, _) = connect_async(format!("ws://{addr}/api/v1/stream"))
        .await
        .unwrap();

    socket
        .send(Message::Text(
            json!({ "action": "subscribe", "collector_ids": ["pi"] }).to_string(),
        ))
        .await
        .unwrap();
    let reply = next_text(&mut socket).await;
    assert_eq!(reply["type"], "subscribed");
    assert_eq!(reply["collector_ids"], json!(["pi"]));

    // events for other collectors are filtered out
    api.scheduler.run_now("nas").await.unwrap();
    api.scheduler.run_now("pi").await.unwrap();

    let event = next_text(&mut socket).await;
    assert_eq!(event["type"], "metrics_update");
    assert_eq!(event["collector_id"], "pi");
    let event = next_text(&mut socket).await;
    assert_eq!(event["type"], "execution_complete");
    assert_eq!(event["record"]["collector_id"], "pi");

    socket
        .send(Message::Text("not json".to_string()))
        .await
        .unwrap();
    let reply = next_text(&mut socket).await;
    assert_eq!(reply["type"], "error");

    api.shutdown().await;
}
