//! Integration tests for the collection pipeline
//!
//! These tests verify that:
//! - Scheduled runs commit executions and drive health
//! - A failing collector does not affect its siblings
//! - Timeouts are recorded exactly once
//! - Registry changes reach the scheduler on refresh
//! - Stream events follow the commit

use std::time::Duration;

use hearth::{
    health::HealthState,
    storage::{ExecutionStatus, StorageBackend},
};
use pretty_assertions::assert_eq;
use serde_json::json;

use crate::helpers::{TestBed, ok, scheduler_config, scripted};

#[tokio::test(start_paused = true)]
async fn test_failing_collector_degrades_then_fails_while_sibling_stays_healthy() {
    let interval = Duration::from_secs(10);
    let bed = TestBed::new(vec![
        scripted("bad", interval, json!({ "mode": "fail" })),
        ok("good", interval),
    ])
    .await;
    let scheduler = bed.scheduler(&scheduler_config()).await;

    // "bad" runs at 0s, 10s, 20s, 30s; "good" is staggered by 5s
    tokio::time::sleep(Duration::from_secs(35)).await;
    let bad = bed.backend.get_health("bad").await.unwrap().unwrap();
    assert_eq!(bad.consecutive_errors, 4);
    assert_eq!(bad.state, HealthState::Degraded);

    // fifth run at 40s
    tokio::time::sleep(Duration::from_secs(7)).await;
    let bad = bed.backend.get_health("bad").await.unwrap().unwrap();
    assert_eq!(bad.consecutive_errors, 5);
    assert_eq!(bad.state, HealthState::Failing);
    assert_eq!(bad.last_error.as_deref(), Some("collection failed: device unreachable"));

    let good = bed.backend.get_health("good").await.unwrap().unwrap();
    assert_eq!(good.state, HealthState::Healthy);
    assert_eq!(good.consecutive_errors, 0);

    let executions = bed.backend.query_executions("bad", 100).await.unwrap();
    assert_eq!(executions.len(), 5);
    assert!(executions.iter().all(|e| e.status == ExecutionStatus::Failed));

    scheduler.shutdown().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_timeout_is_recorded_once() {
    let script = json!({ "mode": "slow", "millis": 60_000 });
    let registration =
        scripted("slow", Duration::from_secs(3600), script).timeout(Duration::from_secs(2));
    let bed = TestBed::new(vec![registration]).await;
    let scheduler = bed.scheduler(&scheduler_config()).await;

    tokio::time::sleep(Duration::from_secs(10)).await;

    let executions = bed.backend.query_executions("slow", 10).await.unwrap();
    assert_eq!(executions.len(), 1);
    assert_eq!(executions[0].status, ExecutionStatus::Timeout);
    assert_eq!(executions[0].metric_count, 0);

    let health = bed.backend.get_health("slow").await.unwrap().unwrap();
    assert_eq!(health.consecutive_errors, 1);
    assert!(bed.backend.latest_values("slow").await.unwrap().is_empty());

    scheduler.shutdown().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_success_resets_health() {
    let bed = TestBed::new(vec![scripted(
        "flaky",
        Duration::from_secs(3600),
        json!({ "mode": "fail" }),
    )])
    .await;
    let scheduler = bed.scheduler(&scheduler_config()).await;

    for _ in 0..3 {
        scheduler.run_now("flaky").await.unwrap();
    }
    let health = bed.backend.get_health("flaky").await.unwrap().unwrap();
    assert_eq!(health.state, HealthState::Degraded);

    bed.registry
        .update_config("flaky", json!({ "mode": "ok", "value": 7.0 }))
        .await
        .unwrap();
    let record = scheduler.run_now("flaky").await.unwrap().unwrap();
    assert_eq!(record.status, ExecutionStatus::Success);

    let health = bed.backend.get_health("flaky").await.unwrap().unwrap();
    assert_eq!(health.state, HealthState::Healthy);
    assert_eq!(health.consecutive_errors, 0);
    assert!(health.last_success.is_some());

    scheduler.shutdown().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_disable_and_enable_through_refresh() {
    let bed = TestBed::new(vec![
        ok("a", Duration::from_secs(60)),
        ok("b", Duration::from_secs(60)),
    ])
    .await;
    let scheduler = bed.scheduler(&scheduler_config()).await;
    assert_eq!(scheduler.scheduled().await.unwrap().len(), 2);

    bed.registry.set_enabled("b", false).await.unwrap();
    let report = scheduler.refresh().await.unwrap();
    assert_eq!(report.stopped, vec!["b".to_string()]);

    let runs_before = bed.backend.query_executions("b", 100).await.unwrap().len();
    tokio::time::sleep(Duration::from_secs(300)).await;
    let runs_after = bed.backend.query_executions("b", 100).await.unwrap().len();
    assert_eq!(runs_before, runs_after);
    assert!(scheduler.run_now("b").await.is_err());

    // soft disable keeps history
    assert!(bed.registry.get("b").await.is_ok());

    bed.registry.set_enabled("b", true).await.unwrap();
    let report = scheduler.refresh().await.unwrap();
    assert_eq!(report.started, vec!["b".to_string()]);
    assert!(scheduler.run_now("b").await.unwrap().is_some());

    scheduler.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_events_follow_commit() {
    let bed = TestBed::new(vec![ok("nas", Duration::from_secs(3600))]).await;
    let client = bed.hub.connect();
    let scheduler = bed.scheduler(&scheduler_config()).await;

    // first scheduled run happens right away; wait for both of its events
    let first = client.recv().await.unwrap();
    assert_eq!(first.event.kind(), "metrics_update");

    // points are readable by the time the event is out
    let latest = bed.store.latest("nas").await.unwrap();
    assert_eq!(latest.len(), 1);
    assert_eq!(latest[0].metric_name, "value");

    let second = client.recv().await.unwrap();
    assert_eq!(second.event.kind(), "execution_complete");
    let json: serde_json::Value = serde_json::from_str(&second.to_json().unwrap()).unwrap();
    assert_eq!(json["type"], "execution_complete");
    assert_eq!(json["record"]["status"], "success");
    assert!(json["timestamp"].is_string());

    scheduler.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_unknown_collector_run_now_errors() {
    let bed = TestBed::new(vec![]).await;
    let scheduler = bed.scheduler(&scheduler_config()).await;

    let err = scheduler.run_now("ghost").await.unwrap_err();
    assert!(err.to_string().contains("ghost"));

    scheduler.shutdown().await.unwrap();
}
