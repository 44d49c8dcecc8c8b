//! Integration tests for storage persistence
//!
//! These tests verify that:
//! - Runs committed by the scheduler survive a restart of the SQLite backend
//! - Collector registrations, rules and alerts are persisted
//! - The open-alert uniqueness holds in the database
//! - Retention cleanup removes old rows through the storage actor

use std::sync::Arc;
use std::time::Duration;

use chrono::{Duration as ChronoDuration, Utc};
use hearth::{
    MetricPoint,
    actors::{SchedulerDeps, SchedulerHandle, StorageHandle},
    alerts::{AlertFilter, AlertRule, ComparisonOp, NewAlert, Severity},
    config::{Config, RetentionPolicy},
    health::HealthStatus,
    hub::BroadcastHub,
    registry::Registry,
    runtime::HubRuntime,
    storage::{
        ExecutionRecord, ExecutionStatus, MetricQuery, MetricStore, StorageBackend, StorageError,
        sqlite::SqliteBackend,
    },
    util::{ManualClock, SystemClock},
};
use pretty_assertions::assert_eq;
use tempfile::tempdir;

use crate::helpers::{HOUR, catalog, ok, scheduler_config};

#[tokio::test]
async fn test_runs_survive_restart() {
    let temp_dir = tempdir().unwrap();
    let db_path = temp_dir.path().join("hearth.db");

    {
        let backend: Arc<dyn StorageBackend> =
            Arc::new(SqliteBackend::new(&db_path).await.unwrap());
        backend.insert_collector(ok("nas", HOUR)).await.unwrap();

        let registry = Registry::new(backend.clone());
        let store = Arc::new(MetricStore::new(backend.clone(), Duration::ZERO));
        let scheduler = SchedulerHandle::spawn(
            SchedulerDeps {
                registry,
                catalog: Arc::new(catalog(Default::default())),
                store,
                hub: BroadcastHub::new(16),
                clock: Arc::new(SystemClock),
            },
            &scheduler_config(),
        )
        .await
        .unwrap();

        scheduler.run_now("nas").await.unwrap().unwrap();
        scheduler.shutdown().await.unwrap();
        backend.close().await.unwrap();
    }

    let backend = SqliteBackend::new(&db_path).await.unwrap();
    let registration = backend.get_collector("nas").await.unwrap().unwrap();
    assert_eq!(registration.interval, HOUR);
    assert_eq!(registration.config["mode"], "ok");

    let executions = backend.query_executions("nas", 10).await.unwrap();
    assert!(!executions.is_empty());
    assert!(executions.iter().all(|e| e.status == ExecutionStatus::Success));

    let latest = backend.latest_values("nas").await.unwrap();
    assert_eq!(latest.len(), 1);
    assert_eq!(latest[0].value.as_f64(), Some(1.0));

    let health = backend.get_health("nas").await.unwrap().unwrap();
    assert_eq!(health.consecutive_errors, 0);
}

#[tokio::test]
async fn test_points_round_trip_in_order() {
    let temp_dir = tempdir().unwrap();
    let backend = SqliteBackend::new(temp_dir.path().join("points.db")).await.unwrap();

    let t0 = Utc::now() - ChronoDuration::minutes(10);
    let points = vec![
        MetricPoint::new(t0 + ChronoDuration::minutes(2), "nas", "cpu_percent", 20.0),
        MetricPoint::new(t0, "nas", "up", true),
        MetricPoint::new(t0, "nas", "cpu_percent", 10.0).with_tag("core", "all"),
        MetricPoint::new(t0 + ChronoDuration::minutes(1), "nas", "version", "1.2.3"),
    ];
    backend.insert_batch(points.clone()).await.unwrap();

    let all = backend
        .query_range(MetricQuery::new("nas", t0, t0 + ChronoDuration::minutes(5)))
        .await
        .unwrap();
    let order: Vec<(i64, &str)> = all
        .iter()
        .map(|p| ((p.time - t0).num_minutes(), p.metric_name.as_str()))
        .collect();
    assert_eq!(
        order,
        vec![(0, "cpu_percent"), (0, "up"), (1, "version"), (2, "cpu_percent")]
    );
    assert_eq!(all[0].tags.get("core").map(String::as_str), Some("all"));
    assert_eq!(all[1].value.as_bool(), Some(true));

    let query = MetricQuery::new("nas", t0, t0 + ChronoDuration::minutes(5)).metric("cpu_percent");
    let cpu_only = backend.query_range(query).await.unwrap();
    assert_eq!(cpu_only.len(), 2);
}

#[tokio::test]
async fn test_rules_and_alerts_persist() {
    let temp_dir = tempdir().unwrap();
    let db_path = temp_dir.path().join("alerts.db");

    let rule = AlertRule::threshold("cpu", "host", "cpu_percent", ComparisonOp::Gt, 80.0)
        .severity(Severity::Critical)
        .grace(2)
        .channels(["ops"]);
    let now = Utc::now();

    {
        let backend = SqliteBackend::new(&db_path).await.unwrap();
        backend.upsert_rule(rule.clone()).await.unwrap();
        backend
            .insert_alert(NewAlert {
                rule_id: "cpu".to_string(),
                resource_id: "nas".to_string(),
                severity: Severity::Critical,
                triggered_at: now,
                last_value: Some(91.0.into()),
            })
            .await
            .unwrap();

        let second = backend
            .insert_alert(NewAlert {
                rule_id: "cpu".to_string(),
                resource_id: "nas".to_string(),
                severity: Severity::Critical,
                triggered_at: now,
                last_value: None,
            })
            .await;
        assert!(matches!(second, Err(StorageError::Conflict(_))));
        backend.close().await.unwrap();
    }

    let backend = SqliteBackend::new(&db_path).await.unwrap();
    assert_eq!(backend.get_rule("cpu").await.unwrap(), Some(rule));

    let open = backend.list_alerts(AlertFilter::open()).await.unwrap();
    assert_eq!(open.len(), 1);
    assert_eq!(open[0].resource_id, "nas");
    assert_eq!(open[0].last_value.as_ref().and_then(|v| v.as_f64()), Some(91.0));
}

#[tokio::test]
async fn test_retention_through_storage_actor() {
    let temp_dir = tempdir().unwrap();
    let backend = Arc::new(SqliteBackend::new(temp_dir.path().join("retention.db")).await.unwrap());
    let now = Utc::now();

    for age_days in [45, 20, 3, 0] {
        let at = now - ChronoDuration::days(age_days);
        let mut health = HealthStatus::unknown("nas");
        health.record_success(at);
        backend
            .commit_run(
                ExecutionRecord::new("nas", at, at, ExecutionStatus::Success).with_metric_count(1),
                vec![MetricPoint::new(at, "nas", "cpu_percent", age_days as f64)],
                health,
            )
            .await
            .unwrap();
    }

    let storage = StorageHandle::spawn(
        backend.clone(),
        Some(RetentionPolicy {
            metrics: Duration::from_secs(30 * 24 * 3600),
            executions: Duration::from_secs(7 * 24 * 3600),
            max_executions_per_collector: None,
            cleanup_interval: HOUR,
        }),
        Arc::new(ManualClock::new(now)),
    );

    // the startup pass has already run by the time this is answered
    storage.run_cleanup().await.unwrap();
    let stats = storage.get_stats().await.unwrap();
    assert_eq!(stats.metric_points, 3);
    assert_eq!(stats.executions, 2);
    assert_eq!(stats.backend, "sqlite");

    storage.shutdown().await;
}

#[tokio::test]
async fn test_runtime_restart_keeps_operator_changes() {
    let temp_dir = tempdir().unwrap();
    let db_path = temp_dir.path().join("runtime.db");
    let config_json = serde_json::json!({
        "storage": { "backend": "sqlite", "path": db_path },
        "api": { "enabled": false },
        "collectors": [
            { "id": "local", "kind": "system", "category": "host", "interval_secs": 3600 }
        ],
        "rules": [
            {
                "id": "cpu",
                "resource_type": "host",
                "metric_name": "cpu_percent",
                "severity": "warning",
                "condition": {
                    "type": "leaf",
                    "metric": "cpu_percent",
                    "op": "gt",
                    "threshold": 80.0
                }
            }
        ]
    });

    let config: Config = serde_json::from_value(config_json.clone()).unwrap();
    let runtime = HubRuntime::start(config).await.unwrap();
    runtime.registry.set_enabled("local", false).await.unwrap();
    runtime.shutdown().await.unwrap();

    // seeding from config leaves the existing registration alone
    let config: Config = serde_json::from_value(config_json).unwrap();
    let runtime = HubRuntime::start(config).await.unwrap();
    let registration = runtime.registry.get("local").await.unwrap();
    assert!(!registration.enabled);
    runtime.shutdown().await.unwrap();
}
