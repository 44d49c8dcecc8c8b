//! Helper functions for integration tests

#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use hearth::{
    MetricPoint,
    actors::{AlertDeps, AlertHandle, SchedulerDeps, SchedulerHandle},
    alerts::AlertRule,
    collector::{CollectContext, Collector, CollectorCatalog, CollectorMetadata, MetricSet},
    config::{AlertsConfig, SchedulerConfig},
    error::{CollectionError, NotificationError},
    health::HealthStatus,
    hub::BroadcastHub,
    notify::{Dispatcher, Notification, NotificationChannel},
    registry::Registry,
    storage::{
        CollectorRegistration, ExecutionRecord, ExecutionStatus, MemoryBackend, MetricStore,
        StorageBackend,
    },
    util::{Clock, ManualClock},
};
use serde_json::{Value, json};

pub const HOUR: Duration = Duration::from_secs(3600);

/// Counters shared by every scripted collector built from one catalog
#[derive(Debug, Default)]
pub struct Counters {
    pub runs: AtomicUsize,
    pub in_flight: AtomicUsize,
    pub max_in_flight: AtomicUsize,
}

impl Counters {
    pub fn runs(&self) -> usize {
        self.runs.load(Ordering::SeqCst)
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }
}

/// Test collector driven by its config:
///
/// - `{"mode": "ok", "value": 42.0}` reports `value` (default 1.0)
/// - `{"mode": "fail"}` always fails
/// - `{"mode": "slow", "millis": 100}` sleeps, then reports
struct Scripted {
    config: Value,
    counters: Arc<Counters>,
}

#[async_trait]
impl Collector for Scripted {
    fn describe(&self) -> CollectorMetadata {
        CollectorMetadata {
            kind: "scripted".to_string(),
            description: "integration test collector".to_string(),
            metrics: vec!["value".to_string()],
        }
    }

    async fn collect(&self, _ctx: &CollectContext) -> Result<MetricSet, CollectionError> {
        self.counters.runs.fetch_add(1, Ordering::SeqCst);
        let now = self.counters.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.counters.max_in_flight.fetch_max(now, Ordering::SeqCst);

        let result = match self.config["mode"].as_str().unwrap_or("ok") {
            "fail" => Err(CollectionError::failed("device unreachable")),
            "slow" => {
                let millis = self.config["millis"].as_u64().unwrap_or(100);
                tokio::time::sleep(Duration::from_millis(millis)).await;
                Ok(MetricSet::new().with("value", 1.0))
            }
            _ => {
                let value = self.config["value"].as_f64().unwrap_or(1.0);
                Ok(MetricSet::new().with("value", value))
            }
        };

        self.counters.in_flight.fetch_sub(1, Ordering::SeqCst);
        result
    }
}

pub fn catalog(counters: Arc<Counters>) -> CollectorCatalog {
    let mut catalog = CollectorCatalog::new();
    catalog.register("scripted", move |reg| {
        Ok(Arc::new(Scripted {
            config: reg.config.clone(),
            counters: counters.clone(),
        }) as Arc<dyn Collector>)
    });
    catalog
}

pub fn scripted(id: &str, interval: Duration, config: Value) -> CollectorRegistration {
    CollectorRegistration::new(id, "scripted", "host", interval).config(config)
}

pub fn ok(id: &str, interval: Duration) -> CollectorRegistration {
    scripted(id, interval, json!({ "mode": "ok" }))
}

/// Scheduler settings without jitter so timings are exact
pub fn scheduler_config() -> SchedulerConfig {
    SchedulerConfig {
        jitter_ratio: 0.0,
        default_timeout: Duration::from_secs(5),
        ..SchedulerConfig::default()
    }
}

/// Everything below the actors, on the memory backend
pub struct TestBed {
    pub backend: Arc<MemoryBackend>,
    pub registry: Registry,
    pub store: Arc<MetricStore>,
    pub hub: BroadcastHub,
    pub counters: Arc<Counters>,
}

impl TestBed {
    pub async fn new(registrations: Vec<CollectorRegistration>) -> Self {
        let backend = Arc::new(MemoryBackend::new());
        for registration in registrations {
            backend.insert_collector(registration).await.unwrap();
        }

        Self {
            registry: Registry::new(backend.clone()),
            store: Arc::new(MetricStore::new(backend.clone(), Duration::ZERO)),
            hub: BroadcastHub::new(64),
            counters: Arc::new(Counters::default()),
            backend,
        }
    }

    pub async fn scheduler(&self, config: &SchedulerConfig) -> SchedulerHandle {
        SchedulerHandle::spawn(
            SchedulerDeps {
                registry: self.registry.clone(),
                catalog: Arc::new(catalog(self.counters.clone())),
                store: self.store.clone(),
                hub: self.hub.clone(),
                clock: Arc::new(hearth::util::SystemClock),
            },
            config,
        )
        .await
        .unwrap()
    }

    pub fn alerts(&self, clock: Arc<ManualClock>, dispatcher: Dispatcher) -> AlertHandle {
        let config = AlertsConfig {
            evaluation_interval: HOUR,
            ..AlertsConfig::default()
        };
        AlertHandle::spawn(
            AlertDeps {
                registry: self.registry.clone(),
                store: self.store.clone(),
                dispatcher: Arc::new(dispatcher),
                hub: self.hub.clone(),
                clock,
            },
            &config,
        )
    }

    /// Commit one successful run reporting `values` at the clock's time
    pub async fn report(&self, clock: &ManualClock, collector_id: &str, values: &[(&str, f64)]) {
        let now = clock.now();
        let points: Vec<MetricPoint> = values
            .iter()
            .map(|(name, value)| MetricPoint::new(now, collector_id, *name, *value))
            .collect();
        let mut health = HealthStatus::unknown(collector_id);
        health.record_success(now);
        let record = ExecutionRecord::new(collector_id, now, now, ExecutionStatus::Success)
            .with_metric_count(points.len());
        self.store.commit_run(record, points, health).await.unwrap();
    }

    pub async fn rule(&self, rule: AlertRule) {
        self.backend.upsert_rule(rule).await.unwrap();
    }
}

pub fn manual_clock() -> Arc<ManualClock> {
    Arc::new(ManualClock::new(Utc::now()))
}

/// Channel that remembers every notification it was asked to send
#[derive(Debug, Clone)]
pub struct RecordingChannel {
    id: String,
    pub sent: Arc<Mutex<Vec<Notification>>>,
}

impl RecordingChannel {
    pub fn new(id: &str) -> Self {
        Self {
            id: id.to_string(),
            sent: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn titles(&self) -> Vec<String> {
        self.sent.lock().unwrap().iter().map(|n| n.title.clone()).collect()
    }

    pub fn count(&self) -> usize {
        self.sent.lock().unwrap().len()
    }
}

#[async_trait]
impl NotificationChannel for RecordingChannel {
    fn id(&self) -> &str {
        &self.id
    }

    async fn send(&self, notification: &Notification) -> Result<(), NotificationError> {
        self.sent.lock().unwrap().push(notification.clone());
        Ok(())
    }
}
