//! In-memory storage backend (no persistence)
//!
//! Everything lives behind a single tokio `RwLock`, so a run commit is one
//! write-lock critical section and readers never observe half a commit.
//!
//! ## Limitations
//!
//! - **No persistence**: All data lost on restart
//! - **Unbounded**: retention is the only thing that shrinks it

use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use tracing::{debug, instrument};

use super::backend::{BackendHealth, BackendStats, MetricQuery, StorageBackend};
use super::error::{StorageError, StorageResult};
use super::schema::{CollectorRegistration, ExecutionRecord, NotificationLogEntry};
use crate::MetricPoint;
use crate::alerts::{AlertFilter, AlertInstance, AlertRule, AlertStatus, NewAlert};
use crate::health::HealthStatus;

type PointKey = (DateTime<Utc>, String);

#[derive(Default)]
struct State {
    collectors: BTreeMap<String, CollectorRegistration>,
    /// collector id → (time, metric name) → point
    points: HashMap<String, BTreeMap<PointKey, MetricPoint>>,
    executions: Vec<ExecutionRecord>,
    next_execution_id: i64,
    health: BTreeMap<String, HealthStatus>,
    rules: BTreeMap<String, AlertRule>,
    alerts: BTreeMap<i64, AlertInstance>,
    next_alert_id: i64,
    notifications: Vec<NotificationLogEntry>,
    next_notification_id: i64,
}

impl State {
    fn insert_points(&mut self, points: Vec<MetricPoint>) {
        for point in points {
            let series = self.points.entry(point.collector_id.clone()).or_default();
            series
                .entry((point.time, point.metric_name.clone()))
                .or_insert(point);
        }
    }

    fn point_count(&self) -> usize {
        self.points.values().map(BTreeMap::len).sum()
    }
}

/// In-memory storage backend
pub struct MemoryBackend {
    state: RwLock<State>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self {
            state: RwLock::new(State {
                next_execution_id: 1,
                next_alert_id: 1,
                next_notification_id: 1,
                ..State::default()
            }),
        }
    }
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

fn newest_first(a: &AlertInstance, b: &AlertInstance) -> std::cmp::Ordering {
    b.triggered_at.cmp(&a.triggered_at).then(b.id.cmp(&a.id))
}

#[async_trait]
impl StorageBackend for MemoryBackend {
    async fn insert_collector(&self, registration: CollectorRegistration) -> StorageResult<bool> {
        let mut state = self.state.write().await;
        if state.collectors.contains_key(&registration.id) {
            return Ok(false);
        }
        state
            .collectors
            .insert(registration.id.clone(), registration);
        Ok(true)
    }

    async fn list_collectors(&self) -> StorageResult<Vec<CollectorRegistration>> {
        Ok(self.state.read().await.collectors.values().cloned().collect())
    }

    async fn get_collector(&self, id: &str) -> StorageResult<Option<CollectorRegistration>> {
        Ok(self.state.read().await.collectors.get(id).cloned())
    }

    async fn set_collector_enabled(&self, id: &str, enabled: bool) -> StorageResult<bool> {
        let mut state = self.state.write().await;
        Ok(match state.collectors.get_mut(id) {
            Some(reg) => {
                reg.enabled = enabled;
                true
            }
            None => false,
        })
    }

    async fn update_collector_config(
        &self,
        id: &str,
        config: serde_json::Value,
    ) -> StorageResult<bool> {
        let mut state = self.state.write().await;
        Ok(match state.collectors.get_mut(id) {
            Some(reg) => {
                reg.config = config;
                true
            }
            None => false,
        })
    }

    async fn update_collector_interval(
        &self,
        id: &str,
        interval: std::time::Duration,
    ) -> StorageResult<bool> {
        let mut state = self.state.write().await;
        Ok(match state.collectors.get_mut(id) {
            Some(reg) => {
                reg.interval = interval;
                true
            }
            None => false,
        })
    }

    #[instrument(skip(self, points), fields(count = points.len()))]
    async fn insert_batch(&self, points: Vec<MetricPoint>) -> StorageResult<()> {
        self.state.write().await.insert_points(points);
        Ok(())
    }

    async fn query_range(&self, query: MetricQuery) -> StorageResult<Vec<MetricPoint>> {
        debug!("querying in-memory storage for {}", query.collector_id);

        let state = self.state.read().await;
        let points = state
            .points
            .get(&query.collector_id)
            .map(|series| {
                series
                    .values()
                    .filter(|p| p.time >= query.start && p.time <= query.end)
                    .filter(|p| {
                        query
                            .metric_name
                            .as_ref()
                            .is_none_or(|name| &p.metric_name == name)
                    })
                    .take(query.limit.unwrap_or(usize::MAX))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();

        Ok(points)
    }

    async fn query_latest(
        &self,
        collector_id: &str,
        metric_name: &str,
    ) -> StorageResult<Option<MetricPoint>> {
        let state = self.state.read().await;
        Ok(state.points.get(collector_id).and_then(|series| {
            series
                .values()
                .rev()
                .find(|p| p.metric_name == metric_name)
                .cloned()
        }))
    }

    async fn query_recent(
        &self,
        collector_id: &str,
        metric_name: &str,
        limit: usize,
    ) -> StorageResult<Vec<MetricPoint>> {
        let state = self.state.read().await;
        let mut points: Vec<MetricPoint> = state
            .points
            .get(collector_id)
            .map(|series| {
                series
                    .values()
                    .rev()
                    .filter(|p| p.metric_name == metric_name)
                    .take(limit)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();
        points.reverse();
        Ok(points)
    }

    async fn latest_values(&self, collector_id: &str) -> StorageResult<Vec<MetricPoint>> {
        let state = self.state.read().await;
        let mut latest: BTreeMap<&str, &MetricPoint> = BTreeMap::new();
        if let Some(series) = state.points.get(collector_id) {
            for point in series.values() {
                latest.insert(&point.metric_name, point);
            }
        }
        Ok(latest.into_values().cloned().collect())
    }

    async fn cleanup_old_metrics(&self, before: DateTime<Utc>) -> StorageResult<usize> {
        let mut state = self.state.write().await;
        let mut deleted = 0;
        for series in state.points.values_mut() {
            let keep = series.split_off(&(before, String::new()));
            deleted += series.len();
            *series = keep;
        }
        debug!("deleted {} old points", deleted);
        Ok(deleted)
    }

    #[instrument(skip(self, record, points, health), fields(collector_id = %record.collector_id))]
    async fn commit_run(
        &self,
        mut record: ExecutionRecord,
        points: Vec<MetricPoint>,
        health: HealthStatus,
    ) -> StorageResult<i64> {
        let mut state = self.state.write().await;

        let id = state.next_execution_id;
        state.next_execution_id += 1;
        record.id = Some(id);

        state.insert_points(points);
        state.executions.push(record);
        state.health.insert(health.collector_id.clone(), health);
        Ok(id)
    }

    async fn query_executions(
        &self,
        collector_id: &str,
        limit: usize,
    ) -> StorageResult<Vec<ExecutionRecord>> {
        let state = self.state.read().await;
        Ok(state
            .executions
            .iter()
            .rev()
            .filter(|r| r.collector_id == collector_id)
            .take(limit)
            .cloned()
            .collect())
    }

    async fn cleanup_old_executions(&self, before: DateTime<Utc>) -> StorageResult<usize> {
        let mut state = self.state.write().await;
        let len = state.executions.len();
        state.executions.retain(|r| r.started_at >= before);
        Ok(len - state.executions.len())
    }

    async fn trim_executions(&self, keep: usize) -> StorageResult<usize> {
        let mut state = self.state.write().await;
        let mut seen: HashMap<String, usize> = HashMap::new();
        let mut retained: Vec<ExecutionRecord> = Vec::with_capacity(state.executions.len());
        let before = state.executions.len();

        for record in state.executions.drain(..).rev() {
            let count = seen.entry(record.collector_id.clone()).or_default();
            if *count < keep {
                *count += 1;
                retained.push(record);
            }
        }
        retained.reverse();
        state.executions = retained;
        Ok(before - state.executions.len())
    }

    async fn get_health(&self, collector_id: &str) -> StorageResult<Option<HealthStatus>> {
        Ok(self.state.read().await.health.get(collector_id).cloned())
    }

    async fn list_health(&self) -> StorageResult<Vec<HealthStatus>> {
        Ok(self.state.read().await.health.values().cloned().collect())
    }

    async fn upsert_rule(&self, rule: AlertRule) -> StorageResult<()> {
        self.state
            .write()
            .await
            .rules
            .insert(rule.id.clone(), rule);
        Ok(())
    }

    async fn get_rule(&self, id: &str) -> StorageResult<Option<AlertRule>> {
        Ok(self.state.read().await.rules.get(id).cloned())
    }

    async fn list_rules(&self) -> StorageResult<Vec<AlertRule>> {
        Ok(self.state.read().await.rules.values().cloned().collect())
    }

    async fn insert_alert(&self, alert: NewAlert) -> StorageResult<AlertInstance> {
        let mut state = self.state.write().await;

        let exists = state.alerts.values().any(|a| {
            a.status.is_open() && a.rule_id == alert.rule_id && a.resource_id == alert.resource_id
        });
        if exists {
            return Err(StorageError::Conflict(format!(
                "open alert exists for rule '{}' on '{}'",
                alert.rule_id, alert.resource_id
            )));
        }

        let id = state.next_alert_id;
        state.next_alert_id += 1;

        let instance = AlertInstance {
            id,
            rule_id: alert.rule_id,
            resource_id: alert.resource_id,
            status: AlertStatus::Active,
            severity: alert.severity,
            triggered_at: crate::util::millis_precision(alert.triggered_at),
            acknowledged_at: None,
            acknowledged_by: None,
            resolved_at: None,
            resolved_by: None,
            snoozed_until: None,
            last_value: alert.last_value,
        };
        state.alerts.insert(id, instance.clone());
        Ok(instance)
    }

    async fn update_alert(&self, alert: &AlertInstance) -> StorageResult<()> {
        let mut state = self.state.write().await;

        if alert.status.is_open() {
            let conflict = state.alerts.values().any(|a| {
                a.id != alert.id
                    && a.status.is_open()
                    && a.rule_id == alert.rule_id
                    && a.resource_id == alert.resource_id
            });
            if conflict {
                return Err(StorageError::Conflict(format!(
                    "open alert exists for rule '{}' on '{}'",
                    alert.rule_id, alert.resource_id
                )));
            }
        }

        match state.alerts.get_mut(&alert.id) {
            Some(existing) => {
                *existing = alert.clone();
                Ok(())
            }
            None => Err(StorageError::QueryFailed(format!(
                "alert {} does not exist",
                alert.id
            ))),
        }
    }

    async fn get_alert(&self, id: i64) -> StorageResult<Option<AlertInstance>> {
        Ok(self.state.read().await.alerts.get(&id).cloned())
    }

    async fn open_alert(
        &self,
        rule_id: &str,
        resource_id: &str,
    ) -> StorageResult<Option<AlertInstance>> {
        let state = self.state.read().await;
        Ok(state
            .alerts
            .values()
            .find(|a| a.status.is_open() && a.rule_id == rule_id && a.resource_id == resource_id)
            .cloned())
    }

    async fn last_alert(
        &self,
        rule_id: &str,
        resource_id: &str,
    ) -> StorageResult<Option<AlertInstance>> {
        let state = self.state.read().await;
        Ok(state
            .alerts
            .values()
            .filter(|a| a.rule_id == rule_id && a.resource_id == resource_id)
            .min_by(|a, b| newest_first(a, b))
            .cloned())
    }

    async fn list_alerts(&self, filter: AlertFilter) -> StorageResult<Vec<AlertInstance>> {
        let state = self.state.read().await;
        let mut alerts: Vec<AlertInstance> = state
            .alerts
            .values()
            .filter(|a| filter.matches(a))
            .cloned()
            .collect();
        alerts.sort_by(newest_first);
        if let Some(limit) = filter.limit {
            alerts.truncate(limit);
        }
        Ok(alerts)
    }

    async fn append_notification(&self, mut entry: NotificationLogEntry) -> StorageResult<i64> {
        let mut state = self.state.write().await;
        let id = state.next_notification_id;
        state.next_notification_id += 1;
        entry.id = Some(id);
        state.notifications.push(entry);
        Ok(id)
    }

    async fn list_notifications(
        &self,
        alert_id: Option<i64>,
    ) -> StorageResult<Vec<NotificationLogEntry>> {
        let state = self.state.read().await;
        Ok(state
            .notifications
            .iter()
            .filter(|n| alert_id.is_none_or(|id| n.alert_id == id))
            .cloned()
            .collect())
    }

    async fn health_check(&self) -> StorageResult<BackendHealth> {
        let state = self.state.read().await;
        Ok(BackendHealth {
            healthy: true,
            message: "In-memory storage operational".to_string(),
            metadata: HashMap::from([
                ("backend".to_string(), "memory".to_string()),
                ("total_points".to_string(), state.point_count().to_string()),
            ]),
        })
    }

    async fn get_stats(&self) -> StorageResult<BackendStats> {
        let state = self.state.read().await;
        let mut oldest = None;
        let mut newest = None;
        for series in state.points.values() {
            if let Some(((first, _), _)) = series.first_key_value() {
                oldest = Some(oldest.map_or(*first, |o: DateTime<Utc>| o.min(*first)));
            }
            if let Some(((last, _), _)) = series.last_key_value() {
                newest = Some(newest.map_or(*last, |n: DateTime<Utc>| n.max(*last)));
            }
        }

        Ok(BackendStats {
            backend: "memory".to_string(),
            collectors: state.collectors.len() as u64,
            metric_points: state.point_count() as u64,
            executions: state.executions.len() as u64,
            rules: state.rules.len() as u64,
            alerts: state.alerts.len() as u64,
            open_alerts: state.alerts.values().filter(|a| a.status.is_open()).count() as u64,
            notifications: state.notifications.len() as u64,
            oldest_point: oldest,
            newest_point: newest,
            size_bytes: None,
        })
    }

    async fn close(&self) -> StorageResult<()> {
        debug!("closing in-memory backend (no-op)");
        Ok(())
    }
}
