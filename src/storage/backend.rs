//! Storage backend trait definition
//!
//! This module defines the core `StorageBackend` trait that all
//! storage implementations must implement.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;

use super::error::StorageResult;
use super::schema::{CollectorRegistration, ExecutionRecord, NotificationLogEntry};
use crate::MetricPoint;
use crate::alerts::{AlertFilter, AlertInstance, AlertRule, NewAlert};
use crate::health::HealthStatus;

/// Query parameters for fetching metric points within a time range
#[derive(Debug, Clone)]
pub struct MetricQuery {
    pub collector_id: String,

    /// Restrict to one metric; `None` returns every metric of the collector
    pub metric_name: Option<String>,

    /// Start of time range (inclusive)
    pub start: DateTime<Utc>,

    /// End of time range (inclusive)
    pub end: DateTime<Utc>,

    /// Maximum number of results to return (for pagination)
    pub limit: Option<usize>,
}

impl MetricQuery {
    pub fn new(collector_id: impl Into<String>, start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        Self {
            collector_id: collector_id.into(),
            metric_name: None,
            start,
            end,
            limit: None,
        }
    }

    pub fn metric(mut self, metric_name: impl Into<String>) -> Self {
        self.metric_name = Some(metric_name.into());
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }
}

/// Health status of the storage backend
#[derive(Debug, Clone, Serialize)]
pub struct BackendHealth {
    /// Is the backend operational?
    pub healthy: bool,

    /// Human-readable status message
    pub message: String,

    /// Additional backend-specific metadata
    pub metadata: HashMap<String, String>,
}

/// Row counts and on-disk footprint
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct BackendStats {
    pub backend: String,
    pub collectors: u64,
    pub metric_points: u64,
    pub executions: u64,
    pub rules: u64,
    pub alerts: u64,
    pub open_alerts: u64,
    pub notifications: u64,
    pub oldest_point: Option<DateTime<Utc>>,
    pub newest_point: Option<DateTime<Utc>>,
    pub size_bytes: Option<u64>,
}

impl std::fmt::Display for BackendStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let range = match (self.oldest_point, self.newest_point) {
            (Some(old), Some(new)) => {
                format!("{} to {}", old.format("%Y-%m-%d"), new.format("%Y-%m-%d"))
            }
            _ => "no data".to_string(),
        };
        write!(
            f,
            "{}: {} points, {} executions, {} open alerts, time range: {}",
            self.backend, self.metric_points, self.executions, self.open_alerts, range
        )
    }
}

/// Trait for persistent storage backends
///
/// Covers everything the hub persists: the collector registry, metric
/// points, execution records, per-collector health, alert rules, alert
/// instances and the notification log.
///
/// ## Thread Safety
///
/// Implementations must be `Send + Sync` as they are shared across the
/// scheduler workers, the alert actor and the API.
///
/// ## Error Handling
///
/// Methods return `StorageResult<T>`. Implementations convert
/// backend-specific errors to `StorageError` variants; a second open alert
/// for the same (rule, resource) is reported as `StorageError::Conflict`.
#[async_trait]
pub trait StorageBackend: Send + Sync {
    // ========================================================================
    // Collector registry
    // ========================================================================

    /// Insert a registration unless one with the same id exists
    ///
    /// Returns `true` if the registration was inserted.
    async fn insert_collector(&self, registration: CollectorRegistration) -> StorageResult<bool>;

    /// All registrations ordered by id
    async fn list_collectors(&self) -> StorageResult<Vec<CollectorRegistration>>;

    async fn get_collector(&self, id: &str) -> StorageResult<Option<CollectorRegistration>>;

    /// Returns `false` if no collector has this id
    async fn set_collector_enabled(&self, id: &str, enabled: bool) -> StorageResult<bool>;

    /// Returns `false` if no collector has this id
    async fn update_collector_config(
        &self,
        id: &str,
        config: serde_json::Value,
    ) -> StorageResult<bool>;

    /// Returns `false` if no collector has this id
    async fn update_collector_interval(
        &self,
        id: &str,
        interval: std::time::Duration,
    ) -> StorageResult<bool>;

    // ========================================================================
    // Metric points
    // ========================================================================

    /// Insert a batch of points; points whose identity already exists are skipped
    async fn insert_batch(&self, points: Vec<MetricPoint>) -> StorageResult<()>;

    /// Points in range ordered by time then metric name
    async fn query_range(&self, query: MetricQuery) -> StorageResult<Vec<MetricPoint>>;

    /// Newest point of one metric
    async fn query_latest(
        &self,
        collector_id: &str,
        metric_name: &str,
    ) -> StorageResult<Option<MetricPoint>>;

    /// The `limit` newest points of one metric in chronological order
    async fn query_recent(
        &self,
        collector_id: &str,
        metric_name: &str,
        limit: usize,
    ) -> StorageResult<Vec<MetricPoint>>;

    /// Newest point of every metric of a collector, ordered by metric name
    async fn latest_values(&self, collector_id: &str) -> StorageResult<Vec<MetricPoint>>;

    /// Delete points older than the specified timestamp
    ///
    /// Returns the number of points deleted.
    async fn cleanup_old_metrics(&self, before: DateTime<Utc>) -> StorageResult<usize>;

    // ========================================================================
    // Execution log + health
    // ========================================================================

    /// Persist the outcome of one run atomically
    ///
    /// The execution record, its metric points and the collector's health
    /// row are written together or not at all. Returns the record id.
    async fn commit_run(
        &self,
        record: ExecutionRecord,
        points: Vec<MetricPoint>,
        health: HealthStatus,
    ) -> StorageResult<i64>;

    /// Newest executions of a collector first
    async fn query_executions(
        &self,
        collector_id: &str,
        limit: usize,
    ) -> StorageResult<Vec<ExecutionRecord>>;

    /// Delete executions that started before the timestamp
    async fn cleanup_old_executions(&self, before: DateTime<Utc>) -> StorageResult<usize>;

    /// Keep only the `keep` newest executions of each collector
    async fn trim_executions(&self, keep: usize) -> StorageResult<usize>;

    async fn get_health(&self, collector_id: &str) -> StorageResult<Option<HealthStatus>>;

    async fn list_health(&self) -> StorageResult<Vec<HealthStatus>>;

    // ========================================================================
    // Alert rules + instances
    // ========================================================================

    /// Insert or replace a rule by id
    async fn upsert_rule(&self, rule: AlertRule) -> StorageResult<()>;

    async fn get_rule(&self, id: &str) -> StorageResult<Option<AlertRule>>;

    /// All rules ordered by id
    async fn list_rules(&self) -> StorageResult<Vec<AlertRule>>;

    /// Create a new active instance
    ///
    /// Fails with `StorageError::Conflict` when an open instance already
    /// exists for the same (rule, resource).
    async fn insert_alert(&self, alert: NewAlert) -> StorageResult<AlertInstance>;

    /// Overwrite the mutable fields of an existing instance
    async fn update_alert(&self, alert: &AlertInstance) -> StorageResult<()>;

    async fn get_alert(&self, id: i64) -> StorageResult<Option<AlertInstance>>;

    /// The open (active or acknowledged) instance for a (rule, resource)
    async fn open_alert(
        &self,
        rule_id: &str,
        resource_id: &str,
    ) -> StorageResult<Option<AlertInstance>>;

    /// The most recently triggered instance for a (rule, resource), any status
    async fn last_alert(
        &self,
        rule_id: &str,
        resource_id: &str,
    ) -> StorageResult<Option<AlertInstance>>;

    /// Instances matching the filter, newest first
    async fn list_alerts(&self, filter: AlertFilter) -> StorageResult<Vec<AlertInstance>>;

    // ========================================================================
    // Notification log
    // ========================================================================

    async fn append_notification(&self, entry: NotificationLogEntry) -> StorageResult<i64>;

    /// Attempts in append order, optionally for one alert
    async fn list_notifications(
        &self,
        alert_id: Option<i64>,
    ) -> StorageResult<Vec<NotificationLogEntry>>;

    // ========================================================================
    // Maintenance
    // ========================================================================

    /// Performs a lightweight operation to verify the backend is operational
    async fn health_check(&self) -> StorageResult<BackendHealth>;

    async fn get_stats(&self) -> StorageResult<BackendStats>;

    /// Close the backend and release resources
    async fn close(&self) -> StorageResult<()>;
}
