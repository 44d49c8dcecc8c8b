//! Persisted row types
//!
//! Metric points ([`crate::MetricPoint`]), health rows
//! ([`crate::health::HealthStatus`]) and alert state ([`crate::alerts`]) live
//! next to the logic that owns them; this module holds the rest of what the
//! backends persist.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::alerts::Transition;

/// A configured collector
///
/// Registrations are soft-disabled, never deleted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CollectorRegistration {
    /// Unique collector id (e.g. "nas")
    pub id: String,

    #[serde(default)]
    pub display_name: String,

    /// Resource category rules match against (e.g. "host", "network")
    pub category: String,

    /// Name of the implementation in the collector catalog
    pub kind: String,

    #[serde(default = "default_enabled")]
    pub enabled: bool,

    #[serde(rename = "interval_secs", with = "crate::util::duration_secs")]
    pub interval: Duration,

    /// Per-run deadline, falls back to the scheduler default
    #[serde(
        default,
        rename = "timeout_secs",
        with = "crate::util::duration_secs::option",
        skip_serializing_if = "Option::is_none"
    )]
    pub timeout: Option<Duration>,

    /// Opaque configuration handed to the collector
    #[serde(default)]
    pub config: Value,

    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
}

fn default_enabled() -> bool {
    true
}

impl CollectorRegistration {
    pub fn new(
        id: impl Into<String>,
        kind: impl Into<String>,
        category: impl Into<String>,
        interval: Duration,
    ) -> Self {
        let id = id.into();
        Self {
            display_name: id.clone(),
            id,
            category: category.into(),
            kind: kind.into(),
            enabled: true,
            interval,
            timeout: None,
            config: Value::Null,
            created_at: crate::util::millis_precision(Utc::now()),
        }
    }

    pub fn display_name(mut self, name: impl Into<String>) -> Self {
        self.display_name = name.into();
        self
    }

    pub fn config(mut self, config: Value) -> Self {
        self.config = config;
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }
}

/// Outcome of one scheduled run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionStatus {
    Success,
    Failed,
    Timeout,
}

impl ExecutionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExecutionStatus::Success => "success",
            ExecutionStatus::Failed => "failed",
            ExecutionStatus::Timeout => "timeout",
        }
    }
}

impl std::fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ExecutionStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "success" => Ok(ExecutionStatus::Success),
            "failed" => Ok(ExecutionStatus::Failed),
            "timeout" => Ok(ExecutionStatus::Timeout),
            other => Err(format!("unknown execution status: {other}")),
        }
    }
}

/// Immutable record of one collector run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionRecord {
    /// Assigned by the backend on commit
    pub id: Option<i64>,
    pub collector_id: String,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
    pub status: ExecutionStatus,
    pub error_message: Option<String>,
    pub metric_count: usize,
    pub duration_ms: u64,
}

impl ExecutionRecord {
    pub fn new(
        collector_id: impl Into<String>,
        started_at: DateTime<Utc>,
        completed_at: DateTime<Utc>,
        status: ExecutionStatus,
    ) -> Self {
        let started_at = crate::util::millis_precision(started_at);
        let completed_at = crate::util::millis_precision(completed_at);
        let duration_ms = (completed_at - started_at).num_milliseconds().max(0) as u64;
        Self {
            id: None,
            collector_id: collector_id.into(),
            started_at,
            completed_at,
            status,
            error_message: None,
            metric_count: 0,
            duration_ms,
        }
    }

    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error_message = Some(error.into());
        self
    }

    pub fn with_metric_count(mut self, count: usize) -> Self {
        self.metric_count = count;
        self
    }
}

/// One delivery attempt of one alert transition through one channel
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotificationLogEntry {
    /// Assigned by the backend on append
    pub id: Option<i64>,
    pub alert_id: i64,
    pub channel_id: String,
    pub transition: Transition,
    pub sent_at: DateTime<Utc>,
    pub success: bool,
    pub error: Option<String>,
}
