//! Message types for actor communication
//!
//! Every actor owns an mpsc command channel; request/response commands carry
//! a `oneshot` sender for the reply. Live fan-out to clients goes through the
//! [`crate::hub::BroadcastHub`] instead of per-actor channels.

use std::collections::BTreeMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::oneshot;

use super::collector::CollectorHandle;
use crate::alerts::{AlertInstance, AlertRule};
use crate::collector::HealthReport;
use crate::error::AlertError;
use crate::storage::{BackendStats, ExecutionRecord};

/// Commands that can be sent to a CollectorActor
#[derive(Debug)]
pub enum CollectorCommand {
    /// Run immediately, outside the timer
    ///
    /// Replies with the committed record, or `None` when the run was
    /// cancelled or the collector is disabled.
    RunNow {
        respond_to: oneshot::Sender<anyhow::Result<Option<ExecutionRecord>>>,
    },

    /// Call the collector's health check under the run deadline
    Probe {
        respond_to: oneshot::Sender<anyhow::Result<HealthReport>>,
    },

    /// Re-arm the timer with a new interval
    UpdateInterval { interval: Duration },

    /// Stop after the in-flight run, if any
    Shutdown,
}

/// Commands that can be sent to the SchedulerActor
#[derive(Debug)]
pub enum SchedulerCommand {
    /// Handle of the worker for one collector
    Worker {
        collector_id: String,
        respond_to: oneshot::Sender<Option<CollectorHandle>>,
    },

    /// Re-read the registry now
    Refresh {
        respond_to: oneshot::Sender<anyhow::Result<RefreshReport>>,
    },

    /// Collectors with a running worker
    Scheduled {
        respond_to: oneshot::Sender<Vec<ScheduledCollector>>,
    },

    /// Cancel in-flight runs and wait for every worker to stop
    Shutdown { respond_to: oneshot::Sender<()> },
}

/// What a refresh pass changed
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RefreshReport {
    pub started: Vec<String>,
    pub stopped: Vec<String>,
    pub rescheduled: Vec<String>,
}

impl RefreshReport {
    pub fn is_empty(&self) -> bool {
        self.started.is_empty() && self.stopped.is_empty() && self.rescheduled.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ScheduledCollector {
    pub collector_id: String,
    #[serde(rename = "interval_secs", with = "crate::util::duration_secs")]
    pub interval: Duration,
}

/// Commands that can be sent to the AlertActor
#[derive(Debug)]
pub enum AlertCommand {
    /// Run a sweep now instead of waiting for the timer
    EvaluateNow {
        respond_to: oneshot::Sender<anyhow::Result<SweepReport>>,
    },

    Acknowledge {
        alert_id: i64,
        by: Option<String>,
        respond_to: oneshot::Sender<Result<AlertInstance, AlertError>>,
    },

    Resolve {
        alert_id: i64,
        by: Option<String>,
        respond_to: oneshot::Sender<Result<AlertInstance, AlertError>>,
    },

    Snooze {
        alert_id: i64,
        until: DateTime<Utc>,
        respond_to: oneshot::Sender<Result<AlertInstance, AlertError>>,
    },

    /// Validate and store a rule; it is picked up by the next sweep
    UpsertRule {
        rule: Box<AlertRule>,
        respond_to: oneshot::Sender<Result<(), AlertError>>,
    },

    /// Per-rule evaluation errors from the last sweep
    RuleErrors {
        respond_to: oneshot::Sender<BTreeMap<String, String>>,
    },

    /// Gracefully shut down the alert actor
    Shutdown,
}

/// Outcome of one evaluation sweep
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    /// Enabled rules considered
    pub rules: usize,

    /// (rule, resource) pairs evaluated
    pub evaluated: usize,

    /// Pairs skipped because their input did not change
    pub unchanged: usize,

    pub triggered: usize,
    pub resolved: usize,

    /// Rules that failed to evaluate for at least one resource
    pub errors: usize,
}

/// Commands that can be sent to the StorageActor
#[derive(Debug)]
pub enum StorageCommand {
    /// Apply the retention policy now
    RunCleanup {
        respond_to: oneshot::Sender<anyhow::Result<CleanupReport>>,
    },

    /// Get storage statistics
    GetStats {
        respond_to: oneshot::Sender<anyhow::Result<BackendStats>>,
    },

    /// Gracefully shut down the storage actor
    Shutdown,
}

/// Rows deleted by one retention pass
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CleanupReport {
    pub metric_points: usize,
    pub executions: usize,
    pub trimmed_executions: usize,
    pub ran_at: Option<DateTime<Utc>>,
}
