//! Alert rules, evaluation and lifecycle
//!
//! - [`rule`]: persisted rule definitions and the condition tree
//! - [`evaluator`]: pure trigger/clear decision for one rule and one resource
//! - [`lifecycle`]: the per (rule, resource) state machine with cooldown

pub mod evaluator;
pub mod lifecycle;
pub mod rule;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub use evaluator::{Evaluation, MetricSnapshot, evaluate};
pub use lifecycle::AlertLifecycle;
pub use rule::{AlertRule, ComparisonOp, Condition, GroupOperator, Severity, Threshold};

use crate::MetricValue;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertStatus {
    Active,
    Acknowledged,
    Resolved,
}

impl AlertStatus {
    /// Active and acknowledged instances are open
    pub fn is_open(&self) -> bool {
        !matches!(self, AlertStatus::Resolved)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            AlertStatus::Active => "active",
            AlertStatus::Acknowledged => "acknowledged",
            AlertStatus::Resolved => "resolved",
        }
    }
}

impl std::fmt::Display for AlertStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for AlertStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(AlertStatus::Active),
            "acknowledged" => Ok(AlertStatus::Acknowledged),
            "resolved" => Ok(AlertStatus::Resolved),
            other => Err(format!("unknown alert status: {other}")),
        }
    }
}

/// A concrete occurrence of a rule being met for one resource
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertInstance {
    pub id: i64,
    pub rule_id: String,
    pub resource_id: String,
    pub status: AlertStatus,
    pub severity: Severity,
    pub triggered_at: DateTime<Utc>,
    pub acknowledged_at: Option<DateTime<Utc>>,
    pub acknowledged_by: Option<String>,
    pub resolved_at: Option<DateTime<Utc>>,
    pub resolved_by: Option<String>,
    pub snoozed_until: Option<DateTime<Utc>>,
    pub last_value: Option<MetricValue>,
}

impl AlertInstance {
    pub fn is_snoozed(&self, now: DateTime<Utc>) -> bool {
        self.snoozed_until.is_some_and(|until| until > now)
    }
}

/// Values for a new instance; the backend assigns the id
#[derive(Debug, Clone, PartialEq)]
pub struct NewAlert {
    pub rule_id: String,
    pub resource_id: String,
    pub severity: Severity,
    pub triggered_at: DateTime<Utc>,
    pub last_value: Option<MetricValue>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct AlertFilter {
    pub status: Option<AlertStatus>,
    pub rule_id: Option<String>,
    pub resource_id: Option<String>,
    /// Only active and acknowledged instances
    #[serde(default)]
    pub open_only: bool,
    pub limit: Option<usize>,
}

impl AlertFilter {
    pub fn open() -> Self {
        Self {
            open_only: true,
            ..Self::default()
        }
    }

    pub fn matches(&self, alert: &AlertInstance) -> bool {
        if self.open_only && !alert.status.is_open() {
            return false;
        }
        if self.status.is_some_and(|s| s != alert.status) {
            return false;
        }
        if self.rule_id.as_ref().is_some_and(|r| r != &alert.rule_id) {
            return false;
        }
        if self
            .resource_id
            .as_ref()
            .is_some_and(|r| r != &alert.resource_id)
        {
            return false;
        }
        true
    }
}

/// Lifecycle transition kinds, as streamed and logged
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Transition {
    Triggered,
    Acknowledged,
    Snoozed,
    Resolved,
}

impl Transition {
    pub fn as_str(&self) -> &'static str {
        match self {
            Transition::Triggered => "triggered",
            Transition::Acknowledged => "acknowledged",
            Transition::Snoozed => "snoozed",
            Transition::Resolved => "resolved",
        }
    }

    /// Only triggered and resolved transitions go out to channels
    pub fn notifies(&self) -> bool {
        matches!(self, Transition::Triggered | Transition::Resolved)
    }
}

impl std::fmt::Display for Transition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Transition {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "triggered" => Ok(Transition::Triggered),
            "acknowledged" => Ok(Transition::Acknowledged),
            "snoozed" => Ok(Transition::Snoozed),
            "resolved" => Ok(Transition::Resolved),
            other => Err(format!("unknown transition: {other}")),
        }
    }
}

/// A state change of one alert instance, with the instance after the change
#[derive(Debug, Clone, PartialEq)]
pub struct AlertTransition {
    pub transition: Transition,
    pub alert: AlertInstance,
}
