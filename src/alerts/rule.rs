//! Alert rule definitions
//!
//! Conditions are a tagged union evaluated by structural recursion:
//!
//! ```text
//! Condition = Leaf  { metric, op, threshold }
//!           | Group { operator: and|or, children: [Condition] }
//! ```
//!
//! Example JSON:
//!
//! ```json
//! {
//!   "type": "group",
//!   "operator": "and",
//!   "children": [
//!     { "type": "leaf", "metric": "cpu_percent", "op": "gt", "threshold": 80 },
//!     { "type": "leaf", "metric": "memory_percent", "op": "gt", "threshold": 90 }
//!   ]
//! }
//! ```

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Rule `resource_type` that matches every collector category
pub const ANY_RESOURCE: &str = "*";

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Warning,
    Critical,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Info => "info",
            Severity::Warning => "warning",
            Severity::Critical => "critical",
        }
    }
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Severity {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "info" => Ok(Severity::Info),
            "warning" => Ok(Severity::Warning),
            "critical" => Ok(Severity::Critical),
            other => Err(format!("unknown severity: {other}")),
        }
    }
}

/// Leaf comparison operator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ComparisonOp {
    Gt,
    Lt,
    Gte,
    Lte,
    Eq,
    Ne,
}

impl ComparisonOp {
    pub fn as_str(&self) -> &'static str {
        match self {
            ComparisonOp::Gt => "gt",
            ComparisonOp::Lt => "lt",
            ComparisonOp::Gte => "gte",
            ComparisonOp::Lte => "lte",
            ComparisonOp::Eq => "eq",
            ComparisonOp::Ne => "ne",
        }
    }

    pub fn compare_f64(&self, actual: f64, threshold: f64) -> bool {
        match self {
            ComparisonOp::Gt => actual > threshold,
            ComparisonOp::Lt => actual < threshold,
            ComparisonOp::Gte => actual >= threshold,
            ComparisonOp::Lte => actual <= threshold,
            ComparisonOp::Eq => actual == threshold,
            ComparisonOp::Ne => actual != threshold,
        }
    }

    /// Booleans only support equality; ordering returns `None`
    pub fn compare_bool(&self, actual: bool, threshold: bool) -> Option<bool> {
        match self {
            ComparisonOp::Eq => Some(actual == threshold),
            ComparisonOp::Ne => Some(actual != threshold),
            _ => None,
        }
    }
}

impl std::fmt::Display for ComparisonOp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Threshold a leaf compares against
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Threshold {
    Bool(bool),
    Number(f64),
}

impl From<f64> for Threshold {
    fn from(value: f64) -> Self {
        Threshold::Number(value)
    }
}

impl From<bool> for Threshold {
    fn from(value: bool) -> Self {
        Threshold::Bool(value)
    }
}

impl std::fmt::Display for Threshold {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Threshold::Bool(b) => write!(f, "{b}"),
            Threshold::Number(n) => write!(f, "{n}"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GroupOperator {
    And,
    Or,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Condition {
    Leaf {
        metric: String,
        op: ComparisonOp,
        threshold: Threshold,
    },
    Group {
        operator: GroupOperator,
        children: Vec<Condition>,
    },
}

impl Condition {
    pub fn leaf(
        metric: impl Into<String>,
        op: ComparisonOp,
        threshold: impl Into<Threshold>,
    ) -> Self {
        Condition::Leaf {
            metric: metric.into(),
            op,
            threshold: threshold.into(),
        }
    }

    pub fn all(children: Vec<Condition>) -> Self {
        Condition::Group {
            operator: GroupOperator::And,
            children,
        }
    }

    pub fn any(children: Vec<Condition>) -> Self {
        Condition::Group {
            operator: GroupOperator::Or,
            children,
        }
    }

    /// Distinct metric names referenced anywhere in the tree, in first-seen order
    pub fn metrics(&self) -> Vec<&str> {
        let mut out = Vec::new();
        self.collect_metrics(&mut out);
        out
    }

    fn collect_metrics<'a>(&'a self, out: &mut Vec<&'a str>) {
        match self {
            Condition::Leaf { metric, .. } => {
                if !out.contains(&metric.as_str()) {
                    out.push(metric);
                }
            }
            Condition::Group { children, .. } => {
                for child in children {
                    child.collect_metrics(out);
                }
            }
        }
    }

    /// Human readable form, e.g. `(cpu_percent gt 80 and memory_percent gt 90)`
    pub fn describe(&self) -> String {
        match self {
            Condition::Leaf {
                metric,
                op,
                threshold,
            } => format!("{metric} {op} {threshold}"),
            Condition::Group { operator, children } => {
                let joiner = match operator {
                    GroupOperator::And => " and ",
                    GroupOperator::Or => " or ",
                };
                let parts: Vec<String> = children.iter().map(Condition::describe).collect();
                format!("({})", parts.join(joiner))
            }
        }
    }
}

/// A persisted alert rule
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertRule {
    pub id: String,

    #[serde(default)]
    pub name: String,

    /// Collector category this rule applies to (`*` for all)
    pub resource_type: String,

    /// Pin the rule to a single collector
    #[serde(default)]
    pub resource_id: Option<String>,

    /// Primary metric, reported as the alert's `last_value`
    pub metric_name: String,

    pub condition: Condition,

    pub severity: Severity,

    #[serde(default = "default_enabled")]
    pub enabled: bool,

    /// Minimum time between new instances for the same resource; falls back
    /// to the configured default when absent
    #[serde(
        default,
        rename = "cooldown_secs",
        with = "crate::util::duration_secs::option",
        skip_serializing_if = "Option::is_none"
    )]
    pub cooldown: Option<Duration>,

    /// Number of previous consecutive readings of the primary metric that
    /// must also satisfy the condition before the rule triggers
    #[serde(default)]
    pub grace: u32,

    #[serde(default)]
    pub channels: Vec<String>,
}

fn default_enabled() -> bool {
    true
}

impl AlertRule {
    /// Single-comparison rule on `metric`
    pub fn threshold(
        id: impl Into<String>,
        resource_type: impl Into<String>,
        metric: impl Into<String>,
        op: ComparisonOp,
        threshold: impl Into<Threshold>,
    ) -> Self {
        let id = id.into();
        let metric = metric.into();
        Self {
            name: id.clone(),
            id,
            resource_type: resource_type.into(),
            resource_id: None,
            condition: Condition::leaf(metric.clone(), op, threshold),
            metric_name: metric,
            severity: Severity::Warning,
            enabled: true,
            cooldown: None,
            grace: 0,
            channels: Vec::new(),
        }
    }

    /// Rule over an arbitrary condition; the first referenced metric is primary
    pub fn with_condition(
        id: impl Into<String>,
        resource_type: impl Into<String>,
        condition: Condition,
    ) -> Self {
        let id = id.into();
        let metric_name = condition
            .metrics()
            .first()
            .map(|m| m.to_string())
            .unwrap_or_default();
        Self {
            name: id.clone(),
            id,
            resource_type: resource_type.into(),
            resource_id: None,
            metric_name,
            condition,
            severity: Severity::Warning,
            enabled: true,
            cooldown: None,
            grace: 0,
            channels: Vec::new(),
        }
    }

    pub fn severity(mut self, severity: Severity) -> Self {
        self.severity = severity;
        self
    }

    pub fn cooldown(mut self, cooldown: Duration) -> Self {
        self.cooldown = Some(cooldown);
        self
    }

    pub fn grace(mut self, grace: u32) -> Self {
        self.grace = grace;
        self
    }

    pub fn channels<I, S>(mut self, channels: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.channels = channels.into_iter().map(Into::into).collect();
        self
    }

    pub fn for_resource(mut self, resource_id: impl Into<String>) -> Self {
        self.resource_id = Some(resource_id.into());
        self
    }

    /// Does this rule target the collector with the given id and category?
    pub fn applies_to(&self, collector_id: &str, category: &str) -> bool {
        if let Some(pinned) = &self.resource_id {
            return pinned == collector_id;
        }
        self.resource_type == ANY_RESOURCE || self.resource_type == category
    }

    /// Structural checks performed before the rule is stored
    pub fn validate(&self) -> Result<(), String> {
        if self.id.trim().is_empty() {
            return Err("rule id must not be empty".to_string());
        }
        if self.metric_name.trim().is_empty() {
            return Err("rule metric_name must not be empty".to_string());
        }
        validate_condition(&self.condition)
    }
}

fn validate_condition(condition: &Condition) -> Result<(), String> {
    match condition {
        Condition::Leaf {
            metric,
            op,
            threshold,
        } => {
            if metric.trim().is_empty() {
                return Err("leaf metric must not be empty".to_string());
            }
            if let Threshold::Bool(_) = threshold
                && !matches!(op, ComparisonOp::Eq | ComparisonOp::Ne)
            {
                return Err(format!("operator '{op}' cannot compare booleans"));
            }
            Ok(())
        }
        Condition::Group { children, .. } => {
            if children.is_empty() {
                return Err("group condition has no children".to_string());
            }
            children.iter().try_for_each(validate_condition)
        }
    }
}
