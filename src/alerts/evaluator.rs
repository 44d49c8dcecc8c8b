//! Pure rule evaluation
//!
//! `evaluate` decides whether a rule is met by the latest values of one
//! resource. It performs no I/O and keeps no state; the alert actor owns the
//! sweep, the watermarks and the lifecycle.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};

use super::rule::{AlertRule, ComparisonOp, Condition, GroupOperator, Threshold};
use crate::error::RuleEvaluationError;
use crate::{MetricPoint, MetricValue};

/// Latest value of every metric of one resource
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MetricSnapshot {
    pub resource_id: String,
    values: BTreeMap<String, (DateTime<Utc>, MetricValue)>,
}

impl MetricSnapshot {
    pub fn new(resource_id: impl Into<String>) -> Self {
        Self {
            resource_id: resource_id.into(),
            values: BTreeMap::new(),
        }
    }

    /// Keeps the newest point per metric name
    pub fn from_points(resource_id: impl Into<String>, points: &[MetricPoint]) -> Self {
        let mut snapshot = Self::new(resource_id);
        for point in points {
            snapshot.insert(&point.metric_name, point.time, point.value.clone());
        }
        snapshot
    }

    pub fn insert(&mut self, metric: &str, time: DateTime<Utc>, value: impl Into<MetricValue>) {
        let value = value.into();
        match self.values.get(metric) {
            Some((existing, _)) if *existing > time => {}
            _ => {
                self.values.insert(metric.to_string(), (time, value));
            }
        }
    }

    pub fn with(mut self, metric: &str, value: impl Into<MetricValue>) -> Self {
        self.insert(metric, Utc::now(), value);
        self
    }

    pub fn get(&self, metric: &str) -> Option<&MetricValue> {
        self.values.get(metric).map(|(_, value)| value)
    }

    /// Newest timestamp among the given metrics
    pub fn newest_time<'a>(
        &self,
        metrics: impl IntoIterator<Item = &'a str>,
    ) -> Option<DateTime<Utc>> {
        metrics
            .into_iter()
            .filter_map(|m| self.values.get(m).map(|(time, _)| *time))
            .max()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    fn replace(&self, metric: &str, value: MetricValue) -> Self {
        let mut copy = self.clone();
        let time = copy.values.get(metric).map(|(t, _)| *t).unwrap_or_else(Utc::now);
        copy.values.insert(metric.to_string(), (time, value));
        copy
    }
}

/// Result of evaluating one rule against one resource
#[derive(Debug, Clone, PartialEq)]
pub struct Evaluation {
    pub triggered: bool,

    /// Current value of the rule's primary metric
    pub value: Option<MetricValue>,
}

/// Decide whether `rule` is met by `current`
///
/// When the rule has a non-zero `grace`, `history` must hold the previous
/// readings of the primary metric (oldest first, excluding the current one)
/// and the `grace` newest of them must also satisfy the condition. Fewer
/// readings than `grace` never trigger.
pub fn evaluate(
    rule: &AlertRule,
    current: &MetricSnapshot,
    history: Option<&[MetricValue]>,
) -> Result<Evaluation, RuleEvaluationError> {
    let value = current.get(&rule.metric_name).cloned();
    let mut triggered = eval_condition(&rule.condition, current)?;

    if triggered && rule.grace > 0 {
        let history = history.ok_or_else(|| RuleEvaluationError::MissingHistory {
            metric: rule.metric_name.clone(),
        })?;
        let grace = rule.grace as usize;

        if history.len() < grace {
            triggered = false;
        } else {
            for previous in &history[history.len() - grace..] {
                let past = current.replace(&rule.metric_name, previous.clone());
                if !eval_condition(&rule.condition, &past)? {
                    triggered = false;
                    break;
                }
            }
        }
    }

    Ok(Evaluation { triggered, value })
}

fn eval_condition(
    condition: &Condition,
    snapshot: &MetricSnapshot,
) -> Result<bool, RuleEvaluationError> {
    match condition {
        Condition::Leaf {
            metric,
            op,
            threshold,
        } => eval_leaf(metric, *op, threshold, snapshot),
        Condition::Group { operator, children } => {
            if children.is_empty() {
                return Err(RuleEvaluationError::EmptyGroup);
            }
            match operator {
                GroupOperator::And => {
                    for child in children {
                        if !eval_condition(child, snapshot)? {
                            return Ok(false);
                        }
                    }
                    Ok(true)
                }
                GroupOperator::Or => {
                    for child in children {
                        if eval_condition(child, snapshot)? {
                            return Ok(true);
                        }
                    }
                    Ok(false)
                }
            }
        }
    }
}

fn eval_leaf(
    metric: &str,
    op: ComparisonOp,
    threshold: &Threshold,
    snapshot: &MetricSnapshot,
) -> Result<bool, RuleEvaluationError> {
    let value = snapshot
        .get(metric)
        .ok_or_else(|| RuleEvaluationError::MissingMetric {
            resource_id: snapshot.resource_id.clone(),
            metric: metric.to_string(),
        })?;

    match threshold {
        Threshold::Number(limit) => {
            let actual = value.as_f64().ok_or(RuleEvaluationError::TypeMismatch {
                metric: metric.to_string(),
                expected: "number",
                found: value.kind(),
            })?;
            Ok(op.compare_f64(actual, *limit))
        }
        Threshold::Bool(expected) => {
            let actual = value.as_bool().ok_or(RuleEvaluationError::TypeMismatch {
                metric: metric.to_string(),
                expected: "bool",
                found: value.kind(),
            })?;
            op.compare_bool(actual, *expected)
                .ok_or_else(|| RuleEvaluationError::UnsupportedOperator {
                    metric: metric.to_string(),
                    op: op.to_string(),
                })
        }
    }
}
