pub mod actors;
pub mod alerts;
#[cfg(feature = "api")]
pub mod api;
pub mod collector;
pub mod config;
pub mod error;
pub mod health;
pub mod hub;
pub mod notify;
pub mod registry;
pub mod runtime;
pub mod storage;
pub mod util;

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Free-form labels attached to a metric point.
pub type Tags = BTreeMap<String, String>;

/// Value of a single measurement
///
/// Numbers and booleans are what alert rules compare against; text and
/// structured values are stored and streamed as-is.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MetricValue {
    Bool(bool),
    Number(f64),
    Text(String),
    Structured(serde_json::Value),
}

impl MetricValue {
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            MetricValue::Number(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            MetricValue::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// Fold scalar JSON into the matching variant
    ///
    /// The stored form is untagged, so `Structured(5)` would read back as
    /// `Number(5.0)`. Only arrays, objects and null stay structured.
    pub fn normalized(self) -> Self {
        match self {
            MetricValue::Structured(value) => MetricValue::from(value),
            other => other,
        }
    }

    /// Short type name used in error messages
    pub fn kind(&self) -> &'static str {
        match self {
            MetricValue::Bool(_) => "bool",
            MetricValue::Number(_) => "number",
            MetricValue::Text(_) => "text",
            MetricValue::Structured(_) => "structured",
        }
    }
}

impl From<f64> for MetricValue {
    fn from(value: f64) -> Self {
        MetricValue::Number(value)
    }
}

impl From<f32> for MetricValue {
    fn from(value: f32) -> Self {
        MetricValue::Number(value as f64)
    }
}

impl From<u64> for MetricValue {
    fn from(value: u64) -> Self {
        MetricValue::Number(value as f64)
    }
}

impl From<bool> for MetricValue {
    fn from(value: bool) -> Self {
        MetricValue::Bool(value)
    }
}

impl From<&str> for MetricValue {
    fn from(value: &str) -> Self {
        MetricValue::Text(value.to_string())
    }
}

impl From<serde_json::Value> for MetricValue {
    fn from(value: serde_json::Value) -> Self {
        match value {
            serde_json::Value::Bool(b) => MetricValue::Bool(b),
            serde_json::Value::Number(n) => match n.as_f64() {
                Some(f) => MetricValue::Number(f),
                None => MetricValue::Structured(serde_json::Value::Number(n)),
            },
            serde_json::Value::String(s) => MetricValue::Text(s),
            other => MetricValue::Structured(other),
        }
    }
}

/// A single stored measurement
///
/// Identity is `(time, collector_id, metric_name)`. Points are insertion-only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricPoint {
    /// Measurement time, millisecond precision
    pub time: DateTime<Utc>,

    /// Collector that produced the point
    pub collector_id: String,

    /// Metric name (e.g. "cpu_percent")
    pub metric_name: String,

    pub value: MetricValue,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub tags: Tags,
}

impl MetricPoint {
    pub fn new(
        time: DateTime<Utc>,
        collector_id: impl Into<String>,
        metric_name: impl Into<String>,
        value: impl Into<MetricValue>,
    ) -> Self {
        Self {
            time: util::millis_precision(time),
            collector_id: collector_id.into(),
            metric_name: metric_name.into(),
            value: MetricValue::normalized(value.into()),
            tags: Tags::new(),
        }
    }

    pub fn with_tag(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.tags.insert(key.into(), value.into());
        self
    }
}
