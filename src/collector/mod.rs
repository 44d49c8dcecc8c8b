//! Collector plugins
//!
//! A collector is an opaque unit of monitoring logic. The scheduler only
//! knows the three operations of [`Collector`]; everything else about a
//! collector lives in its registration's config blob.
//!
//! Implementations are resolved at compile time through the
//! [`CollectorCatalog`], which maps a registration's `kind` to a factory.
//!
//! Built-in kinds:
//!
//! - `system`: CPU, memory, swap, load and temperatures of the local host
//! - `http`: polls a JSON endpoint and flattens its numeric and boolean leaves

pub mod http;
pub mod system;

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use tokio::sync::watch;
use tokio::time::Instant;

use crate::error::CollectionError;
use crate::storage::CollectorRegistration;
use crate::{MetricPoint, MetricValue, Tags};

/// Static description of a collector implementation
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CollectorMetadata {
    pub kind: String,
    pub description: String,
    /// Metric names this collector is known to emit (may be incomplete)
    pub metrics: Vec<String>,
}

/// Result of a collector's own health probe
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HealthReport {
    pub healthy: bool,
    pub message: String,
}

impl HealthReport {
    pub fn ok(message: impl Into<String>) -> Self {
        Self {
            healthy: true,
            message: message.into(),
        }
    }

    pub fn unhealthy(message: impl Into<String>) -> Self {
        Self {
            healthy: false,
            message: message.into(),
        }
    }
}

/// Everything a collector gets for one invocation
#[derive(Debug, Clone)]
pub struct CollectContext {
    pub collector_id: String,
    pub config: Value,
    /// The scheduler drops the run at this instant
    pub deadline: Instant,
    cancel: watch::Receiver<bool>,
}

impl CollectContext {
    pub fn new(
        collector_id: impl Into<String>,
        config: Value,
        deadline: Instant,
        cancel: watch::Receiver<bool>,
    ) -> Self {
        Self {
            collector_id: collector_id.into(),
            config,
            deadline,
            cancel,
        }
    }

    /// Time left before the deadline
    pub fn remaining(&self) -> std::time::Duration {
        self.deadline.saturating_duration_since(Instant::now())
    }

    pub fn is_cancelled(&self) -> bool {
        *self.cancel.borrow()
    }

    /// Resolves once shutdown has been requested
    pub async fn cancelled(&self) {
        let mut rx = self.cancel.clone();
        // a closed sender means the scheduler is gone
        let _ = rx.wait_for(|cancelled| *cancelled).await;
    }
}

/// One measurement reported by a collector
#[derive(Debug, Clone, PartialEq)]
pub struct MetricSample {
    pub name: String,
    pub value: MetricValue,
    pub tags: Tags,
    /// Defaults to the run's completion time
    pub time: Option<DateTime<Utc>>,
}

/// Output of one successful `collect()`
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MetricSet {
    pub samples: Vec<MetricSample>,
}

impl MetricSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, name: impl Into<String>, value: impl Into<MetricValue>) {
        self.samples.push(MetricSample {
            name: name.into(),
            value: value.into(),
            tags: Tags::new(),
            time: None,
        });
    }

    pub fn push_tagged(
        &mut self,
        name: impl Into<String>,
        value: impl Into<MetricValue>,
        tags: Tags,
    ) {
        self.samples.push(MetricSample {
            name: name.into(),
            value: value.into(),
            tags,
            time: None,
        });
    }

    pub fn with(mut self, name: impl Into<String>, value: impl Into<MetricValue>) -> Self {
        self.push(name, value);
        self
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Reject data the store cannot hold
    pub fn validate(&self) -> Result<(), CollectionError> {
        let mut seen = std::collections::HashSet::new();
        for sample in &self.samples {
            if sample.name.trim().is_empty() {
                return Err(CollectionError::InvalidData(
                    "metric name must not be empty".to_string(),
                ));
            }
            if let MetricValue::Number(n) = sample.value
                && !n.is_finite()
            {
                return Err(CollectionError::InvalidData(format!(
                    "metric '{}' is not a finite number",
                    sample.name
                )));
            }
            if !seen.insert((sample.time, sample.name.as_str())) {
                return Err(CollectionError::InvalidData(format!(
                    "metric '{}' reported twice for the same time",
                    sample.name
                )));
            }
        }
        Ok(())
    }

    pub fn into_points(self, collector_id: &str, default_time: DateTime<Utc>) -> Vec<MetricPoint> {
        self.samples
            .into_iter()
            .map(|sample| {
                let mut point = MetricPoint::new(
                    sample.time.unwrap_or(default_time),
                    collector_id,
                    sample.name,
                    sample.value,
                );
                point.tags = sample.tags;
                point
            })
            .collect()
    }
}

/// The interface the scheduler drives
#[async_trait]
pub trait Collector: Send + Sync {
    fn describe(&self) -> CollectorMetadata;

    async fn collect(&self, ctx: &CollectContext) -> Result<MetricSet, CollectionError>;

    async fn health_check(&self, ctx: &CollectContext) -> HealthReport {
        match self.collect(ctx).await {
            Ok(set) => HealthReport::ok(format!("collected {} metrics", set.len())),
            Err(err) => HealthReport::unhealthy(err.to_string()),
        }
    }
}

pub type CollectorFactory = Box<
    dyn Fn(&CollectorRegistration) -> Result<Arc<dyn Collector>, CollectionError> + Send + Sync,
>;

/// Compile-time registry of collector implementations, keyed by kind
pub struct CollectorCatalog {
    factories: HashMap<String, CollectorFactory>,
}

impl CollectorCatalog {
    /// An empty catalog
    pub fn new() -> Self {
        Self {
            factories: HashMap::new(),
        }
    }

    /// Catalog with the `system` and `http` collectors
    pub fn with_builtins() -> Self {
        let mut catalog = Self::new();
        catalog.register(system::KIND, |reg| {
            Ok(Arc::new(system::SystemCollector::from_config(&reg.config)?) as Arc<dyn Collector>)
        });
        catalog.register(http::KIND, |reg| {
            Ok(Arc::new(http::HttpCollector::from_config(&reg.config)?) as Arc<dyn Collector>)
        });
        catalog
    }

    pub fn register<F>(&mut self, kind: impl Into<String>, factory: F)
    where
        F: Fn(&CollectorRegistration) -> Result<Arc<dyn Collector>, CollectionError>
            + Send
            + Sync
            + 'static,
    {
        self.factories.insert(kind.into(), Box::new(factory));
    }

    pub fn contains(&self, kind: &str) -> bool {
        self.factories.contains_key(kind)
    }

    pub fn kinds(&self) -> Vec<&str> {
        let mut kinds: Vec<&str> = self.factories.keys().map(String::as_str).collect();
        kinds.sort_unstable();
        kinds
    }

    /// Instantiate the collector for a registration
    pub fn build(
        &self,
        registration: &CollectorRegistration,
    ) -> Result<Arc<dyn Collector>, CollectionError> {
        let factory = self.factories.get(&registration.kind).ok_or_else(|| {
            CollectionError::Build(format!("unknown collector kind '{}'", registration.kind))
        })?;
        factory(registration)
    }
}

impl Default for CollectorCatalog {
    fn default() -> Self {
        Self::with_builtins()
    }
}
