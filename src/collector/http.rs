//! JSON endpoint poller
//!
//! Fetches a JSON document and turns every numeric or boolean leaf into a
//! metric named by its dotted path (`{"disk": {"free": 3}}` → `disk.free`,
//! array elements by index). Two metrics are always emitted on success:
//! `up` (true) and `response_time_ms`.
//!
//! Config:
//!
//! ```json
//! {
//!   "url": "http://10.0.0.2:3000/metrics",
//!   "token": "secret",
//!   "token_header": "X-MONITORING-SECRET",
//!   "include": "^(cpus|memory)\\."
//! }
//! ```

use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use regex::Regex;
use serde::Deserialize;
use serde_json::Value;
use tokio::time::Instant;
use tracing::{instrument, trace};

use super::{CollectContext, Collector, CollectorMetadata, MetricSet};
use crate::error::CollectionError;

pub const KIND: &str = "http";

const DEFAULT_TOKEN_HEADER: &str = "X-MONITORING-SECRET";

#[derive(Debug, Clone, Deserialize)]
pub struct HttpConfig {
    pub url: String,

    #[serde(default)]
    pub token: Option<String>,

    #[serde(default = "default_token_header")]
    pub token_header: String,

    /// Only leaves whose dotted name matches are kept
    #[serde(default)]
    pub include: Option<String>,
}

fn default_token_header() -> String {
    DEFAULT_TOKEN_HEADER.to_string()
}

#[derive(Debug)]
pub struct HttpCollector {
    config: HttpConfig,
    include: Option<Regex>,
    client: reqwest::Client,
}

impl HttpCollector {
    pub fn new(config: HttpConfig) -> Result<Self, CollectionError> {
        let include = config
            .include
            .as_deref()
            .map(Regex::new)
            .transpose()
            .map_err(|e| CollectionError::Build(format!("invalid include pattern: {}", e)))?;

        let client = reqwest::Client::builder()
            .build()
            .map_err(|e| CollectionError::Build(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self {
            config,
            include,
            client,
        })
    }

    pub fn from_config(config: &Value) -> Result<Self, CollectionError> {
        let config: HttpConfig = serde_json::from_value(config.clone())
            .map_err(|e| CollectionError::Build(format!("invalid http config: {}", e)))?;
        Self::new(config)
    }

    async fn fetch(&self, ctx: &CollectContext) -> anyhow::Result<Value> {
        let mut request = self.client.get(&self.config.url);

        if let Some(token) = &self.config.token {
            request = request.header(self.config.token_header.as_str(), token);
        }

        // never outlive the scheduler's deadline
        let remaining = ctx.remaining();
        if !remaining.is_zero() {
            request = request.timeout(remaining);
        }

        let response = request
            .send()
            .await
            .context("failed to send HTTP request")?;

        if !response.status().is_success() {
            anyhow::bail!("HTTP error: {}", response.status());
        }

        let body = response
            .text()
            .await
            .context("failed to read response body")?;

        serde_json::from_str(&body).context("failed to parse response JSON")
    }

    fn keep(&self, name: &str) -> bool {
        self.include.as_ref().is_none_or(|re| re.is_match(name))
    }
}

/// Flatten numeric and boolean leaves into `(dotted.path, value)` samples
pub fn flatten(prefix: &str, value: &Value, out: &mut Vec<(String, Value)>) {
    let join = |key: &str| {
        if prefix.is_empty() {
            key.to_string()
        } else {
            format!("{prefix}.{key}")
        }
    };

    match value {
        Value::Object(map) => {
            for (key, child) in map {
                flatten(&join(key), child, out);
            }
        }
        Value::Array(items) => {
            for (index, child) in items.iter().enumerate() {
                flatten(&join(&index.to_string()), child, out);
            }
        }
        Value::Number(_) | Value::Bool(_) if !prefix.is_empty() => {
            out.push((prefix.to_string(), value.clone()));
        }
        Value::Number(_) | Value::Bool(_) => {
            out.push(("value".to_string(), value.clone()));
        }
        Value::Null | Value::String(_) => {}
    }
}

#[async_trait]
impl Collector for HttpCollector {
    fn describe(&self) -> CollectorMetadata {
        CollectorMetadata {
            kind: KIND.to_string(),
            description: format!("JSON endpoint at {}", self.config.url),
            metrics: vec!["up".to_string(), "response_time_ms".to_string()],
        }
    }

    #[instrument(skip_all, fields(collector_id = %ctx.collector_id, url = %self.config.url))]
    async fn collect(&self, ctx: &CollectContext) -> Result<MetricSet, CollectionError> {
        let started = Instant::now();
        let document = self.fetch(ctx).await?;
        let elapsed: Duration = started.elapsed();

        let mut leaves = Vec::new();
        flatten("", &document, &mut leaves);

        let mut set = MetricSet::new();
        set.push("up", true);
        set.push("response_time_ms", elapsed.as_secs_f64() * 1000.0);

        for (name, value) in leaves {
            if name == "up" || name == "response_time_ms" || !self.keep(&name) {
                continue;
            }
            match value {
                Value::Bool(b) => set.push(name, b),
                Value::Number(n) => {
                    if let Some(f) = n.as_f64().filter(|f| f.is_finite()) {
                        set.push(name, f);
                    }
                }
                _ => {}
            }
        }

        trace!("flattened {} metrics", set.len());
        Ok(set)
    }
}
