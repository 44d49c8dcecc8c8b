//! Metric store with a short-lived read cache
//!
//! `MetricStore` is what the scheduler commits through and what the alert
//! engine and API read from. The backend stays the source of truth: a cache
//! miss or an expired entry reads through, and every commit refreshes the
//! latest-value entry of the committing collector and drops its summaries.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::time::Instant;
use tracing::{debug, instrument};

use super::backend::{MetricQuery, StorageBackend};
use super::error::StorageResult;
use super::schema::ExecutionRecord;
use crate::MetricPoint;
use crate::health::HealthStatus;

/// Default lifetime of a cache entry
pub const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(5);

/// Aggregate over the numeric points of one metric in a range
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct MetricSummary {
    pub count: usize,
    pub min: Option<f64>,
    pub max: Option<f64>,
    pub avg: Option<f64>,
}

impl MetricSummary {
    pub fn from_points(points: &[MetricPoint]) -> Self {
        let values: Vec<f64> = points.iter().filter_map(|p| p.value.as_f64()).collect();
        if values.is_empty() {
            return Self {
                count: 0,
                min: None,
                max: None,
                avg: None,
            };
        }

        let sum: f64 = values.iter().sum();
        Self {
            count: values.len(),
            min: values.iter().copied().reduce(f64::min),
            max: values.iter().copied().reduce(f64::max),
            avg: Some(sum / values.len() as f64),
        }
    }
}

struct Entry<T> {
    value: T,
    expires: Instant,
}

impl<T: Clone> Entry<T> {
    fn fresh(&self) -> Option<T> {
        (Instant::now() < self.expires).then(|| self.value.clone())
    }
}

type SummaryKey = (String, String, i64, i64);

pub struct MetricStore {
    backend: Arc<dyn StorageBackend>,
    ttl: Duration,
    latest: Mutex<HashMap<String, Entry<Vec<MetricPoint>>>>,
    summaries: Mutex<HashMap<SummaryKey, Entry<MetricSummary>>>,
}

impl MetricStore {
    pub fn new(backend: Arc<dyn StorageBackend>, ttl: Duration) -> Self {
        Self {
            backend,
            ttl,
            latest: Mutex::new(HashMap::new()),
            summaries: Mutex::new(HashMap::new()),
        }
    }

    pub fn backend(&self) -> &Arc<dyn StorageBackend> {
        &self.backend
    }

    /// Commit one run atomically, then refresh the cache for its collector
    #[instrument(skip_all, fields(collector_id = %record.collector_id))]
    pub async fn commit_run(
        &self,
        record: ExecutionRecord,
        points: Vec<MetricPoint>,
        health: HealthStatus,
    ) -> StorageResult<i64> {
        let collector_id = record.collector_id.clone();
        let id = self
            .backend
            .commit_run(record, points.clone(), health)
            .await?;

        if let Ok(mut latest) = self.latest.lock() {
            let merged = latest.remove(&collector_id).map(|entry| {
                let mut by_name: BTreeMap<String, MetricPoint> = entry
                    .value
                    .into_iter()
                    .map(|p| (p.metric_name.clone(), p))
                    .collect();
                for point in &points {
                    let newer = by_name
                        .get(&point.metric_name)
                        .is_none_or(|existing| existing.time <= point.time);
                    if newer {
                        by_name.insert(point.metric_name.clone(), point.clone());
                    }
                }
                by_name.into_values().collect::<Vec<_>>()
            });
            if let Some(value) = merged {
                latest.insert(
                    collector_id.clone(),
                    Entry {
                        value,
                        expires: Instant::now() + self.ttl,
                    },
                );
            }
        }

        if !points.is_empty()
            && let Ok(mut summaries) = self.summaries.lock()
        {
            summaries.retain(|(collector, _, _, _), _| collector != &collector_id);
        }

        Ok(id)
    }

    pub async fn query_range(&self, query: MetricQuery) -> StorageResult<Vec<MetricPoint>> {
        self.backend.query_range(query).await
    }

    /// Newest point of every metric of a collector, ordered by metric name
    pub async fn latest(&self, collector_id: &str) -> StorageResult<Vec<MetricPoint>> {
        let cached = self
            .latest
            .lock()
            .ok()
            .and_then(|cache| cache.get(collector_id).and_then(Entry::fresh));
        if let Some(points) = cached {
            return Ok(points);
        }

        debug!(collector_id, "latest cache miss");
        let points = self.backend.latest_values(collector_id).await?;
        if let Ok(mut cache) = self.latest.lock() {
            cache.insert(
                collector_id.to_string(),
                Entry {
                    value: points.clone(),
                    expires: Instant::now() + self.ttl,
                },
            );
        }
        Ok(points)
    }

    pub async fn latest_for(
        &self,
        collector_id: &str,
        metric_name: &str,
    ) -> StorageResult<Option<MetricPoint>> {
        Ok(self
            .latest(collector_id)
            .await?
            .into_iter()
            .find(|p| p.metric_name == metric_name))
    }

    /// The `limit` newest points of one metric, oldest first
    pub async fn recent(
        &self,
        collector_id: &str,
        metric_name: &str,
        limit: usize,
    ) -> StorageResult<Vec<MetricPoint>> {
        self.backend
            .query_recent(collector_id, metric_name, limit)
            .await
    }

    pub async fn summary(
        &self,
        collector_id: &str,
        metric_name: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> StorageResult<MetricSummary> {
        let key = (
            collector_id.to_string(),
            metric_name.to_string(),
            start.timestamp_millis(),
            end.timestamp_millis(),
        );

        let cached = self
            .summaries
            .lock()
            .ok()
            .and_then(|cache| cache.get(&key).and_then(Entry::fresh));
        if let Some(summary) = cached {
            return Ok(summary);
        }

        let points = self
            .backend
            .query_range(MetricQuery::new(collector_id, start, end).metric(metric_name))
            .await?;
        let summary = MetricSummary::from_points(&points);

        if let Ok(mut cache) = self.summaries.lock() {
            cache.insert(
                key,
                Entry {
                    value: summary,
                    expires: Instant::now() + self.ttl,
                },
            );
        }
        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::memory::MemoryBackend;
    use crate::storage::schema::ExecutionStatus;

    fn store() -> (Arc<MemoryBackend>, MetricStore) {
        let backend = Arc::new(MemoryBackend::new());
        let store = MetricStore::new(backend.clone(), Duration::from_secs(5));
        (backend, store)
    }

    async fn commit(store: &MetricStore, t: DateTime<Utc>, value: f64) {
        let record =
            ExecutionRecord::new("nas", t, t, ExecutionStatus::Success).with_metric_count(1);
        let mut health = HealthStatus::unknown("nas");
        health.record_success(t);
        store
            .commit_run(record, vec![MetricPoint::new(t, "nas", "cpu_percent", value)], health)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_commit_refreshes_cached_latest() {
        let (_backend, store) = store();
        let t0 = Utc::now();

        commit(&store, t0, 10.0).await;
        let first = store.latest_for("nas", "cpu_percent").await.unwrap().unwrap();
        assert_eq!(first.value.as_f64(), Some(10.0));

        commit(&store, t0 + chrono::Duration::seconds(30), 20.0).await;
        let second = store.latest_for("nas", "cpu_percent").await.unwrap().unwrap();
        assert_eq!(second.value.as_f64(), Some(20.0));
    }

    #[tokio::test(start_paused = true)]
    async fn test_expired_entry_reads_through() {
        let (backend, store) = store();
        let t0 = Utc::now();

        commit(&store, t0, 10.0).await;
        assert_eq!(store.latest("nas").await.unwrap().len(), 1);

        // written behind the cache's back
        backend
            .insert_batch(vec![MetricPoint::new(t0, "nas", "memory_percent", 50.0)])
            .await
            .unwrap();
        assert_eq!(store.latest("nas").await.unwrap().len(), 1);

        tokio::time::advance(Duration::from_secs(6)).await;
        assert_eq!(store.latest("nas").await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_summary_over_range() {
        let (_backend, store) = store();
        let t0 = Utc::now();

        for (i, v) in [10.0, 20.0, 60.0].into_iter().enumerate() {
            commit(&store, t0 + chrono::Duration::seconds(i as i64), v).await;
        }

        let summary = store
            .summary("nas", "cpu_percent", t0, t0 + chrono::Duration::seconds(10))
            .await
            .unwrap();
        assert_eq!(summary.count, 3);
        assert_eq!(summary.min, Some(10.0));
        assert_eq!(summary.max, Some(60.0));
        assert_eq!(summary.avg, Some(30.0));

        let (from, to) = (t0 - chrono::Duration::days(2), t0 - chrono::Duration::days(1));
        let empty = store.summary("nas", "cpu_percent", from, to).await.unwrap();
        assert_eq!(empty.count, 0);
        assert!(empty.avg.is_none());
    }
}
