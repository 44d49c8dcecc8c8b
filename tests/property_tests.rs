//! Property-based tests for invariants using proptest
//!
//! These tests verify that certain properties hold true for all inputs:
//! - Health state depends only on the consecutive error count
//! - Jittered intervals stay inside their band
//! - Start offsets stay inside the interval and are distinct per group
//! - Grace never triggers on fewer readings than it asks for
//! - Range summaries are ordered (min <= avg <= max)
//! - The memory backend returns range queries in time order
//! - Finite numbers read back from SQLite bit for bit

use std::time::Duration;

use chrono::{TimeZone, Utc};
use hearth::{
    MetricPoint, MetricValue,
    actors::scheduler::stagger,
    alerts::{AlertRule, ComparisonOp, MetricSnapshot, evaluate},
    health::{DEGRADED_AFTER, FAILING_AFTER, HealthState, HealthStatus},
    storage::{CollectorRegistration, MemoryBackend, MetricQuery, MetricSummary, StorageBackend},
    util::jittered,
};
use proptest::prelude::*;

// Property: health state is a function of the failure streak
proptest! {
    #[test]
    fn prop_health_follows_consecutive_errors(
        outcomes in prop::collection::vec(any::<bool>(), 1..40),
    ) {
        let mut health = HealthStatus::unknown("nas");
        let mut streak = 0u32;
        let at = Utc.timestamp_opt(1_700_000_000, 0).unwrap();

        for success in outcomes {
            if success {
                health.record_success(at);
                streak = 0;
            } else {
                health.record_failure(at, "boom");
                streak += 1;
            }

            prop_assert_eq!(health.consecutive_errors, streak);
            prop_assert_eq!(health.state, HealthState::from_consecutive_errors(streak));
        }
    }
}

#[test]
fn test_health_thresholds() {
    assert_eq!(HealthState::from_consecutive_errors(0), HealthState::Healthy);
    assert_eq!(
        HealthState::from_consecutive_errors(DEGRADED_AFTER - 1),
        HealthState::Healthy
    );
    assert_eq!(
        HealthState::from_consecutive_errors(DEGRADED_AFTER),
        HealthState::Degraded
    );
    assert_eq!(
        HealthState::from_consecutive_errors(FAILING_AFTER),
        HealthState::Failing
    );
}

// Property: jitter stays within base * (1 +/- ratio)
proptest! {
    #[test]
    fn prop_jitter_within_band(base_ms in 1u64..3_600_000, ratio in 0.0f64..=1.0) {
        let base = Duration::from_millis(base_ms);
        let got = jittered(base, ratio).as_secs_f64();
        let low = base.as_secs_f64() * (1.0 - ratio);
        let high = base.as_secs_f64() * (1.0 + ratio);

        prop_assert!(got >= low - 1e-6 && got <= high + 1e-6);
    }
}

// Property: offsets are inside the interval and unique within a group
proptest! {
    #[test]
    fn prop_stagger_offsets_spread(
        intervals in prop::collection::vec(prop::sample::select(vec![10u64, 60, 300]), 1..30),
    ) {
        let registrations: Vec<CollectorRegistration> = intervals
            .iter()
            .enumerate()
            .map(|(i, secs)| {
                let interval = Duration::from_secs(*secs);
                CollectorRegistration::new(format!("c{i:02}"), "system", "host", interval)
            })
            .collect();

        let offsets = stagger(&registrations);
        prop_assert_eq!(offsets.len(), registrations.len());

        for interval in [10u64, 60, 300] {
            let interval = Duration::from_secs(interval);
            let mut group: Vec<Duration> = registrations
                .iter()
                .filter(|r| r.interval == interval)
                .map(|r| offsets[&r.id])
                .collect();
            prop_assert!(group.iter().all(|offset| *offset < interval));

            group.sort();
            group.dedup();
            let expected = registrations.iter().filter(|r| r.interval == interval).count();
            prop_assert_eq!(group.len(), expected);
        }
    }
}

// Property: a rule with grace N needs N earlier matching readings
proptest! {
    #[test]
    fn prop_grace_needs_enough_history(
        grace in 1u32..6,
        history in prop::collection::vec(0.0f64..100.0, 0..10),
        current in 0.0f64..100.0,
    ) {
        let rule =
            AlertRule::threshold("cpu", "host", "cpu_percent", ComparisonOp::Gt, 50.0).grace(grace);
        let snapshot = MetricSnapshot::new("nas").with("cpu_percent", current);
        let values: Vec<MetricValue> = history.iter().map(|v| MetricValue::Number(*v)).collect();

        let evaluation = evaluate(&rule, &snapshot, Some(&values)).unwrap();

        let grace = grace as usize;
        let expected = current > 50.0
            && history.len() >= grace
            && history[history.len() - grace..].iter().all(|v| *v > 50.0);
        prop_assert_eq!(evaluation.triggered, expected);
    }
}

// Property: each operator agrees with its negation
proptest! {
    #[test]
    fn prop_comparison_ops_are_complementary(actual in -1e6f64..1e6, threshold in -1e6f64..1e6) {
        prop_assert_eq!(
            ComparisonOp::Gt.compare_f64(actual, threshold),
            !ComparisonOp::Lte.compare_f64(actual, threshold)
        );
        prop_assert_eq!(
            ComparisonOp::Lt.compare_f64(actual, threshold),
            !ComparisonOp::Gte.compare_f64(actual, threshold)
        );
        prop_assert_eq!(
            ComparisonOp::Eq.compare_f64(actual, threshold),
            !ComparisonOp::Ne.compare_f64(actual, threshold)
        );
    }
}

// Property: min <= avg <= max and count ignores non-numeric points
proptest! {
    #[test]
    fn prop_summary_is_ordered(
        values in prop::collection::vec(-1e6f64..1e6, 0..50),
        flags in 0usize..5,
    ) {
        let t0 = Utc.timestamp_opt(1_700_000_000, 0).unwrap();
        let at = |i: usize| t0 + chrono::Duration::seconds(i as i64);
        let mut points: Vec<MetricPoint> = values
            .iter()
            .enumerate()
            .map(|(i, v)| MetricPoint::new(at(i), "nas", "cpu", *v))
            .collect();
        points.extend((0..flags).map(|i| MetricPoint::new(at(i), "nas", "cpu", true)));

        let summary = MetricSummary::from_points(&points);
        prop_assert_eq!(summary.count, values.len());

        match (summary.min, summary.avg, summary.max) {
            (Some(min), Some(avg), Some(max)) => {
                prop_assert!(min <= avg + 1e-6);
                prop_assert!(avg <= max + 1e-6);
            }
            (None, None, None) => prop_assert!(values.is_empty()),
            other => prop_assert!(false, "partial summary: {:?}", other),
        }
    }
}

// Property: range queries come back in time order whatever the insert order
proptest! {
    #[test]
    fn prop_memory_range_is_time_ordered(offsets in prop::collection::vec(0i64..3600, 1..40)) {
        let runtime = tokio::runtime::Builder::new_current_thread().build().unwrap();
        let t0 = Utc.timestamp_opt(1_700_000_000, 0).unwrap();

        let times = runtime.block_on(async {
            let backend = MemoryBackend::new();
            let points = offsets
                .iter()
                .map(|s| {
                    MetricPoint::new(t0 + chrono::Duration::seconds(*s), "nas", "cpu", *s as f64)
                })
                .collect();
            backend.insert_batch(points).await.unwrap();

            backend
                .query_range(MetricQuery::new("nas", t0, t0 + chrono::Duration::hours(1)))
                .await
                .unwrap()
                .into_iter()
                .map(|p| p.time)
                .collect::<Vec<_>>()
        });

        prop_assert!(times.windows(2).all(|w| w[0] <= w[1]));
    }
}

// Property: any finite f64 survives a write and a range query unchanged
#[cfg(feature = "storage-sqlite")]
proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn prop_sqlite_numbers_round_trip_exactly(
        values in prop::collection::vec(
            prop::num::f64::POSITIVE
                | prop::num::f64::NEGATIVE
                | prop::num::f64::NORMAL
                | prop::num::f64::SUBNORMAL
                | prop::num::f64::ZERO,
            1..200,
        ),
    ) {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();
        let t0 = Utc.timestamp_opt(1_700_000_000, 0).unwrap();

        let read = runtime.block_on(async {
            let temp_dir = tempfile::tempdir().unwrap();
            let db_path = temp_dir.path().join("points.db");
            let backend = hearth::storage::sqlite::SqliteBackend::new(db_path).await.unwrap();
            let points = values
                .iter()
                .enumerate()
                .map(|(i, v)| {
                    MetricPoint::new(t0 + chrono::Duration::milliseconds(i as i64), "nas", "v", *v)
                })
                .collect();
            backend.insert_batch(points).await.unwrap();

            let stored = backend
                .query_range(MetricQuery::new("nas", t0, t0 + chrono::Duration::hours(1)))
                .await
                .unwrap();
            backend.close().await.unwrap();
            stored
        });

        prop_assert_eq!(read.len(), values.len());
        for (point, written) in read.iter().zip(&values) {
            let got = point.value.as_f64();
            prop_assert!(got.is_some(), "read back {:?}", point.value);
            prop_assert_eq!(got.map(f64::to_bits), Some(written.to_bits()));
        }
    }
}
