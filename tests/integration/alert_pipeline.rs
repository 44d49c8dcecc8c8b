//! Integration tests for rule evaluation, the alert lifecycle and notifications
//!
//! These tests verify that:
//! - Threshold and group rules trigger and resolve on real metric sequences
//! - Cooldown suppresses re-triggering but never blocks resolution
//! - Sweeps without new data are idempotent
//! - Transitions reach the stream and the notification log

use std::sync::Arc;
use std::time::Duration;

use chrono::Duration as ChronoDuration;
use hearth::{
    alerts::{AlertFilter, AlertRule, AlertStatus, ComparisonOp, Condition, Transition},
    hub::HubEvent,
    notify::Dispatcher,
    storage::StorageBackend,
    util::Clock,
};
use pretty_assertions::assert_eq;

use crate::helpers::{RecordingChannel, TestBed, manual_clock, ok};

fn cpu_rule() -> AlertRule {
    AlertRule::threshold("cpu-high", "host", "cpu_percent", ComparisonOp::Gt, 80.0)
        .channels(["ops"])
}

async fn bed_with_channel() -> (TestBed, RecordingChannel, Dispatcher) {
    let bed = TestBed::new(vec![ok("nas", Duration::from_secs(60))]).await;
    let channel = RecordingChannel::new("ops");
    let dispatcher = Dispatcher::new(bed.backend.clone(), Duration::from_secs(1))
        .with_channel(Arc::new(channel.clone()));
    (bed, channel, dispatcher)
}

#[tokio::test]
async fn test_threshold_sequence_triggers_once_and_resolves() {
    let (bed, channel, dispatcher) = bed_with_channel().await;
    bed.rule(cpu_rule()).await;
    let clock = manual_clock();
    let alerts = bed.alerts(clock.clone(), dispatcher);

    let mut transitions = Vec::new();
    for value in [60.0, 85.0, 85.0, 70.0] {
        bed.report(&clock, "nas", &[("cpu_percent", value)]).await;
        let report = alerts.evaluate_now().await.unwrap();
        transitions.push((report.triggered, report.resolved));
        clock.advance(ChronoDuration::minutes(1));
    }

    assert_eq!(transitions, vec![(0, 0), (1, 0), (0, 0), (0, 1)]);

    let all = bed.backend.list_alerts(AlertFilter::default()).await.unwrap();
    assert_eq!(all.len(), 1);
    assert_eq!(all[0].status, AlertStatus::Resolved);
    assert_eq!(all[0].last_value.as_ref().and_then(|v| v.as_f64()), Some(70.0));

    let titles = channel.titles();
    assert_eq!(titles.len(), 2);
    assert!(titles[0].starts_with("🔥"));
    assert!(titles[1].starts_with("✅"));

    let log = bed.backend.list_notifications(Some(all[0].id)).await.unwrap();
    assert_eq!(log.len(), 2);
    assert!(log.iter().all(|entry| entry.success));
    assert_eq!(log[0].transition, Transition::Triggered);
    assert_eq!(log[1].transition, Transition::Resolved);
}

#[tokio::test]
async fn test_and_group_needs_both_conditions() {
    let (bed, channel, dispatcher) = bed_with_channel().await;
    bed.rule(
        AlertRule::with_condition(
            "overloaded",
            "host",
            Condition::all(vec![
                Condition::leaf("cpu_percent", ComparisonOp::Gt, 80.0),
                Condition::leaf("memory_percent", ComparisonOp::Gt, 90.0),
            ]),
        )
        .channels(["ops"]),
    )
    .await;
    let clock = manual_clock();
    let alerts = bed.alerts(clock.clone(), dispatcher);

    bed.report(&clock, "nas", &[("cpu_percent", 95.0), ("memory_percent", 50.0)])
        .await;
    assert_eq!(alerts.evaluate_now().await.unwrap().triggered, 0);

    clock.advance(ChronoDuration::minutes(1));
    bed.report(&clock, "nas", &[("cpu_percent", 95.0), ("memory_percent", 95.0)])
        .await;
    assert_eq!(alerts.evaluate_now().await.unwrap().triggered, 1);

    clock.advance(ChronoDuration::minutes(1));
    bed.report(&clock, "nas", &[("cpu_percent", 50.0), ("memory_percent", 95.0)])
        .await;
    assert_eq!(alerts.evaluate_now().await.unwrap().resolved, 1);

    assert_eq!(channel.count(), 2);
}

#[tokio::test]
async fn test_cooldown_suppresses_retrigger_but_not_resolution() {
    let (bed, _channel, dispatcher) = bed_with_channel().await;
    bed.rule(cpu_rule().cooldown(Duration::from_secs(15 * 60))).await;
    let clock = manual_clock();
    let t0 = clock.now();
    let alerts = bed.alerts(clock.clone(), dispatcher);

    bed.report(&clock, "nas", &[("cpu_percent", 90.0)]).await;
    assert_eq!(alerts.evaluate_now().await.unwrap().triggered, 1);

    // resolution inside the cooldown window goes through
    clock.set(t0 + ChronoDuration::minutes(2));
    bed.report(&clock, "nas", &[("cpu_percent", 50.0)]).await;
    assert_eq!(alerts.evaluate_now().await.unwrap().resolved, 1);

    clock.set(t0 + ChronoDuration::minutes(10));
    bed.report(&clock, "nas", &[("cpu_percent", 90.0)]).await;
    assert_eq!(alerts.evaluate_now().await.unwrap().triggered, 0);
    assert!(
        bed.backend
            .list_alerts(AlertFilter::open())
            .await
            .unwrap()
            .is_empty()
    );

    clock.set(t0 + ChronoDuration::minutes(16));
    bed.report(&clock, "nas", &[("cpu_percent", 91.0)]).await;
    assert_eq!(alerts.evaluate_now().await.unwrap().triggered, 1);

    let all = bed.backend.list_alerts(AlertFilter::default()).await.unwrap();
    assert_eq!(all.len(), 2);
    assert_eq!(
        all.iter().filter(|a| a.status.is_open()).count(),
        1,
        "at most one open instance per rule and resource"
    );
}

#[tokio::test]
async fn test_sweep_without_new_data_is_idempotent() {
    let (bed, channel, dispatcher) = bed_with_channel().await;
    bed.rule(cpu_rule()).await;
    let clock = manual_clock();
    let alerts = bed.alerts(clock.clone(), dispatcher);

    bed.report(&clock, "nas", &[("cpu_percent", 99.0)]).await;
    alerts.evaluate_now().await.unwrap();

    for _ in 0..5 {
        clock.advance(ChronoDuration::minutes(1));
        let report = alerts.evaluate_now().await.unwrap();
        assert_eq!(report.evaluated, 0);
        assert_eq!(report.triggered, 0);
    }

    assert_eq!(bed.backend.list_alerts(AlertFilter::default()).await.unwrap().len(), 1);
    assert_eq!(channel.count(), 1);
    assert_eq!(bed.backend.list_notifications(None).await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_operator_actions_and_stream() {
    let (bed, channel, dispatcher) = bed_with_channel().await;
    bed.rule(cpu_rule()).await;
    let clock = manual_clock();
    let client = bed.hub.connect();
    let alerts = bed.alerts(clock.clone(), dispatcher);

    bed.report(&clock, "nas", &[("cpu_percent", 99.0)]).await;
    alerts.evaluate_now().await.unwrap();
    let id = bed.backend.list_alerts(AlertFilter::open()).await.unwrap()[0].id;

    alerts.acknowledge(id, Some("alice".to_string())).await.unwrap();
    let resolved = alerts.resolve(id, Some("alice".to_string())).await.unwrap();
    assert_eq!(resolved.resolved_by.as_deref(), Some("alice"));

    let kinds: Vec<Transition> = std::iter::from_fn(|| client.try_recv())
        .filter_map(|message| match message.event {
            HubEvent::AlertUpdate { transition, .. } => Some(transition),
            _ => None,
        })
        .collect();
    assert_eq!(
        kinds,
        vec![Transition::Triggered, Transition::Acknowledged, Transition::Resolved]
    );

    // acknowledge is not delivered; the manual resolve is
    assert_eq!(channel.count(), 2);
}

#[tokio::test]
async fn test_snoozed_alert_is_not_notified_on_resolve() {
    let (bed, channel, dispatcher) = bed_with_channel().await;
    bed.rule(cpu_rule()).await;
    let clock = manual_clock();
    let alerts = bed.alerts(clock.clone(), dispatcher);

    bed.report(&clock, "nas", &[("cpu_percent", 99.0)]).await;
    alerts.evaluate_now().await.unwrap();
    let id = bed.backend.list_alerts(AlertFilter::open()).await.unwrap()[0].id;

    alerts
        .snooze(id, clock.now() + ChronoDuration::hours(1))
        .await
        .unwrap();

    clock.advance(ChronoDuration::minutes(5));
    bed.report(&clock, "nas", &[("cpu_percent", 10.0)]).await;
    assert_eq!(alerts.evaluate_now().await.unwrap().resolved, 1);

    assert_eq!(channel.count(), 1);
}

#[tokio::test]
async fn test_rule_scoped_to_one_resource() {
    let minute = Duration::from_secs(60);
    let bed = TestBed::new(vec![ok("nas", minute), ok("pi", minute)]).await;
    bed.rule(cpu_rule().for_resource("pi")).await;
    let clock = manual_clock();
    let alerts = bed.alerts(
        clock.clone(),
        Dispatcher::new(bed.backend.clone(), Duration::from_secs(1)),
    );

    bed.report(&clock, "nas", &[("cpu_percent", 99.0)]).await;
    bed.report(&clock, "pi", &[("cpu_percent", 99.0)]).await;
    alerts.evaluate_now().await.unwrap();

    let open = bed.backend.list_alerts(AlertFilter::open()).await.unwrap();
    assert_eq!(open.len(), 1);
    assert_eq!(open[0].resource_id, "pi");
}
