//! Concurrency tests
//!
//! These tests verify that:
//! - A collector never has two runs in flight
//! - The global concurrency limit holds across collectors
//! - Shutdown cancels in-flight runs without recording them
//! - Slow stream clients lose their oldest messages without blocking anyone

use std::time::Duration;

use futures::future::join_all;
use hearth::{
    config::SchedulerConfig,
    hub::{BroadcastHub, HubEvent},
    storage::StorageBackend,
};
use pretty_assertions::assert_eq;
use serde_json::json;

use crate::helpers::{HOUR, TestBed, scheduler_config, scripted};

#[tokio::test(start_paused = true)]
async fn test_no_overlapping_runs_per_collector() {
    let bed = TestBed::new(vec![scripted(
        "nas",
        HOUR,
        json!({ "mode": "slow", "millis": 500 }),
    )])
    .await;
    let scheduler = bed.scheduler(&scheduler_config()).await;

    // initial scheduled run finishes at 500ms
    tokio::time::sleep(Duration::from_secs(1)).await;
    assert_eq!(bed.counters.runs(), 1);

    let results = join_all((0..5).map(|_| scheduler.run_now("nas"))).await;
    assert!(results.iter().all(|r| matches!(r, Ok(Some(_)))));

    assert_eq!(bed.counters.max_in_flight(), 1);
    // five requested runs plus the initial scheduled one
    assert_eq!(bed.counters.runs(), 6);
    assert_eq!(bed.backend.query_executions("nas", 100).await.unwrap().len(), 6);

    scheduler.shutdown().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_global_limit_across_collectors() {
    let registrations = (0..6)
        .map(|i| scripted(&format!("c{i}"), HOUR, json!({ "mode": "slow", "millis": 1000 })))
        .collect();
    let bed = TestBed::new(registrations).await;
    let config = SchedulerConfig {
        max_concurrency: 2,
        ..scheduler_config()
    };
    let scheduler = bed.scheduler(&config).await;

    let ids: Vec<String> = (0..6).map(|i| format!("c{i}")).collect();
    let results = join_all(ids.iter().map(|id| scheduler.run_now(id))).await;
    assert!(results.iter().all(|r| r.is_ok()));

    assert!(bed.counters.max_in_flight() <= 2);
    assert!(bed.counters.runs() >= 6);

    scheduler.shutdown().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_cancels_in_flight_run() {
    let bed = TestBed::new(vec![scripted(
        "nas",
        HOUR,
        json!({ "mode": "slow", "millis": 600_000 }),
    )])
    .await;
    let config = SchedulerConfig {
        default_timeout: Duration::from_secs(3600),
        ..scheduler_config()
    };
    let scheduler = bed.scheduler(&config).await;

    // let the first run start
    tokio::time::sleep(Duration::from_secs(1)).await;
    assert_eq!(bed.counters.runs(), 1);

    tokio::time::timeout(Duration::from_secs(5), scheduler.shutdown())
        .await
        .expect("shutdown waits for cancelled runs, not for the collector")
        .unwrap();

    assert!(bed.backend.query_executions("nas", 10).await.unwrap().is_empty());
    assert!(bed.backend.get_health("nas").await.unwrap().is_none());
}

#[tokio::test]
async fn test_slow_client_drops_oldest_without_blocking_others() {
    let hub = BroadcastHub::new(8);
    let slow = hub.connect();
    let fast = hub.connect();

    let publishers = (0..4).map(|p| {
        let hub = hub.clone();
        tokio::spawn(async move {
            for i in 0..250 {
                hub.publish(HubEvent::Heartbeat { clients: p * 1000 + i });
                tokio::task::yield_now().await;
            }
        })
    });

    let reader = tokio::spawn(async move {
        let mut seen = 0;
        let wait = Duration::from_millis(200);
        while let Ok(Some(_)) = tokio::time::timeout(wait, fast.recv()).await {
            seen += 1;
        }
        seen
    });

    for publisher in publishers {
        publisher.await.unwrap();
    }
    let fast_seen = reader.await.unwrap();
    assert!(fast_seen > 0);

    let mut slow_seen = 0;
    while slow.try_recv().is_some() {
        slow_seen += 1;
    }
    assert_eq!(slow_seen, 8);
    assert_eq!(slow.dropped(), 1000 - 8);
}

#[tokio::test]
async fn test_clients_come_and_go_during_publish() {
    let hub = BroadcastHub::new(16);

    let churn = {
        let hub = hub.clone();
        tokio::spawn(async move {
            for _ in 0..200 {
                let client = hub.connect();
                tokio::task::yield_now().await;
                drop(client);
            }
        })
    };
    let publisher = {
        let hub = hub.clone();
        tokio::spawn(async move {
            for i in 0..500 {
                hub.publish(HubEvent::Heartbeat { clients: i });
                tokio::task::yield_now().await;
            }
        })
    };

    churn.await.unwrap();
    publisher.await.unwrap();
    assert_eq!(hub.client_count(), 0);
}
