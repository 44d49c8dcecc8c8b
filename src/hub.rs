//! Live-update fan-out
//!
//! Producers (collector workers, the alert actor, the heartbeat task) call
//! [`BroadcastHub::publish`]; every connected client gets its own bounded
//! queue. A slow client only ever loses its own oldest messages.
//!
//! Wire format of an event:
//!
//! ```json
//! {"type": "metrics_update", "collector_id": "nas", "points": [...], "timestamp": "..."}
//! ```

use std::collections::{BTreeSet, HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::{Notify, watch};
use tokio::task::JoinHandle;
use tracing::{debug, trace};

use crate::MetricPoint;
use crate::alerts::{AlertInstance, AlertTransition, Transition};
use crate::storage::ExecutionRecord;

pub const DEFAULT_QUEUE_SIZE: usize = 256;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum HubEvent {
    MetricsUpdate {
        collector_id: String,
        points: Vec<MetricPoint>,
    },
    ExecutionComplete {
        record: ExecutionRecord,
    },
    AlertUpdate {
        transition: Transition,
        alert: AlertInstance,
    },
    Heartbeat {
        clients: usize,
    },
}

impl HubEvent {
    pub fn alert(transition: &AlertTransition) -> Self {
        HubEvent::AlertUpdate {
            transition: transition.transition,
            alert: transition.alert.clone(),
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            HubEvent::MetricsUpdate { .. } => "metrics_update",
            HubEvent::ExecutionComplete { .. } => "execution_complete",
            HubEvent::AlertUpdate { .. } => "alert_update",
            HubEvent::Heartbeat { .. } => "heartbeat",
        }
    }

    fn collector_id(&self) -> Option<&str> {
        match self {
            HubEvent::MetricsUpdate { collector_id, .. } => Some(collector_id),
            HubEvent::ExecutionComplete { record } => Some(&record.collector_id),
            HubEvent::AlertUpdate { alert, .. } => Some(&alert.resource_id),
            HubEvent::Heartbeat { .. } => None,
        }
    }
}

/// An event as delivered to clients
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HubMessage {
    #[serde(flatten)]
    pub event: HubEvent,
    pub timestamp: DateTime<Utc>,
}

impl HubMessage {
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

/// Narrows what a client receives; `None` means everything
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SubscriptionFilter {
    pub collector_ids: Option<BTreeSet<String>>,
    pub metric_names: Option<BTreeSet<String>>,
}

impl SubscriptionFilter {
    pub fn collectors<I, S>(ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            collector_ids: Some(ids.into_iter().map(Into::into).collect()),
            metric_names: None,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.collector_ids.is_none() && self.metric_names.is_none()
    }

    /// The message this filter lets through, if any
    ///
    /// Metric updates are trimmed to the subscribed metric names and dropped
    /// when nothing is left. Heartbeats always pass.
    pub fn apply(&self, message: &HubMessage) -> Option<HubMessage> {
        if let (Some(ids), Some(collector_id)) = (&self.collector_ids, message.event.collector_id())
            && !ids.contains(collector_id)
        {
            return None;
        }

        match (&message.event, &self.metric_names) {
            (HubEvent::MetricsUpdate { collector_id, points }, Some(names)) => {
                let points: Vec<MetricPoint> = points
                    .iter()
                    .filter(|p| names.contains(&p.metric_name))
                    .cloned()
                    .collect();
                if points.is_empty() {
                    return None;
                }
                Some(HubMessage {
                    event: HubEvent::MetricsUpdate {
                        collector_id: collector_id.clone(),
                        points,
                    },
                    timestamp: message.timestamp,
                })
            }
            _ => Some(message.clone()),
        }
    }
}

/// Inbound client actions
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "action", rename_all = "lowercase")]
pub enum ClientMessage {
    Subscribe {
        #[serde(default)]
        collector_ids: Option<Vec<String>>,
        #[serde(default)]
        metric_names: Option<Vec<String>>,
    },
    Unsubscribe,
}

impl ClientMessage {
    pub fn into_filter(self) -> SubscriptionFilter {
        match self {
            ClientMessage::Subscribe {
                collector_ids,
                metric_names,
            } => SubscriptionFilter {
                collector_ids: collector_ids.map(|ids| ids.into_iter().collect()),
                metric_names: metric_names.map(|names| names.into_iter().collect()),
            },
            ClientMessage::Unsubscribe => SubscriptionFilter::default(),
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    // a panicking holder cannot leave these structures half-updated
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

struct ClientQueue {
    pending: Mutex<VecDeque<HubMessage>>,
    filter: Mutex<SubscriptionFilter>,
    notify: Notify,
    closed: AtomicBool,
    dropped: AtomicU64,
    capacity: usize,
}

impl ClientQueue {
    fn new(capacity: usize) -> Self {
        Self {
            pending: Mutex::new(VecDeque::with_capacity(capacity)),
            filter: Mutex::new(SubscriptionFilter::default()),
            notify: Notify::new(),
            closed: AtomicBool::new(false),
            dropped: AtomicU64::new(0),
            capacity,
        }
    }

    fn offer(&self, message: &HubMessage) {
        let Some(message) = lock(&self.filter).apply(message) else {
            return;
        };

        {
            let mut pending = lock(&self.pending);
            while pending.len() >= self.capacity {
                pending.pop_front();
                self.dropped.fetch_add(1, Ordering::Relaxed);
            }
            pending.push_back(message);
        }
        self.notify.notify_one();
    }

    fn close(&self) {
        self.closed.store(true, Ordering::Release);
        self.notify.notify_one();
    }
}

struct HubInner {
    clients: Mutex<HashMap<u64, Arc<ClientQueue>>>,
    next_id: AtomicU64,
    queue_size: usize,
}

/// Cloneable handle to the client registry
#[derive(Clone)]
pub struct BroadcastHub {
    inner: Arc<HubInner>,
}

impl Default for BroadcastHub {
    fn default() -> Self {
        Self::new(DEFAULT_QUEUE_SIZE)
    }
}

impl BroadcastHub {
    pub fn new(queue_size: usize) -> Self {
        Self {
            inner: Arc::new(HubInner {
                clients: Mutex::new(HashMap::new()),
                next_id: AtomicU64::new(1),
                queue_size: queue_size.max(1),
            }),
        }
    }

    pub fn connect(&self) -> ClientConnection {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let queue = Arc::new(ClientQueue::new(self.inner.queue_size));
        lock(&self.inner.clients).insert(id, queue.clone());
        debug!(client_id = id, "hub client connected");

        ClientConnection {
            id,
            queue,
            hub: self.clone(),
        }
    }

    pub fn client_count(&self) -> usize {
        lock(&self.inner.clients).len()
    }

    pub fn publish(&self, event: HubEvent) {
        let message = HubMessage {
            event,
            timestamp: Utc::now(),
        };

        // producers never hold the registry lock while filtering and queueing
        let clients: Vec<Arc<ClientQueue>> = lock(&self.inner.clients).values().cloned().collect();
        trace!(kind = message.event.kind(), clients = clients.len(), "publishing hub event");

        for client in clients {
            client.offer(&message);
        }
    }

    pub fn heartbeat(&self) {
        let clients = self.client_count();
        self.publish(HubEvent::Heartbeat { clients });
    }

    /// Publish a heartbeat every `interval` until shutdown is signalled
    pub fn spawn_heartbeat(
        &self,
        interval: Duration,
        mut shutdown: watch::Receiver<bool>,
    ) -> JoinHandle<()> {
        let hub = self.clone();
        tokio::spawn(async move {
            let start = tokio::time::Instant::now() + interval;
            let mut ticker = tokio::time::interval_at(start, interval);
            loop {
                tokio::select! {
                    _ = ticker.tick() => hub.heartbeat(),
                    _ = shutdown.changed() => break,
                }
            }
            debug!("heartbeat stopped");
        })
    }

    /// Disconnect every client; their `recv` drains and then returns `None`
    pub fn close_all(&self) {
        let clients: Vec<Arc<ClientQueue>> =
            lock(&self.inner.clients).drain().map(|(_, c)| c).collect();
        for client in clients {
            client.close();
        }
    }

    fn disconnect(&self, id: u64) {
        if lock(&self.inner.clients).remove(&id).is_some() {
            debug!(client_id = id, "hub client disconnected");
        }
    }
}

/// One subscriber; dropping it unregisters the client
pub struct ClientConnection {
    id: u64,
    queue: Arc<ClientQueue>,
    hub: BroadcastHub,
}

impl ClientConnection {
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Next message, or `None` once the hub closed this client
    pub async fn recv(&self) -> Option<HubMessage> {
        loop {
            if let Some(message) = self.try_recv() {
                return Some(message);
            }
            if self.queue.closed.load(Ordering::Acquire) {
                return None;
            }
            self.queue.notify.notified().await;
        }
    }

    pub fn try_recv(&self) -> Option<HubMessage> {
        lock(&self.queue.pending).pop_front()
    }

    pub fn set_filter(&self, filter: SubscriptionFilter) {
        *lock(&self.queue.filter) = filter;
    }

    pub fn filter(&self) -> SubscriptionFilter {
        lock(&self.queue.filter).clone()
    }

    pub fn handle(&self, message: ClientMessage) {
        self.set_filter(message.into_filter());
    }

    /// Messages lost to queue overflow so far
    pub fn dropped(&self) -> u64 {
        self.queue.dropped.load(Ordering::Relaxed)
    }
}

impl Drop for ClientConnection {
    fn drop(&mut self) {
        self.hub.disconnect(self.id);
    }
}
