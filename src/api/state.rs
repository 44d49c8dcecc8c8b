//! API shared state containing actor handles

use std::sync::Arc;

use crate::actors::{AlertHandle, SchedulerHandle, StorageHandle};
use crate::hub::BroadcastHub;
use crate::registry::Registry;
use crate::storage::{MetricStore, StorageBackend};

/// Shared state passed to all API handlers
#[derive(Clone)]
pub struct ApiState {
    /// Collector registrations and health
    pub registry: Registry,

    /// Metric queries, cached latest values and summaries
    pub store: Arc<MetricStore>,

    /// Live event fan-out for WebSocket clients
    pub hub: BroadcastHub,

    /// Run-now, probe and refresh after registry changes
    pub scheduler: SchedulerHandle,

    /// Operator actions on alerts and rules
    pub alerts: AlertHandle,

    /// Retention and statistics
    pub storage: StorageHandle,
}

impl ApiState {
    pub fn backend(&self) -> &Arc<dyn StorageBackend> {
        self.store.backend()
    }
}
