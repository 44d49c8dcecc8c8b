//! Local host resources via `sysinfo`
//!
//! Config (all optional):
//!
//! ```json
//! { "per_cpu": false, "temperatures": true }
//! ```

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use sysinfo::{Components, System};
use tracing::{instrument, trace};

use super::{CollectContext, Collector, CollectorMetadata, MetricSet};
use crate::Tags;
use crate::error::CollectionError;

pub const KIND: &str = "system";

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SystemConfig {
    /// Emit `cpu_core_percent` per logical CPU
    pub per_cpu: bool,

    /// Emit component temperatures
    pub temperatures: bool,
}

impl Default for SystemConfig {
    fn default() -> Self {
        Self {
            per_cpu: false,
            temperatures: true,
        }
    }
}

pub struct SystemCollector {
    config: SystemConfig,
    /// Kept across runs so CPU usage is measured against the previous refresh
    sys: Arc<Mutex<System>>,
}

impl SystemCollector {
    pub fn new(config: SystemConfig) -> Self {
        Self {
            config,
            sys: Arc::new(Mutex::new(System::new())),
        }
    }

    pub fn from_config(config: &Value) -> Result<Self, CollectionError> {
        let config = if config.is_null() {
            SystemConfig::default()
        } else {
            serde_json::from_value(config.clone())
                .map_err(|e| CollectionError::Build(format!("invalid system config: {}", e)))?
        };
        Ok(Self::new(config))
    }
}

fn snapshot(sys: &mut System, config: &SystemConfig) -> MetricSet {
    sys.refresh_cpu_usage();
    std::thread::sleep(sysinfo::MINIMUM_CPU_UPDATE_INTERVAL);
    sys.refresh_cpu_usage();
    sys.refresh_memory();

    let mut set = MetricSet::new();

    let cpu_usage = sys.global_cpu_usage();
    if cpu_usage.is_finite() {
        set.push("cpu_percent", cpu_usage);
    }
    if config.per_cpu {
        for cpu in sys.cpus().iter().filter(|cpu| cpu.cpu_usage().is_finite()) {
            let tags = Tags::from([("cpu".to_string(), cpu.name().to_string())]);
            set.push_tagged(format!("cpu_core_percent.{}", cpu.name()), cpu.cpu_usage(), tags);
        }
    }

    let total = sys.total_memory();
    let used = sys.used_memory();
    set.push("memory_total_bytes", total);
    set.push("memory_used_bytes", used);
    if total > 0 {
        set.push("memory_percent", used as f64 / total as f64 * 100.0);
    }

    let total_swap = sys.total_swap();
    if total_swap > 0 {
        set.push("swap_percent", sys.used_swap() as f64 / total_swap as f64 * 100.0);
    }

    let load = System::load_average();
    set.push("load_1", load.one);
    set.push("load_5", load.five);
    set.push("load_15", load.fifteen);

    if config.temperatures {
        let components = Components::new_with_refreshed_list();
        let temps: Vec<f32> = components
            .iter()
            .filter_map(|component| component.temperature())
            .filter(|t| t.is_finite())
            .collect();
        if !temps.is_empty() {
            set.push(
                "temperature_avg",
                temps.iter().sum::<f32>() / temps.len() as f32,
            );
            set.push(
                "temperature_max",
                temps.iter().copied().fold(f32::MIN, f32::max),
            );
        }
    }

    set
}

#[async_trait]
impl Collector for SystemCollector {
    fn describe(&self) -> CollectorMetadata {
        CollectorMetadata {
            kind: KIND.to_string(),
            description: "CPU, memory, swap, load and temperatures of the local host".to_string(),
            metrics: [
                "cpu_percent",
                "memory_percent",
                "memory_used_bytes",
                "memory_total_bytes",
                "swap_percent",
                "load_1",
                "load_5",
                "load_15",
                "temperature_avg",
                "temperature_max",
            ]
            .iter()
            .map(|m| m.to_string())
            .collect(),
        }
    }

    #[instrument(skip_all, fields(collector_id = %ctx.collector_id))]
    async fn collect(&self, ctx: &CollectContext) -> Result<MetricSet, CollectionError> {
        let sys = self.sys.clone();
        let config = self.config.clone();

        let set = tokio::task::spawn_blocking(move || {
            let mut sys = sys
                .lock()
                .map_err(|_| CollectionError::failed("system probe state poisoned"))?;
            Ok::<_, CollectionError>(snapshot(&mut sys, &config))
        })
        .await
        .map_err(|e| CollectionError::Panicked(e.to_string()))??;

        trace!("collected {} system metrics", set.len());
        Ok(set)
    }
}
