use std::collections::HashSet;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, bail};
use serde::Deserialize;
use tracing::trace;

use crate::alerts::AlertRule;
use crate::notify::ChannelConfig;
use crate::storage::CollectorRegistration;
use crate::util::duration_secs;

/// Storage backend configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "backend", rename_all = "lowercase")]
pub enum StorageConfig {
    /// In-memory storage (no persistence)
    #[serde(rename = "none")]
    None,

    /// SQLite database (default for most deployments)
    Sqlite {
        /// Path to the SQLite database file
        #[serde(default = "default_sqlite_path")]
        path: PathBuf,

        /// Metric points older than this are deleted
        #[serde(default = "default_retention_days")]
        retention_days: u32,

        /// Execution records older than this are deleted
        #[serde(default = "default_execution_retention_days")]
        execution_retention_days: u32,

        /// Keep at most this many execution records per collector
        #[serde(default)]
        max_executions_per_collector: Option<usize>,

        #[serde(default = "default_cleanup_interval_hours")]
        cleanup_interval_hours: u32,
    },
}

impl Default for StorageConfig {
    fn default() -> Self {
        StorageConfig::Sqlite {
            path: default_sqlite_path(),
            retention_days: default_retention_days(),
            execution_retention_days: default_execution_retention_days(),
            max_executions_per_collector: None,
            cleanup_interval_hours: default_cleanup_interval_hours(),
        }
    }
}

/// What the retention task deletes, and how often
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetentionPolicy {
    pub metrics: Duration,
    pub executions: Duration,
    pub max_executions_per_collector: Option<usize>,
    pub cleanup_interval: Duration,
}

const DAY: u64 = 24 * 60 * 60;

impl StorageConfig {
    /// `None` for the in-memory backend, which keeps everything
    pub fn retention(&self) -> Option<RetentionPolicy> {
        match self {
            StorageConfig::None => None,
            StorageConfig::Sqlite {
                retention_days,
                execution_retention_days,
                max_executions_per_collector,
                cleanup_interval_hours,
                ..
            } => Some(RetentionPolicy {
                metrics: Duration::from_secs(*retention_days as u64 * DAY),
                executions: Duration::from_secs(*execution_retention_days as u64 * DAY),
                max_executions_per_collector: *max_executions_per_collector,
                cleanup_interval: Duration::from_secs(*cleanup_interval_hours as u64 * 60 * 60),
            }),
        }
    }
}

fn default_sqlite_path() -> PathBuf {
    PathBuf::from("./hearth.db")
}

fn default_retention_days() -> u32 {
    30
}

fn default_execution_retention_days() -> u32 {
    7
}

fn default_cleanup_interval_hours() -> u32 {
    1
}

#[derive(Debug, Clone, Deserialize)]
pub struct SchedulerConfig {
    /// Deadline for collectors without their own timeout
    #[serde(
        rename = "default_timeout_secs",
        with = "duration_secs",
        default = "default_timeout"
    )]
    pub default_timeout: Duration,

    /// Runs allowed in flight at once across all collectors
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,

    /// Symmetric jitter applied to every interval, 0.0..=1.0
    #[serde(default = "default_jitter_ratio")]
    pub jitter_ratio: f64,

    /// How often the registry is re-read for added/removed collectors
    #[serde(
        rename = "refresh_interval_secs",
        with = "duration_secs",
        default = "default_refresh_interval"
    )]
    pub refresh_interval: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            default_timeout: default_timeout(),
            max_concurrency: default_max_concurrency(),
            jitter_ratio: default_jitter_ratio(),
            refresh_interval: default_refresh_interval(),
        }
    }
}

fn default_timeout() -> Duration {
    Duration::from_secs(30)
}

fn default_max_concurrency() -> usize {
    8
}

fn default_jitter_ratio() -> f64 {
    0.1
}

fn default_refresh_interval() -> Duration {
    Duration::from_secs(30)
}

#[derive(Debug, Clone, Deserialize)]
pub struct AlertsConfig {
    #[serde(
        rename = "evaluation_interval_secs",
        with = "duration_secs",
        default = "default_evaluation_interval"
    )]
    pub evaluation_interval: Duration,

    /// Cooldown for rules that do not set their own
    #[serde(
        rename = "default_cooldown_secs",
        with = "duration_secs",
        default = "default_cooldown"
    )]
    pub default_cooldown: Duration,

    /// Per-channel delivery deadline
    #[serde(
        rename = "notification_timeout_secs",
        with = "duration_secs",
        default = "default_notification_timeout"
    )]
    pub notification_timeout: Duration,
}

impl Default for AlertsConfig {
    fn default() -> Self {
        Self {
            evaluation_interval: default_evaluation_interval(),
            default_cooldown: default_cooldown(),
            notification_timeout: default_notification_timeout(),
        }
    }
}

fn default_evaluation_interval() -> Duration {
    Duration::from_secs(60)
}

fn default_cooldown() -> Duration {
    Duration::from_secs(15 * 60)
}

fn default_notification_timeout() -> Duration {
    Duration::from_secs(10)
}

/// Live stream settings
#[derive(Debug, Clone, Deserialize)]
pub struct StreamConfig {
    /// Pending messages kept per client before the oldest is dropped
    #[serde(default = "default_queue_size")]
    pub queue_size: usize,

    #[serde(
        rename = "heartbeat_interval_secs",
        with = "duration_secs",
        default = "default_heartbeat_interval"
    )]
    pub heartbeat_interval: Duration,

    /// TTL of the latest-value and summary cache
    #[serde(
        rename = "cache_ttl_secs",
        with = "duration_secs",
        default = "default_cache_ttl"
    )]
    pub cache_ttl: Duration,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            queue_size: default_queue_size(),
            heartbeat_interval: default_heartbeat_interval(),
            cache_ttl: default_cache_ttl(),
        }
    }
}

fn default_queue_size() -> usize {
    crate::hub::DEFAULT_QUEUE_SIZE
}

fn default_heartbeat_interval() -> Duration {
    Duration::from_secs(30)
}

fn default_cache_ttl() -> Duration {
    crate::storage::DEFAULT_CACHE_TTL
}

/// HTTP query surface
#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
    #[serde(default = "default_api_enabled")]
    pub enabled: bool,

    /// Bind address (e.g., "0.0.0.0:8080")
    #[serde(default = "default_bind_addr")]
    pub bind_addr: SocketAddr,

    /// Optional bearer token required on every request
    #[serde(default)]
    pub auth_token: Option<String>,

    /// Enable CORS for dashboards served from elsewhere
    #[serde(default = "default_api_enabled")]
    pub enable_cors: bool,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            enabled: default_api_enabled(),
            bind_addr: default_bind_addr(),
            auth_token: None,
            enable_cors: true,
        }
    }
}

fn default_api_enabled() -> bool {
    true
}

fn default_bind_addr() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 8080))
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub scheduler: SchedulerConfig,

    #[serde(default)]
    pub alerts: AlertsConfig,

    #[serde(default)]
    pub storage: StorageConfig,

    #[serde(default)]
    pub hub: StreamConfig,

    #[serde(default)]
    pub api: ApiConfig,

    /// Registrations seeded into the registry on startup; existing ids are
    /// left as they are
    #[serde(default)]
    pub collectors: Vec<CollectorRegistration>,

    /// Rules upserted on startup
    #[serde(default)]
    pub rules: Vec<AlertRule>,

    #[serde(default)]
    pub channels: Vec<ChannelConfig>,
}

impl Config {
    /// Cross-field checks serde cannot express
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.scheduler.max_concurrency == 0 {
            bail!("scheduler.max_concurrency must be at least 1");
        }
        if !(0.0..=1.0).contains(&self.scheduler.jitter_ratio) {
            bail!("scheduler.jitter_ratio must be between 0.0 and 1.0");
        }

        // these drive tokio intervals, which reject a zero period
        let periods = [
            ("scheduler.refresh_interval_secs", self.scheduler.refresh_interval),
            ("alerts.evaluation_interval_secs", self.alerts.evaluation_interval),
            ("hub.heartbeat_interval_secs", self.hub.heartbeat_interval),
        ];
        for (name, period) in periods {
            if period.is_zero() {
                bail!("{name} must be at least 1");
            }
        }
        if let Some(retention) = self.storage.retention()
            && retention.cleanup_interval.is_zero()
        {
            bail!("storage.cleanup_interval_hours must be at least 1");
        }

        let mut seen = HashSet::new();
        for collector in &self.collectors {
            if collector.interval.is_zero() {
                bail!("collector '{}' has a zero interval", collector.id);
            }
            if !seen.insert(collector.id.as_str()) {
                bail!("duplicate collector id '{}'", collector.id);
            }
        }

        let channel_ids: HashSet<&str> = self.channels.iter().map(ChannelConfig::id).collect();
        for rule in &self.rules {
            rule.validate()
                .map_err(|e| anyhow::anyhow!("invalid rule '{}': {}", rule.id, e))?;
            let unknown = rule.channels.iter().find(|c| !channel_ids.contains(c.as_str()));
            if let Some(missing) = unknown {
                // delivery records it as a failed attempt; still worth a warning
                tracing::warn!("rule '{}' references unknown channel '{}'", rule.id, missing);
            }
        }
        Ok(())
    }
}

pub fn read_config_file(path: &str) -> anyhow::Result<Config> {
    let file_content = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read config file {path}"))?;
    let config: Config = serde_json::from_str(&file_content)
        .with_context(|| format!("invalid configuration file {path}"))?;
    config.validate()?;
    trace!("loaded config: {config:?}");
    Ok(config)
}
