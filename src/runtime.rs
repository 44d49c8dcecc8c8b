//! Wiring of a running hub
//!
//! [`HubRuntime::start`] opens the configured backend, seeds the registry and
//! rules from the config file, and spawns every actor. [`HubRuntime::shutdown`]
//! stops them again, collectors first so no run publishes into a closed hub.

use std::sync::Arc;

use anyhow::{Context, Result, bail};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, warn};

use crate::actors::{AlertDeps, AlertHandle, SchedulerDeps, SchedulerHandle, StorageHandle};
use crate::collector::CollectorCatalog;
use crate::config::{Config, StorageConfig};
use crate::hub::BroadcastHub;
use crate::notify::Dispatcher;
use crate::registry::Registry;
use crate::storage::{MemoryBackend, MetricStore, StorageBackend};
use crate::util::{Clock, SystemClock};

pub struct HubRuntime {
    pub registry: Registry,
    pub store: Arc<MetricStore>,
    pub hub: BroadcastHub,
    pub scheduler: SchedulerHandle,
    pub alerts: AlertHandle,
    pub storage: StorageHandle,

    /// Where the HTTP API listens, when enabled
    pub api_addr: Option<std::net::SocketAddr>,

    shutdown_tx: watch::Sender<bool>,
    heartbeat: JoinHandle<()>,
}

/// Open the backend named by the config
pub async fn open_backend(config: &StorageConfig) -> Result<Arc<dyn StorageBackend>> {
    match config {
        StorageConfig::None => {
            info!("using in-memory storage, nothing is persisted");
            Ok(Arc::new(MemoryBackend::new()))
        }

        #[cfg(feature = "storage-sqlite")]
        StorageConfig::Sqlite { path, .. } => {
            info!("using sqlite storage at {}", path.display());
            let backend = crate::storage::sqlite::SqliteBackend::new(path)
                .await
                .with_context(|| format!("failed to open database {}", path.display()))?;
            Ok(Arc::new(backend))
        }

        #[cfg(not(feature = "storage-sqlite"))]
        StorageConfig::Sqlite { .. } => {
            bail!("sqlite storage requested but the 'storage-sqlite' feature is disabled")
        }
    }
}

impl HubRuntime {
    /// Start a hub with the built-in collectors, the configured backend and
    /// the system clock
    pub async fn start(config: Config) -> Result<Self> {
        let backend = open_backend(&config.storage).await?;
        Self::start_with(
            config,
            backend,
            CollectorCatalog::with_builtins(),
            Arc::new(SystemClock),
        )
        .await
    }

    #[instrument(skip_all)]
    pub async fn start_with(
        config: Config,
        backend: Arc<dyn StorageBackend>,
        catalog: CollectorCatalog,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        config.validate()?;

        let registry = Registry::new(backend.clone());
        for registration in &config.collectors {
            if !catalog.contains(&registration.kind) {
                bail!(
                    "collector '{}' has unknown kind '{}' (known: {})",
                    registration.id,
                    registration.kind,
                    catalog.kinds().join(", ")
                );
            }
            let added = registry
                .register(registration.clone())
                .await
                .with_context(|| format!("failed to register collector '{}'", registration.id))?;
            if added {
                debug!(collector_id = %registration.id, "registered collector from config");
            }
        }

        for rule in &config.rules {
            if let Err(e) = rule.validate() {
                bail!("invalid rule '{}': {}", rule.id, e);
            }
            backend
                .upsert_rule(rule.clone())
                .await
                .with_context(|| format!("failed to store rule '{}'", rule.id))?;
        }

        let store = Arc::new(MetricStore::new(backend.clone(), config.hub.cache_ttl));
        let hub = BroadcastHub::new(config.hub.queue_size);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let heartbeat = hub.spawn_heartbeat(config.hub.heartbeat_interval, shutdown_rx);

        let mut dispatcher = Dispatcher::new(backend.clone(), config.alerts.notification_timeout);
        for channel in &config.channels {
            dispatcher.add_channel(channel.build());
        }
        debug!("notification channels: {:?}", dispatcher.channel_ids());

        let storage =
            StorageHandle::spawn(backend.clone(), config.storage.retention(), clock.clone());

        let scheduler = SchedulerHandle::spawn(
            SchedulerDeps {
                registry: registry.clone(),
                catalog: Arc::new(catalog),
                store: store.clone(),
                hub: hub.clone(),
                clock: clock.clone(),
            },
            &config.scheduler,
        )
        .await?;

        let alerts = AlertHandle::spawn(
            AlertDeps {
                registry: registry.clone(),
                store: store.clone(),
                dispatcher: Arc::new(dispatcher),
                hub: hub.clone(),
                clock,
            },
            &config.alerts,
        );

        #[cfg(feature = "api")]
        let api_addr = if config.api.enabled {
            let state = crate::api::ApiState {
                registry: registry.clone(),
                store: store.clone(),
                hub: hub.clone(),
                scheduler: scheduler.clone(),
                alerts: alerts.clone(),
                storage: storage.clone(),
            };
            Some(crate::api::spawn_api_server(&config.api, state).await?)
        } else {
            None
        };

        #[cfg(not(feature = "api"))]
        let api_addr = {
            if config.api.enabled {
                warn!("api requested but the 'api' feature is disabled");
            }
            None
        };

        info!(
            "hub started with {} collectors, {} rules",
            config.collectors.len(),
            config.rules.len()
        );

        Ok(Self {
            registry,
            store,
            hub,
            scheduler,
            alerts,
            storage,
            api_addr,
            shutdown_tx,
            heartbeat,
        })
    }

    /// Stop scheduling, wait for in-flight runs, then stop the rest
    pub async fn shutdown(self) -> Result<()> {
        info!("shutting down hub");

        if let Err(e) = self.scheduler.shutdown().await {
            warn!("scheduler did not shut down cleanly: {:#}", e);
        }
        self.alerts.shutdown().await;

        let _ = self.shutdown_tx.send(true);
        if let Err(e) = self.heartbeat.await {
            warn!("heartbeat task failed: {}", e);
        }
        self.hub.close_all();

        self.storage.shutdown().await;

        debug!("hub stopped");
        Ok(())
    }
}
