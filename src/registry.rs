//! Collector registry
//!
//! Pure data access over the backend's collector table. The scheduler reads
//! it on startup and on every refresh pass; workers re-read their own
//! registration before each run, so changes land on the next run.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use serde_json::Value;
use tracing::{info, instrument};

use crate::error::RegistryError;
use crate::health::HealthStatus;
use crate::storage::{CollectorRegistration, StorageBackend};

/// A registration joined with its current health row
#[derive(Debug, Clone, Serialize)]
pub struct CollectorStatus {
    #[serde(flatten)]
    pub registration: CollectorRegistration,
    pub health: HealthStatus,
}

#[derive(Clone)]
pub struct Registry {
    backend: Arc<dyn StorageBackend>,
}

impl Registry {
    pub fn new(backend: Arc<dyn StorageBackend>) -> Self {
        Self { backend }
    }

    pub async fn list_enabled(&self) -> Result<Vec<CollectorRegistration>, RegistryError> {
        Ok(self
            .backend
            .list_collectors()
            .await?
            .into_iter()
            .filter(|reg| reg.enabled)
            .collect())
    }

    pub async fn list_all(&self) -> Result<Vec<CollectorRegistration>, RegistryError> {
        Ok(self.backend.list_collectors().await?)
    }

    pub async fn get(&self, id: &str) -> Result<CollectorRegistration, RegistryError> {
        self.backend
            .get_collector(id)
            .await?
            .ok_or_else(|| RegistryError::NotFound(id.to_string()))
    }

    #[instrument(skip(self))]
    pub async fn set_enabled(&self, id: &str, enabled: bool) -> Result<(), RegistryError> {
        if !self.backend.set_collector_enabled(id, enabled).await? {
            return Err(RegistryError::NotFound(id.to_string()));
        }
        info!(enabled, "collector {} toggled", id);
        Ok(())
    }

    #[instrument(skip(self, config))]
    pub async fn update_config(&self, id: &str, config: Value) -> Result<(), RegistryError> {
        if !self.backend.update_collector_config(id, config).await? {
            return Err(RegistryError::NotFound(id.to_string()));
        }
        Ok(())
    }

    #[instrument(skip(self))]
    pub async fn update_interval(&self, id: &str, interval: Duration) -> Result<(), RegistryError> {
        if !self.backend.update_collector_interval(id, interval).await? {
            return Err(RegistryError::NotFound(id.to_string()));
        }
        Ok(())
    }

    /// Seed a registration; an existing one with the same id is left untouched
    ///
    /// Returns `true` if the registration was new.
    pub async fn register(
        &self,
        registration: CollectorRegistration,
    ) -> Result<bool, RegistryError> {
        Ok(self.backend.insert_collector(registration).await?)
    }

    /// Every registration with its health, `unknown` when it never ran
    pub async fn statuses(&self) -> Result<Vec<CollectorStatus>, RegistryError> {
        let registrations = self.backend.list_collectors().await?;
        let mut health: std::collections::HashMap<String, HealthStatus> = self
            .backend
            .list_health()
            .await?
            .into_iter()
            .map(|h| (h.collector_id.clone(), h))
            .collect();

        Ok(registrations
            .into_iter()
            .map(|registration| {
                let health = health
                    .remove(&registration.id)
                    .unwrap_or_else(|| HealthStatus::unknown(&registration.id));
                CollectorStatus {
                    registration,
                    health,
                }
            })
            .collect())
    }

    pub async fn status(&self, id: &str) -> Result<CollectorStatus, RegistryError> {
        let registration = self.get(id).await?;
        let health = self
            .backend
            .get_health(id)
            .await?
            .unwrap_or_else(|| HealthStatus::unknown(id));
        Ok(CollectorStatus {
            registration,
            health,
        })
    }
}
