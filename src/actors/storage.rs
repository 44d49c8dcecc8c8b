//! StorageActor - retention and maintenance of the storage backend
//!
//! Writes go straight through [`crate::storage::MetricStore`], each collector
//! run as one transaction. This actor owns the periodic work on top of that:
//!
//! - retention cleanup once on startup and then every `cleanup_interval`
//! - trimming the execution log to a per-collector cap, when configured
//! - backend statistics on request
//!
//! A failed cleanup is logged and retried on the next tick; it never stops
//! the actor.

use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::sync::{mpsc, oneshot};
use tokio::time::{self, Instant};
use tracing::{debug, error, info, instrument, trace, warn};

use super::messages::{CleanupReport, StorageCommand};
use crate::config::RetentionPolicy;
use crate::storage::{BackendStats, StorageBackend};
use crate::util::Clock;

pub struct StorageActor {
    backend: Arc<dyn StorageBackend>,
    retention: Option<RetentionPolicy>,
    clock: Arc<dyn Clock>,
    command_rx: mpsc::Receiver<StorageCommand>,
}

impl StorageActor {
    pub fn new(
        backend: Arc<dyn StorageBackend>,
        retention: Option<RetentionPolicy>,
        clock: Arc<dyn Clock>,
        command_rx: mpsc::Receiver<StorageCommand>,
    ) -> Self {
        Self {
            backend,
            retention,
            clock,
            command_rx,
        }
    }

    /// Run the actor's main loop
    #[instrument(skip(self))]
    pub async fn run(mut self) {
        let has_retention = self.retention.is_some();
        let cleanup_every = self
            .retention
            .as_ref()
            .map(|policy| policy.cleanup_interval)
            .unwrap_or(time::Duration::from_secs(60 * 60));

        debug!(
            "starting storage actor (retention: {})",
            if has_retention { "enabled" } else { "disabled" }
        );

        if has_retention {
            debug!("running initial retention cleanup on startup");
            if let Err(e) = self.run_cleanup().await {
                error!("initial retention cleanup failed: {:#}", e);
            }
        }

        let mut cleanup_interval = time::interval_at(Instant::now() + cleanup_every, cleanup_every);

        loop {
            tokio::select! {
                _ = cleanup_interval.tick(), if has_retention => {
                    trace!("retention cleanup triggered");
                    if let Err(e) = self.run_cleanup().await {
                        error!("retention cleanup failed: {:#}", e);
                    }
                }

                cmd = self.command_rx.recv() => {
                    match cmd {
                        Some(StorageCommand::RunCleanup { respond_to }) => {
                            let _ = respond_to.send(self.run_cleanup().await);
                        }

                        Some(StorageCommand::GetStats { respond_to }) => {
                            let stats = self
                                .backend
                                .get_stats()
                                .await
                                .context("failed to read backend stats");
                            let _ = respond_to.send(stats);
                        }

                        Some(StorageCommand::Shutdown) => {
                            debug!("received shutdown command");
                            break;
                        }

                        None => {
                            warn!("command channel closed, shutting down");
                            break;
                        }
                    }
                }
            }
        }

        if let Err(e) = self.backend.close().await {
            error!("failed to close storage backend: {}", e);
        }
        debug!("storage actor stopped");
    }

    /// Apply the retention policy once
    ///
    /// Without a policy nothing is deleted and the report stays empty.
    async fn run_cleanup(&self) -> Result<CleanupReport> {
        let Some(policy) = self.retention else {
            return Ok(CleanupReport::default());
        };

        let now = self.clock.now();
        let metric_cutoff = now - chrono::Duration::from_std(policy.metrics)?;
        let execution_cutoff = now - chrono::Duration::from_std(policy.executions)?;

        debug!(
            "running retention cleanup (metrics before {}, executions before {})",
            metric_cutoff, execution_cutoff
        );

        let metric_points = self
            .backend
            .cleanup_old_metrics(metric_cutoff)
            .await
            .context("failed to clean up old metrics")?;
        let executions = self
            .backend
            .cleanup_old_executions(execution_cutoff)
            .await
            .context("failed to clean up old executions")?;
        let trimmed_executions = match policy.max_executions_per_collector {
            Some(keep) => self
                .backend
                .trim_executions(keep)
                .await
                .context("failed to trim execution log")?,
            None => 0,
        };

        let report = CleanupReport {
            metric_points,
            executions,
            trimmed_executions,
            ran_at: Some(now),
        };

        if metric_points + executions + trimmed_executions > 0 {
            info!(
                "retention cleanup deleted {} metric points, {} executions ({} trimmed)",
                metric_points, executions, trimmed_executions
            );
        } else {
            trace!("retention cleanup: nothing to delete");
        }

        Ok(report)
    }
}

/// Handle for controlling the StorageActor
#[derive(Clone)]
pub struct StorageHandle {
    sender: mpsc::Sender<StorageCommand>,
}

impl StorageHandle {
    pub fn spawn(
        backend: Arc<dyn StorageBackend>,
        retention: Option<RetentionPolicy>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let (cmd_tx, cmd_rx) = mpsc::channel(32);

        let actor = StorageActor::new(backend, retention, clock, cmd_rx);
        tokio::spawn(actor.run());

        Self { sender: cmd_tx }
    }

    /// Apply the retention policy now
    pub async fn run_cleanup(&self) -> Result<CleanupReport> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(StorageCommand::RunCleanup { respond_to: tx })
            .await
            .context("failed to send RunCleanup command")?;

        rx.await.context("failed to receive response")?
    }

    pub async fn get_stats(&self) -> Result<BackendStats> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(StorageCommand::GetStats { respond_to: tx })
            .await
            .context("failed to send GetStats command")?;

        rx.await.context("failed to receive response")?
    }

    pub async fn shutdown(&self) {
        let _ = self.sender.send(StorageCommand::Shutdown).await;
    }
}
