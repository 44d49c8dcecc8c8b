//! CollectorActor - runs one registered collector on its interval
//!
//! ## Message Flow
//!
//! ```text
//! Timer / RunNow → per-collector lock → concurrency permit → re-read registration
//!     → collect() under deadline → validate → commit (points + record + health)
//!     → publish metrics_update + execution_complete
//! ```
//!
//! The timer is re-armed only after a run completes, so a slow collector
//! never stacks runs. The per-collector lock is shared with any later worker
//! for the same id, which keeps at most one execution in flight even while a
//! replaced worker is still finishing.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use futures::FutureExt;
use serde_json::Value;
use tokio::sync::{Mutex, Semaphore, mpsc, oneshot, watch};
use tokio::time::{Instant, sleep_until, timeout_at};
use tracing::{debug, error, info, instrument, trace, warn};

use super::messages::CollectorCommand;
use crate::collector::{CollectContext, Collector, CollectorCatalog, HealthReport, MetricSet};
use crate::error::CollectionError;
use crate::health::HealthStatus;
use crate::hub::{BroadcastHub, HubEvent};
use crate::registry::Registry;
use crate::storage::{CollectorRegistration, ExecutionRecord, ExecutionStatus, MetricStore};
use crate::util::{Clock, jittered};

/// Everything a worker needs, shared by all workers of one scheduler
pub struct WorkerContext {
    pub registry: Registry,
    pub catalog: Arc<CollectorCatalog>,
    pub store: Arc<MetricStore>,
    pub hub: BroadcastHub,
    pub clock: Arc<dyn Clock>,

    /// Global concurrency limit
    pub limiter: Arc<Semaphore>,

    pub default_timeout: Duration,
    pub jitter_ratio: f64,

    /// Flips to `true` on shutdown
    pub shutdown: watch::Receiver<bool>,
}

struct Instance {
    kind: String,
    config: Value,
    collector: Arc<dyn Collector>,
}

fn panic_message(panic: Box<dyn Any + Send>) -> String {
    if let Some(msg) = panic.downcast_ref::<&str>() {
        msg.to_string()
    } else if let Some(msg) = panic.downcast_ref::<String>() {
        msg.clone()
    } else {
        "collector panicked".to_string()
    }
}

pub struct CollectorActor {
    collector_id: String,
    interval: Duration,
    first_run: Duration,
    ctx: Arc<WorkerContext>,
    lock: Arc<Mutex<()>>,
    instance: Option<Instance>,
    command_rx: mpsc::Receiver<CollectorCommand>,
}

impl CollectorActor {
    pub fn new(
        collector_id: String,
        interval: Duration,
        first_run: Duration,
        ctx: Arc<WorkerContext>,
        lock: Arc<Mutex<()>>,
        command_rx: mpsc::Receiver<CollectorCommand>,
    ) -> Self {
        Self {
            collector_id,
            interval,
            first_run,
            ctx,
            lock,
            instance: None,
            command_rx,
        }
    }

    #[instrument(skip(self), fields(collector_id = %self.collector_id))]
    pub async fn run(mut self) {
        debug!("starting collector actor, first run in {:?}", self.first_run);

        let mut shutdown = self.ctx.shutdown.clone();
        let mut next_run = Instant::now() + self.first_run;

        loop {
            if *shutdown.borrow() {
                break;
            }

            tokio::select! {
                _ = sleep_until(next_run) => {
                    if let Err(e) = self.execute().await {
                        error!("run failed before it could be recorded: {:#}", e);
                    }
                    next_run = Instant::now() + jittered(self.interval, self.ctx.jitter_ratio);
                }

                cmd = self.command_rx.recv() => {
                    match cmd {
                        Some(CollectorCommand::RunNow { respond_to }) => {
                            debug!("received RunNow command");
                            let result = self.execute().await;
                            let _ = respond_to.send(result);
                        }

                        Some(CollectorCommand::Probe { respond_to }) => {
                            let _ = respond_to.send(self.probe().await);
                        }

                        Some(CollectorCommand::UpdateInterval { interval }) => {
                            debug!("updating interval to {:?}", interval);
                            self.interval = interval;
                            next_run = Instant::now() + jittered(interval, self.ctx.jitter_ratio);
                        }

                        Some(CollectorCommand::Shutdown) => {
                            debug!("received shutdown command");
                            break;
                        }

                        None => {
                            warn!("command channel closed, shutting down");
                            break;
                        }
                    }
                }

                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        debug!("collector actor stopped");
    }

    /// Cached instance, rebuilt when kind or config changed
    fn instance_for(
        &mut self,
        registration: &CollectorRegistration,
    ) -> Result<Arc<dyn Collector>, CollectionError> {
        if let Some(instance) = &self.instance
            && instance.kind == registration.kind
            && instance.config == registration.config
        {
            return Ok(instance.collector.clone());
        }

        if self.instance.is_some() {
            info!("collector configuration changed, rebuilding");
        }
        self.instance = None;
        let collector = self.ctx.catalog.build(registration)?;
        self.instance = Some(Instance {
            kind: registration.kind.clone(),
            config: registration.config.clone(),
            collector: collector.clone(),
        });
        Ok(collector)
    }

    fn context(&self, registration: &CollectorRegistration) -> (CollectContext, Duration) {
        let timeout = registration.timeout.unwrap_or(self.ctx.default_timeout);
        let ctx = CollectContext::new(
            &registration.id,
            registration.config.clone(),
            Instant::now() + timeout,
            self.ctx.shutdown.clone(),
        );
        (ctx, timeout)
    }

    /// One execution
    ///
    /// Returns `Ok(None)` when the run was abandoned (shutdown, disabled)
    /// and `Err` when the result could not be committed; nothing is
    /// published in either case.
    #[instrument(skip(self), fields(collector_id = %self.collector_id))]
    async fn execute(&mut self) -> Result<Option<ExecutionRecord>> {
        let lock = self.lock.clone();
        let _guard = lock.lock().await;

        let mut shutdown = self.ctx.shutdown.clone();
        let limiter = self.ctx.limiter.clone();
        let _permit = tokio::select! {
            permit = limiter.acquire_owned() => permit.context("concurrency limiter closed")?,
            _ = shutdown.wait_for(|stop| *stop) => return Ok(None),
        };

        let registration = self
            .ctx
            .registry
            .get(&self.collector_id)
            .await
            .context("failed to load registration")?;
        if !registration.enabled {
            debug!("collector disabled, skipping run");
            return Ok(None);
        }

        let started_at = self.ctx.clock.now();
        let (ctx, timeout) = self.context(&registration);

        let outcome = match self.instance_for(&registration) {
            Ok(collector) => {
                let collect = AssertUnwindSafe(collector.collect(&ctx)).catch_unwind();
                tokio::select! {
                    biased;
                    _ = ctx.cancelled() => {
                        debug!("run cancelled by shutdown");
                        return Ok(None);
                    }
                    result = timeout_at(ctx.deadline, collect) => match result {
                        Err(_) => Err(CollectionError::Timeout(timeout)),
                        Ok(Err(panic)) => Err(CollectionError::Panicked(panic_message(panic))),
                        Ok(Ok(result)) => result,
                    },
                }
            }
            Err(e) => Err(e),
        };
        let outcome = outcome.and_then(|set: MetricSet| set.validate().map(|_| set));

        let completed_at = self.ctx.clock.now();
        let mut health = self
            .ctx
            .store
            .backend()
            .get_health(&self.collector_id)
            .await
            .context("failed to load health")?
            .unwrap_or_else(|| HealthStatus::unknown(&self.collector_id));

        let (mut record, points) = match outcome {
            Ok(set) => {
                let points = set.into_points(&self.collector_id, started_at);
                health.record_success(completed_at);
                let record = ExecutionRecord::new(
                    &self.collector_id,
                    started_at,
                    completed_at,
                    ExecutionStatus::Success,
                )
                .with_metric_count(points.len());
                (record, points)
            }
            Err(err) => {
                let status = if err.is_timeout() {
                    ExecutionStatus::Timeout
                } else {
                    ExecutionStatus::Failed
                };
                warn!(
                    consecutive_errors = health.consecutive_errors + 1,
                    "collection failed: {}", err
                );
                health.record_failure(completed_at, err.to_string());
                let record =
                    ExecutionRecord::new(&self.collector_id, started_at, completed_at, status)
                        .with_error(err.to_string());
                (record, Vec::new())
            }
        };

        let id = self
            .ctx
            .store
            .commit_run(record.clone(), points.clone(), health)
            .await
            .context("failed to commit run")?;
        record.id = Some(id);

        trace!(status = %record.status, metrics = points.len(), "run committed");

        if !points.is_empty() {
            self.ctx.hub.publish(HubEvent::MetricsUpdate {
                collector_id: self.collector_id.clone(),
                points,
            });
        }
        self.ctx.hub.publish(HubEvent::ExecutionComplete {
            record: record.clone(),
        });

        Ok(Some(record))
    }

    #[instrument(skip(self), fields(collector_id = %self.collector_id))]
    async fn probe(&mut self) -> Result<HealthReport> {
        let lock = self.lock.clone();
        let _guard = lock.lock().await;

        let registration = self.ctx.registry.get(&self.collector_id).await?;
        let collector = self.instance_for(&registration)?;
        let (ctx, timeout) = self.context(&registration);

        let check = AssertUnwindSafe(collector.health_check(&ctx)).catch_unwind();
        Ok(match timeout_at(ctx.deadline, check).await {
            Err(_) => HealthReport::unhealthy(CollectionError::Timeout(timeout).to_string()),
            Ok(Err(panic)) => HealthReport::unhealthy(panic_message(panic)),
            Ok(Ok(report)) => report,
        })
    }
}

/// Handle for controlling a CollectorActor
#[derive(Debug, Clone)]
pub struct CollectorHandle {
    sender: mpsc::Sender<CollectorCommand>,

    pub collector_id: String,
}

impl CollectorHandle {
    /// Spawn a worker whose first scheduled run happens after `first_run`
    pub fn spawn(
        collector_id: impl Into<String>,
        interval: Duration,
        first_run: Duration,
        ctx: Arc<WorkerContext>,
        lock: Arc<Mutex<()>>,
    ) -> (Self, tokio::task::JoinHandle<()>) {
        let collector_id = collector_id.into();
        let (cmd_tx, cmd_rx) = mpsc::channel(32);

        let actor =
            CollectorActor::new(collector_id.clone(), interval, first_run, ctx, lock, cmd_rx);
        let task = tokio::spawn(actor.run());

        (
            Self {
                sender: cmd_tx,
                collector_id,
            },
            task,
        )
    }

    /// Run immediately, waiting for any in-flight run first
    pub async fn run_now(&self) -> Result<Option<ExecutionRecord>> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(CollectorCommand::RunNow { respond_to: tx })
            .await
            .context("failed to send RunNow command")?;

        rx.await.context("failed to receive response")?
    }

    pub async fn probe(&self) -> Result<HealthReport> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(CollectorCommand::Probe { respond_to: tx })
            .await
            .context("failed to send Probe command")?;

        rx.await.context("failed to receive response")?
    }

    pub async fn update_interval(&self, interval: Duration) -> Result<()> {
        self.sender
            .send(CollectorCommand::UpdateInterval { interval })
            .await
            .context("failed to send UpdateInterval command")?;
        Ok(())
    }

    pub async fn shutdown(&self) -> Result<()> {
        self.sender
            .send(CollectorCommand::Shutdown)
            .await
            .context("failed to send Shutdown command")?;
        Ok(())
    }

    pub fn collector_id(&self) -> &str {
        &self.collector_id
    }
}
