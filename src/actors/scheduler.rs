//! SchedulerActor - keeps one CollectorActor per enabled registration
//!
//! On startup every enabled collector gets a worker whose first run is
//! staggered across its interval (offset = interval × index / count among
//! collectors sharing that interval). A refresh pass, periodic and on
//! demand, starts workers for newly enabled collectors, stops workers for
//! disabled ones and re-arms timers whose interval changed.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::sync::{Mutex, Semaphore, mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, interval_at};
use tracing::{debug, error, info, instrument, warn};

use super::collector::{CollectorHandle, WorkerContext};
use super::messages::{RefreshReport, ScheduledCollector, SchedulerCommand};
use crate::collector::{CollectorCatalog, HealthReport};
use crate::config::SchedulerConfig;
use crate::hub::BroadcastHub;
use crate::registry::Registry;
use crate::storage::{CollectorRegistration, ExecutionRecord, MetricStore};
use crate::util::Clock;

/// Start offsets spreading collectors that share an interval across it
pub fn stagger(registrations: &[CollectorRegistration]) -> HashMap<String, Duration> {
    let mut groups: BTreeMap<Duration, Vec<&str>> = BTreeMap::new();
    for registration in registrations {
        groups
            .entry(registration.interval)
            .or_default()
            .push(&registration.id);
    }

    let mut offsets = HashMap::new();
    for (interval, mut ids) in groups {
        ids.sort_unstable();
        let count = ids.len() as u32;
        for (index, id) in ids.into_iter().enumerate() {
            offsets.insert(id.to_string(), interval * index as u32 / count);
        }
    }
    offsets
}

struct Worker {
    handle: CollectorHandle,
    task: JoinHandle<()>,
    interval: Duration,
}

pub struct SchedulerActor {
    ctx: Arc<WorkerContext>,
    workers: HashMap<String, Worker>,
    /// Outlive their workers so a respawned worker waits for its predecessor
    locks: HashMap<String, Arc<Mutex<()>>>,
    /// Workers told to stop that may still be finishing a run
    retiring: Vec<JoinHandle<()>>,
    refresh_interval: Duration,
    shutdown_tx: watch::Sender<bool>,
    command_rx: mpsc::Receiver<SchedulerCommand>,
}

impl SchedulerActor {
    fn spawn_worker(&mut self, registration: &CollectorRegistration, first_run: Duration) {
        let lock = self
            .locks
            .entry(registration.id.clone())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();

        let (handle, task) = CollectorHandle::spawn(
            &registration.id,
            registration.interval,
            first_run,
            self.ctx.clone(),
            lock,
        );
        debug!(collector_id = %registration.id, "worker started, first run in {:?}", first_run);

        self.workers.insert(
            registration.id.clone(),
            Worker {
                handle,
                task,
                interval: registration.interval,
            },
        );
    }

    fn start(&mut self, registrations: &[CollectorRegistration]) {
        let offsets = stagger(registrations);
        for registration in registrations {
            let offset = offsets.get(&registration.id).copied().unwrap_or_default();
            self.spawn_worker(registration, offset);
        }
        info!("scheduling {} collectors", self.workers.len());
    }

    #[instrument(skip(self))]
    async fn refresh(&mut self) -> Result<RefreshReport> {
        let enabled = self
            .ctx
            .registry
            .list_enabled()
            .await
            .context("failed to read registry")?;
        let mut report = RefreshReport::default();

        let wanted: HashMap<&str, &CollectorRegistration> =
            enabled.iter().map(|reg| (reg.id.as_str(), reg)).collect();

        let stale: Vec<String> = self
            .workers
            .iter()
            .filter(|(id, worker)| !wanted.contains_key(id.as_str()) || worker.task.is_finished())
            .map(|(id, _)| id.clone())
            .collect();
        for id in stale {
            if let Some(worker) = self.workers.remove(&id) {
                if worker.task.is_finished() {
                    warn!(collector_id = %id, "worker exited unexpectedly");
                } else {
                    let _ = worker.handle.shutdown().await;
                    self.retiring.push(worker.task);
                }
                if !wanted.contains_key(id.as_str()) {
                    report.stopped.push(id);
                }
            }
        }

        for registration in &enabled {
            match self.workers.get_mut(&registration.id) {
                Some(worker) if worker.interval != registration.interval => {
                    worker.handle.update_interval(registration.interval).await?;
                    worker.interval = registration.interval;
                    report.rescheduled.push(registration.id.clone());
                }
                Some(_) => {}
                None => {
                    self.spawn_worker(registration, Duration::ZERO);
                    report.started.push(registration.id.clone());
                }
            }
        }

        self.retiring.retain(|task| !task.is_finished());

        if !report.is_empty() {
            info!(
                started = report.started.len(),
                stopped = report.stopped.len(),
                rescheduled = report.rescheduled.len(),
                "schedule refreshed"
            );
        }
        Ok(report)
    }

    fn scheduled(&self) -> Vec<ScheduledCollector> {
        let mut scheduled: Vec<ScheduledCollector> = self
            .workers
            .iter()
            .map(|(id, worker)| ScheduledCollector {
                collector_id: id.clone(),
                interval: worker.interval,
            })
            .collect();
        scheduled.sort_by(|a, b| a.collector_id.cmp(&b.collector_id));
        scheduled
    }

    async fn stop_all(&mut self) {
        let _ = self.shutdown_tx.send(true);

        let mut tasks: Vec<JoinHandle<()>> = self.retiring.drain(..).collect();
        for (_, worker) in self.workers.drain() {
            let _ = worker.handle.shutdown().await;
            tasks.push(worker.task);
        }

        for task in tasks {
            if let Err(e) = task.await {
                error!("worker task failed: {e}");
            }
        }
    }

    #[instrument(skip(self))]
    pub async fn run(mut self) {
        debug!("starting scheduler actor");

        let mut ticker = interval_at(Instant::now() + self.refresh_interval, self.refresh_interval);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    // keep the current schedule when the registry is unreadable
                    if let Err(e) = self.refresh().await {
                        error!("registry refresh failed: {:#}", e);
                    }
                }

                cmd = self.command_rx.recv() => {
                    match cmd {
                        Some(SchedulerCommand::Worker { collector_id, respond_to }) => {
                            let handle = self.workers.get(&collector_id).map(|w| w.handle.clone());
                            let _ = respond_to.send(handle);
                        }

                        Some(SchedulerCommand::Refresh { respond_to }) => {
                            let _ = respond_to.send(self.refresh().await);
                        }

                        Some(SchedulerCommand::Scheduled { respond_to }) => {
                            let _ = respond_to.send(self.scheduled());
                        }

                        Some(SchedulerCommand::Shutdown { respond_to }) => {
                            debug!("received shutdown command");
                            self.stop_all().await;
                            let _ = respond_to.send(());
                            break;
                        }

                        None => {
                            warn!("command channel closed, shutting down");
                            self.stop_all().await;
                            break;
                        }
                    }
                }
            }
        }

        debug!("scheduler actor stopped");
    }
}

/// What the scheduler drives
pub struct SchedulerDeps {
    pub registry: Registry,
    pub catalog: Arc<CollectorCatalog>,
    pub store: Arc<MetricStore>,
    pub hub: BroadcastHub,
    pub clock: Arc<dyn Clock>,
}

/// Handle for controlling the SchedulerActor
#[derive(Clone)]
pub struct SchedulerHandle {
    sender: mpsc::Sender<SchedulerCommand>,
}

impl SchedulerHandle {
    /// Load the enabled collectors and start scheduling them
    ///
    /// Failing to read the registry here is fatal.
    pub async fn spawn(deps: SchedulerDeps, config: &SchedulerConfig) -> Result<Self> {
        let registrations = deps
            .registry
            .list_enabled()
            .await
            .context("failed to load collectors from the registry")?;

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let ctx = Arc::new(WorkerContext {
            registry: deps.registry,
            catalog: deps.catalog,
            store: deps.store,
            hub: deps.hub,
            clock: deps.clock,
            limiter: Arc::new(Semaphore::new(config.max_concurrency.max(1))),
            default_timeout: config.default_timeout,
            jitter_ratio: config.jitter_ratio,
            shutdown: shutdown_rx,
        });

        let (cmd_tx, cmd_rx) = mpsc::channel(32);
        let mut actor = SchedulerActor {
            ctx,
            workers: HashMap::new(),
            locks: HashMap::new(),
            retiring: Vec::new(),
            refresh_interval: config.refresh_interval,
            shutdown_tx,
            command_rx: cmd_rx,
        };
        actor.start(&registrations);

        tokio::spawn(actor.run());

        Ok(Self { sender: cmd_tx })
    }

    async fn worker(&self, collector_id: &str) -> Result<CollectorHandle> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(SchedulerCommand::Worker {
                collector_id: collector_id.to_string(),
                respond_to: tx,
            })
            .await
            .context("failed to send Worker command")?;

        rx.await
            .context("failed to receive response")?
            .with_context(|| format!("collector '{collector_id}' is not scheduled"))
    }

    /// Run a collector now; waits behind an in-flight run of the same collector
    pub async fn run_now(&self, collector_id: &str) -> Result<Option<ExecutionRecord>> {
        self.worker(collector_id).await?.run_now().await
    }

    pub async fn probe(&self, collector_id: &str) -> Result<HealthReport> {
        self.worker(collector_id).await?.probe().await
    }

    pub async fn refresh(&self) -> Result<RefreshReport> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(SchedulerCommand::Refresh { respond_to: tx })
            .await
            .context("failed to send Refresh command")?;

        rx.await.context("failed to receive response")?
    }

    pub async fn scheduled(&self) -> Result<Vec<ScheduledCollector>> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(SchedulerCommand::Scheduled { respond_to: tx })
            .await
            .context("failed to send Scheduled command")?;

        rx.await.context("failed to receive response")
    }

    /// Cancel in-flight runs and wait until every worker has stopped
    pub async fn shutdown(&self) -> Result<()> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(SchedulerCommand::Shutdown { respond_to: tx })
            .await
            .context("failed to send Shutdown command")?;

        rx.await.context("failed to receive response")
    }
}
