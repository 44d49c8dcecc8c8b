//! AlertActor - periodic rule sweeps and operator actions on alerts
//!
//! ## Sweep
//!
//! ```text
//! timer / EvaluateNow → enabled rules × matching enabled collectors
//!     → latest values (cached) → skip if input unchanged since last sweep
//!     → evaluate → lifecycle → publish alert_update → dispatch notifications
//! ```
//!
//! A (rule, resource) pair is re-evaluated only when the newest timestamp of
//! the metrics its condition reads has moved, so repeated sweeps over the
//! same data never create duplicate instances or notifications. Evaluation
//! errors are collected per rule and exposed through
//! [`AlertHandle::rule_errors`].
//!
//! Open instances whose rule is disabled, deleted or re-scoped, or whose
//! collector is disabled or removed, are resolved at the start of the sweep.
//! They are broadcast but not sent to notification channels.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use tokio::sync::{mpsc, oneshot};
use tokio::time::{Instant, interval_at};
use tracing::{debug, error, info, instrument, trace, warn};

use super::messages::{AlertCommand, SweepReport};
use crate::MetricValue;
use crate::alerts::{
    AlertFilter, AlertInstance, AlertLifecycle, AlertRule, AlertTransition, MetricSnapshot,
    Transition, evaluate,
};
use crate::config::AlertsConfig;
use crate::error::AlertError;
use crate::hub::{BroadcastHub, HubEvent};
use crate::notify::Dispatcher;
use crate::registry::Registry;
use crate::storage::{CollectorRegistration, MetricStore, StorageBackend, StorageError};
use crate::util::Clock;

/// What the alert actor works with
pub struct AlertDeps {
    pub registry: Registry,
    pub store: Arc<MetricStore>,
    pub dispatcher: Arc<Dispatcher>,
    pub hub: BroadcastHub,
    pub clock: Arc<dyn Clock>,
}

pub struct AlertActor {
    backend: Arc<dyn StorageBackend>,
    registry: Registry,
    store: Arc<MetricStore>,
    lifecycle: AlertLifecycle,
    dispatcher: Arc<Dispatcher>,
    hub: BroadcastHub,
    clock: Arc<dyn Clock>,
    evaluation_interval: Duration,

    /// Newest input timestamp seen per (rule_id, resource_id)
    watermarks: HashMap<(String, String), DateTime<Utc>>,

    /// Errors of the last sweep, by rule id
    rule_errors: BTreeMap<String, String>,

    command_rx: mpsc::Receiver<AlertCommand>,
}

impl AlertActor {
    pub fn new(
        deps: AlertDeps,
        config: &AlertsConfig,
        command_rx: mpsc::Receiver<AlertCommand>,
    ) -> Self {
        let backend = deps.store.backend().clone();
        Self {
            lifecycle: AlertLifecycle::new(backend.clone(), config.default_cooldown),
            backend,
            registry: deps.registry,
            store: deps.store,
            dispatcher: deps.dispatcher,
            hub: deps.hub,
            clock: deps.clock,
            evaluation_interval: config.evaluation_interval,
            watermarks: HashMap::new(),
            rule_errors: BTreeMap::new(),
            command_rx,
        }
    }

    #[instrument(skip(self))]
    pub async fn run(mut self) {
        debug!("starting alert actor, sweeping every {:?}", self.evaluation_interval);

        let mut ticker = interval_at(
            Instant::now() + self.evaluation_interval,
            self.evaluation_interval,
        );

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = self.sweep().await {
                        error!("alert sweep failed: {:#}", e);
                    }
                }

                cmd = self.command_rx.recv() => {
                    match cmd {
                        Some(AlertCommand::EvaluateNow { respond_to }) => {
                            let _ = respond_to.send(self.sweep().await);
                        }

                        Some(AlertCommand::Acknowledge { alert_id, by, respond_to }) => {
                            let now = self.clock.now();
                            let result = self.lifecycle.acknowledge(alert_id, by, now).await;
                            let _ = respond_to.send(self.apply_manual(result, now).await);
                        }

                        Some(AlertCommand::Resolve { alert_id, by, respond_to }) => {
                            let now = self.clock.now();
                            let result = self.lifecycle.resolve(alert_id, by, now).await;
                            let _ = respond_to.send(self.apply_manual(result, now).await);
                        }

                        Some(AlertCommand::Snooze { alert_id, until, respond_to }) => {
                            let now = self.clock.now();
                            let result = self.lifecycle.snooze(alert_id, until, now).await;
                            let _ = respond_to.send(self.apply_manual(result, now).await);
                        }

                        Some(AlertCommand::UpsertRule { rule, respond_to }) => {
                            let _ = respond_to.send(self.upsert_rule(*rule).await);
                        }

                        Some(AlertCommand::RuleErrors { respond_to }) => {
                            let _ = respond_to.send(self.rule_errors.clone());
                        }

                        Some(AlertCommand::Shutdown) => {
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

        debug!("alert actor stopped");
    }

    /// Broadcast an operator transition; resolutions also notify
    async fn apply_manual(
        &self,
        result: Result<AlertTransition, AlertError>,
        now: DateTime<Utc>,
    ) -> Result<AlertInstance, AlertError> {
        let transition = result?;
        info!(
            alert_id = transition.alert.id,
            transition = %transition.transition,
            "operator changed alert"
        );
        self.publish(&transition, None, now).await;
        Ok(transition.alert)
    }

    async fn publish(
        &self,
        transition: &AlertTransition,
        rule: Option<&AlertRule>,
        now: DateTime<Utc>,
    ) {
        self.hub.publish(HubEvent::alert(transition));

        if !transition.transition.notifies() {
            return;
        }

        let loaded;
        let rule = match rule {
            Some(rule) => rule,
            None => match self.backend.get_rule(&transition.alert.rule_id).await {
                Ok(Some(rule)) => {
                    loaded = rule;
                    &loaded
                }
                Ok(None) => {
                    warn!(rule_id = %transition.alert.rule_id, "rule of alert no longer exists");
                    return;
                }
                Err(e) => {
                    error!("failed to load rule for notification: {}", e);
                    return;
                }
            },
        };
        self.dispatcher.dispatch(transition, rule, now).await;
    }

    async fn upsert_rule(&mut self, rule: AlertRule) -> Result<(), AlertError> {
        rule.validate().map_err(AlertError::InvalidRequest)?;
        self.backend.upsert_rule(rule.clone()).await?;
        self.watermarks.retain(|(rule_id, _), _| rule_id != &rule.id);
        info!(rule_id = %rule.id, "rule stored");
        Ok(())
    }

    /// Previous readings of the primary metric, oldest first, excluding the
    /// current one
    async fn history(
        &self,
        rule: &AlertRule,
        snapshot: &MetricSnapshot,
    ) -> Result<Vec<MetricValue>, StorageError> {
        let current = snapshot.newest_time([rule.metric_name.as_str()]);
        let recent = self
            .store
            .recent(&snapshot.resource_id, &rule.metric_name, rule.grace as usize + 1)
            .await?;
        Ok(recent
            .into_iter()
            .filter(|p| current.is_none_or(|t| p.time < t))
            .map(|p| p.value)
            .collect())
    }

    /// Resolve open instances that no enabled (rule, collector) pair covers
    async fn retire_orphans(
        &mut self,
        rules: &[AlertRule],
        collectors: &[CollectorRegistration],
    ) -> Result<usize> {
        let live = |rule_id: &str, resource_id: &str| {
            rules.iter().any(|rule| {
                rule.id == rule_id
                    && collectors
                        .iter()
                        .any(|reg| reg.id == resource_id && rule.applies_to(&reg.id, &reg.category))
            })
        };
        self.watermarks
            .retain(|(rule_id, resource_id), _| live(rule_id.as_str(), resource_id.as_str()));

        let open = self
            .backend
            .list_alerts(AlertFilter::open())
            .await
            .context("failed to load open alerts")?;

        let mut retired = 0;
        for alert in open
            .iter()
            .filter(|a| !live(a.rule_id.as_str(), a.resource_id.as_str()))
        {
            let now = self.clock.now();
            let transition = self
                .lifecycle
                .resolve(alert.id, None, now)
                .await
                .context("failed to resolve orphaned alert")?;
            info!(
                alert_id = alert.id,
                rule_id = %alert.rule_id,
                resource_id = %alert.resource_id,
                "alert resolved, rule or collector no longer active"
            );
            self.hub.publish(HubEvent::alert(&transition));
            retired += 1;
        }
        Ok(retired)
    }

    #[instrument(skip(self))]
    async fn sweep(&mut self) -> Result<SweepReport> {
        let rules: Vec<AlertRule> = self
            .backend
            .list_rules()
            .await
            .context("failed to load rules")?
            .into_iter()
            .filter(|r| r.enabled)
            .collect();
        let collectors = self
            .registry
            .list_enabled()
            .await
            .context("failed to load collectors")?;

        let mut report = SweepReport {
            rules: rules.len(),
            resolved: self.retire_orphans(&rules, &collectors).await?,
            ..SweepReport::default()
        };
        let mut errors: BTreeMap<String, String> = BTreeMap::new();
        let mut latest_cache = HashMap::new();

        for rule in &rules {
            let metrics = rule.condition.metrics();

            for registration in collectors
                .iter()
                .filter(|reg| rule.applies_to(&reg.id, &reg.category))
            {
                if !latest_cache.contains_key(&registration.id) {
                    let points = self
                        .store
                        .latest(&registration.id)
                        .await
                        .context("failed to read latest values")?;
                    latest_cache.insert(registration.id.clone(), points);
                }
                let points = &latest_cache[&registration.id];

                let newest = points
                    .iter()
                    .filter(|p| metrics.contains(&p.metric_name.as_str()))
                    .map(|p| p.time)
                    .max()
                    .or_else(|| points.iter().map(|p| p.time).max());
                let Some(newest) = newest else {
                    // collector never reported
                    continue;
                };

                let key = (rule.id.clone(), registration.id.clone());
                if self.watermarks.get(&key) == Some(&newest) {
                    report.unchanged += 1;
                    continue;
                }

                let snapshot = MetricSnapshot::from_points(&registration.id, points);
                let history = if rule.grace > 0 {
                    Some(self.history(rule, &snapshot).await?)
                } else {
                    None
                };

                let evaluation = match evaluate(rule, &snapshot, history.as_deref()) {
                    Ok(evaluation) => evaluation,
                    Err(e) => {
                        debug!(
                            rule_id = %rule.id,
                            resource_id = %registration.id,
                            "rule evaluation failed: {}", e
                        );
                        errors.entry(rule.id.clone()).or_insert_with(|| e.to_string());
                        continue;
                    }
                };
                report.evaluated += 1;

                let now = self.clock.now();
                let transition = self
                    .lifecycle
                    .observe(rule, &registration.id, &evaluation, now)
                    .await
                    .context("failed to apply evaluation")?;
                self.watermarks.insert(key, newest);

                if let Some(transition) = transition {
                    match transition.transition {
                        Transition::Triggered => report.triggered += 1,
                        Transition::Resolved => report.resolved += 1,
                        _ => {}
                    }
                    self.publish(&transition, Some(rule), now).await;
                }
            }
        }

        for (rule_id, error) in &errors {
            warn!(rule_id = %rule_id, "rule skipped: {}", error);
        }
        report.errors = errors.len();
        self.rule_errors = errors;

        trace!(?report, "sweep finished");
        Ok(report)
    }
}

fn unavailable() -> AlertError {
    AlertError::Storage(StorageError::Unavailable("alert actor is not running".to_string()))
}

/// Handle for controlling the AlertActor
#[derive(Clone)]
pub struct AlertHandle {
    sender: mpsc::Sender<AlertCommand>,
}

impl AlertHandle {
    pub fn spawn(deps: AlertDeps, config: &AlertsConfig) -> Self {
        let (cmd_tx, cmd_rx) = mpsc::channel(32);

        let actor = AlertActor::new(deps, config, cmd_rx);
        tokio::spawn(actor.run());

        Self { sender: cmd_tx }
    }

    /// Run a sweep now
    pub async fn evaluate_now(&self) -> Result<SweepReport> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(AlertCommand::EvaluateNow { respond_to: tx })
            .await
            .context("failed to send EvaluateNow command")?;

        rx.await.context("failed to receive response")?
    }

    async fn request<T>(
        &self,
        command: AlertCommand,
        rx: oneshot::Receiver<Result<T, AlertError>>,
    ) -> Result<T, AlertError> {
        self.sender.send(command).await.map_err(|_| unavailable())?;
        rx.await.map_err(|_| unavailable())?
    }

    pub async fn acknowledge(
        &self,
        alert_id: i64,
        by: Option<String>,
    ) -> Result<AlertInstance, AlertError> {
        let (tx, rx) = oneshot::channel();
        self.request(
            AlertCommand::Acknowledge {
                alert_id,
                by,
                respond_to: tx,
            },
            rx,
        )
        .await
    }

    pub async fn resolve(
        &self,
        alert_id: i64,
        by: Option<String>,
    ) -> Result<AlertInstance, AlertError> {
        let (tx, rx) = oneshot::channel();
        self.request(
            AlertCommand::Resolve {
                alert_id,
                by,
                respond_to: tx,
            },
            rx,
        )
        .await
    }

    pub async fn snooze(
        &self,
        alert_id: i64,
        until: DateTime<Utc>,
    ) -> Result<AlertInstance, AlertError> {
        let (tx, rx) = oneshot::channel();
        self.request(
            AlertCommand::Snooze {
                alert_id,
                until,
                respond_to: tx,
            },
            rx,
        )
        .await
    }

    pub async fn upsert_rule(&self, rule: AlertRule) -> Result<(), AlertError> {
        let (tx, rx) = oneshot::channel();
        self.request(
            AlertCommand::UpsertRule {
                rule: Box::new(rule),
                respond_to: tx,
            },
            rx,
        )
        .await
    }

    /// Rules that failed to evaluate in the last sweep, with the reason
    pub async fn rule_errors(&self) -> Result<BTreeMap<String, String>> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(AlertCommand::RuleErrors { respond_to: tx })
            .await
            .context("failed to send RuleErrors command")?;

        rx.await.context("failed to receive response")
    }

    pub async fn shutdown(&self) {
        let _ = self.sender.send(AlertCommand::Shutdown).await;
    }
}
