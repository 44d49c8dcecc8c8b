//! Alert instance state machine
//!
//! Per (rule, resource):
//!
//! ```text
//!            triggered, cooldown elapsed
//!   (none) ──────────────────────────────▶ active ──ack──▶ acknowledged
//!                                            │                 │
//!                    not triggered / manual  ▼                 ▼
//!                                         resolved ◀───────────┘
//! ```
//!
//! Snoozing sets `snoozed_until` on an open instance; it mutes notifications
//! but never stops evaluation or auto-resolution. Cooldown only gates the
//! creation of new instances, measured from the previous instance's
//! `triggered_at` for the same rule and resource.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::{debug, info, instrument};

use super::evaluator::Evaluation;
use super::rule::AlertRule;
use super::{AlertInstance, AlertStatus, AlertTransition, NewAlert, Transition};
use crate::error::AlertError;
use crate::storage::StorageBackend;

pub struct AlertLifecycle {
    backend: Arc<dyn StorageBackend>,
    default_cooldown: Duration,
}

impl AlertLifecycle {
    pub fn new(backend: Arc<dyn StorageBackend>, default_cooldown: Duration) -> Self {
        Self {
            backend,
            default_cooldown,
        }
    }

    pub fn cooldown_for(&self, rule: &AlertRule) -> Duration {
        rule.cooldown.unwrap_or(self.default_cooldown)
    }

    /// Apply one evaluation result to the (rule, resource) pair
    ///
    /// Returns the transition that happened, if any. A still-triggered
    /// reading only refreshes `last_value` on the open instance.
    #[instrument(
        skip(self, rule, evaluation),
        fields(rule_id = %rule.id, triggered = evaluation.triggered)
    )]
    pub async fn observe(
        &self,
        rule: &AlertRule,
        resource_id: &str,
        evaluation: &Evaluation,
        now: DateTime<Utc>,
    ) -> Result<Option<AlertTransition>, AlertError> {
        let open = self.backend.open_alert(&rule.id, resource_id).await?;

        match (evaluation.triggered, open) {
            (true, Some(mut alert)) => {
                if alert.last_value != evaluation.value {
                    alert.last_value = evaluation.value.clone();
                    self.backend.update_alert(&alert).await?;
                }
                Ok(None)
            }
            (true, None) => {
                if let Some(previous) = self.backend.last_alert(&rule.id, resource_id).await? {
                    let cooldown = chrono::Duration::from_std(self.cooldown_for(rule))
                        .unwrap_or(chrono::Duration::MAX);
                    if now - previous.triggered_at < cooldown {
                        debug!(resource_id, "trigger suppressed by cooldown");
                        return Ok(None);
                    }
                }

                let new_alert = NewAlert {
                    rule_id: rule.id.clone(),
                    resource_id: resource_id.to_string(),
                    severity: rule.severity,
                    triggered_at: now,
                    last_value: evaluation.value.clone(),
                };
                match self.backend.insert_alert(new_alert).await {
                    Ok(alert) => {
                        info!(alert_id = alert.id, resource_id, "alert triggered");
                        Ok(Some(AlertTransition {
                            transition: Transition::Triggered,
                            alert,
                        }))
                    }
                    // another writer opened it first
                    Err(err) if err.is_conflict() => Ok(None),
                    Err(err) => Err(err.into()),
                }
            }
            (false, Some(mut alert)) => {
                alert.status = AlertStatus::Resolved;
                alert.resolved_at = Some(now);
                alert.last_value = evaluation.value.clone();
                self.backend.update_alert(&alert).await?;
                info!(alert_id = alert.id, resource_id, "alert auto-resolved");
                Ok(Some(AlertTransition {
                    transition: Transition::Resolved,
                    alert,
                }))
            }
            (false, None) => Ok(None),
        }
    }

    async fn load(&self, alert_id: i64) -> Result<AlertInstance, AlertError> {
        self.backend
            .get_alert(alert_id)
            .await?
            .ok_or(AlertError::NotFound(alert_id))
    }

    #[instrument(skip(self))]
    pub async fn acknowledge(
        &self,
        alert_id: i64,
        by: Option<String>,
        now: DateTime<Utc>,
    ) -> Result<AlertTransition, AlertError> {
        let mut alert = self.load(alert_id).await?;
        if alert.status != AlertStatus::Active {
            return Err(AlertError::InvalidTransition {
                alert_id,
                from: alert.status.to_string(),
                action: "acknowledge",
            });
        }

        alert.status = AlertStatus::Acknowledged;
        alert.acknowledged_at = Some(now);
        alert.acknowledged_by = by;
        self.backend.update_alert(&alert).await?;

        Ok(AlertTransition {
            transition: Transition::Acknowledged,
            alert,
        })
    }

    #[instrument(skip(self))]
    pub async fn resolve(
        &self,
        alert_id: i64,
        by: Option<String>,
        now: DateTime<Utc>,
    ) -> Result<AlertTransition, AlertError> {
        let mut alert = self.load(alert_id).await?;
        if !alert.status.is_open() {
            return Err(AlertError::InvalidTransition {
                alert_id,
                from: alert.status.to_string(),
                action: "resolve",
            });
        }

        alert.status = AlertStatus::Resolved;
        alert.resolved_at = Some(now);
        alert.resolved_by = by;
        self.backend.update_alert(&alert).await?;

        Ok(AlertTransition {
            transition: Transition::Resolved,
            alert,
        })
    }

    #[instrument(skip(self))]
    pub async fn snooze(
        &self,
        alert_id: i64,
        until: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<AlertTransition, AlertError> {
        if until <= now {
            return Err(AlertError::InvalidRequest(
                "snooze time must be in the future".to_string(),
            ));
        }

        let mut alert = self.load(alert_id).await?;
        if !alert.status.is_open() {
            return Err(AlertError::InvalidTransition {
                alert_id,
                from: alert.status.to_string(),
                action: "snooze",
            });
        }

        alert.snoozed_until = Some(crate::util::millis_precision(until));
        self.backend.update_alert(&alert).await?;

        Ok(AlertTransition {
            transition: Transition::Snoozed,
            alert,
        })
    }
}
