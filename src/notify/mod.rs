//! Notification fan-out
//!
//! The [`Dispatcher`] turns triggered and resolved alert transitions into
//! [`Notification`]s and delivers them to every channel named by the rule,
//! concurrently and each under its own timeout. Every attempt, successful
//! or not, is appended to the notification log.

pub mod discord;
pub mod log;
pub mod webhook;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument, warn};

use crate::MetricValue;
use crate::alerts::{AlertRule, AlertTransition, Severity, Transition};
use crate::error::NotificationError;
use crate::storage::{NotificationLogEntry, StorageBackend};

/// Transport-agnostic message
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Notification {
    pub title: String,
    pub body: String,
    /// Who should look at it (e.g. a Discord user id)
    pub target: Option<String>,
    pub severity: Severity,
    pub alert_id: i64,
    pub rule_id: String,
    pub resource_id: String,
    pub transition: Transition,
    pub value: Option<MetricValue>,
    pub timestamp: DateTime<Utc>,
}

fn format_value(value: &Option<MetricValue>) -> String {
    match value {
        Some(MetricValue::Number(n)) => format!("{:.1}", n),
        Some(MetricValue::Bool(b)) => b.to_string(),
        Some(MetricValue::Text(t)) => t.clone(),
        Some(MetricValue::Structured(v)) => v.to_string(),
        None => "n/a".to_string(),
    }
}

impl Notification {
    pub fn from_transition(
        transition: &AlertTransition,
        rule: &AlertRule,
        now: DateTime<Utc>,
    ) -> Self {
        let alert = &transition.alert;
        let name = if rule.name.is_empty() { &rule.id } else { &rule.name };
        let value = format_value(&alert.last_value);

        let (title, body) = match transition.transition {
            Transition::Triggered => (
                format!("🔥 {} on {}", name, alert.resource_id),
                format!(
                    "`{}` matched {} on **{}** ({} = {})",
                    rule.id,
                    rule.condition.describe(),
                    alert.resource_id,
                    rule.metric_name,
                    value
                ),
            ),
            Transition::Resolved => (
                format!("✅ {} resolved on {}", name, alert.resource_id),
                format!(
                    "`{}` is back to normal on **{}** ({} = {})",
                    rule.id, alert.resource_id, rule.metric_name, value
                ),
            ),
            other => (
                format!("{} {} on {}", name, other, alert.resource_id),
                format!("alert {} {}", alert.id, other),
            ),
        };

        Self {
            title,
            body,
            target: None,
            severity: alert.severity,
            alert_id: alert.id,
            rule_id: rule.id.clone(),
            resource_id: alert.resource_id.clone(),
            transition: transition.transition,
            value: alert.last_value.clone(),
            timestamp: now,
        }
    }
}

/// A delivery transport
#[async_trait]
pub trait NotificationChannel: Send + Sync {
    fn id(&self) -> &str;

    async fn send(&self, notification: &Notification) -> Result<(), NotificationError>;
}

/// Channel definitions from the config file
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ChannelConfig {
    Webhook { id: String, url: String },
    Discord {
        id: String,
        url: String,
        #[serde(default)]
        user_id: Option<String>,
    },
    Log { id: String },
}

impl ChannelConfig {
    pub fn id(&self) -> &str {
        match self {
            ChannelConfig::Webhook { id, .. }
            | ChannelConfig::Discord { id, .. }
            | ChannelConfig::Log { id } => id,
        }
    }

    pub fn build(&self) -> Arc<dyn NotificationChannel> {
        match self {
            ChannelConfig::Webhook { id, url } => Arc::new(webhook::WebhookChannel::new(id, url)),
            ChannelConfig::Discord { id, url, user_id } => Arc::new(
                discord::DiscordChannel::new(id, url).with_user(user_id.clone()),
            ),
            ChannelConfig::Log { id } => Arc::new(log::LogChannel::new(id)),
        }
    }
}

pub struct Dispatcher {
    channels: HashMap<String, Arc<dyn NotificationChannel>>,
    backend: Arc<dyn StorageBackend>,
    timeout: Duration,
}

impl Dispatcher {
    pub fn new(backend: Arc<dyn StorageBackend>, timeout: Duration) -> Self {
        Self {
            channels: HashMap::new(),
            backend,
            timeout,
        }
    }

    pub fn with_channel(mut self, channel: Arc<dyn NotificationChannel>) -> Self {
        self.add_channel(channel);
        self
    }

    pub fn add_channel(&mut self, channel: Arc<dyn NotificationChannel>) {
        self.channels.insert(channel.id().to_string(), channel);
    }

    pub fn channel_ids(&self) -> Vec<&str> {
        let mut ids: Vec<&str> = self.channels.keys().map(String::as_str).collect();
        ids.sort_unstable();
        ids
    }

    async fn deliver(
        &self,
        channel_id: &str,
        notification: &Notification,
    ) -> Result<(), NotificationError> {
        let channel = self
            .channels
            .get(channel_id)
            .ok_or_else(|| NotificationError::UnknownChannel(channel_id.to_string()))?;

        match tokio::time::timeout(self.timeout, channel.send(notification)).await {
            Ok(result) => result,
            Err(_) => Err(NotificationError::Timeout(self.timeout)),
        }
    }

    /// Deliver one transition to the rule's channels
    ///
    /// Returns the logged attempts. Acknowledge and snooze transitions and
    /// snoozed instances produce no attempts.
    #[instrument(
        skip_all,
        fields(alert_id = transition.alert.id, transition = %transition.transition)
    )]
    pub async fn dispatch(
        &self,
        transition: &AlertTransition,
        rule: &AlertRule,
        now: DateTime<Utc>,
    ) -> Vec<NotificationLogEntry> {
        if !transition.transition.notifies() {
            return Vec::new();
        }
        if transition.alert.is_snoozed(now) {
            debug!("alert is snoozed, skipping notification");
            return Vec::new();
        }

        let notification = Notification::from_transition(transition, rule, now);

        let attempts = rule.channels.iter().map(|channel_id| {
            let notification = &notification;
            async move {
                let result = self.deliver(channel_id, notification).await;
                if let Err(err) = &result {
                    warn!(channel_id = %channel_id, "notification failed: {}", err);
                }
                NotificationLogEntry {
                    id: None,
                    alert_id: notification.alert_id,
                    channel_id: channel_id.clone(),
                    transition: notification.transition,
                    sent_at: now,
                    success: result.is_ok(),
                    error: result.err().map(|e| e.to_string()),
                }
            }
        });
        let results = futures::future::join_all(attempts).await;

        let mut logged = Vec::with_capacity(results.len());
        for mut entry in results {
            match self.backend.append_notification(entry.clone()).await {
                Ok(id) => entry.id = Some(id),
                Err(err) => warn!("failed to record notification attempt: {}", err),
            }
            logged.push(entry);
        }
        logged
    }
}
