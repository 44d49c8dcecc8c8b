use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;
use tracing::{error, info, instrument};

use super::{Notification, NotificationChannel};
use crate::alerts::{Severity, Transition};
use crate::error::NotificationError;

const RED: u32 = 15158332;
const ORANGE: u32 = 15105570;
const GREEN: u32 = 3066993;
const LIGHT_BLUE: u32 = 5793266;

#[derive(Debug, Clone, Serialize)]
pub struct Message {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub embeds: Vec<Embed>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Embed {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub color: Option<u32>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub fields: Vec<EmbedField>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub footer: Option<EmbedFooter>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct EmbedField {
    pub name: String,
    pub value: String,
    pub inline: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct EmbedFooter {
    pub text: String,
}

#[derive(Default)]
pub struct MessageBuilder {
    content: Option<String>,
    embeds: Vec<Embed>,
}

impl MessageBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn content(mut self, content: impl ToString) -> Self {
        self.content = Some(content.to_string());
        self
    }

    pub fn add_embed(mut self, embed: Embed) -> Self {
        self.embeds.push(embed);
        self
    }

    pub fn build(self) -> Message {
        Message {
            content: self.content,
            embeds: self.embeds,
        }
    }
}

fn color_for(notification: &Notification) -> u32 {
    match (notification.transition, notification.severity) {
        (Transition::Resolved, _) => GREEN,
        (_, Severity::Critical) => RED,
        (_, Severity::Warning) => ORANGE,
        (_, Severity::Info) => LIGHT_BLUE,
    }
}

/// Builds the embed posted for a notification
pub fn build_embed(notification: &Notification) -> Embed {
    let mut fields = vec![
        EmbedField {
            name: "🖥️ Resource".to_string(),
            value: notification.resource_id.clone(),
            inline: true,
        },
        EmbedField {
            name: "⚠️ Severity".to_string(),
            value: notification.severity.to_string(),
            inline: true,
        },
    ];
    if let Some(value) = &notification.value {
        fields.push(EmbedField {
            name: "📊 Value".to_string(),
            value: match value.as_f64() {
                Some(n) => format!("{:.1}", n),
                None => serde_json::to_string(value).unwrap_or_default(),
            },
            inline: true,
        });
    }

    Embed {
        title: Some(notification.title.clone()),
        description: Some(notification.body.clone()),
        color: Some(color_for(notification)),
        fields,
        footer: Some(EmbedFooter {
            text: format!("Rule: {} | Alert #{}", notification.rule_id, notification.alert_id),
        }),
        timestamp: Some(notification.timestamp.to_rfc3339()),
    }
}

/// Discord webhook with an optional user mention
#[derive(Debug, Clone)]
pub struct DiscordChannel {
    id: String,
    url: String,
    user_id: Option<String>,
    client: Client,
}

impl DiscordChannel {
    pub fn new(id: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            url: url.into(),
            user_id: None,
            client: Client::new(),
        }
    }

    pub fn with_user(mut self, user_id: Option<String>) -> Self {
        self.user_id = user_id;
        self
    }

    pub fn build_message(&self, notification: &Notification) -> Message {
        let mut builder = MessageBuilder::new();
        if let Some(user) = notification.target.as_ref().or(self.user_id.as_ref()) {
            builder = builder.content(format!("<@{}>", user));
        }
        builder.add_embed(build_embed(notification)).build()
    }
}

#[async_trait]
impl NotificationChannel for DiscordChannel {
    fn id(&self) -> &str {
        &self.id
    }

    #[instrument(skip_all, fields(channel = %self.id))]
    async fn send(&self, notification: &Notification) -> Result<(), NotificationError> {
        let message = self.build_message(notification);

        match self.client.post(&self.url).json(&message).send().await {
            Ok(response) if response.status().is_success() => {
                info!("Successfully sent Discord message");
                Ok(())
            }
            Ok(response) => {
                let status = response.status();
                error!("Discord message failed with status: {}", status);
                let detail = response.text().await.unwrap_or_default();
                if !detail.is_empty() {
                    error!("Discord API error response: {}", detail);
                }
                Err(NotificationError::Delivery(format!("discord returned {}", status)))
            }
            Err(e) => {
                error!("Failed to send Discord message: {}", e);
                Err(NotificationError::Delivery(e.to_string()))
            }
        }
    }
}
