use async_trait::async_trait;
use reqwest::Client;
use serde_json::json;
use tracing::{error, info, instrument};

use super::{Notification, NotificationChannel};
use crate::error::NotificationError;

/// POSTs a JSON payload to an arbitrary URL
#[derive(Debug, Clone)]
pub struct WebhookChannel {
    id: String,
    url: String,
    client: Client,
}

impl WebhookChannel {
    pub fn new(id: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            url: url.into(),
            client: Client::new(),
        }
    }
}

#[async_trait]
impl NotificationChannel for WebhookChannel {
    fn id(&self) -> &str {
        &self.id
    }

    #[instrument(skip_all, fields(channel = %self.id))]
    async fn send(&self, notification: &Notification) -> Result<(), NotificationError> {
        let payload = json!({
            "title": notification.title,
            "message": notification.body,
            "severity": notification.severity,
            "transition": notification.transition,
            "alert_id": notification.alert_id,
            "rule_id": notification.rule_id,
            "resource": notification.resource_id,
            "value": notification.value,
            "target": notification.target,
            "timestamp": notification.timestamp.to_rfc3339()
        });

        match self.client.post(&self.url).json(&payload).send().await {
            Ok(response) if response.status().is_success() => {
                info!("Successfully sent webhook alert");
                Ok(())
            }
            Ok(response) => {
                error!("Webhook alert failed with status: {}", response.status());
                Err(NotificationError::Delivery(format!(
                    "webhook returned {}",
                    response.status()
                )))
            }
            Err(e) => {
                error!("Failed to send webhook alert: {}", e);
                Err(NotificationError::Delivery(e.to_string()))
            }
        }
    }
}
