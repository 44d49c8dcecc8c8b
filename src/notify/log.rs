use async_trait::async_trait;
use tracing::{info, warn};

use super::{Notification, NotificationChannel};
use crate::alerts::Transition;
use crate::error::NotificationError;

/// Writes notifications to the hub's own log
#[derive(Debug, Clone)]
pub struct LogChannel {
    id: String,
}

impl LogChannel {
    pub fn new(id: impl Into<String>) -> Self {
        Self { id: id.into() }
    }
}

#[async_trait]
impl NotificationChannel for LogChannel {
    fn id(&self) -> &str {
        &self.id
    }

    async fn send(&self, notification: &Notification) -> Result<(), NotificationError> {
        match notification.transition {
            Transition::Resolved => info!(
                channel = %self.id,
                alert_id = notification.alert_id,
                "{}: {}",
                notification.title,
                notification.body
            ),
            _ => warn!(
                channel = %self.id,
                alert_id = notification.alert_id,
                severity = %notification.severity,
                "{}: {}",
                notification.title,
                notification.body
            ),
        }
        Ok(())
    }
}
