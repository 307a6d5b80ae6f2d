pub mod webhook;

use async_trait::async_trait;
use tracing::info;

use crate::error::Result;

pub use webhook::WebhookNotifier;

/// Delivery channel for alert notifications.
#[async_trait]
pub trait NotificationSender: Send + Sync {
    async fn send(&self, recipients: &[String], subject: &str, body: &str) -> Result<()>;
}

/// Writes notifications to the log. Used when no webhook is configured.
#[derive(Debug, Default, Clone)]
pub struct LogNotifier;

#[async_trait]
impl NotificationSender for LogNotifier {
    async fn send(&self, recipients: &[String], subject: &str, body: &str) -> Result<()> {
        info!(recipients = ?recipients, subject, body, "Notification");
        Ok(())
    }
}
