use std::{
    collections::{HashMap, VecDeque},
    sync::Arc,
};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use super::settings::AlertSettings;
use crate::{
    db::models::{AlertKind, AlertLevel},
    notify::NotificationSender,
};

/// Queue bound; the oldest entries are dropped first.
pub const MAX_PENDING: usize = 200;

/// One alert worth telling a human about.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Notification {
    pub kind: AlertKind,
    pub level: AlertLevel,
    pub message: String,
    pub at: DateTime<Utc>,
}

impl Notification {
    fn subject(&self) -> String {
        format!("[{}] Greenhouse {} alert", self.level, self.kind)
    }
}

#[derive(Default)]
struct BatchWindow {
    pending: VecDeque<Notification>,
    last_dispatch: HashMap<AlertKind, DateTime<Utc>>,
}

impl BatchWindow {
    fn queue(&mut self, n: Notification) {
        self.pending.push_back(n);
        self.trim();
    }

    fn trim(&mut self) {
        let excess = self.pending.len().saturating_sub(MAX_PENDING);
        if excess > 0 {
            self.pending.drain(..excess);
            warn!(dropped = excess, kept = MAX_PENDING, "Notification queue full; dropped oldest");
        }
    }
}

/// Rate-limits and coalesces alert notifications.
///
/// Delivery never runs under the queue lock, and unbatched sends run on
/// their own task so callers never wait on the relay.
pub struct NotificationBatcher {
    sender: Arc<dyn NotificationSender>,
    window: Arc<Mutex<BatchWindow>>,
}

impl NotificationBatcher {
    pub fn new(sender: Arc<dyn NotificationSender>) -> Self {
        Self {
            sender,
            window: Arc::new(Mutex::new(BatchWindow::default())),
        }
    }

    /// Queue `n`, or dispatch it in the background when batching is off
    /// and its category has not been dispatched within the current window.
    pub async fn enqueue(&self, n: Notification, settings: &AlertSettings, now: DateTime<Utc>) {
        if !settings.email_alerts.enabled(n.kind) {
            debug!(kind = %n.kind, "Notifications disabled for category");
            return;
        }
        if settings.recipients.is_empty() {
            debug!(kind = %n.kind, "No alert recipients configured");
            return;
        }

        {
            let mut window = self.window.lock().await;
            let recently_sent = window
                .last_dispatch
                .get(&n.kind)
                .is_some_and(|last| now - *last < settings.window());
            if settings.batch_alerts || recently_sent {
                window.queue(n);
                return;
            }
            // claim the slot now so a burst of the same category sends once
            window.last_dispatch.insert(n.kind, now);
        }

        let sender = self.sender.clone();
        let window = self.window.clone();
        let recipients = settings.recipients.clone();
        tokio::spawn(async move {
            match sender.send(&recipients, &n.subject(), &n.message).await {
                Ok(()) => {
                    info!(kind = %n.kind, recipients = recipients.len(), "Alert notification sent");
                }
                Err(e) => {
                    warn!(kind = %n.kind, error = %e, "Alert notification failed; queued for next window");
                    window.lock().await.queue(n);
                }
            }
        });
    }

    /// Coalesce everything pending into one notification.
    ///
    /// Returns how many alerts were delivered.
    pub async fn flush(&self, settings: &AlertSettings, now: DateTime<Utc>) -> usize {
        let pending: Vec<Notification> = {
            let mut window = self.window.lock().await;
            if window.pending.is_empty() {
                return 0;
            }
            window
                .pending
                .drain(..)
                .filter(|n| settings.email_alerts.enabled(n.kind))
                .collect()
        };
        if pending.is_empty() || settings.recipients.is_empty() {
            debug!(dropped = pending.len(), "Discarding pending notifications");
            return 0;
        }

        let subject = format!("Greenhouse: {} alert(s)", pending.len());
        let body = pending
            .iter()
            .map(|n| format!("{} [{}] {}", n.at.format("%Y-%m-%d %H:%M:%S UTC"), n.level, n.message))
            .collect::<Vec<_>>()
            .join("\n");

        let sent = self.sender.send(&settings.recipients, &subject, &body).await;
        let mut window = self.window.lock().await;
        match sent {
            Ok(()) => {
                for n in &pending {
                    window.last_dispatch.insert(n.kind, now);
                }
                info!(alerts = pending.len(), "Batched alert notification sent");
                pending.len()
            }
            Err(e) => {
                warn!(alerts = pending.len(), error = %e, "Batched notification failed; keeping queue");
                let newer = std::mem::replace(&mut window.pending, pending.into());
                window.pending.extend(newer);
                window.trim();
                0
            }
        }
    }

    pub async fn pending(&self) -> usize {
        self.window.lock().await.pending.len()
    }
}

#[cfg(test)]
mod tests {
    use chrono::Duration;

    use super::*;
    use crate::testing::RecordingNotifier;

    fn settings(batch: bool) -> AlertSettings {
        AlertSettings {
            recipients: vec!["ops@example.com".into()],
            batch_alerts: batch,
            ..AlertSettings::default()
        }
    }

    fn note(kind: AlertKind, message: &str, at: DateTime<Utc>) -> Notification {
        Notification {
            kind,
            level: AlertLevel::High,
            message: message.into(),
            at,
        }
    }

    #[tokio::test]
    async fn batching_coalesces_into_one_notification() {
        let sender = Arc::new(RecordingNotifier::default());
        let batcher = NotificationBatcher::new(sender.clone());
        let s = settings(true);
        let now = Utc::now();

        batcher.enqueue(note(AlertKind::Temperature, "too hot", now), &s, now).await;
        batcher.enqueue(note(AlertKind::Humidity, "too dry", now), &s, now).await;
        batcher.enqueue(note(AlertKind::WaterLevel, "tank empty", now), &s, now).await;
        assert!(sender.sent().await.is_empty());
        assert_eq!(batcher.pending().await, 3);

        assert_eq!(batcher.flush(&s, now + Duration::minutes(5)).await, 3);

        let sent = sender.sent().await;
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].recipients, vec!["ops@example.com"]);
        assert!(sent[0].body.contains("too hot"));
        assert!(sent[0].body.contains("tank empty"));
        assert_eq!(batcher.pending().await, 0);
    }

    #[tokio::test]
    async fn unbatched_category_is_rate_limited_per_window() {
        let sender = Arc::new(RecordingNotifier::default());
        let batcher = NotificationBatcher::new(sender.clone());
        let s = settings(false);
        let now = Utc::now();

        batcher.enqueue(note(AlertKind::Temperature, "first", now), &s, now).await;
        assert_eq!(sender.wait_for(1).await[0].body, "first");

        let later = now + Duration::minutes(1);
        batcher.enqueue(note(AlertKind::Temperature, "second", later), &s, later).await;
        // other categories are not held back
        batcher.enqueue(note(AlertKind::Humidity, "humid", later), &s, later).await;

        let sent = sender.wait_for(2).await;
        assert_eq!(sent.len(), 2);
        assert_eq!(sent[1].body, "humid");
        assert_eq!(batcher.pending().await, 1);

        batcher.flush(&s, now + Duration::minutes(5)).await;
        assert!(sender.sent().await[2].body.contains("second"));
    }

    #[tokio::test]
    async fn unbatched_send_does_not_wait_for_the_relay() {
        let sender = Arc::new(RecordingNotifier::hanging(std::time::Duration::from_secs(30)));
        let batcher = NotificationBatcher::new(sender.clone());
        let s = settings(false);
        let now = Utc::now();

        let queued = tokio::time::timeout(
            std::time::Duration::from_secs(1),
            batcher.enqueue(note(AlertKind::Temperature, "too hot", now), &s, now),
        )
        .await;
        assert!(queued.is_ok());

        // the queue stays usable while the send is in flight
        let pending = tokio::time::timeout(std::time::Duration::from_secs(1), batcher.pending()).await;
        assert_eq!(pending.unwrap(), 0);
    }

    #[tokio::test]
    async fn failed_unbatched_send_is_queued_for_the_window() {
        let sender = Arc::new(RecordingNotifier::failing());
        let batcher = NotificationBatcher::new(sender.clone());
        let s = settings(false);
        let now = Utc::now();

        batcher.enqueue(note(AlertKind::System, "boom", now), &s, now).await;
        sender.wait_for(1).await;
        for _ in 0..100 {
            if batcher.pending().await == 1 {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        assert_eq!(batcher.pending().await, 1);
    }

    #[tokio::test]
    async fn outage_keeps_queue_bounded() {
        let sender = Arc::new(RecordingNotifier::failing());
        let batcher = NotificationBatcher::new(sender.clone());
        let s = settings(true);
        let now = Utc::now();

        for i in 0..MAX_PENDING + 5 {
            batcher
                .enqueue(note(AlertKind::Temperature, &format!("alert #{i};"), now), &s, now)
                .await;
        }
        assert_eq!(batcher.pending().await, MAX_PENDING);

        assert_eq!(batcher.flush(&s, now).await, 0);
        batcher.enqueue(note(AlertKind::Humidity, "alert #late;", now), &s, now).await;
        assert_eq!(batcher.pending().await, MAX_PENDING);

        let sent = sender.sent().await;
        assert!(!sent[0].body.contains("alert #0;"));
        assert!(sent[0].body.contains("alert #5;"));

        batcher.flush(&s, now).await;
        let retried = &sender.sent().await[1].body;
        assert!(!retried.contains("alert #5;"));
        assert!(retried.contains("alert #late;"));
    }

    #[tokio::test]
    async fn disabled_category_and_missing_recipients_skip_dispatch() {
        let sender = Arc::new(RecordingNotifier::default());
        let batcher = NotificationBatcher::new(sender.clone());
        let now = Utc::now();

        let mut s = settings(false);
        s.email_alerts.humidity = false;
        batcher.enqueue(note(AlertKind::Humidity, "humid", now), &s, now).await;

        let nobody = AlertSettings {
            batch_alerts: false,
            ..AlertSettings::default()
        };
        batcher.enqueue(note(AlertKind::System, "boom", now), &nobody, now).await;

        assert!(sender.sent().await.is_empty());
        assert_eq!(batcher.pending().await, 0);
    }

    #[tokio::test]
    async fn flush_with_empty_queue_sends_nothing() {
        let sender = Arc::new(RecordingNotifier::default());
        let batcher = NotificationBatcher::new(sender.clone());
        assert_eq!(batcher.flush(&settings(true), Utc::now()).await, 0);
        assert!(sender.sent().await.is_empty());
    }
}
