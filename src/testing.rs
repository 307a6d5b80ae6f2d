//! Test doubles for the outbound seams.

use std::time::Duration;

use async_trait::async_trait;
use uuid::Uuid;
use tokio::sync::Mutex;

use crate::{
    control::CommandPublisher,
    db::{
        models::{NewSensorRecord, SensorRecord},
        SensorStore,
    },
    error::{GreenhouseError, Result, StoreError},
    notify::NotificationSender,
};

/// Records every publish; optionally fails or stalls.
#[derive(Default)]
pub struct RecordingPublisher {
    sent: Mutex<Vec<(String, String)>>,
    fail: bool,
    delay: Option<Duration>,
}

impl RecordingPublisher {
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    pub fn stalling(delay: Duration) -> Self {
        Self {
            delay: Some(delay),
            ..Self::default()
        }
    }

    pub async fn published(&self) -> Vec<(String, String)> {
        self.sent.lock().await.clone()
    }
}

#[async_trait]
impl CommandPublisher for RecordingPublisher {
    async fn publish(&self, topic: &str, payload: &str) -> Result<()> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.sent
            .lock()
            .await
            .push((topic.to_owned(), payload.to_owned()));
        if self.fail {
            return Err(GreenhouseError::PublishFailure {
                topic: topic.to_owned(),
                reason: "broker unreachable".into(),
            });
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SentNotification {
    pub recipients: Vec<String>,
    pub subject: String,
    pub body: String,
}

/// Records every notification; optionally fails or hangs.
#[derive(Default)]
pub struct RecordingNotifier {
    sent: Mutex<Vec<SentNotification>>,
    fail: bool,
    delay: Option<Duration>,
}

impl RecordingNotifier {
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    pub fn hanging(delay: Duration) -> Self {
        Self {
            delay: Some(delay),
            ..Self::default()
        }
    }

    pub async fn sent(&self) -> Vec<SentNotification> {
        self.sent.lock().await.clone()
    }

    /// Background dispatch lands shortly after the alert; wait up to a
    /// second for `count` attempts.
    pub async fn wait_for(&self, count: usize) -> Vec<SentNotification> {
        for _ in 0..100 {
            let sent = self.sent().await;
            if sent.len() >= count {
                return sent;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        self.sent().await
    }
}

#[async_trait]
impl NotificationSender for RecordingNotifier {
    async fn send(&self, recipients: &[String], subject: &str, body: &str) -> Result<()> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.sent.lock().await.push(SentNotification {
            recipients: recipients.to_vec(),
            subject: subject.to_owned(),
            body: body.to_owned(),
        });
        if self.fail {
            return Err(GreenhouseError::Notification("relay unreachable".into()));
        }
        Ok(())
    }
}

/// Record table that rejects every call, as a dropped database would.
#[derive(Default)]
pub struct UnavailableRecords;

fn unavailable<T>() -> std::result::Result<T, StoreError> {
    Err(StoreError::Database(sqlx::Error::PoolTimedOut))
}

#[async_trait]
impl SensorStore for UnavailableRecords {
    async fn insert_record(&self, _: NewSensorRecord) -> std::result::Result<SensorRecord, StoreError> {
        unavailable()
    }

    async fn list_records(&self) -> std::result::Result<Vec<SensorRecord>, StoreError> {
        unavailable()
    }

    async fn recent_records(&self, _: i64) -> std::result::Result<Vec<SensorRecord>, StoreError> {
        unavailable()
    }

    async fn replace_records(
        &self,
        _: NewSensorRecord,
        _: &[Uuid],
    ) -> std::result::Result<SensorRecord, StoreError> {
        unavailable()
    }
}
