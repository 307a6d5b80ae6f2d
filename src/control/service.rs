use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use chrono::Utc;
use tokio::time;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::{
    broadcast::{Broadcaster, DEVICE_STATE},
    db::{
        models::{ControlSource, DeviceAction, DeviceHistory, DeviceState, DeviceType},
        DeviceStore,
    },
    error::{GreenhouseError, Result},
    mqtt::topics::control_topic,
};

/// Bound on handing one command to the broker.
pub const DEFAULT_PUBLISH_TIMEOUT: Duration = Duration::from_secs(5);

/// Outbound command channel to the actuators.
///
/// Implementations fail with `GreenhouseError::PublishFailure`.
#[async_trait]
pub trait CommandPublisher: Send + Sync {
    async fn publish(&self, topic: &str, payload: &str) -> Result<()>;
}

/// One command, as requested by automation or an operator.
#[derive(Debug, Clone)]
pub struct ControlRequest {
    pub device: DeviceType,
    pub action: DeviceAction,
    pub source: ControlSource,
    pub reason: String,
    pub triggering_value: Option<f64>,
}

/// Publishes device commands and records their outcome.
#[derive(Clone)]
pub struct DeviceController {
    publisher: Arc<dyn CommandPublisher>,
    store: Arc<dyn DeviceStore>,
    broadcaster: Broadcaster,
    topic_prefix: String,
}

impl DeviceController {
    pub fn new(
        publisher: Arc<dyn CommandPublisher>,
        store: Arc<dyn DeviceStore>,
        broadcaster: Broadcaster,
        topic_prefix: impl Into<String>,
    ) -> Self {
        Self {
            publisher,
            store,
            broadcaster,
            topic_prefix: topic_prefix.into(),
        }
    }

    pub fn control_topic(&self, device: DeviceType) -> String {
        control_topic(&self.topic_prefix, device)
    }

    /// Automation entry point.
    pub async fn control_device(
        &self,
        device: DeviceType,
        action: DeviceAction,
        reason: &str,
        triggering_value: Option<f64>,
        publish_timeout: Duration,
    ) -> Result<()> {
        let req = ControlRequest {
            device,
            action,
            source: ControlSource::Automation,
            reason: reason.to_owned(),
            triggering_value,
        };
        self.execute_within(req, publish_timeout).await
    }

    pub async fn execute(&self, req: ControlRequest) -> Result<()> {
        self.execute_within(req, DEFAULT_PUBLISH_TIMEOUT).await
    }

    /// Publish one command. Never retried here.
    ///
    /// `publish_timeout` bounds the publish alone; history and the status
    /// mirror are written whatever the outcome. A failed or timed out
    /// publish is recorded in history and returned. Store failures after a
    /// delivered command are only logged.
    async fn execute_within(&self, req: ControlRequest, publish_timeout: Duration) -> Result<()> {
        let topic = self.control_topic(req.device);
        let status = req.action.status();
        let published = time::timeout(publish_timeout, self.publisher.publish(&topic, req.action.payload()))
            .await
            .unwrap_or(Err(GreenhouseError::Timeout {
                operation: "command publish",
            }));
        let now = Utc::now();

        let entry = DeviceHistory {
            id: Uuid::new_v4(),
            device_type: req.device,
            action: req.action,
            status,
            source: req.source,
            reason: Some(req.reason.clone()),
            sensor_value: req.triggering_value,
            success: published.is_ok(),
            error_message: published.as_ref().err().map(ToString::to_string),
            created_at: now,
        };
        if let Err(e) = self.store.insert_history(&entry).await {
            warn!(device = %req.device, error = %e, "Failed to record device history");
        }

        if let Err(e) = published {
            error!(device = %req.device, action = %req.action, topic = %topic, error = %e, "Device command not delivered");
            return Err(e);
        }

        let state = DeviceState {
            device_type: req.device,
            status,
            last_triggered_at: now,
            last_sensor_value: req.triggering_value,
            last_trigger_reason: Some(req.reason),
        };
        if let Err(e) = self.store.upsert_device_state(&state).await {
            warn!(device = %req.device, error = %e, "Failed to mirror device status");
        }
        self.broadcaster.push(DEVICE_STATE, &state);

        info!(
            device = %req.device,
            action = %req.action,
            source = ?req.source,
            value = ?req.triggering_value,
            "Device command sent"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        db::memory::MemoryStore,
        error::StoreError,
        testing::RecordingPublisher,
    };

    /// Device table whose writes take `delay` to land.
    struct SlowDevices {
        inner: MemoryStore,
        delay: Duration,
    }

    #[async_trait]
    impl DeviceStore for SlowDevices {
        async fn upsert_device_state(&self, state: &DeviceState) -> Result<(), StoreError> {
            time::sleep(self.delay).await;
            self.inner.upsert_device_state(state).await
        }

        async fn device_states(&self) -> Result<Vec<DeviceState>, StoreError> {
            self.inner.device_states().await
        }

        async fn insert_history(&self, entry: &DeviceHistory) -> Result<(), StoreError> {
            time::sleep(self.delay).await;
            self.inner.insert_history(entry).await
        }

        async fn recent_history(&self, limit: i64) -> Result<Vec<DeviceHistory>, StoreError> {
            self.inner.recent_history(limit).await
        }
    }

    fn controller(publisher: Arc<RecordingPublisher>, store: Arc<MemoryStore>) -> DeviceController {
        DeviceController::new(publisher, store, Broadcaster::default(), "greenhouse")
    }

    #[tokio::test]
    async fn publishes_canonical_payload_on_device_topic() {
        let publisher = Arc::new(RecordingPublisher::default());
        let store = Arc::new(MemoryStore::new());
        let ctl = controller(publisher.clone(), store.clone());

        ctl.control_device(DeviceType::Window, DeviceAction::Open, "too hot", Some(31.0), DEFAULT_PUBLISH_TIMEOUT)
            .await
            .unwrap();

        assert_eq!(
            publisher.published().await,
            vec![("greenhouse/devices/window/control".to_owned(), "1".to_owned())]
        );

        let mirror = store.device_states().await.unwrap();
        assert_eq!(mirror.len(), 1);
        assert!(mirror[0].status);
        assert_eq!(mirror[0].last_sensor_value, Some(31.0));

        let history = store.recent_history(10).await.unwrap();
        assert!(history[0].success);
        assert_eq!(history[0].source, ControlSource::Automation);
    }

    #[tokio::test]
    async fn failed_publish_records_failure_and_keeps_mirror() {
        let publisher = Arc::new(RecordingPublisher::failing());
        let store = Arc::new(MemoryStore::new());
        let ctl = controller(publisher, store.clone());

        let err = ctl
            .control_device(DeviceType::Pump, DeviceAction::On, "soil dry", Some(0.0), DEFAULT_PUBLISH_TIMEOUT)
            .await
            .unwrap_err();

        assert!(matches!(err, crate::error::GreenhouseError::PublishFailure { .. }));
        let history = store.recent_history(10).await.unwrap();
        assert_eq!(history.len(), 1);
        assert!(!history[0].success);
        assert!(history[0].error_message.is_some());
        assert!(store.device_states().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn delivered_command_is_broadcast() {
        let publisher = Arc::new(RecordingPublisher::default());
        let broadcaster = Broadcaster::default();
        let mut rx = broadcaster.subscribe();
        let ctl = DeviceController::new(
            publisher,
            Arc::new(MemoryStore::new()),
            broadcaster,
            "greenhouse",
        );

        ctl.execute(ControlRequest {
            device: DeviceType::Light,
            action: DeviceAction::Off,
            source: ControlSource::Manual,
            reason: "operator".into(),
            triggering_value: None,
        })
        .await
        .unwrap();

        let ev = rx.recv().await.unwrap();
        assert_eq!(ev.event, DEVICE_STATE);
        assert_eq!(ev.payload["deviceType"], "light");
        assert_eq!(ev.payload["status"], false);
    }

    #[tokio::test]
    async fn slow_bookkeeping_does_not_void_a_delivered_command() {
        let publisher = Arc::new(RecordingPublisher::default());
        let store = Arc::new(SlowDevices {
            inner: MemoryStore::new(),
            delay: Duration::from_millis(100),
        });
        let ctl = DeviceController::new(publisher.clone(), store.clone(), Broadcaster::default(), "greenhouse");

        ctl.control_device(DeviceType::Door, DeviceAction::Open, "too hot", Some(33.0), Duration::from_millis(20))
            .await
            .unwrap();

        assert_eq!(publisher.published().await.len(), 1);
        assert!(store.recent_history(10).await.unwrap()[0].success);
        assert!(store.device_states().await.unwrap()[0].status);
    }

    #[tokio::test]
    async fn stalled_publish_is_recorded_as_timeout() {
        let publisher = Arc::new(RecordingPublisher::stalling(Duration::from_secs(1)));
        let store = Arc::new(MemoryStore::new());
        let ctl = controller(publisher, store.clone());

        let err = ctl
            .control_device(DeviceType::Light, DeviceAction::On, "dark", Some(0.0), Duration::from_millis(20))
            .await
            .unwrap_err();

        assert!(matches!(err, GreenhouseError::Timeout { .. }));
        let history = store.recent_history(10).await.unwrap();
        assert_eq!(history.len(), 1);
        assert!(!history[0].success);
        assert!(store.device_states().await.unwrap().is_empty());
    }
}
