use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::broadcast;
use tracing::debug;

pub const SENSOR_DATA: &str = "sensor-data";
pub const DEVICE_STATE: &str = "device-state";
pub const ALERT: &str = "alert";
pub const ALERT_RESOLVED: &str = "alert-resolved";

/// One event fanned out to every live-view subscriber.
#[derive(Debug, Clone, Serialize)]
pub struct BroadcastEvent {
    pub event: &'static str,
    pub payload: serde_json::Value,
    pub at: DateTime<Utc>,
}

/// Fire-and-forget fan-out to `/ws` subscribers.
///
/// Slow subscribers lag and drop events; publishers never wait.
#[derive(Clone)]
pub struct Broadcaster {
    tx: broadcast::Sender<BroadcastEvent>,
}

impl Default for Broadcaster {
    fn default() -> Self {
        Self::new(256)
    }
}

impl Broadcaster {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    pub fn push<T: Serialize>(&self, event: &'static str, payload: &T) {
        let payload = match serde_json::to_value(payload) {
            Ok(v) => v,
            Err(e) => {
                debug!(event, error = %e, "Dropping unserialisable broadcast payload");
                return;
            }
        };
        // Err only means nobody is listening.
        let _ = self.tx.send(BroadcastEvent {
            event,
            payload,
            at: Utc::now(),
        });
    }

    pub fn subscribe(&self) -> broadcast::Receiver<BroadcastEvent> {
        self.tx.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[tokio::test]
    async fn subscribers_receive_pushed_events() {
        let b = Broadcaster::default();
        let mut rx = b.subscribe();
        b.push(SENSOR_DATA, &json!({ "temperature": 21.5 }));

        let ev = rx.recv().await.unwrap();
        assert_eq!(ev.event, SENSOR_DATA);
        assert_eq!(ev.payload["temperature"], 21.5);
    }

    #[test]
    fn push_without_subscribers_is_harmless() {
        Broadcaster::default().push(ALERT, &json!({}));
    }
}
