pub mod client;
pub mod topics;

use tokio::sync::mpsc;
use tracing::{debug, info, warn};

pub use client::{connect, spawn_event_loop, InboundMessage, MqttPublisher};

use crate::{
    alerts::AlertEngine,
    db::models::SensorKind,
    error::Result,
    sensors::{IngestOutcome, SensorService},
};

/// Route one inbound message to the ingest path.
///
/// Topics outside `<prefix>/sensors/` are ignored.
pub async fn handle_message(
    sensors: &SensorService,
    topic_prefix: &str,
    msg: &InboundMessage,
) -> Result<Option<IngestOutcome>> {
    let Some(name) = topics::sensor_name(topic_prefix, &msg.topic) else {
        debug!(topic = %msg.topic, "Ignoring message outside the sensor namespace");
        return Ok(None);
    };
    let kind: SensorKind = name.parse()?;
    sensors.ingest(kind, &msg.payload, msg.arrived_at).await.map(Some)
}

/// Consumes inbound messages one at a time, preserving arrival order.
///
/// Never returns an error: bad input is logged and dropped, anything else
/// becomes a system alert. Spawn this via `tokio::spawn`.
pub async fn run_consumer(
    mut rx: mpsc::Receiver<InboundMessage>,
    topic_prefix: String,
    sensors: SensorService,
    alerts: AlertEngine,
) {
    info!(prefix = %topic_prefix, "Sensor consumer started");
    while let Some(msg) = rx.recv().await {
        match handle_message(&sensors, &topic_prefix, &msg).await {
            Ok(_) => {}
            Err(e) if e.is_input_error() => {
                warn!(topic = %msg.topic, payload = %msg.payload, error = %e, "Dropping reading");
            }
            Err(e) => {
                alerts.handle_system_error(&e.to_string(), "ingest").await;
            }
        }
    }
    info!("Sensor consumer stopped");
}
