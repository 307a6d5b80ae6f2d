use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rumqttc::{AsyncClient, Event, EventLoop, MqttOptions, Packet, QoS};
use tokio::{sync::mpsc, task::JoinHandle, time};
use tracing::{debug, error, info, warn};

use super::topics::sensor_filter;
use crate::{
    config::MqttConfig,
    control::CommandPublisher,
    error::{GreenhouseError, Result},
};

const MAX_BACKOFF: Duration = Duration::from_secs(30);

/// One publish received from the broker.
#[derive(Debug, Clone)]
pub struct InboundMessage {
    pub topic: String,
    pub payload: String,
    pub arrived_at: DateTime<Utc>,
}

/// Connect options and client for the configured broker.
///
/// The returned event loop does nothing until it is polled; hand it to
/// [`spawn_event_loop`].
pub fn connect(config: &MqttConfig) -> (AsyncClient, EventLoop) {
    let mut options = MqttOptions::new(&config.client_id, &config.host, config.port);
    options.set_keep_alive(Duration::from_secs(30));
    if let Some((user, pass)) = &config.credentials {
        options.set_credentials(user, pass);
    }
    AsyncClient::new(options, 64)
}

/// Drives the rumqttc event loop and forwards sensor publishes into `tx`.
///
/// Subscribes on every `ConnAck`, so a reconnect restores the subscription.
/// Connection errors back off exponentially up to 30s. Ends when the
/// receiving side is dropped.
pub fn spawn_event_loop(
    mut eventloop: EventLoop,
    client: AsyncClient,
    topic_prefix: &str,
    tx: mpsc::Sender<InboundMessage>,
) -> JoinHandle<()> {
    let filter = sensor_filter(topic_prefix);
    tokio::spawn(async move {
        let mut backoff = Duration::from_secs(1);
        loop {
            match eventloop.poll().await {
                Ok(Event::Incoming(Packet::ConnAck(_))) => {
                    backoff = Duration::from_secs(1);
                    info!(filter = %filter, "Connected to MQTT broker");
                    if let Err(e) = client.try_subscribe(filter.as_str(), QoS::AtLeastOnce) {
                        error!(filter = %filter, error = %e, "Failed to subscribe");
                    }
                }
                Ok(Event::Incoming(Packet::Publish(publish))) => {
                    let msg = InboundMessage {
                        topic: publish.topic.clone(),
                        payload: String::from_utf8_lossy(&publish.payload).into_owned(),
                        arrived_at: Utc::now(),
                    };
                    if tx.send(msg).await.is_err() {
                        info!("Inbound channel closed; MQTT event loop stopping");
                        break;
                    }
                }
                Ok(_) => {}
                Err(e) => {
                    warn!(error = %e, retry_in_secs = backoff.as_secs(), "MQTT connection error");
                    time::sleep(backoff).await;
                    backoff = (backoff * 2).min(MAX_BACKOFF);
                }
            }
        }
    })
}

/// Publishes device commands without waiting on the broker.
///
/// `try_publish` only queues the request, so a slow or unreachable broker
/// surfaces as a full queue rather than a stalled caller.
#[derive(Clone)]
pub struct MqttPublisher {
    client: AsyncClient,
}

impl MqttPublisher {
    pub fn new(client: AsyncClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl CommandPublisher for MqttPublisher {
    async fn publish(&self, topic: &str, payload: &str) -> Result<()> {
        self.client
            .try_publish(topic, QoS::AtLeastOnce, false, payload.as_bytes().to_vec())
            .map_err(|e| GreenhouseError::PublishFailure {
                topic: topic.to_owned(),
                reason: e.to_string(),
            })?;
        debug!(topic, payload, "Command queued");
        Ok(())
    }
}
