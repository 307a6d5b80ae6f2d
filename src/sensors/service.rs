use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, info};
use utoipa::ToSchema;

use crate::{
    alerts::AlertEngine,
    automation::{AutomationAction, AutomationEngine, DataProcessingPause},
    broadcast::{Broadcaster, SENSOR_DATA},
    db::{
        models::{NewSensorRecord, SensorKind, SensorRecord},
        SensorStore,
    },
    error::{GreenhouseError, Result},
    reading_cache::ReadingCache,
};

/// What one accepted reading produced.
#[derive(Debug, Clone, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct IngestOutcome {
    pub record: SensorRecord,
    /// Written when the buffer held every core kind.
    pub composite: Option<SensorRecord>,
    pub actions: Vec<AutomationAction>,
}

/// Parse a bare numeric payload. Anything else is an invalid reading.
pub fn parse_reading(kind: SensorKind, raw: &str) -> Result<f64> {
    raw.trim()
        .parse::<f64>()
        .ok()
        .filter(|v| v.is_finite())
        .ok_or_else(|| GreenhouseError::InvalidReading {
            kind: kind.to_string(),
            payload: raw.to_owned(),
        })
}

/// Entry point for every inbound reading, from MQTT or HTTP.
#[derive(Clone)]
pub struct SensorService {
    store: Arc<dyn SensorStore>,
    cache: ReadingCache,
    alerts: AlertEngine,
    automation: AutomationEngine,
    pause: DataProcessingPause,
    broadcaster: Broadcaster,
}

impl SensorService {
    pub fn new(
        store: Arc<dyn SensorStore>,
        cache: ReadingCache,
        alerts: AlertEngine,
        automation: AutomationEngine,
        pause: DataProcessingPause,
        broadcaster: Broadcaster,
    ) -> Self {
        Self {
            store,
            cache,
            alerts,
            automation,
            pause,
            broadcaster,
        }
    }

    pub fn cache(&self) -> &ReadingCache {
        &self.cache
    }

    /// Buffer, persist and act on one reading.
    ///
    /// Fails only for an unparseable payload (nothing changes) or when the
    /// partial record cannot be written. Later failures are reported as
    /// system alerts and the reading still counts as ingested.
    pub async fn ingest(&self, kind: SensorKind, raw: &str, arrived_at: DateTime<Utc>) -> Result<IngestOutcome> {
        let value = parse_reading(kind, raw)?;

        self.cache.update(kind, value, arrived_at).await;
        let record = self
            .store
            .insert_record(NewSensorRecord::partial(kind, value, arrived_at))
            .await?;
        debug!(kind = %kind, value, seq = record.seq, "Partial record written");

        let composite = match self.cache.core_snapshot(arrived_at).await {
            Some(snapshot) => {
                if let Err(e) = self.alerts.check_sensor_thresholds_at(&snapshot, arrived_at).await {
                    self.alerts
                        .handle_system_error(&format!("threshold check failed: {e}"), "alerts")
                        .await;
                }

                let _paused = self.pause.hold();
                match self
                    .store
                    .insert_record(NewSensorRecord::composite(snapshot, arrived_at))
                    .await
                {
                    Ok(record) => Some(record),
                    Err(e) => {
                        self.alerts
                            .handle_system_error(&format!("composite write failed: {e}"), "ingest")
                            .await;
                        None
                    }
                }
            }
            None => None,
        };

        let actions = self.automation.process_sensor_data(kind, value).await;
        if !actions.is_empty() {
            info!(kind = %kind, value, actions = actions.len(), "Reading triggered automation");
        }

        self.broadcaster
            .push(SENSOR_DATA, composite.as_ref().unwrap_or(&record));

        Ok(IngestOutcome {
            record,
            composite,
            actions,
        })
    }
}
