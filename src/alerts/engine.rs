use std::{sync::Arc, time::Duration};

use chrono::{DateTime, Utc};
use tokio::{sync::{Mutex, RwLock}, time};
use tracing::{error, info, warn};
use uuid::Uuid;

use super::{
    batcher::{Notification, NotificationBatcher},
    settings::{AlertSettings, Band},
};
use crate::{
    broadcast::{Broadcaster, ALERT, ALERT_RESOLVED},
    db::{
        models::{Alert, AlertKind, AlertLevel, SensorKind, SensorValues},
        AlertStore, SettingsStore,
    },
    error::{GreenhouseError, Result},
    notify::NotificationSender,
};

/// What one threshold check did to the alert table.
#[derive(Debug, Clone, PartialEq)]
pub enum AlertTransition {
    Opened(Alert),
    Updated { id: Uuid, value: f64 },
    Resolved { id: Uuid },
}

/// Threshold evaluation, alert bookkeeping and notification dispatch.
#[derive(Clone)]
pub struct AlertEngine {
    inner: Arc<Inner>,
}

struct Inner {
    store: Arc<dyn AlertStore>,
    settings_store: Arc<dyn SettingsStore>,
    settings: RwLock<AlertSettings>,
    batcher: NotificationBatcher,
    broadcaster: Broadcaster,
    check_lock: Mutex<()>,
}

impl AlertEngine {
    pub fn new(
        store: Arc<dyn AlertStore>,
        settings_store: Arc<dyn SettingsStore>,
        sender: Arc<dyn NotificationSender>,
        broadcaster: Broadcaster,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                store,
                settings_store,
                settings: RwLock::new(AlertSettings::default()),
                batcher: NotificationBatcher::new(sender),
                broadcaster,
                check_lock: Mutex::new(()),
            }),
        }
    }

    // -----------------------------------------------------------------------
    // Settings
    // -----------------------------------------------------------------------

    /// Load persisted settings; on first start seed defaults with `recipients`.
    pub async fn load_settings(&self, recipients: &[String]) -> Result<AlertSettings> {
        let settings = match self.inner.settings_store.load_alert_settings().await? {
            Some(settings) => settings,
            None => {
                let settings = AlertSettings {
                    recipients: recipients.to_vec(),
                    ..AlertSettings::default()
                };
                self.inner.settings_store.save_alert_settings(&settings).await?;
                info!(recipients = settings.recipients.len(), "Seeded default alert settings");
                settings
            }
        };
        *self.inner.settings.write().await = settings.clone();
        Ok(settings)
    }

    pub async fn settings(&self) -> AlertSettings {
        self.inner.settings.read().await.clone()
    }

    pub async fn update_settings(&self, settings: AlertSettings) -> Result<AlertSettings> {
        for (name, band) in [
            ("temperature", settings.temperature),
            ("humidity", settings.humidity),
            ("soilMoisture", settings.soil_moisture),
            ("waterLevel", settings.water_level),
        ] {
            if !(band.min.is_finite() && band.max.is_finite() && band.min <= band.max) {
                return Err(GreenhouseError::InvalidSettings(format!(
                    "{name} band must satisfy min <= max"
                )));
            }
        }
        self.inner.settings_store.save_alert_settings(&settings).await?;
        *self.inner.settings.write().await = settings.clone();
        Ok(settings)
    }

    // -----------------------------------------------------------------------
    // Threshold checks
    // -----------------------------------------------------------------------

    pub async fn check_sensor_thresholds(&self, snapshot: &SensorValues) -> Result<Vec<AlertTransition>> {
        self.check_sensor_thresholds_at(snapshot, Utc::now()).await
    }

    /// Evaluate the core sensors in `snapshot`; absent values are skipped.
    ///
    /// Checks never interleave, so a burst of readings opens at most one
    /// alert per category.
    pub async fn check_sensor_thresholds_at(
        &self,
        snapshot: &SensorValues,
        now: DateTime<Utc>,
    ) -> Result<Vec<AlertTransition>> {
        let _check = self.inner.check_lock.lock().await;
        let settings = self.settings().await;
        let mut transitions = Vec::new();

        for sensor in SensorKind::CORE {
            let (Some(value), Some(band), Some(kind)) = (
                snapshot.get(sensor),
                settings.band(sensor),
                AlertKind::for_sensor(sensor),
            ) else {
                continue;
            };

            let open = self.inner.store.open_alert(kind).await?;
            match (band.contains(value), open) {
                (false, None) => {
                    let alert = new_threshold_alert(kind, sensor, value, band, now);
                    self.inner.store.insert_alert(&alert).await?;
                    warn!(kind = %kind, value, level = %alert.level, "Alert opened");
                    self.inner.broadcaster.push(ALERT, &alert);
                    self.notify(&alert, &settings, now).await;
                    transitions.push(AlertTransition::Opened(alert));
                }
                (false, Some(open)) => {
                    self.inner.store.touch_alert(open.id, value, now).await?;
                    transitions.push(AlertTransition::Updated { id: open.id, value });
                }
                (true, Some(mut open)) => {
                    self.inner.store.resolve_alert(open.id, now).await?;
                    open.resolved = true;
                    open.resolved_at = Some(now);
                    open.updated_at = now;
                    open.value = Some(value);
                    info!(kind = %kind, value, "Alert resolved");
                    self.inner.broadcaster.push(ALERT_RESOLVED, &open);
                    transitions.push(AlertTransition::Resolved { id: open.id });
                }
                (true, None) => {}
            }
        }
        Ok(transitions)
    }

    /// Record a critical `system` alert. Never fails; store errors are logged.
    pub async fn handle_system_error(&self, message: &str, component: &str) {
        let now = Utc::now();
        let alert = Alert {
            id: Uuid::new_v4(),
            kind: AlertKind::System,
            level: AlertLevel::Critical,
            message: format!("{component}: {message}"),
            sensor: None,
            value: None,
            threshold_min: None,
            threshold_max: None,
            resolved: false,
            resolved_at: None,
            created_at: now,
            updated_at: now,
        };
        error!(component, message, "System error");
        if let Err(e) = self.inner.store.insert_alert(&alert).await {
            error!(error = %e, "Failed to persist system alert");
        }
        self.inner.broadcaster.push(ALERT, &alert);
        let settings = self.settings().await;
        self.notify(&alert, &settings, now).await;
    }

    async fn notify(&self, alert: &Alert, settings: &AlertSettings, now: DateTime<Utc>) {
        let n = Notification {
            kind: alert.kind,
            level: alert.level,
            message: alert.message.clone(),
            at: alert.created_at,
        };
        self.inner.batcher.enqueue(n, settings, now).await;
    }

    // -----------------------------------------------------------------------
    // Notification window
    // -----------------------------------------------------------------------

    pub async fn flush_notifications(&self, now: DateTime<Utc>) -> usize {
        let settings = self.settings().await;
        self.inner.batcher.flush(&settings, now).await
    }

    pub async fn pending_notifications(&self) -> usize {
        self.inner.batcher.pending().await
    }

    /// Flushes the pending queue at every window boundary.
    /// Spawn this via `tokio::spawn`.
    pub async fn run_notifications(self) {
        info!("Alert notification loop started");
        loop {
            let window = self.settings().await.window();
            time::sleep(window.to_std().unwrap_or(Duration::from_secs(300))).await;
            self.flush_notifications(Utc::now()).await;
        }
    }
}

fn new_threshold_alert(
    kind: AlertKind,
    sensor: SensorKind,
    value: f64,
    band: Band,
    now: DateTime<Utc>,
) -> Alert {
    Alert {
        id: Uuid::new_v4(),
        kind,
        level: level_for(sensor, value, band),
        message: describe(sensor, value, band),
        sensor: Some(sensor),
        value: Some(value),
        threshold_min: Some(band.min),
        threshold_max: Some(band.max),
        resolved: false,
        resolved_at: None,
        created_at: now,
        updated_at: now,
    }
}

fn level_for(sensor: SensorKind, value: f64, band: Band) -> AlertLevel {
    let overshoot = band.overshoot(value);
    match sensor {
        SensorKind::Temperature if overshoot > 5.0 => AlertLevel::Critical,
        SensorKind::Temperature => AlertLevel::High,
        SensorKind::Humidity if overshoot > 10.0 => AlertLevel::High,
        SensorKind::Humidity => AlertLevel::Medium,
        SensorKind::WaterLevel => AlertLevel::Critical,
        _ => AlertLevel::High,
    }
}

fn describe(sensor: SensorKind, value: f64, band: Band) -> String {
    match sensor {
        SensorKind::SoilMoisture => "Soil is dry; irrigation needed".to_owned(),
        SensorKind::WaterLevel => "Water tank is empty; refill needed".to_owned(),
        _ => {
            let unit = if sensor == SensorKind::Temperature { "°C" } else { "%" };
            let (side, limit) = if value > band.max {
                ("above the maximum", band.max)
            } else {
                ("below the minimum", band.min)
            };
            format!("{sensor} {value:.1}{unit} is {side} of {limit:.1}{unit}")
        }
    }
}
