use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Duration,
};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::time;
use tracing::{debug, error, info, warn};
use utoipa::ToSchema;

use super::{
    config::{AutomationConfig, AutomationConfigUpdate, AutomationSettings},
    pause::DataProcessingPause,
    state_cache::{should_trigger, DeviceStateCache},
};
use crate::{
    alerts::AlertEngine,
    control::{DeviceController, DEFAULT_PUBLISH_TIMEOUT},
    db::{
        models::{DeviceAction, DeviceState, DeviceType, SensorKind},
        DeviceStore, SensorStore,
    },
    error::Result,
    merge::{merge_before_read, MergeOptions, MergeService},
};

/// Upper bound on publishing one device command; a stalled broker must not
/// hold the device lock.
pub const DEFAULT_CONTROL_TIMEOUT: Duration = DEFAULT_PUBLISH_TIMEOUT;

/// A command the engine accepted and attempted.
#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct AutomationAction {
    pub device: DeviceType,
    pub action: DeviceAction,
    pub reason: String,
    pub value: f64,
    /// `false` when the controller failed or timed out. The cache is updated
    /// either way.
    pub delivered: bool,
}

// ---------------------------------------------------------------------------
// Decision table
// ---------------------------------------------------------------------------

/// Desired state for one device, before the anti-spam gate.
#[derive(Debug, Clone, PartialEq)]
pub struct Decision {
    pub device: DeviceType,
    /// `true` = on/open.
    pub target: bool,
    pub reason: String,
}

impl Decision {
    fn new(device: DeviceType, target: bool, reason: String) -> Self {
        Self {
            device,
            target,
            reason,
        }
    }
}

/// Targets implied by one reading. Values strictly inside a hysteresis band
/// produce nothing. Device enablement is not checked here.
pub fn decide(config: &AutomationConfig, kind: SensorKind, value: f64, raining: bool) -> Vec<Decision> {
    let mut out = Vec::new();
    match kind {
        SensorKind::LightLevel => {
            let t = config.light_thresholds;
            if value <= t.turn_on_when_dark {
                out.push(Decision::new(DeviceType::Light, true, format!("dark (light level {value})")));
            } else if value >= t.turn_off_when_bright {
                out.push(Decision::new(DeviceType::Light, false, format!("bright (light level {value})")));
            }
        }
        SensorKind::SoilMoisture => {
            let t = config.pump_thresholds;
            if value <= t.turn_on_when_dry {
                out.push(Decision::new(DeviceType::Pump, true, format!("soil dry ({value})")));
            } else if value >= t.turn_off_when_wet {
                out.push(Decision::new(DeviceType::Pump, false, format!("soil wet ({value})")));
            }
        }
        SensorKind::Temperature => {
            let t = config.temperature_thresholds;
            if raining && config.rain_settings.auto_close_window_on_rain {
                out.push(Decision::new(DeviceType::Window, false, "rain detected".to_owned()));
            } else if value >= t.window_open_temp {
                out.push(Decision::new(DeviceType::Window, true, format!("temperature {value}°C >= {}°C", t.window_open_temp)));
            } else if value <= t.window_close_temp {
                out.push(Decision::new(DeviceType::Window, false, format!("temperature {value}°C <= {}°C", t.window_close_temp)));
            }
            if value >= t.door_open_temp {
                out.push(Decision::new(DeviceType::Door, true, format!("temperature {value}°C >= {}°C", t.door_open_temp)));
            } else if value <= t.door_close_temp {
                out.push(Decision::new(DeviceType::Door, false, format!("temperature {value}°C <= {}°C", t.door_close_temp)));
            }
        }
        SensorKind::RainStatus => {
            let r = config.rain_settings;
            if value >= 1.0 && r.auto_close_window_on_rain {
                out.push(Decision::new(DeviceType::Window, false, "rain detected".to_owned()));
            } else if value <= 0.0 && r.auto_open_after_rain {
                out.push(Decision::new(DeviceType::Window, true, "rain stopped".to_owned()));
            }
        }
        SensorKind::MotionDetected => {
            if value >= 1.0 && config.motion_settings.auto_open_door_on_motion {
                out.push(Decision::new(DeviceType::Door, true, "motion detected".to_owned()));
            }
        }
        SensorKind::WaterLevel => {
            let w = config.water_level_settings;
            if value >= 1.0 {
                if w.auto_turn_off_pump_on_flood {
                    out.push(Decision::new(DeviceType::Pump, false, "flood detected".to_owned()));
                }
                if w.auto_open_door_on_flood {
                    out.push(Decision::new(DeviceType::Door, true, "flood detected".to_owned()));
                }
            }
        }
        SensorKind::Humidity | SensorKind::PlantHeight => {}
    }
    out
}

// ---------------------------------------------------------------------------
// AutomationEngine
// ---------------------------------------------------------------------------

/// Turns readings into device commands through the state cache.
#[derive(Clone)]
pub struct AutomationEngine {
    inner: Arc<Inner>,
    control_timeout: Duration,
    read_merge: MergeOptions,
}

struct Inner {
    settings: AutomationSettings,
    cache: DeviceStateCache,
    controller: DeviceController,
    devices: Arc<dyn DeviceStore>,
    records: Arc<dyn SensorStore>,
    merger: Arc<MergeService>,
    alerts: AlertEngine,
    pause: DataProcessingPause,
    raining: AtomicBool,
}

impl AutomationEngine {
    pub fn new(
        settings: AutomationSettings,
        controller: DeviceController,
        devices: Arc<dyn DeviceStore>,
        records: Arc<dyn SensorStore>,
        merger: Arc<MergeService>,
        alerts: AlertEngine,
        pause: DataProcessingPause,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                settings,
                cache: DeviceStateCache::new(),
                controller,
                devices,
                records,
                merger,
                alerts,
                pause,
                raining: AtomicBool::new(false),
            }),
            control_timeout: DEFAULT_CONTROL_TIMEOUT,
            read_merge: MergeOptions::default(),
        }
    }

    pub fn with_control_timeout(mut self, timeout: Duration) -> Self {
        self.control_timeout = timeout;
        self
    }

    /// Options for the merge that precedes a snapshot check.
    pub fn with_read_merge(mut self, options: MergeOptions) -> Self {
        self.read_merge = options;
        self
    }

    pub fn settings(&self) -> &AutomationSettings {
        &self.inner.settings
    }

    pub async fn process_sensor_data(&self, kind: SensorKind, value: f64) -> Vec<AutomationAction> {
        self.process_sensor_data_at(kind, value, Utc::now()).await
    }

    /// One decision cycle for a single reading.
    ///
    /// Does nothing while the data-processing pause is held or the config is
    /// not loaded.
    pub async fn process_sensor_data_at(
        &self,
        kind: SensorKind,
        value: f64,
        now: DateTime<Utc>,
    ) -> Vec<AutomationAction> {
        if kind == SensorKind::RainStatus {
            self.inner.raining.store(value >= 1.0, Ordering::SeqCst);
        }
        if self.inner.pause.is_paused() {
            debug!(kind = %kind, value, "Data processing in progress; automation skipped");
            return Vec::new();
        }
        let config = match self.inner.settings.current().await {
            Ok(config) => config,
            Err(e) => {
                debug!(error = %e, "Automation disabled for every device");
                return Vec::new();
            }
        };
        if !config.automation_enabled {
            return Vec::new();
        }

        let raining = self.inner.raining.load(Ordering::SeqCst);
        let mut actions = Vec::new();
        for decision in decide(&config, kind, value, raining) {
            if !config.controls(decision.device) {
                continue;
            }
            if let Some(action) = self.apply(decision, value, now).await {
                actions.push(action);
            }
        }
        actions
    }

    /// Gate, control and record one decision under the device's lock.
    async fn apply(&self, decision: Decision, value: f64, now: DateTime<Utc>) -> Option<AutomationAction> {
        let Decision {
            device,
            target,
            reason,
        } = decision;
        let mut slot = self.inner.cache.lock(device).await;
        if !should_trigger(slot.as_ref(), target, value, now) {
            return None;
        }

        let action = DeviceAction::for_target(device, target);
        let sent = self
            .inner
            .controller
            .control_device(device, action, &reason, Some(value), self.control_timeout)
            .await;
        if let Err(e) = &sent {
            warn!(device = %device, action = %action, error = %e, "Command failed; cache updated anyway");
        }

        *slot = Some(DeviceState {
            device_type: device,
            status: target,
            last_triggered_at: now,
            last_sensor_value: Some(value),
            last_trigger_reason: Some(reason.clone()),
        });

        Some(AutomationAction {
            device,
            action,
            reason,
            value,
            delivered: sent.is_ok(),
        })
    }

    /// Merge, then run every field of the latest record through the engine.
    ///
    /// Rain is evaluated first so the window override applies to the
    /// temperature in the same record.
    pub async fn process_immediate_automation_check(&self) -> Vec<AutomationAction> {
        merge_before_read(&self.inner.merger, self.read_merge, &self.inner.alerts).await;

        let latest = match self.inner.records.latest_record().await {
            Ok(Some(record)) => record,
            Ok(None) => {
                debug!("No sensor records yet; automation check skipped");
                return Vec::new();
            }
            Err(e) => {
                self.inner
                    .alerts
                    .handle_system_error(&format!("latest record unavailable: {e}"), "automation")
                    .await;
                return Vec::new();
            }
        };

        let mut readings: Vec<(SensorKind, f64)> = latest.values.present().collect();
        readings.sort_by_key(|(kind, _)| *kind != SensorKind::RainStatus);

        let now = Utc::now();
        let mut actions = Vec::new();
        for (kind, value) in readings {
            actions.extend(self.process_sensor_data_at(kind, value, now).await);
        }
        if !actions.is_empty() {
            info!(actions = actions.len(), "Automation check issued commands");
        }
        actions
    }

    pub async fn get_device_state_cache(&self) -> Vec<DeviceState> {
        self.inner.cache.snapshot().await
    }

    /// Rebuild the cache from the persisted device status mirror.
    pub async fn refresh_cache(&self) -> Result<usize> {
        let states = self.inner.devices.device_states().await?;
        let count = states.len();
        self.inner.cache.replace_all(states).await;
        debug!(devices = count, "Device state cache rebuilt");
        Ok(count)
    }

    /// Persist `patch` and make it current. Re-enabling automation rebuilds
    /// the cache and runs an immediate check.
    pub async fn update_configuration(&self, patch: AutomationConfigUpdate) -> Result<AutomationConfig> {
        let was_enabled = self
            .inner
            .settings
            .current()
            .await
            .map_or(false, |c| c.automation_enabled);
        let config = self.inner.settings.update(patch).await?;
        info!(enabled = config.automation_enabled, "Automation configuration updated");

        if config.automation_enabled && !was_enabled {
            self.refresh_cache().await?;
            self.process_immediate_automation_check().await;
        }
        Ok(config)
    }

    /// Runs the periodic automation check indefinitely.
    /// Spawn this via `tokio::spawn`.
    pub async fn run(self, interval: Duration) {
        info!(interval_secs = interval.as_secs(), "Automation loop started");
        let mut ticker = time::interval(interval);

        loop {
            ticker.tick().await;
            if self.inner.settings.current().await.is_err() {
                if let Err(e) = self.inner.settings.reload().await {
                    error!(error = %e, "Automation config still unavailable");
                    continue;
                }
            }
            self.process_immediate_automation_check().await;
        }
    }
}
