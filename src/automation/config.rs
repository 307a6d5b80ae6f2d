use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::{info, warn};
use utoipa::ToSchema;

use crate::{
    db::{models::DeviceType, SettingsStore},
    error::{GreenhouseError, Result},
};

// ---------------------------------------------------------------------------
// AutomationConfig
// ---------------------------------------------------------------------------

/// Singleton automation settings, persisted as one JSON document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct AutomationConfig {
    pub automation_enabled: bool,
    pub light_control_enabled: bool,
    pub pump_control_enabled: bool,
    pub door_control_enabled: bool,
    pub window_control_enabled: bool,
    pub light_thresholds: LightThresholds,
    pub pump_thresholds: PumpThresholds,
    pub temperature_thresholds: TemperatureThresholds,
    pub rain_settings: RainSettings,
    pub motion_settings: MotionSettings,
    pub water_level_settings: WaterLevelSettings,
}

/// Light sensor is binary: 0 = dark, 1 = bright.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct LightThresholds {
    pub turn_on_when_dark: f64,
    pub turn_off_when_bright: f64,
}

/// Soil sensor is binary: 0 = dry, 1 = wet.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct PumpThresholds {
    pub turn_on_when_dry: f64,
    pub turn_off_when_wet: f64,
}

/// Degrees Celsius.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct TemperatureThresholds {
    pub window_open_temp: f64,
    pub window_close_temp: f64,
    pub door_open_temp: f64,
    pub door_close_temp: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct RainSettings {
    pub auto_close_window_on_rain: bool,
    pub auto_open_after_rain: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct MotionSettings {
    pub auto_open_door_on_motion: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct WaterLevelSettings {
    pub auto_turn_off_pump_on_flood: bool,
    pub auto_open_door_on_flood: bool,
}

impl Default for AutomationConfig {
    fn default() -> Self {
        Self {
            automation_enabled: false,
            light_control_enabled: true,
            pump_control_enabled: true,
            door_control_enabled: false,
            window_control_enabled: true,
            light_thresholds: LightThresholds {
                turn_on_when_dark: 0.0,
                turn_off_when_bright: 1.0,
            },
            pump_thresholds: PumpThresholds {
                turn_on_when_dry: 0.0,
                turn_off_when_wet: 1.0,
            },
            temperature_thresholds: TemperatureThresholds {
                window_open_temp: 30.0,
                window_close_temp: 25.0,
                door_open_temp: 35.0,
                door_close_temp: 30.0,
            },
            rain_settings: RainSettings {
                auto_close_window_on_rain: true,
                auto_open_after_rain: false,
            },
            motion_settings: MotionSettings {
                auto_open_door_on_motion: true,
            },
            water_level_settings: WaterLevelSettings {
                auto_turn_off_pump_on_flood: true,
                auto_open_door_on_flood: true,
            },
        }
    }
}

impl AutomationConfig {
    /// Whether automation may drive `device` at all.
    pub fn controls(&self, device: DeviceType) -> bool {
        self.automation_enabled
            && match device {
                DeviceType::Light => self.light_control_enabled,
                DeviceType::Pump => self.pump_control_enabled,
                DeviceType::Door => self.door_control_enabled,
                DeviceType::Window => self.window_control_enabled,
            }
    }

    /// Every hysteresis pair must leave a band between its two edges.
    pub fn validate(&self) -> Result<()> {
        let l = self.light_thresholds;
        let p = self.pump_thresholds;
        let t = self.temperature_thresholds;
        let checks = [
            ("lightThresholds", "turnOnWhenDark < turnOffWhenBright", l.turn_on_when_dark, l.turn_off_when_bright),
            ("pumpThresholds", "turnOnWhenDry < turnOffWhenWet", p.turn_on_when_dry, p.turn_off_when_wet),
            ("temperatureThresholds", "windowCloseTemp < windowOpenTemp", t.window_close_temp, t.window_open_temp),
            ("temperatureThresholds", "doorCloseTemp < doorOpenTemp", t.door_close_temp, t.door_open_temp),
        ];
        for (group, rule, low, high) in checks {
            if !(low.is_finite() && high.is_finite() && low < high) {
                return Err(GreenhouseError::InvalidSettings(format!(
                    "{group} must satisfy {rule}"
                )));
            }
        }
        Ok(())
    }

    /// Apply a partial update. Nested groups are replaced as a whole.
    pub fn apply(&mut self, patch: AutomationConfigUpdate) {
        let AutomationConfigUpdate {
            automation_enabled,
            light_control_enabled,
            pump_control_enabled,
            door_control_enabled,
            window_control_enabled,
            light_thresholds,
            pump_thresholds,
            temperature_thresholds,
            rain_settings,
            motion_settings,
            water_level_settings,
        } = patch;

        macro_rules! set {
            ($($field:ident),*) => {
                $(if let Some(v) = $field { self.$field = v; })*
            };
        }
        set!(
            automation_enabled,
            light_control_enabled,
            pump_control_enabled,
            door_control_enabled,
            window_control_enabled,
            light_thresholds,
            pump_thresholds,
            temperature_thresholds,
            rain_settings,
            motion_settings,
            water_level_settings
        );
    }
}

/// Body of `PUT /automation`; absent fields are left unchanged.
#[derive(Debug, Clone, Default, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct AutomationConfigUpdate {
    pub automation_enabled: Option<bool>,
    pub light_control_enabled: Option<bool>,
    pub pump_control_enabled: Option<bool>,
    pub door_control_enabled: Option<bool>,
    pub window_control_enabled: Option<bool>,
    pub light_thresholds: Option<LightThresholds>,
    pub pump_thresholds: Option<PumpThresholds>,
    pub temperature_thresholds: Option<TemperatureThresholds>,
    pub rain_settings: Option<RainSettings>,
    pub motion_settings: Option<MotionSettings>,
    pub water_level_settings: Option<WaterLevelSettings>,
}

// ---------------------------------------------------------------------------
// AutomationSettings
// ---------------------------------------------------------------------------

/// Process-wide view of the persisted automation config.
///
/// Starts empty; until [`AutomationSettings::reload`] succeeds every read
/// fails with [`GreenhouseError::ConfigUnavailable`].
#[derive(Clone)]
pub struct AutomationSettings {
    store: Arc<dyn SettingsStore>,
    current: Arc<RwLock<Option<AutomationConfig>>>,
}

impl AutomationSettings {
    pub fn new(store: Arc<dyn SettingsStore>) -> Self {
        Self {
            store,
            current: Arc::new(RwLock::new(None)),
        }
    }

    pub async fn current(&self) -> Result<AutomationConfig> {
        self.current
            .read()
            .await
            .clone()
            .ok_or_else(|| GreenhouseError::ConfigUnavailable("not loaded".into()))
    }

    /// Load from the store, seeding defaults on first start.
    ///
    /// A failed load leaves the previously loaded config in place.
    pub async fn reload(&self) -> Result<AutomationConfig> {
        let config = match self.store.load_automation_config().await {
            Ok(Some(config)) => config,
            Ok(None) => {
                let config = AutomationConfig::default();
                self.store.save_automation_config(&config).await?;
                info!("Seeded default automation config");
                config
            }
            Err(e) => {
                warn!(error = %e, "Failed to load automation config");
                return Err(GreenhouseError::ConfigUnavailable(e.to_string()));
            }
        };
        *self.current.write().await = Some(config.clone());
        Ok(config)
    }

    /// Persist `patch` on top of the stored config and make it current.
    ///
    /// A patch that leaves a threshold pair inverted is rejected and nothing
    /// is saved.
    pub async fn update(&self, patch: AutomationConfigUpdate) -> Result<AutomationConfig> {
        let mut config = match self.current().await {
            Ok(config) => config,
            Err(_) => self.reload().await?,
        };
        config.apply(patch);
        config.validate()?;
        self.store.save_automation_config(&config).await?;
        self.reload().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::memory::MemoryStore;

    #[test]
    fn defaults_follow_greenhouse_firmware() {
        let c = AutomationConfig::default();
        assert_eq!(c.temperature_thresholds.window_open_temp, 30.0);
        assert_eq!(c.temperature_thresholds.door_close_temp, 30.0);
        assert!(c.rain_settings.auto_close_window_on_rain);
        assert!(!c.rain_settings.auto_open_after_rain);
        assert!(!c.automation_enabled);
    }

    #[test]
    fn controls_requires_master_switch() {
        let mut c = AutomationConfig::default();
        assert!(!c.controls(DeviceType::Light));
        c.automation_enabled = true;
        assert!(c.controls(DeviceType::Light));
        assert!(!c.controls(DeviceType::Door));
    }

    #[test]
    fn apply_only_touches_given_fields() {
        let mut c = AutomationConfig::default();
        c.apply(AutomationConfigUpdate {
            automation_enabled: Some(true),
            pump_thresholds: Some(PumpThresholds {
                turn_on_when_dry: 0.2,
                turn_off_when_wet: 0.8,
            }),
            ..Default::default()
        });
        assert!(c.automation_enabled);
        assert_eq!(c.pump_thresholds.turn_on_when_dry, 0.2);
        assert_eq!(c.light_thresholds, AutomationConfig::default().light_thresholds);
    }

    #[tokio::test]
    async fn unloaded_settings_are_unavailable() {
        let settings = AutomationSettings::new(Arc::new(MemoryStore::new()));
        let err = settings.current().await.unwrap_err();
        assert!(matches!(err, GreenhouseError::ConfigUnavailable(_)));
    }

    #[tokio::test]
    async fn reload_seeds_defaults_and_update_persists() {
        let store = Arc::new(MemoryStore::new());
        let settings = AutomationSettings::new(store.clone());
        assert_eq!(settings.reload().await.unwrap(), AutomationConfig::default());

        settings
            .update(AutomationConfigUpdate {
                automation_enabled: Some(true),
                ..Default::default()
            })
            .await
            .unwrap();

        let persisted = store.load_automation_config().await.unwrap().unwrap();
        assert!(persisted.automation_enabled);
        assert!(settings.current().await.unwrap().automation_enabled);
    }

    #[test]
    fn defaults_are_valid() {
        assert!(AutomationConfig::default().validate().is_ok());
    }

    #[tokio::test]
    async fn inverted_thresholds_are_rejected() {
        let store = Arc::new(MemoryStore::new());
        let settings = AutomationSettings::new(store.clone());
        settings.reload().await.unwrap();

        let inverted = [
            AutomationConfigUpdate {
                light_thresholds: Some(LightThresholds {
                    turn_on_when_dark: 1.0,
                    turn_off_when_bright: 0.0,
                }),
                ..Default::default()
            },
            AutomationConfigUpdate {
                pump_thresholds: Some(PumpThresholds {
                    turn_on_when_dry: 0.5,
                    turn_off_when_wet: 0.5,
                }),
                ..Default::default()
            },
            AutomationConfigUpdate {
                temperature_thresholds: Some(TemperatureThresholds {
                    window_open_temp: 25.0,
                    window_close_temp: 30.0,
                    door_open_temp: 35.0,
                    door_close_temp: 30.0,
                }),
                ..Default::default()
            },
            AutomationConfigUpdate {
                temperature_thresholds: Some(TemperatureThresholds {
                    window_open_temp: 30.0,
                    window_close_temp: 25.0,
                    door_open_temp: f64::NAN,
                    door_close_temp: 30.0,
                }),
                ..Default::default()
            },
        ];
        for patch in inverted {
            let err = settings.update(patch).await.unwrap_err();
            assert!(matches!(err, GreenhouseError::InvalidSettings(_)));
        }

        assert_eq!(store.load_automation_config().await.unwrap().unwrap(), AutomationConfig::default());
        assert_eq!(settings.current().await.unwrap(), AutomationConfig::default());
    }
}
