use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::db::models::{AlertKind, SensorKind};

/// Inclusive acceptable band. Values strictly outside raise an alert.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct Band {
    pub min: f64,
    pub max: f64,
}

impl Band {
    pub const fn new(min: f64, max: f64) -> Self {
        Self { min, max }
    }

    pub fn contains(&self, value: f64) -> bool {
        value >= self.min && value <= self.max
    }

    /// Distance from the nearest edge; zero inside the band.
    pub fn overshoot(&self, value: f64) -> f64 {
        if value < self.min {
            self.min - value
        } else if value > self.max {
            value - self.max
        } else {
            0.0
        }
    }
}

/// Per-category notification toggles. System alerts are always sent.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct EmailAlerts {
    pub temperature: bool,
    pub humidity: bool,
    pub soil_moisture: bool,
    pub water_level: bool,
}

impl Default for EmailAlerts {
    fn default() -> Self {
        Self {
            temperature: true,
            humidity: true,
            soil_moisture: true,
            water_level: true,
        }
    }
}

impl EmailAlerts {
    pub fn enabled(&self, kind: AlertKind) -> bool {
        match kind {
            AlertKind::Temperature => self.temperature,
            AlertKind::Humidity => self.humidity,
            AlertKind::SoilMoisture => self.soil_moisture,
            AlertKind::WaterLevel => self.water_level,
            AlertKind::System => true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct AlertSettings {
    pub temperature: Band,
    pub humidity: Band,
    /// Binary sensor: 0 = dry raises an alert.
    pub soil_moisture: Band,
    /// Binary sensor: 0 = empty raises an alert.
    pub water_level: Band,
    pub email_alerts: EmailAlerts,
    pub recipients: Vec<String>,
    pub alert_frequency_minutes: u32,
    pub batch_alerts: bool,
}

impl Default for AlertSettings {
    fn default() -> Self {
        Self {
            temperature: Band::new(18.0, 30.0),
            humidity: Band::new(40.0, 80.0),
            soil_moisture: Band::new(1.0, 1.0),
            water_level: Band::new(1.0, 1.0),
            email_alerts: EmailAlerts::default(),
            recipients: Vec::new(),
            alert_frequency_minutes: 5,
            batch_alerts: true,
        }
    }
}

impl AlertSettings {
    pub fn band(&self, kind: SensorKind) -> Option<Band> {
        match kind {
            SensorKind::Temperature => Some(self.temperature),
            SensorKind::Humidity => Some(self.humidity),
            SensorKind::SoilMoisture => Some(self.soil_moisture),
            SensorKind::WaterLevel => Some(self.water_level),
            _ => None,
        }
    }

    pub fn window(&self) -> chrono::Duration {
        chrono::Duration::minutes(i64::from(self.alert_frequency_minutes.max(1)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn band_edges_are_inside() {
        let band = Band::new(18.0, 30.0);
        assert!(band.contains(18.0));
        assert!(band.contains(30.0));
        assert!(!band.contains(30.5));
        assert_eq!(band.overshoot(36.0), 6.0);
        assert_eq!(band.overshoot(17.0), 1.0);
        assert_eq!(band.overshoot(20.0), 0.0);
    }

    #[test]
    fn binary_bands_alert_on_zero() {
        let s = AlertSettings::default();
        assert!(!s.soil_moisture.contains(0.0));
        assert!(s.soil_moisture.contains(1.0));
        assert!(!s.water_level.contains(0.0));
    }

    #[test]
    fn only_core_sensors_have_bands() {
        let s = AlertSettings::default();
        assert!(s.band(SensorKind::Temperature).is_some());
        assert!(s.band(SensorKind::RainStatus).is_none());
    }

    #[test]
    fn system_notifications_cannot_be_disabled() {
        let toggles = EmailAlerts {
            temperature: false,
            humidity: false,
            soil_moisture: false,
            water_level: false,
        };
        assert!(toggles.enabled(AlertKind::System));
        assert!(!toggles.enabled(AlertKind::Temperature));
    }
}
