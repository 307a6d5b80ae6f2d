use std::{fmt, str::FromStr};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::error::GreenhouseError;

// ---------------------------------------------------------------------------
// SensorKind
// ---------------------------------------------------------------------------

/// Physical quantity reported by one sensor topic.
///
/// Binary sensors report `0`/`1`: soil moisture (0 = dry), water level
/// (0 = empty), rain (1 = raining), light (0 = dark), motion (1 = detected).
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, sqlx::Type, ToSchema,
)]
#[sqlx(type_name = "sensor_kind", rename_all = "camelCase")]
#[serde(rename_all = "camelCase")]
pub enum SensorKind {
    Temperature,
    Humidity,
    SoilMoisture,
    WaterLevel,
    PlantHeight,
    RainStatus,
    LightLevel,
    MotionDetected,
}

impl SensorKind {
    pub const ALL: [SensorKind; 8] = [
        SensorKind::Temperature,
        SensorKind::Humidity,
        SensorKind::SoilMoisture,
        SensorKind::WaterLevel,
        SensorKind::PlantHeight,
        SensorKind::RainStatus,
        SensorKind::LightLevel,
        SensorKind::MotionDetected,
    ];

    /// Quantities required before the buffer can form a composite snapshot.
    pub const CORE: [SensorKind; 4] = [
        SensorKind::Temperature,
        SensorKind::Humidity,
        SensorKind::SoilMoisture,
        SensorKind::WaterLevel,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            SensorKind::Temperature => "temperature",
            SensorKind::Humidity => "humidity",
            SensorKind::SoilMoisture => "soilMoisture",
            SensorKind::WaterLevel => "waterLevel",
            SensorKind::PlantHeight => "plantHeight",
            SensorKind::RainStatus => "rainStatus",
            SensorKind::LightLevel => "lightLevel",
            SensorKind::MotionDetected => "motionDetected",
        }
    }

    pub fn is_core(&self) -> bool {
        Self::CORE.contains(self)
    }
}

impl fmt::Display for SensorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SensorKind {
    type Err = GreenhouseError;

    /// Accepts the canonical camelCase names, snake_case, and the short names
    /// the greenhouse firmware publishes under (`soil`, `water`, `light`, ...).
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "temperature" => Ok(Self::Temperature),
            "humidity" => Ok(Self::Humidity),
            "soilMoisture" | "soil_moisture" | "soil" => Ok(Self::SoilMoisture),
            "waterLevel" | "water_level" | "water" => Ok(Self::WaterLevel),
            "plantHeight" | "plant_height" | "height" => Ok(Self::PlantHeight),
            "rainStatus" | "rain_status" | "rain" => Ok(Self::RainStatus),
            "lightLevel" | "light_level" | "light" => Ok(Self::LightLevel),
            "motionDetected" | "motion_detected" | "motion" => Ok(Self::MotionDetected),
            other => Err(GreenhouseError::UnknownSensor(other.to_owned())),
        }
    }
}

// ---------------------------------------------------------------------------
// Sensor records
// ---------------------------------------------------------------------------

/// Mirrors the `data_quality` Postgres enum.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type, ToSchema)]
#[sqlx(type_name = "data_quality", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum DataQuality {
    /// Exactly one sensor field is set.
    Partial,
    /// Composite of several sensors, from the buffer or a merge.
    Complete,
}

/// One optional column per sensor kind.
#[derive(Debug, Clone, Copy, Default, PartialEq, FromRow, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct SensorValues {
    /// Degrees Celsius
    pub temperature: Option<f64>,
    /// Relative humidity percentage
    pub humidity: Option<f64>,
    pub soil_moisture: Option<f64>,
    pub water_level: Option<f64>,
    /// Centimetres
    pub plant_height: Option<f64>,
    pub rain_status: Option<f64>,
    pub light_level: Option<f64>,
    pub motion_detected: Option<f64>,
}

impl SensorValues {
    pub fn single(kind: SensorKind, value: f64) -> Self {
        let mut values = Self::default();
        values.set(kind, Some(value));
        values
    }

    pub fn get(&self, kind: SensorKind) -> Option<f64> {
        match kind {
            SensorKind::Temperature => self.temperature,
            SensorKind::Humidity => self.humidity,
            SensorKind::SoilMoisture => self.soil_moisture,
            SensorKind::WaterLevel => self.water_level,
            SensorKind::PlantHeight => self.plant_height,
            SensorKind::RainStatus => self.rain_status,
            SensorKind::LightLevel => self.light_level,
            SensorKind::MotionDetected => self.motion_detected,
        }
    }

    pub fn set(&mut self, kind: SensorKind, value: Option<f64>) {
        let slot = match kind {
            SensorKind::Temperature => &mut self.temperature,
            SensorKind::Humidity => &mut self.humidity,
            SensorKind::SoilMoisture => &mut self.soil_moisture,
            SensorKind::WaterLevel => &mut self.water_level,
            SensorKind::PlantHeight => &mut self.plant_height,
            SensorKind::RainStatus => &mut self.rain_status,
            SensorKind::LightLevel => &mut self.light_level,
            SensorKind::MotionDetected => &mut self.motion_detected,
        };
        *slot = value;
    }

    /// Non-null `(kind, value)` pairs in canonical kind order.
    pub fn present(&self) -> impl Iterator<Item = (SensorKind, f64)> + '_ {
        SensorKind::ALL
            .into_iter()
            .filter_map(|kind| self.get(kind).map(|v| (kind, v)))
    }

    pub fn non_null_count(&self) -> usize {
        self.present().count()
    }

    pub fn has_all_core(&self) -> bool {
        SensorKind::CORE.iter().all(|k| self.get(*k).is_some())
    }

    /// Quality a record carrying these values is stored with.
    pub fn quality(&self) -> DataQuality {
        if self.non_null_count() > 1 {
            DataQuality::Complete
        } else {
            DataQuality::Partial
        }
    }
}

/// A persisted row of `sensor_records`.
#[derive(Debug, Clone, PartialEq, FromRow, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct SensorRecord {
    pub id: Uuid,
    /// Insertion order, assigned by the store.
    pub seq: i64,
    pub created_at: DateTime<Utc>,
    pub data_quality: DataQuality,
    #[sqlx(flatten)]
    #[serde(flatten)]
    pub values: SensorValues,
}

impl SensorRecord {
    /// Ordering key used to decide which of two values is more recent.
    pub fn recency(&self) -> (DateTime<Utc>, i64) {
        (self.created_at, self.seq)
    }
}

/// A sensor record before the store assigns its `seq`.
#[derive(Debug, Clone, PartialEq)]
pub struct NewSensorRecord {
    pub id: Uuid,
    pub created_at: DateTime<Utc>,
    pub data_quality: DataQuality,
    pub values: SensorValues,
}

impl NewSensorRecord {
    /// Single-sensor row written the instant a reading arrives.
    pub fn partial(kind: SensorKind, value: f64, at: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            created_at: at,
            data_quality: DataQuality::Partial,
            values: SensorValues::single(kind, value),
        }
    }

    /// Multi-sensor row built from the buffer or a merge group.
    pub fn composite(values: SensorValues, at: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            created_at: at,
            data_quality: values.quality(),
            values,
        }
    }

    pub fn into_record(self, seq: i64) -> SensorRecord {
        SensorRecord {
            id: self.id,
            seq,
            created_at: self.created_at,
            data_quality: self.data_quality,
            values: self.values,
        }
    }
}

// ---------------------------------------------------------------------------
// Devices
// ---------------------------------------------------------------------------

/// Mirrors the `device_type` Postgres enum.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, sqlx::Type, ToSchema,
)]
#[sqlx(type_name = "device_type", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum DeviceType {
    Light,
    Pump,
    Door,
    Window,
}

impl DeviceType {
    pub const ALL: [DeviceType; 4] = [
        DeviceType::Light,
        DeviceType::Pump,
        DeviceType::Door,
        DeviceType::Window,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            DeviceType::Light => "light",
            DeviceType::Pump => "pump",
            DeviceType::Door => "door",
            DeviceType::Window => "window",
        }
    }
}

impl fmt::Display for DeviceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Semantic command; door and window use open/close, the rest on/off.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type, ToSchema)]
#[sqlx(type_name = "device_action", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum DeviceAction {
    On,
    Off,
    Open,
    Close,
}

impl DeviceAction {
    /// Action that drives `device` into `status` (`true` = on/open).
    pub fn for_target(device: DeviceType, status: bool) -> Self {
        match (device, status) {
            (DeviceType::Door | DeviceType::Window, true) => DeviceAction::Open,
            (DeviceType::Door | DeviceType::Window, false) => DeviceAction::Close,
            (_, true) => DeviceAction::On,
            (_, false) => DeviceAction::Off,
        }
    }

    /// Door and window take open/close, light and pump on/off.
    pub fn fits(&self, device: DeviceType) -> bool {
        *self == DeviceAction::for_target(device, self.status())
    }

    pub fn status(&self) -> bool {
        matches!(self, DeviceAction::On | DeviceAction::Open)
    }

    /// Canonical command payload published to the device topic.
    pub fn payload(&self) -> &'static str {
        if self.status() {
            "1"
        } else {
            "0"
        }
    }
}

impl fmt::Display for DeviceAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            DeviceAction::On => "on",
            DeviceAction::Off => "off",
            DeviceAction::Open => "open",
            DeviceAction::Close => "close",
        };
        f.write_str(s)
    }
}

/// Last accepted automation decision for one device.
///
/// The automation engine's cache owns these; `device_status` holds a mirror of
/// the last *delivered* command for external reads and cache rebuilds.
#[derive(Debug, Clone, PartialEq, FromRow, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct DeviceState {
    pub device_type: DeviceType,
    /// `true` = on/open.
    pub status: bool,
    pub last_triggered_at: DateTime<Utc>,
    pub last_sensor_value: Option<f64>,
    pub last_trigger_reason: Option<String>,
}

/// Mirrors the `control_source` Postgres enum.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type, ToSchema)]
#[sqlx(type_name = "control_source", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum ControlSource {
    Automation,
    Manual,
}

#[derive(Debug, Clone, PartialEq, FromRow, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct DeviceHistory {
    pub id: Uuid,
    pub device_type: DeviceType,
    pub action: DeviceAction,
    pub status: bool,
    pub source: ControlSource,
    pub reason: Option<String>,
    pub sensor_value: Option<f64>,
    pub success: bool,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Alerts
// ---------------------------------------------------------------------------

/// Mirrors the `alert_kind` Postgres enum.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type, ToSchema)]
#[sqlx(type_name = "alert_kind", rename_all = "camelCase")]
#[serde(rename_all = "camelCase")]
pub enum AlertKind {
    Temperature,
    Humidity,
    SoilMoisture,
    WaterLevel,
    System,
}

impl AlertKind {
    pub fn for_sensor(kind: SensorKind) -> Option<Self> {
        match kind {
            SensorKind::Temperature => Some(AlertKind::Temperature),
            SensorKind::Humidity => Some(AlertKind::Humidity),
            SensorKind::SoilMoisture => Some(AlertKind::SoilMoisture),
            SensorKind::WaterLevel => Some(AlertKind::WaterLevel),
            _ => None,
        }
    }

    pub fn sensor(&self) -> Option<SensorKind> {
        match self {
            AlertKind::Temperature => Some(SensorKind::Temperature),
            AlertKind::Humidity => Some(SensorKind::Humidity),
            AlertKind::SoilMoisture => Some(SensorKind::SoilMoisture),
            AlertKind::WaterLevel => Some(SensorKind::WaterLevel),
            AlertKind::System => None,
        }
    }
}

impl fmt::Display for AlertKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.sensor() {
            Some(kind) => f.write_str(kind.as_str()),
            None => f.write_str("system"),
        }
    }
}

/// Mirrors the `alert_level` Postgres enum.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, sqlx::Type, ToSchema)]
#[sqlx(type_name = "alert_level", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum AlertLevel {
    Low,
    Medium,
    High,
    Critical,
}

impl fmt::Display for AlertLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            AlertLevel::Low => "LOW",
            AlertLevel::Medium => "MEDIUM",
            AlertLevel::High => "HIGH",
            AlertLevel::Critical => "CRITICAL",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, FromRow, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct Alert {
    pub id: Uuid,
    pub kind: AlertKind,
    pub level: AlertLevel,
    pub message: String,
    pub sensor: Option<SensorKind>,
    pub value: Option<f64>,
    pub threshold_min: Option<f64>,
    pub threshold_max: Option<f64>,
    pub resolved: bool,
    pub resolved_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    /// Bumped whenever the open alert sees another out-of-band value.
    pub updated_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sensor_kind_accepts_firmware_aliases() {
        assert_eq!("soil".parse::<SensorKind>().unwrap(), SensorKind::SoilMoisture);
        assert_eq!("water".parse::<SensorKind>().unwrap(), SensorKind::WaterLevel);
        assert_eq!("light".parse::<SensorKind>().unwrap(), SensorKind::LightLevel);
        assert_eq!("rain".parse::<SensorKind>().unwrap(), SensorKind::RainStatus);
        assert_eq!("height".parse::<SensorKind>().unwrap(), SensorKind::PlantHeight);
        assert_eq!("motion".parse::<SensorKind>().unwrap(), SensorKind::MotionDetected);
    }

    #[test]
    fn sensor_kind_display_parses_back() {
        for kind in SensorKind::ALL {
            assert_eq!(kind.to_string().parse::<SensorKind>().unwrap(), kind);
        }
    }

    #[test]
    fn unknown_sensor_errors() {
        let err = "pressure".parse::<SensorKind>().unwrap_err();
        assert!(matches!(err, GreenhouseError::UnknownSensor(ref s) if s == "pressure"));
    }

    #[test]
    fn partial_record_has_exactly_one_field() {
        let rec = NewSensorRecord::partial(SensorKind::Humidity, 61.0, Utc::now());
        assert_eq!(rec.data_quality, DataQuality::Partial);
        assert_eq!(rec.values.non_null_count(), 1);
        assert_eq!(rec.values.humidity, Some(61.0));
    }

    #[test]
    fn composite_quality_depends_on_field_count() {
        let mut values = SensorValues::single(SensorKind::Temperature, 25.0);
        assert_eq!(NewSensorRecord::composite(values, Utc::now()).data_quality, DataQuality::Partial);

        values.set(SensorKind::Humidity, Some(60.0));
        assert_eq!(NewSensorRecord::composite(values, Utc::now()).data_quality, DataQuality::Complete);
    }

    #[test]
    fn has_all_core_requires_four_fields() {
        let mut values = SensorValues::default();
        values.set(SensorKind::Temperature, Some(20.0));
        values.set(SensorKind::Humidity, Some(50.0));
        values.set(SensorKind::SoilMoisture, Some(1.0));
        assert!(!values.has_all_core());
        values.set(SensorKind::WaterLevel, Some(1.0));
        assert!(values.has_all_core());
    }

    #[test]
    fn actions_map_to_canonical_payloads() {
        assert_eq!(DeviceAction::for_target(DeviceType::Light, true), DeviceAction::On);
        assert_eq!(DeviceAction::for_target(DeviceType::Pump, false), DeviceAction::Off);
        assert_eq!(DeviceAction::for_target(DeviceType::Window, true), DeviceAction::Open);
        assert_eq!(DeviceAction::for_target(DeviceType::Door, false), DeviceAction::Close);
        assert_eq!(DeviceAction::Open.payload(), "1");
        assert!(DeviceAction::Close.fits(DeviceType::Door));
        assert!(!DeviceAction::On.fits(DeviceType::Window));
        assert_eq!(DeviceAction::Off.payload(), "0");
    }

    #[test]
    fn alert_kind_covers_core_sensors_only() {
        for kind in SensorKind::CORE {
            assert_eq!(AlertKind::for_sensor(kind).and_then(|a| a.sensor()), Some(kind));
        }
        assert!(AlertKind::for_sensor(SensorKind::LightLevel).is_none());
    }
}
