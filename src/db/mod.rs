pub mod memory;
pub mod models;
pub mod postgres;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use uuid::Uuid;

use crate::{
    alerts::settings::AlertSettings,
    automation::config::AutomationConfig,
    error::StoreError,
};
use models::{Alert, AlertKind, DeviceHistory, DeviceState, NewSensorRecord, SensorRecord};

pub async fn create_pool(database_url: &str) -> Result<PgPool> {
    let pool = PgPoolOptions::new()
        .max_connections(10)
        .connect(database_url)
        .await?;
    Ok(pool)
}

pub async fn run_migrations(pool: &PgPool) -> Result<()> {
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Store traits
// ---------------------------------------------------------------------------

#[async_trait]
pub trait SensorStore: Send + Sync {
    /// Insert and return the row with its assigned `seq`.
    async fn insert_record(&self, record: NewSensorRecord) -> Result<SensorRecord, StoreError>;

    /// Every record, ordered by `(created_at, seq)`.
    async fn list_records(&self) -> Result<Vec<SensorRecord>, StoreError>;

    /// Most recent records first.
    async fn recent_records(&self, limit: i64) -> Result<Vec<SensorRecord>, StoreError>;

    async fn latest_record(&self) -> Result<Option<SensorRecord>, StoreError> {
        Ok(self.recent_records(1).await?.into_iter().next())
    }

    /// Insert `merged` and delete `sources` as one unit.
    async fn replace_records(
        &self,
        merged: NewSensorRecord,
        sources: &[Uuid],
    ) -> Result<SensorRecord, StoreError>;
}

#[async_trait]
pub trait DeviceStore: Send + Sync {
    async fn upsert_device_state(&self, state: &DeviceState) -> Result<(), StoreError>;
    async fn device_states(&self) -> Result<Vec<DeviceState>, StoreError>;
    async fn insert_history(&self, entry: &DeviceHistory) -> Result<(), StoreError>;
    /// Most recent entries first.
    async fn recent_history(&self, limit: i64) -> Result<Vec<DeviceHistory>, StoreError>;
}

#[async_trait]
pub trait AlertStore: Send + Sync {
    /// The unresolved alert for `kind`, if any.
    async fn open_alert(&self, kind: AlertKind) -> Result<Option<Alert>, StoreError>;
    async fn insert_alert(&self, alert: &Alert) -> Result<(), StoreError>;
    /// Record a new out-of-band value on an open alert.
    async fn touch_alert(&self, id: Uuid, value: f64, at: DateTime<Utc>) -> Result<(), StoreError>;
    async fn resolve_alert(&self, id: Uuid, at: DateTime<Utc>) -> Result<(), StoreError>;
    /// Newest first, optionally filtered on `resolved`.
    async fn list_alerts(
        &self,
        resolved: Option<bool>,
        limit: i64,
    ) -> Result<Vec<Alert>, StoreError>;
}

#[async_trait]
pub trait SettingsStore: Send + Sync {
    async fn load_automation_config(&self) -> Result<Option<AutomationConfig>, StoreError>;
    async fn save_automation_config(&self, config: &AutomationConfig) -> Result<(), StoreError>;
    async fn load_alert_settings(&self) -> Result<Option<AlertSettings>, StoreError>;
    async fn save_alert_settings(&self, settings: &AlertSettings) -> Result<(), StoreError>;
}

/// Everything the service persists, implemented by [`postgres::PgStore`] and
/// [`memory::MemoryStore`].
pub trait Store: SensorStore + DeviceStore + AlertStore + SettingsStore + 'static {}

impl<T> Store for T where T: SensorStore + DeviceStore + AlertStore + SettingsStore + 'static {}
