use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use uuid::Uuid;

use super::{
    models::{Alert, AlertKind, DeviceHistory, DeviceState, DeviceType, NewSensorRecord, SensorRecord},
    AlertStore, DeviceStore, SensorStore, SettingsStore,
};
use crate::{
    alerts::settings::AlertSettings, automation::config::AutomationConfig, error::StoreError,
};

#[derive(Default)]
struct Tables {
    records: Vec<SensorRecord>,
    next_seq: i64,
    devices: BTreeMap<DeviceType, DeviceState>,
    history: Vec<DeviceHistory>,
    alerts: Vec<Alert>,
    automation: Option<AutomationConfig>,
    alert_settings: Option<AlertSettings>,
}

/// Process-local store used when no database is configured, and by tests.
#[derive(Default)]
pub struct MemoryStore {
    tables: RwLock<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn newest_first<T: Clone>(rows: &[T], limit: i64) -> Vec<T> {
    let limit = usize::try_from(limit).unwrap_or(0);
    rows.iter().rev().take(limit).cloned().collect()
}

#[async_trait]
impl SensorStore for MemoryStore {
    async fn insert_record(&self, record: NewSensorRecord) -> Result<SensorRecord, StoreError> {
        let mut t = self.tables.write().await;
        t.next_seq += 1;
        let row = record.into_record(t.next_seq);
        t.records.push(row.clone());
        Ok(row)
    }

    async fn list_records(&self) -> Result<Vec<SensorRecord>, StoreError> {
        let mut rows = self.tables.read().await.records.clone();
        rows.sort_by_key(SensorRecord::recency);
        Ok(rows)
    }

    async fn recent_records(&self, limit: i64) -> Result<Vec<SensorRecord>, StoreError> {
        let mut rows = self.list_records().await?;
        rows.reverse();
        rows.truncate(usize::try_from(limit).unwrap_or(0));
        Ok(rows)
    }

    async fn replace_records(
        &self,
        merged: NewSensorRecord,
        sources: &[Uuid],
    ) -> Result<SensorRecord, StoreError> {
        let mut t = self.tables.write().await;
        t.records.retain(|r| !sources.contains(&r.id));
        t.next_seq += 1;
        let row = merged.into_record(t.next_seq);
        t.records.push(row.clone());
        Ok(row)
    }
}

#[async_trait]
impl DeviceStore for MemoryStore {
    async fn upsert_device_state(&self, state: &DeviceState) -> Result<(), StoreError> {
        self.tables
            .write()
            .await
            .devices
            .insert(state.device_type, state.clone());
        Ok(())
    }

    async fn device_states(&self) -> Result<Vec<DeviceState>, StoreError> {
        Ok(self.tables.read().await.devices.values().cloned().collect())
    }

    async fn insert_history(&self, entry: &DeviceHistory) -> Result<(), StoreError> {
        self.tables.write().await.history.push(entry.clone());
        Ok(())
    }

    async fn recent_history(&self, limit: i64) -> Result<Vec<DeviceHistory>, StoreError> {
        Ok(newest_first(&self.tables.read().await.history, limit))
    }
}

#[async_trait]
impl AlertStore for MemoryStore {
    async fn open_alert(&self, kind: AlertKind) -> Result<Option<Alert>, StoreError> {
        Ok(self
            .tables
            .read()
            .await
            .alerts
            .iter()
            .rev()
            .find(|a| a.kind == kind && !a.resolved)
            .cloned())
    }

    async fn insert_alert(&self, alert: &Alert) -> Result<(), StoreError> {
        self.tables.write().await.alerts.push(alert.clone());
        Ok(())
    }

    async fn touch_alert(&self, id: Uuid, value: f64, at: DateTime<Utc>) -> Result<(), StoreError> {
        let mut t = self.tables.write().await;
        if let Some(alert) = t.alerts.iter_mut().find(|a| a.id == id) {
            alert.value = Some(value);
            alert.updated_at = at;
        }
        Ok(())
    }

    async fn resolve_alert(&self, id: Uuid, at: DateTime<Utc>) -> Result<(), StoreError> {
        let mut t = self.tables.write().await;
        if let Some(alert) = t.alerts.iter_mut().find(|a| a.id == id) {
            alert.resolved = true;
            alert.resolved_at = Some(at);
            alert.updated_at = at;
        }
        Ok(())
    }

    async fn list_alerts(
        &self,
        resolved: Option<bool>,
        limit: i64,
    ) -> Result<Vec<Alert>, StoreError> {
        let t = self.tables.read().await;
        let matching: Vec<Alert> = t
            .alerts
            .iter()
            .filter(|a| resolved.map_or(true, |r| a.resolved == r))
            .cloned()
            .collect();
        Ok(newest_first(&matching, limit))
    }
}

#[async_trait]
impl SettingsStore for MemoryStore {
    async fn load_automation_config(&self) -> Result<Option<AutomationConfig>, StoreError> {
        Ok(self.tables.read().await.automation.clone())
    }

    async fn save_automation_config(&self, config: &AutomationConfig) -> Result<(), StoreError> {
        self.tables.write().await.automation = Some(config.clone());
        Ok(())
    }

    async fn load_alert_settings(&self) -> Result<Option<AlertSettings>, StoreError> {
        Ok(self.tables.read().await.alert_settings.clone())
    }

    async fn save_alert_settings(&self, settings: &AlertSettings) -> Result<(), StoreError> {
        self.tables.write().await.alert_settings = Some(settings.clone());
        Ok(())
    }
}
