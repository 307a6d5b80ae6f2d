use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{types::Json, PgPool};
use uuid::Uuid;

use super::{
    models::{Alert, AlertKind, DeviceHistory, DeviceState, NewSensorRecord, SensorRecord},
    AlertStore, DeviceStore, SensorStore, SettingsStore,
};
use crate::{
    alerts::settings::AlertSettings, automation::config::AutomationConfig, error::StoreError,
};

const AUTOMATION_SETTINGS: &str = "automation";
const ALERT_SETTINGS: &str = "alerts";

const INSERT_RECORD: &str = r#"
    INSERT INTO sensor_records
        (id, created_at, data_quality, temperature, humidity, soil_moisture,
         water_level, plant_height, rain_status, light_level, motion_detected)
    VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
    RETURNING *
"#;

/// Postgres-backed store.
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn load_setting<T>(&self, name: &str) -> Result<Option<T>, StoreError>
    where
        T: serde::de::DeserializeOwned + Send + Unpin + 'static,
    {
        let value: Option<Json<T>> =
            sqlx::query_scalar("SELECT value FROM settings WHERE name = $1")
                .bind(name)
                .fetch_optional(&self.pool)
                .await?;
        Ok(value.map(|Json(v)| v))
    }

    async fn save_setting<T>(&self, name: &str, value: &T) -> Result<(), StoreError>
    where
        T: serde::Serialize + Sync,
    {
        sqlx::query(
            r#"
            INSERT INTO settings (name, value, updated_at)
            VALUES ($1, $2, now())
            ON CONFLICT (name) DO UPDATE
                SET value = EXCLUDED.value, updated_at = EXCLUDED.updated_at
            "#,
        )
        .bind(name)
        .bind(Json(value))
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

fn insert_record_query(
    record: &NewSensorRecord,
) -> sqlx::query::QueryAs<'_, sqlx::Postgres, SensorRecord, sqlx::postgres::PgArguments> {
    let v = &record.values;
    sqlx::query_as::<_, SensorRecord>(INSERT_RECORD)
        .bind(record.id)
        .bind(record.created_at)
        .bind(record.data_quality)
        .bind(v.temperature)
        .bind(v.humidity)
        .bind(v.soil_moisture)
        .bind(v.water_level)
        .bind(v.plant_height)
        .bind(v.rain_status)
        .bind(v.light_level)
        .bind(v.motion_detected)
}

// ---------------------------------------------------------------------------
// SensorStore
// ---------------------------------------------------------------------------

#[async_trait]
impl SensorStore for PgStore {
    async fn insert_record(&self, record: NewSensorRecord) -> Result<SensorRecord, StoreError> {
        Ok(insert_record_query(&record).fetch_one(&self.pool).await?)
    }

    async fn list_records(&self) -> Result<Vec<SensorRecord>, StoreError> {
        Ok(
            sqlx::query_as::<_, SensorRecord>(
                "SELECT * FROM sensor_records ORDER BY created_at, seq",
            )
            .fetch_all(&self.pool)
            .await?,
        )
    }

    async fn recent_records(&self, limit: i64) -> Result<Vec<SensorRecord>, StoreError> {
        Ok(sqlx::query_as::<_, SensorRecord>(
            "SELECT * FROM sensor_records ORDER BY created_at DESC, seq DESC LIMIT $1",
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?)
    }

    async fn replace_records(
        &self,
        merged: NewSensorRecord,
        sources: &[Uuid],
    ) -> Result<SensorRecord, StoreError> {
        let mut tx = self.pool.begin().await?;
        let row = insert_record_query(&merged).fetch_one(&mut *tx).await?;
        sqlx::query("DELETE FROM sensor_records WHERE id = ANY($1)")
            .bind(sources)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(row)
    }
}

// ---------------------------------------------------------------------------
// DeviceStore
// ---------------------------------------------------------------------------

#[async_trait]
impl DeviceStore for PgStore {
    async fn upsert_device_state(&self, state: &DeviceState) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO device_status
                (device_type, status, last_triggered_at, last_sensor_value, last_trigger_reason, updated_at)
            VALUES ($1, $2, $3, $4, $5, now())
            ON CONFLICT (device_type) DO UPDATE SET
                status = EXCLUDED.status,
                last_triggered_at = EXCLUDED.last_triggered_at,
                last_sensor_value = EXCLUDED.last_sensor_value,
                last_trigger_reason = EXCLUDED.last_trigger_reason,
                updated_at = EXCLUDED.updated_at
            "#,
        )
        .bind(state.device_type)
        .bind(state.status)
        .bind(state.last_triggered_at)
        .bind(state.last_sensor_value)
        .bind(&state.last_trigger_reason)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn device_states(&self) -> Result<Vec<DeviceState>, StoreError> {
        Ok(sqlx::query_as::<_, DeviceState>(
            r#"
            SELECT device_type, status, last_triggered_at, last_sensor_value, last_trigger_reason
            FROM device_status
            ORDER BY device_type
            "#,
        )
        .fetch_all(&self.pool)
        .await?)
    }

    async fn insert_history(&self, entry: &DeviceHistory) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO device_history
                (id, device_type, action, status, source, reason, sensor_value,
                 success, error_message, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            "#,
        )
        .bind(entry.id)
        .bind(entry.device_type)
        .bind(entry.action)
        .bind(entry.status)
        .bind(entry.source)
        .bind(&entry.reason)
        .bind(entry.sensor_value)
        .bind(entry.success)
        .bind(&entry.error_message)
        .bind(entry.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn recent_history(&self, limit: i64) -> Result<Vec<DeviceHistory>, StoreError> {
        Ok(sqlx::query_as::<_, DeviceHistory>(
            "SELECT * FROM device_history ORDER BY created_at DESC LIMIT $1",
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?)
    }
}

// ---------------------------------------------------------------------------
// AlertStore
// ---------------------------------------------------------------------------

#[async_trait]
impl AlertStore for PgStore {
    async fn open_alert(&self, kind: AlertKind) -> Result<Option<Alert>, StoreError> {
        Ok(sqlx::query_as::<_, Alert>(
            r#"
            SELECT * FROM alerts
            WHERE kind = $1 AND NOT resolved
            ORDER BY created_at DESC
            LIMIT 1
            "#,
        )
        .bind(kind)
        .fetch_optional(&self.pool)
        .await?)
    }

    async fn insert_alert(&self, alert: &Alert) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO alerts
                (id, kind, level, message, sensor, value, threshold_min, threshold_max,
                 resolved, resolved_at, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            "#,
        )
        .bind(alert.id)
        .bind(alert.kind)
        .bind(alert.level)
        .bind(&alert.message)
        .bind(alert.sensor)
        .bind(alert.value)
        .bind(alert.threshold_min)
        .bind(alert.threshold_max)
        .bind(alert.resolved)
        .bind(alert.resolved_at)
        .bind(alert.created_at)
        .bind(alert.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn touch_alert(&self, id: Uuid, value: f64, at: DateTime<Utc>) -> Result<(), StoreError> {
        sqlx::query("UPDATE alerts SET value = $2, updated_at = $3 WHERE id = $1")
            .bind(id)
            .bind(value)
            .bind(at)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn resolve_alert(&self, id: Uuid, at: DateTime<Utc>) -> Result<(), StoreError> {
        sqlx::query(
            "UPDATE alerts SET resolved = TRUE, resolved_at = $2, updated_at = $2 WHERE id = $1",
        )
        .bind(id)
        .bind(at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn list_alerts(
        &self,
        resolved: Option<bool>,
        limit: i64,
    ) -> Result<Vec<Alert>, StoreError> {
        Ok(sqlx::query_as::<_, Alert>(
            r#"
            SELECT * FROM alerts
            WHERE ($1::boolean IS NULL OR resolved = $1)
            ORDER BY created_at DESC
            LIMIT $2
            "#,
        )
        .bind(resolved)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?)
    }
}

// ---------------------------------------------------------------------------
// SettingsStore
// ---------------------------------------------------------------------------

#[async_trait]
impl SettingsStore for PgStore {
    async fn load_automation_config(&self) -> Result<Option<AutomationConfig>, StoreError> {
        self.load_setting(AUTOMATION_SETTINGS).await
    }

    async fn save_automation_config(&self, config: &AutomationConfig) -> Result<(), StoreError> {
        self.save_setting(AUTOMATION_SETTINGS, config).await
    }

    async fn load_alert_settings(&self) -> Result<Option<AlertSettings>, StoreError> {
        self.load_setting(ALERT_SETTINGS).await
    }

    async fn save_alert_settings(&self, settings: &AlertSettings) -> Result<(), StoreError> {
        self.save_setting(ALERT_SETTINGS, settings).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::models::{DataQuality, SensorKind};

    #[sqlx::test(migrations = "./migrations")]
    #[ignore = "requires DATABASE_URL pointing at a Postgres server"]
    async fn replace_records_is_atomic(pool: PgPool) {
        let store = PgStore::new(pool);
        let now = Utc::now();
        let a = store
            .insert_record(NewSensorRecord::partial(SensorKind::Temperature, 25.0, now))
            .await
            .unwrap();
        let b = store
            .insert_record(NewSensorRecord::partial(SensorKind::Humidity, 60.0, now))
            .await
            .unwrap();
        assert!(b.seq > a.seq);

        let mut values = a.values;
        values.humidity = Some(60.0);
        let merged = store
            .replace_records(NewSensorRecord::composite(values, now), &[a.id, b.id])
            .await
            .unwrap();

        let rows = store.list_records().await.unwrap();
        assert_eq!(rows, vec![merged.clone()]);
        assert_eq!(merged.data_quality, DataQuality::Complete);
    }

    #[sqlx::test(migrations = "./migrations")]
    #[ignore = "requires DATABASE_URL pointing at a Postgres server"]
    async fn settings_round_trip_through_jsonb(pool: PgPool) {
        let store = PgStore::new(pool);
        assert!(store.load_alert_settings().await.unwrap().is_none());

        let mut settings = AlertSettings::default();
        settings.recipients = vec!["ops@example.com".into()];
        store.save_alert_settings(&settings).await.unwrap();
        store.save_alert_settings(&settings).await.unwrap();

        assert_eq!(store.load_alert_settings().await.unwrap(), Some(settings));
    }
}
