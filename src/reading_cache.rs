use std::{collections::HashMap, sync::Arc, time::Duration};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::RwLock;
use utoipa::ToSchema;

use crate::db::models::{SensorKind, SensorValues};

/// Latest value of one sensor kind together with its arrival time.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct BufferedValue {
    pub value: f64,
    pub arrived_at: DateTime<Utc>,
}

/// In-memory buffer of the most recent reading per [`SensorKind`].
///
/// Wrapped in `Arc` so it can be cheaply cloned and shared across tasks.
/// Uses `tokio::sync::RwLock` so concurrent readers never block each other.
#[derive(Clone, Default)]
pub struct ReadingCache {
    inner: Arc<RwLock<HashMap<SensorKind, BufferedValue>>>,
    /// Entries older than this are left out of snapshots. `None` keeps them
    /// indefinitely.
    max_age: Option<Duration>,
}

impl ReadingCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_age(max_age: Option<Duration>) -> Self {
        Self {
            max_age,
            ..Self::default()
        }
    }

    /// Overwrite the buffered value for `kind`; last write wins.
    pub async fn update(&self, kind: SensorKind, value: f64, arrived_at: DateTime<Utc>) {
        self.inner
            .write()
            .await
            .insert(kind, BufferedValue { value, arrived_at });
    }

    pub async fn get(&self, kind: SensorKind) -> Option<BufferedValue> {
        self.inner.read().await.get(&kind).copied()
    }

    /// Every buffered entry, regardless of age.
    pub async fn all(&self) -> HashMap<SensorKind, BufferedValue> {
        self.inner.read().await.clone()
    }

    /// Values fresh relative to `now`, one per kind.
    pub async fn snapshot(&self, now: DateTime<Utc>) -> SensorValues {
        let max_age = self
            .max_age
            .and_then(|d| chrono::Duration::from_std(d).ok());
        let mut values = SensorValues::default();
        for (kind, entry) in self.inner.read().await.iter() {
            let fresh = max_age.map_or(true, |age| now - entry.arrived_at <= age);
            if fresh {
                values.set(*kind, Some(entry.value));
            }
        }
        values
    }

    /// A snapshot holding every core kind, or `None` while any is missing.
    pub async fn core_snapshot(&self, now: DateTime<Utc>) -> Option<SensorValues> {
        let values = self.snapshot(now).await;
        values.has_all_core().then_some(values)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn fill_core(cache: &ReadingCache, at: DateTime<Utc>) {
        cache.update(SensorKind::Temperature, 24.0, at).await;
        cache.update(SensorKind::Humidity, 55.0, at).await;
        cache.update(SensorKind::SoilMoisture, 1.0, at).await;
        cache.update(SensorKind::WaterLevel, 1.0, at).await;
    }

    #[tokio::test]
    async fn empty_cache_returns_nothing() {
        let cache = ReadingCache::new();
        assert!(cache.all().await.is_empty());
        assert!(cache.get(SensorKind::Temperature).await.is_none());
        assert!(cache.core_snapshot(Utc::now()).await.is_none());
    }

    #[tokio::test]
    async fn update_overwrites_previous_reading() {
        let cache = ReadingCache::new();
        let now = Utc::now();
        cache.update(SensorKind::Temperature, 20.0, now).await;
        cache.update(SensorKind::Temperature, 25.0, now).await;

        assert_eq!(cache.get(SensorKind::Temperature).await.unwrap().value, 25.0);
        assert_eq!(cache.all().await.len(), 1);
    }

    #[tokio::test]
    async fn core_snapshot_needs_all_four() {
        let cache = ReadingCache::new();
        let now = Utc::now();
        cache.update(SensorKind::Temperature, 24.0, now).await;
        cache.update(SensorKind::LightLevel, 0.0, now).await;
        assert!(cache.core_snapshot(now).await.is_none());

        fill_core(&cache, now).await;
        let snap = cache.core_snapshot(now).await.unwrap();
        assert_eq!(snap.humidity, Some(55.0));
        assert_eq!(snap.light_level, Some(0.0));
    }

    #[tokio::test]
    async fn stale_entries_kept_without_max_age() {
        let cache = ReadingCache::new();
        let long_ago = Utc::now() - chrono::Duration::days(3);
        fill_core(&cache, long_ago).await;
        assert!(cache.core_snapshot(Utc::now()).await.is_some());
    }

    #[tokio::test]
    async fn max_age_excludes_stale_entries() {
        let cache = ReadingCache::with_max_age(Some(Duration::from_secs(60)));
        let now = Utc::now();
        fill_core(&cache, now).await;
        cache
            .update(SensorKind::WaterLevel, 0.0, now - chrono::Duration::minutes(5))
            .await;

        assert!(cache.core_snapshot(now).await.is_none());
        assert_eq!(cache.snapshot(now).await.water_level, None);
        // still buffered, just not fresh
        assert!(cache.get(SensorKind::WaterLevel).await.is_some());
    }

    #[tokio::test]
    async fn clone_shares_state() {
        let cache = ReadingCache::new();
        let clone = cache.clone();

        cache.update(SensorKind::RainStatus, 1.0, Utc::now()).await;

        assert_eq!(clone.get(SensorKind::RainStatus).await.unwrap().value, 1.0);
    }
}
