use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use tokio::sync::{Mutex, MutexGuard};

use crate::db::models::{DeviceState, DeviceType};

/// Minimum spacing between two accepted triggers of one device.
pub const MIN_TRIGGER_INTERVAL_MS: i64 = 1_000;

/// Repeating the current state needs at least this much sensor movement.
pub const VALUE_DEAD_BAND: f64 = 0.1;

/// Anti-spam gate for one candidate command.
///
/// A device with no recorded state always triggers. Otherwise triggers are
/// spaced by [`MIN_TRIGGER_INTERVAL_MS`], and re-asserting the current status
/// additionally needs the sensor to have moved by more than
/// [`VALUE_DEAD_BAND`].
pub fn should_trigger(
    state: Option<&DeviceState>,
    target: bool,
    value: f64,
    now: DateTime<Utc>,
) -> bool {
    let Some(state) = state else {
        return true;
    };
    if now - state.last_triggered_at < Duration::milliseconds(MIN_TRIGGER_INTERVAL_MS) {
        return false;
    }
    if state.status == target {
        return state
            .last_sensor_value
            .map_or(true, |last| (value - last).abs() > VALUE_DEAD_BAND);
    }
    true
}

struct Slots {
    light: Mutex<Option<DeviceState>>,
    pump: Mutex<Option<DeviceState>>,
    door: Mutex<Option<DeviceState>>,
    window: Mutex<Option<DeviceState>>,
}

/// Last accepted decision per device, one lock each.
///
/// Holding a device's guard serialises the whole decide, control and
/// record sequence for that device.
#[derive(Clone)]
pub struct DeviceStateCache {
    slots: Arc<Slots>,
}

impl Default for DeviceStateCache {
    fn default() -> Self {
        Self {
            slots: Arc::new(Slots {
                light: Mutex::new(None),
                pump: Mutex::new(None),
                door: Mutex::new(None),
                window: Mutex::new(None),
            }),
        }
    }
}

impl DeviceStateCache {
    pub fn new() -> Self {
        Self::default()
    }

    fn slot(&self, device: DeviceType) -> &Mutex<Option<DeviceState>> {
        match device {
            DeviceType::Light => &self.slots.light,
            DeviceType::Pump => &self.slots.pump,
            DeviceType::Door => &self.slots.door,
            DeviceType::Window => &self.slots.window,
        }
    }

    pub async fn lock(&self, device: DeviceType) -> MutexGuard<'_, Option<DeviceState>> {
        self.slot(device).lock().await
    }

    pub async fn get(&self, device: DeviceType) -> Option<DeviceState> {
        self.slot(device).lock().await.clone()
    }

    /// Every device that has a recorded state.
    pub async fn snapshot(&self) -> Vec<DeviceState> {
        let mut states = Vec::new();
        for device in DeviceType::ALL {
            if let Some(state) = self.get(device).await {
                states.push(state);
            }
        }
        states
    }

    /// Replace every slot; devices missing from `states` are cleared.
    pub async fn replace_all(&self, states: Vec<DeviceState>) {
        for device in DeviceType::ALL {
            let next = states.iter().find(|s| s.device_type == device).cloned();
            *self.slot(device).lock().await = next;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state(status: bool, value: f64, at: DateTime<Utc>) -> DeviceState {
        DeviceState {
            device_type: DeviceType::Light,
            status,
            last_triggered_at: at,
            last_sensor_value: Some(value),
            last_trigger_reason: None,
        }
    }

    #[test]
    fn cold_start_always_triggers() {
        assert!(should_trigger(None, true, 0.0, Utc::now()));
    }

    #[test]
    fn triggers_within_a_second_are_suppressed() {
        let t0 = Utc::now();
        let s = state(true, 0.0, t0);
        assert!(!should_trigger(Some(&s), false, 1.0, t0 + Duration::milliseconds(500)));
        assert!(should_trigger(Some(&s), false, 1.0, t0 + Duration::milliseconds(1_500)));
    }

    #[test]
    fn same_status_needs_value_movement() {
        let t0 = Utc::now();
        let s = state(true, 20.0, t0);
        let later = t0 + Duration::seconds(5);
        assert!(!should_trigger(Some(&s), true, 20.05, later));
        assert!(!should_trigger(Some(&s), true, 19.92, later));
        assert!(should_trigger(Some(&s), true, 20.2, later));
    }

    #[tokio::test]
    async fn replace_all_clears_missing_devices() {
        let cache = DeviceStateCache::new();
        *cache.lock(DeviceType::Pump).await = Some(DeviceState {
            device_type: DeviceType::Pump,
            ..state(true, 0.0, Utc::now())
        });
        cache
            .replace_all(vec![state(false, 1.0, Utc::now())])
            .await;

        assert!(cache.get(DeviceType::Pump).await.is_none());
        assert_eq!(cache.snapshot().await.len(), 1);
        assert!(!cache.get(DeviceType::Light).await.unwrap().status);
    }
}
