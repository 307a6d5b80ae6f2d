use std::{sync::Arc, time::Duration};

use tokio::time;
use tracing::{error, info, warn};

use crate::{
    alerts::AlertEngine,
    automation::{AutomationEngine, AutomationSettings, DataProcessingPause},
    broadcast::Broadcaster,
    config::Config,
    control::{CommandPublisher, DeviceController},
    db::{AlertStore, DeviceStore, SensorStore, Store},
    error::Result,
    merge::{MergeOptions, MergeService},
    notify::NotificationSender,
    reading_cache::ReadingCache,
    sensors::SensorService,
};

/// Knobs [`Greenhouse::build`] needs from the environment.
#[derive(Debug, Clone)]
pub struct GreenhouseOptions {
    pub topic_prefix: String,
    pub merge_window_ms: i64,
    pub buffer_max_age: Option<Duration>,
    pub alert_recipients: Vec<String>,
}

impl Default for GreenhouseOptions {
    fn default() -> Self {
        Self {
            topic_prefix: "greenhouse".into(),
            merge_window_ms: 60_000,
            buffer_max_age: None,
            alert_recipients: Vec::new(),
        }
    }
}

impl From<&Config> for GreenhouseOptions {
    fn from(config: &Config) -> Self {
        Self {
            topic_prefix: config.mqtt.topic_prefix.clone(),
            merge_window_ms: config.merge_window_ms,
            buffer_max_age: config.buffer_max_age,
            alert_recipients: config.alert_recipients.clone(),
        }
    }
}

/// Every long-lived component, wired once and shared by clone.
#[derive(Clone)]
pub struct Greenhouse {
    pub records: Arc<dyn SensorStore>,
    pub devices: Arc<dyn DeviceStore>,
    pub alert_store: Arc<dyn AlertStore>,
    pub broadcaster: Broadcaster,
    pub merger: Arc<MergeService>,
    pub alerts: AlertEngine,
    pub controller: DeviceController,
    pub automation: AutomationEngine,
    pub sensors: SensorService,
    pub read_merge: MergeOptions,
}

impl Greenhouse {
    /// Wire the pipeline over `store` and load persisted settings.
    ///
    /// An automation config that cannot be loaded leaves automation
    /// disabled; the periodic check retries the load.
    pub async fn build<S: Store>(
        store: Arc<S>,
        publisher: Arc<dyn CommandPublisher>,
        notifier: Arc<dyn NotificationSender>,
        options: GreenhouseOptions,
    ) -> Result<Self> {
        let broadcaster = Broadcaster::default();
        let read_merge = MergeOptions::window(options.merge_window_ms);

        let alerts = AlertEngine::new(store.clone(), store.clone(), notifier, broadcaster.clone());
        alerts.load_settings(&options.alert_recipients).await?;

        let settings = AutomationSettings::new(store.clone());
        if let Err(e) = settings.reload().await {
            warn!(error = %e, "Starting with automation disabled");
        }

        let controller = DeviceController::new(
            publisher,
            store.clone(),
            broadcaster.clone(),
            options.topic_prefix,
        );
        let merger = Arc::new(MergeService::new(store.clone()));
        let pause = DataProcessingPause::new();
        let automation = AutomationEngine::new(
            settings,
            controller.clone(),
            store.clone(),
            store.clone(),
            merger.clone(),
            alerts.clone(),
            pause.clone(),
        )
        .with_read_merge(read_merge);
        automation.refresh_cache().await?;

        let sensors = SensorService::new(
            store.clone(),
            ReadingCache::with_max_age(options.buffer_max_age),
            alerts.clone(),
            automation.clone(),
            pause,
            broadcaster.clone(),
        );

        Ok(Self {
            records: store.clone(),
            devices: store.clone(),
            alert_store: store,
            broadcaster,
            merger,
            alerts,
            controller,
            automation,
            sensors,
            read_merge,
        })
    }

    /// Periodic near-duplicate merge. Spawn this via `tokio::spawn`.
    pub async fn run_merge(self, interval: Duration) {
        info!(interval_secs = interval.as_secs(), window_ms = self.read_merge.time_window_ms, "Merge loop started");
        let mut ticker = time::interval(interval);

        loop {
            ticker.tick().await;
            match self.merger.merge_same_timestamp_data(self.read_merge).await {
                Ok(report) if report.merged_records > 0 => {
                    info!(
                        merged = report.merged_records,
                        deleted = report.deleted_records,
                        conflicts = report.conflicts.len(),
                        "Periodic merge finished"
                    );
                }
                Ok(_) => {}
                Err(e) => {
                    error!(error = %e, "Periodic merge failed");
                    self.alerts
                        .handle_system_error(&format!("periodic merge failed: {e}"), "merge")
                        .await;
                }
            }
        }
    }
}
