use std::{
    collections::VecDeque,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
};

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::{
    db::{
        models::{NewSensorRecord, SensorKind, SensorRecord, SensorValues},
        SensorStore,
    },
    error::{GreenhouseError, Result},
};

/// Completed passes remembered for callers that joined them.
const RECENT_REPORTS: usize = 8;

// ---------------------------------------------------------------------------
// Options & report
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase", default)]
pub struct MergeOptions {
    /// Records within this many milliseconds of a group's anchor are merged.
    pub time_window_ms: i64,
    /// Only merge records with identical `created_at`.
    pub exact_duplicates_only: bool,
    /// Insert merged rows without deleting their sources.
    pub preserve_original: bool,
}

impl Default for MergeOptions {
    fn default() -> Self {
        Self::window(60_000)
    }
}

impl MergeOptions {
    pub fn exact() -> Self {
        Self {
            time_window_ms: 0,
            exact_duplicates_only: true,
            preserve_original: false,
        }
    }

    pub fn window(time_window_ms: i64) -> Self {
        Self {
            time_window_ms,
            exact_duplicates_only: false,
            preserve_original: false,
        }
    }
}

/// A group left untouched because it could not be resolved.
#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct MergeConflict {
    pub anchor: DateTime<Utc>,
    pub record_ids: Vec<Uuid>,
    pub reason: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct MergeReport {
    /// Rows inserted by the pass.
    pub merged_records: usize,
    /// Source rows removed by the pass.
    pub deleted_records: usize,
    /// Groups of two or more records that were merged.
    pub processed_groups: usize,
    /// Records that belonged to a group of two or more.
    pub total_duplicates: usize,
    pub conflicts: Vec<MergeConflict>,
}

// ---------------------------------------------------------------------------
// MergeService
// ---------------------------------------------------------------------------

#[derive(Default)]
struct FlightState {
    running: Option<(u64, MergeOptions)>,
    recent: VecDeque<(u64, MergeReport)>,
}

/// Collapses partial records that describe the same moment into one row.
///
/// Passes never overlap. A call that arrives while a pass with identical
/// options is running waits for it and returns its report.
pub struct MergeService {
    store: Arc<dyn SensorStore>,
    pass_lock: Mutex<()>,
    flight: Mutex<FlightState>,
    passes: AtomicU64,
}

impl MergeService {
    pub fn new(store: Arc<dyn SensorStore>) -> Self {
        Self {
            store,
            pass_lock: Mutex::new(()),
            flight: Mutex::new(FlightState::default()),
            passes: AtomicU64::new(0),
        }
    }

    /// Number of passes started since construction.
    pub fn passes_started(&self) -> u64 {
        self.passes.load(Ordering::Relaxed)
    }

    pub async fn merge_same_timestamp_data(&self, options: MergeOptions) -> Result<MergeReport> {
        let joined = {
            let flight = self.flight.lock().await;
            flight
                .running
                .filter(|(_, running)| *running == options)
                .map(|(id, _)| id)
        };

        let _pass = self.pass_lock.lock().await;

        if let Some(id) = joined {
            let flight = self.flight.lock().await;
            if let Some((_, report)) = flight.recent.iter().find(|(done, _)| *done == id) {
                debug!(pass = id, "Joined in-flight merge pass");
                return Ok(report.clone());
            }
            // the joined pass failed; run a fresh one
        }

        let id = self.passes.fetch_add(1, Ordering::Relaxed) + 1;
        self.flight.lock().await.running = Some((id, options));

        let result = self.run_pass(options).await;

        let mut flight = self.flight.lock().await;
        flight.running = None;
        if let Ok(report) = &result {
            if flight.recent.len() == RECENT_REPORTS {
                flight.recent.pop_front();
            }
            flight.recent.push_back((id, report.clone()));
        }
        result
    }

    async fn run_pass(&self, options: MergeOptions) -> Result<MergeReport> {
        let records = self.store.list_records().await?;
        let mut report = MergeReport::default();

        for group in group_records(records, &options) {
            if group.len() < 2 {
                continue;
            }
            let anchor = group[0].created_at;
            let ids: Vec<Uuid> = group.iter().map(|r| r.id).collect();

            let values = match resolve_group(&group) {
                Ok(values) => values,
                Err(e) => {
                    warn!(anchor = %anchor, records = ids.len(), error = %e, "Skipping merge group for manual review");
                    report.total_duplicates += group.len();
                    report.conflicts.push(MergeConflict {
                        anchor,
                        record_ids: ids,
                        reason: e.to_string(),
                    });
                    continue;
                }
            };

            // kept sources stay groupable; a row that already carries the
            // merged values means an earlier pass covered this group
            if options.preserve_original && group.iter().any(|r| r.values == values) {
                debug!(anchor = %anchor, records = ids.len(), "Group already merged");
                continue;
            }
            report.total_duplicates += group.len();

            let merged = NewSensorRecord::composite(values, anchor);
            if options.preserve_original {
                self.store.insert_record(merged).await?;
            } else {
                self.store.replace_records(merged, &ids).await?;
                report.deleted_records += ids.len();
            }
            report.merged_records += 1;
            report.processed_groups += 1;
        }

        if report.processed_groups > 0 || !report.conflicts.is_empty() {
            info!(
                merged = report.merged_records,
                deleted = report.deleted_records,
                groups = report.processed_groups,
                conflicts = report.conflicts.len(),
                "Merge pass completed"
            );
        }
        Ok(report)
    }
}

/// Split records already ordered by `(created_at, seq)` into merge groups.
///
/// Exact mode groups equal timestamps. Window mode starts a group at the
/// earliest unclaimed record and claims every later record within the window
/// of that anchor.
fn group_records(records: Vec<SensorRecord>, options: &MergeOptions) -> Vec<Vec<SensorRecord>> {
    let window = if options.exact_duplicates_only {
        Duration::zero()
    } else {
        Duration::milliseconds(options.time_window_ms.max(0))
    };

    let mut groups: Vec<Vec<SensorRecord>> = Vec::new();
    for record in records {
        match groups.last_mut() {
            Some(group) if record.created_at - group[0].created_at <= window => group.push(record),
            _ => groups.push(vec![record]),
        }
    }
    groups
}

/// Per kind, the non-null value of the most recent record in the group.
fn resolve_group(group: &[SensorRecord]) -> Result<SensorValues> {
    let conflict = |reason: String| GreenhouseError::MergeConflict {
        anchor: group[0].created_at.to_rfc3339(),
        reason,
    };

    let mut merged = SensorValues::default();
    for kind in SensorKind::ALL {
        let mut best: Option<(&SensorRecord, f64)> = None;
        for record in group {
            let Some(value) = record.values.get(kind) else {
                continue;
            };
            if !value.is_finite() {
                return Err(conflict(format!("non-finite {kind} in record {}", record.id)));
            }
            if best.map_or(true, |(prev, _)| prev.recency() < record.recency()) {
                best = Some((record, value));
            }
        }
        merged.set(kind, best.map(|(_, v)| v));
    }
    Ok(merged)
}
