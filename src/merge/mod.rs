pub mod service;

use tracing::warn;

pub use service::{MergeConflict, MergeOptions, MergeReport, MergeService};

use crate::alerts::AlertEngine;

/// Run a merge ahead of a read of persisted records.
///
/// A failed merge leaves the data as it was and raises a system alert; the
/// read goes ahead on unmerged rows.
pub async fn merge_before_read(
    merger: &MergeService,
    options: MergeOptions,
    alerts: &AlertEngine,
) -> Option<MergeReport> {
    match merger.merge_same_timestamp_data(options).await {
        Ok(report) => Some(report),
        Err(e) => {
            warn!(error = %e, "Merge before read failed; serving unmerged data");
            alerts
                .handle_system_error(&format!("merge failed: {e}"), "merge")
                .await;
            None
        }
    }
}
