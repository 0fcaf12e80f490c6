use crate::scheduler::SnapshotFailure;
use serde::Serialize;
use tracing::{info, warn};
use uuid::Uuid;

/// Counters of one machine-trace run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunReport {
    pub run_id: Uuid,
    pub snapshots_total: usize,
    pub snapshots_ok: usize,
    pub failures: Vec<SnapshotFailure>,
    pub observed_events: usize,
    pub synthesized_deletes: usize,
    pub merged_events: usize,
    pub dropped_events: usize,
    pub emitted_records: usize,
}

impl RunReport {
    pub fn new(snapshots_total: usize) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            snapshots_total,
            snapshots_ok: 0,
            failures: Vec::new(),
            observed_events: 0,
            synthesized_deletes: 0,
            merged_events: 0,
            dropped_events: 0,
            emitted_records: 0,
        }
    }

    pub fn snapshots_failed(&self) -> usize {
        self.failures.len()
    }

    pub fn log_summary(&self) {
        info!(
            "[report] run {}: {}/{} snapshots, {} observed + {} synthesized -> {} merged, {} dropped, {} emitted",
            self.run_id,
            self.snapshots_ok,
            self.snapshots_total,
            self.observed_events,
            self.synthesized_deletes,
            self.merged_events,
            self.dropped_events,
            self.emitted_records
        );
        if !self.failures.is_empty() {
            warn!(
                "[report] run {}: {} snapshots excluded",
                self.run_id,
                self.failures.len()
            );
        }
    }
}
