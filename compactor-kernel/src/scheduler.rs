/**
 * SCHEDULER - bounded parallel snapshot extraction
 *
 * ROLE:
 * Runs one extraction task per snapshot on a fixed number of blocking workers
 * and hands the results back in submission order.
 *
 * RULES:
 * - at most `workers` extractions run at once
 * - results are slotted by submission index, never by completion order
 * - a failing or panicking task is logged and excluded; the batch goes on
 * - no shared mutable state between tasks
 */

use crate::models::SnapshotResult;
use crate::snapshots::SnapshotExtractor;
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, warn};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SnapshotFailure {
    pub index: usize,
    pub snapshot: PathBuf,
    pub reason: String,
}

#[derive(Debug, Default)]
pub struct ExtractionBatch {
    /// Successful extractions in submission order.
    pub results: Vec<SnapshotResult>,
    pub failures: Vec<SnapshotFailure>,
}

/// Extracts every snapshot with at most `workers` running concurrently.
pub async fn extract_all<E>(extractor: Arc<E>, snapshots: Vec<PathBuf>, workers: usize) -> ExtractionBatch
where
    E: SnapshotExtractor + ?Sized + 'static,
{
    let workers = workers.max(1);
    let semaphore = Arc::new(Semaphore::new(workers));
    let mut tasks = JoinSet::new();
    debug!("[scheduler] {} snapshots on {} workers", snapshots.len(), workers);

    for (index, snapshot) in snapshots.iter().cloned().enumerate() {
        let extractor = Arc::clone(&extractor);
        let semaphore = Arc::clone(&semaphore);
        tasks.spawn(async move {
            let outcome = match semaphore.acquire_owned().await {
                Ok(_permit) => {
                    let path = snapshot.clone();
                    tokio::task::spawn_blocking(move || extractor.extract(&path))
                        .await
                        .map_err(|e| format!("extraction task aborted: {e}"))
                        .and_then(|res| res.map_err(|e| e.to_string()))
                }
                Err(e) => Err(format!("worker pool closed: {e}")),
            };
            (index, outcome)
        });
    }

    let mut slots: Vec<Option<Result<SnapshotResult, String>>> = Vec::with_capacity(snapshots.len());
    slots.resize_with(snapshots.len(), || None);

    while let Some(joined) = tasks.join_next().await {
        match joined {
            Ok((index, outcome)) => slots[index] = Some(outcome),
            Err(e) => warn!("[scheduler] task lost: {}", e),
        }
    }

    let mut batch = ExtractionBatch::default();
    for (index, (slot, snapshot)) in slots.into_iter().zip(snapshots).enumerate() {
        match slot {
            Some(Ok(result)) => batch.results.push(result),
            Some(Err(reason)) => {
                warn!("[scheduler] snapshot {} failed: {}", snapshot.display(), reason);
                batch.failures.push(SnapshotFailure { index, snapshot, reason });
            }
            None => {
                warn!("[scheduler] snapshot {} produced no result", snapshot.display());
                batch.failures.push(SnapshotFailure {
                    index,
                    snapshot,
                    reason: "extraction task did not complete".to_string(),
                });
            }
        }
    }
    batch
}
