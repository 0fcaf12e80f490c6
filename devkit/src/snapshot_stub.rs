/*!
In-memory snapshot extractor

Stands in for the SQLite extractor so reconciliation can be tested without
writing database files. Outcomes are scripted per snapshot path; every call
is recorded.
*/

use compactor_kernel::error::ExtractError;
use compactor_kernel::models::SnapshotResult;
use compactor_kernel::snapshots::SnapshotExtractor;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Clone)]
enum Scripted {
    Snapshot(SnapshotResult),
    Failure(String),
}

#[derive(Debug, Clone, Default)]
pub struct StubExtractor {
    outcomes: Arc<Mutex<HashMap<PathBuf, Scripted>>>,
    delays: Arc<Mutex<HashMap<PathBuf, Duration>>>,
    calls: Arc<Mutex<Vec<PathBuf>>>,
}

impl StubExtractor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Serves `result` for its own `snapshot` path.
    pub fn with_snapshot(self, result: SnapshotResult) -> Self {
        self.outcomes
            .lock()
            .insert(result.snapshot.clone(), Scripted::Snapshot(result));
        self
    }

    /// Fails extraction of `snapshot` with `reason`.
    pub fn with_failure(self, snapshot: impl Into<PathBuf>, reason: &str) -> Self {
        self.outcomes
            .lock()
            .insert(snapshot.into(), Scripted::Failure(reason.to_string()));
        self
    }

    /// Blocks the worker for `delay` before answering for `snapshot`.
    pub fn with_delay(self, snapshot: impl Into<PathBuf>, delay: Duration) -> Self {
        self.delays.lock().insert(snapshot.into(), delay);
        self
    }

    /// Paths in call order.
    pub fn calls(&self) -> Vec<PathBuf> {
        self.calls.lock().clone()
    }

    /// Scripted snapshot paths ordered by capture time, failures last.
    pub fn snapshot_paths(&self) -> Vec<PathBuf> {
        let outcomes = self.outcomes.lock();
        let mut ok: Vec<&SnapshotResult> = outcomes
            .values()
            .filter_map(|o| match o {
                Scripted::Snapshot(result) => Some(result),
                Scripted::Failure(_) => None,
            })
            .collect();
        ok.sort_by_key(|r| (r.captured_at, r.snapshot.clone()));
        ok.into_iter().map(|r| r.snapshot.clone()).collect()
    }
}

impl SnapshotExtractor for StubExtractor {
    fn extract(&self, snapshot: &Path) -> Result<SnapshotResult, ExtractError> {
        self.calls.lock().push(snapshot.to_path_buf());
        let delay = self.delays.lock().get(snapshot).copied();
        if let Some(delay) = delay {
            std::thread::sleep(delay);
        }

        let outcome = self.outcomes.lock().get(snapshot).cloned();
        log::debug!("[stub] extract {} -> {:?}", snapshot.display(), outcome.is_some());
        match outcome {
            Some(Scripted::Snapshot(result)) => Ok(result),
            Some(Scripted::Failure(reason)) => Err(ExtractError::Unreadable {
                path: snapshot.to_path_buf(),
                source: std::io::Error::new(std::io::ErrorKind::InvalidData, reason),
            }),
            None => Err(ExtractError::Unreadable {
                path: snapshot.to_path_buf(),
                source: std::io::Error::new(std::io::ErrorKind::NotFound, "no scripted snapshot"),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::SnapshotBuilder;
    use time::macros::datetime;

    #[test]
    fn test_scripted_outcomes() {
        let snapshot = SnapshotBuilder::new("a.sqlite", datetime!(2016-01-01 00:00 UTC))
            .host("c01-04")
            .build();
        let stub = StubExtractor::new()
            .with_snapshot(snapshot.clone())
            .with_failure("b.sqlite", "truncated");

        assert_eq!(stub.extract(Path::new("a.sqlite")).unwrap(), snapshot);
        let err = stub.extract(Path::new("b.sqlite")).unwrap_err();
        assert!(err.to_string().contains("truncated"));
        assert!(stub.extract(Path::new("c.sqlite")).is_err());
        assert_eq!(stub.calls().len(), 3);
        assert_eq!(stub.snapshot_paths(), vec![PathBuf::from("a.sqlite")]);
    }
}
