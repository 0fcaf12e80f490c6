//! Delete synthesis and provenance-aware merging of per-snapshot events.

use crate::models::{EventLog, LifecycleEvent, SnapshotResult};
use tracing::debug;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Reconciled {
    pub events: EventLog,
    pub observed: usize,
    pub synthesized_deletes: usize,
}

/// DELETE events for hosts present in `previous` but absent from `next`,
/// attributed to `next`'s capture time: the first point absence was confirmed.
pub fn synthesize_deletes(previous: &SnapshotResult, next: &SnapshotResult) -> Vec<LifecycleEvent> {
    previous
        .hosts
        .difference(&next.hosts)
        .map(|host| LifecycleEvent::delete(next.captured_at, host.clone()))
        .collect()
}

/// Candidate events of every snapshot, in snapshot order: what the snapshot
/// observed plus the deletions its own absences imply.
pub fn candidate_events(results: &[SnapshotResult]) -> Vec<Vec<LifecycleEvent>> {
    results
        .iter()
        .enumerate()
        .map(|(index, result)| {
            let mut events = result.observed_events();
            if index > 0 {
                events.extend(synthesize_deletes(&results[index - 1], result));
            }
            events
        })
        .collect()
}

/// Replays batches newest to oldest so the oldest snapshot producing a key
/// is the one whose payload survives.
pub fn merge(batches: Vec<Vec<LifecycleEvent>>) -> EventLog {
    let mut log = EventLog::new();
    for batch in batches.into_iter().rev() {
        for event in batch {
            log.insert(event.key, event.properties);
        }
    }
    log
}

/// `results` must be ordered by ascending capture time.
pub fn reconcile(results: &[SnapshotResult]) -> Reconciled {
    let batches = candidate_events(results);

    let observed = results
        .iter()
        .map(|r| r.observations.iter().map(|o| o.events().len()).sum::<usize>())
        .sum::<usize>();
    let total: usize = batches.iter().map(Vec::len).sum();
    let synthesized_deletes = total - observed;

    let events = merge(batches);
    debug!(
        "[merge] {} candidate events ({} synthesized deletes) merged into {} keys",
        total,
        synthesized_deletes,
        events.len()
    );

    Reconciled {
        events,
        observed,
        synthesized_deletes,
    }
}
