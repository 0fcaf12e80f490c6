//! Lifecycle validity refinement over the merged event log.
//!
//! Events are walked host by host in (timestamp, kind) order and replayed
//! through [`HostState`]; whatever the automaton rejects is removed. The
//! surviving log keeps its global key order.

use crate::models::{EventKey, EventLog};
use crate::state::HostState;
use std::collections::BTreeMap;
use tracing::debug;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Refined {
    pub events: EventLog,
    pub dropped: usize,
}

pub fn refine(mut events: EventLog) -> Refined {
    // Key order is (timestamp, host, kind): collecting per host preserves the
    // (timestamp, kind) order each host has to be replayed in.
    let mut per_host: BTreeMap<&str, Vec<&EventKey>> = BTreeMap::new();
    for key in events.keys() {
        per_host.entry(key.host.as_str()).or_default().push(key);
    }

    let mut rejected: Vec<EventKey> = Vec::new();
    for (host, keys) in per_host {
        let mut state = HostState::default();
        for key in keys {
            let properties = &events[key];
            let (next, keep) = state.transition(key.kind, properties);
            if !keep {
                debug!("[refine] dropping {} of {} at {}", key.kind, host, key.timestamp);
                rejected.push(key.clone());
            }
            state = next;
        }
    }

    let dropped = rejected.len();
    for key in rejected {
        events.remove(&key);
    }
    Refined { events, dropped }
}
