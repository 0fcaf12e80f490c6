use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use time::OffsetDateTime;

/// Property payload of an observation or event (capacity, rack label...).
/// Ordered so that payload equality and serialization are deterministic.
pub type Properties = BTreeMap<String, Value>;

/// Merged event collection, one payload per key, iterated in key order.
pub type EventLog = BTreeMap<EventKey, Properties>;

/// Lifecycle event kinds.
///
/// The declaration order is the tie-break used when two events of the same
/// host share a timestamp: CREATE < ENABLE < DISABLE < UPDATE < DELETE.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum EventKind {
    Create,
    Enable,
    Disable,
    Update,
    Delete,
}

impl EventKind {
    pub const ALL: [EventKind; 5] = [
        EventKind::Create,
        EventKind::Enable,
        EventKind::Disable,
        EventKind::Update,
        EventKind::Delete,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::Create => "CREATE",
            EventKind::Enable => "ENABLE",
            EventKind::Disable => "DISABLE",
            EventKind::Update => "UPDATE",
            EventKind::Delete => "DELETE",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EventKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        EventKind::ALL
            .into_iter()
            .find(|kind| kind.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| format!("unknown event kind '{s}'"))
    }
}

/// (timestamp, host, kind) - total order of the merged collection.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct EventKey {
    pub timestamp: OffsetDateTime,
    pub host: String,
    pub kind: EventKind,
}

impl EventKey {
    pub fn new(timestamp: OffsetDateTime, host: impl Into<String>, kind: EventKind) -> Self {
        Self {
            timestamp,
            host: host.into(),
            kind,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct LifecycleEvent {
    pub key: EventKey,
    pub properties: Properties,
}

impl LifecycleEvent {
    pub fn new(key: EventKey, properties: Properties) -> Self {
        Self { key, properties }
    }

    /// DELETE events never carry a payload.
    pub fn delete(timestamp: OffsetDateTime, host: impl Into<String>) -> Self {
        Self::new(
            EventKey::new(timestamp, host, EventKind::Delete),
            Properties::new(),
        )
    }
}

/// One host as seen in one snapshot.
#[derive(Debug, Clone, PartialEq)]
pub struct HostObservation {
    pub host_id: String,
    pub properties: Properties,
    pub created_at: OffsetDateTime,
    pub updated_at: Option<OffsetDateTime>,
    pub deleted_at: Option<OffsetDateTime>,
    pub enabled: bool,
    /// When the enabled flag was last written; keys the ENABLE/DISABLE event.
    pub status_updated_at: Option<OffsetDateTime>,
}

impl HostObservation {
    /// Candidate events implied by this observation. A missing timestamp
    /// simply yields no event of that kind.
    pub fn events(&self) -> Vec<LifecycleEvent> {
        let mut events = Vec::with_capacity(4);
        let keyed = |timestamp: OffsetDateTime, kind: EventKind| {
            LifecycleEvent::new(
                EventKey::new(timestamp, self.host_id.clone(), kind),
                self.properties.clone(),
            )
        };

        events.push(keyed(self.created_at, EventKind::Create));
        if let Some(updated_at) = self.updated_at {
            events.push(keyed(updated_at, EventKind::Update));
        }
        if let Some(deleted_at) = self.deleted_at {
            events.push(LifecycleEvent::delete(deleted_at, self.host_id.clone()));
        }
        if let Some(status_updated_at) = self.status_updated_at {
            let kind = if self.enabled {
                EventKind::Enable
            } else {
                EventKind::Disable
            };
            events.push(keyed(status_updated_at, kind));
        }
        events
    }
}

/// Everything one extraction task learned from one snapshot.
#[derive(Debug, Clone, PartialEq)]
pub struct SnapshotResult {
    pub snapshot: PathBuf,
    /// File modification time, the total order key between snapshots.
    pub captured_at: OffsetDateTime,
    pub observations: Vec<HostObservation>,
    pub hosts: BTreeSet<String>,
}

impl SnapshotResult {
    pub fn observed_events(&self) -> Vec<LifecycleEvent> {
        self.observations
            .iter()
            .flat_map(HostObservation::events)
            .collect()
    }
}
