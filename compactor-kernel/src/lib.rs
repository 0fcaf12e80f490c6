/**
 * COMPACTOR KERNEL - host lifecycle traces from periodic database snapshots
 *
 * ROLE: turns a time-ordered series of noisy snapshots of an infrastructure
 * database into one clean, anonymized, time-ordered lifecycle trace per host.
 *
 * STAGES:
 * snapshots  -> per-snapshot facts (SQLite extractor, parallel scheduler)
 * reconcile  -> synthesized deletes + oldest-snapshot-wins merge
 * refine     -> per-host validity automaton (state)
 * traces     -> epoch-relative timing, keyed-hash and ordinal masking
 * writer     -> CSV or JSON lines
 */

pub mod anonymize;
pub mod cache;
pub mod config;
pub mod derived;
pub mod error;
pub mod instances;
pub mod models;
pub mod pipeline;
pub mod reconcile;
pub mod refine;
pub mod report;
pub mod scheduler;
pub mod snapshots;
pub mod state;
pub mod timefmt;
pub mod traces;
pub mod writer;

pub use error::{CompactorError, ConfigError, ExtractError, WriteError};
pub use models::{EventKey, EventKind, EventLog, HostObservation, LifecycleEvent, Properties, SnapshotResult};
pub use pipeline::{compact_machine_events, run_instance_trace, run_machine_trace};
pub use snapshots::{SnapshotExtractor, SourceKind};
