/**
 * SNAPSHOTS - discovery and fact extraction of periodic database backups
 *
 * ROLE:
 * Every backup file is one point-in-time capture of the host tables. This
 * module lists the captures in time order and defines the extraction seam the
 * scheduler drives.
 *
 * OPERATION:
 * - discover_snapshots = backup files matching the configured regex, by mtime
 * - SnapshotExtractor  = snapshot path -> SnapshotResult | ExtractError
 * - SourceKind         = vm / baremetal selector; changes tables and payload keys only
 *
 * The reconciliation core never looks past SnapshotResult, so a test can swap
 * the SQLite extractor for an in-memory one.
 */

pub mod sqlite;

pub use sqlite::SqliteExtractor;

use crate::config::BackupConfig;
use crate::error::{ConfigError, ExtractError};
use crate::models::SnapshotResult;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::SystemTime;
use tracing::{debug, warn};

/// Extraction seam, run on blocking worker threads by the scheduler.
/// Implementations report bad input as `ExtractError`, never by panicking.
pub trait SnapshotExtractor: Send + Sync {
    fn extract(&self, snapshot: &Path) -> Result<SnapshotResult, ExtractError>;
}

/// Instance type selector: virtualized compute nodes or bare-metal nodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    Vm,
    Baremetal,
}

impl SourceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceKind::Vm => "vm",
            SourceKind::Baremetal => "baremetal",
        }
    }

    /// Property rank-masked in machine traces unless configured otherwise.
    pub fn default_ordinal_field(&self) -> Option<&'static str> {
        match self {
            SourceKind::Vm => Some("rack"),
            SourceKind::Baremetal => None,
        }
    }

    /// Instance flavor fields folded into the PROPERTIES column.
    pub fn instance_properties(&self) -> &'static [&'static str] {
        match self {
            SourceKind::Vm => &["memory_mb", "root_gb", "vcpus"],
            SourceKind::Baremetal => &[],
        }
    }
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SourceKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "vm" => Ok(SourceKind::Vm),
            "baremetal" => Ok(SourceKind::Baremetal),
            other => Err(format!("unknown instance type '{other}' (vm, baremetal)")),
        }
    }
}

/// Backup files of `backup.dir` matching `backup.file_regex`, oldest first.
/// Files sharing an mtime are ordered by path.
pub fn discover_snapshots(backup: &BackupConfig) -> Result<Vec<PathBuf>, ConfigError> {
    let pattern = Regex::new(&backup.file_regex).map_err(|source| ConfigError::InvalidRegex {
        pattern: backup.file_regex.clone(),
        source,
    })?;
    let dir_error = |source| ConfigError::BackupDir {
        path: backup.dir.clone(),
        source,
    };

    let mut snapshots: Vec<(SystemTime, PathBuf)> = Vec::new();
    for entry in std::fs::read_dir(&backup.dir).map_err(dir_error)? {
        let entry = entry.map_err(dir_error)?;
        let path = entry.path();
        let metadata = match entry.metadata() {
            Ok(metadata) => metadata,
            Err(e) => {
                warn!("[snapshots] skipping {}: {}", path.display(), e);
                continue;
            }
        };
        if !metadata.is_file() {
            continue;
        }
        let name = entry.file_name();
        if !pattern.is_match(&name.to_string_lossy()) {
            debug!("[snapshots] {} does not match backup pattern", path.display());
            continue;
        }
        let modified = metadata.modified().unwrap_or(SystemTime::UNIX_EPOCH);
        snapshots.push((modified, path));
    }

    snapshots.sort();
    Ok(snapshots.into_iter().map(|(_, path)| path).collect())
}
