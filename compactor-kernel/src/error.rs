use std::path::PathBuf;

/// Startup errors: nothing is extracted or written once one of these is raised.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Cannot read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Invalid config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },
    #[error("Invalid epoch: {0}")]
    InvalidEpoch(String),
    #[error("Invalid time window bound: {0}")]
    InvalidWindow(String),
    #[error("Salt for masking method '{0}' can not be empty (supply one or enable masking.generate_salt)")]
    MissingSalt(String),
    #[error("Invalid regex '{pattern}': {source}")]
    InvalidRegex {
        pattern: String,
        #[source]
        source: regex::Error,
    },
    #[error("Cannot list backup directory {path}: {source}")]
    BackupDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// A single snapshot (or the instance database) could not be read.
#[derive(Debug, thiserror::Error)]
pub enum ExtractError {
    #[error("Snapshot {path} unreadable: {source}")]
    Unreadable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Query on {path} failed: {source}")]
    Query {
        path: PathBuf,
        #[source]
        source: rusqlite::Error,
    },
}

#[derive(Debug, thiserror::Error)]
pub enum WriteError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

#[derive(Debug, thiserror::Error)]
pub enum CompactorError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Extract(#[from] ExtractError),
    #[error(transparent)]
    Write(#[from] WriteError),
}
