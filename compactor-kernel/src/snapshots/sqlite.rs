//! SQLite snapshot extractor for both source kinds.

use super::{SnapshotExtractor, SourceKind};
use crate::config::SourceConfig;
use crate::error::{ConfigError, ExtractError};
use crate::models::{HostObservation, Properties, SnapshotResult};
use crate::timefmt::parse_timestamp;
use regex::Regex;
use rusqlite::types::ValueRef;
use rusqlite::{params_from_iter, Connection, OpenFlags, Row};
use serde_json::Value;
use std::collections::BTreeSet;
use std::path::Path;
use time::OffsetDateTime;
use tracing::debug;

/// Tables read from a `vm` snapshot.
pub const VM_SNAPSHOT_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS compute_nodes (
    id INTEGER PRIMARY KEY,
    created_at TEXT,
    updated_at TEXT,
    deleted_at TEXT,
    host TEXT,
    hypervisor_hostname TEXT,
    vcpus INTEGER,
    memory_mb INTEGER,
    local_gb INTEGER
);
CREATE TABLE IF NOT EXISTS services (
    id INTEGER PRIMARY KEY,
    created_at TEXT,
    updated_at TEXT,
    host TEXT,
    "binary" TEXT,
    disabled INTEGER
);
"#;

/// Tables read from a `baremetal` snapshot.
pub const BAREMETAL_SNAPSHOT_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS nodes (
    id INTEGER PRIMARY KEY,
    uuid TEXT,
    updated_at TEXT,
    maintenance INTEGER
);
CREATE TABLE IF NOT EXISTS computehosts (
    id INTEGER PRIMARY KEY,
    created_at TEXT,
    hypervisor_hostname TEXT
);
CREATE TABLE IF NOT EXISTS computehost_extra_capabilities (
    id INTEGER PRIMARY KEY,
    computehost_id INTEGER,
    created_at TEXT,
    updated_at TEXT,
    capability_name TEXT,
    capability_value TEXT
);
"#;

const VM_QUERY: &str = r#"
SELECT cn.created_at, cn.updated_at, cn.deleted_at, s.updated_at, s.disabled,
       cn.hypervisor_hostname, cn.vcpus, cn.memory_mb, cn.local_gb
FROM compute_nodes AS cn
LEFT JOIN services AS s ON cn.host = s.host
WHERE s."binary" = ?1
"#;

const BAREMETAL_QUERY: &str = r#"
SELECT c.created_at, e.created_at, e.updated_at, i.updated_at, i.uuid, i.maintenance,
       e.capability_name, e.capability_value
FROM nodes AS i
JOIN computehosts AS c ON i.uuid = c.hypervisor_hostname
JOIN computehost_extra_capabilities AS e ON e.computehost_id = c.id
"#;

#[derive(Debug, Clone)]
struct RackExtractor {
    regex: Regex,
    group: usize,
}

impl RackExtractor {
    fn rack(&self, hostname: &str) -> Value {
        self.regex
            .captures(hostname)
            .and_then(|caps| caps.get(self.group))
            .map(|m| Value::from(m.as_str()))
            .unwrap_or(Value::Null)
    }
}

#[derive(Debug, Clone)]
pub struct SqliteExtractor {
    kind: SourceKind,
    nova_compute_binary: String,
    rack: Option<RackExtractor>,
    baremetal_properties: Vec<String>,
}

impl SqliteExtractor {
    pub fn new(source: &SourceConfig) -> Result<Self, ConfigError> {
        let rack = match source.hypervisor_hostname_regex.as_deref() {
            None | Some("") => None,
            Some(pattern) => {
                let regex = Regex::new(pattern).map_err(|e| ConfigError::InvalidRegex {
                    pattern: pattern.to_string(),
                    source: e,
                })?;
                let group = source
                    .rack_extract_group
                    .unwrap_or(if regex.captures_len() > 1 { 1 } else { 0 });
                Some(RackExtractor { regex, group })
            }
        };
        Ok(Self {
            kind: source.kind,
            nova_compute_binary: source.nova_compute_binary.clone(),
            rack,
            baremetal_properties: source.baremetal_properties.clone(),
        })
    }

    pub fn kind(&self) -> SourceKind {
        self.kind
    }

    fn extract_vm(&self, conn: &Connection, path: &Path) -> rusqlite::Result<Extracted> {
        let mut extracted = Extracted::default();
        let mut stmt = conn.prepare(VM_QUERY)?;
        let mut rows = stmt.query([&self.nova_compute_binary])?;

        while let Some(row) = rows.next()? {
            let Some(hostname) = text_at(row, 5)? else {
                debug!("[extract] {}: compute node without hypervisor hostname", path.display());
                continue;
            };
            extracted.hosts.insert(hostname.clone());

            let Some(created_at) = timestamp_at(row, 0)? else {
                debug!("[extract] {}: {} has no creation time, dropped", path.display(), hostname);
                continue;
            };
            let rack = match &self.rack {
                Some(extractor) => extractor.rack(&hostname),
                None => Value::Null,
            };
            let properties = Properties::from([
                ("rack".to_string(), rack),
                ("vcpu_capability".to_string(), json_at(row, 6)?),
                ("memory_capability_mb".to_string(), json_at(row, 7)?),
                ("disk_capability_gb".to_string(), json_at(row, 8)?),
            ]);
            let disabled: Option<i64> = row.get(4)?;

            extracted.observations.push(HostObservation {
                host_id: hostname,
                properties,
                created_at,
                updated_at: timestamp_at(row, 1)?,
                deleted_at: timestamp_at(row, 2)?,
                enabled: disabled.unwrap_or(0) == 0,
                status_updated_at: timestamp_at(row, 3)?,
            });
        }
        Ok(extracted)
    }

    fn extract_baremetal(&self, conn: &Connection, path: &Path) -> rusqlite::Result<Extracted> {
        let mut sql = BAREMETAL_QUERY.to_string();
        if !self.baremetal_properties.is_empty() {
            let placeholders = vec!["?"; self.baremetal_properties.len()].join(", ");
            sql.push_str(&format!("WHERE e.capability_name IN ({placeholders})\n"));
        }
        sql.push_str("ORDER BY i.uuid, e.id");

        let mut extracted = Extracted::default();
        let mut stmt = conn.prepare(&sql)?;
        let mut rows = stmt.query(params_from_iter(self.baremetal_properties.iter()))?;
        let mut current: Option<NodeAccumulator> = None;

        while let Some(row) = rows.next()? {
            let Some(node_id) = text_at(row, 4)? else {
                debug!("[extract] {}: node without uuid", path.display());
                continue;
            };
            extracted.hosts.insert(node_id.clone());

            if current.as_ref().is_some_and(|node| node.node_id != node_id) {
                if let Some(node) = current.take() {
                    extracted.push_node(node, path);
                }
            }
            let node = current.get_or_insert_with(|| NodeAccumulator::new(node_id));

            node.created_at = node.created_at.or(timestamp_at(row, 0)?);
            node.property_times.extend(timestamp_at(row, 1)?);
            node.property_times.extend(timestamp_at(row, 2)?);
            node.status_updated_at = timestamp_at(row, 3)?;
            let maintenance: Option<i64> = row.get(5)?;
            node.enabled = maintenance.unwrap_or(0) == 0;
            if let Some(name) = text_at(row, 6)? {
                node.properties.insert(name, json_at(row, 7)?);
            }
        }
        if let Some(node) = current {
            extracted.push_node(node, path);
        }
        Ok(extracted)
    }
}

impl SnapshotExtractor for SqliteExtractor {
    fn extract(&self, snapshot: &Path) -> Result<SnapshotResult, ExtractError> {
        let unreadable = |source| ExtractError::Unreadable {
            path: snapshot.to_path_buf(),
            source,
        };
        let query_failed = |source| ExtractError::Query {
            path: snapshot.to_path_buf(),
            source,
        };

        let metadata = std::fs::metadata(snapshot).map_err(unreadable)?;
        let captured_at = OffsetDateTime::from(metadata.modified().map_err(unreadable)?);
        let conn = open_read_only(snapshot).map_err(query_failed)?;

        let extracted = match self.kind {
            SourceKind::Vm => self.extract_vm(&conn, snapshot),
            SourceKind::Baremetal => self.extract_baremetal(&conn, snapshot),
        }
        .map_err(query_failed)?;

        debug!(
            "[extract] {}: {} observations, {} hosts",
            snapshot.display(),
            extracted.observations.len(),
            extracted.hosts.len()
        );
        Ok(SnapshotResult {
            snapshot: snapshot.to_path_buf(),
            captured_at,
            observations: extracted.observations,
            hosts: extracted.hosts,
        })
    }
}

pub(crate) fn open_read_only(path: &Path) -> rusqlite::Result<Connection> {
    Connection::open_with_flags(
        path,
        OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
    )
}

#[derive(Debug, Default)]
struct Extracted {
    observations: Vec<HostObservation>,
    hosts: BTreeSet<String>,
}

impl Extracted {
    fn push_node(&mut self, node: NodeAccumulator, path: &Path) {
        let Some(created_at) = node.created_at else {
            debug!("[extract] {}: {} has no creation time, dropped", path.display(), node.node_id);
            return;
        };
        self.observations.push(HostObservation {
            host_id: node.node_id,
            properties: node.properties,
            created_at,
            updated_at: node.property_times.into_iter().max(),
            deleted_at: None,
            enabled: node.enabled,
            status_updated_at: node.status_updated_at,
        });
    }
}

/// Capability rows of one bare-metal node, folded into one observation.
#[derive(Debug)]
struct NodeAccumulator {
    node_id: String,
    created_at: Option<OffsetDateTime>,
    property_times: Vec<OffsetDateTime>,
    status_updated_at: Option<OffsetDateTime>,
    enabled: bool,
    properties: Properties,
}

impl NodeAccumulator {
    fn new(node_id: String) -> Self {
        Self {
            node_id,
            created_at: None,
            property_times: Vec::new(),
            status_updated_at: None,
            enabled: true,
            properties: Properties::new(),
        }
    }
}

fn text_at(row: &Row<'_>, idx: usize) -> rusqlite::Result<Option<String>> {
    Ok(match row.get_ref(idx)? {
        ValueRef::Null => None,
        ValueRef::Text(bytes) => Some(String::from_utf8_lossy(bytes).into_owned()),
        ValueRef::Integer(i) => Some(i.to_string()),
        ValueRef::Real(f) => Some(f.to_string()),
        ValueRef::Blob(bytes) => Some(hex::encode(bytes)),
    })
}

/// Text timestamps are parsed as UTC, integers are unix seconds.
fn timestamp_at(row: &Row<'_>, idx: usize) -> rusqlite::Result<Option<OffsetDateTime>> {
    Ok(match row.get_ref(idx)? {
        ValueRef::Integer(secs) => OffsetDateTime::from_unix_timestamp(secs).ok(),
        ValueRef::Text(bytes) => parse_timestamp(&String::from_utf8_lossy(bytes)),
        _ => None,
    })
}

fn json_at(row: &Row<'_>, idx: usize) -> rusqlite::Result<Value> {
    Ok(match row.get_ref(idx)? {
        ValueRef::Null => Value::Null,
        ValueRef::Integer(i) => Value::from(i),
        ValueRef::Real(f) => serde_json::Number::from_f64(f)
            .map(Value::Number)
            .unwrap_or(Value::Null),
        ValueRef::Text(bytes) => Value::from(String::from_utf8_lossy(bytes).into_owned()),
        ValueRef::Blob(bytes) => Value::from(hex::encode(bytes)),
    })
}
