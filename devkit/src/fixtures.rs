/*!
Fixture builders

- in-memory `SnapshotResult`s for the stub extractor
- SQLite snapshot files (vm and baremetal) whose mtime is the capture time
- nova-shaped instance databases
*/

use anyhow::{Context, Result};
use compactor_kernel::instances::NOVA_INSTANCE_SCHEMA;
use compactor_kernel::models::{HostObservation, Properties, SnapshotResult};
use compactor_kernel::snapshots::sqlite::{BAREMETAL_SNAPSHOT_SCHEMA, VM_SNAPSHOT_SCHEMA};
use compactor_kernel::timefmt::format_sql;
use rusqlite::{params, Connection};
use serde_json::Value;
use std::collections::BTreeSet;
use std::fs::File;
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use time::OffsetDateTime;

/// Host observation with sensible defaults: enabled, never updated.
#[derive(Debug, Clone)]
pub struct ObservationBuilder {
    observation: HostObservation,
}

impl ObservationBuilder {
    pub fn new(host_id: &str, created_at: OffsetDateTime) -> Self {
        Self {
            observation: HostObservation {
                host_id: host_id.to_string(),
                properties: Properties::new(),
                created_at,
                updated_at: None,
                deleted_at: None,
                enabled: true,
                status_updated_at: None,
            },
        }
    }

    pub fn property(mut self, name: &str, value: impl Into<Value>) -> Self {
        self.observation.properties.insert(name.to_string(), value.into());
        self
    }

    pub fn updated_at(mut self, ts: OffsetDateTime) -> Self {
        self.observation.updated_at = Some(ts);
        self
    }

    pub fn deleted_at(mut self, ts: OffsetDateTime) -> Self {
        self.observation.deleted_at = Some(ts);
        self
    }

    pub fn status(mut self, enabled: bool, ts: OffsetDateTime) -> Self {
        self.observation.enabled = enabled;
        self.observation.status_updated_at = Some(ts);
        self
    }

    pub fn build(self) -> HostObservation {
        self.observation
    }
}

#[derive(Debug, Clone)]
pub struct SnapshotBuilder {
    result: SnapshotResult,
}

impl SnapshotBuilder {
    pub fn new(snapshot: impl Into<PathBuf>, captured_at: OffsetDateTime) -> Self {
        Self {
            result: SnapshotResult {
                snapshot: snapshot.into(),
                captured_at,
                observations: Vec::new(),
                hosts: BTreeSet::new(),
            },
        }
    }

    /// Host present in the snapshot without a usable observation.
    pub fn host(mut self, host_id: &str) -> Self {
        self.result.hosts.insert(host_id.to_string());
        self
    }

    pub fn observation(mut self, observation: HostObservation) -> Self {
        self.result.hosts.insert(observation.host_id.clone());
        self.result.observations.push(observation);
        self
    }

    pub fn build(self) -> SnapshotResult {
        self.result
    }
}

/// Sets the modification time the snapshot discovery and extractor read.
pub fn set_mtime(path: &Path, ts: OffsetDateTime) -> Result<()> {
    let file = File::options()
        .write(true)
        .open(path)
        .with_context(|| format!("open {}", path.display()))?;
    file.set_modified(SystemTime::from(ts))?;
    Ok(())
}

fn sql_ts(ts: Option<OffsetDateTime>) -> Option<String> {
    ts.map(format_sql)
}

/// One compute node row plus its nova-compute service row.
#[derive(Debug, Clone)]
pub struct VmNode {
    pub hostname: String,
    pub created_at: Option<OffsetDateTime>,
    pub updated_at: Option<OffsetDateTime>,
    pub deleted_at: Option<OffsetDateTime>,
    pub vcpus: i64,
    pub memory_mb: i64,
    pub local_gb: i64,
    pub binary: String,
    pub disabled: bool,
    pub service_updated_at: Option<OffsetDateTime>,
}

impl VmNode {
    pub fn new(hostname: &str, created_at: OffsetDateTime) -> Self {
        Self {
            hostname: hostname.to_string(),
            created_at: Some(created_at),
            updated_at: None,
            deleted_at: None,
            vcpus: 48,
            memory_mb: 128_000,
            local_gb: 2_000,
            binary: "nova-compute".to_string(),
            disabled: false,
            service_updated_at: None,
        }
    }

    pub fn capacity(mut self, vcpus: i64, memory_mb: i64, local_gb: i64) -> Self {
        self.vcpus = vcpus;
        self.memory_mb = memory_mb;
        self.local_gb = local_gb;
        self
    }

    pub fn updated_at(mut self, ts: OffsetDateTime) -> Self {
        self.updated_at = Some(ts);
        self
    }

    pub fn deleted_at(mut self, ts: OffsetDateTime) -> Self {
        self.deleted_at = Some(ts);
        self
    }

    pub fn service(mut self, disabled: bool, ts: OffsetDateTime) -> Self {
        self.disabled = disabled;
        self.service_updated_at = Some(ts);
        self
    }

    pub fn binary(mut self, binary: &str) -> Self {
        self.binary = binary.to_string();
        self
    }
}

#[derive(Debug, Clone, Default)]
pub struct VmSnapshotFixture {
    nodes: Vec<VmNode>,
}

impl VmSnapshotFixture {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn node(mut self, node: VmNode) -> Self {
        self.nodes.push(node);
        self
    }

    /// Writes the snapshot database and stamps it with `captured_at`.
    pub fn write(&self, path: &Path, captured_at: OffsetDateTime) -> Result<()> {
        {
            let conn = Connection::open(path)?;
            conn.execute_batch(VM_SNAPSHOT_SCHEMA)?;
            for node in &self.nodes {
                conn.execute(
                    "INSERT INTO compute_nodes (created_at, updated_at, deleted_at, host, hypervisor_hostname, vcpus, memory_mb, local_gb)
                     VALUES (?1, ?2, ?3, ?4, ?4, ?5, ?6, ?7)",
                    params![
                        sql_ts(node.created_at),
                        sql_ts(node.updated_at),
                        sql_ts(node.deleted_at),
                        node.hostname,
                        node.vcpus,
                        node.memory_mb,
                        node.local_gb
                    ],
                )?;
                conn.execute(
                    r#"INSERT INTO services (updated_at, host, "binary", disabled) VALUES (?1, ?2, ?3, ?4)"#,
                    params![
                        sql_ts(node.service_updated_at),
                        node.hostname,
                        node.binary,
                        node.disabled as i64
                    ],
                )?;
            }
        }
        set_mtime(path, captured_at)
    }
}

/// One bare-metal node with its reservable host and capabilities.
#[derive(Debug, Clone)]
pub struct BaremetalNode {
    pub uuid: String,
    pub created_at: OffsetDateTime,
    pub maintenance: bool,
    pub node_updated_at: Option<OffsetDateTime>,
    pub capabilities: Vec<(String, String, OffsetDateTime, Option<OffsetDateTime>)>,
}

impl BaremetalNode {
    pub fn new(uuid: &str, created_at: OffsetDateTime) -> Self {
        Self {
            uuid: uuid.to_string(),
            created_at,
            maintenance: false,
            node_updated_at: None,
            capabilities: Vec::new(),
        }
    }

    pub fn capability(mut self, name: &str, value: &str, created_at: OffsetDateTime, updated_at: Option<OffsetDateTime>) -> Self {
        self.capabilities
            .push((name.to_string(), value.to_string(), created_at, updated_at));
        self
    }

    pub fn maintenance(mut self, maintenance: bool, ts: OffsetDateTime) -> Self {
        self.maintenance = maintenance;
        self.node_updated_at = Some(ts);
        self
    }
}

#[derive(Debug, Clone, Default)]
pub struct BaremetalSnapshotFixture {
    nodes: Vec<BaremetalNode>,
}

impl BaremetalSnapshotFixture {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn node(mut self, node: BaremetalNode) -> Self {
        self.nodes.push(node);
        self
    }

    pub fn write(&self, path: &Path, captured_at: OffsetDateTime) -> Result<()> {
        {
            let conn = Connection::open(path)?;
            conn.execute_batch(BAREMETAL_SNAPSHOT_SCHEMA)?;
            for (id, node) in self.nodes.iter().enumerate() {
                conn.execute(
                    "INSERT INTO nodes (uuid, updated_at, maintenance) VALUES (?1, ?2, ?3)",
                    params![node.uuid, sql_ts(node.node_updated_at), node.maintenance as i64],
                )?;
                conn.execute(
                    "INSERT INTO computehosts (id, created_at, hypervisor_hostname) VALUES (?1, ?2, ?3)",
                    params![id as i64 + 1, format_sql(node.created_at), node.uuid],
                )?;
                for (name, value, created_at, updated_at) in &node.capabilities {
                    conn.execute(
                        "INSERT INTO computehost_extra_capabilities (computehost_id, created_at, updated_at, capability_name, capability_value)
                         VALUES (?1, ?2, ?3, ?4, ?5)",
                        params![id as i64 + 1, format_sql(*created_at), sql_ts(*updated_at), name, value],
                    )?;
                }
            }
        }
        set_mtime(path, captured_at)
    }
}

/// Nova database with instances, their flavors and action events.
pub struct NovaFixture {
    conn: Connection,
    path: PathBuf,
    next_action: i64,
}

impl NovaFixture {
    pub fn create(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)?;
        conn.execute_batch(NOVA_INSTANCE_SCHEMA)?;
        Ok(Self {
            conn,
            path: path.to_path_buf(),
            next_action: 1,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn flavor(&self, id: i64, vcpus: i64, memory_mb: i64, root_gb: i64) -> Result<()> {
        self.conn.execute(
            "INSERT INTO instance_types (id, name, vcpus, memory_mb, root_gb) VALUES (?1, ?2, ?3, ?4, ?5)",
            params![id, format!("flavor-{id}"), vcpus, memory_mb, root_gb],
        )?;
        Ok(())
    }

    pub fn instance(&self, uuid: &str, flavor_id: i64, user_id: &str, project_id: &str, name: &str, host: &str) -> Result<()> {
        self.conn.execute(
            "INSERT INTO instances (uuid, instance_type_id, user_id, project_id, hostname, host) VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![uuid, flavor_id, user_id, project_id, name, host],
        )?;
        Ok(())
    }

    /// One action with a single event; `finish` may be missing.
    pub fn action(
        &mut self,
        uuid: &str,
        event: &str,
        result: &str,
        start: OffsetDateTime,
        finish: Option<OffsetDateTime>,
    ) -> Result<()> {
        let action_id = self.next_action;
        self.next_action += 1;
        self.conn.execute(
            "INSERT INTO instance_actions (id, instance_uuid, created_at) VALUES (?1, ?2, ?3)",
            params![action_id, uuid, format_sql(start)],
        )?;
        self.conn.execute(
            "INSERT INTO instance_actions_events (action_id, event, result, start_time, finish_time) VALUES (?1, ?2, ?3, ?4, ?5)",
            params![action_id, event, result, format_sql(start), sql_ts(finish)],
        )?;
        Ok(())
    }
}
