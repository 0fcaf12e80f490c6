/**
 * INSTANCES - instance action trace from a nova-shaped database
 *
 * OPERATION:
 * 1. read every action event in the optional [start, end] window on the
 *    action creation time, ordered by it
 * 2. skip events that never finished
 * 3. resolve the flavor of each instance through the FlavorCache
 * 4. derive timing columns, fold flavor fields into PROPERTIES, mask
 * 5. order the records by start time
 */

use crate::cache::FlavorCache;
use crate::derived::{duration_seconds, seconds_value};
use crate::error::ExtractError;
use crate::models::Properties;
use crate::snapshots::sqlite::open_read_only;
use crate::snapshots::SourceKind;
use crate::timefmt::{format_iso, format_sql, parse_timestamp};
use crate::traces::{TraceRecord, TraceTransform, HOST_NAME_COLUMN};
use rusqlite::{Connection, Row};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::Path;
use time::OffsetDateTime;
use tracing::debug;

/// Tables read by the instance trace.
pub const NOVA_INSTANCE_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS instance_types (
    id INTEGER PRIMARY KEY,
    name TEXT,
    vcpus INTEGER,
    memory_mb INTEGER,
    root_gb INTEGER
);
CREATE TABLE IF NOT EXISTS instances (
    id INTEGER PRIMARY KEY,
    uuid TEXT,
    instance_type_id INTEGER,
    memory_mb INTEGER,
    root_gb INTEGER,
    vcpus INTEGER,
    user_id TEXT,
    project_id TEXT,
    hostname TEXT,
    host TEXT
);
CREATE TABLE IF NOT EXISTS instance_actions (
    id INTEGER PRIMARY KEY,
    instance_uuid TEXT,
    created_at TEXT
);
CREATE TABLE IF NOT EXISTS instance_actions_events (
    id INTEGER PRIMARY KEY,
    action_id INTEGER,
    event TEXT,
    result TEXT,
    start_time TEXT,
    finish_time TEXT
);
"#;

const ACTIONS_QUERY: &str = r#"
SELECT i.uuid, i.instance_type_id, i.vcpus, i.memory_mb, i.root_gb,
       i.user_id, i.project_id, i.hostname, i.host,
       iae.event, iae.result, iae.start_time, iae.finish_time
FROM instances AS i
JOIN instance_actions AS ia ON i.uuid = ia.instance_uuid
JOIN instance_actions_events AS iae ON ia.id = iae.action_id
WHERE (?1 IS NULL OR ia.created_at >= ?1)
  AND (?2 IS NULL OR ia.created_at <= ?2)
ORDER BY ia.created_at, iae.id
"#;

const FLAVOR_QUERY: &str = "SELECT vcpus, memory_mb, root_gb FROM instance_types WHERE id = ?1";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Flavor {
    pub vcpus: Option<i64>,
    pub memory_mb: Option<i64>,
    pub root_gb: Option<i64>,
}

impl Flavor {
    fn field(&self, name: &str) -> Value {
        let value = match name {
            "vcpus" => self.vcpus,
            "memory_mb" => self.memory_mb,
            "root_gb" => self.root_gb,
            _ => None,
        };
        value.map(Value::from).unwrap_or(Value::Null)
    }
}

/// One finished action event of one instance.
#[derive(Debug, Clone, PartialEq)]
pub struct InstanceAction {
    pub instance_uuid: String,
    pub event: Option<String>,
    pub result: Option<String>,
    pub start_time: Option<OffsetDateTime>,
    pub finish_time: OffsetDateTime,
    pub instance_name: Option<String>,
    pub user_id: Option<String>,
    pub project_id: Option<String>,
    pub host: Option<String>,
    pub flavor: Flavor,
}

pub type Window = (Option<OffsetDateTime>, Option<OffsetDateTime>);

/// Reads the finished action events of `database` inside `window`.
pub fn read_instance_actions(
    database: &Path,
    window: Window,
    flavors: &FlavorCache,
) -> Result<Vec<InstanceAction>, ExtractError> {
    if let Err(source) = std::fs::metadata(database) {
        return Err(ExtractError::Unreadable {
            path: database.to_path_buf(),
            source,
        });
    }
    let query_failed = |source| ExtractError::Query {
        path: database.to_path_buf(),
        source,
    };
    let conn = open_read_only(database).map_err(query_failed)?;
    query_actions(&conn, window, flavors).map_err(query_failed)
}

fn query_actions(conn: &Connection, window: Window, flavors: &FlavorCache) -> rusqlite::Result<Vec<InstanceAction>> {
    let (start, end) = (window.0.map(format_sql), window.1.map(format_sql));
    let mut stmt = conn.prepare(ACTIONS_QUERY)?;
    let mut rows = stmt.query((start, end))?;
    let mut actions = Vec::new();
    let mut skipped = 0usize;

    while let Some(row) = rows.next()? {
        let finish_time = timestamp(row, 12)?;
        let Some(finish_time) = finish_time else {
            let uuid: Option<String> = row.get(0)?;
            debug!("[instances] unfinished event on {:?} skipped", uuid);
            skipped += 1;
            continue;
        };
        let Some(instance_uuid) = row.get::<_, Option<String>>(0)? else {
            continue;
        };

        let own = Flavor {
            vcpus: row.get(2)?,
            memory_mb: row.get(3)?,
            root_gb: row.get(4)?,
        };
        let flavor = match row.get::<_, Option<i64>>(1)? {
            Some(type_id) => lookup_flavor(conn, flavors, type_id)?.unwrap_or(own),
            None => own,
        };

        actions.push(InstanceAction {
            instance_uuid,
            user_id: row.get(5)?,
            project_id: row.get(6)?,
            instance_name: row.get(7)?,
            host: row.get(8)?,
            event: row.get(9)?,
            result: row.get(10)?,
            start_time: timestamp(row, 11)?,
            finish_time,
            flavor,
        });
    }
    debug!(
        "[instances] {} finished events read, {} unfinished skipped, {} flavors cached",
        actions.len(),
        skipped,
        flavors.len()
    );
    Ok(actions)
}

/// `None` when the instance type row is gone.
fn lookup_flavor(conn: &Connection, flavors: &FlavorCache, type_id: i64) -> rusqlite::Result<Option<Flavor>> {
    let found = flavors.get_or_try_insert_with(type_id, |id| {
        conn.query_row(FLAVOR_QUERY, [id], |row| {
            Ok(Flavor {
                vcpus: row.get(0)?,
                memory_mb: row.get(1)?,
                root_gb: row.get(2)?,
            })
        })
    });
    match found {
        Ok(flavor) => Ok(Some(flavor)),
        Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
        Err(e) => Err(e),
    }
}

fn timestamp(row: &Row<'_>, idx: usize) -> rusqlite::Result<Option<OffsetDateTime>> {
    let text: Option<String> = row.get(idx)?;
    Ok(text.as_deref().and_then(parse_timestamp))
}

/// Instance trace records ordered by start time.
pub fn instance_trace(actions: &[InstanceAction], transform: &TraceTransform, kind: SourceKind) -> Vec<TraceRecord> {
    let mut ordered: Vec<&InstanceAction> = actions.iter().collect();
    ordered.sort_by_key(|action| action.start_time);

    ordered
        .into_iter()
        .map(|action| {
            let mut record = TraceRecord::default();
            record.set("INSTANCE_UUID", action.instance_uuid.as_str());
            record.set("EVENT", action.event.clone());
            record.set("START_TIME", action.start_time.map(format_iso));
            record.set("START_SEC", transform.seconds(action.start_time));
            record.set("FINISH_TIME", format_iso(action.finish_time));
            record.set("FINISH_SEC", transform.seconds(Some(action.finish_time)));
            record.set(
                "EVENT_DURATION",
                seconds_value(duration_seconds(action.start_time, Some(action.finish_time))),
            );
            record.set("RESULT", action.result.clone());
            record.set("INSTANCE_NAME", action.instance_name.clone());
            record.set("USER_ID", action.user_id.clone());
            record.set("PROJECT_ID", action.project_id.clone());
            record.set(HOST_NAME_COLUMN, action.host.clone());

            record.properties = kind
                .instance_properties()
                .iter()
                .map(|name| (name.to_string(), action.flavor.field(name)))
                .collect::<Properties>();
            transform.mask_record(&mut record);
            record
        })
        .collect()
}
