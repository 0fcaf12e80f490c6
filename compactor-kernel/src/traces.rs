//! Flat trace records and the release transform (masking, ranks, timing).

use crate::anonymize::{Masker, OrdinalMask};
use crate::derived::{seconds_since, seconds_value};
use crate::models::{EventLog, Properties};
use crate::timefmt::format_iso;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use time::OffsetDateTime;

pub const PROPERTIES_COLUMN: &str = "PROPERTIES";
pub const HOST_NAME_COLUMN: &str = "HOST_NAME (PHYSICAL)";

const MACHINE_COLUMNS: &[&str] = &[
    "EVENT_TIME",
    "EVENT_TIME_SEC",
    HOST_NAME_COLUMN,
    "EVENT",
    PROPERTIES_COLUMN,
];

const INSTANCE_COLUMNS: &[&str] = &[
    "INSTANCE_UUID",
    "EVENT",
    "START_TIME",
    "START_SEC",
    "FINISH_TIME",
    "FINISH_SEC",
    "EVENT_DURATION",
    "RESULT",
    "INSTANCE_NAME",
    "USER_ID",
    "PROJECT_ID",
    HOST_NAME_COLUMN,
    PROPERTIES_COLUMN,
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TraceKind {
    Instance,
    Machine,
}

impl TraceKind {
    /// Output column order, `PROPERTIES` last.
    pub fn columns(&self) -> &'static [&'static str] {
        match self {
            TraceKind::Machine => MACHINE_COLUMNS,
            TraceKind::Instance => INSTANCE_COLUMNS,
        }
    }

    pub fn default_masked_fields(&self) -> &'static [&'static str] {
        match self {
            TraceKind::Machine => &[HOST_NAME_COLUMN],
            TraceKind::Instance => &["USER_ID", "PROJECT_ID", "INSTANCE_NAME", HOST_NAME_COLUMN],
        }
    }
}

/// One output row: fixed columns plus the catch-all properties.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TraceRecord {
    pub columns: BTreeMap<String, Value>,
    pub properties: Properties,
}

impl TraceRecord {
    pub fn set(&mut self, column: &str, value: impl Into<Value>) {
        self.columns.insert(column.to_string(), value.into());
    }

    pub fn get(&self, column: &str) -> Option<&Value> {
        self.columns.get(column)
    }
}

/// Per-run settings shared by the machine and instance traces.
#[derive(Debug, Clone)]
pub struct TraceTransform {
    pub epoch: OffsetDateTime,
    pub masker: Masker,
    pub masked_fields: Vec<String>,
    pub ordinal_field: Option<String>,
}

impl TraceTransform {
    pub fn new(epoch: OffsetDateTime, masker: Masker) -> Self {
        Self {
            epoch,
            masker,
            masked_fields: Vec::new(),
            ordinal_field: None,
        }
    }

    pub fn with_masked_fields<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.masked_fields = fields.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_ordinal_field(mut self, field: Option<&str>) -> Self {
        self.ordinal_field = field.map(str::to_string);
        self
    }

    pub fn seconds(&self, ts: Option<OffsetDateTime>) -> Value {
        seconds_value(seconds_since(self.epoch, ts))
    }

    /// Masks every configured field, looked up as a column first and as a
    /// property otherwise. Fields absent from the record are ignored.
    pub fn mask_record(&self, record: &mut TraceRecord) {
        for field in &self.masked_fields {
            if let Some(value) = record.columns.get_mut(field) {
                *value = self.masker.mask_value(value);
            } else if let Some(value) = record.properties.get_mut(field) {
                *value = self.masker.mask_value(value);
            }
        }
    }
}

/// Renders the refined event log as machine trace records, in key order.
pub fn machine_trace(events: &EventLog, transform: &TraceTransform) -> Vec<TraceRecord> {
    let ordinal = transform.ordinal_field.as_deref().map(|field| {
        let mask = OrdinalMask::from_values(events.values().filter_map(|props| props.get(field)));
        (field, mask)
    });

    events
        .iter()
        .map(|(key, props)| {
            let mut record = TraceRecord {
                columns: BTreeMap::new(),
                properties: props.clone(),
            };
            record.set("EVENT_TIME", format_iso(key.timestamp));
            record.set("EVENT_TIME_SEC", transform.seconds(Some(key.timestamp)));
            record.set(HOST_NAME_COLUMN, key.host.as_str());
            record.set("EVENT", key.kind.as_str());

            if let Some((field, mask)) = &ordinal {
                if let Some(value) = record.properties.get_mut(*field) {
                    *value = mask.rank(value);
                }
            }
            transform.mask_record(&mut record);
            record
        })
        .collect()
}
