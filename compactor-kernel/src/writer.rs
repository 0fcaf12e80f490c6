//! Trace writers: CSV with a header row, or JSON lines.
//!
//! Files are written in place through a buffered handle. A failed run can
//! leave a partial file behind.

use crate::error::WriteError;
use crate::traces::{TraceKind, TraceRecord, PROPERTIES_COLUMN};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;
use tracing::info;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    #[default]
    Csv,
    Jsons,
}

pub fn write_trace<W: Write>(
    out: &mut W,
    kind: TraceKind,
    format: OutputFormat,
    records: &[TraceRecord],
) -> Result<(), WriteError> {
    match format {
        OutputFormat::Csv => write_csv(out, kind, records),
        OutputFormat::Jsons => write_jsons(out, kind, records),
    }
}

pub fn write_trace_file(
    path: &Path,
    kind: TraceKind,
    format: OutputFormat,
    records: &[TraceRecord],
) -> Result<(), WriteError> {
    let mut out = BufWriter::new(File::create(path)?);
    write_trace(&mut out, kind, format, records)?;
    out.flush()?;
    info!("[writer] {} {:?} records written to {}", records.len(), kind, path.display());
    Ok(())
}

fn write_csv<W: Write>(out: &mut W, kind: TraceKind, records: &[TraceRecord]) -> Result<(), WriteError> {
    let header: Vec<String> = kind.columns().iter().map(|c| csv_escape(c)).collect();
    writeln!(out, "{}", header.join(","))?;

    for record in records {
        let mut cells = Vec::with_capacity(kind.columns().len());
        for column in kind.columns() {
            let cell = if *column == PROPERTIES_COLUMN {
                serde_json::to_string(&record.properties)?
            } else {
                record.get(column).map(csv_cell).unwrap_or_default()
            };
            cells.push(csv_escape(&cell));
        }
        writeln!(out, "{}", cells.join(","))?;
    }
    Ok(())
}

/// One object per line, keys in column order.
fn write_jsons<W: Write>(out: &mut W, kind: TraceKind, records: &[TraceRecord]) -> Result<(), WriteError> {
    for record in records {
        let mut fields = Vec::with_capacity(kind.columns().len());
        for column in kind.columns() {
            let value = if *column == PROPERTIES_COLUMN {
                serde_json::to_string(&record.properties)?
            } else {
                serde_json::to_string(record.get(column).unwrap_or(&Value::Null))?
            };
            fields.push(format!("{}:{}", serde_json::to_string(column)?, value));
        }
        writeln!(out, "{{{}}}", fields.join(","))?;
    }
    Ok(())
}

/// Null renders as an empty cell, strings without JSON quotes.
fn csv_cell(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn csv_escape(s: &str) -> String {
    if s.contains(',') || s.contains('"') || s.contains('\n') || s.contains('\r') {
        format!("\"{}\"", s.replace('"', "\"\""))
    } else {
        s.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Properties;
    use crate::traces::HOST_NAME_COLUMN;

    fn record() -> TraceRecord {
        let mut record = TraceRecord {
            properties: Properties::from([
                ("rack".to_string(), Value::from(0)),
                ("vcpu_capability".to_string(), Value::from(48)),
            ]),
            ..TraceRecord::default()
        };
        record.set("EVENT_TIME", "2015-10-09T00:00:00");
        record.set("EVENT_TIME_SEC", 2_766_524);
        record.set(HOST_NAME_COLUMN, "abc123");
        record.set("EVENT", "CREATE");
        record
    }

    fn render(format: OutputFormat, records: &[TraceRecord]) -> String {
        let mut out = Vec::new();
        write_trace(&mut out, TraceKind::Machine, format, records).unwrap();
        String::from_utf8(out).unwrap()
    }

    #[test]
    fn test_csv_output() {
        let text = render(OutputFormat::Csv, &[record()]);
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], "EVENT_TIME,EVENT_TIME_SEC,HOST_NAME (PHYSICAL),EVENT,PROPERTIES");
        assert_eq!(
            lines[1],
            r#"2015-10-09T00:00:00,2766524,abc123,CREATE,"{""rack"":0,""vcpu_capability"":48}""#
        );
    }

    #[test]
    fn test_csv_missing_and_null_cells_empty() {
        let mut record = record();
        record.set("EVENT_TIME_SEC", Value::Null);
        record.columns.remove("EVENT");
        record.properties.clear();
        let text = render(OutputFormat::Csv, &[record]);
        assert_eq!(text.lines().nth(1), Some("2015-10-09T00:00:00,,abc123,,{}"));
    }

    #[test]
    fn test_jsons_output() {
        let text = render(OutputFormat::Jsons, &[record(), record()]);
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 2);
        let parsed: Value = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(parsed["EVENT"], "CREATE");
        assert_eq!(parsed["PROPERTIES"]["vcpu_capability"], 48);
        assert_eq!(parsed["HOST_NAME (PHYSICAL)"], "abc123");
        assert!(lines[0].starts_with(r#"{"EVENT_TIME":"2015-10-09T00:00:00","EVENT_TIME_SEC":2766524,"#));
    }

    #[test]
    fn test_write_trace_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("trace.csv");
        write_trace_file(&path, TraceKind::Machine, OutputFormat::Csv, &[record()]).unwrap();
        let text = std::fs::read_to_string(&path).unwrap();
        assert_eq!(text.lines().count(), 2);

        let missing = dir.path().join("no-such-dir").join("trace.csv");
        assert!(matches!(
            write_trace_file(&missing, TraceKind::Machine, OutputFormat::Csv, &[]),
            Err(WriteError::Io(_))
        ));
    }
}
