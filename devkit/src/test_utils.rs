/*!
Test harness for the compactor pipeline

- temporary backup directory and output files
- a ready-to-run `CompactorConfig` pointing at them (salted masking)
- helpers to run the machine/instance traces and read the output back
*/

use crate::fixtures::{BaremetalSnapshotFixture, VmSnapshotFixture};
use crate::snapshot_stub::StubExtractor;
use anyhow::{Context, Result};
use compactor_kernel::anonymize::Masker;
use compactor_kernel::cache::FlavorCache;
use compactor_kernel::config::CompactorConfig;
use compactor_kernel::report::RunReport;
use compactor_kernel::snapshots::SourceKind;
use compactor_kernel::traces::{TraceKind, TraceRecord};
use compactor_kernel::writer::OutputFormat;
use compactor_kernel::{compact_machine_events, pipeline, run_instance_trace, run_machine_trace};
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::TempDir;
use time::OffsetDateTime;

pub const TEST_SALT: &str = "devkit-salt";

pub struct TestHarness {
    pub config: CompactorConfig,
    dir: TempDir,
}

impl TestHarness {
    pub fn new() -> Result<Self> {
        env_logger::builder().is_test(true).try_init().ok();

        let dir = tempfile::tempdir()?;
        let backups = dir.path().join("backups");
        std::fs::create_dir_all(&backups)?;

        let mut config = CompactorConfig::default();
        config.backup.dir = backups;
        config.masking.salt = Some(TEST_SALT.to_string());
        config.instances.database = dir.path().join("nova.sqlite");
        config.workers.files_per_worker = 1;
        config.workers.max_workers = Some(4);
        Ok(Self { config, dir })
    }

    pub fn with_source(mut self, kind: SourceKind) -> Self {
        self.config.source.kind = kind;
        self
    }

    pub fn with_format(mut self, format: OutputFormat) -> Self {
        self.config.output.format = format;
        self
    }

    pub fn root(&self) -> &Path {
        self.dir.path()
    }

    pub fn backup_path(&self, name: &str) -> PathBuf {
        self.config.backup.dir.join(name)
    }

    pub fn output_path(&self, name: &str) -> PathBuf {
        self.dir.path().join(name)
    }

    /// Masker of the harness config, to compute expected host names.
    pub fn masker(&self) -> Result<Masker> {
        Ok(self.config.masking.build_masker()?)
    }

    pub fn add_vm_snapshot(&self, name: &str, captured_at: OffsetDateTime, fixture: &VmSnapshotFixture) -> Result<PathBuf> {
        let path = self.backup_path(name);
        fixture.write(&path, captured_at)?;
        log::info!("[harness] vm snapshot {} at {}", name, captured_at);
        Ok(path)
    }

    pub fn add_baremetal_snapshot(
        &self,
        name: &str,
        captured_at: OffsetDateTime,
        fixture: &BaremetalSnapshotFixture,
    ) -> Result<PathBuf> {
        let path = self.backup_path(name);
        fixture.write(&path, captured_at)?;
        log::info!("[harness] baremetal snapshot {} at {}", name, captured_at);
        Ok(path)
    }

    /// Drops a file that matches the backup pattern but is not a database.
    pub fn add_corrupt_snapshot(&self, name: &str, captured_at: OffsetDateTime) -> Result<PathBuf> {
        let path = self.backup_path(name);
        let dump = "-- MySQL dump 10.13  Distrib 5.5.52, for Linux (x86_64)\n".repeat(32);
        std::fs::write(&path, dump)?;
        crate::fixtures::set_mtime(&path, captured_at)?;
        Ok(path)
    }

    /// Full machine run over the backup directory.
    pub async fn run_machine(&self, output: &str) -> Result<(RunReport, PathBuf)> {
        let path = self.output_path(output);
        let report = run_machine_trace(&self.config, &path).await?;
        Ok((report, path))
    }

    /// Machine reconstruction over a stub extractor, no files involved.
    pub async fn run_stub(&self, stub: StubExtractor, snapshots: Vec<PathBuf>) -> Result<(Vec<TraceRecord>, RunReport)> {
        let masker = self.config.masking.build_masker()?;
        let epoch = self.config.epoch()?;
        let transform = pipeline::trace_transform(&self.config, TraceKind::Machine, masker, epoch);
        let workers = self.config.workers.pool_size(snapshots.len());
        Ok(compact_machine_events(Arc::new(stub), snapshots, workers, &transform).await)
    }

    pub fn run_instance(&self, output: &str, flavors: &FlavorCache) -> Result<(usize, PathBuf)> {
        let path = self.output_path(output);
        let written = run_instance_trace(&self.config, &path, flavors)?;
        Ok((written, path))
    }
}

/// Parses a CSV trace written by the compactor: header + rows, minimal quoting.
pub fn read_csv(path: &Path) -> Result<Vec<Vec<String>>> {
    let text = std::fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    Ok(text.lines().map(split_csv_line).collect())
}

/// One JSON object per line.
pub fn read_jsons(path: &Path) -> Result<Vec<Value>> {
    let text = std::fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    text.lines()
        .map(|line| serde_json::from_str(line).context("invalid JSON line"))
        .collect()
}

fn split_csv_line(line: &str) -> Vec<String> {
    let mut cells = Vec::new();
    let mut cell = String::new();
    let mut quoted = false;
    let mut chars = line.chars().peekable();
    while let Some(c) = chars.next() {
        match (c, quoted) {
            ('"', true) if chars.peek() == Some(&'"') => {
                cell.push('"');
                chars.next();
            }
            ('"', _) => quoted = !quoted,
            (',', false) => cells.push(std::mem::take(&mut cell)),
            (c, _) => cell.push(c),
        }
    }
    cells.push(cell);
    cells
}
