/**
 * PIPELINE - end-to-end trace runs
 *
 * MACHINE TRACE:
 * discover -> extract (parallel) -> synthesize deletes -> merge -> refine
 *          -> derive + anonymize -> write
 *
 * INSTANCE TRACE:
 * read actions (flavor cache) -> derive + anonymize -> write
 *
 * Configuration is validated (masker, epoch, window, regexes) before any
 * snapshot is read or any output file is created.
 */

use crate::anonymize::Masker;
use crate::cache::FlavorCache;
use crate::config::CompactorConfig;
use crate::error::CompactorError;
use crate::instances::{instance_trace, read_instance_actions};
use crate::reconcile::reconcile;
use crate::refine::refine;
use crate::report::RunReport;
use crate::scheduler::extract_all;
use crate::snapshots::{discover_snapshots, SnapshotExtractor, SqliteExtractor};
use crate::traces::{machine_trace, TraceKind, TraceRecord, TraceTransform};
use crate::writer::write_trace_file;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use time::OffsetDateTime;
use tracing::{debug, info};

/// Masking and timing settings of `kind` as configured.
pub fn trace_transform(config: &CompactorConfig, kind: TraceKind, masker: Masker, epoch: OffsetDateTime) -> TraceTransform {
    let transform = TraceTransform::new(epoch, masker)
        .with_masked_fields(config.trace_fields(kind).masked_fields.iter().cloned());
    match kind {
        TraceKind::Machine => transform.with_ordinal_field(config.source.ordinal_field()),
        TraceKind::Instance => transform,
    }
}

/// Reconstructs the machine trace of `snapshots`, oldest first.
pub async fn compact_machine_events<E>(
    extractor: Arc<E>,
    snapshots: Vec<PathBuf>,
    workers: usize,
    transform: &TraceTransform,
) -> (Vec<TraceRecord>, RunReport)
where
    E: SnapshotExtractor + ?Sized + 'static,
{
    let mut report = RunReport::new(snapshots.len());
    let batch = extract_all(extractor, snapshots, workers).await;
    report.snapshots_ok = batch.results.len();
    report.failures = batch.failures;

    let reconciled = reconcile(&batch.results);
    report.observed_events = reconciled.observed;
    report.synthesized_deletes = reconciled.synthesized_deletes;
    report.merged_events = reconciled.events.len();

    let refined = refine(reconciled.events);
    report.dropped_events = refined.dropped;

    let records = machine_trace(&refined.events, transform);
    report.emitted_records = records.len();
    (records, report)
}

pub async fn run_machine_trace(config: &CompactorConfig, output: &Path) -> Result<RunReport, CompactorError> {
    let masker = config.masking.build_masker()?;
    let epoch = config.epoch()?;
    let extractor = Arc::new(SqliteExtractor::new(&config.source)?);
    let snapshots = discover_snapshots(&config.backup)?;
    let workers = config.workers.pool_size(snapshots.len());
    info!(
        "[pipeline] {} {} snapshots from {} on {} workers",
        snapshots.len(),
        config.source.kind,
        config.backup.dir.display(),
        workers
    );

    let transform = trace_transform(config, TraceKind::Machine, masker, epoch);
    let (records, report) = compact_machine_events(extractor, snapshots, workers, &transform).await;

    write_trace_file(output, TraceKind::Machine, config.output.format, &records)?;
    report.log_summary();
    Ok(report)
}

/// Returns the number of records written.
pub fn run_instance_trace(config: &CompactorConfig, output: &Path, flavors: &FlavorCache) -> Result<usize, CompactorError> {
    let masker = config.masking.build_masker()?;
    let epoch = config.epoch()?;
    let window = config.instances.window()?;
    debug!("[pipeline] instance window {:?}", window);

    let actions = read_instance_actions(&config.instances.database, window, flavors)?;
    let transform = trace_transform(config, TraceKind::Instance, masker, epoch);
    let records = instance_trace(&actions, &transform, config.source.kind);

    write_trace_file(output, TraceKind::Instance, config.output.format, &records)?;
    info!(
        "[pipeline] {} instance events from {}",
        records.len(),
        config.instances.database.display()
    );
    Ok(records.len())
}
