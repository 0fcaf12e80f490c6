//! Full pipeline runs: stub extractor, SQLite snapshots, instance database.

use compactor_devkit::{
    read_csv, read_jsons, BaremetalNode, BaremetalSnapshotFixture, NovaFixture, ObservationBuilder,
    SnapshotBuilder, StubExtractor, TestHarness, VmNode, VmSnapshotFixture,
};
use compactor_kernel::cache::FlavorCache;
use compactor_kernel::error::{CompactorError, ConfigError};
use compactor_kernel::snapshots::SourceKind;
use compactor_kernel::timefmt::format_iso;
use compactor_kernel::traces::{TraceRecord, HOST_NAME_COLUMN};
use compactor_kernel::writer::OutputFormat;
use serde_json::Value;
use std::path::PathBuf;
use time::macros::datetime;
use time::OffsetDateTime;

const T1: OffsetDateTime = datetime!(2015-10-09 00:00 UTC);
const S1: OffsetDateTime = datetime!(2015-10-10 00:00 UTC);
const S2: OffsetDateTime = datetime!(2016-01-10 00:00 UTC);
const S3: OffsetDateTime = datetime!(2016-04-10 00:00 UTC);
const S4: OffsetDateTime = datetime!(2017-11-01 00:00 UTC);

fn kinds(records: &[TraceRecord]) -> Vec<&str> {
    records
        .iter()
        .filter_map(|r| r.get("EVENT").and_then(Value::as_str))
        .collect()
}

fn host(cap: i64) -> ObservationBuilder {
    ObservationBuilder::new("h", T1).property("cap", cap)
}

#[tokio::test]
async fn test_drifting_snapshots_keep_original_create() {
    let harness = TestHarness::new().unwrap();
    let stub = StubExtractor::new()
        .with_snapshot(SnapshotBuilder::new("s1.sqlite", S1).observation(host(10).build()).build())
        .with_snapshot(SnapshotBuilder::new("s2.sqlite", S2).observation(host(8).build()).build())
        .with_snapshot(SnapshotBuilder::new("s3.sqlite", S3).observation(host(8).build()).build())
        .with_snapshot(SnapshotBuilder::new("s4.sqlite", S4).build());
    let snapshots = stub.snapshot_paths();

    let (records, report) = harness.run_stub(stub, snapshots).await.unwrap();

    assert_eq!(kinds(&records), vec!["CREATE", "DELETE"]);
    assert_eq!(records[0].properties["cap"], 10);
    assert_eq!(records[0].get("EVENT_TIME"), Some(&Value::from(format_iso(T1))));
    assert_eq!(records[1].get("EVENT_TIME"), Some(&Value::from(format_iso(S4))));
    assert!(records[1].properties.is_empty());

    let masked = harness.masker().unwrap().mask("h");
    assert_eq!(records[0].get(HOST_NAME_COLUMN), Some(&Value::from(masked)));

    assert_eq!(report.snapshots_ok, 4);
    assert_eq!(report.synthesized_deletes, 1);
    assert_eq!(report.merged_events, 2);
    assert_eq!(report.emitted_records, 2);
}

#[tokio::test]
async fn test_later_differing_observation_is_an_update() {
    let harness = TestHarness::new().unwrap();
    let t3 = datetime!(2016-04-01 12:00 UTC);
    let stub = StubExtractor::new()
        .with_snapshot(SnapshotBuilder::new("s1.sqlite", S1).observation(host(10).build()).build())
        .with_snapshot(SnapshotBuilder::new("s2.sqlite", S2).observation(host(8).build()).build())
        .with_snapshot(
            SnapshotBuilder::new("s3.sqlite", S3)
                .observation(host(12).updated_at(t3).build())
                .build(),
        )
        .with_snapshot(SnapshotBuilder::new("s4.sqlite", S4).build());
    let snapshots = stub.snapshot_paths();

    let (records, _) = harness.run_stub(stub, snapshots).await.unwrap();

    assert_eq!(kinds(&records), vec!["CREATE", "UPDATE", "DELETE"]);
    assert_eq!(records[0].properties["cap"], 10);
    assert_eq!(records[1].properties["cap"], 12);
    assert_eq!(records[1].get("EVENT_TIME"), Some(&Value::from(format_iso(t3))));
}

#[tokio::test]
async fn test_failed_snapshot_is_excluded() {
    let harness = TestHarness::new().unwrap();
    let stub = StubExtractor::new()
        .with_snapshot(
            SnapshotBuilder::new("s1.sqlite", S1)
                .observation(host(10).build())
                .observation(ObservationBuilder::new("g", T1).build())
                .build(),
        )
        .with_failure("s2.sqlite", "unexpected end of dump")
        .with_snapshot(SnapshotBuilder::new("s3.sqlite", S3).observation(host(10).build()).build())
        .with_delay("s1.sqlite", std::time::Duration::from_millis(50));
    let snapshots: Vec<PathBuf> = ["s1.sqlite", "s2.sqlite", "s3.sqlite"]
        .into_iter()
        .map(PathBuf::from)
        .collect();

    let (records, report) = harness.run_stub(stub.clone(), snapshots).await.unwrap();

    assert_eq!(stub.calls().len(), 3);
    assert_eq!(report.snapshots_ok, 2);
    assert_eq!(report.failures.len(), 1);
    assert_eq!(report.failures[0].index, 1);
    assert!(report.failures[0].reason.contains("unexpected end of dump"));

    // g disappears between s1 and s3; the failed s2 does not count as a capture
    let delete = records
        .iter()
        .find(|r| r.get("EVENT") == Some(&Value::from("DELETE")))
        .unwrap();
    assert_eq!(delete.get("EVENT_TIME"), Some(&Value::from(format_iso(S3))));
    assert_eq!(kinds(&records), vec!["CREATE", "CREATE", "DELETE"]);
}

#[tokio::test]
async fn test_vm_backups_to_csv() {
    let mut harness = TestHarness::new().unwrap();
    harness.config.source.hypervisor_hostname_regex = Some(r"^c(\d+)-\d+$".into());

    let created = datetime!(2016-01-01 00:00 UTC);
    let first = VmSnapshotFixture::new()
        .node(VmNode::new("c03-04", created).service(false, datetime!(2016-01-02 00:00 UTC)))
        .node(VmNode::new("c01-05", created));
    let third = VmSnapshotFixture::new().node(
        VmNode::new("c03-04", created)
            .capacity(64, 256_000, 4_000)
            .updated_at(datetime!(2016-03-01 00:00 UTC))
            .service(false, datetime!(2016-01-02 00:00 UTC)),
    );
    harness.add_vm_snapshot("nova-1.sqlite", datetime!(2016-01-15 00:00 UTC), &first).unwrap();
    harness.add_corrupt_snapshot("nova-2.sqlite", datetime!(2016-02-15 00:00 UTC)).unwrap();
    harness.add_vm_snapshot("nova-3.sqlite", datetime!(2016-04-01 00:00 UTC), &third).unwrap();

    let (report, output) = harness.run_machine("machine.csv").await.unwrap();
    assert_eq!(report.snapshots_total, 3);
    assert_eq!(report.failures.len(), 1);
    assert!(report.failures[0].snapshot.ends_with("nova-2.sqlite"));

    let rows = read_csv(&output).unwrap();
    assert_eq!(
        rows[0],
        vec!["EVENT_TIME", "EVENT_TIME_SEC", "HOST_NAME (PHYSICAL)", "EVENT", "PROPERTIES"]
    );
    let events: Vec<(&str, &str)> = rows[1..].iter().map(|r| (r[0].as_str(), r[3].as_str())).collect();
    assert_eq!(
        events,
        vec![
            ("2016-01-01T00:00:00", "CREATE"),
            ("2016-01-01T00:00:00", "CREATE"),
            ("2016-01-02T00:00:00", "ENABLE"),
            ("2016-03-01T00:00:00", "UPDATE"),
            ("2016-04-01T00:00:00", "DELETE"),
        ]
    );

    let masker = harness.masker().unwrap();
    assert_eq!(rows[1][2], masker.mask("c01-05"));
    assert_eq!(rows[2][2], masker.mask("c03-04"));
    assert_eq!(rows[5][2], masker.mask("c01-05"));

    // racks 01 and 03 become ranks 0 and 1
    let props: Value = serde_json::from_str(&rows[1][4]).unwrap();
    assert_eq!(props["rack"], 0);
    assert_eq!(props["vcpu_capability"], 48);
    let update: Value = serde_json::from_str(&rows[4][4]).unwrap();
    assert_eq!(update["rack"], 1);
    assert_eq!(update["vcpu_capability"], 64);
    assert_eq!(rows[5][4], "{}");
}

#[tokio::test]
async fn test_baremetal_backups_to_jsons() {
    let harness = TestHarness::new()
        .unwrap()
        .with_source(SourceKind::Baremetal)
        .with_format(OutputFormat::Jsons);
    let created = datetime!(2016-01-01 00:00 UTC);

    let first = BaremetalSnapshotFixture::new().node(
        BaremetalNode::new("node-a", created)
            .capability("node_type", "compute", created, None)
            .maintenance(false, datetime!(2016-01-05 00:00 UTC)),
    );
    let second = BaremetalSnapshotFixture::new().node(
        BaremetalNode::new("node-a", created)
            .capability("node_type", "gpu", created, Some(datetime!(2016-02-01 00:00 UTC)))
            .capability("secret_sauce", "ignored", created, None)
            .maintenance(true, datetime!(2016-02-15 00:00 UTC)),
    );
    harness.add_baremetal_snapshot("ironic-1.sqlite", datetime!(2016-01-20 00:00 UTC), &first).unwrap();
    harness.add_baremetal_snapshot("ironic-2.sqlite", datetime!(2016-03-01 00:00 UTC), &second).unwrap();

    let (report, output) = harness.run_machine("machine.jsons").await.unwrap();
    assert_eq!(report.failures.len(), 0);
    // the UPDATE keyed on the creation time carries an unchanged payload
    assert_eq!(report.dropped_events, 1);

    let lines = read_jsons(&output).unwrap();
    let events: Vec<&str> = lines.iter().filter_map(|l| l["EVENT"].as_str()).collect();
    assert_eq!(events, vec!["CREATE", "ENABLE", "UPDATE", "DISABLE"]);
    assert_eq!(lines[0]["PROPERTIES"], serde_json::json!({"node_type": "compute"}));
    assert_eq!(lines[2]["PROPERTIES"], serde_json::json!({"node_type": "gpu"}));
    assert_eq!(lines[3]["EVENT_TIME"], "2016-02-15T00:00:00");
}

#[tokio::test]
async fn test_missing_salt_writes_nothing() {
    let mut harness = TestHarness::new().unwrap();
    harness.config.masking.salt = None;
    let fixture = VmSnapshotFixture::new().node(VmNode::new("c01-04", T1));
    harness.add_vm_snapshot("nova-1.sqlite", S1, &fixture).unwrap();

    let err = harness.run_machine("machine.csv").await.unwrap_err();
    assert!(matches!(
        err.downcast_ref::<CompactorError>(),
        Some(CompactorError::Config(ConfigError::MissingSalt(_)))
    ));
    assert!(!harness.output_path("machine.csv").exists());
}

#[test]
fn test_instance_trace_shares_host_masking() {
    let mut harness = TestHarness::new().unwrap().with_format(OutputFormat::Jsons);
    let db = harness.root().join("nova-instances.sqlite");
    harness.config.instances.database = db.clone();

    let mut nova = NovaFixture::create(&db).unwrap();
    nova.flavor(1, 2, 4096, 40).unwrap();
    nova.instance("inst-1", 1, "alice", "proj-1", "web-1", "c01-04").unwrap();
    nova.action(
        "inst-1",
        "compute__do_build_and_run_instance",
        "Success",
        datetime!(2016-01-01 00:00 UTC),
        Some(datetime!(2016-01-01 00:01 UTC)),
    )
    .unwrap();
    nova.action("inst-1", "compute_stop_instance", "", datetime!(2016-01-02 00:00 UTC), None)
        .unwrap();
    drop(nova);

    let flavors = FlavorCache::unbounded();
    let (written, output) = harness.run_instance("instance.jsons", &flavors).unwrap();
    assert_eq!(written, 1);
    assert!(flavors.contains(&1));

    let lines = read_jsons(&output).unwrap();
    let line = &lines[0];
    let masker = harness.masker().unwrap();
    assert_eq!(line["INSTANCE_UUID"], "inst-1");
    assert_eq!(line["EVENT_DURATION"], 60);
    assert_eq!(line["USER_ID"], masker.mask("alice"));
    assert_eq!(line["INSTANCE_NAME"], masker.mask("web-1"));
    // same salt, same physical host hash as in the machine trace
    assert_eq!(line["HOST_NAME (PHYSICAL)"], masker.mask("c01-04"));
    assert_eq!(
        line["PROPERTIES"],
        serde_json::json!({"memory_mb": 4096, "root_gb": 40, "vcpus": 2})
    );
}
