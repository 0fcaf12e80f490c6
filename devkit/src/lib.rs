/*!
# Compactor DevKit - stubs and fixtures for pipeline tests

- in-memory snapshot extractor (no database files)
- builders for observations, snapshots and SQLite snapshot/nova files
- a harness running the full machine and instance traces in a temp dir
*/

pub mod fixtures;
pub mod snapshot_stub;
pub mod test_utils;

pub use fixtures::{
    BaremetalNode, BaremetalSnapshotFixture, NovaFixture, ObservationBuilder, SnapshotBuilder, VmNode,
    VmSnapshotFixture,
};
pub use snapshot_stub::StubExtractor;
pub use test_utils::{read_csv, read_jsons, TestHarness, TEST_SALT};
