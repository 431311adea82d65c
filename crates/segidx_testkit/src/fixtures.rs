//! Test fixtures and primary-file helpers.
//!
//! Provides convenience functions for setting up record files and common
//! test scenarios.

use segidx_core::{IndexValues, RecordFile, RecordNumber, ReusePolicy, SegmentConfig};
use segidx_storage::{FileBackend, FileConfig, InMemoryBackend};
use std::path::PathBuf;
use tempfile::TempDir;

/// Name of the primary file used by fixtures.
pub const TEST_FILE: &str = "games";

/// A segment geometry small enough that tests cross segment boundaries and
/// the list-to-bitmap threshold with a handful of records.
///
/// 64 records per segment, conversion at 4.
#[must_use]
pub fn small_config() -> SegmentConfig {
    SegmentConfig::new(64).conversion_limit(4)
}

/// Builds index values from `(index, key)` pairs.
///
/// ```rust
/// use segidx_testkit::values;
///
/// let v = values(&[("colour", "red"), ("colour", "blue"), ("size", "l")]);
/// assert_eq!(v["colour"].len(), 2);
/// ```
#[must_use]
pub fn values(pairs: &[(&str, &str)]) -> IndexValues {
    let mut values = IndexValues::new();
    for (index, key) in pairs {
        values
            .entry((*index).to_owned())
            .or_default()
            .push(key.as_bytes().to_vec());
    }
    values
}

/// Collects record numbers as plain integers.
pub fn numbers(records: impl IntoIterator<Item = RecordNumber>) -> Vec<u64> {
    records.into_iter().map(RecordNumber::as_u64).collect()
}

/// A record file over an in-memory backend.
pub type MemoryFile = RecordFile<InMemoryBackend>;

/// Opens an empty in-memory record file.
pub fn memory_file(config: SegmentConfig) -> MemoryFile {
    RecordFile::open(InMemoryBackend::new(), TEST_FILE, config)
        .expect("Failed to open in-memory record file")
}

/// A journaled record file with automatic cleanup.
pub struct TestFile {
    /// The record file.
    pub file: RecordFile<FileBackend>,
    path: PathBuf,
    config: SegmentConfig,
    _temp_dir: TempDir,
}

impl TestFile {
    /// Creates a record file in a fresh temporary directory.
    pub fn new(config: SegmentConfig) -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let path = temp_dir.path().join("index.sgj");
        let backend = FileBackend::open_with_config(&path, FileConfig::default().sync_on_commit(false))
            .expect("Failed to create journal");
        let file = RecordFile::open(backend, TEST_FILE, config).expect("Failed to open record file");

        Self {
            file,
            path,
            config,
            _temp_dir: temp_dir,
        }
    }

    /// Returns the journal path.
    pub fn path(&self) -> &std::path::Path {
        &self.path
    }

    /// Drops the open file and replays the journal, as after a restart.
    ///
    /// Uncommitted changes are lost.
    pub fn reopen(&mut self) {
        let backend = FileBackend::open_with_config(&self.path, FileConfig::default().sync_on_commit(false))
            .expect("Failed to reopen journal");
        self.file = RecordFile::open(backend, TEST_FILE, self.config).expect("Failed to reopen record file");
    }
}

impl std::ops::Deref for TestFile {
    type Target = RecordFile<FileBackend>;

    fn deref(&self) -> &Self::Target {
        &self.file
    }
}

impl std::ops::DerefMut for TestFile {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.file
    }
}

/// Runs a test with a temporary in-memory record file.
pub fn with_memory_file<F, R>(config: SegmentConfig, f: F) -> R
where
    F: FnOnce(&mut MemoryFile) -> R,
{
    let mut file = memory_file(config);
    f(&mut file)
}

/// Runs a test with a temporary journaled record file.
pub fn with_journal_file<F, R>(config: SegmentConfig, f: F) -> R
where
    F: FnOnce(&mut TestFile) -> R,
{
    let mut file = TestFile::new(config);
    f(&mut file)
}

/// Test scenario helpers.
pub mod scenarios {
    use super::*;

    /// Inserts and commits `count` records with keys derived from their
    /// numbers: `colour` cycles red/green/blue, `parity` is odd/even.
    pub fn populated_file(config: SegmentConfig, count: u64) -> MemoryFile {
        let mut file = memory_file(config);
        for _ in 0..count {
            let rn = file.allocate_record_number().expect("Failed to allocate");
            file.on_record_inserted(rn, &record_values(rn))
                .expect("Failed to insert");
        }
        file.commit().expect("Failed to commit");
        file
    }

    /// The index values [`populated_file`] gives record `rn`.
    #[must_use]
    pub fn record_values(rn: RecordNumber) -> IndexValues {
        let colour = ["red", "green", "blue"][(rn.as_u64() % 3) as usize];
        let parity = if rn.as_u64() % 2 == 0 { "even" } else { "odd" };
        values(&[("colour", colour), ("parity", parity)])
    }

    /// A file loaded through the bulk path with the given records.
    pub fn bulk_loaded_file(
        config: SegmentConfig,
        policy: ReusePolicy,
        records: &[(RecordNumber, IndexValues)],
    ) -> MemoryFile {
        let mut file = memory_file(config.reuse_policy(policy));
        file.bulk_load_begin(policy).expect("Failed to begin bulk load");
        for (rn, values) in records {
            file.bulk_load_record(*rn, values).expect("Failed to load record");
        }
        file.bulk_load_end().expect("Failed to end bulk load");
        file
    }
}
