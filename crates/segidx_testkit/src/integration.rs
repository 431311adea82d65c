//! Cross-path integration test helpers.
//!
//! Provides a shadow-model harness for the incremental update path and
//! snapshots that compare what the bulk and incremental paths persist.

use crate::fixtures::{memory_file, MemoryFile};
use crate::generators::{FileOperation, RecordPlan};
use segidx_core::{IndexValues, RecordFile, RecordNumber, Representation, SegmentConfig};
use segidx_storage::StorageBackend;
use std::collections::{BTreeMap, BTreeSet};

/// Every stored segment of a file: `(index, key, segment)` to its
/// representation.
pub type IndexSnapshot = BTreeMap<(String, Vec<u8>, u32), Representation>;

/// The records filed under each `(index, key)`.
pub type LogicalIndex = BTreeMap<(String, Vec<u8>), BTreeSet<u64>>;

/// Reads every committed segment of every index of `file`.
pub fn index_snapshot<B: StorageBackend>(file: &RecordFile<B>) -> IndexSnapshot {
    let mut snapshot = IndexSnapshot::new();
    for index in file.index_names().expect("Failed to list indexes") {
        for key in file.keys(&index).expect("Failed to list keys") {
            let records = file
                .records_for_key(&index, &key)
                .expect("Failed to read key");
            for (segment, rep) in records.segments() {
                snapshot.insert((index.clone(), key.clone(), segment), rep.clone());
            }
        }
    }
    snapshot
}

/// Reads the committed records of every key of every index of `file`.
pub fn logical_index<B: StorageBackend>(file: &RecordFile<B>) -> LogicalIndex {
    let mut logical = LogicalIndex::new();
    for index in file.index_names().expect("Failed to list indexes") {
        for key in file.keys(&index).expect("Failed to list keys") {
            let records = file
                .records_for_key(&index, &key)
                .expect("Failed to read key");
            logical.insert(
                (index.clone(), key),
                records.iter().map(RecordNumber::as_u64).collect(),
            );
        }
    }
    logical
}

/// The logical index implied by a set of live records and their values.
pub fn expected_index<'a>(
    records: impl IntoIterator<Item = (u64, &'a IndexValues)>,
) -> LogicalIndex {
    let mut logical = LogicalIndex::new();
    for (rn, values) in records {
        for (index, keys) in values {
            for key in keys {
                logical
                    .entry((index.clone(), key.clone()))
                    .or_default()
                    .insert(rn);
            }
        }
    }
    logical
}

/// Loads `plan` through the bulk path, in `batches` separate loads.
///
/// The plan is split into roughly equal consecutive runs, so later loads
/// merge into segments earlier loads stored.
pub fn load_bulk(config: SegmentConfig, plan: &[RecordPlan], batches: usize) -> MemoryFile {
    let mut file = memory_file(config);
    let chunk = plan.len().div_ceil(batches.max(1)).max(1);
    for batch in plan.chunks(chunk) {
        file.bulk_load_begin(config.reuse_policy)
            .expect("Failed to begin bulk load");
        for record in batch {
            file.bulk_load_record(record.rn, &record.values)
                .expect("Failed to load record");
        }
        file.bulk_load_end().expect("Failed to end bulk load");
    }
    file
}

/// Inserts `plan` one record at a time through the incremental path, with
/// a single commit at the end.
pub fn load_incremental(config: SegmentConfig, plan: &[RecordPlan]) -> MemoryFile {
    let mut file = memory_file(config);
    for record in plan {
        file.on_record_inserted(record.rn, &record.values)
            .expect("Failed to insert record");
    }
    file.commit().expect("Failed to commit");
    file
}

/// A test harness that applies operations to a record file and to a plain
/// model side by side.
pub struct IndexHarness {
    /// The record file under test.
    pub file: MemoryFile,
    committed: BTreeMap<u64, IndexValues>,
    pending: BTreeMap<u64, IndexValues>,
}

impl IndexHarness {
    /// Creates a harness over an empty in-memory file.
    pub fn new(config: SegmentConfig) -> Self {
        Self {
            file: memory_file(config),
            committed: BTreeMap::new(),
            pending: BTreeMap::new(),
        }
    }

    fn nth_live(&self, nth: usize) -> Option<u64> {
        if self.pending.is_empty() {
            return None;
        }
        self.pending.keys().nth(nth % self.pending.len()).copied()
    }

    /// Applies one operation to both the file and the model.
    pub fn apply(&mut self, op: &FileOperation) {
        match op {
            FileOperation::Insert { values } => {
                let rn = self
                    .file
                    .allocate_record_number()
                    .expect("Failed to allocate");
                self.file
                    .on_record_inserted(rn, values)
                    .expect("Failed to insert");
                self.pending.insert(rn.as_u64(), values.clone());
            }
            FileOperation::Delete { nth } => {
                if let Some(n) = self.nth_live(*nth) {
                    let values = self.pending.remove(&n).unwrap_or_default();
                    self.file
                        .on_record_deleted(RecordNumber::new(n), &values)
                        .expect("Failed to delete");
                }
            }
            FileOperation::Edit { nth, values } => {
                if let Some(n) = self.nth_live(*nth) {
                    let old = self.pending.insert(n, values.clone()).unwrap_or_default();
                    self.file
                        .on_record_edited(RecordNumber::new(n), &old, values)
                        .expect("Failed to edit");
                }
            }
            FileOperation::Commit => {
                self.file.commit().expect("Failed to commit");
                self.committed = self.pending.clone();
            }
            FileOperation::Abort => {
                self.file.abort().expect("Failed to abort");
                self.pending = self.committed.clone();
            }
        }
    }

    /// Checks the file against the model.
    ///
    /// Committed index contents must match the last committed model, and
    /// live records must match the model including pending changes.
    pub fn verify(&self) {
        let expected = expected_index(self.committed.iter().map(|(rn, v)| (*rn, v)));
        assert_eq!(logical_index(&self.file), expected, "committed index mismatch");

        let live: Vec<u64> = self
            .file
            .live_records()
            .expect("Failed to read live records")
            .iter()
            .map(RecordNumber::as_u64)
            .collect();
        let model: Vec<u64> = self.pending.keys().copied().collect();
        assert_eq!(live, model, "live records mismatch");

        if !self.file.has_pending_changes() {
            let report = self.file.verify().expect("Failed to verify");
            assert!(report.is_ok(), "verify found problems: {:?}", report.problems);
        }
    }

    /// Returns the number of live records in the model.
    pub fn live_count(&self) -> usize {
        self.pending.len()
    }
}
