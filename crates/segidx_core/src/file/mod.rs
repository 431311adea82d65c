//! The primary file facade.
//!
//! A [`RecordFile`] owns a storage backend and keeps the existence bitmap
//! and every secondary index of one primary file in step with the record
//! changes reported to it.
//!
//! ## Update Paths
//!
//! - Incremental: `on_record_*` queue changes in memory; [`RecordFile::commit`]
//!   applies them all in one backend transaction
//! - Bulk load: [`RecordFile::bulk_load_begin`] opens a backend transaction
//!   that stays open until [`RecordFile::bulk_load_end`]
//!
//! Index rows are stored under `"{file}/{index}"`, so several primary files
//! can share one backend. The segment size and reuse policy of a file are
//! stored with its first commit and checked on every later open.

mod compaction;
mod stats;
mod verify;

pub use compaction::CompactionSummary;
pub use stats::IndexStats;
pub use verify::{VerifyProblem, VerifyReport};

use crate::config::{BulkLoadConfig, ReusePolicy, SegmentConfig};
use crate::error::{CoreError, CoreResult};
use crate::existence::ExistenceBitmap;
use crate::index::{DeferredUpdateAccumulator, SecondaryIndexUpdater};
use crate::recordset::RecordSet;
use crate::segment::{SegmentCodec, SegmentRow, SegmentStore};
use crate::types::RecordNumber;
use segidx_storage::{StorageBackend, StorageError};
use std::collections::BTreeMap;
use tracing::debug;

/// Index keys extracted from one record: index name to the keys it files
/// the record under.
pub type IndexValues = BTreeMap<String, Vec<Vec<u8>>>;

/// Counts reported by [`RecordFile::bulk_load_end`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BulkLoadSummary {
    /// Records loaded.
    pub records: u64,
    /// Indexes that received keys.
    pub indexes: usize,
    /// Existence segments written.
    pub existence_segments: usize,
}

#[derive(Debug)]
struct BulkLoad {
    config: BulkLoadConfig,
    high_segment: Option<u32>,
    accumulators: BTreeMap<String, DeferredUpdateAccumulator>,
    records: u64,
}

/// One primary file and its secondary indexes.
///
/// # Example
///
/// ```rust
/// use segidx_core::{IndexValues, RecordFile, SegmentConfig};
/// use segidx_storage::InMemoryBackend;
///
/// let mut file = RecordFile::open(InMemoryBackend::new(), "games", SegmentConfig::standard()).unwrap();
///
/// let mut values = IndexValues::new();
/// values.insert("result".into(), vec![b"1-0".to_vec()]);
///
/// let rn = file.allocate_record_number().unwrap();
/// file.on_record_inserted(rn, &values).unwrap();
/// file.commit().unwrap();
///
/// let wins = file.records_for_key("result", b"1-0").unwrap();
/// assert!(wins.contains(rn));
/// ```
#[derive(Debug)]
pub struct RecordFile<B: StorageBackend> {
    name: String,
    config: SegmentConfig,
    backend: B,
    existence: ExistenceBitmap,
    updaters: BTreeMap<String, SecondaryIndexUpdater>,
    bulk: Option<BulkLoad>,
    geometry_stored: bool,
}

impl<B: StorageBackend> RecordFile<B> {
    /// Opens the primary file `name` stored in `backend`.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidConfig`] for an inconsistent `config` or
    /// one whose segment size or reuse policy differs from the stored one,
    /// or an error if the existence bitmaps cannot be read.
    pub fn open(backend: B, name: impl Into<String>, config: SegmentConfig) -> CoreResult<Self> {
        config.validate()?;
        let name = name.into();
        let stored_size = Self::stored_segment_size(&backend, &name)?;
        if let Some(size) = stored_size.filter(|&size| size != config.segment_size) {
            return Err(CoreError::invalid_config(format!(
                "file {name} was created with segment size {size}, not {}",
                config.segment_size
            )));
        }
        let stored_policy = Self::stored_reuse_policy(&backend, &name)?;
        if let Some(policy) = stored_policy.filter(|&policy| policy != config.reuse_policy) {
            return Err(CoreError::invalid_config(format!(
                "file {name} was created with reuse policy {policy:?}, not {:?}",
                config.reuse_policy
            )));
        }
        let existence = ExistenceBitmap::open(&backend, name.clone(), config, config.reuse_policy)?;
        debug!(
            file = %name,
            segment_size = config.segment_size,
            segments = existence.segments().count(),
            "record file opened"
        );
        Ok(Self {
            name,
            config,
            backend,
            existence,
            updaters: BTreeMap::new(),
            bulk: None,
            geometry_stored: stored_size.is_some() && stored_policy.is_some(),
        })
    }

    /// The segment size `name` was created with, if it has been committed.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend cannot be read or the stored value is
    /// malformed.
    pub fn stored_segment_size(backend: &B, name: &str) -> CoreResult<Option<u32>> {
        let Some(bytes) = backend.get_control(&Self::geometry_key(name))? else {
            return Ok(None);
        };
        let raw: [u8; 4] = bytes.as_slice().try_into().map_err(|_| {
            StorageError::corrupted(format!("segment size of {name} is {} bytes", bytes.len()))
        })?;
        Ok(Some(u32::from_be_bytes(raw)))
    }

    /// The reuse policy `name` was created with, if it has been committed.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend cannot be read or the stored value is
    /// malformed.
    pub fn stored_reuse_policy(backend: &B, name: &str) -> CoreResult<Option<ReusePolicy>> {
        let Some(bytes) = backend.get_control(&Self::policy_key(name))? else {
            return Ok(None);
        };
        match bytes.as_slice() {
            [0] => Ok(Some(ReusePolicy::Reuse)),
            [1] => Ok(Some(ReusePolicy::NoReuse)),
            other => Err(StorageError::corrupted(format!(
                "reuse policy of {name} is {other:02x?}"
            ))
            .into()),
        }
    }

    fn geometry_key(name: &str) -> String {
        format!("{name}.segment_size")
    }

    fn policy_key(name: &str) -> String {
        format!("{name}.reuse_policy")
    }

    fn store_geometry(&mut self) -> CoreResult<()> {
        if !self.geometry_stored {
            let key = Self::geometry_key(&self.name);
            self.backend
                .put_control(&key, &self.config.segment_size.to_be_bytes())?;
            let policy = match self.config.reuse_policy {
                ReusePolicy::Reuse => 0u8,
                ReusePolicy::NoReuse => 1,
            };
            self.backend.put_control(&Self::policy_key(&self.name), &[policy])?;
        }
        Ok(())
    }

    /// The primary file name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The segment geometry.
    #[must_use]
    pub fn config(&self) -> &SegmentConfig {
        &self.config
    }

    /// The storage backend.
    #[must_use]
    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// Releases the backend. Uncommitted changes are lost.
    #[must_use]
    pub fn into_backend(self) -> B {
        self.backend
    }

    /// The existence bitmap, including uncommitted changes.
    #[must_use]
    pub fn existence(&self) -> &ExistenceBitmap {
        &self.existence
    }

    pub(crate) fn storage_name(&self, index: &str) -> String {
        format!("{}/{}", self.name, index)
    }

    pub(crate) fn store(&self) -> SegmentStore {
        SegmentStore::new(SegmentCodec::new(self.config))
    }

    fn ensure_no_bulk(&self) -> CoreResult<()> {
        if self.bulk.is_some() {
            return Err(CoreError::invalid_operation("a bulk load is in progress"));
        }
        Ok(())
    }

    fn ensure_live(&self, rn: RecordNumber) -> CoreResult<()> {
        if !self.existence.is_used(rn) {
            return Err(CoreError::invalid_operation(format!("record {rn} is not live")));
        }
        Ok(())
    }

    /// Pages in the existence segment of `rn`.
    fn load_existence(&mut self, rn: RecordNumber) -> CoreResult<()> {
        let (segment, _) = self.config.locate(rn)?;
        self.existence.load_segment(&self.backend, segment)
    }

    fn updater(&mut self, index: &str) -> &mut SecondaryIndexUpdater {
        let storage_name = self.storage_name(index);
        let config = self.config;
        self.updaters
            .entry(index.to_owned())
            .or_insert_with(|| SecondaryIndexUpdater::new(storage_name, config))
    }

    /// Picks the record number for the next inserted record.
    ///
    /// The number is only claimed by [`Self::on_record_inserted`] or
    /// [`Self::bulk_load_record`].
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::RecordNumberOutOfRange`] once the file is full.
    pub fn allocate_record_number(&self) -> CoreResult<RecordNumber> {
        self.existence.allocate()
    }

    /// Marks `rn` live and files it under `values`.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidOperation`] if `rn` is already live or a
    /// bulk load is in progress, or [`CoreError::RecordNumberOutOfRange`].
    pub fn on_record_inserted(&mut self, rn: RecordNumber, values: &IndexValues) -> CoreResult<()> {
        self.ensure_no_bulk()?;
        self.load_existence(rn)?;
        if self.existence.is_used(rn) {
            return Err(CoreError::invalid_operation(format!("record {rn} is already live")));
        }
        self.existence.mark_used(rn)?;
        for (index, keys) in values {
            let updater = self.updater(index);
            for key in keys {
                updater.add(key, rn)?;
            }
        }
        Ok(())
    }

    /// Marks `rn` free and removes it from `values`.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidOperation`] if `rn` is not live or a bulk
    /// load is in progress.
    pub fn on_record_deleted(&mut self, rn: RecordNumber, values: &IndexValues) -> CoreResult<()> {
        self.ensure_no_bulk()?;
        self.load_existence(rn)?;
        self.ensure_live(rn)?;
        self.existence.mark_free(rn)?;
        for (index, keys) in values {
            let updater = self.updater(index);
            for key in keys {
                updater.remove(key, rn)?;
            }
        }
        Ok(())
    }

    /// Refiles `rn` from `old` to `new`.
    ///
    /// Keys present in both are removed and added again, which nets to no
    /// change.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidOperation`] if `rn` is not live or a bulk
    /// load is in progress.
    pub fn on_record_edited(
        &mut self,
        rn: RecordNumber,
        old: &IndexValues,
        new: &IndexValues,
    ) -> CoreResult<()> {
        self.ensure_no_bulk()?;
        self.load_existence(rn)?;
        self.ensure_live(rn)?;
        for (index, keys) in old {
            let updater = self.updater(index);
            for key in keys {
                updater.remove(key, rn)?;
            }
        }
        for (index, keys) in new {
            let updater = self.updater(index);
            for key in keys {
                updater.add(key, rn)?;
            }
        }
        Ok(())
    }

    /// Returns true if changes are waiting for [`Self::commit`].
    #[must_use]
    pub fn has_pending_changes(&self) -> bool {
        self.existence.has_changes() || self.updaters.values().any(|u| !u.is_empty())
    }

    /// Applies every queued change in one backend transaction.
    ///
    /// On error the backend transaction is aborted and the queued changes
    /// are discarded.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidOperation`] during a bulk load, or the
    /// first decode or storage error met while applying.
    pub fn commit(&mut self) -> CoreResult<()> {
        self.ensure_no_bulk()?;
        if !self.has_pending_changes() {
            return Ok(());
        }

        self.backend.begin_transaction()?;
        let result = self.apply_pending();
        if let Err(err) = result {
            if self.backend.in_transaction() {
                let _ = self.backend.abort();
            }
            self.discard_pending();
            return Err(err);
        }
        if let Err(err) = self.backend.commit() {
            self.discard_pending();
            return Err(err.into());
        }
        self.existence.mark_flushed();
        self.geometry_stored = true;
        Ok(())
    }

    fn apply_pending(&mut self) -> CoreResult<()> {
        let mut written = 0;
        let mut deleted = 0;
        for updater in self.updaters.values_mut() {
            let summary = updater.apply(&mut self.backend)?;
            written += summary.rows_written;
            deleted += summary.rows_deleted;
        }
        let segments = self.existence.flush(&mut self.backend)?;
        self.store_geometry()?;
        debug!(
            file = %self.name,
            rows_written = written,
            rows_deleted = deleted,
            existence_segments = segments,
            "changes committed"
        );
        Ok(())
    }

    fn discard_pending(&mut self) {
        for updater in self.updaters.values_mut() {
            updater.discard();
        }
        self.existence.discard();
    }

    /// Discards every uncommitted change, including an unfinished bulk load.
    ///
    /// # Errors
    ///
    /// Returns a storage error if the bulk-load transaction cannot be aborted.
    pub fn abort(&mut self) -> CoreResult<()> {
        self.discard_pending();
        if let Some(mut bulk) = self.bulk.take() {
            for accumulator in bulk.accumulators.values_mut() {
                accumulator.discard();
            }
            if self.backend.in_transaction() {
                self.backend.abort()?;
            }
        }
        Ok(())
    }

    /// Starts a bulk load under `policy`, flushing at segment ends only.
    ///
    /// # Errors
    ///
    /// See [`Self::bulk_load_begin_with`].
    pub fn bulk_load_begin(&mut self, policy: ReusePolicy) -> CoreResult<()> {
        let bulk = BulkLoadConfig::new(&self.config).reuse_policy(policy);
        self.bulk_load_begin_with(bulk)
    }

    /// Starts a bulk load.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidOperation`] if a bulk load is already in
    /// progress or incremental changes are uncommitted.
    pub fn bulk_load_begin_with(&mut self, config: BulkLoadConfig) -> CoreResult<()> {
        self.ensure_no_bulk()?;
        if self.has_pending_changes() {
            return Err(CoreError::invalid_operation(
                "commit or abort pending changes before a bulk load",
            ));
        }
        self.backend.begin_transaction()?;
        let high_segment = self.existence.highest_segment();
        debug!(file = %self.name, policy = ?config.reuse_policy, ?high_segment, "bulk load started");
        self.bulk = Some(BulkLoad {
            config,
            high_segment,
            accumulators: BTreeMap::new(),
            records: 0,
        });
        Ok(())
    }

    /// Returns true between [`Self::bulk_load_begin`] and [`Self::bulk_load_end`].
    #[must_use]
    pub fn is_bulk_loading(&self) -> bool {
        self.bulk.is_some()
    }

    /// Loads one record.
    ///
    /// Records should arrive in ascending record-number order; each change
    /// of segment flushes the previous one. After an error the load must be
    /// abandoned with [`Self::abort`].
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidOperation`] outside a bulk load or for a
    /// record that is already live, or the error of a flush.
    pub fn bulk_load_record(&mut self, rn: RecordNumber, values: &IndexValues) -> CoreResult<()> {
        if self.bulk.is_none() {
            return Err(CoreError::invalid_operation("no bulk load in progress"));
        }
        self.load_existence(rn)?;
        if self.existence.is_used(rn) {
            return Err(CoreError::invalid_operation(format!("record {rn} is already live")));
        }
        self.existence.mark_used(rn)?;

        let storage_names: Vec<(String, String)> = values
            .keys()
            .map(|index| (index.clone(), self.storage_name(index)))
            .collect();
        let config = self.config;
        let Some(bulk) = self.bulk.as_mut() else {
            return Err(CoreError::invalid_operation("no bulk load in progress"));
        };
        for accumulator in bulk.accumulators.values_mut() {
            accumulator.advance(&mut self.backend, rn)?;
        }
        let bulk_config = bulk.config.clone();
        let high_segment = bulk.high_segment;
        for (index, storage_name) in storage_names {
            let accumulator = bulk.accumulators.entry(index.clone()).or_insert_with(|| {
                DeferredUpdateAccumulator::new(storage_name, config, bulk_config.clone(), high_segment)
            });
            for key in values.get(&index).into_iter().flatten() {
                accumulator.accumulate(&mut self.backend, key, rn)?;
            }
        }
        for accumulator in bulk.accumulators.values_mut() {
            accumulator.checkpoint(&mut self.backend, rn)?;
        }
        bulk.records += 1;
        Ok(())
    }

    /// Flushes every accumulator and commits the load.
    ///
    /// On error the load is aborted as a whole.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidOperation`] outside a bulk load, or the
    /// first flush or storage error.
    pub fn bulk_load_end(&mut self) -> CoreResult<BulkLoadSummary> {
        let Some(mut bulk) = self.bulk.take() else {
            return Err(CoreError::invalid_operation("no bulk load in progress"));
        };
        let result = self.finish_bulk(&mut bulk);
        match result {
            Ok(summary) => {
                self.existence.mark_flushed();
                self.geometry_stored = true;
                debug!(
                    file = %self.name,
                    records = summary.records,
                    indexes = summary.indexes,
                    "bulk load committed"
                );
                Ok(summary)
            }
            Err(err) => {
                for accumulator in bulk.accumulators.values_mut() {
                    accumulator.discard();
                }
                if self.backend.in_transaction() {
                    let _ = self.backend.abort();
                }
                self.existence.discard();
                Err(err)
            }
        }
    }

    fn finish_bulk(&mut self, bulk: &mut BulkLoad) -> CoreResult<BulkLoadSummary> {
        for accumulator in bulk.accumulators.values_mut() {
            accumulator.finalize(&mut self.backend)?;
        }
        let existence_segments = self.existence.flush(&mut self.backend)?;
        self.store_geometry()?;
        self.backend.commit()?;
        Ok(BulkLoadSummary {
            records: bulk.records,
            indexes: bulk.accumulators.len(),
            existence_segments,
        })
    }

    /// Committed records filed under `key` in `index`.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::IndexCorrupt`] if a stored row cannot be decoded.
    pub fn records_for_key(&self, index: &str, key: &[u8]) -> CoreResult<RecordSet> {
        let mut records = RecordSet::new(self.config);
        for (segment, stored) in self
            .store()
            .load_key(&self.backend, &self.storage_name(index), key)?
        {
            records.union_segment(segment, stored.representation)?;
        }
        Ok(records)
    }

    /// Number of committed records filed under `key`, read from row counts.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::IndexCorrupt`] if a stored row cannot be decoded.
    pub fn count_for_key(&self, index: &str, key: &[u8]) -> CoreResult<u64> {
        let storage_name = self.storage_name(index);
        let mut count = 0;
        for (segment, bytes) in self.backend.rows_for_key(&storage_name, key)? {
            let row = SegmentRow::decode(&bytes).map_err(|e| e.in_index(&storage_name, segment))?;
            count += u64::from(row.record_count());
        }
        Ok(count)
    }

    /// Keys of `index` with committed records, in order.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend cannot be read.
    pub fn keys(&self, index: &str) -> CoreResult<Vec<Vec<u8>>> {
        Ok(self.backend.keys(&self.storage_name(index))?)
    }

    /// Indexes of this file with committed rows.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend cannot be read.
    pub fn index_names(&self) -> CoreResult<Vec<String>> {
        let prefix = format!("{}/", self.name);
        Ok(self
            .backend
            .index_names()?
            .into_iter()
            .filter_map(|name| name.strip_prefix(&prefix).map(str::to_owned))
            .collect())
    }

    /// Live records, including uncommitted inserts and deletes.
    ///
    /// # Errors
    ///
    /// Returns an error only if an existence bitmap has the wrong size.
    pub fn live_records(&self) -> CoreResult<RecordSet> {
        self.existence.live_records()
    }

    /// Returns true if `rn` is live, including uncommitted changes.
    #[must_use]
    pub fn is_live(&self, rn: RecordNumber) -> bool {
        self.existence.is_used(rn)
    }

    /// Makes `records` the exact set filed under `key`.
    ///
    /// Takes effect at [`Self::commit`], after changes queued earlier.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidOperation`] for a record that is not live,
    /// a set with another segment size, or during a bulk load.
    pub fn file_records_under(
        &mut self,
        index: &str,
        key: &[u8],
        records: &RecordSet,
    ) -> CoreResult<()> {
        self.ensure_no_bulk()?;
        if records.config().segment_size != self.config.segment_size {
            return Err(CoreError::invalid_operation(format!(
                "record set segment size {} does not match file segment size {}",
                records.config().segment_size,
                self.config.segment_size
            )));
        }
        if let Some(rn) = records.iter().find(|&rn| !self.existence.is_used(rn)) {
            return Err(CoreError::invalid_operation(format!("record {rn} is not live")));
        }

        let committed = self.records_for_key(index, key)?;
        let updater = self.updater(index);
        let queued = updater.queued_adds(key);
        for rn in committed.iter().chain(queued) {
            if !records.contains(rn) {
                updater.remove(key, rn)?;
            }
        }
        for rn in records.iter() {
            updater.add(key, rn)?;
        }
        Ok(())
    }

    /// Removes every record filed under `key`.
    ///
    /// # Errors
    ///
    /// See [`Self::file_records_under`].
    pub fn unfile_records_under(&mut self, index: &str, key: &[u8]) -> CoreResult<()> {
        let empty = RecordSet::new(self.config);
        self.file_records_under(index, key, &empty)
    }
}
