//! Bulk-load accumulation of one secondary index.
//!
//! Records arrive in non-decreasing record-number order. Their offsets are
//! collected in memory for the segment being loaded and written out when the
//! load moves to the next segment, when an update point is reached, or at
//! [`DeferredUpdateAccumulator::finalize`]. The load moves on for every
//! accumulator at once, including those the new records file nothing under.
//!
//! ## State Machine
//!
//! ```text
//! Idle --accumulate--> Accumulating --flush--> Flushing --ok--> Accumulating
//!                                                  |
//!                                                  +--error--> (stuck until discard)
//! Accumulating --finalize--> Idle
//! ```

use crate::config::{BulkLoadConfig, ReusePolicy, SegmentConfig};
use crate::error::{CoreError, CoreResult};
use crate::segment::{Representation, SegmentCodec, SegmentStore};
use crate::types::RecordNumber;
use segidx_storage::StorageBackend;
use std::collections::BTreeMap;
use tracing::debug;

/// Where an accumulator is in its cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccumulatorState {
    /// Nothing accumulated since construction or the last finalize.
    Idle,
    /// Holding offsets for the current segment.
    Accumulating,
    /// A flush started and has not completed.
    Flushing,
}

/// In-memory collector for the bulk-load path of one index.
#[derive(Debug, Clone)]
pub struct DeferredUpdateAccumulator {
    index: String,
    store: SegmentStore,
    bulk: BulkLoadConfig,
    /// Highest segment that may hold stored rows.
    high_segment: Option<u32>,
    state: AccumulatorState,
    current_segment: Option<u32>,
    pending: BTreeMap<Vec<u8>, Representation>,
}

impl DeferredUpdateAccumulator {
    /// Creates an accumulator for the index stored under `index`.
    ///
    /// `high_segment` is the highest segment of the primary file that held
    /// records when the load began. Under [`ReusePolicy::NoReuse`] segments
    /// above it are written without reading stored rows first.
    #[must_use]
    pub fn new(
        index: impl Into<String>,
        config: SegmentConfig,
        bulk: BulkLoadConfig,
        high_segment: Option<u32>,
    ) -> Self {
        Self {
            index: index.into(),
            store: SegmentStore::new(SegmentCodec::new(config)),
            bulk,
            high_segment,
            state: AccumulatorState::Idle,
            current_segment: None,
            pending: BTreeMap::new(),
        }
    }

    /// The storage name of the index.
    #[must_use]
    pub fn index(&self) -> &str {
        &self.index
    }

    /// Current state.
    #[must_use]
    pub fn state(&self) -> AccumulatorState {
        self.state
    }

    /// The segment being accumulated.
    #[must_use]
    pub fn current_segment(&self) -> Option<u32> {
        self.current_segment
    }

    /// Number of keys holding unflushed offsets.
    #[must_use]
    pub fn pending_keys(&self) -> usize {
        self.pending.len()
    }

    fn ensure_not_flushing(&self) -> CoreResult<()> {
        if self.state == AccumulatorState::Flushing {
            return Err(CoreError::IncompleteFlush);
        }
        Ok(())
    }

    /// Adds `rn` under `key`.
    ///
    /// Moving to a new segment flushes the previous one first.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::IncompleteFlush`] after a failed flush, or the
    /// error of the flush this call triggers.
    pub fn accumulate<B: StorageBackend + ?Sized>(
        &mut self,
        backend: &mut B,
        key: &[u8],
        rn: RecordNumber,
    ) -> CoreResult<()> {
        self.ensure_not_flushing()?;
        let (segment, offset) = self.store.codec().config().locate(rn)?;
        if let Some(current) = self.current_segment.filter(|&current| current != segment) {
            self.flush_segment(backend, current)?;
        }
        self.current_segment = Some(segment);
        self.state = AccumulatorState::Accumulating;

        let rep = self.pending.remove(key).unwrap_or_default();
        let (rep, _) = self.store.codec().add_offset(rep, offset)?;
        self.pending.insert(key.to_vec(), rep);
        Ok(())
    }

    /// Flushes the current segment if the load has moved past it to the
    /// segment of `rn`.
    ///
    /// Call for every accumulator before the keys of a record are added.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::IncompleteFlush`] after a failed flush, or the
    /// error of the flush this call triggers.
    pub fn advance<B: StorageBackend + ?Sized>(
        &mut self,
        backend: &mut B,
        rn: RecordNumber,
    ) -> CoreResult<usize> {
        self.ensure_not_flushing()?;
        let (segment, _) = self.store.codec().config().locate(rn)?;
        match self.current_segment {
            Some(current) if current < segment => self.flush_segment(backend, current),
            _ => Ok(0),
        }
    }

    /// Flushes the current segment if `rn` sits on an update point.
    ///
    /// Call once every key of the record has been accumulated.
    ///
    /// # Errors
    ///
    /// Returns the error of the flush, if one runs.
    pub fn checkpoint<B: StorageBackend + ?Sized>(
        &mut self,
        backend: &mut B,
        rn: RecordNumber,
    ) -> CoreResult<usize> {
        self.ensure_not_flushing()?;
        let (segment, offset) = self.store.codec().config().locate(rn)?;
        if self.current_segment == Some(segment) && self.bulk.is_update_point(offset) {
            return self.flush_segment(backend, segment);
        }
        Ok(0)
    }

    /// Merges every pending key of `segment` into storage.
    ///
    /// Stored rows are unioned with, never overwritten by, the pending
    /// offsets. Returns the number of keys written.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::IncompleteFlush`] after an earlier failed flush,
    /// or a decode or storage error. On error the accumulator stays in
    /// [`AccumulatorState::Flushing`] until [`Self::discard`].
    pub fn flush_segment<B: StorageBackend + ?Sized>(
        &mut self,
        backend: &mut B,
        segment: u32,
    ) -> CoreResult<usize> {
        self.ensure_not_flushing()?;
        if self.current_segment != Some(segment) || self.pending.is_empty() {
            return Ok(0);
        }
        self.state = AccumulatorState::Flushing;

        let skip_read = self.bulk.reuse_policy == ReusePolicy::NoReuse
            && self.high_segment.map_or(true, |high| segment > high);
        let pending = std::mem::take(&mut self.pending);
        let keys = pending.len();
        for (key, incoming) in pending {
            let stored = if skip_read {
                None
            } else {
                self.store.load(backend, &self.index, &key, segment)?
            };
            let (old_row, merged) = match stored {
                Some(stored) => (
                    Some(stored.row),
                    self.store.codec().merge(stored.representation, incoming)?,
                ),
                None => (None, incoming),
            };
            self.store
                .write(backend, &self.index, &key, segment, old_row.as_ref(), &merged)?;
        }

        self.high_segment = self.high_segment.max(Some(segment));
        self.state = AccumulatorState::Accumulating;
        debug!(index = %self.index, segment, keys, skip_read, "segment flushed");
        Ok(keys)
    }

    /// Flushes whatever is pending and returns to [`AccumulatorState::Idle`].
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::IncompleteFlush`] while a flush is in progress or
    /// after one failed, or the error of the final flush.
    pub fn finalize<B: StorageBackend + ?Sized>(&mut self, backend: &mut B) -> CoreResult<usize> {
        self.ensure_not_flushing()?;
        let written = match self.current_segment {
            Some(segment) => self.flush_segment(backend, segment)?,
            None => 0,
        };
        self.current_segment = None;
        self.state = AccumulatorState::Idle;
        Ok(written)
    }

    /// Drops everything pending and returns to [`AccumulatorState::Idle`].
    pub fn discard(&mut self) {
        self.pending.clear();
        self.current_segment = None;
        self.state = AccumulatorState::Idle;
    }
}
