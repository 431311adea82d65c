//! Per-transaction updates of one secondary index.

use crate::config::SegmentConfig;
use crate::error::CoreResult;
use crate::segment::{Representation, SegmentCodec, SegmentStore};
use crate::types::RecordNumber;
use segidx_storage::StorageBackend;
use std::collections::BTreeMap;
use tracing::{debug, trace};

/// Direction of a pending change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexOp {
    /// File the record under the key.
    Add,
    /// Remove the record from the key.
    Remove,
}

#[derive(Debug, Clone)]
struct PendingOp {
    key: Vec<u8>,
    segment: u32,
    offset: u16,
    op: IndexOp,
}

/// Counts reported by [`SecondaryIndexUpdater::apply`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UpdateSummary {
    /// `(key, segment)` groups folded.
    pub groups: usize,
    /// Rows written or rewritten.
    pub rows_written: usize,
    /// Rows deleted because their segment emptied.
    pub rows_deleted: usize,
    /// Groups whose net effect left the stored row unchanged.
    pub rows_unchanged: usize,
}

/// Collects add/remove operations for one index and applies them at commit.
///
/// Nothing touches storage before [`SecondaryIndexUpdater::apply`], so
/// [`SecondaryIndexUpdater::discard`] is always side-effect free.
#[derive(Debug, Clone)]
pub struct SecondaryIndexUpdater {
    index: String,
    store: SegmentStore,
    pending: Vec<PendingOp>,
}

impl SecondaryIndexUpdater {
    /// Creates an updater for the index stored under `index`.
    #[must_use]
    pub fn new(index: impl Into<String>, config: SegmentConfig) -> Self {
        Self {
            index: index.into(),
            store: SegmentStore::new(SegmentCodec::new(config)),
            pending: Vec::new(),
        }
    }

    /// The storage name of the index.
    #[must_use]
    pub fn index(&self) -> &str {
        &self.index
    }

    /// Queues filing `rn` under `key`.
    ///
    /// # Errors
    ///
    /// Returns [`crate::CoreError::RecordNumberOutOfRange`] if `rn` cannot be
    /// addressed.
    pub fn add(&mut self, key: &[u8], rn: RecordNumber) -> CoreResult<()> {
        self.push(key, rn, IndexOp::Add)
    }

    /// Queues removing `rn` from `key`.
    ///
    /// # Errors
    ///
    /// Returns [`crate::CoreError::RecordNumberOutOfRange`] if `rn` cannot be
    /// addressed.
    pub fn remove(&mut self, key: &[u8], rn: RecordNumber) -> CoreResult<()> {
        self.push(key, rn, IndexOp::Remove)
    }

    fn push(&mut self, key: &[u8], rn: RecordNumber, op: IndexOp) -> CoreResult<()> {
        let (segment, offset) = self.store.codec().config().locate(rn)?;
        self.pending.push(PendingOp {
            key: key.to_vec(),
            segment,
            offset,
            op,
        });
        Ok(())
    }

    /// Number of queued operations.
    #[must_use]
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Returns true if nothing is queued.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Records queued for adding under `key`, in queue order.
    #[must_use]
    pub fn queued_adds(&self, key: &[u8]) -> Vec<RecordNumber> {
        let config = self.store.codec().config();
        self.pending
            .iter()
            .filter(|op| op.op == IndexOp::Add && op.key == key)
            .map(|op| config.record_at(op.segment, op.offset))
            .collect()
    }

    /// Drops every queued operation.
    pub fn discard(&mut self) {
        self.pending.clear();
    }

    /// Folds the queued operations into storage.
    ///
    /// Operations are grouped by `(key, segment)`; within a group they are
    /// applied in the order they were queued. The caller owns the enclosing
    /// transaction. The queue is emptied whether or not this succeeds.
    ///
    /// # Errors
    ///
    /// Returns [`crate::CoreError::IndexCorrupt`] if a stored row cannot be
    /// decoded, or a storage error if a write fails.
    pub fn apply<B: StorageBackend + ?Sized>(
        &mut self,
        backend: &mut B,
    ) -> CoreResult<UpdateSummary> {
        let mut groups: BTreeMap<(Vec<u8>, u32), Vec<(u16, IndexOp)>> = BTreeMap::new();
        for op in std::mem::take(&mut self.pending) {
            groups
                .entry((op.key, op.segment))
                .or_default()
                .push((op.offset, op.op));
        }

        let codec = *self.store.codec();
        let mut summary = UpdateSummary {
            groups: groups.len(),
            ..UpdateSummary::default()
        };
        for ((key, segment), ops) in groups {
            let stored = self.store.load(backend, &self.index, &key, segment)?;
            let (old_row, mut rep) = match stored {
                Some(stored) => (Some(stored.row), stored.representation),
                None => (None, Representation::Empty),
            };

            let mut modified = false;
            for (offset, op) in ops {
                let present = rep.contains(offset);
                rep = match op {
                    IndexOp::Add => {
                        modified |= !present;
                        codec.add_offset(rep, offset)?.0
                    }
                    IndexOp::Remove => {
                        modified |= present;
                        codec.remove_offset(rep, offset)?.0
                    }
                };
            }
            if !modified {
                summary.rows_unchanged += 1;
                continue;
            }

            let written =
                self.store
                    .write(backend, &self.index, &key, segment, old_row.as_ref(), &rep)?;
            match written {
                Some(row) => {
                    trace!(index = %self.index, segment, class = %rep.class(), count = row.record_count(), "segment written");
                    summary.rows_written += 1;
                }
                None => {
                    trace!(index = %self.index, segment, "segment emptied");
                    summary.rows_deleted += 1;
                }
            }
        }

        debug!(
            index = %self.index,
            groups = summary.groups,
            written = summary.rows_written,
            deleted = summary.rows_deleted,
            "index updates applied"
        );
        Ok(summary)
    }
}
