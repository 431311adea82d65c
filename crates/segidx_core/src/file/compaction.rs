//! Index compaction.
//!
//! Unless a lower conversion limit is set, the update paths never demote a
//! bitmap whose population has fallen below the conversion limit. Compaction rewrites such segments, and any
//! other row not in its canonical class, as the smallest encoding.

use super::RecordFile;
use crate::error::{CoreError, CoreResult};
use crate::segment::SegmentClass;
use segidx_storage::StorageBackend;
use tracing::debug;

/// Counts reported by [`RecordFile::compact_index`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CompactionSummary {
    /// Rows examined.
    pub rows_checked: usize,
    /// Rows re-encoded in a smaller class.
    pub rows_rewritten: usize,
    /// Of those, bitmaps demoted to a list or a single offset.
    pub bitmaps_demoted: usize,
}

impl<B: StorageBackend> RecordFile<B> {
    /// Re-encodes every row of `index` in its canonical class.
    ///
    /// Runs in its own backend transaction; nothing is written unless every
    /// row decodes.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidOperation`] while changes are pending or a
    /// bulk load is in progress, [`CoreError::UnknownIndex`] if `index` has
    /// no rows, or [`CoreError::IndexCorrupt`] for an undecodable row.
    pub fn compact_index(&mut self, index: &str) -> CoreResult<CompactionSummary> {
        if self.bulk.is_some() || self.has_pending_changes() {
            return Err(CoreError::invalid_operation(
                "commit or abort pending changes before compacting",
            ));
        }
        if !self.index_names()?.iter().any(|name| name == index) {
            return Err(CoreError::unknown_index(index));
        }

        self.backend.begin_transaction()?;
        match self.compact_rows(index) {
            Ok(summary) => {
                self.backend.commit()?;
                debug!(
                    file = %self.name,
                    index,
                    rows = summary.rows_checked,
                    rewritten = summary.rows_rewritten,
                    demoted = summary.bitmaps_demoted,
                    "index compacted"
                );
                Ok(summary)
            }
            Err(err) => {
                let _ = self.backend.abort();
                Err(err)
            }
        }
    }

    fn compact_rows(&mut self, index: &str) -> CoreResult<CompactionSummary> {
        let storage_name = self.storage_name(index);
        let store = self.store();
        let mut summary = CompactionSummary::default();

        for entry in self.backend.rows(&storage_name)? {
            summary.rows_checked += 1;
            let stored =
                store.decode_stored(&self.backend, &storage_name, entry.segment, &entry.row)?;
            let before = stored.representation.class();
            let normalized = store.codec().normalize(stored.representation)?;
            if normalized.class() == before {
                continue;
            }
            store.write(
                &mut self.backend,
                &storage_name,
                &entry.key,
                entry.segment,
                Some(&stored.row),
                &normalized,
            )?;
            summary.rows_rewritten += 1;
            if before == SegmentClass::Bitmap {
                summary.bitmaps_demoted += 1;
            }
        }
        Ok(summary)
    }
}
