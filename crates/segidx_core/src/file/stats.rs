//! Index statistics.

use super::RecordFile;
use crate::error::CoreResult;
use crate::segment::SegmentRow;
use segidx_storage::StorageBackend;

/// Shape of one stored index, read from row headers only.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IndexStats {
    /// Index name.
    pub index: String,
    /// Distinct keys.
    pub keys: usize,
    /// Rows holding one direct offset.
    pub single_rows: usize,
    /// Rows referring to an offset list.
    pub list_rows: usize,
    /// Rows referring to a bitmap.
    pub bitmap_rows: usize,
    /// Sum of the row record counts.
    pub records: u64,
}

impl IndexStats {
    /// Total rows.
    #[must_use]
    pub fn rows(&self) -> usize {
        self.single_rows + self.list_rows + self.bitmap_rows
    }
}

impl<B: StorageBackend> RecordFile<B> {
    /// Counts the committed rows of `index` by class.
    ///
    /// # Errors
    ///
    /// Returns [`crate::CoreError::IndexCorrupt`] for a row of unknown shape.
    pub fn index_stats(&self, index: &str) -> CoreResult<IndexStats> {
        let storage_name = self.storage_name(index);
        let mut stats = IndexStats {
            index: index.to_owned(),
            ..IndexStats::default()
        };
        let mut last_key: Option<Vec<u8>> = None;
        for entry in self.backend.rows(&storage_name)? {
            let row = SegmentRow::decode(&entry.row)
                .map_err(|err| err.in_index(&storage_name, entry.segment))?;
            match row {
                SegmentRow::Single { .. } => stats.single_rows += 1,
                SegmentRow::List { .. } => stats.list_rows += 1,
                SegmentRow::Bitmap { .. } => stats.bitmap_rows += 1,
            }
            stats.records += u64::from(row.record_count());
            if last_key.as_ref() != Some(&entry.key) {
                stats.keys += 1;
                last_key = Some(entry.key);
            }
        }
        Ok(stats)
    }
}

#[cfg(test)]
mod tests {
    use crate::config::SegmentConfig;
    use crate::file::{IndexValues, RecordFile};
    use crate::types::RecordNumber;
    use segidx_storage::InMemoryBackend;

    #[test]
    fn counts_rows_by_class() {
        let config = SegmentConfig::new(64).conversion_limit(4);
        let mut file = RecordFile::open(InMemoryBackend::new(), "games", config).unwrap();
        let plan: [(&str, &[u64]); 3] = [("a", &[1]), ("b", &[1, 2]), ("c", &[1, 2, 3, 4, 70])];
        for n in [1, 2, 3, 4, 70] {
            let mut values = IndexValues::new();
            let keys = plan
                .iter()
                .filter(|(_, records)| records.contains(&n))
                .map(|(key, _)| key.as_bytes().to_vec())
                .collect();
            values.insert("tag".into(), keys);
            file.on_record_inserted(RecordNumber::new(n), &values).unwrap();
        }
        file.commit().unwrap();

        let stats = file.index_stats("tag").unwrap();
        assert_eq!(stats.keys, 3);
        // c has a bitmap in segment 0 and a single in segment 1
        assert_eq!(stats.single_rows, 2);
        assert_eq!(stats.list_rows, 1);
        assert_eq!(stats.bitmap_rows, 1);
        assert_eq!(stats.rows(), 4);
        assert_eq!(stats.records, 8);
        assert_eq!(file.index_stats("missing").unwrap(), stats_for("missing"));
    }

    fn stats_for(index: &str) -> crate::file::IndexStats {
        crate::file::IndexStats {
            index: index.to_owned(),
            ..Default::default()
        }
    }
}
