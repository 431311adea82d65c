//! Consistency checks over stored index rows.

use super::RecordFile;
use crate::error::{CoreError, CoreResult};
use crate::segment::{Representation, SegmentRow};
use segidx_storage::{SideTable, StorageBackend};
use std::collections::BTreeMap;
use std::fmt;

/// One inconsistency found by [`RecordFile::verify`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerifyProblem {
    /// Index the problem was found in; `None` for side-table problems.
    pub index: Option<String>,
    /// Key of the offending row.
    pub key: Option<Vec<u8>>,
    /// Segment of the offending row.
    pub segment: Option<u32>,
    /// What is wrong.
    pub message: String,
}

impl fmt::Display for VerifyProblem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(index) = &self.index {
            write!(f, "index {index}")?;
            if let Some(key) = &self.key {
                write!(f, " key {:?}", String::from_utf8_lossy(key))?;
            }
            if let Some(segment) = self.segment {
                write!(f, " segment {segment}")?;
            }
            f.write_str(": ")?;
        }
        f.write_str(&self.message)
    }
}

/// Result of [`RecordFile::verify`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VerifyReport {
    /// Index rows examined.
    pub rows_checked: usize,
    /// Record numbers examined.
    pub records_checked: u64,
    /// Side-table rows examined.
    pub side_rows_checked: usize,
    /// Everything found wrong.
    pub problems: Vec<VerifyProblem>,
}

impl VerifyReport {
    /// Returns true if no problem was found.
    #[must_use]
    pub fn is_ok(&self) -> bool {
        self.problems.is_empty()
    }

    fn problem(
        &mut self,
        index: &str,
        key: &[u8],
        segment: u32,
        message: impl Into<String>,
    ) {
        self.problems.push(VerifyProblem {
            index: Some(index.to_owned()),
            key: Some(key.to_vec()),
            segment: Some(segment),
            message: message.into(),
        });
    }
}

impl<B: StorageBackend> RecordFile<B> {
    /// Checks the stored indexes of this file against each other and the
    /// existence bitmap.
    ///
    /// Every row must decode with a count that matches its payload, a list
    /// must stay below the conversion limit, and every record must be live.
    /// Side-table rows are shared by every file in the backend, so they are
    /// checked for orphans and double references across all indexes.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidOperation`] while changes are pending or a
    /// bulk load is in progress, or a storage error if a read fails. Problems
    /// with the stored data are reported, not returned as errors.
    pub fn verify(&self) -> CoreResult<VerifyReport> {
        if self.bulk.is_some() || self.has_pending_changes() {
            return Err(CoreError::invalid_operation(
                "commit or abort pending changes before verifying",
            ));
        }

        let mut report = VerifyReport::default();
        for index in self.index_names()? {
            self.verify_index(&index, &mut report)?;
        }
        self.verify_side_tables(&mut report)?;
        Ok(report)
    }

    fn verify_index(&self, index: &str, report: &mut VerifyReport) -> CoreResult<()> {
        let storage_name = self.storage_name(index);
        let store = self.store();
        let limit = self.config.conversion_limit as usize;

        for entry in self.backend.rows(&storage_name)? {
            report.rows_checked += 1;
            let stored =
                match store.decode_stored(&self.backend, &storage_name, entry.segment, &entry.row) {
                    Ok(stored) => stored,
                    Err(err) => {
                        report.problem(index, &entry.key, entry.segment, err.to_string());
                        continue;
                    }
                };

            if let Representation::List(offsets) = &stored.representation {
                if offsets.len() >= limit {
                    report.problem(
                        index,
                        &entry.key,
                        entry.segment,
                        format!("list of {} offsets at or above conversion limit {limit}", offsets.len()),
                    );
                }
            }

            if !self.existence.is_loaded(entry.segment) {
                report.problem(
                    index,
                    &entry.key,
                    entry.segment,
                    "segment has no existence bitmap",
                );
                continue;
            }
            let mut dead = Vec::new();
            for offset in stored.representation.offsets() {
                report.records_checked += 1;
                let rn = self.config.record_at(entry.segment, offset);
                if !self.existence.is_used(rn) {
                    dead.push(rn.as_u64());
                }
            }
            if !dead.is_empty() {
                report.problem(
                    index,
                    &entry.key,
                    entry.segment,
                    format!("{} records are not live, first {}", dead.len(), dead[0]),
                );
            }
        }
        Ok(())
    }

    fn verify_side_tables(&self, report: &mut VerifyReport) -> CoreResult<()> {
        let mut references: BTreeMap<(SideTable, u32), usize> = BTreeMap::new();
        for name in self.backend.index_names()? {
            for entry in self.backend.rows(&name)? {
                if let Some(side) = SegmentRow::decode(&entry.row)
                    .ok()
                    .and_then(|row| row.side_row())
                {
                    *references.entry(side).or_default() += 1;
                }
            }
        }

        for kind in [SideTable::List, SideTable::Bits] {
            for row_id in self.backend.side_table_ids(kind)? {
                report.side_rows_checked += 1;
                match references.get(&(kind, row_id)) {
                    None => report.problems.push(VerifyProblem {
                        index: None,
                        key: None,
                        segment: None,
                        message: format!("{kind} row {row_id} is not referenced by any index row"),
                    }),
                    Some(&count) if count > 1 => report.problems.push(VerifyProblem {
                        index: None,
                        key: None,
                        segment: None,
                        message: format!("{kind} row {row_id} is referenced by {count} index rows"),
                    }),
                    Some(_) => {}
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SegmentConfig;
    use crate::file::IndexValues;
    use crate::types::RecordNumber;
    use segidx_storage::InMemoryBackend;

    fn config() -> SegmentConfig {
        SegmentConfig::new(64).conversion_limit(4)
    }

    fn populated() -> RecordFile<InMemoryBackend> {
        let mut file = RecordFile::open(InMemoryBackend::new(), "games", config()).unwrap();
        for n in 0..10 {
            let mut values = IndexValues::new();
            let key = if n % 2 == 0 { "even" } else { "odd" };
            values.insert("parity".into(), vec![key.as_bytes().to_vec()]);
            file.on_record_inserted(RecordNumber::new(n * 7), &values).unwrap();
        }
        file.commit().unwrap();
        file
    }

    fn tamper(file: RecordFile<InMemoryBackend>, f: impl FnOnce(&mut InMemoryBackend)) -> RecordFile<InMemoryBackend> {
        let mut backend = file.into_backend();
        backend.begin_transaction().unwrap();
        f(&mut backend);
        backend.commit().unwrap();
        RecordFile::open(backend, "games", config()).unwrap()
    }

    #[test]
    fn clean_file_verifies() {
        let report = populated().verify().unwrap();
        assert!(report.is_ok(), "{:?}", report.problems);
        assert_eq!(report.records_checked, 10);
        assert!(report.rows_checked >= 2);
        assert!(report.side_rows_checked >= 1);
    }

    #[test]
    fn dead_record_reported() {
        let file = tamper(populated(), |backend| {
            let row = SegmentRow::Single { segment: 3, offset: 1 };
            backend.put_row("games/parity", b"ghost", 3, &row.encode()).unwrap();
            backend.put_existence("games", 3, &[0; 8]).unwrap();
        });
        let report = file.verify().unwrap();
        assert_eq!(report.problems.len(), 1);
        assert_eq!(report.problems[0].key.as_deref(), Some(&b"ghost"[..]));
        assert!(report.problems[0].message.contains("not live"));
    }

    #[test]
    fn missing_existence_segment_reported() {
        let file = tamper(populated(), |backend| {
            let row = SegmentRow::Single { segment: 9, offset: 1 };
            backend.put_row("games/parity", b"ghost", 9, &row.encode()).unwrap();
        });
        let report = file.verify().unwrap();
        assert!(report.problems[0].message.contains("no existence bitmap"));
    }

    #[test]
    fn undecodable_row_and_orphan_side_row_reported() {
        let file = tamper(populated(), |backend| {
            backend.put_row("games/parity", b"broken", 0, &[0; 7]).unwrap();
            backend.put_side_table(SideTable::Bits, None, &[0; 8]).unwrap();
        });
        let report = file.verify().unwrap();
        assert_eq!(report.problems.len(), 2);
        assert!(report.problems.iter().any(|p| p.segment == Some(0)));
        assert!(report
            .problems
            .iter()
            .any(|p| p.index.is_none() && p.message.contains("not referenced")));
        assert!(!report.problems[1].to_string().is_empty());
    }

    #[test]
    fn refuses_with_pending_changes() {
        let mut file = populated();
        file.on_record_inserted(RecordNumber::new(1), &IndexValues::new()).unwrap();
        assert!(matches!(file.verify(), Err(CoreError::InvalidOperation { .. })));
    }
}
