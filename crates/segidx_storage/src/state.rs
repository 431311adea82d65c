//! The in-memory image shared by both backends.

use crate::backend::SideTable;
use crate::cursor::{RowCursor, RowEntry};
use crate::error::{StorageError, StorageResult};
use crate::journal::JournalOp;
use std::collections::BTreeMap;

/// Rows of one index keyed by `(key, segment)`.
type IndexRows = BTreeMap<(Vec<u8>, u32), Vec<u8>>;

/// One side table with its free-id list.
#[derive(Debug, Clone)]
pub(crate) struct SideTableState {
    rows: BTreeMap<u32, Vec<u8>>,
    freed: Vec<u32>,
    next_id: u32,
}

impl Default for SideTableState {
    fn default() -> Self {
        Self {
            rows: BTreeMap::new(),
            freed: Vec::new(),
            next_id: 1,
        }
    }
}

impl SideTableState {
    /// Hands out the most recently freed id, or a fresh one.
    fn allocate(&mut self, kind: SideTable) -> StorageResult<u32> {
        if let Some(row_id) = self.freed.pop() {
            return Ok(row_id);
        }
        let row_id = self.next_id;
        if row_id == 0 {
            return Err(StorageError::RowIdsExhausted(kind));
        }
        // wraps to 0 after u32::MAX, which marks the table exhausted
        self.next_id = row_id.wrapping_add(1);
        Ok(row_id)
    }

    fn insert(&mut self, row_id: u32, data: Vec<u8>) {
        if let Some(pos) = self.freed.iter().rposition(|&id| id == row_id) {
            self.freed.remove(pos);
        }
        if self.next_id != 0 && row_id >= self.next_id {
            self.next_id = row_id.wrapping_add(1);
        }
        self.rows.insert(row_id, data);
    }

    fn remove(&mut self, kind: SideTable, row_id: u32) -> StorageResult<()> {
        if self.rows.remove(&row_id).is_none() {
            return Err(StorageError::SideRowMissing { kind, row_id });
        }
        self.freed.push(row_id);
        Ok(())
    }
}

/// Everything a backend stores.
#[derive(Debug, Clone, Default)]
pub(crate) struct StoreState {
    rows: BTreeMap<String, IndexRows>,
    lists: SideTableState,
    bits: SideTableState,
    existence: BTreeMap<String, BTreeMap<u32, Vec<u8>>>,
    control: BTreeMap<String, Vec<u8>>,
}

impl StoreState {
    fn side(&self, kind: SideTable) -> &SideTableState {
        match kind {
            SideTable::List => &self.lists,
            SideTable::Bits => &self.bits,
        }
    }

    fn side_mut(&mut self, kind: SideTable) -> &mut SideTableState {
        match kind {
            SideTable::List => &mut self.lists,
            SideTable::Bits => &mut self.bits,
        }
    }

    pub(crate) fn get_row(&self, index: &str, key: &[u8], segment: u32) -> Option<Vec<u8>> {
        self.rows
            .get(index)
            .and_then(|rows| rows.get(&(key.to_vec(), segment)))
            .cloned()
    }

    pub(crate) fn cursor(&self, index: &str) -> RowCursor {
        let entries = self
            .rows
            .get(index)
            .map(|rows| {
                rows.iter()
                    .map(|((key, segment), row)| RowEntry {
                        key: key.clone(),
                        segment: *segment,
                        row: row.clone(),
                    })
                    .collect()
            })
            .unwrap_or_default();
        RowCursor::new(entries)
    }

    pub(crate) fn index_names(&self) -> Vec<String> {
        self.rows.keys().cloned().collect()
    }

    pub(crate) fn get_side(&self, kind: SideTable, row_id: u32) -> StorageResult<Vec<u8>> {
        self.side(kind)
            .rows
            .get(&row_id)
            .cloned()
            .ok_or(StorageError::SideRowMissing { kind, row_id })
    }

    pub(crate) fn has_side(&self, kind: SideTable, row_id: u32) -> bool {
        self.side(kind).rows.contains_key(&row_id)
    }

    pub(crate) fn side_ids(&self, kind: SideTable) -> Vec<u32> {
        self.side(kind).rows.keys().copied().collect()
    }

    /// Picks the row id the next `PutSide` without an explicit id will use.
    pub(crate) fn allocate_side(&mut self, kind: SideTable) -> StorageResult<u32> {
        self.side_mut(kind).allocate(kind)
    }

    pub(crate) fn get_existence(&self, file: &str, segment: u32) -> Option<Vec<u8>> {
        self.existence
            .get(file)
            .and_then(|segments| segments.get(&segment))
            .cloned()
    }

    pub(crate) fn existence_segments(&self, file: &str) -> Vec<u32> {
        self.existence
            .get(file)
            .map(|segments| segments.keys().copied().collect())
            .unwrap_or_default()
    }

    pub(crate) fn get_control(&self, name: &str) -> Option<Vec<u8>> {
        self.control.get(name).cloned()
    }

    /// Applies one mutation. Used both for live writes and for journal replay.
    pub(crate) fn apply(&mut self, op: JournalOp) -> StorageResult<()> {
        match op {
            JournalOp::PutRow {
                index,
                key,
                segment,
                row,
            } => {
                self.rows.entry(index).or_default().insert((key, segment), row);
            }
            JournalOp::DeleteRow {
                index,
                key,
                segment,
            } => {
                if let Some(rows) = self.rows.get_mut(&index) {
                    rows.remove(&(key, segment));
                    if rows.is_empty() {
                        self.rows.remove(&index);
                    }
                }
            }
            JournalOp::PutSide { kind, row_id, data } => {
                self.side_mut(kind).insert(row_id, data);
            }
            JournalOp::DeleteSide { kind, row_id } => {
                self.side_mut(kind).remove(kind, row_id)?;
            }
            JournalOp::PutExistence {
                file,
                segment,
                bits,
            } => {
                self.existence.entry(file).or_default().insert(segment, bits);
            }
            JournalOp::PutControl { name, value } => {
                self.control.insert(name, value);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn side_ids_start_at_one() {
        let mut state = StoreState::default();
        assert_eq!(state.allocate_side(SideTable::List).unwrap(), 1);
        assert_eq!(state.allocate_side(SideTable::Bits).unwrap(), 1);
    }

    #[test]
    fn freed_ids_are_recycled_last_in_first_out() {
        let mut state = StoreState::default();
        for _ in 0..3 {
            let row_id = state.allocate_side(SideTable::Bits).unwrap();
            state
                .apply(JournalOp::PutSide {
                    kind: SideTable::Bits,
                    row_id,
                    data: vec![0],
                })
                .unwrap();
        }
        for row_id in [1, 3] {
            state
                .apply(JournalOp::DeleteSide {
                    kind: SideTable::Bits,
                    row_id,
                })
                .unwrap();
        }

        assert_eq!(state.allocate_side(SideTable::Bits).unwrap(), 3);
        assert_eq!(state.allocate_side(SideTable::Bits).unwrap(), 1);
        assert_eq!(state.allocate_side(SideTable::Bits).unwrap(), 4);
    }

    #[test]
    fn replayed_put_side_claims_freed_id() {
        let mut state = StoreState::default();
        state
            .apply(JournalOp::PutSide {
                kind: SideTable::List,
                row_id: 1,
                data: vec![],
            })
            .unwrap();
        state
            .apply(JournalOp::DeleteSide {
                kind: SideTable::List,
                row_id: 1,
            })
            .unwrap();
        state
            .apply(JournalOp::PutSide {
                kind: SideTable::List,
                row_id: 1,
                data: vec![9],
            })
            .unwrap();

        assert_eq!(state.allocate_side(SideTable::List).unwrap(), 2);
    }

    #[test]
    fn deleting_missing_side_row_fails() {
        let mut state = StoreState::default();
        let result = state.apply(JournalOp::DeleteSide {
            kind: SideTable::List,
            row_id: 5,
        });
        assert!(matches!(
            result,
            Err(StorageError::SideRowMissing { row_id: 5, .. })
        ));
    }

    #[test]
    fn emptied_index_disappears() {
        let mut state = StoreState::default();
        state
            .apply(JournalOp::PutRow {
                index: "colour".into(),
                key: b"red".to_vec(),
                segment: 0,
                row: vec![1],
            })
            .unwrap();
        assert_eq!(state.index_names(), vec!["colour".to_string()]);

        state
            .apply(JournalOp::DeleteRow {
                index: "colour".into(),
                key: b"red".to_vec(),
                segment: 0,
            })
            .unwrap();
        assert!(state.index_names().is_empty());
    }
}
