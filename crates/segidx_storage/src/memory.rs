//! In-memory storage backend for testing.

use crate::backend::{SideTable, StorageBackend};
use crate::cursor::RowCursor;
use crate::error::{StorageError, StorageResult};
use crate::journal::JournalOp;
use crate::state::StoreState;
use parking_lot::RwLock;

/// An in-memory storage backend.
///
/// This backend stores all data in memory and is suitable for:
/// - Unit tests
/// - Integration tests
/// - Ephemeral indexes that don't need persistence
///
/// `begin_transaction` takes a snapshot of the whole store; `abort` puts it
/// back.
///
/// # Thread Safety
///
/// This backend is thread-safe and can be shared across threads.
///
/// # Example
///
/// ```rust
/// use segidx_storage::{InMemoryBackend, StorageBackend};
///
/// let mut backend = InMemoryBackend::new();
/// backend.begin_transaction().unwrap();
/// backend.put_row("colour", b"red", 0, &[0, 0, 0, 0, 0, 5]).unwrap();
/// backend.abort().unwrap();
/// assert!(backend.get_row("colour", b"red", 0).unwrap().is_none());
/// ```
#[derive(Debug, Default)]
pub struct InMemoryBackend {
    state: RwLock<StoreState>,
    snapshot: Option<StoreState>,
}

impl InMemoryBackend {
    /// Creates a new empty in-memory backend.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the total number of index rows across every index.
    ///
    /// Useful for testing and debugging.
    #[must_use]
    pub fn row_count(&self) -> usize {
        let state = self.state.read();
        state
            .index_names()
            .iter()
            .map(|index| state.cursor(index).len())
            .sum()
    }

    /// Clears all data from the backend.
    pub fn clear(&mut self) {
        *self.state.write() = StoreState::default();
        self.snapshot = None;
    }

    fn write(&mut self, op: JournalOp) -> StorageResult<()> {
        if self.snapshot.is_none() {
            return Err(StorageError::NoTransaction);
        }
        self.state.write().apply(op)
    }
}

impl StorageBackend for InMemoryBackend {
    fn get_row(&self, index: &str, key: &[u8], segment: u32) -> StorageResult<Option<Vec<u8>>> {
        Ok(self.state.read().get_row(index, key, segment))
    }

    fn put_row(&mut self, index: &str, key: &[u8], segment: u32, row: &[u8]) -> StorageResult<()> {
        self.write(JournalOp::PutRow {
            index: index.to_string(),
            key: key.to_vec(),
            segment,
            row: row.to_vec(),
        })
    }

    fn delete_row(&mut self, index: &str, key: &[u8], segment: u32) -> StorageResult<()> {
        self.write(JournalOp::DeleteRow {
            index: index.to_string(),
            key: key.to_vec(),
            segment,
        })
    }

    fn rows(&self, index: &str) -> StorageResult<RowCursor> {
        Ok(self.state.read().cursor(index))
    }

    fn index_names(&self) -> StorageResult<Vec<String>> {
        Ok(self.state.read().index_names())
    }

    fn get_side_table(&self, kind: SideTable, row_id: u32) -> StorageResult<Vec<u8>> {
        self.state.read().get_side(kind, row_id)
    }

    fn put_side_table(
        &mut self,
        kind: SideTable,
        row_id: Option<u32>,
        data: &[u8],
    ) -> StorageResult<u32> {
        if self.snapshot.is_none() {
            return Err(StorageError::NoTransaction);
        }
        let row_id = {
            let mut state = self.state.write();
            match row_id {
                Some(row_id) if state.has_side(kind, row_id) => row_id,
                Some(row_id) => return Err(StorageError::SideRowMissing { kind, row_id }),
                None => state.allocate_side(kind)?,
            }
        };
        self.write(JournalOp::PutSide {
            kind,
            row_id,
            data: data.to_vec(),
        })?;
        Ok(row_id)
    }

    fn delete_side_table(&mut self, kind: SideTable, row_id: u32) -> StorageResult<()> {
        self.write(JournalOp::DeleteSide { kind, row_id })
    }

    fn side_table_ids(&self, kind: SideTable) -> StorageResult<Vec<u32>> {
        Ok(self.state.read().side_ids(kind))
    }

    fn get_existence(&self, file: &str, segment: u32) -> StorageResult<Option<Vec<u8>>> {
        Ok(self.state.read().get_existence(file, segment))
    }

    fn put_existence(&mut self, file: &str, segment: u32, bits: &[u8]) -> StorageResult<()> {
        self.write(JournalOp::PutExistence {
            file: file.to_string(),
            segment,
            bits: bits.to_vec(),
        })
    }

    fn existence_segments(&self, file: &str) -> StorageResult<Vec<u32>> {
        Ok(self.state.read().existence_segments(file))
    }

    fn get_control(&self, name: &str) -> StorageResult<Option<Vec<u8>>> {
        Ok(self.state.read().get_control(name))
    }

    fn put_control(&mut self, name: &str, value: &[u8]) -> StorageResult<()> {
        self.write(JournalOp::PutControl {
            name: name.to_string(),
            value: value.to_vec(),
        })
    }

    fn begin_transaction(&mut self) -> StorageResult<()> {
        if self.snapshot.is_some() {
            return Err(StorageError::TransactionActive);
        }
        self.snapshot = Some(self.state.read().clone());
        Ok(())
    }

    fn commit(&mut self) -> StorageResult<()> {
        self.snapshot.take().ok_or(StorageError::NoTransaction)?;
        Ok(())
    }

    fn abort(&mut self) -> StorageResult<()> {
        let snapshot = self.snapshot.take().ok_or(StorageError::NoTransaction)?;
        *self.state.write() = snapshot;
        Ok(())
    }

    fn in_transaction(&self) -> bool {
        self.snapshot.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn backend_in_txn() -> InMemoryBackend {
        let mut backend = InMemoryBackend::new();
        backend.begin_transaction().unwrap();
        backend
    }

    #[test]
    fn memory_new_is_empty() {
        let backend = InMemoryBackend::new();
        assert_eq!(backend.row_count(), 0);
        assert!(backend.index_names().unwrap().is_empty());
        assert!(!backend.in_transaction());
    }

    #[test]
    fn memory_write_outside_transaction_fails() {
        let mut backend = InMemoryBackend::new();
        let result = backend.put_row("colour", b"red", 0, &[1]);
        assert!(matches!(result, Err(StorageError::NoTransaction)));

        let result = backend.put_side_table(SideTable::List, None, &[0, 1]);
        assert!(matches!(result, Err(StorageError::NoTransaction)));
    }

    #[test]
    fn memory_nested_begin_fails() {
        let mut backend = backend_in_txn();
        assert!(matches!(
            backend.begin_transaction(),
            Err(StorageError::TransactionActive)
        ));
    }

    #[test]
    fn memory_commit_keeps_writes() {
        let mut backend = backend_in_txn();
        backend.put_row("colour", b"red", 2, &[7]).unwrap();
        backend.put_control("games.high", &[0, 9]).unwrap();
        backend.commit().unwrap();

        assert_eq!(backend.get_row("colour", b"red", 2).unwrap(), Some(vec![7]));
        assert_eq!(backend.get_control("games.high").unwrap(), Some(vec![0, 9]));
    }

    #[test]
    fn memory_abort_restores_snapshot() {
        let mut backend = backend_in_txn();
        backend.put_row("colour", b"red", 0, &[1]).unwrap();
        let list_id = backend.put_side_table(SideTable::List, None, &[0, 1]).unwrap();
        backend.commit().unwrap();

        backend.begin_transaction().unwrap();
        backend.put_row("colour", b"red", 0, &[2]).unwrap();
        backend.put_row("colour", b"blue", 0, &[3]).unwrap();
        backend.delete_side_table(SideTable::List, list_id).unwrap();
        backend.put_existence("games", 0, &[0x80]).unwrap();
        backend.abort().unwrap();

        assert_eq!(backend.get_row("colour", b"red", 0).unwrap(), Some(vec![1]));
        assert!(backend.get_row("colour", b"blue", 0).unwrap().is_none());
        assert_eq!(
            backend.get_side_table(SideTable::List, list_id).unwrap(),
            vec![0, 1]
        );
        assert!(backend.existence_segments("games").unwrap().is_empty());
    }

    #[test]
    fn memory_abort_without_transaction_fails() {
        let mut backend = InMemoryBackend::new();
        assert!(matches!(backend.abort(), Err(StorageError::NoTransaction)));
        assert!(matches!(backend.commit(), Err(StorageError::NoTransaction)));
    }

    #[test]
    fn memory_side_table_ids_recycle() {
        let mut backend = backend_in_txn();
        let a = backend.put_side_table(SideTable::Bits, None, &[1]).unwrap();
        let b = backend.put_side_table(SideTable::Bits, None, &[2]).unwrap();
        assert_eq!((a, b), (1, 2));

        backend.delete_side_table(SideTable::Bits, a).unwrap();
        let c = backend.put_side_table(SideTable::Bits, None, &[3]).unwrap();
        assert_eq!(c, a);
        assert_eq!(backend.side_table_ids(SideTable::Bits).unwrap(), vec![1, 2]);
    }

    #[test]
    fn memory_side_table_rewrite_in_place() {
        let mut backend = backend_in_txn();
        let id = backend.put_side_table(SideTable::List, None, &[0, 1]).unwrap();
        let same = backend
            .put_side_table(SideTable::List, Some(id), &[0, 1, 0, 2])
            .unwrap();
        assert_eq!(same, id);
        assert_eq!(
            backend.get_side_table(SideTable::List, id).unwrap(),
            vec![0, 1, 0, 2]
        );
    }

    #[test]
    fn memory_side_table_rewrite_missing_fails() {
        let mut backend = backend_in_txn();
        let result = backend.put_side_table(SideTable::List, Some(4), &[0, 1]);
        assert!(matches!(
            result,
            Err(StorageError::SideRowMissing { row_id: 4, .. })
        ));
    }

    #[test]
    fn memory_side_tables_are_independent() {
        let mut backend = backend_in_txn();
        let list = backend.put_side_table(SideTable::List, None, &[0, 1]).unwrap();
        let bits = backend.put_side_table(SideTable::Bits, None, &[0xFF]).unwrap();
        assert_eq!(list, bits);
        assert_eq!(backend.get_side_table(SideTable::List, list).unwrap(), vec![0, 1]);
        assert_eq!(backend.get_side_table(SideTable::Bits, bits).unwrap(), vec![0xFF]);
    }

    #[test]
    fn memory_rows_are_ordered_by_key_then_segment() {
        let mut backend = backend_in_txn();
        backend.put_row("colour", b"red", 3, &[3]).unwrap();
        backend.put_row("colour", b"blue", 1, &[1]).unwrap();
        backend.put_row("colour", b"red", 0, &[0]).unwrap();
        backend.put_row("shape", b"round", 0, &[9]).unwrap();

        let rows: Vec<(Vec<u8>, u32)> = backend
            .rows("colour")
            .unwrap()
            .map(|e| (e.key, e.segment))
            .collect();
        assert_eq!(
            rows,
            vec![
                (b"blue".to_vec(), 1),
                (b"red".to_vec(), 0),
                (b"red".to_vec(), 3),
            ]
        );
        assert_eq!(
            backend.keys("colour").unwrap(),
            vec![b"blue".to_vec(), b"red".to_vec()]
        );
        assert_eq!(
            backend.rows_for_key("colour", b"red").unwrap(),
            vec![(0, vec![0]), (3, vec![3])]
        );
        assert_eq!(
            backend.index_names().unwrap(),
            vec!["colour".to_string(), "shape".to_string()]
        );
    }

    #[test]
    fn memory_delete_missing_row_is_ignored() {
        let mut backend = backend_in_txn();
        backend.delete_row("colour", b"red", 0).unwrap();
        assert_eq!(backend.row_count(), 0);
    }

    #[test]
    fn memory_clear() {
        let mut backend = backend_in_txn();
        backend.put_row("colour", b"red", 0, &[1]).unwrap();
        backend.clear();
        assert_eq!(backend.row_count(), 0);
        assert!(!backend.in_transaction());
    }
}
