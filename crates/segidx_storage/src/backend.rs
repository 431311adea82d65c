//! Storage backend trait definition.

use crate::cursor::RowCursor;
use crate::error::StorageResult;
use std::fmt;

/// The side tables that hold segment payloads too large for an index row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum SideTable {
    /// Sorted 2-byte offset lists.
    List,
    /// Fixed-size segment bitmaps.
    Bits,
}

impl SideTable {
    /// Returns the journal tag for this table.
    #[must_use]
    pub const fn as_byte(self) -> u8 {
        match self {
            Self::List => 1,
            Self::Bits => 2,
        }
    }

    /// Converts a journal tag back to a table.
    #[must_use]
    pub const fn from_byte(b: u8) -> Option<Self> {
        match b {
            1 => Some(Self::List),
            2 => Some(Self::Bits),
            _ => None,
        }
    }
}

impl fmt::Display for SideTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::List => f.write_str("list"),
            Self::Bits => f.write_str("bits"),
        }
    }
}

/// The storage collaborator of the segment index core.
///
/// Storage backends are **opaque byte stores**. The core owns the meaning of
/// every row, list and bitmap it writes; backends only keep them keyed and
/// ordered.
///
/// # Invariants
///
/// - Writes are only accepted between `begin_transaction` and `commit`/`abort`
/// - `abort` restores exactly the state seen at `begin_transaction`
/// - `rows` yields entries in `(key, segment)` order
/// - Side-table row ids are never 0; freed ids may be handed out again
/// - Backends must be `Send + Sync` for concurrent access
///
/// # Implementors
///
/// - [`super::InMemoryBackend`] - For testing
/// - [`super::FileBackend`] - For persistent storage
pub trait StorageBackend: Send + Sync {
    /// Returns the stored row for `key` in `segment` of `index`.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend cannot be read.
    fn get_row(&self, index: &str, key: &[u8], segment: u32) -> StorageResult<Option<Vec<u8>>>;

    /// Stores the row for `key` in `segment` of `index`, replacing any previous row.
    ///
    /// # Errors
    ///
    /// Returns [`crate::StorageError::NoTransaction`] outside a transaction.
    fn put_row(&mut self, index: &str, key: &[u8], segment: u32, row: &[u8]) -> StorageResult<()>;

    /// Deletes the row for `key` in `segment` of `index`. Missing rows are ignored.
    ///
    /// # Errors
    ///
    /// Returns [`crate::StorageError::NoTransaction`] outside a transaction.
    fn delete_row(&mut self, index: &str, key: &[u8], segment: u32) -> StorageResult<()>;

    /// Returns a cursor over every row of `index` in key, then segment, order.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend cannot be read.
    fn rows(&self, index: &str) -> StorageResult<RowCursor>;

    /// Returns the rows stored for one key, in segment order.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend cannot be read.
    fn rows_for_key(&self, index: &str, key: &[u8]) -> StorageResult<Vec<(u32, Vec<u8>)>> {
        let mut cursor = self.rows(index)?;
        cursor.seek(key);
        Ok(cursor
            .take_while(|entry| entry.key == key)
            .map(|entry| (entry.segment, entry.row))
            .collect())
    }

    /// Returns the distinct keys of `index` in order.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend cannot be read.
    fn keys(&self, index: &str) -> StorageResult<Vec<Vec<u8>>> {
        let mut keys: Vec<Vec<u8>> = Vec::new();
        for entry in self.rows(index)? {
            if keys.last() != Some(&entry.key) {
                keys.push(entry.key);
            }
        }
        Ok(keys)
    }

    /// Returns the names of all indexes that currently hold rows.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend cannot be read.
    fn index_names(&self) -> StorageResult<Vec<String>>;

    /// Reads a side-table row.
    ///
    /// # Errors
    ///
    /// Returns [`crate::StorageError::SideRowMissing`] if the row does not exist.
    fn get_side_table(&self, kind: SideTable, row_id: u32) -> StorageResult<Vec<u8>>;

    /// Writes a side-table row and returns its row id.
    ///
    /// With `Some(row_id)` the existing row is rewritten in place; with
    /// `None` a row id is allocated, recycling freed ids first.
    ///
    /// # Errors
    ///
    /// Returns an error outside a transaction, or if `row_id` does not exist.
    fn put_side_table(
        &mut self,
        kind: SideTable,
        row_id: Option<u32>,
        data: &[u8],
    ) -> StorageResult<u32>;

    /// Deletes a side-table row and makes its id available for reuse.
    ///
    /// # Errors
    ///
    /// Returns an error outside a transaction, or if the row does not exist.
    fn delete_side_table(&mut self, kind: SideTable, row_id: u32) -> StorageResult<()>;

    /// Returns the side-table row ids currently in use, ascending.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend cannot be read.
    fn side_table_ids(&self, kind: SideTable) -> StorageResult<Vec<u32>>;

    /// Reads the existence bitmap of `segment` in primary `file`.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend cannot be read.
    fn get_existence(&self, file: &str, segment: u32) -> StorageResult<Option<Vec<u8>>>;

    /// Writes the existence bitmap of `segment` in primary `file`.
    ///
    /// # Errors
    ///
    /// Returns [`crate::StorageError::NoTransaction`] outside a transaction.
    fn put_existence(&mut self, file: &str, segment: u32, bits: &[u8]) -> StorageResult<()>;

    /// Returns the segments of `file` that have an existence bitmap, ascending.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend cannot be read.
    fn existence_segments(&self, file: &str) -> StorageResult<Vec<u32>>;

    /// Reads a named control value.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend cannot be read.
    fn get_control(&self, name: &str) -> StorageResult<Option<Vec<u8>>>;

    /// Writes a named control value.
    ///
    /// # Errors
    ///
    /// Returns [`crate::StorageError::NoTransaction`] outside a transaction.
    fn put_control(&mut self, name: &str, value: &[u8]) -> StorageResult<()>;

    /// Starts a transaction.
    ///
    /// # Errors
    ///
    /// Returns [`crate::StorageError::TransactionActive`] if one is already open.
    fn begin_transaction(&mut self) -> StorageResult<()>;

    /// Makes every write since `begin_transaction` durable.
    ///
    /// # Errors
    ///
    /// Returns an error if no transaction is active or the commit fails.
    fn commit(&mut self) -> StorageResult<()>;

    /// Discards every write since `begin_transaction`.
    ///
    /// # Errors
    ///
    /// Returns [`crate::StorageError::NoTransaction`] if no transaction is active.
    fn abort(&mut self) -> StorageResult<()>;

    /// Returns true between `begin_transaction` and `commit`/`abort`.
    fn in_transaction(&self) -> bool;
}
