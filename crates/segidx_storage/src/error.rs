//! Error types for storage operations.

use crate::backend::SideTable;
use std::io;
use thiserror::Error;

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Errors that can occur during storage operations.
#[derive(Debug, Error)]
pub enum StorageError {
    /// An I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// A side-table row was referenced but does not exist.
    #[error("{kind} side table has no row {row_id}")]
    SideRowMissing {
        /// The side table searched.
        kind: SideTable,
        /// The requested row id.
        row_id: u32,
    },

    /// The storage file is corrupted.
    #[error("storage corrupted: {0}")]
    Corrupted(String),

    /// A write was attempted outside a transaction.
    #[error("no transaction is active")]
    NoTransaction,

    /// `begin_transaction` was called while a transaction was already active.
    #[error("a transaction is already active")]
    TransactionActive,

    /// A side table ran out of row ids.
    #[error("{0} side table has no free row ids")]
    RowIdsExhausted(SideTable),
}

impl StorageError {
    /// Creates a corruption error.
    pub fn corrupted(message: impl Into<String>) -> Self {
        Self::Corrupted(message.into())
    }
}
