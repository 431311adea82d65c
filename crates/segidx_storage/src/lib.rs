//! # segidx Storage
//!
//! Storage backend trait and implementations for segidx.
//!
//! This crate provides the storage collaborator that the segment index core
//! writes through. Storage backends are **opaque byte stores** - they do not
//! interpret index rows, list payloads or bitmaps.
//!
//! ## Design Principles
//!
//! - Index rows are keyed by `(index, key, segment)`
//! - Side tables hold list and bitmap payloads addressed by row id
//! - Existence bitmaps are keyed by `(file, segment)`
//! - All writes happen inside `begin_transaction` / `commit`
//! - Must be `Send + Sync` for concurrent access
//!
//! ## Available Backends
//!
//! - [`InMemoryBackend`] - For testing and ephemeral storage
//! - [`FileBackend`] - Journaled persistent storage
//!
//! ## Example
//!
//! ```rust
//! use segidx_storage::{InMemoryBackend, SideTable, StorageBackend};
//!
//! let mut backend = InMemoryBackend::new();
//! backend.begin_transaction().unwrap();
//! let row_id = backend.put_side_table(SideTable::List, None, &[0, 1, 0, 7]).unwrap();
//! backend.put_row("colour", b"red", 0, &[0, 0, 0, 0, 0, 2, 0, 0, 0, 1]).unwrap();
//! backend.commit().unwrap();
//!
//! assert_eq!(backend.get_side_table(SideTable::List, row_id).unwrap(), vec![0, 1, 0, 7]);
//! assert!(backend.get_row("colour", b"red", 0).unwrap().is_some());
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod backend;
mod cursor;
mod error;
mod file;
mod journal;
mod memory;
mod state;

pub use backend::{SideTable, StorageBackend};
pub use cursor::{RowCursor, RowEntry};
pub use error::{StorageError, StorageResult};
pub use file::{FileBackend, FileConfig};
pub use memory::InMemoryBackend;
