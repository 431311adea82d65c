//! File-based storage backend for persistent storage.

use crate::backend::{SideTable, StorageBackend};
use crate::cursor::RowCursor;
use crate::error::{StorageError, StorageResult};
use crate::journal::{encode_frame, scan_journal, JournalOp};
use crate::state::StoreState;
use parking_lot::RwLock;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Configuration for [`FileBackend`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileConfig {
    /// Whether `commit` calls `sync_all` after appending its frame.
    pub sync_on_commit: bool,
    /// Whether missing parent directories are created on open.
    pub create_dirs: bool,
}

impl Default for FileConfig {
    fn default() -> Self {
        Self {
            sync_on_commit: true,
            create_dirs: false,
        }
    }
}

impl FileConfig {
    /// Sets whether commits are synced to disk.
    #[must_use]
    pub const fn sync_on_commit(mut self, sync: bool) -> Self {
        self.sync_on_commit = sync;
        self
    }

    /// Sets whether parent directories are created on open.
    #[must_use]
    pub const fn create_dirs(mut self, create: bool) -> Self {
        self.create_dirs = create;
        self
    }
}

/// A journaled file storage backend.
///
/// The whole store is held in memory. Each committed transaction is appended
/// to the journal file as one checksummed frame, and opening the file replays
/// every frame. Data survives process restarts.
///
/// # Durability
///
/// - A transaction is durable once `commit` returns (with `sync_on_commit`)
/// - A frame torn by a crash mid-append is discarded on the next open
/// - If appending the frame fails, the file is cut back and the transaction
///   is rolled back
///
/// # Thread Safety
///
/// This backend is thread-safe and can be shared across threads.
/// Internal locking ensures consistent access.
///
/// # Example
///
/// ```no_run
/// use segidx_storage::{FileBackend, StorageBackend};
/// use std::path::Path;
///
/// let mut backend = FileBackend::open(Path::new("index.sgj")).unwrap();
/// backend.begin_transaction().unwrap();
/// backend.put_row("colour", b"red", 0, &[0, 0, 0, 0, 0, 5]).unwrap();
/// backend.commit().unwrap(); // frame appended and synced
/// ```
#[derive(Debug)]
pub struct FileBackend {
    path: PathBuf,
    config: FileConfig,
    file: RwLock<File>,
    journal_len: u64,
    state: RwLock<StoreState>,
    snapshot: Option<StoreState>,
    pending: Vec<JournalOp>,
}

impl FileBackend {
    /// Opens or creates a journal at the given path with default configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be opened or its journal is corrupt.
    pub fn open(path: &Path) -> StorageResult<Self> {
        Self::open_with_config(path, FileConfig::default())
    }

    /// Opens or creates a journal at the given path.
    ///
    /// Every complete frame is replayed. A torn final frame is logged,
    /// truncated away, and ignored.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be opened, or if a complete frame
    /// fails its checksum or cannot be decoded.
    pub fn open_with_config(path: &Path, config: FileConfig) -> StorageResult<Self> {
        if config.create_dirs {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)?;

        let mut data = Vec::new();
        file.read_to_end(&mut data)?;
        let scan = scan_journal(&data)?;

        if scan.torn_tail {
            warn!(
                path = %path.display(),
                valid_len = scan.valid_len,
                file_len = data.len(),
                "discarding torn journal tail"
            );
            file.set_len(scan.valid_len)?;
            file.sync_all()?;
        }

        let mut state = StoreState::default();
        let frames = scan.frames.len();
        for ops in scan.frames {
            for op in ops {
                state.apply(op)?;
            }
        }
        debug!(path = %path.display(), frames, "journal replayed");

        Ok(Self {
            path: path.to_path_buf(),
            config,
            file: RwLock::new(file),
            journal_len: scan.valid_len,
            state: RwLock::new(state),
            snapshot: None,
            pending: Vec::new(),
        })
    }

    /// Returns the path to the journal file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Returns the length in bytes of the committed journal.
    #[must_use]
    pub fn journal_len(&self) -> u64 {
        self.journal_len
    }

    fn write(&mut self, op: JournalOp) -> StorageResult<()> {
        if self.snapshot.is_none() {
            return Err(StorageError::NoTransaction);
        }
        self.state.write().apply(op.clone())?;
        self.pending.push(op);
        Ok(())
    }

    fn append_frame(&self, frame: &[u8]) -> StorageResult<()> {
        let mut file = self.file.write();
        let appended = file
            .seek(SeekFrom::Start(self.journal_len))
            .and_then(|_| file.write_all(frame))
            .and_then(|()| file.flush())
            .and_then(|()| {
                if self.config.sync_on_commit {
                    file.sync_all()
                } else {
                    Ok(())
                }
            });
        if let Err(err) = appended {
            // best effort; replay drops a torn tail anyway
            let _ = file.set_len(self.journal_len);
            return Err(err.into());
        }
        Ok(())
    }
}

impl StorageBackend for FileBackend {
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
        self.pending.clear();
        Ok(())
    }

    fn commit(&mut self) -> StorageResult<()> {
        let snapshot = self.snapshot.take().ok_or(StorageError::NoTransaction)?;
        let ops = std::mem::take(&mut self.pending);
        if ops.is_empty() {
            return Ok(());
        }

        let frame = encode_frame(&ops);
        if let Err(err) = self.append_frame(&frame) {
            *self.state.write() = snapshot;
            return Err(err);
        }
        self.journal_len += frame.len() as u64;
        debug!(ops = ops.len(), bytes = frame.len(), "journal frame committed");
        Ok(())
    }

    fn abort(&mut self) -> StorageResult<()> {
        let snapshot = self.snapshot.take().ok_or(StorageError::NoTransaction)?;
        *self.state.write() = snapshot;
        self.pending.clear();
        Ok(())
    }

    fn in_transaction(&self) -> bool {
        self.snapshot.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn write_sample(backend: &mut FileBackend) -> u32 {
        backend.begin_transaction().unwrap();
        let list_id = backend
            .put_side_table(SideTable::List, None, &[0, 1, 0, 4])
            .unwrap();
        backend
            .put_row("colour", b"red", 0, &[0, 0, 0, 0, 0, 2, 0, 0, 0, 1])
            .unwrap();
        backend.put_existence("games", 0, &[0b0100_1000]).unwrap();
        backend.put_control("games.high", &[0, 0, 0, 4]).unwrap();
        backend.commit().unwrap();
        list_id
    }

    #[test]
    fn file_create_new() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test.sgj");

        let backend = FileBackend::open(&path).unwrap();
        assert_eq!(backend.journal_len(), 0);
        assert!(path.exists());
        assert!(backend.index_names().unwrap().is_empty());
    }

    #[test]
    fn file_persistence() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test.sgj");

        let list_id = {
            let mut backend = FileBackend::open(&path).unwrap();
            write_sample(&mut backend)
        };

        let backend = FileBackend::open(&path).unwrap();
        assert_eq!(
            backend.get_side_table(SideTable::List, list_id).unwrap(),
            vec![0, 1, 0, 4]
        );
        assert!(backend.get_row("colour", b"red", 0).unwrap().is_some());
        assert_eq!(
            backend.get_existence("games", 0).unwrap(),
            Some(vec![0b0100_1000])
        );
        assert_eq!(
            backend.get_control("games.high").unwrap(),
            Some(vec![0, 0, 0, 4])
        );
    }

    #[test]
    fn file_aborted_writes_are_not_journaled() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test.sgj");

        {
            let mut backend = FileBackend::open(&path).unwrap();
            write_sample(&mut backend);
            let len = backend.journal_len();

            backend.begin_transaction().unwrap();
            backend.put_row("colour", b"blue", 0, &[9]).unwrap();
            backend.abort().unwrap();
            assert_eq!(backend.journal_len(), len);
            assert!(backend.get_row("colour", b"blue", 0).unwrap().is_none());
        }

        let backend = FileBackend::open(&path).unwrap();
        assert!(backend.get_row("colour", b"blue", 0).unwrap().is_none());
    }

    #[test]
    fn file_empty_commit_appends_nothing() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test.sgj");

        let mut backend = FileBackend::open(&path).unwrap();
        backend.begin_transaction().unwrap();
        backend.commit().unwrap();
        assert_eq!(backend.journal_len(), 0);
    }

    #[test]
    fn file_torn_tail_is_discarded() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test.sgj");

        let committed_len = {
            let mut backend = FileBackend::open(&path).unwrap();
            write_sample(&mut backend);
            backend.journal_len()
        };

        // simulate a crash partway through appending a second frame
        {
            let mut file = OpenOptions::new().append(true).open(&path).unwrap();
            let frame = encode_frame(&[JournalOp::PutControl {
                name: "games.high".into(),
                value: vec![0, 0, 0, 9],
            }]);
            file.write_all(&frame[..frame.len() - 2]).unwrap();
        }

        let backend = FileBackend::open(&path).unwrap();
        assert_eq!(backend.journal_len(), committed_len);
        assert_eq!(
            backend.get_control("games.high").unwrap(),
            Some(vec![0, 0, 0, 4])
        );
        assert_eq!(std::fs::metadata(&path).unwrap().len(), committed_len);
    }

    #[test]
    fn file_corrupt_frame_fails_open() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test.sgj");

        {
            let mut backend = FileBackend::open(&path).unwrap();
            write_sample(&mut backend);
        }

        let mut data = std::fs::read(&path).unwrap();
        data[10] ^= 0xFF;
        std::fs::write(&path, data).unwrap();

        let result = FileBackend::open(&path);
        assert!(matches!(result, Err(StorageError::Corrupted(_))));
    }

    #[test]
    fn file_recycled_ids_survive_reopen() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test.sgj");

        {
            let mut backend = FileBackend::open(&path).unwrap();
            backend.begin_transaction().unwrap();
            let a = backend.put_side_table(SideTable::Bits, None, &[1]).unwrap();
            backend.put_side_table(SideTable::Bits, None, &[2]).unwrap();
            backend.delete_side_table(SideTable::Bits, a).unwrap();
            backend.commit().unwrap();
        }

        let mut backend = FileBackend::open(&path).unwrap();
        backend.begin_transaction().unwrap();
        let id = backend.put_side_table(SideTable::Bits, None, &[3]).unwrap();
        assert_eq!(id, 1);
    }

    #[test]
    fn file_create_with_dirs() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("path").join("test.sgj");

        let backend =
            FileBackend::open_with_config(&path, FileConfig::default().create_dirs(true)).unwrap();
        assert_eq!(backend.journal_len(), 0);
        assert!(path.exists());
    }

    #[test]
    fn file_path() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test.sgj");

        let backend = FileBackend::open(&path).unwrap();
        assert_eq!(backend.path(), path);
    }
}
