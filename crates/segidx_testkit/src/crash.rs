//! Crash recovery testing for journaled record files.
//!
//! A crash while a commit frame is being appended leaves a journal that
//! ends part-way through that frame. These helpers cut a journal at chosen
//! byte offsets and check that reopening it yields exactly the state of
//! the last complete commit.
//!
//! ## Test Strategy
//!
//! 1. **Cut inside the last frame** - the last commit is lost as a whole
//! 2. **Cut at a frame boundary** - every earlier commit survives
//! 3. **Uncommitted changes** - never reach the journal at all
//!
//! ## Usage
//!
//! ```rust,ignore
//! use segidx_testkit::crash::CrashRecoveryHarness;
//!
//! let mut harness = CrashRecoveryHarness::new(small_config());
//! harness.commit_step(|file| { /* changes */ });
//! harness.commit_step(|file| { /* more changes */ });
//! let results = harness.check_every_cut();
//! ```

use crate::fixtures::TEST_FILE;
use crate::integration::{logical_index, LogicalIndex};
use segidx_core::{RecordFile, RecordNumber, SegmentConfig};
use segidx_storage::{FileBackend, FileConfig};
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

/// Observable state of a file after a commit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommittedState {
    /// Journal length once the commit returned.
    pub journal_len: u64,
    /// Live record numbers.
    pub live: Vec<u64>,
    /// Committed index contents.
    pub index: LogicalIndex,
}

/// Result of reopening one cut journal.
#[derive(Debug, Clone)]
pub struct CrashRecoveryResult {
    /// Whether the recovered state matched.
    pub passed: bool,
    /// Byte offset the journal was cut at.
    pub cut: u64,
    /// Index of the commit the recovered state should equal, if any.
    pub expected_step: Option<usize>,
    /// Any error message.
    pub error: Option<String>,
}

/// Records a sequence of commits against a journaled file, then replays
/// truncated copies of the journal.
pub struct CrashRecoveryHarness {
    temp_dir: TempDir,
    path: PathBuf,
    config: SegmentConfig,
    file: RecordFile<FileBackend>,
    steps: Vec<CommittedState>,
}

fn open_file(path: &Path, config: SegmentConfig) -> Result<RecordFile<FileBackend>, String> {
    let backend = FileBackend::open_with_config(path, FileConfig::default().sync_on_commit(false))
        .map_err(|e| e.to_string())?;
    RecordFile::open(backend, TEST_FILE, config).map_err(|e| e.to_string())
}

fn observe(file: &RecordFile<FileBackend>) -> Result<(Vec<u64>, LogicalIndex), String> {
    let live = file
        .live_records()
        .map_err(|e| e.to_string())?
        .iter()
        .map(RecordNumber::as_u64)
        .collect();
    Ok((live, logical_index(file)))
}

impl CrashRecoveryHarness {
    /// Creates a harness over an empty journal in a temporary directory.
    pub fn new(config: SegmentConfig) -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let path = temp_dir.path().join("index.sgj");
        let file = open_file(&path, config).expect("Failed to open record file");
        Self {
            temp_dir,
            path,
            config,
            file,
            steps: Vec::new(),
        }
    }

    /// Runs `f` against the file, commits, and records the committed state.
    pub fn commit_step<F>(&mut self, f: F)
    where
        F: FnOnce(&mut RecordFile<FileBackend>),
    {
        f(&mut self.file);
        self.file.commit().expect("Failed to commit");
        let (live, index) = observe(&self.file).expect("Failed to observe file");
        self.steps.push(CommittedState {
            journal_len: self.file.backend().journal_len(),
            live,
            index,
        });
    }

    /// Returns the recorded commits.
    pub fn steps(&self) -> &[CommittedState] {
        &self.steps
    }

    /// Returns the open file, for changes that are never committed.
    pub fn file_mut(&mut self) -> &mut RecordFile<FileBackend> {
        &mut self.file
    }

    /// The commit a journal cut at `cut` bytes should recover to.
    fn expected_step(&self, cut: u64) -> Option<usize> {
        self.steps.iter().rposition(|s| s.journal_len <= cut)
    }

    /// Copies the journal truncated to `cut` bytes and reopens the copy.
    pub fn check_cut(&self, cut: u64) -> CrashRecoveryResult {
        let expected_step = self.expected_step(cut);
        let fail = |error: String| CrashRecoveryResult {
            passed: false,
            cut,
            expected_step,
            error: Some(error),
        };

        let copy = self.temp_dir.path().join(format!("cut-{cut}.sgj"));
        let bytes = match fs::read(&self.path) {
            Ok(bytes) => bytes,
            Err(e) => return fail(e.to_string()),
        };
        let end = usize::try_from(cut).map_or(bytes.len(), |c| c.min(bytes.len()));
        if let Err(e) = fs::write(&copy, &bytes[..end]) {
            return fail(e.to_string());
        }

        let recovered = match open_file(&copy, self.config).and_then(|f| observe(&f)) {
            Ok(state) => state,
            Err(e) => return fail(e),
        };
        let _ = fs::remove_file(&copy);

        let (live, index) = match expected_step {
            Some(step) => (self.steps[step].live.clone(), self.steps[step].index.clone()),
            None => (Vec::new(), LogicalIndex::new()),
        };
        if recovered != (live, index) {
            return fail(format!("recovered state differs from commit {expected_step:?}"));
        }
        CrashRecoveryResult {
            passed: true,
            cut,
            expected_step,
            error: None,
        }
    }

    /// Checks a cut at every byte offset of the journal.
    pub fn check_every_cut(&self) -> Vec<CrashRecoveryResult> {
        let len = self.steps.last().map_or(0, |s| s.journal_len);
        (0..=len).map(|cut| self.check_cut(cut)).collect()
    }
}
