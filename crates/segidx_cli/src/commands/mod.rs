//! CLI command implementations.

pub mod compact;
pub mod inspect;
pub mod load;
pub mod verify;

use segidx_core::{RecordFile, SegmentConfig, DPT_SEGMENT_SIZE};
use segidx_storage::FileBackend;
use std::path::Path;
use tracing::debug;

/// Geometry for a file with `segment_size` records per segment.
pub fn config_for(segment_size: u32) -> SegmentConfig {
    if segment_size == DPT_SEGMENT_SIZE {
        SegmentConfig::dpt()
    } else {
        SegmentConfig::new(segment_size)
    }
}

/// The configuration `file` was committed with, if it has been.
///
/// A file without a stored reuse policy gets the default for its segment size.
pub fn stored_config(
    backend: &FileBackend,
    file: &str,
) -> Result<Option<SegmentConfig>, Box<dyn std::error::Error>> {
    let Some(segment_size) = RecordFile::stored_segment_size(backend, file)? else {
        return Ok(None);
    };
    let mut config = config_for(segment_size);
    if let Some(policy) = RecordFile::stored_reuse_policy(backend, file)? {
        config = config.reuse_policy(policy);
    }
    debug!(file, segment_size, policy = ?config.reuse_policy, "stored configuration");
    Ok(Some(config))
}

/// Opens a primary file that already has committed data.
pub fn open_existing(
    path: &Path,
    file: &str,
) -> Result<RecordFile<FileBackend>, Box<dyn std::error::Error>> {
    if !path.exists() {
        return Err(format!("No journal found at {:?}", path).into());
    }
    let backend = FileBackend::open(path)?;
    let config = stored_config(&backend, file)?
        .ok_or_else(|| format!("No primary file {:?} in {:?}", file, path))?;
    Ok(RecordFile::open(backend, file, config)?)
}
