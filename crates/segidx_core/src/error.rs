//! Error types for segidx core.

use thiserror::Error;

/// Result type for core operations.
pub type CoreResult<T> = Result<T, CoreError>;

/// Errors that can occur in segidx core operations.
///
/// Every error raised while applying index changes aborts the enclosing
/// transaction; a secondary index is never committed without its primary
/// records.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Storage backend error.
    #[error("storage error: {0}")]
    Storage(#[from] segidx_storage::StorageError),

    /// A stored segment payload does not match its record count.
    #[error("corrupt segment: {message}")]
    CorruptSegment {
        /// Description of the mismatch.
        message: String,
    },

    /// A stored index row could not be decoded.
    #[error("index {index} is corrupt in segment {segment}: {message}")]
    IndexCorrupt {
        /// The index being updated or read.
        index: String,
        /// The segment whose row failed to decode.
        segment: u32,
        /// Description of the corruption.
        message: String,
    },

    /// A bit or offset index outside `[0, len)`.
    #[error("index {index} out of range for {len} bits")]
    OutOfRange {
        /// The offending index.
        index: usize,
        /// The valid length.
        len: usize,
    },

    /// A record number is negative or above the configured maximum.
    #[error("record number {value} outside 0..={max}")]
    RecordNumberOutOfRange {
        /// The rejected value.
        value: i128,
        /// The largest accepted record number.
        max: u64,
    },

    /// An existence segment was mutated before being loaded.
    #[error("existence segment {segment} is not loaded")]
    SegmentNotLoaded {
        /// The segment that was not loaded.
        segment: u32,
    },

    /// The accumulator was re-entered while a flush was in progress.
    #[error("deferred update flush did not complete; discard before reuse")]
    IncompleteFlush,

    /// The configuration values are inconsistent.
    #[error("invalid configuration: {message}")]
    InvalidConfig {
        /// Description of the problem.
        message: String,
    },

    /// Operation not permitted in current state.
    #[error("invalid operation: {message}")]
    InvalidOperation {
        /// Description of why operation is invalid.
        message: String,
    },

    /// No index with this name holds rows.
    #[error("unknown index: {name}")]
    UnknownIndex {
        /// Name of the index.
        name: String,
    },
}

impl CoreError {
    /// Creates a corrupt segment error.
    pub fn corrupt_segment(message: impl Into<String>) -> Self {
        Self::CorruptSegment {
            message: message.into(),
        }
    }

    /// Creates an index corruption error.
    pub fn index_corrupt(index: impl Into<String>, segment: u32, message: impl Into<String>) -> Self {
        Self::IndexCorrupt {
            index: index.into(),
            segment,
            message: message.into(),
        }
    }

    /// Creates an out of range error.
    pub fn out_of_range(index: usize, len: usize) -> Self {
        Self::OutOfRange { index, len }
    }

    /// Creates a record number out of range error.
    pub fn record_number_out_of_range(value: i128, max: u64) -> Self {
        Self::RecordNumberOutOfRange { value, max }
    }

    /// Creates an invalid configuration error.
    pub fn invalid_config(message: impl Into<String>) -> Self {
        Self::InvalidConfig {
            message: message.into(),
        }
    }

    /// Creates an invalid operation error.
    pub fn invalid_operation(message: impl Into<String>) -> Self {
        Self::InvalidOperation {
            message: message.into(),
        }
    }

    /// Creates an unknown index error.
    pub fn unknown_index(name: impl Into<String>) -> Self {
        Self::UnknownIndex { name: name.into() }
    }

    /// Re-labels a [`CoreError::CorruptSegment`] as corruption of `index`.
    ///
    /// Other errors pass through unchanged.
    #[must_use]
    pub fn in_index(self, index: &str, segment: u32) -> Self {
        match self {
            Self::CorruptSegment { message } => Self::index_corrupt(index, segment, message),
            other => other,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display() {
        let err = CoreError::corrupt_segment("count 3 but 2 offsets");
        assert_eq!(err.to_string(), "corrupt segment: count 3 but 2 offsets");

        let err = CoreError::out_of_range(40, 32);
        assert_eq!(err.to_string(), "index 40 out of range for 32 bits");

        let err = CoreError::record_number_out_of_range(-1, 100);
        assert_eq!(err.to_string(), "record number -1 outside 0..=100");
    }

    #[test]
    fn corrupt_segment_relabels_to_index() {
        let err = CoreError::corrupt_segment("bad list").in_index("colour", 4);
        assert!(matches!(
            err,
            CoreError::IndexCorrupt { ref index, segment: 4, .. } if index == "colour"
        ));

        let err = CoreError::IncompleteFlush.in_index("colour", 4);
        assert!(matches!(err, CoreError::IncompleteFlush));
    }

    #[test]
    fn storage_error_converts() {
        let err: CoreError = segidx_storage::StorageError::NoTransaction.into();
        assert!(matches!(err, CoreError::Storage(_)));
    }
}
