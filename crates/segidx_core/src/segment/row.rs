//! Persisted index rows.
//!
//! ## Row Format
//!
//! All integers are big-endian. The row length identifies the class:
//!
//! ```text
//! Single:  | segment (4) | offset (2) |                      6 bytes
//! List:    | segment (4) | count (2) | list row id (4) |     10 bytes
//! Bitmap:  | segment (4) | count (3) | bits row id (4) |     11 bytes
//! ```

use crate::error::{CoreError, CoreResult};
use segidx_storage::SideTable;

/// One stored `(index, key, segment)` row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SegmentRow {
    /// One record, stored inline.
    Single {
        /// Segment number.
        segment: u32,
        /// The record's offset.
        offset: u16,
    },
    /// Offsets held in the list side table.
    List {
        /// Segment number.
        segment: u32,
        /// Number of offsets.
        count: u16,
        /// Row id in the list side table.
        row_id: u32,
    },
    /// Bitmap held in the bits side table.
    Bitmap {
        /// Segment number.
        segment: u32,
        /// Number of set bits; fits in 24 bits.
        count: u32,
        /// Row id in the bits side table.
        row_id: u32,
    },
}

impl SegmentRow {
    /// Length of a `Single` row.
    pub const SINGLE_LEN: usize = 6;
    /// Length of a `List` row.
    pub const LIST_LEN: usize = 10;
    /// Length of a `Bitmap` row.
    pub const BITMAP_LEN: usize = 11;
    /// Largest record count a `Bitmap` row can hold.
    pub const MAX_BITMAP_COUNT: u32 = 0x00FF_FFFF;

    /// The segment number carried in the row.
    #[must_use]
    pub const fn segment(&self) -> u32 {
        match self {
            Self::Single { segment, .. }
            | Self::List { segment, .. }
            | Self::Bitmap { segment, .. } => *segment,
        }
    }

    /// The record count carried in the row.
    #[must_use]
    pub const fn record_count(&self) -> u32 {
        match self {
            Self::Single { .. } => 1,
            Self::List { count, .. } => *count as u32,
            Self::Bitmap { count, .. } => *count,
        }
    }

    /// The side-table row this row refers to, if any.
    #[must_use]
    pub const fn side_row(&self) -> Option<(SideTable, u32)> {
        match self {
            Self::Single { .. } => None,
            Self::List { row_id, .. } => Some((SideTable::List, *row_id)),
            Self::Bitmap { row_id, .. } => Some((SideTable::Bits, *row_id)),
        }
    }

    /// Serializes the row.
    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(Self::BITMAP_LEN);
        buf.extend_from_slice(&self.segment().to_be_bytes());
        match self {
            Self::Single { offset, .. } => {
                buf.extend_from_slice(&offset.to_be_bytes());
            }
            Self::List { count, row_id, .. } => {
                buf.extend_from_slice(&count.to_be_bytes());
                buf.extend_from_slice(&row_id.to_be_bytes());
            }
            Self::Bitmap { count, row_id, .. } => {
                buf.extend_from_slice(&count.to_be_bytes()[1..]);
                buf.extend_from_slice(&row_id.to_be_bytes());
            }
        }
        buf
    }

    /// Parses a row.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::CorruptSegment`] for a row of any other length.
    pub fn decode(bytes: &[u8]) -> CoreResult<Self> {
        let be32 = |b: &[u8]| u32::from_be_bytes([b[0], b[1], b[2], b[3]]);
        match bytes.len() {
            Self::SINGLE_LEN => Ok(Self::Single {
                segment: be32(&bytes[0..4]),
                offset: u16::from_be_bytes([bytes[4], bytes[5]]),
            }),
            Self::LIST_LEN => Ok(Self::List {
                segment: be32(&bytes[0..4]),
                count: u16::from_be_bytes([bytes[4], bytes[5]]),
                row_id: be32(&bytes[6..10]),
            }),
            Self::BITMAP_LEN => Ok(Self::Bitmap {
                segment: be32(&bytes[0..4]),
                count: u32::from_be_bytes([0, bytes[4], bytes[5], bytes[6]]),
                row_id: be32(&bytes[7..11]),
            }),
            len => Err(CoreError::corrupt_segment(format!(
                "index row of {len} bytes"
            ))),
        }
    }
}
