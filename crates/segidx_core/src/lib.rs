//! # segidx Core
//!
//! Segment-based secondary index engine.
//!
//! The records of a primary file are numbered, and the numbers are split
//! into fixed-size segments. For every index key each segment is stored in
//! the smallest of three encodings: a single offset, a sorted offset list,
//! or a bitmap.
//!
//! This crate provides:
//! - [`SegmentConfig`]: segment geometry and record-number arithmetic
//! - [`SegmentCodec`]: the encoding rules, and [`SegmentRow`] for the stored layout
//! - [`ExistenceBitmap`]: which record numbers are live
//! - [`SecondaryIndexUpdater`] and [`DeferredUpdateAccumulator`]: the
//!   incremental and bulk-load update paths
//! - [`RecordSet`]: query results
//! - [`RecordFile`]: the facade a primary-record layer drives
//!
//! All I/O goes through [`segidx_storage::StorageBackend`].

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod bitarray;
mod config;
mod error;
mod existence;
mod file;
mod index;
mod recordset;
mod segment;
mod types;

pub use bitarray::{Bitarray, SetBits};
pub use config::{
    BulkLoadConfig, ReusePolicy, SegmentConfig, DPT_SEGMENT_SIZE, MAX_SEGMENT_SIZE,
    STANDARD_SEGMENT_SIZE,
};
pub use error::{CoreError, CoreResult};
pub use existence::ExistenceBitmap;
pub use file::{
    BulkLoadSummary, CompactionSummary, IndexStats, IndexValues, RecordFile, VerifyProblem,
    VerifyReport,
};
pub use index::{
    AccumulatorState, DeferredUpdateAccumulator, IndexOp, SecondaryIndexUpdater, UpdateSummary,
};
pub use recordset::RecordSet;
pub use segment::{
    EncodedSegment, Offsets, Representation, SegmentClass, SegmentCodec, SegmentPayload,
    SegmentRow, SegmentStore, StoredSegment,
};
pub use types::RecordNumber;

/// Crate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
