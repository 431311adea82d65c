//! Segment encoding for secondary indexes.
//!
//! The record numbers filed under one index key are split into fixed-size
//! segments. Each segment is stored as one index row, keyed by
//! `(index, key, segment)`, whose payload is a direct offset, a sorted offset
//! list, or a bitmap, chosen by population.
//!
//! ## Side Tables
//!
//! List and bitmap payloads live in side tables and the index row carries
//! their row id. See [`SegmentRow`] for the row format.

mod codec;
mod row;
mod store;

pub use codec::{
    EncodedSegment, Offsets, Representation, SegmentClass, SegmentCodec, SegmentPayload,
};
pub use row::SegmentRow;
pub use store::{SegmentStore, StoredSegment};
