//! Sets of record numbers, held segment by segment.

use crate::config::SegmentConfig;
use crate::error::{CoreError, CoreResult};
use crate::segment::{Representation, SegmentCodec};
use crate::types::RecordNumber;
use std::collections::{BTreeMap, BTreeSet};

/// An in-memory set of record numbers.
///
/// Each segment is held in the same representation used for storage, so a
/// set read from an index keeps the shape it was stored in.
///
/// # Example
///
/// ```rust
/// use segidx_core::{RecordNumber, RecordSet, SegmentConfig};
///
/// let config = SegmentConfig::standard();
/// let a = RecordSet::from_records(config, [1, 2, 40_000].map(RecordNumber::new)).unwrap();
/// let b = RecordSet::from_records(config, [2, 40_000, 50_000].map(RecordNumber::new)).unwrap();
///
/// let both = a.intersection(&b).unwrap();
/// assert_eq!(both.count(), 2);
/// assert_eq!(both.first(), Some(RecordNumber::new(2)));
/// ```
#[derive(Debug, Clone)]
pub struct RecordSet {
    codec: SegmentCodec,
    segments: BTreeMap<u32, Representation>,
}

impl RecordSet {
    /// Creates an empty set.
    #[must_use]
    pub fn new(config: SegmentConfig) -> Self {
        Self {
            codec: SegmentCodec::new(config),
            segments: BTreeMap::new(),
        }
    }

    /// Creates a set holding `records`.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::RecordNumberOutOfRange`] for a record number the
    /// configuration cannot address.
    pub fn from_records(
        config: SegmentConfig,
        records: impl IntoIterator<Item = RecordNumber>,
    ) -> CoreResult<Self> {
        let mut set = Self::new(config);
        for rn in records {
            set.insert(rn)?;
        }
        Ok(set)
    }

    /// Returns the segment geometry.
    #[must_use]
    pub fn config(&self) -> &SegmentConfig {
        self.codec.config()
    }

    /// Adds every record of `rep` in `segment`.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::OutOfRange`] if `rep` holds an offset not below the
    /// segment size.
    pub fn union_segment(&mut self, segment: u32, rep: Representation) -> CoreResult<()> {
        if rep.is_empty() {
            return Ok(());
        }
        let stored = self.segments.remove(&segment).unwrap_or_default();
        let merged = self.codec.merge(stored, rep)?;
        self.segments.insert(segment, merged);
        Ok(())
    }

    /// Adds `rn`; returns true if it was not already present.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::RecordNumberOutOfRange`] if `rn` cannot be addressed.
    pub fn insert(&mut self, rn: RecordNumber) -> CoreResult<bool> {
        let (segment, offset) = self.config().locate(rn)?;
        let rep = self.segments.remove(&segment).unwrap_or_default();
        let added = !rep.contains(offset);
        let (rep, _) = self.codec.add_offset(rep, offset)?;
        self.segments.insert(segment, rep);
        Ok(added)
    }

    /// Removes `rn`; returns true if it was present.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::RecordNumberOutOfRange`] if `rn` cannot be addressed.
    pub fn remove(&mut self, rn: RecordNumber) -> CoreResult<bool> {
        let (segment, offset) = self.config().locate(rn)?;
        let Some(rep) = self.segments.remove(&segment) else {
            return Ok(false);
        };
        let removed = rep.contains(offset);
        let (rep, _) = self.codec.remove_offset(rep, offset)?;
        if !rep.is_empty() {
            self.segments.insert(segment, rep);
        }
        Ok(removed)
    }

    /// Returns true if `rn` is in the set.
    #[must_use]
    pub fn contains(&self, rn: RecordNumber) -> bool {
        let Ok((segment, offset)) = self.config().locate(rn) else {
            return false;
        };
        self.segments
            .get(&segment)
            .is_some_and(|rep| rep.contains(offset))
    }

    /// Number of records in the set.
    #[must_use]
    pub fn count(&self) -> u64 {
        self.segments.values().map(|rep| rep.count() as u64).sum()
    }

    /// Returns true if the set holds no records.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.segments.values().all(Representation::is_empty)
    }

    /// Iterates the records in ascending order.
    pub fn iter(&self) -> impl Iterator<Item = RecordNumber> + '_ {
        let config = *self.config();
        self.segments.iter().flat_map(move |(&segment, rep)| {
            rep.offsets()
                .map(move |offset| config.record_at(segment, offset))
        })
    }

    /// Lowest record.
    #[must_use]
    pub fn first(&self) -> Option<RecordNumber> {
        let (&segment, rep) = self.segments.iter().find(|(_, rep)| !rep.is_empty())?;
        rep.first().map(|offset| self.config().record_at(segment, offset))
    }

    /// Highest record.
    #[must_use]
    pub fn last(&self) -> Option<RecordNumber> {
        let (&segment, rep) = self.segments.iter().rev().find(|(_, rep)| !rep.is_empty())?;
        rep.last().map(|offset| self.config().record_at(segment, offset))
    }

    /// Iterates the non-empty segments in ascending order.
    pub fn segments(&self) -> impl Iterator<Item = (u32, &Representation)> + '_ {
        self.segments
            .iter()
            .filter(|(_, rep)| !rep.is_empty())
            .map(|(&segment, rep)| (segment, rep))
    }

    /// Zero-based position of `rn` in ascending order, if present.
    #[must_use]
    pub fn position_of(&self, rn: RecordNumber) -> Option<u64> {
        let (segment, offset) = self.config().locate(rn).ok()?;
        let rep = self.segments.get(&segment)?;
        if !rep.contains(offset) {
            return None;
        }
        let before: u64 = self
            .segments
            .range(..segment)
            .map(|(_, rep)| rep.count() as u64)
            .sum();
        Some(before + rep.offsets().take_while(|&o| o < offset).count() as u64)
    }

    /// The record at zero-based `position` in ascending order.
    #[must_use]
    pub fn record_at_position(&self, position: u64) -> Option<RecordNumber> {
        let mut remaining = position;
        for (&segment, rep) in &self.segments {
            let count = rep.count() as u64;
            if remaining < count {
                let offset = rep.offsets().nth(usize::try_from(remaining).ok()?)?;
                return Some(self.config().record_at(segment, offset));
            }
            remaining -= count;
        }
        None
    }

    /// Lowest record above `rn`.
    #[must_use]
    pub fn next_after(&self, rn: RecordNumber) -> Option<RecordNumber> {
        let (segment, offset) = self.config().locate(rn).ok()?;
        let config = *self.config();
        if let Some(found) = self
            .segments
            .get(&segment)
            .and_then(|rep| rep.offsets().find(|&o| o > offset))
        {
            return Some(config.record_at(segment, found));
        }
        let next = segment.checked_add(1)?;
        self.segments
            .range(next..)
            .find_map(|(&s, rep)| rep.first().map(|o| config.record_at(s, o)))
    }

    /// Highest record below `rn`.
    #[must_use]
    pub fn prev_before(&self, rn: RecordNumber) -> Option<RecordNumber> {
        let Ok((segment, offset)) = self.config().locate(rn) else {
            // every addressable record lies below `rn`
            return self.last();
        };
        let config = *self.config();
        if let Some(found) = self
            .segments
            .get(&segment)
            .and_then(|rep| rep.offsets().take_while(|&o| o < offset).last())
        {
            return Some(config.record_at(segment, found));
        }
        self.segments
            .range(..segment)
            .rev()
            .find_map(|(&s, rep)| rep.last().map(|o| config.record_at(s, o)))
    }

    /// `rn` if present, otherwise the lowest record above it.
    #[must_use]
    pub fn nearest(&self, rn: RecordNumber) -> Option<RecordNumber> {
        if self.contains(rn) {
            Some(rn)
        } else {
            self.next_after(rn)
        }
    }

    /// The representation of one segment.
    #[must_use]
    pub fn segment(&self, segment: u32) -> Option<&Representation> {
        self.segments.get(&segment)
    }

    fn check_compatible(&self, other: &Self) -> CoreResult<()> {
        if self.config().segment_size != other.config().segment_size {
            return Err(CoreError::invalid_operation(format!(
                "cannot combine record sets with segment sizes {} and {}",
                self.config().segment_size,
                other.config().segment_size
            )));
        }
        Ok(())
    }

    /// Records in either set.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidOperation`] if the segment sizes differ.
    pub fn union(&self, other: &Self) -> CoreResult<Self> {
        self.check_compatible(other)?;
        let mut result = self.clone();
        for (&segment, rep) in &other.segments {
            result.union_segment(segment, rep.clone())?;
        }
        Ok(result)
    }

    /// Records in both sets.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidOperation`] if the segment sizes differ.
    pub fn intersection(&self, other: &Self) -> CoreResult<Self> {
        self.check_compatible(other)?;
        let mut result = Self::new(*self.config());
        for (&segment, rep) in &self.segments {
            let Some(theirs) = other.segments.get(&segment) else {
                continue;
            };
            let kept = self
                .codec
                .from_offsets(rep.offsets().filter(|&o| theirs.contains(o)))?;
            result.union_segment(segment, kept)?;
        }
        Ok(result)
    }

    /// Records in `self` but not in `other`.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidOperation`] if the segment sizes differ.
    pub fn difference(&self, other: &Self) -> CoreResult<Self> {
        self.check_compatible(other)?;
        let mut result = Self::new(*self.config());
        for (&segment, rep) in &self.segments {
            let kept = match other.segments.get(&segment) {
                Some(theirs) => self
                    .codec
                    .from_offsets(rep.offsets().filter(|&o| !theirs.contains(o)))?,
                None => rep.clone(),
            };
            result.union_segment(segment, kept)?;
        }
        Ok(result)
    }

    /// Records in exactly one of the sets.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidOperation`] if the segment sizes differ.
    pub fn symmetric_difference(&self, other: &Self) -> CoreResult<Self> {
        self.check_compatible(other)?;
        let mut result = Self::new(*self.config());
        let segments: BTreeSet<u32> = self
            .segments
            .keys()
            .chain(other.segments.keys())
            .copied()
            .collect();
        for segment in segments {
            let kept = match (self.segments.get(&segment), other.segments.get(&segment)) {
                (Some(ours), Some(theirs)) => self.codec.from_offsets(
                    ours.offsets()
                        .filter(|&o| !theirs.contains(o))
                        .chain(theirs.offsets().filter(|&o| !ours.contains(o))),
                )?,
                (Some(only), None) | (None, Some(only)) => only.clone(),
                (None, None) => continue,
            };
            result.union_segment(segment, kept)?;
        }
        Ok(result)
    }
}

impl PartialEq for RecordSet {
    fn eq(&self, other: &Self) -> bool {
        self.config().segment_size == other.config().segment_size && self.iter().eq(other.iter())
    }
}

impl Eq for RecordSet {}
