//! Segment representations and the codec that folds changes into them.
//!
//! ## Class Rules
//!
//! - No records: `Empty`, stored as the absence of a row
//! - One record: `Single`
//! - Fewer than `conversion_limit` records: sorted `List`
//! - `conversion_limit` or more: `Bitmap`
//!
//! Promotion happens as soon as a count reaches the limit. By default a
//! `Bitmap` is never demoted by [`SegmentCodec::remove_offset`]; only
//! [`SegmentCodec::normalize`] (compaction) turns a sparse bitmap back into a
//! list. With `lower_conversion_limit` set, a remove that leaves that many
//! records or fewer demotes it at once.

use crate::bitarray::{Bitarray, SetBits};
use crate::config::SegmentConfig;
use crate::error::{CoreError, CoreResult};
use segidx_storage::SideTable;
use std::fmt;

/// The in-memory form of one segment of one index key.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Representation {
    /// No records.
    #[default]
    Empty,
    /// Exactly one record.
    Single(u16),
    /// Strictly increasing offsets.
    List(Vec<u16>),
    /// One bit per offset.
    Bitmap(Bitarray),
}

/// The encoding class of a [`Representation`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum SegmentClass {
    /// No records.
    Empty,
    /// One direct offset.
    Single,
    /// Offset list in the list side table.
    List,
    /// Bitmap in the bits side table.
    Bitmap,
}

impl fmt::Display for SegmentClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Empty => "empty",
            Self::Single => "single",
            Self::List => "list",
            Self::Bitmap => "bitmap",
        };
        f.write_str(name)
    }
}

impl Representation {
    /// Returns the encoding class.
    #[must_use]
    pub fn class(&self) -> SegmentClass {
        match self {
            Self::Empty => SegmentClass::Empty,
            Self::Single(_) => SegmentClass::Single,
            Self::List(_) => SegmentClass::List,
            Self::Bitmap(_) => SegmentClass::Bitmap,
        }
    }

    /// Number of records held.
    #[must_use]
    pub fn count(&self) -> usize {
        match self {
            Self::Empty => 0,
            Self::Single(_) => 1,
            Self::List(offsets) => offsets.len(),
            Self::Bitmap(bits) => bits.count(),
        }
    }

    /// Returns true if no record is held.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        match self {
            Self::Empty => true,
            Self::Single(_) => false,
            Self::List(offsets) => offsets.is_empty(),
            Self::Bitmap(bits) => bits.none(),
        }
    }

    /// Returns true if `offset` is held.
    #[must_use]
    pub fn contains(&self, offset: u16) -> bool {
        match self {
            Self::Empty => false,
            Self::Single(only) => *only == offset,
            Self::List(offsets) => offsets.binary_search(&offset).is_ok(),
            Self::Bitmap(bits) => bits.get(usize::from(offset)).unwrap_or(false),
        }
    }

    /// Iterates the held offsets in ascending order.
    #[must_use]
    pub fn offsets(&self) -> Offsets<'_> {
        match self {
            Self::Empty => Offsets::Single(None),
            Self::Single(only) => Offsets::Single(Some(*only)),
            Self::List(offsets) => Offsets::List(offsets.iter()),
            Self::Bitmap(bits) => Offsets::Bitmap(bits.iter_set_bits()),
        }
    }

    /// Lowest held offset.
    #[must_use]
    pub fn first(&self) -> Option<u16> {
        self.offsets().next()
    }

    /// Highest held offset.
    #[must_use]
    pub fn last(&self) -> Option<u16> {
        match self {
            Self::Empty => None,
            Self::Single(only) => Some(*only),
            Self::List(offsets) => offsets.last().copied(),
            Self::Bitmap(bits) => bits.last_set().and_then(|i| u16::try_from(i).ok()),
        }
    }
}

/// Ascending offsets of a [`Representation`].
#[derive(Debug, Clone)]
pub enum Offsets<'a> {
    /// Zero or one offset.
    Single(Option<u16>),
    /// Offsets of a list.
    List(std::slice::Iter<'a, u16>),
    /// Set bits of a bitmap.
    Bitmap(SetBits<'a>),
}

impl Iterator for Offsets<'_> {
    type Item = u16;

    fn next(&mut self) -> Option<u16> {
        match self {
            Self::Single(only) => only.take(),
            Self::List(iter) => iter.next().copied(),
            // set bits of a segment bitmap are below the segment size
            Self::Bitmap(iter) => iter.next().and_then(|i| u16::try_from(i).ok()),
        }
    }
}

/// The persisted payload of a non-empty segment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SegmentPayload {
    /// The offset itself, stored in the index row.
    Single(u16),
    /// Big-endian 2-byte offsets, stored in the list side table.
    List(Vec<u8>),
    /// Bitmap bytes, stored in the bits side table.
    Bits(Vec<u8>),
}

impl SegmentPayload {
    /// The side table this payload lives in, if any.
    #[must_use]
    pub const fn side_table(&self) -> Option<SideTable> {
        match self {
            Self::Single(_) => None,
            Self::List(_) => Some(SideTable::List),
            Self::Bits(_) => Some(SideTable::Bits),
        }
    }
}

/// A segment ready to be written: its record count and payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedSegment {
    /// Number of records in the segment.
    pub record_count: u32,
    /// The persisted payload.
    pub payload: SegmentPayload,
}

/// Encodes, decodes and updates segment representations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SegmentCodec {
    config: SegmentConfig,
}

impl SegmentCodec {
    /// Creates a codec for the given segment geometry.
    #[must_use]
    pub const fn new(config: SegmentConfig) -> Self {
        Self { config }
    }

    /// Returns the segment geometry.
    #[must_use]
    pub const fn config(&self) -> &SegmentConfig {
        &self.config
    }

    fn segment_len(&self) -> usize {
        self.config.segment_size as usize
    }

    fn limit(&self) -> usize {
        self.config.conversion_limit as usize
    }

    fn at_lower_limit(&self, bits: &Bitarray) -> bool {
        self.config
            .lower_conversion_limit
            .is_some_and(|lower| bits.count() <= lower as usize)
    }

    fn check_offset(&self, offset: u16) -> CoreResult<()> {
        if usize::from(offset) >= self.segment_len() {
            return Err(CoreError::out_of_range(usize::from(offset), self.segment_len()));
        }
        Ok(())
    }

    fn bitmap_of(&self, offsets: impl IntoIterator<Item = u16>) -> CoreResult<Bitarray> {
        let mut bits = Bitarray::new(self.segment_len());
        for offset in offsets {
            bits.set(usize::from(offset), true)?;
        }
        Ok(bits)
    }

    // `offsets` must be strictly increasing and in range.
    fn from_sorted(&self, offsets: Vec<u16>) -> CoreResult<Representation> {
        Ok(match offsets.len() {
            0 => Representation::Empty,
            1 => Representation::Single(offsets[0]),
            n if n >= self.limit() => Representation::Bitmap(self.bitmap_of(offsets)?),
            _ => Representation::List(offsets),
        })
    }

    /// Adds `offset`, returning the new representation and whether its
    /// class changed.
    ///
    /// Adding an offset that is already present is a no-op.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::OutOfRange`] if `offset` is not below the segment size.
    pub fn add_offset(
        &self,
        rep: Representation,
        offset: u16,
    ) -> CoreResult<(Representation, bool)> {
        self.check_offset(offset)?;
        let result = match rep {
            Representation::Empty => (Representation::Single(offset), true),
            Representation::Single(only) if only == offset => (rep, false),
            Representation::Single(only) => {
                let pair = if only < offset {
                    vec![only, offset]
                } else {
                    vec![offset, only]
                };
                (self.from_sorted(pair)?, true)
            }
            Representation::List(mut offsets) => match offsets.binary_search(&offset) {
                Ok(_) => (Representation::List(offsets), false),
                Err(pos) => {
                    offsets.insert(pos, offset);
                    if offsets.len() >= self.limit() {
                        (Representation::Bitmap(self.bitmap_of(offsets)?), true)
                    } else {
                        (Representation::List(offsets), false)
                    }
                }
            },
            Representation::Bitmap(mut bits) => {
                bits.set(usize::from(offset), true)?;
                (Representation::Bitmap(bits), false)
            }
        };
        Ok(result)
    }

    /// Removes `offset`, returning the new representation and whether its
    /// class changed.
    ///
    /// Removing an absent offset is a no-op. A bitmap stays a bitmap until
    /// its last record goes, unless a lower conversion limit is configured
    /// and the population falls to it.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::OutOfRange`] if `offset` is not below the segment size.
    pub fn remove_offset(
        &self,
        rep: Representation,
        offset: u16,
    ) -> CoreResult<(Representation, bool)> {
        self.check_offset(offset)?;
        let result = match rep {
            Representation::Empty => (rep, false),
            Representation::Single(only) if only == offset => (Representation::Empty, true),
            Representation::Single(_) => (rep, false),
            Representation::List(mut offsets) => match offsets.binary_search(&offset) {
                Err(_) => (Representation::List(offsets), false),
                Ok(pos) => {
                    offsets.remove(pos);
                    match offsets.len() {
                        0 => (Representation::Empty, true),
                        1 => (Representation::Single(offsets[0]), true),
                        _ => (Representation::List(offsets), false),
                    }
                }
            },
            Representation::Bitmap(mut bits) => {
                let was_set = bits.get(usize::from(offset))?;
                bits.set(usize::from(offset), false)?;
                if bits.none() {
                    (Representation::Empty, true)
                } else if was_set && self.at_lower_limit(&bits) {
                    let offsets = Representation::Bitmap(bits).offsets().collect();
                    (self.from_sorted(offsets)?, true)
                } else {
                    (Representation::Bitmap(bits), false)
                }
            }
        };
        Ok(result)
    }

    /// Builds the canonical representation of a set of offsets.
    ///
    /// Order and duplicates in `offsets` do not matter.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::OutOfRange`] for an offset not below the segment size.
    pub fn from_offsets(&self, offsets: impl IntoIterator<Item = u16>) -> CoreResult<Representation> {
        let mut sorted: Vec<u16> = offsets.into_iter().collect();
        for &offset in &sorted {
            self.check_offset(offset)?;
        }
        sorted.sort_unstable();
        sorted.dedup();
        self.from_sorted(sorted)
    }

    /// Unions `incoming` into `stored`.
    ///
    /// A stored bitmap stays a bitmap; otherwise the union is promoted if it
    /// reaches the conversion limit.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::OutOfRange`] if either side holds an offset not
    /// below the segment size.
    pub fn merge(
        &self,
        stored: Representation,
        incoming: Representation,
    ) -> CoreResult<Representation> {
        match (stored, incoming) {
            (Representation::Empty, incoming) => Ok(incoming),
            (stored, Representation::Empty) => Ok(stored),
            (Representation::Bitmap(mut bits), other) | (other, Representation::Bitmap(mut bits)) => {
                for offset in other.offsets() {
                    bits.set(usize::from(offset), true)?;
                }
                Ok(Representation::Bitmap(bits))
            }
            (stored, incoming) => self.from_offsets(stored.offsets().chain(incoming.offsets())),
        }
    }

    /// Re-encodes `rep` in its canonical class for its current count.
    ///
    /// Without a lower conversion limit this is the only operation that
    /// demotes a sparse bitmap. With one, a bitmap above that limit is left
    /// alone.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::OutOfRange`] if `rep` holds an offset not below
    /// the segment size.
    pub fn normalize(&self, rep: Representation) -> CoreResult<Representation> {
        let canonical = match &rep {
            Representation::Empty | Representation::Single(_) => true,
            Representation::List(offsets) => offsets.len() >= 2 && offsets.len() < self.limit(),
            Representation::Bitmap(bits) => match self.config.lower_conversion_limit {
                Some(lower) => bits.count() > lower as usize,
                None => bits.count() >= self.limit(),
            },
        };
        if canonical {
            Ok(rep)
        } else {
            self.from_offsets(rep.offsets())
        }
    }

    /// Encodes `rep` for storage. `Empty` has no stored form.
    ///
    /// A one-element list is stored as `Single`.
    #[must_use]
    pub fn encode(&self, rep: &Representation) -> Option<EncodedSegment> {
        let count = u32::try_from(rep.count()).ok()?;
        let payload = match rep {
            Representation::Empty => return None,
            Representation::Single(only) => SegmentPayload::Single(*only),
            Representation::List(offsets) if offsets.is_empty() => return None,
            Representation::List(offsets) if offsets.len() == 1 => {
                SegmentPayload::Single(offsets[0])
            }
            Representation::List(offsets) => {
                SegmentPayload::List(offsets.iter().flat_map(|o| o.to_be_bytes()).collect())
            }
            Representation::Bitmap(bits) if bits.none() => return None,
            Representation::Bitmap(bits) => SegmentPayload::Bits(bits.to_bytes()),
        };
        Some(EncodedSegment {
            record_count: count,
            payload,
        })
    }

    /// Decodes a stored segment.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::CorruptSegment`] if the payload shape does not
    /// match `record_count`, a list is not strictly increasing, or an offset
    /// is not below the segment size.
    pub fn decode(&self, record_count: u32, payload: &SegmentPayload) -> CoreResult<Representation> {
        match payload {
            SegmentPayload::Single(offset) => {
                if record_count != 1 {
                    return Err(CoreError::corrupt_segment(format!(
                        "direct offset row with record count {record_count}"
                    )));
                }
                if usize::from(*offset) >= self.segment_len() {
                    return Err(CoreError::corrupt_segment(format!(
                        "offset {offset} not below segment size {}",
                        self.segment_len()
                    )));
                }
                Ok(Representation::Single(*offset))
            }
            SegmentPayload::List(bytes) => {
                if bytes.len() % 2 != 0 {
                    return Err(CoreError::corrupt_segment(format!(
                        "list payload of odd length {}",
                        bytes.len()
                    )));
                }
                let offsets: Vec<u16> = bytes
                    .chunks_exact(2)
                    .map(|pair| u16::from_be_bytes([pair[0], pair[1]]))
                    .collect();
                if offsets.len() != record_count as usize || offsets.len() < 2 {
                    return Err(CoreError::corrupt_segment(format!(
                        "list of {} offsets with record count {record_count}",
                        offsets.len()
                    )));
                }
                if offsets.windows(2).any(|w| w[0] >= w[1]) {
                    return Err(CoreError::corrupt_segment("list offsets not strictly increasing"));
                }
                if offsets
                    .last()
                    .is_some_and(|&last| usize::from(last) >= self.segment_len())
                {
                    return Err(CoreError::corrupt_segment(format!(
                        "list offset not below segment size {}",
                        self.segment_len()
                    )));
                }
                Ok(Representation::List(offsets))
            }
            SegmentPayload::Bits(bytes) => {
                let bits = Bitarray::from_bytes(self.segment_len(), bytes)?;
                let count = bits.count();
                if count != record_count as usize || count == 0 {
                    return Err(CoreError::corrupt_segment(format!(
                        "bitmap with {count} bits set and record count {record_count}"
                    )));
                }
                Ok(Representation::Bitmap(bits))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn codec() -> SegmentCodec {
        SegmentCodec::new(SegmentConfig::standard().conversion_limit(4096))
    }

    fn small_codec() -> SegmentCodec {
        SegmentCodec::new(SegmentConfig::new(64).conversion_limit(4))
    }

    fn add_all(codec: &SegmentCodec, offsets: &[u16]) -> Representation {
        offsets.iter().fold(Representation::Empty, |rep, &o| {
            codec.add_offset(rep, o).unwrap().0
        })
    }

    #[test]
    fn scenario_list_insert_and_remove() {
        let codec = codec();
        let rep = add_all(&codec, &[0, 1, 2]);
        assert_eq!(rep, Representation::List(vec![0, 1, 2]));
        assert_eq!(rep.count(), 3);

        let (rep, changed) = codec.remove_offset(rep, 1).unwrap();
        assert!(!changed);
        assert_eq!(rep, Representation::List(vec![0, 2]));
        assert_eq!(rep.count(), 2);
    }

    #[test]
    fn scenario_bitmap_at_limit() {
        let codec = codec();
        let offsets: Vec<u16> = (0..4096).collect();
        let rep = add_all(&codec, &offsets);
        assert_eq!(rep.class(), SegmentClass::Bitmap);
        assert_eq!(rep.count(), 4096);
        let Representation::Bitmap(bits) = &rep else {
            panic!("expected bitmap");
        };
        let set: u32 = bits.to_bytes().iter().map(|b| b.count_ones()).sum();
        assert_eq!(set, 4096);
    }

    #[test]
    fn one_below_limit_stays_list() {
        let codec = codec();
        let offsets: Vec<u16> = (0..4095).collect();
        let rep = add_all(&codec, &offsets);
        assert_eq!(rep.class(), SegmentClass::List);
        assert_eq!(rep.count(), 4095);
    }

    #[test]
    fn class_transitions_report_change() {
        let codec = small_codec();
        let (rep, changed) = codec.add_offset(Representation::Empty, 5).unwrap();
        assert!(changed);
        assert_eq!(rep, Representation::Single(5));

        let (rep, changed) = codec.add_offset(rep, 3).unwrap();
        assert!(changed);
        assert_eq!(rep, Representation::List(vec![3, 5]));

        let (rep, changed) = codec.add_offset(rep, 9).unwrap();
        assert!(!changed);
        let (rep, changed) = codec.add_offset(rep, 1).unwrap();
        assert!(changed);
        assert_eq!(rep.class(), SegmentClass::Bitmap);

        // no demotion on delete
        let (rep, changed) = codec.remove_offset(rep, 1).unwrap();
        assert!(!changed);
        let (rep, _) = codec.remove_offset(rep, 3).unwrap();
        let (rep, changed) = codec.remove_offset(rep, 5).unwrap();
        assert!(!changed);
        assert_eq!(rep.class(), SegmentClass::Bitmap);
        assert_eq!(rep.count(), 1);

        let (rep, changed) = codec.remove_offset(rep, 9).unwrap();
        assert!(changed);
        assert_eq!(rep, Representation::Empty);
    }

    #[test]
    fn list_of_two_drops_to_single() {
        let codec = small_codec();
        let rep = add_all(&codec, &[2, 7]);
        let (rep, changed) = codec.remove_offset(rep, 2).unwrap();
        assert!(changed);
        assert_eq!(rep, Representation::Single(7));
    }

    #[test]
    fn limit_of_two_skips_list() {
        let codec = SegmentCodec::new(SegmentConfig::new(64).conversion_limit(2));
        let rep = add_all(&codec, &[2, 7]);
        assert_eq!(rep.class(), SegmentClass::Bitmap);
    }

    #[test]
    fn add_then_remove_nets_to_absent() {
        let codec = small_codec();
        let base = add_all(&codec, &[1, 2]);
        let (rep, _) = codec.add_offset(base.clone(), 9).unwrap();
        let (rep, _) = codec.remove_offset(rep, 9).unwrap();
        assert!(!rep.contains(9));
        assert_eq!(rep, base);

        let (rep, _) = codec.remove_offset(base, 9).unwrap();
        let (rep, _) = codec.add_offset(rep, 9).unwrap();
        assert!(rep.contains(9));
    }

    #[test]
    fn out_of_range_offset_is_an_error() {
        let codec = small_codec();
        assert!(matches!(
            codec.add_offset(Representation::Empty, 64),
            Err(CoreError::OutOfRange { index: 64, len: 64 })
        ));
        assert!(matches!(
            codec.remove_offset(Representation::Empty, 100),
            Err(CoreError::OutOfRange { .. })
        ));
        assert!(codec.from_offsets([1, 64]).is_err());
    }

    #[test]
    fn list_payload_is_big_endian_pairs() {
        let codec = codec();
        let encoded = codec
            .encode(&Representation::List(vec![1, 0x0203]))
            .unwrap();
        assert_eq!(encoded.record_count, 2);
        assert_eq!(encoded.payload, SegmentPayload::List(vec![0, 1, 2, 3]));
        assert_eq!(encoded.payload.side_table(), Some(SideTable::List));
    }

    #[test]
    fn one_element_list_encodes_as_single() {
        let encoded = codec().encode(&Representation::List(vec![42])).unwrap();
        assert_eq!(encoded.payload, SegmentPayload::Single(42));
        assert!(codec().encode(&Representation::Empty).is_none());
    }

    #[test]
    fn decode_rejects_mismatched_shapes() {
        let codec = small_codec();
        assert!(codec.decode(2, &SegmentPayload::Single(3)).is_err());
        assert!(codec.decode(1, &SegmentPayload::Single(64)).is_err());
        assert!(codec.decode(3, &SegmentPayload::List(vec![0, 1, 0, 2])).is_err());
        assert!(codec.decode(2, &SegmentPayload::List(vec![0, 2, 0, 1])).is_err());
        assert!(codec.decode(2, &SegmentPayload::List(vec![0, 1, 0])).is_err());
        assert!(codec.decode(1, &SegmentPayload::List(vec![0, 1])).is_err());
        assert!(codec.decode(2, &SegmentPayload::List(vec![0, 1, 0, 64])).is_err());
        assert!(codec.decode(1, &SegmentPayload::Bits(vec![0x80; 8])).is_err());
        assert!(codec.decode(1, &SegmentPayload::Bits(vec![0x80; 7])).is_err());
        assert!(codec.decode(0, &SegmentPayload::Bits(vec![0; 8])).is_err());

        let err = codec.decode(2, &SegmentPayload::Single(3)).unwrap_err();
        assert!(matches!(err, CoreError::CorruptSegment { .. }));
    }

    #[test]
    fn merge_keeps_stored_bitmap() {
        let codec = small_codec();
        let (stored, _) = codec
            .remove_offset(add_all(&codec, &[1, 2, 3, 4]), 1)
            .unwrap();
        let stored = codec.remove_offset(stored, 2).unwrap().0;
        assert_eq!(stored.class(), SegmentClass::Bitmap);

        let merged = codec.merge(stored, Representation::Single(10)).unwrap();
        assert_eq!(merged.class(), SegmentClass::Bitmap);
        assert_eq!(merged.offsets().collect::<Vec<_>>(), vec![3, 4, 10]);
    }

    #[test]
    fn merge_promotes_at_limit() {
        let codec = small_codec();
        let merged = codec
            .merge(Representation::List(vec![1, 2]), Representation::List(vec![2, 3]))
            .unwrap();
        assert_eq!(merged, Representation::List(vec![1, 2, 3]));

        let merged = codec.merge(merged, Representation::Single(8)).unwrap();
        assert_eq!(merged.class(), SegmentClass::Bitmap);
        assert_eq!(merged.count(), 4);

        let merged = codec.merge(Representation::Empty, Representation::Single(8)).unwrap();
        assert_eq!(merged, Representation::Single(8));
    }

    #[test]
    fn normalize_demotes_sparse_bitmap() {
        let codec = small_codec();
        let bits = add_all(&codec, &[1, 2, 3, 4]);
        let (sparse, _) = codec.remove_offset(bits.clone(), 4).unwrap();
        assert_eq!(
            codec.normalize(sparse).unwrap(),
            Representation::List(vec![1, 2, 3])
        );
        assert_eq!(codec.normalize(bits.clone()).unwrap(), bits);
        assert_eq!(
            codec.normalize(Representation::List(vec![6])).unwrap(),
            Representation::Single(6)
        );
    }

    #[test]
    fn lower_limit_demotes_on_remove() {
        let codec = SegmentCodec::new(
            SegmentConfig::new(64)
                .conversion_limit(4)
                .lower_conversion_limit(2),
        );
        let bits = add_all(&codec, &[1, 2, 3, 4]);
        assert_eq!(bits.class(), SegmentClass::Bitmap);

        let (three, changed) = codec.remove_offset(bits, 4).unwrap();
        assert_eq!(three.class(), SegmentClass::Bitmap);
        assert!(!changed);

        // absent offsets leave the class alone
        let (three, changed) = codec.remove_offset(three, 40).unwrap();
        assert_eq!(three.class(), SegmentClass::Bitmap);
        assert!(!changed);

        let (two, changed) = codec.remove_offset(three, 1).unwrap();
        assert_eq!(two, Representation::List(vec![2, 3]));
        assert!(changed);

        let (list, _) = codec.add_offset(two.clone(), 7).unwrap();
        assert_eq!(list, Representation::List(vec![2, 3, 7]));
        let (regrown, changed) = codec.add_offset(list, 9).unwrap();
        assert_eq!(regrown.class(), SegmentClass::Bitmap);
        assert!(changed);

        // between the limits a bitmap is already canonical
        let (sparse, _) = codec.remove_offset(regrown, 9).unwrap();
        assert_eq!(sparse.class(), SegmentClass::Bitmap);
        assert_eq!(codec.normalize(sparse.clone()).unwrap(), sparse);
        assert_eq!(codec.normalize(two.clone()).unwrap(), two);
    }

    fn ops_strategy() -> impl Strategy<Value = Vec<(bool, u16)>> {
        proptest::collection::vec((any::<bool>(), 0u16..64), 0..80)
    }

    fn fold(codec: &SegmentCodec, ops: &[(bool, u16)]) -> Representation {
        ops.iter().fold(Representation::Empty, |rep, &(add, o)| {
            if add {
                codec.add_offset(rep, o).unwrap().0
            } else {
                codec.remove_offset(rep, o).unwrap().0
            }
        })
    }

    proptest! {
        #[test]
        fn encode_decode_round_trip(ops in ops_strategy()) {
            let codec = small_codec();
            let rep = fold(&codec, &ops);
            match codec.encode(&rep) {
                None => prop_assert!(rep.is_empty()),
                Some(encoded) => {
                    prop_assert_eq!(encoded.record_count as usize, rep.count());
                    let decoded = codec.decode(encoded.record_count, &encoded.payload).unwrap();
                    prop_assert_eq!(&decoded, &rep);
                    prop_assert_eq!(codec.encode(&decoded), Some(encoded));
                }
            }
        }

        #[test]
        fn add_is_idempotent(ops in ops_strategy(), o in 0u16..64) {
            let codec = small_codec();
            let once = codec.add_offset(fold(&codec, &ops), o).unwrap().0;
            let (twice, changed) = codec.add_offset(once.clone(), o).unwrap();
            prop_assert!(!changed);
            prop_assert_eq!(twice, once);
        }

        #[test]
        fn remove_is_idempotent(ops in ops_strategy(), o in 0u16..64) {
            let codec = small_codec();
            let once = codec.remove_offset(fold(&codec, &ops), o).unwrap().0;
            let (twice, changed) = codec.remove_offset(once.clone(), o).unwrap();
            prop_assert!(!changed);
            prop_assert_eq!(twice, once);
        }

        #[test]
        fn disjoint_adds_commute(ops in ops_strategy(), a in 0u16..64, b in 0u16..64) {
            let codec = small_codec();
            let base = fold(&codec, &ops);
            let ab = codec.add_offset(codec.add_offset(base.clone(), a).unwrap().0, b).unwrap().0;
            let ba = codec.add_offset(codec.add_offset(base, b).unwrap().0, a).unwrap().0;
            prop_assert_eq!(ab, ba);
        }

        #[test]
        fn count_matches_contents(ops in ops_strategy()) {
            let codec = small_codec();
            let rep = fold(&codec, &ops);
            prop_assert_eq!(rep.count(), rep.offsets().count());
            let offsets: Vec<u16> = rep.offsets().collect();
            prop_assert!(offsets.windows(2).all(|w| w[0] < w[1]));
        }

        #[test]
        fn add_only_class_follows_count(offsets in proptest::collection::vec(0u16..64, 0..30)) {
            let codec = small_codec();
            let rep = add_all(&codec, &offsets);
            let expected = match rep.count() {
                0 => SegmentClass::Empty,
                1 => SegmentClass::Single,
                n if n < 4 => SegmentClass::List,
                _ => SegmentClass::Bitmap,
            };
            prop_assert_eq!(rep.class(), expected);
            prop_assert_eq!(&rep, &codec.from_offsets(offsets).unwrap());
        }
    }
}
