//! Existence bitmaps of a primary file.
//!
//! One bitmap per segment records which record numbers hold a live primary
//! record. Segments are paged in from storage before they are changed, and
//! every change stays in memory until [`ExistenceBitmap::flush`].
//!
//! ## Invariants
//!
//! - A segment's stored bitmap is created with its first record and never
//!   deleted
//! - The append high-water mark only grows, even across deletions
//! - [`ExistenceBitmap::discard`] restores the state of the last flush

use crate::bitarray::Bitarray;
use crate::config::{ReusePolicy, SegmentConfig};
use crate::error::{CoreError, CoreResult};
use crate::recordset::RecordSet;
use crate::segment::Representation;
use crate::types::RecordNumber;
use segidx_storage::StorageBackend;
use std::collections::{BTreeMap, BTreeSet};
use tracing::trace;

/// Tracks live record numbers of one primary file.
#[derive(Debug, Clone)]
pub struct ExistenceBitmap {
    file: String,
    config: SegmentConfig,
    policy: ReusePolicy,
    segments: BTreeMap<u32, Bitarray>,
    /// Pre-change copies of segments changed since the last flush.
    originals: BTreeMap<u32, Bitarray>,
    /// Paged-in segments with no stored bitmap yet.
    unstored: BTreeSet<u32>,
    high_water: Option<u64>,
    stored_high_water: Option<u64>,
    /// Lowest record number that is not live.
    free_hint: u64,
}

impl ExistenceBitmap {
    /// Creates an empty tracker with nothing paged in.
    #[must_use]
    pub fn new(file: impl Into<String>, config: SegmentConfig, policy: ReusePolicy) -> Self {
        Self {
            file: file.into(),
            config,
            policy,
            segments: BTreeMap::new(),
            originals: BTreeMap::new(),
            unstored: BTreeSet::new(),
            high_water: None,
            stored_high_water: None,
            free_hint: 0,
        }
    }

    /// Pages in every stored segment of `file` and its high-water mark.
    ///
    /// # Errors
    ///
    /// Returns an error if storage cannot be read or a stored bitmap has the
    /// wrong size.
    pub fn open<B: StorageBackend + ?Sized>(
        backend: &B,
        file: impl Into<String>,
        config: SegmentConfig,
        policy: ReusePolicy,
    ) -> CoreResult<Self> {
        let mut existence = Self::new(file, config, policy);
        for segment in backend.existence_segments(&existence.file)? {
            existence.load_segment(backend, segment)?;
        }

        let stored = match backend.get_control(&Self::high_water_key(&existence.file))? {
            Some(bytes) => {
                let raw: [u8; 8] = bytes.as_slice().try_into().map_err(|_| {
                    CoreError::corrupt_segment(format!(
                        "high-water mark of {} bytes",
                        bytes.len()
                    ))
                })?;
                Some(u64::from_be_bytes(raw))
            }
            None => None,
        };
        let highest = existence.highest_used().map(RecordNumber::as_u64);
        existence.high_water = stored.max(highest);
        existence.stored_high_water = stored;
        Ok(existence)
    }

    /// Control-value name of a file's high-water mark.
    #[must_use]
    pub fn high_water_key(file: &str) -> String {
        format!("{file}.high_water")
    }

    /// The primary file name.
    #[must_use]
    pub fn file(&self) -> &str {
        &self.file
    }

    /// The reuse policy chosen at construction.
    #[must_use]
    pub fn policy(&self) -> ReusePolicy {
        self.policy
    }

    /// Returns true if `segment` is paged in.
    #[must_use]
    pub fn is_loaded(&self, segment: u32) -> bool {
        self.segments.contains_key(&segment)
    }

    /// Pages in `segment`, creating an empty one if storage has none.
    ///
    /// # Errors
    ///
    /// Returns an error if storage cannot be read or the stored bitmap has
    /// the wrong size.
    pub fn load_segment<B: StorageBackend + ?Sized>(
        &mut self,
        backend: &B,
        segment: u32,
    ) -> CoreResult<()> {
        if self.is_loaded(segment) {
            return Ok(());
        }
        let size = self.config.segment_size as usize;
        let bits = match backend.get_existence(&self.file, segment)? {
            Some(bytes) => Bitarray::from_bytes(size, &bytes)?,
            None => {
                self.unstored.insert(segment);
                Bitarray::new(size)
            }
        };
        self.segments.insert(segment, bits);
        if self.segment_of(self.free_hint) == Some(segment) {
            self.free_hint = self.lowest_free_from(self.free_hint);
        }
        Ok(())
    }

    fn segment_of(&self, n: u64) -> Option<u32> {
        u32::try_from(n / u64::from(self.config.segment_size)).ok()
    }

    /// Lowest record number at or after `start` that is not live. Segments
    /// not paged in count as free.
    fn lowest_free_from(&self, start: u64) -> u64 {
        let size = u64::from(self.config.segment_size);
        let mut n = start;
        loop {
            let Some(bits) = self.segment_of(n).and_then(|s| self.segments.get(&s)) else {
                return n;
            };
            let offset = (n % size) as usize;
            match bits.first_clear_from(offset) {
                Some(clear) => return n - offset as u64 + clear as u64,
                None => n += size - offset as u64,
            }
        }
    }

    fn segment_mut(&mut self, segment: u32) -> CoreResult<&mut Bitarray> {
        let bits = self
            .segments
            .get_mut(&segment)
            .ok_or(CoreError::SegmentNotLoaded { segment })?;
        self.originals
            .entry(segment)
            .or_insert_with(|| bits.clone());
        Ok(bits)
    }

    /// Marks `rn` live; returns whether it already was.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::SegmentNotLoaded`] if its segment is not paged in.
    pub fn mark_used(&mut self, rn: RecordNumber) -> CoreResult<bool> {
        let (segment, offset) = self.config.locate(rn)?;
        let was = self.segment_mut(segment)?.set(usize::from(offset), true)?;
        self.high_water = self.high_water.max(Some(rn.as_u64()));
        if rn.as_u64() == self.free_hint {
            self.free_hint = self.lowest_free_from(self.free_hint.saturating_add(1));
        }
        trace!(file = %self.file, record = %rn, "marked used");
        Ok(was)
    }

    /// Marks `rn` free; returns whether it was live.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::SegmentNotLoaded`] if its segment is not paged in.
    pub fn mark_free(&mut self, rn: RecordNumber) -> CoreResult<bool> {
        let (segment, offset) = self.config.locate(rn)?;
        let was = self.segment_mut(segment)?.set(usize::from(offset), false)?;
        self.free_hint = self.free_hint.min(rn.as_u64());
        trace!(file = %self.file, record = %rn, "marked free");
        Ok(was)
    }

    /// Returns true if `rn` is live. Segments not paged in hold no records.
    #[must_use]
    pub fn is_used(&self, rn: RecordNumber) -> bool {
        let Ok((segment, offset)) = self.config.locate(rn) else {
            return false;
        };
        self.segments
            .get(&segment)
            .is_some_and(|bits| bits.get(usize::from(offset)).unwrap_or(false))
    }

    /// Highest live record number.
    #[must_use]
    pub fn highest_used(&self) -> Option<RecordNumber> {
        self.segments.iter().rev().find_map(|(&segment, bits)| {
            let offset = u16::try_from(bits.last_set()?).ok()?;
            Some(self.config.record_at(segment, offset))
        })
    }

    /// Highest paged-in segment.
    #[must_use]
    pub fn highest_segment(&self) -> Option<u32> {
        self.segments.keys().next_back().copied()
    }

    /// Lowest free record number at or after segment `segment_hint` that lies
    /// below the highest live record.
    ///
    /// Returns `None` if there is no such gap; the caller then appends after
    /// the highest live record.
    #[must_use]
    pub fn first_free_slot(&self, segment_hint: u32) -> Option<RecordNumber> {
        let highest = self.highest_used()?.as_u64();
        let start = (u64::from(segment_hint) * u64::from(self.config.segment_size))
            .max(self.free_hint);
        let free = self.lowest_free_from(start);
        (free < highest).then_some(RecordNumber::new(free))
    }

    /// One past the highest record number ever used, ignoring any gaps.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::RecordNumberOutOfRange`] once the file is full.
    pub fn next_append_slot(&self) -> CoreResult<RecordNumber> {
        let next = match self.high_water {
            None => RecordNumber::new(0),
            Some(high) => RecordNumber::new(high)
                .checked_next()
                .ok_or_else(|| CoreError::record_number_out_of_range(i128::from(high) + 1, self.config.max_record_number))?,
        };
        self.config.locate(next)?;
        Ok(next)
    }

    /// Picks the record number for a new record under this file's policy.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::RecordNumberOutOfRange`] once the file is full.
    pub fn allocate(&self) -> CoreResult<RecordNumber> {
        match self.policy {
            ReusePolicy::Reuse => {
                // every number below the hint is live, so it is either a
                // gap or the slot after the highest record
                let next = RecordNumber::new(self.free_hint);
                self.config.locate(next)?;
                Ok(next)
            }
            ReusePolicy::NoReuse => self.next_append_slot(),
        }
    }

    /// All live records.
    ///
    /// # Errors
    ///
    /// Returns an error only if a paged-in bitmap has the wrong size.
    pub fn live_records(&self) -> CoreResult<RecordSet> {
        let mut set = RecordSet::new(self.config);
        for (&segment, bits) in &self.segments {
            if !bits.none() {
                set.union_segment(segment, Representation::Bitmap(bits.clone()))?;
            }
        }
        Ok(set)
    }

    /// Paged-in segments with their bitmaps.
    pub fn segments(&self) -> impl Iterator<Item = (u32, &Bitarray)> + '_ {
        self.segments.iter().map(|(&segment, bits)| (segment, bits))
    }

    /// Returns true if anything changed since the last flush.
    #[must_use]
    pub fn has_changes(&self) -> bool {
        !self.originals.is_empty() || self.high_water != self.stored_high_water
    }

    /// Writes every changed segment and the high-water mark.
    ///
    /// Returns the number of segments written.
    ///
    /// # Errors
    ///
    /// Returns a storage error if a write fails.
    pub fn flush<B: StorageBackend + ?Sized>(&mut self, backend: &mut B) -> CoreResult<usize> {
        let mut written = 0;
        for &segment in self.originals.keys() {
            if let Some(bits) = self.segments.get(&segment) {
                backend.put_existence(&self.file, segment, bits.as_bytes())?;
                written += 1;
            }
        }
        if self.high_water != self.stored_high_water {
            if let Some(high) = self.high_water {
                backend.put_control(&Self::high_water_key(&self.file), &high.to_be_bytes())?;
            }
        }
        Ok(written)
    }

    /// Accepts the flushed state as the new restore point.
    ///
    /// Call once the transaction that [`ExistenceBitmap::flush`] wrote into
    /// has committed.
    pub fn mark_flushed(&mut self) {
        for segment in std::mem::take(&mut self.originals).into_keys() {
            self.unstored.remove(&segment);
        }
        self.stored_high_water = self.high_water;
    }

    /// Restores the state of the last flush without touching storage.
    pub fn discard(&mut self) {
        for (segment, bits) in std::mem::take(&mut self.originals) {
            self.segments.insert(segment, bits);
        }
        for segment in std::mem::take(&mut self.unstored) {
            self.segments.remove(&segment);
        }
        self.high_water = self.stored_high_water;
        self.free_hint = self.lowest_free_from(0);
    }
}
