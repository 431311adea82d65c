//! Segment and bulk-load configuration.
//!
//! A [`SegmentConfig`] is an immutable value threaded into every component,
//! so stores with different segment sizes can coexist in one process.

use crate::error::{CoreError, CoreResult};
use crate::types::RecordNumber;

/// Records per segment for the B-tree and SQL engines.
pub const STANDARD_SEGMENT_SIZE: u32 = 32_768;

/// Records per segment for the mainframe-style (DPT) engine.
pub const DPT_SEGMENT_SIZE: u32 = 65_280;

/// Largest segment size whose offsets still fit in 16 bits.
pub const MAX_SEGMENT_SIZE: u32 = 65_536;

/// Whether freed record numbers may be handed out again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ReusePolicy {
    /// New records fill the lowest free slot first.
    #[default]
    Reuse,
    /// New records always go after the highest number ever used.
    NoReuse,
}

/// Segment geometry and record-number limits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SegmentConfig {
    /// Record numbers per segment.
    pub segment_size: u32,

    /// Population at which a segment switches from list to bitmap encoding.
    pub conversion_limit: u32,

    /// Population at or below which a bitmap losing a record is demoted to a
    /// list. `None` leaves sparse bitmaps in place until compaction.
    pub lower_conversion_limit: Option<u32>,

    /// Record-number reuse policy of the primary file.
    pub reuse_policy: ReusePolicy,

    /// Largest record number accepted.
    pub max_record_number: u64,
}

impl Default for SegmentConfig {
    fn default() -> Self {
        Self::standard()
    }
}

impl SegmentConfig {
    /// Creates a configuration for `segment_size` records per segment.
    ///
    /// The conversion limit is the population at which a list costs as many
    /// bytes as a bitmap.
    #[must_use]
    pub const fn new(segment_size: u32) -> Self {
        Self {
            segment_size,
            conversion_limit: segment_size / 16,
            lower_conversion_limit: None,
            reuse_policy: ReusePolicy::Reuse,
            max_record_number: Self::addressable_records(segment_size),
        }
    }

    /// The B-tree/SQL engine layout: 32768 records per segment.
    #[must_use]
    pub const fn standard() -> Self {
        Self::new(STANDARD_SEGMENT_SIZE)
    }

    /// The DPT engine layout: 65280 records per segment, never reusing numbers.
    #[must_use]
    pub const fn dpt() -> Self {
        Self::new(DPT_SEGMENT_SIZE).reuse_policy(ReusePolicy::NoReuse)
    }

    /// Sets the list-to-bitmap conversion limit.
    #[must_use]
    pub const fn conversion_limit(mut self, limit: u32) -> Self {
        self.conversion_limit = limit;
        self
    }

    /// Demotes a bitmap to a list once a delete leaves it with `limit`
    /// records or fewer.
    #[must_use]
    pub const fn lower_conversion_limit(mut self, limit: u32) -> Self {
        self.lower_conversion_limit = Some(limit);
        self
    }

    /// Sets the record-number reuse policy.
    #[must_use]
    pub const fn reuse_policy(mut self, policy: ReusePolicy) -> Self {
        self.reuse_policy = policy;
        self
    }

    /// Sets the largest accepted record number.
    #[must_use]
    pub const fn max_record_number(mut self, max: u64) -> Self {
        self.max_record_number = max;
        self
    }

    // Segment numbers are stored in 4 bytes.
    const fn addressable_records(segment_size: u32) -> u64 {
        (segment_size as u64 * (u32::MAX as u64 + 1)).saturating_sub(1)
    }

    /// Checks that the values are mutually consistent.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidConfig`] describing the first problem found.
    pub fn validate(&self) -> CoreResult<()> {
        if self.segment_size == 0 || self.segment_size % 8 != 0 {
            return Err(CoreError::invalid_config(format!(
                "segment size {} is not a positive multiple of 8",
                self.segment_size
            )));
        }
        if self.segment_size > MAX_SEGMENT_SIZE {
            return Err(CoreError::invalid_config(format!(
                "segment size {} exceeds {MAX_SEGMENT_SIZE}",
                self.segment_size
            )));
        }
        if self.conversion_limit < 2 || self.conversion_limit > self.segment_size {
            return Err(CoreError::invalid_config(format!(
                "conversion limit {} must be between 2 and the segment size {}",
                self.conversion_limit, self.segment_size
            )));
        }
        if let Some(lower) = self.lower_conversion_limit {
            if lower >= self.conversion_limit {
                return Err(CoreError::invalid_config(format!(
                    "lower conversion limit {lower} must be below the conversion limit {}",
                    self.conversion_limit
                )));
            }
        }
        let addressable = Self::addressable_records(self.segment_size);
        if self.max_record_number > addressable {
            return Err(CoreError::invalid_config(format!(
                "max record number {} exceeds the {addressable} addressable by 32-bit segments",
                self.max_record_number
            )));
        }
        Ok(())
    }

    /// Bytes in one stored segment bitmap.
    #[must_use]
    pub const fn bitmap_byte_size(&self) -> usize {
        (self.segment_size / 8) as usize
    }

    /// Bytes in the largest stored list (two per entry).
    #[must_use]
    pub const fn list_byte_size(&self) -> usize {
        2 * (self.conversion_limit as usize - 1)
    }

    /// Segment holding record number `n`.
    #[must_use]
    pub const fn segment_of(&self, n: u64) -> u64 {
        n / self.segment_size as u64
    }

    /// Position of record number `n` within its segment.
    #[must_use]
    pub const fn offset_of(&self, n: u64) -> u16 {
        (n % self.segment_size as u64) as u16
    }

    /// Record number at `offset` of `segment`.
    #[must_use]
    pub const fn record_number_of(&self, segment: u64, offset: u16) -> u64 {
        segment * self.segment_size as u64 + offset as u64
    }

    /// Validates a record number and splits it into segment and offset.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::RecordNumberOutOfRange`] above `max_record_number`.
    pub fn locate(&self, rn: RecordNumber) -> CoreResult<(u32, u16)> {
        let n = rn.as_u64();
        if n > self.max_record_number {
            return Err(CoreError::record_number_out_of_range(
                i128::from(n),
                self.max_record_number,
            ));
        }
        let segment = u32::try_from(self.segment_of(n))
            .map_err(|_| CoreError::record_number_out_of_range(i128::from(n), self.max_record_number))?;
        Ok((segment, self.offset_of(n)))
    }

    /// Record number at `offset` of `segment`, as a [`RecordNumber`].
    #[must_use]
    pub const fn record_at(&self, segment: u32, offset: u16) -> RecordNumber {
        RecordNumber::new(self.record_number_of(segment as u64, offset))
    }
}

/// Options for one bulk load.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BulkLoadConfig {
    /// Reuse policy the accumulators run under.
    pub reuse_policy: ReusePolicy,

    /// Offsets after which a segment is flushed early, ascending.
    pub update_points: Vec<u16>,
}

impl BulkLoadConfig {
    /// Flushes at the end of every segment only.
    #[must_use]
    pub fn new(config: &SegmentConfig) -> Self {
        Self {
            reuse_policy: config.reuse_policy,
            update_points: vec![config.offset_of(u64::from(config.segment_size) - 1)],
        }
    }

    /// Flushes every `interval` records within a segment as well as at its end.
    ///
    /// An interval of zero is treated as one full segment.
    #[must_use]
    pub fn with_update_interval(config: &SegmentConfig, interval: u32) -> Self {
        let size = config.segment_size;
        let step = if interval == 0 { size } else { interval.min(size) };
        let mut points: Vec<u16> = (step - 1..size)
            .step_by(step as usize)
            .map(|point| config.offset_of(u64::from(point)))
            .collect();
        let last = config.offset_of(u64::from(size) - 1);
        if points.last() != Some(&last) {
            points.push(last);
        }
        Self {
            reuse_policy: config.reuse_policy,
            update_points: points,
        }
    }

    /// Sets the reuse policy.
    #[must_use]
    pub fn reuse_policy(mut self, policy: ReusePolicy) -> Self {
        self.reuse_policy = policy;
        self
    }

    /// Returns true if reaching `offset` should flush the segment.
    #[must_use]
    pub fn is_update_point(&self, offset: u16) -> bool {
        self.update_points.binary_search(&offset).is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn standard_config() {
        let config = SegmentConfig::standard();
        assert_eq!(config.segment_size, 32_768);
        assert_eq!(config.bitmap_byte_size(), 4096);
        assert_eq!(config.conversion_limit, 2048);
        assert_eq!(config.list_byte_size(), 4094);
        assert_eq!(config.reuse_policy, ReusePolicy::Reuse);
        config.validate().unwrap();
    }

    #[test]
    fn dpt_config() {
        let config = SegmentConfig::dpt();
        assert_eq!(config.segment_size, 65_280);
        assert_eq!(config.bitmap_byte_size(), 8160);
        assert_eq!(config.conversion_limit, 4080);
        assert_eq!(config.reuse_policy, ReusePolicy::NoReuse);
        config.validate().unwrap();
    }

    #[test]
    fn builder_pattern() {
        let config = SegmentConfig::standard()
            .conversion_limit(4096)
            .reuse_policy(ReusePolicy::NoReuse)
            .max_record_number(1_000_000);

        assert_eq!(config.conversion_limit, 4096);
        assert_eq!(config.reuse_policy, ReusePolicy::NoReuse);
        assert_eq!(config.max_record_number, 1_000_000);
        config.validate().unwrap();
    }

    #[test]
    fn validate_rejects_bad_values() {
        assert!(SegmentConfig::new(0).validate().is_err());
        assert!(SegmentConfig::new(100).validate().is_err());
        assert!(SegmentConfig::new(MAX_SEGMENT_SIZE + 8).validate().is_err());
        assert!(SegmentConfig::new(64).conversion_limit(1).validate().is_err());
        assert!(SegmentConfig::new(64).conversion_limit(65).validate().is_err());
        assert!(SegmentConfig::new(64)
            .max_record_number(u64::MAX)
            .validate()
            .is_err());
        assert!(SegmentConfig::new(64).validate().is_ok());
    }

    #[test]
    fn lower_conversion_limit_below_upper() {
        let config = SegmentConfig::new(64).conversion_limit(4);
        assert_eq!(config.lower_conversion_limit, None);
        assert!(config.lower_conversion_limit(2).validate().is_ok());
        assert_eq!(config.lower_conversion_limit(2).lower_conversion_limit, Some(2));
        assert!(config.lower_conversion_limit(4).validate().is_err());
    }

    #[test]
    fn locate_splits_record_number() {
        let config = SegmentConfig::standard();
        assert_eq!(config.locate(RecordNumber::new(0)).unwrap(), (0, 0));
        assert_eq!(config.locate(RecordNumber::new(32_767)).unwrap(), (0, 32_767));
        assert_eq!(config.locate(RecordNumber::new(32_768)).unwrap(), (1, 0));
        assert_eq!(config.locate(RecordNumber::new(100_000)).unwrap(), (3, 1696));
    }

    #[test]
    fn locate_rejects_above_max() {
        let config = SegmentConfig::standard().max_record_number(10);
        let result = config.locate(RecordNumber::new(11));
        assert!(matches!(
            result,
            Err(CoreError::RecordNumberOutOfRange { value: 11, max: 10 })
        ));
    }

    #[test]
    fn locate_accepts_last_addressable() {
        let config = SegmentConfig::new(8);
        let last = config.max_record_number;
        assert_eq!(config.locate(RecordNumber::new(last)).unwrap(), (u32::MAX, 7));
    }

    #[test]
    fn default_update_point_is_segment_end() {
        let config = SegmentConfig::standard();
        let bulk = BulkLoadConfig::new(&config);
        assert_eq!(bulk.update_points, vec![32_767]);
        assert!(bulk.is_update_point(32_767));
        assert!(!bulk.is_update_point(0));
    }

    #[test]
    fn update_interval_points() {
        let config = SegmentConfig::new(64);
        let bulk = BulkLoadConfig::with_update_interval(&config, 24);
        assert_eq!(bulk.update_points, vec![23, 47, 63]);

        let whole = BulkLoadConfig::with_update_interval(&config, 0);
        assert_eq!(whole.update_points, vec![63]);

        let exact = BulkLoadConfig::with_update_interval(&config, 32);
        assert_eq!(exact.update_points, vec![31, 63]);
    }

    proptest! {
        #[test]
        fn segment_arithmetic_is_inverse(n in 0u64..10 * u64::from(STANDARD_SEGMENT_SIZE)) {
            let config = SegmentConfig::standard();
            let segment = config.segment_of(n);
            let offset = config.offset_of(n);
            prop_assert!(u32::from(offset) < config.segment_size);
            prop_assert_eq!(config.record_number_of(segment, offset), n);
        }

        #[test]
        fn dpt_segment_arithmetic_is_inverse(n in 0u64..10 * u64::from(DPT_SEGMENT_SIZE)) {
            let config = SegmentConfig::dpt();
            prop_assert_eq!(config.record_number_of(config.segment_of(n), config.offset_of(n)), n);
        }
    }
}
