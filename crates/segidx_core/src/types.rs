//! Core type definitions for segidx.

use crate::error::CoreError;
use std::fmt;

/// A primary record number.
///
/// Record numbers address records in a primary file. Whether a freed number
/// may be assigned again depends on the file's
/// [`ReusePolicy`](crate::ReusePolicy).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct RecordNumber(pub u64);

impl RecordNumber {
    /// Creates a new record number.
    #[must_use]
    pub const fn new(n: u64) -> Self {
        Self(n)
    }

    /// Returns the raw value.
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }

    /// Returns the next record number, if there is one.
    #[must_use]
    pub const fn checked_next(self) -> Option<Self> {
        match self.0.checked_add(1) {
            Some(n) => Some(Self(n)),
            None => None,
        }
    }
}

impl From<u64> for RecordNumber {
    fn from(n: u64) -> Self {
        Self(n)
    }
}

impl TryFrom<i64> for RecordNumber {
    type Error = CoreError;

    fn try_from(n: i64) -> Result<Self, Self::Error> {
        u64::try_from(n)
            .map(Self)
            .map_err(|_| CoreError::record_number_out_of_range(i128::from(n), u64::MAX))
    }
}

impl fmt::Display for RecordNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "rn:{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_number_ordering() {
        let r1 = RecordNumber::new(1);
        let r2 = RecordNumber::new(2);
        assert!(r1 < r2);
        assert_eq!(r1.checked_next(), Some(r2));
        assert_eq!(RecordNumber::new(u64::MAX).checked_next(), None);
    }

    #[test]
    fn record_number_display() {
        assert_eq!(format!("{}", RecordNumber::new(42)), "rn:42");
    }

    #[test]
    fn negative_record_number_rejected() {
        assert!(matches!(
            RecordNumber::try_from(-5i64),
            Err(CoreError::RecordNumberOutOfRange { value: -5, .. })
        ));
        assert_eq!(RecordNumber::try_from(7i64).unwrap(), RecordNumber::new(7));
    }
}
