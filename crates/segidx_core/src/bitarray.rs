//! Fixed-length bit vector.
//!
//! Bit `i` lives in byte `i / 8` under mask `0x80 >> (i % 8)`, so bit 0 is
//! the high-order bit of byte 0. This is the byte layout of stored segment
//! and existence bitmaps.

use crate::error::{CoreError, CoreResult};
use std::fmt;

/// A fixed-length bit vector.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct Bitarray {
    len: usize,
    bytes: Vec<u8>,
}

impl Bitarray {
    /// Creates a bit vector of `len` clear bits.
    #[must_use]
    pub fn new(len: usize) -> Self {
        Self {
            len,
            bytes: vec![0; len.div_ceil(8)],
        }
    }

    /// Rebuilds a bit vector of `len` bits from its byte form.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::CorruptSegment`] if `bytes` has the wrong length
    /// or sets padding bits beyond `len`.
    pub fn from_bytes(len: usize, bytes: &[u8]) -> CoreResult<Self> {
        if bytes.len() != len.div_ceil(8) {
            return Err(CoreError::corrupt_segment(format!(
                "bitmap of {len} bits needs {} bytes, got {}",
                len.div_ceil(8),
                bytes.len()
            )));
        }
        let tail = len % 8;
        if tail != 0 && bytes[bytes.len() - 1] & (0xFF >> tail) != 0 {
            return Err(CoreError::corrupt_segment("bitmap sets bits past its length"));
        }
        Ok(Self {
            len,
            bytes: bytes.to_vec(),
        })
    }

    /// Returns the byte form.
    #[must_use]
    pub fn to_bytes(&self) -> Vec<u8> {
        self.bytes.clone()
    }

    /// Borrows the byte form.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Number of bits.
    #[must_use]
    pub fn len(&self) -> usize {
        self.len
    }

    /// Returns true if the vector has no bits at all.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    fn check(&self, i: usize) -> CoreResult<()> {
        if i >= self.len {
            return Err(CoreError::out_of_range(i, self.len));
        }
        Ok(())
    }

    /// Returns bit `i`.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::OutOfRange`] if `i >= len`.
    pub fn get(&self, i: usize) -> CoreResult<bool> {
        self.check(i)?;
        Ok(self.bytes[i / 8] & (0x80 >> (i % 8)) != 0)
    }

    /// Sets bit `i` to `value` and returns its previous value.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::OutOfRange`] if `i >= len`.
    pub fn set(&mut self, i: usize, value: bool) -> CoreResult<bool> {
        self.check(i)?;
        let mask = 0x80 >> (i % 8);
        let byte = &mut self.bytes[i / 8];
        let was = *byte & mask != 0;
        if value {
            *byte |= mask;
        } else {
            *byte &= !mask;
        }
        Ok(was)
    }

    /// Population count.
    #[must_use]
    pub fn count(&self) -> usize {
        self.bytes.iter().map(|b| b.count_ones() as usize).sum()
    }

    /// Returns true if no bit is set.
    #[must_use]
    pub fn none(&self) -> bool {
        self.bytes.iter().all(|&b| b == 0)
    }

    /// Iterates the indices of set bits in ascending order.
    ///
    /// Each call starts a fresh pass.
    #[must_use]
    pub fn iter_set_bits(&self) -> SetBits<'_> {
        SetBits {
            bytes: &self.bytes,
            byte: 0,
            pending: self.bytes.first().copied().unwrap_or(0),
        }
    }

    /// Lowest set bit.
    #[must_use]
    pub fn first_set(&self) -> Option<usize> {
        self.iter_set_bits().next()
    }

    /// Highest set bit.
    #[must_use]
    pub fn last_set(&self) -> Option<usize> {
        let (index, byte) = self
            .bytes
            .iter()
            .enumerate()
            .rev()
            .find(|&(_, &b)| b != 0)?;
        Some(index * 8 + 7 - byte.trailing_zeros() as usize)
    }

    /// Lowest clear bit at or after `from`.
    ///
    /// Full bytes are stepped over whole.
    #[must_use]
    pub fn first_clear_from(&self, from: usize) -> Option<usize> {
        let mut i = from;
        while i < self.len {
            let byte = self.bytes[i / 8];
            if i % 8 == 0 && byte == 0xFF {
                i += 8;
                continue;
            }
            if byte & (0x80 >> (i % 8)) == 0 {
                return Some(i);
            }
            i += 1;
        }
        None
    }

    /// Sets every bit that is set in `other`.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::OutOfRange`] if the lengths differ.
    pub fn union_with(&mut self, other: &Self) -> CoreResult<()> {
        self.zip_with(other, |a, b| a | b)
    }

    /// Clears every bit that is clear in `other`.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::OutOfRange`] if the lengths differ.
    pub fn intersect_with(&mut self, other: &Self) -> CoreResult<()> {
        self.zip_with(other, |a, b| a & b)
    }

    /// Clears every bit that is set in `other`.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::OutOfRange`] if the lengths differ.
    pub fn difference_with(&mut self, other: &Self) -> CoreResult<()> {
        self.zip_with(other, |a, b| a & !b)
    }

    fn zip_with(&mut self, other: &Self, f: impl Fn(u8, u8) -> u8) -> CoreResult<()> {
        if other.len != self.len {
            return Err(CoreError::out_of_range(other.len, self.len));
        }
        for (a, &b) in self.bytes.iter_mut().zip(&other.bytes) {
            *a = f(*a, b);
        }
        Ok(())
    }
}

impl fmt::Debug for Bitarray {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Bitarray")
            .field("len", &self.len)
            .field("count", &self.count())
            .finish()
    }
}

/// Iterator over the set bits of a [`Bitarray`].
#[derive(Debug, Clone)]
pub struct SetBits<'a> {
    bytes: &'a [u8],
    byte: usize,
    pending: u8,
}

impl Iterator for SetBits<'_> {
    type Item = usize;

    fn next(&mut self) -> Option<usize> {
        loop {
            if self.pending != 0 {
                let bit = self.pending.leading_zeros() as usize;
                self.pending &= !(0x80 >> bit);
                return Some(self.byte * 8 + bit);
            }
            self.byte += 1;
            self.pending = *self.bytes.get(self.byte)?;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn bit_zero_is_high_order_bit() {
        let mut bits = Bitarray::new(16);
        bits.set(0, true).unwrap();
        bits.set(9, true).unwrap();
        assert_eq!(bits.to_bytes(), vec![0x80, 0x40]);
    }

    #[test]
    fn get_set_count() {
        let mut bits = Bitarray::new(32);
        assert!(bits.none());
        assert!(!bits.set(5, true).unwrap());
        assert!(bits.set(5, true).unwrap());
        bits.set(31, true).unwrap();
        assert!(bits.get(5).unwrap());
        assert!(!bits.get(6).unwrap());
        assert_eq!(bits.count(), 2);

        bits.set(5, false).unwrap();
        assert_eq!(bits.count(), 1);
    }

    #[test]
    fn out_of_range_is_an_error() {
        let mut bits = Bitarray::new(32);
        assert!(matches!(
            bits.get(32),
            Err(CoreError::OutOfRange { index: 32, len: 32 })
        ));
        assert!(matches!(bits.set(40, true), Err(CoreError::OutOfRange { .. })));
    }

    #[test]
    fn from_bytes_checks_length_and_padding() {
        assert!(Bitarray::from_bytes(16, &[0, 0, 0]).is_err());
        assert!(Bitarray::from_bytes(12, &[0, 0x08]).is_err());
        let bits = Bitarray::from_bytes(12, &[0, 0x10]).unwrap();
        assert_eq!(bits.iter_set_bits().collect::<Vec<_>>(), vec![11]);
    }

    #[test]
    fn iter_set_bits_restarts() {
        let mut bits = Bitarray::new(64);
        for i in [0, 7, 8, 33, 63] {
            bits.set(i, true).unwrap();
        }
        let first: Vec<usize> = bits.iter_set_bits().collect();
        let second: Vec<usize> = bits.iter_set_bits().collect();
        assert_eq!(first, vec![0, 7, 8, 33, 63]);
        assert_eq!(first, second);
    }

    #[test]
    fn first_and_last_set() {
        let mut bits = Bitarray::new(64);
        assert_eq!(bits.first_set(), None);
        assert_eq!(bits.last_set(), None);
        bits.set(12, true).unwrap();
        bits.set(50, true).unwrap();
        assert_eq!(bits.first_set(), Some(12));
        assert_eq!(bits.last_set(), Some(50));
    }

    #[test]
    fn first_clear_from_finds_gap() {
        let mut bits = Bitarray::new(24);
        for i in 0..19 {
            bits.set(i, true).unwrap();
        }
        assert_eq!(bits.first_clear_from(0), Some(19));
        assert_eq!(bits.first_clear_from(20), Some(20));
        for i in 19..24 {
            bits.set(i, true).unwrap();
        }
        assert_eq!(bits.first_clear_from(0), None);
    }

    #[test]
    fn first_clear_from_skips_full_bytes() {
        let mut bits = Bitarray::new(64);
        for i in 0..64 {
            bits.set(i, true).unwrap();
        }
        bits.set(45, false).unwrap();
        assert_eq!(bits.first_clear_from(0), Some(45));
        assert_eq!(bits.first_clear_from(3), Some(45));
        assert_eq!(bits.first_clear_from(45), Some(45));
        assert_eq!(bits.first_clear_from(46), None);
        assert_eq!(bits.first_clear_from(64), None);
    }

    #[test]
    fn set_operations() {
        let mut a = Bitarray::new(16);
        let mut b = Bitarray::new(16);
        for i in [1, 2, 3] {
            a.set(i, true).unwrap();
        }
        for i in [3, 4] {
            b.set(i, true).unwrap();
        }

        let mut union = a.clone();
        union.union_with(&b).unwrap();
        assert_eq!(union.iter_set_bits().collect::<Vec<_>>(), vec![1, 2, 3, 4]);

        let mut both = a.clone();
        both.intersect_with(&b).unwrap();
        assert_eq!(both.iter_set_bits().collect::<Vec<_>>(), vec![3]);

        a.difference_with(&b).unwrap();
        assert_eq!(a.iter_set_bits().collect::<Vec<_>>(), vec![1, 2]);

        assert!(a.union_with(&Bitarray::new(8)).is_err());
    }

    proptest! {
        #[test]
        fn bytes_round_trip(indices in proptest::collection::btree_set(0usize..1024, 0..200)) {
            let mut bits = Bitarray::new(1024);
            for &i in &indices {
                bits.set(i, true).unwrap();
            }
            let restored = Bitarray::from_bytes(1024, &bits.to_bytes()).unwrap();
            prop_assert_eq!(&restored, &bits);
            prop_assert_eq!(restored.count(), indices.len());
            prop_assert_eq!(
                restored.iter_set_bits().collect::<Vec<_>>(),
                indices.into_iter().collect::<Vec<_>>()
            );
        }
    }
}
