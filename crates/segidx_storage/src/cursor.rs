//! Ordered cursor over index rows.

/// One stored index row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RowEntry {
    /// The index key.
    pub key: Vec<u8>,
    /// The segment number.
    pub segment: u32,
    /// The opaque row bytes.
    pub row: Vec<u8>,
}

/// A cursor over the rows of one index in `(key, segment)` order.
///
/// The cursor owns a snapshot of the rows taken when it was created, so it
/// stays valid while the backend is written.
#[derive(Debug, Clone, Default)]
pub struct RowCursor {
    entries: Vec<RowEntry>,
    position: usize,
}

impl RowCursor {
    /// Creates a cursor over entries already sorted by `(key, segment)`.
    #[must_use]
    pub fn new(entries: Vec<RowEntry>) -> Self {
        debug_assert!(entries
            .windows(2)
            .all(|w| (&w[0].key, w[0].segment) < (&w[1].key, w[1].segment)));
        Self {
            entries,
            position: 0,
        }
    }

    /// Positions the cursor at the first row whose key is `>= key`.
    pub fn seek(&mut self, key: &[u8]) {
        self.position = self.entries.partition_point(|e| e.key.as_slice() < key);
    }

    /// Positions the cursor before the first row.
    pub fn rewind(&mut self) {
        self.position = 0;
    }

    /// Returns the row the next call to `next` would yield.
    #[must_use]
    pub fn peek(&self) -> Option<&RowEntry> {
        self.entries.get(self.position)
    }

    /// Returns the total number of rows in the snapshot.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if the snapshot holds no rows.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Iterator for RowCursor {
    type Item = RowEntry;

    fn next(&mut self) -> Option<Self::Item> {
        let entry = self.entries.get(self.position)?.clone();
        self.position += 1;
        Some(entry)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(key: &[u8], segment: u32) -> RowEntry {
        RowEntry {
            key: key.to_vec(),
            segment,
            row: vec![segment as u8],
        }
    }

    fn cursor() -> RowCursor {
        RowCursor::new(vec![
            entry(b"apple", 0),
            entry(b"apple", 3),
            entry(b"pear", 1),
            entry(b"plum", 0),
        ])
    }

    #[test]
    fn iterates_in_order() {
        let segments: Vec<(Vec<u8>, u32)> = cursor().map(|e| (e.key, e.segment)).collect();
        assert_eq!(
            segments,
            vec![
                (b"apple".to_vec(), 0),
                (b"apple".to_vec(), 3),
                (b"pear".to_vec(), 1),
                (b"plum".to_vec(), 0),
            ]
        );
    }

    #[test]
    fn seek_exact_key() {
        let mut cursor = cursor();
        cursor.seek(b"pear");
        assert_eq!(cursor.next().unwrap().key, b"pear");
    }

    #[test]
    fn seek_between_keys() {
        let mut cursor = cursor();
        cursor.seek(b"banana");
        assert_eq!(cursor.peek().unwrap().key, b"pear");
    }

    #[test]
    fn seek_past_end() {
        let mut cursor = cursor();
        cursor.seek(b"zebra");
        assert!(cursor.next().is_none());
        cursor.rewind();
        assert_eq!(cursor.next().unwrap().key, b"apple");
    }
}
