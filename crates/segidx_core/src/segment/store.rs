//! Reading and writing segments through a storage backend.

use crate::error::{CoreError, CoreResult};
use crate::segment::codec::{Representation, SegmentCodec, SegmentPayload};
use crate::segment::row::SegmentRow;
use segidx_storage::{SideTable, StorageBackend, StorageError};

/// A decoded index row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredSegment {
    /// The row as stored.
    pub row: SegmentRow,
    /// Its decoded contents.
    pub representation: Representation,
}

/// Moves segments between their in-memory and stored forms.
///
/// Side-table rows are rewritten in place while a segment keeps its class.
/// When the class changes the old side row is freed and a new one allocated.
#[derive(Debug, Clone, Copy)]
pub struct SegmentStore {
    codec: SegmentCodec,
}

impl SegmentStore {
    /// Creates a store using `codec`.
    #[must_use]
    pub const fn new(codec: SegmentCodec) -> Self {
        Self { codec }
    }

    /// Returns the codec.
    #[must_use]
    pub const fn codec(&self) -> &SegmentCodec {
        &self.codec
    }

    /// Decodes `row`, fetching its side-table payload.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::CorruptSegment`] if the side row is missing or the
    /// payload does not match the row.
    pub fn read_row<B: StorageBackend + ?Sized>(
        &self,
        backend: &B,
        row: &SegmentRow,
    ) -> CoreResult<Representation> {
        let fetch = |kind: SideTable, row_id: u32| {
            backend.get_side_table(kind, row_id).map_err(|err| match err {
                StorageError::SideRowMissing { kind, row_id } => CoreError::corrupt_segment(
                    format!("row refers to missing {kind} row {row_id}"),
                ),
                other => other.into(),
            })
        };
        let payload = match *row {
            SegmentRow::Single { offset, .. } => SegmentPayload::Single(offset),
            SegmentRow::List { row_id, .. } => SegmentPayload::List(fetch(SideTable::List, row_id)?),
            SegmentRow::Bitmap { row_id, .. } => SegmentPayload::Bits(fetch(SideTable::Bits, row_id)?),
        };
        self.codec.decode(row.record_count(), &payload)
    }

    /// Decodes raw row bytes stored under `segment`.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::IndexCorrupt`] if the row cannot be decoded or
    /// names another segment.
    pub fn decode_stored<B: StorageBackend + ?Sized>(
        &self,
        backend: &B,
        index: &str,
        segment: u32,
        bytes: &[u8],
    ) -> CoreResult<StoredSegment> {
        let decode = || -> CoreResult<StoredSegment> {
            let row = SegmentRow::decode(bytes)?;
            if row.segment() != segment {
                return Err(CoreError::corrupt_segment(format!(
                    "row stored under segment {segment} names segment {}",
                    row.segment()
                )));
            }
            let representation = self.read_row(backend, &row)?;
            Ok(StoredSegment {
                row,
                representation,
            })
        };
        decode().map_err(|err| err.in_index(index, segment))
    }

    /// Loads the segment of `key` in `index`, if stored.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::IndexCorrupt`] if the stored row cannot be decoded.
    pub fn load<B: StorageBackend + ?Sized>(
        &self,
        backend: &B,
        index: &str,
        key: &[u8],
        segment: u32,
    ) -> CoreResult<Option<StoredSegment>> {
        backend
            .get_row(index, key, segment)?
            .map(|bytes| self.decode_stored(backend, index, segment, &bytes))
            .transpose()
    }

    /// Loads every stored segment of `key` in `index`, in segment order.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::IndexCorrupt`] if a stored row cannot be decoded.
    pub fn load_key<B: StorageBackend + ?Sized>(
        &self,
        backend: &B,
        index: &str,
        key: &[u8],
    ) -> CoreResult<Vec<(u32, StoredSegment)>> {
        backend
            .rows_for_key(index, key)?
            .into_iter()
            .map(|(segment, bytes)| {
                self.decode_stored(backend, index, segment, &bytes)
                    .map(|stored| (segment, stored))
            })
            .collect()
    }

    /// Writes `rep` as the segment of `key` in `index`, replacing `old`.
    ///
    /// An empty representation deletes the row and its side row. Returns
    /// the row now stored.
    ///
    /// # Errors
    ///
    /// Returns a storage error if a write fails, or
    /// [`CoreError::CorruptSegment`] if a count does not fit its row field.
    pub fn write<B: StorageBackend + ?Sized>(
        &self,
        backend: &mut B,
        index: &str,
        key: &[u8],
        segment: u32,
        old: Option<&SegmentRow>,
        rep: &Representation,
    ) -> CoreResult<Option<SegmentRow>> {
        let old_side = old.and_then(SegmentRow::side_row);

        let Some(encoded) = self.codec.encode(rep) else {
            backend.delete_row(index, key, segment)?;
            if let Some((kind, row_id)) = old_side {
                backend.delete_side_table(kind, row_id)?;
            }
            return Ok(None);
        };

        let row = match encoded.payload {
            SegmentPayload::Single(offset) => {
                if let Some((kind, row_id)) = old_side {
                    backend.delete_side_table(kind, row_id)?;
                }
                SegmentRow::Single { segment, offset }
            }
            SegmentPayload::List(bytes) => {
                let count = u16::try_from(encoded.record_count).map_err(|_| {
                    CoreError::corrupt_segment(format!(
                        "list of {} offsets exceeds the row count field",
                        encoded.record_count
                    ))
                })?;
                let row_id = Self::put_side(backend, SideTable::List, old_side, &bytes)?;
                SegmentRow::List {
                    segment,
                    count,
                    row_id,
                }
            }
            SegmentPayload::Bits(bytes) => {
                if encoded.record_count > SegmentRow::MAX_BITMAP_COUNT {
                    return Err(CoreError::corrupt_segment(format!(
                        "bitmap count {} exceeds the row count field",
                        encoded.record_count
                    )));
                }
                let row_id = Self::put_side(backend, SideTable::Bits, old_side, &bytes)?;
                SegmentRow::Bitmap {
                    segment,
                    count: encoded.record_count,
                    row_id,
                }
            }
        };
        backend.put_row(index, key, segment, &row.encode())?;
        Ok(Some(row))
    }

    fn put_side<B: StorageBackend + ?Sized>(
        backend: &mut B,
        kind: SideTable,
        old_side: Option<(SideTable, u32)>,
        bytes: &[u8],
    ) -> CoreResult<u32> {
        let row_id = match old_side {
            Some((old_kind, row_id)) if old_kind == kind => {
                backend.put_side_table(kind, Some(row_id), bytes)?
            }
            Some((old_kind, row_id)) => {
                backend.delete_side_table(old_kind, row_id)?;
                backend.put_side_table(kind, None, bytes)?
            }
            None => backend.put_side_table(kind, None, bytes)?,
        };
        Ok(row_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SegmentConfig;
    use segidx_storage::InMemoryBackend;

    fn store() -> SegmentStore {
        SegmentStore::new(SegmentCodec::new(SegmentConfig::new(64).conversion_limit(4)))
    }

    fn write(
        backend: &mut InMemoryBackend,
        old: Option<&SegmentRow>,
        offsets: &[u16],
    ) -> Option<SegmentRow> {
        let store = store();
        let rep = store.codec().from_offsets(offsets.iter().copied()).unwrap();
        store.write(backend, "colour", b"red", 0, old, &rep).unwrap()
    }

    #[test]
    fn write_and_load_each_class() {
        let mut backend = InMemoryBackend::new();
        backend.begin_transaction().unwrap();

        for offsets in [&[5u16][..], &[1, 5], &[1, 2, 3, 5]] {
            let old = store()
                .load(&backend, "colour", b"red", 0)
                .unwrap()
                .map(|s| s.row);
            write(&mut backend, old.as_ref(), offsets);
            let loaded = store().load(&backend, "colour", b"red", 0).unwrap().unwrap();
            assert_eq!(
                loaded.representation.offsets().collect::<Vec<_>>(),
                offsets.to_vec()
            );
        }
    }

    #[test]
    fn same_class_rewrites_in_place() {
        let mut backend = InMemoryBackend::new();
        backend.begin_transaction().unwrap();

        let first = write(&mut backend, None, &[1, 2]).unwrap();
        let second = write(&mut backend, Some(&first), &[1, 2, 3]).unwrap();
        assert_eq!(first.side_row(), second.side_row());
        assert_eq!(backend.side_table_ids(SideTable::List).unwrap(), vec![1]);
    }

    #[test]
    fn class_change_frees_old_side_row() {
        let mut backend = InMemoryBackend::new();
        backend.begin_transaction().unwrap();

        let list = write(&mut backend, None, &[1, 2]).unwrap();
        let bits = write(&mut backend, Some(&list), &[1, 2, 3, 4]).unwrap();
        assert_eq!(bits.side_row(), Some((SideTable::Bits, 1)));
        assert!(backend.side_table_ids(SideTable::List).unwrap().is_empty());

        let single = write(&mut backend, Some(&bits), &[4]).unwrap();
        assert_eq!(single.side_row(), None);
        assert!(backend.side_table_ids(SideTable::Bits).unwrap().is_empty());
    }

    #[test]
    fn empty_deletes_row_and_side_row() {
        let mut backend = InMemoryBackend::new();
        backend.begin_transaction().unwrap();

        let list = write(&mut backend, None, &[1, 2]).unwrap();
        assert!(write(&mut backend, Some(&list), &[]).is_none());
        assert!(backend.get_row("colour", b"red", 0).unwrap().is_none());
        assert!(backend.side_table_ids(SideTable::List).unwrap().is_empty());
    }

    #[test]
    fn missing_side_row_is_index_corruption() {
        let mut backend = InMemoryBackend::new();
        backend.begin_transaction().unwrap();
        let row = SegmentRow::List {
            segment: 0,
            count: 2,
            row_id: 7,
        };
        backend.put_row("colour", b"red", 0, &row.encode()).unwrap();

        let result = store().load(&backend, "colour", b"red", 0);
        assert!(matches!(
            result,
            Err(CoreError::IndexCorrupt { segment: 0, .. })
        ));
    }

    #[test]
    fn segment_mismatch_is_index_corruption() {
        let mut backend = InMemoryBackend::new();
        backend.begin_transaction().unwrap();
        let row = SegmentRow::Single {
            segment: 3,
            offset: 1,
        };
        backend.put_row("colour", b"red", 0, &row.encode()).unwrap();

        let result = store().load(&backend, "colour", b"red", 0);
        assert!(matches!(result, Err(CoreError::IndexCorrupt { .. })));
    }

    #[test]
    fn load_key_returns_segments_in_order() {
        let mut backend = InMemoryBackend::new();
        backend.begin_transaction().unwrap();
        let store = store();
        for segment in [2, 0] {
            store
                .write(
                    &mut backend,
                    "colour",
                    b"red",
                    segment,
                    None,
                    &Representation::Single(9),
                )
                .unwrap();
        }
        let loaded = store.load_key(&backend, "colour", b"red").unwrap();
        let segments: Vec<u32> = loaded.iter().map(|(s, _)| *s).collect();
        assert_eq!(segments, vec![0, 2]);
    }
}
