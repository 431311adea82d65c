//! Journal frames for the file backend.
//!
//! Every committed transaction is appended as one frame:
//!
//! ```text
//! | magic (4) | length (4) | payload (N) | crc32 (4) |
//! ```
//!
//! The payload is an operation count (4) followed by that many operations,
//! each a tag byte and its fields. Integers are big-endian; byte strings and
//! names are prefixed by a 4-byte length. The CRC covers magic, length and
//! payload.
//!
//! ## Recovery Policy
//!
//! - A frame cut short at end of file is a crash mid-append: it is dropped
//!   and replay stops cleanly.
//! - A bad magic, unknown tag or CRC mismatch in a complete frame is fatal.

use crate::backend::SideTable;
use crate::error::{StorageError, StorageResult};

/// Magic bytes identifying a journal frame.
pub(crate) const FRAME_MAGIC: [u8; 4] = *b"SGJ1";

/// Bytes before the payload: magic + length.
const FRAME_HEADER: usize = 8;

/// Bytes after the payload: crc32.
const FRAME_TRAILER: usize = 4;

/// One storage mutation as recorded in the journal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum JournalOp {
    PutRow {
        index: String,
        key: Vec<u8>,
        segment: u32,
        row: Vec<u8>,
    },
    DeleteRow {
        index: String,
        key: Vec<u8>,
        segment: u32,
    },
    PutSide {
        kind: SideTable,
        row_id: u32,
        data: Vec<u8>,
    },
    DeleteSide {
        kind: SideTable,
        row_id: u32,
    },
    PutExistence {
        file: String,
        segment: u32,
        bits: Vec<u8>,
    },
    PutControl {
        name: String,
        value: Vec<u8>,
    },
}

impl JournalOp {
    const PUT_ROW: u8 = 1;
    const DELETE_ROW: u8 = 2;
    const PUT_SIDE: u8 = 3;
    const DELETE_SIDE: u8 = 4;
    const PUT_EXISTENCE: u8 = 5;
    const PUT_CONTROL: u8 = 6;

    fn encode_into(&self, buf: &mut Vec<u8>) {
        match self {
            Self::PutRow {
                index,
                key,
                segment,
                row,
            } => {
                buf.push(Self::PUT_ROW);
                put_bytes(buf, index.as_bytes());
                put_bytes(buf, key);
                buf.extend_from_slice(&segment.to_be_bytes());
                put_bytes(buf, row);
            }
            Self::DeleteRow {
                index,
                key,
                segment,
            } => {
                buf.push(Self::DELETE_ROW);
                put_bytes(buf, index.as_bytes());
                put_bytes(buf, key);
                buf.extend_from_slice(&segment.to_be_bytes());
            }
            Self::PutSide { kind, row_id, data } => {
                buf.push(Self::PUT_SIDE);
                buf.push(kind.as_byte());
                buf.extend_from_slice(&row_id.to_be_bytes());
                put_bytes(buf, data);
            }
            Self::DeleteSide { kind, row_id } => {
                buf.push(Self::DELETE_SIDE);
                buf.push(kind.as_byte());
                buf.extend_from_slice(&row_id.to_be_bytes());
            }
            Self::PutExistence {
                file,
                segment,
                bits,
            } => {
                buf.push(Self::PUT_EXISTENCE);
                put_bytes(buf, file.as_bytes());
                buf.extend_from_slice(&segment.to_be_bytes());
                put_bytes(buf, bits);
            }
            Self::PutControl { name, value } => {
                buf.push(Self::PUT_CONTROL);
                put_bytes(buf, name.as_bytes());
                put_bytes(buf, value);
            }
        }
    }

    fn decode_from(reader: &mut Reader<'_>) -> StorageResult<Self> {
        let op = match reader.u8()? {
            Self::PUT_ROW => Self::PutRow {
                index: reader.string()?,
                key: reader.bytes()?,
                segment: reader.u32()?,
                row: reader.bytes()?,
            },
            Self::DELETE_ROW => Self::DeleteRow {
                index: reader.string()?,
                key: reader.bytes()?,
                segment: reader.u32()?,
            },
            Self::PUT_SIDE => Self::PutSide {
                kind: reader.side_table()?,
                row_id: reader.u32()?,
                data: reader.bytes()?,
            },
            Self::DELETE_SIDE => Self::DeleteSide {
                kind: reader.side_table()?,
                row_id: reader.u32()?,
            },
            Self::PUT_EXISTENCE => Self::PutExistence {
                file: reader.string()?,
                segment: reader.u32()?,
                bits: reader.bytes()?,
            },
            Self::PUT_CONTROL => Self::PutControl {
                name: reader.string()?,
                value: reader.bytes()?,
            },
            tag => {
                return Err(StorageError::corrupted(format!(
                    "unknown journal operation tag {tag}"
                )))
            }
        };
        Ok(op)
    }
}

fn put_bytes(buf: &mut Vec<u8>, bytes: &[u8]) {
    buf.extend_from_slice(&(bytes.len() as u32).to_be_bytes());
    buf.extend_from_slice(bytes);
}

/// Bounds-checked reader over a frame payload.
struct Reader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    fn take(&mut self, len: usize) -> StorageResult<&'a [u8]> {
        let end = self
            .pos
            .checked_add(len)
            .filter(|&end| end <= self.data.len())
            .ok_or_else(|| StorageError::corrupted("journal operation overruns its frame"))?;
        let slice = &self.data[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    fn u8(&mut self) -> StorageResult<u8> {
        Ok(self.take(1)?[0])
    }

    fn u32(&mut self) -> StorageResult<u32> {
        let b = self.take(4)?;
        Ok(u32::from_be_bytes([b[0], b[1], b[2], b[3]]))
    }

    fn bytes(&mut self) -> StorageResult<Vec<u8>> {
        let len = self.u32()? as usize;
        Ok(self.take(len)?.to_vec())
    }

    fn string(&mut self) -> StorageResult<String> {
        String::from_utf8(self.bytes()?)
            .map_err(|_| StorageError::corrupted("journal name is not UTF-8"))
    }

    fn side_table(&mut self) -> StorageResult<SideTable> {
        let tag = self.u8()?;
        SideTable::from_byte(tag)
            .ok_or_else(|| StorageError::corrupted(format!("unknown side table tag {tag}")))
    }

    fn is_exhausted(&self) -> bool {
        self.pos == self.data.len()
    }
}

/// Encodes one transaction's operations as a journal frame.
pub(crate) fn encode_frame(ops: &[JournalOp]) -> Vec<u8> {
    let mut payload = Vec::new();
    payload.extend_from_slice(&(ops.len() as u32).to_be_bytes());
    for op in ops {
        op.encode_into(&mut payload);
    }

    let mut frame = Vec::with_capacity(FRAME_HEADER + payload.len() + FRAME_TRAILER);
    frame.extend_from_slice(&FRAME_MAGIC);
    frame.extend_from_slice(&(payload.len() as u32).to_be_bytes());
    frame.extend_from_slice(&payload);
    let crc = compute_crc32(&frame);
    frame.extend_from_slice(&crc.to_be_bytes());
    frame
}

/// The result of scanning a journal.
#[derive(Debug)]
pub(crate) struct JournalScan {
    /// The operations of every complete frame, frame by frame.
    pub frames: Vec<Vec<JournalOp>>,
    /// Length of the journal prefix made of complete frames.
    pub valid_len: u64,
    /// Whether an incomplete frame followed the valid prefix.
    pub torn_tail: bool,
}

/// Scans a journal, stopping cleanly at a torn final frame.
pub(crate) fn scan_journal(data: &[u8]) -> StorageResult<JournalScan> {
    let mut frames = Vec::new();
    let mut pos = 0usize;

    while pos < data.len() {
        let rest = &data[pos..];
        if rest.len() < FRAME_HEADER {
            return Ok(JournalScan {
                frames,
                valid_len: pos as u64,
                torn_tail: true,
            });
        }
        if rest[0..4] != FRAME_MAGIC {
            return Err(StorageError::corrupted(format!(
                "bad journal frame magic at offset {pos}"
            )));
        }
        let payload_len = u32::from_be_bytes([rest[4], rest[5], rest[6], rest[7]]) as usize;
        let frame_len = FRAME_HEADER + payload_len + FRAME_TRAILER;
        if rest.len() < frame_len {
            return Ok(JournalScan {
                frames,
                valid_len: pos as u64,
                torn_tail: true,
            });
        }

        let body = &rest[..FRAME_HEADER + payload_len];
        let t = &rest[FRAME_HEADER + payload_len..frame_len];
        let stored = u32::from_be_bytes([t[0], t[1], t[2], t[3]]);
        let computed = compute_crc32(body);
        if stored != computed {
            return Err(StorageError::corrupted(format!(
                "journal frame at offset {pos} failed its checksum: expected {stored:08x}, got {computed:08x}"
            )));
        }

        let mut reader = Reader::new(&body[FRAME_HEADER..]);
        let count = reader.u32()? as usize;
        let mut ops = Vec::with_capacity(count.min(1024));
        for _ in 0..count {
            ops.push(JournalOp::decode_from(&mut reader)?);
        }
        if !reader.is_exhausted() {
            return Err(StorageError::corrupted(format!(
                "journal frame at offset {pos} has trailing bytes"
            )));
        }
        frames.push(ops);
        pos += frame_len;
    }

    Ok(JournalScan {
        frames,
        valid_len: pos as u64,
        torn_tail: false,
    })
}

/// Computes the CRC32 (IEEE polynomial) of `data`.
pub(crate) fn compute_crc32(data: &[u8]) -> u32 {
    const CRC32_TABLE: [u32; 256] = {
        let mut table = [0u32; 256];
        let mut i = 0;
        while i < 256 {
            let mut crc = i as u32;
            let mut j = 0;
            while j < 8 {
                if crc & 1 != 0 {
                    crc = (crc >> 1) ^ 0xEDB8_8320;
                } else {
                    crc >>= 1;
                }
                j += 1;
            }
            table[i] = crc;
            i += 1;
        }
        table
    };

    let mut crc = 0xFFFF_FFFF_u32;
    for &byte in data {
        let index = ((crc ^ u32::from(byte)) & 0xFF) as usize;
        crc = (crc >> 8) ^ CRC32_TABLE[index];
    }
    !crc
}
