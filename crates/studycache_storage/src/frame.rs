//! Log frame encoding.
//!
//! The durable log is a fixed header followed by frames:
//!
//! ```text
//! | len: u32 LE | crc32(payload): u32 LE | payload: CBOR(WriteBatch) |
//! ```
//!
//! One frame holds exactly one committed batch, so a torn frame can only
//! lose the batch that was being written when the process died.

use crate::codec;
use crate::error::{StorageError, StorageResult};
use crate::record::WriteBatch;

/// Magic bytes identifying a studycache log file.
pub const LOG_MAGIC: [u8; 4] = *b"SCLG";

/// Current log format version.
pub const LOG_VERSION: u16 = 1;

/// Size of the file header (magic + version + reserved).
pub const HEADER_SIZE: usize = 8;

/// Size of a frame header (length + checksum).
pub const FRAME_HEADER_SIZE: usize = 8;

/// Upper bound on a single frame, used to reject garbage lengths.
pub const MAX_FRAME_SIZE: usize = 64 * 1024 * 1024;

/// Builds the file header.
pub fn header() -> [u8; HEADER_SIZE] {
    let mut out = [0u8; HEADER_SIZE];
    out[..4].copy_from_slice(&LOG_MAGIC);
    out[4..6].copy_from_slice(&LOG_VERSION.to_le_bytes());
    out
}

/// Validates a file header.
pub fn check_header(bytes: &[u8]) -> StorageResult<()> {
    if bytes.len() < HEADER_SIZE || bytes[..4] != LOG_MAGIC {
        return Err(StorageError::Corrupted("missing log header".into()));
    }
    let version = u16::from_le_bytes([bytes[4], bytes[5]]);
    if version != LOG_VERSION {
        return Err(StorageError::Corrupted(format!(
            "unsupported log version {version}"
        )));
    }
    Ok(())
}

/// Encodes a batch into a complete frame.
pub fn encode(batch: &WriteBatch) -> StorageResult<Vec<u8>> {
    let payload = codec::to_cbor(batch)?;
    if payload.len() > MAX_FRAME_SIZE {
        return Err(StorageError::Codec(format!(
            "batch of {} bytes exceeds frame limit",
            payload.len()
        )));
    }
    let mut out = Vec::with_capacity(FRAME_HEADER_SIZE + payload.len());
    out.extend_from_slice(&(payload.len() as u32).to_le_bytes());
    out.extend_from_slice(&compute_crc32(&payload).to_le_bytes());
    out.extend_from_slice(&payload);
    Ok(out)
}

/// Outcome of reading one frame from a buffer.
#[derive(Debug)]
pub enum FrameRead {
    /// A valid frame; `next` is the offset just past it.
    Batch {
        /// The decoded batch.
        batch: WriteBatch,
        /// Offset of the following frame.
        next: usize,
    },
    /// The checksum matched but the payload could not be decoded.
    Undecodable {
        /// Offset of the following frame.
        next: usize,
        /// Decoder message.
        reason: String,
    },
    /// Incomplete or checksum-failing data starting at the given offset.
    Damaged {
        /// Description of the damage.
        reason: String,
    },
    /// Clean end of buffer.
    End,
}

/// Reads the frame starting at `offset`.
pub fn read_at(buf: &[u8], offset: usize) -> FrameRead {
    if offset == buf.len() {
        return FrameRead::End;
    }
    let remaining = buf.len().saturating_sub(offset);
    if remaining < FRAME_HEADER_SIZE {
        return FrameRead::Damaged {
            reason: format!("{remaining} trailing bytes, shorter than a frame header"),
        };
    }

    let len = u32::from_le_bytes([buf[offset], buf[offset + 1], buf[offset + 2], buf[offset + 3]])
        as usize;
    let crc = u32::from_le_bytes([
        buf[offset + 4],
        buf[offset + 5],
        buf[offset + 6],
        buf[offset + 7],
    ]);

    if len > MAX_FRAME_SIZE {
        return FrameRead::Damaged {
            reason: format!("frame length {len} exceeds limit"),
        };
    }
    let start = offset + FRAME_HEADER_SIZE;
    let end = start + len;
    if end > buf.len() {
        return FrameRead::Damaged {
            reason: format!("frame of {len} bytes truncated at {}", buf.len() - start),
        };
    }

    let payload = &buf[start..end];
    let actual = compute_crc32(payload);
    if actual != crc {
        return FrameRead::Damaged {
            reason: format!("checksum mismatch: expected {crc:08x}, got {actual:08x}"),
        };
    }

    match codec::from_cbor::<WriteBatch>(payload) {
        Ok(batch) => FrameRead::Batch { batch, next: end },
        Err(e) => FrameRead::Undecodable {
            next: end,
            reason: e.to_string(),
        },
    }
}

/// Computes CRC32 checksum for data.
pub fn compute_crc32(data: &[u8]) -> u32 {
    // IEEE polynomial, table built at compile time
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::Record;

    fn sample_batch() -> WriteBatch {
        WriteBatch::new()
            .put("t", Record::new("a", vec![1, 2, 3]).with_index("owner", "u1"))
            .delete("t", "b")
    }

    #[test]
    fn crc32_known_value() {
        // Standard check value for "123456789"
        assert_eq!(compute_crc32(b"123456789"), 0xCBF4_3926);
    }

    #[test]
    fn header_is_validated() {
        assert!(check_header(&header()).is_ok());
        assert!(check_header(b"NOPE\x01\x00\x00\x00").is_err());
        assert!(check_header(b"SCLG").is_err());
    }

    #[test]
    fn frame_reads_back() {
        let frame = encode(&sample_batch()).unwrap();
        match read_at(&frame, 0) {
            FrameRead::Batch { batch, next } => {
                assert_eq!(batch, sample_batch());
                assert_eq!(next, frame.len());
            }
            other => panic!("unexpected {other:?}"),
        }
        assert!(matches!(read_at(&frame, frame.len()), FrameRead::End));
    }

    #[test]
    fn torn_frame_is_damaged() {
        let frame = encode(&sample_batch()).unwrap();
        let torn = &frame[..frame.len() - 2];
        assert!(matches!(read_at(torn, 0), FrameRead::Damaged { .. }));
        assert!(matches!(read_at(&frame[..5], 0), FrameRead::Damaged { .. }));
    }

    #[test]
    fn flipped_bit_is_damaged() {
        let mut frame = encode(&sample_batch()).unwrap();
        let last = frame.len() - 1;
        frame[last] ^= 0x01;
        assert!(matches!(read_at(&frame, 0), FrameRead::Damaged { .. }));
    }

    #[test]
    fn valid_checksum_bad_payload_is_undecodable() {
        let payload = [0xa1u8, 0x01, 0x02];
        let mut frame = Vec::new();
        frame.extend_from_slice(&(payload.len() as u32).to_le_bytes());
        frame.extend_from_slice(&compute_crc32(&payload).to_le_bytes());
        frame.extend_from_slice(&payload);
        assert!(matches!(
            read_at(&frame, 0),
            FrameRead::Undecodable { next, .. } if next == frame.len()
        ));
    }
}
