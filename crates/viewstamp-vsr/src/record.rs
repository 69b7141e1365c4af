//! The value each replica stores under a request's stamp.
//!
//! ```text
//! [created_at:u64][ack_bitmap:u64][len:u32][payload][crc32:u32]
//! ```

use bytes::{BufMut, Bytes, BytesMut};
use viewstamp_types::{AckBitmap, NodeId, Timestamp};

use crate::error::CodecError;

/// Bytes a record adds around its payload.
pub const RECORD_OVERHEAD: usize = 8 + 8 + 4 + 4;

const HEADER_SIZE: usize = RECORD_OVERHEAD - 4;

/// A persisted client request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestRecord {
    /// When the local replica first stored the request.
    pub created_at: Timestamp,

    /// Replicas known to hold the request. On the leader this reaches its
    /// final value when the request commits.
    pub ack_bitmap: AckBitmap,

    pub payload: Bytes,
}

impl RequestRecord {
    /// A fresh record acknowledged by `holder` alone.
    pub fn new(holder: NodeId, payload: Bytes) -> Self {
        Self {
            created_at: Timestamp::now(),
            ack_bitmap: AckBitmap::with(holder),
            payload,
        }
    }

    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(RECORD_OVERHEAD + self.payload.len());
        buf.put_u64_le(self.created_at.as_nanos());
        buf.put_u64_le(self.ack_bitmap.bits());
        buf.put_u32_le(self.payload.len() as u32);
        buf.extend_from_slice(&self.payload);
        let crc = crc32fast::hash(&buf);
        buf.put_u32_le(crc);
        buf.freeze()
    }

    pub fn decode(data: &Bytes) -> Result<Self, CodecError> {
        if data.len() < RECORD_OVERHEAD {
            return Err(CodecError::Truncated {
                needed: RECORD_OVERHEAD,
                available: data.len(),
            });
        }

        let len = read_u32(&data[16..20]) as usize;
        let total = RECORD_OVERHEAD + len;
        if data.len() < total {
            return Err(CodecError::Truncated {
                needed: total,
                available: data.len(),
            });
        }
        if data.len() > total {
            return Err(CodecError::TrailingBytes(data.len() - total));
        }

        let crc_at = HEADER_SIZE + len;
        let stored = read_u32(&data[crc_at..total]);
        let computed = crc32fast::hash(&data[..crc_at]);
        if stored != computed {
            return Err(CodecError::ChecksumMismatch { stored, computed });
        }

        Ok(Self {
            created_at: Timestamp::from_nanos(read_u64(&data[0..8])),
            ack_bitmap: AckBitmap::from_bits(read_u64(&data[8..16])),
            payload: data.slice(HEADER_SIZE..crc_at),
        })
    }
}

fn read_u32(bytes: &[u8]) -> u32 {
    let mut buf = [0u8; 4];
    buf.copy_from_slice(bytes);
    u32::from_le_bytes(buf)
}

fn read_u64(bytes: &[u8]) -> u64 {
    let mut buf = [0u8; 8];
    buf.copy_from_slice(bytes);
    u64::from_le_bytes(buf)
}
