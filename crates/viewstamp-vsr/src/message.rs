//! Wire messages exchanged between replicas.
//!
//! Two messages cross a peer link:
//!
//! - [`LogEntry`]: leader to followers, one per client request
//! - [`AcceptAck`]: follower to leader, once the entry is durable
//!
//! # Wire Format
//!
//! ```text
//! LogEntry (ENTRY_HEADER_SIZE + payload):
//! [magic:u32][origin:u8][hint.view:u64][hint.req:u64]
//! [stamp.view:u64][stamp.req:u64][len:u32][crc32:u32][payload]
//!
//! AcceptAck (ACK_SIZE):
//! [magic:u32][node:u8][stamp.view:u64][stamp.req:u64][crc32:u32]
//! ```
//!
//! Integers are little-endian. Each CRC covers every byte of the message
//! except the CRC field itself. Decoding checks the declared payload length
//! against the buffer and the size limit before touching the payload, and
//! rejects trailing bytes.

use bytes::{BufMut, Bytes, BytesMut};
use viewstamp_types::{MAX_REPLICAS, NodeId, ViewStamp};

use crate::error::CodecError;

const ENTRY_MAGIC: u32 = 0x5653_454E;
const ACK_MAGIC: u32 = 0x5653_414B;

/// Fixed bytes in front of every entry payload.
pub const ENTRY_HEADER_SIZE: usize = 4 + 1 + 16 + 16 + 4 + 4;

/// Encoded size of an [`AcceptAck`].
pub const ACK_SIZE: usize = 4 + 1 + 16 + 4;

/// Default limit on one encoded message (1 MiB).
pub const DEFAULT_MAX_MESSAGE_SIZE: usize = 1024 * 1024;

// Offset of the CRC field inside the entry header.
const ENTRY_CRC_OFFSET: usize = ENTRY_HEADER_SIZE - 4;

// ============================================================================
// LogEntry
// ============================================================================

/// One replicated client request, sent by the leader to every follower.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogEntry {
    /// Node that assigned the stamp.
    pub origin: NodeId,

    /// Leader's commit pointer when the entry was sent.
    pub committed_hint: ViewStamp,

    /// Position of this request in the replicated order.
    pub stamp: ViewStamp,

    /// Opaque client payload.
    pub payload: Bytes,
}

impl LogEntry {
    /// Builds an entry, rejecting payloads whose encoding would exceed
    /// `max_message_size`.
    pub fn encode(
        origin: NodeId,
        committed_hint: ViewStamp,
        stamp: ViewStamp,
        payload: Bytes,
        max_message_size: usize,
    ) -> Result<Self, CodecError> {
        check_entry_size(payload.len(), max_message_size)?;
        Ok(Self {
            origin,
            committed_hint,
            stamp,
            payload,
        })
    }

    /// Size of this entry on the wire.
    pub fn encoded_len(&self) -> usize {
        ENTRY_HEADER_SIZE + self.payload.len()
    }

    /// Serializes the entry.
    pub fn to_bytes(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(self.encoded_len());
        buf.put_u32_le(ENTRY_MAGIC);
        buf.put_u8(self.origin.as_u8());
        put_stamp(&mut buf, self.committed_hint);
        put_stamp(&mut buf, self.stamp);
        buf.put_u32_le(self.payload.len() as u32);

        let mut hasher = crc32fast::Hasher::new();
        hasher.update(&buf);
        hasher.update(&self.payload);
        buf.put_u32_le(hasher.finalize());

        buf.extend_from_slice(&self.payload);
        buf.freeze()
    }

    /// Parses an entry. The payload is a zero-copy slice of `data`.
    pub fn decode(data: &Bytes, max_message_size: usize) -> Result<Self, CodecError> {
        ensure_len(data, ENTRY_HEADER_SIZE)?;

        let magic = read_u32(data, 0);
        if magic != ENTRY_MAGIC {
            return Err(CodecError::BadMagic(magic));
        }

        let origin = read_node(data[4])?;
        let committed_hint = read_stamp(data, 5);
        let stamp = read_stamp(data, 21);
        let payload_len = read_u32(data, 37) as usize;

        check_entry_size(payload_len, max_message_size)?;
        let total = ENTRY_HEADER_SIZE + payload_len;
        ensure_len(data, total)?;
        if data.len() > total {
            return Err(CodecError::TrailingBytes(data.len() - total));
        }

        let stored = read_u32(data, ENTRY_CRC_OFFSET);
        let mut hasher = crc32fast::Hasher::new();
        hasher.update(&data[..ENTRY_CRC_OFFSET]);
        hasher.update(&data[ENTRY_HEADER_SIZE..total]);
        let computed = hasher.finalize();
        if stored != computed {
            return Err(CodecError::ChecksumMismatch { stored, computed });
        }

        Ok(Self {
            origin,
            committed_hint,
            stamp,
            payload: data.slice(ENTRY_HEADER_SIZE..total),
        })
    }
}

/// Rejects a payload of `payload_len` bytes if its entry would not fit in
/// `max_message_size`.
pub fn check_entry_size(payload_len: usize, max_message_size: usize) -> Result<(), CodecError> {
    let size = ENTRY_HEADER_SIZE.saturating_add(payload_len);
    if size > max_message_size || payload_len > u32::MAX as usize {
        return Err(CodecError::InvalidSize {
            size,
            max: max_message_size,
        });
    }
    Ok(())
}

// ============================================================================
// AcceptAck
// ============================================================================

/// A follower's confirmation that an entry is durable in its store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AcceptAck {
    /// The acknowledging follower.
    pub node_id: NodeId,

    /// Stamp of the acknowledged entry.
    pub stamp: ViewStamp,
}

impl AcceptAck {
    pub fn new(node_id: NodeId, stamp: ViewStamp) -> Self {
        Self { node_id, stamp }
    }

    pub fn to_bytes(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(ACK_SIZE);
        buf.put_u32_le(ACK_MAGIC);
        buf.put_u8(self.node_id.as_u8());
        put_stamp(&mut buf, self.stamp);
        let crc = crc32fast::hash(&buf);
        buf.put_u32_le(crc);
        buf.freeze()
    }

    pub fn decode(data: &[u8]) -> Result<Self, CodecError> {
        ensure_len(data, ACK_SIZE)?;
        if data.len() > ACK_SIZE {
            return Err(CodecError::TrailingBytes(data.len() - ACK_SIZE));
        }

        let magic = read_u32(data, 0);
        if magic != ACK_MAGIC {
            return Err(CodecError::BadMagic(magic));
        }

        let stored = read_u32(data, ACK_SIZE - 4);
        let computed = crc32fast::hash(&data[..ACK_SIZE - 4]);
        if stored != computed {
            return Err(CodecError::ChecksumMismatch { stored, computed });
        }

        Ok(Self {
            node_id: read_node(data[4])?,
            stamp: read_stamp(data, 5),
        })
    }
}

// ============================================================================
// Helpers
// ============================================================================

fn ensure_len(data: &[u8], needed: usize) -> Result<(), CodecError> {
    if data.len() < needed {
        return Err(CodecError::Truncated {
            needed,
            available: data.len(),
        });
    }
    Ok(())
}

fn put_stamp(buf: &mut BytesMut, stamp: ViewStamp) {
    buf.put_u64_le(stamp.view_id);
    buf.put_u64_le(stamp.req_id);
}

fn read_u32(data: &[u8], at: usize) -> u32 {
    let mut buf = [0u8; 4];
    buf.copy_from_slice(&data[at..at + 4]);
    u32::from_le_bytes(buf)
}

fn read_u64(data: &[u8], at: usize) -> u64 {
    let mut buf = [0u8; 8];
    buf.copy_from_slice(&data[at..at + 8]);
    u64::from_le_bytes(buf)
}

fn read_stamp(data: &[u8], at: usize) -> ViewStamp {
    ViewStamp::new(read_u64(data, at), read_u64(data, at + 8))
}

fn read_node(raw: u8) -> Result<NodeId, CodecError> {
    if usize::from(raw) >= MAX_REPLICAS {
        return Err(CodecError::InvalidNode(raw));
    }
    Ok(NodeId::new(raw))
}
