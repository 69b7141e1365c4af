//! On-disk frame format for [`FileStore`](crate::FileStore).
//!
//! ```text
//! [FRAME_START:u32][key:16B][length:u32][value:bytes][crc32:u32]
//!       4B            16B       4B         variable       4B
//! ```
//!
//! The key is big-endian so that raw bytes sort like keys; every other
//! integer is little-endian. The CRC covers everything from the start
//! sentinel through the value.

use bytes::Bytes;
use viewstamp_types::ViewStampKey;

use crate::StoreError;

// Marks the start of every frame.
const FRAME_START: u32 = 0x5653_4C47;

// start(4) + key(16) + length(4)
const HEADER_SIZE: usize = 4 + ViewStampKey::ENCODED_LEN + 4;

/// Bytes added to every stored value: header plus trailing CRC.
pub const FRAME_OVERHEAD: usize = HEADER_SIZE + 4;

/// Largest value a single frame may carry (64 MiB).
pub const MAX_VALUE_SIZE: usize = 64 * 1024 * 1024;

/// Result of trying to read one frame from a buffer.
#[derive(Debug)]
pub(crate) enum FrameRead {
    /// A complete, verified frame and the number of bytes it occupied.
    Frame {
        key: ViewStampKey,
        value: Bytes,
        len: usize,
    },
    /// The buffer ends partway through a frame.
    Truncated,
}

pub(crate) fn encode(key: ViewStampKey, value: &[u8]) -> Result<Vec<u8>, StoreError> {
    if value.len() > MAX_VALUE_SIZE {
        return Err(StoreError::ValueTooLarge {
            len: value.len(),
            max: MAX_VALUE_SIZE,
        });
    }

    let mut buf = Vec::with_capacity(FRAME_OVERHEAD + value.len());
    buf.extend_from_slice(&FRAME_START.to_le_bytes());
    buf.extend_from_slice(&key.to_bytes());
    buf.extend_from_slice(&(value.len() as u32).to_le_bytes());
    buf.extend_from_slice(value);

    let crc = crc32fast::hash(&buf);
    buf.extend_from_slice(&crc.to_le_bytes());
    Ok(buf)
}

/// Reads the frame at the start of `data`.
///
/// `offset` is the position of `data` in the file and only feeds error
/// messages.
pub(crate) fn decode(data: &Bytes, offset: u64) -> Result<FrameRead, StoreError> {
    if data.len() < HEADER_SIZE {
        return Ok(FrameRead::Truncated);
    }

    let start = read_u32(&data[0..4]);
    if start != FRAME_START {
        return Err(StoreError::Corrupted {
            offset,
            reason: format!("bad frame sentinel {start:#010x}"),
        });
    }

    let mut key_bytes = [0u8; ViewStampKey::ENCODED_LEN];
    key_bytes.copy_from_slice(&data[4..4 + ViewStampKey::ENCODED_LEN]);
    let key = ViewStampKey::from_bytes(key_bytes);

    let length = read_u32(&data[HEADER_SIZE - 4..HEADER_SIZE]) as usize;
    if length > MAX_VALUE_SIZE {
        return Err(StoreError::Corrupted {
            offset,
            reason: format!("declared length {length} exceeds frame limit"),
        });
    }

    let total = FRAME_OVERHEAD + length;
    if data.len() < total {
        return Ok(FrameRead::Truncated);
    }

    let crc_offset = HEADER_SIZE + length;
    let stored = read_u32(&data[crc_offset..crc_offset + 4]);
    let computed = crc32fast::hash(&data[..crc_offset]);
    if stored != computed {
        return Err(StoreError::Corrupted {
            offset,
            reason: format!("crc mismatch for {key}: stored {stored:#010x}, computed {computed:#010x}"),
        });
    }

    Ok(FrameRead::Frame {
        key,
        value: data.slice(HEADER_SIZE..crc_offset),
        len: total,
    })
}

/// Returns the full frame length declared by the header at the start of
/// `data`, or `None` if the header is incomplete or the length is invalid.
pub(crate) fn declared_len(data: &[u8]) -> Option<usize> {
    if data.len() < HEADER_SIZE {
        return None;
    }
    let length = read_u32(&data[HEADER_SIZE - 4..HEADER_SIZE]) as usize;
    (length <= MAX_VALUE_SIZE).then_some(FRAME_OVERHEAD + length)
}

fn read_u32(bytes: &[u8]) -> u32 {
    let mut buf = [0u8; 4];
    buf.copy_from_slice(bytes);
    u32::from_le_bytes(buf)
}
