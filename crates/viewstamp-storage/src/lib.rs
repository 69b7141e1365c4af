//! # viewstamp-storage: Durable record store
//!
//! The consensus core persists one value per [`ViewStampKey`] and reads them
//! back in key order when delivering committed records. This crate defines
//! that contract ([`RecordStore`]) and two implementations:
//!
//! - [`MemoryStore`]: a `BTreeMap` behind a lock, for tests and demos
//! - [`FileStore`]: an append-only, CRC-framed log file that is `fsync`ed on
//!   every `put` and rebuilt into an index on open
//!
//! # Concurrency
//!
//! Stores take `&self` and synchronise internally. The submission path and
//! the accept loop call `put`/`get` concurrently; keys are unique per
//! stamp, so concurrent operations never contend on the same record.

use std::io;

use bytes::Bytes;
use thiserror::Error;
use viewstamp_types::ViewStampKey;

mod file;
mod frame;
mod memory;

pub use file::FileStore;
pub use frame::{FRAME_OVERHEAD, MAX_VALUE_SIZE};
pub use memory::MemoryStore;

/// Records returned by [`RecordStore::range`], ascending by key.
pub type RecordRange = std::vec::IntoIter<(ViewStampKey, Bytes)>;

/// Durable key/value contract used by the consensus core.
///
/// # Durability
///
/// `put` must not return `Ok` until the value would survive a crash. The
/// consensus core sends acknowledgments and exposes quorum decisions only
/// after `put` returns.
pub trait RecordStore: Send + Sync {
    /// Stores `value` under `key`, replacing any previous value.
    fn put(&self, key: ViewStampKey, value: Bytes) -> Result<(), StoreError>;

    /// Returns the value stored under `key`.
    ///
    /// # Errors
    ///
    /// [`StoreError::NotFound`] if no value was ever stored under `key`.
    fn get(&self, key: ViewStampKey) -> Result<Bytes, StoreError>;

    /// Returns every record with `start <= key <= end`, ascending.
    ///
    /// An inverted range yields no records.
    fn range(&self, start: ViewStampKey, end: ViewStampKey) -> Result<RecordRange, StoreError>;

    /// Returns the highest key in the store, if any.
    fn last_key(&self) -> Result<Option<ViewStampKey>, StoreError>;
}

/// Errors returned by record stores.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("no record stored under {0}")]
    NotFound(ViewStampKey),

    #[error("filesystem error")]
    Io(#[from] io::Error),

    #[error("corrupted frame at offset {offset}: {reason}")]
    Corrupted { offset: u64, reason: String },

    #[error("value of {len} bytes exceeds the frame limit of {max} bytes")]
    ValueTooLarge { len: usize, max: usize },
}

impl StoreError {
    /// Returns true if this error means the key is absent.
    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::NotFound(_))
    }
}
