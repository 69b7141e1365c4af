//! File-backed record store.
//!
//! # File Layout
//!
//! ```text
//! {data_dir}/
//! └── records.log   <- append-only sequence of frames (see `frame`)
//! ```
//!
//! Every `put` appends one frame and calls `sync_data` before returning.
//! A later frame for the same key supersedes an earlier one; the index
//! always points at the newest frame.
//!
//! # Recovery
//!
//! `open` scans the log front to back and rebuilds the key index. A frame
//! cut short by a crash at the tail of the file (a torn write) is truncated
//! away. A damaged frame anywhere else is reported as corruption.

use std::collections::BTreeMap;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use bytes::Bytes;
use tracing::{debug, info, warn};
use viewstamp_types::ViewStampKey;

use crate::frame::{self, FrameRead};
use crate::{RecordRange, RecordStore, StoreError};

const LOG_FILENAME: &str = "records.log";

#[derive(Debug, Clone, Copy)]
struct FrameLocation {
    offset: u64,
    len: usize,
}

#[derive(Debug)]
struct Inner {
    file: File,
    len: u64,
    index: BTreeMap<ViewStampKey, FrameLocation>,
}

/// A durable [`RecordStore`] backed by a single append-only file.
#[derive(Debug)]
pub struct FileStore {
    path: PathBuf,
    inner: Mutex<Inner>,
}

impl FileStore {
    /// Opens (or creates) the store in `dir`, recovering its index.
    pub fn open(dir: impl AsRef<Path>) -> Result<Self, StoreError> {
        let dir = dir.as_ref();
        fs::create_dir_all(dir)?;
        let path = dir.join(LOG_FILENAME);

        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)?;

        let mut raw = Vec::new();
        file.read_to_end(&mut raw)?;
        let data = Bytes::from(raw);

        let (index, valid_len) = scan(&data)?;
        if valid_len < data.len() as u64 {
            warn!(
                path = %path.display(),
                discarded = data.len() as u64 - valid_len,
                "truncating torn write at tail of record log"
            );
            file.set_len(valid_len)?;
            file.sync_all()?;
        }

        info!(path = %path.display(), records = index.len(), "opened record store");

        Ok(Self {
            path,
            inner: Mutex::new(Inner {
                file,
                len: valid_len,
                index,
            }),
        })
    }

    /// Path of the underlying log file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Number of distinct keys in the store.
    pub fn len(&self) -> usize {
        self.inner.lock().expect("lock poisoned").index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl RecordStore for FileStore {
    fn put(&self, key: ViewStampKey, value: Bytes) -> Result<(), StoreError> {
        let encoded = frame::encode(key, &value)?;

        let mut guard = self.inner.lock().expect("lock poisoned");
        let inner = &mut *guard;
        let offset = inner.len;

        if let Err(e) = append(&mut inner.file, offset, &encoded) {
            // Drop whatever part of the frame reached the file so the next
            // append starts on a frame boundary.
            if let Err(truncate_err) = inner.file.set_len(offset) {
                warn!(error = %truncate_err, offset, "failed to discard partial frame");
            }
            return Err(e.into());
        }

        inner.len += encoded.len() as u64;
        inner.index.insert(
            key,
            FrameLocation {
                offset,
                len: encoded.len(),
            },
        );

        debug!(%key, offset, bytes = value.len(), "record persisted");
        Ok(())
    }

    fn get(&self, key: ViewStampKey) -> Result<Bytes, StoreError> {
        let mut guard = self.inner.lock().expect("lock poisoned");
        let inner = &mut *guard;
        let location = *inner.index.get(&key).ok_or(StoreError::NotFound(key))?;
        read_value(&mut inner.file, location)
    }

    fn range(&self, start: ViewStampKey, end: ViewStampKey) -> Result<RecordRange, StoreError> {
        if start > end {
            return Ok(Vec::new().into_iter());
        }

        let mut guard = self.inner.lock().expect("lock poisoned");
        let inner = &mut *guard;

        let mut records = Vec::new();
        for (key, location) in inner.index.range(start..=end) {
            records.push((*key, read_value(&mut inner.file, *location)?));
        }
        Ok(records.into_iter())
    }

    fn last_key(&self) -> Result<Option<ViewStampKey>, StoreError> {
        Ok(self
            .inner
            .lock()
            .expect("lock poisoned")
            .index
            .keys()
            .next_back()
            .copied())
    }
}

fn append(file: &mut File, offset: u64, frame: &[u8]) -> io::Result<()> {
    file.seek(SeekFrom::Start(offset))?;
    file.write_all(frame)?;
    file.sync_data()
}

fn read_value(file: &mut File, location: FrameLocation) -> Result<Bytes, StoreError> {
    let mut buf = vec![0u8; location.len];
    file.seek(SeekFrom::Start(location.offset))?;
    file.read_exact(&mut buf)?;

    match frame::decode(&Bytes::from(buf), location.offset)? {
        FrameRead::Frame { value, .. } => Ok(value),
        FrameRead::Truncated => Err(StoreError::Corrupted {
            offset: location.offset,
            reason: "indexed frame is shorter than recorded".to_string(),
        }),
    }
}

/// Rebuilds the index from raw log bytes.
///
/// Returns the index and the length of the valid prefix of `data`.
fn scan(data: &Bytes) -> Result<(BTreeMap<ViewStampKey, FrameLocation>, u64), StoreError> {
    let mut index = BTreeMap::new();
    let mut offset = 0usize;

    while offset < data.len() {
        let rest = data.slice(offset..);
        match frame::decode(&rest, offset as u64) {
            Ok(FrameRead::Frame { key, len, .. }) => {
                index.insert(
                    key,
                    FrameLocation {
                        offset: offset as u64,
                        len,
                    },
                );
                offset += len;
            }
            Ok(FrameRead::Truncated) => break,
            Err(StoreError::Corrupted { .. })
                if frame::declared_len(&rest).is_some_and(|len| offset + len >= data.len()) =>
            {
                // Last frame failed its checksum: a torn write.
                break;
            }
            Err(e) => return Err(e),
        }
    }

    Ok((index, offset as u64))
}
