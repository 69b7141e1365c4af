//! In-memory record store.

use std::collections::BTreeMap;
use std::sync::RwLock;

use bytes::Bytes;
use viewstamp_types::ViewStampKey;

use crate::{RecordRange, RecordStore, StoreError};

/// A [`RecordStore`] held entirely in memory.
///
/// Nothing survives a restart; `put` is "durable" as soon as it returns.
#[derive(Debug, Default)]
pub struct MemoryStore {
    records: RwLock<BTreeMap<ViewStampKey, Bytes>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of stored records.
    pub fn len(&self) -> usize {
        self.records.read().expect("lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl RecordStore for MemoryStore {
    fn put(&self, key: ViewStampKey, value: Bytes) -> Result<(), StoreError> {
        self.records
            .write()
            .expect("lock poisoned")
            .insert(key, value);
        Ok(())
    }

    fn get(&self, key: ViewStampKey) -> Result<Bytes, StoreError> {
        self.records
            .read()
            .expect("lock poisoned")
            .get(&key)
            .cloned()
            .ok_or(StoreError::NotFound(key))
    }

    fn range(&self, start: ViewStampKey, end: ViewStampKey) -> Result<RecordRange, StoreError> {
        if start > end {
            return Ok(Vec::new().into_iter());
        }
        let records = self.records.read().expect("lock poisoned");
        let found: Vec<_> = records
            .range(start..=end)
            .map(|(k, v)| (*k, v.clone()))
            .collect();
        Ok(found.into_iter())
    }

    fn last_key(&self) -> Result<Option<ViewStampKey>, StoreError> {
        Ok(self
            .records
            .read()
            .expect("lock poisoned")
            .keys()
            .next_back()
            .copied())
    }
}
