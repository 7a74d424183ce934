use std::collections::BTreeMap;

use parking_lot::RwLock;

use crate::error::Result;
use crate::types::{NsName, Selector};

use super::{Record, Storage};

struct Inner<R> {
    records: BTreeMap<NsName, R>,
    version: u64,
}

/// In-process storage backed by an ordered map.
pub struct MemoryStorage<R> {
    inner: RwLock<Inner<R>>,
}

impl<R: Record> Default for MemoryStorage<R> {
    fn default() -> Self {
        Self {
            inner: RwLock::new(Inner {
                records: BTreeMap::new(),
                version: 0,
            }),
        }
    }
}

impl<R: Record> MemoryStorage<R> {
    /// Empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Store seeded with `records`, keeping their metadata as is.
    pub fn with_records(records: impl IntoIterator<Item = R>) -> Self {
        let mut inner = Inner {
            records: BTreeMap::new(),
            version: 0,
        };
        for record in records {
            inner.version = inner.version.max(record.meta().resource_version);
            inner.records.insert(record.key(), record);
        }
        Self {
            inner: RwLock::new(inner),
        }
    }

    /// Number of stored records.
    pub fn len(&self) -> usize {
        self.inner.read().records.len()
    }

    /// Whether the store is empty.
    pub fn is_empty(&self) -> bool {
        self.inner.read().records.is_empty()
    }
}

impl<R: Record> Storage<R> for MemoryStorage<R> {
    fn get(&self, key: &NsName) -> Result<Option<R>> {
        Ok(self.inner.read().records.get(key).cloned())
    }

    fn list(&self, selector: &Selector) -> Result<Vec<R>> {
        Ok(self
            .inner
            .read()
            .records
            .values()
            .filter(|record| selector.matches(*record))
            .cloned()
            .collect())
    }

    fn apply(&self, mut record: R, field_owner: &str) -> Result<R> {
        let mut inner = self.inner.write();
        inner.version += 1;
        let meta = record.meta_mut();
        meta.resource_version = inner.version;
        meta.managed_by = Some(field_owner.to_string());
        inner.records.insert(record.key(), record.clone());
        Ok(record)
    }

    fn delete(&self, key: &NsName) -> Result<()> {
        self.inner.write().records.remove(key);
        Ok(())
    }
}
