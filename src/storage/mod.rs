#![forbid(unsafe_code)]

//! Record storage collaborators used by the engine.
//!
//! The engine only lists records and upserts or deletes them by key. Two
//! implementations are provided: [`MemoryStorage`] for embedding and tests,
//! and [`FileStorage`], which keeps one checksummed JSON document per record
//! kind inside a state directory.

mod file;
mod memory;

use std::path::Path;
use std::sync::Arc;

use crate::error::Result;
use crate::types::{Claim, Entry, IpIndex, NsName, NumericIndex, Selector};

pub use crate::types::Record;

pub use file::FileStorage;
pub use memory::MemoryStorage;

/// Keyed store for one record kind.
pub trait Storage<R: Record>: Send + Sync {
    /// Fetches one record.
    fn get(&self, key: &NsName) -> Result<Option<R>>;

    /// Records matching `selector`, ordered by key.
    fn list(&self, selector: &Selector) -> Result<Vec<R>>;

    /// Create-or-replace keyed by name. Bumps the resource version and records
    /// `field_owner` as the manager of the record.
    fn apply(&self, record: R, field_owner: &str) -> Result<R>;

    /// Removes a record; deleting a missing key succeeds.
    fn delete(&self, key: &NsName) -> Result<()>;
}

impl<R: Record, S: Storage<R> + ?Sized> Storage<R> for Arc<S> {
    fn get(&self, key: &NsName) -> Result<Option<R>> {
        (**self).get(key)
    }

    fn list(&self, selector: &Selector) -> Result<Vec<R>> {
        (**self).list(selector)
    }

    fn apply(&self, record: R, field_owner: &str) -> Result<R> {
        (**self).apply(record, field_owner)
    }

    fn delete(&self, key: &NsName) -> Result<()> {
        (**self).delete(key)
    }
}

/// File stores of every record kind inside one state directory.
pub struct StateStores {
    /// IP pools.
    pub ip_indexes: Arc<FileStorage<IpIndex>>,
    /// Numeric pools.
    pub numeric_indexes: Arc<FileStorage<NumericIndex>>,
    /// Claims of both pool kinds.
    pub claims: Arc<FileStorage<Claim>>,
    /// Entries of both pool kinds.
    pub entries: Arc<FileStorage<Entry>>,
}

impl StateStores {
    /// Opens (creating when missing) every store under `dir`.
    pub fn open(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref();
        Ok(Self {
            ip_indexes: Arc::new(FileStorage::open(dir)?),
            numeric_indexes: Arc::new(FileStorage::open(dir)?),
            claims: Arc::new(FileStorage::open(dir)?),
            entries: Arc::new(FileStorage::open(dir)?),
        })
    }
}
