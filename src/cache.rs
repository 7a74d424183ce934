//! Per-pool cache instances and the registry that owns them.

use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use rustc_hash::FxHashMap;

use crate::types::NsName;

/// Live index of one pool plus its bookkeeping.
pub struct CacheInstance<P, T> {
    pool: P,
    table: T,
    initialized: bool,
}

impl<P, T> CacheInstance<P, T> {
    /// Uninitialized instance over `table`.
    pub fn new(pool: P, table: T) -> Self {
        Self {
            pool,
            table,
            initialized: false,
        }
    }

    /// Pool snapshot the instance validates against.
    pub fn pool(&self) -> &P {
        &self.pool
    }

    /// Replaces the pool snapshot, leaving the table untouched.
    pub fn set_pool(&mut self, pool: P) {
        self.pool = pool;
    }

    /// Index structure.
    pub fn table(&self) -> &T {
        &self.table
    }

    /// Mutable index structure.
    pub fn table_mut(&mut self) -> &mut T {
        &mut self.table
    }

    /// Pool snapshot and mutable table at once.
    pub fn parts_mut(&mut self) -> (&P, &mut T) {
        (&self.pool, &mut self.table)
    }

    /// Swaps in a fresh table and clears the initialized flag.
    pub fn reset(&mut self, table: T) {
        self.table = table;
        self.initialized = false;
    }

    /// Whether restore completed for this instance.
    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    /// Marks restore as completed.
    pub fn mark_initialized(&mut self) {
        self.initialized = true;
    }
}

/// Shared handle to one cache instance.
pub type CacheHandle<P, T> = Arc<Mutex<CacheInstance<P, T>>>;

/// Process-wide map from pool key to cache instance.
pub struct CacheRegistry<P, T> {
    instances: RwLock<FxHashMap<NsName, CacheHandle<P, T>>>,
}

impl<P, T> Default for CacheRegistry<P, T> {
    fn default() -> Self {
        Self {
            instances: RwLock::new(FxHashMap::default()),
        }
    }
}

impl<P, T> CacheRegistry<P, T> {
    /// Empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Instance for `key`, if one was created.
    pub fn get(&self, key: &NsName) -> Option<CacheHandle<P, T>> {
        self.instances.read().get(key).cloned()
    }

    /// Instance for `key`, created with `init` on first reference.
    pub fn get_or_create<F>(&self, key: &NsName, init: F) -> CacheHandle<P, T>
    where
        F: FnOnce() -> CacheInstance<P, T>,
    {
        if let Some(existing) = self.get(key) {
            return existing;
        }
        let mut instances = self.instances.write();
        Arc::clone(
            instances
                .entry(key.clone())
                .or_insert_with(|| Arc::new(Mutex::new(init()))),
        )
    }

    /// Destroys the instance for `key`.
    pub fn remove(&self, key: &NsName) -> bool {
        self.instances.write().remove(key).is_some()
    }

    /// Whether an instance exists for `key`.
    pub fn contains(&self, key: &NsName) -> bool {
        self.instances.read().contains_key(key)
    }

    /// Keys of every live instance, sorted.
    pub fn keys(&self) -> Vec<NsName> {
        let mut keys: Vec<NsName> = self.instances.read().keys().cloned().collect();
        keys.sort();
        keys
    }
}
