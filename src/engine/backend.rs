use std::marker::PhantomData;
use std::sync::Arc;

use parking_lot::RwLock;
use rustc_hash::FxHashSet;
use tracing::{debug, error, info, warn};

use crate::cache::{CacheHandle, CacheInstance, CacheRegistry};
use crate::error::{PoolError, Result};
use crate::storage::Storage;
use crate::types::{Claim, Condition, Entry, NsName, OwnerKind, PoolObject, Record, Selector};

use super::metrics::{default_metrics, EngineMetrics};
use super::restore::{self, RestoreReport};
use super::save::{self, EntryDiff};
use super::{Allocation, Applicator, Mode, PoolKind};

/// Field owner recorded on records written by the engine.
pub const DEFAULT_FIELD_OWNER: &str = "idpool-engine";

/// Reason set on the `Ready` condition when restore fails.
pub const REASON_RESTORE_FAILED: &str = "RestoreFailed";

/// Collaborators and settings of a [`Backend`].
#[derive(Clone)]
pub struct BackendOptions {
    /// Entry storage.
    pub entries: Arc<dyn Storage<Entry>>,
    /// Claim storage.
    pub claims: Arc<dyn Storage<Claim>>,
    /// Field owner passed to every storage apply.
    pub field_owner: String,
    /// Optional metrics sink.
    pub metrics: Option<Arc<dyn EngineMetrics>>,
}

impl BackendOptions {
    /// Options over the given stores with default settings.
    pub fn new(entries: Arc<dyn Storage<Entry>>, claims: Arc<dyn Storage<Claim>>) -> Self {
        Self {
            entries,
            claims,
            field_owner: DEFAULT_FIELD_OWNER.to_string(),
            metrics: None,
        }
    }

    /// Sets the field owner.
    pub fn field_owner(mut self, owner: impl Into<String>) -> Self {
        self.field_owner = owner.into();
        self
    }

    /// Sets the metrics sink.
    pub fn metrics(mut self, metrics: Arc<dyn EngineMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }
}

type Cache<K> = CacheInstance<<K as PoolKind>::Pool, <K as PoolKind>::Table>;

/// Claim allocation backend for one pool kind.
///
/// Every operation takes the backend-wide lock in write mode, so claims
/// across all pools of the kind are serialized. Read helpers take it in read
/// mode.
pub struct Backend<K: PoolKind> {
    lock: RwLock<()>,
    caches: CacheRegistry<K::Pool, K::Table>,
    entries: Arc<dyn Storage<Entry>>,
    claims: Arc<dyn Storage<Claim>>,
    field_owner: String,
    metrics: Arc<dyn EngineMetrics>,
    _kind: PhantomData<K>,
}

impl<K: PoolKind> Backend<K> {
    /// Builds a backend with no pools.
    pub fn open(options: BackendOptions) -> Self {
        Self {
            lock: RwLock::new(()),
            caches: CacheRegistry::new(),
            entries: options.entries,
            claims: options.claims,
            field_owner: options.field_owner,
            metrics: options.metrics.unwrap_or_else(default_metrics),
            _kind: PhantomData,
        }
    }

    /// Creates or refreshes the cache instance of `pool`.
    ///
    /// A pool seen for the first time is restored from persisted claims and
    /// entries. A pool that is already initialized only gets its bounds and
    /// synthesized claims refreshed. The `Ready` condition of `pool` reflects
    /// the outcome; on failure the instance stays uninitialized.
    pub fn create_index(&self, pool: &mut K::Pool) -> Result<RestoreReport> {
        pool.validate_syntax()?;
        let _guard = self.lock.write();
        let key = pool.key();
        let handle = self
            .caches
            .get_or_create(&key, || CacheInstance::new(pool.clone(), K::new_table(pool)));
        let mut cache = handle.lock();
        cache.set_pool(pool.clone());

        if cache.is_initialized() {
            self.sync_pool_claims(&key, &mut cache)?;
            self.save_all(&key, cache.table())?;
            pool.set_condition(Condition::ready());
            debug!(pool = %key, backend = K::NAME, "engine.pool.refreshed");
            return Ok(RestoreReport::default());
        }

        cache.reset(K::new_table(pool));
        match self.initialize(&key, &mut cache) {
            Ok(report) => {
                cache.mark_initialized();
                self.metrics.pool_restored(report.replayed);
                pool.set_condition(Condition::ready());
                info!(
                    pool = %key,
                    backend = K::NAME,
                    replayed = report.replayed,
                    orphaned = report.orphaned.len(),
                    "engine.pool.initialized"
                );
                Ok(report)
            }
            Err(err) => {
                cache.reset(K::new_table(pool));
                self.metrics.restore_failed();
                error!(pool = %key, backend = K::NAME, error = %err, "engine.pool.restore_failed");
                pool.set_condition(Condition::failed(REASON_RESTORE_FAILED, err.to_string()));
                Err(err)
            }
        }
    }

    fn initialize(&self, key: &NsName, cache: &mut Cache<K>) -> Result<RestoreReport> {
        let selector = Selector::pool(&key.namespace, &key.name);
        let entries = self.entries.list(&selector)?;
        let claims = self.claims.list(&selector)?;
        let report = {
            let (pool, table) = cache.parts_mut();
            restore::restore::<K>(pool, table, entries, claims)?
        };
        self.sync_pool_claims(key, cache)?;
        self.save_all(key, cache.table())?;
        Ok(report)
    }

    // Persists the claims synthesized from the pool bounds and applies them;
    // retires synthesized claims the pool no longer declares.
    fn sync_pool_claims(&self, key: &NsName, cache: &mut Cache<K>) -> Result<()> {
        let declared = cache.pool().pool_claims();
        let names: FxHashSet<&str> = declared.iter().map(|c| c.meta.name.as_str()).collect();
        let stale: Vec<Claim> = self
            .claims
            .list(&Selector::pool(&key.namespace, &key.name))?
            .into_iter()
            .filter(|claim| {
                claim.owner_kind() == OwnerKind::Index && !names.contains(claim.meta.name.as_str())
            })
            .collect();

        for claim in stale {
            let (pool, table) = cache.parts_mut();
            if !K::can_retire(table, &claim) {
                warn!(pool = %key, claim = %claim.key(), "engine.pool.retire_blocked");
                continue;
            }
            K::applicator(pool, &claim, Mode::Replay(None))?.delete(table)?;
            self.claims.delete(&claim.key())?;
            info!(pool = %key, claim = %claim.key(), "engine.pool.claim_retired");
        }

        for claim in declared {
            claim.validate_syntax()?;
            let (pool, table) = cache.parts_mut();
            let mut applicator = K::applicator(pool, &claim, Mode::Replay(None))?;
            applicator.validate(table)?;
            applicator.apply(table)?;
            self.claims.apply(claim, &self.field_owner)?;
        }
        Ok(())
    }

    /// Deletes the persisted entries and synthesized claims of `pool` and
    /// destroys its cache instance.
    pub fn delete_index(&self, pool: &K::Pool) -> Result<()> {
        let _guard = self.lock.write();
        let key = pool.key();
        let selector = Selector::pool(&key.namespace, &key.name);
        let entries = self.entries.list(&selector)?;
        for entry in &entries {
            self.entries.delete(&entry.key())?;
        }
        for claim in self.claims.list(&selector)? {
            if claim.owner_kind() == OwnerKind::Index {
                self.claims.delete(&claim.key())?;
            }
        }
        self.caches.remove(&key);
        info!(pool = %key, backend = K::NAME, entries = entries.len(), "engine.pool.deleted");
        Ok(())
    }

    /// Validates and applies `claim`, persists the resulting entries and
    /// writes the allocation into the claim status.
    pub fn claim(&self, claim: &mut Claim) -> Result<Allocation> {
        claim.validate_syntax()?;
        let _guard = self.lock.write();
        let key = claim.pool_key();
        let handle = self.instance(&key)?;
        let mut cache = handle.lock();
        Self::ensure_initialized(&key, &cache)?;

        let allocation = {
            let (pool, table) = cache.parts_mut();
            let mut applicator = K::applicator(pool, claim, Mode::Admit)?;
            if let Err(err) = applicator.validate(table) {
                self.metrics.claim_rejected();
                debug!(pool = %key, claim = %claim.key(), error = %err, "engine.claim.rejected");
                return Err(err);
            }
            applicator.apply(table)?
        };
        self.metrics.claim_applied();
        self.save_all(&key, cache.table())?;
        allocation.write_status(&mut claim.status);
        claim.set_ready();
        debug!(pool = %key, claim = %claim.key(), allocation = ?allocation, "engine.claim.applied");
        Ok(allocation)
    }

    /// Removes whatever `claim` holds and persists the resulting entries.
    pub fn release(&self, claim: &Claim) -> Result<()> {
        let _guard = self.lock.write();
        let key = claim.pool_key();
        let handle = self.instance(&key)?;
        let mut cache = handle.lock();
        Self::ensure_initialized(&key, &cache)?;
        {
            let (pool, table) = cache.parts_mut();
            K::applicator(pool, claim, Mode::Admit)?.delete(table)?;
        }
        self.metrics.claim_released();
        self.save_all(&key, cache.table())?;
        debug!(pool = %key, claim = %claim.key(), "engine.claim.released");
        Ok(())
    }

    /// Whether the pool has a restored cache instance.
    pub fn is_initialized(&self, key: &NsName) -> bool {
        let _guard = self.lock.read();
        self.caches
            .get(key)
            .is_some_and(|handle| handle.lock().is_initialized())
    }

    /// Keys of every pool with a cache instance.
    pub fn pools(&self) -> Vec<NsName> {
        self.caches.keys()
    }

    /// Entries implied by the current index of the pool.
    pub fn snapshot_entries(&self, key: &NsName) -> Result<Vec<Entry>> {
        let _guard = self.lock.read();
        let handle = self.instance(key)?;
        let cache = handle.lock();
        Self::ensure_initialized(key, &cache)?;
        K::entries(key, cache.table())
    }

    /// Writes `save_all` would perform right now; empty once storage has
    /// converged.
    pub fn pending_diff(&self, key: &NsName) -> Result<EntryDiff> {
        let _guard = self.lock.read();
        let handle = self.instance(key)?;
        let cache = handle.lock();
        Self::ensure_initialized(key, &cache)?;
        self.compute_diff(key, cache.table())
    }

    fn instance(&self, key: &NsName) -> Result<CacheHandle<K::Pool, K::Table>> {
        self.caches
            .get(key)
            .ok_or_else(|| PoolError::PoolNotFound(key.to_string()))
    }

    fn ensure_initialized(key: &NsName, cache: &Cache<K>) -> Result<()> {
        if cache.is_initialized() {
            Ok(())
        } else {
            Err(PoolError::NotInitialized(key.to_string()))
        }
    }

    fn compute_diff(&self, key: &NsName, table: &K::Table) -> Result<EntryDiff> {
        let computed = K::entries(key, table)?;
        let persisted = self
            .entries
            .list(&Selector::pool(&key.namespace, &key.name))?;
        Ok(save::diff_entries(computed, persisted))
    }

    // No rollback: a failure leaves the index ahead of storage until the
    // next successful save or a restore.
    fn save_all(&self, key: &NsName, table: &K::Table) -> Result<EntryDiff> {
        let result = self.compute_diff(key, table).and_then(|diff| {
            save::apply_diff(self.entries.as_ref(), &diff, &self.field_owner)?;
            Ok(diff)
        });
        match result {
            Ok(diff) => {
                self.metrics
                    .entries_persisted(diff.upserts.len(), diff.deletes.len());
                if !diff.is_empty() {
                    debug!(
                        pool = %key,
                        upserts = diff.upserts.len(),
                        deletes = diff.deletes.len(),
                        "engine.save_all.applied"
                    );
                }
                Ok(diff)
            }
            Err(err) => {
                self.metrics.persist_failed();
                error!(pool = %key, error = %err, "engine.save_all.failed");
                Err(err)
            }
        }
    }
}
