//! Engine counters.
//!
//! The backend reports through [`EngineMetrics`]. [`NoopMetrics`] is the
//! default; [`CounterMetrics`] keeps atomic counts that callers can read
//! back.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Counters the backend reports as it serves claims.
pub trait EngineMetrics: Send + Sync {
    /// A claim was validated and applied.
    fn claim_applied(&self);

    /// A claim failed validation.
    fn claim_rejected(&self);

    /// A claim was released.
    fn claim_released(&self);

    /// A pool finished restore after replaying `claims` claims.
    fn pool_restored(&self, claims: usize);

    /// Restore of a pool failed.
    fn restore_failed(&self);

    /// `save_all` wrote `upserts` entries and deleted `deletes`.
    fn entries_persisted(&self, upserts: usize, deletes: usize);

    /// `save_all` hit a storage error.
    fn persist_failed(&self);
}

/// Discards every measurement.
#[derive(Default)]
pub struct NoopMetrics;

impl EngineMetrics for NoopMetrics {
    fn claim_applied(&self) {}
    fn claim_rejected(&self) {}
    fn claim_released(&self) {}
    fn pool_restored(&self, _claims: usize) {}
    fn restore_failed(&self) {}
    fn entries_persisted(&self, _upserts: usize, _deletes: usize) {}
    fn persist_failed(&self) {}
}

/// Atomic counters, safe to share across threads.
#[derive(Default)]
pub struct CounterMetrics {
    /// Claims applied.
    pub claims_applied: AtomicU64,
    /// Claims rejected by validation.
    pub claims_rejected: AtomicU64,
    /// Claims released.
    pub claims_released: AtomicU64,
    /// Pools restored.
    pub pools_restored: AtomicU64,
    /// Claims replayed across all restores.
    pub claims_replayed: AtomicU64,
    /// Failed restores.
    pub restores_failed: AtomicU64,
    /// Entries upserted by `save_all`.
    pub entries_upserted: AtomicU64,
    /// Entries deleted by `save_all`.
    pub entries_deleted: AtomicU64,
    /// `save_all` runs that hit a storage error.
    pub persists_failed: AtomicU64,
}

impl EngineMetrics for CounterMetrics {
    fn claim_applied(&self) {
        self.claims_applied.fetch_add(1, Ordering::Relaxed);
    }

    fn claim_rejected(&self) {
        self.claims_rejected.fetch_add(1, Ordering::Relaxed);
    }

    fn claim_released(&self) {
        self.claims_released.fetch_add(1, Ordering::Relaxed);
    }

    fn pool_restored(&self, claims: usize) {
        self.pools_restored.fetch_add(1, Ordering::Relaxed);
        self.claims_replayed
            .fetch_add(claims as u64, Ordering::Relaxed);
    }

    fn restore_failed(&self) {
        self.restores_failed.fetch_add(1, Ordering::Relaxed);
    }

    fn entries_persisted(&self, upserts: usize, deletes: usize) {
        self.entries_upserted
            .fetch_add(upserts as u64, Ordering::Relaxed);
        self.entries_deleted
            .fetch_add(deletes as u64, Ordering::Relaxed);
    }

    fn persist_failed(&self) {
        self.persists_failed.fetch_add(1, Ordering::Relaxed);
    }
}

/// [`NoopMetrics`] behind an [`Arc`].
pub fn default_metrics() -> Arc<dyn EngineMetrics> {
    Arc::new(NoopMetrics)
}
