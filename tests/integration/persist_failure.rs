#![allow(missing_docs)]

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use idpool::{
    engine::{Allocation, BackendOptions, CounterMetrics},
    storage::{MemoryStorage, Storage},
    types::{Claim, ClaimKind, ClaimSpec, Entry, IdSpace, NsName, NumericIndex, Selector},
    NumericBackend, PoolError, Result,
};

/// Entry store whose writes fail while `down` is set.
#[derive(Default)]
struct FlakyStorage {
    inner: MemoryStorage<Entry>,
    down: AtomicBool,
}

impl FlakyStorage {
    fn check(&self) -> Result<()> {
        if self.down.load(Ordering::SeqCst) {
            return Err(PoolError::Storage("entry store unavailable".into()));
        }
        Ok(())
    }
}

impl Storage<Entry> for FlakyStorage {
    fn get(&self, key: &NsName) -> Result<Option<Entry>> {
        self.inner.get(key)
    }

    fn list(&self, selector: &Selector) -> Result<Vec<Entry>> {
        self.inner.list(selector)
    }

    fn apply(&self, record: Entry, field_owner: &str) -> Result<Entry> {
        self.check()?;
        self.inner.apply(record, field_owner)
    }

    fn delete(&self, key: &NsName) -> Result<()> {
        self.check()?;
        self.inner.delete(key)
    }
}

#[test]
fn failed_persist_keeps_the_allocation_for_resubmission() {
    let entries = Arc::new(FlakyStorage::default());
    let claims = Arc::new(MemoryStorage::<Claim>::new());
    let metrics = Arc::new(CounterMetrics::default());
    let backend = NumericBackend::open(
        BackendOptions::new(entries.clone(), claims.clone()).metrics(metrics.clone()),
    );
    let mut pool = NumericIndex::new("default", "asn", IdSpace::As, Some(100), Some(200));
    backend.create_index(&mut pool).unwrap();
    let key = pool.meta.key();

    let mut claim = Claim::new(
        "default",
        "a",
        ClaimSpec::new("asn", ClaimKind::DynamicId),
    );
    claims.apply(claim.clone(), "test").unwrap();

    entries.down.store(true, Ordering::SeqCst);
    let err = backend.claim(&mut claim).unwrap_err();
    assert!(matches!(err, PoolError::Storage(_)), "{err}");
    assert_eq!(claim.status.id, None);
    assert_eq!(metrics.persists_failed.load(Ordering::Relaxed), 1);

    let pending = backend.pending_diff(&key).unwrap();
    assert_eq!(pending.upserts.len(), 1);
    assert_eq!(pending.upserts[0].meta.name, "asn.id.100");
    // the index kept the value for the same claim
    let other = Claim::new(
        "default",
        "b",
        ClaimSpec::new("asn", ClaimKind::StaticId).id(100),
    );
    claims.apply(other.clone(), "test").unwrap();
    let err = backend.claim(&mut other.clone()).unwrap_err();
    assert!(matches!(err, PoolError::OwnerMismatch { .. }), "{err}");

    entries.down.store(false, Ordering::SeqCst);
    assert_eq!(backend.claim(&mut claim).unwrap(), Allocation::Id(100));
    assert_eq!(claim.status.id, Some(100));
    assert!(backend.pending_diff(&key).unwrap().is_empty());
    assert!(entries
        .get(&NsName::new("default", "asn.id.100"))
        .unwrap()
        .is_some());
    assert_eq!(metrics.persists_failed.load(Ordering::Relaxed), 1);
}
