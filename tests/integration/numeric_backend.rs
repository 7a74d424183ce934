#![allow(missing_docs)]

use std::sync::Arc;

use idpool::{
    engine::{Allocation, Backend, BackendOptions},
    numeric::NumericKind,
    storage::{MemoryStorage, Storage},
    types::{
        get_condition, Claim, ClaimKind, ClaimSpec, Entry, IdSpace, NsName, NumericIndex,
        PoolObject, CONDITION_READY,
    },
    PoolError,
};

struct Fixture {
    backend: Backend<NumericKind>,
    entries: Arc<MemoryStorage<Entry>>,
    claims: Arc<MemoryStorage<Claim>>,
    pool: NumericIndex,
}

impl Fixture {
    fn new(min: u64, max: u64) -> Self {
        let entries = Arc::new(MemoryStorage::new());
        let claims = Arc::new(MemoryStorage::new());
        let backend = Backend::open(BackendOptions::new(entries.clone(), claims.clone()));
        let mut pool = NumericIndex::new("default", "asn", IdSpace::As, Some(min), Some(max));
        backend.create_index(&mut pool).expect("create pool");
        Self {
            backend,
            entries,
            claims,
            pool,
        }
    }

    // The resource layer persists the claim before handing it to the engine.
    fn submit(&self, name: &str, spec: ClaimSpec) -> idpool::Result<Allocation> {
        let mut claim = Claim::new("default", name, spec);
        self.claims.apply(claim.clone(), "test")?;
        self.backend.claim(&mut claim)
    }

    fn release(&self, name: &str) {
        let key = NsName::new("default", name);
        let claim = self.claims.get(&key).unwrap().expect("claim stored");
        self.backend.release(&claim).unwrap();
        self.claims.delete(&key).unwrap();
    }

    fn entry_names(&self) -> Vec<String> {
        self.backend
            .snapshot_entries(&self.pool.meta.key())
            .unwrap()
            .into_iter()
            .map(|entry| entry.meta.name)
            .collect()
    }
}

fn static_id(id: u64) -> ClaimSpec {
    ClaimSpec::new("asn", ClaimKind::StaticId).id(id)
}

fn dynamic_id() -> ClaimSpec {
    ClaimSpec::new("asn", ClaimKind::DynamicId)
}

fn id_range(range: &str) -> ClaimSpec {
    ClaimSpec::new("asn", ClaimKind::IdRange).range(range)
}

#[test]
fn pool_is_ready_after_create() {
    let fx = Fixture::new(100, 200);
    let ready = get_condition(fx.pool.conditions(), CONDITION_READY).expect("ready condition");
    assert!(ready.status);
    assert!(fx.backend.is_initialized(&fx.pool.meta.key()));
    assert_eq!(
        fx.entry_names(),
        ["asn.range.0-99", "asn.range.201-4294967295"]
    );
}

#[test]
fn boundary_enforcement() {
    let fx = Fixture::new(100, 200);

    let err = fx.submit("low", static_id(50)).unwrap_err();
    assert!(matches!(err, PoolError::OutOfBounds { .. }), "{err}");
    let err = fx.submit("high", static_id(201)).unwrap_err();
    assert!(matches!(err, PoolError::OutOfBounds { .. }), "{err}");

    assert_eq!(fx.submit("s", static_id(150)).unwrap(), Allocation::Id(150));
    assert_eq!(fx.submit("d", dynamic_id()).unwrap(), Allocation::Id(100));

    assert_eq!(
        fx.submit("r", id_range("190-200")).unwrap(),
        Allocation::IdRange(190, 200)
    );
    let err = fx.submit("r2", id_range("195-210")).unwrap_err();
    assert!(matches!(err, PoolError::OutOfBounds { .. }), "{err}");
    let err = fx.submit("r3", id_range("140-160")).unwrap_err();
    assert!(matches!(err, PoolError::Overlap { .. }), "{err}");
}

#[test]
fn owner_mismatch_and_idempotent_reapply() {
    let fx = Fixture::new(100, 200);
    assert_eq!(fx.submit("a", static_id(120)).unwrap(), Allocation::Id(120));
    assert_eq!(fx.submit("a", static_id(120)).unwrap(), Allocation::Id(120));
    let err = fx.submit("b", static_id(120)).unwrap_err();
    assert!(matches!(err, PoolError::OwnerMismatch { .. }), "{err}");
    assert!(err.to_string().contains("default/a"), "{err}");
}

#[test]
fn changing_a_static_id_moves_the_allocation() {
    let fx = Fixture::new(100, 200);
    fx.submit("a", static_id(120)).unwrap();
    fx.submit("a", static_id(130)).unwrap();
    let names = fx.entry_names();
    assert!(names.contains(&"asn.id.130".to_string()), "{names:?}");
    assert!(!names.contains(&"asn.id.120".to_string()), "{names:?}");
}

#[test]
fn released_ids_are_refilled_lowest_first() {
    let fx = Fixture::new(100, 200);
    assert_eq!(fx.submit("a", dynamic_id()).unwrap(), Allocation::Id(100));
    assert_eq!(fx.submit("b", dynamic_id()).unwrap(), Allocation::Id(101));
    fx.release("a");
    assert_eq!(fx.submit("c", dynamic_id()).unwrap(), Allocation::Id(100));
}

#[test]
fn exhaustion_is_an_error() {
    let fx = Fixture::new(10, 11);
    fx.submit("a", dynamic_id()).unwrap();
    fx.submit("b", dynamic_id()).unwrap();
    let err = fx.submit("c", dynamic_id()).unwrap_err();
    assert!(matches!(err, PoolError::Exhausted(_)), "{err}");
}

#[test]
fn claim_status_carries_the_allocation() {
    let fx = Fixture::new(100, 200);
    let mut claim = Claim::new("default", "a", dynamic_id());
    fx.claims.apply(claim.clone(), "test").unwrap();
    fx.backend.claim(&mut claim).unwrap();
    assert_eq!(claim.status.id, Some(100));
    assert!(get_condition(&claim.status.conditions, CONDITION_READY).is_some_and(|c| c.status));
}

#[test]
fn save_all_round_trip_converges() {
    let fx = Fixture::new(100, 200);
    fx.submit("a", dynamic_id()).unwrap();
    fx.submit("r", id_range("150-159")).unwrap();
    let key = fx.pool.meta.key();
    assert!(fx.backend.pending_diff(&key).unwrap().is_empty());

    let persisted: Vec<String> = fx
        .entries
        .list(&idpool::types::Selector::pool("default", "asn"))
        .unwrap()
        .into_iter()
        .map(|entry| entry.meta.name)
        .collect();
    let mut computed = fx.entry_names();
    computed.sort();
    let mut persisted = persisted;
    persisted.sort();
    assert_eq!(computed, persisted);
}

#[test]
fn shrinking_the_pool_does_not_evict() {
    let mut fx = Fixture::new(100, 200);
    fx.submit("a", static_id(180)).unwrap();

    let mut shrunk = NumericIndex::new("default", "asn", IdSpace::As, Some(100), Some(150));
    fx.backend.create_index(&mut shrunk).unwrap();
    fx.pool = shrunk;

    assert_eq!(
        fx.entry_names(),
        [
            "asn.range.0-99",
            "asn.range.151-179",
            "asn.id.180",
            "asn.range.181-4294967295"
        ]
    );
    let err = fx.submit("b", static_id(170)).unwrap_err();
    assert!(matches!(err, PoolError::OutOfBounds { .. }), "{err}");
    // live submissions are held to the new bounds, even by the holder
    let err = fx.submit("a", static_id(180)).unwrap_err();
    assert!(matches!(err, PoolError::OutOfBounds { .. }), "{err}");
    assert!(fx.entry_names().contains(&"asn.id.180".to_string()));

    fx.release("a");
    assert_eq!(
        fx.entry_names(),
        ["asn.range.0-99", "asn.range.151-179", "asn.range.181-4294967295"]
    );
    let err = fx.submit("c", static_id(180)).unwrap_err();
    assert!(matches!(err, PoolError::OutOfBounds { .. }), "{err}");
}

#[test]
fn claims_against_unknown_pools_fail() {
    let fx = Fixture::new(100, 200);
    let err = fx
        .submit("x", ClaimSpec::new("missing", ClaimKind::DynamicId))
        .unwrap_err();
    assert!(matches!(err, PoolError::PoolNotFound(_)), "{err}");
}

#[test]
fn delete_index_drops_entries_and_boundaries() {
    let fx = Fixture::new(100, 200);
    fx.submit("a", dynamic_id()).unwrap();
    fx.backend.delete_index(&fx.pool).unwrap();
    assert!(fx.entries.is_empty());
    assert!(!fx.backend.is_initialized(&fx.pool.meta.key()));
    // the user claim is left to the resource layer
    assert_eq!(fx.claims.len(), 1);
}
