#![allow(missing_docs)]

use std::sync::atomic::Ordering;
use std::sync::Arc;

use idpool::{
    engine::{Allocation, Backend, BackendOptions, CounterMetrics, PoolKind, REASON_RESTORE_FAILED},
    ipam::IpamKind,
    numeric::NumericKind,
    storage::{MemoryStorage, Storage},
    types::{
        get_condition, Claim, ClaimKind, ClaimSpec, Entry, EntryValue, IdSpace, IpIndex,
        IpIndexPrefix, NsName, NumericIndex, PoolObject, PrefixType, CONDITION_READY,
    },
    PoolError,
};
use ipnet::IpNet;

fn net(s: &str) -> IpNet {
    s.parse().unwrap()
}

/// Stores that outlive any single backend, standing in for the API server.
#[derive(Clone, Default)]
struct Stores {
    entries: Arc<MemoryStorage<Entry>>,
    claims: Arc<MemoryStorage<Claim>>,
}

impl Stores {
    fn backend<K: PoolKind>(&self) -> Backend<K> {
        Backend::open(BackendOptions::new(
            self.entries.clone(),
            self.claims.clone(),
        ))
    }

    fn submit<K: PoolKind>(
        &self,
        backend: &Backend<K>,
        name: &str,
        spec: ClaimSpec,
    ) -> idpool::Result<Allocation> {
        let mut claim = Claim::new("default", name, spec);
        self.claims.apply(claim.clone(), "test")?;
        backend.claim(&mut claim)
    }

    fn release<K: PoolKind>(&self, backend: &Backend<K>, name: &str) {
        let key = NsName::new("default", name);
        let claim = self.claims.get(&key).unwrap().expect("claim stored");
        backend.release(&claim).unwrap();
        self.claims.delete(&key).unwrap();
    }
}

fn vlan_pool() -> NumericIndex {
    NumericIndex::new("default", "vlan", IdSpace::Vlan, Some(100), Some(200))
}

fn lab_pool() -> IpIndex {
    IpIndex::new(
        "default",
        "lab",
        vec![IpIndexPrefix::new(net("10.0.0.0/24"), PrefixType::Network)],
    )
}

#[test]
fn numeric_restart_keeps_dynamic_ids() {
    let stores = Stores::default();
    let spec = || ClaimSpec::new("vlan", ClaimKind::DynamicId);
    {
        let backend = stores.backend::<NumericKind>();
        backend.create_index(&mut vlan_pool()).unwrap();
        for name in ["a", "b", "c"] {
            stores.submit(&backend, name, spec()).unwrap();
        }
        stores.release(&backend, "b");
    }

    let backend = stores.backend::<NumericKind>();
    let mut pool = vlan_pool();
    let report = backend.create_index(&mut pool).unwrap();
    // two boundary claims plus a and c
    assert_eq!(report.replayed, 4);
    assert!(report.orphaned.is_empty());

    assert_eq!(
        stores.submit(&backend, "a", spec()).unwrap(),
        Allocation::Id(100)
    );
    assert_eq!(
        stores.submit(&backend, "c", spec()).unwrap(),
        Allocation::Id(102)
    );
    assert_eq!(
        stores.submit(&backend, "d", spec()).unwrap(),
        Allocation::Id(101)
    );
}

fn entry_values<K: PoolKind>(backend: &Backend<K>, pool: &NsName) -> Vec<(String, EntryValue)> {
    let mut values: Vec<(String, EntryValue)> = backend
        .snapshot_entries(pool)
        .unwrap()
        .into_iter()
        .map(|entry| {
            let value = entry.value().unwrap();
            (entry.meta.name, value)
        })
        .collect();
    values.sort_by(|a, b| a.0.cmp(&b.0));
    values
}

#[test]
fn restart_after_shrink_keeps_held_ids() {
    let stores = Stores::default();
    let mut shrunk = NumericIndex::new("default", "vlan", IdSpace::Vlan, Some(100), Some(150));
    {
        let backend = stores.backend::<NumericKind>();
        backend.create_index(&mut vlan_pool()).unwrap();
        stores
            .submit(&backend, "a", ClaimSpec::new("vlan", ClaimKind::StaticId).id(180))
            .unwrap();
        stores
            .submit(&backend, "b", ClaimSpec::new("vlan", ClaimKind::DynamicId))
            .unwrap();
        backend.create_index(&mut shrunk).unwrap();
    }

    let backend = stores.backend::<NumericKind>();
    let report = backend.create_index(&mut shrunk).unwrap();
    // a, b and the two boundaries
    assert_eq!(report.replayed, 4);
    assert!(report.orphaned.is_empty());
    assert!(backend.is_initialized(&shrunk.meta.key()));
    assert!(backend.pending_diff(&shrunk.meta.key()).unwrap().is_empty());

    let names: Vec<String> = entry_values(&backend, &shrunk.meta.key())
        .into_iter()
        .map(|(name, _)| name)
        .collect();
    for expected in [
        "vlan.id.100",
        "vlan.id.180",
        "vlan.range.151-179",
        "vlan.range.181-4095",
    ] {
        assert!(names.contains(&expected.to_string()), "{names:?}");
    }

    let err = stores
        .submit(&backend, "c", ClaimSpec::new("vlan", ClaimKind::StaticId).id(170))
        .unwrap_err();
    assert!(matches!(err, PoolError::OutOfBounds { .. }), "{err}");
    assert_eq!(
        stores
            .submit(&backend, "b", ClaimSpec::new("vlan", ClaimKind::DynamicId))
            .unwrap(),
        Allocation::Id(100)
    );
}

#[test]
fn ipam_restart_restores_range_tables() {
    let stores = Stores::default();
    let range = "10.0.0.10-10.0.0.20";
    let ranged = || ClaimSpec::new("lab", ClaimKind::DynamicAddress).range(range);
    let pool_key = lab_pool().meta.key();
    let before = {
        let backend = stores.backend::<IpamKind>();
        backend.create_index(&mut lab_pool()).unwrap();
        stores
            .submit(&backend, "r", ClaimSpec::new("lab", ClaimKind::StaticRange).range(range))
            .unwrap();
        assert_eq!(
            stores.submit(&backend, "a", ranged()).unwrap(),
            Allocation::Address(net("10.0.0.10/32"))
        );
        stores
            .submit(
                &backend,
                "s",
                ClaimSpec::new("lab", ClaimKind::StaticAddress).address("10.0.0.15".parse().unwrap()),
            )
            .unwrap();
        assert_eq!(
            stores
                .submit(&backend, "n", ClaimSpec::new("lab", ClaimKind::DynamicAddress))
                .unwrap(),
            Allocation::Address(net("10.0.0.1/32"))
        );
        entry_values(&backend, &pool_key)
    };

    let backend = stores.backend::<IpamKind>();
    let report = backend.create_index(&mut lab_pool()).unwrap();
    assert!(report.orphaned.is_empty());
    assert_eq!(report.unmatched_claims, 0);
    assert_eq!(entry_values(&backend, &pool_key), before);
    assert!(backend.pending_diff(&pool_key).unwrap().is_empty());

    assert_eq!(
        stores.submit(&backend, "a", ranged()).unwrap(),
        Allocation::Address(net("10.0.0.10/32"))
    );
    assert_eq!(
        stores.submit(&backend, "b", ranged()).unwrap(),
        Allocation::Address(net("10.0.0.11/32"))
    );
    let err = stores
        .submit(
            &backend,
            "x",
            ClaimSpec::new("lab", ClaimKind::StaticAddress).address("10.0.0.15".parse().unwrap()),
        )
        .unwrap_err();
    assert!(matches!(err, PoolError::OwnerMismatch { .. }), "{err}");
}

#[test]
fn restoring_twice_yields_the_same_entries() {
    let stores = Stores::default();
    let pool_key = vlan_pool().meta.key();
    {
        let backend = stores.backend::<NumericKind>();
        backend.create_index(&mut vlan_pool()).unwrap();
        for name in ["a", "b", "c"] {
            stores
                .submit(&backend, name, ClaimSpec::new("vlan", ClaimKind::DynamicId))
                .unwrap();
        }
        stores
            .submit(&backend, "s", ClaimSpec::new("vlan", ClaimKind::StaticId).id(150))
            .unwrap();
        stores
            .submit(&backend, "r", ClaimSpec::new("vlan", ClaimKind::IdRange).range("160-170"))
            .unwrap();
        stores.release(&backend, "b");
    }

    let first = stores.backend::<NumericKind>();
    first.create_index(&mut vlan_pool()).unwrap();
    let second = stores.backend::<NumericKind>();
    second.create_index(&mut vlan_pool()).unwrap();

    let once = entry_values(&first, &pool_key);
    assert_eq!(once, entry_values(&second, &pool_key));
    assert!(once
        .iter()
        .any(|(_, value)| *value == EntryValue::IdRange(160, 170)));
    assert!(once.iter().any(|(_, value)| *value == EntryValue::Id(150)));
    assert!(second.pending_diff(&pool_key).unwrap().is_empty());
}

#[test]
fn ipam_restart_replays_address_hints() {
    let stores = Stores::default();
    let spec = || ClaimSpec::new("lab", ClaimKind::DynamicAddress);
    {
        let backend = stores.backend::<IpamKind>();
        backend.create_index(&mut lab_pool()).unwrap();
        for name in ["a", "b", "c"] {
            stores.submit(&backend, name, spec()).unwrap();
        }
        stores.release(&backend, "a");
    }

    let backend = stores.backend::<IpamKind>();
    backend.create_index(&mut lab_pool()).unwrap();
    assert_eq!(
        stores.submit(&backend, "b", spec()).unwrap(),
        Allocation::Address(net("10.0.0.2/32"))
    );
    assert_eq!(
        stores.submit(&backend, "c", spec()).unwrap(),
        Allocation::Address(net("10.0.0.3/32"))
    );
    assert_eq!(
        stores.submit(&backend, "d", spec()).unwrap(),
        Allocation::Address(net("10.0.0.1/32"))
    );
}

#[test]
fn failed_restore_leaves_pool_uninitialized() {
    let stores = Stores::default();
    {
        let backend = stores.backend::<IpamKind>();
        backend.create_index(&mut lab_pool()).unwrap();
    }

    // an address persisted outside every prefix the pool declares
    let bad = Claim::new(
        "default",
        "bad",
        ClaimSpec::new("lab", ClaimKind::StaticAddress).address("10.9.0.5".parse().unwrap()),
    );
    stores.claims.apply(bad.clone(), "test").unwrap();
    let entry = Entry::from_allocation(
        &NsName::new("default", "lab"),
        None,
        EntryValue::Prefix(net("10.9.0.5/32")),
        &bad.allocation_labels(),
    )
    .unwrap();
    stores.entries.apply(entry, "test").unwrap();

    let metrics = Arc::new(CounterMetrics::default());
    let backend = Backend::<IpamKind>::open(
        BackendOptions::new(stores.entries.clone(), stores.claims.clone())
            .metrics(metrics.clone()),
    );
    let mut pool = lab_pool();
    let err = backend.create_index(&mut pool).unwrap_err();
    match &err {
        PoolError::Restore { claim, source, .. } => {
            assert_eq!(claim, "default/bad");
            assert!(matches!(**source, PoolError::NoParent(_)), "{source}");
        }
        other => panic!("expected restore error, got {other}"),
    }

    let ready = get_condition(pool.conditions(), CONDITION_READY).expect("ready condition");
    assert!(!ready.status);
    assert_eq!(ready.reason, REASON_RESTORE_FAILED);
    assert!(!backend.is_initialized(&pool.meta.key()));
    assert_eq!(metrics.restores_failed.load(Ordering::Relaxed), 1);

    let err = stores
        .submit(&backend, "a", ClaimSpec::new("lab", ClaimKind::DynamicAddress))
        .unwrap_err();
    assert!(matches!(err, PoolError::NotInitialized(_)), "{err}");
}

#[test]
fn orphaned_entries_are_reported_and_removed() {
    let stores = Stores::default();
    {
        let backend = stores.backend::<NumericKind>();
        backend.create_index(&mut vlan_pool()).unwrap();
        stores
            .submit(&backend, "gone", ClaimSpec::new("vlan", ClaimKind::DynamicId))
            .unwrap();
    }
    // claim removed while no backend was running
    stores.claims.delete(&NsName::new("default", "gone")).unwrap();
    let orphan = NsName::new("default", "vlan.id.100");
    assert!(stores.entries.get(&orphan).unwrap().is_some());

    let backend = stores.backend::<NumericKind>();
    let report = backend.create_index(&mut vlan_pool()).unwrap();
    assert_eq!(report.orphaned, vec![orphan.clone()]);
    assert!(stores.entries.get(&orphan).unwrap().is_none());
    assert_eq!(
        stores
            .submit(&backend, "new", ClaimSpec::new("vlan", ClaimKind::DynamicId))
            .unwrap(),
        Allocation::Id(100)
    );
}
