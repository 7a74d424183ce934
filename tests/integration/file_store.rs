#![allow(missing_docs)]

use std::fs;

use idpool::{
    engine::{Allocation, BackendOptions},
    storage::{FileStorage, StateStores, Storage},
    types::{Claim, ClaimKind, ClaimSpec, Entry, IpIndex, IpIndexPrefix, NsName, PrefixType},
    IpamBackend, PoolError,
};
use ipnet::IpNet;
use tempfile::TempDir;

fn net(s: &str) -> IpNet {
    s.parse().unwrap()
}

fn lab_pool() -> IpIndex {
    IpIndex::new(
        "default",
        "lab",
        vec![IpIndexPrefix::new(net("10.0.0.0/24"), PrefixType::Network)],
    )
}

fn backend(stores: &StateStores) -> IpamBackend {
    IpamBackend::open(BackendOptions::new(
        stores.entries.clone(),
        stores.claims.clone(),
    ))
}

fn seed(dir: &TempDir) {
    let stores = StateStores::open(dir.path()).expect("open stores");
    let backend = backend(&stores);
    let mut pool = lab_pool();
    stores.ip_indexes.apply(pool.clone(), "test").unwrap();
    backend.create_index(&mut pool).unwrap();
    for name in ["a", "b"] {
        let mut claim = Claim::new(
            "default",
            name,
            ClaimSpec::new("lab", ClaimKind::DynamicAddress),
        );
        stores.claims.apply(claim.clone(), "test").unwrap();
        backend.claim(&mut claim).unwrap();
    }
}

#[test]
fn allocations_survive_a_process_restart() {
    let dir = TempDir::new().expect("tempdir");
    seed(&dir);

    let stores = StateStores::open(dir.path()).expect("reopen stores");
    let pools = stores
        .ip_indexes
        .list(&idpool::types::Selector::everything())
        .unwrap();
    assert_eq!(pools.len(), 1);
    let mut pool = pools.into_iter().next().unwrap();

    let backend = backend(&stores);
    let report = backend.create_index(&mut pool).unwrap();
    assert_eq!(report.replayed, 3);
    assert!(backend.pending_diff(&pool.meta.key()).unwrap().is_empty());

    let mut b = stores
        .claims
        .get(&NsName::new("default", "b"))
        .unwrap()
        .expect("claim b");
    assert_eq!(
        backend.claim(&mut b).unwrap(),
        Allocation::Address(net("10.0.0.2/32"))
    );
}

#[test]
fn corrupted_entry_document_is_rejected() {
    let dir = TempDir::new().expect("tempdir");
    seed(&dir);

    let path = dir.path().join("entries.json");
    let raw = fs::read_to_string(&path).unwrap();
    assert!(raw.contains("10.0.0.2/32"));
    // same length, so only the checksum can catch it
    fs::write(&path, raw.replacen("10.0.0.2/32", "10.0.0.7/32", 1)).unwrap();

    let err = FileStorage::<Entry>::open(dir.path())
        .err()
        .expect("corruption detected");
    assert!(matches!(err, PoolError::Corruption(_)), "{err}");
    assert!(err.to_string().contains("checksum"), "{err}");
    assert!(StateStores::open(dir.path()).is_err());
}

#[test]
fn truncated_document_is_rejected() {
    let dir = TempDir::new().expect("tempdir");
    seed(&dir);

    let path = dir.path().join("claims.json");
    let raw = fs::read(&path).unwrap();
    fs::write(&path, &raw[..raw.len() - 4]).unwrap();

    let err = FileStorage::<Claim>::open(dir.path())
        .err()
        .expect("truncation detected");
    assert!(matches!(err, PoolError::Corruption(_)), "{err}");
}
