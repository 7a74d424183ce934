#![allow(missing_docs)]

use std::net::IpAddr;
use std::sync::Arc;

use idpool::{
    engine::{Allocation, BackendOptions},
    storage::{MemoryStorage, Storage},
    types::{
        get_condition, Claim, ClaimKind, ClaimSpec, Entry, IpIndex, IpIndexPrefix, NsName,
        PoolObject, PrefixType, Selector, CONDITION_READY,
    },
    IpamBackend, PoolError,
};
use ipnet::IpNet;

fn net(s: &str) -> IpNet {
    s.parse().unwrap()
}

fn ip(s: &str) -> IpAddr {
    s.parse().unwrap()
}

struct Fixture {
    backend: IpamBackend,
    entries: Arc<MemoryStorage<Entry>>,
    claims: Arc<MemoryStorage<Claim>>,
}

impl Fixture {
    fn new() -> Self {
        let entries = Arc::new(MemoryStorage::new());
        let claims = Arc::new(MemoryStorage::new());
        let backend = IpamBackend::open(BackendOptions::new(entries.clone(), claims.clone()));
        Self {
            backend,
            entries,
            claims,
        }
    }

    fn with_pool(prefixes: Vec<IpIndexPrefix>) -> (Self, IpIndex) {
        let fx = Self::new();
        let mut pool = IpIndex::new("default", "lab", prefixes);
        fx.backend.create_index(&mut pool).expect("create pool");
        (fx, pool)
    }

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

    fn persisted_names(&self) -> Vec<String> {
        self.entries
            .list(&Selector::pool("default", "lab"))
            .unwrap()
            .into_iter()
            .map(|entry| entry.meta.name)
            .collect()
    }
}

fn lab_pool() -> Vec<IpIndexPrefix> {
    vec![
        IpIndexPrefix::new(net("10.0.0.0/8"), PrefixType::Aggregate),
        IpIndexPrefix::new(net("10.1.0.0/24"), PrefixType::Network),
    ]
}

fn dynamic_address() -> ClaimSpec {
    ClaimSpec::new("lab", ClaimKind::DynamicAddress)
}

#[test]
fn dynamic_addresses_in_a_network_pool() {
    let (fx, pool) =
        Fixture::with_pool(vec![IpIndexPrefix::new(net("10.0.0.0/24"), PrefixType::Network)]);
    assert!(get_condition(pool.conditions(), CONDITION_READY).is_some_and(|c| c.status));

    assert_eq!(
        fx.submit("a", dynamic_address()).unwrap(),
        Allocation::Address(net("10.0.0.1/32"))
    );
    assert_eq!(
        fx.submit("b", dynamic_address()).unwrap(),
        Allocation::Address(net("10.0.0.2/32"))
    );
    // re-submission keeps what the claim holds
    assert_eq!(
        fx.submit("a", dynamic_address()).unwrap(),
        Allocation::Address(net("10.0.0.1/32"))
    );

    let rival = ClaimSpec::new("lab", ClaimKind::StaticAddress)
        .address(ip("10.0.0.1"))
        .prefix_length(24);
    let err = fx.submit("c", rival).unwrap_err();
    assert!(matches!(err, PoolError::OwnerMismatch { .. }), "{err}");

    let names = fx.persisted_names();
    assert!(names.contains(&"lab.10.0.0.0-24".to_string()), "{names:?}");
    assert!(names.contains(&"lab.10.0.0.1-32".to_string()), "{names:?}");
    assert!(names.contains(&"lab.10.0.0.2-32".to_string()), "{names:?}");
    assert!(fx
        .backend
        .pending_diff(&pool.meta.key())
        .unwrap()
        .is_empty());
}

#[test]
fn network_exhaustion() {
    let (fx, _) =
        Fixture::with_pool(vec![IpIndexPrefix::new(net("10.0.0.0/30"), PrefixType::Network)]);
    // .0 is the network address and .3 the broadcast
    assert_eq!(
        fx.submit("a", dynamic_address()).unwrap(),
        Allocation::Address(net("10.0.0.1/32"))
    );
    assert_eq!(
        fx.submit("b", dynamic_address()).unwrap(),
        Allocation::Address(net("10.0.0.2/32"))
    );
    let err = fx.submit("c", dynamic_address()).unwrap_err();
    assert!(matches!(err, PoolError::Exhausted(_)), "{err}");
}

#[test]
fn range_scoped_entries() {
    let (fx, _) = Fixture::with_pool(lab_pool());
    assert_eq!(
        fx.submit(
            "r",
            ClaimSpec::new("lab", ClaimKind::StaticRange).range("10.1.0.10-10.1.0.20")
        )
        .unwrap(),
        Allocation::Range("10.1.0.10-10.1.0.20".into())
    );
    assert_eq!(
        fx.submit("a", dynamic_address().range("10.1.0.10-10.1.0.20"))
            .unwrap(),
        Allocation::Address(net("10.1.0.10/32"))
    );
    assert_eq!(
        fx.submit(
            "s",
            ClaimSpec::new("lab", ClaimKind::StaticAddress).address(ip("10.1.0.15"))
        )
        .unwrap(),
        Allocation::Address(net("10.1.0.15/32"))
    );

    let names = fx.persisted_names();
    assert!(
        names.contains(&"lab.10.1.0.10-10.1.0.20.10.1.0.10-32".to_string()),
        "{names:?}"
    );
    assert!(
        names.contains(&"lab.10.1.0.10-10.1.0.20.10.1.0.15-32".to_string()),
        "{names:?}"
    );
    // range addresses never land in the main table
    assert!(!names.contains(&"lab.10.1.0.15-32".to_string()), "{names:?}");

    let scoped = fx
        .entries
        .get(&NsName::new("default", "lab.10.1.0.10-10.1.0.20.10.1.0.15-32"))
        .unwrap()
        .expect("scoped entry");
    assert_eq!(scoped.spec.range.as_deref(), Some("10.1.0.10-10.1.0.20"));
    assert_eq!(scoped.owner_name(), Some("s"));
}

#[test]
fn unknown_range_has_no_parent() {
    let (fx, _) = Fixture::with_pool(lab_pool());
    let err = fx
        .submit("a", dynamic_address().range("10.1.0.50-10.1.0.60"))
        .unwrap_err();
    assert!(matches!(err, PoolError::NoParent(_)), "{err}");
}

#[test]
fn removed_prefix_is_retired_once_empty() {
    let (fx, _) = Fixture::with_pool(lab_pool());
    fx.submit("a", dynamic_address()).unwrap();

    let mut narrowed = IpIndex::new(
        "default",
        "lab",
        vec![IpIndexPrefix::new(net("10.0.0.0/8"), PrefixType::Aggregate)],
    );
    fx.backend.create_index(&mut narrowed).unwrap();
    // a claim still lives under 10.1.0.0/24, so its pool claim stays
    assert!(fx
        .claims
        .get(&NsName::new("default", "lab.10.1.0.0-24"))
        .unwrap()
        .is_some());
    assert!(fx.persisted_names().contains(&"lab.10.1.0.0-24".to_string()));

    fx.release("a");
    fx.backend.create_index(&mut narrowed).unwrap();
    assert!(fx
        .claims
        .get(&NsName::new("default", "lab.10.1.0.0-24"))
        .unwrap()
        .is_none());
    assert_eq!(fx.persisted_names(), ["lab.10.0.0.0-8"]);
}

#[test]
fn numeric_kinds_are_unsupported() {
    let (fx, _) = Fixture::with_pool(lab_pool());
    let err = fx
        .submit("a", ClaimSpec::new("lab", ClaimKind::DynamicId))
        .unwrap_err();
    assert!(matches!(err, PoolError::UnsupportedKind { .. }), "{err}");
}

#[test]
fn ipv6_dynamic_prefixes() {
    let (fx, _) = Fixture::with_pool(vec![IpIndexPrefix::new(
        net("2001:db8::/32"),
        PrefixType::Aggregate,
    )]);
    let spec = || ClaimSpec::new("lab", ClaimKind::DynamicPrefix).prefix_length(48);
    assert_eq!(
        fx.submit("a", spec()).unwrap(),
        Allocation::Prefix(net("2001:db8::/48"))
    );
    assert_eq!(
        fx.submit("b", spec()).unwrap(),
        Allocation::Prefix(net("2001:db8:1::/48"))
    );
    fx.release("a");
    assert_eq!(
        fx.submit("c", spec()).unwrap(),
        Allocation::Prefix(net("2001:db8::/48"))
    );
}

#[test]
fn selector_limits_dynamic_addresses_to_matching_networks() {
    let (fx, _) = Fixture::with_pool(vec![
        IpIndexPrefix::new(net("10.0.0.0/8"), PrefixType::Aggregate),
        IpIndexPrefix::new(net("10.1.0.0/24"), PrefixType::Network),
    ]);
    fx.submit(
        "ams",
        ClaimSpec::new("lab", ClaimKind::StaticPrefix)
            .prefix(net("10.2.0.0/24"))
            .prefix_type(PrefixType::Network)
            .label("site", "ams"),
    )
    .unwrap();
    let selected = dynamic_address().selector(Selector::equals("site", "ams"));
    assert_eq!(
        fx.submit("a", selected).unwrap(),
        Allocation::Address(net("10.2.0.1/32"))
    );
}

#[test]
fn holder_can_resubmit_a_context_address_in_host_form() {
    let (fx, _) =
        Fixture::with_pool(vec![IpIndexPrefix::new(net("10.0.0.0/24"), PrefixType::Network)]);
    let host = || ClaimSpec::new("lab", ClaimKind::StaticAddress).address(ip("10.0.0.5"));
    assert_eq!(
        fx.submit("a", host().prefix_length(24)).unwrap(),
        Allocation::Address(net("10.0.0.5/24"))
    );
    let before = fx.persisted_names().len();

    // a bare host under a Network is only refused when nobody holds it yet
    assert_eq!(
        fx.submit("a", host()).unwrap(),
        Allocation::Address(net("10.0.0.5/32"))
    );
    assert_eq!(fx.persisted_names().len(), before);

    let err = fx.submit("b", host()).unwrap_err();
    assert!(matches!(err, PoolError::OwnerMismatch { .. }), "{err}");
    let err = fx
        .submit("c", ClaimSpec::new("lab", ClaimKind::StaticAddress).address(ip("10.0.0.6")))
        .unwrap_err();
    assert!(matches!(err, PoolError::ParentType { .. }), "{err}");
}
