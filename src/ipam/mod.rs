#![forbid(unsafe_code)]

//! Hierarchical IP address pools.
//!
//! The main table is a longest-prefix-match [`Rib`] of prefixes and host
//! routes. Each static range claim installs the minimal CIDR cover of its
//! range as `Range` routes and owns a separate flat [`RangeTable`] holding
//! the addresses allocated inside it; those addresses never appear in the
//! main table.
//!
//! [`RangeTable`]: crate::table::RangeTable

mod address;
mod prefix;
mod range;

use ipnet::IpNet;
use tracing::warn;

use crate::engine::{Allocation, Applicator, Backend, Mode, PoolKind};
use crate::error::{PoolError, Result};
use crate::table::{addr, RangeTables, Rib, Route};
use crate::types::{
    labels, Claim, ClaimKind, Entry, EntryValue, IpIndex, Labels, NsName, OwnerKind,
};

pub use address::{DynamicAddressApplicator, StaticAddressApplicator};
pub use prefix::{DynamicPrefixApplicator, StaticPrefixApplicator};
pub use range::StaticRangeApplicator;

/// Backend serving IP pools.
pub type IpamBackend = Backend<IpamKind>;

/// Index of one IP pool.
#[derive(Clone, Debug, Default)]
pub struct IpamTable {
    /// Main prefix table.
    pub rib: Rib,
    /// Per-range address tables.
    pub ranges: RangeTables,
}

impl IpamTable {
    /// Empty index.
    pub fn new() -> Self {
        Self::default()
    }
}

#[derive(Clone, Debug)]
pub(crate) struct ClaimContext {
    pool: NsName,
    declared: Vec<IpNet>,
    claim: Claim,
    mode: Mode,
}

impl ClaimContext {
    fn new(pool: &IpIndex, claim: &Claim, mode: Mode) -> Self {
        Self {
            pool: pool.meta.key(),
            declared: pool.declared(),
            claim: claim.clone(),
            mode,
        }
    }

    fn is_pool_claim(&self) -> bool {
        self.claim.owner_kind() == OwnerKind::Index
    }

    fn owns(&self, stored: &Labels) -> bool {
        self.claim.owns(stored)
    }

    fn labels(&self) -> Labels {
        self.claim.allocation_labels()
    }

    fn selects(&self, route: &Route) -> bool {
        self.claim
            .spec
            .selector
            .as_ref()
            .map_or(true, |selector| selector.matches(route.labels()))
    }

    // Live user claims must fall inside a currently declared prefix.
    fn check_declared(&self, value: &IpNet) -> Result<()> {
        if !self.mode.is_admit() || self.is_pool_claim() {
            return Ok(());
        }
        if self.declared.iter().any(|declared| declared.contains(value)) {
            return Ok(());
        }
        Err(PoolError::OutOfBounds {
            value: value.to_string(),
            bounds: self
                .declared
                .iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>()
                .join(", "),
        })
    }

    fn exhausted(&self, scope: impl std::fmt::Display) -> PoolError {
        PoolError::Exhausted(format!("{} ({scope})", self.pool))
    }
}

fn not_validated() -> PoolError {
    PoolError::invalid("claim", "apply called before a successful validate")
}

/// Route labels minus the engine's own keys, inherited by allocations below it.
fn inherited_labels(route: &Route) -> Labels {
    labels::user_labels(route.labels())
}

fn parent_type(value: impl std::fmt::Display, parent: &Route) -> PoolError {
    PoolError::ParentType {
        value: value.to_string(),
        parent: parent.prefix().to_string(),
        parent_type: parent.prefix_type().to_string(),
    }
}

fn is_pool_route(route: &Route) -> bool {
    route
        .labels()
        .get(labels::OWNER_KIND)
        .and_then(|kind| OwnerKind::parse(kind))
        == Some(OwnerKind::Index)
}

/// Drops a range table together with the addresses allocated in it.
fn drop_range(table: &mut IpamTable, pool: &NsName, name: &str) {
    if let Some(range) = table.ranges.remove(name) {
        if !range.is_empty() {
            warn!(pool = %pool, range = name, addresses = range.len(), "ipam.range.dropped");
        }
    }
}

/// Applicator for any IP claim kind.
#[derive(Clone, Debug)]
pub enum IpamApplicator {
    /// `static-address`
    StaticAddress(StaticAddressApplicator),
    /// `static-prefix`
    StaticPrefix(StaticPrefixApplicator),
    /// `static-range`
    StaticRange(StaticRangeApplicator),
    /// `dynamic-address`
    DynamicAddress(DynamicAddressApplicator),
    /// `dynamic-prefix`
    DynamicPrefix(DynamicPrefixApplicator),
}

macro_rules! dispatch {
    ($self:ident, $inner:ident => $call:expr) => {
        match $self {
            IpamApplicator::StaticAddress($inner) => $call,
            IpamApplicator::StaticPrefix($inner) => $call,
            IpamApplicator::StaticRange($inner) => $call,
            IpamApplicator::DynamicAddress($inner) => $call,
            IpamApplicator::DynamicPrefix($inner) => $call,
        }
    };
}

impl Applicator for IpamApplicator {
    type Table = IpamTable;

    fn validate(&mut self, table: &IpamTable) -> Result<()> {
        dispatch!(self, inner => inner.validate(table))
    }

    fn apply(&mut self, table: &mut IpamTable) -> Result<Allocation> {
        dispatch!(self, inner => inner.apply(table))
    }

    fn delete(&mut self, table: &mut IpamTable) -> Result<()> {
        dispatch!(self, inner => inner.delete(table))
    }
}

const RESTORE_ORDER: [(ClaimKind, OwnerKind); 6] = [
    (ClaimKind::StaticPrefix, OwnerKind::Index),
    (ClaimKind::StaticPrefix, OwnerKind::Claim),
    (ClaimKind::DynamicPrefix, OwnerKind::Claim),
    (ClaimKind::StaticRange, OwnerKind::Claim),
    (ClaimKind::StaticAddress, OwnerKind::Claim),
    (ClaimKind::DynamicAddress, OwnerKind::Claim),
];

/// IP pool domain.
pub struct IpamKind;

impl PoolKind for IpamKind {
    const NAME: &'static str = "ipam";

    type Pool = IpIndex;
    type Table = IpamTable;
    type Applicator = IpamApplicator;

    fn new_table(_pool: &IpIndex) -> IpamTable {
        IpamTable::new()
    }

    fn applicator(pool: &IpIndex, claim: &Claim, mode: Mode) -> Result<IpamApplicator> {
        let ctx = ClaimContext::new(pool, claim, mode);
        Ok(match claim.spec.kind {
            ClaimKind::StaticAddress => {
                IpamApplicator::StaticAddress(StaticAddressApplicator::new(ctx))
            }
            ClaimKind::StaticPrefix => IpamApplicator::StaticPrefix(StaticPrefixApplicator::new(ctx)),
            ClaimKind::StaticRange => IpamApplicator::StaticRange(StaticRangeApplicator::new(ctx)),
            ClaimKind::DynamicAddress => {
                IpamApplicator::DynamicAddress(DynamicAddressApplicator::new(ctx))
            }
            ClaimKind::DynamicPrefix => {
                IpamApplicator::DynamicPrefix(DynamicPrefixApplicator::new(ctx))
            }
            other => {
                return Err(PoolError::UnsupportedKind {
                    kind: other.to_string(),
                    backend: Self::NAME,
                })
            }
        })
    }

    fn entries(pool: &NsName, table: &IpamTable) -> Result<Vec<Entry>> {
        let mut out = Vec::with_capacity(table.rib.len());
        for route in table.rib.iter() {
            let value = match route
                .labels()
                .get(labels::PREFIX_LENGTH)
                .and_then(|len| len.parse::<u8>().ok())
            {
                Some(len) => IpNet::new(route.prefix().addr(), len).map_err(|_| {
                    PoolError::Corruption(format!("route {} carries bad length {len}", route.prefix()))
                })?,
                None => route.prefix(),
            };
            out.push(Entry::from_allocation(
                pool,
                None,
                EntryValue::Prefix(value),
                route.labels(),
            )?);
        }
        for range in table.ranges.iter() {
            for (address, stored) in range.iter() {
                out.push(Entry::from_allocation(
                    pool,
                    Some(range.name()),
                    EntryValue::Prefix(addr::host_prefix(*address)),
                    stored,
                )?);
            }
        }
        Ok(out)
    }

    fn restore_order() -> &'static [(ClaimKind, OwnerKind)] {
        &RESTORE_ORDER
    }

    fn can_retire(table: &IpamTable, claim: &Claim) -> bool {
        let Some(prefix) = claim.spec.prefix else {
            return true;
        };
        table
            .rib
            .children(&prefix)
            .iter()
            .all(|child| claim.owns(child.labels()))
    }
}
