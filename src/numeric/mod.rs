#![forbid(unsafe_code)]

//! Flat numeric pools: AS numbers, VLAN ids and generic N-bit ids.

mod applicators;

use crate::engine::{Allocation, Applicator, Backend, Mode, PoolKind};
use crate::error::{PoolError, Result};
use crate::table::IntervalTable;
use crate::types::{labels, Claim, ClaimKind, Entry, EntryValue, NsName, NumericIndex, OwnerKind};

use applicators::ClaimContext;

pub use applicators::{DynamicIdApplicator, IdRangeApplicator, StaticIdApplicator};

/// Backend serving numeric pools.
pub type NumericBackend = Backend<NumericKind>;

/// Numeric pool domain.
pub struct NumericKind;

/// Applicator for any numeric claim kind.
#[derive(Clone, Debug)]
pub enum NumericApplicator {
    /// `static-id`
    StaticId(StaticIdApplicator),
    /// `dynamic-id`
    DynamicId(DynamicIdApplicator),
    /// `id-range`
    IdRange(IdRangeApplicator),
}

impl Applicator for NumericApplicator {
    type Table = IntervalTable;

    fn validate(&mut self, table: &IntervalTable) -> Result<()> {
        match self {
            NumericApplicator::StaticId(inner) => inner.validate(table),
            NumericApplicator::DynamicId(inner) => inner.validate(table),
            NumericApplicator::IdRange(inner) => inner.validate(table),
        }
    }

    fn apply(&mut self, table: &mut IntervalTable) -> Result<Allocation> {
        match self {
            NumericApplicator::StaticId(inner) => inner.apply(table),
            NumericApplicator::DynamicId(inner) => inner.apply(table),
            NumericApplicator::IdRange(inner) => inner.apply(table),
        }
    }

    fn delete(&mut self, table: &mut IntervalTable) -> Result<()> {
        match self {
            NumericApplicator::StaticId(inner) => inner.delete(table),
            NumericApplicator::DynamicId(inner) => inner.delete(table),
            NumericApplicator::IdRange(inner) => inner.delete(table),
        }
    }
}

// Boundaries go last: they fill only free gaps, so ids held past a shrink
// must be back in the table first.
const RESTORE_ORDER: [(ClaimKind, OwnerKind); 4] = [
    (ClaimKind::StaticId, OwnerKind::Claim),
    (ClaimKind::IdRange, OwnerKind::Claim),
    (ClaimKind::DynamicId, OwnerKind::Claim),
    (ClaimKind::IdRange, OwnerKind::Index),
];

impl PoolKind for NumericKind {
    const NAME: &'static str = "numeric";

    type Pool = NumericIndex;
    type Table = IntervalTable;
    type Applicator = NumericApplicator;

    fn new_table(pool: &NumericIndex) -> IntervalTable {
        IntervalTable::new(pool.spec.space.max())
    }

    fn applicator(pool: &NumericIndex, claim: &Claim, mode: Mode) -> Result<NumericApplicator> {
        let ctx = ClaimContext::new(pool, claim, mode);
        Ok(match claim.spec.kind {
            ClaimKind::StaticId => NumericApplicator::StaticId(StaticIdApplicator::new(ctx)),
            ClaimKind::DynamicId => NumericApplicator::DynamicId(DynamicIdApplicator::new(ctx)),
            ClaimKind::IdRange => NumericApplicator::IdRange(IdRangeApplicator::new(ctx)),
            other => {
                return Err(PoolError::UnsupportedKind {
                    kind: other.to_string(),
                    backend: Self::NAME,
                })
            }
        })
    }

    fn entries(pool: &NsName, table: &IntervalTable) -> Result<Vec<Entry>> {
        table
            .iter()
            .map(|interval| {
                let point_kind = matches!(
                    interval
                        .labels
                        .get(labels::CLAIM_KIND)
                        .and_then(|kind| kind.parse::<ClaimKind>().ok()),
                    Some(ClaimKind::StaticId | ClaimKind::DynamicId)
                );
                let value = if point_kind && interval.start == interval.end {
                    EntryValue::Id(interval.start)
                } else {
                    EntryValue::IdRange(interval.start, interval.end)
                };
                Entry::from_allocation(pool, None, value, &interval.labels)
            })
            .collect()
    }

    fn restore_order() -> &'static [(ClaimKind, OwnerKind)] {
        &RESTORE_ORDER
    }
}
