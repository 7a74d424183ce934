use ipnet::IpNet;

use crate::error::Result;
use crate::types::{ClaimStatus, Entry};

/// How a claim reaches its applicator.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Mode {
    /// A live claim; pool bounds are enforced.
    Admit,
    /// Restore or pool resync. Bounds are not re-checked, so shrinking a pool
    /// never evicts what it already issued. Dynamic claims prefer the value of
    /// the entry they were matched with.
    Replay(Option<Entry>),
}

impl Mode {
    /// True for live claims.
    pub fn is_admit(&self) -> bool {
        matches!(self, Mode::Admit)
    }

    /// Entry matched with the claim during restore.
    pub fn hint(&self) -> Option<&Entry> {
        match self {
            Mode::Replay(hint) => hint.as_ref(),
            Mode::Admit => None,
        }
    }
}

/// Value written back onto a claim after a successful apply.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Allocation {
    /// Single numeric id.
    Id(u64),
    /// Numeric interval.
    IdRange(u64, u64),
    /// Prefix.
    Prefix(IpNet),
    /// Address with its context length.
    Address(IpNet),
    /// Address range (`start-end`).
    Range(String),
}

impl Allocation {
    /// Replaces the allocated value fields of `status`.
    pub fn write_status(&self, status: &mut ClaimStatus) {
        status.id = None;
        status.range = None;
        status.prefix = None;
        status.address = None;
        match self {
            Allocation::Id(id) => status.id = Some(*id),
            Allocation::IdRange(start, end) => status.range = Some(format!("{start}-{end}")),
            Allocation::Prefix(prefix) => status.prefix = Some(*prefix),
            Allocation::Address(address) => status.address = Some(*address),
            Allocation::Range(range) => status.range = Some(range.clone()),
        }
    }
}

/// Three-step contract every claim kind implements against its index.
///
/// `validate` must not mutate the table; whatever it decides (a dynamic
/// candidate, a range redirect) is kept on the applicator and consumed by
/// `apply`. `apply` is only called after a successful `validate`.
pub trait Applicator {
    /// Index structure the applicator works on.
    type Table;

    /// Checks the claim against the current index.
    fn validate(&mut self, table: &Self::Table) -> Result<()>;

    /// Mutates the index; replaces whatever the claim held before.
    fn apply(&mut self, table: &mut Self::Table) -> Result<Allocation>;

    /// Removes everything the claim holds.
    fn delete(&mut self, table: &mut Self::Table) -> Result<()>;
}
