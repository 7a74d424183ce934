#![forbid(unsafe_code)]

//! Generic claim allocation engine.
//!
//! [`Backend`] drives the four pool operations (create, delete, claim,
//! release) for one pool kind. Everything domain specific sits behind
//! [`PoolKind`]: how a table is built, which [`Applicator`] serves a claim
//! kind, how the table turns back into entries and in which order restore
//! replays claims.

mod applicator;
mod backend;
pub mod metrics;
mod restore;
mod save;

use crate::error::Result;
use crate::types::{Claim, ClaimKind, Entry, NsName, OwnerKind, PoolObject};

pub use applicator::{Allocation, Applicator, Mode};
pub use backend::{Backend, BackendOptions, DEFAULT_FIELD_OWNER, REASON_RESTORE_FAILED};
pub use metrics::{CounterMetrics, EngineMetrics, NoopMetrics};
pub use restore::RestoreReport;
pub use save::{diff_entries, EntryDiff};

/// Domain plugged into [`Backend`].
pub trait PoolKind: Send + Sync + 'static {
    /// Backend name used in errors and logs.
    const NAME: &'static str;

    /// Pool object.
    type Pool: PoolObject;

    /// Index structure held by each cache instance.
    type Table: Send;

    /// Applicator dispatching over the claim kinds of the domain.
    type Applicator: Applicator<Table = Self::Table>;

    /// Empty index for `pool`.
    fn new_table(pool: &Self::Pool) -> Self::Table;

    /// Applicator for `claim`; fails with
    /// [`PoolError::UnsupportedKind`](crate::error::PoolError::UnsupportedKind)
    /// for kinds of the other domain.
    fn applicator(pool: &Self::Pool, claim: &Claim, mode: Mode) -> Result<Self::Applicator>;

    /// Entries implied by the current index, one per leaf allocation.
    fn entries(pool: &NsName, table: &Self::Table) -> Result<Vec<Entry>>;

    /// Replay buckets, parents before the claims that depend on them.
    fn restore_order() -> &'static [(ClaimKind, OwnerKind)];

    /// Whether a pool-synthesized claim that is no longer declared can be
    /// removed without evicting anything issued under it.
    fn can_retire(_table: &Self::Table, _claim: &Claim) -> bool {
        true
    }
}
