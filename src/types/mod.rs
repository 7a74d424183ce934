#![forbid(unsafe_code)]

//! Resource model shared by the engine and its storage collaborators.

mod claim;
mod entry;
pub mod labels;
mod meta;
mod pool;
mod record;
mod selector;

pub use claim::{parse_id_range, Claim, ClaimKind, ClaimSpec, ClaimStatus};
pub use entry::{entry_name, Entry, EntrySpec, EntryValue};
pub use meta::{
    get_condition, set_condition, Condition, Labels, NsName, ObjectMeta, OwnerKind,
    OwnerReference, CONDITION_READY,
};
pub use pool::{
    IdSpace, IndexStatus, IpIndex, IpIndexPrefix, IpIndexSpec, NumericIndex, NumericIndexSpec,
    PoolObject, PrefixType,
};
pub use record::Record;
pub use selector::{Fields, Selector};
