#![forbid(unsafe_code)]

//! Offline administration of a state directory.
//!
//! These functions read the file stores written by [`FileStorage`] without
//! taking part in claim serving: [`verify`] rebuilds every pool against
//! in-memory copies of the stores and reports what restore would hit, and
//! [`list_entries`] dumps persisted entries.
//!
//! [`FileStorage`]: crate::storage::FileStorage

mod error;
mod verify;

use std::path::Path;

use crate::storage::{StateStores, Storage};
use crate::types::{Claim, Entry, IpIndex, NsName, NumericIndex, Selector};

/// Error types for administrative operations.
pub use error::{AdminError, Result};

/// State directory verification.
pub use verify::{verify, VerifyCounts, VerifyFinding, VerifyLevel, VerifyReport, VerifySeverity};

/// Every record of a state directory, loaded once.
pub(crate) struct StateSnapshot {
    pub(crate) ip_indexes: Vec<IpIndex>,
    pub(crate) numeric_indexes: Vec<NumericIndex>,
    pub(crate) claims: Vec<Claim>,
    pub(crate) entries: Vec<Entry>,
}

pub(crate) fn open_state(state_dir: &Path) -> Result<StateSnapshot> {
    if !state_dir.is_dir() {
        return Err(AdminError::missing_state_dir(state_dir));
    }
    let stores = StateStores::open(state_dir)?;
    let all = Selector::everything();
    Ok(StateSnapshot {
        ip_indexes: stores.ip_indexes.list(&all)?,
        numeric_indexes: stores.numeric_indexes.list(&all)?,
        claims: stores.claims.list(&all)?,
        entries: stores.entries.list(&all)?,
    })
}

/// Persisted entries under `state_dir`, optionally limited to one pool.
///
/// # Errors
///
/// Returns an error if the directory is missing or the entry store fails to load.
pub fn list_entries(state_dir: impl AsRef<Path>, pool: Option<&NsName>) -> Result<Vec<Entry>> {
    let state_dir = state_dir.as_ref();
    if !state_dir.is_dir() {
        return Err(AdminError::missing_state_dir(state_dir));
    }
    let stores = StateStores::open(state_dir)?;
    let selector = match pool {
        Some(pool) => Selector::pool(&pool.namespace, &pool.name),
        None => Selector::everything(),
    };
    Ok(stores.entries.list(&selector)?)
}
