use rustc_hash::FxHashMap;

use crate::error::Result;
use crate::storage::Storage;
use crate::types::{Entry, NsName};

/// Difference between the entries implied by an index and the persisted ones.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct EntryDiff {
    /// Entries to create or replace.
    pub upserts: Vec<Entry>,
    /// Persisted entries with no counterpart in the index.
    pub deletes: Vec<NsName>,
}

impl EntryDiff {
    /// True when storage already matches the index.
    pub fn is_empty(&self) -> bool {
        self.upserts.is_empty() && self.deletes.is_empty()
    }
}

// Storage-assigned metadata (version, manager) is not part of the comparison.
fn same_content(persisted: &Entry, computed: &Entry) -> bool {
    persisted.meta.labels == computed.meta.labels
        && persisted.meta.owner_references == computed.meta.owner_references
        && persisted.spec == computed.spec
}

/// Writes turning `persisted` into `computed`, matched by entry key.
pub fn diff_entries(computed: Vec<Entry>, persisted: Vec<Entry>) -> EntryDiff {
    let mut persisted: FxHashMap<NsName, Entry> = persisted
        .into_iter()
        .map(|entry| (entry.key(), entry))
        .collect();
    let mut out = EntryDiff::default();
    for entry in computed {
        match persisted.remove(&entry.key()) {
            Some(existing) if same_content(&existing, &entry) => {}
            _ => out.upserts.push(entry),
        }
    }
    out.deletes = persisted.into_keys().collect();
    out.deletes.sort();
    out
}

pub(crate) fn apply_diff(
    store: &dyn Storage<Entry>,
    diff: &EntryDiff,
    field_owner: &str,
) -> Result<()> {
    for entry in &diff.upserts {
        store.apply(entry.clone(), field_owner)?;
    }
    for key in &diff.deletes {
        store.delete(key)?;
    }
    Ok(())
}
