use rustc_hash::FxHashMap;
use serde::Serialize;
use tracing::{debug, warn};

use crate::error::{PoolError, Result};
use crate::types::{Claim, Entry, NsName, Record};

use super::{Applicator, Mode, PoolKind};

/// Outcome of rebuilding one pool from persisted records.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct RestoreReport {
    /// Claims replayed through their applicators.
    pub replayed: usize,
    /// Persisted claims of the pool with no matching entry.
    pub unmatched_claims: usize,
    /// Entries whose owner claim was not found in its bucket.
    pub orphaned: Vec<NsName>,
}

fn replay_key(entries: &[Entry]) -> (u8, u128) {
    entries
        .iter()
        .filter_map(|entry| entry.value().ok())
        .map(|value| value.sort_key())
        .min()
        .unwrap_or((u8::MAX, u128::MAX))
}

/// Replays persisted claims into `table`, bucket by bucket.
///
/// Entries are matched to claims by owner name within each (claim kind,
/// owner kind) bucket. Matched claims are replayed in ascending value order
/// with their first matched entry as hint. Leftover entries are reported as
/// orphans.
pub(crate) fn restore<K: PoolKind>(
    pool: &K::Pool,
    table: &mut K::Table,
    mut entries: Vec<Entry>,
    claims: Vec<Claim>,
) -> Result<RestoreReport> {
    let pool_key = pool.key();
    let mut claims: FxHashMap<String, Claim> = claims
        .into_iter()
        .map(|claim| (claim.meta.name.clone(), claim))
        .collect();
    let mut report = RestoreReport::default();

    for (kind, owner_kind) in K::restore_order() {
        let mut matched: FxHashMap<String, (Claim, Vec<Entry>)> = FxHashMap::default();
        let mut idx = entries.len();
        while idx > 0 {
            idx -= 1;
            let entry = &entries[idx];
            if entry.spec.claim_kind != *kind || entry.spec.owner_kind != *owner_kind {
                continue;
            }
            let Some(owner) = entry.owner_name().map(str::to_string) else {
                continue;
            };
            if let Some((_, owned)) = matched.get_mut(&owner) {
                owned.push(entries.swap_remove(idx));
                continue;
            }
            let in_bucket = claims
                .get(&owner)
                .is_some_and(|claim| claim.spec.kind == *kind && claim.owner_kind() == *owner_kind);
            if !in_bucket {
                continue;
            }
            if let Some(claim) = claims.remove(&owner) {
                matched.insert(owner, (claim, vec![entries.swap_remove(idx)]));
            }
        }

        let mut bucket: Vec<(Claim, Vec<Entry>)> = matched.into_values().collect();
        bucket.sort_by(|(a, a_entries), (b, b_entries)| {
            replay_key(a_entries)
                .cmp(&replay_key(b_entries))
                .then_with(|| a.meta.name.cmp(&b.meta.name))
        });
        for (claim, mut owned) in bucket {
            owned.sort_by_key(|entry| entry.meta.name.clone());
            let hint = owned.into_iter().next();
            replay::<K>(pool, table, &claim, hint).map_err(|source| PoolError::Restore {
                pool: pool_key.to_string(),
                claim: claim.key().to_string(),
                source: Box::new(source),
            })?;
            debug!(pool = %pool_key, claim = %claim.key(), kind = %kind, "engine.restore.replayed");
            report.replayed += 1;
        }
    }

    report.unmatched_claims = claims.len();
    for entry in &entries {
        warn!(
            pool = %pool_key,
            entry = %entry.key(),
            owner = entry.owner_name().unwrap_or("<none>"),
            "engine.restore.orphaned_entry"
        );
    }
    report.orphaned = entries.iter().map(Entry::key).collect();
    report.orphaned.sort();
    Ok(report)
}

fn replay<K: PoolKind>(
    pool: &K::Pool,
    table: &mut K::Table,
    claim: &Claim,
    hint: Option<Entry>,
) -> Result<()> {
    claim.validate_syntax()?;
    let mut applicator = K::applicator(pool, claim, Mode::Replay(hint))?;
    applicator.validate(table)?;
    applicator.apply(table)?;
    Ok(())
}
