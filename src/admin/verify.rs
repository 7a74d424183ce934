use std::path::Path;
use std::sync::Arc;

use rustc_hash::FxHashSet;
use serde::Serialize;
use tracing::info;

use crate::admin::{open_state, Result, StateSnapshot};
use crate::engine::{diff_entries, Backend, BackendOptions, PoolKind};
use crate::ipam::IpamKind;
use crate::numeric::NumericKind;
use crate::storage::{MemoryStorage, Storage};
use crate::types::{Claim, Entry, NsName, PoolObject, Record};

const MAX_FINDINGS: usize = 32;

/// Specifies the depth of verification checks to perform.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum VerifyLevel {
    /// Checksums, pool syntax and cross references between records.
    Fast,
    /// Additionally rebuilds every pool through a fresh backend.
    Full,
}

/// Indicates the severity level of a verification finding.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum VerifySeverity {
    /// Informational message about the verification process.
    Info,
    /// State that restore reconciles on its own (orphans, stale entries).
    Warning,
    /// State that keeps a pool from initializing.
    Error,
}

/// Represents a single issue discovered during verification.
#[derive(Clone, Debug, Serialize)]
pub struct VerifyFinding {
    /// The severity level of this finding.
    pub severity: VerifySeverity,
    /// Human-readable description of the issue.
    pub message: String,
}

impl VerifyFinding {
    fn error(message: impl Into<String>) -> Self {
        Self {
            severity: VerifySeverity::Error,
            message: message.into(),
        }
    }

    fn warning(message: impl Into<String>) -> Self {
        Self {
            severity: VerifySeverity::Warning,
            message: message.into(),
        }
    }
}

/// Statistics collected during the verification process.
#[derive(Clone, Debug, Default, Serialize)]
pub struct VerifyCounts {
    /// Pools found in the state directory.
    pub pools_found: u64,
    /// Claims found in the state directory.
    pub claims_found: u64,
    /// Entries found in the state directory.
    pub entries_found: u64,
    /// Pools that failed syntax validation or restore.
    pub pools_failed: u64,
    /// Claims replayed while rebuilding pools.
    pub claims_replayed: u64,
    /// Entries with no owning claim.
    pub orphaned_entries: u64,
    /// Entries a rebuild would rewrite or delete.
    pub drifted_entries: u64,
}

/// Complete report of a verification operation.
#[derive(Clone, Debug, Serialize)]
pub struct VerifyReport {
    /// The verification level that was performed.
    pub level: VerifyLevel,
    /// Whether every pool would initialize.
    pub success: bool,
    /// List of issues discovered during verification, capped.
    pub findings: Vec<VerifyFinding>,
    /// Statistics about the records examined.
    pub counts: VerifyCounts,
}

/// Verifies the pools persisted under `state_dir`.
///
/// The state directory is only read: pools are rebuilt against in-memory
/// copies of the claim and entry stores.
///
/// # Errors
///
/// Returns an error if the directory is missing or a store fails to load
/// (bad checksum, unreadable document).
pub fn verify(state_dir: impl AsRef<Path>, level: VerifyLevel) -> Result<VerifyReport> {
    let state_dir = state_dir.as_ref();
    let snapshot = open_state(state_dir)?;
    let mut findings = Vec::new();
    let mut counts = VerifyCounts {
        pools_found: (snapshot.ip_indexes.len() + snapshot.numeric_indexes.len()) as u64,
        claims_found: snapshot.claims.len() as u64,
        entries_found: snapshot.entries.len() as u64,
        ..VerifyCounts::default()
    };

    check_references(&snapshot, &mut findings, &mut counts);

    if level == VerifyLevel::Full {
        let entries: Arc<dyn Storage<Entry>> =
            Arc::new(MemoryStorage::with_records(snapshot.entries.iter().cloned()));
        let claims: Arc<dyn Storage<Claim>> =
            Arc::new(MemoryStorage::with_records(snapshot.claims.iter().cloned()));
        let options = BackendOptions::new(entries, claims);

        let ipam = Backend::<IpamKind>::open(options.clone());
        rebuild(&ipam, &snapshot.ip_indexes, &snapshot.entries, &mut findings, &mut counts)?;
        let numeric = Backend::<NumericKind>::open(options);
        rebuild(
            &numeric,
            &snapshot.numeric_indexes,
            &snapshot.entries,
            &mut findings,
            &mut counts,
        )?;
    }

    let success = counts.pools_failed == 0
        && findings
            .iter()
            .all(|finding| finding.severity != VerifySeverity::Error);
    info!(
        state_dir = %state_dir.display(),
        level = ?level,
        success,
        findings = findings.len(),
        "admin.verify.completed"
    );
    Ok(VerifyReport {
        level,
        success,
        findings,
        counts,
    })
}

fn check_references(
    snapshot: &StateSnapshot,
    findings: &mut Vec<VerifyFinding>,
    counts: &mut VerifyCounts,
) {
    let mut pools: FxHashSet<NsName> = FxHashSet::default();
    for pool in &snapshot.ip_indexes {
        if let Err(err) = pool.validate_syntax() {
            counts.pools_failed += 1;
            push(findings, VerifyFinding::error(format!("pool {}: {err}", pool.key())));
        }
        pools.insert(pool.key());
    }
    for pool in &snapshot.numeric_indexes {
        if let Err(err) = pool.validate_syntax() {
            counts.pools_failed += 1;
            push(findings, VerifyFinding::error(format!("pool {}: {err}", pool.key())));
        }
        pools.insert(pool.key());
    }

    for claim in &snapshot.claims {
        if !pools.contains(&claim.pool_key()) {
            push(
                findings,
                VerifyFinding::warning(format!(
                    "claim {} references unknown pool {}",
                    claim.key(),
                    claim.pool_key()
                )),
            );
        }
    }
    for entry in &snapshot.entries {
        let pool = NsName::new(entry.meta.namespace.clone(), entry.spec.index.clone());
        if !pools.contains(&pool) {
            counts.orphaned_entries += 1;
            push(
                findings,
                VerifyFinding::warning(format!(
                    "entry {} references unknown pool {pool}",
                    entry.key()
                )),
            );
        }
    }
}

fn rebuild<K: PoolKind>(
    backend: &Backend<K>,
    pools: &[K::Pool],
    persisted: &[Entry],
    findings: &mut Vec<VerifyFinding>,
    counts: &mut VerifyCounts,
) -> Result<()> {
    for pool in pools {
        let mut pool = pool.clone();
        let key = pool.key();
        if pool.validate_syntax().is_err() {
            // already reported
            continue;
        }
        let report = match backend.create_index(&mut pool) {
            Ok(report) => report,
            Err(err) => {
                counts.pools_failed += 1;
                push(findings, VerifyFinding::error(format!("pool {key}: {err}")));
                continue;
            }
        };
        counts.claims_replayed += report.replayed as u64;
        counts.orphaned_entries += report.orphaned.len() as u64;
        for orphan in &report.orphaned {
            push(
                findings,
                VerifyFinding::warning(format!("pool {key}: entry {orphan} has no owning claim")),
            );
        }

        let stored: Vec<Entry> = persisted
            .iter()
            .filter(|entry| entry.meta.namespace == key.namespace && entry.spec.index == key.name)
            .cloned()
            .collect();
        let drift = diff_entries(backend.snapshot_entries(&key)?, stored);
        if !drift.is_empty() {
            counts.drifted_entries += (drift.upserts.len() + drift.deletes.len()) as u64;
            push(
                findings,
                VerifyFinding::warning(format!(
                    "pool {key}: {} entries missing or outdated, {} stale",
                    drift.upserts.len(),
                    drift.deletes.len()
                )),
            );
        }
    }
    Ok(())
}

fn push(findings: &mut Vec<VerifyFinding>, finding: VerifyFinding) {
    if findings.len() < MAX_FINDINGS {
        findings.push(finding);
    }
}
