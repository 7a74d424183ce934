use std::fmt;

use ipnet::IpNet;
use serde::{Deserialize, Serialize};

use crate::error::{PoolError, Result};
use crate::table::addr;

use super::claim::{parse_id_range, ClaimKind};
use super::labels;
use super::meta::{Labels, NsName, ObjectMeta, OwnerKind, OwnerReference};
use super::selector::Fields;

/// Concrete allocated value of one entry.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum EntryValue {
    /// Single numeric id.
    Id(u64),
    /// Inclusive numeric interval.
    IdRange(u64, u64),
    /// Prefix or address (address carries its context length).
    Prefix(IpNet),
}

impl EntryValue {
    /// Ordering key used to replay claims deterministically: shorter prefixes
    /// first, then lowest value.
    pub fn sort_key(&self) -> (u8, u128) {
        match self {
            EntryValue::Id(id) => (0, u128::from(*id)),
            EntryValue::IdRange(start, _) => (0, u128::from(*start)),
            EntryValue::Prefix(prefix) => (prefix.prefix_len(), addr::to_u128(prefix.network())),
        }
    }
}

impl fmt::Display for EntryValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EntryValue::Id(id) => write!(f, "{id}"),
            EntryValue::IdRange(start, end) => write!(f, "{start}-{end}"),
            EntryValue::Prefix(prefix) => write!(f, "{prefix}"),
        }
    }
}

/// Persisted description of one leaf allocation.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntrySpec {
    /// Pool name.
    pub index: String,
    /// Kind of the claim that produced the entry.
    pub claim_kind: ClaimKind,
    /// Owner kind of that claim.
    pub owner_kind: OwnerKind,
    /// Numeric id.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<u64>,
    /// Numeric interval (`start-end`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id_range: Option<String>,
    /// Prefix or address.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prefix: Option<IpNet>,
    /// Range table scope for addresses allocated inside a range.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub range: Option<String>,
    /// User labels of the allocation.
    #[serde(default, skip_serializing_if = "Labels::is_empty")]
    pub labels: Labels,
}

/// Derived record of one allocation, owned by the claim that produced it.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entry {
    /// Object metadata; the first owner reference names the claim.
    pub meta: ObjectMeta,
    /// Allocation.
    pub spec: EntrySpec,
}

impl Entry {
    /// Builds the entry for an allocation found in the index of `pool`.
    ///
    /// `stored` are the labels the index keeps for the allocation; they must carry
    /// the owner labels written by the claim.
    pub fn from_allocation(
        pool: &NsName,
        scope: Option<&str>,
        value: EntryValue,
        stored: &Labels,
    ) -> Result<Self> {
        let owner = stored.get(labels::OWNER_NAME).ok_or_else(|| {
            PoolError::Corruption(format!("allocation {value} in {pool} has no owner"))
        })?;
        let claim_kind = stored
            .get(labels::CLAIM_KIND)
            .ok_or_else(|| {
                PoolError::Corruption(format!("allocation {value} in {pool} has no claim kind"))
            })?
            .parse::<ClaimKind>()?;
        let owner_kind = stored
            .get(labels::OWNER_KIND)
            .and_then(|kind| OwnerKind::parse(kind))
            .unwrap_or(OwnerKind::Claim);

        let mut meta = ObjectMeta::new(pool.namespace.clone(), entry_name(&pool.name, scope, &value));
        meta.labels = stored.clone();
        meta.owner_references.push(OwnerReference {
            kind: OwnerKind::Claim,
            name: owner.clone(),
        });

        let mut spec = EntrySpec {
            index: pool.name.clone(),
            claim_kind,
            owner_kind,
            id: None,
            id_range: None,
            prefix: None,
            range: scope.map(str::to_string),
            labels: labels::user_labels(stored),
        };
        match value {
            EntryValue::Id(id) => spec.id = Some(id),
            EntryValue::IdRange(start, end) => spec.id_range = Some(format!("{start}-{end}")),
            EntryValue::Prefix(prefix) => spec.prefix = Some(prefix),
        }
        Ok(Self { meta, spec })
    }

    /// Key of the entry.
    pub fn key(&self) -> NsName {
        self.meta.key()
    }

    /// Name of the owning claim.
    pub fn owner_name(&self) -> Option<&str> {
        self.meta
            .owner_references
            .iter()
            .find(|owner| owner.kind == OwnerKind::Claim)
            .map(|owner| owner.name.as_str())
    }

    /// Allocated value.
    pub fn value(&self) -> Result<EntryValue> {
        if let Some(id) = self.spec.id {
            return Ok(EntryValue::Id(id));
        }
        if let Some(range) = self.spec.id_range.as_deref() {
            let (start, end) = parse_id_range(range)?;
            return Ok(EntryValue::IdRange(start, end));
        }
        if let Some(prefix) = self.spec.prefix {
            return Ok(EntryValue::Prefix(prefix));
        }
        Err(PoolError::Corruption(format!(
            "entry {} carries no value",
            self.key()
        )))
    }
}

impl Fields for Entry {
    fn field(&self, path: &str) -> Option<String> {
        match path {
            "spec.index" => Some(self.spec.index.clone()),
            "spec.claimKind" => Some(self.spec.claim_kind.as_str().to_string()),
            "spec.range" => self.spec.range.clone(),
            _ => self.meta.field(path),
        }
    }
}

/// Deterministic entry name: `<pool>[.<scope>].<value>` with `/` and `:` flattened.
pub fn entry_name(pool: &str, scope: Option<&str>, value: &EntryValue) -> String {
    let value = match value {
        EntryValue::Id(id) => format!("id.{id}"),
        EntryValue::IdRange(start, end) => format!("range.{start}-{end}"),
        EntryValue::Prefix(prefix) => prefix.to_string(),
    };
    let raw = match scope {
        Some(scope) => format!("{pool}.{scope}.{value}"),
        None => format!("{pool}.{value}"),
    };
    raw.replace(['/', ':'], "-")
}
