use std::collections::BTreeSet;
use std::fmt;

use ipnet::IpNet;
use serde::{Deserialize, Serialize};

use crate::error::{PoolError, Result};

use super::claim::{Claim, ClaimKind, ClaimSpec};
use super::labels;
use super::meta::{set_condition, Condition, Labels, ObjectMeta, OwnerKind, OwnerReference};
use super::record::Record;
use super::selector::Fields;

/// Declared role of a prefix route.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PrefixType {
    /// Container of other prefixes; never holds addresses directly.
    Aggregate,
    /// Subnet holding addresses; never holds child prefixes.
    Network,
    /// Installed by range claims, backed by a range table.
    Range,
    /// Untyped prefix.
    #[default]
    Other,
}

impl PrefixType {
    /// Kebab-case name, as stored in route labels.
    pub fn as_str(self) -> &'static str {
        match self {
            PrefixType::Aggregate => "aggregate",
            PrefixType::Network => "network",
            PrefixType::Range => "range",
            PrefixType::Other => "other",
        }
    }

    /// Reads the type stored in route labels, defaulting to `Other`.
    pub fn from_labels(stored: &Labels) -> Self {
        match stored.get(labels::PREFIX_TYPE).map(String::as_str) {
            Some("aggregate") => PrefixType::Aggregate,
            Some("network") => PrefixType::Network,
            Some("range") => PrefixType::Range,
            _ => PrefixType::Other,
        }
    }
}

impl fmt::Display for PrefixType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Status shared by both pool kinds.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexStatus {
    /// Status conditions; `Ready` is maintained by the engine.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<Condition>,
}

/// Contract the engine needs from a pool object.
pub trait PoolObject: Record {
    /// Syntactic validation of the declared bounds.
    fn validate_syntax(&self) -> Result<()>;

    /// Current conditions.
    fn conditions(&self) -> &[Condition];

    /// Replaces the condition of the same kind.
    fn set_condition(&mut self, condition: Condition);

    /// Claims synthesized from the declared bounds.
    fn pool_claims(&self) -> Vec<Claim>;
}

fn synthesized_claim(meta: &ObjectMeta, name: String, spec: ClaimSpec) -> Claim {
    let mut claim = Claim::new(meta.namespace.clone(), name, spec);
    claim.meta.owner_references.push(OwnerReference {
        kind: OwnerKind::Index,
        name: meta.name.clone(),
    });
    claim
        .meta
        .labels
        .insert(labels::INDEX.into(), meta.name.clone());
    claim
}

/// One declared prefix of an IP pool.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct IpIndexPrefix {
    /// Canonical prefix.
    pub prefix: IpNet,
    /// Declared type.
    #[serde(default)]
    pub prefix_type: PrefixType,
    /// Labels inherited by allocations under the prefix.
    #[serde(default, skip_serializing_if = "Labels::is_empty")]
    pub labels: Labels,
}

/// Declared prefixes of an IP pool.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IpIndexSpec {
    /// Root prefixes.
    pub prefixes: Vec<IpIndexPrefix>,
}

/// Hierarchical address pool.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct IpIndex {
    /// Object metadata.
    pub meta: ObjectMeta,
    /// Declared prefixes.
    pub spec: IpIndexSpec,
    /// Conditions.
    #[serde(default)]
    pub status: IndexStatus,
}

impl IpIndex {
    /// Creates a pool declaring `prefixes`.
    pub fn new(
        namespace: impl Into<String>,
        name: impl Into<String>,
        prefixes: Vec<IpIndexPrefix>,
    ) -> Self {
        Self {
            meta: ObjectMeta::new(namespace, name),
            spec: IpIndexSpec { prefixes },
            status: IndexStatus::default(),
        }
    }

    /// Declared prefixes as plain networks.
    pub fn declared(&self) -> Vec<IpNet> {
        self.spec.prefixes.iter().map(|p| p.prefix).collect()
    }
}

impl IpIndexPrefix {
    /// Declares `prefix` with the given type and no labels.
    pub fn new(prefix: IpNet, prefix_type: PrefixType) -> Self {
        Self {
            prefix,
            prefix_type,
            labels: Labels::new(),
        }
    }
}

impl PoolObject for IpIndex {
    fn validate_syntax(&self) -> Result<()> {
        if self.meta.name.is_empty() {
            return Err(PoolError::invalid("ip index", "name must not be empty"));
        }
        if self.spec.prefixes.is_empty() {
            return Err(PoolError::invalid("ip index", "at least one prefix is required"));
        }
        let mut seen = BTreeSet::new();
        for declared in &self.spec.prefixes {
            let prefix = declared.prefix;
            if prefix != prefix.trunc() {
                return Err(PoolError::invalid(
                    "ip index",
                    format!("{prefix} is not a network prefix"),
                ));
            }
            if prefix.prefix_len() == prefix.max_prefix_len() {
                return Err(PoolError::invalid(
                    "ip index",
                    format!("{prefix} is a host address"),
                ));
            }
            if declared.prefix_type == PrefixType::Range {
                return Err(PoolError::invalid(
                    "ip index",
                    format!("{prefix} cannot be declared with type range"),
                ));
            }
            if !seen.insert(prefix) {
                return Err(PoolError::invalid(
                    "ip index",
                    format!("{prefix} declared twice"),
                ));
            }
        }
        Ok(())
    }

    fn conditions(&self) -> &[Condition] {
        &self.status.conditions
    }

    fn set_condition(&mut self, condition: Condition) {
        set_condition(&mut self.status.conditions, condition);
    }

    fn pool_claims(&self) -> Vec<Claim> {
        let mut declared: Vec<&IpIndexPrefix> = self.spec.prefixes.iter().collect();
        declared.sort_by_key(|p| (p.prefix.prefix_len(), p.prefix.network()));
        declared
            .into_iter()
            .map(|declared| {
                let name = format!("{}.{}", self.meta.name, declared.prefix).replace(['/', ':'], "-");
                let mut spec = ClaimSpec::new(self.meta.name.clone(), ClaimKind::StaticPrefix)
                    .prefix(declared.prefix)
                    .prefix_type(declared.prefix_type);
                spec.labels = declared.labels.clone();
                synthesized_claim(&self.meta, name, spec)
            })
            .collect()
    }
}

impl Fields for IpIndex {
    fn field(&self, path: &str) -> Option<String> {
        self.meta.field(path)
    }
}

/// Identifier space of a numeric pool.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum IdSpace {
    /// Generic 16-bit ids.
    Bits16,
    /// Generic 32-bit ids.
    Bits32,
    /// Generic 48-bit ids.
    Bits48,
    /// Generic 64-bit ids.
    Bits64,
    /// Autonomous system numbers (32-bit).
    As,
    /// VLAN ids, 12 bits valid.
    Vlan,
}

impl IdSpace {
    /// Largest id of the space.
    pub fn max(self) -> u64 {
        match self {
            IdSpace::Bits16 => u64::from(u16::MAX),
            IdSpace::Bits32 | IdSpace::As => u64::from(u32::MAX),
            IdSpace::Bits48 => (1u64 << 48) - 1,
            IdSpace::Bits64 => u64::MAX,
            IdSpace::Vlan => 4095,
        }
    }
}

/// Declared bounds of a numeric pool.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct NumericIndexSpec {
    /// Identifier space.
    pub space: IdSpace,
    /// Lowest id users may claim; defaults to 0.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_id: Option<u64>,
    /// Highest id users may claim; defaults to the space maximum.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_id: Option<u64>,
}

/// Flat numeric pool (AS numbers, VLAN ids, generic ids).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct NumericIndex {
    /// Object metadata.
    pub meta: ObjectMeta,
    /// Declared bounds.
    pub spec: NumericIndexSpec,
    /// Conditions.
    #[serde(default)]
    pub status: IndexStatus,
}

impl NumericIndex {
    /// Creates a pool over `space` limited to `[min_id, max_id]`.
    pub fn new(
        namespace: impl Into<String>,
        name: impl Into<String>,
        space: IdSpace,
        min_id: Option<u64>,
        max_id: Option<u64>,
    ) -> Self {
        Self {
            meta: ObjectMeta::new(namespace, name),
            spec: NumericIndexSpec {
                space,
                min_id,
                max_id,
            },
            status: IndexStatus::default(),
        }
    }

    /// Effective lower bound.
    pub fn min_id(&self) -> u64 {
        self.spec.min_id.unwrap_or(0)
    }

    /// Effective upper bound.
    pub fn max_id(&self) -> u64 {
        self.spec.max_id.unwrap_or_else(|| self.spec.space.max())
    }

    /// Name of the boundary claim reserving ids below `min_id`.
    pub fn low_boundary_name(&self) -> String {
        format!("{}.boundary-low", self.meta.name)
    }

    /// Name of the boundary claim reserving ids above `max_id`.
    pub fn high_boundary_name(&self) -> String {
        format!("{}.boundary-high", self.meta.name)
    }
}

impl PoolObject for NumericIndex {
    fn validate_syntax(&self) -> Result<()> {
        if self.meta.name.is_empty() {
            return Err(PoolError::invalid("numeric index", "name must not be empty"));
        }
        let (min, max, limit) = (self.min_id(), self.max_id(), self.spec.space.max());
        if min > max {
            return Err(PoolError::invalid(
                "numeric index",
                format!("min id {min} exceeds max id {max}"),
            ));
        }
        if max > limit {
            return Err(PoolError::invalid(
                "numeric index",
                format!("max id {max} exceeds the {:?} limit {limit}", self.spec.space),
            ));
        }
        Ok(())
    }

    fn conditions(&self) -> &[Condition] {
        &self.status.conditions
    }

    fn set_condition(&mut self, condition: Condition) {
        set_condition(&mut self.status.conditions, condition);
    }

    fn pool_claims(&self) -> Vec<Claim> {
        let mut out = Vec::with_capacity(2);
        let (min, max, limit) = (self.min_id(), self.max_id(), self.spec.space.max());
        if min > 0 {
            let spec = ClaimSpec::new(self.meta.name.clone(), ClaimKind::IdRange)
                .range(format!("0-{}", min - 1));
            out.push(synthesized_claim(&self.meta, self.low_boundary_name(), spec));
        }
        if max < limit {
            let spec = ClaimSpec::new(self.meta.name.clone(), ClaimKind::IdRange)
                .range(format!("{}-{limit}", max + 1));
            out.push(synthesized_claim(&self.meta, self.high_boundary_name(), spec));
        }
        out
    }
}

impl Fields for NumericIndex {
    fn field(&self, path: &str) -> Option<String> {
        self.meta.field(path)
    }
}
