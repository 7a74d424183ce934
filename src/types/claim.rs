use std::fmt;
use std::net::IpAddr;
use std::str::FromStr;

use ipnet::IpNet;
use serde::{Deserialize, Serialize};

use crate::error::{PoolError, Result};
use crate::table::addr;

use super::labels;
use super::meta::{set_condition, Condition, Labels, NsName, ObjectMeta, OwnerKind};
use super::pool::PrefixType;
use super::selector::{Fields, Selector};

/// Closed set of claim kinds served by the engine.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ClaimKind {
    /// One address, caller specified.
    StaticAddress,
    /// One prefix, caller specified.
    StaticPrefix,
    /// An address range carved out with its own allocation table.
    StaticRange,
    /// Lowest free address in a Network or Range scope.
    DynamicAddress,
    /// Lowest free prefix of a given length in an Aggregate scope.
    DynamicPrefix,
    /// One numeric id, caller specified.
    StaticId,
    /// Lowest free numeric id.
    DynamicId,
    /// A `start-end` numeric range.
    IdRange,
}

impl ClaimKind {
    /// Every claim kind, in declaration order.
    pub const ALL: [ClaimKind; 8] = [
        ClaimKind::StaticAddress,
        ClaimKind::StaticPrefix,
        ClaimKind::StaticRange,
        ClaimKind::DynamicAddress,
        ClaimKind::DynamicPrefix,
        ClaimKind::StaticId,
        ClaimKind::DynamicId,
        ClaimKind::IdRange,
    ];

    /// Kebab-case name.
    pub fn as_str(self) -> &'static str {
        match self {
            ClaimKind::StaticAddress => "static-address",
            ClaimKind::StaticPrefix => "static-prefix",
            ClaimKind::StaticRange => "static-range",
            ClaimKind::DynamicAddress => "dynamic-address",
            ClaimKind::DynamicPrefix => "dynamic-prefix",
            ClaimKind::StaticId => "static-id",
            ClaimKind::DynamicId => "dynamic-id",
            ClaimKind::IdRange => "id-range",
        }
    }

    /// True for kinds where the engine picks the value.
    pub fn is_dynamic(self) -> bool {
        matches!(
            self,
            ClaimKind::DynamicAddress | ClaimKind::DynamicPrefix | ClaimKind::DynamicId
        )
    }
}

impl fmt::Display for ClaimKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ClaimKind {
    type Err = PoolError;

    fn from_str(s: &str) -> Result<Self> {
        ClaimKind::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| PoolError::invalid("claim kind", format!("unknown kind {s:?}")))
    }
}

/// Requested value or selection constraints of a claim.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClaimSpec {
    /// Name of the pool in the claim's namespace.
    pub index: String,
    /// Allocation policy.
    pub kind: ClaimKind,
    /// Static numeric id.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<u64>,
    /// `start-end` range for range kinds; names the range scope for dynamic addresses.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub range: Option<String>,
    /// Static address.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<IpAddr>,
    /// Static prefix.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prefix: Option<IpNet>,
    /// Context length for addresses, requested length for dynamic prefixes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prefix_length: Option<u8>,
    /// Declared type of a prefix claim.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prefix_type: Option<PrefixType>,
    /// Label selector restricting the parent scope of dynamic claims.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub selector: Option<Selector>,
    /// User labels carried onto the allocation.
    #[serde(default)]
    pub labels: Labels,
}

impl ClaimSpec {
    /// Empty spec of the given kind against pool `index`.
    pub fn new(index: impl Into<String>, kind: ClaimKind) -> Self {
        Self {
            index: index.into(),
            kind,
            id: None,
            range: None,
            address: None,
            prefix: None,
            prefix_length: None,
            prefix_type: None,
            selector: None,
            labels: Labels::new(),
        }
    }

    /// Sets the static id.
    pub fn id(mut self, id: u64) -> Self {
        self.id = Some(id);
        self
    }

    /// Sets the range string.
    pub fn range(mut self, range: impl Into<String>) -> Self {
        self.range = Some(range.into());
        self
    }

    /// Sets the static address.
    pub fn address(mut self, address: IpAddr) -> Self {
        self.address = Some(address);
        self
    }

    /// Sets the static prefix.
    pub fn prefix(mut self, prefix: IpNet) -> Self {
        self.prefix = Some(prefix);
        self
    }

    /// Sets the prefix length.
    pub fn prefix_length(mut self, len: u8) -> Self {
        self.prefix_length = Some(len);
        self
    }

    /// Sets the prefix type.
    pub fn prefix_type(mut self, ty: PrefixType) -> Self {
        self.prefix_type = Some(ty);
        self
    }

    /// Sets the parent selector.
    pub fn selector(mut self, selector: Selector) -> Self {
        self.selector = Some(selector);
        self
    }

    /// Adds one user label.
    pub fn label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.labels.insert(key.into(), value.into());
        self
    }
}

/// Allocated value written back by the engine.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClaimStatus {
    /// Allocated numeric id.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<u64>,
    /// Allocated range (`start-end`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub range: Option<String>,
    /// Allocated prefix.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prefix: Option<IpNet>,
    /// Allocated address with its context length.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<IpNet>,
    /// Status conditions.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<Condition>,
}

/// A request for one identifier, address, prefix or range from a pool.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claim {
    /// Object metadata.
    pub meta: ObjectMeta,
    /// Requested allocation.
    pub spec: ClaimSpec,
    /// Allocation result.
    #[serde(default)]
    pub status: ClaimStatus,
}

impl Claim {
    /// Creates a claim with empty status.
    pub fn new(namespace: impl Into<String>, name: impl Into<String>, spec: ClaimSpec) -> Self {
        Self {
            meta: ObjectMeta::new(namespace, name),
            spec,
            status: ClaimStatus::default(),
        }
    }

    /// Key of the claim.
    pub fn key(&self) -> NsName {
        self.meta.key()
    }

    /// Key of the pool the claim draws from.
    pub fn pool_key(&self) -> NsName {
        NsName::new(self.meta.namespace.clone(), self.spec.index.clone())
    }

    /// `Index` for pool-synthesized claims, `Claim` otherwise.
    pub fn owner_kind(&self) -> OwnerKind {
        if self
            .meta
            .owner_references
            .iter()
            .any(|owner| owner.kind == OwnerKind::Index)
        {
            OwnerKind::Index
        } else {
            OwnerKind::Claim
        }
    }

    /// Labels identifying this claim as the owner of an allocation.
    pub fn owner_labels(&self) -> Labels {
        let mut out = Labels::new();
        out.insert(labels::OWNER_KIND.into(), self.owner_kind().as_str().into());
        out.insert(labels::OWNER_NAMESPACE.into(), self.meta.namespace.clone());
        out.insert(labels::OWNER_NAME.into(), self.meta.name.clone());
        out.insert(labels::CLAIM_KIND.into(), self.spec.kind.as_str().into());
        out.insert(labels::INDEX.into(), self.spec.index.clone());
        out
    }

    /// User labels merged under the owner labels.
    pub fn allocation_labels(&self) -> Labels {
        let mut out = labels::user_labels(&self.spec.labels);
        out.extend(self.owner_labels());
        out
    }

    /// True when `stored` labels belong to this claim.
    pub fn owns(&self, stored: &Labels) -> bool {
        stored.get(labels::OWNER_NAMESPACE) == Some(&self.meta.namespace)
            && stored.get(labels::OWNER_NAME) == Some(&self.meta.name)
            && stored.get(labels::OWNER_KIND).map(String::as_str)
                == Some(self.owner_kind().as_str())
    }

    /// Fails with [`PoolError::OwnerMismatch`] unless `stored` belongs to this claim.
    pub fn validate_owner(&self, value: impl fmt::Display, stored: &Labels) -> Result<()> {
        if self.owns(stored) {
            Ok(())
        } else {
            Err(PoolError::OwnerMismatch {
                value: value.to_string(),
                holder: labels::holder(stored),
            })
        }
    }

    /// Checks that the fields required by the claim kind are present and well formed.
    pub fn validate_syntax(&self) -> Result<()> {
        if self.meta.name.is_empty() {
            return Err(PoolError::invalid("claim", "name must not be empty"));
        }
        if self.spec.index.is_empty() {
            return Err(PoolError::invalid("claim", "spec.index must not be empty"));
        }
        match self.spec.kind {
            ClaimKind::StaticId => {
                self.spec
                    .id
                    .ok_or_else(|| PoolError::invalid("claim", "static-id requires spec.id"))?;
            }
            ClaimKind::DynamicId => {}
            ClaimKind::IdRange => {
                parse_id_range(self.required_range()?)?;
            }
            ClaimKind::StaticAddress => {
                let address = self.spec.address.ok_or_else(|| {
                    PoolError::invalid("claim", "static-address requires spec.address")
                })?;
                if let Some(len) = self.spec.prefix_length {
                    if len > addr::width(&address) {
                        return Err(PoolError::invalid(
                            "claim",
                            format!("prefix length {len} too long for {address}"),
                        ));
                    }
                }
            }
            ClaimKind::StaticPrefix => {
                let prefix = self.spec.prefix.ok_or_else(|| {
                    PoolError::invalid("claim", "static-prefix requires spec.prefix")
                })?;
                if prefix != prefix.trunc() {
                    return Err(PoolError::invalid(
                        "claim",
                        format!("{prefix} is not a network prefix (expected {})", prefix.trunc()),
                    ));
                }
                if prefix.prefix_len() == prefix.max_prefix_len() {
                    return Err(PoolError::invalid(
                        "claim",
                        format!("{prefix} is a host address, use static-address"),
                    ));
                }
                self.check_prefix_type()?;
            }
            ClaimKind::StaticRange => {
                addr::parse_ip_range(self.required_range()?)?;
            }
            ClaimKind::DynamicAddress => {
                if let Some(range) = self.spec.range.as_deref() {
                    addr::parse_ip_range(range)?;
                }
            }
            ClaimKind::DynamicPrefix => {
                let len = self.spec.prefix_length.ok_or_else(|| {
                    PoolError::invalid("claim", "dynamic-prefix requires spec.prefix_length")
                })?;
                if len == 0 || len > 128 {
                    return Err(PoolError::invalid(
                        "claim",
                        format!("prefix length {len} out of range"),
                    ));
                }
                self.check_prefix_type()?;
            }
        }
        Ok(())
    }

    fn required_range(&self) -> Result<&str> {
        self.spec.range.as_deref().ok_or_else(|| {
            PoolError::invalid("claim", format!("{} requires spec.range", self.spec.kind))
        })
    }

    fn check_prefix_type(&self) -> Result<()> {
        if self.spec.prefix_type == Some(PrefixType::Range) {
            return Err(PoolError::invalid(
                "claim",
                "prefix type range is reserved for static-range claims",
            ));
        }
        Ok(())
    }

    /// Marks the claim ready after a successful apply.
    pub fn set_ready(&mut self) {
        set_condition(&mut self.status.conditions, Condition::ready());
    }
}

impl Fields for Claim {
    fn field(&self, path: &str) -> Option<String> {
        match path {
            "spec.index" => Some(self.spec.index.clone()),
            "spec.kind" => Some(self.spec.kind.as_str().to_string()),
            _ => self.meta.field(path),
        }
    }
}

/// Parses a numeric `start-end` range.
pub fn parse_id_range(raw: &str) -> Result<(u64, u64)> {
    let bad = || PoolError::invalid("range", format!("{raw:?} is not a start-end range"));
    let (start, end) = raw.trim().split_once('-').ok_or_else(bad)?;
    let start: u64 = start.trim().parse().map_err(|_| bad())?;
    let end: u64 = end.trim().parse().map_err(|_| bad())?;
    if start > end {
        return Err(PoolError::invalid(
            "range",
            format!("{raw:?} starts after it ends"),
        ));
    }
    Ok((start, end))
}
