use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::error::PoolError;

/// Ordered label map attached to objects and index routes.
pub type Labels = BTreeMap<String, String>;

/// Namespaced object key.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NsName {
    /// Namespace of the object.
    pub namespace: String,
    /// Name of the object, unique within its namespace and kind.
    pub name: String,
}

impl NsName {
    /// Builds a key from namespace and name.
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }
}

impl FromStr for NsName {
    type Err = PoolError;

    /// Parses `namespace/name`.
    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.split_once('/') {
            Some((namespace, name)) if !namespace.is_empty() && !name.is_empty() => {
                Ok(NsName::new(namespace, name))
            }
            _ => Err(PoolError::invalid(
                "key",
                format!("{raw:?} is not of the form namespace/name"),
            )),
        }
    }
}

impl fmt::Display for NsName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

/// Kind of object that owns a claim or an entry.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum OwnerKind {
    /// Synthesized by a pool (declared prefixes, numeric boundaries).
    Index,
    /// Regular user claim.
    Claim,
}

impl OwnerKind {
    /// Stable string form used in labels.
    pub fn as_str(self) -> &'static str {
        match self {
            OwnerKind::Index => "Index",
            OwnerKind::Claim => "Claim",
        }
    }

    /// Parses the label form produced by [`OwnerKind::as_str`].
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "Index" => Some(OwnerKind::Index),
            "Claim" => Some(OwnerKind::Claim),
            _ => None,
        }
    }
}

/// Reference from a dependent object to its owner in the same namespace.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct OwnerReference {
    /// Owner kind.
    pub kind: OwnerKind,
    /// Owner name.
    pub name: String,
}

/// Metadata shared by every persisted record.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectMeta {
    /// Object namespace.
    pub namespace: String,
    /// Object name.
    pub name: String,
    /// Object labels.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: Labels,
    /// Owners of this object.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub owner_references: Vec<OwnerReference>,
    /// Monotonic version assigned by storage on every apply.
    #[serde(default)]
    pub resource_version: u64,
    /// Field owner of the last apply.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub managed_by: Option<String>,
}

impl ObjectMeta {
    /// Creates metadata with the given namespace and name.
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
            ..Self::default()
        }
    }

    /// Key of the object.
    pub fn key(&self) -> NsName {
        NsName::new(self.namespace.clone(), self.name.clone())
    }

    /// Resolves `metadata.*` field paths for selector matching.
    pub(crate) fn field(&self, path: &str) -> Option<String> {
        match path {
            "metadata.name" => Some(self.name.clone()),
            "metadata.namespace" => Some(self.namespace.clone()),
            "metadata.ownerReferences.kind" => self
                .owner_references
                .first()
                .map(|owner| owner.kind.as_str().to_string()),
            "metadata.ownerReferences.name" => {
                self.owner_references.first().map(|owner| owner.name.clone())
            }
            _ => path
                .strip_prefix("metadata.labels.")
                .and_then(|key| self.labels.get(key).cloned()),
        }
    }
}

/// Condition type written by the engine onto pools and claims.
pub const CONDITION_READY: &str = "Ready";

/// Status condition.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Condition {
    /// Condition type, e.g. `Ready`.
    pub kind: String,
    /// Whether the condition holds.
    pub status: bool,
    /// Machine readable reason.
    pub reason: String,
    /// Human readable message.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub message: String,
    /// Unix timestamp of the last status flip.
    pub last_transition_unix: i64,
}

impl Condition {
    /// `Ready=True` condition.
    pub fn ready() -> Self {
        Self {
            kind: CONDITION_READY.to_string(),
            status: true,
            reason: "Ready".to_string(),
            message: String::new(),
            last_transition_unix: OffsetDateTime::now_utc().unix_timestamp(),
        }
    }

    /// `Ready=False` condition with a reason and message.
    pub fn failed(reason: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind: CONDITION_READY.to_string(),
            status: false,
            reason: reason.into(),
            message: message.into(),
            last_transition_unix: OffsetDateTime::now_utc().unix_timestamp(),
        }
    }
}

/// Replaces the condition of the same kind, keeping the transition time when
/// the status did not flip.
pub fn set_condition(conditions: &mut Vec<Condition>, mut condition: Condition) {
    if let Some(existing) = conditions.iter_mut().find(|c| c.kind == condition.kind) {
        if existing.status == condition.status {
            condition.last_transition_unix = existing.last_transition_unix;
        }
        *existing = condition;
    } else {
        conditions.push(condition);
    }
}

/// Returns the condition of the given kind.
pub fn get_condition<'a>(conditions: &'a [Condition], kind: &str) -> Option<&'a Condition> {
    conditions.iter().find(|c| c.kind == kind)
}
