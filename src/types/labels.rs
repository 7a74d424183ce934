//! System label keys stamped onto index routes and entries.

use super::meta::Labels;

/// Prefix shared by every system label.
pub const SYSTEM_PREFIX: &str = "idpool.dev/";

/// Kind of the object owning the allocation (`Index` or `Claim`).
pub const OWNER_KIND: &str = "idpool.dev/owner-kind";
/// Namespace of the owning claim.
pub const OWNER_NAMESPACE: &str = "idpool.dev/owner-namespace";
/// Name of the owning claim.
pub const OWNER_NAME: &str = "idpool.dev/owner-name";
/// Claim kind that produced the allocation.
pub const CLAIM_KIND: &str = "idpool.dev/claim-kind";
/// Declared prefix type of a route.
pub const PREFIX_TYPE: &str = "idpool.dev/prefix-type";
/// Context prefix length of an address route (`10.0.0.1/24`).
pub const PREFIX_LENGTH: &str = "idpool.dev/prefix-length";
/// Range table a route or address belongs to.
pub const RANGE_NAME: &str = "idpool.dev/range-name";
/// Pool the record belongs to.
pub const INDEX: &str = "idpool.dev/index";

/// Returns true for keys managed by the engine.
pub fn is_system(key: &str) -> bool {
    key.starts_with(SYSTEM_PREFIX)
}

/// Copies the non-system labels of `labels`.
pub fn user_labels(labels: &Labels) -> Labels {
    labels
        .iter()
        .filter(|(key, _)| !is_system(key))
        .map(|(key, value)| (key.clone(), value.clone()))
        .collect()
}

/// Renders the owner identity stored in `labels` for error messages.
pub fn holder(labels: &Labels) -> String {
    match (labels.get(OWNER_NAMESPACE), labels.get(OWNER_NAME)) {
        (Some(ns), Some(name)) => format!("{ns}/{name}"),
        _ => "<unknown>".to_string(),
    }
}
