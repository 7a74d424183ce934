//! Error type shared by the engine, its applicators and the storage
//! collaborators.

use std::io;

use thiserror::Error;

/// Result alias used across the allocation engine.
pub type Result<T> = std::result::Result<T, PoolError>;

/// Errors raised by the claim allocation engine and its collaborators.
#[derive(Debug, Error)]
pub enum PoolError {
    /// Malformed claim, entry or pool object.
    #[error("invalid {what}: {reason}")]
    Invalid {
        /// Object or field that failed syntax validation.
        what: &'static str,
        /// Human readable reason.
        reason: String,
    },
    /// Requested value lies outside the pool bounds.
    #[error("{value} is outside the pool bounds {bounds}")]
    OutOfBounds {
        /// Offending value.
        value: String,
        /// Bounds of the pool at validation time.
        bounds: String,
    },
    /// Value is already held by a different claim.
    #[error("{value} already allocated, owner mismatch (held by {holder})")]
    OwnerMismatch {
        /// Contested value.
        value: String,
        /// Owner currently holding the value.
        holder: String,
    },
    /// Parent prefix type does not admit the claim.
    #[error("{value} cannot be placed under {parent_type} prefix {parent}")]
    ParentType {
        /// Value being claimed.
        value: String,
        /// Parent route.
        parent: String,
        /// Declared type of the parent route.
        parent_type: String,
    },
    /// No containing prefix exists for the value.
    #[error("{0} has no parent prefix in the pool")]
    NoParent(String),
    /// Value would sit above existing routes it is not allowed to contain.
    #[error("{value} cannot have children ({children} existing)")]
    HasChildren {
        /// Value being claimed.
        value: String,
        /// Number of conflicting child routes.
        children: usize,
    },
    /// Value intersects an existing allocation.
    #[error("{value} overlaps existing allocation {existing}")]
    Overlap {
        /// Value being claimed.
        value: String,
        /// Allocation it intersects.
        existing: String,
    },
    /// Dynamic allocation found no free value.
    #[error("pool {0} exhausted")]
    Exhausted(String),
    /// Claim kind is not served by this backend.
    #[error("claim kind {kind} is not supported by the {backend} backend")]
    UnsupportedKind {
        /// Rendered claim kind.
        kind: String,
        /// Backend name.
        backend: &'static str,
    },
    /// Pool exists but its cache has not been restored.
    #[error("cache not initialized for pool {0}")]
    NotInitialized(String),
    /// Pool has no cache instance at all.
    #[error("pool {0} not found")]
    PoolNotFound(String),
    /// Replaying persisted claims failed.
    #[error("restore of pool {pool} failed at claim {claim}: {source}")]
    Restore {
        /// Pool being restored.
        pool: String,
        /// Claim whose replay failed.
        claim: String,
        /// Underlying validation failure.
        #[source]
        source: Box<PoolError>,
    },
    /// Storage collaborator failure.
    #[error("storage error: {0}")]
    Storage(String),
    /// I/O error from the file store.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    /// Serialization failure.
    #[error("serialization error: {0}")]
    Serialization(String),
    /// Persisted state is inconsistent.
    #[error("corruption detected: {0}")]
    Corruption(String),
}

impl PoolError {
    pub(crate) fn invalid(what: &'static str, reason: impl Into<String>) -> Self {
        PoolError::Invalid {
            what,
            reason: reason.into(),
        }
    }

    /// Returns true for errors raised by claim validation, before any mutation.
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            PoolError::Invalid { .. }
                | PoolError::OutOfBounds { .. }
                | PoolError::OwnerMismatch { .. }
                | PoolError::ParentType { .. }
                | PoolError::NoParent(_)
                | PoolError::HasChildren { .. }
                | PoolError::Overlap { .. }
                | PoolError::Exhausted(_)
                | PoolError::UnsupportedKind { .. }
        )
    }
}

impl From<serde_json::Error> for PoolError {
    fn from(err: serde_json::Error) -> Self {
        PoolError::Serialization(err.to_string())
    }
}
