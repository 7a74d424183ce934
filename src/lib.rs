//! Claim allocation engine for IP address pools and numeric id pools.
//!
//! A pool ([`IpIndex`](types::IpIndex) or [`NumericIndex`](types::NumericIndex))
//! is served by a [`Backend`](engine::Backend) that keeps one in-memory index per
//! pool, validates and applies [`Claim`](types::Claim)s against it and persists
//! the resulting [`Entry`](types::Entry) records through a [`Storage`](storage::Storage)
//! collaborator. After a restart the index is rebuilt by replaying persisted
//! claims, so dynamic claims get back the values they held.

#![warn(missing_docs)]

pub mod admin;
pub mod cache;
pub mod config;
pub mod engine;
pub mod error;
pub mod ipam;
pub mod logging;
pub mod numeric;
pub mod storage;
pub mod table;
pub mod types;

pub use engine::{Allocation, Backend, BackendOptions, RestoreReport};
pub use error::{PoolError, Result};
pub use ipam::IpamBackend;
pub use numeric::NumericBackend;
