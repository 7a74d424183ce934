//! `tracing` subscriber setup for binaries and embedders.

use tracing_subscriber::{fmt, EnvFilter};

use crate::error::{PoolError, Result};

/// Installs a global fmt subscriber filtered by `filter` (`EnvFilter` syntax).
///
/// Fails when the directive does not parse or a subscriber is already set.
pub fn init_logging(filter: &str) -> Result<()> {
    fmt()
        .with_env_filter(
            EnvFilter::try_new(filter)
                .map_err(|e| PoolError::invalid("log filter", e.to_string()))?,
        )
        .with_target(true)
        .with_writer(std::io::stderr)
        .try_init()
        .map_err(|_| PoolError::invalid("log filter", "logging already initialized"))
}
