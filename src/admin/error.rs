use std::path::{Path, PathBuf};

use crate::config::ConfigError;
use crate::error::PoolError;
use thiserror::Error;

/// Error type for administrative operations.
#[derive(Debug, Error)]
pub enum AdminError {
    /// State directory not found at the specified path.
    #[error("state directory not found: {0}")]
    MissingStateDir(PathBuf),
    /// No state directory given and none configured.
    #[error("no state directory; pass --state-dir or set state_dir in the config")]
    NoStateDir,
    /// Engine or storage error.
    #[error(transparent)]
    Pool(#[from] PoolError),
    /// Configuration error.
    #[error(transparent)]
    Config(#[from] ConfigError),
}

/// Result type alias for administrative operations.
pub type Result<T> = std::result::Result<T, AdminError>;

impl AdminError {
    pub(crate) fn missing_state_dir(path: impl AsRef<Path>) -> Self {
        AdminError::MissingStateDir(path.as_ref().to_path_buf())
    }
}
