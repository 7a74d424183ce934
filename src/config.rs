//! Engine configuration loaded from TOML.
//!
//! ```toml
//! field_owner = "idpool-engine"
//! log_filter = "idpool=info"
//! state_dir = "/var/lib/idpool"
//! ```

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::engine::DEFAULT_FIELD_OWNER;

/// Default `tracing` filter directive.
pub const DEFAULT_LOG_FILTER: &str = "idpool=info";

/// Settings shared by the engine and the admin tool.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EngineConfig {
    /// Field owner recorded on every record the engine writes.
    pub field_owner: String,
    /// `EnvFilter` directive used by [`init_logging`](crate::logging::init_logging).
    pub log_filter: String,
    /// Directory holding the file stores.
    pub state_dir: Option<PathBuf>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            field_owner: DEFAULT_FIELD_OWNER.to_string(),
            log_filter: DEFAULT_LOG_FILTER.to_string(),
            state_dir: None,
        }
    }
}

impl EngineConfig {
    /// Loads `explicit`, or the default path when none is given.
    ///
    /// A missing file yields the defaults; an explicit path must exist.
    pub fn load(explicit: Option<&Path>) -> Result<Self, ConfigError> {
        match explicit {
            Some(path) => read_file(path),
            None => match default_config_path() {
                Some(path) if path.exists() => read_file(&path),
                _ => Ok(Self::default()),
            },
        }
    }

    /// Parses a TOML document.
    pub fn from_toml(contents: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(contents)
    }
}

fn read_file(path: &Path) -> Result<EngineConfig, ConfigError> {
    let contents = fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    EngineConfig::from_toml(&contents).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

/// Configuration loading failures.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The file could not be read.
    #[error("failed to read config {path}: {source}")]
    Read {
        /// Config path.
        path: PathBuf,
        /// Underlying error.
        source: std::io::Error,
    },
    /// The file is not valid TOML for [`EngineConfig`].
    #[error("failed to parse config {path}: {source}")]
    Parse {
        /// Config path.
        path: PathBuf,
        /// Underlying error.
        source: toml::de::Error,
    },
}

/// `<config dir>/idpool/config.toml`, when the platform has a config dir.
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|base| base.join("idpool").join("config.toml"))
}
