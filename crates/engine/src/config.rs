//! Coordinator configuration
//!
//! Loaded from TOML. Every key is optional; unknown keys are rejected.
//!
//! ```toml
//! factory_managed_sessions = false
//! nested_transactions_allowed = true
//! global_rollback_on_participation_failure = true
//! fail_early_on_global_rollback_only = false
//! rollback_on_commit_failure = false
//! default_timeout_secs = 30
//! ```

use serde::{Deserialize, Serialize};
use sessionbind_core::Error;
use std::path::Path;
use std::time::Duration;
use thiserror::Error as ThisError;

/// Failure while loading a configuration file
#[derive(Debug, ThisError)]
pub enum ConfigError {
    /// The file could not be read
    #[error("cannot read {path}: {source}")]
    Io {
        /// File that was being read
        path: String,
        /// Underlying I/O failure
        #[source]
        source: std::io::Error,
    },

    /// The contents are not a valid configuration
    #[error("cannot parse configuration: {0}")]
    Parse(#[from] toml::de::Error),
}

impl From<ConfigError> for Error {
    fn from(e: ConfigError) -> Self {
        Error::Config(e.to_string())
    }
}

/// Behavior switches of the transaction coordinator
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CoordinatorConfig {
    /// Ask the factory for its own current session when nothing is bound
    pub factory_managed_sessions: bool,

    /// Honor NESTED propagation inside an existing transaction
    pub nested_transactions_allowed: bool,

    /// A failing participant marks the whole transaction rollback-only
    pub global_rollback_on_participation_failure: bool,

    /// Report a rollback-only transaction to the participant that observes it,
    /// not only to the owner
    pub fail_early_on_global_rollback_only: bool,

    /// Roll back natively when a native commit fails
    pub rollback_on_commit_failure: bool,

    /// Timeout for definitions that carry none, in seconds
    pub default_timeout_secs: Option<u64>,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            factory_managed_sessions: false,
            nested_transactions_allowed: true,
            global_rollback_on_participation_failure: true,
            fail_early_on_global_rollback_only: false,
            rollback_on_commit_failure: false,
            default_timeout_secs: None,
        }
    }
}

impl CoordinatorConfig {
    /// Parse from a TOML document
    pub fn from_toml_str(source: &str) -> Result<Self, Error> {
        let config = toml::from_str(source).map_err(ConfigError::from)?;
        Ok(config)
    }

    /// Load from a TOML file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, Error> {
        let path = path.as_ref();
        let source = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml_str(&source)
    }

    /// Default timeout as a duration
    pub fn default_timeout(&self) -> Option<Duration> {
        self.default_timeout_secs.map(Duration::from_secs)
    }
}
