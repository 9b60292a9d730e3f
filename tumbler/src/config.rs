//! Run configuration.
//!
//! Every field has a default, so a configuration file only needs the values
//! it changes:
//!
//! ```json
//! { "retry": { "max_attempts": 5 }, "backend": { "docker_binary": "podman" } }
//! ```

use crate::backend::BackendConfig;
use crate::errors::TumblerError;
use crate::unit::RetryConfig;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Configuration of the unit runner and the execution backends.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TumblerConfig {
    /// Attempt and timeout policy.
    #[serde(default)]
    pub retry: RetryConfig,
    /// Backend programs and pull policy.
    #[serde(default)]
    pub backend: BackendConfig,
}

impl TumblerConfig {
    /// Creates a configuration with defaults.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the retry policy.
    #[must_use]
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Sets the backend configuration.
    #[must_use]
    pub fn with_backend(mut self, backend: BackendConfig) -> Self {
        self.backend = backend;
        self
    }

    /// Parses and validates a JSON configuration.
    ///
    /// # Errors
    ///
    /// Returns [`TumblerError::Config`] for malformed JSON or invalid values.
    pub fn from_json_str(json: &str) -> Result<Self, TumblerError> {
        let config: Self = serde_json::from_str(json)
            .map_err(|e| TumblerError::Config(format!("invalid configuration: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Reads, parses and validates a JSON configuration file.
    ///
    /// # Errors
    ///
    /// Returns [`TumblerError::Config`] if the file cannot be read or is
    /// invalid.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, TumblerError> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path).map_err(|e| {
            TumblerError::Config(format!("cannot read {}: {e}", path.display()))
        })?;
        Self::from_json_str(&json)
    }

    /// Validates every section.
    ///
    /// # Errors
    ///
    /// Returns the first [`TumblerError::Config`] violation.
    pub fn validate(&self) -> Result<(), TumblerError> {
        self.retry.validate()?;
        self.backend.validate()
    }
}
