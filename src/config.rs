// config.rs - VM runtime settings, loaded from TOML

use serde::Deserialize;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

/// Errors that can occur when loading a VM config file.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Timing and limits for one VM. Every field is optional in the file.
///
/// ```toml
/// poll_interval_ms = 100
/// key_hold_ms = 50
/// max_call_depth = 256
/// seed = 1234
/// max_wait_polls = 50
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct VmConfig {
    /// Delay between lock-light and button polls.
    pub poll_interval_ms: u64,

    /// How long a chord or lock toggle is held down.
    pub key_hold_ms: u64,

    /// Deepest allowed CALL nesting.
    pub max_call_depth: usize,

    /// Random seed; the wall clock is used when absent.
    pub seed: Option<u64>,

    /// Polls after which a lock or button wait gives up and the payload
    /// continues. Absent means wait forever.
    pub max_wait_polls: Option<u64>,
}

impl Default for VmConfig {
    fn default() -> Self {
        VmConfig {
            poll_interval_ms: 100,
            key_hold_ms: 50,
            max_call_depth: 256,
            seed: None,
            max_wait_polls: None,
        }
    }
}

impl VmConfig {
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: VmConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.poll_interval_ms == 0 {
            return Err(ConfigError::Invalid("poll_interval_ms must be positive".into()));
        }
        if self.max_call_depth == 0 {
            return Err(ConfigError::Invalid("max_call_depth must be positive".into()));
        }
        Ok(())
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn key_hold(&self) -> Duration {
        Duration::from_millis(self.key_hold_ms)
    }
}
