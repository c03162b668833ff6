//! Configuration loading from mcpx.toml.

use policy::Policy;
use runtime::RuntimeConfig;
use serde::Deserialize;
use std::path::Path;

pub const CONFIG_FILE: &str = "mcpx.toml";

/// Top-level configuration.
#[derive(Debug, Default, Deserialize)]
pub struct Config {
    /// Execution limits and session behavior.
    #[serde(default)]
    pub runtime: RuntimeConfig,

    /// Policy rules (allow/deny).
    #[serde(flatten)]
    pub policy: Policy,
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path.as_ref())?;
        Self::parse(&content)
    }

    /// Parse configuration from TOML string.
    pub fn parse(toml: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(toml).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Load `path` if given, otherwise `mcpx.toml` in the working directory
    /// when present, otherwise defaults.
    pub fn discover(path: Option<&Path>) -> Result<Self, ConfigError> {
        match path {
            Some(path) => Self::load(path),
            None if Path::new(CONFIG_FILE).exists() => Self::load(CONFIG_FILE),
            None => Ok(Self::default()),
        }
    }

    fn validate(&self) -> Result<(), ConfigError> {
        let runtime = &self.runtime;
        if runtime.timeout_ms == 0 {
            return Err(ConfigError::Invalid("runtime.timeout_ms must be positive".into()));
        }
        if runtime.max_recursion_depth == 0 {
            return Err(ConfigError::Invalid(
                "runtime.max_recursion_depth must be positive".into(),
            ));
        }
        if runtime.default_session.is_empty() {
            return Err(ConfigError::Invalid("runtime.default_session must not be empty".into()));
        }
        Ok(())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse config: {0}")]
    Parse(String),

    #[error("invalid config: {0}")]
    Invalid(String),
}
