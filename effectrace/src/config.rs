//! Runtime configuration.
//!
//! Configuration can be built programmatically with [`RuntimeConfig::builder`],
//! read from `EFFECTRACE_*` environment variables with
//! [`RuntimeConfig::from_env`], or loaded from a TOML document:
//!
//! ```toml
//! max_stack_depth = 1024
//! check_shapes = true
//! trace_cache = false
//! ```
//!
//! | Variable                     | Field             |
//! |------------------------------|-------------------|
//! | `EFFECTRACE_MAX_STACK_DEPTH` | `max_stack_depth` |
//! | `EFFECTRACE_CHECK_SHAPES`    | `check_shapes`    |
//! | `EFFECTRACE_TRACE_CACHE`     | `trace_cache`     |

use std::env;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Smallest accepted activation stack limit: a root, one scope and a clause.
const MIN_STACK_DEPTH: usize = 3;

/// Configuration of the dispatch engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Maximum number of live activations during one call.
    ///
    /// A clause that resumes in tail position is popped before its scope
    /// continues. Any other resumed clause stays live until the scope
    /// completes, so a scope with `n` such dispatches needs about `n + 2`
    /// activations.
    pub max_stack_depth: usize,

    /// Check every delivered value against the abstract value of its slot.
    pub check_shapes: bool,

    /// Reuse traced programs across calls with the same argument signature.
    pub trace_cache: bool,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            max_stack_depth: 4096,
            check_shapes: true,
            trace_cache: true,
        }
    }
}

impl RuntimeConfig {
    /// Create a new builder for RuntimeConfig.
    pub fn builder() -> RuntimeConfigBuilder {
        RuntimeConfigBuilder::new()
    }

    /// Load configuration from environment variables.
    ///
    /// Unset or unparsable variables keep their default values.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Some(val) = parse_env_usize("EFFECTRACE_MAX_STACK_DEPTH") {
            if val >= MIN_STACK_DEPTH {
                config.max_stack_depth = val;
            }
        }

        if let Some(val) = parse_env_bool("EFFECTRACE_CHECK_SHAPES") {
            config.check_shapes = val;
        }

        if let Some(val) = parse_env_bool("EFFECTRACE_TRACE_CACHE") {
            config.trace_cache = val;
        }

        config
    }

    /// Parse a TOML document. Missing keys take their default values.
    pub fn from_toml_str(source: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(source)?;
        config.validate()?;
        Ok(config)
    }

    /// Read and parse a TOML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let source = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&source)
    }

    /// Validate the configuration and return any errors.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_stack_depth < MIN_STACK_DEPTH {
            return Err(ConfigError::InvalidValue {
                field: "max_stack_depth".into(),
                message: format!("must be at least {MIN_STACK_DEPTH}"),
            });
        }
        Ok(())
    }
}

/// Configuration error.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Invalid configuration value.
    #[error("invalid configuration for '{field}': {message}")]
    InvalidValue {
        /// Field name.
        field: String,
        /// Error message.
        message: String,
    },

    /// Malformed TOML.
    #[error("failed to parse configuration: {0}")]
    Parse(#[from] toml::de::Error),

    /// The configuration file could not be read.
    #[error("failed to read configuration file '{}': {source}", path.display())]
    Io {
        /// File path.
        path: PathBuf,
        /// Underlying error.
        source: std::io::Error,
    },
}

/// Builder for RuntimeConfig.
#[derive(Debug, Clone, Default)]
pub struct RuntimeConfigBuilder {
    config: RuntimeConfig,
}

impl RuntimeConfigBuilder {
    /// Create a new builder with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the activation stack limit.
    pub fn max_stack_depth(mut self, depth: usize) -> Self {
        self.config.max_stack_depth = depth;
        self
    }

    /// Enable or disable run-time shape checks.
    pub fn check_shapes(mut self, enabled: bool) -> Self {
        self.config.check_shapes = enabled;
        self
    }

    /// Enable or disable the per-signature trace cache.
    pub fn trace_cache(mut self, enabled: bool) -> Self {
        self.config.trace_cache = enabled;
        self
    }

    /// Build the configuration.
    ///
    /// This validates the configuration and returns an error if invalid.
    pub fn build(self) -> Result<RuntimeConfig, ConfigError> {
        self.config.validate()?;
        Ok(self.config)
    }
}

/// Parse an environment variable as usize.
fn parse_env_usize(name: &str) -> Option<usize> {
    env::var(name).ok().and_then(|s| s.parse().ok())
}

/// Parse an environment variable as bool.
fn parse_env_bool(name: &str) -> Option<bool> {
    env::var(name)
        .ok()
        .and_then(|s| match s.to_lowercase().as_str() {
            "true" | "1" | "yes" | "on" => Some(true),
            "false" | "0" | "no" | "off" => Some(false),
            _ => None,
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_default_config() {
        let config = RuntimeConfig::default();
        assert_eq!(config.max_stack_depth, 4096);
        assert!(config.check_shapes);
        assert!(config.trace_cache);
    }

    #[test]
    fn test_builder() {
        let config = RuntimeConfig::builder()
            .max_stack_depth(64)
            .check_shapes(false)
            .trace_cache(false)
            .build()
            .unwrap();

        assert_eq!(
            config,
            RuntimeConfig {
                max_stack_depth: 64,
                check_shapes: false,
                trace_cache: false,
            }
        );
    }

    #[test]
    fn test_builder_validation() {
        let err = RuntimeConfig::builder().max_stack_depth(1).build().unwrap_err();
        assert!(err.to_string().contains("max_stack_depth"));
    }

    #[test]
    fn test_from_toml_partial() {
        let config = RuntimeConfig::from_toml_str("max_stack_depth = 128\n").unwrap();
        assert_eq!(config.max_stack_depth, 128);
        assert!(config.check_shapes);
        assert!(config.trace_cache);
    }

    #[test]
    fn test_from_toml_rejects_bad_values() {
        let err = RuntimeConfig::from_toml_str("max_stack_depth = 0").unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { .. }));

        let err = RuntimeConfig::from_toml_str("check_shapes = \"maybe\"").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn test_from_file_missing() {
        let err = RuntimeConfig::from_file("/nonexistent/effectrace.toml").unwrap_err();
        assert!(matches!(err, ConfigError::Io { .. }));
        assert!(err.to_string().contains("effectrace.toml"));
    }

    #[test]
    fn test_from_env() {
        env::set_var("EFFECTRACE_MAX_STACK_DEPTH", "256");
        env::set_var("EFFECTRACE_CHECK_SHAPES", "off");
        env::set_var("EFFECTRACE_TRACE_CACHE", "not-a-bool");

        let config = RuntimeConfig::from_env();
        assert_eq!(config.max_stack_depth, 256);
        assert!(!config.check_shapes);
        assert!(config.trace_cache);

        env::remove_var("EFFECTRACE_MAX_STACK_DEPTH");
        env::remove_var("EFFECTRACE_CHECK_SHAPES");
        env::remove_var("EFFECTRACE_TRACE_CACHE");
    }
}
