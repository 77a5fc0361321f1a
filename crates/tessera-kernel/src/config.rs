//! Runtime configuration.
//!
//! Only knobs of the running kernel live here. Capability declarations are
//! assembled in code, never loaded from files.
//!
//! ```toml
//! module = "app"
//! layer = "domain"
//! logFilter = "tessera_kernel=debug"
//! postCallPolicy = "log"
//! rejectNullArguments = true
//! notifyLifecycleSinks = true
//! ```

use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

pub const DEFAULT_MODULE: &str = "default";
pub const DEFAULT_LAYER: &str = "application";
pub const DEFAULT_LOG_FILTER: &str = "warn";

/// What to do when a post-call observer fails.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PostCallPolicy {
    #[default]
    Log,
    Ignore,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct RuntimeConfig {
    pub module: String,
    pub layer: String,
    /// `EnvFilter` directive used when no environment override is set.
    pub log_filter: String,
    pub post_call_policy: PostCallPolicy,
    /// Reject `null` for parameters not declared optional.
    pub reject_null_arguments: bool,
    pub notify_lifecycle_sinks: bool,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            module: DEFAULT_MODULE.to_string(),
            layer: DEFAULT_LAYER.to_string(),
            log_filter: DEFAULT_LOG_FILTER.to_string(),
            post_call_policy: PostCallPolicy::Log,
            reject_null_arguments: true,
            notify_lifecycle_sinks: true,
        }
    }
}

impl RuntimeConfig {
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(text)?)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_keys_fall_back_to_defaults() {
        let config = RuntimeConfig::from_toml_str("module = \"app\"\npostCallPolicy = \"ignore\"\n").unwrap();
        assert_eq!(config.module, "app");
        assert_eq!(config.layer, DEFAULT_LAYER);
        assert_eq!(config.post_call_policy, PostCallPolicy::Ignore);
        assert!(config.reject_null_arguments);
    }

    #[test]
    fn empty_document_is_the_default_config() {
        assert_eq!(RuntimeConfig::from_toml_str("").unwrap(), RuntimeConfig::default());
    }

    #[test]
    fn unknown_policy_is_a_parse_error() {
        let err = RuntimeConfig::from_toml_str("postCallPolicy = \"panic\"").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn missing_file_reports_its_path() {
        let err = RuntimeConfig::load("/nonexistent/tessera.toml").unwrap_err();
        assert!(err.to_string().contains("/nonexistent/tessera.toml"));
    }
}
