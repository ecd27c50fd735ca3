//! Tracking policy configuration

use crate::ConfigError;
use serde::{Deserialize, Serialize};

/// Environment variable for [`TrackingPolicy::lazy_versioning`].
pub const ENV_LAZY_VERSIONING: &str = "LINEAGE_LAZY_VERSIONING";

/// Environment variable for [`TrackingPolicy::autocommit`].
pub const ENV_AUTOCOMMIT: &str = "LINEAGE_AUTOCOMMIT";

/// Policy flags applied to every tracked program.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackingPolicy {
    /// Resolve a program's closure on first use instead of when it is tracked.
    pub lazy_versioning: bool,
    /// Generate a commit message when a new version supersedes an older one.
    pub autocommit: bool,
}

impl Default for TrackingPolicy {
    fn default() -> Self {
        Self {
            lazy_versioning: true,
            autocommit: false,
        }
    }
}

impl TrackingPolicy {
    /// Create a policy from environment variables.
    ///
    /// Environment variables:
    /// - `LINEAGE_LAZY_VERSIONING`: boolean (default: true)
    /// - `LINEAGE_AUTOCOMMIT`: boolean (default: false)
    ///
    /// Booleans accept `true/1/yes/on` and `false/0/no/off`, case-insensitive.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_env_with(|key| std::env::var(key).ok())
    }

    /// Same as [`TrackingPolicy::from_env`] with a custom variable lookup.
    pub fn from_env_with<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        let lazy_versioning = match lookup(ENV_LAZY_VERSIONING) {
            Some(raw) => parse_bool(ENV_LAZY_VERSIONING, &raw)?,
            None => defaults.lazy_versioning,
        };

        let autocommit = match lookup(ENV_AUTOCOMMIT) {
            Some(raw) => parse_bool(ENV_AUTOCOMMIT, &raw)?,
            None => defaults.autocommit,
        };

        Ok(Self {
            lazy_versioning,
            autocommit,
        })
    }

    /// Parse a policy from TOML; missing keys take their defaults.
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        toml::from_str(text).map_err(|e| ConfigError::InvalidValue {
            field: "tracking_policy".to_string(),
            value: text.trim().to_string(),
            reason: e.message().to_string(),
        })
    }
}

fn parse_bool(field: &str, raw: &str) -> Result<bool, ConfigError> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Ok(true),
        "false" | "0" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::InvalidValue {
            field: field.to_string(),
            value: raw.to_string(),
            reason: "expected a boolean".to_string(),
        }),
    }
}
