// Runtime Configuration
//
// Settings for the subscription lifecycle, loaded from code or environment variables.

use std::env;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tracing::warn;

/// Default upper bound on children created by one fan-out
pub const DEFAULT_MAX_FAN_OUT: usize = 1000;

/// What to do when a materialized entry collides with a live entry
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DuplicatePolicy {
    /// Surface the collision as an error
    #[default]
    Reject,

    /// Overwrite the live entry and log a warning
    Replace,
}

impl fmt::Display for DuplicatePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Reject => f.write_str("reject"),
            Self::Replace => f.write_str("replace"),
        }
    }
}

impl FromStr for DuplicatePolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "reject" => Ok(Self::Reject),
            "replace" => Ok(Self::Replace),
            other => Err(format!("unknown duplicate policy: {other}")),
        }
    }
}

/// Runtime configuration
///
/// # Example
///
/// ```
/// use procflow::config::{DuplicatePolicy, RuntimeConfig};
///
/// let config = RuntimeConfig::default()
///     .with_duplicate_policy(DuplicatePolicy::Replace)
///     .with_max_fan_out(16);
///
/// assert_eq!(config.max_fan_out, 16);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Policy applied when a key is already live
    pub duplicate_policy: DuplicatePolicy,

    /// Maximum children a single fan-out may create
    pub max_fan_out: usize,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            duplicate_policy: DuplicatePolicy::default(),
            max_fan_out: DEFAULT_MAX_FAN_OUT,
        }
    }
}

impl RuntimeConfig {
    /// Create configuration from environment variables
    ///
    /// A `.env` file in the working directory is loaded first, if present.
    ///
    /// Environment variables:
    /// - `PROCFLOW_DUPLICATE_POLICY`: `reject` or `replace` (default: reject)
    /// - `PROCFLOW_MAX_FAN_OUT`: children per fan-out (default: 1000)
    pub fn from_env() -> Self {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Create configuration from an arbitrary variable source
    ///
    /// Unparseable values fall back to the defaults with a warning.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();

        let duplicate_policy = match lookup("PROCFLOW_DUPLICATE_POLICY") {
            Some(raw) => raw.parse().unwrap_or_else(|e| {
                warn!(error = %e, "ignoring PROCFLOW_DUPLICATE_POLICY");
                defaults.duplicate_policy
            }),
            None => defaults.duplicate_policy,
        };

        let max_fan_out = match lookup("PROCFLOW_MAX_FAN_OUT") {
            Some(raw) => match raw.trim().parse::<usize>() {
                Ok(n) if n > 0 => n,
                _ => {
                    warn!(value = %raw, "ignoring PROCFLOW_MAX_FAN_OUT");
                    defaults.max_fan_out
                }
            },
            None => defaults.max_fan_out,
        };

        Self {
            duplicate_policy,
            max_fan_out,
        }
    }

    /// Set the duplicate policy
    pub fn with_duplicate_policy(mut self, policy: DuplicatePolicy) -> Self {
        self.duplicate_policy = policy;
        self
    }

    /// Set the fan-out bound
    pub fn with_max_fan_out(mut self, max: usize) -> Self {
        self.max_fan_out = max.max(1);
        self
    }
}
