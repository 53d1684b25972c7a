//! Configuration for the sandfleet CLI.
//!
//! Configuration is loaded from environment variables with sensible defaults.

use sandfleet_core::{EngineConfig, RetryPolicy, DEFAULT_CREATE_TIMEOUT};
use std::time::Duration;

/// Default concurrency limit when `--limit` is not given.
pub const DEFAULT_LIMIT: usize = 8;

/// Configuration for the sandfleet CLI.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CliConfig {
    /// Container CLI binary (`docker`, `podman`, ...).
    pub runtime_bin: String,

    /// Timeout for a single create call.
    pub create_timeout: Duration,

    /// Create attempts per sandbox, including the first.
    pub max_attempts: u32,

    /// Delay before the first retry.
    pub backoff_base: Duration,
}

impl Default for CliConfig {
    fn default() -> Self {
        let retry = RetryPolicy::default();
        Self {
            runtime_bin: "docker".to_string(),
            create_timeout: DEFAULT_CREATE_TIMEOUT,
            max_attempts: retry.max_attempts,
            backoff_base: retry.base_delay,
        }
    }
}

impl CliConfig {
    /// Load configuration from environment variables.
    ///
    /// | Variable | Default |
    /// |----------|---------|
    /// | `SANDFLEET_RUNTIME_BIN` | `docker` |
    /// | `SANDFLEET_CREATE_TIMEOUT_SECS` | `30` |
    /// | `SANDFLEET_MAX_ATTEMPTS` | `3` |
    /// | `SANDFLEET_BACKOFF_BASE_MS` | `250` |
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration through an arbitrary variable lookup.
    ///
    /// Unset or unparsable values fall back to the defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let default = Self::default();

        Self {
            runtime_bin: lookup("SANDFLEET_RUNTIME_BIN")
                .filter(|v| !v.trim().is_empty())
                .unwrap_or(default.runtime_bin),
            create_timeout: lookup("SANDFLEET_CREATE_TIMEOUT_SECS")
                .and_then(|v| v.parse().ok())
                .filter(|secs: &u64| *secs > 0)
                .map(Duration::from_secs)
                .unwrap_or(default.create_timeout),
            max_attempts: lookup("SANDFLEET_MAX_ATTEMPTS")
                .and_then(|v| v.parse().ok())
                .filter(|n: &u32| *n > 0)
                .unwrap_or(default.max_attempts),
            backoff_base: lookup("SANDFLEET_BACKOFF_BASE_MS")
                .and_then(|v| v.parse().ok())
                .map(Duration::from_millis)
                .unwrap_or(default.backoff_base),
        }
    }

    /// Build the engine configuration.
    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig {
            create_timeout: self.create_timeout,
            retry: RetryPolicy {
                max_attempts: self.max_attempts,
                base_delay: self.backoff_base,
                ..RetryPolicy::default()
            },
        }
    }
}
