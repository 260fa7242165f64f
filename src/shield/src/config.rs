//! Shield configuration

use crate::error::{Result, ShieldError};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Message returned for rule faults outside debug mode
pub const DEFAULT_FALLBACK_ERROR: &str = "Not Authorised!";

/// Runtime behaviour of a [`Shield`](crate::Shield)
///
/// Loadable from TOML; every key is optional:
///
/// ```toml
/// debug = false
/// fallback_error = "Not Authorised!"
/// rule_timeout_ms = 2000
/// enable_cache = true
/// enable_audit = true
/// enable_metrics = true
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct ShieldConfig {
    /// Expose rule fault causes in field errors
    pub debug: bool,

    /// Message for rule faults when not in debug mode, and for denials that
    /// carry no message of their own
    pub fallback_error: String,

    /// Upper bound on a single rule evaluation (no bound when absent)
    pub rule_timeout_ms: Option<u64>,

    /// Memoize rule outcomes per request
    pub enable_cache: bool,

    /// Send faults and rejections to the tracing audit sink
    pub enable_audit: bool,

    /// Collect shield metrics
    pub enable_metrics: bool,
}

impl Default for ShieldConfig {
    fn default() -> Self {
        Self {
            debug: false,
            fallback_error: DEFAULT_FALLBACK_ERROR.to_string(),
            rule_timeout_ms: None,
            enable_cache: true,
            enable_audit: true,
            enable_metrics: true,
        }
    }
}

impl ShieldConfig {
    pub fn rule_timeout(&self) -> Option<Duration> {
        self.rule_timeout_ms.map(Duration::from_millis)
    }

    /// Defaults overridden by `SHIELD_DEBUG` and `RULE_TIMEOUT_MS`
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(debug) = std::env::var("SHIELD_DEBUG") {
            config.debug = matches!(debug.to_ascii_lowercase().as_str(), "1" | "true" | "yes");
        }

        config.rule_timeout_ms = std::env::var("RULE_TIMEOUT_MS")
            .ok()
            .and_then(|s| s.parse().ok())
            .or(config.rule_timeout_ms);

        config
    }

    /// Parse a TOML document
    pub fn from_toml_str(source: &str) -> Result<Self> {
        let config: Self =
            toml::from_str(source).map_err(|e| ShieldError::InvalidConfig(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Load a TOML file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let source = std::fs::read_to_string(path).map_err(|e| {
            ShieldError::InvalidConfig(format!("failed to read {}: {}", path.display(), e))
        })?;
        Self::from_toml_str(&source)
    }

    pub fn validate(&self) -> Result<()> {
        if self.rule_timeout_ms == Some(0) {
            return Err(ShieldError::InvalidConfig(
                "rule_timeout_ms must be greater than zero".to_string(),
            ));
        }
        if self.fallback_error.trim().is_empty() {
            return Err(ShieldError::InvalidConfig(
                "fallback_error must not be empty".to_string(),
            ));
        }
        Ok(())
    }
}
