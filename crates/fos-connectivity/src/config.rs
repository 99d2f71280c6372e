//! Manager configuration

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

pub const ENV_ORIGIN: &str = "FOS_ORIGIN";
pub const ENV_SCRIPT: &str = "FOS_SW_SCRIPT";
pub const ENV_SCOPE: &str = "FOS_SW_SCOPE";
pub const ENV_PROBE_INTERVAL: &str = "FOS_PROBE_INTERVAL_MS";

/// Connectivity manager configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectivityConfig {
    /// Origin the client is served from
    pub origin: String,
    /// Worker script, resolved against the origin
    pub script_url: String,
    /// Registration scope. Defaults to the script's directory.
    pub scope: Option<String>,
    /// How often the host network probe samples interfaces
    pub probe_interval_ms: u64,
}

impl Default for ConnectivityConfig {
    fn default() -> Self {
        Self {
            origin: "http://localhost:3000".into(),
            script_url: "/sw.js".into(),
            scope: None,
            probe_interval_ms: 5000,
        }
    }
}

impl ConnectivityConfig {
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()
    }

    /// The sampling interval must be non-zero
    fn validate(self) -> Result<Self, ConfigError> {
        if self.probe_interval_ms == 0 {
            return Err(ConfigError::InvalidValue {
                field: "probe_interval_ms",
                value: self.probe_interval_ms.to_string(),
            });
        }
        Ok(self)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json(&json)
    }

    /// Override fields from the process environment
    pub fn apply_env(self) -> Result<Self, ConfigError> {
        self.apply_vars(|key| std::env::var(key).ok())
    }

    /// Override fields from `lookup`. Empty values are ignored.
    pub fn apply_vars(mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let var = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());

        if let Some(origin) = var(ENV_ORIGIN) {
            self.origin = origin;
        }
        if let Some(script) = var(ENV_SCRIPT) {
            self.script_url = script;
        }
        if let Some(scope) = var(ENV_SCOPE) {
            self.scope = Some(scope);
        }
        if let Some(interval) = var(ENV_PROBE_INTERVAL) {
            self.probe_interval_ms = interval
                .trim()
                .parse()
                .ok()
                .filter(|ms| *ms > 0)
                .ok_or(ConfigError::InvalidEnv { key: ENV_PROBE_INTERVAL, value: interval })?;
        }
        Ok(self)
    }

    pub fn probe_interval(&self) -> Duration {
        Duration::from_millis(self.probe_interval_ms)
    }
}
