//! Connectivity errors

use std::path::PathBuf;

/// Errors raised by a platform capability call.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PlatformError {
    #[error("Security error: {0}")]
    Security(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Invalid script URL: {0}")]
    InvalidUrl(String),

    #[error("Worker not found")]
    NotFound,

    #[error("Worker registration is not supported")]
    Unsupported,
}

/// Failures observed by the connectivity manager.
///
/// None of these reach the presentation layer as errors; they are handed to
/// the [`ErrorReporter`](crate::ErrorReporter) and the state reflects the
/// best-known truth.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConnectivityError {
    #[error("Worker registration failed: {0}")]
    Registration(#[source] PlatformError),

    #[error("Worker unregistration failed: {0}")]
    Unregistration(#[source] PlatformError),

    #[error("Skip-waiting signal failed: {0}")]
    SkipWaiting(#[source] PlatformError),

    #[error("Listing caches failed: {0}")]
    CacheListing(#[source] PlatformError),

    #[error("Deleting cache '{name}' failed: {source}")]
    CacheOperation {
        name: String,
        #[source]
        source: PlatformError,
    },
}

/// Configuration loading errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid config: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Invalid value for {key}: {value}")]
    InvalidEnv { key: &'static str, value: String },

    #[error("Invalid config value for {field}: {value}")]
    InvalidValue { field: &'static str, value: String },
}
