//! fOS Connectivity
//!
//! Connectivity and worker-update lifecycle for offline-capable clients.
//!
//! A [`ConnectivityManager`] registers the client's background worker,
//! tracks online/offline transitions, notices when a new worker version is
//! waiting, and offers the two actions a banner needs: apply the pending
//! update and purge cached assets. The host is injected through the
//! [`Platform`] traits, so the manager runs the same against a browser
//! binding or the in-process [`MemoryPlatform`].
//!
//! # Example
//! ```rust,ignore
//! use std::sync::Arc;
//! use fos_connectivity::{ConnectivityManager, MemoryPlatform};
//!
//! let platform = Arc::new(MemoryPlatform::for_origin("https://app.example")?);
//! let manager = ConnectivityManager::start(platform);
//! let snapshot = manager.snapshot().await;
//! if snapshot.update_available {
//!     manager.apply_pending_update().await;
//! }
//! ```

pub mod config;
mod error;
mod manager;
pub mod platform;
pub mod probe;
mod report;
mod state;

pub use config::ConnectivityConfig;
pub use error::{ConfigError, ConnectivityError, PlatformError};
pub use manager::{ConnectivityManager, ManagerBuilder, PurgeReport, SnapshotStream};
pub use platform::{
    CacheStorage, ConnectivitySource, EventSink, MemoryPlatform, Platform, PlatformEvent, Registration,
    WorkerContainer, WorkerId, WorkerState,
};
pub use probe::{ConnectionType, NetworkProbe, NetworkSample};
pub use report::{ErrorReporter, RecordingReporter, TracingReporter};
pub use state::{ConnectivitySnapshot, ConnectivityState, Phase};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
