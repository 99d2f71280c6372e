//! Platform capabilities
//!
//! The manager never reaches for a global browser object. Everything it needs
//! from the host (worker registration, connectivity, cache storage and the
//! event sources behind them) comes through these traits.

pub mod memory;

use std::fmt;
use std::future::Future;

use smol::channel::Sender;

use crate::error::PlatformError;
use crate::manager::Message;

pub use memory::MemoryPlatform;

/// Identifier of a worker instance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct WorkerId(pub u64);

impl fmt::Display for WorkerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "worker#{}", self.0)
    }
}

/// Worker lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    Installing,
    Installed,
    Activating,
    Activated,
    Redundant,
}

/// Opaque handle to a worker registration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Registration {
    pub id: u64,
    pub scope: String,
    pub script_url: String,
}

/// Event delivered by the platform to an attached sink
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlatformEvent {
    Online,
    Offline,
    /// A new worker started installing under the registration
    UpdateFound { worker: WorkerId },
    WorkerStateChanged { worker: WorkerId, state: WorkerState },
    /// The worker controlling the page changed
    ControllerChanged,
}

/// Where a platform delivers its events.
///
/// Cloneable; every clone feeds the same manager. Emitting into a sink whose
/// manager has gone away is a no-op.
#[derive(Clone)]
pub struct EventSink {
    tx: Sender<Message>,
}

impl EventSink {
    pub(crate) fn new(tx: Sender<Message>) -> Self {
        Self { tx }
    }

    /// Deliver an event. Returns false once the manager is gone.
    pub fn emit(&self, event: PlatformEvent) -> bool {
        self.tx.try_send(Message::Platform(event)).is_ok()
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

impl fmt::Debug for EventSink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventSink")
            .field("closed", &self.tx.is_closed())
            .finish()
    }
}

/// Worker registration capability (navigator.serviceWorker)
pub trait WorkerContainer: Send + Sync {
    /// Whether the host can register background workers at all
    fn is_supported(&self) -> bool;

    /// Register `script_url`, optionally under an explicit scope
    fn register(
        &self,
        script_url: &str,
        scope: Option<&str>,
    ) -> impl Future<Output = Result<Registration, PlatformError>> + Send;

    /// Remove a registration. `Ok(false)` when it was already gone.
    fn unregister(
        &self,
        registration: &Registration,
    ) -> impl Future<Output = Result<bool, PlatformError>> + Send;

    /// Whether a worker currently controls the page
    fn has_controller(&self) -> bool;

    /// The installed worker waiting to take over, if any
    fn waiting_worker(&self, registration: &Registration) -> Option<WorkerId>;

    /// Tell a waiting worker to activate now
    fn skip_waiting(&self, worker: WorkerId) -> Result<(), PlatformError>;
}

/// Network reachability signal (navigator.onLine)
pub trait ConnectivitySource: Send + Sync {
    fn is_online(&self) -> bool;
}

/// Named cache buckets owned by the origin (window.caches)
pub trait CacheStorage: Send + Sync {
    fn cache_names(&self) -> impl Future<Output = Result<Vec<String>, PlatformError>> + Send;

    /// Delete one bucket. `Ok(false)` when no bucket had that name.
    fn delete_cache(&self, name: &str) -> impl Future<Output = Result<bool, PlatformError>> + Send;
}

/// The full capability set a manager is constructed with
pub trait Platform: WorkerContainer + ConnectivitySource + CacheStorage + 'static {
    /// Start delivering connectivity and worker lifecycle events to `sink`
    fn attach(&self, sink: EventSink);

    /// Stop delivering events
    fn detach(&self);
}
