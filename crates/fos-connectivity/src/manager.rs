//! Connectivity Manager
//!
//! One task owns the [`ConnectivityState`]. Callers, the platform's event
//! sources and the helper tasks that run platform futures all talk to it
//! through a single channel, so every message is applied to the whole state
//! before the next one is read.

use std::sync::Arc;

use smol::channel::{Receiver, Sender};
use smol::Task;

use crate::config::ConnectivityConfig;
use crate::error::{ConnectivityError, PlatformError};
use crate::platform::{EventSink, Platform, PlatformEvent, Registration, WorkerId, WorkerState};
use crate::report::{ErrorReporter, TracingReporter};
use crate::state::{ConnectivitySnapshot, ConnectivityState};

/// Stream of snapshots; the current one arrives first, then one per change
pub type SnapshotStream = Receiver<ConnectivitySnapshot>;

/// Everything the state task reacts to
pub(crate) enum Message {
    Platform(PlatformEvent),
    Registered(Result<Registration, PlatformError>),
    Unregistered {
        result: Result<bool, PlatformError>,
        reply: Sender<bool>,
    },
    Snapshot(Sender<ConnectivitySnapshot>),
    State(Sender<ConnectivityState>),
    Subscribe(Sender<ConnectivitySnapshot>),
    ApplyUpdate(Sender<bool>),
    PurgeCaches(Sender<PurgeReport>),
    Unregister(Sender<bool>),
}

/// Outcome of a cache purge
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PurgeReport {
    /// Buckets that were deleted
    pub deleted: Vec<String>,
    /// Buckets whose deletion failed; each failure was reported
    pub failed: Vec<String>,
}

impl PurgeReport {
    pub fn attempted(&self) -> usize {
        self.deleted.len() + self.failed.len()
    }

    pub fn is_clean(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Builder for [`ConnectivityManager`]
pub struct ManagerBuilder<P> {
    platform: Arc<P>,
    config: ConnectivityConfig,
    reporter: Arc<dyn ErrorReporter>,
}

impl<P: Platform> ManagerBuilder<P> {
    pub fn new(platform: Arc<P>) -> Self {
        Self {
            platform,
            config: ConnectivityConfig::default(),
            reporter: Arc::new(TracingReporter),
        }
    }

    pub fn config(mut self, config: ConnectivityConfig) -> Self {
        self.config = config;
        self
    }

    pub fn reporter(mut self, reporter: Arc<dyn ErrorReporter>) -> Self {
        self.reporter = reporter;
        self
    }

    /// Spawn the state task. Registration starts immediately when the
    /// platform supports it.
    pub fn start(self) -> ConnectivityManager {
        let (tx, rx) = smol::channel::unbounded();

        // Listen before reading the connectivity signal so no flip is lost
        let supported = self.platform.is_supported();
        if supported {
            self.platform.attach(EventSink::new(tx.clone()));
        }
        let state = ConnectivityState::new(supported, self.platform.is_online());
        let initial = state.snapshot();

        let task = StateTask {
            platform: self.platform,
            reporter: self.reporter,
            config: self.config,
            state,
            installing: None,
            unregistering: false,
            subscribers: Vec::new(),
            tx: tx.clone(),
        };

        tracing::debug!(supported, online = initial.online, "Starting connectivity manager");

        ConnectivityManager {
            tx,
            task: Some(smol::spawn(task.run(rx))),
            initial,
        }
    }
}

/// Handle to a running connectivity manager.
///
/// Dropping the handle stops the state task and detaches platform listeners.
pub struct ConnectivityManager {
    tx: Sender<Message>,
    task: Option<Task<()>>,
    initial: ConnectivitySnapshot,
}

impl ConnectivityManager {
    pub fn builder<P: Platform>(platform: Arc<P>) -> ManagerBuilder<P> {
        ManagerBuilder::new(platform)
    }

    /// Start with the default config and reporter
    pub fn start<P: Platform>(platform: Arc<P>) -> Self {
        ManagerBuilder::new(platform).start()
    }

    async fn request<T>(&self, message: impl FnOnce(Sender<T>) -> Message) -> Option<T> {
        let (reply, rx) = smol::channel::bounded(1);
        self.tx.send(message(reply)).await.ok()?;
        rx.recv().await.ok()
    }

    /// Current snapshot
    pub async fn snapshot(&self) -> ConnectivitySnapshot {
        self.request(Message::Snapshot).await.unwrap_or(self.initial)
    }

    /// Full state including phase and registration. `None` once closed.
    pub async fn state(&self) -> Option<ConnectivityState> {
        self.request(Message::State).await
    }

    /// Subscribe to snapshot changes
    pub fn subscribe(&self) -> SnapshotStream {
        let (tx, rx) = smol::channel::unbounded();
        if self.tx.try_send(Message::Subscribe(tx)).is_err() {
            tracing::debug!("Subscribing to a closed connectivity manager");
        }
        rx
    }

    /// Activate the waiting worker. Returns whether the skip-waiting signal
    /// was sent; a no-op when no update is pending.
    pub async fn apply_pending_update(&self) -> bool {
        self.request(Message::ApplyUpdate).await.unwrap_or(false)
    }

    /// Delete every cache bucket of the origin. A no-op when not installed.
    pub async fn purge_caches(&self) -> PurgeReport {
        self.request(Message::PurgeCaches).await.unwrap_or_default()
    }

    /// Remove the worker registration. Returns whether it was removed.
    pub async fn unregister(&self) -> bool {
        self.request(Message::Unregister).await.unwrap_or(false)
    }

    /// Stop the state task and wait for it to detach from the platform
    pub async fn shutdown(mut self) {
        self.tx.close();
        if let Some(task) = self.task.take() {
            task.await;
        }
    }
}

impl Drop for ConnectivityManager {
    fn drop(&mut self) {
        self.tx.close();
        if let Some(task) = self.task.take() {
            task.detach();
        }
    }
}

struct StateTask<P> {
    platform: Arc<P>,
    reporter: Arc<dyn ErrorReporter>,
    config: ConnectivityConfig,
    state: ConnectivityState,
    /// Worker announced by the latest update-found event
    installing: Option<WorkerId>,
    unregistering: bool,
    subscribers: Vec<Sender<ConnectivitySnapshot>>,
    tx: Sender<Message>,
}

impl<P: Platform> StateTask<P> {
    async fn run(mut self, rx: Receiver<Message>) {
        let supported = self.state.supported();
        if self.state.begin_registration() {
            self.spawn_registration();
        }

        while let Ok(message) = rx.recv().await {
            let before = self.state.snapshot();
            self.handle(message);
            let after = self.state.snapshot();
            if after != before {
                self.publish(after);
            }
        }

        if supported {
            self.platform.detach();
        }
        tracing::debug!("Connectivity manager stopped");
    }

    fn handle(&mut self, message: Message) {
        match message {
            Message::Platform(event) => self.on_platform_event(event),
            Message::Registered(result) => self.on_registered(result),
            Message::Unregistered { result, reply } => self.on_unregistered(result, reply),
            Message::Snapshot(reply) => {
                let _ = reply.try_send(self.state.snapshot());
            }
            Message::State(reply) => {
                let _ = reply.try_send(self.state.clone());
            }
            Message::Subscribe(subscriber) => {
                if subscriber.try_send(self.state.snapshot()).is_ok() {
                    self.subscribers.push(subscriber);
                }
            }
            Message::ApplyUpdate(reply) => {
                let applied = self.apply_pending_update();
                let _ = reply.try_send(applied);
            }
            Message::PurgeCaches(reply) => self.purge_caches(reply),
            Message::Unregister(reply) => self.unregister(reply),
        }
    }

    fn publish(&mut self, snapshot: ConnectivitySnapshot) {
        tracing::debug!(?snapshot, phase = self.state.phase().as_str(), "Connectivity changed");
        self.subscribers.retain(|tx| tx.try_send(snapshot).is_ok());
    }

    fn spawn_registration(&self) {
        let platform = Arc::clone(&self.platform);
        let tx = self.tx.clone();
        let script_url = self.config.script_url.clone();
        let scope = self.config.scope.clone();

        smol::spawn(async move {
            let result = platform.register(&script_url, scope.as_deref()).await;
            if tx.send(Message::Registered(result)).await.is_err() {
                tracing::debug!("Manager gone, dropping registration result for {}", script_url);
            }
        })
        .detach();
    }

    fn on_registered(&mut self, result: Result<Registration, PlatformError>) {
        match result {
            Ok(registration) => {
                let scope = registration.scope.clone();
                let waiting = self.platform.waiting_worker(&registration);
                if self.state.complete_registration(registration) {
                    tracing::info!("Worker registered with scope {}", scope);
                    // A changed script can already be waiting behind an
                    // earlier session's controller
                    if let Some(worker) = waiting
                        && self.state.mark_update_available(self.platform.has_controller())
                    {
                        tracing::info!("Update available: {} is waiting", worker);
                    }
                } else {
                    tracing::debug!("Ignoring stale registration for {}", scope);
                }
            }
            Err(err) => {
                if self.state.fail_registration() {
                    self.reporter.report(&ConnectivityError::Registration(err));
                } else {
                    tracing::debug!("Ignoring stale registration failure: {}", err);
                }
            }
        }
    }

    fn on_platform_event(&mut self, event: PlatformEvent) {
        match event {
            PlatformEvent::Online => {
                self.state.set_online(true);
            }
            PlatformEvent::Offline => {
                self.state.set_online(false);
            }
            PlatformEvent::UpdateFound { worker } => {
                // Installs seen before registration resolves are the first install
                if self.state.installed() {
                    self.installing = Some(worker);
                }
            }
            PlatformEvent::WorkerStateChanged { worker, state } => {
                if self.installing != Some(worker) {
                    return;
                }
                match state {
                    WorkerState::Installed => {
                        self.installing = None;
                        if self.state.mark_update_available(self.platform.has_controller()) {
                            tracing::info!("Update available: {} is waiting", worker);
                        }
                    }
                    WorkerState::Redundant => self.installing = None,
                    _ => {}
                }
            }
            PlatformEvent::ControllerChanged => {
                if self.state.clear_update() {
                    tracing::info!("New worker took control");
                }
            }
        }
    }

    fn apply_pending_update(&mut self) -> bool {
        if !self.state.update_available() {
            return false;
        }
        let Some(worker) = self
            .state
            .registration()
            .and_then(|registration| self.platform.waiting_worker(registration))
        else {
            tracing::debug!("Update flagged but no worker is waiting");
            return false;
        };

        match self.platform.skip_waiting(worker) {
            Ok(()) => {
                tracing::info!("Sent skip-waiting to {}", worker);
                self.state.clear_update();
                true
            }
            Err(err) => {
                self.reporter.report(&ConnectivityError::SkipWaiting(err));
                false
            }
        }
    }

    fn purge_caches(&self, reply: Sender<PurgeReport>) {
        if !self.state.installed() {
            let _ = reply.try_send(PurgeReport::default());
            return;
        }

        let platform = Arc::clone(&self.platform);
        let reporter = Arc::clone(&self.reporter);
        smol::spawn(async move {
            let report = purge_all(platform.as_ref(), reporter.as_ref()).await;
            let _ = reply.send(report).await;
        })
        .detach();
    }

    fn unregister(&mut self, reply: Sender<bool>) {
        let Some(registration) = self.state.registration().cloned() else {
            let _ = reply.try_send(false);
            return;
        };
        if self.unregistering {
            let _ = reply.try_send(false);
            return;
        }
        self.unregistering = true;

        let platform = Arc::clone(&self.platform);
        let tx = self.tx.clone();
        smol::spawn(async move {
            let result = platform.unregister(&registration).await;
            if tx.send(Message::Unregistered { result, reply }).await.is_err() {
                tracing::debug!("Manager gone, dropping unregistration result for {}", registration.scope);
            }
        })
        .detach();
    }

    fn on_unregistered(&mut self, result: Result<bool, PlatformError>, reply: Sender<bool>) {
        self.unregistering = false;
        let removed = match result {
            Ok(true) => self.state.complete_unregistration(),
            Ok(false) => {
                tracing::debug!("Registration was already gone");
                false
            }
            Err(err) => {
                self.reporter.report(&ConnectivityError::Unregistration(err));
                false
            }
        };
        if removed {
            self.installing = None;
            tracing::info!("Worker unregistered");
        }
        let _ = reply.try_send(removed);
    }
}

/// Delete every bucket independently; a failing bucket never stops the rest.
async fn purge_all<P: Platform>(platform: &P, reporter: &dyn ErrorReporter) -> PurgeReport {
    let mut report = PurgeReport::default();

    let names = match platform.cache_names().await {
        Ok(names) => names,
        Err(err) => {
            reporter.report(&ConnectivityError::CacheListing(err));
            return report;
        }
    };

    for name in names {
        match platform.delete_cache(&name).await {
            Ok(true) => report.deleted.push(name),
            Ok(false) => tracing::debug!("Cache '{}' vanished before deletion", name),
            Err(source) => {
                reporter.report(&ConnectivityError::CacheOperation { name: name.clone(), source });
                report.failed.push(name);
            }
        }
    }

    tracing::info!(deleted = report.deleted.len(), failed = report.failed.len(), "Purged caches");
    report
}
