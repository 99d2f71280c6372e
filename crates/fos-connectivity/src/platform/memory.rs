//! In-memory platform
//!
//! A complete worker container, cache storage and connectivity switch that
//! lives in process. Used by the demo binary and by tests, which drive it
//! through deployments, connectivity flips and injected failures.

use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::sync::{Mutex, MutexGuard, PoisonError};

use smol::channel::{Receiver, Sender};
use url::Url;

use super::{
    CacheStorage, ConnectivitySource, EventSink, Platform, PlatformEvent, Registration,
    WorkerContainer, WorkerId, WorkerState,
};
use crate::error::PlatformError;

/// A worker instance inside a registration
#[derive(Debug, Clone)]
pub struct ServiceWorker {
    pub id: WorkerId,
    pub script_url: String,
    pub state: WorkerState,
}

/// A registration slot with its three worker positions
#[derive(Debug, Clone)]
pub struct WorkerRegistration {
    pub id: u64,
    pub scope: String,
    pub script_url: String,
    pub installing: Option<ServiceWorker>,
    pub waiting: Option<ServiceWorker>,
    pub active: Option<ServiceWorker>,
}

impl WorkerRegistration {
    fn handle(&self) -> Registration {
        Registration {
            id: self.id,
            scope: self.scope.clone(),
            script_url: self.script_url.clone(),
        }
    }
}

/// A cached response
#[derive(Debug, Clone)]
pub struct CachedResponse {
    pub status: u16,
    pub headers: HashMap<String, String>,
    pub body: Vec<u8>,
}

impl CachedResponse {
    pub fn new(status: u16, body: Vec<u8>) -> Self {
        Self {
            status,
            headers: HashMap::new(),
            body,
        }
    }
}

/// A named cache bucket
#[derive(Debug, Default)]
pub struct Cache {
    entries: HashMap<String, CachedResponse>,
}

impl Cache {
    pub fn put(&mut self, url: &str, response: CachedResponse) {
        self.entries.insert(url.to_string(), response);
    }

    pub fn match_url(&self, url: &str) -> Option<&CachedResponse> {
        self.entries.get(url)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Counters for the capability calls a manager made
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CallCounts {
    pub register: u32,
    pub unregister: u32,
    pub skip_waiting: u32,
    pub cache_names: u32,
    pub delete_cache: u32,
}

impl CallCounts {
    /// Calls that touched cache storage
    pub fn cache_calls(&self) -> u32 {
        self.cache_names + self.delete_cache
    }
}

struct Inner {
    origin: Url,
    supported: bool,
    online: bool,
    claim_clients: bool,
    registrations: HashMap<String, WorkerRegistration>,
    controller: Option<WorkerId>,
    caches: HashMap<String, Cache>,
    next_id: u64,
    sink: Option<EventSink>,
    register_failure: Option<PlatformError>,
    unregister_failure: Option<PlatformError>,
    skip_waiting_failure: Option<PlatformError>,
    listing_failure: Option<PlatformError>,
    failing_caches: HashSet<String>,
    gate: Option<(Sender<()>, Receiver<()>)>,
    calls: CallCounts,
}

impl Inner {
    fn emit(&self, event: PlatformEvent) {
        if let Some(sink) = &self.sink {
            sink.emit(event);
        }
    }

    fn next_id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }

    fn register_now(&mut self, script_url: &str, scope: Option<&str>) -> Result<Registration, PlatformError> {
        self.calls.register += 1;

        if !self.supported {
            return Err(PlatformError::Unsupported);
        }
        if let Some(err) = &self.register_failure {
            return Err(err.clone());
        }

        let script = self
            .origin
            .join(script_url)
            .map_err(|e| PlatformError::InvalidUrl(format!("{script_url}: {e}")))?;
        if script.origin() != self.origin.origin() {
            return Err(PlatformError::Security(format!(
                "script {script} is not same-origin with {}",
                self.origin
            )));
        }

        // Default scope is the directory containing the script
        let max_scope = script
            .join("./")
            .map_err(|e| PlatformError::InvalidUrl(e.to_string()))?;
        let scope = match scope {
            Some(scope) => self
                .origin
                .join(scope)
                .map_err(|e| PlatformError::InvalidUrl(format!("{scope}: {e}")))?,
            None => max_scope.clone(),
        };
        if !scope.as_str().starts_with(max_scope.as_str()) {
            return Err(PlatformError::Security(format!(
                "scope {scope} is outside the script directory {max_scope}"
            )));
        }

        let scope = scope.to_string();
        let script = script.to_string();

        if let Some(existing) = self.registrations.get(&scope) {
            let unchanged = existing.script_url == script
                && (existing.active.is_some() || existing.waiting.is_some());
            if unchanged {
                return Ok(existing.handle());
            }
        }

        if !self.registrations.contains_key(&scope) {
            let id = self.next_id();
            self.registrations.insert(
                scope.clone(),
                WorkerRegistration {
                    id,
                    scope: scope.clone(),
                    script_url: script.clone(),
                    installing: None,
                    waiting: None,
                    active: None,
                },
            );
        }

        self.install(&scope, &script);
        self.registrations
            .get(&scope)
            .map(WorkerRegistration::handle)
            .ok_or(PlatformError::NotFound)
    }

    /// Run a new worker through install. It waits when a controller exists,
    /// otherwise it activates right away.
    fn install(&mut self, scope: &str, script: &str) -> Option<WorkerId> {
        let worker = WorkerId(self.next_id());
        let controlled = self.controller.is_some();

        let reg = self.registrations.get_mut(scope)?;
        reg.script_url = script.to_string();
        if let Some(stale) = reg.waiting.take() {
            tracing::debug!("{} replaced while waiting", stale.id);
        }
        reg.installing = Some(ServiceWorker {
            id: worker,
            script_url: script.to_string(),
            state: WorkerState::Installing,
        });

        self.emit(PlatformEvent::UpdateFound { worker });
        self.set_installing_state(scope, WorkerState::Installed);

        if let Some(reg) = self.registrations.get_mut(scope) {
            reg.waiting = reg.installing.take();
        }

        if !controlled {
            self.activate(scope);
        }
        Some(worker)
    }

    fn set_installing_state(&mut self, scope: &str, state: WorkerState) {
        let Some(reg) = self.registrations.get_mut(scope) else {
            return;
        };
        if let Some(worker) = reg.installing.as_mut() {
            worker.state = state;
            let worker = worker.id;
            self.emit(PlatformEvent::WorkerStateChanged { worker, state });
        }
    }

    /// Promote the waiting worker of `scope` to active
    fn activate(&mut self, scope: &str) {
        let claim = self.claim_clients || self.controller.is_some();
        let mut events = Vec::new();

        let Some(reg) = self.registrations.get_mut(scope) else {
            return;
        };
        let Some(mut worker) = reg.waiting.take() else {
            return;
        };

        if let Some(mut previous) = reg.active.take() {
            previous.state = WorkerState::Redundant;
            events.push(PlatformEvent::WorkerStateChanged { worker: previous.id, state: previous.state });
        }
        for state in [WorkerState::Activating, WorkerState::Activated] {
            worker.state = state;
            events.push(PlatformEvent::WorkerStateChanged { worker: worker.id, state });
        }
        let id = worker.id;
        reg.active = Some(worker);

        if claim {
            self.controller = Some(id);
            events.push(PlatformEvent::ControllerChanged);
        }
        for event in events {
            self.emit(event);
        }
    }
}

/// In-process platform implementation
pub struct MemoryPlatform {
    inner: Mutex<Inner>,
}

impl MemoryPlatform {
    /// Create a supported, online platform for `origin`
    pub fn new(origin: Url) -> Self {
        Self {
            inner: Mutex::new(Inner {
                origin,
                supported: true,
                online: true,
                claim_clients: true,
                registrations: HashMap::new(),
                controller: None,
                caches: HashMap::new(),
                next_id: 0,
                sink: None,
                register_failure: None,
                unregister_failure: None,
                skip_waiting_failure: None,
                listing_failure: None,
                failing_caches: HashSet::new(),
                gate: None,
                calls: CallCounts::default(),
            }),
        }
    }

    /// Parse `origin` and create a platform for it
    pub fn for_origin(origin: &str) -> Result<Self, PlatformError> {
        let origin = Url::parse(origin).map_err(|e| PlatformError::InvalidUrl(format!("{origin}: {e}")))?;
        Ok(Self::new(origin))
    }

    /// Whether worker registration is available
    pub fn with_support(self, supported: bool) -> Self {
        self.inner().supported = supported;
        self
    }

    /// Initial connectivity
    pub fn with_online(self, online: bool) -> Self {
        self.inner().online = online;
        self
    }

    /// Whether a first activation takes control of the page
    pub fn with_client_claim(self, claim: bool) -> Self {
        self.inner().claim_clients = claim;
        self
    }

    fn inner(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Flip connectivity, emitting a signal when it changes
    pub fn set_online(&self, online: bool) {
        let mut inner = self.inner();
        if inner.online == online {
            return;
        }
        inner.online = online;
        inner.emit(if online { PlatformEvent::Online } else { PlatformEvent::Offline });
    }

    /// Simulate a new script version being found by the update check.
    /// Installs a new worker into every registration that has one active.
    pub fn deploy_update(&self) -> Vec<WorkerId> {
        let mut inner = self.inner();
        let targets: Vec<(String, String)> = inner
            .registrations
            .values()
            .filter(|reg| reg.active.is_some())
            .map(|reg| (reg.scope.clone(), reg.script_url.clone()))
            .collect();

        targets
            .into_iter()
            .filter_map(|(scope, script)| inner.install(&scope, &script))
            .collect()
    }

    /// Make every following registration fail with `error`
    pub fn fail_registration(&self, error: Option<PlatformError>) {
        self.inner().register_failure = error;
    }

    pub fn fail_unregistration(&self, error: Option<PlatformError>) {
        self.inner().unregister_failure = error;
    }

    pub fn fail_skip_waiting(&self, error: Option<PlatformError>) {
        self.inner().skip_waiting_failure = error;
    }

    /// Make listing the cache buckets fail
    pub fn fail_cache_listing(&self, error: Option<PlatformError>) {
        self.inner().listing_failure = error;
    }

    /// Make deletion of the named bucket fail
    pub fn fail_cache_deletion(&self, name: &str) {
        self.inner().failing_caches.insert(name.to_string());
    }

    /// Hold registration calls until [`release_registrations`](Self::release_registrations)
    pub fn hold_registrations(&self) {
        let mut inner = self.inner();
        if inner.gate.is_none() {
            inner.gate = Some(smol::channel::bounded(1));
        }
    }

    pub fn release_registrations(&self) {
        // Dropping the sender wakes every held call
        self.inner().gate = None;
    }

    /// Open or create a cache bucket and fill it
    pub fn put_cached(&self, cache: &str, url: &str, response: CachedResponse) {
        self.inner()
            .caches
            .entry(cache.to_string())
            .or_default()
            .put(url, response);
    }

    /// Find a cached response across all buckets
    pub fn cached(&self, url: &str) -> Option<CachedResponse> {
        self.inner()
            .caches
            .values()
            .find_map(|cache| cache.match_url(url).cloned())
    }

    pub fn cache_count(&self) -> usize {
        self.inner().caches.len()
    }

    /// Longest-scope registration that covers `url`
    pub fn registration_for(&self, url: &str) -> Option<WorkerRegistration> {
        self.inner()
            .registrations
            .values()
            .filter(|reg| url.starts_with(&reg.scope))
            .max_by_key(|reg| reg.scope.len())
            .cloned()
    }

    pub fn registrations(&self) -> Vec<WorkerRegistration> {
        self.inner().registrations.values().cloned().collect()
    }

    pub fn controller(&self) -> Option<WorkerId> {
        self.inner().controller
    }

    pub fn is_attached(&self) -> bool {
        self.inner().sink.is_some()
    }

    pub fn calls(&self) -> CallCounts {
        self.inner().calls
    }
}

impl WorkerContainer for MemoryPlatform {
    fn is_supported(&self) -> bool {
        self.inner().supported
    }

    fn register(
        &self,
        script_url: &str,
        scope: Option<&str>,
    ) -> impl Future<Output = Result<Registration, PlatformError>> + Send {
        async move {
            let gate = self.inner().gate.as_ref().map(|(_, rx)| rx.clone());
            if let Some(gate) = gate {
                let _ = gate.recv().await;
            }
            self.inner().register_now(script_url, scope)
        }
    }

    fn unregister(
        &self,
        registration: &Registration,
    ) -> impl Future<Output = Result<bool, PlatformError>> + Send {
        async move {
            let mut inner = self.inner();
            inner.calls.unregister += 1;
            if let Some(err) = &inner.unregister_failure {
                return Err(err.clone());
            }
            let matches = inner
                .registrations
                .get(&registration.scope)
                .is_some_and(|reg| reg.id == registration.id);
            if !matches {
                return Ok(false);
            }
            // The page stays controlled until it reloads
            inner.registrations.remove(&registration.scope);
            Ok(true)
        }
    }

    fn has_controller(&self) -> bool {
        self.inner().controller.is_some()
    }

    fn waiting_worker(&self, registration: &Registration) -> Option<WorkerId> {
        self.inner()
            .registrations
            .get(&registration.scope)
            .filter(|reg| reg.id == registration.id)
            .and_then(|reg| reg.waiting.as_ref())
            .map(|worker| worker.id)
    }

    fn skip_waiting(&self, worker: WorkerId) -> Result<(), PlatformError> {
        let mut inner = self.inner();
        inner.calls.skip_waiting += 1;
        if let Some(err) = &inner.skip_waiting_failure {
            return Err(err.clone());
        }

        let scope = inner
            .registrations
            .values()
            .find(|reg| reg.waiting.as_ref().is_some_and(|w| w.id == worker))
            .map(|reg| reg.scope.clone())
            .ok_or(PlatformError::NotFound)?;
        inner.activate(&scope);
        Ok(())
    }
}

impl ConnectivitySource for MemoryPlatform {
    fn is_online(&self) -> bool {
        self.inner().online
    }
}

impl CacheStorage for MemoryPlatform {
    fn cache_names(&self) -> impl Future<Output = Result<Vec<String>, PlatformError>> + Send {
        async move {
            let mut inner = self.inner();
            inner.calls.cache_names += 1;
            if let Some(err) = &inner.listing_failure {
                return Err(err.clone());
            }
            let mut names: Vec<String> = inner.caches.keys().cloned().collect();
            names.sort();
            Ok(names)
        }
    }

    fn delete_cache(&self, name: &str) -> impl Future<Output = Result<bool, PlatformError>> + Send {
        async move {
            let mut inner = self.inner();
            inner.calls.delete_cache += 1;
            if inner.failing_caches.contains(name) {
                return Err(PlatformError::Storage(format!("bucket '{name}' is locked")));
            }
            Ok(inner.caches.remove(name).is_some())
        }
    }
}

impl Platform for MemoryPlatform {
    fn attach(&self, sink: EventSink) {
        self.inner().sink = Some(sink);
    }

    fn detach(&self) {
        self.inner().sink = None;
    }
}
