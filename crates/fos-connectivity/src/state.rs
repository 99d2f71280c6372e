//! Connectivity State
//!
//! The finite-state machine behind the connectivity manager. Every transition
//! is a method that returns whether anything changed; the manager task owns
//! the only instance and publishes a snapshot after each change.

use serde::Serialize;

use crate::platform::Registration;

/// Named lifecycle phase of a manager instance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Phase {
    /// The platform has no worker registration capability
    Unsupported,
    /// Supported, registration not started yet
    Uninitialized,
    /// Registration call in flight
    Registering,
    /// A registration is active for this instance
    Installed,
    /// Registration was rejected; terminal for this instance
    RegistrationFailed,
    /// The registration was removed by the caller; terminal
    Unregistered,
}

impl Phase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Unsupported => "unsupported",
            Self::Uninitialized => "uninitialized",
            Self::Registering => "registering",
            Self::Installed => "installed",
            Self::RegistrationFailed => "registration-failed",
            Self::Unregistered => "unregistered",
        }
    }
}

/// Read-only view handed to the presentation layer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct ConnectivitySnapshot {
    pub supported: bool,
    pub installed: bool,
    pub online: bool,
    pub update_available: bool,
}

/// Full connectivity state, including the owned registration handle
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectivityState {
    supported: bool,
    installed: bool,
    online: bool,
    update_available: bool,
    registration: Option<Registration>,
    phase: Phase,
}

impl ConnectivityState {
    /// Create the initial state. `supported` is fixed for the lifetime of
    /// the state.
    pub fn new(supported: bool, online: bool) -> Self {
        Self {
            supported,
            installed: false,
            online,
            update_available: false,
            registration: None,
            phase: if supported { Phase::Uninitialized } else { Phase::Unsupported },
        }
    }

    pub fn supported(&self) -> bool {
        self.supported
    }

    pub fn installed(&self) -> bool {
        self.installed
    }

    pub fn online(&self) -> bool {
        self.online
    }

    pub fn update_available(&self) -> bool {
        self.update_available
    }

    pub fn registration(&self) -> Option<&Registration> {
        self.registration.as_ref()
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn snapshot(&self) -> ConnectivitySnapshot {
        ConnectivitySnapshot {
            supported: self.supported,
            installed: self.installed,
            online: self.online,
            update_available: self.update_available,
        }
    }

    /// `Uninitialized -> Registering`. Only ever succeeds once.
    pub fn begin_registration(&mut self) -> bool {
        if self.phase != Phase::Uninitialized {
            return false;
        }
        self.phase = Phase::Registering;
        true
    }

    /// `Registering -> Installed`. Results arriving in any other phase are
    /// stale and ignored.
    pub fn complete_registration(&mut self, registration: Registration) -> bool {
        if self.phase != Phase::Registering {
            return false;
        }
        self.registration = Some(registration);
        self.installed = true;
        self.update_available = false;
        self.phase = Phase::Installed;
        true
    }

    /// `Registering -> RegistrationFailed`
    pub fn fail_registration(&mut self) -> bool {
        if self.phase != Phase::Registering {
            return false;
        }
        self.phase = Phase::RegistrationFailed;
        true
    }

    /// Apply a platform connectivity signal. Ignored when unsupported.
    pub fn set_online(&mut self, online: bool) -> bool {
        if !self.supported || self.online == online {
            return false;
        }
        self.online = online;
        true
    }

    /// A freshly installed worker is waiting. Only counts as an update when
    /// an existing worker controls the page.
    pub fn mark_update_available(&mut self, controlled: bool) -> bool {
        if !self.installed || !controlled || self.update_available {
            return false;
        }
        self.update_available = true;
        true
    }

    /// The controller changed or the caller applied the update.
    pub fn clear_update(&mut self) -> bool {
        if !self.update_available {
            return false;
        }
        self.update_available = false;
        true
    }

    /// `Installed -> Unregistered`
    pub fn complete_unregistration(&mut self) -> bool {
        if self.phase != Phase::Installed {
            return false;
        }
        self.registration = None;
        self.installed = false;
        self.update_available = false;
        self.phase = Phase::Unregistered;
        true
    }
}
