//! Error reporting
//!
//! Failures inside the manager are terminal where they happen: they are
//! handed to a reporter and never returned to the presentation layer.

use std::sync::{Mutex, PoisonError};

use crate::error::ConnectivityError;

/// Receives every failure the manager observes
pub trait ErrorReporter: Send + Sync {
    fn report(&self, error: &ConnectivityError);
}

/// Default reporter: logs through `tracing`
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingReporter;

impl ErrorReporter for TracingReporter {
    fn report(&self, error: &ConnectivityError) {
        match error {
            // Per-bucket failures are expected to be partial
            ConnectivityError::CacheOperation { .. } => tracing::warn!("{}", error),
            _ => tracing::error!("{}", error),
        }
    }
}

/// Keeps reported errors in memory
#[derive(Debug, Default)]
pub struct RecordingReporter {
    errors: Mutex<Vec<ConnectivityError>>,
}

impl RecordingReporter {
    pub fn errors(&self) -> Vec<ConnectivityError> {
        self.errors.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    pub fn len(&self) -> usize {
        self.errors.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl ErrorReporter for RecordingReporter {
    fn report(&self, error: &ConnectivityError) {
        TracingReporter.report(error);
        self.errors
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(error.clone());
    }
}
