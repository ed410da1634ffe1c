//! Worker generations and their lifecycle state machine.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};
use tracing::trace;
use url::Url;

use crate::script::ScriptFingerprint;
use crate::ServiceWorkerError;

/// Unique identifier for a worker generation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct GenerationId(u64);

impl GenerationId {
    pub(crate) fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(1);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    pub fn raw(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for GenerationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "gen-{}", self.0)
    }
}

/// Worker lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkerState {
    /// Script fetched and parsed, nothing started.
    #[default]
    Parsed,
    /// Populating the cache.
    Installing,
    /// Installed; waiting unless it is the first generation.
    Installed,
    /// Evicting stale caches and claiming pages.
    Activating,
    /// Serving fetches.
    Activated,
    /// Superseded or failed. Terminal.
    Redundant,
}

impl WorkerState {
    /// Transition guard.
    pub fn can_transition_to(self, next: WorkerState) -> bool {
        use WorkerState::*;
        matches!(
            (self, next),
            (Parsed, Installing)
                | (Installing, Installed)
                | (Installing, Redundant)
                | (Installed, Activating)
                | (Installed, Redundant)
                | (Activating, Activated)
                | (Activating, Redundant)
                | (Activated, Redundant)
        )
    }

    /// Check if this state allows fetch interception.
    pub fn can_intercept_fetch(self) -> bool {
        self == WorkerState::Activated
    }

    pub fn is_terminal(self) -> bool {
        self == WorkerState::Redundant
    }

    pub fn as_str(self) -> &'static str {
        match self {
            WorkerState::Parsed => "parsed",
            WorkerState::Installing => "installing",
            WorkerState::Installed => "installed",
            WorkerState::Activating => "activating",
            WorkerState::Activated => "activated",
            WorkerState::Redundant => "redundant",
        }
    }
}

impl fmt::Display for WorkerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One version of the worker script.
#[derive(Debug, Clone)]
pub struct WorkerGeneration {
    /// Unique ID.
    pub id: GenerationId,

    /// Script URL.
    pub script_url: Url,

    /// Hash of the script bytes this generation was built from.
    pub fingerprint: ScriptFingerprint,

    /// Version reported by the script.
    pub version: String,

    /// Cache owned by this generation.
    pub cache_name: String,

    state: WorkerState,

    /// Error message if install failed.
    pub error: Option<String>,
}

impl WorkerGeneration {
    /// Create a generation in the `Parsed` state.
    pub fn new(
        script_url: Url,
        fingerprint: ScriptFingerprint,
        version: impl Into<String>,
        cache_name: impl Into<String>,
    ) -> Self {
        Self {
            id: GenerationId::new(),
            script_url,
            fingerprint,
            version: version.into(),
            cache_name: cache_name.into(),
            state: WorkerState::Parsed,
            error: None,
        }
    }

    pub fn state(&self) -> WorkerState {
        self.state
    }

    /// Move to `next`, rejecting transitions the lifecycle does not allow.
    pub fn transition(&mut self, next: WorkerState) -> Result<(), ServiceWorkerError> {
        if !self.state.can_transition_to(next) {
            return Err(ServiceWorkerError::InvalidTransition {
                from: self.state,
                to: next,
            });
        }
        trace!(generation = %self.id, from = %self.state, to = %next, "Worker state change");
        self.state = next;
        Ok(())
    }

    /// Mark redundant from any non-terminal state. Returns false if already redundant.
    pub fn make_redundant(&mut self) -> bool {
        if self.state.is_terminal() {
            return false;
        }
        if self.state == WorkerState::Parsed {
            // Never started installing; nothing to unwind.
            self.state = WorkerState::Redundant;
            return true;
        }
        self.transition(WorkerState::Redundant).is_ok()
    }

    /// Record an install failure and mark redundant.
    pub fn fail(&mut self, reason: impl Into<String>) {
        self.error = Some(reason.into());
        self.make_redundant();
    }

    pub fn is_active(&self) -> bool {
        self.state == WorkerState::Activated
    }

    pub fn is_redundant(&self) -> bool {
        self.state == WorkerState::Redundant
    }
}
