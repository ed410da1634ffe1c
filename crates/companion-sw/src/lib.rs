//! # Companion Offline Worker
//!
//! Offline cache and update lifecycle for the Course Companion planner.
//!
//! ## Features
//!
//! - **Registration**: one registration per scope, script fingerprinted by SHA-256
//! - **Lifecycle**: installing, waiting and active slots with guarded state changes
//! - **App shell**: all-or-nothing precache into a versioned cache
//! - **Fetch**: cache-first for same-origin GETs, navigation fallback, offline 503
//! - **Messaging**: `SKIP_WAITING` and `GET_VERSION` from pages
//!
//! ## Architecture
//!
//! ```text
//! ServiceWorkerContainer
//!     │
//!     ├── ServiceWorkerRegistration (per scope)
//!     │       ├── installing (GenerationSlot)
//!     │       ├── waiting (GenerationSlot)
//!     │       └── active (GenerationSlot)
//!     │                 └── OfflineWorker (install / activate / fetch / message)
//!     │
//!     ├── Clients (open pages → controlling generation)
//!     └── events (UpdateFound, StateChange, ControllerChange, Message)
//!
//! CacheStore (caches)
//!     └── Cache
//!             └── URL → CachedResponse
//! ```

use thiserror::Error;

pub mod cache;
pub mod client;
pub mod container;
pub mod generation;
pub mod message;
pub mod registration;
pub mod script;
pub mod worker;

pub use cache::{cache_key, Cache, CacheStorage, CacheStore, CachedResponse, MemoryCacheStore};
pub use client::{Client, ClientId, Clients};
pub use container::{MessageTarget, ServiceWorkerContainer, ServiceWorkerEvent, UpdateOutcome};
pub use generation::{GenerationId, WorkerGeneration, WorkerState};
pub use message::{MessageOutcome, PageMessage, WorkerReply};
pub use registration::{GenerationSlot, RegistrationSnapshot, ServiceWorkerRegistration};
pub use script::{ScriptFingerprint, ShellManifest, WorkerScript, APP_SHELL, CACHE_NAME, ROOT_DOCUMENT};
pub use worker::{FetchOutcome, OfflineWorker, ResponseSource};

// ==================== Errors ====================

/// Errors that can occur in offline worker operations.
#[derive(Error, Debug, Clone)]
pub enum ServiceWorkerError {
    #[error("Registration failed: {0}")]
    RegistrationFailed(String),

    #[error("Script error: {0}")]
    ScriptError(String),

    #[error("Network error: {0}")]
    NetworkError(String),

    #[error("Install of version {version} failed: {reason}")]
    InstallFailed { version: String, reason: String },

    #[error("Invalid state transition: {from} -> {to}")]
    InvalidTransition { from: WorkerState, to: WorkerState },

    #[error("Cache error: {0}")]
    CacheError(String),

    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    #[error("Not found: {0}")]
    NotFound(String),
}

impl ServiceWorkerError {
    /// True when the error left any previously active generation untouched.
    pub fn is_install_failure(&self) -> bool {
        matches!(
            self,
            ServiceWorkerError::InstallFailed { .. }
                | ServiceWorkerError::ScriptError(_)
                | ServiceWorkerError::NetworkError(_)
        )
    }
}
