//! # Companion Page
//!
//! The page side of the offline layer. A [`PageController`] lives as long as one
//! page load: it registers the worker, watches lifecycle events, offers updates,
//! reloads once when a new generation takes control and leaves a one-shot
//! "what's new" flag for the next load.
//!
//! ## Update handshake
//!
//! ```text
//! page                         container                    waiting worker
//!  │ check_for_updates ───────► update(scope)
//!  │ ◄── UpdateFound / Installed
//!  │ show_update_available
//!  │ accept_update ───────────► post_message(SKIP_WAITING) ─► activate + claim
//!  │ ◄── ControllerChange
//!  │ reload (once), set what's-new flag
//! ```

use thiserror::Error;

use companion_store::StoreError;
use companion_sw::ServiceWorkerError;

pub mod controller;
pub mod install;
pub mod ui;

pub use controller::{InstallKind, PageConfig, PageController, WHATS_NEW_KEY};
pub use install::{InstallChoice, InstallPrompt};
pub use ui::{PageUi, RecordingUi, UiCall};

/// Errors surfaced to page code.
#[derive(Error, Debug)]
pub enum PageError {
    #[error("Worker error: {0}")]
    Worker(#[from] ServiceWorkerError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("No registration for {0}")]
    NoRegistration(String),

    #[error("Unexpected reply: {0}")]
    UnexpectedReply(String),
}

pub type Result<T> = std::result::Result<T, PageError>;
