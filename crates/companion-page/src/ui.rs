//! UI sink for the page controller.

use std::sync::{Mutex, PoisonError};

/// What the page shows. Rendering is up to the implementor.
pub trait PageUi: Send + Sync {
    /// Show the "update available" affordance.
    fn show_update_available(&self);

    /// Report that no update is pending.
    fn show_up_to_date(&self);

    /// Show the post-update notice.
    fn show_whats_new(&self);

    /// Reload the page.
    fn reload(&self);

    fn set_install_button(&self, visible: bool);
}

/// A recorded [`PageUi`] call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UiCall {
    UpdateAvailable,
    UpToDate,
    WhatsNew,
    Reload,
    InstallButton(bool),
}

/// [`PageUi`] that records every call, for tests and headless runs.
#[derive(Debug, Default)]
pub struct RecordingUi {
    calls: Mutex<Vec<UiCall>>,
}

impl RecordingUi {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn calls(&self) -> Vec<UiCall> {
        self.lock().clone()
    }

    pub fn count(&self, call: UiCall) -> usize {
        self.lock().iter().filter(|c| **c == call).count()
    }

    pub fn clear(&self) {
        self.lock().clear();
    }

    fn record(&self, call: UiCall) {
        self.lock().push(call);
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<UiCall>> {
        self.calls.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl PageUi for RecordingUi {
    fn show_update_available(&self) {
        self.record(UiCall::UpdateAvailable);
    }

    fn show_up_to_date(&self) {
        self.record(UiCall::UpToDate);
    }

    fn show_whats_new(&self) {
        self.record(UiCall::WhatsNew);
    }

    fn reload(&self) {
        self.record(UiCall::Reload);
    }

    fn set_install_button(&self, visible: bool) {
        self.record(UiCall::InstallButton(visible));
    }
}
