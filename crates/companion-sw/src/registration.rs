//! Registration slots: installing, waiting, active.
//!
//! Pure bookkeeping. Every method returns the generations whose state it
//! changed so the container can publish the matching events.

use std::sync::Arc;

use url::Url;

use crate::generation::{GenerationId, WorkerGeneration, WorkerState};
use crate::worker::OfflineWorker;
use crate::ServiceWorkerError;

/// A generation together with its handlers.
#[derive(Clone)]
pub struct GenerationSlot {
    pub generation: WorkerGeneration,
    pub worker: Arc<OfflineWorker>,
}

impl std::fmt::Debug for GenerationSlot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GenerationSlot")
            .field("generation", &self.generation)
            .finish_non_exhaustive()
    }
}

/// Read-only view of a registration.
#[derive(Debug, Clone)]
pub struct RegistrationSnapshot {
    pub scope: Url,
    pub script_url: Url,
    pub installing: Option<WorkerGeneration>,
    pub waiting: Option<WorkerGeneration>,
    pub active: Option<WorkerGeneration>,
}

/// A worker registration for one scope.
#[derive(Debug)]
pub struct ServiceWorkerRegistration {
    /// Scope URL.
    pub scope: Url,

    /// Script URL.
    pub script_url: Url,

    installing: Option<GenerationSlot>,
    waiting: Option<GenerationSlot>,
    active: Option<GenerationSlot>,
}

impl ServiceWorkerRegistration {
    /// Create a new registration.
    pub fn new(scope: Url, script_url: Url) -> Self {
        Self {
            scope,
            script_url,
            installing: None,
            waiting: None,
            active: None,
        }
    }

    pub fn installing(&self) -> Option<&GenerationSlot> {
        self.installing.as_ref()
    }

    pub fn waiting(&self) -> Option<&GenerationSlot> {
        self.waiting.as_ref()
    }

    pub fn active(&self) -> Option<&GenerationSlot> {
        self.active.as_ref()
    }

    /// The most recent generation, used for byte-identical update checks.
    pub fn newest(&self) -> Option<&GenerationSlot> {
        self.installing
            .as_ref()
            .or(self.waiting.as_ref())
            .or(self.active.as_ref())
    }

    /// Find a live generation by id.
    pub fn find(&self, id: GenerationId) -> Option<&GenerationSlot> {
        [&self.installing, &self.waiting, &self.active]
            .into_iter()
            .flatten()
            .find(|slot| slot.generation.id == id)
    }

    /// Put a parsed generation into the installing slot.
    ///
    /// Returns the generation it displaced, now redundant.
    pub fn begin_install(
        &mut self,
        mut slot: GenerationSlot,
    ) -> Result<Option<WorkerGeneration>, ServiceWorkerError> {
        slot.generation.transition(WorkerState::Installing)?;

        let displaced = self.installing.replace(slot).map(|mut old| {
            old.generation.make_redundant();
            old.generation
        });
        Ok(displaced)
    }

    /// Install failed: the installing generation becomes redundant.
    ///
    /// Returns `None` if `id` is no longer the installing generation.
    pub fn install_failed(&mut self, id: GenerationId, reason: &str) -> Option<WorkerGeneration> {
        if self.installing.as_ref()?.generation.id != id {
            return None;
        }
        let mut slot = self.installing.take()?;
        slot.generation.fail(reason);
        Some(slot.generation)
    }

    /// Install succeeded: installing moves to waiting.
    ///
    /// Returns the installed generation and the waiting generation it replaced.
    pub fn install_complete(
        &mut self,
        id: GenerationId,
    ) -> Result<(WorkerGeneration, Option<WorkerGeneration>), ServiceWorkerError> {
        let mut slot = match self.installing.take() {
            Some(slot) if slot.generation.id == id => slot,
            other => {
                self.installing = other;
                return Err(ServiceWorkerError::NotFound(format!("installing {}", id)));
            }
        };
        slot.generation.transition(WorkerState::Installed)?;
        let installed = slot.generation.clone();

        let displaced = self.waiting.replace(slot).map(|mut old| {
            old.generation.make_redundant();
            old.generation
        });
        Ok((installed, displaced))
    }

    /// Move the waiting generation into the active slot in `Activating` state.
    ///
    /// Returns the activating slot and the previous active generation, now redundant.
    pub fn begin_activation(
        &mut self,
    ) -> Result<(GenerationSlot, Option<WorkerGeneration>), ServiceWorkerError> {
        let mut slot = self
            .waiting
            .take()
            .ok_or_else(|| ServiceWorkerError::NotFound("waiting worker".to_string()))?;

        if let Err(e) = slot.generation.transition(WorkerState::Activating) {
            self.waiting = Some(slot);
            return Err(e);
        }

        let previous = self.active.replace(slot.clone()).map(|mut old| {
            old.generation.make_redundant();
            old.generation
        });
        Ok((slot, previous))
    }

    /// Activation finished: the active generation serves fetches.
    pub fn finish_activation(
        &mut self,
        id: GenerationId,
    ) -> Result<WorkerGeneration, ServiceWorkerError> {
        let slot = self
            .active
            .as_mut()
            .filter(|slot| slot.generation.id == id)
            .ok_or_else(|| ServiceWorkerError::NotFound(format!("activating {}", id)))?;
        slot.generation.transition(WorkerState::Activated)?;
        Ok(slot.generation.clone())
    }

    /// Active generation if it can serve fetches.
    pub fn serving(&self) -> Option<&GenerationSlot> {
        self.active
            .as_ref()
            .filter(|slot| slot.generation.state().can_intercept_fetch())
    }

    /// Active generation that fetches are routed to: activated, or still
    /// activating (callers wait on [`OfflineWorker::activated`]).
    pub fn fetch_handler(&self) -> Option<&GenerationSlot> {
        self.active.as_ref().filter(|slot| {
            matches!(
                slot.generation.state(),
                WorkerState::Activating | WorkerState::Activated
            )
        })
    }

    /// Drop every generation. Returns them, redundant.
    pub fn unregister(&mut self) -> Vec<WorkerGeneration> {
        [self.installing.take(), self.waiting.take(), self.active.take()]
            .into_iter()
            .flatten()
            .map(|mut slot| {
                slot.generation.make_redundant();
                slot.generation
            })
            .collect()
    }

    pub fn snapshot(&self) -> RegistrationSnapshot {
        RegistrationSnapshot {
            scope: self.scope.clone(),
            script_url: self.script_url.clone(),
            installing: self.installing.as_ref().map(|s| s.generation.clone()),
            waiting: self.waiting.as_ref().map(|s| s.generation.clone()),
            active: self.active.as_ref().map(|s| s.generation.clone()),
        }
    }
}
