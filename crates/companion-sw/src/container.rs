//! The platform side of the offline layer: registrations, clients, events.
//!
//! Register/update/activate run as jobs, one at a time per container, which is
//! what keeps two generations from ever serving concurrently. Fetches and
//! version queries do not wait for jobs.

use std::sync::{Arc, Mutex, PoisonError};

use hashbrown::HashMap;
use tokio::sync::{mpsc, RwLock};
use tracing::{debug, info, warn};
use url::Url;

use companion_net::{NetError, Network, Request, Response};

use crate::cache::CacheStore;
use crate::client::{Client, ClientId, Clients};
use crate::generation::{GenerationId, WorkerGeneration, WorkerState};
use crate::message::{MessageOutcome, PageMessage, WorkerReply};
use crate::registration::{GenerationSlot, RegistrationSnapshot, ServiceWorkerRegistration};
use crate::script::{ScriptFingerprint, WorkerScript};
use crate::worker::{FetchOutcome, OfflineWorker};
use crate::ServiceWorkerError;

/// Lifecycle notifications delivered to pages.
#[derive(Debug, Clone, PartialEq)]
pub enum ServiceWorkerEvent {
    /// A new generation started installing.
    UpdateFound {
        scope: Url,
        generation: GenerationId,
    },
    /// A generation changed state.
    StateChange {
        scope: Url,
        generation: GenerationId,
        state: WorkerState,
    },
    /// A page got a new controlling generation.
    ControllerChange {
        client: ClientId,
        generation: GenerationId,
    },
    /// A worker replied to a page message.
    Message { scope: Url, reply: WorkerReply },
}

/// Result of an update check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateOutcome {
    /// Script bytes match the newest generation.
    Unchanged,
    /// A new generation installed. `activated` is true when it was the first one.
    Installed {
        generation: GenerationId,
        activated: bool,
    },
}

/// Which generation a page message is addressed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageTarget {
    Waiting,
    Active,
}

/// Worker container (the platform runtime for one origin).
#[derive(Clone)]
pub struct ServiceWorkerContainer {
    registrations: Arc<RwLock<HashMap<String, ServiceWorkerRegistration>>>,
    clients: Arc<RwLock<Clients>>,
    caches: Arc<dyn CacheStore>,
    network: Arc<dyn Network>,
    jobs: Arc<tokio::sync::Mutex<()>>,
    subscribers: Arc<Mutex<Vec<mpsc::UnboundedSender<ServiceWorkerEvent>>>>,
}

impl ServiceWorkerContainer {
    /// Create a new container.
    pub fn new(
        network: Arc<dyn Network>,
        caches: Arc<dyn CacheStore>,
    ) -> (Self, mpsc::UnboundedReceiver<ServiceWorkerEvent>) {
        let container = Self {
            registrations: Arc::new(RwLock::new(HashMap::new())),
            clients: Arc::new(RwLock::new(Clients::new())),
            caches,
            network,
            jobs: Arc::new(tokio::sync::Mutex::new(())),
            subscribers: Arc::new(Mutex::new(Vec::new())),
        };
        let events = container.subscribe();
        (container, events)
    }

    /// Receive lifecycle events from now on.
    pub fn subscribe(&self) -> mpsc::UnboundedReceiver<ServiceWorkerEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(tx);
        rx
    }

    fn emit(&self, event: ServiceWorkerEvent) {
        debug!(?event, "Worker event");
        self.subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .retain(|tx| tx.send(event.clone()).is_ok());
    }

    fn emit_state(&self, scope: &Url, generation: &WorkerGeneration) {
        self.emit(ServiceWorkerEvent::StateChange {
            scope: scope.clone(),
            generation: generation.id,
            state: generation.state(),
        });
    }

    /// Cache storage shared by every generation.
    pub fn caches(&self) -> Arc<dyn CacheStore> {
        Arc::clone(&self.caches)
    }

    /// Register the worker script, installing it if its bytes are new.
    ///
    /// The scope is the directory containing the script. An install failure is
    /// returned as an error; a generation that was already active keeps serving.
    pub async fn register(
        &self,
        script_url: &Url,
    ) -> Result<RegistrationSnapshot, ServiceWorkerError> {
        if script_url.cannot_be_a_base() {
            return Err(ServiceWorkerError::RegistrationFailed(format!(
                "{} is not a hierarchical URL",
                script_url
            )));
        }
        let scope = script_url
            .join("./")
            .map_err(|e| ServiceWorkerError::RegistrationFailed(e.to_string()))?;

        let _job = self.jobs.lock().await;
        {
            let mut registrations = self.registrations.write().await;
            registrations
                .entry(scope.to_string())
                .or_insert_with(|| {
                    info!(scope = %scope, script = %script_url, "New registration");
                    ServiceWorkerRegistration::new(scope.clone(), script_url.clone())
                })
                .script_url = script_url.clone();
        }

        if let Err(e) = self.update_job(&scope).await {
            let mut registrations = self.registrations.write().await;
            let empty = registrations
                .get(scope.as_str())
                .is_some_and(|registration| registration.newest().is_none());
            if empty {
                registrations.remove(scope.as_str());
            }
            return Err(e);
        }
        self.snapshot(&scope)
            .await
            .ok_or_else(|| ServiceWorkerError::NotFound(scope.to_string()))
    }

    /// Re-check the script of an existing registration.
    pub async fn update(&self, scope: &Url) -> Result<UpdateOutcome, ServiceWorkerError> {
        let _job = self.jobs.lock().await;
        self.update_job(scope).await
    }

    async fn update_job(&self, scope: &Url) -> Result<UpdateOutcome, ServiceWorkerError> {
        let (script_url, newest) = {
            let registrations = self.registrations.read().await;
            let registration = registrations
                .get(scope.as_str())
                .ok_or_else(|| ServiceWorkerError::NotFound(scope.to_string()))?;
            (
                registration.script_url.clone(),
                registration.newest().map(|s| s.generation.fingerprint),
            )
        };

        let response = self
            .network
            .fetch(&Request::get(script_url.clone()))
            .await
            .map_err(|e| ServiceWorkerError::NetworkError(e.to_string()))?;
        if !response.ok() {
            return Err(ServiceWorkerError::ScriptError(format!(
                "{} returned {}",
                script_url, response.status
            )));
        }

        let fingerprint = ScriptFingerprint::of(&response.body);
        if newest == Some(fingerprint) {
            debug!(scope = %scope, %fingerprint, "Worker script unchanged");
            return Ok(UpdateOutcome::Unchanged);
        }

        let script = WorkerScript::parse(&response.body)?;
        let generation = WorkerGeneration::new(
            script_url,
            fingerprint,
            script.version.clone(),
            script.cache_name.clone(),
        );
        let id = generation.id;
        let worker = Arc::new(OfflineWorker::new(
            script,
            scope.clone(),
            Arc::clone(&self.caches),
            Arc::clone(&self.network),
        ));

        let (displaced, installing) = {
            let mut registrations = self.registrations.write().await;
            let registration = registrations
                .get_mut(scope.as_str())
                .ok_or_else(|| ServiceWorkerError::NotFound(scope.to_string()))?;
            let displaced = registration.begin_install(GenerationSlot {
                generation,
                worker: Arc::clone(&worker),
            })?;
            let installing = registration
                .installing()
                .map(|s| s.generation.clone())
                .ok_or_else(|| ServiceWorkerError::NotFound(format!("installing {}", id)))?;
            (displaced, installing)
        };

        if let Some(old) = displaced {
            self.emit_state(scope, &old);
        }
        info!(scope = %scope, version = %worker.version(), generation = %id, "Installing worker");
        self.emit(ServiceWorkerEvent::UpdateFound {
            scope: scope.clone(),
            generation: id,
        });
        self.emit_state(scope, &installing);

        if let Err(e) = worker.install().await {
            warn!(scope = %scope, generation = %id, error = %e, "Install failed");
            let mut registrations = self.registrations.write().await;
            if let Some(registration) = registrations.get_mut(scope.as_str()) {
                if let Some(failed) = registration.install_failed(id, &e.to_string()) {
                    self.emit_state(scope, &failed);
                }
            }
            return Err(e);
        }

        let (installed, displaced, first) = {
            let mut registrations = self.registrations.write().await;
            let registration = registrations
                .get_mut(scope.as_str())
                .ok_or_else(|| ServiceWorkerError::NotFound(scope.to_string()))?;
            let (installed, displaced) = registration.install_complete(id)?;
            (installed, displaced, registration.active().is_none())
        };

        if let Some(old) = displaced {
            self.emit_state(scope, &old);
        }
        self.emit_state(scope, &installed);

        if first {
            self.activate_job(scope).await?;
        } else {
            info!(scope = %scope, generation = %id, "Worker waiting");
        }

        Ok(UpdateOutcome::Installed {
            generation: id,
            activated: first,
        })
    }

    async fn activate_job(&self, scope: &Url) -> Result<(), ServiceWorkerError> {
        let (slot, previous) = {
            let mut registrations = self.registrations.write().await;
            let registration = registrations
                .get_mut(scope.as_str())
                .ok_or_else(|| ServiceWorkerError::NotFound(scope.to_string()))?;
            registration.begin_activation()?
        };
        let id = slot.generation.id;

        if let Some(old) = previous {
            self.emit_state(scope, &old);
        }
        self.emit_state(scope, &slot.generation);

        if let Err(e) = slot.worker.activate().await {
            warn!(scope = %scope, generation = %id, error = %e, "Cache eviction failed");
        }

        let finished = {
            let mut registrations = self.registrations.write().await;
            registrations
                .get_mut(scope.as_str())
                .ok_or_else(|| ServiceWorkerError::NotFound(scope.to_string()))
                .and_then(|registration| registration.finish_activation(id))
        };
        // Fetches held during activation go ahead either way.
        slot.worker.mark_activated();
        let activated = finished?;
        self.emit_state(scope, &activated);

        let claimed = self.clients.write().await.claim(scope, id);
        info!(
            scope = %scope,
            version = %activated.version,
            generation = %id,
            claimed = claimed.len(),
            "Worker activated"
        );
        for client in claimed {
            self.emit(ServiceWorkerEvent::ControllerChange {
                client,
                generation: id,
            });
        }
        Ok(())
    }

    /// Post a message to the waiting or active generation of `scope`.
    pub async fn post_message(
        &self,
        scope: &Url,
        target: MessageTarget,
        message: PageMessage,
    ) -> Result<Option<WorkerReply>, ServiceWorkerError> {
        let _job = match message {
            PageMessage::SkipWaiting => Some(self.jobs.lock().await),
            PageMessage::GetVersion => None,
        };

        let worker = {
            let registrations = self.registrations.read().await;
            let registration = registrations
                .get(scope.as_str())
                .ok_or_else(|| ServiceWorkerError::NotFound(scope.to_string()))?;
            let slot = match target {
                MessageTarget::Waiting => registration.waiting(),
                MessageTarget::Active => registration.active(),
            };
            slot.map(|s| Arc::clone(&s.worker))
                .ok_or_else(|| ServiceWorkerError::NotFound(format!("{:?} worker", target)))?
        };

        match worker.handle_message(&message) {
            MessageOutcome::SkipWaiting => {
                if target == MessageTarget::Waiting {
                    info!(scope = %scope, "Waiting worker released");
                    self.activate_job(scope).await?;
                }
                Ok(None)
            }
            MessageOutcome::Reply(reply) => {
                self.emit(ServiceWorkerEvent::Message {
                    scope: scope.clone(),
                    reply: reply.clone(),
                });
                Ok(Some(reply))
            }
        }
    }

    /// Open a page. It is controlled from the start if its scope has a serving generation.
    pub async fn open_client(&self, url: Url) -> Client {
        let controller = {
            let registrations = self.registrations.read().await;
            matching_scope(&registrations, &url)
                .and_then(|registration| registration.serving())
                .map(|slot| slot.generation.id)
        };
        let client = self.clients.write().await.open(url, controller);
        debug!(client = %client.id, controller = ?client.controller, "Client opened");
        client
    }

    /// Close a page.
    pub async fn close_client(&self, client: ClientId) {
        self.clients.write().await.remove(client);
    }

    /// The generation currently controlling a page.
    pub async fn controller(&self, client: ClientId) -> Option<WorkerGeneration> {
        let controller = self.clients.read().await.get(client)?.controller?;
        let registrations = self.registrations.read().await;
        registrations
            .values()
            .find_map(|registration| registration.find(controller))
            .map(|slot| slot.generation.clone())
    }

    /// Fetch on behalf of a page, through its controlling worker if any.
    ///
    /// Navigations are routed by URL to the active generation of the matching
    /// scope. A fetch routed to a generation that is still activating waits
    /// for activation to finish.
    pub async fn fetch(
        &self,
        client: Option<ClientId>,
        request: &Request,
    ) -> Result<Response, NetError> {
        if let Some(worker) = self.route(client, request).await {
            worker.activated().await;
            if let FetchOutcome::Respond { response, source } = worker.handle_fetch(request).await
            {
                debug!(url = %request.url, ?source, "Fetch intercepted");
                return Ok(response);
            }
        }
        self.network.fetch(request).await
    }

    async fn route(&self, client: Option<ClientId>, request: &Request) -> Option<Arc<OfflineWorker>> {
        let registrations = self.registrations.read().await;
        if request.is_navigation() {
            return matching_scope(&registrations, &request.url)
                .and_then(|registration| registration.fetch_handler())
                .map(|slot| Arc::clone(&slot.worker));
        }

        let (page_url, controller) = {
            let clients = self.clients.read().await;
            let client = clients.get(client?)?;
            (client.url.clone(), client.controller?)
        };
        let own = registrations
            .values()
            .filter_map(|registration| registration.fetch_handler())
            .find(|slot| slot.generation.id == controller);
        // A generation that is taking over serves pages still held by its predecessor.
        own.or_else(|| {
            matching_scope(&registrations, &page_url)
                .and_then(|registration| registration.fetch_handler())
        })
        .map(|slot| Arc::clone(&slot.worker))
    }

    /// Registration whose scope is the longest prefix of `url`.
    pub async fn get_registration(&self, url: &Url) -> Option<RegistrationSnapshot> {
        let registrations = self.registrations.read().await;
        matching_scope(&registrations, url).map(ServiceWorkerRegistration::snapshot)
    }

    async fn snapshot(&self, scope: &Url) -> Option<RegistrationSnapshot> {
        let registrations = self.registrations.read().await;
        registrations
            .get(scope.as_str())
            .map(ServiceWorkerRegistration::snapshot)
    }

    /// All registered scopes.
    pub async fn get_registrations(&self) -> Vec<Url> {
        let registrations = self.registrations.read().await;
        let mut scopes: Vec<Url> = registrations.values().map(|r| r.scope.clone()).collect();
        scopes.sort();
        scopes
    }

    /// Remove a registration. Its generations become redundant; caches stay.
    pub async fn unregister(&self, scope: &Url) -> bool {
        let _job = self.jobs.lock().await;
        let removed = self.registrations.write().await.remove(scope.as_str());
        match removed {
            Some(mut registration) => {
                for generation in registration.unregister() {
                    self.emit_state(scope, &generation);
                }
                info!(scope = %scope, "Unregistered");
                true
            }
            None => false,
        }
    }
}

fn matching_scope<'a>(
    registrations: &'a HashMap<String, ServiceWorkerRegistration>,
    url: &Url,
) -> Option<&'a ServiceWorkerRegistration> {
    registrations
        .values()
        .filter(|registration| url.as_str().starts_with(registration.scope.as_str()))
        .max_by_key(|registration| registration.scope.as_str().len())
}
