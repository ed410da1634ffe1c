//! Clients: open pages and the generation controlling each of them.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use hashbrown::HashMap;
use url::Url;

use crate::generation::GenerationId;

/// Unique identifier for a client (an open page).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ClientId(u64);

impl ClientId {
    fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(1);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "client-{}", self.0)
    }
}

/// A client (open page).
#[derive(Debug, Clone)]
pub struct Client {
    /// Client ID.
    pub id: ClientId,

    /// Client URL.
    pub url: Url,

    /// Generation currently controlling the page.
    pub controller: Option<GenerationId>,
}

/// All clients of the origin.
#[derive(Debug, Default)]
pub struct Clients {
    clients: HashMap<ClientId, Client>,
}

impl Clients {
    /// Create new clients manager.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a client.
    pub fn open(&mut self, url: Url, controller: Option<GenerationId>) -> Client {
        let client = Client {
            id: ClientId::new(),
            url,
            controller,
        };
        self.clients.insert(client.id, client.clone());
        client
    }

    /// Get a client by ID.
    pub fn get(&self, id: ClientId) -> Option<&Client> {
        self.clients.get(&id)
    }

    /// Remove a client.
    pub fn remove(&mut self, id: ClientId) -> Option<Client> {
        self.clients.remove(&id)
    }

    /// Give every client under `scope` to `generation`.
    ///
    /// Returns the clients whose controller changed.
    pub fn claim(&mut self, scope: &Url, generation: GenerationId) -> Vec<ClientId> {
        let mut changed: Vec<ClientId> = self
            .clients
            .values_mut()
            .filter(|c| c.url.as_str().starts_with(scope.as_str()))
            .filter(|c| c.controller != Some(generation))
            .map(|c| {
                c.controller = Some(generation);
                c.id
            })
            .collect();
        changed.sort_by_key(|id| id.0);
        changed
    }

    pub fn len(&self) -> usize {
        self.clients.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }
}
