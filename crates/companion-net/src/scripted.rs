//! In-memory network with scripted routes.
//!
//! Used by tests and the smoke harness to drive the offline worker without a
//! real server. Routes are keyed by absolute URL; unknown URLs answer 404 like
//! a static file server would, and the whole network can be taken offline.

use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};

use async_trait::async_trait;
use bytes::Bytes;
use http::StatusCode;
use tracing::trace;
use url::Url;

use crate::{NetError, Network, Request, Response};

#[derive(Debug, Clone)]
enum Route {
    Respond { status: StatusCode, body: Bytes },
    Fail,
}

#[derive(Debug, Default)]
struct ScriptState {
    routes: HashMap<String, Route>,
    offline: bool,
    log: Vec<Url>,
}

/// Scripted network.
#[derive(Debug, Default)]
pub struct ScriptedNetwork {
    state: Mutex<ScriptState>,
}

impl ScriptedNetwork {
    /// Create an empty, online network.
    pub fn new() -> Self {
        Self::default()
    }

    fn with_state<T>(&self, f: impl FnOnce(&mut ScriptState) -> T) -> T {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        f(&mut state)
    }

    /// Serve `body` with status 200 at `url`.
    pub fn serve(&self, url: &Url, body: impl Into<Bytes>) {
        self.serve_status(url, StatusCode::OK, body);
    }

    /// Serve `body` with the given status at `url`.
    pub fn serve_status(&self, url: &Url, status: StatusCode, body: impl Into<Bytes>) {
        let route = Route::Respond {
            status,
            body: body.into(),
        };
        self.with_state(|s| s.routes.insert(url.to_string(), route));
    }

    /// Make requests for `url` fail at the transport level.
    pub fn fail(&self, url: &Url) {
        self.with_state(|s| s.routes.insert(url.to_string(), Route::Fail));
    }

    /// Take the whole network offline or bring it back.
    pub fn set_online(&self, online: bool) {
        self.with_state(|s| s.offline = !online);
    }

    /// Number of fetches issued for `url`.
    pub fn request_count(&self, url: &Url) -> usize {
        self.with_state(|s| s.log.iter().filter(|u| *u == url).count())
    }

    /// Total number of fetches issued.
    pub fn total_requests(&self) -> usize {
        self.with_state(|s| s.log.len())
    }

    /// Forget the request log.
    pub fn clear_log(&self) {
        self.with_state(|s| s.log.clear());
    }
}

#[async_trait]
impl Network for ScriptedNetwork {
    async fn fetch(&self, request: &Request) -> Result<Response, NetError> {
        let url = request.url.clone();
        self.with_state(|s| {
            s.log.push(url.clone());
            trace!(url = %url, offline = s.offline, "Scripted fetch");

            if s.offline {
                return Err(NetError::Unreachable(url.to_string()));
            }

            match s.routes.get(url.as_str()) {
                Some(Route::Respond { status, body }) => {
                    Ok(Response::new(url.clone(), *status, body.clone()))
                }
                Some(Route::Fail) => Err(NetError::RequestFailed(url.to_string())),
                None => Ok(Response::new(url.clone(), StatusCode::NOT_FOUND, Bytes::new())),
            }
        })
    }
}
