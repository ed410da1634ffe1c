//! # Companion Net
//!
//! Request/response model and network access for Course Companion.
//!
//! ## Design Goals
//!
//! 1. **One fetch seam**: everything that touches the network goes through the
//!    [`Network`] trait, so the offline worker can be driven by fakes
//! 2. **Cloneable responses**: a response can be handed to the caller and
//!    written to a cache at the same time
//! 3. **Async HTTP**: [`ResourceLoader`] is the reqwest-backed implementation

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use http::{HeaderMap, HeaderName, HeaderValue, Method, StatusCode};
use reqwest::Client;
use thiserror::Error;
use tracing::{debug, info, trace};
use url::Url;

pub mod scripted;

pub use scripted::ScriptedNetwork;

/// Errors that can occur in networking.
#[derive(Error, Debug)]
pub enum NetError {
    #[error("Request failed: {0}")]
    RequestFailed(String),

    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    #[error("Network unreachable: {0}")]
    Unreachable(String),

    #[error("HTTP error: {0}")]
    HttpError(#[from] reqwest::Error),
}

/// Unique identifier for a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RequestId(u64);

impl RequestId {
    pub fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(1);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    pub fn raw(&self) -> u64 {
        self.0
    }
}

impl Default for RequestId {
    fn default() -> Self {
        Self::new()
    }
}

/// Request mode, as seen by fetch interception.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RequestMode {
    /// Top-level document load.
    Navigate,
    /// Same-origin only subresource.
    SameOrigin,
    /// Opaque cross-origin subresource.
    NoCors,
    /// Regular subresource fetch.
    #[default]
    Cors,
}

/// HTTP request.
#[derive(Debug, Clone)]
pub struct Request {
    pub id: RequestId,
    pub url: Url,
    pub method: Method,
    pub headers: HeaderMap,
    pub body: Option<Bytes>,
    pub mode: RequestMode,
}

impl Request {
    /// Create a GET request.
    pub fn get(url: Url) -> Self {
        Self {
            id: RequestId::new(),
            url,
            method: Method::GET,
            headers: HeaderMap::new(),
            body: None,
            mode: RequestMode::Cors,
        }
    }

    /// Create a navigation (document) GET request.
    pub fn navigate(url: Url) -> Self {
        Self {
            mode: RequestMode::Navigate,
            ..Self::get(url)
        }
    }

    /// Create a POST request.
    pub fn post(url: Url, body: Bytes) -> Self {
        Self {
            method: Method::POST,
            body: Some(body),
            ..Self::get(url)
        }
    }

    /// Add a header.
    pub fn header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }

    /// Whether this is a navigation request.
    pub fn is_navigation(&self) -> bool {
        self.mode == RequestMode::Navigate
    }

    /// Whether the request targets the same origin as `base`.
    pub fn is_same_origin(&self, base: &Url) -> bool {
        self.url.origin() == base.origin()
    }
}

/// HTTP response with a fully buffered body.
#[derive(Debug, Clone)]
pub struct Response {
    pub url: Url,
    pub status: StatusCode,
    pub status_text: String,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl Response {
    /// Create a response with the canonical reason phrase for `status`.
    pub fn new(url: Url, status: StatusCode, body: impl Into<Bytes>) -> Self {
        Self {
            url,
            status,
            status_text: status.canonical_reason().unwrap_or_default().to_string(),
            headers: HeaderMap::new(),
            body: body.into(),
        }
    }

    /// Synthetic response returned when neither cache nor network can serve a request.
    pub fn offline(url: Url) -> Self {
        Self {
            url,
            status: StatusCode::SERVICE_UNAVAILABLE,
            status_text: "Offline".to_string(),
            headers: HeaderMap::new(),
            body: Bytes::from_static(b"Offline"),
        }
    }

    /// Check if request was successful (2xx).
    pub fn ok(&self) -> bool {
        self.status.is_success()
    }

    /// Whether this is the synthetic offline response.
    pub fn is_offline(&self) -> bool {
        self.status == StatusCode::SERVICE_UNAVAILABLE && self.status_text == "Offline"
    }

    /// Get the body as text.
    pub fn text(&self) -> Result<String, NetError> {
        String::from_utf8(self.body.to_vec()).map_err(|e| NetError::RequestFailed(e.to_string()))
    }

    /// Get the body as JSON.
    pub fn json<T: serde::de::DeserializeOwned>(&self) -> Result<T, NetError> {
        serde_json::from_slice(&self.body).map_err(|e| NetError::RequestFailed(e.to_string()))
    }
}

/// Anything that can perform a network fetch.
#[async_trait]
pub trait Network: Send + Sync {
    /// Fetch a request from the network.
    ///
    /// Errors mean the network could not be reached; HTTP error statuses are
    /// returned as responses.
    async fn fetch(&self, request: &Request) -> Result<Response, NetError>;
}

/// Resource loader configuration.
#[derive(Debug, Clone)]
pub struct LoaderConfig {
    /// User agent string.
    pub user_agent: String,
    /// Accept-Language header.
    pub accept_language: String,
    /// Default timeout.
    pub default_timeout: Duration,
    /// Maximum redirects.
    pub max_redirects: usize,
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self {
            user_agent: format!("CourseCompanion/{}", env!("CARGO_PKG_VERSION")),
            accept_language: "en-US,en;q=0.9".to_string(),
            default_timeout: Duration::from_secs(30),
            max_redirects: 10,
        }
    }
}

/// reqwest-backed network access.
pub struct ResourceLoader {
    client: Client,
    config: LoaderConfig,
}

impl ResourceLoader {
    /// Create a new resource loader.
    pub fn new(config: LoaderConfig) -> Result<Self, NetError> {
        let client = Client::builder()
            .user_agent(&config.user_agent)
            .timeout(config.default_timeout)
            .redirect(reqwest::redirect::Policy::limited(config.max_redirects))
            .build()
            .map_err(|e| NetError::RequestFailed(e.to_string()))?;

        info!("ResourceLoader initialized");

        Ok(Self { client, config })
    }
}

#[async_trait]
impl Network for ResourceLoader {
    async fn fetch(&self, request: &Request) -> Result<Response, NetError> {
        debug!(url = %request.url, method = %request.method, "Fetching resource");

        let mut req_builder = self
            .client
            .request(request.method.clone(), request.url.clone());

        for (name, value) in request.headers.iter() {
            req_builder = req_builder.header(name, value);
        }

        req_builder = req_builder.header("Accept-Language", &self.config.accept_language);

        if let Some(body) = request.body.clone() {
            req_builder = req_builder.body(body);
        }

        let response = req_builder.send().await.map_err(|e| {
            if e.is_connect() || e.is_timeout() {
                NetError::Unreachable(e.to_string())
            } else {
                NetError::HttpError(e)
            }
        })?;

        let status = response.status();
        let headers = response.headers().clone();
        let url = response.url().clone();
        let body = response.bytes().await?;

        trace!(
            url = %url,
            status = %status,
            body_len = body.len(),
            "Response received"
        );

        Ok(Response {
            url,
            status,
            status_text: status.canonical_reason().unwrap_or_default().to_string(),
            headers,
            body,
        })
    }
}
