//! Named caches of request URL → response.
//!
//! [`CacheStorage`] is the plain in-memory data structure; [`CacheStore`] is the
//! async seam the worker talks to, so tests can wrap or replace it.

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use hashbrown::HashMap;
use http::{HeaderMap, HeaderName, HeaderValue, StatusCode};
use tokio::sync::RwLock;
use tracing::trace;
use url::Url;

use companion_net::Response;

use crate::ServiceWorkerError;

/// Cache key for a URL. Fragments never reach the network, so they are dropped.
pub fn cache_key(url: &Url) -> String {
    let mut key = url.clone();
    key.set_fragment(None);
    key.into()
}

/// A cached response.
#[derive(Debug, Clone, PartialEq)]
pub struct CachedResponse {
    /// Response URL.
    pub url: String,

    /// Response status.
    pub status: u16,

    /// Status text.
    pub status_text: String,

    /// Response headers.
    pub headers: HashMap<String, String>,

    /// Response body.
    pub body: Bytes,

    /// Cached at timestamp (ms since epoch).
    pub cached_at: i64,
}

impl CachedResponse {
    /// Copy a network response for storage.
    pub fn from_response(response: &Response) -> Self {
        let headers = response
            .headers
            .iter()
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|v| (name.as_str().to_string(), v.to_string()))
            })
            .collect();

        Self {
            url: response.url.to_string(),
            status: response.status.as_u16(),
            status_text: response.status_text.clone(),
            headers,
            body: response.body.clone(),
            cached_at: chrono::Utc::now().timestamp_millis(),
        }
    }

    /// Rebuild a response for the caller.
    pub fn to_response(&self, request_url: &Url) -> Response {
        let mut headers = HeaderMap::new();
        for (name, value) in &self.headers {
            if let (Ok(n), Ok(v)) = (
                HeaderName::try_from(name.as_str()),
                HeaderValue::try_from(value.as_str()),
            ) {
                headers.insert(n, v);
            }
        }

        Response {
            url: Url::parse(&self.url).unwrap_or_else(|_| request_url.clone()),
            status: StatusCode::from_u16(self.status).unwrap_or(StatusCode::OK),
            status_text: self.status_text.clone(),
            headers,
            body: self.body.clone(),
        }
    }
}

/// A single named cache.
#[derive(Debug, Default)]
pub struct Cache {
    /// Cache name.
    pub name: String,

    entries: HashMap<String, CachedResponse>,
}

impl Cache {
    /// Create a new cache.
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            entries: HashMap::new(),
        }
    }

    /// Match a request URL.
    pub fn match_url(&self, url: &Url) -> Option<&CachedResponse> {
        self.entries.get(&cache_key(url))
    }

    /// Store a response.
    pub fn put(&mut self, url: &Url, response: CachedResponse) {
        self.entries.insert(cache_key(url), response);
    }

    /// Delete entry.
    pub fn delete(&mut self, url: &Url) -> bool {
        self.entries.remove(&cache_key(url)).is_some()
    }

    /// Get all keys (URLs).
    pub fn keys(&self) -> Vec<&str> {
        self.entries.keys().map(|s| s.as_str()).collect()
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the cache holds no entries.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// All caches of an origin.
#[derive(Debug, Default)]
pub struct CacheStorage {
    caches: HashMap<String, Cache>,
}

impl CacheStorage {
    /// Create new cache storage.
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a cache (creates if doesn't exist).
    pub fn open(&mut self, name: &str) -> &mut Cache {
        self.caches
            .entry(name.to_string())
            .or_insert_with(|| Cache::new(name))
    }

    /// Get a cache without creating it.
    pub fn get(&self, name: &str) -> Option<&Cache> {
        self.caches.get(name)
    }

    /// Check if cache exists.
    pub fn has(&self, name: &str) -> bool {
        self.caches.contains_key(name)
    }

    /// Delete a cache.
    pub fn delete(&mut self, name: &str) -> bool {
        self.caches.remove(name).is_some()
    }

    /// Get all cache names, sorted.
    pub fn keys(&self) -> Vec<String> {
        let mut names: Vec<String> = self.caches.keys().cloned().collect();
        names.sort();
        names
    }

    /// Match across all caches, in name order.
    pub fn match_url(&self, url: &Url) -> Option<&CachedResponse> {
        let mut names: Vec<&String> = self.caches.keys().collect();
        names.sort();
        names
            .into_iter()
            .find_map(|name| self.caches[name].match_url(url))
    }
}

/// Async access to cache storage, as used by the offline worker.
#[async_trait]
pub trait CacheStore: Send + Sync {
    /// Open (or create) a cache.
    async fn open(&self, name: &str) -> Result<(), ServiceWorkerError>;

    /// Names of all existing caches.
    async fn keys(&self) -> Result<Vec<String>, ServiceWorkerError>;

    /// Delete a cache. Returns whether it existed.
    async fn delete(&self, name: &str) -> Result<bool, ServiceWorkerError>;

    /// Look a URL up in one cache.
    async fn match_in(
        &self,
        name: &str,
        url: &Url,
    ) -> Result<Option<CachedResponse>, ServiceWorkerError>;

    /// Look a URL up across all caches.
    async fn match_any(&self, url: &Url) -> Result<Option<CachedResponse>, ServiceWorkerError>;

    /// Store one response, creating the cache if needed.
    async fn put(
        &self,
        name: &str,
        url: &Url,
        response: CachedResponse,
    ) -> Result<(), ServiceWorkerError>;

    /// Store several responses at once. Either all entries are written or none.
    async fn put_all(
        &self,
        name: &str,
        entries: Vec<(Url, CachedResponse)>,
    ) -> Result<(), ServiceWorkerError>;
}

/// In-memory [`CacheStore`].
#[derive(Debug, Clone, Default)]
pub struct MemoryCacheStore {
    storage: Arc<RwLock<CacheStorage>>,
}

impl MemoryCacheStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Shared handle to the underlying storage, for inspection.
    pub fn storage(&self) -> Arc<RwLock<CacheStorage>> {
        Arc::clone(&self.storage)
    }
}

#[async_trait]
impl CacheStore for MemoryCacheStore {
    async fn open(&self, name: &str) -> Result<(), ServiceWorkerError> {
        self.storage.write().await.open(name);
        Ok(())
    }

    async fn keys(&self) -> Result<Vec<String>, ServiceWorkerError> {
        Ok(self.storage.read().await.keys())
    }

    async fn delete(&self, name: &str) -> Result<bool, ServiceWorkerError> {
        Ok(self.storage.write().await.delete(name))
    }

    async fn match_in(
        &self,
        name: &str,
        url: &Url,
    ) -> Result<Option<CachedResponse>, ServiceWorkerError> {
        let storage = self.storage.read().await;
        Ok(storage
            .get(name)
            .and_then(|cache| cache.match_url(url))
            .cloned())
    }

    async fn match_any(&self, url: &Url) -> Result<Option<CachedResponse>, ServiceWorkerError> {
        Ok(self.storage.read().await.match_url(url).cloned())
    }

    async fn put(
        &self,
        name: &str,
        url: &Url,
        response: CachedResponse,
    ) -> Result<(), ServiceWorkerError> {
        trace!(cache = name, url = %url, "Cache put");
        self.storage.write().await.open(name).put(url, response);
        Ok(())
    }

    async fn put_all(
        &self,
        name: &str,
        entries: Vec<(Url, CachedResponse)>,
    ) -> Result<(), ServiceWorkerError> {
        let mut storage = self.storage.write().await;
        let cache = storage.open(name);
        for (url, response) in entries {
            cache.put(&url, response);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn url(s: &str) -> Url {
        Url::parse(s).unwrap()
    }

    fn cached(body: &'static str) -> CachedResponse {
        CachedResponse::from_response(&Response::new(
            url("https://planner.example/x"),
            StatusCode::OK,
            body,
        ))
    }

    #[test]
    fn test_cache() {
        let mut cache = Cache::new("v1");
        cache.put(&url("https://planner.example/style.css"), cached("css"));

        assert!(cache.match_url(&url("https://planner.example/style.css")).is_some());
        assert!(cache.match_url(&url("https://planner.example/other.css")).is_none());
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_fragment_is_ignored() {
        let mut cache = Cache::new("v1");
        cache.put(&url("https://planner.example/index.html"), cached("doc"));
        assert!(cache
            .match_url(&url("https://planner.example/index.html#classes"))
            .is_some());
    }

    #[test]
    fn test_cache_delete() {
        let mut cache = Cache::new("v1");
        let css = url("https://planner.example/style.css");
        cache.put(&css, cached("css"));
        assert!(cache.delete(&css));
        assert!(cache.match_url(&css).is_none());
        assert!(cache.is_empty());
    }

    #[test]
    fn test_cache_storage() {
        let mut storage = CacheStorage::new();

        assert!(!storage.has("v1"));
        storage.open("v1");
        storage.open("v2");
        assert_eq!(storage.keys(), vec!["v1".to_string(), "v2".to_string()]);

        assert!(storage.delete("v1"));
        assert!(!storage.has("v1"));
        assert!(!storage.delete("v1"));
    }

    #[test]
    fn test_response_round_trip_keeps_headers() {
        let mut response = Response::new(url("https://planner.example/app.js"), StatusCode::OK, "js");
        response.headers.insert(
            HeaderName::from_static("content-type"),
            HeaderValue::from_static("text/javascript"),
        );

        let restored = CachedResponse::from_response(&response)
            .to_response(&url("https://planner.example/app.js"));
        assert_eq!(restored.status, StatusCode::OK);
        assert_eq!(restored.headers["content-type"], "text/javascript");
        assert_eq!(restored.text().unwrap(), "js");
    }

    #[tokio::test]
    async fn test_memory_store_put_and_match() {
        let store = MemoryCacheStore::new();
        let app = url("https://planner.example/app.js");

        store.put("v1", &app, cached("js")).await.unwrap();

        assert!(store.match_in("v1", &app).await.unwrap().is_some());
        assert!(store.match_in("v2", &app).await.unwrap().is_none());
        assert!(store.match_any(&app).await.unwrap().is_some());
        assert_eq!(store.keys().await.unwrap(), vec!["v1".to_string()]);
    }

    #[tokio::test]
    async fn test_memory_store_put_all() {
        let store = MemoryCacheStore::new();
        let entries = vec![
            (url("https://planner.example/index.html"), cached("doc")),
            (url("https://planner.example/app.js"), cached("js")),
        ];
        store.put_all("v3", entries).await.unwrap();

        let storage = store.storage();
        let storage = storage.read().await;
        assert_eq!(storage.get("v3").map(Cache::len), Some(2));
    }
}
