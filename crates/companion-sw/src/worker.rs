//! Worker-side behavior of one generation: install, activate, fetch, message.
//!
//! `OfflineWorker` has no notion of lifecycle state; the registration decides
//! when each handler runs. The one exception is the activation gate, which
//! holds fetches routed to an activating generation until activation is over.

use std::sync::Arc;

use http::Method;
use tokio::sync::watch;
use tracing::{debug, info, warn};
use url::Url;

use companion_net::{Network, Request, Response};

use crate::cache::{CacheStore, CachedResponse};
use crate::message::{MessageOutcome, PageMessage, WorkerReply};
use crate::script::WorkerScript;
use crate::ServiceWorkerError;

/// Where an intercepted response came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseSource {
    /// Cache hit.
    Cache,
    /// Network, after a cache miss.
    Network,
    /// Cached root document served for a failed navigation.
    NavigationFallback,
    /// Synthetic 503.
    Offline,
}

/// Result of fetch interception.
#[derive(Debug)]
pub enum FetchOutcome {
    /// The worker produced the response.
    Respond {
        response: Response,
        source: ResponseSource,
    },
    /// Not intercepted; the caller goes to the network directly.
    Passthrough,
}

/// One generation's event handlers.
pub struct OfflineWorker {
    script: WorkerScript,
    scope: Url,
    caches: Arc<dyn CacheStore>,
    network: Arc<dyn Network>,
    activated: watch::Sender<bool>,
}

impl OfflineWorker {
    pub fn new(
        script: WorkerScript,
        scope: Url,
        caches: Arc<dyn CacheStore>,
        network: Arc<dyn Network>,
    ) -> Self {
        Self {
            script,
            scope,
            caches,
            network,
            activated: watch::Sender::new(false),
        }
    }

    pub fn version(&self) -> &str {
        &self.script.version
    }

    pub fn cache_name(&self) -> &str {
        &self.script.cache_name
    }

    pub fn script(&self) -> &WorkerScript {
        &self.script
    }

    /// Open the activation gate. Fetches waiting in [`Self::activated`] proceed.
    pub(crate) fn mark_activated(&self) {
        self.activated.send_replace(true);
    }

    /// Wait until activation has finished.
    pub async fn activated(&self) {
        let mut rx = self.activated.subscribe();
        // The sender lives in `self`, so the wait cannot fail.
        let _ = rx.wait_for(|done| *done).await;
    }

    /// Install handler: fetch every shell asset, then store them all.
    ///
    /// Nothing is written unless every asset fetched with a 2xx status.
    pub async fn install(&self) -> Result<(), ServiceWorkerError> {
        let urls = self.script.shell.resolve(&self.scope)?;
        let mut fetched = Vec::with_capacity(urls.len());

        for url in urls {
            let response = self
                .network
                .fetch(&Request::get(url.clone()))
                .await
                .map_err(|e| self.install_failure(format!("{}: {}", url, e)))?;

            if !response.ok() {
                return Err(self.install_failure(format!(
                    "{} returned {}",
                    url, response.status
                )));
            }
            fetched.push((url, CachedResponse::from_response(&response)));
        }

        let count = fetched.len();
        self.caches
            .put_all(&self.script.cache_name, fetched)
            .await
            .map_err(|e| self.install_failure(e.to_string()))?;

        info!(
            version = %self.script.version,
            cache = %self.script.cache_name,
            assets = count,
            "App shell cached"
        );
        Ok(())
    }

    fn install_failure(&self, reason: String) -> ServiceWorkerError {
        ServiceWorkerError::InstallFailed {
            version: self.script.version.clone(),
            reason,
        }
    }

    /// Activate handler: delete every cache that is not this generation's.
    ///
    /// A failed delete is logged and the rest are still tried. Returns the
    /// deleted cache names.
    pub async fn activate(&self) -> Result<Vec<String>, ServiceWorkerError> {
        let mut deleted = Vec::new();
        for name in self.caches.keys().await? {
            if name == self.script.cache_name {
                continue;
            }
            match self.caches.delete(&name).await {
                Ok(true) => deleted.push(name),
                Ok(false) => {}
                Err(e) => warn!(cache = %name, error = %e, "Stale cache not deleted"),
            }
        }

        if !deleted.is_empty() {
            info!(kept = %self.script.cache_name, deleted = ?deleted, "Evicted stale caches");
        }
        Ok(deleted)
    }

    /// Fetch handler: cache first, network with write-through, then fallbacks.
    ///
    /// Every response the network returns is written through, error statuses included.
    pub async fn handle_fetch(&self, request: &Request) -> FetchOutcome {
        if request.method != Method::GET || !request.is_same_origin(&self.scope) {
            return FetchOutcome::Passthrough;
        }

        let cache_name = &self.script.cache_name;
        match self.caches.match_in(cache_name, &request.url).await {
            Ok(Some(cached)) => {
                debug!(url = %request.url, "Served from cache");
                return FetchOutcome::Respond {
                    response: cached.to_response(&request.url),
                    source: ResponseSource::Cache,
                };
            }
            Ok(None) => {}
            Err(e) => warn!(url = %request.url, error = %e, "Cache lookup failed"),
        }

        match self.network.fetch(request).await {
            Ok(response) => {
                let copy = CachedResponse::from_response(&response);
                if let Err(e) = self.caches.put(cache_name, &request.url, copy).await {
                    debug!(url = %request.url, error = %e, "Write-through skipped");
                }
                FetchOutcome::Respond {
                    response,
                    source: ResponseSource::Network,
                }
            }
            Err(e) => {
                debug!(url = %request.url, error = %e, "Network fetch failed");
                if request.is_navigation() {
                    if let Some(response) = self.root_document(&request.url).await {
                        return FetchOutcome::Respond {
                            response,
                            source: ResponseSource::NavigationFallback,
                        };
                    }
                }
                FetchOutcome::Respond {
                    response: Response::offline(request.url.clone()),
                    source: ResponseSource::Offline,
                }
            }
        }
    }

    async fn root_document(&self, request_url: &Url) -> Option<Response> {
        let url = self.scope.join(&self.script.root_document).ok()?;
        match self.caches.match_in(&self.script.cache_name, &url).await {
            Ok(cached) => cached.map(|c| c.to_response(request_url)),
            Err(e) => {
                warn!(error = %e, "Root document lookup failed");
                None
            }
        }
    }

    /// Message handler.
    pub fn handle_message(&self, message: &PageMessage) -> MessageOutcome {
        match message {
            PageMessage::SkipWaiting => MessageOutcome::SkipWaiting,
            PageMessage::GetVersion => MessageOutcome::Reply(WorkerReply::Version {
                version: self.script.version.clone(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::MemoryCacheStore;
    use crate::script::ShellManifest;
    use companion_net::ScriptedNetwork;
    use http::StatusCode;

    const SCOPE: &str = "https://planner.example/";

    struct Fixture {
        net: Arc<ScriptedNetwork>,
        caches: MemoryCacheStore,
        worker: OfflineWorker,
    }

    fn url(path: &str) -> Url {
        Url::parse(SCOPE).unwrap().join(path).unwrap()
    }

    fn fixture(cache_name: &str, shell: &[&str]) -> Fixture {
        let net = Arc::new(ScriptedNetwork::new());
        for path in shell {
            net.serve(&url(path), format!("body of {}", path));
        }
        let caches = MemoryCacheStore::new();
        let script = WorkerScript {
            version: cache_name.to_string(),
            cache_name: cache_name.to_string(),
            shell: ShellManifest::new(shell.iter().copied()),
            root_document: "./index.html".to_string(),
        };
        let worker = OfflineWorker::new(
            script,
            Url::parse(SCOPE).unwrap(),
            Arc::new(caches.clone()),
            net.clone(),
        );
        Fixture {
            net,
            caches,
            worker,
        }
    }

    #[tokio::test]
    async fn test_install_caches_every_shell_asset() {
        let f = fixture("v1", &["./index.html", "./app.js"]);
        f.worker.install().await.unwrap();

        for path in ["./index.html", "./app.js"] {
            let hit = f.caches.match_in("v1", &url(path)).await.unwrap();
            assert!(hit.is_some(), "{} missing", path);
        }
    }

    #[tokio::test]
    async fn test_install_is_all_or_nothing() {
        let f = fixture("v1", &["./index.html", "./app.js", "./styles.css"]);
        f.net.fail(&url("./styles.css"));

        let err = f.worker.install().await.unwrap_err();
        assert!(matches!(err, ServiceWorkerError::InstallFailed { .. }));
        assert!(f.caches.keys().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_install_fails_on_error_status() {
        let f = fixture("v1", &["./index.html"]);
        f.net
            .serve_status(&url("./index.html"), StatusCode::NOT_FOUND, "");

        assert!(f.worker.install().await.is_err());
        assert!(f.caches.match_any(&url("./index.html")).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_activate_evicts_other_caches() {
        let f = fixture("v2", &["./index.html"]);
        f.caches.open("v1").await.unwrap();
        f.worker.install().await.unwrap();

        let deleted = f.worker.activate().await.unwrap();
        assert_eq!(deleted, vec!["v1".to_string()]);
        assert_eq!(f.caches.keys().await.unwrap(), vec!["v2".to_string()]);
    }

    #[tokio::test]
    async fn test_cache_hit_skips_network() {
        let f = fixture("v1", &["./app.js"]);
        f.worker.install().await.unwrap();
        f.net.clear_log();

        let outcome = f.worker.handle_fetch(&Request::get(url("./app.js"))).await;
        match outcome {
            FetchOutcome::Respond { response, source } => {
                assert_eq!(source, ResponseSource::Cache);
                assert_eq!(response.text().unwrap(), "body of ./app.js");
            }
            FetchOutcome::Passthrough => panic!("expected a response"),
        }
        assert_eq!(f.net.total_requests(), 0);
    }

    #[tokio::test]
    async fn test_miss_writes_through() {
        let f = fixture("v1", &[]);
        let icon = url("./icon.png");
        f.net.serve(&icon, "png");

        let first = f.worker.handle_fetch(&Request::get(icon.clone())).await;
        assert!(matches!(
            first,
            FetchOutcome::Respond {
                source: ResponseSource::Network,
                ..
            }
        ));

        let second = f.worker.handle_fetch(&Request::get(icon.clone())).await;
        assert!(matches!(
            second,
            FetchOutcome::Respond {
                source: ResponseSource::Cache,
                ..
            }
        ));
        assert_eq!(f.net.request_count(&icon), 1);
    }

    #[tokio::test]
    async fn test_error_statuses_are_written_through() {
        let f = fixture("v1", &[]);
        let missing = url("./missing.png");

        f.worker.handle_fetch(&Request::get(missing.clone())).await;
        let second = f.worker.handle_fetch(&Request::get(missing.clone())).await;
        match second {
            FetchOutcome::Respond { response, source } => {
                assert_eq!(source, ResponseSource::Cache);
                assert_eq!(response.status, StatusCode::NOT_FOUND);
            }
            FetchOutcome::Passthrough => panic!("expected a response"),
        }
        assert_eq!(f.net.request_count(&missing), 1);
    }

    #[tokio::test]
    async fn test_activation_gate() {
        let f = Arc::new(fixture("v1", &[]));
        let waiter = {
            let f = Arc::clone(&f);
            tokio::spawn(async move { f.worker.activated().await })
        };
        tokio::task::yield_now().await;
        assert!(!waiter.is_finished());

        f.worker.mark_activated();
        waiter.await.unwrap();
        // Already open: returns at once.
        f.worker.activated().await;
    }

    #[tokio::test]
    async fn test_navigation_falls_back_to_root_document() {
        let f = fixture("v1", &["./index.html"]);
        f.worker.install().await.unwrap();
        f.net.set_online(false);

        let outcome = f
            .worker
            .handle_fetch(&Request::navigate(url("./classes/42")))
            .await;
        match outcome {
            FetchOutcome::Respond { response, source } => {
                assert_eq!(source, ResponseSource::NavigationFallback);
                assert_eq!(response.text().unwrap(), "body of ./index.html");
            }
            FetchOutcome::Passthrough => panic!("expected a response"),
        }
    }

    #[tokio::test]
    async fn test_navigation_without_root_document_is_offline() {
        let f = fixture("v1", &[]);
        f.net.set_online(false);

        let outcome = f.worker.handle_fetch(&Request::navigate(url("./"))).await;
        match outcome {
            FetchOutcome::Respond { response, source } => {
                assert_eq!(source, ResponseSource::Offline);
                assert!(response.is_offline());
            }
            FetchOutcome::Passthrough => panic!("expected a response"),
        }
    }

    #[tokio::test]
    async fn test_subresource_offline_response() {
        let f = fixture("v1", &["./index.html"]);
        f.worker.install().await.unwrap();
        f.net.set_online(false);

        let outcome = f.worker.handle_fetch(&Request::get(url("./data.json"))).await;
        match outcome {
            FetchOutcome::Respond { response, source } => {
                assert_eq!(source, ResponseSource::Offline);
                assert_eq!(response.status, StatusCode::SERVICE_UNAVAILABLE);
                assert_eq!(response.status_text, "Offline");
            }
            FetchOutcome::Passthrough => panic!("expected a response"),
        }
    }

    #[tokio::test]
    async fn test_non_get_and_cross_origin_pass_through() {
        let f = fixture("v1", &[]);

        let post = Request::post(url("./api"), bytes::Bytes::from_static(b"{}"));
        assert!(matches!(
            f.worker.handle_fetch(&post).await,
            FetchOutcome::Passthrough
        ));

        let cdn = Request::get(Url::parse("https://cdn.example/tesseract.js").unwrap());
        assert!(matches!(
            f.worker.handle_fetch(&cdn).await,
            FetchOutcome::Passthrough
        ));
        assert_eq!(f.net.total_requests(), 0);
    }

    #[test]
    fn test_messages() {
        let f = fixture("v7", &[]);
        assert_eq!(
            f.worker.handle_message(&PageMessage::SkipWaiting),
            MessageOutcome::SkipWaiting
        );
        assert_eq!(
            f.worker.handle_message(&PageMessage::GetVersion),
            MessageOutcome::Reply(WorkerReply::Version {
                version: "v7".into()
            })
        );
    }
}
