//! End-to-end deployment scenarios through the public container API.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use companion_net::{Request, ScriptedNetwork};
use companion_sw::{
    CacheStore, CachedResponse, MemoryCacheStore, MessageTarget, PageMessage,
    ServiceWorkerContainer, ServiceWorkerError, ServiceWorkerEvent, ShellManifest,
    UpdateOutcome, WorkerReply, WorkerScript, WorkerState, APP_SHELL, CACHE_NAME,
};
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::sync::Notify;
use url::Url;

const ORIGIN: &str = "https://planner.example/";

fn url(path: &str) -> Url {
    Url::parse(ORIGIN).unwrap().join(path).unwrap()
}

fn script_url() -> Url {
    url("./service-worker.js")
}

fn scope() -> Url {
    url("./")
}

fn release(version: u32) -> WorkerScript {
    WorkerScript {
        version: format!("v{}", version),
        cache_name: format!("course-companion-cache-v{}", version),
        ..WorkerScript::shipped()
    }
}

fn publish(net: &ScriptedNetwork, script: &WorkerScript) {
    net.serve(&script_url(), script.to_bytes());
    for path in script.shell.paths() {
        net.serve(&url(path), format!("{} @ {}", path, script.version));
    }
}

fn drain(events: &mut UnboundedReceiver<ServiceWorkerEvent>) -> Vec<ServiceWorkerEvent> {
    let mut out = Vec::new();
    while let Ok(event) = events.try_recv() {
        out.push(event);
    }
    out
}

fn controller_changes(events: &[ServiceWorkerEvent]) -> usize {
    events
        .iter()
        .filter(|e| matches!(e, ServiceWorkerEvent::ControllerChange { .. }))
        .count()
}

#[tokio::test]
async fn shipped_script_precaches_app_shell() {
    let net = Arc::new(ScriptedNetwork::new());
    let caches = MemoryCacheStore::new();
    let (container, _events) = ServiceWorkerContainer::new(net.clone(), Arc::new(caches.clone()));
    publish(&net, &WorkerScript::shipped());

    container.register(&script_url()).await.unwrap();

    assert_eq!(caches.keys().await.unwrap(), vec![CACHE_NAME.to_string()]);
    for path in APP_SHELL {
        let hit = caches.match_in(CACHE_NAME, &url(path)).await.unwrap();
        assert!(hit.is_some(), "{} not precached", path);
    }
}

#[tokio::test]
async fn update_flow_from_v1_to_v2() {
    let net = Arc::new(ScriptedNetwork::new());
    let caches = MemoryCacheStore::new();
    let (container, mut events) = ServiceWorkerContainer::new(net.clone(), Arc::new(caches.clone()));

    publish(&net, &release(1));
    container.register(&script_url()).await.unwrap();
    let page = container.open_client(url("./index.html")).await;
    assert_eq!(container.controller(page.id).await.unwrap().version, "v1");
    drain(&mut events);

    // Served from cache with no network traffic.
    net.clear_log();
    let app = container
        .fetch(Some(page.id), &Request::get(url("./app.js")))
        .await
        .unwrap();
    assert_eq!(app.text().unwrap(), "./app.js @ v1");
    assert_eq!(net.total_requests(), 0);

    // v2 is deployed and found by an update check; v1 keeps serving.
    publish(&net, &release(2));
    let outcome = container.update(&scope()).await.unwrap();
    let waiting = match outcome {
        UpdateOutcome::Installed {
            generation,
            activated: false,
        } => generation,
        other => panic!("unexpected outcome {:?}", other),
    };
    let found = drain(&mut events);
    assert!(found.iter().any(|e| matches!(
        e,
        ServiceWorkerEvent::UpdateFound { generation, .. } if *generation == waiting
    )));
    assert_eq!(controller_changes(&found), 0);

    let app = container
        .fetch(Some(page.id), &Request::get(url("./app.js")))
        .await
        .unwrap();
    assert_eq!(app.text().unwrap(), "./app.js @ v1");
    assert_eq!(
        caches.keys().await.unwrap(),
        vec![
            "course-companion-cache-v1".to_string(),
            "course-companion-cache-v2".to_string()
        ]
    );

    // The page accepts the update.
    container
        .post_message(&scope(), MessageTarget::Waiting, PageMessage::SkipWaiting)
        .await
        .unwrap();
    let activated = drain(&mut events);
    assert_eq!(controller_changes(&activated), 1);
    assert!(activated.iter().any(|e| matches!(
        e,
        ServiceWorkerEvent::StateChange { state: WorkerState::Activated, generation, .. }
            if *generation == waiting
    )));

    assert_eq!(
        caches.keys().await.unwrap(),
        vec!["course-companion-cache-v2".to_string()]
    );
    let app = container
        .fetch(Some(page.id), &Request::get(url("./app.js")))
        .await
        .unwrap();
    assert_eq!(app.text().unwrap(), "./app.js @ v2");

    let reply = container
        .post_message(&scope(), MessageTarget::Active, PageMessage::GetVersion)
        .await
        .unwrap();
    assert_eq!(
        reply,
        Some(WorkerReply::Version {
            version: "v2".into()
        })
    );
}

#[tokio::test]
async fn offline_behavior_after_install() {
    let net = Arc::new(ScriptedNetwork::new());
    let (container, _events) =
        ServiceWorkerContainer::new(net.clone(), Arc::new(MemoryCacheStore::new()));
    publish(&net, &release(1));
    container.register(&script_url()).await.unwrap();
    let page = container.open_client(url("./index.html")).await;

    // Write-through while online.
    net.serve(&url("./icons/icon-192.png"), "png");
    container
        .fetch(Some(page.id), &Request::get(url("./icons/icon-192.png")))
        .await
        .unwrap();

    net.set_online(false);

    let icon = container
        .fetch(Some(page.id), &Request::get(url("./icons/icon-192.png")))
        .await
        .unwrap();
    assert_eq!(icon.text().unwrap(), "png");

    let nav = container
        .fetch(None, &Request::navigate(url("./classes/42")))
        .await
        .unwrap();
    assert_eq!(nav.text().unwrap(), "./index.html @ v1");

    let missing = container
        .fetch(Some(page.id), &Request::get(url("./data.json")))
        .await
        .unwrap();
    assert_eq!(missing.status.as_u16(), 503);
    assert_eq!(missing.text().unwrap(), "Offline");
}

#[tokio::test]
async fn cross_origin_requests_bypass_worker() {
    let net = Arc::new(ScriptedNetwork::new());
    let (container, _events) =
        ServiceWorkerContainer::new(net.clone(), Arc::new(MemoryCacheStore::new()));
    publish(&net, &release(1));
    container.register(&script_url()).await.unwrap();
    let page = container.open_client(url("./index.html")).await;

    let font = Url::parse("https://fonts.example/inter.woff2").unwrap();
    net.serve(&font, "font");
    net.set_online(false);

    let result = container.fetch(Some(page.id), &Request::get(font)).await;
    assert!(result.is_err());
}

#[tokio::test]
async fn identical_script_bytes_never_reinstall() {
    let net = Arc::new(ScriptedNetwork::new());
    let (container, mut events) =
        ServiceWorkerContainer::new(net.clone(), Arc::new(MemoryCacheStore::new()));
    publish(&net, &release(1));
    container.register(&script_url()).await.unwrap();
    drain(&mut events);

    container.register(&script_url()).await.unwrap();
    assert_eq!(
        container.update(&scope()).await.unwrap(),
        UpdateOutcome::Unchanged
    );
    assert!(drain(&mut events).is_empty());
}

#[tokio::test]
async fn broken_release_leaves_v1_in_control() {
    let net = Arc::new(ScriptedNetwork::new());
    let caches = MemoryCacheStore::new();
    let (container, mut events) = ServiceWorkerContainer::new(net.clone(), Arc::new(caches.clone()));
    publish(&net, &release(1));
    container.register(&script_url()).await.unwrap();
    let page = container.open_client(url("./index.html")).await;
    drain(&mut events);

    publish(&net, &release(2));
    net.fail(&url("./translations.js"));
    let err = container.update(&scope()).await.unwrap_err();
    assert!(err.is_install_failure());

    let events = drain(&mut events);
    assert_eq!(controller_changes(&events), 0);
    assert!(events.iter().any(|e| matches!(
        e,
        ServiceWorkerEvent::StateChange {
            state: WorkerState::Redundant,
            ..
        }
    )));
    assert_eq!(container.controller(page.id).await.unwrap().version, "v1");
    assert_eq!(
        caches.keys().await.unwrap(),
        vec!["course-companion-cache-v1".to_string()]
    );
}

#[tokio::test]
async fn malformed_script_is_rejected() {
    let net = Arc::new(ScriptedNetwork::new());
    let (container, _events) =
        ServiceWorkerContainer::new(net.clone(), Arc::new(MemoryCacheStore::new()));
    net.serve(&script_url(), "self.addEventListener('install', () => {})");

    let err = container.register(&script_url()).await.unwrap_err();
    assert!(matches!(err, ServiceWorkerError::ScriptError(_)));
    assert!(container.get_registration(&url("./index.html")).await.is_none());
}

/// Cache store wrapper with injectable faults.
#[derive(Default)]
struct FailingCacheStore {
    inner: MemoryCacheStore,
    refuse_writes: bool,
    undeletable: Option<String>,
    hold_keys: AtomicBool,
    keys_entered: Notify,
    keys_released: Notify,
}

#[async_trait]
impl CacheStore for FailingCacheStore {
    async fn open(&self, name: &str) -> Result<(), ServiceWorkerError> {
        self.inner.open(name).await
    }

    async fn keys(&self) -> Result<Vec<String>, ServiceWorkerError> {
        if self.hold_keys.swap(false, Ordering::SeqCst) {
            self.keys_entered.notify_one();
            self.keys_released.notified().await;
        }
        self.inner.keys().await
    }

    async fn delete(&self, name: &str) -> Result<bool, ServiceWorkerError> {
        if self.undeletable.as_deref() == Some(name) {
            return Err(ServiceWorkerError::CacheError(format!("{} is locked", name)));
        }
        self.inner.delete(name).await
    }

    async fn match_in(
        &self,
        name: &str,
        url: &Url,
    ) -> Result<Option<CachedResponse>, ServiceWorkerError> {
        self.inner.match_in(name, url).await
    }

    async fn match_any(&self, url: &Url) -> Result<Option<CachedResponse>, ServiceWorkerError> {
        self.inner.match_any(url).await
    }

    async fn put(
        &self,
        name: &str,
        url: &Url,
        response: CachedResponse,
    ) -> Result<(), ServiceWorkerError> {
        if self.refuse_writes {
            return Err(ServiceWorkerError::CacheError("quota exceeded".into()));
        }
        self.inner.put(name, url, response).await
    }

    async fn put_all(
        &self,
        name: &str,
        entries: Vec<(Url, CachedResponse)>,
    ) -> Result<(), ServiceWorkerError> {
        if self.refuse_writes {
            return Err(ServiceWorkerError::CacheError("quota exceeded".into()));
        }
        self.inner.put_all(name, entries).await
    }
}

#[tokio::test]
async fn cache_write_failure_fails_install() {
    let net = Arc::new(ScriptedNetwork::new());
    let store = Arc::new(FailingCacheStore {
        refuse_writes: true,
        ..Default::default()
    });
    let (container, _events) = ServiceWorkerContainer::new(net.clone(), store.clone());
    publish(&net, &release(1));

    let err = container.register(&script_url()).await.unwrap_err();
    match err {
        ServiceWorkerError::InstallFailed { version, reason } => {
            assert_eq!(version, "v1");
            assert!(reason.contains("quota exceeded"));
        }
        other => panic!("unexpected error {:?}", other),
    }
    // No empty versioned cache is left behind.
    assert!(store.keys().await.unwrap().is_empty());
}

#[tokio::test]
async fn locked_stale_cache_does_not_stop_eviction() {
    let net = Arc::new(ScriptedNetwork::new());
    let store = Arc::new(FailingCacheStore {
        undeletable: Some("a-locked-cache".to_string()),
        ..Default::default()
    });
    store.inner.open("a-locked-cache").await.unwrap();
    store.inner.open("z-stale-cache").await.unwrap();
    let (container, _events) = ServiceWorkerContainer::new(net.clone(), store.clone());
    publish(&net, &release(1));

    let snapshot = container.register(&script_url()).await.unwrap();
    assert!(snapshot.active.unwrap().is_active());
    assert_eq!(
        store.keys().await.unwrap(),
        vec![
            "a-locked-cache".to_string(),
            "course-companion-cache-v1".to_string()
        ]
    );
}

#[tokio::test]
async fn fetches_wait_for_activation_to_finish() {
    let net = Arc::new(ScriptedNetwork::new());
    let store = Arc::new(FailingCacheStore::default());
    let (container, _events) = ServiceWorkerContainer::new(net.clone(), store.clone());
    publish(&net, &release(1));
    container.register(&script_url()).await.unwrap();
    publish(&net, &release(2));
    container.update(&scope()).await.unwrap();

    // Hold v2 in the eviction step of its activation.
    store.hold_keys.store(true, Ordering::SeqCst);
    let skip_waiting = {
        let container = container.clone();
        tokio::spawn(async move {
            container
                .post_message(&scope(), MessageTarget::Waiting, PageMessage::SkipWaiting)
                .await
        })
    };
    store.keys_entered.notified().await;
    net.set_online(false);

    let navigation = {
        let container = container.clone();
        tokio::spawn(async move {
            container
                .fetch(None, &Request::navigate(url("./planner/today")))
                .await
        })
    };
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert!(!navigation.is_finished());

    store.keys_released.notify_one();
    skip_waiting.await.unwrap().unwrap();
    let response = navigation.await.unwrap().unwrap();
    assert_eq!(response.text().unwrap(), "./index.html @ v2");
}

#[tokio::test]
async fn repeated_error_response_served_from_cache() {
    let net = Arc::new(ScriptedNetwork::new());
    let (container, _events) =
        ServiceWorkerContainer::new(net.clone(), Arc::new(MemoryCacheStore::new()));
    publish(&net, &release(1));
    container.register(&script_url()).await.unwrap();
    let page = container.open_client(url("./index.html")).await;

    let missing = url("./missing.png");
    for _ in 0..2 {
        let response = container
            .fetch(Some(page.id), &Request::get(missing.clone()))
            .await
            .unwrap();
        assert_eq!(response.status.as_u16(), 404);
    }
    assert_eq!(net.request_count(&missing), 1);
}

#[tokio::test]
async fn custom_shell_manifest() {
    let net = Arc::new(ScriptedNetwork::new());
    let caches = MemoryCacheStore::new();
    let (container, _events) = ServiceWorkerContainer::new(net.clone(), Arc::new(caches.clone()));
    let script = WorkerScript {
        shell: ShellManifest::new(["./index.html", "./app.js"]),
        ..release(4)
    };
    publish(&net, &script);

    container.register(&script_url()).await.unwrap();
    let cache = caches.storage();
    let storage = cache.read().await;
    assert_eq!(storage.get("course-companion-cache-v4").unwrap().len(), 2);
}
