//! Register, update and reload across page loads.

use std::sync::Arc;

use companion_net::{Request, ScriptedNetwork};
use companion_page::{InstallKind, PageConfig, PageController, RecordingUi, UiCall, WHATS_NEW_KEY};
use companion_store::{Language, LocalStorage, MemoryStorage};
use companion_sw::{MemoryCacheStore, ServiceWorkerContainer, WorkerScript};
use url::Url;

const ORIGIN: &str = "https://planner.example/";

fn url(path: &str) -> Url {
    Url::parse(ORIGIN).unwrap().join(path).unwrap()
}

struct Browser {
    container: ServiceWorkerContainer,
    net: Arc<ScriptedNetwork>,
    storage: Arc<MemoryStorage>,
    session: Arc<MemoryStorage>,
}

impl Browser {
    fn new() -> Self {
        let net = Arc::new(ScriptedNetwork::new());
        let (container, _) =
            ServiceWorkerContainer::new(net.clone(), Arc::new(MemoryCacheStore::new()));
        Self {
            container,
            net,
            storage: Arc::new(MemoryStorage::new()),
            session: Arc::new(MemoryStorage::new()),
        }
    }

    fn deploy(&self, version: u32) {
        let script = WorkerScript {
            version: format!("v{}", version),
            cache_name: format!("course-companion-cache-v{}", version),
            ..WorkerScript::shipped()
        };
        self.net.serve(&url("./service-worker.js"), script.to_bytes());
        for path in script.shell.paths() {
            self.net.serve(&url(path), format!("{} v{}", path, version));
        }
    }

    async fn open_page(&self) -> (PageController, Arc<RecordingUi>) {
        let ui = Arc::new(RecordingUi::new());
        let page = PageController::open(
            self.container.clone(),
            PageConfig {
                page_url: url("./index.html"),
                script_url: url("./service-worker.js"),
                default_language: Language::En,
                standalone: false,
            },
            ui.clone(),
            self.storage.clone(),
            self.session.clone(),
        )
        .await
        .unwrap();
        (page, ui)
    }

    async fn load_page(&self) -> (PageController, Arc<RecordingUi>) {
        let (mut page, ui) = self.open_page().await;
        page.register().await.unwrap();
        (page, ui)
    }
}

#[tokio::test]
async fn update_handshake_across_reload() {
    let browser = Browser::new();
    browser.deploy(1);

    let (mut page, ui) = browser.load_page().await;
    assert_eq!(page.install_kind(), Some(InstallKind::Update));
    assert!(ui.calls().is_empty());
    assert_eq!(page.request_version().await.unwrap(), "v1");

    browser.deploy(2);
    page.check_for_updates().await;
    assert_eq!(ui.calls(), vec![UiCall::UpdateAvailable]);

    page.accept_update().await.unwrap();
    assert_eq!(ui.count(UiCall::Reload), 1);

    page.close().await;
    let (mut reloaded, ui) = browser.load_page().await;
    assert_eq!(ui.calls(), vec![UiCall::WhatsNew]);
    assert_eq!(browser.session.get(WHATS_NEW_KEY), None);
    assert_eq!(reloaded.request_version().await.unwrap(), "v2");
    assert!(!reloaded.update_available());
}

#[tokio::test]
async fn waiting_worker_is_offered_on_load() {
    let browser = Browser::new();
    browser.deploy(1);
    let (mut first, _) = browser.load_page().await;

    browser.deploy(2);
    first.check_for_updates().await;
    first.close().await;

    // A later load finds the update already waiting.
    let (second, ui) = browser.load_page().await;
    assert!(second.update_available());
    assert_eq!(ui.calls(), vec![UiCall::UpdateAvailable]);
}

#[tokio::test]
async fn offline_reload_serves_app_shell() {
    let browser = Browser::new();
    browser.deploy(1);
    let (page, _) = browser.load_page().await;
    page.close().await;

    browser.net.set_online(false);
    let (mut page, ui) = browser.open_page().await;

    let shell = browser
        .container
        .fetch(Some(page.client()), &Request::get(url("./styles.css")))
        .await
        .unwrap();
    assert_eq!(shell.text().unwrap(), "./styles.css v1");

    page.check_for_updates().await;
    assert_eq!(ui.calls(), vec![UiCall::UpToDate]);
}

#[tokio::test]
async fn two_open_pages_each_reload_once() {
    let browser = Browser::new();
    browser.deploy(1);
    let (mut a, ui_a) = browser.load_page().await;
    let (mut b, ui_b) = browser.load_page().await;

    browser.deploy(2);
    a.check_for_updates().await;
    b.pump_events();
    assert_eq!(ui_b.count(UiCall::UpdateAvailable), 1);

    a.accept_update().await.unwrap();
    b.pump_events();

    assert_eq!(ui_a.count(UiCall::Reload), 1);
    assert_eq!(ui_b.count(UiCall::Reload), 1);
}
