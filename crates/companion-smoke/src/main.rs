//! Course Companion smoke harness
//!
//! Drives the offline layer through a scripted deployment: first install,
//! a series of updates accepted from the page, then an offline reload. Prints
//! a JSON summary on stdout.
//!
//! With `--live` the harness registers against the configured scope over the
//! real network instead and only checks registration, version and updates.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{bail, Context, Result};
use serde_json::json;
use tracing::{error, info};
use url::Url;

use companion_common::{init_logging, CompanionConfig};
use companion_net::{LoaderConfig, Network, Request, ResourceLoader, ScriptedNetwork};
use companion_page::{PageConfig, PageController, RecordingUi, UiCall};
use companion_store::{FileStorage, Language, LocalStorage, MemoryStorage};
use companion_sw::{CacheStore, MemoryCacheStore, ServiceWorkerContainer, WorkerScript, CACHE_NAME};

/// Duration collector for harness steps.
struct StepTimings {
    timings: HashMap<&'static str, Vec<Duration>>,
}

impl StepTimings {
    fn new() -> Self {
        Self {
            timings: HashMap::new(),
        }
    }

    fn record(&mut self, step: &'static str, duration: Duration) {
        self.timings.entry(step).or_default().push(duration);
    }

    fn summary(&self) -> serde_json::Value {
        let mut summary = serde_json::Map::new();
        for (step, durations) in &self.timings {
            let total_ms: f64 = durations.iter().map(|d| d.as_secs_f64() * 1000.0).sum();
            summary.insert(
                step.to_string(),
                json!({
                    "count": durations.len(),
                    "total_ms": (total_ms * 100.0).round() / 100.0,
                }),
            );
        }
        serde_json::Value::Object(summary)
    }
}

/// Parse command line arguments
struct Args {
    config: Option<PathBuf>,
    versions: u32,
    report: Option<PathBuf>,
    persist: bool,
    live: bool,
}

impl Args {
    fn parse() -> Self {
        let mut args = std::env::args().skip(1);
        let mut parsed = Self {
            config: None,
            versions: 3,
            report: None,
            persist: false,
            live: false,
        };

        while let Some(arg) = args.next() {
            match arg.as_str() {
                "--config" => parsed.config = args.next().map(PathBuf::from),
                "--versions" => {
                    if let Some(val) = args.next() {
                        parsed.versions = val.parse().unwrap_or(3).max(1);
                    }
                }
                "--report" => parsed.report = args.next().map(PathBuf::from),
                "--persist" => parsed.persist = true,
                "--live" => parsed.live = true,
                _ => {}
            }
        }
        parsed
    }
}

/// Script served for deployment `version`; the last one is the shipped script.
fn release(version: u32, last: u32) -> WorkerScript {
    if version == last {
        return WorkerScript::shipped();
    }
    WorkerScript {
        version: version.to_string(),
        cache_name: format!("course-companion-cache-v{}", version),
        ..WorkerScript::shipped()
    }
}

fn deploy(net: &ScriptedNetwork, scope: &Url, script_url: &Url, script: &WorkerScript) -> Result<()> {
    net.serve(script_url, script.to_bytes());
    for asset in script.shell.resolve(scope)? {
        let body = format!("<!-- {} @ v{} -->", asset.path(), script.version);
        net.serve(&asset, body);
    }
    info!(version = %script.version, cache = %script.cache_name, "Deployed");
    Ok(())
}

struct Page {
    controller: PageController,
    ui: Arc<RecordingUi>,
}

struct Harness {
    container: ServiceWorkerContainer,
    config: PageConfig,
    storage: Arc<dyn LocalStorage>,
    session: Arc<dyn LocalStorage>,
}

impl Harness {
    async fn load(&self) -> Result<Page> {
        let ui = Arc::new(RecordingUi::new());
        let mut controller = PageController::open(
            self.container.clone(),
            self.config.clone(),
            ui.clone(),
            Arc::clone(&self.storage),
            Arc::clone(&self.session),
        )
        .await?;
        controller.register().await?;
        Ok(Page { controller, ui })
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let config = match &args.config {
        Some(path) => CompanionConfig::load(path)
            .with_context(|| format!("loading {}", path.display()))?,
        None => CompanionConfig::default(),
    };
    init_logging(&config.log);

    let start = Instant::now();
    let outcome = if args.live {
        run_live(&config).await
    } else {
        run_scripted(&args, &config).await
    };

    let result = match outcome {
        Ok(details) => json!({
            "status": "pass",
            "elapsed_ms": start.elapsed().as_millis(),
            "details": details,
        }),
        Err(e) => {
            error!(error = %e, "Smoke run failed");
            json!({
                "status": "fail",
                "elapsed_ms": start.elapsed().as_millis(),
                "error": format!("{:#}", e),
            })
        }
    };

    if let Some(path) = &args.report {
        std::fs::write(path, serde_json::to_string_pretty(&result)?)
            .with_context(|| format!("writing {}", path.display()))?;
        info!(path = %path.display(), "Report written");
    }
    println!("{}", result);

    if result["status"] != "pass" {
        std::process::exit(1);
    }
    Ok(())
}

async fn run_scripted(args: &Args, config: &CompanionConfig) -> Result<serde_json::Value> {
    let mut timings = StepTimings::new();
    let scope = config.scope.clone();
    let script_url = config.script_url()?;

    let net = Arc::new(ScriptedNetwork::new());
    let caches = MemoryCacheStore::new();
    let (container, _events) = ServiceWorkerContainer::new(net.clone(), Arc::new(caches.clone()));

    let storage: Arc<dyn LocalStorage> = if args.persist {
        Arc::new(FileStorage::open(config.storage_path())?)
    } else {
        Arc::new(MemoryStorage::new())
    };
    let harness = Harness {
        container: container.clone(),
        config: PageConfig {
            page_url: scope.join("./index.html")?,
            script_url: script_url.clone(),
            default_language: config.default_language.parse::<Language>()?,
            standalone: false,
        },
        storage,
        session: Arc::new(MemoryStorage::new()),
    };

    // First install.
    deploy(&net, &scope, &script_url, &release(1, args.versions))?;
    let step = Instant::now();
    let mut page = harness.load().await?;
    timings.record("first_install", step.elapsed());
    if page.ui.count(UiCall::Reload) != 0 {
        bail!("first install reloaded the page");
    }

    let mut versions = vec![page.controller.request_version().await?];
    let mut reloads = 0;

    for version in 2..=args.versions {
        deploy(&net, &scope, &script_url, &release(version, args.versions))?;

        let step = Instant::now();
        page.controller.check_for_updates().await;
        if !page.controller.update_available() {
            bail!("update to v{} was not offered", version);
        }
        page.controller.accept_update().await?;
        timings.record("update", step.elapsed());

        let reloaded = page.ui.count(UiCall::Reload);
        if reloaded != 1 {
            bail!("expected exactly one reload, saw {}", reloaded);
        }
        reloads += reloaded;

        page.controller.close().await;
        page = harness.load().await?;
        if page.ui.count(UiCall::WhatsNew) != 1 {
            bail!("what's-new notice missing after update to v{}", version);
        }
        versions.push(page.controller.request_version().await?);
    }

    let cache_names = caches.keys().await?;

    // Offline reload.
    net.set_online(false);
    let step = Instant::now();
    let navigation = container
        .fetch(None, &Request::navigate(scope.join("./planner/today")?))
        .await?;
    let missing = container
        .fetch(
            Some(page.controller.client()),
            &Request::get(scope.join("./not-precached.json")?),
        )
        .await?;
    timings.record("offline", step.elapsed());

    page.controller.check_for_updates().await;
    let offline_check = page.ui.calls().last().copied();
    page.controller.close().await;

    Ok(json!({
        "mode": "scripted",
        "versions_served": versions,
        "reloads": reloads,
        "caches": cache_names,
        "current_cache_is_shipped": cache_names == vec![CACHE_NAME.to_string()],
        "offline": {
            "navigation_status": navigation.status.as_u16(),
            "subresource_status": missing.status.as_u16(),
            "update_check": format!("{:?}", offline_check),
        },
        "timings": timings.summary(),
    }))
}

async fn run_live(config: &CompanionConfig) -> Result<serde_json::Value> {
    let mut timings = StepTimings::new();
    let script_url = config.script_url()?;
    let loader: Arc<dyn Network> = Arc::new(ResourceLoader::new(LoaderConfig::default())?);
    let caches = MemoryCacheStore::new();
    let (container, _events) = ServiceWorkerContainer::new(loader, Arc::new(caches.clone()));

    let harness = Harness {
        container,
        config: PageConfig {
            page_url: config.scope.join("./index.html")?,
            script_url: script_url.clone(),
            default_language: config.default_language.parse::<Language>()?,
            standalone: false,
        },
        storage: Arc::new(FileStorage::open(config.storage_path())?),
        session: Arc::new(MemoryStorage::new()),
    };

    let step = Instant::now();
    let mut page = harness.load().await?;
    timings.record("register", step.elapsed());

    let version = page.controller.request_version().await?;
    page.controller.check_for_updates().await;
    let update_available = page.controller.update_available();
    page.controller.close().await;

    Ok(json!({
        "mode": "live",
        "script": script_url.as_str(),
        "version": version,
        "update_available": update_available,
        "caches": caches.keys().await?,
        "timings": timings.summary(),
    }))
}
