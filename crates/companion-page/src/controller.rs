//! Page controller: one instance per page load.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use url::Url;

use companion_store::{
    export_backup, import_backup, translate, ClassBook, ClassInfo, LocalStorage, Language,
    Profile, StudentInfo, TextScanner,
};
use companion_sw::{
    ClientId, GenerationId, MessageTarget, PageMessage, ServiceWorkerContainer,
    ServiceWorkerEvent, UpdateOutcome, WorkerReply, WorkerState,
};

use crate::install::{InstallChoice, InstallPrompt};
use crate::ui::PageUi;
use crate::{PageError, Result};

/// Session key of the one-shot "what's new" flag.
pub const WHATS_NEW_KEY: &str = "course_companion.whats_new";

const PROFILE_SAVE_DELAY: Duration = Duration::from_millis(300);

/// Whether this page load started without a controlling worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstallKind {
    /// No worker controlled the page; the next claim is the first install.
    FirstInstall,
    /// A worker already controlled the page; the next claim is an update.
    Update,
}

/// Static settings of one page load.
#[derive(Debug, Clone)]
pub struct PageConfig {
    pub page_url: Url,
    pub script_url: Url,
    pub default_language: Language,
    /// Running as an installed app (standalone display mode).
    pub standalone: bool,
}

/// Page-lifetime state of the planner page.
pub struct PageController {
    container: ServiceWorkerContainer,
    events: mpsc::UnboundedReceiver<ServiceWorkerEvent>,
    config: PageConfig,
    client: ClientId,
    scope: Option<Url>,
    controlled_at_load: bool,
    install_kind: Option<InstallKind>,
    installing: Option<GenerationId>,
    update_available: bool,
    reloaded: bool,
    ui: Arc<dyn PageUi>,
    storage: Arc<dyn LocalStorage>,
    session: Arc<dyn LocalStorage>,
    language: Language,
    install_prompt: Option<InstallPrompt>,
    classes: ClassBook,
    scanner: TextScanner,
    profile_save: Option<JoinHandle<()>>,
}

impl PageController {
    /// Load the page: open a client, restore preferences and show any pending notices.
    pub async fn open(
        container: ServiceWorkerContainer,
        config: PageConfig,
        ui: Arc<dyn PageUi>,
        storage: Arc<dyn LocalStorage>,
        session: Arc<dyn LocalStorage>,
    ) -> Result<Self> {
        let events = container.subscribe();
        let client = container.open_client(config.page_url.clone()).await;
        let language = Language::load(storage.as_ref(), config.default_language);
        let classes = ClassBook::load(Arc::clone(&storage))?;

        info!(
            client = %client.id,
            controlled = client.controller.is_some(),
            language = %language,
            classes = classes.len(),
            "Page loaded"
        );

        let mut page = Self {
            container,
            events,
            config,
            client: client.id,
            scope: None,
            controlled_at_load: client.controller.is_some(),
            install_kind: None,
            installing: None,
            update_available: false,
            reloaded: false,
            ui,
            storage,
            session,
            language,
            install_prompt: None,
            classes,
            scanner: TextScanner::new()?,
            profile_save: None,
        };
        if page.config.standalone {
            page.ui.set_install_button(false);
        }
        page.on_load()?;
        Ok(page)
    }

    pub fn client(&self) -> ClientId {
        self.client
    }

    pub fn install_kind(&self) -> Option<InstallKind> {
        self.install_kind
    }

    pub fn update_available(&self) -> bool {
        self.update_available
    }

    pub fn reloaded(&self) -> bool {
        self.reloaded
    }

    /// Consume the one-shot "what's new" flag. Returns whether the notice was shown.
    pub fn on_load(&mut self) -> Result<bool> {
        if self.session.get(WHATS_NEW_KEY).is_none() {
            return Ok(false);
        }
        self.session.remove(WHATS_NEW_KEY)?;
        self.ui.show_whats_new();
        Ok(true)
    }

    /// Register the worker script.
    ///
    /// The install kind is decided here, from whether the page is controlled
    /// right now. A rejected registration is logged and returned; the page keeps working.
    pub async fn register(&mut self) -> Result<()> {
        let controlled = self.container.controller(self.client).await.is_some();
        let kind = if controlled {
            InstallKind::Update
        } else {
            InstallKind::FirstInstall
        };
        self.install_kind = Some(kind);
        debug!(client = %self.client, ?kind, "Registering worker");

        let result = self.container.register(&self.config.script_url).await;
        self.pump_events();

        let registration = match result {
            Ok(registration) => registration,
            Err(e) => {
                warn!(script = %self.config.script_url, error = %e, "Worker registration failed");
                return Err(e.into());
            }
        };
        self.scope = Some(registration.scope.clone());
        if registration.waiting.is_some() {
            self.surface_update();
        }
        Ok(())
    }

    /// Handle every lifecycle event received so far.
    pub fn pump_events(&mut self) {
        while let Ok(event) = self.events.try_recv() {
            self.handle_event(event);
        }
    }

    /// React to one lifecycle event.
    pub fn handle_event(&mut self, event: ServiceWorkerEvent) {
        match event {
            ServiceWorkerEvent::UpdateFound { generation, .. } => {
                debug!(%generation, "Update found");
                self.installing = Some(generation);
            }
            ServiceWorkerEvent::StateChange {
                generation, state, ..
            } if self.installing == Some(generation) => match state {
                WorkerState::Installed => {
                    self.installing = None;
                    if self.effective_kind() == InstallKind::Update {
                        self.surface_update();
                    }
                }
                WorkerState::Redundant => self.installing = None,
                _ => {}
            },
            ServiceWorkerEvent::ControllerChange { client, generation } if client == self.client => {
                self.on_controller_change(generation);
            }
            ServiceWorkerEvent::Message { reply, .. } => {
                debug!(?reply, "Worker message");
            }
            _ => {}
        }
    }

    /// The registered kind, or what the page looked like at load if it never registered.
    fn effective_kind(&self) -> InstallKind {
        self.install_kind.unwrap_or(if self.controlled_at_load {
            InstallKind::Update
        } else {
            InstallKind::FirstInstall
        })
    }

    fn on_controller_change(&mut self, generation: GenerationId) {
        if self.effective_kind() == InstallKind::FirstInstall {
            info!(%generation, "First install claimed the page");
            self.install_kind = Some(InstallKind::Update);
            return;
        }
        if self.reloaded {
            debug!(%generation, "Controller changed again, already reloading");
            return;
        }
        self.reloaded = true;
        self.update_available = false;
        if let Err(e) = self.session.set(WHATS_NEW_KEY, "1") {
            warn!(error = %e, "Could not set what's-new flag");
        }
        info!(%generation, "New worker in control, reloading");
        self.ui.reload();
    }

    fn surface_update(&mut self) {
        if self.update_available {
            return;
        }
        self.update_available = true;
        info!("Update available");
        self.ui.show_update_available();
    }

    /// Manual update check. Any failure, or no registration at all, reads as "up to date".
    pub async fn check_for_updates(&mut self) {
        let Some(scope) = self.current_scope().await else {
            self.ui.show_up_to_date();
            return;
        };

        match self.container.update(&scope).await {
            Ok(UpdateOutcome::Unchanged) => debug!(scope = %scope, "Worker script unchanged"),
            Ok(UpdateOutcome::Installed { generation, .. }) => {
                debug!(scope = %scope, %generation, "Update check installed a worker")
            }
            Err(e) => warn!(scope = %scope, error = %e, "Update check failed"),
        }
        self.pump_events();

        let waiting = self
            .container
            .get_registration(&scope)
            .await
            .is_some_and(|registration| registration.waiting.is_some());
        if waiting {
            self.surface_update();
        } else {
            self.ui.show_up_to_date();
        }
    }

    /// The user accepted the update: release the waiting worker.
    pub async fn accept_update(&mut self) -> Result<()> {
        let scope = self
            .current_scope()
            .await
            .ok_or_else(|| PageError::NoRegistration(self.config.page_url.to_string()))?;
        self.container
            .post_message(&scope, MessageTarget::Waiting, PageMessage::SkipWaiting)
            .await?;
        self.pump_events();
        Ok(())
    }

    /// Ask the active worker for its version.
    pub async fn request_version(&mut self) -> Result<String> {
        let scope = self
            .current_scope()
            .await
            .ok_or_else(|| PageError::NoRegistration(self.config.page_url.to_string()))?;
        let reply = self
            .container
            .post_message(&scope, MessageTarget::Active, PageMessage::GetVersion)
            .await?;
        self.pump_events();
        match reply {
            Some(WorkerReply::Version { version }) => Ok(version),
            None => Err(PageError::UnexpectedReply("no reply".to_string())),
        }
    }

    async fn current_scope(&self) -> Option<Url> {
        if let Some(scope) = &self.scope {
            return Some(scope.clone());
        }
        self.container
            .get_registration(&self.config.page_url)
            .await
            .map(|registration| registration.scope)
    }

    // ==================== Install prompt ====================

    /// The platform offered an install prompt; keep it for the install button.
    pub fn on_install_prompt(&mut self, prompt: InstallPrompt) {
        if self.config.standalone {
            debug!("Already running standalone, ignoring install prompt");
            return;
        }
        self.install_prompt = Some(prompt);
        self.ui.set_install_button(true);
    }

    pub fn has_install_prompt(&self) -> bool {
        self.install_prompt.is_some()
    }

    /// Install button pressed. `show` presents the prompt and returns the user's choice.
    ///
    /// The prompt can be used once; the button is hidden afterwards.
    pub fn accept_install<F>(&mut self, show: F) -> Option<InstallChoice>
    where
        F: FnOnce(&InstallPrompt) -> InstallChoice,
    {
        let prompt = self.install_prompt.take()?;
        let choice = show(&prompt);
        info!(?choice, "Install prompt answered");
        self.ui.set_install_button(false);
        Some(choice)
    }

    /// The app was installed by any route; a held prompt is spent.
    pub fn on_app_installed(&mut self) {
        if self.install_prompt.take().is_some() {
            debug!("Dropping install prompt after install");
        }
        info!("App installed");
        self.ui.set_install_button(false);
    }

    /// The display mode changed. Entering standalone hides the install button;
    /// leaving it does not bring the button back.
    pub fn on_display_mode_change(&mut self, standalone: bool) {
        self.config.standalone = standalone;
        if standalone {
            self.ui.set_install_button(false);
        }
    }

    // ==================== Language ====================

    pub fn language(&self) -> Language {
        self.language
    }

    /// Switch between English and Spanish and remember the choice.
    pub fn toggle_language(&mut self) -> Result<Language> {
        self.language = self.language.toggled();
        self.language.save(self.storage.as_ref())?;
        Ok(self.language)
    }

    pub fn t<'a>(&self, key: &'a str) -> &'a str {
        translate(self.language, key)
    }

    // ==================== Planner data ====================

    pub fn classes(&self) -> &ClassBook {
        &self.classes
    }

    pub fn classes_mut(&mut self) -> &mut ClassBook {
        &mut self.classes
    }

    pub fn export_classes(&self) -> Result<String> {
        Ok(export_backup(self.classes.classes(), chrono::Utc::now())?)
    }

    /// Replace the class list with a backup. Returns the number of imported records.
    pub fn import_classes(&mut self, json: &str) -> Result<usize> {
        let records = import_backup(json)?;
        let count = records.len();
        self.classes.replace_all(records)?;
        Ok(count)
    }

    pub fn profile(&self) -> Result<Profile> {
        Ok(Profile::load(self.storage.as_ref())?)
    }

    /// Save the profile after a short quiet period; a newer edit replaces a pending one.
    pub fn edit_profile(&mut self, profile: Profile) {
        if let Some(pending) = self.profile_save.take() {
            pending.abort();
        }
        let storage = Arc::clone(&self.storage);
        self.profile_save = Some(tokio::spawn(async move {
            tokio::time::sleep(PROFILE_SAVE_DELAY).await;
            if let Err(e) = profile.save(storage.as_ref()) {
                warn!(error = %e, "Profile save failed");
            }
        }));
    }

    /// Save a pending profile edit now.
    pub async fn flush_profile(&mut self) {
        if let Some(pending) = self.profile_save.take() {
            if let Err(e) = pending.await {
                warn!(error = %e, "Profile save task failed");
            }
        }
    }

    /// Fill the profile from recognized card text.
    pub fn scan_student(&mut self, text: &str) -> StudentInfo {
        let info = self.scanner.student_info(text);
        self.edit_profile(Profile {
            student_id: info.student_id.clone(),
            student_email: info.student_email.clone(),
        });
        info
    }

    /// Parse recognized schedule text into class form fields.
    pub fn scan_class(&self, text: &str) -> ClassInfo {
        self.scanner.class_info(text)
    }

    /// Leave the page.
    pub async fn close(mut self) {
        self.flush_profile().await;
        self.container.close_client(self.client).await;
    }
}
