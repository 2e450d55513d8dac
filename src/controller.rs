use chrono::{DateTime, Local};
use serde::Serialize;
use std::error::Error;

use crate::DIRECTIVES_TABLE;
use crate::aggregate::{self, DepartmentProgress, StatusCounts};
use crate::directive::{Directive, DirectiveId, DirectivePatch, NewDirective};
use crate::downloader::{self, ExportRow};
use crate::error::DashboardError;
use crate::gateway::{AuthUser, Gateway, SessionSubscription};
use crate::serial::next_serial;
use crate::status::{Status, classify};
use crate::store::DirectiveStore;

/// Where the dashboard is in its session lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Unauthenticated,
    Loading,
    Ready,
}

/// Task, department and progress as entered in the create or edit form
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DirectiveForm {
    pub task: String,
    pub dept: String,
    progress: i64,
}

impl DirectiveForm {
    pub fn new(task: impl Into<String>, dept: impl Into<String>, progress: i64) -> Self {
        let mut form = Self {
            task: task.into(),
            dept: dept.into(),
            progress: 0,
        };
        form.set_progress(progress);
        form
    }

    pub fn from_directive(directive: &Directive) -> Self {
        Self::new(
            directive.task.clone(),
            directive.dept.clone(),
            directive.progress_or_zero(),
        )
    }

    pub fn progress(&self) -> i64 {
        self.progress
    }

    /// Set progress, held to the slider's 0..=100 range
    pub fn set_progress(&mut self, progress: i64) {
        self.progress = progress.clamp(0, 100);
    }

    /// Set progress from raw input; anything unparseable becomes 0
    pub fn set_progress_input(&mut self, input: &str) {
        self.set_progress(input.trim().parse().unwrap_or(0));
    }

    /// Status the current progress would be saved with
    pub fn status(&self) -> Status {
        classify(self.progress)
    }
}

/// What the ready dashboard is doing
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Mode {
    Browsing,
    Creating(DirectiveForm),
    Editing { id: DirectiveId, form: DirectiveForm },
}

/// Dashboard controller for one user session
///
/// Reads are projections of the in-memory store. Writes go to the gateway
/// and, when they succeed, are followed by a full re-fetch.
pub struct Dashboard<G: Gateway> {
    gateway: G,
    subscription: SessionSubscription,
    user: Option<AuthUser>,
    phase: Phase,
    mode: Mode,
    store: DirectiveStore,
    table: String,
}

impl<G: Gateway> Dashboard<G> {
    pub fn new(gateway: G) -> Self {
        let subscription = gateway.on_session_change();
        Self {
            gateway,
            subscription,
            user: None,
            phase: Phase::Unauthenticated,
            mode: Mode::Browsing,
            store: DirectiveStore::new(),
            table: DIRECTIVES_TABLE.to_string(),
        }
    }

    pub fn gateway(&self) -> &G {
        &self.gateway
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn mode(&self) -> &Mode {
        &self.mode
    }

    pub fn user(&self) -> Option<&AuthUser> {
        self.user.as_ref()
    }

    pub fn is_authenticated(&self) -> bool {
        self.user.is_some()
    }

    pub fn records(&self) -> &[Directive] {
        self.store.records()
    }

    pub fn status_counts(&self) -> StatusCounts {
        aggregate::status_counts(self.store.records())
    }

    pub fn department_progress(&self) -> Vec<DepartmentProgress> {
        aggregate::department_progress(self.store.records())
    }

    pub fn export_rows(&self) -> Vec<ExportRow> {
        downloader::export_rows(self.store.records())
    }

    pub fn export_xlsx(&self) -> Result<Vec<u8>, Box<dyn Error + Send + Sync>> {
        downloader::to_xlsx(&self.export_rows())
    }

    /// Pick up an existing backend session, loading the records if there is one
    pub async fn bootstrap(&mut self) {
        // the current state is read directly, so a queued change is stale
        self.subscription.take_change();
        match self.gateway.get_session().await {
            Some(session) => self.enter(session.user).await,
            None => self.reset(),
        }
    }

    /// Apply a session change reported by the gateway since the last call
    pub async fn sync_session(&mut self) {
        let Some(change) = self.subscription.take_change() else {
            return;
        };
        match change {
            None if self.is_authenticated() => {
                log::info!("session ended by backend, discarding dashboard state");
                self.reset();
            }
            None => {}
            Some(session) if !self.is_authenticated() => self.enter(session.user).await,
            Some(session) => self.user = Some(session.user),
        }
    }

    pub async fn sign_up(&mut self, email: &str, password: &str) -> Result<(), DashboardError> {
        if let Err(e) = self.gateway.sign_up(email, password).await {
            log::info!("sign-up rejected for {}: {}", email, e);
            return Err(e.into());
        }
        log::info!("signed up {}", email);
        // some backends sign the new account straight in
        self.sync_session().await;
        Ok(())
    }

    pub async fn sign_in(&mut self, email: &str, password: &str) -> Result<(), DashboardError> {
        if let Err(e) = self.gateway.sign_in(email, password).await {
            log::info!("sign-in rejected for {}: {}", email, e);
            return Err(e.into());
        }
        self.subscription.take_change();
        let session = self
            .gateway
            .get_session()
            .await
            .ok_or(DashboardError::NotAuthenticated)?;
        log::info!("signed in {}", email);
        self.enter(session.user).await;
        Ok(())
    }

    /// Sign out and discard everything held in memory
    pub async fn sign_out(&mut self) {
        self.gateway.sign_out().await;
        self.subscription.take_change();
        if let Some(user) = &self.user {
            log::info!("signed out {}", user.email.as_deref().unwrap_or(&user.id));
        }
        self.reset();
    }

    /// Re-read the whole table into the store
    ///
    /// On failure the store keeps whatever it held before.
    pub async fn refresh(&mut self) -> Result<(), DashboardError> {
        if !self.is_authenticated() {
            return Err(DashboardError::NotAuthenticated);
        }
        match self.gateway.list_all(&self.table).await {
            Ok(records) => {
                log::debug!("loaded {} directives", records.len());
                self.store.replace_all(records);
                Ok(())
            }
            Err(e) => {
                log::warn!("failed to load directives: {}", e);
                Err(DashboardError::Read(e))
            }
        }
    }

    pub fn open_create(&mut self) -> Result<(), DashboardError> {
        self.require_ready()?;
        if let Mode::Editing { id, .. } = &self.mode {
            log::debug!("discarding unsaved edit of {}", id);
        }
        self.mode = Mode::Creating(DirectiveForm::default());
        Ok(())
    }

    pub fn update_create_form(&mut self, form: DirectiveForm) -> Result<(), DashboardError> {
        match &mut self.mode {
            Mode::Creating(current) => {
                *current = form;
                Ok(())
            }
            _ => Err(DashboardError::Invalid("no create form is open")),
        }
    }

    pub fn cancel_create(&mut self) {
        if matches!(self.mode, Mode::Creating(_)) {
            self.mode = Mode::Browsing;
        }
    }

    /// Insert the open create form, numbering it for the current year
    pub async fn submit_create(&mut self) -> Result<(), DashboardError> {
        self.submit_create_at(Local::now()).await
    }

    pub async fn submit_create_at(&mut self, now: DateTime<Local>) -> Result<(), DashboardError> {
        self.require_ready()?;
        let form = match &self.mode {
            Mode::Creating(form) => form.clone(),
            _ => return Err(DashboardError::Invalid("no create form is open")),
        };
        let task = form.task.trim();
        let dept = form.dept.trim();
        if task.is_empty() {
            return Err(DashboardError::MissingField("task"));
        }
        if dept.is_empty() {
            return Err(DashboardError::MissingField("department"));
        }

        // count against the freshest rows available; the cached set is the fallback
        let _ = self.refresh().await;
        let serial_no = next_serial(self.store.records(), now);
        let record = NewDirective::new(
            serial_no,
            task.to_string(),
            dept.to_string(),
            form.progress(),
        );

        if let Err(e) = self.gateway.insert(&self.table, &record).await {
            log::warn!("insert of {} failed: {}", record.serial_no(), e);
            return Err(DashboardError::Write(e));
        }
        log::info!(
            "created directive {} ({}%, {})",
            record.serial_no(),
            record.progress(),
            record.status().label()
        );
        self.mode = Mode::Browsing;
        self.reload().await;
        Ok(())
    }

    /// Start editing one row; an unsaved edit of another row is discarded
    pub fn begin_edit(&mut self, id: &DirectiveId) -> Result<(), DashboardError> {
        self.require_ready()?;
        let record = self
            .store
            .get(id)
            .ok_or_else(|| DashboardError::UnknownDirective(id.to_string()))?;
        let form = DirectiveForm::from_directive(record);
        if let Mode::Editing { id: previous, .. } = &self.mode {
            if previous != id {
                log::debug!("discarding unsaved edit of {}", previous);
            }
        }
        self.mode = Mode::Editing {
            id: id.clone(),
            form,
        };
        Ok(())
    }

    pub fn update_edit_form(&mut self, form: DirectiveForm) -> Result<(), DashboardError> {
        match &mut self.mode {
            Mode::Editing { form: current, .. } => {
                *current = form;
                Ok(())
            }
            _ => Err(DashboardError::Invalid("no row is being edited")),
        }
    }

    pub fn cancel_edit(&mut self) {
        if matches!(self.mode, Mode::Editing { .. }) {
            self.mode = Mode::Browsing;
        }
    }

    /// Write the edited row back, with its status re-derived from progress
    pub async fn save_edit(&mut self) -> Result<(), DashboardError> {
        self.require_ready()?;
        let (id, form) = match &self.mode {
            Mode::Editing { id, form } => (id.clone(), form.clone()),
            _ => return Err(DashboardError::Invalid("no row is being edited")),
        };
        let patch = DirectivePatch::new(form.task, form.dept, form.progress);

        if let Err(e) = self.gateway.update(&self.table, &id, &patch).await {
            log::warn!("update of {} failed: {}", id, e);
            return Err(DashboardError::Write(e));
        }
        log::info!(
            "updated directive {} ({}%, {})",
            id,
            patch.progress(),
            patch.status().label()
        );
        self.mode = Mode::Browsing;
        self.reload().await;
        Ok(())
    }

    pub async fn delete(&mut self, id: &DirectiveId) -> Result<(), DashboardError> {
        self.require_ready()?;
        if let Err(e) = self.gateway.delete(&self.table, id).await {
            log::warn!("delete of {} failed: {}", id, e);
            return Err(DashboardError::Write(e));
        }
        log::info!("deleted directive {}", id);
        if matches!(&self.mode, Mode::Editing { id: editing, .. } if editing == id) {
            self.mode = Mode::Browsing;
        }
        self.reload().await;
        Ok(())
    }

    async fn enter(&mut self, user: AuthUser) {
        self.user = Some(user);
        self.mode = Mode::Browsing;
        self.reload().await;
    }

    async fn reload(&mut self) {
        self.phase = Phase::Loading;
        // read failures leave the previous rows in place
        let _ = self.refresh().await;
        self.phase = Phase::Ready;
    }

    fn reset(&mut self) {
        self.user = None;
        self.phase = Phase::Unauthenticated;
        self.mode = Mode::Browsing;
        self.store.clear();
    }

    fn require_ready(&self) -> Result<(), DashboardError> {
        match self.phase {
            Phase::Ready => Ok(()),
            _ => Err(DashboardError::NotAuthenticated),
        }
    }
}
