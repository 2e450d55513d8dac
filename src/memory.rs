use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use tokio::sync::Mutex;

use crate::directive::{Directive, DirectiveId, DirectivePatch, NewDirective};
use crate::error::{AuthError, GatewayError};
use crate::gateway::{AuthSession, AuthUser, Gateway, SessionChannel, SessionSubscription};

const MIN_PASSWORD_LEN: usize = 6;

/// In-process stand-in for the hosted backend
///
/// Shared by any number of [`MemoryGateway`] clients, the way several browser
/// sessions share one real backend.
pub struct MemoryBackend {
    pub tables: Mutex<HashMap<String, Vec<Directive>>>,
    pub users: Mutex<HashMap<String, String>>,
    pub next_id: AtomicU64,
    pub fail_reads: AtomicBool,
    pub fail_writes: AtomicBool,
    clock: Mutex<Option<DateTime<Utc>>>,
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self {
            tables: Mutex::new(HashMap::new()),
            users: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            fail_reads: AtomicBool::new(false),
            fail_writes: AtomicBool::new(false),
            clock: Mutex::new(None),
        }
    }
}

impl MemoryBackend {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Register an account directly, bypassing sign-up checks
    pub async fn add_user(&self, email: &str, password: &str) {
        self.users
            .lock()
            .await
            .insert(email.to_string(), password.to_string());
    }

    /// Put rows into a table as if they had been inserted earlier
    pub async fn seed(&self, table: &str, rows: Vec<Directive>) {
        self.tables
            .lock()
            .await
            .entry(table.to_string())
            .or_default()
            .extend(rows);
    }

    pub async fn rows(&self, table: &str) -> Vec<Directive> {
        self.tables
            .lock()
            .await
            .get(table)
            .cloned()
            .unwrap_or_default()
    }

    /// Pin the timestamp assigned to new rows
    pub async fn set_clock(&self, now: Option<DateTime<Utc>>) {
        *self.clock.lock().await = now;
    }

    pub fn set_fail_reads(&self, fail: bool) {
        self.fail_reads.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    async fn now(&self) -> DateTime<Utc> {
        let pinned = *self.clock.lock().await;
        pinned.unwrap_or_else(Utc::now)
    }

    fn check_writes(&self) -> Result<(), GatewayError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(GatewayError::Rejected {
                status: 503,
                message: "writes unavailable".to_string(),
            });
        }
        Ok(())
    }
}

/// Gateway client backed by a [`MemoryBackend`]
pub struct MemoryGateway {
    backend: Arc<MemoryBackend>,
    session: SessionChannel,
}

impl MemoryGateway {
    pub fn new(backend: Arc<MemoryBackend>) -> Self {
        Self {
            backend,
            session: SessionChannel::default(),
        }
    }

    pub fn backend(&self) -> &Arc<MemoryBackend> {
        &self.backend
    }

    /// End the session from the backend side, e.g. an expired token
    pub fn expire_session(&self) {
        self.session.set(None);
    }

    fn require_session(&self) -> Result<(), GatewayError> {
        match self.session.current() {
            Some(_) => Ok(()),
            None => Err(GatewayError::NoSession),
        }
    }
}

#[async_trait]
impl Gateway for MemoryGateway {
    async fn get_session(&self) -> Option<AuthSession> {
        self.session.current()
    }

    fn on_session_change(&self) -> SessionSubscription {
        self.session.subscribe()
    }

    async fn sign_up(&self, email: &str, password: &str) -> Result<(), AuthError> {
        if password.chars().count() < MIN_PASSWORD_LEN {
            return Err(AuthError::new(format!(
                "Password should be at least {} characters.",
                MIN_PASSWORD_LEN
            )));
        }
        let mut users = self.backend.users.lock().await;
        if users.contains_key(email) {
            return Err(AuthError::new("User already registered"));
        }
        users.insert(email.to_string(), password.to_string());
        // sign-up waits for e-mail confirmation, no session yet
        Ok(())
    }

    async fn sign_in(&self, email: &str, password: &str) -> Result<(), AuthError> {
        let valid = self
            .backend
            .users
            .lock()
            .await
            .get(email)
            .is_some_and(|stored| stored == password);
        if !valid {
            return Err(AuthError::new("Invalid login credentials"));
        }
        self.session.set(Some(AuthSession {
            access_token: issue_token(&self.backend),
            refresh_token: None,
            expires_at: None,
            user: AuthUser {
                id: format!("user-{}", email),
                email: Some(email.to_string()),
            },
        }));
        Ok(())
    }

    async fn sign_out(&self) {
        self.session.set(None);
    }

    async fn list_all(&self, table: &str) -> Result<Vec<Directive>, GatewayError> {
        self.require_session()?;
        if self.backend.fail_reads.load(Ordering::SeqCst) {
            return Err(GatewayError::Transport("connection reset".to_string()));
        }
        let mut rows = self.backend.rows(table).await;
        rows.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(rows)
    }

    async fn insert(&self, table: &str, record: &NewDirective) -> Result<(), GatewayError> {
        self.require_session()?;
        self.backend.check_writes()?;
        let id = self.backend.next_id.fetch_add(1, Ordering::SeqCst);
        let created_at = self.backend.now().await;
        let row = Directive {
            id: DirectiveId::new(id.to_string()),
            serial_no: Some(record.serial_no().to_string()),
            task: record.task().to_string(),
            dept: record.dept().to_string(),
            progress: Some(record.progress()),
            status: Some(record.status()),
            created_at,
        };
        self.backend
            .tables
            .lock()
            .await
            .entry(table.to_string())
            .or_default()
            .push(row);
        Ok(())
    }

    async fn update(
        &self,
        table: &str,
        id: &DirectiveId,
        patch: &DirectivePatch,
    ) -> Result<(), GatewayError> {
        self.require_session()?;
        self.backend.check_writes()?;
        let mut tables = self.backend.tables.lock().await;
        // an update matching no row succeeds with no effect, like a filtered PATCH
        if let Some(row) = tables
            .get_mut(table)
            .and_then(|rows| rows.iter_mut().find(|row| &row.id == id))
        {
            row.task = patch.task().to_string();
            row.dept = patch.dept().to_string();
            row.progress = Some(patch.progress());
            row.status = Some(patch.status());
        }
        Ok(())
    }

    async fn delete(&self, table: &str, id: &DirectiveId) -> Result<(), GatewayError> {
        self.require_session()?;
        self.backend.check_writes()?;
        if let Some(rows) = self.backend.tables.lock().await.get_mut(table) {
            rows.retain(|row| &row.id != id);
        }
        Ok(())
    }
}

fn issue_token(backend: &MemoryBackend) -> String {
    format!("token-{}", backend.next_id.fetch_add(1, Ordering::SeqCst))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::status::Status;

    #[tokio::test]
    async fn sign_up_enforces_password_length_and_uniqueness() {
        let gateway = MemoryGateway::new(MemoryBackend::new());
        assert!(gateway.sign_up("a@b.c", "12345").await.is_err());
        assert!(gateway.sign_up("a@b.c", "123456").await.is_ok());
        assert_eq!(
            gateway.sign_up("a@b.c", "123456").await,
            Err(AuthError::new("User already registered"))
        );
        assert!(gateway.get_session().await.is_none());
    }

    #[tokio::test]
    async fn table_calls_need_a_session() {
        let gateway = MemoryGateway::new(MemoryBackend::new());
        assert_eq!(
            gateway.list_all("directives").await,
            Err(GatewayError::NoSession)
        );
    }

    #[tokio::test]
    async fn clients_share_the_backend() {
        let backend = MemoryBackend::new();
        backend.add_user("a@b.c", "secret1").await;
        let first = MemoryGateway::new(backend.clone());
        let second = MemoryGateway::new(backend.clone());
        first.sign_in("a@b.c", "secret1").await.unwrap();
        second.sign_in("a@b.c", "secret1").await.unwrap();

        let new = NewDirective::new("2024-1".into(), "t".into(), "d".into(), 40);
        first.insert("directives", &new).await.unwrap();

        let rows = second.list_all("directives").await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].status, Some(Status::InProgress));
    }

    #[tokio::test]
    async fn failure_injection() {
        let backend = MemoryBackend::new();
        backend.add_user("a@b.c", "secret1").await;
        let gateway = MemoryGateway::new(backend.clone());
        gateway.sign_in("a@b.c", "secret1").await.unwrap();

        backend.set_fail_writes(true);
        let new = NewDirective::new("2024-1".into(), "t".into(), "d".into(), 40);
        assert!(gateway.insert("directives", &new).await.is_err());
        backend.set_fail_reads(true);
        assert!(gateway.list_all("directives").await.is_err());
    }
}
