use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::watch;

use crate::directive::{Directive, DirectiveId, DirectivePatch, NewDirective};
use crate::error::{AuthError, GatewayError};

/// The signed-in user
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AuthUser {
    pub id: String,
    #[serde(default)]
    pub email: Option<String>,
}

/// An authenticated backend session
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthSession {
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub expires_at: Option<DateTime<Utc>>,
    pub user: AuthUser,
}

/// Handle on the stream of session changes
///
/// Dropping the handle (or calling [`SessionSubscription::unsubscribe`]) ends
/// the subscription.
#[derive(Debug)]
pub struct SessionSubscription {
    rx: watch::Receiver<Option<AuthSession>>,
}

impl SessionSubscription {
    pub fn new(rx: watch::Receiver<Option<AuthSession>>) -> Self {
        Self { rx }
    }

    /// The session as of the last observed change
    pub fn current(&self) -> Option<AuthSession> {
        self.rx.borrow().clone()
    }

    /// Take a pending change, if any, without waiting
    ///
    /// Returns `Some(session)` once per change; `None` when nothing changed
    /// since the last call or the gateway is gone.
    pub fn take_change(&mut self) -> Option<Option<AuthSession>> {
        match self.rx.has_changed() {
            Ok(true) => Some(self.rx.borrow_and_update().clone()),
            _ => None,
        }
    }

    /// Wait for the next change; `None` once the gateway has been dropped
    pub async fn changed(&mut self) -> Option<Option<AuthSession>> {
        self.rx.changed().await.ok()?;
        Some(self.rx.borrow_and_update().clone())
    }

    pub fn unsubscribe(self) {}
}

/// Broadcasts session changes to subscribers
#[derive(Debug)]
pub struct SessionChannel {
    tx: watch::Sender<Option<AuthSession>>,
}

impl Default for SessionChannel {
    fn default() -> Self {
        let (tx, _rx) = watch::channel(None);
        Self { tx }
    }
}

impl SessionChannel {
    pub fn current(&self) -> Option<AuthSession> {
        self.tx.borrow().clone()
    }

    pub fn set(&self, session: Option<AuthSession>) {
        self.tx.send_replace(session);
    }

    pub fn subscribe(&self) -> SessionSubscription {
        SessionSubscription::new(self.tx.subscribe())
    }
}

/// Contract of the hosted backend: auth plus single-table operations
///
/// Table operations are single-record and all-or-nothing; there is no
/// partial failure to reconcile.
#[async_trait]
pub trait Gateway: Send + Sync + 'static {
    async fn get_session(&self) -> Option<AuthSession>;

    fn on_session_change(&self) -> SessionSubscription;

    async fn sign_up(&self, email: &str, password: &str) -> Result<(), AuthError>;

    async fn sign_in(&self, email: &str, password: &str) -> Result<(), AuthError>;

    async fn sign_out(&self);

    /// Every row of `table`, ordered by created_at ascending
    async fn list_all(&self, table: &str) -> Result<Vec<Directive>, GatewayError>;

    async fn insert(&self, table: &str, record: &NewDirective) -> Result<(), GatewayError>;

    async fn update(
        &self,
        table: &str,
        id: &DirectiveId,
        patch: &DirectivePatch,
    ) -> Result<(), GatewayError>;

    async fn delete(&self, table: &str, id: &DirectiveId) -> Result<(), GatewayError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session(token: &str) -> AuthSession {
        AuthSession {
            access_token: token.to_string(),
            refresh_token: None,
            expires_at: None,
            user: AuthUser {
                id: "u1".to_string(),
                email: Some("a@b.c".to_string()),
            },
        }
    }

    #[test]
    fn subscription_sees_each_change_once() {
        let channel = SessionChannel::default();
        let mut sub = channel.subscribe();
        assert_eq!(sub.take_change(), None);

        channel.set(Some(session("t1")));
        assert_eq!(sub.take_change(), Some(Some(session("t1"))));
        assert_eq!(sub.take_change(), None);

        channel.set(None);
        assert_eq!(sub.take_change(), Some(None));
        assert_eq!(sub.current(), None);
    }

    #[tokio::test]
    async fn changed_ends_when_channel_is_dropped() {
        let channel = SessionChannel::default();
        let mut sub = channel.subscribe();
        channel.set(Some(session("t1")));
        assert_eq!(sub.changed().await, Some(Some(session("t1"))));
        drop(channel);
        assert_eq!(sub.changed().await, None);
    }
}
