use async_trait::async_trait;
use chrono::{Duration, Utc};
use reqwest::StatusCode;
use serde::Deserialize;
use serde_json::json;

use crate::config::Config;
use crate::directive::{Directive, DirectiveId, DirectivePatch, NewDirective};
use crate::error::{AuthError, GatewayError};
use crate::gateway::{AuthSession, AuthUser, Gateway, SessionChannel, SessionSubscription};

/// Tokens this close to expiry are refreshed before use
const REFRESH_MARGIN_SECS: i64 = 30;

/// Token grant returned by the auth service
#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    refresh_token: Option<String>,
    #[serde(default)]
    expires_in: Option<i64>,
    user: AuthUser,
}

impl TokenResponse {
    fn into_session(self) -> AuthSession {
        AuthSession {
            access_token: self.access_token,
            refresh_token: self.refresh_token,
            expires_at: self
                .expires_in
                .map(|secs| Utc::now() + Duration::seconds(secs)),
            user: self.user,
        }
    }
}

/// Gateway speaking to a Supabase project over HTTP
///
/// Auth goes through GoTrue (`/auth/v1`), table access through PostgREST
/// (`/rest/v1`). Every request carries the project's public key; table calls
/// are authorized with the session's access token.
pub struct SupabaseGateway {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    session: SessionChannel,
}

impl SupabaseGateway {
    pub fn new(config: &Config) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: config.supabase_url.trim_end_matches('/').to_string(),
            api_key: config.supabase_key.clone(),
            session: SessionChannel::default(),
        }
    }

    fn auth_url(&self, path: &str) -> String {
        format!("{}/auth/v1/{}", self.base_url, path)
    }

    fn rest_url(&self, table: &str) -> String {
        format!("{}/rest/v1/{}", self.base_url, table)
    }

    async fn request_token(&self, grant: &str, body: serde_json::Value) -> Result<AuthSession, AuthError> {
        let response = self
            .client
            .post(self.auth_url("token"))
            .query(&[("grant_type", grant)])
            .header("apikey", &self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| AuthError::new(e.to_string()))?;

        let status = response.status();
        let text = response.text().await.unwrap_or_default();
        if !status.is_success() {
            return Err(AuthError::new(error_message(&text, status)));
        }
        serde_json::from_str::<TokenResponse>(&text)
            .map(TokenResponse::into_session)
            .map_err(|e| AuthError::new(format!("malformed token response: {}", e)))
    }

    /// Access token for a table call, refreshed first when about to expire
    async fn bearer(&self) -> Result<String, GatewayError> {
        let Some(session) = self.session.current() else {
            return Ok(self.api_key.clone());
        };
        let expiring = session
            .expires_at
            .is_some_and(|at| at <= Utc::now() + Duration::seconds(REFRESH_MARGIN_SECS));
        if !expiring {
            return Ok(session.access_token);
        }
        let Some(refresh_token) = session.refresh_token else {
            return Ok(session.access_token);
        };

        match self
            .request_token("refresh_token", json!({ "refresh_token": refresh_token }))
            .await
        {
            Ok(fresh) => {
                log::debug!("refreshed access token for {}", fresh.user.id);
                let token = fresh.access_token.clone();
                self.session.set(Some(fresh));
                Ok(token)
            }
            Err(e) => {
                log::warn!("token refresh failed, ending session: {}", e);
                self.session.set(None);
                Err(GatewayError::NoSession)
            }
        }
    }

    async fn send(&self, request: reqwest::RequestBuilder) -> Result<reqwest::Response, GatewayError> {
        let token = self.bearer().await?;
        let response = request
            .header("apikey", &self.api_key)
            .bearer_auth(token)
            .send()
            .await
            .map_err(|e| GatewayError::Transport(e.to_string()))?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let text = response.text().await.unwrap_or_default();
        Err(GatewayError::Rejected {
            status: status.as_u16(),
            message: error_message(&text, status),
        })
    }
}

#[async_trait]
impl Gateway for SupabaseGateway {
    async fn get_session(&self) -> Option<AuthSession> {
        self.session.current()
    }

    fn on_session_change(&self) -> SessionSubscription {
        self.session.subscribe()
    }

    async fn sign_up(&self, email: &str, password: &str) -> Result<(), AuthError> {
        let response = self
            .client
            .post(self.auth_url("signup"))
            .header("apikey", &self.api_key)
            .json(&json!({ "email": email, "password": password }))
            .send()
            .await
            .map_err(|e| AuthError::new(e.to_string()))?;

        let status = response.status();
        let text = response.text().await.unwrap_or_default();
        if !status.is_success() {
            return Err(AuthError::new(error_message(&text, status)));
        }
        // with e-mail confirmation off the project signs the account straight in
        if let Ok(token) = serde_json::from_str::<TokenResponse>(&text) {
            self.session.set(Some(token.into_session()));
        }
        Ok(())
    }

    async fn sign_in(&self, email: &str, password: &str) -> Result<(), AuthError> {
        let session = self
            .request_token("password", json!({ "email": email, "password": password }))
            .await?;
        self.session.set(Some(session));
        Ok(())
    }

    async fn sign_out(&self) {
        if let Some(session) = self.session.current() {
            let result = self
                .client
                .post(self.auth_url("logout"))
                .header("apikey", &self.api_key)
                .bearer_auth(&session.access_token)
                .send()
                .await;
            if let Err(e) = result {
                log::warn!("logout request failed: {}", e);
            }
        }
        self.session.set(None);
    }

    async fn list_all(&self, table: &str) -> Result<Vec<Directive>, GatewayError> {
        let request = self
            .client
            .get(self.rest_url(table))
            .query(&[("select", "*"), ("order", "created_at.asc")]);
        self.send(request)
            .await?
            .json::<Vec<Directive>>()
            .await
            .map_err(|e| GatewayError::Decode(e.to_string()))
    }

    async fn insert(&self, table: &str, record: &NewDirective) -> Result<(), GatewayError> {
        let request = self
            .client
            .post(self.rest_url(table))
            .header("Prefer", "return=minimal")
            .json(&[record]);
        self.send(request).await?;
        Ok(())
    }

    async fn update(
        &self,
        table: &str,
        id: &DirectiveId,
        patch: &DirectivePatch,
    ) -> Result<(), GatewayError> {
        let request = self
            .client
            .patch(self.rest_url(table))
            .query(&[("id", format!("eq.{}", id))])
            .header("Prefer", "return=minimal")
            .json(patch);
        self.send(request).await?;
        Ok(())
    }

    async fn delete(&self, table: &str, id: &DirectiveId) -> Result<(), GatewayError> {
        let request = self
            .client
            .delete(self.rest_url(table))
            .query(&[("id", format!("eq.{}", id))]);
        self.send(request).await?;
        Ok(())
    }
}

/// Human-readable message from an error body of either service
fn error_message(body: &str, status: StatusCode) -> String {
    let parsed: Option<serde_json::Value> = serde_json::from_str(body).ok();
    parsed
        .as_ref()
        .and_then(|value| {
            ["error_description", "msg", "message", "error"]
                .iter()
                .find_map(|key| value.get(*key).and_then(|v| v.as_str()))
        })
        .map(str::to_string)
        .unwrap_or_else(|| {
            if body.trim().is_empty() {
                status
                    .canonical_reason()
                    .unwrap_or("request failed")
                    .to_string()
            } else {
                body.trim().to_string()
            }
        })
}
