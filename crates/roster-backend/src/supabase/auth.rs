//! GoTrue identity provider.

use super::http::{error_from_response, error_message, summarize_response_body};
use super::AccessTokenSource;
use crate::types::{CredentialEvent, Identity, RedirectParams, Session};
use crate::{BackendError, BackendResult, IdentityProvider};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use parking_lot::RwLock;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

/// Lifetime assumed when a redirect carries no expiry.
const DEFAULT_EXPIRES_IN_SECS: i64 = 3600;
const EVENT_CHANNEL_CAPACITY: usize = 16;

#[derive(Debug, Serialize)]
struct PasswordRequest<'a> {
    email: &'a str,
    password: &'a str,
}

#[derive(Debug, Serialize)]
struct RefreshRequest<'a> {
    refresh_token: &'a str,
}

/// GoTrue token response.
#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    refresh_token: String,
    expires_in: i64,
    user: Identity,
}

impl TokenResponse {
    fn into_session(self) -> Session {
        Session {
            access_token: self.access_token,
            refresh_token: Some(self.refresh_token),
            expires_at: Utc::now() + Duration::seconds(self.expires_in),
            identity: self.user,
        }
    }
}

/// Signup returns a full session when email confirmation is disabled and a
/// bare user otherwise.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum SignupResponse {
    Session(TokenResponse),
    User(Identity),
}

/// Supabase Auth (GoTrue) client holding the current session.
///
/// The session is kept in memory and, when a session file is configured,
/// mirrored to disk so a new process starts signed in.
pub struct SupabaseAuth {
    http_client: Client,
    api_url: String,
    publishable_key: String,
    session: RwLock<Option<Session>>,
    session_file: Option<PathBuf>,
    events: broadcast::Sender<CredentialEvent>,
}

impl SupabaseAuth {
    /// Create a client with an in-memory session only.
    pub fn new(api_url: impl Into<String>, publishable_key: impl Into<String>) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            http_client: Client::new(),
            api_url: api_url.into().trim_end_matches('/').to_string(),
            publishable_key: publishable_key.into(),
            session: RwLock::new(None),
            session_file: None,
            events,
        }
    }

    /// Persist the session to `path`, loading any session already stored there.
    pub fn with_session_file(mut self, path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        match load_session(&path) {
            Ok(Some(session)) => {
                debug!(user_id = %session.identity.id, "Loaded stored session");
                *self.session.write() = Some(session);
            }
            Ok(None) => {}
            Err(e) => warn!(path = %path.display(), error = %e, "Ignoring unreadable session file"),
        }
        self.session_file = Some(path);
        self
    }

    fn auth_url(&self, path: &str) -> String {
        format!("{}/auth/v1/{}", self.api_url, path)
    }

    /// Cached session without touching the network.
    pub fn cached_session(&self) -> Option<Session> {
        self.session.read().clone()
    }

    fn store_session(&self, session: Option<Session>) {
        if let Some(path) = &self.session_file {
            let result = match &session {
                Some(session) => save_session(path, session),
                None => remove_session(path),
            };
            if let Err(e) = result {
                warn!(path = %path.display(), error = %e, "Failed to persist session");
            }
        }
        *self.session.write() = session;
    }

    fn emit(&self, event: CredentialEvent) {
        // No receivers is fine.
        let _ = self.events.send(event);
    }

    async fn password_grant(&self, email: &str, password: &str) -> BackendResult<Session> {
        let url = self.auth_url("token?grant_type=password");
        debug!(url = %url, "Attempting email/password login");

        let response = self
            .http_client
            .post(&url)
            .header("apikey", &self.publishable_key)
            .json(&PasswordRequest { email, password })
            .send()
            .await?;

        let status = response.status();
        if status == StatusCode::BAD_REQUEST || status == StatusCode::UNAUTHORIZED {
            let body = response.text().await.unwrap_or_default();
            return Err(BackendError::InvalidCredentials(error_message(&body)));
        }
        if !status.is_success() {
            return Err(error_from_response(response, "Login").await);
        }

        let data: TokenResponse = response.json().await?;
        Ok(data.into_session())
    }

    async fn refresh(&self, refresh_token: &str) -> BackendResult<Session> {
        let url = self.auth_url("token?grant_type=refresh_token");
        debug!(url = %url, "Refreshing token");

        let response = self
            .http_client
            .post(&url)
            .header("apikey", &self.publishable_key)
            .json(&RefreshRequest { refresh_token })
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(error_from_response(response, "Token refresh").await);
        }

        let data: TokenResponse = response.json().await?;
        Ok(data.into_session())
    }

    async fn fetch_user(&self, access_token: &str) -> BackendResult<Identity> {
        let response = self
            .http_client
            .get(self.auth_url("user"))
            .header("apikey", &self.publishable_key)
            .header("Authorization", format!("Bearer {}", access_token))
            .send()
            .await?;

        let status = response.status();
        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            let body = response.text().await.unwrap_or_default();
            debug!(status = %status, body_summary = %summarize_response_body(&body), "Token rejected");
            return Err(BackendError::NoSession);
        }
        if !status.is_success() {
            return Err(error_from_response(response, "User lookup").await);
        }

        Ok(response.json().await?)
    }
}

#[async_trait]
impl IdentityProvider for SupabaseAuth {
    async fn sign_up(&self, email: &str, password: &str) -> BackendResult<Identity> {
        let response = self
            .http_client
            .post(self.auth_url("signup"))
            .header("apikey", &self.publishable_key)
            .json(&PasswordRequest { email, password })
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(error_from_response(response, "Signup").await);
        }

        match response.json::<SignupResponse>().await? {
            SignupResponse::Session(data) => {
                let session = data.into_session();
                let identity = session.identity.clone();
                self.store_session(Some(session));
                info!(user_id = %identity.id, "Signed up and signed in");
                self.emit(CredentialEvent::SignedIn {
                    user_id: identity.id.clone(),
                });
                Ok(identity)
            }
            SignupResponse::User(identity) => {
                info!(user_id = %identity.id, "Signed up, confirmation pending");
                Ok(identity)
            }
        }
    }

    async fn sign_in(&self, email: &str, password: &str) -> BackendResult<Identity> {
        let session = self.password_grant(email, password).await?;
        let identity = session.identity.clone();
        self.store_session(Some(session));
        info!(user_id = %identity.id, "Login successful");
        self.emit(CredentialEvent::SignedIn {
            user_id: identity.id.clone(),
        });
        Ok(identity)
    }

    async fn sign_out(&self) -> BackendResult<()> {
        let previous = self.session.read().clone();
        self.store_session(None);
        self.emit(CredentialEvent::SignedOut);

        let Some(session) = previous else {
            return Ok(());
        };

        let response = self
            .http_client
            .post(self.auth_url("logout"))
            .header("apikey", &self.publishable_key)
            .header("Authorization", format!("Bearer {}", session.access_token))
            .send()
            .await?;

        let status = response.status();
        // An already-revoked token is as good as a successful logout.
        if status.is_success() || status == StatusCode::UNAUTHORIZED || status == StatusCode::NOT_FOUND {
            info!("Logged out");
            return Ok(());
        }
        Err(error_from_response(response, "Logout").await)
    }

    async fn current_identity(&self) -> BackendResult<Option<Identity>> {
        let token = match self.session.read().as_ref() {
            Some(session) => session.access_token.clone(),
            None => return Err(BackendError::NoSession),
        };
        self.fetch_user(&token).await.map(Some)
    }

    async fn current_session(&self) -> BackendResult<Option<Session>> {
        let Some(session) = self.cached_session() else {
            return Ok(None);
        };
        if session.is_valid() {
            return Ok(Some(session));
        }

        let Some(refresh_token) = session.refresh_token.clone() else {
            return Ok(Some(session));
        };

        match self.refresh(&refresh_token).await {
            Ok(refreshed) => {
                let user_id = refreshed.identity.id.clone();
                self.store_session(Some(refreshed.clone()));
                info!(user_id = %user_id, "Token refreshed successfully");
                self.emit(CredentialEvent::TokenRefreshed { user_id });
                Ok(Some(refreshed))
            }
            Err(e) if e.is_transient() => Err(e),
            Err(e) => {
                warn!(error = %e, "Refresh rejected, clearing session");
                self.store_session(None);
                self.emit(CredentialEvent::SignedOut);
                Ok(None)
            }
        }
    }

    async fn exchange_redirect(&self, params: &RedirectParams) -> BackendResult<Session> {
        if let Some(message) = params.error_message() {
            return Err(BackendError::Rejected {
                status: 400,
                message,
            });
        }
        let access_token = params
            .access_token
            .clone()
            .ok_or_else(|| BackendError::MalformedCredential("missing access_token".to_string()))?;

        let identity = match self.fetch_user(&access_token).await {
            Ok(identity) => identity,
            Err(BackendError::NoSession) => {
                return Err(BackendError::MalformedCredential(
                    "redirect token rejected".to_string(),
                ))
            }
            Err(e) => return Err(e),
        };

        let expires_at = params
            .expires_at
            .and_then(|secs| DateTime::<Utc>::from_timestamp(secs, 0))
            .unwrap_or_else(|| {
                Utc::now()
                    + Duration::seconds(params.expires_in.unwrap_or(DEFAULT_EXPIRES_IN_SECS))
            });

        let session = Session {
            access_token,
            refresh_token: params.refresh_token.clone(),
            expires_at,
            identity,
        };
        self.store_session(Some(session.clone()));
        info!(user_id = %session.identity.id, "Federated login completed");
        self.emit(CredentialEvent::SignedIn {
            user_id: session.identity.id.clone(),
        });
        Ok(session)
    }

    fn subscribe(&self) -> broadcast::Receiver<CredentialEvent> {
        self.events.subscribe()
    }
}

impl AccessTokenSource for SupabaseAuth {
    fn access_token(&self) -> Option<String> {
        self.session
            .read()
            .as_ref()
            .filter(|s| s.is_valid())
            .map(|s| s.access_token.clone())
    }
}

fn load_session(path: &Path) -> std::io::Result<Option<Session>> {
    if !path.exists() {
        return Ok(None);
    }
    let content = std::fs::read_to_string(path)?;
    serde_json::from_str(&content)
        .map(Some)
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))
}

fn save_session(path: &Path, session: &Session) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let content = serde_json::to_string_pretty(session)
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
    std::fs::write(path, content)
}

fn remove_session(path: &Path) -> std::io::Result<()> {
    match std::fs::remove_file(path) {
        Err(e) if e.kind() != std::io::ErrorKind::NotFound => Err(e),
        _ => Ok(()),
    }
}
