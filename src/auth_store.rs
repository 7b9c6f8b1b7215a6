//! Session store over the hosted auth service.
//!
//! Holds the init-once guard, a short-lived cache of validated access
//! tokens, and a broadcast channel of auth-state changes. The `AuthUser`
//! extractor guards dashboard routes.

use axum::{
    async_trait,
    extract::FromRequestParts,
    http::{header::AUTHORIZATION, request::Parts},
};
use moka::future::Cache;
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, OnceCell};

pub use crate::auth_client::AuthUser;
use crate::auth_client::{AuthClient, Session};
use crate::errors::AppError;
use crate::handlers::AppState;

const EVENT_CAPACITY: usize = 64;

/// Auth-state change notifications.
#[derive(Debug, Clone, PartialEq)]
pub enum AuthEvent {
    SignedIn(AuthUser),
    TokenRefreshed(AuthUser),
    SignedOut,
}

/// Outcome of the one-time initialization.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AuthStatus {
    pub initialized: bool,
    pub error: Option<String>,
}

#[derive(Clone)]
pub struct AuthStore {
    client: AuthClient,
    status: Arc<OnceCell<AuthStatus>>,
    /// SHA-256(access token) -> user; raw tokens are never used as keys.
    sessions: Cache<String, AuthUser>,
    events: broadcast::Sender<AuthEvent>,
}

impl AuthStore {
    pub fn new(client: AuthClient, session_ttl: Duration) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            client,
            status: Arc::new(OnceCell::new()),
            sessions: Cache::builder()
                .time_to_live(session_ttl)
                .max_capacity(10_000)
                .build(),
            events,
        }
    }

    /// Checks the auth service once. Concurrent callers wait for the same
    /// check; later calls return the recorded status without network I/O.
    pub async fn init(&self) -> AuthStatus {
        self.status
            .get_or_init(|| async {
                match self.client.settings().await {
                    Ok(_) => {
                        tracing::info!("Auth service reachable");
                        AuthStatus {
                            initialized: true,
                            error: None,
                        }
                    }
                    Err(e) => {
                        tracing::error!("Auth service check failed: {}", e);
                        AuthStatus {
                            initialized: true,
                            error: Some(e.to_string()),
                        }
                    }
                }
            })
            .await
            .clone()
    }

    /// Status recorded by `init`, if it ran.
    pub fn status(&self) -> Option<AuthStatus> {
        self.status.get().cloned()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<AuthEvent> {
        self.events.subscribe()
    }

    fn emit(&self, event: AuthEvent) {
        // Nobody listening is fine
        let _ = self.events.send(event);
    }

    pub async fn sign_in(&self, email: &str, password: &str) -> Result<Session, AppError> {
        let email = email.trim();
        if email.is_empty() || password.is_empty() {
            return Err(AppError::Validation("email_and_password_required"));
        }

        let session = self.client.sign_in_with_password(email, password).await?;
        self.remember(&session).await;
        tracing::info!("User signed in: {}", session.user.id);
        self.emit(AuthEvent::SignedIn(session.user.clone()));
        Ok(session)
    }

    pub async fn refresh(&self, refresh_token: &str) -> Result<Session, AppError> {
        if refresh_token.trim().is_empty() {
            return Err(AppError::Validation("refresh_token_required"));
        }

        let session = self.client.refresh_session(refresh_token.trim()).await?;
        self.remember(&session).await;
        self.emit(AuthEvent::TokenRefreshed(session.user.clone()));
        Ok(session)
    }

    /// Revokes the session. The local cache entry is dropped even when the
    /// auth service reports an error.
    pub async fn sign_out(&self, access_token: &str) -> Result<(), AppError> {
        self.sessions.invalidate(&token_key(access_token)).await;
        let result = self.client.sign_out(access_token).await;
        self.emit(AuthEvent::SignedOut);
        result
    }

    /// Resolve a bearer token to its user, consulting the cache first.
    pub async fn authenticate(&self, access_token: &str) -> Result<AuthUser, AppError> {
        let key = token_key(access_token);
        if let Some(user) = self.sessions.get(&key).await {
            return Ok(user);
        }

        let user = self.client.get_user(access_token).await?;
        self.sessions.insert(key, user.clone()).await;
        Ok(user)
    }

    async fn remember(&self, session: &Session) {
        self.sessions
            .insert(token_key(&session.access_token), session.user.clone())
            .await;
    }
}

fn token_key(token: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    hex::encode(hasher.finalize())
}

/// Extract the token from an `Authorization: Bearer <token>` header.
pub fn bearer_token(parts: &Parts) -> Result<&str, AppError> {
    let header = parts
        .headers
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| AppError::Unauthorized("Missing Authorization header".to_string()))?;

    header
        .strip_prefix("Bearer ")
        .or_else(|| header.strip_prefix("bearer "))
        .map(str::trim)
        .filter(|token| !token.is_empty())
        .ok_or_else(|| AppError::Unauthorized("Malformed bearer token".to_string()))
}

/// Raw bearer token of the current request, for endpoints that forward it.
pub struct BearerToken(pub String);

#[async_trait]
impl<S: Send + Sync> FromRequestParts<S> for BearerToken {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        bearer_token(parts).map(|token| BearerToken(token.to_string()))
    }
}

#[async_trait]
impl FromRequestParts<Arc<AppState>> for AuthUser {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        let token = bearer_token(parts)?;
        state.auth.authenticate(token).await
    }
}
