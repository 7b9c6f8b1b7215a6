use failsafe::backoff::{self, Exponential};
use failsafe::failure_policy::{self, ConsecutiveFailures};
use failsafe::futures::CircuitBreaker;
use failsafe::StateMachine;
use reqwest::{RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::time::Duration;

use crate::errors::AppError;

/// Circuit breaker guarding calls to the hosted auth service.
pub type AuthCircuitBreaker = StateMachine<ConsecutiveFailures<Exponential>, ()>;

/// Opens after 5 consecutive transport failures, retrying after 10s → 60s.
pub fn create_auth_circuit_breaker() -> AuthCircuitBreaker {
    let backoff_strategy = backoff::exponential(Duration::from_secs(10), Duration::from_secs(60));
    let policy = failure_policy::consecutive_failures(5, backoff_strategy);
    failsafe::Config::new().failure_policy(policy).build()
}

/// User record as returned by the auth service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuthUser {
    pub id: String,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub role: Option<String>,
}

/// Session issued on sign-in or refresh.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub access_token: String,
    pub refresh_token: String,
    #[serde(default)]
    pub token_type: Option<String>,
    /// Lifetime in seconds.
    pub expires_in: u64,
    #[serde(default)]
    pub expires_at: Option<i64>,
    pub user: AuthUser,
}

/// Client for the hosted auth API (GoTrue-compatible `/auth/v1`).
#[derive(Clone)]
pub struct AuthClient {
    client: reqwest::Client,
    base_url: String,
    anon_key: String,
    breaker: AuthCircuitBreaker,
}

impl AuthClient {
    /// Creates a new `AuthClient`.
    ///
    /// # Arguments
    ///
    /// * `base_url` - Project URL of the auth service, without trailing slash.
    /// * `anon_key` - Public API key sent as the `apikey` header.
    pub fn new(base_url: String, anon_key: String) -> Result<Self, AppError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| {
                AppError::ExternalApiError(format!("Failed to create auth client: {}", e))
            })?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            anon_key,
            breaker: create_auth_circuit_breaker(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/auth/v1/{}", self.base_url, path)
    }

    /// Sends through the circuit breaker. Only transport errors count as
    /// failures; HTTP error statuses are handled by the caller.
    async fn send(&self, request: RequestBuilder) -> Result<Response, AppError> {
        let request = request.header("apikey", &self.anon_key);
        match self.breaker.call(request.send()).await {
            Ok(response) => Ok(response),
            Err(failsafe::Error::Rejected) => Err(AppError::ExternalApiError(
                "Auth service circuit open, request rejected".to_string(),
            )),
            Err(failsafe::Error::Inner(e)) => Err(AppError::ExternalApiError(format!(
                "Auth request failed: {}",
                e
            ))),
        }
    }

    /// Reachability check used by `AuthStore::init`.
    pub async fn settings(&self) -> Result<Value, AppError> {
        let response = self.send(self.client.get(self.url("settings"))).await?;
        parse_json(response).await
    }

    /// Password sign-in.
    ///
    /// # Returns
    ///
    /// * `Result<Session, AppError>` - The new session, or `Unauthorized`
    ///   with the service's message on bad credentials.
    pub async fn sign_in_with_password(
        &self,
        email: &str,
        password: &str,
    ) -> Result<Session, AppError> {
        tracing::info!("Signing in user via auth service");
        let request = self
            .client
            .post(self.url("token"))
            .query(&[("grant_type", "password")])
            .json(&json!({ "email": email, "password": password }));
        parse_json(self.send(request).await?).await
    }

    /// Exchange a refresh token for a new session.
    pub async fn refresh_session(&self, refresh_token: &str) -> Result<Session, AppError> {
        let request = self
            .client
            .post(self.url("token"))
            .query(&[("grant_type", "refresh_token")])
            .json(&json!({ "refresh_token": refresh_token }));
        parse_json(self.send(request).await?).await
    }

    /// Resolve the user owning `access_token`.
    pub async fn get_user(&self, access_token: &str) -> Result<AuthUser, AppError> {
        let request = self.client.get(self.url("user")).bearer_auth(access_token);
        parse_json(self.send(request).await?).await
    }

    /// Revoke the session behind `access_token`.
    pub async fn sign_out(&self, access_token: &str) -> Result<(), AppError> {
        let request = self.client.post(self.url("logout")).bearer_auth(access_token);
        let response = self.send(request).await?;
        if response.status().is_success() {
            return Ok(());
        }
        Err(error_from_response(response).await)
    }
}

async fn parse_json<T: DeserializeOwned>(response: Response) -> Result<T, AppError> {
    if !response.status().is_success() {
        return Err(error_from_response(response).await);
    }
    response.json().await.map_err(|e| {
        AppError::ExternalApiError(format!("Failed to parse auth response: {}", e))
    })
}

/// Client errors become `Unauthorized` with the service's own message;
/// anything else is an upstream failure.
async fn error_from_response(response: Response) -> AppError {
    let status = response.status();
    let body: Value = response.json().await.unwrap_or(Value::Null);
    let message = ["error_description", "msg", "message", "error"]
        .iter()
        .find_map(|key| body.get(*key).and_then(Value::as_str))
        .unwrap_or("Unknown error")
        .to_string();

    match status {
        StatusCode::BAD_REQUEST
        | StatusCode::UNAUTHORIZED
        | StatusCode::FORBIDDEN
        | StatusCode::UNPROCESSABLE_ENTITY => AppError::Unauthorized(message),
        _ => AppError::ExternalApiError(format!("Auth service returned {}: {}", status, message)),
    }
}
