use crate::auth_client::Session;
use crate::auth_store::{AuthUser, BearerToken};
use crate::errors::AppError;
use crate::handlers::AppState;
use crate::ingest::parse_body;
use axum::{
    body::Bytes,
    extract::{rejection::BytesRejection, State},
    Json,
};
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct RefreshRequest {
    pub refresh_token: String,
}

/// POST /api/v1/auth/login
///
/// Missing fields surface as `email_and_password_required` from the store.
pub async fn login(
    State(state): State<Arc<AppState>>,
    body: Result<Bytes, BytesRejection>,
) -> Result<Json<Session>, AppError> {
    let request: LoginRequest = parse_body(&body?)?;
    let session = state.auth.sign_in(&request.email, &request.password).await?;
    Ok(Json(session))
}

/// POST /api/v1/auth/refresh
pub async fn refresh(
    State(state): State<Arc<AppState>>,
    body: Result<Bytes, BytesRejection>,
) -> Result<Json<Session>, AppError> {
    let request: RefreshRequest = parse_body(&body?)?;
    let session = state.auth.refresh(&request.refresh_token).await?;
    Ok(Json(session))
}

/// POST /api/v1/auth/logout
pub async fn logout(
    State(state): State<Arc<AppState>>,
    BearerToken(token): BearerToken,
) -> Result<Json<Value>, AppError> {
    state.auth.sign_out(&token).await?;
    Ok(Json(json!({ "ok": true })))
}

/// GET /api/v1/auth/session
///
/// Current user plus the auth store's init status.
pub async fn session(State(state): State<Arc<AppState>>, user: AuthUser) -> Json<Value> {
    Json(json!({
        "user": user,
        "auth": state.auth.status(),
    }))
}
