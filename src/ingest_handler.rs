use crate::errors::AppError;
use crate::handlers::AppState;
use crate::ingest::{self, parse_body};
use crate::ingest_models::{
    IngestResponse, RdEventPayload, WhatsappClickPayload, WhatsappMessagePayload,
};
use crate::models::IngestOutcome;
use axum::{
    body::Bytes,
    extract::{rejection::BytesRejection, State},
    http::HeaderMap,
    Json,
};
use chrono::Utc;
use sha2::{Digest, Sha256};
use std::sync::Arc;

/// WhatsApp click webhook.
///
/// Posted by the ad-click redirect before the visitor lands in WhatsApp.
/// Requires `click_id`, which doubles as the dedup key.
pub async fn track_whatsapp_click(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Result<Bytes, BytesRejection>,
) -> Result<Json<IngestResponse>, AppError> {
    validate_webhook_secret(&state, &headers)?;

    let payload: WhatsappClickPayload = parse_body(&body?)?;
    let rpc = ingest::normalize_whatsapp_click(payload, Utc::now())?;
    tracing::info!("Received WhatsApp click: event_key={}", rpc.event_key);

    let outcome = state.repo.ingest_whatsapp_click(&rpc).await?;
    Ok(respond("whatsapp_click", &rpc.event_key, outcome))
}

/// RD Station event webhook.
///
/// Requires `rd_lead_id` and `rd_event_type`. Without an upstream
/// `event_id` the dedup key is derived from lead, type and timestamp.
pub async fn track_rd_event(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Result<Bytes, BytesRejection>,
) -> Result<Json<IngestResponse>, AppError> {
    validate_webhook_secret(&state, &headers)?;

    let payload: RdEventPayload = parse_body(&body?)?;
    let rpc = ingest::normalize_rd_event(payload, Utc::now())?;
    tracing::info!(
        "Received RD Station event: type={}, event_key={}",
        rpc.rd_event_type,
        rpc.event_key
    );

    let outcome = state.repo.ingest_rd_event(&rpc).await?;
    Ok(respond("rd_event", &rpc.event_key, outcome))
}

/// WhatsApp message webhook.
///
/// Sent when a message arrives and the sender's phone is known, attaching
/// the phone to the lead (and to the click, when `click_id` is present).
pub async fn track_whatsapp_message(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Result<Bytes, BytesRejection>,
) -> Result<Json<IngestResponse>, AppError> {
    validate_webhook_secret(&state, &headers)?;

    let payload: WhatsappMessagePayload = parse_body(&body?)?;
    let rpc = ingest::normalize_whatsapp_message(payload, Utc::now())?;
    tracing::info!("Received WhatsApp message: event_key={}", rpc.event_key);

    let outcome = state.repo.ingest_whatsapp_message(&rpc).await?;
    Ok(respond("whatsapp_message", &rpc.event_key, outcome))
}

/// Fallback for non-POST requests on ingestion paths.
pub async fn method_not_allowed() -> AppError {
    AppError::MethodNotAllowed
}

fn respond(channel: &str, event_key: &str, outcome: IngestOutcome) -> Json<IngestResponse> {
    if outcome.inserted {
        tracing::info!(
            "Ingested {}: event_key={}, lead_id={:?}",
            channel,
            event_key,
            outcome.lead_id
        );
    } else {
        tracing::debug!("Duplicate {} skipped: event_key={}", channel, event_key);
    }

    Json(IngestResponse {
        ok: true,
        lead_id: outcome.lead_id,
        inserted: outcome.inserted,
    })
}

/// Headers accepted as carriers of the webhook secret, in lookup order.
const WEBHOOK_TOKEN_HEADERS: [&str; 2] = ["x-webhook-token", "apikey"];

fn validate_webhook_secret(state: &AppState, headers: &HeaderMap) -> Result<(), AppError> {
    check_webhook_token(state.config.webhook_secret.as_deref(), headers)
}

/// Open when no secret is configured (startup already warned about it).
fn check_webhook_token(expected: Option<&str>, headers: &HeaderMap) -> Result<(), AppError> {
    let Some(expected) = expected else {
        return Ok(());
    };

    let provided = WEBHOOK_TOKEN_HEADERS
        .iter()
        .find_map(|name| headers.get(*name))
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| AppError::Unauthorized("Missing X-Webhook-Token header".to_string()))?;

    if !secret_matches(provided, expected) {
        tracing::warn!("Invalid webhook token received");
        return Err(AppError::Unauthorized("Invalid webhook token".to_string()));
    }

    Ok(())
}

/// Compares SHA-256 digests, so timing depends on neither the secret's
/// length nor the position of the first mismatch.
fn secret_matches(provided: &str, expected: &str) -> bool {
    let provided = Sha256::digest(provided.as_bytes());
    let expected = Sha256::digest(expected.as_bytes());
    provided
        .iter()
        .zip(expected.iter())
        .fold(0u8, |acc, (x, y)| acc | (x ^ y))
        == 0
}
