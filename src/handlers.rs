use crate::auth_store::{AuthStore, AuthUser};
use crate::config::Config;
use crate::dashboard::{self, DashboardOverview, Period};
use crate::db_storage::LeadRepository;
use crate::errors::AppError;
use crate::models::{LeadDetail, LeadListParams, LeadSummary};
use crate::realtime::RealtimeHub;
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use chrono::{FixedOffset, Offset, Utc};
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;
use uuid::Uuid;

/// Shared application state injected into handlers.
pub struct AppState {
    /// Application configuration.
    pub config: Config,
    /// Lead storage: ingestion RPCs and dashboard reads.
    pub repo: Arc<dyn LeadRepository>,
    /// Session store over the hosted auth service.
    pub auth: AuthStore,
    /// Fan-out of `lead_events` inserts.
    pub realtime: RealtimeHub,
}

impl AppState {
    /// Offset used for day boundaries on the dashboard.
    pub fn dashboard_offset(&self) -> FixedOffset {
        // Config bounds the offset to less than a day, so this never falls back
        FixedOffset::east_opt(self.config.dashboard_utc_offset_minutes * 60)
            .unwrap_or_else(|| Utc.fix())
    }
}

/// Health check endpoint.
pub async fn health() -> (StatusCode, Json<Value>) {
    (
        StatusCode::OK,
        Json(json!({
            "status": "healthy",
            "service": "lead-tracker",
            "version": env!("CARGO_PKG_VERSION")
        })),
    )
}

#[derive(Debug, Deserialize)]
pub struct OverviewParams {
    pub period: Option<String>,
}

/// GET /api/v1/dashboard/overview
///
/// KPIs, daily lead series, quality breakdown, conversions by source and
/// the latest event feed for the selected period (1, 7 or 30 days).
pub async fn dashboard_overview(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    Query(params): Query<OverviewParams>,
) -> Result<Json<DashboardOverview>, AppError> {
    let period = Period::parse(params.period.as_deref())?;
    let now = Utc::now();
    let offset = state.dashboard_offset();
    let from = dashboard::window_start(now, period, offset);

    tracing::debug!(
        "GET /dashboard/overview - user={}, period={}d, from={}",
        user.id,
        period.days(),
        from
    );

    let (leads, events) = tokio::try_join!(
        state.repo.leads_since(from),
        state.repo.events_since(from, state.config.feed_limit),
    )?;

    let realtime = state.realtime.state().await;
    Ok(Json(dashboard::build_overview(
        period, now, offset, leads, events, realtime,
    )))
}

/// GET /api/v1/leads
///
/// Latest canonical leads, optionally filtered by name, email or phone.
pub async fn list_leads(
    State(state): State<Arc<AppState>>,
    _user: AuthUser,
    Query(params): Query<LeadListParams>,
) -> Result<Json<Vec<LeadSummary>>, AppError> {
    let query = params.q.as_deref().map(str::trim).filter(|q| !q.is_empty());
    tracing::debug!("GET /leads - query={:?}", query);

    let leads = state
        .repo
        .search_leads(query, state.config.lead_list_limit)
        .await?;
    Ok(Json(leads))
}

/// GET /api/v1/leads/:id
///
/// Lead identity plus its most recent events.
pub async fn get_lead(
    State(state): State<Arc<AppState>>,
    _user: AuthUser,
    Path(id): Path<Uuid>,
) -> Result<Json<LeadDetail>, AppError> {
    tracing::debug!("GET /leads/{}", id);

    let (lead, events) = tokio::try_join!(
        state.repo.lead_by_id(id),
        state.repo.events_for_lead(id, state.config.lead_events_limit),
    )?;

    let lead = lead.ok_or(AppError::NotFound("lead_not_found"))?;
    Ok(Json(LeadDetail { lead, events }))
}

/// GET /api/v1/integrations
///
/// Catalog of ingestion endpoints with example payloads, for wiring up
/// automation tools and tag managers.
pub async fn integrations(
    State(state): State<Arc<AppState>>,
    _user: AuthUser,
) -> Json<Value> {
    let base = state.config.public_base_url.as_deref().unwrap_or("");
    let auth_header = state
        .config
        .webhook_secret
        .as_ref()
        .map(|_| "X-Webhook-Token");
    let now = crate::ingest::iso_millis(&Utc::now());

    Json(json!({
        "auth_header": auth_header,
        "endpoints": [
            {
                "name": "whatsapp_click",
                "method": "POST",
                "url": format!("{}/api/v1/track/whatsapp-click", base),
                "example": {
                    "click_id": "unique-click-id",
                    "occurred_at": now,
                    "phone": "+5511999999999",
                    "gclid": "EAIaIQob...",
                    "utm": {
                        "utm_source": "google",
                        "utm_medium": "cpc",
                        "utm_campaign": "campaign_x"
                    },
                    "landing_url": "https://example.com/landing",
                    "payload": { "any": "extra" }
                }
            },
            {
                "name": "whatsapp_message",
                "method": "POST",
                "url": format!("{}/api/v1/track/whatsapp-message", base),
                "example": {
                    "message_id": "unique-message-id",
                    "occurred_at": now,
                    "phone": "5511999999999",
                    "name": "Contact name",
                    "click_id": null,
                    "payload": { "source": "WhatsApp" }
                }
            },
            {
                "name": "rd_event",
                "method": "POST",
                "url": format!("{}/api/v1/track/rd-event", base),
                "example": {
                    "rd_lead_id": "rd_123",
                    "rd_event_type": "conversion",
                    "occurred_at": now,
                    "email": "lead@example.com",
                    "phone": "+5511999999999",
                    "payload": { "source": "RD Station" }
                }
            }
        ]
    }))
}
