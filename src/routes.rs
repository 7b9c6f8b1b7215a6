use axum::{
    extract::DefaultBodyLimit,
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use std::time::Duration;
use tower::ServiceBuilder;
use tower_governor::{
    governor::GovernorConfigBuilder, key_extractor::SmartIpKeyExtractor, GovernorLayer,
};
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::handlers::{self, AppState};
use crate::{auth_handler, ingest_handler, realtime};

/// Request size limit: 5MB max payload. Enforced by the body extractors,
/// so an oversized webhook still gets a JSON `payload_too_large` error.
pub const MAX_BODY_BYTES: usize = 5 * 1024 * 1024;

/// Token replenish interval for a per-IP rate of `per_second` requests.
fn replenish_period(per_second: u64) -> Duration {
    Duration::from_nanos(1_000_000_000 / per_second.max(1))
}

/// Build the full HTTP surface.
///
/// `/health` bypasses rate limiting; everything else sits behind the body
/// limit and, when configured, the per-IP governor. The governor keys on the
/// peer address, so the server must be started with connect info.
pub fn build_router(state: Arc<AppState>) -> Router {
    let api = Router::new()
        // Ingestion webhooks
        .route(
            "/api/v1/track/whatsapp-click",
            post(ingest_handler::track_whatsapp_click)
                .fallback(ingest_handler::method_not_allowed),
        )
        .route(
            "/api/v1/track/rd-event",
            post(ingest_handler::track_rd_event).fallback(ingest_handler::method_not_allowed),
        )
        .route(
            "/api/v1/track/whatsapp-message",
            post(ingest_handler::track_whatsapp_message)
                .fallback(ingest_handler::method_not_allowed),
        )
        // Dashboard
        .route(
            "/api/v1/dashboard/overview",
            get(handlers::dashboard_overview),
        )
        .route("/api/v1/leads", get(handlers::list_leads))
        .route("/api/v1/leads/:id", get(handlers::get_lead))
        .route("/api/v1/integrations", get(handlers::integrations))
        // Realtime
        .route(
            "/api/v1/realtime/lead-events",
            get(realtime::lead_events_sse),
        )
        .route("/api/v1/realtime/status", get(realtime::realtime_status))
        // Auth
        .route("/api/v1/auth/login", post(auth_handler::login))
        .route("/api/v1/auth/refresh", post(auth_handler::refresh))
        .route("/api/v1/auth/logout", post(auth_handler::logout))
        .route("/api/v1/auth/session", get(auth_handler::session));

    let api = if state.config.rate_limit_enabled() {
        match GovernorConfigBuilder::default()
            .period(replenish_period(state.config.rate_limit_per_second))
            .burst_size(state.config.rate_limit_burst)
            .key_extractor(SmartIpKeyExtractor)
            .finish()
        {
            Some(config) => {
                tracing::info!(
                    "Rate limiting: {} req/sec per IP, burst of {}",
                    state.config.rate_limit_per_second,
                    state.config.rate_limit_burst
                );
                api.layer(GovernorLayer {
                    config: Arc::new(config),
                })
            }
            None => {
                tracing::warn!("Invalid rate limit settings, rate limiting disabled");
                api
            }
        }
    } else {
        tracing::warn!("Rate limiting disabled");
        api
    };

    let api = api.layer(ServiceBuilder::new().layer(DefaultBodyLimit::max(MAX_BODY_BYTES)));

    Router::new()
        .route("/health", get(handlers::health))
        .merge(api)
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}
