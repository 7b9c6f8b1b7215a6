use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use lead_tracker::auth_client::AuthClient;
use lead_tracker::auth_store::{AuthEvent, AuthStore};
use lead_tracker::config::Config;
use lead_tracker::db::Database;
use lead_tracker::db_storage::PgLeadRepository;
use lead_tracker::handlers::AppState;
use lead_tracker::realtime::{self, RealtimeHub};
use lead_tracker::routes::build_router;

/// Main entry point for the application.
///
/// Initializes logging, configuration, the database pool, the auth store
/// and the realtime listener, then starts the Axum server.
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "lead_tracker=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    let config = Config::from_env()?;

    // Initialize database connection pool
    let db = Database::new(&config.database_url, config.db_max_connections).await?;
    tracing::info!("Database connection pool established");

    // Auth store: checked once at startup, sessions cached by token digest
    let auth_client = AuthClient::new(config.auth_url.clone(), config.auth_anon_key.clone())?;
    let auth = AuthStore::new(
        auth_client,
        Duration::from_secs(config.session_cache_ttl_secs),
    );
    let status = auth.init().await;
    if let Some(error) = status.error {
        tracing::warn!("Auth service unavailable at startup: {}", error);
    }

    let mut auth_events = auth.subscribe();
    tokio::spawn(async move {
        while let Ok(event) = auth_events.recv().await {
            match event {
                AuthEvent::SignedIn(user) => tracing::info!("Auth: signed in {}", user.id),
                AuthEvent::TokenRefreshed(user) => {
                    tracing::debug!("Auth: token refreshed for {}", user.id)
                }
                AuthEvent::SignedOut => tracing::info!("Auth: signed out"),
            }
        }
    });

    // Realtime fan-out of lead_events inserts
    let hub = RealtimeHub::new();
    realtime::spawn_listener(db.pool.clone(), config.realtime_channel.clone(), hub.clone());

    // Build application state
    let app_state = Arc::new(AppState {
        repo: Arc::new(PgLeadRepository::new(db.pool.clone())),
        config: config.clone(),
        auth,
        realtime: hub,
    });

    let app = build_router(app_state);

    // Start server
    let addr = format!("0.0.0.0:{}", config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("Server listening on {}", addr);

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;

    Ok(())
}
