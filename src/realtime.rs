//! Realtime fan-out of `lead_events` inserts.
//!
//! A trigger on `lead_events` publishes each inserted row on a Postgres
//! channel (see `migrations/`). One background task listens on that channel
//! and rebroadcasts to every connected dashboard over Server-Sent Events,
//! which is the dashboard's cue to refetch.

use axum::{
    extract::State,
    response::sse::{Event, KeepAlive, Sse},
    Json,
};
use chrono::{DateTime, Utc};
use futures_util::stream::{self, Stream, StreamExt};
use serde::{Deserialize, Serialize};
use sqlx::postgres::PgListener;
use sqlx::PgPool;
use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, RwLock};
use tokio_stream::wrappers::{errors::BroadcastStreamRecvError, BroadcastStream};
use uuid::Uuid;

use crate::auth_store::AuthUser;
use crate::handlers::AppState;

const BROADCAST_CAPACITY: usize = 256;
const INITIAL_BACKOFF: Duration = Duration::from_secs(1);
const MAX_BACKOFF: Duration = Duration::from_secs(30);

/// Notification payload emitted by the `lead_events` insert trigger.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LeadEventInsert {
    pub id: Uuid,
    pub event_type: String,
    pub lead_id: Uuid,
    pub occurred_at: DateTime<Utc>,
}

impl LeadEventInsert {
    pub fn parse(payload: &str) -> Option<Self> {
        match serde_json::from_str(payload) {
            Ok(insert) => Some(insert),
            Err(e) => {
                tracing::warn!("Ignoring malformed lead_events notification: {}", e);
                None
            }
        }
    }
}

/// Listener connection status plus the latest insert seen.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RealtimeState {
    pub connected: bool,
    pub last_insert_at: Option<DateTime<Utc>>,
}

/// Shared hub between the listener task and SSE subscribers.
#[derive(Clone)]
pub struct RealtimeHub {
    state: Arc<RwLock<RealtimeState>>,
    sender: broadcast::Sender<LeadEventInsert>,
}

impl Default for RealtimeHub {
    fn default() -> Self {
        Self::new()
    }
}

impl RealtimeHub {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(BROADCAST_CAPACITY);
        Self {
            state: Arc::new(RwLock::new(RealtimeState::default())),
            sender,
        }
    }

    pub async fn state(&self) -> RealtimeState {
        self.state.read().await.clone()
    }

    pub async fn set_connected(&self, connected: bool) {
        let mut state = self.state.write().await;
        if state.connected != connected {
            tracing::info!("Realtime listener connected={}", connected);
        }
        state.connected = connected;
    }

    /// Record an insert and forward it to subscribers.
    pub async fn publish(&self, insert: LeadEventInsert) {
        self.state.write().await.last_insert_at = Some(insert.occurred_at);
        // No receivers is fine: nobody has the dashboard open
        let _ = self.sender.send(insert);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<LeadEventInsert> {
        self.sender.subscribe()
    }
}

/// Spawn the background task that keeps a `LISTEN` open on `channel`,
/// reconnecting with capped exponential backoff.
pub fn spawn_listener(pool: PgPool, channel: String, hub: RealtimeHub) {
    tokio::spawn(async move {
        let mut backoff = INITIAL_BACKOFF;
        loop {
            match listen(&pool, &channel, &hub).await {
                Ok(()) => backoff = INITIAL_BACKOFF,
                Err(e) => {
                    tracing::error!("Realtime listener on '{}' failed: {}", channel, e);
                }
            }
            hub.set_connected(false).await;
            tokio::time::sleep(backoff).await;
            backoff = (backoff * 2).min(MAX_BACKOFF);
        }
    });
}

async fn listen(pool: &PgPool, channel: &str, hub: &RealtimeHub) -> Result<(), sqlx::Error> {
    let mut listener = PgListener::connect_with(pool).await?;
    listener.listen(channel).await?;
    hub.set_connected(true).await;
    tracing::info!("Listening for lead_events inserts on '{}'", channel);

    loop {
        // `try_recv` yields None when the connection dropped; reconnect then
        match listener.try_recv().await? {
            Some(notification) => {
                if let Some(insert) = LeadEventInsert::parse(notification.payload()) {
                    tracing::debug!(
                        "lead_events insert: id={} type={}",
                        insert.id,
                        insert.event_type
                    );
                    hub.publish(insert).await;
                }
            }
            None => {
                tracing::warn!("Realtime connection lost, reconnecting");
                return Ok(());
            }
        }
    }
}

/// SSE stream: a `status` event first, then one `lead_event` per insert.
pub fn event_stream(
    initial: RealtimeState,
    receiver: broadcast::Receiver<LeadEventInsert>,
) -> impl Stream<Item = Result<Event, Infallible>> {
    let status = Event::default()
        .event("status")
        .json_data(&initial)
        .unwrap_or_else(|_| Event::default().event("status"));

    let inserts = BroadcastStream::new(receiver).filter_map(|item| async move {
        match item {
            Ok(insert) => Event::default().event("lead_event").json_data(&insert).ok(),
            Err(BroadcastStreamRecvError::Lagged(skipped)) => {
                tracing::debug!("SSE subscriber lagged, skipped {} inserts", skipped);
                None
            }
        }
    });

    stream::once(async move { status })
        .chain(inserts)
        .map(Ok::<_, Infallible>)
}

/// GET /api/v1/realtime/lead-events
pub async fn lead_events_sse(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    tracing::debug!("Realtime subscriber connected: user={}", user.id);
    let receiver = state.realtime.subscribe();
    let initial = state.realtime.state().await;
    Sse::new(event_stream(initial, receiver)).keep_alive(KeepAlive::default())
}

/// GET /api/v1/realtime/status
pub async fn realtime_status(
    State(state): State<Arc<AppState>>,
    _user: AuthUser,
) -> Json<RealtimeState> {
    Json(state.realtime.state().await)
}
