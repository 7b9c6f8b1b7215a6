//! Shared fixtures for router tests: an in-memory repository that follows
//! the ingestion procedures' contract, and request helpers.
#![allow(dead_code)]

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{Request, Response};
use axum::Router;
use chrono::{DateTime, Utc};
use http_body_util::BodyExt;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tower::ServiceExt;
use uuid::Uuid;

use lead_tracker::auth_client::AuthClient;
use lead_tracker::auth_store::AuthStore;
use lead_tracker::config::Config;
use lead_tracker::db_storage::LeadRepository;
use lead_tracker::errors::AppError;
use lead_tracker::handlers::AppState;
use lead_tracker::ingest_models::{RdEventRpc, WhatsappClickRpc, WhatsappMessageRpc};
use lead_tracker::models::{
    ExpandedEvent, IngestOutcome, Lead, LeadEvent, LeadQuality, LeadSummary, EVENT_RD,
    EVENT_WHATSAPP_CLICK, EVENT_WHATSAPP_MESSAGE,
};
use lead_tracker::realtime::RealtimeHub;
use lead_tracker::routes::build_router;

#[derive(Default)]
struct Store {
    leads: Vec<Lead>,
    events: Vec<LeadEvent>,
    /// (event_type, event_key) -> lead id
    keys: HashMap<(String, String), Uuid>,
}

/// Identity fields offered by one ingestion call.
struct Identity<'a> {
    name: Option<&'a str>,
    email: Option<&'a str>,
    phone: Option<&'a str>,
    rd_lead_id: Option<&'a str>,
    utm_source: Option<&'a str>,
}

impl Store {
    /// Dedup on (type, key), then merge on phone, email or CRM id.
    fn ingest(
        &mut self,
        event_type: &str,
        event_key: &str,
        occurred_at: DateTime<Utc>,
        identity: Identity<'_>,
        payload: Value,
    ) -> IngestOutcome {
        let dedup = (event_type.to_string(), event_key.to_string());
        if let Some(lead_id) = self.keys.get(&dedup) {
            return IngestOutcome {
                lead_id: Some(*lead_id),
                inserted: false,
            };
        }

        let existing = self.leads.iter_mut().find(|lead| {
            (identity.phone.is_some() && lead.phone_e164.as_deref() == identity.phone)
                || (identity.email.is_some() && lead.email.as_deref() == identity.email)
                || (identity.rd_lead_id.is_some()
                    && lead.rd_lead_id.as_deref() == identity.rd_lead_id)
        });

        let lead_id = match existing {
            Some(lead) => {
                lead.name = lead.name.take().or(identity.name.map(str::to_string));
                lead.email = lead.email.take().or(identity.email.map(str::to_string));
                lead.phone_e164 = lead.phone_e164.take().or(identity.phone.map(str::to_string));
                lead.rd_lead_id = lead
                    .rd_lead_id
                    .take()
                    .or(identity.rd_lead_id.map(str::to_string));
                lead.id
            }
            None => {
                let lead = new_lead(occurred_at, &identity);
                let id = lead.id;
                self.leads.push(lead);
                id
            }
        };

        self.keys.insert(dedup, lead_id);
        self.events.push(LeadEvent {
            id: Uuid::new_v4(),
            event_type: event_type.to_string(),
            event_key: event_key.to_string(),
            occurred_at,
            payload,
            lead_id,
        });

        IngestOutcome {
            lead_id: Some(lead_id),
            inserted: true,
        }
    }
}

fn new_lead(created_at: DateTime<Utc>, identity: &Identity<'_>) -> Lead {
    Lead {
        id: Uuid::new_v4(),
        canonical_id: None,
        created_at,
        updated_at: created_at,
        name: identity.name.map(str::to_string),
        email: identity.email.map(str::to_string),
        phone_e164: identity.phone.map(str::to_string),
        rd_lead_id: identity.rd_lead_id.map(str::to_string),
        gclid: None,
        utm_source: identity.utm_source.map(str::to_string),
        utm_medium: None,
        utm_campaign: None,
        utm_content: None,
        utm_term: None,
        quality: LeadQuality::Unknown,
        landing_url_first: None,
        landing_url_last: None,
    }
}

fn summary(lead: &Lead) -> LeadSummary {
    LeadSummary {
        id: lead.id,
        canonical_id: lead.canonical_id,
        created_at: lead.created_at,
        name: lead.name.clone(),
        email: lead.email.clone(),
        phone_e164: lead.phone_e164.clone(),
        utm_source: lead.utm_source.clone(),
        utm_campaign: lead.utm_campaign.clone(),
        quality: lead.quality,
    }
}

/// In-memory stand-in for the database procedures and views.
#[derive(Default)]
pub struct MemoryRepo {
    store: Mutex<Store>,
}

impl MemoryRepo {
    pub fn lead_count(&self) -> usize {
        self.store.lock().unwrap().leads.len()
    }

    pub fn event_count(&self) -> usize {
        self.store.lock().unwrap().events.len()
    }
}

#[async_trait]
impl LeadRepository for MemoryRepo {
    async fn ingest_whatsapp_click(&self, rpc: &WhatsappClickRpc) -> Result<IngestOutcome, AppError> {
        let identity = Identity {
            name: rpc.name.as_deref(),
            email: rpc.email.as_deref(),
            phone: rpc.phone.as_deref(),
            rd_lead_id: rpc.rd_lead_id.as_deref(),
            utm_source: rpc.attribution.utm_source.as_deref(),
        };
        Ok(self.store.lock().unwrap().ingest(
            EVENT_WHATSAPP_CLICK,
            &rpc.event_key,
            rpc.occurred_at,
            identity,
            rpc.payload.clone(),
        ))
    }

    async fn ingest_rd_event(&self, rpc: &RdEventRpc) -> Result<IngestOutcome, AppError> {
        let identity = Identity {
            name: rpc.name.as_deref(),
            email: rpc.email.as_deref(),
            phone: rpc.phone.as_deref(),
            rd_lead_id: Some(rpc.rd_lead_id.as_str()),
            utm_source: rpc.attribution.utm_source.as_deref(),
        };
        Ok(self.store.lock().unwrap().ingest(
            EVENT_RD,
            &rpc.event_key,
            rpc.occurred_at,
            identity,
            rpc.payload.clone(),
        ))
    }

    async fn ingest_whatsapp_message(
        &self,
        rpc: &WhatsappMessageRpc,
    ) -> Result<IngestOutcome, AppError> {
        let identity = Identity {
            name: rpc.name.as_deref(),
            email: None,
            phone: Some(rpc.phone.as_str()),
            rd_lead_id: None,
            utm_source: None,
        };
        Ok(self.store.lock().unwrap().ingest(
            EVENT_WHATSAPP_MESSAGE,
            &rpc.event_key,
            rpc.occurred_at,
            identity,
            rpc.payload.clone(),
        ))
    }

    async fn leads_since(&self, from: DateTime<Utc>) -> Result<Vec<LeadSummary>, AppError> {
        let store = self.store.lock().unwrap();
        Ok(store
            .leads
            .iter()
            .filter(|lead| lead.created_at >= from)
            .map(summary)
            .collect())
    }

    async fn events_since(
        &self,
        from: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<ExpandedEvent>, AppError> {
        let store = self.store.lock().unwrap();
        let mut events: Vec<ExpandedEvent> = store
            .events
            .iter()
            .filter(|event| event.occurred_at >= from)
            .filter_map(|event| {
                let lead = store.leads.iter().find(|l| l.id == event.lead_id)?;
                Some(ExpandedEvent {
                    id: event.id,
                    event_type: event.event_type.clone(),
                    event_key: event.event_key.clone(),
                    occurred_at: event.occurred_at,
                    payload: event.payload.clone(),
                    lead_id: lead.id,
                    lead_name: lead.name.clone(),
                    lead_email: lead.email.clone(),
                    lead_phone_e164: lead.phone_e164.clone(),
                    lead_utm_source: lead.utm_source.clone(),
                    lead_utm_campaign: lead.utm_campaign.clone(),
                    lead_quality: Some(lead.quality.as_str().to_string()),
                })
            })
            .collect();
        events.sort_by(|a, b| b.occurred_at.cmp(&a.occurred_at));
        events.truncate(limit as usize);
        Ok(events)
    }

    async fn search_leads(
        &self,
        query: Option<&str>,
        limit: i64,
    ) -> Result<Vec<LeadSummary>, AppError> {
        let store = self.store.lock().unwrap();
        let needle = query.map(str::to_lowercase);
        let matches = |value: &Option<String>, needle: &str| {
            value
                .as_deref()
                .map(|v| v.to_lowercase().contains(needle))
                .unwrap_or(false)
        };
        let mut leads: Vec<LeadSummary> = store
            .leads
            .iter()
            .filter(|lead| match needle.as_deref() {
                None => true,
                Some(n) => {
                    matches(&lead.email, n) || matches(&lead.phone_e164, n) || matches(&lead.name, n)
                }
            })
            .map(summary)
            .collect();
        leads.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        leads.truncate(limit as usize);
        Ok(leads)
    }

    async fn lead_by_id(&self, id: Uuid) -> Result<Option<Lead>, AppError> {
        let store = self.store.lock().unwrap();
        Ok(store.leads.iter().find(|lead| lead.id == id).cloned())
    }

    async fn events_for_lead(&self, id: Uuid, limit: i64) -> Result<Vec<LeadEvent>, AppError> {
        let store = self.store.lock().unwrap();
        let mut events: Vec<LeadEvent> = store
            .events
            .iter()
            .filter(|event| event.lead_id == id)
            .cloned()
            .collect();
        events.sort_by(|a, b| b.occurred_at.cmp(&a.occurred_at));
        events.truncate(limit as usize);
        Ok(events)
    }
}

/// Repository whose every call fails the way a raising procedure does.
pub struct FailingRepo;

fn rpc_failure() -> AppError {
    AppError::DatabaseError(sqlx::Error::Protocol("rpc exploded".to_string()))
}

#[async_trait]
impl LeadRepository for FailingRepo {
    async fn ingest_whatsapp_click(&self, _: &WhatsappClickRpc) -> Result<IngestOutcome, AppError> {
        Err(rpc_failure())
    }

    async fn ingest_rd_event(&self, _: &RdEventRpc) -> Result<IngestOutcome, AppError> {
        Err(rpc_failure())
    }

    async fn ingest_whatsapp_message(
        &self,
        _: &WhatsappMessageRpc,
    ) -> Result<IngestOutcome, AppError> {
        Err(rpc_failure())
    }

    async fn leads_since(&self, _: DateTime<Utc>) -> Result<Vec<LeadSummary>, AppError> {
        Err(rpc_failure())
    }

    async fn events_since(&self, _: DateTime<Utc>, _: i64) -> Result<Vec<ExpandedEvent>, AppError> {
        Err(rpc_failure())
    }

    async fn search_leads(&self, _: Option<&str>, _: i64) -> Result<Vec<LeadSummary>, AppError> {
        Err(rpc_failure())
    }

    async fn lead_by_id(&self, _: Uuid) -> Result<Option<Lead>, AppError> {
        Err(rpc_failure())
    }

    async fn events_for_lead(&self, _: Uuid, _: i64) -> Result<Vec<LeadEvent>, AppError> {
        Err(rpc_failure())
    }
}

/// Repository whose procedures return no row at all.
pub struct NoRowRepo;

#[async_trait]
impl LeadRepository for NoRowRepo {
    async fn ingest_whatsapp_click(&self, _: &WhatsappClickRpc) -> Result<IngestOutcome, AppError> {
        Ok(IngestOutcome::default())
    }

    async fn ingest_rd_event(&self, _: &RdEventRpc) -> Result<IngestOutcome, AppError> {
        Ok(IngestOutcome::default())
    }

    async fn ingest_whatsapp_message(
        &self,
        _: &WhatsappMessageRpc,
    ) -> Result<IngestOutcome, AppError> {
        Ok(IngestOutcome::default())
    }

    async fn leads_since(&self, _: DateTime<Utc>) -> Result<Vec<LeadSummary>, AppError> {
        Ok(Vec::new())
    }

    async fn events_since(&self, _: DateTime<Utc>, _: i64) -> Result<Vec<ExpandedEvent>, AppError> {
        Ok(Vec::new())
    }

    async fn search_leads(&self, _: Option<&str>, _: i64) -> Result<Vec<LeadSummary>, AppError> {
        Ok(Vec::new())
    }

    async fn lead_by_id(&self, _: Uuid) -> Result<Option<Lead>, AppError> {
        Ok(None)
    }

    async fn events_for_lead(&self, _: Uuid, _: i64) -> Result<Vec<LeadEvent>, AppError> {
        Ok(Vec::new())
    }
}

/// Shared state over `repo` with auth pointed at the config's auth URL.
pub fn state_with(repo: Arc<dyn LeadRepository>, config: Config) -> Arc<AppState> {
    let auth_client =
        AuthClient::new(config.auth_url.clone(), config.auth_anon_key.clone()).unwrap();
    Arc::new(AppState {
        auth: AuthStore::new(auth_client, Duration::from_secs(60)),
        repo,
        config,
        realtime: RealtimeHub::new(),
    })
}

/// Router over `repo` with auth pointed at `auth_url`.
pub fn app_with(repo: Arc<dyn LeadRepository>, config: Config) -> Router {
    build_router(state_with(repo, config))
}

/// Router whose auth service is unreachable; fine for webhook-only tests.
pub fn app(repo: Arc<dyn LeadRepository>) -> Router {
    app_with(repo, Config::for_tests("http://127.0.0.1:9"))
}

pub fn post_json(uri: &str, body: &str) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

pub fn get_with_token(uri: &str, token: &str) -> Request<Body> {
    Request::builder()
        .method("GET")
        .uri(uri)
        .header("authorization", format!("Bearer {}", token))
        .body(Body::empty())
        .unwrap()
}

pub async fn send(app: &Router, request: Request<Body>) -> (u16, Value) {
    let response: Response<Body> = app.clone().oneshot(request).await.unwrap();
    let status = response.status().as_u16();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let body = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or_else(|_| json!(String::from_utf8_lossy(&bytes)))
    };
    (status, body)
}
