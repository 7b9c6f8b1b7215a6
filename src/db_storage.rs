use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use crate::errors::{AppError, ResultExt};
use crate::ingest_models::{RdEventRpc, WhatsappClickRpc, WhatsappMessageRpc};
use crate::models::{ExpandedEvent, IngestOutcome, Lead, LeadEvent, LeadSummary};

/// Everything the service reads from or writes to the database.
///
/// Writes go exclusively through the ingestion procedures, which own
/// dedup and identity merging. Reads hit the `*_live` views for the
/// dashboard and the base tables for lead detail.
#[async_trait]
pub trait LeadRepository: Send + Sync {
    async fn ingest_whatsapp_click(&self, rpc: &WhatsappClickRpc) -> Result<IngestOutcome, AppError>;

    async fn ingest_rd_event(&self, rpc: &RdEventRpc) -> Result<IngestOutcome, AppError>;

    async fn ingest_whatsapp_message(
        &self,
        rpc: &WhatsappMessageRpc,
    ) -> Result<IngestOutcome, AppError>;

    /// Canonical leads created at or after `from`, oldest first.
    async fn leads_since(&self, from: DateTime<Utc>) -> Result<Vec<LeadSummary>, AppError>;

    /// Most recent expanded events at or after `from`, newest first.
    async fn events_since(
        &self,
        from: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<ExpandedEvent>, AppError>;

    /// Latest canonical leads, optionally filtered by a name/email/phone substring.
    async fn search_leads(
        &self,
        query: Option<&str>,
        limit: i64,
    ) -> Result<Vec<LeadSummary>, AppError>;

    async fn lead_by_id(&self, id: Uuid) -> Result<Option<Lead>, AppError>;

    async fn events_for_lead(&self, id: Uuid, limit: i64) -> Result<Vec<LeadEvent>, AppError>;
}

/// Postgres-backed repository.
pub struct PgLeadRepository {
    pool: PgPool,
}

impl PgLeadRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

const LEAD_SUMMARY_COLUMNS: &str =
    "id, canonical_id, created_at, name, email, phone_e164, utm_source, utm_campaign, quality::text AS quality";

/// Escape `%`, `_` and `\` so user input matches literally inside ILIKE.
pub fn escape_like(query: &str) -> String {
    let mut escaped = String::with_capacity(query.len());
    for c in query.chars() {
        if matches!(c, '%' | '_' | '\\') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

#[async_trait]
impl LeadRepository for PgLeadRepository {
    async fn ingest_whatsapp_click(&self, rpc: &WhatsappClickRpc) -> Result<IngestOutcome, AppError> {
        let outcome = sqlx::query_as::<_, IngestOutcome>(
            r#"
            SELECT lead_id, inserted FROM ingest_whatsapp_click(
                p_event_key => $1,
                p_occurred_at => $2,
                p_name => $3,
                p_email => $4,
                p_phone => $5,
                p_rd_lead_id => $6,
                p_gclid => $7,
                p_utm_source => $8,
                p_utm_medium => $9,
                p_utm_campaign => $10,
                p_utm_content => $11,
                p_utm_term => $12,
                p_landing_url => $13,
                p_payload => $14
            )
            "#,
        )
        .bind(&rpc.event_key)
        .bind(rpc.occurred_at)
        .bind(&rpc.name)
        .bind(&rpc.email)
        .bind(&rpc.phone)
        .bind(&rpc.rd_lead_id)
        .bind(&rpc.attribution.gclid)
        .bind(&rpc.attribution.utm_source)
        .bind(&rpc.attribution.utm_medium)
        .bind(&rpc.attribution.utm_campaign)
        .bind(&rpc.attribution.utm_content)
        .bind(&rpc.attribution.utm_term)
        .bind(&rpc.landing_url)
        .bind(&rpc.payload)
        .fetch_optional(&self.pool)
        .await?;

        Ok(outcome.unwrap_or_default())
    }

    async fn ingest_rd_event(&self, rpc: &RdEventRpc) -> Result<IngestOutcome, AppError> {
        let outcome = sqlx::query_as::<_, IngestOutcome>(
            r#"
            SELECT lead_id, inserted FROM ingest_rd_event(
                p_event_key => $1,
                p_occurred_at => $2,
                p_rd_event_type => $3,
                p_name => $4,
                p_email => $5,
                p_phone => $6,
                p_rd_lead_id => $7,
                p_gclid => $8,
                p_utm_source => $9,
                p_utm_medium => $10,
                p_utm_campaign => $11,
                p_utm_content => $12,
                p_utm_term => $13,
                p_payload => $14
            )
            "#,
        )
        .bind(&rpc.event_key)
        .bind(rpc.occurred_at)
        .bind(&rpc.rd_event_type)
        .bind(&rpc.name)
        .bind(&rpc.email)
        .bind(&rpc.phone)
        .bind(&rpc.rd_lead_id)
        .bind(&rpc.attribution.gclid)
        .bind(&rpc.attribution.utm_source)
        .bind(&rpc.attribution.utm_medium)
        .bind(&rpc.attribution.utm_campaign)
        .bind(&rpc.attribution.utm_content)
        .bind(&rpc.attribution.utm_term)
        .bind(&rpc.payload)
        .fetch_optional(&self.pool)
        .await?;

        Ok(outcome.unwrap_or_default())
    }

    async fn ingest_whatsapp_message(
        &self,
        rpc: &WhatsappMessageRpc,
    ) -> Result<IngestOutcome, AppError> {
        let outcome = sqlx::query_as::<_, IngestOutcome>(
            r#"
            SELECT lead_id, inserted FROM ingest_whatsapp_message(
                p_event_key => $1,
                p_occurred_at => $2,
                p_phone => $3,
                p_name => $4,
                p_click_id => $5,
                p_payload => $6
            )
            "#,
        )
        .bind(&rpc.event_key)
        .bind(rpc.occurred_at)
        .bind(&rpc.phone)
        .bind(&rpc.name)
        .bind(&rpc.click_id)
        .bind(&rpc.payload)
        .fetch_optional(&self.pool)
        .await?;

        Ok(outcome.unwrap_or_default())
    }

    async fn leads_since(&self, from: DateTime<Utc>) -> Result<Vec<LeadSummary>, AppError> {
        let sql = format!(
            "SELECT {} FROM leads_live WHERE created_at >= $1 ORDER BY created_at ASC",
            LEAD_SUMMARY_COLUMNS
        );
        sqlx::query_as::<_, LeadSummary>(&sql)
            .bind(from)
            .fetch_all(&self.pool)
            .await
            .context("loading leads_live window")
    }

    async fn events_since(
        &self,
        from: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<ExpandedEvent>, AppError> {
        sqlx::query_as::<_, ExpandedEvent>(
            r#"
            SELECT id, event_type, event_key, occurred_at, payload, lead_id,
                   lead_name, lead_email, lead_phone_e164, lead_utm_source,
                   lead_utm_campaign, lead_quality::text AS lead_quality
            FROM lead_events_live_expanded
            WHERE occurred_at >= $1
            ORDER BY occurred_at DESC
            LIMIT $2
            "#,
        )
        .bind(from)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .context("loading lead_events_live_expanded window")
    }

    async fn search_leads(
        &self,
        query: Option<&str>,
        limit: i64,
    ) -> Result<Vec<LeadSummary>, AppError> {
        let pattern = query
            .map(str::trim)
            .filter(|q| !q.is_empty())
            .map(|q| format!("%{}%", escape_like(q)));

        let sql = format!(
            r#"
            SELECT {} FROM leads_live
            WHERE $1::text IS NULL
               OR email ILIKE $1
               OR phone_e164 ILIKE $1
               OR name ILIKE $1
            ORDER BY created_at DESC
            LIMIT $2
            "#,
            LEAD_SUMMARY_COLUMNS
        );
        sqlx::query_as::<_, LeadSummary>(&sql)
            .bind(pattern)
            .bind(limit)
            .fetch_all(&self.pool)
            .await
            .context("searching leads_live")
    }

    async fn lead_by_id(&self, id: Uuid) -> Result<Option<Lead>, AppError> {
        sqlx::query_as::<_, Lead>(
            r#"
            SELECT id, canonical_id, created_at, updated_at, name, email, phone_e164,
                   rd_lead_id, gclid, utm_source, utm_medium, utm_campaign, utm_content,
                   utm_term, quality::text AS quality, landing_url_first, landing_url_last
            FROM leads
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .with_context(|| format!("loading lead {}", id))
    }

    async fn events_for_lead(&self, id: Uuid, limit: i64) -> Result<Vec<LeadEvent>, AppError> {
        sqlx::query_as::<_, LeadEvent>(
            r#"
            SELECT id, event_type, event_key, occurred_at, payload, lead_id
            FROM lead_events
            WHERE lead_id = $1
            ORDER BY occurred_at DESC
            LIMIT $2
            "#,
        )
        .bind(id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .with_context(|| format!("loading events for lead {}", id))
    }
}
