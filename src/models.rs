use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::FromRow;
use uuid::Uuid;

// ============ Database Models ============

/// Derived lead quality as maintained by the ingestion procedures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LeadQuality {
    Unknown,
    Low,
    Medium,
    High,
}

impl LeadQuality {
    /// All qualities in display order.
    pub const ALL: [LeadQuality; 4] = [
        LeadQuality::Unknown,
        LeadQuality::Low,
        LeadQuality::Medium,
        LeadQuality::High,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            LeadQuality::Unknown => "unknown",
            LeadQuality::Low => "low",
            LeadQuality::Medium => "medium",
            LeadQuality::High => "high",
        }
    }
}

// Unrecognized values decode as `Unknown` so a new enum label on the
// database side never breaks reads.
impl From<String> for LeadQuality {
    fn from(value: String) -> Self {
        match value.as_str() {
            "low" => LeadQuality::Low,
            "medium" => LeadQuality::Medium,
            "high" => LeadQuality::High,
            _ => LeadQuality::Unknown,
        }
    }
}

/// Canonical lead identity (row of the `leads` table).
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Lead {
    pub id: Uuid,
    /// Set when this lead was merged into another one.
    pub canonical_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub name: Option<String>,
    pub email: Option<String>,
    /// Phone in E.164 format.
    pub phone_e164: Option<String>,
    /// RD Station lead identifier.
    pub rd_lead_id: Option<String>,
    pub gclid: Option<String>,
    pub utm_source: Option<String>,
    pub utm_medium: Option<String>,
    pub utm_campaign: Option<String>,
    pub utm_content: Option<String>,
    pub utm_term: Option<String>,
    #[sqlx(try_from = "String")]
    pub quality: LeadQuality,
    pub landing_url_first: Option<String>,
    pub landing_url_last: Option<String>,
}

/// Row of the `leads_live` view (canonical leads only).
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct LeadSummary {
    pub id: Uuid,
    pub canonical_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub name: Option<String>,
    pub email: Option<String>,
    pub phone_e164: Option<String>,
    pub utm_source: Option<String>,
    pub utm_campaign: Option<String>,
    #[sqlx(try_from = "String")]
    pub quality: LeadQuality,
}

/// Append-only ingestion record (row of `lead_events`).
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct LeadEvent {
    pub id: Uuid,
    pub event_type: String,
    pub event_key: String,
    pub occurred_at: DateTime<Utc>,
    pub payload: Value,
    pub lead_id: Uuid,
}

/// Row of `lead_events_live_expanded`: an event joined with its canonical lead.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct ExpandedEvent {
    pub id: Uuid,
    pub event_type: String,
    pub event_key: String,
    pub occurred_at: DateTime<Utc>,
    pub payload: Value,
    pub lead_id: Uuid,
    pub lead_name: Option<String>,
    pub lead_email: Option<String>,
    pub lead_phone_e164: Option<String>,
    pub lead_utm_source: Option<String>,
    pub lead_utm_campaign: Option<String>,
    pub lead_quality: Option<String>,
}

impl ExpandedEvent {
    pub fn is_whatsapp_click(&self) -> bool {
        self.event_type == EVENT_WHATSAPP_CLICK
    }

    pub fn is_rd_event(&self) -> bool {
        self.event_type == EVENT_RD
    }

    /// An RD Station event whose `rd_event_type` is `conversion`.
    pub fn is_conversion(&self) -> bool {
        self.is_rd_event()
            && self.payload.get("rd_event_type").and_then(Value::as_str) == Some("conversion")
    }
}

pub const EVENT_WHATSAPP_CLICK: &str = "whatsapp_click";
pub const EVENT_WHATSAPP_MESSAGE: &str = "whatsapp_message";
pub const EVENT_RD: &str = "rd_event";

/// Result row returned by every ingestion procedure.
#[derive(Debug, Clone, Copy, Default, FromRow, Serialize, Deserialize, PartialEq, Eq)]
pub struct IngestOutcome {
    pub lead_id: Option<Uuid>,
    pub inserted: bool,
}

// ============ API Models ============

#[derive(Debug, Serialize)]
pub struct LeadDetail {
    pub lead: Lead,
    pub events: Vec<LeadEvent>,
}

#[derive(Debug, Deserialize)]
pub struct LeadListParams {
    pub q: Option<String>,
}
