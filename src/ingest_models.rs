use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

/// UTM attribution block shared by the click and RD Station payloads.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct UtmParams {
    pub utm_source: Option<String>,
    pub utm_medium: Option<String>,
    pub utm_campaign: Option<String>,
    pub utm_content: Option<String>,
    pub utm_term: Option<String>,
}

/// Click on a WhatsApp call-to-action, posted by the ad-click redirect.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct WhatsappClickPayload {
    /// Unique click identifier, used as the dedup key.
    pub click_id: Option<String>,
    pub occurred_at: Option<String>,
    pub name: Option<String>,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub rd_lead_id: Option<String>,
    pub gclid: Option<String>,
    pub utm: Option<UtmParams>,
    pub landing_url: Option<String>,
    pub payload: Option<Map<String, Value>>,
}

/// Lead event forwarded from RD Station (conversion, opportunity, ...).
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct RdEventPayload {
    pub rd_lead_id: Option<String>,
    pub rd_event_type: Option<String>,
    pub occurred_at: Option<String>,
    /// Upstream event identifier; a key is derived when absent.
    pub event_id: Option<String>,
    pub name: Option<String>,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub gclid: Option<String>,
    pub utm: Option<UtmParams>,
    pub payload: Option<Map<String, Value>>,
}

/// Inbound WhatsApp message, used to attach a phone number to a click.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct WhatsappMessagePayload {
    pub message_id: Option<String>,
    pub phone: Option<String>,
    pub occurred_at: Option<String>,
    pub name: Option<String>,
    pub click_id: Option<String>,
    pub payload: Option<Map<String, Value>>,
}

/// Normalized UTM values; blank strings are already `None`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Attribution {
    pub gclid: Option<String>,
    pub utm_source: Option<String>,
    pub utm_medium: Option<String>,
    pub utm_campaign: Option<String>,
    pub utm_content: Option<String>,
    pub utm_term: Option<String>,
}

/// Parameters of `ingest_whatsapp_click`.
#[derive(Debug, Clone, PartialEq)]
pub struct WhatsappClickRpc {
    pub event_key: String,
    pub occurred_at: DateTime<Utc>,
    pub name: Option<String>,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub rd_lead_id: Option<String>,
    pub attribution: Attribution,
    pub landing_url: Option<String>,
    pub payload: Value,
}

/// Parameters of `ingest_rd_event`.
#[derive(Debug, Clone, PartialEq)]
pub struct RdEventRpc {
    pub event_key: String,
    pub occurred_at: DateTime<Utc>,
    pub rd_event_type: String,
    pub name: Option<String>,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub rd_lead_id: String,
    pub attribution: Attribution,
    pub payload: Value,
}

/// Parameters of `ingest_whatsapp_message`.
#[derive(Debug, Clone, PartialEq)]
pub struct WhatsappMessageRpc {
    pub event_key: String,
    pub occurred_at: DateTime<Utc>,
    pub phone: String,
    pub name: Option<String>,
    pub click_id: Option<String>,
    pub payload: Value,
}

/// Response body of every ingestion endpoint.
#[derive(Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct IngestResponse {
    pub ok: bool,
    pub lead_id: Option<Uuid>,
    pub inserted: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_click_with_nested_utm() {
        let json = r#"
        {
            "click_id": "abc",
            "phone": "+5511999999999",
            "utm": {"utm_source": "google", "utm_medium": "cpc"},
            "payload": {"any": "extra"}
        }
        "#;

        let body: WhatsappClickPayload = serde_json::from_str(json).unwrap();
        assert_eq!(body.click_id.as_deref(), Some("abc"));
        let utm = body.utm.unwrap();
        assert_eq!(utm.utm_source.as_deref(), Some("google"));
        assert_eq!(utm.utm_campaign, None);
        assert_eq!(body.payload.unwrap()["any"], "extra");
    }

    #[test]
    fn test_unknown_fields_are_ignored() {
        let json = r#"{"rd_lead_id": "rd_1", "rd_event_type": "conversion", "extra": 1}"#;
        let body: RdEventPayload = serde_json::from_str(json).unwrap();
        assert_eq!(body.rd_lead_id.as_deref(), Some("rd_1"));
    }
}
