//! Validation and normalization of webhook payloads into ingestion RPC
//! parameters. Dedup and identity merging happen in the database; this
//! module only guarantees the procedures receive well-formed arguments.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};

use crate::contact::{email_for_ingest, non_blank, phone_for_ingest};
use crate::errors::AppError;
use crate::ingest_models::{
    Attribution, RdEventPayload, RdEventRpc, UtmParams, WhatsappClickPayload, WhatsappClickRpc,
    WhatsappMessagePayload, WhatsappMessageRpc,
};

/// Decode a webhook body. Anything that is not a JSON object is
/// `invalid_json`; an object with wrongly typed fields is `invalid_payload`.
pub fn parse_body<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, AppError> {
    let value: Value =
        serde_json::from_slice(bytes).map_err(|_| AppError::Validation("invalid_json"))?;
    if !value.is_object() {
        return Err(AppError::Validation("invalid_json"));
    }
    serde_json::from_value(value).map_err(|e| {
        tracing::debug!("Webhook payload has unexpected field types: {}", e);
        AppError::Validation("invalid_payload")
    })
}

/// Parse an event timestamp to `DateTime<Utc>`.
///
/// Accepts RFC 3339, then `%Y-%m-%d %H:%M:%S%.f %z`, then a naive
/// `%Y-%m-%d %H:%M:%S%.f` interpreted as UTC.
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .or_else(|_| {
            DateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S%.f %z")
                .map(|dt| dt.with_timezone(&Utc))
        })
        .or_else(|_| {
            chrono::NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S%.f")
                .map(|ndt| DateTime::<Utc>::from_naive_utc_and_offset(ndt, Utc))
        })
        .ok()
}

/// Resolve the optional `occurred_at` field, defaulting to `now`.
fn occurred_at(raw: Option<&str>, now: DateTime<Utc>) -> Result<DateTime<Utc>, AppError> {
    match non_blank(raw) {
        None => Ok(now),
        Some(value) => {
            parse_timestamp(&value).ok_or(AppError::Validation("invalid_occurred_at"))
        }
    }
}

/// ISO-8601 UTC with millisecond precision, e.g. `2024-05-01T12:00:00.000Z`.
pub fn iso_millis(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Dedup key for an RD Station event without an upstream `event_id`.
pub fn derive_rd_event_key(rd_lead_id: &str, rd_event_type: &str, occurred_at: &DateTime<Utc>) -> String {
    format!("{}:{}:{}", rd_lead_id, rd_event_type, iso_millis(occurred_at))
}

fn attribution(gclid: Option<&str>, utm: Option<&UtmParams>) -> Attribution {
    let utm = utm.cloned().unwrap_or_default();
    Attribution {
        gclid: non_blank(gclid),
        utm_source: non_blank(utm.utm_source.as_deref()),
        utm_medium: non_blank(utm.utm_medium.as_deref()),
        utm_campaign: non_blank(utm.utm_campaign.as_deref()),
        utm_content: non_blank(utm.utm_content.as_deref()),
        utm_term: non_blank(utm.utm_term.as_deref()),
    }
}

pub fn normalize_whatsapp_click(
    body: WhatsappClickPayload,
    now: DateTime<Utc>,
) -> Result<WhatsappClickRpc, AppError> {
    let event_key =
        non_blank(body.click_id.as_deref()).ok_or(AppError::Validation("click_id_required"))?;
    let occurred_at = occurred_at(body.occurred_at.as_deref(), now)?;

    Ok(WhatsappClickRpc {
        event_key,
        occurred_at,
        name: non_blank(body.name.as_deref()),
        email: email_for_ingest(body.email.as_deref()),
        phone: phone_for_ingest(body.phone.as_deref()),
        rd_lead_id: non_blank(body.rd_lead_id.as_deref()),
        attribution: attribution(body.gclid.as_deref(), body.utm.as_ref()),
        landing_url: non_blank(body.landing_url.as_deref()),
        payload: Value::Object(body.payload.unwrap_or_default()),
    })
}

pub fn normalize_rd_event(body: RdEventPayload, now: DateTime<Utc>) -> Result<RdEventRpc, AppError> {
    let rd_lead_id =
        non_blank(body.rd_lead_id.as_deref()).ok_or(AppError::Validation("rd_lead_id_required"))?;
    let rd_event_type = non_blank(body.rd_event_type.as_deref())
        .ok_or(AppError::Validation("rd_event_type_required"))?;
    let occurred_at = occurred_at(body.occurred_at.as_deref(), now)?;

    let event_key = non_blank(body.event_id.as_deref())
        .unwrap_or_else(|| derive_rd_event_key(&rd_lead_id, &rd_event_type, &occurred_at));

    // The event type travels inside the payload so views can filter on it.
    let mut payload: Map<String, Value> = body.payload.unwrap_or_default();
    payload.insert(
        "rd_event_type".to_string(),
        Value::String(rd_event_type.clone()),
    );

    Ok(RdEventRpc {
        event_key,
        occurred_at,
        rd_event_type,
        name: non_blank(body.name.as_deref()),
        email: email_for_ingest(body.email.as_deref()),
        phone: phone_for_ingest(body.phone.as_deref()),
        rd_lead_id,
        attribution: attribution(body.gclid.as_deref(), body.utm.as_ref()),
        payload: Value::Object(payload),
    })
}

pub fn normalize_whatsapp_message(
    body: WhatsappMessagePayload,
    now: DateTime<Utc>,
) -> Result<WhatsappMessageRpc, AppError> {
    let event_key =
        non_blank(body.message_id.as_deref()).ok_or(AppError::Validation("message_id_required"))?;
    let phone =
        phone_for_ingest(body.phone.as_deref()).ok_or(AppError::Validation("phone_required"))?;
    let occurred_at = occurred_at(body.occurred_at.as_deref(), now)?;

    Ok(WhatsappMessageRpc {
        event_key,
        occurred_at,
        phone,
        name: non_blank(body.name.as_deref()),
        click_id: non_blank(body.click_id.as_deref()),
        payload: Value::Object(body.payload.unwrap_or_default()),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap()
    }

    fn code(err: AppError) -> &'static str {
        match err {
            AppError::Validation(code) => code,
            other => panic!("expected validation error, got {other}"),
        }
    }

    #[test]
    fn test_parse_body_rejects_non_objects() {
        let err = parse_body::<WhatsappClickPayload>(b"{not json").unwrap_err();
        assert_eq!(code(err), "invalid_json");

        let err = parse_body::<WhatsappClickPayload>(b"[1, 2]").unwrap_err();
        assert_eq!(code(err), "invalid_json");

        let err = parse_body::<WhatsappClickPayload>(br#"{"click_id": 42}"#).unwrap_err();
        assert_eq!(code(err), "invalid_payload");
    }

    #[test]
    fn test_parse_timestamp_formats() {
        let expected = Utc.with_ymd_and_hms(2024, 5, 1, 15, 0, 0).unwrap();
        assert_eq!(parse_timestamp("2024-05-01T12:00:00-03:00"), Some(expected));
        assert_eq!(parse_timestamp("2024-05-01 15:00:00 +0000"), Some(expected));
        assert_eq!(parse_timestamp("2024-05-01 15:00:00"), Some(expected));
        assert_eq!(parse_timestamp("yesterday"), None);
    }

    #[test]
    fn test_click_requires_trimmed_click_id() {
        let body = WhatsappClickPayload {
            click_id: Some("   ".to_string()),
            ..Default::default()
        };
        assert_eq!(code(normalize_whatsapp_click(body, now()).unwrap_err()), "click_id_required");
    }

    #[test]
    fn test_click_defaults() {
        let body = WhatsappClickPayload {
            click_id: Some(" click-1 ".to_string()),
            gclid: Some("".to_string()),
            ..Default::default()
        };
        let rpc = normalize_whatsapp_click(body, now()).unwrap();
        assert_eq!(rpc.event_key, "click-1");
        assert_eq!(rpc.occurred_at, now());
        assert_eq!(rpc.attribution, Attribution::default());
        assert_eq!(rpc.payload, json!({}));
    }

    #[test]
    fn test_click_rejects_unparseable_timestamp() {
        let body = WhatsappClickPayload {
            click_id: Some("c".to_string()),
            occurred_at: Some("not a date".to_string()),
            ..Default::default()
        };
        assert_eq!(code(normalize_whatsapp_click(body, now()).unwrap_err()), "invalid_occurred_at");
    }

    #[test]
    fn test_rd_event_validation_order() {
        let err = normalize_rd_event(RdEventPayload::default(), now()).unwrap_err();
        assert_eq!(code(err), "rd_lead_id_required");

        let body = RdEventPayload {
            rd_lead_id: Some("rd_1".to_string()),
            ..Default::default()
        };
        assert_eq!(code(normalize_rd_event(body, now()).unwrap_err()), "rd_event_type_required");
    }

    #[test]
    fn test_rd_event_key_derived_from_identity_and_time() {
        let body = RdEventPayload {
            rd_lead_id: Some("rd_1".to_string()),
            rd_event_type: Some("conversion".to_string()),
            occurred_at: Some("2024-05-01T09:00:00-03:00".to_string()),
            ..Default::default()
        };
        let rpc = normalize_rd_event(body, now()).unwrap();
        assert_eq!(rpc.event_key, "rd_1:conversion:2024-05-01T12:00:00.000Z");
    }

    #[test]
    fn test_rd_event_prefers_upstream_event_id() {
        let body = RdEventPayload {
            rd_lead_id: Some("rd_1".to_string()),
            rd_event_type: Some("conversion".to_string()),
            event_id: Some(" evt-9 ".to_string()),
            ..Default::default()
        };
        assert_eq!(normalize_rd_event(body, now()).unwrap().event_key, "evt-9");
    }

    #[test]
    fn test_rd_event_type_overrides_payload_key() {
        let mut payload = Map::new();
        payload.insert("rd_event_type".to_string(), json!("spoofed"));
        payload.insert("source".to_string(), json!("RD Station"));

        let body = RdEventPayload {
            rd_lead_id: Some("rd_1".to_string()),
            rd_event_type: Some(" conversion ".to_string()),
            payload: Some(payload),
            ..Default::default()
        };
        let rpc = normalize_rd_event(body, now()).unwrap();
        assert_eq!(rpc.payload, json!({"rd_event_type": "conversion", "source": "RD Station"}));
    }

    #[test]
    fn test_message_requires_phone() {
        let body = WhatsappMessagePayload {
            message_id: Some("m1".to_string()),
            ..Default::default()
        };
        assert_eq!(code(normalize_whatsapp_message(body, now()).unwrap_err()), "phone_required");
    }

    #[test]
    fn test_message_normalizes_phone() {
        let body = WhatsappMessagePayload {
            message_id: Some("m1".to_string()),
            phone: Some("(11) 98765-4321".to_string()),
            ..Default::default()
        };
        let rpc = normalize_whatsapp_message(body, now()).unwrap();
        assert_eq!(rpc.phone, "+5511987654321");
        assert_eq!(rpc.click_id, None);
    }
}
