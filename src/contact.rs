//! Contact normalization applied before payloads reach the ingestion
//! procedures, so identity matching sees one spelling per phone and email.

use phonenumber::country::Id as CountryId;
use phonenumber::Mode;
use regex::Regex;
use std::sync::LazyLock;

// RFC 5322 simplified: local@domain.tld
static EMAIL_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^[a-zA-Z0-9.!#$%&'*+/=?^_`{|}~-]+@[a-zA-Z0-9](?:[a-zA-Z0-9-]{0,61}[a-zA-Z0-9])?(?:\.[a-zA-Z0-9](?:[a-zA-Z0-9-]{0,61}[a-zA-Z0-9])?)+$",
    )
    .expect("email regex is valid")
});

/// Checks the basic shape of an email address.
pub fn is_valid_email(email: &str) -> bool {
    if email.len() < 5 || !email.contains('@') || !email.contains('.') {
        return false;
    }
    EMAIL_REGEX.is_match(email)
}

/// Validate and normalize a Brazilian phone number to E.164.
///
/// Numbers without a country code are parsed as Brazilian
/// (`11987654321` → `+5511987654321`). Returns `None` when the input does
/// not parse or is not a valid number.
pub fn normalize_br_phone(raw: &str) -> Option<String> {
    let raw = raw.trim();
    if raw.len() < 8 {
        return None;
    }

    match phonenumber::parse(Some(CountryId::BR), raw) {
        Ok(number) if phonenumber::is_valid(&number) => {
            let formatted = number.format().mode(Mode::E164).to_string();
            tracing::debug!("Normalized phone {} -> {}", raw, formatted);
            Some(formatted)
        }
        Ok(_) => {
            tracing::debug!("Phone is not a valid number: {}", raw);
            None
        }
        Err(e) => {
            tracing::debug!("Failed to parse phone '{}': {:?}", raw, e);
            None
        }
    }
}

/// Trimmed value, with blank strings collapsed to `None`.
pub fn non_blank(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

/// Phone as forwarded to the ingestion procedures: E.164 when it parses,
/// the trimmed raw value otherwise.
pub fn phone_for_ingest(raw: Option<&str>) -> Option<String> {
    let raw = non_blank(raw)?;
    match normalize_br_phone(&raw) {
        Some(e164) => Some(e164),
        None => {
            tracing::warn!("Forwarding unrecognized phone format unchanged");
            Some(raw)
        }
    }
}

/// Email as forwarded to the ingestion procedures: lower-cased when well
/// formed, the trimmed raw value otherwise.
pub fn email_for_ingest(raw: Option<&str>) -> Option<String> {
    let raw = non_blank(raw)?;
    if is_valid_email(&raw) {
        Some(raw.to_lowercase())
    } else {
        tracing::warn!("Forwarding malformed email unchanged");
        Some(raw)
    }
}
