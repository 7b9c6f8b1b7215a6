//! Dashboard aggregates computed from a time window of leads and events.

use chrono::{DateTime, Duration, FixedOffset, NaiveTime, TimeZone, Utc};
use serde::{Serialize, Serializer};
use std::collections::HashMap;

use crate::errors::AppError;
use crate::models::{ExpandedEvent, LeadQuality, LeadSummary};
use crate::realtime::RealtimeState;

/// Maximum number of sources listed in `conversions_by_source`.
const TOP_SOURCES: usize = 8;

/// Dashboard window: today, last 7 days, or last 30 days.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(into = "u32")]
pub enum Period {
    Today,
    Week,
    Month,
}

impl Period {
    pub fn parse(raw: Option<&str>) -> Result<Self, AppError> {
        match raw.map(str::trim) {
            None | Some("") | Some("7") => Ok(Period::Week),
            Some("1") => Ok(Period::Today),
            Some("30") => Ok(Period::Month),
            Some(_) => Err(AppError::Validation("invalid_period")),
        }
    }

    pub fn days(self) -> u32 {
        match self {
            Period::Today => 1,
            Period::Week => 7,
            Period::Month => 30,
        }
    }
}

impl From<Period> for u32 {
    fn from(period: Period) -> u32 {
        period.days()
    }
}

/// Local midnight `days - 1` days before `now`'s local date.
pub fn window_start(now: DateTime<Utc>, period: Period, offset: FixedOffset) -> DateTime<Utc> {
    let today = now.with_timezone(&offset).date_naive();
    let first_day = today - Duration::days(i64::from(period.days()) - 1);
    offset
        .from_local_datetime(&first_day.and_time(NaiveTime::MIN))
        .single()
        .map(|dt| dt.with_timezone(&Utc))
        // Fixed offsets have no gaps, so the local time always maps
        .unwrap_or(now)
}

/// Percentage rounded to one decimal; a whole number prints without `.0`.
pub fn pct(numerator: usize, denominator: usize) -> String {
    format!("{}%", rate(numerator, denominator))
}

fn rate(numerator: usize, denominator: usize) -> f64 {
    if denominator == 0 {
        return 0.0;
    }
    (numerator as f64 / denominator as f64 * 1000.0).round() / 10.0
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct Kpis {
    pub leads_total: usize,
    pub whatsapp_clicks: usize,
    pub rd_events: usize,
    pub conversions: usize,
    /// Conversions over WhatsApp clicks, e.g. `"12.5%"`.
    pub conversion_rate: String,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct DailyLeads {
    /// `dd/MM` in the dashboard's local time.
    pub day: String,
    pub leads: usize,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct QualityCount {
    pub name: LeadQuality,
    pub value: usize,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct SourceConversions {
    pub source: String,
    pub clicks: usize,
    pub conversions: usize,
    #[serde(serialize_with = "serialize_rate")]
    pub rate: f64,
}

/// Whole percentages go out as integers (`100`, not `100.0`), the same
/// number `pct` prints.
fn serialize_rate<S: Serializer>(rate: &f64, serializer: S) -> Result<S::Ok, S::Error> {
    if rate.fract() == 0.0 && *rate >= 0.0 && *rate <= u64::MAX as f64 {
        serializer.serialize_u64(*rate as u64)
    } else {
        serializer.serialize_f64(*rate)
    }
}

#[derive(Debug, Serialize)]
pub struct DashboardOverview {
    pub period: Period,
    pub from: DateTime<Utc>,
    pub kpis: Kpis,
    pub daily_leads: Vec<DailyLeads>,
    pub quality: Vec<QualityCount>,
    pub conversions_by_source: Vec<SourceConversions>,
    pub feed: Vec<ExpandedEvent>,
    pub realtime: RealtimeState,
}

pub fn kpis(leads: &[LeadSummary], events: &[ExpandedEvent]) -> Kpis {
    let whatsapp_clicks = events.iter().filter(|e| e.is_whatsapp_click()).count();
    let rd_events = events.iter().filter(|e| e.is_rd_event()).count();
    let conversions = events.iter().filter(|e| e.is_conversion()).count();

    Kpis {
        leads_total: leads.len(),
        whatsapp_clicks,
        rd_events,
        conversions,
        conversion_rate: pct(conversions, whatsapp_clicks),
    }
}

/// One bucket per local day of the window, oldest first.
pub fn daily_leads(
    leads: &[LeadSummary],
    now: DateTime<Utc>,
    period: Period,
    offset: FixedOffset,
) -> Vec<DailyLeads> {
    let today = now.with_timezone(&offset).date_naive();
    let days = i64::from(period.days());

    let mut series: Vec<DailyLeads> = (0..days)
        .map(|i| DailyLeads {
            day: (today - Duration::days(days - 1 - i)).format("%d/%m").to_string(),
            leads: 0,
        })
        .collect();

    for lead in leads {
        let key = lead.created_at.with_timezone(&offset).format("%d/%m").to_string();
        if let Some(bucket) = series.iter_mut().find(|b| b.day == key) {
            bucket.leads += 1;
        }
    }

    series
}

/// Lead counts for every quality level, in display order.
pub fn quality_breakdown(leads: &[LeadSummary]) -> Vec<QualityCount> {
    LeadQuality::ALL
        .iter()
        .map(|quality| QualityCount {
            name: *quality,
            value: leads.iter().filter(|l| l.quality == *quality).count(),
        })
        .collect()
}

/// Clicks and conversions grouped by the lead's UTM source, busiest first.
pub fn conversions_by_source(events: &[ExpandedEvent]) -> Vec<SourceConversions> {
    let mut order: Vec<String> = Vec::new();
    let mut by_source: HashMap<String, (usize, usize)> = HashMap::new();

    for event in events {
        let source = event
            .lead_utm_source
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .unwrap_or("unknown")
            .to_string();

        let entry = by_source.entry(source.clone()).or_insert_with(|| {
            order.push(source);
            (0, 0)
        });
        if event.is_whatsapp_click() {
            entry.0 += 1;
        }
        if event.is_conversion() {
            entry.1 += 1;
        }
    }

    let mut rows: Vec<SourceConversions> = order
        .into_iter()
        .map(|source| {
            let (clicks, conversions) = by_source[&source];
            SourceConversions {
                source,
                clicks,
                conversions,
                rate: rate(conversions, clicks),
            }
        })
        .collect();

    // Stable: ties keep first-seen order
    rows.sort_by(|a, b| b.clicks.cmp(&a.clicks));
    rows.truncate(TOP_SOURCES);
    rows
}

pub fn build_overview(
    period: Period,
    now: DateTime<Utc>,
    offset: FixedOffset,
    leads: Vec<LeadSummary>,
    feed: Vec<ExpandedEvent>,
    realtime: RealtimeState,
) -> DashboardOverview {
    DashboardOverview {
        period,
        from: window_start(now, period, offset),
        kpis: kpis(&leads, &feed),
        daily_leads: daily_leads(&leads, now, period, offset),
        quality: quality_breakdown(&leads),
        conversions_by_source: conversions_by_source(&feed),
        feed,
        realtime,
    }
}
