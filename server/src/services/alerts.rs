//! Alert classification.
//!
//! [`classify`] reduces one alert, seen from one route at one instant, to a
//! single [`AlertClass`]. Structured active periods are preferred; alerts
//! published without any fall back to a date found in their text.

use chrono::{DateTime, Datelike, Duration, NaiveDate};
use chrono_tz::Tz;
use gtfs_realtime::alert::Effect;
use gtfs_realtime::{Alert, EntitySelector, FeedMessage, TimeRange, TranslatedString};
use lazy_static::lazy_static;
use regex::Regex;
use serde::Serialize;
use std::collections::{BTreeSet, HashMap, HashSet};
use utoipa::ToSchema;

use crate::schedule::ScheduleSnapshot;

const UPCOMING_HORIZON_DAYS: i64 = 7;
/// Text dates further back than this are taken to mean next year
const YEAR_ROLLOVER_DAYS: i64 = 180;

const CLOSURE_KEYWORDS: &[&str] = &[
    "track closure",
    "no trains",
    "no train services",
    "bus replacement",
    "buses replace trains",
    "rail replacement",
    "no services",
];

const CLOSURE_EFFECTS: &[Effect] = &[Effect::NoService, Effect::Detour];

lazy_static! {
    static ref TEXT_DATE: Regex = Regex::new(
        r"\b(\d{1,2})(?:st|nd|rd|th)?\s+(Jan(?:uary)?|Feb(?:ruary)?|Mar(?:ch)?|Apr(?:il)?|May|June?|July?|Aug(?:ust)?|Sep(?:t(?:ember)?)?|Oct(?:ober)?|Nov(?:ember)?|Dec(?:ember)?|JAN(?:UARY)?|FEB(?:RUARY)?|MAR(?:CH)?|APR(?:IL)?|MAY|JUNE?|JULY?|AUG(?:UST)?|SEP(?:T(?:EMBER)?)?|OCT(?:OBER)?|NOV(?:EMBER)?|DEC(?:EMBER)?)\b(?:\s+(\d{4}))?"
    )
    .unwrap();
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum AlertClass {
    Unknown,
    Active,
    Upcoming,
    Closure,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Timing {
    Active,
    Upcoming,
    None,
}

/// English translation if one is tagged, else the first one, else ""
fn translated(text: Option<&TranslatedString>) -> &str {
    let Some(text) = text else {
        return "";
    };
    text.translation
        .iter()
        .find(|t| {
            t.language
                .as_deref()
                .is_some_and(|lang| lang.eq_ignore_ascii_case("en") || lang.to_ascii_lowercase().starts_with("en-"))
        })
        .or_else(|| text.translation.first())
        .map(|t| t.text.as_str())
        .unwrap_or("")
}

pub fn header_text(alert: &Alert) -> &str {
    translated(alert.header_text.as_ref())
}

pub fn description_text(alert: &Alert) -> &str {
    translated(alert.description_text.as_ref())
}

/// Header and description joined, the description dropped when it only
/// repeats the header
pub fn combined_text(alert: &Alert) -> String {
    let header = header_text(alert);
    let description = description_text(alert);
    if description.is_empty() || description == header {
        header.to_string()
    } else if header.is_empty() {
        description.to_string()
    } else {
        format!("{} {}", header, description)
    }
}

/// Header, or the description when there is no header. `None` when both are empty.
pub fn reason(alert: &Alert) -> Option<String> {
    let header = header_text(alert).trim();
    let text = if header.is_empty() {
        description_text(alert).trim()
    } else {
        header
    };
    (!text.is_empty()).then(|| text.to_string())
}

/// An alert that names routes only applies to those routes. Alerts that name
/// no route at all (network-wide, stop-only) apply everywhere they are routed.
fn applies_to_route(alert: &Alert, route_id: &str) -> bool {
    let mut names_routes = false;
    for entity in &alert.informed_entity {
        let trip_route = entity.trip.as_ref().and_then(|trip| trip.route_id.as_deref());
        for candidate in [entity.route_id.as_deref(), trip_route].into_iter().flatten() {
            names_routes = true;
            if candidate == route_id {
                return true;
            }
        }
    }
    !names_routes
}

/// Some producers send 0 for an absent bound
fn bound(value: Option<u64>) -> Option<i64> {
    value
        .filter(|v| *v > 0)
        .map(|v| i64::try_from(v).unwrap_or(i64::MAX))
}

fn structured_timing(periods: &[TimeRange], now: DateTime<Tz>) -> Timing {
    let now_ts = now.timestamp();
    let horizon = now_ts + UPCOMING_HORIZON_DAYS * 86_400;
    let mut timing = Timing::None;

    for period in periods {
        let start = bound(period.start);
        let end = bound(period.end);

        if end.is_some_and(|end| end < now_ts) {
            continue;
        }
        match start {
            None => return Timing::Active,
            Some(start) if start <= now_ts => return Timing::Active,
            Some(start) if start <= horizon => timing = Timing::Upcoming,
            Some(_) => {}
        }
    }

    timing
}

fn month_number(name: &str) -> Option<u32> {
    let prefix = name.get(..3)?.to_ascii_lowercase();
    let month = match prefix.as_str() {
        "jan" => 1,
        "feb" => 2,
        "mar" => 3,
        "apr" => 4,
        "may" => 5,
        "jun" => 6,
        "jul" => 7,
        "aug" => 8,
        "sep" => 9,
        "oct" => 10,
        "nov" => 11,
        "dec" => 12,
        _ => return None,
    };
    Some(month)
}

/// First "<day> <Month>[ <year>]" in `text` that names a real calendar date.
/// Month names must be capitalised (or all caps), "2 may be" is not a date.
fn date_in_text(text: &str, today: NaiveDate) -> Option<NaiveDate> {
    for captures in TEXT_DATE.captures_iter(text) {
        let Some(day) = captures.get(1).and_then(|m| m.as_str().parse::<u32>().ok()) else {
            continue;
        };
        let Some(month) = captures.get(2).and_then(|m| month_number(m.as_str())) else {
            continue;
        };

        if let Some(year) = captures.get(3).and_then(|m| m.as_str().parse::<i32>().ok()) {
            if let Some(date) = NaiveDate::from_ymd_opt(year, month, day) {
                return Some(date);
            }
            continue;
        }

        let Some(date) = NaiveDate::from_ymd_opt(today.year(), month, day) else {
            continue;
        };
        if date < today - Duration::days(YEAR_ROLLOVER_DAYS) {
            if let Some(next_year) = NaiveDate::from_ymd_opt(today.year() + 1, month, day) {
                return Some(next_year);
            }
            continue;
        }
        return Some(date);
    }
    None
}

fn textual_timing(text: &str, now: DateTime<Tz>) -> Timing {
    let today = now.date_naive();
    match date_in_text(text, today) {
        Some(date) if date <= today => Timing::Active,
        Some(date) if date <= today + Duration::days(UPCOMING_HORIZON_DAYS) => Timing::Upcoming,
        _ => Timing::None,
    }
}

fn is_closure(alert: &Alert, text_lower: &str) -> bool {
    let effect_closes = alert
        .effect
        .is_some_and(|effect| CLOSURE_EFFECTS.iter().any(|e| *e as i32 == effect));
    effect_closes || CLOSURE_KEYWORDS.iter().any(|keyword| text_lower.contains(keyword))
}

/// Classify `alert` for `route_id` at `now`. Total over all inputs.
pub fn classify(alert: &Alert, route_id: &str, now: DateTime<Tz>) -> AlertClass {
    if !applies_to_route(alert, route_id) {
        return AlertClass::Unknown;
    }

    let text = combined_text(alert);
    let timing = if alert.active_period.is_empty() {
        textual_timing(&text, now)
    } else {
        structured_timing(&alert.active_period, now)
    };

    match timing {
        Timing::Active if is_closure(alert, &text.to_lowercase()) => AlertClass::Closure,
        Timing::Active => AlertClass::Active,
        Timing::Upcoming => AlertClass::Upcoming,
        Timing::None => AlertClass::Unknown,
    }
}

/// Copy of `alert` that also names every route in `routes` directly, so
/// [`classify`] applies it to each route it was fanned out to
fn naming_routes(alert: &Alert, routes: &BTreeSet<&str>) -> Alert {
    let mut resolved = alert.clone();
    let named: HashSet<String> = alert
        .informed_entity
        .iter()
        .filter_map(|selector| selector.route_id.clone())
        .collect();
    for route_id in routes {
        if !named.contains(*route_id) {
            resolved.informed_entity.push(EntitySelector {
                route_id: Some(route_id.to_string()),
                ..Default::default()
            });
        }
    }
    resolved
}

/// Route id -> alerts affecting it. Trip references resolve through the
/// schedule and stop-only references reach every route serving that stop.
/// Each alert is listed at most once per route.
pub fn alerts_by_route(feed: &FeedMessage, snapshot: &ScheduleSnapshot) -> HashMap<String, Vec<Alert>> {
    let mut by_route: HashMap<String, Vec<Alert>> = HashMap::new();

    for entity in &feed.entity {
        if entity.is_deleted == Some(true) {
            continue;
        }
        let Some(alert) = &entity.alert else {
            continue;
        };

        let mut routes: BTreeSet<&str> = BTreeSet::new();
        for selector in &alert.informed_entity {
            if let Some(route_id) = selector.route_id.as_deref() {
                routes.insert(route_id);
            }
            if let Some(route_id) = selector.trip.as_ref().and_then(|trip| trip.route_id.as_deref()) {
                routes.insert(route_id);
            }
            if let Some(trip_route) = selector
                .trip
                .as_ref()
                .and_then(|trip| trip.trip_id.as_deref())
                .and_then(|trip_id| snapshot.trip(trip_id))
            {
                routes.insert(trip_route.route_id.as_str());
            }
            if let Some(serving) = selector
                .stop_id
                .as_deref()
                .and_then(|stop_id| snapshot.routes_serving_stop(stop_id))
            {
                routes.extend(serving.iter().map(String::as_str));
            }
        }

        if routes.is_empty() {
            continue;
        }
        let resolved = naming_routes(alert, &routes);
        for route_id in routes {
            by_route
                .entry(route_id.to_string())
                .or_default()
                .push(resolved.clone());
        }
    }

    by_route
}

#[cfg(test)]
pub mod test_alerts {
    use gtfs_realtime::translated_string::Translation;
    use gtfs_realtime::{Alert, EntitySelector, TimeRange, TranslatedString};

    pub fn en(text: &str) -> TranslatedString {
        TranslatedString {
            translation: vec![Translation {
                text: text.to_string(),
                language: Some("en".to_string()),
            }],
        }
    }

    pub fn alert(header: &str, description: &str, routes: &[&str], window: Option<(i64, Option<i64>)>) -> Alert {
        Alert {
            header_text: Some(en(header)),
            description_text: Some(en(description)),
            informed_entity: routes
                .iter()
                .map(|route_id| EntitySelector {
                    route_id: Some(route_id.to_string()),
                    ..Default::default()
                })
                .collect(),
            active_period: window
                .map(|(start, end)| TimeRange {
                    start: Some(start as u64),
                    end: end.map(|end| end as u64),
                })
                .into_iter()
                .collect(),
            ..Default::default()
        }
    }
}
