//! Next departures at a set of stops: the published schedule, with live trip
//! updates laid over it where they match a scheduled call.

use chrono::{DateTime, Duration, TimeZone, Utc};
use chrono_tz::Tz;
use gtfs_realtime::trip_update::StopTimeUpdate;
use gtfs_realtime::FeedMessage;
use lazy_static::lazy_static;
use regex::Regex;
use std::collections::{HashMap, HashSet};
use tracing::{debug, warn};

use crate::providers::gtfs_rt::{FeedClient, FeedKind};
use crate::schedule::ScheduleSnapshot;

pub const PLATFORM_PLACEHOLDER: &str = "-";
const DEFAULT_ROUTE_COLOR: &str = "FFFFFF";
const DEFAULT_HEADSIGN: &str = "Unknown destination";

lazy_static! {
    static ref PLATFORM_LABEL: Regex = Regex::new(r"(?i)\b(?:platform|stop)\s+([A-Za-z0-9]+)").unwrap();
    static ref TRAILING_NUMBER: Regex = Regex::new(r"\b(\d+[A-Za-z]?)\s*$").unwrap();
}

/// Platform or stop letter taken from a stop's display name
pub fn platform_label(stop_name: &str) -> String {
    PLATFORM_LABEL
        .captures(stop_name)
        .or_else(|| TRAILING_NUMBER.captures(stop_name))
        .and_then(|captures| captures.get(1))
        .map(|m| m.as_str().to_string())
        .unwrap_or_else(|| PLATFORM_PLACEHOLDER.to_string())
}

#[derive(Debug, Clone, PartialEq)]
pub struct DepartureRecord {
    pub trip_id: String,
    pub stop_id: String,
    pub route_id: String,
    pub route_short_name: String,
    pub route_color: String,
    pub headsign: String,
    pub platform: String,
    pub scheduled: DateTime<Tz>,
    pub eta: DateTime<Tz>,
    pub realtime: bool,
}

impl DepartureRecord {
    /// Whole minutes behind (positive) or ahead of schedule, realtime only
    pub fn delay_minutes(&self) -> Option<i64> {
        self.realtime
            .then(|| (self.eta - self.scheduled).num_seconds().div_euclid(60))
    }
}

/// Scheduled calls at `stop_ids` from now on, keyed by (trip, stop).
///
/// Each call is anchored on both yesterday's and today's service day so a
/// trip published as "24:30:00" under yesterday's calendar still appears
/// after midnight. When both anchors land in the future the earlier wins.
pub fn scheduled_departures(
    snapshot: &ScheduleSnapshot,
    stop_ids: &[String],
    now: DateTime<Tz>,
) -> HashMap<(String, String), DepartureRecord> {
    let tz = now.timezone();
    let today = now.date_naive();
    let mut records: HashMap<(String, String), DepartureRecord> = HashMap::new();

    for service_day in [today - Duration::days(1), today] {
        let services = snapshot.resolve_service_ids(service_day);

        for stop_id in stop_ids {
            let platform = snapshot
                .stop(stop_id)
                .map(|stop| platform_label(stop.name()))
                .unwrap_or_else(|| PLATFORM_PLACEHOLDER.to_string());

            for call in snapshot.calls_at(stop_id) {
                let Some(trip) = snapshot.trip(&call.trip_id) else {
                    continue;
                };
                if !services.contains(&trip.service_id) {
                    continue;
                }
                let Some(at) = call.time.on_service_day(service_day, &tz) else {
                    continue;
                };
                if at < now {
                    continue;
                }

                let key = (call.trip_id.clone(), stop_id.clone());
                if records.get(&key).is_some_and(|existing| existing.scheduled <= at) {
                    continue;
                }

                let route = snapshot.route(&trip.route_id);
                records.insert(
                    key,
                    DepartureRecord {
                        trip_id: call.trip_id.clone(),
                        stop_id: stop_id.clone(),
                        route_id: trip.route_id.clone(),
                        route_short_name: route
                            .map(|r| r.short_name().to_string())
                            .unwrap_or_else(|| trip.route_id.clone()),
                        route_color: route
                            .and_then(|r| r.route_color.clone())
                            .filter(|c| !c.is_empty())
                            .unwrap_or_else(|| DEFAULT_ROUTE_COLOR.to_string()),
                        headsign: snapshot
                            .headsign(&call.trip_id)
                            .unwrap_or(DEFAULT_HEADSIGN)
                            .to_string(),
                        platform: platform.clone(),
                        scheduled: at,
                        eta: at,
                        realtime: false,
                    },
                );
            }
        }
    }

    records
}

/// Arrival instant of an update, departure when no arrival time is given
fn update_instant(update: &StopTimeUpdate) -> Option<i64> {
    update
        .arrival
        .as_ref()
        .and_then(|event| event.time)
        .or_else(|| update.departure.as_ref().and_then(|event| event.time))
        .filter(|t| *t > 0)
}

/// Overwrite ETAs from a trip update feed. Only records already in the
/// baseline are touched; updates in the past are ignored.
pub fn apply_trip_updates(
    records: &mut HashMap<(String, String), DepartureRecord>,
    feed: &FeedMessage,
    now: DateTime<Tz>,
) -> usize {
    let tz = now.timezone();
    let stops: HashSet<String> = records.keys().map(|(_, stop_id)| stop_id.clone()).collect();
    let mut applied = 0;

    for trip_update in feed.entity.iter().filter_map(|entity| entity.trip_update.as_ref()) {
        let Some(trip_id) = trip_update.trip.trip_id.as_deref() else {
            continue;
        };

        for update in &trip_update.stop_time_update {
            let Some(stop_id) = update.stop_id.as_deref().filter(|id| stops.contains(*id)) else {
                continue;
            };
            let Some(record) = records.get_mut(&(trip_id.to_string(), stop_id.to_string())) else {
                continue;
            };
            let Some(instant) = update_instant(update) else {
                continue;
            };
            if instant < now.timestamp() {
                continue;
            }
            let Some(eta) = Utc.timestamp_opt(instant, 0).single() else {
                continue;
            };

            record.eta = eta.with_timezone(&tz);
            record.realtime = true;
            applied += 1;
        }
    }

    applied
}

/// Sorted by ETA (ties by scheduled time then trip id) and cut to `count`
pub fn next_departures(
    snapshot: &ScheduleSnapshot,
    stop_ids: &[String],
    count: usize,
    trip_updates: Option<&FeedMessage>,
    now: DateTime<Tz>,
) -> Vec<DepartureRecord> {
    let mut records = scheduled_departures(snapshot, stop_ids, now);
    if let Some(feed) = trip_updates {
        let applied = apply_trip_updates(&mut records, feed, now);
        debug!(applied, baseline = records.len(), "Applied trip updates");
    }

    let mut departures: Vec<DepartureRecord> = records.into_values().collect();
    departures.sort_by(|a, b| {
        a.eta
            .cmp(&b.eta)
            .then_with(|| a.scheduled.cmp(&b.scheduled))
            .then_with(|| a.trip_id.cmp(&b.trip_id))
            .then_with(|| a.stop_id.cmp(&b.stop_id))
    });
    departures.truncate(count);
    departures
}

#[derive(Debug, Clone)]
pub struct DepartureBoard {
    pub departures: Vec<DepartureRecord>,
    pub realtime_available: bool,
    pub generated_at: DateTime<Tz>,
}

/// Fetches the trip update feed per request and reconciles against a
/// schedule snapshot supplied by the caller
#[derive(Debug, Clone)]
pub struct DepartureReconciler {
    feeds: FeedClient,
    timezone: Tz,
}

impl DepartureReconciler {
    pub fn new(feeds: FeedClient, timezone: Tz) -> Self {
        Self { feeds, timezone }
    }

    pub fn now(&self) -> DateTime<Tz> {
        Utc::now().with_timezone(&self.timezone)
    }

    /// Never fails: an unavailable feed gives schedule-only output
    pub async fn board(&self, snapshot: &ScheduleSnapshot, stop_ids: &[String], count: usize) -> DepartureBoard {
        let trip_updates = match self.feeds.fetch(FeedKind::TripUpdates).await {
            Ok(feed) => Some(feed),
            Err(e) => {
                warn!(error = %e, "Trip updates unavailable, using schedule only");
                None
            }
        };

        let now = self.now();
        DepartureBoard {
            departures: next_departures(snapshot, stop_ids, count, trip_updates.as_ref(), now),
            realtime_available: trip_updates.is_some(),
            generated_at: now,
        }
    }
}
