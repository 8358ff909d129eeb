use chrono::{DateTime, NaiveDate};
use chrono_tz::Tz;
use gtfs_realtime::{FeedMessage, VehiclePosition};
use serde::Serialize;
use std::collections::HashSet;
use utoipa::ToSchema;

use crate::schedule::model::RouteMode;
use crate::schedule::ScheduleSnapshot;

/// Counts bucketed into the three reported modes
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, ToSchema)]
pub struct ModeCounts {
    pub rail: usize,
    pub bus: usize,
    pub tram: usize,
}

impl ModeCounts {
    pub fn total(&self) -> usize {
        self.rail + self.bus + self.tram
    }

    /// Ferries, cable cars and the like are not reported
    fn slot(&mut self, mode: RouteMode) -> Option<&mut usize> {
        match mode {
            RouteMode::Rail | RouteMode::Subway | RouteMode::Monorail => Some(&mut self.rail),
            RouteMode::Bus | RouteMode::Trolleybus => Some(&mut self.bus),
            RouteMode::Tram | RouteMode::CableTram => Some(&mut self.tram),
            _ => None,
        }
    }

    pub fn add(&mut self, mode: RouteMode, count: usize) -> bool {
        match self.slot(mode) {
            Some(slot) => {
                *slot += count;
                true
            }
            None => false,
        }
    }
}

/// Stable identity for a position report: vehicle id, label, trip id, route id
fn vehicle_identity(position: &VehiclePosition) -> Option<&str> {
    let vehicle = position.vehicle.as_ref();
    let trip = position.trip.as_ref();
    [
        vehicle.and_then(|v| v.id.as_deref()),
        vehicle.and_then(|v| v.label.as_deref()),
        trip.and_then(|t| t.trip_id.as_deref()),
        trip.and_then(|t| t.route_id.as_deref()),
    ]
    .into_iter()
    .flatten()
    .find(|id| !id.is_empty())
}

fn vehicle_mode(position: &VehiclePosition, snapshot: &ScheduleSnapshot) -> Option<RouteMode> {
    let trip = position.trip.as_ref()?;
    trip.route_id
        .as_deref()
        .and_then(|route_id| snapshot.route_mode(route_id))
        .or_else(|| trip.trip_id.as_deref().and_then(|trip_id| snapshot.trip_mode(trip_id)))
}

/// Distinct vehicles in the position feed by mode. Reports whose mode cannot
/// be resolved are skipped.
pub fn count_active_vehicles(feed: &FeedMessage, snapshot: &ScheduleSnapshot) -> ModeCounts {
    let mut counts = ModeCounts::default();
    let mut seen: HashSet<&str> = HashSet::new();

    for position in feed.entity.iter().filter_map(|entity| entity.vehicle.as_ref()) {
        let Some(identity) = vehicle_identity(position) else {
            continue;
        };
        let Some(mode) = vehicle_mode(position, snapshot) else {
            continue;
        };
        if seen.contains(identity) {
            continue;
        }
        if counts.add(mode, 1) {
            seen.insert(identity);
        }
    }

    counts
}

pub fn count_routes_operating_today(snapshot: &ScheduleSnapshot, date: NaiveDate) -> usize {
    snapshot.routes_operating_on(date).len()
}

/// Scheduled trips in progress at `now`, bucketed like the vehicle counts
pub fn count_trips_running(snapshot: &ScheduleSnapshot, now: DateTime<Tz>) -> ModeCounts {
    let mut counts = ModeCounts::default();
    for (mode, count) in snapshot.trips_running_at(now) {
        counts.add(mode, count);
    }
    counts
}
