//! Static schedule snapshot and the store that publishes it.
//!
//! A [`ScheduleSnapshot`] is built wholesale from the six schedule tables and
//! never mutated afterwards. [`ScheduleStore`] hands out `Arc`s to the current
//! snapshot; a refresh builds the replacement off to the side and swaps the
//! reference only once it is complete, so a reader holding an `Arc` sees one
//! consistent schedule for the whole of its computation.

pub mod model;
pub mod time;

use chrono::{DateTime, Duration, NaiveDate, Utc};
use chrono_tz::Tz;
use serde::de::DeserializeOwned;
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::io::Read;
use std::path::Path;
use std::sync::{Arc, RwLock};
use tracing::{debug, info, warn};

use model::{Calendar, CalendarDate, ExceptionType, Route, RouteMode, Stop, StopTime, Trip};
use time::ServiceTime;

/// One scheduled call of a trip at a stop
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScheduledCall {
    pub trip_id: String,
    pub time: ServiceTime,
}

/// First and last scheduled time of a trip, used for "currently running" queries
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TripBounds {
    pub start: ServiceTime,
    pub end: ServiceTime,
    pub route_type: u16,
}

/// The six raw tables, as read from disk
#[derive(Debug, Default)]
pub struct ScheduleTables {
    pub routes: Vec<Route>,
    pub trips: Vec<Trip>,
    pub stops: Vec<Stop>,
    pub stop_times: Vec<StopTime>,
    pub calendar: Vec<Calendar>,
    pub calendar_dates: Vec<CalendarDate>,
}

impl ScheduleTables {
    pub fn read_dir(dir: &Path) -> Result<Self, ScheduleLoadError> {
        let open = |table: &'static str| {
            let path = dir.join(table);
            debug!(path = %path.display(), "Opening schedule table");
            std::fs::File::open(&path).map_err(|e| ScheduleLoadError::Io {
                table,
                message: e.to_string(),
            })
        };

        Ok(Self {
            routes: read_table("routes.txt", open("routes.txt")?)?,
            trips: read_table("trips.txt", open("trips.txt")?)?,
            stops: read_table("stops.txt", open("stops.txt")?)?,
            stop_times: read_table("stop_times.txt", open("stop_times.txt")?)?,
            calendar: read_table("calendar.txt", open("calendar.txt")?)?,
            calendar_dates: read_table("calendar_dates.txt", open("calendar_dates.txt")?)?,
        })
    }
}

/// Deserialize every record of one table; the first bad record fails the table
pub fn read_table<T: DeserializeOwned, R: Read>(
    table: &'static str,
    reader: R,
) -> Result<Vec<T>, ScheduleLoadError> {
    let mut rdr = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .from_reader(reader);

    rdr.deserialize()
        .collect::<Result<Vec<T>, csv::Error>>()
        .map_err(|e| ScheduleLoadError::Csv {
            table,
            message: e.to_string(),
        })
}

/// Immutable, indexed view of one load of the static schedule
#[derive(Debug)]
pub struct ScheduleSnapshot {
    loaded_at: DateTime<Utc>,
    routes: HashMap<String, Route>,
    trips: HashMap<String, Trip>,
    stops: HashMap<String, Stop>,
    calendar: Vec<Calendar>,
    exceptions: HashMap<NaiveDate, Vec<(String, ExceptionType)>>,
    calls_by_stop: HashMap<String, Vec<ScheduledCall>>,
    child_stops: HashMap<String, Vec<String>>,
    stop_routes: HashMap<String, BTreeSet<String>>,
    short_name_routes: HashMap<String, BTreeSet<String>>,
    trip_bounds: HashMap<String, TripBounds>,
}

impl ScheduleSnapshot {
    /// Validate the tables and build every index. Fails on dangling
    /// trip -> route or stop time -> trip references.
    pub fn build(tables: ScheduleTables) -> Result<Self, ScheduleLoadError> {
        let routes: HashMap<String, Route> = tables
            .routes
            .into_iter()
            .map(|route| (route.route_id.clone(), route))
            .collect();

        let mut short_name_routes: HashMap<String, BTreeSet<String>> = HashMap::new();
        for route in routes.values() {
            short_name_routes
                .entry(route.short_name().to_string())
                .or_default()
                .insert(route.route_id.clone());
        }

        let mut trips = HashMap::with_capacity(tables.trips.len());
        for trip in tables.trips {
            if !routes.contains_key(&trip.route_id) {
                return Err(ScheduleLoadError::Validation(format!(
                    "trip {} references unknown route {}",
                    trip.trip_id, trip.route_id
                )));
            }
            trips.insert(trip.trip_id.clone(), trip);
        }

        let stops: HashMap<String, Stop> = tables
            .stops
            .into_iter()
            .map(|stop| (stop.stop_id.clone(), stop))
            .collect();

        let mut child_stops: HashMap<String, Vec<String>> = HashMap::new();
        for stop in stops.values() {
            if let Some(parent) = stop.parent_station.as_ref().filter(|p| !p.is_empty()) {
                child_stops
                    .entry(parent.clone())
                    .or_default()
                    .push(stop.stop_id.clone());
            }
        }
        for children in child_stops.values_mut() {
            children.sort();
        }

        let mut calls_by_stop: HashMap<String, Vec<ScheduledCall>> = HashMap::new();
        let mut stop_routes: HashMap<String, BTreeSet<String>> = HashMap::new();
        let mut trip_bounds: HashMap<String, TripBounds> = HashMap::new();
        let mut unknown_stops = 0usize;

        for stop_time in tables.stop_times {
            let trip = trips.get(&stop_time.trip_id).ok_or_else(|| {
                ScheduleLoadError::Validation(format!(
                    "stop time at {} references unknown trip {}",
                    stop_time.stop_id, stop_time.trip_id
                ))
            })?;

            if !stops.contains_key(&stop_time.stop_id) {
                unknown_stops += 1;
            }

            stop_routes
                .entry(stop_time.stop_id.clone())
                .or_default()
                .insert(trip.route_id.clone());

            let Some(time) = stop_time.arrival_or_departure() else {
                continue;
            };
            let end = stop_time.departure_time.unwrap_or(time).max(time);

            trip_bounds
                .entry(stop_time.trip_id.clone())
                .and_modify(|bounds| {
                    bounds.start = bounds.start.min(time);
                    bounds.end = bounds.end.max(end);
                })
                .or_insert_with(|| TripBounds {
                    start: time,
                    end,
                    route_type: routes[&trip.route_id].route_type,
                });

            calls_by_stop
                .entry(stop_time.stop_id)
                .or_default()
                .push(ScheduledCall {
                    trip_id: stop_time.trip_id,
                    time,
                });
        }

        if unknown_stops > 0 {
            warn!(count = unknown_stops, "Stop times reference stops missing from stops.txt");
        }

        let mut exceptions: HashMap<NaiveDate, Vec<(String, ExceptionType)>> = HashMap::new();
        for exception in tables.calendar_dates {
            exceptions
                .entry(exception.date)
                .or_default()
                .push((exception.service_id, exception.exception_type));
        }

        Ok(Self {
            loaded_at: Utc::now(),
            routes,
            trips,
            stops,
            calendar: tables.calendar,
            exceptions,
            calls_by_stop,
            child_stops,
            stop_routes,
            short_name_routes,
            trip_bounds,
        })
    }

    pub fn load(dir: &Path) -> Result<Self, ScheduleLoadError> {
        let snapshot = Self::build(ScheduleTables::read_dir(dir)?)?;
        info!(
            routes = snapshot.routes.len(),
            trips = snapshot.trips.len(),
            stops = snapshot.stops.len(),
            services = snapshot.calendar.len(),
            "Loaded static schedule"
        );
        Ok(snapshot)
    }

    pub fn loaded_at(&self) -> DateTime<Utc> {
        self.loaded_at
    }

    /// Service ids active on `date`: calendar day-of-week and range
    /// membership, plus "added" exceptions, minus "removed" exceptions.
    /// Removal wins over addition for the same id and date.
    pub fn resolve_service_ids(&self, date: NaiveDate) -> HashSet<String> {
        let mut services: HashSet<String> = self
            .calendar
            .iter()
            .filter(|calendar| calendar.runs_on(date))
            .map(|calendar| calendar.service_id.clone())
            .collect();

        if let Some(exceptions) = self.exceptions.get(&date) {
            for (service_id, kind) in exceptions {
                if *kind == ExceptionType::Added {
                    services.insert(service_id.clone());
                }
            }
            for (service_id, kind) in exceptions {
                if *kind == ExceptionType::Removed {
                    services.remove(service_id);
                }
            }
        }

        services
    }

    /// Distinct routes with at least one trip running on `date`
    pub fn routes_operating_on(&self, date: NaiveDate) -> BTreeSet<String> {
        let services = self.resolve_service_ids(date);
        self.trips
            .values()
            .filter(|trip| services.contains(&trip.service_id))
            .map(|trip| trip.route_id.clone())
            .collect()
    }

    /// Trips in progress at `now` by mode, considering yesterday's service day
    /// for trips running past midnight
    pub fn trips_running_at(&self, now: DateTime<Tz>) -> BTreeMap<RouteMode, usize> {
        let today = now.date_naive();
        let tz = now.timezone();
        let mut running: HashSet<&str> = HashSet::new();
        let mut by_mode: BTreeMap<RouteMode, usize> = BTreeMap::new();

        for service_day in [today - Duration::days(1), today] {
            let services = self.resolve_service_ids(service_day);
            for (trip_id, bounds) in &self.trip_bounds {
                let Some(trip) = self.trips.get(trip_id) else {
                    continue;
                };
                if !services.contains(&trip.service_id) || running.contains(trip_id.as_str()) {
                    continue;
                }
                let (Some(start), Some(end)) = (
                    bounds.start.on_service_day(service_day, &tz),
                    bounds.end.on_service_day(service_day, &tz),
                ) else {
                    continue;
                };
                if start <= now && now <= end {
                    running.insert(trip_id.as_str());
                    *by_mode.entry(RouteMode::from_code(bounds.route_type)).or_default() += 1;
                }
            }
        }

        by_mode
    }

    pub fn routes(&self) -> impl Iterator<Item = &Route> {
        self.routes.values()
    }

    pub fn route(&self, route_id: &str) -> Option<&Route> {
        self.routes.get(route_id)
    }

    pub fn trip(&self, trip_id: &str) -> Option<&Trip> {
        self.trips.get(trip_id)
    }

    pub fn stop(&self, stop_id: &str) -> Option<&Stop> {
        self.stops.get(stop_id)
    }

    pub fn route_mode(&self, route_id: &str) -> Option<RouteMode> {
        self.routes.get(route_id).map(Route::mode)
    }

    pub fn trip_mode(&self, trip_id: &str) -> Option<RouteMode> {
        self.trips
            .get(trip_id)
            .and_then(|trip| self.route_mode(&trip.route_id))
    }

    pub fn headsign(&self, trip_id: &str) -> Option<&str> {
        self.trips
            .get(trip_id)
            .and_then(|trip| trip.trip_headsign.as_deref())
            .filter(|headsign| !headsign.is_empty())
    }

    pub fn calls_at(&self, stop_id: &str) -> &[ScheduledCall] {
        self.calls_by_stop
            .get(stop_id)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn routes_serving_stop(&self, stop_id: &str) -> Option<&BTreeSet<String>> {
        self.stop_routes.get(stop_id)
    }

    pub fn routes_by_short_name(&self, short_name: &str) -> Option<&BTreeSet<String>> {
        self.short_name_routes.get(short_name)
    }

    #[cfg(test)]
    pub fn trip_bounds(&self, trip_id: &str) -> Option<&TripBounds> {
        self.trip_bounds.get(trip_id)
    }

    /// Find a stop by exact id, then exact name (case-insensitive), then the
    /// shortest name containing the query
    pub fn resolve_stop(&self, query: &str) -> Option<&Stop> {
        let query = query.trim();
        if query.is_empty() {
            return None;
        }
        if let Some(stop) = self.stops.get(query) {
            return Some(stop);
        }

        let lowered = query.to_lowercase();
        let mut exact: Option<&Stop> = None;
        let mut partial: Option<&Stop> = None;
        for stop in self.stops.values() {
            let name = stop.name().to_lowercase();
            if name == lowered {
                if exact.map_or(true, |best| stop.stop_id < best.stop_id) {
                    exact = Some(stop);
                }
            } else if name.contains(&lowered) {
                let better = partial.map_or(true, |best| {
                    (stop.name().len(), &stop.stop_id) < (best.name().len(), &best.stop_id)
                });
                if better {
                    partial = Some(stop);
                }
            }
        }

        exact.or(partial)
    }

    /// A station expands to itself plus its platforms, anything else is
    /// returned alone. Unknown ids give an empty list.
    pub fn stop_family(&self, stop_id: &str) -> Vec<String> {
        if !self.stops.contains_key(stop_id) {
            return Vec::new();
        }
        let mut family = vec![stop_id.to_string()];
        if let Some(children) = self.child_stops.get(stop_id) {
            family.extend(children.iter().cloned());
        }
        family
    }
}

/// Shared handle to the current schedule snapshot
#[derive(Debug, Clone)]
pub struct ScheduleStore {
    current: Arc<RwLock<Arc<ScheduleSnapshot>>>,
}

impl ScheduleStore {
    pub fn new(snapshot: ScheduleSnapshot) -> Self {
        Self {
            current: Arc::new(RwLock::new(Arc::new(snapshot))),
        }
    }

    pub fn load(dir: &Path) -> Result<Self, ScheduleLoadError> {
        Ok(Self::new(ScheduleSnapshot::load(dir)?))
    }

    /// Capture the current snapshot. Hold on to the returned `Arc` for the
    /// duration of a computation rather than calling this repeatedly.
    pub fn snapshot(&self) -> Arc<ScheduleSnapshot> {
        // A poisoned lock still guards a complete Arc, either old or new
        match self.current.read() {
            Ok(current) => current.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub fn publish(&self, snapshot: ScheduleSnapshot) -> Arc<ScheduleSnapshot> {
        let snapshot = Arc::new(snapshot);
        match self.current.write() {
            Ok(mut current) => *current = snapshot.clone(),
            Err(poisoned) => *poisoned.into_inner() = snapshot.clone(),
        }
        snapshot
    }

    /// Rebuild from `dir` and publish. On failure the previous snapshot stays
    /// in place and the error is returned.
    pub fn reload(&self, dir: &Path) -> Result<Arc<ScheduleSnapshot>, ScheduleLoadError> {
        let snapshot = ScheduleSnapshot::load(dir)?;
        Ok(self.publish(snapshot))
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ScheduleLoadError {
    #[error("Failed to open {table}: {message}")]
    Io { table: &'static str, message: String },
    #[error("Failed to parse {table}: {message}")]
    Csv { table: &'static str, message: String },
    #[error("Invalid schedule: {0}")]
    Validation(String),
}
