//! Records of the static schedule tables. Only the columns this service reads
//! are modelled, unknown columns are ignored.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use super::time::{gtfs_date, ServiceTime};

/// routes.txt
#[derive(Debug, Clone, Deserialize)]
pub struct Route {
    pub route_id: String,
    #[serde(default)]
    pub route_short_name: Option<String>,
    #[serde(default)]
    pub route_long_name: Option<String>,
    #[serde(default)]
    pub route_color: Option<String>,
    pub route_type: u16,
}

impl Route {
    pub fn mode(&self) -> RouteMode {
        RouteMode::from_code(self.route_type)
    }

    pub fn short_name(&self) -> &str {
        self.route_short_name.as_deref().unwrap_or(&self.route_id)
    }

    pub fn long_name(&self) -> &str {
        self.route_long_name.as_deref().unwrap_or("")
    }
}

/// trips.txt
#[derive(Debug, Clone, Deserialize)]
pub struct Trip {
    pub route_id: String,
    pub service_id: String,
    pub trip_id: String,
    #[serde(default)]
    pub trip_headsign: Option<String>,
    #[serde(default)]
    pub direction_id: Option<u8>,
}

/// stops.txt
#[derive(Debug, Clone, Deserialize)]
pub struct Stop {
    pub stop_id: String,
    #[serde(default)]
    pub stop_name: Option<String>,
    #[serde(default)]
    pub parent_station: Option<String>,
}

impl Stop {
    pub fn name(&self) -> &str {
        self.stop_name.as_deref().unwrap_or(&self.stop_id)
    }
}

/// stop_times.txt. Times are empty for non-timepoint stops in some feeds.
#[derive(Debug, Clone, Deserialize)]
pub struct StopTime {
    pub trip_id: String,
    pub stop_id: String,
    #[serde(default)]
    pub arrival_time: Option<ServiceTime>,
    #[serde(default)]
    pub departure_time: Option<ServiceTime>,
}

impl StopTime {
    pub fn arrival_or_departure(&self) -> Option<ServiceTime> {
        self.arrival_time.or(self.departure_time)
    }
}

/// calendar.txt
#[derive(Debug, Clone, Deserialize)]
pub struct Calendar {
    pub service_id: String,
    pub monday: u8,
    pub tuesday: u8,
    pub wednesday: u8,
    pub thursday: u8,
    pub friday: u8,
    pub saturday: u8,
    pub sunday: u8,
    #[serde(with = "gtfs_date")]
    pub start_date: NaiveDate,
    #[serde(with = "gtfs_date")]
    pub end_date: NaiveDate,
}

impl Calendar {
    /// Day-of-week flag plus date range membership
    pub fn runs_on(&self, date: NaiveDate) -> bool {
        use chrono::{Datelike, Weekday};

        let flag = match date.weekday() {
            Weekday::Mon => self.monday,
            Weekday::Tue => self.tuesday,
            Weekday::Wed => self.wednesday,
            Weekday::Thu => self.thursday,
            Weekday::Fri => self.friday,
            Weekday::Sat => self.saturday,
            Weekday::Sun => self.sunday,
        };
        flag == 1 && self.start_date <= date && date <= self.end_date
    }
}

/// calendar_dates.txt
#[derive(Debug, Clone, Deserialize)]
pub struct CalendarDate {
    pub service_id: String,
    #[serde(with = "gtfs_date")]
    pub date: NaiveDate,
    pub exception_type: ExceptionType,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExceptionType {
    Added,
    Removed,
}

impl<'de> Deserialize<'de> for ExceptionType {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        match u8::deserialize(deserializer)? {
            1 => Ok(ExceptionType::Added),
            2 => Ok(ExceptionType::Removed),
            other => Err(serde::de::Error::custom(format!(
                "exception_type must be 1 or 2, got {}",
                other
            ))),
        }
    }
}

/// Vehicle mode derived from route_type, covering both the basic codes and
/// the extended route type ranges
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum RouteMode {
    Tram,
    Subway,
    Rail,
    Bus,
    Ferry,
    CableTram,
    AerialLift,
    Funicular,
    Trolleybus,
    Monorail,
    Other,
}

impl RouteMode {
    pub fn from_code(code: u16) -> RouteMode {
        match code {
            0 => RouteMode::Tram,
            1 => RouteMode::Subway,
            2 => RouteMode::Rail,
            3 => RouteMode::Bus,
            4 => RouteMode::Ferry,
            5 => RouteMode::CableTram,
            6 => RouteMode::AerialLift,
            7 => RouteMode::Funicular,
            11 => RouteMode::Trolleybus,
            12 => RouteMode::Monorail,
            100..=199 => RouteMode::Rail,
            200..=299 | 700..=799 => RouteMode::Bus,
            405 => RouteMode::Monorail,
            400..=499 => RouteMode::Subway,
            800..=899 => RouteMode::Trolleybus,
            900..=999 => RouteMode::Tram,
            1000..=1099 | 1200..=1299 => RouteMode::Ferry,
            1300..=1399 => RouteMode::AerialLift,
            1400..=1499 => RouteMode::Funicular,
            _ => RouteMode::Other,
        }
    }

    /// Heavy rail and metro, the modes that define network termini
    pub fn is_rail(self) -> bool {
        matches!(self, RouteMode::Rail | RouteMode::Subway)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn route_modes_from_basic_and_extended_codes() {
        assert_eq!(RouteMode::from_code(2), RouteMode::Rail);
        assert_eq!(RouteMode::from_code(109), RouteMode::Rail);
        assert_eq!(RouteMode::from_code(3), RouteMode::Bus);
        assert_eq!(RouteMode::from_code(700), RouteMode::Bus);
        assert_eq!(RouteMode::from_code(900), RouteMode::Tram);
        assert_eq!(RouteMode::from_code(4), RouteMode::Ferry);
        assert_eq!(RouteMode::from_code(1700), RouteMode::Other);
        assert!(RouteMode::Subway.is_rail());
        assert!(!RouteMode::Tram.is_rail());
    }

    #[test]
    fn calendar_range_is_inclusive() {
        let calendar = Calendar {
            service_id: "WEEKDAY".to_string(),
            monday: 1,
            tuesday: 1,
            wednesday: 1,
            thursday: 1,
            friday: 1,
            saturday: 0,
            sunday: 0,
            start_date: NaiveDate::from_ymd_opt(2026, 3, 2).unwrap(),
            end_date: NaiveDate::from_ymd_opt(2026, 3, 6).unwrap(),
        };
        assert!(calendar.runs_on(NaiveDate::from_ymd_opt(2026, 3, 2).unwrap()));
        assert!(calendar.runs_on(NaiveDate::from_ymd_opt(2026, 3, 6).unwrap()));
        assert!(!calendar.runs_on(NaiveDate::from_ymd_opt(2026, 3, 7).unwrap()));
        assert!(!calendar.runs_on(NaiveDate::from_ymd_opt(2026, 3, 9).unwrap()));
    }
}
