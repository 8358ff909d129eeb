use chrono::{DateTime, Duration, NaiveDate, TimeZone};
use serde::{de, Deserialize, Deserializer};
use std::fmt;

/// Offset into a service day as published in stop_times.txt.
///
/// Hours may run past 23 so a service day's tail after midnight keeps the
/// date it started on, eg. "25:10:00" is 01:10 the following morning.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Ord, PartialOrd)]
pub struct ServiceTime {
    seconds_since_midnight: u32,
}

impl ServiceTime {
    pub fn from_hms(hours: u32, minutes: u32, seconds: u32) -> ServiceTime {
        ServiceTime {
            seconds_since_midnight: (hours * 60 + minutes) * 60 + seconds,
        }
    }

    #[cfg(test)]
    pub fn seconds(self) -> u32 {
        self.seconds_since_midnight
    }

    /// Instant this offset lands on when the service day starts at local
    /// midnight of `service_date`. `None` only when midnight itself does not
    /// exist in `tz`.
    pub fn on_service_day<Tz: TimeZone>(self, service_date: NaiveDate, tz: &Tz) -> Option<DateTime<Tz>> {
        let midnight = service_date.and_hms_opt(0, 0, 0)?;
        let anchor = tz.from_local_datetime(&midnight).earliest()?;
        Some(anchor + Duration::seconds(i64::from(self.seconds_since_midnight)))
    }
}

impl fmt::Debug for ServiceTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

impl fmt::Display for ServiceTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = self.seconds_since_midnight;
        write!(f, "{:02}:{:02}:{:02}", s / 3600, (s / 60) % 60, s % 60)
    }
}

/// Accepts "h:mm:ss" and "hh:mm:ss" (leading whitespace tolerated, some
/// feeds pad single digit hours with a space)
impl std::str::FromStr for ServiceTime {
    type Err = TimeParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let mut parts = s.split(':');
        let (hh, mm, ss) = match (parts.next(), parts.next(), parts.next(), parts.next()) {
            (Some(hh), Some(mm), Some(ss), None) => (hh, mm, ss),
            _ => return Err(TimeParseError::InvalidFormat(s.to_string())),
        };
        if hh.is_empty() || hh.len() > 3 || mm.len() != 2 || ss.len() != 2 {
            return Err(TimeParseError::InvalidFormat(s.to_string()));
        }
        let hours: u32 = hh.parse().map_err(|_| TimeParseError::InvalidFormat(s.to_string()))?;
        let minutes: u32 = mm.parse().map_err(|_| TimeParseError::InvalidFormat(s.to_string()))?;
        let seconds: u32 = ss.parse().map_err(|_| TimeParseError::InvalidFormat(s.to_string()))?;
        if seconds > 59 || minutes > 59 {
            return Err(TimeParseError::OutOfRange(s.to_string()));
        }
        Ok(ServiceTime::from_hms(hours, minutes, seconds))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TimeParseError {
    #[error("time should use format eg. 23:59:59, got {0:?}")]
    InvalidFormat(String),
    #[error("maximum minutes or seconds is 59, got {0:?}")]
    OutOfRange(String),
}

impl<'de> Deserialize<'de> for ServiceTime {
    fn deserialize<D>(deserializer: D) -> Result<ServiceTime, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(de::Error::custom)
    }
}

/// calendar.txt / calendar_dates.txt dates, YYYYMMDD
pub mod gtfs_date {
    use chrono::NaiveDate;
    use serde::{de, Deserialize, Deserializer};

    pub fn parse(s: &str) -> Option<NaiveDate> {
        NaiveDate::parse_from_str(s.trim(), "%Y%m%d").ok()
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<NaiveDate, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        parse(&s).ok_or_else(|| de::Error::custom(format!("invalid date {:?}, expected YYYYMMDD", s)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Timelike;

    #[test]
    fn parse_and_to_string() {
        assert_eq!("00:00:00".parse::<ServiceTime>().unwrap().to_string(), "00:00:00");
        assert_eq!("23:59:59".parse::<ServiceTime>().unwrap().to_string(), "23:59:59");
        assert_eq!("24:00:00".parse::<ServiceTime>().unwrap().to_string(), "24:00:00");
        assert_eq!("25:10:00".parse::<ServiceTime>().unwrap().to_string(), "25:10:00");
        assert_eq!("5:00:00".parse::<ServiceTime>().unwrap().to_string(), "05:00:00");
        assert_eq!(" 5:00:00".parse::<ServiceTime>().unwrap().seconds(), 5 * 3600);
    }

    #[test]
    fn invalid_parses() {
        assert!("".parse::<ServiceTime>().is_err());
        assert!("%%:%%:%%".parse::<ServiceTime>().is_err());
        assert!("00:00:0".parse::<ServiceTime>().is_err());
        assert!("00:00:000".parse::<ServiceTime>().is_err());
        assert!("00:00:60".parse::<ServiceTime>().is_err());
        assert!("00:60:00".parse::<ServiceTime>().is_err());
        assert!("00100100".parse::<ServiceTime>().is_err());
        assert!("01:00:00:00".parse::<ServiceTime>().is_err());
    }

    #[test]
    fn past_midnight_lands_on_next_calendar_day() {
        let tz = chrono_tz::Australia::Brisbane;
        let day = NaiveDate::from_ymd_opt(2026, 3, 6).unwrap();
        let instant = "25:10:00"
            .parse::<ServiceTime>()
            .unwrap()
            .on_service_day(day, &tz)
            .unwrap();
        assert_eq!(instant.date_naive(), NaiveDate::from_ymd_opt(2026, 3, 7).unwrap());
        assert_eq!((instant.hour(), instant.minute()), (1, 10));
    }

    #[test]
    fn gtfs_dates() {
        assert_eq!(gtfs_date::parse("20260307"), NaiveDate::from_ymd_opt(2026, 3, 7));
        assert_eq!(gtfs_date::parse("2026-03-07"), None);
    }
}
