use chrono::{Datelike, Timelike, Weekday};
use serde::Serialize;
use std::fmt;
use utoipa::ToSchema;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum ServicePeriod {
    Overnight,
    Peak,
    OffPeakWeekday,
    OffPeakEvening,
    NightLink,
    Weekend,
}

impl ServicePeriod {
    pub fn label(self) -> &'static str {
        match self {
            ServicePeriod::Overnight => "Overnight",
            ServicePeriod::Peak => "Peak",
            ServicePeriod::OffPeakWeekday => "Off-peak (weekday)",
            ServicePeriod::OffPeakEvening => "Off-peak (evening)",
            ServicePeriod::NightLink => "NightLink",
            ServicePeriod::Weekend => "Weekend",
        }
    }
}

impl fmt::Display for ServicePeriod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Half-open `[start, end)` minute-of-day range on the listed days
struct Band {
    days: &'static [Weekday],
    start: u32,
    end: u32,
    period: ServicePeriod,
}

const WEEKDAYS: &[Weekday] = &[
    Weekday::Mon,
    Weekday::Tue,
    Weekday::Wed,
    Weekday::Thu,
    Weekday::Fri,
];
const WEEKEND: &[Weekday] = &[Weekday::Sat, Weekday::Sun];

const fn hm(hours: u32, minutes: u32) -> u32 {
    hours * 60 + minutes
}

/// First matching band wins. NightLink goes first: Friday and Saturday
/// nights from 23:00 through 06:00 the next morning.
const BANDS: &[Band] = &[
    Band { days: &[Weekday::Fri, Weekday::Sat], start: hm(23, 0), end: hm(24, 0), period: ServicePeriod::NightLink },
    Band { days: WEEKEND, start: hm(0, 0), end: hm(6, 0), period: ServicePeriod::NightLink },
    Band { days: WEEKEND, start: hm(6, 0), end: hm(19, 0), period: ServicePeriod::Weekend },
    Band { days: WEEKEND, start: hm(19, 0), end: hm(22, 0), period: ServicePeriod::OffPeakEvening },
    Band { days: WEEKEND, start: hm(22, 0), end: hm(24, 0), period: ServicePeriod::Overnight },
    Band { days: WEEKDAYS, start: hm(0, 0), end: hm(6, 0), period: ServicePeriod::Overnight },
    Band { days: WEEKDAYS, start: hm(6, 0), end: hm(9, 0), period: ServicePeriod::Peak },
    Band { days: WEEKDAYS, start: hm(9, 0), end: hm(15, 30), period: ServicePeriod::OffPeakWeekday },
    Band { days: WEEKDAYS, start: hm(15, 30), end: hm(18, 30), period: ServicePeriod::Peak },
    Band { days: WEEKDAYS, start: hm(18, 30), end: hm(22, 0), period: ServicePeriod::OffPeakEvening },
    Band { days: WEEKDAYS, start: hm(22, 0), end: hm(24, 0), period: ServicePeriod::Overnight },
];

fn band_for(weekday: Weekday, minute_of_day: u32) -> Option<ServicePeriod> {
    BANDS
        .iter()
        .find(|band| {
            band.days.contains(&weekday) && band.start <= minute_of_day && minute_of_day < band.end
        })
        .map(|band| band.period)
}

/// Service period for a local wall-clock time
pub fn period_for<T: Datelike + Timelike>(now: &T) -> ServicePeriod {
    band_for(now.weekday(), now.hour() * 60 + now.minute()).unwrap_or(ServicePeriod::Overnight)
}
