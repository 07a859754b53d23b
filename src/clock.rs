//! Central European wall-clock mapping for the matcher.
//!
//! Preferences store delivery times as local Polish hours. A [`LocalClock`]
//! turns a UTC instant into the local hour plus the local `today` and
//! `tomorrow` dates used as collection targets.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Datelike, NaiveDate, Timelike, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};

use crate::notification::NotificationPhase;

/// Configurable selection of the clock strategy.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClockMode {
    /// IANA `Europe/Warsaw` rules, including exact DST transitions
    #[default]
    EuropeWarsaw,
    /// +2h for April through October, +1h otherwise; dates stay in UTC
    MonthHeuristic,
}

impl fmt::Display for ClockMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ClockMode::EuropeWarsaw => f.write_str("europe_warsaw"),
            ClockMode::MonthHeuristic => f.write_str("month_heuristic"),
        }
    }
}

impl FromStr for ClockMode {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "europe_warsaw" | "tz" => Ok(ClockMode::EuropeWarsaw),
            "month_heuristic" | "heuristic" => Ok(ClockMode::MonthHeuristic),
            other => Err(format!("unknown clock mode '{other}'")),
        }
    }
}

/// Local time slot evaluated by one matcher tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeSlot {
    pub local_hour: u32,
    pub local_minute: u32,
    pub today: NaiveDate,
    pub tomorrow: NaiveDate,
}

impl TimeSlot {
    /// Collection date targeted by a notification phase.
    pub fn target_date(&self, phase: NotificationPhase) -> NaiveDate {
        match phase {
            NotificationPhase::DayBefore => self.tomorrow,
            NotificationPhase::SameDay => self.today,
        }
    }
}

/// Maps UTC instants onto Central European wall-clock time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LocalClock {
    Zoned(Tz),
    MonthHeuristic,
}

impl LocalClock {
    pub fn from_mode(mode: ClockMode) -> Self {
        match mode {
            ClockMode::EuropeWarsaw => LocalClock::Zoned(chrono_tz::Europe::Warsaw),
            ClockMode::MonthHeuristic => LocalClock::MonthHeuristic,
        }
    }

    pub fn slot(&self, now: DateTime<Utc>) -> TimeSlot {
        let (local_hour, local_minute, today) = match self {
            LocalClock::Zoned(tz) => {
                let local = now.with_timezone(tz);
                (local.hour(), local.minute(), local.date_naive())
            }
            LocalClock::MonthHeuristic => {
                let offset = if (3..=9).contains(&now.month0()) { 2 } else { 1 };
                ((now.hour() + offset) % 24, now.minute(), now.date_naive())
            }
        };

        TimeSlot {
            local_hour,
            local_minute,
            today,
            tomorrow: today.succ_opt().unwrap_or(today),
        }
    }
}

impl Default for LocalClock {
    fn default() -> Self {
        Self::from_mode(ClockMode::default())
    }
}
