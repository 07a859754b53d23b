//! SMS body rendering.
//!
//! The layout is fixed: lead phrase, parenthesized date, street before city,
//! then the comma-joined waste types. Only the static phrases vary by locale.

use std::fmt;
use std::str::FromStr;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use super::NotificationPhase;

/// Language of the static message text.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SmsLocale {
    #[default]
    Pl,
    En,
}

impl fmt::Display for SmsLocale {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SmsLocale::Pl => f.write_str("pl"),
            SmsLocale::En => f.write_str("en"),
        }
    }
}

impl FromStr for SmsLocale {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "pl" => Ok(SmsLocale::Pl),
            "en" => Ok(SmsLocale::En),
            other => Err(format!("unsupported SMS locale '{other}'")),
        }
    }
}

/// Static phrases used to build a reminder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageTemplates {
    pub day_before_lead: String,
    pub same_day_lead: String,
    pub location_phrase: String,
}

impl MessageTemplates {
    pub fn for_locale(locale: SmsLocale) -> Self {
        match locale {
            SmsLocale::Pl => Self {
                day_before_lead: "Przypomnienie: Jutro".to_string(),
                same_day_lead: "Dzisiaj".to_string(),
                location_phrase: "wywóz śmieci na".to_string(),
            },
            SmsLocale::En => Self {
                day_before_lead: "Reminder: Tomorrow".to_string(),
                same_day_lead: "Today".to_string(),
                location_phrase: "collection at".to_string(),
            },
        }
    }

    /// Renders the reminder body.
    pub fn render<S: AsRef<str>>(
        &self,
        waste_type_names: &[S],
        city_name: &str,
        street_name: &str,
        date: NaiveDate,
        phase: NotificationPhase,
    ) -> String {
        let lead = match phase {
            NotificationPhase::DayBefore => &self.day_before_lead,
            NotificationPhase::SameDay => &self.same_day_lead,
        };
        let types = waste_type_names
            .iter()
            .map(|name| name.as_ref())
            .collect::<Vec<&str>>()
            .join(", ");

        format!(
            "{lead} ({date}) {} {street_name}, {city_name}: {types}.",
            self.location_phrase,
            date = date.format("%Y-%m-%d"),
        )
    }
}

impl Default for MessageTemplates {
    fn default() -> Self {
        Self::for_locale(SmsLocale::default())
    }
}
