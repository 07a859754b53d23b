//! Delivery job records exchanged between the matcher and the worker.
//!
//! A [`DeliveryJob`] is never persisted as such; it only lives inside queue
//! messages. Field names serialize in camelCase so payloads stay readable
//! from other tooling that inspects the queue.

pub mod content;

use std::fmt;
use std::str::FromStr;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

pub use content::{MessageTemplates, SmsLocale};

/// When a reminder is sent relative to the collection day.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationPhase {
    /// Evening before the collection; the target date is tomorrow
    DayBefore,
    /// Morning of the collection; the target date is today
    SameDay,
}

impl NotificationPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            NotificationPhase::DayBefore => "day_before",
            NotificationPhase::SameDay => "same_day",
        }
    }
}

impl fmt::Display for NotificationPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for NotificationPhase {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "day_before" => Ok(NotificationPhase::DayBefore),
            "same_day" => Ok(NotificationPhase::SameDay),
            other => Err(format!("unknown notification type '{other}'")),
        }
    }
}

/// A waste type collected on the scheduled date.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WasteTypeRef {
    pub waste_type_id: i32,
    pub waste_type_name: String,
}

/// One intended SMS delivery for a user address on a given collection date.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeliveryJob {
    pub user_id: String,
    /// Compact `+48DDDDDDDDD` form
    pub phone: String,
    pub address_id: i32,
    pub city_id: i32,
    pub street_id: i32,
    pub city_name: String,
    pub street_name: String,
    pub notification_preference_id: i32,
    pub notification_type: NotificationPhase,
    pub waste_types: Vec<WasteTypeRef>,
    /// Day the collection takes place
    pub scheduled_date: NaiveDate,
}

impl DeliveryJob {
    /// Idempotency key of the delivery this job describes.
    pub fn key(&self) -> DeliveryKey {
        DeliveryKey {
            user_id: self.user_id.clone(),
            address_id: self.address_id,
            scheduled_date: self.scheduled_date,
            notification_preference_id: self.notification_preference_id,
        }
    }

    pub fn waste_type_ids(&self) -> Vec<i32> {
        self.waste_types.iter().map(|w| w.waste_type_id).collect()
    }

    pub fn waste_type_names(&self) -> Vec<&str> {
        self.waste_types
            .iter()
            .map(|w| w.waste_type_name.as_str())
            .collect()
    }
}

/// (user, address, scheduled date, preference): identifies one intended delivery.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DeliveryKey {
    pub user_id: String,
    pub address_id: i32,
    pub scheduled_date: NaiveDate,
    pub notification_preference_id: i32,
}
