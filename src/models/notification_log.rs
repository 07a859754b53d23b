//! Notification log entity model
//!
//! Audit and idempotency record for one intended SMS delivery. The tuple
//! (user_id, address_id, scheduled_date, notification_preference_id) is
//! unique.

use std::fmt;
use std::str::FromStr;

use sea_orm::entity::prelude::*;

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
#[sea_orm(table_name = "notification_logs")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i32,

    pub user_id: String,

    pub address_id: i32,

    pub notification_preference_id: i32,

    /// JSON array of waste type ids included in the message
    pub waste_type_ids: String,

    /// ISO date (YYYY-MM-DD) of the collection itself
    pub scheduled_date: String,

    pub phone_number: String,

    pub sms_content: String,

    /// See [`LogStatus`]
    pub status: String,

    /// Gateway message id ("queued" for async gateway acceptance)
    pub provider_message_id: Option<String>,

    /// Gateway status string
    pub provider_status: Option<String>,

    pub message_parts: Option<i32>,

    /// Number of delivery attempts recorded against this row
    pub attempts: i32,

    pub error_message: Option<String>,

    pub sent_at: Option<DateTimeWithTimeZone>,

    pub delivered_at: Option<DateTimeWithTimeZone>,

    pub created_at: DateTimeWithTimeZone,

    pub updated_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}

impl Model {
    /// Parsed status; unknown values are treated as failed.
    pub fn log_status(&self) -> LogStatus {
        self.status.parse().unwrap_or(LogStatus::Failed)
    }

    /// True when the row represents a fulfilled delivery.
    pub fn is_effective(&self) -> bool {
        self.log_status().is_effective()
    }
}

/// Lifecycle of a notification log row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LogStatus {
    Pending,
    Sent,
    Failed,
    /// Reserved for a delivery-report webhook
    Delivered,
}

impl LogStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogStatus::Pending => "pending",
            LogStatus::Sent => "sent",
            LogStatus::Failed => "failed",
            LogStatus::Delivered => "delivered",
        }
    }

    pub fn is_effective(&self) -> bool {
        matches!(self, LogStatus::Sent | LogStatus::Delivered)
    }
}

impl fmt::Display for LogStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LogStatus {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "pending" => Ok(LogStatus::Pending),
            "sent" => Ok(LogStatus::Sent),
            "failed" => Ok(LogStatus::Failed),
            "delivered" => Ok(LogStatus::Delivered),
            other => Err(format!("unknown notification log status '{other}'")),
        }
    }
}
