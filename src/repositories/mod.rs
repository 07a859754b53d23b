//! # Repository Layer
//!
//! SeaORM access for the tables the reminder pipeline reads and writes.

pub mod notification_log;
pub mod notification_preference;
pub mod waste_schedule;

pub use notification_log::{LogClaim, NewNotificationLog, NotificationLogRepository, StatusUpdate};
pub use notification_preference::{
    DueCandidate, NotificationPreferenceRepository, PreferenceUpdate,
};
pub use waste_schedule::{CollectionIndex, WasteScheduleRepository};
