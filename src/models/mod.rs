//! # Data Models
//!
//! SeaORM entities for the tables the reminder pipeline reads and writes.

pub mod address;
pub mod city;
pub mod notification_log;
pub mod notification_preference;
pub mod queue_message;
pub mod street;
pub mod user;
pub mod waste_schedule;
pub mod waste_type;

pub use address::Entity as Address;
pub use city::Entity as City;
pub use notification_log::Entity as NotificationLog;
pub use notification_preference::Entity as NotificationPreference;
pub use queue_message::Entity as QueueMessage;
pub use street::Entity as Street;
pub use user::Entity as User;
pub use waste_schedule::Entity as WasteSchedule;
pub use waste_type::Entity as WasteType;
