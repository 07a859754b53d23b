//! Queue message entity model
//!
//! Rows of the database-backed delivery queue. `payload` holds a serialized
//! delivery job.

use sea_orm::entity::prelude::*;
use serde_json::Value as JsonValue;
use uuid::Uuid;

pub const STATUS_QUEUED: &str = "queued";
pub const STATUS_IN_FLIGHT: &str = "in_flight";
pub const STATUS_ACKED: &str = "acked";
pub const STATUS_DEAD: &str = "dead";

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
#[sea_orm(table_name = "queue_messages")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,

    /// Logical queue name
    pub queue: String,

    #[sea_orm(column_type = "JsonBinary")]
    pub payload: JsonValue,

    /// queued | in_flight | acked | dead
    pub status: String,

    /// Number of times the message has been received
    pub attempts: i32,

    /// Earliest time the message may be received again
    pub available_at: DateTimeWithTimeZone,

    pub leased_until: Option<DateTimeWithTimeZone>,

    /// Token identifying the current receiver
    pub lease_token: Option<Uuid>,

    pub last_error: Option<String>,

    pub created_at: DateTimeWithTimeZone,

    pub updated_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
