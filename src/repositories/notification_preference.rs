//! # Notification Preference Repository
//!
//! Reads the matcher's candidate set and manages the per-address preference
//! pair (one `day_before`, one `same_day`).

use chrono::Utc;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, FromQueryResult,
    IntoActiveModel, JoinType, QueryFilter, QueryOrder, QuerySelect, RelationTrait, Set,
    TransactionTrait,
};
use tracing::{debug, info};

use crate::error::{PipelineError, map_db_err, to_db_time};
use crate::models::notification_preference::{ActiveModel, Column, Entity, Model, Relation};
use crate::models::{address, city, street, user};
use crate::notification::NotificationPhase;

/// Default evening reminder hour for `day_before`.
pub const DEFAULT_DAY_BEFORE_HOUR: i32 = 19;
/// Default morning reminder hour for `same_day`.
pub const DEFAULT_SAME_DAY_HOUR: i32 = 7;

/// One enabled preference joined with its user and fully located address.
#[derive(Debug, Clone, PartialEq, Eq, FromQueryResult)]
pub struct DueCandidate {
    pub preference_id: i32,
    pub notification_type: String,
    pub user_id: String,
    pub phone: String,
    pub address_id: i32,
    pub city_id: i32,
    pub street_id: i32,
    pub city_name: String,
    pub street_name: String,
}

/// Partial update of a preference. `None` leaves a field unchanged.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PreferenceUpdate {
    pub hour: Option<i32>,
    pub minute: Option<i32>,
    pub enabled: Option<bool>,
}

impl PreferenceUpdate {
    fn validate(&self) -> Result<(), PipelineError> {
        if let Some(hour) = self.hour
            && !(0..=23).contains(&hour)
        {
            return Err(PipelineError::InvalidPreference(format!(
                "hour must be between 0 and 23, got {hour}"
            )));
        }
        if let Some(minute) = self.minute
            && !(0..=59).contains(&minute)
        {
            return Err(PipelineError::InvalidPreference(format!(
                "minute must be between 0 and 59, got {minute}"
            )));
        }
        Ok(())
    }
}

/// Repository for notification preferences
#[derive(Debug, Clone)]
pub struct NotificationPreferenceRepository {
    db: DatabaseConnection,
}

impl NotificationPreferenceRepository {
    pub fn new(db: DatabaseConnection) -> Self {
        Self { db }
    }

    /// Enabled preferences for `hour` whose user has a phone and whose address
    /// has both a city and a street.
    pub async fn find_due_candidates(&self, hour: u32) -> Result<Vec<DueCandidate>, PipelineError> {
        let candidates = Entity::find()
            .select_only()
            .column_as(Column::Id, "preference_id")
            .column(Column::NotificationType)
            .column(Column::UserId)
            .column_as(user::Column::Phone, "phone")
            .column_as(address::Column::Id, "address_id")
            .column_as(address::Column::CityId, "city_id")
            .column_as(address::Column::StreetId, "street_id")
            .column_as(city::Column::Name, "city_name")
            .column_as(street::Column::Name, "street_name")
            .join(JoinType::InnerJoin, Relation::User.def())
            .join(JoinType::InnerJoin, Relation::Address.def())
            .join(JoinType::InnerJoin, address::Relation::City.def())
            .join(JoinType::InnerJoin, address::Relation::Street.def())
            .filter(Column::Enabled.eq(true))
            .filter(Column::Hour.eq(hour as i32))
            .filter(user::Column::Phone.is_not_null())
            .order_by_asc(Column::Id)
            .into_model::<DueCandidate>()
            .all(&self.db)
            .await
            .map_err(|e| map_db_err("find due notification candidates", e))?;

        debug!(hour, count = candidates.len(), "Loaded notification candidates");
        Ok(candidates)
    }

    /// Creates the default pair for a new address: `day_before` at 19:00 and
    /// `same_day` at 07:00, both enabled.
    pub async fn create_defaults(
        &self,
        user_id: &str,
        address_id: i32,
    ) -> Result<Vec<Model>, PipelineError> {
        let now = to_db_time(Utc::now());
        let txn = self
            .db
            .begin()
            .await
            .map_err(|e| map_db_err("begin default preferences transaction", e))?;

        let mut created = Vec::with_capacity(2);
        for (phase, hour) in [
            (NotificationPhase::DayBefore, DEFAULT_DAY_BEFORE_HOUR),
            (NotificationPhase::SameDay, DEFAULT_SAME_DAY_HOUR),
        ] {
            let row = ActiveModel {
                user_id: Set(user_id.to_string()),
                address_id: Set(address_id),
                notification_type: Set(phase.to_string()),
                hour: Set(hour),
                minute: Set(0),
                enabled: Set(true),
                created_at: Set(now),
                updated_at: Set(now),
                ..Default::default()
            };
            created.push(
                row.insert(&txn)
                    .await
                    .map_err(|e| map_db_err("insert default preference", e))?,
            );
        }

        txn.commit()
            .await
            .map_err(|e| map_db_err("commit default preferences", e))?;

        info!(user_id, address_id, "Default notification preferences created");
        Ok(created)
    }

    pub async fn update(&self, id: i32, update: PreferenceUpdate) -> Result<Model, PipelineError> {
        update.validate()?;

        let existing = Entity::find_by_id(id)
            .one(&self.db)
            .await
            .map_err(|e| map_db_err("find notification preference", e))?
            .ok_or_else(|| {
                PipelineError::InvalidPreference(format!("notification preference {id} not found"))
            })?;

        let mut active = existing.into_active_model();
        if let Some(hour) = update.hour {
            active.hour = Set(hour);
        }
        if let Some(minute) = update.minute {
            active.minute = Set(minute);
        }
        if let Some(enabled) = update.enabled {
            active.enabled = Set(enabled);
        }
        active.updated_at = Set(to_db_time(Utc::now()));

        active
            .update(&self.db)
            .await
            .map_err(|e| map_db_err("update notification preference", e))
    }

    pub async fn list_for_user(&self, user_id: &str) -> Result<Vec<Model>, PipelineError> {
        Entity::find()
            .filter(Column::UserId.eq(user_id))
            .order_by_asc(Column::AddressId)
            .order_by_asc(Column::Id)
            .all(&self.db)
            .await
            .map_err(|e| map_db_err("list notification preferences", e))
    }
}
