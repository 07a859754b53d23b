//! # Notification Log Repository
//!
//! Create, update and natural-key lookup for `notification_logs`. The
//! idempotency key is backed by a unique index, so concurrent workers racing
//! on the same delivery resolve through [`LogClaim`] instead of inserting
//! duplicate rows.

use chrono::{Duration, Utc};
use sea_orm::sea_query::Expr;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, IntoActiveModel, QueryFilter,
    Set,
};
use tracing::{debug, info, instrument};

use crate::error::{PipelineError, is_unique_violation, map_db_err, to_db_time};
use crate::gateway::SmsReceipt;
use crate::models::notification_log::{ActiveModel, Column, Entity, LogStatus, Model};
use crate::notification::DeliveryKey;

/// Values for a new pending log row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewNotificationLog {
    pub key: DeliveryKey,
    pub waste_type_ids: Vec<i32>,
    pub phone_number: String,
    pub sms_content: String,
}

/// Outcome of trying to claim a delivery by inserting its pending row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogClaim {
    /// The caller owns the row and may call the gateway
    Claimed(Model),
    /// An effective row already exists for the key
    AlreadyDelivered(Model),
    /// Another worker holds a fresh pending row for the key
    InFlight(Model),
}

/// Optional provider fields written together with a status change.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StatusUpdate {
    pub provider_message_id: Option<String>,
    pub provider_status: Option<String>,
    pub message_parts: Option<i32>,
    pub error_message: Option<String>,
    pub delivered_at: Option<chrono::DateTime<Utc>>,
}

/// Repository for notification log rows
#[derive(Debug, Clone)]
pub struct NotificationLogRepository {
    db: DatabaseConnection,
}

impl NotificationLogRepository {
    pub fn new(db: DatabaseConnection) -> Self {
        Self { db }
    }

    /// Looks up the row for an idempotency key, whatever its status.
    pub async fn find_by_key(&self, key: &DeliveryKey) -> Result<Option<Model>, PipelineError> {
        Entity::find()
            .filter(Column::UserId.eq(key.user_id.as_str()))
            .filter(Column::AddressId.eq(key.address_id))
            .filter(Column::ScheduledDate.eq(scheduled_date_string(key)))
            .filter(Column::NotificationPreferenceId.eq(key.notification_preference_id))
            .one(&self.db)
            .await
            .map_err(|e| map_db_err("find notification log by key", e))
    }

    pub async fn find_by_id(&self, id: i32) -> Result<Option<Model>, PipelineError> {
        Entity::find_by_id(id)
            .one(&self.db)
            .await
            .map_err(|e| map_db_err("find notification log", e))
    }

    /// Inserts a pending row for the delivery, or resolves the conflict with
    /// an existing row. A `pending` row older than `stale_after`, or a
    /// `failed` row, is reclaimed with a compare-and-set on `attempts`.
    #[instrument(skip_all, fields(user_id = %new.key.user_id, address_id = new.key.address_id))]
    pub async fn create_pending(
        &self,
        new: NewNotificationLog,
        stale_after: Duration,
    ) -> Result<LogClaim, PipelineError> {
        let now = to_db_time(Utc::now());
        let row = ActiveModel {
            user_id: Set(new.key.user_id.clone()),
            address_id: Set(new.key.address_id),
            notification_preference_id: Set(new.key.notification_preference_id),
            waste_type_ids: Set(serde_json::to_string(&new.waste_type_ids)?),
            scheduled_date: Set(scheduled_date_string(&new.key)),
            phone_number: Set(new.phone_number.clone()),
            sms_content: Set(new.sms_content.clone()),
            status: Set(LogStatus::Pending.to_string()),
            provider_message_id: Set(None),
            provider_status: Set(None),
            message_parts: Set(None),
            attempts: Set(1),
            error_message: Set(None),
            sent_at: Set(None),
            delivered_at: Set(None),
            created_at: Set(now),
            updated_at: Set(now),
            ..Default::default()
        };

        match row.insert(&self.db).await {
            Ok(model) => {
                debug!(log_id = model.id, "Pending notification log created");
                Ok(LogClaim::Claimed(model))
            }
            Err(err) if is_unique_violation(&err) => {
                debug!("Notification log already exists for key");
                self.resolve_conflict(new, stale_after).await
            }
            Err(err) => Err(map_db_err("insert pending notification log", err)),
        }
    }

    async fn resolve_conflict(
        &self,
        new: NewNotificationLog,
        stale_after: Duration,
    ) -> Result<LogClaim, PipelineError> {
        let Some(existing) = self.find_by_key(&new.key).await? else {
            return Err(PipelineError::Database {
                context: "load conflicting notification log",
                source: sea_orm::DbErr::RecordNotFound(
                    "notification log vanished after unique violation".to_string(),
                ),
            });
        };

        let status = existing.log_status();
        if status.is_effective() {
            return Ok(LogClaim::AlreadyDelivered(existing));
        }

        let now = Utc::now();
        let last_touched = existing.updated_at.with_timezone(&Utc);
        // A window reaching past the representable range never goes stale.
        let fresh = now
            .checked_sub_signed(stale_after)
            .is_none_or(|cutoff| last_touched > cutoff);
        if status == LogStatus::Pending && fresh {
            return Ok(LogClaim::InFlight(existing));
        }

        let result = Entity::update_many()
            .col_expr(Column::Status, Expr::value(LogStatus::Pending.as_str()))
            .col_expr(Column::Attempts, Expr::col(Column::Attempts).add(1))
            .col_expr(Column::SmsContent, Expr::value(new.sms_content.clone()))
            .col_expr(Column::PhoneNumber, Expr::value(new.phone_number.clone()))
            .col_expr(
                Column::WasteTypeIds,
                Expr::value(serde_json::to_string(&new.waste_type_ids)?),
            )
            .col_expr(Column::ErrorMessage, Expr::value(Option::<String>::None))
            .col_expr(Column::UpdatedAt, Expr::value(to_db_time(now)))
            .filter(Column::Id.eq(existing.id))
            .filter(Column::Attempts.eq(existing.attempts))
            .filter(Column::Status.eq(existing.status.as_str()))
            .exec(&self.db)
            .await
            .map_err(|e| map_db_err("reclaim notification log", e))?;

        if result.rows_affected == 0 {
            debug!(log_id = existing.id, "Lost reclaim race for notification log");
            return Ok(LogClaim::InFlight(existing));
        }

        let reclaimed = self
            .find_by_id(existing.id)
            .await?
            .ok_or(PipelineError::MissingLog(existing.id))?;
        info!(
            log_id = reclaimed.id,
            attempts = reclaimed.attempts,
            previous_status = %status,
            "Reclaimed notification log"
        );
        Ok(LogClaim::Claimed(reclaimed))
    }

    /// Records a successful gateway call.
    pub async fn mark_sent(&self, id: i32, receipt: &SmsReceipt) -> Result<Model, PipelineError> {
        self.update_status(
            id,
            LogStatus::Sent,
            StatusUpdate {
                provider_message_id: Some(receipt.message_id.clone()),
                provider_status: Some(receipt.status.clone()),
                message_parts: Some(receipt.parts as i32),
                ..Default::default()
            },
        )
        .await
    }

    /// Records a failed gateway call.
    pub async fn mark_failed(&self, id: i32, error: &str) -> Result<Model, PipelineError> {
        self.update_status(
            id,
            LogStatus::Failed,
            StatusUpdate {
                error_message: Some(error.to_string()),
                ..Default::default()
            },
        )
        .await
    }

    /// Sets the status and any provided provider fields. `sent_at` is stamped
    /// on the transition to `sent`; `error_message` is cleared unless given.
    pub async fn update_status(
        &self,
        id: i32,
        status: LogStatus,
        update: StatusUpdate,
    ) -> Result<Model, PipelineError> {
        let existing = self
            .find_by_id(id)
            .await?
            .ok_or(PipelineError::MissingLog(id))?;

        let now = to_db_time(Utc::now());
        let mut active = existing.into_active_model();
        active.status = Set(status.to_string());
        active.error_message = Set(update.error_message);
        if let Some(message_id) = update.provider_message_id {
            active.provider_message_id = Set(Some(message_id));
        }
        if let Some(provider_status) = update.provider_status {
            active.provider_status = Set(Some(provider_status));
        }
        if let Some(parts) = update.message_parts {
            active.message_parts = Set(Some(parts));
        }
        if status == LogStatus::Sent {
            active.sent_at = Set(Some(now));
        }
        if let Some(delivered_at) = update.delivered_at {
            active.delivered_at = Set(Some(to_db_time(delivered_at)));
        }
        active.updated_at = Set(now);

        active
            .update(&self.db)
            .await
            .map_err(|e| map_db_err("update notification log status", e))
    }
}

fn scheduled_date_string(key: &DeliveryKey) -> String {
    key.scheduled_date.format("%Y-%m-%d").to_string()
}
