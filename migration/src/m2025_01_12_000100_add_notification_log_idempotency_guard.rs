//! Adds a unique index over the delivery idempotency key so concurrent
//! workers cannot both insert a log row for the same intended delivery.

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

pub const IDEMPOTENCY_INDEX: &str = "idx_notification_logs_idempotency_key";

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_index(
                Index::create()
                    .name(IDEMPOTENCY_INDEX)
                    .table(NotificationLogs::Table)
                    .col(NotificationLogs::UserId)
                    .col(NotificationLogs::AddressId)
                    .col(NotificationLogs::ScheduledDate)
                    .col(NotificationLogs::NotificationPreferenceId)
                    .unique()
                    .if_not_exists()
                    .to_owned(),
            )
            .await
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_index(
                Index::drop()
                    .name(IDEMPOTENCY_INDEX)
                    .table(NotificationLogs::Table)
                    .to_owned(),
            )
            .await
    }
}

#[derive(DeriveIden)]
enum NotificationLogs {
    Table,
    UserId,
    AddressId,
    ScheduledDate,
    NotificationPreferenceId,
}
