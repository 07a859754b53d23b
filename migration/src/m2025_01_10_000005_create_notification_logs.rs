//! Migration to create the notification_logs table.
//!
//! One row per intended delivery. `scheduled_date` is the ISO date of the
//! collection itself, not of the send.

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(NotificationLogs::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(NotificationLogs::Id)
                            .integer()
                            .not_null()
                            .auto_increment()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(NotificationLogs::UserId).text().not_null())
                    .col(
                        ColumnDef::new(NotificationLogs::AddressId)
                            .integer()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(NotificationLogs::NotificationPreferenceId)
                            .integer()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(NotificationLogs::WasteTypeIds)
                            .text()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(NotificationLogs::ScheduledDate)
                            .text()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(NotificationLogs::PhoneNumber)
                            .text()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(NotificationLogs::SmsContent)
                            .text()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(NotificationLogs::Status)
                            .text()
                            .not_null()
                            .default("pending"),
                    )
                    .col(
                        ColumnDef::new(NotificationLogs::ProviderMessageId)
                            .text()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(NotificationLogs::ProviderStatus)
                            .text()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(NotificationLogs::MessageParts)
                            .integer()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(NotificationLogs::Attempts)
                            .integer()
                            .not_null()
                            .default(1),
                    )
                    .col(
                        ColumnDef::new(NotificationLogs::ErrorMessage)
                            .text()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(NotificationLogs::SentAt)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(NotificationLogs::DeliveredAt)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(NotificationLogs::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .col(
                        ColumnDef::new(NotificationLogs::UpdatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_notification_logs_status")
                    .table(NotificationLogs::Table)
                    .col(NotificationLogs::Status)
                    .to_owned(),
            )
            .await
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(NotificationLogs::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum NotificationLogs {
    Table,
    Id,
    UserId,
    AddressId,
    NotificationPreferenceId,
    WasteTypeIds,
    ScheduledDate,
    PhoneNumber,
    SmsContent,
    Status,
    ProviderMessageId,
    ProviderStatus,
    MessageParts,
    Attempts,
    ErrorMessage,
    SentAt,
    DeliveredAt,
    CreatedAt,
    UpdatedAt,
}
