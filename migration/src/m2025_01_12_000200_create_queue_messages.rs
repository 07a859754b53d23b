//! Migration to create the queue_messages table backing the delivery queue.

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(QueueMessages::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(QueueMessages::Id)
                            .uuid()
                            .not_null()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(QueueMessages::Queue).text().not_null())
                    .col(ColumnDef::new(QueueMessages::Payload).json_binary().not_null())
                    .col(
                        ColumnDef::new(QueueMessages::Status)
                            .text()
                            .not_null()
                            .default("queued"),
                    )
                    .col(
                        ColumnDef::new(QueueMessages::Attempts)
                            .integer()
                            .not_null()
                            .default(0),
                    )
                    .col(
                        ColumnDef::new(QueueMessages::AvailableAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .col(
                        ColumnDef::new(QueueMessages::LeasedUntil)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .col(ColumnDef::new(QueueMessages::LeaseToken).uuid().null())
                    .col(ColumnDef::new(QueueMessages::LastError).text().null())
                    .col(
                        ColumnDef::new(QueueMessages::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .col(
                        ColumnDef::new(QueueMessages::UpdatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .to_owned(),
            )
            .await?;

        // Receive path: claimable messages per queue ordered by availability
        manager
            .create_index(
                Index::create()
                    .name("idx_queue_messages_queue_status_available")
                    .table(QueueMessages::Table)
                    .col(QueueMessages::Queue)
                    .col(QueueMessages::Status)
                    .col(QueueMessages::AvailableAt)
                    .to_owned(),
            )
            .await
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(QueueMessages::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum QueueMessages {
    Table,
    Id,
    Queue,
    Payload,
    Status,
    Attempts,
    AvailableAt,
    LeasedUntil,
    LeaseToken,
    LastError,
    CreatedAt,
    UpdatedAt,
}
