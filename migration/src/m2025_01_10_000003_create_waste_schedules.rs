//! Migration to create the waste_types and waste_schedules tables.
//!
//! `waste_schedules.days` holds a JSON array of day-of-month integers and
//! `month` is stored as a decimal string ("1" through "12").

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(WasteTypes::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(WasteTypes::Id)
                            .integer()
                            .not_null()
                            .auto_increment()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(WasteTypes::Name).text().not_null())
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                Table::create()
                    .table(WasteSchedules::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(WasteSchedules::Id)
                            .integer()
                            .not_null()
                            .auto_increment()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(WasteSchedules::CityId).integer().not_null())
                    .col(ColumnDef::new(WasteSchedules::StreetId).integer().null())
                    .col(
                        ColumnDef::new(WasteSchedules::WasteTypeId)
                            .integer()
                            .not_null(),
                    )
                    .col(ColumnDef::new(WasteSchedules::Year).integer().not_null())
                    .col(ColumnDef::new(WasteSchedules::Month).text().not_null())
                    .col(ColumnDef::new(WasteSchedules::Days).text().not_null())
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_waste_schedules_city_id")
                            .from(WasteSchedules::Table, WasteSchedules::CityId)
                            .to(Cities::Table, Cities::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_waste_schedules_waste_type_id")
                            .from(WasteSchedules::Table, WasteSchedules::WasteTypeId)
                            .to(WasteTypes::Table, WasteTypes::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_waste_schedules_year_month")
                    .table(WasteSchedules::Table)
                    .col(WasteSchedules::Year)
                    .col(WasteSchedules::Month)
                    .to_owned(),
            )
            .await
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(WasteSchedules::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(WasteTypes::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum WasteTypes {
    Table,
    Id,
    Name,
}

#[derive(DeriveIden)]
enum WasteSchedules {
    Table,
    Id,
    CityId,
    StreetId,
    WasteTypeId,
    Year,
    Month,
    Days,
}

#[derive(DeriveIden)]
enum Cities {
    Table,
    Id,
}
