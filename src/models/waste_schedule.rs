//! Waste schedule entity model
//!
//! One row per (city, optional street, waste type, year, month). The `days`
//! column stores a JSON array of collection days of the month.

use sea_orm::entity::prelude::*;

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
#[sea_orm(table_name = "waste_schedules")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i32,

    pub city_id: i32,

    /// `None` means the row covers every street in the city
    pub street_id: Option<i32>,

    pub waste_type_id: i32,

    pub year: i32,

    /// Month as a decimal string, "1" through "12"
    pub month: String,

    /// JSON-encoded array of day-of-month integers
    pub days: String,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::waste_type::Entity",
        from = "Column::WasteTypeId",
        to = "super::waste_type::Column::Id"
    )]
    WasteType,
    #[sea_orm(
        belongs_to = "super::city::Entity",
        from = "Column::CityId",
        to = "super::city::Column::Id"
    )]
    City,
}

impl Related<super::waste_type::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::WasteType.def()
    }
}

impl Related<super::city::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::City.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}

impl Model {
    /// Parses the `days` column. Returns `None` when the JSON is malformed.
    pub fn collection_days(&self) -> Option<Vec<u32>> {
        serde_json::from_str(&self.days).ok()
    }
}
