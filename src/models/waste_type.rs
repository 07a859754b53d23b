//! Waste type entity model (e.g. "Bio", "Papier", "Szkło")

use sea_orm::entity::prelude::*;

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
#[sea_orm(table_name = "waste_types")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i32,
    pub name: String,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::waste_schedule::Entity")]
    WasteSchedule,
}

impl Related<super::waste_schedule::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::WasteSchedule.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
