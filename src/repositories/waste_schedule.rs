//! # Waste Schedule Repository
//!
//! Builds a per-date index of which waste types are collected at which
//! (city, street). Rows without a street apply to the whole city.

use std::collections::HashMap;

use chrono::{Datelike, NaiveDate};
use sea_orm::{ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, QueryOrder};
use tracing::{debug, warn};

use crate::error::{PipelineError, map_db_err};
use crate::models::waste_schedule::{Column, Entity};
use crate::models::waste_type;
use crate::notification::WasteTypeRef;

/// Waste types collected on one date, keyed by city and optional street.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CollectionIndex {
    entries: HashMap<(i32, Option<i32>), Vec<WasteTypeRef>>,
}

impl CollectionIndex {
    pub(crate) fn insert(&mut self, city_id: i32, street_id: Option<i32>, waste_type: WasteTypeRef) {
        let entry = self.entries.entry((city_id, street_id)).or_default();
        if !entry
            .iter()
            .any(|existing| existing.waste_type_id == waste_type.waste_type_id)
        {
            entry.push(waste_type);
        }
    }

    /// Street-specific types first, then city-wide ones, without duplicates.
    pub fn waste_types_for(&self, city_id: i32, street_id: i32) -> Vec<WasteTypeRef> {
        let mut types: Vec<WasteTypeRef> = Vec::new();
        let scoped = self.entries.get(&(city_id, Some(street_id)));
        let city_wide = self.entries.get(&(city_id, None));

        for waste_type in scoped.into_iter().chain(city_wide).flatten() {
            if !types
                .iter()
                .any(|existing| existing.waste_type_id == waste_type.waste_type_id)
            {
                types.push(waste_type.clone());
            }
        }
        types
    }
}

/// Repository for read-only schedule lookups
#[derive(Debug, Clone)]
pub struct WasteScheduleRepository {
    db: DatabaseConnection,
}

impl WasteScheduleRepository {
    pub fn new(db: DatabaseConnection) -> Self {
        Self { db }
    }

    /// Index of collections happening on `date`.
    pub async fn collection_index(&self, date: NaiveDate) -> Result<CollectionIndex, PipelineError> {
        let rows = Entity::find()
            .find_also_related(waste_type::Entity)
            .filter(Column::Year.eq(date.year()))
            .filter(Column::Month.eq(date.month().to_string()))
            .order_by_asc(Column::WasteTypeId)
            .all(&self.db)
            .await
            .map_err(|e| map_db_err("load waste schedules", e))?;

        let mut index = CollectionIndex::default();

        for (schedule, waste_type) in rows {
            let Some(days) = schedule.collection_days() else {
                warn!(
                    schedule_id = schedule.id,
                    days = %schedule.days,
                    "Ignoring waste schedule with malformed days"
                );
                continue;
            };
            if !days.contains(&date.day()) {
                continue;
            }
            let Some(waste_type) = waste_type else {
                warn!(schedule_id = schedule.id, "Waste schedule references unknown waste type");
                continue;
            };
            index.insert(
                schedule.city_id,
                schedule.street_id,
                WasteTypeRef {
                    waste_type_id: waste_type.id,
                    waste_type_name: waste_type.name,
                },
            );
        }

        debug!(%date, locations = index.entries.len(), "Built collection index");
        Ok(index)
    }
}
