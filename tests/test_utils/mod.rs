//! Test utilities for database testing.
//!
//! In-memory SQLite with all migrations applied, plus fixture inserts for the
//! tables the reminder pipeline reads.

#![allow(dead_code)]

use anyhow::Result;
use chrono::{NaiveDate, Utc};
use migration::{Migrator, MigratorTrait};
use reminders::models::{
    address, city, notification_preference, street, user, waste_schedule, waste_type,
};
use reminders::notification::{DeliveryJob, NotificationPhase, WasteTypeRef};
use sea_orm::{ActiveModelTrait, ConnectionTrait, Database, DatabaseConnection, Set, Statement};

/// Sets up an in-memory SQLite database with all migrations applied.
pub async fn setup_test_db() -> Result<DatabaseConnection> {
    let db = Database::connect("sqlite::memory:").await?;

    Migrator::up(&db, None).await?;

    // Fixtures insert rows out of dependency order in a few tests.
    db.execute(Statement::from_string(
        db.get_database_backend(),
        "PRAGMA foreign_keys = OFF".to_string(),
    ))
    .await?;

    Ok(db)
}

pub async fn insert_user(db: &DatabaseConnection, id: &str, phone: Option<&str>) -> Result<()> {
    user::ActiveModel {
        id: Set(id.to_string()),
        phone: Set(phone.map(str::to_string)),
        preferred_language: Set("pl".to_string()),
        created_at: Set(Utc::now().fixed_offset()),
    }
    .insert(db)
    .await?;
    Ok(())
}

pub async fn insert_city(db: &DatabaseConnection, name: &str) -> Result<i32> {
    let model = city::ActiveModel {
        name: Set(name.to_string()),
        ..Default::default()
    }
    .insert(db)
    .await?;
    Ok(model.id)
}

pub async fn insert_street(db: &DatabaseConnection, city_id: i32, name: &str) -> Result<i32> {
    let model = street::ActiveModel {
        name: Set(name.to_string()),
        city_id: Set(city_id),
        ..Default::default()
    }
    .insert(db)
    .await?;
    Ok(model.id)
}

pub async fn insert_address(
    db: &DatabaseConnection,
    user_id: &str,
    city_id: Option<i32>,
    street_id: Option<i32>,
) -> Result<i32> {
    let model = address::ActiveModel {
        user_id: Set(user_id.to_string()),
        city_id: Set(city_id),
        street_id: Set(street_id),
        is_default: Set(true),
        created_at: Set(Utc::now().fixed_offset()),
        ..Default::default()
    }
    .insert(db)
    .await?;
    Ok(model.id)
}

pub async fn insert_waste_type(db: &DatabaseConnection, name: &str) -> Result<i32> {
    let model = waste_type::ActiveModel {
        name: Set(name.to_string()),
        ..Default::default()
    }
    .insert(db)
    .await?;
    Ok(model.id)
}

pub async fn insert_schedule(
    db: &DatabaseConnection,
    city_id: i32,
    street_id: Option<i32>,
    waste_type_id: i32,
    year: i32,
    month: u32,
    days: &str,
) -> Result<i32> {
    let model = waste_schedule::ActiveModel {
        city_id: Set(city_id),
        street_id: Set(street_id),
        waste_type_id: Set(waste_type_id),
        year: Set(year),
        month: Set(month.to_string()),
        days: Set(days.to_string()),
        ..Default::default()
    }
    .insert(db)
    .await?;
    Ok(model.id)
}

pub async fn insert_preference(
    db: &DatabaseConnection,
    user_id: &str,
    address_id: i32,
    notification_type: &str,
    hour: i32,
    enabled: bool,
) -> Result<i32> {
    let now = Utc::now().fixed_offset();
    let model = notification_preference::ActiveModel {
        user_id: Set(user_id.to_string()),
        address_id: Set(address_id),
        notification_type: Set(notification_type.to_string()),
        hour: Set(hour),
        minute: Set(0),
        enabled: Set(enabled),
        created_at: Set(now),
        updated_at: Set(now),
        ..Default::default()
    }
    .insert(db)
    .await?;
    Ok(model.id)
}

/// One user in Warszawa, Długa with the default preference pair and a "Bio"
/// collection on 2025-06-02.
#[derive(Debug, Clone)]
pub struct Household {
    pub user_id: String,
    pub city_id: i32,
    pub street_id: i32,
    pub address_id: i32,
    pub waste_type_id: i32,
    pub day_before_preference_id: i32,
    pub same_day_preference_id: i32,
}

pub async fn seed_household(db: &DatabaseConnection) -> Result<Household> {
    seed_household_for(db, "user-1", Some("606 181 071")).await
}

pub async fn seed_household_for(
    db: &DatabaseConnection,
    user_id: &str,
    phone: Option<&str>,
) -> Result<Household> {
    insert_user(db, user_id, phone).await?;
    let city_id = insert_city(db, "Warszawa").await?;
    let street_id = insert_street(db, city_id, "Długa").await?;
    let address_id = insert_address(db, user_id, Some(city_id), Some(street_id)).await?;
    let waste_type_id = insert_waste_type(db, "Bio").await?;
    insert_schedule(db, city_id, Some(street_id), waste_type_id, 2025, 6, "[2, 16, 30]").await?;

    let day_before_preference_id =
        insert_preference(db, user_id, address_id, "day_before", 19, true).await?;
    let same_day_preference_id =
        insert_preference(db, user_id, address_id, "same_day", 7, true).await?;

    Ok(Household {
        user_id: user_id.to_string(),
        city_id,
        street_id,
        address_id,
        waste_type_id,
        day_before_preference_id,
        same_day_preference_id,
    })
}

/// A day-before job for Warszawa, Długa on 2025-06-02.
pub fn sample_job() -> DeliveryJob {
    DeliveryJob {
        user_id: "user-1".to_string(),
        phone: "+48606181071".to_string(),
        address_id: 1,
        city_id: 1,
        street_id: 1,
        city_name: "Warszawa".to_string(),
        street_name: "Długa".to_string(),
        notification_preference_id: 1,
        notification_type: NotificationPhase::DayBefore,
        waste_types: vec![
            WasteTypeRef {
                waste_type_id: 1,
                waste_type_name: "Bio".to_string(),
            },
            WasteTypeRef {
                waste_type_id: 2,
                waste_type_name: "Papier".to_string(),
            },
        ],
        scheduled_date: NaiveDate::from_ymd_opt(2025, 6, 2).unwrap(),
    }
}
