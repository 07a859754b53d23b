//! Database migrations for the waste-collection reminder service.

pub use sea_orm_migration::prelude::*;

mod m2025_01_10_000001_create_users;
mod m2025_01_10_000002_create_locations;
mod m2025_01_10_000003_create_waste_schedules;
mod m2025_01_10_000004_create_notification_preferences;
mod m2025_01_10_000005_create_notification_logs;
mod m2025_01_12_000100_add_notification_log_idempotency_guard;
mod m2025_01_12_000200_create_queue_messages;

pub use m2025_01_12_000100_add_notification_log_idempotency_guard::IDEMPOTENCY_INDEX;

pub struct Migrator;

#[async_trait::async_trait]
impl MigratorTrait for Migrator {
    fn migrations() -> Vec<Box<dyn MigrationTrait>> {
        vec![
            Box::new(m2025_01_10_000001_create_users::Migration),
            Box::new(m2025_01_10_000002_create_locations::Migration),
            Box::new(m2025_01_10_000003_create_waste_schedules::Migration),
            Box::new(m2025_01_10_000004_create_notification_preferences::Migration),
            Box::new(m2025_01_10_000005_create_notification_logs::Migration),
            Box::new(m2025_01_12_000100_add_notification_log_idempotency_guard::Migration),
            Box::new(m2025_01_12_000200_create_queue_messages::Migration),
        ]
    }
}
