//! # Waste Collection Reminders
//!
//! SMS reminder pipeline: a clock-driven matcher that turns notification
//! preferences and collection schedules into delivery jobs, a queue between
//! the two halves, and a delivery worker that sends each job through the SMS
//! gateway exactly once per idempotency key.

pub mod clock;
pub mod config;
pub mod consumer;
pub mod db;
pub mod diagnostics;
pub mod error;
pub mod gateway;
pub mod matcher;
pub mod models;
pub mod notification;
pub mod phone;
pub mod queue;
pub mod repositories;
pub mod telemetry;
pub use migration;
