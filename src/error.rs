//! # Error Handling
//!
//! Crate-wide error type for the matcher, the delivery worker and the
//! repositories they share. Database failures are logged once where they are
//! mapped and carry a static context string describing the failed operation.

use chrono::{DateTime, FixedOffset, Utc};
use sea_orm::{DbErr, RuntimeErr};
use thiserror::Error;
use tracing::error;

use crate::queue::QueueError;

/// Errors surfaced by pipeline components.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("{context}: {source}")]
    Database {
        context: &'static str,
        #[source]
        source: DbErr,
    },
    #[error(transparent)]
    Queue(#[from] QueueError),
    #[error("invalid notification preference: {0}")]
    InvalidPreference(String),
    #[error("notification log {0} not found")]
    MissingLog(i32),
    #[error("user {0} not found")]
    UserNotFound(String),
    #[error("failed to encode notification log field: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Logs and wraps a database error with the operation that produced it.
pub(crate) fn map_db_err(context: &'static str, err: DbErr) -> PipelineError {
    error!(error = ?err, context, "Database operation failed");
    PipelineError::Database {
        context,
        source: err,
    }
}

/// Detects unique-constraint violations across the supported backends.
pub(crate) fn is_unique_violation(error: &DbErr) -> bool {
    const PG_UNIQUE: &str = "23505";
    const SQLITE_DUPLICATE_CODES: &[&str] = &["1555", "2067"];

    let runtime_err = match error {
        DbErr::Query(RuntimeErr::SqlxError(sqlx_err))
        | DbErr::Exec(RuntimeErr::SqlxError(sqlx_err)) => sqlx_err,
        _ => return false,
    };

    let Some(db_error) = runtime_err.as_database_error() else {
        return false;
    };

    if db_error.is_unique_violation() {
        return true;
    }

    db_error
        .code()
        .is_some_and(|code| code == PG_UNIQUE || SQLITE_DUPLICATE_CODES.contains(&code.as_ref()))
}

/// Converts a UTC instant into the offset-aware type stored in timestamp columns.
pub(crate) fn to_db_time(dt: DateTime<Utc>) -> DateTime<FixedOffset> {
    dt.fixed_offset()
}
