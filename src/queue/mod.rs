//! # Delivery Queue
//!
//! At-least-once queue between the matcher and the delivery worker. The
//! matcher enqueues whole batches; the worker receives leased messages and
//! settles each one individually with [`DeliveryQueue::ack`] or
//! [`DeliveryQueue::retry`]. Redelivery timing and dead-lettering are decided
//! by the queue's [`RetryPolicy`], never by the worker.

pub mod db;
pub mod memory;

use std::time::Duration;

use async_trait::async_trait;
use rand::Rng;
use sea_orm::DbErr;
use thiserror::Error;
use uuid::Uuid;

use crate::config::QueueConfig;
use crate::notification::DeliveryJob;

pub use db::DbQueue;
pub use memory::InMemoryQueue;

/// Errors raised by queue implementations.
#[derive(Debug, Error)]
pub enum QueueError {
    #[error("queue storage failure ({context}): {source}")]
    Storage {
        context: &'static str,
        #[source]
        source: DbErr,
    },
    #[error("failed to encode delivery job: {0}")]
    Encode(#[from] serde_json::Error),
    #[error("{context} is out of the representable time range")]
    TimeOverflow { context: &'static str },
}

/// A received message leased to one consumer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueMessage {
    pub id: Uuid,
    /// Number of times this message has been received, including this one
    pub attempts: u32,
    pub job: DeliveryJob,
    pub(crate) lease: Uuid,
}

/// Queue operations used by the matcher and the worker.
#[async_trait]
pub trait DeliveryQueue: Send + Sync {
    /// Enqueues all jobs atomically. Returns the number enqueued.
    async fn enqueue_batch(&self, jobs: &[DeliveryJob]) -> Result<usize, QueueError>;

    /// Leases up to `max` available messages.
    async fn receive(&self, max: usize) -> Result<Vec<QueueMessage>, QueueError>;

    /// Marks a message as done.
    async fn ack(&self, message: &QueueMessage) -> Result<(), QueueError>;

    /// Returns a message for later redelivery, or dead-letters it once the
    /// attempt budget is spent.
    async fn retry(&self, message: &QueueMessage, reason: &str) -> Result<(), QueueError>;
}

/// Exponential backoff with additive jitter and a bounded attempt budget.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_seconds: u64,
    pub max_seconds: u64,
    pub jitter_factor: f64,
}

impl RetryPolicy {
    pub fn from_config(config: &QueueConfig) -> Self {
        Self {
            max_attempts: config.max_attempts,
            base_seconds: config.retry_base_seconds,
            max_seconds: config.retry_max_seconds,
            jitter_factor: config.retry_jitter_factor,
        }
    }

    /// True when a message received `attempts` times must not be redelivered.
    pub fn is_exhausted(&self, attempts: u32) -> bool {
        attempts >= self.max_attempts
    }

    /// Delay before redelivering a message that has been received `attempts` times.
    pub fn backoff(&self, attempts: u32) -> Duration {
        let mut rng = rand::thread_rng();
        self.backoff_with_rng(attempts, &mut rng)
    }

    fn backoff_with_rng<R: Rng + ?Sized>(&self, attempts: u32, rng: &mut R) -> Duration {
        let exponent = attempts.saturating_sub(1).min(30) as i32;
        let backoff = (self.base_seconds as f64 * 2_f64.powi(exponent)).min(self.max_seconds as f64);

        let jitter_span = self.jitter_factor * backoff;
        let jitter = if jitter_span > 0.0 {
            rng.gen_range(0.0..jitter_span)
        } else {
            0.0
        };

        Duration::try_from_secs_f64(backoff + jitter).unwrap_or(Duration::MAX)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&QueueConfig::default())
    }
}
