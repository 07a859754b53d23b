//! # Delivery Worker
//!
//! Drains the delivery queue and sends one SMS per job. Messages of a batch
//! are handled sequentially; each one is settled on its own with an ack or
//! a retry, so a failing message never holds back the rest of the batch.
//!
//! Per message:
//! 1. Drop jobs whose phone fails the loose `+48DDDDDDDDD` check.
//! 2. Skip jobs whose idempotency key already has a sent or delivered log.
//! 3. Render the text and claim the key with a pending log row.
//! 4. Pace, call the gateway, and record `sent` or `failed`.

use std::sync::Arc;

use chrono::Duration as ChronoDuration;
use metrics::counter;
use tokio::time::{Duration, sleep};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use crate::config::{MAX_PENDING_STALE_AFTER_SECONDS, WorkerConfig};
use crate::error::PipelineError;
use crate::gateway::SmsGateway;
use crate::notification::{DeliveryJob, MessageTemplates};
use crate::phone::is_valid_phone;
use crate::queue::{DeliveryQueue, QueueMessage};
use crate::repositories::{LogClaim, NewNotificationLog, NotificationLogRepository};

/// What happened to one job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Disposition {
    /// Gateway accepted the message; log is `sent`
    Delivered { log_id: i32, message_id: String },
    /// Phone failed the loose validity check; dropped without a log row
    InvalidPhone,
    /// A sent or delivered log already exists for the key
    AlreadyDelivered,
    /// Another worker holds a fresh pending log for the key
    InFlight,
    /// Gateway rejected the message; log is `failed`
    GatewayFailed { log_id: i32, error: String },
}

impl Disposition {
    /// Retry reason, or `None` when the message should be acked.
    pub fn retry_reason(&self) -> Option<String> {
        match self {
            Disposition::Delivered { .. }
            | Disposition::InvalidPhone
            | Disposition::AlreadyDelivered => None,
            Disposition::InFlight => Some("delivery in flight elsewhere".to_string()),
            Disposition::GatewayFailed { error, .. } => Some(error.clone()),
        }
    }

    fn label(&self) -> &'static str {
        match self {
            Disposition::Delivered { .. } => "delivered",
            Disposition::InvalidPhone => "dropped_invalid_phone",
            Disposition::AlreadyDelivered => "skipped_duplicate",
            Disposition::InFlight => "retried_in_flight",
            Disposition::GatewayFailed { .. } => "retried_gateway_failure",
        }
    }
}

/// Counts for one received batch.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DrainSummary {
    pub received: usize,
    pub acked: usize,
    pub retried: usize,
}

/// Queue-driven SMS delivery worker.
pub struct DeliveryWorker {
    queue: Arc<dyn DeliveryQueue>,
    gateway: Arc<dyn SmsGateway>,
    logs: NotificationLogRepository,
    templates: MessageTemplates,
    batch_size: usize,
    pacing: Duration,
    poll_interval: Duration,
    pending_stale_after: ChronoDuration,
}

impl DeliveryWorker {
    pub fn new(
        queue: Arc<dyn DeliveryQueue>,
        gateway: Arc<dyn SmsGateway>,
        logs: NotificationLogRepository,
        templates: MessageTemplates,
        config: &WorkerConfig,
    ) -> Self {
        Self {
            queue,
            gateway,
            logs,
            templates,
            batch_size: config.batch_size.max(1),
            pacing: Duration::from_millis(config.pacing_ms),
            poll_interval: Duration::from_millis(config.poll_interval_ms),
            pending_stale_after: stale_window(config.pending_stale_after_seconds),
        }
    }

    /// Run the worker loop until the shutdown token fires.
    #[instrument(skip_all)]
    pub async fn run(self, shutdown: CancellationToken) -> Result<(), PipelineError> {
        info!(
            batch_size = self.batch_size,
            pacing_ms = self.pacing.as_millis() as u64,
            "Starting delivery worker"
        );

        while !shutdown.is_cancelled() {
            let received = match self.drain_once().await {
                Ok(summary) => summary.received,
                Err(err) => {
                    error!(error = ?err, "Failed to receive delivery messages");
                    0
                }
            };

            if received == 0 {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = sleep(self.poll_interval) => {}
                }
            }
        }

        info!("Delivery worker stopped");
        Ok(())
    }

    /// Receives one batch and settles every message in it.
    pub async fn drain_once(&self) -> Result<DrainSummary, PipelineError> {
        let messages = self.queue.receive(self.batch_size).await?;
        Ok(self.process_batch(&messages).await)
    }

    pub async fn process_batch(&self, messages: &[QueueMessage]) -> DrainSummary {
        let mut summary = DrainSummary {
            received: messages.len(),
            ..Default::default()
        };

        for message in messages {
            if self.process_message(message).await {
                summary.acked += 1;
            } else {
                summary.retried += 1;
            }
        }

        if summary.received > 0 {
            debug!(
                received = summary.received,
                acked = summary.acked,
                retried = summary.retried,
                "Delivery batch processed"
            );
        }
        summary
    }

    /// Handles and settles one message. Returns true when it was acked.
    async fn process_message(&self, message: &QueueMessage) -> bool {
        let retry_reason = match self.handle(&message.job).await {
            Ok(disposition) => {
                counter!("reminder_worker_messages_total", "disposition" => disposition.label())
                    .increment(1);
                disposition.retry_reason()
            }
            Err(err) => {
                counter!("reminder_worker_messages_total", "disposition" => "retried_error")
                    .increment(1);
                error!(
                    error = ?err,
                    message_id = %message.id,
                    user_id = %message.job.user_id,
                    "Delivery attempt failed"
                );
                Some(err.to_string())
            }
        };

        let settled = match &retry_reason {
            None => self.queue.ack(message).await,
            Some(reason) => self.queue.retry(message, reason).await,
        };
        if let Err(err) = settled {
            warn!(
                error = ?err,
                message_id = %message.id,
                "Failed to settle queue message; it will be redelivered after its lease expires"
            );
        }

        retry_reason.is_none()
    }

    /// Runs the delivery steps for one job.
    #[instrument(
        skip_all,
        fields(
            user_id = %job.user_id,
            address_id = job.address_id,
            scheduled_date = %job.scheduled_date,
            preference_id = job.notification_preference_id
        )
    )]
    pub async fn handle(&self, job: &DeliveryJob) -> Result<Disposition, PipelineError> {
        if !is_valid_phone(&job.phone) {
            warn!("Dropping job with invalid phone number");
            return Ok(Disposition::InvalidPhone);
        }

        let key = job.key();
        if let Some(existing) = self.logs.find_by_key(&key).await?
            && existing.is_effective()
        {
            debug!(log_id = existing.id, "Delivery already fulfilled");
            return Ok(Disposition::AlreadyDelivered);
        }

        let text = self.templates.render(
            &job.waste_type_names(),
            &job.city_name,
            &job.street_name,
            job.scheduled_date,
            job.notification_type,
        );

        let claim = self
            .logs
            .create_pending(
                NewNotificationLog {
                    key,
                    waste_type_ids: job.waste_type_ids(),
                    phone_number: job.phone.clone(),
                    sms_content: text.clone(),
                },
                self.pending_stale_after,
            )
            .await?;

        let log = match claim {
            LogClaim::Claimed(log) => log,
            LogClaim::AlreadyDelivered(log) => {
                debug!(log_id = log.id, "Delivery fulfilled concurrently");
                return Ok(Disposition::AlreadyDelivered);
            }
            LogClaim::InFlight(log) => {
                debug!(log_id = log.id, "Delivery in flight on another worker");
                return Ok(Disposition::InFlight);
            }
        };

        if !self.pacing.is_zero() {
            sleep(self.pacing).await;
        }

        match self.gateway.send_sms(&job.phone, &text).await {
            Ok(receipt) => {
                self.logs.mark_sent(log.id, &receipt).await?;
                info!(
                    log_id = log.id,
                    message_id = %receipt.message_id,
                    parts = receipt.parts,
                    "SMS sent"
                );
                Ok(Disposition::Delivered {
                    log_id: log.id,
                    message_id: receipt.message_id,
                })
            }
            Err(failure) => {
                counter!("reminder_gateway_failures_total").increment(1);
                self.logs.mark_failed(log.id, &failure.message).await?;
                warn!(log_id = log.id, error = %failure, "SMS gateway rejected message");
                Ok(Disposition::GatewayFailed {
                    log_id: log.id,
                    error: failure.message,
                })
            }
        }
    }
}

/// Reclaim window for pending log rows, clamped to the configurable maximum.
fn stale_window(seconds: u64) -> ChronoDuration {
    let seconds = seconds.min(MAX_PENDING_STALE_AFTER_SECONDS) as i64;
    ChronoDuration::try_seconds(seconds).unwrap_or(ChronoDuration::days(1))
}
