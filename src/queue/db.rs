//! Database-backed delivery queue.
//!
//! Messages live in `queue_messages`. Receiving a batch claims rows in one
//! transaction by stamping them with a fresh lease token, so concurrent
//! workers never receive the same message while its lease is valid. A lease
//! that expires without ack or retry makes the message claimable again,
//! unless the message has used its whole attempt budget; such rows are
//! dead-lettered instead of being redelivered.

use async_trait::async_trait;
use chrono::{Duration, Utc};
use metrics::counter;
use sea_orm::sea_query::Expr;
use sea_orm::{
    ColumnTrait, Condition, ConnectionTrait, DatabaseConnection, DbErr, EntityTrait,
    QueryFilter, QueryOrder, QuerySelect, Set, TransactionTrait,
};
use tracing::{debug, error, instrument, warn};
use uuid::Uuid;

use super::{DeliveryQueue, QueueError, QueueMessage, RetryPolicy};
use crate::config::{MAX_RETRY_SECONDS, MAX_VISIBILITY_TIMEOUT_SECONDS};
use crate::error::to_db_time;
use crate::models::queue_message::{
    self, ActiveModel as QueueMessageActiveModel, Column as QueueMessageColumn,
    Entity as QueueMessageEntity, STATUS_ACKED, STATUS_DEAD, STATUS_IN_FLIGHT, STATUS_QUEUED,
};
use crate::notification::DeliveryJob;

/// Queue stored in the application database.
#[derive(Debug, Clone)]
pub struct DbQueue {
    db: DatabaseConnection,
    queue: String,
    visibility_timeout: Duration,
    policy: RetryPolicy,
}

impl DbQueue {
    pub fn new(
        db: DatabaseConnection,
        queue: impl Into<String>,
        visibility_timeout: std::time::Duration,
        policy: RetryPolicy,
    ) -> Self {
        Self {
            db,
            queue: queue.into(),
            visibility_timeout: Duration::from_std(visibility_timeout.min(
                std::time::Duration::from_secs(MAX_VISIBILITY_TIMEOUT_SECONDS),
            ))
            .unwrap_or_else(|_| Duration::seconds(MAX_VISIBILITY_TIMEOUT_SECONDS as i64)),
            policy,
        }
    }

    pub fn from_config(db: DatabaseConnection, config: &crate::config::QueueConfig) -> Self {
        Self::new(
            db,
            config.name.clone(),
            std::time::Duration::from_secs(config.visibility_timeout_seconds),
            RetryPolicy::from_config(config),
        )
    }

    /// Messages not yet acked or dead-lettered.
    pub async fn outstanding(&self) -> Result<u64, QueueError> {
        use sea_orm::PaginatorTrait;

        QueueMessageEntity::find()
            .filter(QueueMessageColumn::Queue.eq(self.queue.as_str()))
            .filter(QueueMessageColumn::Status.is_in([STATUS_QUEUED, STATUS_IN_FLIGHT]))
            .count(&self.db)
            .await
            .map_err(|err| storage_err("count outstanding messages", err))
    }

    /// Looks up a message row by id.
    pub async fn find(&self, id: Uuid) -> Result<Option<queue_message::Model>, QueueError> {
        QueueMessageEntity::find_by_id(id)
            .one(&self.db)
            .await
            .map_err(|err| storage_err("load queue message", err))
    }

    async fn dead_letter(&self, id: Uuid, lease: Uuid, reason: &str) -> Result<(), QueueError> {
        let now = to_db_time(Utc::now());
        QueueMessageEntity::update_many()
            .col_expr(QueueMessageColumn::Status, Expr::value(STATUS_DEAD))
            .col_expr(QueueMessageColumn::LastError, Expr::value(Some(reason.to_string())))
            .col_expr(QueueMessageColumn::LeaseToken, Expr::value(Option::<Uuid>::None))
            .col_expr(
                QueueMessageColumn::LeasedUntil,
                Expr::value(Option::<chrono::DateTime<chrono::FixedOffset>>::None),
            )
            .col_expr(QueueMessageColumn::UpdatedAt, Expr::value(now))
            .filter(QueueMessageColumn::Id.eq(id))
            .filter(QueueMessageColumn::LeaseToken.eq(lease))
            .exec(&self.db)
            .await
            .map_err(|err| storage_err("dead-letter queue message", err))?;

        counter!("reminder_queue_dead_lettered_total").increment(1);
        warn!(message_id = %id, reason, "Queue message dead-lettered");
        Ok(())
    }

    /// Dead-letters messages whose final lease expired without being settled.
    async fn reap_exhausted<C: ConnectionTrait>(
        &self,
        conn: &C,
        now: chrono::DateTime<chrono::FixedOffset>,
    ) -> Result<u64, QueueError> {
        let reason = format!(
            "lease expired after {} delivery attempts",
            self.policy.max_attempts
        );
        let result = QueueMessageEntity::update_many()
            .col_expr(QueueMessageColumn::Status, Expr::value(STATUS_DEAD))
            .col_expr(QueueMessageColumn::LastError, Expr::value(Some(reason)))
            .col_expr(QueueMessageColumn::LeaseToken, Expr::value(Option::<Uuid>::None))
            .col_expr(
                QueueMessageColumn::LeasedUntil,
                Expr::value(Option::<chrono::DateTime<chrono::FixedOffset>>::None),
            )
            .col_expr(QueueMessageColumn::UpdatedAt, Expr::value(now))
            .filter(QueueMessageColumn::Queue.eq(self.queue.as_str()))
            .filter(QueueMessageColumn::Status.eq(STATUS_IN_FLIGHT))
            .filter(QueueMessageColumn::LeasedUntil.lte(now))
            .filter(QueueMessageColumn::Attempts.gte(self.policy.max_attempts as i32))
            .exec(conn)
            .await
            .map_err(|err| storage_err("dead-letter expired queue messages", err))?;

        if result.rows_affected > 0 {
            counter!("reminder_queue_dead_lettered_total").increment(result.rows_affected);
            warn!(
                count = result.rows_affected,
                "Dead-lettered queue messages whose final lease expired"
            );
        }
        Ok(result.rows_affected)
    }

    fn claimable(&self, now: chrono::DateTime<chrono::FixedOffset>) -> Condition {
        Condition::all()
            .add(QueueMessageColumn::Queue.eq(self.queue.as_str()))
            .add(
                Condition::any()
                    .add(
                        Condition::all()
                            .add(QueueMessageColumn::Status.eq(STATUS_QUEUED))
                            .add(QueueMessageColumn::AvailableAt.lte(now)),
                    )
                    .add(
                        Condition::all()
                            .add(QueueMessageColumn::Status.eq(STATUS_IN_FLIGHT))
                            .add(QueueMessageColumn::LeasedUntil.lte(now)),
                    ),
            )
    }
}

#[async_trait]
impl DeliveryQueue for DbQueue {
    #[instrument(skip_all, fields(queue = %self.queue, batch = jobs.len()))]
    async fn enqueue_batch(&self, jobs: &[DeliveryJob]) -> Result<usize, QueueError> {
        if jobs.is_empty() {
            return Ok(0);
        }

        let now = to_db_time(Utc::now());
        let rows = jobs
            .iter()
            .map(|job| {
                Ok(QueueMessageActiveModel {
                    id: Set(Uuid::new_v4()),
                    queue: Set(self.queue.clone()),
                    payload: Set(serde_json::to_value(job)?),
                    status: Set(STATUS_QUEUED.to_string()),
                    attempts: Set(0),
                    available_at: Set(now),
                    leased_until: Set(None),
                    lease_token: Set(None),
                    last_error: Set(None),
                    created_at: Set(now),
                    updated_at: Set(now),
                })
            })
            .collect::<Result<Vec<_>, serde_json::Error>>()?;

        let txn = self
            .db
            .begin()
            .await
            .map_err(|err| storage_err("begin enqueue transaction", err))?;
        QueueMessageEntity::insert_many(rows)
            .exec_without_returning(&txn)
            .await
            .map_err(|err| storage_err("insert queue messages", err))?;
        txn.commit()
            .await
            .map_err(|err| storage_err("commit enqueue transaction", err))?;

        counter!("reminder_queue_enqueued_total").increment(jobs.len() as u64);
        Ok(jobs.len())
    }

    #[instrument(skip(self), fields(queue = %self.queue))]
    async fn receive(&self, max: usize) -> Result<Vec<QueueMessage>, QueueError> {
        if max == 0 {
            return Ok(Vec::new());
        }

        let now = to_db_time(Utc::now());
        let leased_until = now
            .checked_add_signed(self.visibility_timeout)
            .ok_or(QueueError::TimeOverflow {
                context: "lease expiry",
            })?;
        let lease = Uuid::new_v4();

        let txn = self
            .db
            .begin()
            .await
            .map_err(|err| storage_err("begin receive transaction", err))?;

        self.reap_exhausted(&txn, now).await?;

        let candidate_ids = QueueMessageEntity::find()
            .select_only()
            .column(QueueMessageColumn::Id)
            .filter(self.claimable(now))
            .order_by_asc(QueueMessageColumn::AvailableAt)
            .limit(max as u64)
            .into_tuple::<Uuid>()
            .all(&txn)
            .await
            .map_err(|err| storage_err("select claimable messages", err))?;

        if candidate_ids.is_empty() {
            txn.commit()
                .await
                .map_err(|err| storage_err("commit receive transaction", err))?;
            return Ok(Vec::new());
        }

        // Re-check claimability so a concurrent receiver's lease is never stolen.
        QueueMessageEntity::update_many()
            .col_expr(QueueMessageColumn::Status, Expr::value(STATUS_IN_FLIGHT))
            .col_expr(QueueMessageColumn::LeaseToken, Expr::value(Some(lease)))
            .col_expr(QueueMessageColumn::LeasedUntil, Expr::value(Some(leased_until)))
            .col_expr(
                QueueMessageColumn::Attempts,
                Expr::col(QueueMessageColumn::Attempts).add(1),
            )
            .col_expr(QueueMessageColumn::UpdatedAt, Expr::value(now))
            .filter(QueueMessageColumn::Id.is_in(candidate_ids))
            .filter(self.claimable(now))
            .exec(&txn)
            .await
            .map_err(|err| storage_err("lease queue messages", err))?;

        let claimed = QueueMessageEntity::find()
            .filter(QueueMessageColumn::LeaseToken.eq(lease))
            .order_by_asc(QueueMessageColumn::AvailableAt)
            .all(&txn)
            .await
            .map_err(|err| storage_err("load leased messages", err))?;

        txn.commit()
            .await
            .map_err(|err| storage_err("commit receive transaction", err))?;

        let mut messages = Vec::with_capacity(claimed.len());
        for row in claimed {
            match serde_json::from_value::<DeliveryJob>(row.payload.clone()) {
                Ok(job) => messages.push(QueueMessage {
                    id: row.id,
                    attempts: row.attempts.max(0) as u32,
                    job,
                    lease,
                }),
                Err(err) => {
                    error!(message_id = %row.id, error = %err, "Undecodable queue payload");
                    self.dead_letter(row.id, lease, &format!("undecodable payload: {err}"))
                        .await?;
                }
            }
        }

        debug!(received = messages.len(), "Leased queue messages");
        Ok(messages)
    }

    async fn ack(&self, message: &QueueMessage) -> Result<(), QueueError> {
        let now = to_db_time(Utc::now());
        let result = QueueMessageEntity::update_many()
            .col_expr(QueueMessageColumn::Status, Expr::value(STATUS_ACKED))
            .col_expr(QueueMessageColumn::LeaseToken, Expr::value(Option::<Uuid>::None))
            .col_expr(
                QueueMessageColumn::LeasedUntil,
                Expr::value(Option::<chrono::DateTime<chrono::FixedOffset>>::None),
            )
            .col_expr(QueueMessageColumn::UpdatedAt, Expr::value(now))
            .filter(QueueMessageColumn::Id.eq(message.id))
            .filter(QueueMessageColumn::LeaseToken.eq(message.lease))
            .exec(&self.db)
            .await
            .map_err(|err| storage_err("ack queue message", err))?;

        if result.rows_affected == 0 {
            warn!(message_id = %message.id, "Ack ignored; lease no longer held");
        }
        Ok(())
    }

    async fn retry(&self, message: &QueueMessage, reason: &str) -> Result<(), QueueError> {
        if self.policy.is_exhausted(message.attempts) {
            return self.dead_letter(message.id, message.lease, reason).await;
        }

        let now = Utc::now();
        let delay = Duration::from_std(self.policy.backoff(message.attempts))
            .unwrap_or_else(|_| Duration::seconds(MAX_RETRY_SECONDS as i64));
        let available_at = to_db_time(now.checked_add_signed(delay).ok_or(
            QueueError::TimeOverflow {
                context: "redelivery time",
            },
        )?);

        let result = QueueMessageEntity::update_many()
            .col_expr(QueueMessageColumn::Status, Expr::value(STATUS_QUEUED))
            .col_expr(QueueMessageColumn::AvailableAt, Expr::value(available_at))
            .col_expr(QueueMessageColumn::LastError, Expr::value(Some(reason.to_string())))
            .col_expr(QueueMessageColumn::LeaseToken, Expr::value(Option::<Uuid>::None))
            .col_expr(
                QueueMessageColumn::LeasedUntil,
                Expr::value(Option::<chrono::DateTime<chrono::FixedOffset>>::None),
            )
            .col_expr(QueueMessageColumn::UpdatedAt, Expr::value(to_db_time(now)))
            .filter(QueueMessageColumn::Id.eq(message.id))
            .filter(QueueMessageColumn::LeaseToken.eq(message.lease))
            .exec(&self.db)
            .await
            .map_err(|err| storage_err("requeue queue message", err))?;

        if result.rows_affected == 0 {
            warn!(message_id = %message.id, "Retry ignored; lease no longer held");
        } else {
            debug!(
                message_id = %message.id,
                attempts = message.attempts,
                delay_seconds = delay.num_seconds(),
                "Queue message scheduled for redelivery"
            );
        }
        Ok(())
    }
}

fn storage_err(context: &'static str, source: DbErr) -> QueueError {
    error!(error = ?source, context, "Queue storage operation failed");
    QueueError::Storage { context, source }
}

