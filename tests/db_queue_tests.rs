//! Database-backed delivery queue tests.

#[path = "test_utils/mod.rs"]
mod test_utils;

use std::time::Duration;

use anyhow::Result;
use chrono::Utc;
use reminders::models::queue_message;
use reminders::notification::DeliveryJob;
use reminders::queue::{DbQueue, DeliveryQueue, RetryPolicy};
use sea_orm::{ActiveModelTrait, DatabaseConnection, Set};
use serde_json::json;
use test_utils::*;
use uuid::Uuid;

fn no_jitter(base_seconds: u64, max_attempts: u32) -> RetryPolicy {
    RetryPolicy {
        max_attempts,
        base_seconds,
        max_seconds: 900,
        jitter_factor: 0.0,
    }
}

fn queue(db: &DatabaseConnection, policy: RetryPolicy) -> DbQueue {
    DbQueue::new(db.clone(), "notifications", Duration::from_secs(60), policy)
}

fn job_for(address_id: i32) -> DeliveryJob {
    let mut job = sample_job();
    job.address_id = address_id;
    job
}

async fn tick() {
    tokio::time::sleep(Duration::from_millis(5)).await;
}

#[tokio::test]
async fn enqueue_receive_ack_round_trip() -> Result<()> {
    let db = setup_test_db().await?;
    let queue = queue(&db, RetryPolicy::default());

    assert_eq!(queue.enqueue_batch(&[]).await?, 0);
    assert_eq!(queue.enqueue_batch(&[job_for(1), job_for(2)]).await?, 2);
    assert_eq!(queue.outstanding().await?, 2);

    let messages = queue.receive(10).await?;
    assert_eq!(messages.len(), 2);
    assert!(messages.iter().all(|m| m.attempts == 1));
    let mut addresses: Vec<i32> = messages.iter().map(|m| m.job.address_id).collect();
    addresses.sort_unstable();
    assert_eq!(addresses, vec![1, 2]);

    for message in &messages {
        queue.ack(message).await?;
    }
    assert_eq!(queue.outstanding().await?, 0);
    assert!(queue.receive(10).await?.is_empty());

    let row = queue.find(messages[0].id).await?.expect("queue row");
    assert_eq!(row.status, queue_message::STATUS_ACKED);
    assert!(row.lease_token.is_none());
    Ok(())
}

#[tokio::test]
async fn leased_messages_are_not_received_twice() -> Result<()> {
    let db = setup_test_db().await?;
    let queue = queue(&db, RetryPolicy::default());
    queue
        .enqueue_batch(&[job_for(1), job_for(2), job_for(3)])
        .await?;

    let first = queue.receive(2).await?;
    let second = queue.receive(2).await?;
    assert_eq!(first.len(), 2);
    assert_eq!(second.len(), 1);
    assert!(first.iter().all(|m| m.id != second[0].id));
    assert!(queue.receive(2).await?.is_empty());
    assert_eq!(queue.outstanding().await?, 3);
    Ok(())
}

#[tokio::test]
async fn retry_delays_redelivery_by_backoff() -> Result<()> {
    let db = setup_test_db().await?;
    let queue = queue(&db, no_jitter(30, 4));
    queue.enqueue_batch(&[sample_job()]).await?;

    let message = queue.receive(1).await?.remove(0);
    let before = Utc::now();
    queue.retry(&message, "HTTP 500: Internal Server Error").await?;

    assert!(queue.receive(1).await?.is_empty());

    let row = queue.find(message.id).await?.expect("queue row");
    assert_eq!(row.status, queue_message::STATUS_QUEUED);
    assert_eq!(row.last_error.as_deref(), Some("HTTP 500: Internal Server Error"));
    assert!(row.lease_token.is_none());
    let delay = row.available_at.with_timezone(&Utc) - before;
    assert!(delay >= chrono::Duration::seconds(29), "delay was {delay}");
    assert!(delay <= chrono::Duration::seconds(31), "delay was {delay}");
    Ok(())
}

#[tokio::test]
async fn retried_message_is_redelivered_with_incremented_attempts() -> Result<()> {
    let db = setup_test_db().await?;
    let queue = queue(&db, no_jitter(0, 4));
    queue.enqueue_batch(&[sample_job()]).await?;

    let first = queue.receive(1).await?.remove(0);
    queue.retry(&first, "gateway timeout").await?;
    tick().await;

    let second = queue.receive(1).await?.remove(0);
    assert_eq!(second.id, first.id);
    assert_eq!(second.attempts, 2);
    assert_eq!(second.job, first.job);
    Ok(())
}

#[tokio::test]
async fn exhausted_message_is_dead_lettered() -> Result<()> {
    let db = setup_test_db().await?;
    let queue = queue(&db, no_jitter(0, 2));
    queue.enqueue_batch(&[sample_job()]).await?;

    let first = queue.receive(1).await?.remove(0);
    queue.retry(&first, "first failure").await?;
    tick().await;
    let second = queue.receive(1).await?.remove(0);
    queue.retry(&second, "second failure").await?;
    tick().await;

    assert!(queue.receive(1).await?.is_empty());
    assert_eq!(queue.outstanding().await?, 0);

    let row = queue.find(first.id).await?.expect("queue row");
    assert_eq!(row.status, queue_message::STATUS_DEAD);
    assert_eq!(row.attempts, 2);
    assert_eq!(row.last_error.as_deref(), Some("second failure"));
    Ok(())
}

#[tokio::test]
async fn expired_lease_makes_message_claimable_again() -> Result<()> {
    let db = setup_test_db().await?;
    let queue = DbQueue::new(db.clone(), "notifications", Duration::ZERO, RetryPolicy::default());
    queue.enqueue_batch(&[sample_job()]).await?;

    let stale = queue.receive(1).await?.remove(0);
    tick().await;
    let current = queue.receive(1).await?.remove(0);
    assert_eq!(current.id, stale.id);
    assert_eq!(current.attempts, 2);

    // Settling with the expired lease must not touch the new owner's claim.
    queue.ack(&stale).await?;
    let row = queue.find(stale.id).await?.expect("queue row");
    assert_eq!(row.status, queue_message::STATUS_IN_FLIGHT);

    queue.ack(&current).await?;
    let row = queue.find(current.id).await?.expect("queue row");
    assert_eq!(row.status, queue_message::STATUS_ACKED);
    Ok(())
}

#[tokio::test]
async fn message_whose_final_lease_expires_is_dead_lettered() -> Result<()> {
    let db = setup_test_db().await?;
    let queue = DbQueue::new(db.clone(), "notifications", Duration::ZERO, no_jitter(0, 2));
    queue.enqueue_batch(&[sample_job()]).await?;

    // The consumer crashes twice without settling the message.
    let first = queue.receive(1).await?.remove(0);
    tick().await;
    let second = queue.receive(1).await?.remove(0);
    assert_eq!(second.id, first.id);
    assert_eq!(second.attempts, 2);
    tick().await;

    assert!(queue.receive(1).await?.is_empty());
    assert_eq!(queue.outstanding().await?, 0);

    let row = queue.find(first.id).await?.expect("queue row");
    assert_eq!(row.status, queue_message::STATUS_DEAD);
    assert_eq!(row.attempts, 2);
    assert!(row.lease_token.is_none());
    assert_eq!(
        row.last_error.as_deref(),
        Some("lease expired after 2 delivery attempts")
    );
    Ok(())
}

#[tokio::test]
async fn oversized_visibility_timeout_is_clamped() -> Result<()> {
    let db = setup_test_db().await?;
    let queue = DbQueue::new(
        db.clone(),
        "notifications",
        Duration::from_secs(9_000_000_000_000),
        RetryPolicy::default(),
    );
    queue.enqueue_batch(&[sample_job()]).await?;

    let before = Utc::now();
    let message = queue.receive(1).await?.remove(0);
    let row = queue.find(message.id).await?.expect("queue row");
    let lease = row.leased_until.expect("leased").with_timezone(&Utc) - before;
    assert!(lease <= chrono::Duration::hours(12), "lease was {lease}");
    assert!(lease > chrono::Duration::hours(11), "lease was {lease}");
    Ok(())
}

#[tokio::test]
async fn undecodable_payload_is_dead_lettered_on_receive() -> Result<()> {
    let db = setup_test_db().await?;
    let queue = queue(&db, RetryPolicy::default());

    let now = Utc::now().fixed_offset();
    let id = Uuid::new_v4();
    queue_message::ActiveModel {
        id: Set(id),
        queue: Set("notifications".to_string()),
        payload: Set(json!({"unexpected": true})),
        status: Set(queue_message::STATUS_QUEUED.to_string()),
        attempts: Set(0),
        available_at: Set(now - chrono::Duration::seconds(1)),
        leased_until: Set(None),
        lease_token: Set(None),
        last_error: Set(None),
        created_at: Set(now),
        updated_at: Set(now),
    }
    .insert(&db)
    .await?;
    queue.enqueue_batch(&[sample_job()]).await?;

    let messages = queue.receive(10).await?;
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0].job, sample_job());

    let row = queue.find(id).await?.expect("queue row");
    assert_eq!(row.status, queue_message::STATUS_DEAD);
    assert!(
        row.last_error
            .as_deref()
            .is_some_and(|e| e.starts_with("undecodable payload"))
    );
    Ok(())
}

#[tokio::test]
async fn queues_are_isolated_by_name() -> Result<()> {
    let db = setup_test_db().await?;
    let primary = queue(&db, RetryPolicy::default());
    let other = DbQueue::new(db.clone(), "other", Duration::from_secs(60), RetryPolicy::default());

    primary.enqueue_batch(&[sample_job()]).await?;
    assert!(other.receive(10).await?.is_empty());
    assert_eq!(other.outstanding().await?, 0);
    assert_eq!(primary.receive(10).await?.len(), 1);
    Ok(())
}
