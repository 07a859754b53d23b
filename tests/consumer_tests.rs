//! Delivery worker tests against in-memory SQLite and a mocked SMS gateway.

#[path = "test_utils/mod.rs"]
mod test_utils;

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use chrono::{TimeZone, Utc};
use reminders::config::{MatcherConfig, WorkerConfig};
use reminders::consumer::{DeliveryWorker, Disposition};
use reminders::gateway::SerwerSmsClient;
use reminders::matcher::NotificationMatcher;
use reminders::models::notification_log::LogStatus;
use reminders::notification::{DeliveryJob, MessageTemplates, SmsLocale};
use reminders::queue::{DeliveryQueue, InMemoryQueue, RetryPolicy};
use reminders::repositories::{NewNotificationLog, NotificationLogRepository};
use sea_orm::{ConnectionTrait, DatabaseConnection, EntityTrait, PaginatorTrait, Statement};
use serde_json::json;
use test_utils::*;
use wiremock::{
    Mock, MockServer, ResponseTemplate,
    matchers::{header, method, path},
};

const TOKEN: &str = "test-token";

fn worker(db: &DatabaseConnection, queue: Arc<InMemoryQueue>, server: &MockServer) -> DeliveryWorker {
    let gateway = SerwerSmsClient::new(&server.uri(), TOKEN, "2waySMS", Duration::from_secs(5))
        .expect("gateway client");
    DeliveryWorker::new(
        queue,
        Arc::new(gateway),
        NotificationLogRepository::new(db.clone()),
        MessageTemplates::for_locale(SmsLocale::Pl),
        &WorkerConfig {
            pacing_ms: 0,
            ..WorkerConfig::default()
        },
    )
}

fn immediate_reply(id: &str) -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_json(json!({
        "success": true,
        "queued": 0,
        "unsent": 0,
        "items": [{
            "id": id,
            "phone": "+48606181071",
            "status": "queued",
            "queued": "2025-06-01 19:00:05",
            "parts": 1,
            "text": "..."
        }]
    }))
}

fn queued_reply() -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_json(json!({
        "success": true,
        "queued": 1,
        "unsent": 0
    }))
}

/// Installs a trigger that makes matching writes to `notification_logs` fail.
async fn fail_log_writes(db: &DatabaseConnection, event: &str, condition: &str) -> Result<()> {
    db.execute(Statement::from_string(
        db.get_database_backend(),
        format!(
            "CREATE TRIGGER fail_log_writes BEFORE {event} ON notification_logs \
             WHEN {condition} BEGIN SELECT RAISE(ABORT, 'log store unavailable'); END"
        ),
    ))
    .await?;
    Ok(())
}

/// Seeds the default household and runs the 19:00 Warsaw tick into `queue`.
async fn enqueue_day_before(db: &DatabaseConnection, queue: Arc<InMemoryQueue>) -> Result<DeliveryJob> {
    seed_household(db).await?;
    let matcher = NotificationMatcher::new(db.clone(), queue.clone(), &MatcherConfig::default());
    matcher
        .tick_at(Utc.with_ymd_and_hms(2025, 6, 1, 17, 0, 0).unwrap())
        .await?;
    let mut jobs = queue.pending_jobs().await;
    assert_eq!(jobs.len(), 1);
    Ok(jobs.remove(0))
}

#[tokio::test]
async fn delivers_job_and_records_sent_log() -> Result<()> {
    let db = setup_test_db().await?;
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/messages/send_sms.json"))
        .and(header("authorization", "Bearer test-token"))
        .respond_with(immediate_reply("abc123"))
        .expect(1)
        .mount(&server)
        .await;

    let queue = Arc::new(InMemoryQueue::default());
    let job = enqueue_day_before(&db, queue.clone()).await?;

    let summary = worker(&db, queue.clone(), &server).drain_once().await?;
    assert_eq!(summary.received, 1);
    assert_eq!(summary.acked, 1);
    assert_eq!(summary.retried, 0);
    assert_eq!(queue.acked_jobs().await, vec![job.clone()]);

    let log = NotificationLogRepository::new(db.clone())
        .find_by_key(&job.key())
        .await?
        .expect("log row");
    assert_eq!(log.log_status(), LogStatus::Sent);
    assert_eq!(log.provider_message_id.as_deref(), Some("abc123"));
    assert_eq!(log.provider_status.as_deref(), Some("queued"));
    assert_eq!(log.message_parts, Some(1));
    assert_eq!(log.attempts, 1);
    assert_eq!(log.phone_number, "+48606181071");
    assert_eq!(log.scheduled_date, "2025-06-02");
    assert_eq!(log.waste_type_ids, "[1]");
    assert_eq!(
        log.sms_content,
        "Przypomnienie: Jutro (2025-06-02) wywóz śmieci na Długa, Warszawa: Bio."
    );
    assert!(log.sent_at.is_some());
    assert!(log.error_message.is_none());
    Ok(())
}

#[tokio::test]
async fn duplicate_job_sends_only_once() -> Result<()> {
    let db = setup_test_db().await?;
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/messages/send_sms.json"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "success": true,
            "queued": 1,
            "unsent": 0
        })))
        .expect(1)
        .mount(&server)
        .await;

    let queue = Arc::new(InMemoryQueue::default());
    let job = enqueue_day_before(&db, queue.clone()).await?;
    // At-least-once delivery: the same job arrives twice.
    queue.enqueue_batch(std::slice::from_ref(&job)).await?;

    let worker = worker(&db, queue.clone(), &server);
    let summary = worker.drain_once().await?;
    assert_eq!(summary.received, 2);
    assert_eq!(summary.acked, 2);

    assert_eq!(worker.handle(&job).await?, Disposition::AlreadyDelivered);

    let logs = reminders::models::NotificationLog::find().count(&db).await?;
    assert_eq!(logs, 1);
    let log = NotificationLogRepository::new(db.clone())
        .find_by_key(&job.key())
        .await?
        .expect("log row");
    assert_eq!(log.provider_message_id.as_deref(), Some("queued"));
    Ok(())
}

#[tokio::test]
async fn invalid_phone_is_dropped_without_log_or_gateway_call() -> Result<()> {
    let db = setup_test_db().await?;
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(immediate_reply("never"))
        .expect(0)
        .mount(&server)
        .await;

    let queue = Arc::new(InMemoryQueue::default());
    let mut job = sample_job();
    job.phone = "606181071".to_string();
    queue.enqueue_batch(&[job]).await?;

    let summary = worker(&db, queue.clone(), &server).drain_once().await?;
    assert_eq!(summary.acked, 1);
    assert_eq!(queue.acked_jobs().await.len(), 1);
    assert_eq!(reminders::models::NotificationLog::find().count(&db).await?, 0);
    Ok(())
}

#[tokio::test]
async fn gateway_failure_is_recorded_and_retried_until_sent() -> Result<()> {
    let db = setup_test_db().await?;
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/messages/send_sms.json"))
        .respond_with(ResponseTemplate::new(500))
        .up_to_n_times(1)
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/messages/send_sms.json"))
        .respond_with(immediate_reply("second-try"))
        .expect(1)
        .mount(&server)
        .await;

    let queue = Arc::new(InMemoryQueue::default());
    let job = enqueue_day_before(&db, queue.clone()).await?;
    let logs = NotificationLogRepository::new(db.clone());
    let worker = worker(&db, queue.clone(), &server);

    let first = worker.drain_once().await?;
    assert_eq!(first.retried, 1);
    assert_eq!(queue.retry_count().await, 1);

    let failed = logs.find_by_key(&job.key()).await?.expect("log row");
    assert_eq!(failed.log_status(), LogStatus::Failed);
    assert_eq!(
        failed.error_message.as_deref(),
        Some("HTTP 500: Internal Server Error")
    );
    assert!(failed.sent_at.is_none());

    let second = worker.drain_once().await?;
    assert_eq!(second.acked, 1);

    let sent = logs.find_by_key(&job.key()).await?.expect("log row");
    assert_eq!(sent.id, failed.id);
    assert_eq!(sent.log_status(), LogStatus::Sent);
    assert_eq!(sent.attempts, 2);
    assert_eq!(sent.provider_message_id.as_deref(), Some("second-try"));
    assert!(sent.error_message.is_none());
    Ok(())
}

#[tokio::test]
async fn gateway_rejection_is_dead_lettered_after_budget() -> Result<()> {
    let db = setup_test_db().await?;
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "error": {"code": 1001, "type": "AuthError", "message": "Invalid token"}
        })))
        .expect(2)
        .mount(&server)
        .await;

    let queue = Arc::new(InMemoryQueue::new(RetryPolicy {
        max_attempts: 2,
        ..RetryPolicy::default()
    }));
    let job = enqueue_day_before(&db, queue.clone()).await?;
    let worker = worker(&db, queue.clone(), &server);

    worker.drain_once().await?;
    worker.drain_once().await?;
    assert_eq!(worker.drain_once().await?.received, 0);

    let dead = queue.dead_jobs().await;
    assert_eq!(dead.len(), 1);
    assert_eq!(dead[0].0, job);
    assert_eq!(dead[0].1, "SerwerSMS error 1001: Invalid token");

    let log = NotificationLogRepository::new(db.clone())
        .find_by_key(&job.key())
        .await?
        .expect("log row");
    assert_eq!(log.log_status(), LogStatus::Failed);
    assert_eq!(log.attempts, 2);
    Ok(())
}

#[tokio::test]
async fn fresh_pending_log_means_delivery_is_in_flight() -> Result<()> {
    let db = setup_test_db().await?;
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(immediate_reply("never"))
        .expect(0)
        .mount(&server)
        .await;

    let job = sample_job();
    let logs = NotificationLogRepository::new(db.clone());
    logs.create_pending(
        NewNotificationLog {
            key: job.key(),
            waste_type_ids: job.waste_type_ids(),
            phone_number: job.phone.clone(),
            sms_content: "held by another worker".to_string(),
        },
        chrono::Duration::minutes(5),
    )
    .await?;

    let queue = Arc::new(InMemoryQueue::default());
    let worker = worker(&db, queue.clone(), &server);
    assert_eq!(worker.handle(&job).await?, Disposition::InFlight);

    queue.enqueue_batch(&[job]).await?;
    let summary = worker.drain_once().await?;
    assert_eq!(summary.retried, 1);
    assert_eq!(queue.pending_jobs().await.len(), 1);
    Ok(())
}

#[tokio::test]
async fn log_store_failure_retries_only_that_message() -> Result<()> {
    let db = setup_test_db().await?;
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/messages/send_sms.json"))
        .respond_with(queued_reply())
        .expect(2)
        .mount(&server)
        .await;
    fail_log_writes(&db, "INSERT", "NEW.user_id = 'broken'").await?;

    let first = sample_job();
    let mut broken = sample_job();
    broken.user_id = "broken".to_string();
    broken.address_id = 2;
    let mut last = sample_job();
    last.address_id = 3;

    let queue = Arc::new(InMemoryQueue::default());
    queue
        .enqueue_batch(&[first.clone(), broken.clone(), last.clone()])
        .await?;

    let summary = worker(&db, queue.clone(), &server).drain_once().await?;
    assert_eq!(summary.received, 3);
    assert_eq!(summary.acked, 2);
    assert_eq!(summary.retried, 1);

    assert_eq!(queue.acked_jobs().await, vec![first.clone(), last.clone()]);
    assert_eq!(queue.pending_jobs().await, vec![broken.clone()]);
    assert_eq!(queue.retry_count().await, 1);

    let logs = NotificationLogRepository::new(db.clone());
    for job in [&first, &last] {
        let log = logs.find_by_key(&job.key()).await?.expect("log row");
        assert_eq!(log.log_status(), LogStatus::Sent);
    }
    assert!(logs.find_by_key(&broken.key()).await?.is_none());
    Ok(())
}

#[tokio::test]
async fn failure_to_record_send_retries_without_resending() -> Result<()> {
    let db = setup_test_db().await?;
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/messages/send_sms.json"))
        .respond_with(queued_reply())
        .expect(1)
        .mount(&server)
        .await;
    fail_log_writes(&db, "UPDATE", "NEW.status = 'sent'").await?;

    let queue = Arc::new(InMemoryQueue::default());
    let job = sample_job();
    queue.enqueue_batch(std::slice::from_ref(&job)).await?;
    let worker = worker(&db, queue.clone(), &server);

    let summary = worker.drain_once().await?;
    assert_eq!(summary.retried, 1);
    assert_eq!(queue.pending_jobs().await, vec![job.clone()]);

    let log = NotificationLogRepository::new(db.clone())
        .find_by_key(&job.key())
        .await?
        .expect("log row");
    assert_eq!(log.log_status(), LogStatus::Pending);

    // The fresh pending row holds the key, so redelivery does not call the gateway again.
    let again = worker.drain_once().await?;
    assert_eq!(again.retried, 1);
    assert_eq!(worker.handle(&job).await?, Disposition::InFlight);
    Ok(())
}
