//! Process-local queue used by `tick` runs and tests.

use std::collections::{HashMap, VecDeque};

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::warn;
use uuid::Uuid;

use super::{DeliveryQueue, QueueError, QueueMessage, RetryPolicy};
use crate::notification::DeliveryJob;

#[derive(Debug)]
struct Entry {
    id: Uuid,
    attempts: u32,
    job: DeliveryJob,
}

#[derive(Debug, Default)]
struct State {
    ready: VecDeque<Entry>,
    in_flight: HashMap<Uuid, (Uuid, Entry)>,
    acked: Vec<DeliveryJob>,
    dead: Vec<(DeliveryJob, String)>,
    retries: usize,
}

/// In-memory queue. Retried messages become ready again immediately; the
/// attempt budget of the [`RetryPolicy`] still applies.
#[derive(Debug, Default)]
pub struct InMemoryQueue {
    state: Mutex<State>,
    policy: RetryPolicy,
}

impl InMemoryQueue {
    pub fn new(policy: RetryPolicy) -> Self {
        Self {
            state: Mutex::new(State::default()),
            policy,
        }
    }

    /// Jobs waiting to be received.
    pub async fn pending_jobs(&self) -> Vec<DeliveryJob> {
        let state = self.state.lock().await;
        state.ready.iter().map(|entry| entry.job.clone()).collect()
    }

    pub async fn acked_jobs(&self) -> Vec<DeliveryJob> {
        self.state.lock().await.acked.clone()
    }

    /// Dead-lettered jobs with the reason of their final failure.
    pub async fn dead_jobs(&self) -> Vec<(DeliveryJob, String)> {
        self.state.lock().await.dead.clone()
    }

    pub async fn retry_count(&self) -> usize {
        self.state.lock().await.retries
    }

    pub async fn in_flight_count(&self) -> usize {
        self.state.lock().await.in_flight.len()
    }
}

#[async_trait]
impl DeliveryQueue for InMemoryQueue {
    async fn enqueue_batch(&self, jobs: &[DeliveryJob]) -> Result<usize, QueueError> {
        let mut state = self.state.lock().await;
        state.ready.extend(jobs.iter().cloned().map(|job| Entry {
            id: Uuid::new_v4(),
            attempts: 0,
            job,
        }));
        Ok(jobs.len())
    }

    async fn receive(&self, max: usize) -> Result<Vec<QueueMessage>, QueueError> {
        let mut state = self.state.lock().await;
        let lease = Uuid::new_v4();
        let mut messages = Vec::new();

        while messages.len() < max {
            let Some(mut entry) = state.ready.pop_front() else {
                break;
            };
            entry.attempts += 1;
            messages.push(QueueMessage {
                id: entry.id,
                attempts: entry.attempts,
                job: entry.job.clone(),
                lease,
            });
            state.in_flight.insert(entry.id, (lease, entry));
        }

        Ok(messages)
    }

    async fn ack(&self, message: &QueueMessage) -> Result<(), QueueError> {
        let mut state = self.state.lock().await;
        match take_leased(&mut state, message) {
            Some(entry) => state.acked.push(entry.job),
            None => warn!(message_id = %message.id, "Ack ignored; lease no longer held"),
        }
        Ok(())
    }

    async fn retry(&self, message: &QueueMessage, reason: &str) -> Result<(), QueueError> {
        let mut state = self.state.lock().await;
        let Some(entry) = take_leased(&mut state, message) else {
            warn!(message_id = %message.id, "Retry ignored; lease no longer held");
            return Ok(());
        };

        if self.policy.is_exhausted(entry.attempts) {
            state.dead.push((entry.job, reason.to_string()));
        } else {
            state.retries += 1;
            state.ready.push_back(entry);
        }
        Ok(())
    }
}

fn take_leased(state: &mut State, message: &QueueMessage) -> Option<Entry> {
    match state.in_flight.remove(&message.id) {
        Some((lease, entry)) if lease == message.lease => Some(entry),
        Some(other) => {
            state.in_flight.insert(message.id, other);
            None
        }
        None => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notification::{NotificationPhase, WasteTypeRef};
    use chrono::NaiveDate;

    fn job(user: &str) -> DeliveryJob {
        DeliveryJob {
            user_id: user.to_string(),
            phone: "+48606181071".to_string(),
            address_id: 1,
            city_id: 1,
            street_id: 1,
            city_name: "Warszawa".to_string(),
            street_name: "Długa".to_string(),
            notification_preference_id: 1,
            notification_type: NotificationPhase::DayBefore,
            waste_types: vec![WasteTypeRef {
                waste_type_id: 1,
                waste_type_name: "Bio".to_string(),
            }],
            scheduled_date: NaiveDate::from_ymd_opt(2025, 6, 2).unwrap(),
        }
    }

    #[tokio::test]
    async fn receive_respects_batch_size_and_order() {
        let queue = InMemoryQueue::default();
        queue
            .enqueue_batch(&[job("a"), job("b"), job("c")])
            .await
            .unwrap();

        let first = queue.receive(2).await.unwrap();
        assert_eq!(first.len(), 2);
        assert_eq!(first[0].job.user_id, "a");
        assert_eq!(first[1].job.user_id, "b");
        assert_eq!(first[0].attempts, 1);

        let rest = queue.receive(10).await.unwrap();
        assert_eq!(rest.len(), 1);
        assert_eq!(queue.in_flight_count().await, 3);
    }

    #[tokio::test]
    async fn retry_dead_letters_after_budget() {
        let queue = InMemoryQueue::new(RetryPolicy {
            max_attempts: 2,
            ..RetryPolicy::default()
        });
        queue.enqueue_batch(&[job("a")]).await.unwrap();

        let message = queue.receive(1).await.unwrap().remove(0);
        queue.retry(&message, "timeout").await.unwrap();
        assert_eq!(queue.pending_jobs().await.len(), 1);

        let message = queue.receive(1).await.unwrap().remove(0);
        assert_eq!(message.attempts, 2);
        queue.retry(&message, "timeout again").await.unwrap();

        let dead = queue.dead_jobs().await;
        assert_eq!(dead.len(), 1);
        assert_eq!(dead[0].1, "timeout again");
        assert_eq!(queue.retry_count().await, 1);
        assert!(queue.pending_jobs().await.is_empty());
    }

    #[tokio::test]
    async fn ack_with_stale_lease_is_ignored() {
        let queue = InMemoryQueue::default();
        queue.enqueue_batch(&[job("a")]).await.unwrap();

        let mut message = queue.receive(1).await.unwrap().remove(0);
        message.lease = Uuid::new_v4();
        queue.ack(&message).await.unwrap();

        assert!(queue.acked_jobs().await.is_empty());
        assert_eq!(queue.in_flight_count().await, 1);
    }
}
