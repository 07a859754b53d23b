//! # Notification Matcher
//!
//! Clock-driven job that finds every enabled preference whose local hour is
//! the current one, checks the address's collection schedule for the phase's
//! target date, and enqueues one delivery job per match as a single batch.
//!
//! A failed tick enqueues nothing; the next tick re-evaluates from scratch.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use metrics::{counter, histogram};
use serde::Serialize;
use sea_orm::DatabaseConnection;
use tokio::time::{Duration, Instant, sleep};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use crate::clock::{LocalClock, TimeSlot};
use crate::config::MatcherConfig;
use crate::error::PipelineError;
use crate::notification::{DeliveryJob, NotificationPhase};
use crate::phone::to_wire_format;
use crate::queue::DeliveryQueue;
use crate::repositories::{
    CollectionIndex, DueCandidate, NotificationPreferenceRepository, WasteScheduleRepository,
};

/// Per-tick counters, also returned to `tick` callers.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TickSummary {
    pub local_hour: u32,
    pub candidates: usize,
    pub jobs_enqueued: usize,
    pub skipped_no_collection: usize,
    pub skipped_invalid_phone: usize,
    pub skipped_unknown_type: usize,
}

/// Why a due candidate produced no job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
    UnknownType(String),
    InvalidPhone,
    NoCollection,
}

/// Background matcher service.
pub struct NotificationMatcher {
    preferences: NotificationPreferenceRepository,
    schedules: WasteScheduleRepository,
    queue: Arc<dyn DeliveryQueue>,
    clock: LocalClock,
    tick_interval: Duration,
}

impl NotificationMatcher {
    pub fn new(
        db: DatabaseConnection,
        queue: Arc<dyn DeliveryQueue>,
        config: &MatcherConfig,
    ) -> Self {
        Self {
            preferences: NotificationPreferenceRepository::new(db.clone()),
            schedules: WasteScheduleRepository::new(db),
            queue,
            clock: LocalClock::from_mode(config.clock),
            tick_interval: Duration::from_secs(config.tick_interval_seconds),
        }
    }

    /// Run the matcher loop until the shutdown token fires.
    #[instrument(skip_all)]
    pub async fn run(self, shutdown: CancellationToken) -> Result<(), PipelineError> {
        info!(
            tick_interval_seconds = self.tick_interval.as_secs(),
            clock = ?self.clock,
            "Starting notification matcher"
        );

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    info!("Notification matcher shutdown requested");
                    break;
                }
                _ = sleep(self.tick_interval) => {
                    if let Err(err) = self.tick().await {
                        error!(error = ?err, "Matcher tick failed");
                    }
                }
            }
        }

        info!("Notification matcher stopped");
        Ok(())
    }

    pub async fn tick(&self) -> Result<TickSummary, PipelineError> {
        self.tick_at(Utc::now()).await
    }

    /// Evaluates the time slot containing `now` and enqueues its jobs.
    #[instrument(skip(self))]
    pub async fn tick_at(&self, now: DateTime<Utc>) -> Result<TickSummary, PipelineError> {
        let started = Instant::now();
        let slot = self.clock.slot(now);
        let (jobs, mut summary) = self.collect_jobs(&slot).await?;

        if !jobs.is_empty() {
            summary.jobs_enqueued = self.queue.enqueue_batch(&jobs).await?;
        }

        histogram!("reminder_matcher_tick_duration_ms")
            .record(started.elapsed().as_secs_f64() * 1_000.0);
        counter!("reminder_matcher_jobs_enqueued_total").increment(summary.jobs_enqueued as u64);

        info!(
            local_hour = slot.local_hour,
            today = %slot.today,
            tomorrow = %slot.tomorrow,
            candidates = summary.candidates,
            enqueued = summary.jobs_enqueued,
            "Matcher tick completed"
        );
        debug!(
            skipped_no_collection = summary.skipped_no_collection,
            skipped_invalid_phone = summary.skipped_invalid_phone,
            skipped_unknown_type = summary.skipped_unknown_type,
            "Matcher tick skip counts"
        );

        Ok(summary)
    }

    /// Builds the jobs for one slot without enqueueing them.
    pub async fn collect_jobs(
        &self,
        slot: &TimeSlot,
    ) -> Result<(Vec<DeliveryJob>, TickSummary), PipelineError> {
        let (candidates, tomorrow_index, today_index) = tokio::try_join!(
            self.preferences.find_due_candidates(slot.local_hour),
            self.schedules.collection_index(slot.tomorrow),
            self.schedules.collection_index(slot.today),
        )?;

        let mut summary = TickSummary {
            local_hour: slot.local_hour,
            candidates: candidates.len(),
            ..Default::default()
        };

        let mut jobs = Vec::new();
        for candidate in &candidates {
            match build_job(candidate, slot, &today_index, &tomorrow_index) {
                Ok(job) => jobs.push(job),
                Err(SkipReason::NoCollection) => summary.skipped_no_collection += 1,
                Err(SkipReason::InvalidPhone) => {
                    summary.skipped_invalid_phone += 1;
                    warn!(
                        user_id = %candidate.user_id,
                        preference_id = candidate.preference_id,
                        "Skipping candidate with unusable phone number"
                    );
                }
                Err(SkipReason::UnknownType(kind)) => {
                    summary.skipped_unknown_type += 1;
                    warn!(
                        preference_id = candidate.preference_id,
                        notification_type = %kind,
                        "Skipping preference with unknown notification type"
                    );
                }
            }
        }

        Ok((jobs, summary))
    }
}

/// Turns one candidate into a job if its phase's target date has a collection.
pub fn build_job(
    candidate: &DueCandidate,
    slot: &TimeSlot,
    today: &CollectionIndex,
    tomorrow: &CollectionIndex,
) -> Result<DeliveryJob, SkipReason> {
    let phase: NotificationPhase = candidate
        .notification_type
        .parse()
        .map_err(|_| SkipReason::UnknownType(candidate.notification_type.clone()))?;

    let index = match phase {
        NotificationPhase::DayBefore => tomorrow,
        NotificationPhase::SameDay => today,
    };
    let waste_types = index.waste_types_for(candidate.city_id, candidate.street_id);
    if waste_types.is_empty() {
        return Err(SkipReason::NoCollection);
    }

    let phone = to_wire_format(&candidate.phone).map_err(|_| SkipReason::InvalidPhone)?;

    Ok(DeliveryJob {
        user_id: candidate.user_id.clone(),
        phone,
        address_id: candidate.address_id,
        city_id: candidate.city_id,
        street_id: candidate.street_id,
        city_name: candidate.city_name.clone(),
        street_name: candidate.street_name.clone(),
        notification_preference_id: candidate.preference_id,
        notification_type: phase,
        waste_types,
        scheduled_date: slot.target_date(phase),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notification::WasteTypeRef;
    use chrono::NaiveDate;

    fn slot() -> TimeSlot {
        TimeSlot {
            local_hour: 19,
            local_minute: 0,
            today: NaiveDate::from_ymd_opt(2025, 6, 1).unwrap(),
            tomorrow: NaiveDate::from_ymd_opt(2025, 6, 2).unwrap(),
        }
    }

    fn candidate(kind: &str) -> DueCandidate {
        DueCandidate {
            preference_id: 5,
            notification_type: kind.to_string(),
            user_id: "user-1".to_string(),
            phone: "606 181 071".to_string(),
            address_id: 3,
            city_id: 1,
            street_id: 10,
            city_name: "Warszawa".to_string(),
            street_name: "Długa".to_string(),
        }
    }

    fn index_with_bio() -> CollectionIndex {
        let mut index = CollectionIndex::default();
        index.insert(
            1,
            Some(10),
            WasteTypeRef {
                waste_type_id: 1,
                waste_type_name: "Bio".to_string(),
            },
        );
        index
    }

    #[test]
    fn day_before_targets_tomorrow() {
        let job = build_job(
            &candidate("day_before"),
            &slot(),
            &CollectionIndex::default(),
            &index_with_bio(),
        )
        .unwrap();

        assert_eq!(job.scheduled_date, slot().tomorrow);
        assert_eq!(job.notification_type, NotificationPhase::DayBefore);
        assert_eq!(job.phone, "+48606181071");
        assert_eq!(job.waste_type_names(), vec!["Bio"]);
        assert_eq!(job.notification_preference_id, 5);
    }

    #[test]
    fn same_day_targets_today() {
        let job = build_job(
            &candidate("same_day"),
            &slot(),
            &index_with_bio(),
            &CollectionIndex::default(),
        )
        .unwrap();
        assert_eq!(job.scheduled_date, slot().today);
    }

    #[test]
    fn phase_must_match_collection_date() {
        let err = build_job(
            &candidate("day_before"),
            &slot(),
            &index_with_bio(),
            &CollectionIndex::default(),
        )
        .unwrap_err();
        assert_eq!(err, SkipReason::NoCollection);
    }

    #[test]
    fn unknown_type_and_bad_phone_are_skipped() {
        let err = build_job(
            &candidate("weekly"),
            &slot(),
            &index_with_bio(),
            &index_with_bio(),
        )
        .unwrap_err();
        assert_eq!(err, SkipReason::UnknownType("weekly".to_string()));

        let mut bad_phone = candidate("same_day");
        bad_phone.phone = "12345".to_string();
        let err = build_job(&bad_phone, &slot(), &index_with_bio(), &index_with_bio()).unwrap_err();
        assert_eq!(err, SkipReason::InvalidPhone);
    }
}
