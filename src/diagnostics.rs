//! Per-user readiness report.
//!
//! Explains why a user would or would not receive a reminder at a given
//! instant, using the same clock, phone rules and schedule index as the
//! matcher.

use chrono::{DateTime, NaiveDate, Utc};
use sea_orm::{ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, QueryOrder};
use serde::Serialize;
use tracing::{debug, instrument};

use crate::clock::{LocalClock, TimeSlot};
use crate::error::{PipelineError, map_db_err};
use crate::models::{address, city, notification_preference, street, user};
use crate::notification::NotificationPhase;
use crate::phone::to_wire_format;
use crate::repositories::{
    CollectionIndex, NotificationPreferenceRepository, WasteScheduleRepository,
};

/// A reason the pipeline will not reach the user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "code", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DiagnosticIssue {
    NoPhone,
    InvalidPhone { phone: String },
    NoAddresses,
    MissingCity { address_id: i32 },
    MissingStreet { address_id: i32 },
    NoNotificationPreferences,
    AllNotificationsDisabled,
    HourMismatch {
        current_hour: u32,
        configured_hours: Vec<i32>,
    },
    NoCollectionsForDates {
        today: NaiveDate,
        tomorrow: NaiveDate,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PreferenceReport {
    pub preference_id: i32,
    pub notification_type: String,
    pub hour: i32,
    pub minute: i32,
    pub enabled: bool,
    pub matches_current_hour: bool,
    pub target_date: Option<NaiveDate>,
    pub waste_types: Vec<String>,
    pub would_notify_now: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AddressReport {
    pub address_id: i32,
    pub city_name: Option<String>,
    pub street_name: Option<String>,
    pub preferences: Vec<PreferenceReport>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DiagnosticReport {
    pub user_id: String,
    pub checked_at: DateTime<Utc>,
    pub local_hour: u32,
    pub local_minute: u32,
    pub today: NaiveDate,
    pub tomorrow: NaiveDate,
    pub phone: Option<String>,
    pub addresses: Vec<AddressReport>,
    pub issues: Vec<DiagnosticIssue>,
    pub would_notify_now: bool,
}

pub struct NotificationDiagnostics {
    db: DatabaseConnection,
    preferences: NotificationPreferenceRepository,
    schedules: WasteScheduleRepository,
    clock: LocalClock,
}

impl NotificationDiagnostics {
    pub fn new(db: DatabaseConnection, clock: LocalClock) -> Self {
        Self {
            preferences: NotificationPreferenceRepository::new(db.clone()),
            schedules: WasteScheduleRepository::new(db.clone()),
            db,
            clock,
        }
    }

    #[instrument(skip(self))]
    pub async fn diagnose(
        &self,
        user_id: &str,
        now: DateTime<Utc>,
    ) -> Result<DiagnosticReport, PipelineError> {
        let user = user::Entity::find_by_id(user_id.to_string())
            .one(&self.db)
            .await
            .map_err(|e| map_db_err("load user for diagnostics", e))?
            .ok_or_else(|| PipelineError::UserNotFound(user_id.to_string()))?;

        let slot = self.clock.slot(now);
        let mut issues = Vec::new();

        let phone_ok = match user.phone.as_deref() {
            None => {
                issues.push(DiagnosticIssue::NoPhone);
                false
            }
            Some(phone) if to_wire_format(phone).is_err() => {
                issues.push(DiagnosticIssue::InvalidPhone {
                    phone: phone.to_string(),
                });
                false
            }
            Some(_) => true,
        };

        let addresses = address::Entity::find()
            .filter(address::Column::UserId.eq(user_id))
            .order_by_asc(address::Column::Id)
            .all(&self.db)
            .await
            .map_err(|e| map_db_err("load addresses for diagnostics", e))?;
        if addresses.is_empty() {
            issues.push(DiagnosticIssue::NoAddresses);
        }

        let preferences = self.preferences.list_for_user(user_id).await?;
        let enabled: Vec<&notification_preference::Model> =
            preferences.iter().filter(|p| p.enabled).collect();
        if preferences.is_empty() {
            issues.push(DiagnosticIssue::NoNotificationPreferences);
        } else if enabled.is_empty() {
            issues.push(DiagnosticIssue::AllNotificationsDisabled);
        } else if !enabled.iter().any(|p| p.hour == slot.local_hour as i32) {
            let mut configured_hours: Vec<i32> = enabled.iter().map(|p| p.hour).collect();
            configured_hours.sort_unstable();
            configured_hours.dedup();
            issues.push(DiagnosticIssue::HourMismatch {
                current_hour: slot.local_hour,
                configured_hours,
            });
        }

        let today = self.schedules.collection_index(slot.today).await?;
        let tomorrow = self.schedules.collection_index(slot.tomorrow).await?;

        let mut reports = Vec::with_capacity(addresses.len());
        let mut any_collection = false;
        let mut any_complete = false;
        for address in &addresses {
            if address.city_id.is_none() {
                issues.push(DiagnosticIssue::MissingCity {
                    address_id: address.id,
                });
            }
            if address.street_id.is_none() {
                issues.push(DiagnosticIssue::MissingStreet {
                    address_id: address.id,
                });
            }

            let (city_name, street_name) = self.location_names(address).await?;
            let location = address.city_id.zip(address.street_id);
            any_complete |= location.is_some();

            let address_preferences = preferences
                .iter()
                .filter(|p| p.address_id == address.id)
                .map(|p| {
                    let report =
                        preference_report(p, &slot, location, phone_ok, &today, &tomorrow);
                    any_collection |= p.enabled && !report.waste_types.is_empty();
                    report
                })
                .collect();

            reports.push(AddressReport {
                address_id: address.id,
                city_name,
                street_name,
                preferences: address_preferences,
            });
        }

        if any_complete && !enabled.is_empty() && !any_collection {
            issues.push(DiagnosticIssue::NoCollectionsForDates {
                today: slot.today,
                tomorrow: slot.tomorrow,
            });
        }

        let would_notify_now = reports
            .iter()
            .flat_map(|a| &a.preferences)
            .any(|p| p.would_notify_now);

        debug!(issues = issues.len(), would_notify_now, "Diagnostics computed");
        Ok(DiagnosticReport {
            user_id: user.id,
            checked_at: now,
            local_hour: slot.local_hour,
            local_minute: slot.local_minute,
            today: slot.today,
            tomorrow: slot.tomorrow,
            phone: user.phone,
            addresses: reports,
            issues,
            would_notify_now,
        })
    }

    async fn location_names(
        &self,
        address: &address::Model,
    ) -> Result<(Option<String>, Option<String>), PipelineError> {
        let city_name = match address.city_id {
            Some(id) => city::Entity::find_by_id(id)
                .one(&self.db)
                .await
                .map_err(|e| map_db_err("load city for diagnostics", e))?
                .map(|c| c.name),
            None => None,
        };
        let street_name = match address.street_id {
            Some(id) => street::Entity::find_by_id(id)
                .one(&self.db)
                .await
                .map_err(|e| map_db_err("load street for diagnostics", e))?
                .map(|s| s.name),
            None => None,
        };
        Ok((city_name, street_name))
    }
}

fn preference_report(
    preference: &notification_preference::Model,
    slot: &TimeSlot,
    location: Option<(i32, i32)>,
    phone_ok: bool,
    today: &CollectionIndex,
    tomorrow: &CollectionIndex,
) -> PreferenceReport {
    let phase = preference
        .notification_type
        .parse::<NotificationPhase>()
        .ok();
    let target_date = phase.map(|phase| slot.target_date(phase));

    let waste_types = match (phase, location) {
        (Some(phase), Some((city_id, street_id))) => {
            let index = match phase {
                NotificationPhase::DayBefore => tomorrow,
                NotificationPhase::SameDay => today,
            };
            index
                .waste_types_for(city_id, street_id)
                .into_iter()
                .map(|w| w.waste_type_name)
                .collect()
        }
        _ => Vec::new(),
    };

    let matches_current_hour = preference.hour == slot.local_hour as i32;
    PreferenceReport {
        preference_id: preference.id,
        notification_type: preference.notification_type.clone(),
        hour: preference.hour,
        minute: preference.minute,
        enabled: preference.enabled,
        matches_current_hour,
        target_date,
        would_notify_now: phone_ok
            && preference.enabled
            && matches_current_hour
            && !waste_types.is_empty(),
        waste_types,
    }
}
