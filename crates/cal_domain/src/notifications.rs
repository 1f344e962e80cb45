//! Bridge between saved activities and the platform reminder collaborator.

use chrono::{DateTime, Duration, NaiveDateTime, NaiveTime, Utc};

use crate::activity::Activity;

/// A single point-in-time reminder, keyed by the effective activity id
/// (base id, or composite id when one occurrence was addressed).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReminderRequest {
    pub activity_id: String,
    pub title: String,
    pub body: String,
    pub fire_at: NaiveDateTime,
}

/// Abstraction over platform alarm/notification delivery. Implementations
/// own their delivery errors and must tolerate `cancel` for ids that were
/// never scheduled.
pub trait ReminderScheduler: Send + Sync {
    fn schedule(&self, request: ReminderRequest);
    fn cancel(&self, activity_id: &str);
}

/// Compute the reminder for an activity, or `None` when reminders are off.
///
/// All-day activities (and activities without a start time) fire relative
/// to `all_day_hour` o'clock local time.
pub fn reminder_for(activity: &Activity, all_day_hour: u32) -> Option<ReminderRequest> {
    let lead_minutes = activity.notification.effective_lead_minutes()?;
    let start_time = activity
        .start_time
        .filter(|_| !activity.is_all_day)
        .or_else(|| NaiveTime::from_hms_opt(all_day_hour, 0, 0))?;
    let fire_at = activity
        .date
        .and_time(start_time)
        .checked_sub_signed(Duration::minutes(lead_minutes))?;
    let body = if activity.is_all_day {
        format!("All day on {}", activity.date.format("%Y-%m-%d"))
    } else {
        format!(
            "Starts {} at {}",
            activity.date.format("%Y-%m-%d"),
            start_time.format("%H:%M")
        )
    };
    Some(ReminderRequest {
        activity_id: activity.id.clone(),
        title: activity.title.clone(),
        body,
        fire_at,
    })
}

/// Id for the standalone activity a snooze produces. The timestamp suffix
/// keeps snoozes of the same occurrence distinct and keeps the id outside
/// the composite `base_date` namespace.
pub fn snooze_id(effective_id: &str, at: DateTime<Utc>) -> String {
    format!("{}_snooze_{}", effective_id, at.timestamp())
}
