use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use serde::{Deserialize, Serialize};

use crate::recurrence::RecurrenceRule;

/// Sentinel id carried by activities that are still being created in the UI.
/// Drafts are never persisted under this id; a real UUID is assigned on save.
pub const DRAFT_ID: &str = "new";

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ActivityKind {
    Task,
    Event,
    Note,
    Birthday,
}

impl ActivityKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActivityKind::Task => "task",
            ActivityKind::Event => "event",
            ActivityKind::Note => "note",
            ActivityKind::Birthday => "birthday",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "task" => Some(ActivityKind::Task),
            "event" => Some(ActivityKind::Event),
            "note" => Some(ActivityKind::Note),
            "birthday" => Some(ActivityKind::Birthday),
            _ => None,
        }
    }

    /// Fallback category color used when the user has not picked one.
    pub fn default_color(&self) -> &'static str {
        match self {
            ActivityKind::Task => "#4F6D7A",
            ActivityKind::Event => "#C0392B",
            ActivityKind::Note => "#7D8B4E",
            ActivityKind::Birthday => "#9B59B6",
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum Visibility {
    Low,
    Medium,
    High,
}

impl Default for Visibility {
    fn default() -> Self {
        Visibility::Medium
    }
}

/// How far ahead of the activity's start the reminder should fire.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum LeadTime {
    None,
    AtStart,
    TenMinutes,
    ThirtyMinutes,
    OneHour,
    OneDay,
    Custom { minutes: u32 },
}

impl LeadTime {
    /// Minutes before the start instant, or `None` when no reminder applies.
    pub fn offset_minutes(&self) -> Option<i64> {
        match self {
            LeadTime::None => None,
            LeadTime::AtStart => Some(0),
            LeadTime::TenMinutes => Some(10),
            LeadTime::ThirtyMinutes => Some(30),
            LeadTime::OneHour => Some(60),
            LeadTime::OneDay => Some(24 * 60),
            LeadTime::Custom { minutes } => Some(i64::from(*minutes)),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct NotificationSettings {
    pub enabled: bool,
    pub lead: LeadTime,
}

impl Default for NotificationSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            lead: LeadTime::None,
        }
    }
}

impl NotificationSettings {
    /// Effective lead in minutes; `None` when reminders are off for this
    /// activity, either via the flag or a `LeadTime::None` lead.
    pub fn effective_lead_minutes(&self) -> Option<i64> {
        if !self.enabled {
            return None;
        }
        self.lead.offset_minutes()
    }
}

/// A schedulable unit: the base record a recurrence rule hangs off.
///
/// An activity without a rule is a singleton occurring only on `date`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Activity {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    pub date: NaiveDate,
    #[serde(default)]
    pub start_time: Option<NaiveTime>,
    #[serde(default)]
    pub end_time: Option<NaiveTime>,
    pub is_all_day: bool,
    pub kind: ActivityKind,
    pub category_color: String,
    #[serde(default)]
    pub visibility: Visibility,
    pub show_in_calendar: bool,
    #[serde(default)]
    pub notification: NotificationSettings,
    #[serde(default, with = "crate::recurrence::wire")]
    pub recurrence: Option<RecurrenceRule>,
    #[serde(default)]
    pub is_from_google: bool,
    #[serde(default)]
    pub location: Option<String>,
}

impl Activity {
    /// Fresh creation draft carrying the sentinel id.
    pub fn draft(kind: ActivityKind, title: impl Into<String>, date: NaiveDate) -> Self {
        Self {
            id: DRAFT_ID.to_string(),
            title: title.into(),
            description: None,
            date,
            start_time: None,
            end_time: None,
            is_all_day: true,
            kind,
            category_color: kind.default_color().to_string(),
            visibility: Visibility::default(),
            show_in_calendar: true,
            notification: NotificationSettings::default(),
            recurrence: None,
            is_from_google: false,
            location: None,
        }
    }

    pub fn is_draft(&self) -> bool {
        self.id.trim().is_empty() || self.id == DRAFT_ID
    }

    pub fn is_recurring(&self) -> bool {
        self.recurrence.is_some()
    }
}

/// Trash entry wrapping the original record so it can be restored verbatim.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DeletedActivity {
    pub activity: Activity,
    pub deleted_at: DateTime<Utc>,
}

impl DeletedActivity {
    pub fn wrap(activity: Activity) -> Self {
        Self {
            activity,
            deleted_at: Utc::now(),
        }
    }
}

/// Completion snapshot kept for history and statistics.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CompletedActivity {
    pub activity: Activity,
    pub completed_at: DateTime<Utc>,
}

impl CompletedActivity {
    pub fn wrap(activity: Activity) -> Self {
        Self {
            activity,
            completed_at: Utc::now(),
        }
    }
}
