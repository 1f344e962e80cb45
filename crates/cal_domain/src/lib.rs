//! Calendar domain engine.
//!
//! The crate owns the hard parts of a personal calendar: parsing and
//! emitting recurrence rules, expanding recurring activities into concrete
//! dated occurrences, addressing a single occurrence of a series, and the
//! mutation protocol that keeps month views, reminders, trash/completion
//! history, and external calendar sync consistent with each other.
//!
//! Hosts plug in collaborators at the edges: an [`store::ActivityStore`]
//! for persistence, a [`notifications::ReminderScheduler`] for platform
//! alarms, and (via the `cal_sync` crate) an external calendar provider.
//! Everything in between is [`service::ActivityService`].

pub mod activity;
pub mod identity;
pub mod maintenance;
pub mod notifications;
pub mod occurrence;
pub mod recurrence;
pub mod service;
pub mod store;

pub use activity::{
    Activity, ActivityKind, CompletedActivity, DeletedActivity, LeadTime, NotificationSettings,
    Visibility, DRAFT_ID,
};
pub use identity::{merge_instance_fields, ActivityRef, OccurrenceId};
pub use notifications::{reminder_for, ReminderRequest, ReminderScheduler};
pub use occurrence::{expand, occurrences_in_range, Occurrence};
pub use recurrence::{Frequency, RecurrenceRule};
pub use service::{ActivityService, ActivityServiceBuilder, MaintenanceReport, SyncIntent};
pub use store::{ActivityStore, MemoryStore, MonthKey, StoreError, StoreResult};
