//! Persistence collaborator: the trait the engine drives, a typed error for
//! the boundary, and an in-memory reference implementation used by tests
//! and by hosts without a durable backend.

use std::collections::HashMap;
use std::fmt;

use chrono::{Datelike, Days, Months, NaiveDate};
use parking_lot::RwLock;
use thiserror::Error;

use crate::activity::{Activity, CompletedActivity, DeletedActivity};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("activity not found: {0}")]
    NotFound(String),
    #[error("storage backend failure: {0}")]
    Backend(String),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// A calendar month used as the store's query granularity. Always holds a
/// valid first-of-month date.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MonthKey(NaiveDate);

impl MonthKey {
    pub fn new(year: i32, month: u32) -> Option<Self> {
        NaiveDate::from_ymd_opt(year, month, 1).map(Self)
    }

    pub fn containing(date: NaiveDate) -> Self {
        Self(date.with_day(1).unwrap_or(date))
    }

    pub fn year(&self) -> i32 {
        self.0.year()
    }

    pub fn month(&self) -> u32 {
        self.0.month()
    }

    pub fn first_day(&self) -> NaiveDate {
        self.0
    }

    pub fn last_day(&self) -> NaiveDate {
        self.0
            .checked_add_months(Months::new(1))
            .and_then(|next| next.checked_sub_days(Days::new(1)))
            .unwrap_or(self.0)
    }
}

impl fmt::Display for MonthKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.format("%Y-%m"))
    }
}

/// Storage operations the engine needs. Implementations are the source of
/// truth for base activities; an id never appears in more than one of the
/// active, trash, and completed collections.
///
/// `activities_for_month` may over-approximate: it must return every
/// activity anchored inside the month plus every recurring activity
/// anchored on or before the month's last day. Callers expand and filter.
/// Implementations that decode records from a backing format should skip
/// a record they cannot read (with a warning) instead of failing the
/// whole query.
pub trait ActivityStore: Send + Sync {
    fn save_activity(&self, activity: &Activity) -> StoreResult<()>;
    fn delete_activity(&self, id: &str) -> StoreResult<()>;
    fn activity(&self, id: &str) -> StoreResult<Activity>;
    fn activities_for_month(&self, month: MonthKey) -> StoreResult<Vec<Activity>>;

    fn save_deleted(&self, entry: &DeletedActivity) -> StoreResult<()>;
    fn deleted_activities(&self) -> StoreResult<Vec<DeletedActivity>>;
    fn purge_deleted(&self, id: &str) -> StoreResult<()>;

    fn save_completed(&self, entry: &CompletedActivity) -> StoreResult<()>;
    fn completed_activities(&self) -> StoreResult<Vec<CompletedActivity>>;
    fn remove_completed(&self, id: &str) -> StoreResult<()>;
}

/// Reference store backed by in-process maps.
#[derive(Default)]
pub struct MemoryStore {
    active: RwLock<HashMap<String, Activity>>,
    trash: RwLock<HashMap<String, DeletedActivity>>,
    completed: RwLock<HashMap<String, CompletedActivity>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn active_count(&self) -> usize {
        self.active.read().len()
    }
}

impl ActivityStore for MemoryStore {
    fn save_activity(&self, activity: &Activity) -> StoreResult<()> {
        if activity.is_draft() {
            return Err(StoreError::Backend(
                "draft activities are never persisted".to_string(),
            ));
        }
        self.active
            .write()
            .insert(activity.id.clone(), activity.clone());
        Ok(())
    }

    fn delete_activity(&self, id: &str) -> StoreResult<()> {
        match self.active.write().remove(id) {
            Some(_) => Ok(()),
            None => Err(StoreError::NotFound(id.to_string())),
        }
    }

    fn activity(&self, id: &str) -> StoreResult<Activity> {
        self.active
            .read()
            .get(id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(id.to_string()))
    }

    fn activities_for_month(&self, month: MonthKey) -> StoreResult<Vec<Activity>> {
        let first = month.first_day();
        let last = month.last_day();
        let mut found: Vec<Activity> = self
            .active
            .read()
            .values()
            .filter(|activity| {
                let anchored_inside = activity.date >= first && activity.date <= last;
                let series_reaches = activity.is_recurring() && activity.date <= last;
                anchored_inside || series_reaches
            })
            .cloned()
            .collect();
        found.sort_by(|a, b| a.date.cmp(&b.date).then_with(|| a.id.cmp(&b.id)));
        Ok(found)
    }

    fn save_deleted(&self, entry: &DeletedActivity) -> StoreResult<()> {
        self.trash
            .write()
            .insert(entry.activity.id.clone(), entry.clone());
        Ok(())
    }

    fn deleted_activities(&self) -> StoreResult<Vec<DeletedActivity>> {
        let mut entries: Vec<DeletedActivity> = self.trash.read().values().cloned().collect();
        entries.sort_by(|a, b| b.deleted_at.cmp(&a.deleted_at));
        Ok(entries)
    }

    fn purge_deleted(&self, id: &str) -> StoreResult<()> {
        match self.trash.write().remove(id) {
            Some(_) => Ok(()),
            None => Err(StoreError::NotFound(id.to_string())),
        }
    }

    fn save_completed(&self, entry: &CompletedActivity) -> StoreResult<()> {
        self.completed
            .write()
            .insert(entry.activity.id.clone(), entry.clone());
        Ok(())
    }

    fn completed_activities(&self) -> StoreResult<Vec<CompletedActivity>> {
        let mut entries: Vec<CompletedActivity> =
            self.completed.read().values().cloned().collect();
        entries.sort_by(|a, b| b.completed_at.cmp(&a.completed_at));
        Ok(entries)
    }

    fn remove_completed(&self, id: &str) -> StoreResult<()> {
        match self.completed.write().remove(id) {
            Some(_) => Ok(()),
            None => Err(StoreError::NotFound(id.to_string())),
        }
    }
}
