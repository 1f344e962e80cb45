//! The activity service: every UI- or worker-facing operation goes through
//! here. It owns the month-expansion cache, the per-base lock map, the
//! maintenance queue, and the outbox of external-calendar work.
//!
//! Ordering contract: a mutation is applied to the store before its
//! reminder is scheduled or cancelled and before any cleanup work is
//! enqueued. Cleanup generations advance only with mutations that apply,
//! so a call that errors out leaves queued cleanup live. External sync
//! never blocks local work; mutations only append intents for `cal_sync`
//! to drain.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use chrono::{Local, NaiveDate, NaiveDateTime, Utc};
use parking_lot::{Mutex, RwLock};
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::activity::{
    Activity, CompletedActivity, DeletedActivity, LeadTime, NotificationSettings,
};
use crate::identity::{merge_instance_fields, ActivityRef, OccurrenceId};
use crate::maintenance::{cleanup_window, CleanupTask, MaintenanceQueue};
use crate::notifications::{reminder_for, snooze_id, ReminderScheduler};
use crate::occurrence::{self, Occurrence};
use crate::store::{ActivityStore, MemoryStore, MonthKey, StoreError};

/// Provider work recorded by mutations on Google-provenance activities.
/// Failures on the provider side never roll back the local write.
#[derive(Debug, Clone, PartialEq)]
pub enum SyncIntent {
    Insert(Activity),
    Update(Activity),
    Delete(Activity),
}

impl SyncIntent {
    pub fn activity(&self) -> &Activity {
        match self {
            SyncIntent::Insert(activity)
            | SyncIntent::Update(activity)
            | SyncIntent::Delete(activity) => activity,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MaintenanceReport {
    pub processed: usize,
    pub instances_removed: usize,
    pub skipped_stale: usize,
    pub aborted_superseded: usize,
}

struct CachedMonth {
    revision: u64,
    occurrences: Vec<Occurrence>,
}

pub struct ActivityService {
    store: Arc<dyn ActivityStore>,
    scheduler: Option<Arc<dyn ReminderScheduler>>,
    maintenance: MaintenanceQueue,
    outbox: Mutex<VecDeque<SyncIntent>>,
    base_locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
    month_cache: RwLock<HashMap<MonthKey, CachedMonth>>,
    revision: AtomicU64,
    all_day_hour: u32,
    maintenance_batch: usize,
}

pub struct ActivityServiceBuilder {
    store: Option<Arc<dyn ActivityStore>>,
    scheduler: Option<Arc<dyn ReminderScheduler>>,
    all_day_hour: u32,
    maintenance_batch: usize,
}

impl Default for ActivityServiceBuilder {
    fn default() -> Self {
        Self {
            store: None,
            scheduler: None,
            all_day_hour: 9,
            maintenance_batch: 64,
        }
    }
}

impl ActivityServiceBuilder {
    pub fn with_store(mut self, store: Arc<dyn ActivityStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn with_scheduler(mut self, scheduler: Arc<dyn ReminderScheduler>) -> Self {
        self.scheduler = Some(scheduler);
        self
    }

    /// Local hour at which all-day reminders are anchored. Defaults to 9.
    pub fn all_day_reminder_hour(mut self, hour: u32) -> Self {
        self.all_day_hour = hour.min(23);
        self
    }

    /// Instances deleted per staleness re-check during cleanup.
    pub fn maintenance_batch(mut self, size: usize) -> Self {
        self.maintenance_batch = size.max(1);
        self
    }

    pub fn build(self) -> ActivityService {
        ActivityService {
            store: self
                .store
                .unwrap_or_else(|| Arc::new(MemoryStore::new())),
            scheduler: self.scheduler,
            maintenance: MaintenanceQueue::new(),
            outbox: Mutex::new(VecDeque::new()),
            base_locks: Mutex::new(HashMap::new()),
            month_cache: RwLock::new(HashMap::new()),
            revision: AtomicU64::new(0),
            all_day_hour: self.all_day_hour,
            maintenance_batch: self.maintenance_batch,
        }
    }
}

impl ActivityService {
    pub fn builder() -> ActivityServiceBuilder {
        ActivityServiceBuilder::default()
    }

    fn base_lock(&self, base_id: &str) -> Arc<Mutex<()>> {
        self.base_locks
            .lock()
            .entry(base_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    fn invalidate_cache(&self) {
        self.revision.fetch_add(1, Ordering::SeqCst);
    }

    fn current_revision(&self) -> u64 {
        self.revision.load(Ordering::SeqCst)
    }

    fn push_intent(&self, intent: SyncIntent) {
        self.outbox.lock().push_back(intent);
    }

    /// Hand all queued provider work to the sync layer.
    pub fn drain_sync_intents(&self) -> Vec<SyncIntent> {
        self.outbox.lock().drain(..).collect()
    }

    pub fn pending_sync_intents(&self) -> usize {
        self.outbox.lock().len()
    }

    pub fn pending_maintenance(&self) -> usize {
        self.maintenance.pending_count()
    }

    fn schedule_reminder(&self, activity: &Activity) {
        let Some(scheduler) = &self.scheduler else {
            return;
        };
        scheduler.cancel(&activity.id);
        if let Some(request) = reminder_for(activity, self.all_day_hour) {
            info!(id = %request.activity_id, fire_at = %request.fire_at, "reminder scheduled");
            scheduler.schedule(request);
        }
    }

    fn cancel_reminder(&self, id: &str) {
        if let Some(scheduler) = &self.scheduler {
            scheduler.cancel(id);
        }
    }

    /// Persist `incoming` according to the shape of its id: drafts get a
    /// fresh UUID, plain ids replace the base record (rule changes
    /// included), composite ids apply series-wide field edits without ever
    /// touching the rule.
    pub fn save_activity(&self, incoming: Activity) -> Result<Activity> {
        match ActivityRef::classify(&incoming.id) {
            ActivityRef::Draft => self.insert_new(incoming),
            ActivityRef::Base(id) => self.replace_base(id, incoming),
            ActivityRef::Instance(key) => self.edit_instance(key, incoming),
        }
    }

    fn insert_new(&self, mut activity: Activity) -> Result<Activity> {
        activity.id = Uuid::new_v4().to_string();
        let lock = self.base_lock(&activity.id);
        let _guard = lock.lock();
        self.store
            .save_activity(&activity)
            .context("saving new activity")?;
        self.maintenance.bump_generation(&activity.id);
        self.invalidate_cache();
        self.schedule_reminder(&activity);
        if activity.is_from_google {
            self.push_intent(SyncIntent::Insert(activity.clone()));
        }
        info!(id = %activity.id, kind = activity.kind.as_str(), "activity created");
        Ok(activity)
    }

    fn replace_base(&self, base_id: String, mut activity: Activity) -> Result<Activity> {
        let lock = self.base_lock(&base_id);
        let _guard = lock.lock();
        activity.id = base_id;
        self.store
            .save_activity(&activity)
            .with_context(|| format!("saving activity {}", activity.id))?;
        self.maintenance.bump_generation(&activity.id);
        self.invalidate_cache();
        self.schedule_reminder(&activity);
        if activity.is_from_google {
            self.push_intent(SyncIntent::Update(activity.clone()));
        }
        info!(id = %activity.id, "activity saved");
        Ok(activity)
    }

    fn edit_instance(&self, key: OccurrenceId, edited: Activity) -> Result<Activity> {
        let lock = self.base_lock(&key.base_id);
        let _guard = lock.lock();
        let mut base = self
            .store
            .activity(&key.base_id)
            .with_context(|| format!("loading base activity {}", key.base_id))?;
        // The generation moves only once the base is known to exist; a
        // failed edit never supersedes queued cleanup for this base.
        self.maintenance.bump_generation(&key.base_id);
        merge_instance_fields(&mut base, &edited);
        self.store
            .save_activity(&base)
            .with_context(|| format!("saving activity {}", base.id))?;
        self.invalidate_cache();

        // The addressed date gets its own reminder; a materialized row
        // exists exactly as long as a reminder needs it.
        let mut instance = base.clone();
        instance.date = key.date;
        instance.id = key.to_string();
        instance.recurrence = None;
        if reminder_for(&instance, self.all_day_hour).is_some() {
            self.store
                .save_activity(&instance)
                .with_context(|| format!("materializing occurrence {}", instance.id))?;
            self.schedule_reminder(&instance);
        } else {
            match self.store.delete_activity(&instance.id) {
                Ok(()) | Err(StoreError::NotFound(_)) => {}
                Err(error) => warn!(id = %instance.id, %error, "dematerializing occurrence failed"),
            }
            self.cancel_reminder(&instance.id);
        }
        info!(id = %base.id, date = %key.date, "series edited via occurrence");
        Ok(base)
    }

    /// Move a base activity to trash, or remove a single materialized
    /// occurrence when addressed by composite id. Deleting an unsaved
    /// draft is a no-op.
    pub fn delete_activity(&self, raw_id: &str) -> Result<()> {
        match ActivityRef::classify(raw_id) {
            ActivityRef::Draft => Ok(()),
            ActivityRef::Base(id) => self.delete_base(&id),
            ActivityRef::Instance(key) => self.delete_instance(&key),
        }
    }

    fn delete_base(&self, base_id: &str) -> Result<()> {
        let lock = self.base_lock(base_id);
        let _guard = lock.lock();
        let base = self
            .store
            .activity(base_id)
            .with_context(|| format!("loading activity {base_id}"))?;
        let generation = self.maintenance.bump_generation(base_id);
        self.store
            .save_deleted(&DeletedActivity::wrap(base.clone()))
            .context("moving activity to trash")?;
        self.store
            .delete_activity(base_id)
            .with_context(|| format!("removing activity {base_id}"))?;
        self.invalidate_cache();
        self.cancel_reminder(base_id);
        if let Some((from, to)) = cleanup_window(Local::now().date_naive()) {
            self.maintenance.enqueue(CleanupTask {
                activity: base.clone(),
                generation,
                from,
                to,
            });
        }
        if base.is_from_google {
            self.push_intent(SyncIntent::Delete(base.clone()));
        }
        info!(id = %base.id, "activity moved to trash");
        Ok(())
    }

    fn delete_instance(&self, key: &OccurrenceId) -> Result<()> {
        let lock = self.base_lock(&key.base_id);
        let _guard = lock.lock();
        let composite = key.to_string();
        match self.store.delete_activity(&composite) {
            Ok(()) => {
                self.invalidate_cache();
                info!(id = %composite, "materialized occurrence removed");
            }
            Err(StoreError::NotFound(_)) => {
                debug!(id = %composite, "occurrence had no materialized row");
            }
            Err(error) => {
                return Err(error).with_context(|| format!("removing occurrence {composite}"));
            }
        }
        self.cancel_reminder(&composite);
        Ok(())
    }

    /// Record completion and drop the record from the active set. A base
    /// id completes the whole series; a composite id records just that
    /// occurrence and leaves the series running.
    pub fn complete_activity(&self, raw_id: &str) -> Result<()> {
        match ActivityRef::classify(raw_id) {
            ActivityRef::Draft => bail!("cannot complete an unsaved draft"),
            ActivityRef::Base(id) => self.complete_base(&id),
            ActivityRef::Instance(key) => self.complete_instance(&key),
        }
    }

    fn complete_base(&self, base_id: &str) -> Result<()> {
        let lock = self.base_lock(base_id);
        let _guard = lock.lock();
        let base = self
            .store
            .activity(base_id)
            .with_context(|| format!("loading activity {base_id}"))?;
        let generation = self.maintenance.bump_generation(base_id);
        self.store
            .save_completed(&CompletedActivity::wrap(base.clone()))
            .context("recording completion")?;
        self.store
            .delete_activity(base_id)
            .with_context(|| format!("removing activity {base_id}"))?;
        self.invalidate_cache();
        self.cancel_reminder(base_id);
        if let Some((from, to)) = cleanup_window(Local::now().date_naive()) {
            self.maintenance.enqueue(CleanupTask {
                activity: base.clone(),
                generation,
                from,
                to,
            });
        }
        if base.is_from_google {
            self.push_intent(SyncIntent::Delete(base.clone()));
        }
        info!(id = %base.id, "activity completed");
        Ok(())
    }

    fn complete_instance(&self, key: &OccurrenceId) -> Result<()> {
        let lock = self.base_lock(&key.base_id);
        let _guard = lock.lock();
        let composite = key.to_string();
        let snapshot = match self.store.activity(&composite) {
            Ok(row) => row,
            Err(StoreError::NotFound(_)) => {
                let mut from_base = self
                    .store
                    .activity(&key.base_id)
                    .with_context(|| format!("loading base activity {}", key.base_id))?;
                from_base.date = key.date;
                from_base.id = composite.clone();
                from_base.recurrence = None;
                from_base
            }
            Err(error) => {
                return Err(error).with_context(|| format!("loading occurrence {composite}"));
            }
        };
        self.store
            .save_completed(&CompletedActivity::wrap(snapshot))
            .context("recording completion")?;
        match self.store.delete_activity(&composite) {
            Ok(()) | Err(StoreError::NotFound(_)) => {}
            Err(error) => {
                return Err(error).with_context(|| format!("removing occurrence {composite}"));
            }
        }
        self.invalidate_cache();
        self.cancel_reminder(&composite);
        info!(id = %composite, "occurrence completed");
        Ok(())
    }

    /// Bring a trashed activity back into the active set.
    pub fn restore_activity(&self, id: &str) -> Result<Activity> {
        let entry = self
            .store
            .deleted_activities()
            .context("listing trash")?
            .into_iter()
            .find(|entry| entry.activity.id == id)
            .with_context(|| format!("no trash entry for activity {id}"))?;
        let lock = self.base_lock(id);
        let _guard = lock.lock();
        let activity = entry.activity;
        self.store
            .save_activity(&activity)
            .with_context(|| format!("restoring activity {id}"))?;
        self.maintenance.bump_generation(id);
        self.store
            .purge_deleted(id)
            .with_context(|| format!("clearing trash entry {id}"))?;
        self.invalidate_cache();
        self.schedule_reminder(&activity);
        if activity.is_from_google {
            self.push_intent(SyncIntent::Insert(activity.clone()));
        }
        info!(id = %activity.id, "activity restored from trash");
        Ok(activity)
    }

    pub fn purge_deleted(&self, id: &str) -> Result<()> {
        self.store
            .purge_deleted(id)
            .with_context(|| format!("purging trash entry {id}"))?;
        info!(id = %id, "trash entry purged");
        Ok(())
    }

    /// Drop one entry from the completion history.
    pub fn remove_completed(&self, id: &str) -> Result<()> {
        self.store
            .remove_completed(id)
            .with_context(|| format!("removing completed entry {id}"))?;
        info!(id = %id, "completed entry removed");
        Ok(())
    }

    pub fn deleted_activities(&self) -> Result<Vec<DeletedActivity>> {
        self.store.deleted_activities().context("listing trash")
    }

    pub fn completed_activities(&self) -> Result<Vec<CompletedActivity>> {
        self.store
            .completed_activities()
            .context("listing completed activities")
    }

    /// Push one reminder to a later instant without touching the series.
    /// The snooze becomes a standalone non-recurring activity with its own
    /// reminder at the requested time.
    pub fn snooze_activity(&self, raw_id: &str, until: NaiveDateTime) -> Result<Activity> {
        let source = match ActivityRef::classify(raw_id) {
            ActivityRef::Draft => bail!("cannot snooze an unsaved draft"),
            ActivityRef::Base(id) => self
                .store
                .activity(&id)
                .with_context(|| format!("loading activity {id}"))?,
            ActivityRef::Instance(key) => {
                let mut base = self
                    .store
                    .activity(&key.base_id)
                    .with_context(|| format!("loading base activity {}", key.base_id))?;
                base.date = key.date;
                base
            }
        };
        let mut snoozed = source;
        snoozed.id = snooze_id(raw_id, Utc::now());
        snoozed.recurrence = None;
        snoozed.date = until.date();
        snoozed.start_time = Some(until.time());
        snoozed.is_all_day = false;
        snoozed.notification = NotificationSettings {
            enabled: true,
            lead: LeadTime::AtStart,
        };
        self.store
            .save_activity(&snoozed)
            .context("saving snoozed activity")?;
        self.invalidate_cache();
        self.schedule_reminder(&snoozed);
        info!(id = %snoozed.id, fire_at = %until, "occurrence snoozed");
        Ok(snoozed)
    }

    /// Expanded, sorted occurrences for a visible month. Results are cached
    /// per month and invalidated by any mutation.
    pub fn occurrences_for_month(&self, month: MonthKey) -> Result<Vec<Occurrence>> {
        let revision = self.current_revision();
        if let Some(cached) = self.month_cache.read().get(&month) {
            if cached.revision == revision {
                return Ok(cached.occurrences.clone());
            }
        }
        let rows = self
            .store
            .activities_for_month(month)
            .with_context(|| format!("querying activities for {month}"))?;
        let occurrences = self.expand_month(month, rows);
        debug!(month = %month, count = occurrences.len(), "month expanded");
        self.month_cache.write().insert(
            month,
            CachedMonth {
                revision,
                occurrences: occurrences.clone(),
            },
        );
        Ok(occurrences)
    }

    pub fn occurrences_on(&self, date: NaiveDate) -> Result<Vec<Occurrence>> {
        Ok(self
            .occurrences_for_month(MonthKey::containing(date))?
            .into_iter()
            .filter(|occurrence| occurrence.activity.date == date)
            .collect())
    }

    fn expand_month(&self, month: MonthKey, rows: Vec<Activity>) -> Vec<Occurrence> {
        let first = month.first_day();
        let last = month.last_day();
        let mut materialized: HashMap<OccurrenceId, Activity> = HashMap::new();
        let mut bases = Vec::new();
        for row in rows {
            match OccurrenceId::parse(&row.id) {
                Some(key) => {
                    materialized.insert(key, row);
                }
                None => bases.push(row),
            }
        }

        let mut out = Vec::new();
        for base in &bases {
            for mut occurrence in occurrence::expand(base, first, last) {
                if let Some(key) = &occurrence.key {
                    // A materialized row stands in for its generated twin.
                    if let Some(row) = materialized.remove(key) {
                        occurrence.activity = row;
                    }
                }
                out.push(occurrence);
            }
        }
        // Rows whose base no longer generates them (or is gone) until
        // cleanup catches up.
        for (key, row) in materialized {
            if row.date >= first && row.date <= last {
                out.push(Occurrence {
                    activity: row,
                    key: Some(key),
                });
            }
        }

        out.sort_by(|a, b| {
            a.activity
                .date
                .cmp(&b.activity.date)
                .then_with(|| b.activity.is_all_day.cmp(&a.activity.is_all_day))
                .then_with(|| a.activity.start_time.cmp(&b.activity.start_time))
                .then_with(|| a.activity.title.cmp(&b.activity.title))
        });
        out
    }

    /// Drain queued cleanup tasks, deleting materialized future instances
    /// in bounded batches. Every batch runs under the task's per-base
    /// lock with staleness re-checked on entry, so a superseding mutation
    /// waits out at most one batch and then aborts the rest of the task
    /// instead of racing it.
    #[instrument(skip(self))]
    pub fn run_pending_maintenance(&self) -> Result<MaintenanceReport> {
        let mut report = MaintenanceReport::default();
        while let Some(task) = self.maintenance.dequeue() {
            report.processed += 1;
            if self.maintenance.is_stale(&task) {
                report.skipped_stale += 1;
                debug!(base = task.base_id(), "cleanup task superseded before start");
                continue;
            }
            let lock = self.base_lock(task.base_id());
            let ids = task.instance_ids();
            let mut aborted = false;
            for chunk in ids.chunks(self.maintenance_batch) {
                let _guard = lock.lock();
                if self.maintenance.is_stale(&task) {
                    aborted = true;
                    break;
                }
                for id in chunk {
                    match self.store.delete_activity(id) {
                        Ok(()) => {
                            report.instances_removed += 1;
                            self.cancel_reminder(id);
                        }
                        Err(StoreError::NotFound(_)) => {}
                        Err(error) => {
                            warn!(id = %id, %error, "instance cleanup failed; continuing");
                        }
                    }
                }
            }
            if aborted {
                report.aborted_superseded += 1;
                debug!(base = task.base_id(), "cleanup task superseded mid-pass");
            }
        }
        if report.instances_removed > 0 {
            self.invalidate_cache();
        }
        info!(
            processed = report.processed,
            removed = report.instances_removed,
            "maintenance pass finished"
        );
        Ok(report)
    }
}
