//! Deferred series cleanup.
//!
//! Removing the materialized future instances of a base can touch a year of
//! dates, so it runs as a queued task instead of inline with the mutation.
//! Every task is stamped with the per-base generation it was created under;
//! any later mutation that lands on the same base bumps the generation, and
//! a drained task that no longer matches simply aborts. That is what makes
//! a long cleanup safely interruptible by a superseding edit or delete.

use std::collections::{HashMap, VecDeque};

use chrono::{Months, NaiveDate};
use parking_lot::Mutex;

use crate::activity::Activity;
use crate::occurrence;

/// Fixed forward horizon for instance cleanup: tomorrow through one year
/// out. Not user-configurable; it bounds the cost of a single pass.
pub fn cleanup_window(today: NaiveDate) -> Option<(NaiveDate, NaiveDate)> {
    let from = today.succ_opt()?;
    let to = from.checked_add_months(Months::new(12))?;
    Some((from, to))
}

#[derive(Debug, Clone)]
pub struct CleanupTask {
    /// Snapshot of the base at enqueue time; the live record may already be
    /// gone from the active set.
    pub activity: Activity,
    pub generation: u64,
    pub from: NaiveDate,
    pub to: NaiveDate,
}

impl CleanupTask {
    pub fn base_id(&self) -> &str {
        &self.activity.id
    }

    /// Composite ids of every occurrence the snapshot generates inside the
    /// task window. The generator that created the instances is also the
    /// eraser.
    pub fn instance_ids(&self) -> Vec<String> {
        occurrence::expand(&self.activity, self.from, self.to)
            .into_iter()
            .filter_map(|occurrence| occurrence.key.map(|key| key.to_string()))
            .collect()
    }
}

/// Pending cleanup work plus the per-base generation registry.
#[derive(Default)]
pub struct MaintenanceQueue {
    pending: Mutex<VecDeque<CleanupTask>>,
    generations: Mutex<HashMap<String, u64>>,
}

impl MaintenanceQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Invalidate all queued work for this base and return the generation
    /// new work should be stamped with. Callers bump only once a mutation
    /// is known to apply; a failed call must leave queued work live.
    pub fn bump_generation(&self, base_id: &str) -> u64 {
        let mut generations = self.generations.lock();
        let counter = generations.entry(base_id.to_string()).or_insert(0);
        *counter += 1;
        *counter
    }

    pub fn generation(&self, base_id: &str) -> u64 {
        self.generations
            .lock()
            .get(base_id)
            .copied()
            .unwrap_or(0)
    }

    pub fn is_stale(&self, task: &CleanupTask) -> bool {
        task.generation != self.generation(task.base_id())
    }

    pub fn enqueue(&self, task: CleanupTask) {
        self.pending.lock().push_back(task);
    }

    pub fn dequeue(&self) -> Option<CleanupTask> {
        self.pending.lock().pop_front()
    }

    pub fn pending_count(&self) -> usize {
        self.pending.lock().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::activity::ActivityKind;
    use crate::recurrence::RecurrenceRule;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn weekly_base() -> Activity {
        let mut activity = Activity::draft(ActivityKind::Event, "Series", date(2024, 1, 1));
        activity.id = "A1".to_string();
        activity.recurrence = RecurrenceRule::parse("FREQ=WEEKLY;BYDAY=MO");
        activity
    }

    #[test]
    fn window_starts_tomorrow_and_spans_a_year() {
        let (from, to) = cleanup_window(date(2024, 6, 15)).unwrap();
        assert_eq!(from, date(2024, 6, 16));
        assert_eq!(to, date(2025, 6, 16));
    }

    #[test]
    fn task_expands_to_composite_ids_only() {
        let task = CleanupTask {
            activity: weekly_base(),
            generation: 1,
            from: date(2024, 1, 2),
            to: date(2024, 1, 31),
        };
        assert_eq!(
            task.instance_ids(),
            vec![
                "A1_2024-01-08",
                "A1_2024-01-15",
                "A1_2024-01-22",
                "A1_2024-01-29",
            ]
        );
    }

    #[test]
    fn singleton_tasks_have_no_instances_to_erase() {
        let mut single = weekly_base();
        single.recurrence = None;
        let task = CleanupTask {
            activity: single,
            generation: 1,
            from: date(2024, 1, 2),
            to: date(2024, 12, 31),
        };
        assert!(task.instance_ids().is_empty());
    }

    #[test]
    fn newer_generations_stale_out_queued_tasks() {
        let queue = MaintenanceQueue::new();
        let generation = queue.bump_generation("A1");
        let task = CleanupTask {
            activity: weekly_base(),
            generation,
            from: date(2024, 1, 2),
            to: date(2024, 12, 31),
        };
        queue.enqueue(task);
        assert_eq!(queue.pending_count(), 1);

        let drained = queue.dequeue().unwrap();
        assert!(!queue.is_stale(&drained));

        queue.bump_generation("A1");
        assert!(queue.is_stale(&drained));
    }

    #[test]
    fn queue_is_fifo_across_bases() {
        let queue = MaintenanceQueue::new();
        for id in ["A1", "B2", "C3"] {
            let mut activity = weekly_base();
            activity.id = id.to_string();
            queue.enqueue(CleanupTask {
                generation: queue.bump_generation(id),
                activity,
                from: date(2024, 1, 2),
                to: date(2024, 12, 31),
            });
        }
        assert_eq!(queue.dequeue().unwrap().base_id(), "A1");
        assert_eq!(queue.dequeue().unwrap().base_id(), "B2");
        assert_eq!(queue.dequeue().unwrap().base_id(), "C3");
        assert!(queue.dequeue().is_none());
    }
}
