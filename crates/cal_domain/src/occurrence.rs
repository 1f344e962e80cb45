//! Expansion of recurring activities into concrete dates.
//!
//! Generation always walks forward from the base activity's anchor date, so
//! a window that starts mid-series still sees the same alignment (and the
//! same COUNT accounting) as a window that starts at the anchor. Dates the
//! window excludes are still stepped over internally; they just are not
//! returned.

use chrono::{Datelike, Days, Duration, Months, NaiveDate, NaiveTime, Weekday};

use crate::activity::Activity;
use crate::identity::OccurrenceId;
use crate::recurrence::{Frequency, RecurrenceRule};

/// One concrete realization of an activity on a specific date.
///
/// `key` is `None` for singletons; recurring occurrences carry the typed
/// composite identity used to address just this date.
#[derive(Debug, Clone, PartialEq)]
pub struct Occurrence {
    pub activity: Activity,
    pub key: Option<OccurrenceId>,
}

impl Occurrence {
    /// The activity as it would be persisted or scheduled standalone:
    /// recurring occurrences take their composite id, singletons pass
    /// through unchanged.
    pub fn materialized(&self) -> Activity {
        let mut activity = self.activity.clone();
        if let Some(key) = &self.key {
            activity.id = key.to_string();
        }
        activity
    }
}

/// Expand `base` over the inclusive window `[from, to]`.
///
/// Singletons yield themselves when their date falls inside the window;
/// recurring activities yield one occurrence per generated date, each a
/// clone of the base with the date swapped in.
pub fn expand(base: &Activity, from: NaiveDate, to: NaiveDate) -> Vec<Occurrence> {
    match &base.recurrence {
        None => {
            if from <= base.date && base.date <= to {
                vec![Occurrence {
                    activity: base.clone(),
                    key: None,
                }]
            } else {
                Vec::new()
            }
        }
        Some(rule) => occurrences_in_range(base, rule, from, to)
            .into_iter()
            .map(|date| {
                let mut activity = base.clone();
                activity.date = date;
                Occurrence {
                    activity,
                    key: Some(OccurrenceId::new(base.id.clone(), date)),
                }
            })
            .collect(),
    }
}

/// Sorted occurrence dates of `rule` anchored at `base.date`, clipped to
/// `[from, to]`. Empty when the window is inverted or lies entirely before
/// the anchor's series.
pub fn occurrences_in_range(
    base: &Activity,
    rule: &RecurrenceRule,
    from: NaiveDate,
    to: NaiveDate,
) -> Vec<NaiveDate> {
    if from > to || base.date > to {
        return Vec::new();
    }
    let interval = rule.interval.max(1);
    match rule.frequency {
        Frequency::Hourly => hourly(base, rule, interval, from, to),
        Frequency::Daily => daily(base.date, rule, interval, from, to),
        Frequency::Weekly => weekly(base.date, rule, interval, from, to),
        Frequency::Monthly => by_months(base.date, rule, interval, from, to),
        Frequency::Yearly => by_months(base.date, rule, interval.saturating_mul(12), from, to),
    }
}

fn past_until(rule: &RecurrenceRule, date: NaiveDate) -> bool {
    rule.until.is_some_and(|until| date > until)
}

/// Hour steps from the anchor's start instant, collapsed to the distinct
/// days they land on. Every hour step counts toward COUNT, not every day.
fn hourly(
    base: &Activity,
    rule: &RecurrenceRule,
    interval: u32,
    from: NaiveDate,
    to: NaiveDate,
) -> Vec<NaiveDate> {
    let start_time = base.start_time.unwrap_or(NaiveTime::MIN);
    let mut cursor = base.date.and_time(start_time);
    let mut produced = 0u32;
    let mut out = Vec::new();
    loop {
        let date = cursor.date();
        if date > to || past_until(rule, date) {
            break;
        }
        produced += 1;
        if date >= from && out.last() != Some(&date) {
            out.push(date);
        }
        if rule.count.is_some_and(|count| produced >= count) {
            break;
        }
        cursor = match cursor.checked_add_signed(Duration::hours(i64::from(interval))) {
            Some(next) => next,
            None => break,
        };
    }
    out
}

fn daily(
    anchor: NaiveDate,
    rule: &RecurrenceRule,
    interval: u32,
    from: NaiveDate,
    to: NaiveDate,
) -> Vec<NaiveDate> {
    let mut date = anchor;
    let mut produced = 0u32;
    let mut out = Vec::new();
    loop {
        if date > to || past_until(rule, date) {
            break;
        }
        produced += 1;
        if date >= from {
            out.push(date);
        }
        if rule.count.is_some_and(|count| produced >= count) {
            break;
        }
        date = match date.checked_add_days(Days::new(u64::from(interval))) {
            Some(next) => next,
            None => break,
        };
    }
    out
}

/// Week blocks of `interval` weeks aligned to the anchor's Sunday-first
/// week, filtered to the rule's weekday set. An empty set means the
/// anchor's own weekday, so an active series never expands to nothing.
fn weekly(
    anchor: NaiveDate,
    rule: &RecurrenceRule,
    interval: u32,
    from: NaiveDate,
    to: NaiveDate,
) -> Vec<NaiveDate> {
    let days: Vec<Weekday> = if rule.by_day.is_empty() {
        vec![anchor.weekday()]
    } else {
        rule.by_day.clone()
    };
    let week_start = match anchor.checked_sub_days(Days::new(u64::from(
        anchor.weekday().num_days_from_sunday(),
    ))) {
        Some(start) => start,
        None => anchor,
    };

    let mut produced = 0u32;
    let mut out = Vec::new();
    'blocks: for block in 0u64.. {
        let Some(block_start) = week_start.checked_add_days(Days::new(
            block * u64::from(interval) * 7,
        )) else {
            break;
        };
        if block_start > to || past_until(rule, block_start) {
            break;
        }
        for offset in 0..7u64 {
            let Some(candidate) = block_start.checked_add_days(Days::new(offset)) else {
                break 'blocks;
            };
            if candidate < anchor {
                continue;
            }
            // Candidates are strictly increasing across blocks.
            if candidate > to || past_until(rule, candidate) {
                break 'blocks;
            }
            if !days.contains(&candidate.weekday()) {
                continue;
            }
            produced += 1;
            if candidate >= from {
                out.push(candidate);
            }
            if rule.count.is_some_and(|count| produced >= count) {
                break 'blocks;
            }
        }
    }
    out
}

/// Monthly and yearly stepping, always computed as whole months from the
/// anchor so a short target month clamps to its last day (Jan 31 -> Feb 28,
/// Feb 29 -> Feb 28) without drifting the day-of-month for later steps.
fn by_months(
    anchor: NaiveDate,
    rule: &RecurrenceRule,
    months_per_step: u32,
    from: NaiveDate,
    to: NaiveDate,
) -> Vec<NaiveDate> {
    let mut produced = 0u32;
    let mut out = Vec::new();
    for step in 0u32.. {
        let Some(total) = step.checked_mul(months_per_step) else {
            break;
        };
        let Some(date) = anchor.checked_add_months(Months::new(total)) else {
            break;
        };
        if date > to || past_until(rule, date) {
            break;
        }
        produced += 1;
        if date >= from {
            out.push(date);
        }
        if rule.count.is_some_and(|count| produced >= count) {
            break;
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::activity::ActivityKind;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn base_on(d: NaiveDate, rule: &str) -> Activity {
        let mut activity = Activity::draft(ActivityKind::Event, "Series", d);
        activity.id = "A1".to_string();
        activity.recurrence = RecurrenceRule::parse(rule);
        activity
    }

    fn dates(base: &Activity, from: NaiveDate, to: NaiveDate) -> Vec<NaiveDate> {
        let rule = base.recurrence.as_ref().unwrap();
        occurrences_in_range(base, rule, from, to)
    }

    #[test]
    fn inverted_window_and_future_anchor_yield_nothing() {
        let base = base_on(date(2024, 1, 1), "FREQ=DAILY");
        assert!(dates(&base, date(2024, 2, 1), date(2024, 1, 1)).is_empty());
        assert!(dates(&base, date(2023, 1, 1), date(2023, 12, 31)).is_empty());
    }

    #[test]
    fn weekly_with_day_set_anchored_monday() {
        let base = base_on(date(2024, 1, 1), "FREQ=WEEKLY;INTERVAL=1;BYDAY=MO,WE,FR");
        let got = dates(&base, date(2024, 1, 1), date(2024, 1, 10));
        assert_eq!(
            got,
            vec![
                date(2024, 1, 1),  // Mon
                date(2024, 1, 3),  // Wed
                date(2024, 1, 5),  // Fri
                date(2024, 1, 8),  // next Mon
                date(2024, 1, 10), // next Wed
            ]
        );
    }

    #[test]
    fn weekly_days_before_the_anchor_are_skipped() {
        // 2024-01-03 is a Wednesday; the Monday of its week never happened.
        let base = base_on(date(2024, 1, 3), "FREQ=WEEKLY;BYDAY=MO,WE,FR");
        let got = dates(&base, date(2024, 1, 1), date(2024, 1, 8));
        assert_eq!(got, vec![date(2024, 1, 3), date(2024, 1, 5), date(2024, 1, 8)]);
    }

    #[test]
    fn weekly_without_day_set_falls_back_to_anchor_weekday() {
        // 2024-01-02 is a Tuesday.
        let base = base_on(date(2024, 1, 2), "FREQ=WEEKLY;INTERVAL=2");
        let got = dates(&base, date(2024, 1, 1), date(2024, 2, 29));
        assert_eq!(
            got,
            vec![
                date(2024, 1, 2),
                date(2024, 1, 16),
                date(2024, 1, 30),
                date(2024, 2, 13),
                date(2024, 2, 27),
            ]
        );
    }

    #[test]
    fn count_is_exact_over_a_huge_window() {
        let base = base_on(date(2024, 1, 1), "FREQ=DAILY;INTERVAL=3;COUNT=7");
        let got = dates(&base, date(2024, 1, 1), date(2124, 1, 1));
        assert_eq!(got.len(), 7);
        assert_eq!(got.last(), Some(&date(2024, 1, 19)));
    }

    #[test]
    fn until_is_inclusive_and_never_exceeded() {
        let base = base_on(date(2024, 1, 1), "FREQ=DAILY;UNTIL=2024-01-05");
        let got = dates(&base, date(2024, 1, 1), date(2024, 12, 31));
        assert_eq!(got.len(), 5);
        assert!(got.iter().all(|d| *d <= date(2024, 1, 5)));
    }

    #[test]
    fn first_reached_bound_wins_when_both_are_set() {
        // COUNT=3 trips before UNTIL.
        let base = base_on(date(2024, 1, 1), "FREQ=DAILY;COUNT=3;UNTIL=2024-01-31");
        assert_eq!(dates(&base, date(2024, 1, 1), date(2024, 12, 31)).len(), 3);

        // UNTIL trips before COUNT.
        let base = base_on(date(2024, 1, 1), "FREQ=DAILY;COUNT=30;UNTIL=2024-01-04");
        assert_eq!(dates(&base, date(2024, 1, 1), date(2024, 12, 31)).len(), 4);
    }

    #[test]
    fn occurrences_before_the_window_still_consume_count() {
        let base = base_on(date(2024, 1, 1), "FREQ=DAILY;COUNT=10");
        let got = dates(&base, date(2024, 1, 8), date(2024, 1, 31));
        assert_eq!(
            got,
            vec![date(2024, 1, 8), date(2024, 1, 9), date(2024, 1, 10)]
        );
    }

    #[test]
    fn monthly_clamps_to_short_months_without_drifting() {
        let base = base_on(date(2024, 1, 31), "FREQ=MONTHLY");
        let got = dates(&base, date(2024, 1, 1), date(2024, 4, 30));
        assert_eq!(
            got,
            vec![
                date(2024, 1, 31),
                date(2024, 2, 29), // leap year
                date(2024, 3, 31), // back to 31, no drift from the clamp
                date(2024, 4, 30),
            ]
        );

        let base = base_on(date(2023, 1, 31), "FREQ=MONTHLY");
        let got = dates(&base, date(2023, 2, 1), date(2023, 2, 28));
        assert_eq!(got, vec![date(2023, 2, 28)]);
    }

    #[test]
    fn yearly_clamps_leap_day_anchors() {
        let base = base_on(date(2024, 2, 29), "FREQ=YEARLY");
        let got = dates(&base, date(2024, 1, 1), date(2028, 12, 31));
        assert_eq!(
            got,
            vec![
                date(2024, 2, 29),
                date(2025, 2, 28),
                date(2026, 2, 28),
                date(2027, 2, 28),
                date(2028, 2, 28),
            ]
        );
    }

    #[test]
    fn hourly_steps_collapse_to_distinct_days() {
        let mut base = base_on(date(2024, 1, 1), "FREQ=HOURLY;INTERVAL=6");
        base.start_time = NaiveTime::from_hms_opt(8, 0, 0);
        let got = dates(&base, date(2024, 1, 1), date(2024, 1, 3));
        assert_eq!(
            got,
            vec![date(2024, 1, 1), date(2024, 1, 2), date(2024, 1, 3)]
        );
    }

    #[test]
    fn hourly_count_counts_hour_steps() {
        // Steps at +0h, +12h, +24h, +36h, +48h span three calendar days.
        let base = base_on(date(2024, 1, 1), "FREQ=HOURLY;INTERVAL=12;COUNT=5");
        let got = dates(&base, date(2024, 1, 1), date(2024, 12, 31));
        assert_eq!(
            got,
            vec![date(2024, 1, 1), date(2024, 1, 2), date(2024, 1, 3)]
        );
    }

    #[test]
    fn expand_stamps_composite_keys_on_recurring_occurrences() {
        let base = base_on(date(2024, 1, 1), "FREQ=WEEKLY;BYDAY=MO");
        let expanded = expand(&base, date(2024, 1, 1), date(2024, 1, 15));
        assert_eq!(expanded.len(), 3);
        for occurrence in &expanded {
            let key = occurrence.key.as_ref().unwrap();
            assert_eq!(key.base_id, "A1");
            assert_eq!(occurrence.activity.date, key.date);
        }
        assert_eq!(expanded[1].materialized().id, "A1_2024-01-08");
    }

    #[test]
    fn expand_keeps_singletons_keyless() {
        let mut single = Activity::draft(ActivityKind::Task, "One-off", date(2024, 5, 20));
        single.id = "T1".to_string();

        let inside = expand(&single, date(2024, 5, 1), date(2024, 5, 31));
        assert_eq!(inside.len(), 1);
        assert_eq!(inside[0].key, None);
        assert_eq!(inside[0].materialized().id, "T1");

        assert!(expand(&single, date(2024, 6, 1), date(2024, 6, 30)).is_empty());
    }
}
