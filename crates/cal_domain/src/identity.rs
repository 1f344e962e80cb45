//! Stable identity for generated occurrences.
//!
//! A concrete occurrence of a recurring activity is addressed as
//! `<base_id>_<YYYY-MM-DD>`. The composite form only exists at the edges
//! (persistence, UI, reminder keys); inside the crate it is carried as a
//! typed [`OccurrenceId`].

use std::fmt;

use chrono::NaiveDate;

use crate::activity::{Activity, DRAFT_ID};

const DATE_FMT: &str = "%Y-%m-%d";

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct OccurrenceId {
    pub base_id: String,
    pub date: NaiveDate,
}

impl OccurrenceId {
    pub fn new(base_id: impl Into<String>, date: NaiveDate) -> Self {
        Self {
            base_id: base_id.into(),
            date,
        }
    }

    /// Split a composite id. `None` when the input has no `_`, an empty
    /// base part, or a suffix that is not a calendar date.
    pub fn parse(id: &str) -> Option<Self> {
        let (base, suffix) = id.rsplit_once('_')?;
        if base.is_empty() {
            return None;
        }
        let date = NaiveDate::parse_from_str(suffix, DATE_FMT).ok()?;
        Some(Self::new(base, date))
    }
}

impl fmt::Display for OccurrenceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}_{}", self.base_id, self.date.format(DATE_FMT))
    }
}

/// What an incoming id string refers to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ActivityRef {
    /// Creation draft, not yet stored anywhere.
    Draft,
    /// A base record addressed directly.
    Base(String),
    /// One occurrence of a recurring base.
    Instance(OccurrenceId),
}

impl ActivityRef {
    pub fn classify(id: &str) -> Self {
        if id.trim().is_empty() || id == DRAFT_ID {
            return ActivityRef::Draft;
        }
        match OccurrenceId::parse(id) {
            Some(occurrence) => ActivityRef::Instance(occurrence),
            None => ActivityRef::Base(id.to_string()),
        }
    }

    /// The id of the record a mutation should land on.
    pub fn base_id(&self) -> Option<&str> {
        match self {
            ActivityRef::Draft => None,
            ActivityRef::Base(id) => Some(id),
            ActivityRef::Instance(occurrence) => Some(&occurrence.base_id),
        }
    }
}

/// Apply an edit addressed at one occurrence to its base record.
///
/// Edits through the composite-id path are series-wide: the presentation
/// fields move over, while the anchor date, the recurrence rule, the id,
/// the kind, and the provenance marker stay with the base. Changing or
/// clearing the rule requires editing the base directly.
pub fn merge_instance_fields(base: &mut Activity, edited: &Activity) {
    base.title = edited.title.clone();
    base.description = edited.description.clone();
    base.start_time = edited.start_time;
    base.end_time = edited.end_time;
    base.is_all_day = edited.is_all_day;
    base.location = edited.location.clone();
    base.category_color = edited.category_color.clone();
    base.notification = edited.notification;
    base.visibility = edited.visibility;
    base.show_in_calendar = edited.show_in_calendar;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn composite_id_round_trip() {
        let id = OccurrenceId::new("bf2c77d1-aa10-4d5d-9e1c-0f3a2b1c4d5e", date(2024, 1, 15));
        let text = id.to_string();
        assert_eq!(text, "bf2c77d1-aa10-4d5d-9e1c-0f3a2b1c4d5e_2024-01-15");
        assert_eq!(OccurrenceId::parse(&text), Some(id));
    }

    #[test]
    fn base_part_may_itself_contain_underscores() {
        let parsed = OccurrenceId::parse("standup_team_2024-03-04").unwrap();
        assert_eq!(parsed.base_id, "standup_team");
        assert_eq!(parsed.date, date(2024, 3, 4));
    }

    #[test]
    fn non_date_suffixes_are_not_instances() {
        assert_eq!(OccurrenceId::parse("plain-id"), None);
        assert_eq!(OccurrenceId::parse("x_2024-13-40"), None);
        assert_eq!(OccurrenceId::parse("x_snooze_1718000000"), None);
        assert_eq!(OccurrenceId::parse("_2024-01-15"), None);
    }

    #[test]
    fn classify_covers_all_shapes() {
        assert_eq!(ActivityRef::classify("new"), ActivityRef::Draft);
        assert_eq!(ActivityRef::classify("  "), ActivityRef::Draft);
        assert_eq!(
            ActivityRef::classify("abc123"),
            ActivityRef::Base("abc123".to_string())
        );
        // A bare date has no separator, so it reads as a base id.
        assert_eq!(
            ActivityRef::classify("2024-01-15"),
            ActivityRef::Base("2024-01-15".to_string())
        );
        assert_eq!(
            ActivityRef::classify("abc_snooze_1718000000"),
            ActivityRef::Base("abc_snooze_1718000000".to_string())
        );
        assert_eq!(
            ActivityRef::classify("abc_2024-01-15"),
            ActivityRef::Instance(OccurrenceId::new("abc", date(2024, 1, 15)))
        );
    }

    #[test]
    fn base_id_resolution() {
        assert_eq!(ActivityRef::classify("new").base_id(), None);
        assert_eq!(ActivityRef::classify("abc").base_id(), Some("abc"));
        assert_eq!(ActivityRef::classify("abc_2024-01-15").base_id(), Some("abc"));
    }

    #[test]
    fn instance_merge_never_touches_anchor_or_rule() {
        use crate::activity::ActivityKind;
        use crate::recurrence::RecurrenceRule;

        let mut base = Activity::draft(ActivityKind::Event, "Standup", date(2024, 1, 1));
        base.id = "abc".to_string();
        base.recurrence = RecurrenceRule::parse("FREQ=WEEKLY;BYDAY=MO");

        let mut edited = base.clone();
        edited.id = "abc_2024-01-15".to_string();
        edited.title = "Standup (remote)".to_string();
        edited.date = date(2024, 1, 15);
        edited.recurrence = RecurrenceRule::parse("FREQ=DAILY");
        edited.location = Some("Meet".to_string());

        merge_instance_fields(&mut base, &edited);
        assert_eq!(base.title, "Standup (remote)");
        assert_eq!(base.location.as_deref(), Some("Meet"));
        assert_eq!(base.id, "abc");
        assert_eq!(base.date, date(2024, 1, 1));
        assert_eq!(base.recurrence, RecurrenceRule::parse("FREQ=WEEKLY;BYDAY=MO"));
    }
}
