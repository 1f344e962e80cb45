//! Recurrence rules and their wire format.
//!
//! Rules travel as a single `KEY=VALUE;KEY=VALUE` string, e.g.
//! `FREQ=WEEKLY;INTERVAL=2;BYDAY=MO,WE,FR;UNTIL=2024-06-30`. Parsing is
//! tolerant of junk; emission always uses the fixed key order above so a
//! parsed rule re-emits byte-for-byte.

use std::fmt;

use chrono::{NaiveDate, Weekday};

const DATE_FMT: &str = "%Y-%m-%d";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Frequency {
    Hourly,
    Daily,
    Weekly,
    Monthly,
    Yearly,
}

impl Frequency {
    pub fn as_str(&self) -> &'static str {
        match self {
            Frequency::Hourly => "HOURLY",
            Frequency::Daily => "DAILY",
            Frequency::Weekly => "WEEKLY",
            Frequency::Monthly => "MONTHLY",
            Frequency::Yearly => "YEARLY",
        }
    }

    fn parse(value: &str) -> Option<Self> {
        match value.to_ascii_uppercase().as_str() {
            "HOURLY" => Some(Frequency::Hourly),
            "DAILY" => Some(Frequency::Daily),
            "WEEKLY" => Some(Frequency::Weekly),
            "MONTHLY" => Some(Frequency::Monthly),
            "YEARLY" => Some(Frequency::Yearly),
            _ => None,
        }
    }
}

/// Two-letter day codes in week order starting at Sunday.
pub fn day_code(day: Weekday) -> &'static str {
    match day {
        Weekday::Sun => "SU",
        Weekday::Mon => "MO",
        Weekday::Tue => "TU",
        Weekday::Wed => "WE",
        Weekday::Thu => "TH",
        Weekday::Fri => "FR",
        Weekday::Sat => "SA",
    }
}

pub fn parse_day_code(code: &str) -> Option<Weekday> {
    match code.trim().to_ascii_uppercase().as_str() {
        "SU" => Some(Weekday::Sun),
        "MO" => Some(Weekday::Mon),
        "TU" => Some(Weekday::Tue),
        "WE" => Some(Weekday::Wed),
        "TH" => Some(Weekday::Thu),
        "FR" => Some(Weekday::Fri),
        "SA" => Some(Weekday::Sat),
        _ => None,
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecurrenceRule {
    pub frequency: Frequency,
    /// Step between occurrences in units of `frequency`; never zero.
    pub interval: u32,
    /// Weekday filter, meaningful for weekly rules only.
    pub by_day: Vec<Weekday>,
    /// Last date (inclusive) on which an occurrence may land.
    pub until: Option<NaiveDate>,
    /// Cap on the number of generated occurrences.
    pub count: Option<u32>,
}

impl RecurrenceRule {
    pub fn new(frequency: Frequency) -> Self {
        Self {
            frequency,
            interval: 1,
            by_day: Vec::new(),
            until: None,
            count: None,
        }
    }

    pub fn weekly_on(days: impl IntoIterator<Item = Weekday>) -> Self {
        let mut rule = Self::new(Frequency::Weekly);
        rule.by_day = days.into_iter().collect();
        rule.normalize();
        rule
    }

    /// Parse the wire form. Returns `None` for blank input or input with no
    /// usable `FREQ`, which both mean "does not repeat". Unknown keys and
    /// malformed values are skipped rather than rejected.
    pub fn parse(text: &str) -> Option<Self> {
        let text = text.trim();
        if text.is_empty() {
            return None;
        }

        let mut frequency = None;
        let mut interval = 1u32;
        let mut by_day = Vec::new();
        let mut until = None;
        let mut count = None;

        for part in text.split(';') {
            let Some((key, value)) = part.split_once('=') else {
                continue;
            };
            let value = value.trim();
            match key.trim().to_ascii_uppercase().as_str() {
                "FREQ" => frequency = Frequency::parse(value),
                "INTERVAL" => {
                    if let Ok(parsed) = value.parse::<u32>() {
                        if parsed >= 1 {
                            interval = parsed;
                        }
                    }
                }
                "BYDAY" => {
                    by_day = value.split(',').filter_map(parse_day_code).collect();
                }
                "UNTIL" => {
                    until = NaiveDate::parse_from_str(value, DATE_FMT).ok();
                }
                "COUNT" => {
                    count = value.parse::<u32>().ok().filter(|c| *c >= 1);
                }
                _ => {}
            }
        }

        let mut rule = Self {
            frequency: frequency?,
            interval,
            by_day,
            until,
            count,
        };
        rule.normalize();
        Some(rule)
    }

    /// Canonical form: interval at least 1, `by_day` sorted Sunday-first and
    /// deduplicated, and dropped entirely for non-weekly frequencies.
    pub fn normalize(&mut self) {
        if self.interval == 0 {
            self.interval = 1;
        }
        if self.frequency != Frequency::Weekly {
            self.by_day.clear();
        } else {
            self.by_day.sort_by_key(|d| d.num_days_from_sunday());
            self.by_day.dedup();
        }
        if self.count == Some(0) {
            self.count = None;
        }
    }
}

impl fmt::Display for RecurrenceRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "FREQ={};INTERVAL={}", self.frequency.as_str(), self.interval)?;
        if self.frequency == Frequency::Weekly && !self.by_day.is_empty() {
            let days: Vec<&str> = self.by_day.iter().map(|d| day_code(*d)).collect();
            write!(f, ";BYDAY={}", days.join(","))?;
        }
        if let Some(until) = self.until {
            write!(f, ";UNTIL={}", until.format(DATE_FMT))?;
        }
        if let Some(count) = self.count {
            write!(f, ";COUNT={}", count)?;
        }
        Ok(())
    }
}

/// Serde adapter keeping the persisted field a plain string, with the empty
/// string standing in for "does not repeat".
///
/// Use as `#[serde(default, with = "crate::recurrence::wire")]` on an
/// `Option<RecurrenceRule>` field.
pub mod wire {
    use super::RecurrenceRule;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(rule: &Option<RecurrenceRule>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match rule {
            Some(rule) => serializer.serialize_str(&rule.to_string()),
            None => serializer.serialize_str(""),
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<RecurrenceRule>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let text = String::deserialize(deserializer)?;
        let rule = RecurrenceRule::parse(&text);
        if rule.is_none() && !text.trim().is_empty() {
            tracing::warn!(text = %text, "unusable recurrence text treated as non-repeating");
        }
        Ok(rule)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn blank_and_freqless_input_mean_no_recurrence() {
        assert_eq!(RecurrenceRule::parse(""), None);
        assert_eq!(RecurrenceRule::parse("   "), None);
        assert_eq!(RecurrenceRule::parse("INTERVAL=3;COUNT=5"), None);
        assert_eq!(RecurrenceRule::parse("FREQ=MINUTELY"), None);
    }

    #[test]
    fn parse_is_tolerant_of_junk() {
        let rule = RecurrenceRule::parse("FREQ=weekly;INTERVAL=abc;BYDAY=MO,XX,fr;RSVP=1;UNTIL=soon")
            .unwrap();
        assert_eq!(rule.frequency, Frequency::Weekly);
        assert_eq!(rule.interval, 1);
        assert_eq!(rule.by_day, vec![Weekday::Mon, Weekday::Fri]);
        assert_eq!(rule.until, None);
    }

    #[test]
    fn zero_interval_and_count_fall_back() {
        let rule = RecurrenceRule::parse("FREQ=DAILY;INTERVAL=0;COUNT=0").unwrap();
        assert_eq!(rule.interval, 1);
        assert_eq!(rule.count, None);
    }

    #[test]
    fn byday_is_sorted_sunday_first_and_deduplicated() {
        let rule = RecurrenceRule::parse("FREQ=WEEKLY;BYDAY=FR,MO,SU,FR").unwrap();
        assert_eq!(rule.by_day, vec![Weekday::Sun, Weekday::Mon, Weekday::Fri]);
    }

    #[test]
    fn byday_is_dropped_for_non_weekly_rules() {
        let rule = RecurrenceRule::parse("FREQ=MONTHLY;BYDAY=MO,TU").unwrap();
        assert!(rule.by_day.is_empty());
    }

    #[test]
    fn display_uses_fixed_key_order() {
        let mut rule = RecurrenceRule::weekly_on([Weekday::Fri, Weekday::Mon]);
        rule.interval = 2;
        rule.until = Some(date(2024, 6, 30));
        rule.count = Some(10);
        assert_eq!(
            rule.to_string(),
            "FREQ=WEEKLY;INTERVAL=2;BYDAY=MO,FR;UNTIL=2024-06-30;COUNT=10"
        );
    }

    #[test]
    fn display_parse_round_trip() {
        for text in [
            "FREQ=HOURLY;INTERVAL=6",
            "FREQ=DAILY;INTERVAL=1",
            "FREQ=WEEKLY;INTERVAL=1;BYDAY=SU,WE,SA",
            "FREQ=MONTHLY;INTERVAL=3;UNTIL=2025-01-31",
            "FREQ=YEARLY;INTERVAL=1;COUNT=4",
        ] {
            let rule = RecurrenceRule::parse(text).unwrap();
            assert_eq!(rule.to_string(), text);
            assert_eq!(RecurrenceRule::parse(&rule.to_string()).unwrap(), rule);
        }
    }

    #[test]
    fn wire_adapter_maps_empty_string_to_none() {
        #[derive(Debug, PartialEq, serde::Serialize, serde::Deserialize)]
        struct Holder {
            #[serde(default, with = "crate::recurrence::wire")]
            rule: Option<RecurrenceRule>,
        }

        let none: Holder = serde_json::from_str(r#"{"rule":""}"#).unwrap();
        assert_eq!(none.rule, None);

        let missing: Holder = serde_json::from_str(r#"{}"#).unwrap();
        assert_eq!(missing.rule, None);

        let some: Holder = serde_json::from_str(r#"{"rule":"FREQ=DAILY;INTERVAL=2"}"#).unwrap();
        let rule = some.rule.clone().unwrap();
        assert_eq!(rule.frequency, Frequency::Daily);
        assert_eq!(rule.interval, 2);

        let json = serde_json::to_string(&some).unwrap();
        assert_eq!(json, r#"{"rule":"FREQ=DAILY;INTERVAL=2"}"#);
        assert_eq!(
            serde_json::to_string(&Holder { rule: None }).unwrap(),
            r#"{"rule":""}"#
        );
    }
}
