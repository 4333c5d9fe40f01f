//! Date arithmetic the query synthesizer hands to the model.
//!
//! Short ranges (today, yesterday, this week, last week) are resolved to exact
//! UTC bounds computed from local midnights in the display time zone. Longer
//! ranges are expressed as `YYYY-MM` / `YYYY` prefixes of the stored timestamp.

use crate::record::format_iso;
use chrono::{DateTime, Datelike, Duration, NaiveDate, NaiveTime, TimeZone, Utc};
use chrono_tz::Tz;

/// Half-open UTC interval `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeWindow {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl TimeWindow {
    /// SQL predicate over the `timestamp` column.
    pub fn predicate(&self) -> String {
        format!(
            "timestamp >= '{}' AND timestamp < '{}'",
            format_iso(self.start),
            format_iso(self.end)
        )
    }
}

#[derive(Debug, Clone, Copy)]
pub struct TimeReference {
    now: DateTime<Utc>,
    tz: Tz,
}

impl TimeReference {
    pub fn new(now: DateTime<Utc>, tz: Tz) -> Self {
        Self { now, tz }
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.now
    }

    pub fn local_date(&self) -> NaiveDate {
        self.now.with_timezone(&self.tz).date_naive()
    }

    pub fn today(&self) -> TimeWindow {
        self.days(self.local_date(), 1)
    }

    pub fn yesterday(&self) -> TimeWindow {
        self.days(self.local_date() - Duration::days(1), 1)
    }

    /// From Monday 00:00 local time, seven days.
    pub fn this_week(&self) -> TimeWindow {
        self.days(self.week_start(), 7)
    }

    pub fn last_week(&self) -> TimeWindow {
        self.days(self.week_start() - Duration::days(7), 7)
    }

    pub fn this_month_prefix(&self) -> String {
        self.local_date().format("%Y-%m").to_string()
    }

    pub fn last_month_prefix(&self) -> String {
        let today = self.local_date();
        let first = today.with_day(1).unwrap_or(today);
        first
            .pred_opt()
            .unwrap_or(first)
            .format("%Y-%m")
            .to_string()
    }

    pub fn this_year_prefix(&self) -> String {
        format!("{:04}", self.local_date().year())
    }

    pub fn last_year_prefix(&self) -> String {
        format!("{:04}", self.local_date().year() - 1)
    }

    fn week_start(&self) -> NaiveDate {
        let today = self.local_date();
        today - Duration::days(today.weekday().num_days_from_monday() as i64)
    }

    fn days(&self, first: NaiveDate, count: i64) -> TimeWindow {
        TimeWindow {
            start: self.local_midnight(first),
            end: self.local_midnight(first + Duration::days(count)),
        }
    }

    /// UTC instant of 00:00 local time on `date`. A midnight skipped by a DST
    /// change resolves to the earliest valid mapping, else it is read as UTC.
    fn local_midnight(&self, date: NaiveDate) -> DateTime<Utc> {
        let naive = date.and_time(NaiveTime::MIN);
        self.tz
            .from_local_datetime(&naive)
            .earliest()
            .map(|local| local.with_timezone(&Utc))
            .unwrap_or_else(|| Utc.from_utc_datetime(&naive))
    }

    /// Rule block embedded in the synthesis instruction.
    pub fn describe(&self) -> String {
        let local = self.now.with_timezone(&self.tz);
        format!(
            "Current time: {now_utc} (UTC), {local} local time ({tz}).\n\
             Stored timestamps are ISO 8601 UTC strings like '2024-03-14T09:05:00.000Z'; compare them as text.\n\
             Translate relative dates with these exact predicates:\n\
             - today: {today}\n\
             - yesterday: {yesterday}\n\
             - this week: {this_week}\n\
             - last week: {last_week}\n\
             For longer ranges use prefix matches:\n\
             - this month: timestamp LIKE '{this_month}%'\n\
             - last month: timestamp LIKE '{last_month}%'\n\
             - this year: timestamp LIKE '{this_year}%'\n\
             - last year: timestamp LIKE '{last_year}%'\n\
             - a named month or year: the matching 'YYYY-MM' or 'YYYY' prefix.",
            now_utc = format_iso(self.now),
            local = local.format("%A %Y-%m-%d %H:%M"),
            tz = self.tz,
            today = self.today().predicate(),
            yesterday = self.yesterday().predicate(),
            this_week = self.this_week().predicate(),
            last_week = self.last_week().predicate(),
            this_month = self.this_month_prefix(),
            last_month = self.last_month_prefix(),
            this_year = self.this_year_prefix(),
            last_year = self.last_year_prefix(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(iso: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(iso).unwrap().with_timezone(&Utc)
    }

    fn paris(iso: &str) -> TimeReference {
        TimeReference::new(at(iso), chrono_tz::Europe::Paris)
    }

    #[test]
    fn yesterday_uses_local_midnights() {
        let reference = paris("2024-03-15T10:00:00Z");
        assert_eq!(
            reference.yesterday().predicate(),
            "timestamp >= '2024-03-13T23:00:00.000Z' AND timestamp < '2024-03-14T23:00:00.000Z'"
        );
    }

    #[test]
    fn local_date_can_differ_from_utc_date() {
        // 23:30 UTC is already the next day in Paris.
        let reference = paris("2024-06-30T23:30:00Z");
        assert_eq!(reference.local_date(), NaiveDate::from_ymd_opt(2024, 7, 1).unwrap());
        assert_eq!(reference.today().start, at("2024-06-30T22:00:00Z"));
    }

    #[test]
    fn weeks_start_on_monday() {
        // Friday 2024-03-15.
        let reference = paris("2024-03-15T10:00:00Z");
        assert_eq!(reference.this_week().start, at("2024-03-10T23:00:00Z"));
        assert_eq!(reference.last_week().start, at("2024-03-03T23:00:00Z"));
        assert_eq!(reference.last_week().end, reference.this_week().start);
    }

    #[test]
    fn week_across_dst_change_is_shorter() {
        // Paris moves to summer time on 2024-03-31.
        let reference = paris("2024-04-02T10:00:00Z");
        let last_week = reference.last_week();
        assert_eq!(last_week.start, at("2024-03-24T23:00:00Z"));
        assert_eq!(last_week.end, at("2024-03-31T22:00:00Z"));
    }

    #[test]
    fn prefixes_for_longer_ranges() {
        let reference = paris("2024-01-10T08:00:00Z");
        assert_eq!(reference.this_month_prefix(), "2024-01");
        assert_eq!(reference.last_month_prefix(), "2023-12");
        assert_eq!(reference.this_year_prefix(), "2024");
        assert_eq!(reference.last_year_prefix(), "2023");
    }

    #[test]
    fn describe_mentions_every_rule() {
        let text = paris("2024-03-15T10:00:00Z").describe();
        assert!(text.contains("yesterday: timestamp >= '2024-03-13T23:00:00.000Z'"));
        assert!(text.contains("last month: timestamp LIKE '2024-02%'"));
        assert!(text.contains("Europe/Paris"));
    }
}
