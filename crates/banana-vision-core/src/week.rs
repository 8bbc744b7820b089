//! ISO-8601 week arithmetic.
//!
//! Weeks run Monday through Sunday and week 1 is the week containing the
//! year's first Thursday, so an ISO year has either 52 or 53 weeks and the
//! ISO year of a date near New Year may differ from its calendar year.
//!
//! # Label format
//!
//! Keys render as `"{iso_year}-W{iso_week:02}"`, e.g. `2024-W07`, which
//! also sorts lexicographically in chronological order.

use std::fmt;

use chrono::{DateTime, Datelike, NaiveDate, NaiveDateTime, TimeZone, Utc, Weekday};
use serde::{Serialize, Serializer};

/// An ISO (year, week) pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct WeekKey {
    pub iso_year: i32,
    pub iso_week: u32,
}

impl WeekKey {
    pub fn new(iso_year: i32, iso_week: u32) -> Self {
        Self { iso_year, iso_week }
    }

    /// The ISO week containing `instant`, evaluated in UTC.
    pub fn of(instant: DateTime<Utc>) -> Self {
        let iso = instant.iso_week();
        Self::new(iso.year(), iso.week())
    }

    /// The week immediately before this one.
    ///
    /// Stepping back from week 1 lands on the last week of the prior ISO
    /// year, which is the week containing December 28.
    pub fn previous(&self) -> Self {
        if self.iso_week > 1 {
            Self::new(self.iso_year, self.iso_week - 1)
        } else {
            let year = self.iso_year - 1;
            Self::new(year, weeks_in_year(year))
        }
    }

    /// Midnight UTC on the Monday that opens this week.
    pub fn start(&self) -> Option<DateTime<Utc>> {
        let monday = NaiveDate::from_isoywd_opt(self.iso_year, self.iso_week, Weekday::Mon)?;
        Some(Utc.from_utc_datetime(&monday.and_hms_opt(0, 0, 0)?))
    }
}

impl fmt::Display for WeekKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-W{:02}", self.iso_year, self.iso_week)
    }
}

impl Serialize for WeekKey {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// Number of ISO weeks (52 or 53) in `iso_year`.
pub fn weeks_in_year(iso_year: i32) -> u32 {
    NaiveDate::from_ymd_opt(iso_year, 12, 28)
        .map(|d| d.iso_week().week())
        .unwrap_or(52)
}

/// The `len` consecutive weeks ending with the week of `now`, oldest first.
pub fn trailing_window(now: DateTime<Utc>, len: usize) -> Vec<WeekKey> {
    let mut weeks = Vec::with_capacity(len);
    let mut key = WeekKey::of(now);
    for _ in 0..len {
        weeks.push(key);
        key = key.previous();
    }
    weeks.reverse();
    weeks
}

/// Parse a stored `created_at` value into a UTC instant.
///
/// Accepts RFC 3339 (`Z` or numeric offset, optional fractional seconds) and
/// the offset-less `YYYY-MM-DD[T ]HH:MM:SS[.f]` form, which is read as UTC.
/// Returns `None` for anything else.
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }

    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }

    // Postgres text output uses a space separator and a short offset ("+00").
    if let Ok(dt) = DateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S%.f%#z") {
        return Some(dt.with_timezone(&Utc));
    }

    ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"]
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(raw, fmt).ok())
        .map(|naive| Utc.from_utc_datetime(&naive))
}
