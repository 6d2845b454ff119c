//! Wall-clock to instant conversion for meeting times.
//!
//! Study groups store their start date and meeting time as naive local
//! values plus an IANA timezone name. Every temporal decision in the engine
//! (edit locking, "next meeting", end instants) goes through [`localize`] to
//! turn that local moment into an absolute UTC instant.
//!
//! Like the rest of the engine these functions never read the system clock.
//!
//! # Local times that do not map to exactly one instant
//!
//! - A time skipped by a forward DST transition (e.g. 02:30 on the US
//!   spring-forward day) is read with the offset in effect before the gap,
//!   so it lands just after the transition (03:30 local).
//! - A time repeated by a backward transition resolves to the later of the
//!   two instants, the one with the standard (post-transition) offset.

use chrono::{DateTime, Duration, NaiveDate, NaiveDateTime, NaiveTime, Offset, TimeZone, Utc};
use chrono_tz::Tz;
use serde::Serialize;

use crate::error::{CircleError, Result};

// ── localize ────────────────────────────────────────────────────────────────

/// Convert a local calendar date and time-of-day in `timezone` to a UTC instant.
///
/// # Errors
///
/// Returns [`CircleError::InvalidTimezone`] if `timezone` is not a known IANA zone.
///
/// # Examples
///
/// ```
/// use chrono::{NaiveDate, NaiveTime};
/// use circle_engine::time::localize;
///
/// let date = NaiveDate::from_ymd_opt(2026, 7, 15).unwrap();
/// let time = NaiveTime::from_hms_opt(18, 0, 0).unwrap();
/// let instant = localize(date, time, "Africa/Johannesburg").unwrap();
/// // SAST is UTC+2
/// assert_eq!(instant.to_rfc3339(), "2026-07-15T16:00:00+00:00");
/// ```
pub fn localize(date: NaiveDate, time: NaiveTime, timezone: &str) -> Result<DateTime<Utc>> {
    let tz = parse_timezone(timezone)?;
    Ok(localize_in(&tz, date.and_time(time)).with_timezone(&Utc))
}

/// Resolve a naive local datetime in an already-parsed zone.
pub fn localize_in(tz: &Tz, naive: NaiveDateTime) -> DateTime<Tz> {
    match tz.from_local_datetime(&naive).latest() {
        Some(dt) => dt,
        None => {
            let before = tz.offset_from_utc_datetime(&(naive - Duration::days(1)));
            let utc = naive - Duration::seconds(i64::from(before.fix().local_minus_utc()));
            tz.from_utc_datetime(&utc)
        }
    }
}

/// Parse an IANA timezone string into `Tz`.
pub fn parse_timezone(s: &str) -> Result<Tz> {
    s.parse::<Tz>()
        .map_err(|_| CircleError::InvalidTimezone(format!("'{}'", s)))
}

// ── describe_local ──────────────────────────────────────────────────────────

/// A local meeting moment expressed every way callers need to display it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LocalInstant {
    /// The instant in UTC (RFC 3339).
    pub utc: String,
    /// The instant in the group timezone (RFC 3339 with offset).
    pub local: String,
    /// The IANA timezone name used.
    pub timezone: String,
    /// The UTC offset at this instant (e.g., "+02:00").
    pub utc_offset: String,
    /// The zone abbreviation at this instant (e.g., "SAST", "EDT").
    pub abbreviation: String,
}

/// Describe a local date/time in `timezone`.
///
/// # Errors
///
/// Returns [`CircleError::InvalidTimezone`] if `timezone` is not a known IANA zone.
pub fn describe_local(date: NaiveDate, time: NaiveTime, timezone: &str) -> Result<LocalInstant> {
    let tz = parse_timezone(timezone)?;
    let local = localize_in(&tz, date.and_time(time));

    Ok(LocalInstant {
        utc: local.with_timezone(&Utc).to_rfc3339(),
        local: local.to_rfc3339(),
        timezone: timezone.to_string(),
        utc_offset: format_utc_offset(&local),
        abbreviation: local.format("%Z").to_string(),
    })
}

/// The zone abbreviation in effect at a local date/time (e.g., "EST").
pub fn timezone_abbreviation(date: NaiveDate, time: NaiveTime, timezone: &str) -> Result<String> {
    let tz = parse_timezone(timezone)?;
    Ok(localize_in(&tz, date.and_time(time)).format("%Z").to_string())
}

// ── Wall-clock helpers ──────────────────────────────────────────────────────

/// Time-of-day a meeting ends, wrapping past midnight.
pub fn end_time(start: NaiveTime, duration_minutes: u32) -> NaiveTime {
    let (end, _) = start.overflowing_add_signed(Duration::minutes(i64::from(duration_minutes)));
    end
}

/// Full English weekday name for a date (e.g., "Monday").
pub fn day_name(date: NaiveDate) -> String {
    date.format("%A").to_string()
}

/// Format the UTC offset as a string (e.g., "-05:00", "+09:00").
fn format_utc_offset<T: TimeZone>(dt: &DateTime<T>) -> String {
    let offset_secs = dt.offset().fix().local_minus_utc();
    let sign = if offset_secs >= 0 { "+" } else { "-" };
    let abs_secs = offset_secs.unsigned_abs();
    let hours = abs_secs / 3600;
    let minutes = (abs_secs % 3600) / 60;
    format!("{sign}{hours:02}:{minutes:02}")
}
