//! Weekly meeting schedule generation.
//!
//! A learning circle meets once a week on the weekday of its start date, at
//! the same local time, from `start_date` through `end_date` inclusive. The
//! functions here are pure: the same inputs always produce the same slots.

use chrono::{DateTime, Duration, NaiveDate, NaiveTime, Utc};
use serde::Serialize;

use crate::error::{CircleError, Result};
use crate::time;

/// One generated occurrence of a weekly series.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct MeetingSlot {
    pub meeting_date: NaiveDate,
    pub meeting_time: NaiveTime,
}

impl MeetingSlot {
    /// The slot's start in `timezone`.
    pub fn starts_at(&self, timezone: &str) -> Result<DateTime<Utc>> {
        time::localize(self.meeting_date, self.meeting_time, timezone)
    }

    pub fn ends_at(&self, timezone: &str, duration_minutes: u32) -> Result<DateTime<Utc>> {
        Ok(self.starts_at(timezone)? + Duration::minutes(i64::from(duration_minutes)))
    }
}

/// Generate the weekly meeting slots between `start_date` and `end_date`.
///
/// The first slot is `start_date`; each following slot is seven days later,
/// while it does not pass `end_date`. A series whose end equals its start has
/// exactly one meeting.
///
/// # Errors
///
/// Returns [`CircleError::InvalidDateRange`] if `end_date` is before `start_date`.
///
/// # Examples
///
/// ```
/// use chrono::{NaiveDate, NaiveTime};
/// use circle_engine::schedule::generate;
///
/// let start = NaiveDate::from_ymd_opt(2018, 2, 12).unwrap();
/// let end = NaiveDate::from_ymd_opt(2018, 2, 25).unwrap();
/// let time = NaiveTime::from_hms_opt(17, 1, 0).unwrap();
///
/// let slots = generate(start, end, time).unwrap();
/// assert_eq!(slots.len(), 2);
/// assert_eq!(slots[1].meeting_date, NaiveDate::from_ymd_opt(2018, 2, 19).unwrap());
/// ```
pub fn generate(
    start_date: NaiveDate,
    end_date: NaiveDate,
    meeting_time: NaiveTime,
) -> Result<Vec<MeetingSlot>> {
    if end_date < start_date {
        return Err(CircleError::InvalidDateRange {
            start: start_date,
            end: end_date,
        });
    }

    let slots = start_date
        .iter_weeks()
        .take_while(|date| *date <= end_date)
        .map(|meeting_date| MeetingSlot {
            meeting_date,
            meeting_time,
        })
        .collect();

    Ok(slots)
}

/// Number of weekly meetings a date span holds: `floor(days / 7) + 1`.
///
/// Spans where `end_date` precedes `start_date` hold no meetings.
pub fn weeks_between(start_date: NaiveDate, end_date: NaiveDate) -> u32 {
    let days = (end_date - start_date).num_days();
    if days < 0 {
        return 0;
    }
    u32::try_from(days / 7 + 1).unwrap_or(u32::MAX)
}

/// The end date of a series of `weeks` meetings starting on `start_date`.
///
/// # Errors
///
/// Returns [`CircleError::InvalidDateRange`] when `weeks` is zero or the end
/// date is out of the representable range.
pub fn end_date_for_weeks(start_date: NaiveDate, weeks: u32) -> Result<NaiveDate> {
    let out_of_range = || CircleError::InvalidDateRange {
        start: start_date,
        end: start_date,
    };
    let span = weeks.checked_sub(1).ok_or_else(out_of_range)?;

    start_date
        .checked_add_signed(Duration::weeks(i64::from(span)))
        .ok_or_else(out_of_range)
}

/// 1-based position of the meeting held on `date` among `active_dates`.
///
/// Counts active meetings on or before `date`, so it relies on a group never
/// holding two active meetings on one calendar day.
pub fn meeting_number<'a, I>(active_dates: I, date: NaiveDate) -> usize
where
    I: IntoIterator<Item = &'a NaiveDate>,
{
    active_dates.into_iter().filter(|d| **d <= date).count()
}
