//! Study groups, meetings, and the requests that create and change them.

use std::fmt;

use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::schedule;
use crate::time;

macro_rules! id_type {
    ($(#[$meta:meta])* $name:ident, $label:literal) => {
        $(#[$meta])*
        #[derive(
            Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
        )]
        #[serde(transparent)]
        pub struct $name(pub u64);

        impl $name {
            pub const ENTITY: &'static str = $label;

            pub fn value(self) -> u64 {
                self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

id_type!(
    /// Identity of a [`StudyGroup`], assigned by the store.
    StudyGroupId,
    "study group"
);
id_type!(
    /// Identity of a [`Meeting`], assigned by the store.
    MeetingId,
    "meeting"
);
id_type!(
    /// Identity of a [`Course`] in the external catalogue.
    CourseId,
    "course"
);
id_type!(
    /// The user who owns and edits a study group.
    FacilitatorId,
    "facilitator"
);

/// Course a learning circle is built around. Only the fields used for
/// default resolution are carried.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Course {
    pub id: CourseId,
    pub title: String,
    pub caption: String,
}

// ── StudyGroup ──────────────────────────────────────────────────────────────

/// A scheduled series of weekly meetings around one course.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StudyGroup {
    pub id: StudyGroupId,
    pub name: String,
    pub course: CourseId,
    pub course_description: String,
    pub description: String,
    pub facilitator: FacilitatorId,
    pub venue_name: String,
    pub venue_address: String,
    pub venue_details: String,
    pub city: String,
    pub language: String,
    pub start_date: NaiveDate,
    /// Local to `timezone`.
    pub meeting_time: NaiveTime,
    pub end_date: NaiveDate,
    pub duration_minutes: u32,
    /// IANA zone name.
    pub timezone: String,
    pub draft: bool,
    pub signup_open: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
}

impl StudyGroup {
    /// Number of weekly meetings the date span holds. Derived, never stored.
    pub fn weeks(&self) -> u32 {
        schedule::weeks_between(self.start_date, self.end_date)
    }

    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }

    /// Published and not deleted.
    pub fn is_published(&self) -> bool {
        !self.draft && !self.is_deleted()
    }

    /// Weekday the group meets on, e.g. "Monday".
    pub fn day_name(&self) -> String {
        time::day_name(self.start_date)
    }

    pub fn end_time(&self) -> NaiveTime {
        time::end_time(self.meeting_time, self.duration_minutes)
    }

    /// The instant of the first scheduled wall-clock moment.
    pub fn local_start(&self) -> Result<DateTime<Utc>> {
        time::localize(self.start_date, self.meeting_time, &self.timezone)
    }

    /// Zone abbreviation as of the start date. Later meetings may fall on the
    /// other side of a DST change.
    pub fn timezone_abbreviation(&self) -> Result<String> {
        time::timezone_abbreviation(self.start_date, self.meeting_time, &self.timezone)
    }

    /// The schedule-defining fields, for change detection.
    pub fn schedule_fields(&self) -> ScheduleFields {
        ScheduleFields {
            start_date: self.start_date,
            end_date: self.end_date,
            meeting_time: self.meeting_time,
            timezone: self.timezone.clone(),
        }
    }
}

impl fmt::Display for StudyGroup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} - {}s {} at the {}",
            self.name,
            self.day_name(),
            self.meeting_time.format("%H:%M"),
            self.venue_name
        )
    }
}

/// The fields whose change alters when meetings happen.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScheduleFields {
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub meeting_time: NaiveTime,
    pub timezone: String,
}

// ── Meeting ─────────────────────────────────────────────────────────────────

/// One concrete, dated occurrence of a study group's weekly session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Meeting {
    pub id: MeetingId,
    pub study_group: StudyGroupId,
    pub meeting_date: NaiveDate,
    /// Usually the group's meeting time, but may have been edited individually.
    pub meeting_time: NaiveTime,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
}

impl Meeting {
    pub fn is_active(&self) -> bool {
        self.deleted_at.is_none()
    }

    pub fn slot(&self) -> schedule::MeetingSlot {
        schedule::MeetingSlot {
            meeting_date: self.meeting_date,
            meeting_time: self.meeting_time,
        }
    }

    /// When the meeting starts, interpreted in the owning group's timezone.
    pub fn starts_at(&self, group: &StudyGroup) -> Result<DateTime<Utc>> {
        self.slot().starts_at(&group.timezone)
    }

    /// When the meeting ends, using the owning group's duration.
    pub fn ends_at(&self, group: &StudyGroup) -> Result<DateTime<Utc>> {
        self.slot().ends_at(&group.timezone, group.duration_minutes)
    }
}

/// A meeting to be inserted; the store assigns the id.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NewMeeting {
    pub meeting_date: NaiveDate,
    pub meeting_time: NaiveTime,
}

impl From<schedule::MeetingSlot> for NewMeeting {
    fn from(slot: schedule::MeetingSlot) -> Self {
        Self {
            meeting_date: slot.meeting_date,
            meeting_time: slot.meeting_time,
        }
    }
}

// ── Meeting-set views ───────────────────────────────────────────────────────
//
// Cancelled (soft-deleted) meetings are skipped.

pub fn first_meeting(meetings: &[Meeting]) -> Option<&Meeting> {
    meetings
        .iter()
        .filter(|m| m.is_active())
        .min_by_key(|m| (m.meeting_date, m.meeting_time))
}

pub fn last_meeting(meetings: &[Meeting]) -> Option<&Meeting> {
    meetings
        .iter()
        .filter(|m| m.is_active())
        .max_by_key(|m| (m.meeting_date, m.meeting_time))
}

/// The first active meeting that starts strictly after `now`.
pub fn next_meeting<'a>(
    group: &StudyGroup,
    meetings: &'a [Meeting],
    now: DateTime<Utc>,
) -> Result<Option<&'a Meeting>> {
    let mut next: Option<(DateTime<Utc>, &Meeting)> = None;
    for meeting in meetings.iter().filter(|m| m.is_active()) {
        let starts_at = meeting.starts_at(group)?;
        if starts_at > now && next.is_none_or(|(best, _)| starts_at < best) {
            next = Some((starts_at, meeting));
        }
    }
    Ok(next.map(|(_, meeting)| meeting))
}

// ── Requests ────────────────────────────────────────────────────────────────

/// Fields supplied when a facilitator creates a learning circle.
///
/// The end of the series is given either as `end_date` or as a `weeks` count;
/// `end_date` wins when both are present.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateRequest {
    pub course: CourseId,
    pub facilitator: FacilitatorId,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub course_description: Option<String>,
    pub description: String,
    pub venue_name: String,
    #[serde(default)]
    pub venue_address: String,
    #[serde(default)]
    pub venue_details: String,
    pub city: String,
    pub language: String,
    pub start_date: NaiveDate,
    #[serde(default)]
    pub end_date: Option<NaiveDate>,
    #[serde(default)]
    pub weeks: Option<u32>,
    pub meeting_time: NaiveTime,
    #[serde(default)]
    pub duration_minutes: Option<u32>,
    pub timezone: String,
    #[serde(default)]
    pub draft: Option<bool>,
    #[serde(default)]
    pub signup_open: Option<bool>,
}

/// A partial change to an existing study group. Absent fields are left alone.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct UpdateRequest {
    pub name: Option<String>,
    pub course: Option<CourseId>,
    pub course_description: Option<String>,
    pub description: Option<String>,
    pub venue_name: Option<String>,
    pub venue_address: Option<String>,
    pub venue_details: Option<String>,
    pub city: Option<String>,
    pub language: Option<String>,
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
    pub weeks: Option<u32>,
    pub meeting_time: Option<NaiveTime>,
    pub duration_minutes: Option<u32>,
    pub timezone: Option<String>,
    pub draft: Option<bool>,
    pub signup_open: Option<bool>,
}
