//! When a study group's schedule may still be changed.
//!
//! Once a published group's first meeting is close, participants may already
//! have planned around it, so date and time edits are refused. Fields that do
//! not move meetings stay editable regardless.
//!
//! The policy, first match wins:
//!
//! 1. Draft groups are editable.
//! 2. Groups with no active meetings are editable.
//! 3. Groups whose earliest active meeting starts strictly after
//!    `now + lock_window` are editable.
//! 4. Everything else is locked.

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;

use crate::error::Result;
use crate::model::{self, Meeting, StudyGroup};
use crate::settings::LifecycleSettings;

/// Where a group sits with respect to schedule edits.
///
/// `PublishedEditable` becomes `PublishedLocked` purely by the passage of
/// time; there is no explicit transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ScheduleState {
    Draft,
    PublishedEditable,
    PublishedLocked,
}

impl ScheduleState {
    pub fn allows_schedule_edit(self) -> bool {
        !matches!(self, ScheduleState::PublishedLocked)
    }
}

/// The schedule edit policy, parameterised by how long before the first
/// meeting edits lock.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EditGuard {
    lock_window: Duration,
}

impl Default for EditGuard {
    fn default() -> Self {
        Self {
            lock_window: Duration::days(2),
        }
    }
}

impl EditGuard {
    pub fn new(lock_window: Duration) -> Self {
        Self { lock_window }
    }

    pub fn from_settings(settings: &LifecycleSettings) -> Self {
        Self::new(settings.lock_window())
    }

    pub fn lock_window(&self) -> Duration {
        self.lock_window
    }

    /// Whether a date/time change to `group` is permitted at `now`.
    ///
    /// `meetings` are the group's meetings; cancelled ones are ignored.
    ///
    /// # Errors
    ///
    /// Returns [`crate::CircleError::InvalidTimezone`] if the group's timezone
    /// cannot be resolved while locating its first meeting.
    pub fn can_edit_schedule(
        &self,
        now: DateTime<Utc>,
        group: &StudyGroup,
        meetings: &[Meeting],
    ) -> Result<bool> {
        Ok(self.schedule_state(now, group, meetings)?.allows_schedule_edit())
    }

    /// Classify `group` at `now`.
    pub fn schedule_state(
        &self,
        now: DateTime<Utc>,
        group: &StudyGroup,
        meetings: &[Meeting],
    ) -> Result<ScheduleState> {
        if group.draft {
            return Ok(ScheduleState::Draft);
        }
        let earliest = match model::first_meeting(meetings) {
            Some(first) => Some(first.starts_at(group)?),
            None => None,
        };
        Ok(self.classify(now, false, earliest))
    }

    /// Classify from the draft flag and the earliest active meeting instant
    /// alone.
    pub fn classify(
        &self,
        now: DateTime<Utc>,
        draft: bool,
        earliest: Option<DateTime<Utc>>,
    ) -> ScheduleState {
        match earliest {
            _ if draft => ScheduleState::Draft,
            Some(earliest) if now + self.lock_window >= earliest => ScheduleState::PublishedLocked,
            _ => ScheduleState::PublishedEditable,
        }
    }
}

/// [`EditGuard::can_edit_schedule`] with the default two-day window.
pub fn can_edit_schedule(
    now: DateTime<Utc>,
    group: &StudyGroup,
    meetings: &[Meeting],
) -> Result<bool> {
    EditGuard::default().can_edit_schedule(now, group, meetings)
}
