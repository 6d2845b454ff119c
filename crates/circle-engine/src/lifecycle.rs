//! Creating, updating, and publishing study groups.
//!
//! [`StudyGroupLifecycle`] ties the pieces together: requests are validated,
//! schedule changes are checked against the [`EditGuard`], meetings are
//! regenerated and reconciled against what is stored, and the result is
//! committed as one [`ChangeSet`] before events go to the [`Notifier`].
//!
//! # Concurrency
//!
//! Every mutating operation runs under a per-group mutex for the whole
//! load → guard → reconcile → commit sequence, so two concurrent updates to
//! the same group cannot both pass the guard on a stale meeting set. Groups
//! do not block each other.
//!
//! # Clock
//!
//! All operations take `now` from the caller; nothing here reads the system
//! clock.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, PoisonError};

use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::error::{CircleError, Result, ValidationErrors};
use crate::guard::{EditGuard, ScheduleState};
use crate::model::{
    self, CreateRequest, Meeting, MeetingId, NewMeeting, ScheduleFields, StudyGroup,
    StudyGroupId, UpdateRequest,
};
use crate::notify::{LifecycleEvent, Notifier};
use crate::schedule::{self, MeetingSlot};
use crate::settings::LifecycleSettings;
use crate::store::{ChangeSet, GroupWrite, StudyGroupStore};
use crate::validate::{self, Validator};

/// Field and message returned when a locked schedule edit is refused.
pub const LOCKED_FIELD: &str = "start_date";
pub const LOCKED_MESSAGE: &str = "cannot update date";

// ── Reconciliation ──────────────────────────────────────────────────────────

/// The minimal meeting changes that turn the stored set into a freshly
/// generated one.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Reconciliation {
    /// Meetings whose date survives; their records are kept as-is.
    pub kept: Vec<MeetingId>,
    /// Dates that need a new meeting.
    pub insert: Vec<MeetingSlot>,
    /// Kept meetings moved to the group's new time-of-day.
    pub retime: Vec<(MeetingId, NaiveTime)>,
    /// Meetings no longer in the schedule, with their dates.
    pub remove: Vec<(MeetingId, NaiveDate)>,
}

impl Reconciliation {
    pub fn is_noop(&self) -> bool {
        self.insert.is_empty() && self.retime.is_empty() && self.remove.is_empty()
    }

    fn apply_to(&self, changes: &mut ChangeSet) {
        changes
            .insert_meetings
            .extend(self.insert.iter().copied().map(NewMeeting::from));
        changes.retime_meetings.extend(self.retime.iter().copied());
        changes
            .delete_meetings
            .extend(self.remove.iter().map(|(id, _)| *id));
    }

    fn event(&self, group: StudyGroup) -> LifecycleEvent {
        LifecycleEvent::Rescheduled {
            group,
            added: self.insert.iter().map(|s| s.meeting_date).collect(),
            removed: self.remove.iter().map(|(_, date)| *date).collect(),
            retimed: self.retime.iter().map(|(id, _)| *id).collect(),
        }
    }
}

/// Diff stored meetings against generated slots by calendar date.
///
/// - A date in both keeps the stored meeting (and its id).
/// - A generated date with no stored meeting is inserted.
/// - A stored meeting whose date is not generated is removed.
///
/// When `retime_from` is set, kept meetings still at that time-of-day are moved
/// to their slot's time; meetings edited to some other time are left alone.
/// Cancelled meetings in `existing` are ignored. If two active meetings share
/// a date, the first one (by time, then id) is kept and the rest removed.
pub fn reconcile(
    existing: &[Meeting],
    slots: &[MeetingSlot],
    retime_from: Option<NaiveTime>,
) -> Reconciliation {
    let mut active: Vec<&Meeting> = existing.iter().filter(|m| m.is_active()).collect();
    active.sort_by_key(|m| (m.meeting_date, m.meeting_time, m.id));

    let mut by_date: BTreeMap<NaiveDate, &Meeting> = BTreeMap::new();
    let mut plan = Reconciliation::default();

    for meeting in active {
        if by_date.contains_key(&meeting.meeting_date) {
            plan.remove.push((meeting.id, meeting.meeting_date));
        } else {
            by_date.insert(meeting.meeting_date, meeting);
        }
    }

    for slot in slots {
        match by_date.remove(&slot.meeting_date) {
            Some(meeting) => {
                plan.kept.push(meeting.id);
                if retime_from == Some(meeting.meeting_time)
                    && meeting.meeting_time != slot.meeting_time
                {
                    plan.retime.push((meeting.id, slot.meeting_time));
                }
            }
            None => plan.insert.push(*slot),
        }
    }

    plan.remove
        .extend(by_date.into_values().map(|m| (m.id, m.meeting_date)));
    plan.remove.sort_by_key(|(_, date)| *date);

    plan
}

// ── Per-group locks ─────────────────────────────────────────────────────────

#[derive(Debug, Default)]
struct GroupLocks {
    locks: Mutex<HashMap<StudyGroupId, Arc<Mutex<()>>>>,
}

impl GroupLocks {
    fn handle(&self, id: StudyGroupId) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(locks.entry(id).or_default())
    }

    fn forget(&self, id: StudyGroupId) {
        let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        locks.remove(&id);
    }
}

// ── StudyGroupLifecycle ─────────────────────────────────────────────────────

/// Orchestrates study group creation, updates, publishing, and deletion.
pub struct StudyGroupLifecycle<S, V, N> {
    store: S,
    validator: V,
    notifier: N,
    guard: EditGuard,
    settings: LifecycleSettings,
    locks: GroupLocks,
}

impl<S, V, N> StudyGroupLifecycle<S, V, N>
where
    S: StudyGroupStore,
    V: Validator,
    N: Notifier,
{
    pub fn new(store: S, validator: V, notifier: N) -> Self {
        Self::with_settings(store, validator, notifier, LifecycleSettings::default())
    }

    pub fn with_settings(store: S, validator: V, notifier: N, settings: LifecycleSettings) -> Self {
        Self {
            store,
            validator,
            notifier,
            guard: EditGuard::from_settings(&settings),
            settings,
            locks: GroupLocks::default(),
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn settings(&self) -> &LifecycleSettings {
        &self.settings
    }

    // ── create ──────────────────────────────────────────────────────────

    /// Create a study group. Drafts get no meetings; a group created already
    /// published gets its full schedule in the same commit.
    ///
    /// # Errors
    ///
    /// [`CircleError::Validation`] for bad fields, [`CircleError::NotFound`]
    /// for an unknown course.
    pub fn create(&self, now: DateTime<Utc>, request: CreateRequest) -> Result<StudyGroup> {
        self.validator.validate_create(&request)?;
        let course = self.store.course(request.course)?;

        let end_date = match (request.end_date, request.weeks) {
            (Some(end_date), _) => end_date,
            (None, Some(weeks)) => end_date_for_weeks(request.start_date, weeks)?,
            (None, None) => {
                return Err(ValidationErrors::single(
                    "weeks",
                    "an end date or number of weeks is required",
                )
                .into());
            }
        };
        check_span(request.start_date, end_date, self.settings.max_weeks)?;

        let group = StudyGroup {
            id: StudyGroupId(0),
            name: non_blank(request.name).unwrap_or_else(|| course.title.clone()),
            course: course.id,
            course_description: non_blank(request.course_description)
                .unwrap_or_else(|| course.caption.clone()),
            description: request.description,
            facilitator: request.facilitator,
            venue_name: request.venue_name,
            venue_address: request.venue_address,
            venue_details: request.venue_details,
            city: request.city,
            language: request.language,
            start_date: request.start_date,
            meeting_time: request.meeting_time,
            end_date,
            duration_minutes: request
                .duration_minutes
                .unwrap_or(self.settings.default_duration_minutes),
            timezone: request.timezone,
            draft: request.draft.unwrap_or(true),
            signup_open: request.signup_open.unwrap_or(true),
            created_at: now,
            updated_at: now,
            deleted_at: None,
        };

        let mut changes = ChangeSet::new(GroupWrite::Insert(group.clone()), now);
        if !group.draft {
            let slots = schedule::generate(group.start_date, group.end_date, group.meeting_time)?;
            reconcile(&[], &slots, None).apply_to(&mut changes);
        }

        let committed = self.store.commit(changes)?;
        let group = committed.group;
        info!(
            group = %group.id,
            draft = group.draft,
            meetings = committed.inserted.len(),
            "study group created"
        );

        self.notifier.notify(&LifecycleEvent::Created {
            group: group.clone(),
        });
        Ok(group)
    }

    // ── update ──────────────────────────────────────────────────────────

    /// Apply a partial update.
    ///
    /// Changes to the start date, end date or weeks, meeting time, or timezone
    /// are refused with `{"start_date": "cannot update date"}` once the group
    /// is locked, and the whole request is then dropped. A published group
    /// whose schedule changed, or a draft being published, has its meetings
    /// regenerated in the same commit.
    pub fn update(
        &self,
        now: DateTime<Utc>,
        id: StudyGroupId,
        request: UpdateRequest,
    ) -> Result<StudyGroup> {
        self.validator.validate_update(&request)?;

        self.store.group(id, false)?;
        let lock = self.locks.handle(id);
        let _held = lock.lock().unwrap_or_else(PoisonError::into_inner);

        let current = self.store.group(id, false)?;
        let meetings = self.store.meetings(id, false)?;

        let proposed = proposed_schedule(&current, &request, self.settings.max_weeks)?;
        let schedule_changed = proposed != current.schedule_fields();

        if schedule_changed && !self.guard.can_edit_schedule(now, &current, &meetings)? {
            warn!(group = %id, "schedule edit refused, first meeting is too close");
            return Err(ValidationErrors::single(LOCKED_FIELD, LOCKED_MESSAGE).into());
        }

        if let Some(course) = request.course.filter(|c| *c != current.course) {
            self.store.course(course)?;
        }

        let mut updated = current.clone();
        apply_fields(&mut updated, request, proposed);

        let published_now = current.draft && !updated.draft;
        let plan = if !updated.draft && (schedule_changed || published_now) {
            let retime_from = (updated.meeting_time != current.meeting_time)
                .then_some(current.meeting_time);
            Some(self.plan_regeneration(&updated, &meetings, retime_from)?)
        } else {
            None
        };

        let mut changes = ChangeSet::new(GroupWrite::Update(updated), now);
        if let Some(plan) = &plan {
            plan.apply_to(&mut changes);
        }
        let updated = self.store.commit(changes)?.group;

        info!(
            group = %id,
            schedule_changed,
            published = published_now,
            "study group updated"
        );

        self.notifier.notify(&LifecycleEvent::Updated {
            group: updated.clone(),
        });
        if published_now {
            self.notifier.notify(&LifecycleEvent::Published {
                group: updated.clone(),
            });
        }
        if let Some(plan) = plan.filter(|p| !p.is_noop()) {
            self.notifier.notify(&plan.event(updated.clone()));
        }

        Ok(updated)
    }

    /// Publish a draft. On an already published group this is an update that
    /// changes nothing but `updated_at`.
    pub fn publish(&self, now: DateTime<Utc>, id: StudyGroupId) -> Result<StudyGroup> {
        self.update(
            now,
            id,
            UpdateRequest {
                draft: Some(false),
                ..Default::default()
            },
        )
    }

    // ── regenerate ──────────────────────────────────────────────────────

    /// Recompute a published group's meetings from its current fields and
    /// reconcile them with what is stored.
    ///
    /// Idempotent: a second call with no intervening change commits nothing.
    /// Drafts hold no generated meetings, so for them this does nothing.
    pub fn regenerate(&self, now: DateTime<Utc>, id: StudyGroupId) -> Result<Reconciliation> {
        self.store.group(id, false)?;
        let lock = self.locks.handle(id);
        let _held = lock.lock().unwrap_or_else(PoisonError::into_inner);

        let group = self.store.group(id, false)?;
        if group.draft {
            debug!(group = %id, "skipping regeneration of draft");
            return Ok(Reconciliation::default());
        }

        let meetings = self.store.meetings(id, false)?;
        let plan = self.plan_regeneration(&group, &meetings, None)?;
        if plan.is_noop() {
            return Ok(plan);
        }

        let mut changes = ChangeSet::new(GroupWrite::Unchanged(id), now);
        plan.apply_to(&mut changes);
        let group = self.store.commit(changes)?.group;

        info!(
            group = %id,
            inserted = plan.insert.len(),
            removed = plan.remove.len(),
            "meetings regenerated"
        );
        self.notifier.notify(&plan.event(group));
        Ok(plan)
    }

    fn plan_regeneration(
        &self,
        group: &StudyGroup,
        meetings: &[Meeting],
        retime_from: Option<NaiveTime>,
    ) -> Result<Reconciliation> {
        let slots = schedule::generate(group.start_date, group.end_date, group.meeting_time)?;
        let plan = reconcile(meetings, &slots, retime_from);
        debug!(
            group = %group.id,
            kept = plan.kept.len(),
            inserted = plan.insert.len(),
            retimed = plan.retime.len(),
            removed = plan.remove.len(),
            "reconciled meetings"
        );
        Ok(plan)
    }

    // ── delete / cancel ─────────────────────────────────────────────────

    /// Soft-delete a study group. Allowed in any state; its meetings stay on
    /// record.
    pub fn delete_group(&self, now: DateTime<Utc>, id: StudyGroupId) -> Result<StudyGroup> {
        self.store.group(id, false)?;
        let lock = self.locks.handle(id);
        let held = lock.lock().unwrap_or_else(PoisonError::into_inner);

        let mut group = self.store.group(id, false)?;
        group.deleted_at = Some(now);
        let group = self
            .store
            .commit(ChangeSet::new(GroupWrite::Update(group), now))?
            .group;

        drop(held);
        self.locks.forget(id);

        info!(group = %id, "study group deleted");
        self.notifier.notify(&LifecycleEvent::Deleted {
            group: group.clone(),
        });
        Ok(group)
    }

    /// Soft-delete a single meeting, e.g. one cancelled session.
    pub fn cancel_meeting(&self, now: DateTime<Utc>, meeting_id: MeetingId) -> Result<Meeting> {
        let meeting = self.store.meeting(meeting_id)?;
        let group_id = meeting.study_group;

        self.store.group(group_id, false)?;
        let lock = self.locks.handle(group_id);
        let _held = lock.lock().unwrap_or_else(PoisonError::into_inner);

        self.store.group(group_id, false)?;
        let meeting = self.store.meeting(meeting_id)?;
        if !meeting.is_active() {
            return Err(CircleError::NotFound {
                entity: MeetingId::ENTITY,
                id: meeting_id.0,
            });
        }

        let mut changes = ChangeSet::new(GroupWrite::Unchanged(group_id), now);
        changes.delete_meetings.push(meeting_id);
        let group = self.store.commit(changes)?.group;

        info!(group = %group_id, meeting = %meeting_id, "meeting cancelled");
        self.notifier.notify(&LifecycleEvent::Rescheduled {
            group,
            added: Vec::new(),
            removed: vec![meeting.meeting_date],
            retimed: Vec::new(),
        });

        self.store.meeting(meeting_id)
    }

    // ── Queries ─────────────────────────────────────────────────────────

    pub fn group(&self, id: StudyGroupId) -> Result<StudyGroup> {
        self.store.group(id, false)
    }

    /// Active meetings ordered by date then time.
    pub fn meetings(&self, id: StudyGroupId) -> Result<Vec<Meeting>> {
        self.store.group(id, false)?;
        self.store.meetings(id, false)
    }

    pub fn published(&self) -> Result<Vec<StudyGroup>> {
        self.store.published()
    }

    pub fn schedule_state(&self, now: DateTime<Utc>, id: StudyGroupId) -> Result<ScheduleState> {
        let group = self.store.group(id, false)?;
        let meetings = self.store.meetings(id, false)?;
        self.guard.schedule_state(now, &group, &meetings)
    }

    pub fn can_edit_schedule(&self, now: DateTime<Utc>, id: StudyGroupId) -> Result<bool> {
        Ok(self.schedule_state(now, id)?.allows_schedule_edit())
    }

    /// The first active meeting starting strictly after `now`.
    pub fn next_meeting(&self, now: DateTime<Utc>, id: StudyGroupId) -> Result<Option<Meeting>> {
        let group = self.store.group(id, false)?;
        let meetings = self.store.meetings(id, false)?;
        Ok(model::next_meeting(&group, &meetings, now)?.cloned())
    }

    /// 1-based position of a meeting among its group's active meetings.
    pub fn meeting_number(&self, meeting_id: MeetingId) -> Result<usize> {
        let meeting = self.store.meeting(meeting_id)?;
        let active = self.store.meetings(meeting.study_group, false)?;
        let dates: Vec<NaiveDate> = active.iter().map(|m| m.meeting_date).collect();
        Ok(schedule::meeting_number(&dates, meeting.meeting_date))
    }
}

// ── Field helpers ───────────────────────────────────────────────────────────

/// The schedule fields `request` would leave `current` with.
///
/// An explicit `end_date` wins over `weeks`. Moving the start without giving
/// either keeps the current number of weeks.
fn proposed_schedule(
    current: &StudyGroup,
    request: &UpdateRequest,
    max_weeks: u32,
) -> Result<ScheduleFields> {
    let start_date = request.start_date.unwrap_or(current.start_date);

    let end_date = match (request.end_date, request.weeks) {
        (Some(end_date), _) => end_date,
        (None, Some(weeks)) => end_date_for_weeks(start_date, weeks)?,
        (None, None) if start_date != current.start_date => {
            end_date_for_weeks(start_date, current.weeks().max(1))?
        }
        (None, None) => current.end_date,
    };

    if end_date < start_date {
        return Err(
            ValidationErrors::single("end_date", "end date must not be before start date").into(),
        );
    }
    check_span(start_date, end_date, max_weeks)?;

    Ok(ScheduleFields {
        start_date,
        end_date,
        meeting_time: request.meeting_time.unwrap_or(current.meeting_time),
        timezone: request
            .timezone
            .clone()
            .unwrap_or_else(|| current.timezone.clone()),
    })
}

fn apply_fields(group: &mut StudyGroup, request: UpdateRequest, schedule: ScheduleFields) {
    let UpdateRequest {
        name,
        course,
        course_description,
        description,
        venue_name,
        venue_address,
        venue_details,
        city,
        language,
        duration_minutes,
        draft,
        signup_open,
        ..
    } = request;

    if let Some(name) = name {
        group.name = name;
    }
    if let Some(course) = course {
        group.course = course;
    }
    if let Some(course_description) = course_description {
        group.course_description = course_description;
    }
    if let Some(description) = description {
        group.description = description;
    }
    if let Some(venue_name) = venue_name {
        group.venue_name = venue_name;
    }
    if let Some(venue_address) = venue_address {
        group.venue_address = venue_address;
    }
    if let Some(venue_details) = venue_details {
        group.venue_details = venue_details;
    }
    if let Some(city) = city {
        group.city = city;
    }
    if let Some(language) = language {
        group.language = language;
    }
    if let Some(duration_minutes) = duration_minutes {
        group.duration_minutes = duration_minutes;
    }
    if let Some(draft) = draft {
        group.draft = draft;
    }
    if let Some(signup_open) = signup_open {
        group.signup_open = signup_open;
    }

    group.start_date = schedule.start_date;
    group.end_date = schedule.end_date;
    group.meeting_time = schedule.meeting_time;
    group.timezone = schedule.timezone;
}

fn end_date_for_weeks(start_date: NaiveDate, weeks: u32) -> Result<NaiveDate> {
    schedule::end_date_for_weeks(start_date, weeks)
        .map_err(|_| ValidationErrors::single("weeks", "number of weeks is out of range").into())
}

fn check_span(start_date: NaiveDate, end_date: NaiveDate, max_weeks: u32) -> Result<()> {
    let mut errors = ValidationErrors::new();
    validate::check_weeks(&mut errors, schedule::weeks_between(start_date, end_date), max_weeks);
    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors.into())
    }
}

fn non_blank(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Course, CourseId, FacilitatorId};
    use crate::notify::RecordingNotifier;
    use crate::store::InMemoryStore;
    use crate::validate::DefaultValidator;
    use chrono::{Duration, TimeZone};

    type Lifecycle = StudyGroupLifecycle<InMemoryStore, DefaultValidator, Arc<RecordingNotifier>>;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn time(h: u32, m: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(h, m, 0).unwrap()
    }

    fn at(y: i32, m: u32, d: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, 0, 0, 0).unwrap()
    }

    fn lifecycle() -> (Lifecycle, Arc<RecordingNotifier>) {
        let store = InMemoryStore::with_courses([Course {
            id: CourseId(3),
            title: "Academic Writing".to_string(),
            caption: "Write with confidence".to_string(),
        }]);
        let notifier = Arc::new(RecordingNotifier::new());
        let lifecycle =
            StudyGroupLifecycle::new(store, DefaultValidator::default(), notifier.clone());
        (lifecycle, notifier)
    }

    fn create(lifecycle: &Lifecycle, now: DateTime<Utc>, request: CreateRequest) -> StudyGroup {
        lifecycle.create(now, request).unwrap()
    }

    fn request(start_date: NaiveDate, weeks: u32, draft: bool) -> CreateRequest {
        CreateRequest {
            course: CourseId(3),
            facilitator: FacilitatorId(7),
            name: Some("Writing circle".to_string()),
            course_description: None,
            description: "Lets learn something".to_string(),
            venue_name: "75 Harrington".to_string(),
            venue_address: "75 Harrington".to_string(),
            venue_details: "top floor".to_string(),
            city: "Cape Town".to_string(),
            language: "en".to_string(),
            start_date,
            end_date: None,
            weeks: Some(weeks),
            meeting_time: time(17, 1),
            duration_minutes: Some(50),
            timezone: "UTC".to_string(),
            draft: Some(draft),
            signup_open: None,
        }
    }

    fn meeting(id: u64, meeting_date: NaiveDate, meeting_time: NaiveTime) -> Meeting {
        Meeting {
            id: MeetingId(id),
            study_group: StudyGroupId(1),
            meeting_date,
            meeting_time,
            created_at: at(2018, 1, 1),
            updated_at: at(2018, 1, 1),
            deleted_at: None,
        }
    }

    fn slots(dates: &[NaiveDate], meeting_time: NaiveTime) -> Vec<MeetingSlot> {
        dates
            .iter()
            .map(|d| MeetingSlot {
                meeting_date: *d,
                meeting_time,
            })
            .collect()
    }

    // ── reconcile tests ─────────────────────────────────────────────────

    #[test]
    fn test_reconcile_from_empty_inserts_everything() {
        let planned = slots(&[date(2018, 2, 12), date(2018, 2, 19)], time(17, 1));
        let plan = reconcile(&[], &planned, None);
        assert_eq!(plan.insert, planned);
        assert!(plan.kept.is_empty() && plan.remove.is_empty());
    }

    #[test]
    fn test_reconcile_keeps_inserts_and_removes_by_date() {
        let existing = vec![
            meeting(1, date(2018, 12, 15), time(17, 1)),
            meeting(2, date(2018, 12, 22), time(17, 1)),
        ];
        let planned = slots(&[date(2018, 12, 22), date(2018, 12, 29)], time(17, 1));
        let plan = reconcile(&existing, &planned, None);

        assert_eq!(plan.kept, vec![MeetingId(2)]);
        assert_eq!(plan.insert, slots(&[date(2018, 12, 29)], time(17, 1)));
        assert_eq!(plan.remove, vec![(MeetingId(1), date(2018, 12, 15))]);
    }

    #[test]
    fn test_reconcile_ignores_cancelled_meetings() {
        let mut cancelled = meeting(1, date(2018, 12, 15), time(17, 1));
        cancelled.deleted_at = Some(at(2018, 12, 1));
        let planned = slots(&[date(2018, 12, 15)], time(17, 1));
        let plan = reconcile(&[cancelled], &planned, None);
        assert_eq!(plan.insert.len(), 1);
        assert!(plan.remove.is_empty());
    }

    #[test]
    fn test_reconcile_removes_same_day_duplicates() {
        let existing = vec![
            meeting(1, date(2018, 12, 15), time(17, 1)),
            meeting(2, date(2018, 12, 15), time(19, 0)),
        ];
        let planned = slots(&[date(2018, 12, 15)], time(17, 1));
        let plan = reconcile(&existing, &planned, None);
        assert_eq!(plan.kept, vec![MeetingId(1)]);
        assert_eq!(plan.remove, vec![(MeetingId(2), date(2018, 12, 15))]);
    }

    #[test]
    fn test_reconcile_retimes_only_untouched_meetings() {
        let existing = vec![
            meeting(1, date(2018, 12, 15), time(17, 1)),
            // individually moved to 19:00
            meeting(2, date(2018, 12, 22), time(19, 0)),
        ];
        let planned = slots(&[date(2018, 12, 15), date(2018, 12, 22)], time(18, 0));
        let plan = reconcile(&existing, &planned, Some(time(17, 1)));
        assert_eq!(plan.retime, vec![(MeetingId(1), time(18, 0))]);
        assert_eq!(plan.kept, vec![MeetingId(1), MeetingId(2)]);

        let untouched = reconcile(&existing, &planned, None);
        assert!(untouched.retime.is_empty());
    }

    // ── create tests ────────────────────────────────────────────────────

    #[test]
    fn test_create_draft_has_no_meetings() {
        let (lifecycle, notifier) = lifecycle();
        let group = create(&lifecycle, at(2018, 1, 20), request(date(2018, 2, 12), 2, true));
        assert!(group.draft);
        assert!(lifecycle.meetings(group.id).unwrap().is_empty());
        assert_eq!(notifier.kinds_for(group.id), vec!["created"]);
    }

    #[test]
    fn test_create_published_generates_meetings() {
        let (lifecycle, _) = lifecycle();
        let group = create(&lifecycle, at(2018, 1, 20), request(date(2018, 2, 12), 2, false));
        let dates: Vec<NaiveDate> = lifecycle
            .meetings(group.id)
            .unwrap()
            .iter()
            .map(|m| m.meeting_date)
            .collect();
        assert_eq!(dates, vec![date(2018, 2, 12), date(2018, 2, 19)]);
    }

    #[test]
    fn test_create_resolves_defaults_from_course() {
        let (lifecycle, _) = lifecycle();
        let mut req = request(date(2018, 2, 12), 2, true);
        req.name = Some("   ".to_string());
        req.duration_minutes = None;
        req.draft = None;
        let group = lifecycle.create(at(2018, 1, 20), req).unwrap();
        assert_eq!(group.name, "Academic Writing");
        assert_eq!(group.course_description, "Write with confidence");
        assert_eq!(group.duration_minutes, 90);
        assert!(group.draft);
        assert!(group.signup_open);
    }

    #[test]
    fn test_create_unknown_course_is_not_found() {
        let (lifecycle, _) = lifecycle();
        let mut req = request(date(2018, 2, 12), 2, false);
        req.course = CourseId(99);
        let err = lifecycle.create(at(2018, 1, 20), req).unwrap_err();
        assert!(matches!(err, CircleError::NotFound { entity: "course", id: 99 }));
    }

    #[test]
    fn test_create_invalid_venue_persists_nothing() {
        let (lifecycle, notifier) = lifecycle();
        let mut req = request(date(2018, 2, 12), 2, false);
        req.venue_name = "/@@".to_string();
        let err = lifecycle.create(at(2018, 1, 20), req).unwrap_err();
        assert!(err.validation_errors().unwrap().contains("venue_name"));
        assert!(lifecycle.published().unwrap().is_empty());
        assert!(notifier.events().is_empty());
    }

    // ── update tests ────────────────────────────────────────────────────

    #[test]
    fn test_update_non_schedule_fields_when_locked() {
        let (lifecycle, _) = lifecycle();
        let group = create(&lifecycle, at(2018, 12, 1), request(date(2018, 12, 12), 2, false));

        // after the circle started
        let update = UpdateRequest {
            description: Some("Lets learn something else".to_string()),
            ..Default::default()
        };
        let updated = lifecycle.update(at(2019, 3, 1), group.id, update).unwrap();
        assert_eq!(updated.description, "Lets learn something else");
        assert_eq!(updated.updated_at, at(2019, 3, 1));
    }

    #[test]
    fn test_update_same_schedule_values_is_not_a_schedule_change() {
        let (lifecycle, _) = lifecycle();
        let group = create(&lifecycle, at(2018, 12, 1), request(date(2018, 12, 15), 2, false));
        let update = UpdateRequest {
            start_date: Some(date(2018, 12, 15)),
            weeks: Some(2),
            meeting_time: Some(time(17, 1)),
            timezone: Some("UTC".to_string()),
            ..Default::default()
        };
        assert!(lifecycle.update(at(2018, 12, 14), group.id, update).is_ok());
    }

    #[test]
    fn test_locked_update_is_all_or_nothing() {
        let (lifecycle, notifier) = lifecycle();
        let group = create(&lifecycle, at(2018, 12, 1), request(date(2018, 12, 15), 2, false));
        notifier.clear();

        let update = UpdateRequest {
            description: Some("changed".to_string()),
            meeting_time: Some(time(9, 0)),
            ..Default::default()
        };
        let err = lifecycle.update(at(2018, 12, 14), group.id, update).unwrap_err();
        let errors = err.validation_errors().unwrap();
        assert_eq!(errors.get(LOCKED_FIELD), Some(LOCKED_MESSAGE));

        let stored = lifecycle.group(group.id).unwrap();
        assert_eq!(stored, group);
        assert!(notifier.events().is_empty());
    }

    #[test]
    fn test_moving_start_keeps_weeks() {
        let (lifecycle, _) = lifecycle();
        let group = create(&lifecycle, at(2018, 12, 1), request(date(2018, 12, 15), 3, false));
        let update = UpdateRequest {
            start_date: Some(date(2018, 12, 22)),
            ..Default::default()
        };
        let updated = lifecycle.update(at(2018, 12, 1), group.id, update).unwrap();
        assert_eq!(updated.weeks(), 3);
        assert_eq!(updated.end_date, date(2019, 1, 5));
        assert_eq!(lifecycle.meetings(group.id).unwrap().len(), 3);
    }

    #[test]
    fn test_update_reversed_end_date_rejected() {
        let (lifecycle, _) = lifecycle();
        let group = create(&lifecycle, at(2018, 12, 1), request(date(2018, 12, 15), 2, true));
        let update = UpdateRequest {
            end_date: Some(date(2018, 12, 1)),
            ..Default::default()
        };
        let err = lifecycle.update(at(2018, 12, 1), group.id, update).unwrap_err();
        assert!(err.validation_errors().unwrap().contains("end_date"));
    }

    #[test]
    fn test_update_end_date_span_is_capped() {
        let (lifecycle, notifier) = lifecycle();
        let group = create(&lifecycle, at(2018, 12, 1), request(date(2018, 12, 15), 2, false));
        let update = UpdateRequest {
            end_date: Some(date(2118, 12, 15)),
            ..Default::default()
        };
        let err = lifecycle.update(at(2018, 12, 1), group.id, update).unwrap_err();
        assert_eq!(
            err.validation_errors().unwrap().get("weeks"),
            Some("number of weeks must be between 1 and 52")
        );
        assert_eq!(lifecycle.meetings(group.id).unwrap().len(), 2);
        assert_eq!(notifier.kinds_for(group.id), vec!["created"]);
    }

    struct AcceptAll;

    impl Validator for AcceptAll {
        fn validate_create(&self, _: &CreateRequest) -> std::result::Result<(), ValidationErrors> {
            Ok(())
        }

        fn validate_update(&self, _: &UpdateRequest) -> std::result::Result<(), ValidationErrors> {
            Ok(())
        }
    }

    #[test]
    fn test_create_end_date_span_is_capped_with_permissive_validator() {
        let store = InMemoryStore::with_courses([Course {
            id: CourseId(3),
            title: "Academic Writing".to_string(),
            caption: "Write with confidence".to_string(),
        }]);
        let notifier = Arc::new(RecordingNotifier::new());
        let lifecycle = StudyGroupLifecycle::new(store, AcceptAll, notifier);

        let mut req = request(date(2018, 12, 15), 2, false);
        req.weeks = None;
        req.end_date = Some(date(2028, 12, 15));
        let err = lifecycle.create(at(2018, 12, 1), req).unwrap_err();
        assert!(err.validation_errors().unwrap().contains("weeks"));
        assert!(lifecycle.published().unwrap().is_empty());
    }

    #[test]
    fn test_unknown_group_leaves_no_lock_behind() {
        let (lifecycle, _) = lifecycle();
        let missing = StudyGroupId(404);
        assert!(lifecycle.update(at(2018, 12, 1), missing, UpdateRequest::default()).is_err());
        assert!(lifecycle.regenerate(at(2018, 12, 1), missing).is_err());
        assert!(lifecycle.delete_group(at(2018, 12, 1), missing).is_err());
        assert!(lifecycle.locks.locks.lock().unwrap().is_empty());
    }

    #[test]
    fn test_meeting_time_change_retimes_kept_meetings() {
        let (lifecycle, notifier) = lifecycle();
        let group = create(&lifecycle, at(2018, 12, 1), request(date(2018, 12, 15), 2, false));
        let before: Vec<MeetingId> =
            lifecycle.meetings(group.id).unwrap().iter().map(|m| m.id).collect();

        let update = UpdateRequest {
            meeting_time: Some(time(18, 30)),
            ..Default::default()
        };
        lifecycle.update(at(2018, 12, 1), group.id, update).unwrap();

        let after = lifecycle.meetings(group.id).unwrap();
        assert_eq!(after.iter().map(|m| m.id).collect::<Vec<_>>(), before);
        assert!(after.iter().all(|m| m.meeting_time == time(18, 30)));
        assert_eq!(
            notifier.kinds_for(group.id),
            vec!["created", "updated", "rescheduled"]
        );
    }

    #[test]
    fn test_publish_generates_meetings_and_emits_events() {
        let (lifecycle, notifier) = lifecycle();
        let group = create(&lifecycle, at(2018, 1, 20), request(date(2018, 2, 12), 2, true));
        let published = lifecycle.publish(at(2018, 1, 20), group.id).unwrap();

        assert!(!published.draft);
        assert_eq!(lifecycle.meetings(group.id).unwrap().len(), 2);
        assert_eq!(
            notifier.kinds_for(group.id),
            vec!["created", "updated", "published", "rescheduled"]
        );
    }

    #[test]
    fn test_publish_twice_keeps_meetings() {
        let (lifecycle, _) = lifecycle();
        let group = create(&lifecycle, at(2018, 1, 20), request(date(2018, 2, 12), 2, true));
        lifecycle.publish(at(2018, 1, 20), group.id).unwrap();
        let first = lifecycle.meetings(group.id).unwrap();
        lifecycle.publish(at(2018, 1, 21), group.id).unwrap();
        assert_eq!(lifecycle.meetings(group.id).unwrap(), first);
    }

    // ── regenerate tests ────────────────────────────────────────────────

    #[test]
    fn test_regenerate_is_idempotent() {
        let (lifecycle, _) = lifecycle();
        let group = create(&lifecycle, at(2018, 1, 20), request(date(2018, 2, 12), 4, false));
        let before = lifecycle.meetings(group.id).unwrap();

        let plan = lifecycle.regenerate(at(2018, 1, 21), group.id).unwrap();
        assert!(plan.is_noop());
        assert_eq!(plan.kept.len(), 4);
        assert_eq!(lifecycle.meetings(group.id).unwrap(), before);
    }

    #[test]
    fn test_regenerate_restores_cancelled_session() {
        let (lifecycle, _) = lifecycle();
        let group = create(&lifecycle, at(2018, 1, 20), request(date(2018, 2, 12), 2, false));
        let first = lifecycle.meetings(group.id).unwrap()[0].clone();
        lifecycle.cancel_meeting(at(2018, 1, 21), first.id).unwrap();
        assert_eq!(lifecycle.meetings(group.id).unwrap().len(), 1);

        let plan = lifecycle.regenerate(at(2018, 1, 22), group.id).unwrap();
        assert_eq!(plan.insert.len(), 1);
        assert_eq!(lifecycle.meetings(group.id).unwrap().len(), 2);
    }

    #[test]
    fn test_regenerate_draft_is_noop() {
        let (lifecycle, _) = lifecycle();
        let group = create(&lifecycle, at(2018, 1, 20), request(date(2018, 2, 12), 2, true));
        let plan = lifecycle.regenerate(at(2018, 1, 20), group.id).unwrap();
        assert!(plan.is_noop() && plan.kept.is_empty());
        assert!(lifecycle.meetings(group.id).unwrap().is_empty());
    }

    // ── delete / cancel tests ───────────────────────────────────────────

    #[test]
    fn test_delete_hides_group_from_any_state() {
        let (lifecycle, notifier) = lifecycle();
        let group = create(&lifecycle, at(2018, 12, 1), request(date(2018, 12, 15), 2, false));
        // locked, but deletion is still allowed
        lifecycle.delete_group(at(2018, 12, 14), group.id).unwrap();

        assert!(lifecycle.group(group.id).is_err());
        assert!(lifecycle.published().unwrap().is_empty());
        let stored = lifecycle.store().group(group.id, true).unwrap();
        assert_eq!(stored.deleted_at, Some(at(2018, 12, 14)));
        assert_eq!(notifier.kinds_for(group.id).last(), Some(&"deleted"));
    }

    #[test]
    fn test_cancel_meeting_twice_is_not_found() {
        let (lifecycle, _) = lifecycle();
        let group = create(&lifecycle, at(2018, 1, 20), request(date(2018, 2, 12), 2, false));
        let id = lifecycle.meetings(group.id).unwrap()[1].id;
        let cancelled = lifecycle.cancel_meeting(at(2018, 1, 21), id).unwrap();
        assert_eq!(cancelled.deleted_at, Some(at(2018, 1, 21)));
        assert!(lifecycle.cancel_meeting(at(2018, 1, 22), id).is_err());
    }

    // ── query tests ─────────────────────────────────────────────────────

    #[test]
    fn test_next_meeting_and_numbering() {
        let (lifecycle, _) = lifecycle();
        let group = create(&lifecycle, at(2018, 1, 20), request(date(2018, 2, 12), 3, false));
        let meetings = lifecycle.meetings(group.id).unwrap();

        let next = lifecycle.next_meeting(at(2018, 2, 13), group.id).unwrap().unwrap();
        assert_eq!(next.id, meetings[1].id);
        assert_eq!(lifecycle.meeting_number(next.id).unwrap(), 2);

        lifecycle.cancel_meeting(at(2018, 2, 1), meetings[0].id).unwrap();
        assert_eq!(lifecycle.meeting_number(next.id).unwrap(), 1);
    }

    #[test]
    fn test_schedule_state_moves_with_time() {
        let (lifecycle, _) = lifecycle();
        let group = create(&lifecycle, at(2018, 12, 1), request(date(2018, 12, 15), 2, false));
        assert_eq!(
            lifecycle.schedule_state(at(2018, 12, 12), group.id).unwrap(),
            ScheduleState::PublishedEditable
        );
        assert_eq!(
            lifecycle.schedule_state(at(2018, 12, 14), group.id).unwrap(),
            ScheduleState::PublishedLocked
        );
        let later = at(2018, 12, 14) + Duration::hours(1);
        assert!(!lifecycle.can_edit_schedule(later, group.id).unwrap());
    }
}
