//! Persistence for study groups and their meetings.
//!
//! The lifecycle talks to storage only through [`StudyGroupStore`]. Every
//! mutation is expressed as one [`ChangeSet`] so a store can apply the group
//! write and all meeting inserts, re-times, and soft-deletes as one unit.
//!
//! [`InMemoryStore`] is the implementation used by tests and the CLI.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use chrono::{DateTime, NaiveTime, Utc};

use crate::error::{CircleError, Result};
use crate::model::{Course, CourseId, Meeting, MeetingId, NewMeeting, StudyGroup, StudyGroupId};

/// Storage operations the lifecycle needs.
///
/// # Thread Safety
///
/// Implementations must be `Send + Sync`; the lifecycle serialises writers per
/// group but readers may run concurrently.
pub trait StudyGroupStore: Send + Sync {
    /// Resolve a course from the catalogue.
    fn course(&self, id: CourseId) -> Result<Course>;

    /// Load a study group. Soft-deleted groups are [`CircleError::NotFound`]
    /// unless `include_deleted` is set.
    fn group(&self, id: StudyGroupId, include_deleted: bool) -> Result<StudyGroup>;

    /// A group's meetings ordered by date then time. Cancelled meetings are
    /// included only when `include_deleted` is set.
    fn meetings(&self, group: StudyGroupId, include_deleted: bool) -> Result<Vec<Meeting>>;

    /// Load one meeting, cancelled or not.
    fn meeting(&self, id: MeetingId) -> Result<Meeting>;

    /// Published (non-draft, non-deleted) groups ordered by id.
    fn published(&self) -> Result<Vec<StudyGroup>>;

    /// Apply a change set atomically: either all of it lands or none of it.
    fn commit(&self, changes: ChangeSet) -> Result<Committed>;
}

/// What happens to the group row in a [`ChangeSet`].
#[derive(Debug, Clone)]
pub enum GroupWrite {
    /// Store a new group. The store assigns the id; the one given is ignored.
    Insert(StudyGroup),
    /// Overwrite an existing group.
    Update(StudyGroup),
    /// Leave the group row alone; only meetings change.
    Unchanged(StudyGroupId),
}

/// One atomic unit of work against a single study group.
#[derive(Debug, Clone)]
pub struct ChangeSet {
    pub group: GroupWrite,
    pub insert_meetings: Vec<NewMeeting>,
    /// Move retained meetings to a new time-of-day, keeping their ids.
    pub retime_meetings: Vec<(MeetingId, NaiveTime)>,
    /// Soft-delete these meetings.
    pub delete_meetings: Vec<MeetingId>,
    /// Stamped on every row the change touches.
    pub at: DateTime<Utc>,
}

impl ChangeSet {
    pub fn new(group: GroupWrite, at: DateTime<Utc>) -> Self {
        Self {
            group,
            insert_meetings: Vec::new(),
            retime_meetings: Vec::new(),
            delete_meetings: Vec::new(),
            at,
        }
    }
}

/// The result of a successful commit.
#[derive(Debug, Clone)]
pub struct Committed {
    pub group: StudyGroup,
    pub inserted: Vec<Meeting>,
}

// ── InMemoryStore ───────────────────────────────────────────────────────────

/// In-memory store.
///
/// Data lives behind one `RwLock`, so a commit validates and applies while
/// holding the write lock and concurrent readers never observe half of it.
#[derive(Debug, Clone, Default)]
pub struct InMemoryStore {
    data: Arc<RwLock<StoreData>>,
}

#[derive(Debug)]
struct StoreData {
    courses: HashMap<CourseId, Course>,
    groups: BTreeMap<StudyGroupId, StudyGroup>,
    meetings: BTreeMap<MeetingId, Meeting>,
    next_group_id: u64,
    next_meeting_id: u64,
}

impl Default for StoreData {
    fn default() -> Self {
        Self {
            courses: HashMap::new(),
            groups: BTreeMap::new(),
            meetings: BTreeMap::new(),
            next_group_id: 1,
            next_meeting_id: 1,
        }
    }
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// A store pre-populated with `courses`.
    pub fn with_courses(courses: impl IntoIterator<Item = Course>) -> Self {
        let store = Self::new();
        for course in courses {
            store.add_course(course);
        }
        store
    }

    /// Add or replace a course in the catalogue.
    pub fn add_course(&self, course: Course) {
        let mut data = self.data.write().unwrap_or_else(|e| e.into_inner());
        data.courses.insert(course.id, course);
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, StoreData>> {
        self.data
            .read()
            .map_err(|_| CircleError::Storage("store lock poisoned".to_string()))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, StoreData>> {
        self.data
            .write()
            .map_err(|_| CircleError::Storage("store lock poisoned".to_string()))
    }
}

impl StoreData {
    fn active_group(&self, id: StudyGroupId) -> Result<&StudyGroup> {
        self.groups
            .get(&id)
            .filter(|g| !g.is_deleted())
            .ok_or(CircleError::NotFound {
                entity: StudyGroupId::ENTITY,
                id: id.0,
            })
    }

    /// Check a change set against current data without applying it.
    fn check(&self, group_id: Option<StudyGroupId>, changes: &ChangeSet) -> Result<()> {
        let mut active_dates = BTreeSet::new();

        if let Some(group_id) = group_id {
            self.active_group(group_id)?;

            let owned = |id: &MeetingId| -> Result<&Meeting> {
                self.meetings
                    .get(id)
                    .filter(|m| m.study_group == group_id && m.is_active())
                    .ok_or(CircleError::NotFound {
                        entity: MeetingId::ENTITY,
                        id: id.0,
                    })
            };
            for id in &changes.delete_meetings {
                owned(id)?;
            }
            for (id, _) in &changes.retime_meetings {
                owned(id)?;
            }

            active_dates.extend(
                self.meetings
                    .values()
                    .filter(|m| m.study_group == group_id && m.is_active())
                    .filter(|m| !changes.delete_meetings.contains(&m.id))
                    .map(|m| m.meeting_date),
            );
        } else if !changes.delete_meetings.is_empty() || !changes.retime_meetings.is_empty() {
            return Err(CircleError::Storage(
                "a new group has no meetings to change".to_string(),
            ));
        }

        for new in &changes.insert_meetings {
            if !active_dates.insert(new.meeting_date) {
                return Err(CircleError::DuplicateMeetingDate {
                    group: group_id.map_or(0, StudyGroupId::value),
                    date: new.meeting_date,
                });
            }
        }

        Ok(())
    }
}

impl StudyGroupStore for InMemoryStore {
    fn course(&self, id: CourseId) -> Result<Course> {
        self.read()?
            .courses
            .get(&id)
            .cloned()
            .ok_or(CircleError::NotFound {
                entity: CourseId::ENTITY,
                id: id.0,
            })
    }

    fn group(&self, id: StudyGroupId, include_deleted: bool) -> Result<StudyGroup> {
        self.read()?
            .groups
            .get(&id)
            .filter(|g| include_deleted || !g.is_deleted())
            .cloned()
            .ok_or(CircleError::NotFound {
                entity: StudyGroupId::ENTITY,
                id: id.0,
            })
    }

    fn meetings(&self, group: StudyGroupId, include_deleted: bool) -> Result<Vec<Meeting>> {
        let data = self.read()?;
        let mut meetings: Vec<Meeting> = data
            .meetings
            .values()
            .filter(|m| m.study_group == group && (include_deleted || m.is_active()))
            .cloned()
            .collect();
        meetings.sort_by_key(|m| (m.meeting_date, m.meeting_time, m.id));
        Ok(meetings)
    }

    fn meeting(&self, id: MeetingId) -> Result<Meeting> {
        self.read()?
            .meetings
            .get(&id)
            .cloned()
            .ok_or(CircleError::NotFound {
                entity: MeetingId::ENTITY,
                id: id.0,
            })
    }

    fn published(&self) -> Result<Vec<StudyGroup>> {
        Ok(self
            .read()?
            .groups
            .values()
            .filter(|g| g.is_published())
            .cloned()
            .collect())
    }

    fn commit(&self, changes: ChangeSet) -> Result<Committed> {
        let mut data = self.write()?;

        let group_id = match &changes.group {
            GroupWrite::Insert(_) => None,
            GroupWrite::Update(group) => Some(group.id),
            GroupWrite::Unchanged(id) => Some(*id),
        };
        data.check(group_id, &changes)?;

        let group = match changes.group {
            GroupWrite::Insert(mut group) => {
                group.id = StudyGroupId(data.next_group_id);
                data.next_group_id += 1;
                group.created_at = changes.at;
                group.updated_at = changes.at;
                data.groups.insert(group.id, group.clone());
                group
            }
            GroupWrite::Update(mut group) => {
                group.updated_at = changes.at;
                data.groups.insert(group.id, group.clone());
                group
            }
            GroupWrite::Unchanged(id) => data.active_group(id)?.clone(),
        };

        for id in &changes.delete_meetings {
            if let Some(meeting) = data.meetings.get_mut(id) {
                meeting.deleted_at = Some(changes.at);
                meeting.updated_at = changes.at;
            }
        }
        for (id, meeting_time) in &changes.retime_meetings {
            if let Some(meeting) = data.meetings.get_mut(id) {
                meeting.meeting_time = *meeting_time;
                meeting.updated_at = changes.at;
            }
        }

        let mut inserted = Vec::with_capacity(changes.insert_meetings.len());
        for new in changes.insert_meetings {
            let meeting = Meeting {
                id: MeetingId(data.next_meeting_id),
                study_group: group.id,
                meeting_date: new.meeting_date,
                meeting_time: new.meeting_time,
                created_at: changes.at,
                updated_at: changes.at,
                deleted_at: None,
            };
            data.next_meeting_id += 1;
            data.meetings.insert(meeting.id, meeting.clone());
            inserted.push(meeting);
        }

        Ok(Committed { group, inserted })
    }
}
