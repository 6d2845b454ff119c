//! # circle-engine
//!
//! Scheduling and lifecycle rules for learning circles.
//!
//! A learning circle (study group) meets once a week at a fixed local time in
//! an IANA timezone. This crate turns a group's start date, end date, meeting
//! time, and timezone into dated meetings, keeps those meetings in step as the
//! group is edited, and decides when schedule edits are no longer allowed.
//!
//! ## Modules
//!
//! - [`time`]: localizing wall-clock times into instants, DST handling
//! - [`schedule`]: weekly meeting date generation and week arithmetic
//! - [`model`]: study groups, meetings, courses, and change requests
//! - [`guard`]: the 48-hour schedule edit lock
//! - [`validate`]: field-level request validation
//! - [`store`]: the storage seam and an in-memory implementation
//! - [`notify`]: lifecycle events and notifiers
//! - [`lifecycle`]: create, update, publish, regenerate, delete
//! - [`settings`]: tunable lifecycle policy
//! - [`error`]: error types

pub mod error;
pub mod guard;
pub mod lifecycle;
pub mod model;
pub mod notify;
pub mod schedule;
pub mod settings;
pub mod store;
pub mod time;
pub mod validate;

pub use error::{CircleError, Result, ValidationErrors};
pub use guard::{EditGuard, ScheduleState};
pub use lifecycle::{reconcile, Reconciliation, StudyGroupLifecycle};
pub use model::{
    Course, CourseId, CreateRequest, FacilitatorId, Meeting, MeetingId, StudyGroup, StudyGroupId,
    UpdateRequest,
};
pub use notify::{LifecycleEvent, Notifier, RecordingNotifier, TracingNotifier};
pub use schedule::{generate, MeetingSlot};
pub use settings::LifecycleSettings;
pub use store::{ChangeSet, InMemoryStore, StudyGroupStore};
pub use time::{localize, LocalInstant};
pub use validate::{DefaultValidator, Validator};
