//! Replay a scripted sequence of lifecycle actions against an in-memory store.

use std::sync::Arc;

use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use circle_engine::{
    CircleError, Course, CreateRequest, DefaultValidator, InMemoryStore, LifecycleSettings,
    MeetingId, RecordingNotifier, ScheduleState, StudyGroup, StudyGroupId, StudyGroupLifecycle,
    StudyGroupStore, TracingNotifier, UpdateRequest, ValidationErrors,
};
use serde::{Deserialize, Serialize};

type Notifiers = (TracingNotifier, Arc<RecordingNotifier>);
type Lifecycle = StudyGroupLifecycle<InMemoryStore, DefaultValidator, Notifiers>;

#[derive(Debug, Deserialize)]
pub struct Scenario {
    #[serde(default)]
    pub courses: Vec<Course>,
    pub steps: Vec<Step>,
}

#[derive(Debug, Deserialize)]
pub struct Step {
    pub at: DateTime<Utc>,
    #[serde(flatten)]
    pub action: Action,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum Action {
    Create {
        request: CreateRequest,
    },
    Update {
        group: StudyGroupId,
        request: UpdateRequest,
    },
    Publish {
        group: StudyGroupId,
    },
    Regenerate {
        group: StudyGroupId,
    },
    Delete {
        group: StudyGroupId,
    },
    CancelMeeting {
        meeting: MeetingId,
    },
}

impl Action {
    fn name(&self) -> &'static str {
        match self {
            Action::Create { .. } => "create",
            Action::Update { .. } => "update",
            Action::Publish { .. } => "publish",
            Action::Regenerate { .. } => "regenerate",
            Action::Delete { .. } => "delete",
            Action::CancelMeeting { .. } => "cancel_meeting",
        }
    }
}

#[derive(Debug, Serialize)]
pub struct Report {
    pub steps: Vec<StepReport>,
    pub events: Vec<EventSummary>,
}

#[derive(Debug, Serialize)]
pub struct StepReport {
    pub step: usize,
    pub action: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub group: Option<GroupView>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub errors: Option<ValidationErrors>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct GroupView {
    pub id: StudyGroupId,
    pub name: String,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub weeks: u32,
    pub meeting_time: NaiveTime,
    pub timezone: String,
    pub draft: bool,
    pub deleted: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub state: Option<ScheduleState>,
    pub meetings: Vec<NaiveDate>,
}

#[derive(Debug, Serialize)]
pub struct EventSummary {
    pub event: &'static str,
    pub group: StudyGroupId,
}

/// Run every step in order. A failing step is reported and the run continues.
pub fn run(scenario: Scenario, settings: LifecycleSettings) -> Report {
    let store = InMemoryStore::with_courses(scenario.courses);
    let notifier = Arc::new(RecordingNotifier::new());
    let validator = DefaultValidator::from_settings(&settings);
    let notifiers = (TracingNotifier, Arc::clone(&notifier));
    let lifecycle = StudyGroupLifecycle::with_settings(store, validator, notifiers, settings);

    let steps = scenario
        .steps
        .into_iter()
        .enumerate()
        .map(|(index, step)| run_step(&lifecycle, index, step))
        .collect();

    let events = notifier
        .events()
        .iter()
        .map(|e| EventSummary {
            event: e.kind(),
            group: e.group().id,
        })
        .collect();

    Report { steps, events }
}

fn run_step(lifecycle: &Lifecycle, index: usize, step: Step) -> StepReport {
    let action = step.action.name();
    let now = step.at;
    tracing::debug!(step = index, action, "running step");

    let result = match step.action {
        Action::Create { request } => lifecycle.create(now, request),
        Action::Update { group, request } => lifecycle.update(now, group, request),
        Action::Publish { group } => lifecycle.publish(now, group),
        Action::Regenerate { group } => lifecycle
            .regenerate(now, group)
            .and_then(|_| lifecycle.group(group)),
        Action::Delete { group } => lifecycle.delete_group(now, group),
        Action::CancelMeeting { meeting } => lifecycle
            .cancel_meeting(now, meeting)
            .and_then(|m| lifecycle.group(m.study_group)),
    };

    let mut report = StepReport {
        step: index,
        action,
        group: None,
        errors: None,
        error: None,
    };
    match result.and_then(|group| view(lifecycle, now, &group)) {
        Ok(group) => report.group = Some(group),
        Err(CircleError::Validation(errors)) => report.errors = Some(errors),
        Err(e) => report.error = Some(e.to_string()),
    }
    report
}

fn view(
    lifecycle: &Lifecycle,
    now: DateTime<Utc>,
    group: &StudyGroup,
) -> circle_engine::Result<GroupView> {
    let meetings = lifecycle.store().meetings(group.id, false)?;
    let state = if group.is_deleted() {
        None
    } else {
        Some(lifecycle.schedule_state(now, group.id)?)
    };

    Ok(GroupView {
        id: group.id,
        name: group.name.clone(),
        start_date: group.start_date,
        end_date: group.end_date,
        weeks: group.weeks(),
        meeting_time: group.meeting_time,
        timezone: group.timezone.clone(),
        draft: group.draft,
        deleted: group.is_deleted(),
        state,
        meetings: meetings.iter().map(|m| m.meeting_date).collect(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_step_parses_flattened_action() {
        let step: Step = serde_json::from_str(
            r#"{"at": "2018-12-14T00:00:00Z", "action": "publish", "group": 1}"#,
        )
        .unwrap();
        assert!(matches!(step.action, Action::Publish { group: StudyGroupId(1) }));
    }

    #[test]
    fn test_failed_step_does_not_stop_the_run() {
        let scenario: Scenario = serde_json::from_str(
            r#"{
                "steps": [
                    {"at": "2018-12-01T00:00:00Z", "action": "publish", "group": 4},
                    {"at": "2018-12-01T00:00:00Z", "action": "delete", "group": 4}
                ]
            }"#,
        )
        .unwrap();
        let report = run(scenario, LifecycleSettings::default());
        assert_eq!(report.steps.len(), 2);
        assert_eq!(report.steps[0].error.as_deref(), Some("study group 4 not found"));
        assert!(report.events.is_empty());
    }
}
