//! Lifecycle events handed to the notification collaborator.
//!
//! The engine only reports what happened. Choosing recipients and writing
//! messages is the notifier's job.

use std::sync::{Arc, Mutex};

use chrono::NaiveDate;
use serde::Serialize;

use crate::model::{MeetingId, StudyGroup, StudyGroupId};

/// Something that happened to a study group, with a snapshot of the group
/// after the change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum LifecycleEvent {
    Created {
        group: StudyGroup,
    },
    /// Draft flipped to published.
    Published {
        group: StudyGroup,
    },
    /// Meetings were added, moved, or cancelled by a regeneration.
    Rescheduled {
        group: StudyGroup,
        added: Vec<NaiveDate>,
        removed: Vec<NaiveDate>,
        retimed: Vec<MeetingId>,
    },
    Updated {
        group: StudyGroup,
    },
    Deleted {
        group: StudyGroup,
    },
}

impl LifecycleEvent {
    pub fn group(&self) -> &StudyGroup {
        match self {
            LifecycleEvent::Created { group }
            | LifecycleEvent::Published { group }
            | LifecycleEvent::Rescheduled { group, .. }
            | LifecycleEvent::Updated { group }
            | LifecycleEvent::Deleted { group } => group,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            LifecycleEvent::Created { .. } => "created",
            LifecycleEvent::Published { .. } => "published",
            LifecycleEvent::Rescheduled { .. } => "rescheduled",
            LifecycleEvent::Updated { .. } => "updated",
            LifecycleEvent::Deleted { .. } => "deleted",
        }
    }
}

/// Receives lifecycle events after they are committed.
pub trait Notifier: Send + Sync {
    fn notify(&self, event: &LifecycleEvent);
}

impl<N: Notifier + ?Sized> Notifier for Arc<N> {
    fn notify(&self, event: &LifecycleEvent) {
        (**self).notify(event)
    }
}

/// Hands every event to both notifiers, first one first.
impl<A: Notifier, B: Notifier> Notifier for (A, B) {
    fn notify(&self, event: &LifecycleEvent) {
        self.0.notify(event);
        self.1.notify(event);
    }
}

/// Logs each event through `tracing`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingNotifier;

impl Notifier for TracingNotifier {
    fn notify(&self, event: &LifecycleEvent) {
        let group = event.group();
        match event {
            LifecycleEvent::Rescheduled {
                added,
                removed,
                retimed,
                ..
            } => tracing::info!(
                event = event.kind(),
                group = %group.id,
                added = added.len(),
                removed = removed.len(),
                retimed = retimed.len(),
                "study group event"
            ),
            _ => tracing::info!(
                event = event.kind(),
                group = %group.id,
                draft = group.draft,
                "study group event"
            ),
        }
    }
}

/// Keeps every event in memory, in order. Useful for tests and for callers
/// that batch notifications after a request completes.
#[derive(Debug, Default)]
pub struct RecordingNotifier {
    events: Mutex<Vec<LifecycleEvent>>,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<LifecycleEvent> {
        self.events.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Event kinds recorded for one group, oldest first.
    pub fn kinds_for(&self, group: StudyGroupId) -> Vec<&'static str> {
        self.events
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .filter(|e| e.group().id == group)
            .map(LifecycleEvent::kind)
            .collect()
    }

    pub fn clear(&self) {
        self.events.lock().unwrap_or_else(|e| e.into_inner()).clear();
    }
}

impl Notifier for RecordingNotifier {
    fn notify(&self, event: &LifecycleEvent) {
        self.events
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(event.clone());
    }
}
