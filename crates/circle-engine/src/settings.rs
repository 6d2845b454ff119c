//! Tunable lifecycle policy.

use chrono::Duration;
use serde::{Deserialize, Serialize};

/// Knobs for the lifecycle. Deserializable so front ends can load it from a
/// config file; every field falls back to its default when absent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LifecycleSettings {
    /// How long before the first meeting schedule edits lock.
    pub edit_lock_hours: u32,
    /// Meeting length used when a create request gives none.
    pub default_duration_minutes: u32,
    /// Longest series the default validator accepts.
    pub max_weeks: u32,
}

impl Default for LifecycleSettings {
    fn default() -> Self {
        Self {
            edit_lock_hours: 48,
            default_duration_minutes: 90,
            max_weeks: 52,
        }
    }
}

impl LifecycleSettings {
    pub fn lock_window(&self) -> Duration {
        Duration::hours(i64::from(self.edit_lock_hours))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let settings = LifecycleSettings::default();
        assert_eq!(settings.lock_window(), Duration::days(2));
        assert_eq!(settings.default_duration_minutes, 90);
    }

    #[test]
    fn test_partial_deserialize_keeps_defaults() {
        let settings: LifecycleSettings =
            serde_json::from_str(r#"{"edit_lock_hours": 24}"#).unwrap();
        assert_eq!(settings.lock_window(), Duration::days(1));
        assert_eq!(settings.max_weeks, 52);
    }
}
