//! Field-level request validation.
//!
//! The lifecycle runs a [`Validator`] before touching the store. Failures are
//! collected per field so the caller can show all of them at once.

use crate::error::ValidationErrors;
use crate::model::{CreateRequest, UpdateRequest};
use crate::schedule;
use crate::settings::LifecycleSettings;
use crate::time;

pub const VENUE_NAME_MESSAGE: &str =
    "Venue name should include at least one alpha-numeric character.";

const NAME_MAX_CHARS: usize = 128;
const DESCRIPTION_MAX_CHARS: usize = 500;
const LANGUAGE_MAX_CHARS: usize = 6;

/// Checks request fields before the lifecycle applies them.
pub trait Validator: Send + Sync {
    fn validate_create(&self, request: &CreateRequest) -> Result<(), ValidationErrors>;

    fn validate_update(&self, request: &UpdateRequest) -> Result<(), ValidationErrors>;
}

/// The rules learning circle forms have always enforced.
#[derive(Debug, Clone)]
pub struct DefaultValidator {
    max_weeks: u32,
}

impl Default for DefaultValidator {
    fn default() -> Self {
        Self::from_settings(&LifecycleSettings::default())
    }
}

impl DefaultValidator {
    pub fn from_settings(settings: &LifecycleSettings) -> Self {
        Self {
            max_weeks: settings.max_weeks,
        }
    }
}

impl Validator for DefaultValidator {
    fn validate_create(&self, request: &CreateRequest) -> Result<(), ValidationErrors> {
        let mut errors = ValidationErrors::new();

        if let Some(name) = &request.name {
            check_max_len(&mut errors, "name", name, NAME_MAX_CHARS);
        }
        if let Some(course_description) = &request.course_description {
            check_max_len(
                &mut errors,
                "course_description",
                course_description,
                DESCRIPTION_MAX_CHARS,
            );
        }
        check_required(&mut errors, "description", &request.description);
        check_max_len(
            &mut errors,
            "description",
            &request.description,
            DESCRIPTION_MAX_CHARS,
        );
        check_venue_name(&mut errors, &request.venue_name);
        check_required(&mut errors, "city", &request.city);
        check_language(&mut errors, &request.language);
        check_timezone(&mut errors, &request.timezone);

        if let Some(duration) = request.duration_minutes {
            check_duration(&mut errors, duration);
        }
        if let Some(weeks) = request.weeks {
            check_weeks(&mut errors, weeks, self.max_weeks);
        }
        match request.end_date {
            Some(end_date) if end_date < request.start_date => {
                errors.add("end_date", "end date must not be before start date");
            }
            Some(end_date) => {
                let weeks = schedule::weeks_between(request.start_date, end_date);
                check_weeks(&mut errors, weeks, self.max_weeks);
            }
            None if request.weeks.is_none() => {
                errors.add("weeks", "an end date or number of weeks is required");
            }
            _ => {}
        }

        finish(errors)
    }

    fn validate_update(&self, request: &UpdateRequest) -> Result<(), ValidationErrors> {
        let mut errors = ValidationErrors::new();

        if let Some(name) = &request.name {
            check_max_len(&mut errors, "name", name, NAME_MAX_CHARS);
        }
        if let Some(course_description) = &request.course_description {
            check_max_len(
                &mut errors,
                "course_description",
                course_description,
                DESCRIPTION_MAX_CHARS,
            );
        }
        if let Some(description) = &request.description {
            check_required(&mut errors, "description", description);
            check_max_len(&mut errors, "description", description, DESCRIPTION_MAX_CHARS);
        }
        if let Some(venue_name) = &request.venue_name {
            check_venue_name(&mut errors, venue_name);
        }
        if let Some(city) = &request.city {
            check_required(&mut errors, "city", city);
        }
        if let Some(language) = &request.language {
            check_language(&mut errors, language);
        }
        if let Some(timezone) = &request.timezone {
            check_timezone(&mut errors, timezone);
        }
        if let Some(duration) = request.duration_minutes {
            check_duration(&mut errors, duration);
        }
        if let Some(weeks) = request.weeks {
            check_weeks(&mut errors, weeks, self.max_weeks);
        }
        if let (Some(start_date), Some(end_date)) = (request.start_date, request.end_date) {
            if end_date >= start_date {
                let weeks = schedule::weeks_between(start_date, end_date);
                check_weeks(&mut errors, weeks, self.max_weeks);
            }
        }

        finish(errors)
    }
}

fn finish(errors: ValidationErrors) -> Result<(), ValidationErrors> {
    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

// ── Field rules ─────────────────────────────────────────────────────────────

/// Series length must be in `1..=max_weeks`.
pub(crate) fn check_weeks(errors: &mut ValidationErrors, weeks: u32, max_weeks: u32) {
    if weeks == 0 || weeks > max_weeks {
        errors.add("weeks", format!("number of weeks must be between 1 and {max_weeks}"));
    }
}

fn check_required(errors: &mut ValidationErrors, field: &str, value: &str) {
    if value.trim().is_empty() {
        errors.add(field, "This field is required.");
    }
}

fn check_max_len(errors: &mut ValidationErrors, field: &str, value: &str, max: usize) {
    let len = value.chars().count();
    if len > max {
        errors.add(
            field,
            format!("Ensure this field has no more than {max} characters (it has {len})."),
        );
    }
}

fn check_venue_name(errors: &mut ValidationErrors, venue_name: &str) {
    if !venue_name.chars().any(char::is_alphanumeric) {
        errors.add("venue_name", VENUE_NAME_MESSAGE);
    }
}

fn check_language(errors: &mut ValidationErrors, language: &str) {
    check_required(errors, "language", language);
    check_max_len(errors, "language", language, LANGUAGE_MAX_CHARS);
}

fn check_timezone(errors: &mut ValidationErrors, timezone: &str) {
    if let Err(e) = time::parse_timezone(timezone) {
        errors.add("timezone", e.to_string());
    }
}

fn check_duration(errors: &mut ValidationErrors, duration: u32) {
    if duration == 0 {
        errors.add("duration", "meeting duration must be at least one minute");
    }
}
