//! Validation capability and shared field rules.
//!
//! # Responsibility
//! - Define the `Validator` seam consumed by entity services.
//! - Collect every failed rule instead of stopping at the first.
//!
//! # Invariants
//! - `Validator::validate` is pure; it never touches storage.

use chrono::NaiveDate;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;
use std::error::Error;
use std::fmt::{Display, Formatter};
use uuid::Uuid;

static PHONE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[(]{0,1}[0-9]{3}[)]{0,1}[-\s\.]{0,1}[0-9]{3}[-\s\.]{0,1}[0-9]{4}$")
        .expect("valid phone regex")
});
static EMAIL_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").expect("valid email regex"));

/// Calendar date layout accepted for date-only fields.
pub const DATE_FORMAT: &str = "%Y-%m-%d";

/// Days accepted by opening-hours fields.
pub const WEEKDAYS: &[&str] = &[
    "SUNDAY",
    "MONDAY",
    "TUESDAY",
    "WEDNESDAY",
    "THURSDAY",
    "FRIDAY",
    "SATURDAY",
];

/// One failed rule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ValidationIssue {
    /// Dotted field path, e.g. `address.zip` or `rates[1].type`.
    pub path: String,
    pub message: String,
}

/// Non-empty list of failed rules.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct ValidationErrors {
    issues: Vec<ValidationIssue>,
}

impl ValidationErrors {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn single(path: impl Into<String>, message: impl Into<String>) -> Self {
        let mut errors = Self::new();
        errors.push(path, message);
        errors
    }

    pub fn push(&mut self, path: impl Into<String>, message: impl Into<String>) {
        self.issues.push(ValidationIssue {
            path: path.into(),
            message: message.into(),
        });
    }

    pub fn is_empty(&self) -> bool {
        self.issues.is_empty()
    }

    pub fn len(&self) -> usize {
        self.issues.len()
    }

    /// Returns whether any issue targets `path`.
    pub fn has_path(&self, path: &str) -> bool {
        self.issues.iter().any(|issue| issue.path == path)
    }

    /// `Ok(())` when no rule failed.
    pub fn into_result(self) -> Result<(), Self> {
        if self.is_empty() {
            Ok(())
        } else {
            Err(self)
        }
    }

    pub fn require_text(&mut self, path: &str, value: Option<&str>) {
        match value {
            Some(text) if !text.trim().is_empty() => {}
            Some(_) => self.push(path, "must not be empty"),
            None => self.push(path, "is required"),
        }
    }

    /// Optional text must still be non-empty when present.
    pub fn optional_text(&mut self, path: &str, value: Option<&str>) {
        if matches!(value, Some(text) if text.trim().is_empty()) {
            self.push(path, "must not be empty");
        }
    }

    pub fn one_of(&mut self, path: &str, value: &str, allowed: &[&str]) {
        if !allowed.contains(&value) {
            self.push(path, format!("must be one of {}", allowed.join("|")));
        }
    }

    pub fn uuid(&mut self, path: &str, value: &str) {
        if Uuid::parse_str(value).is_err() {
            self.push(path, "must be a valid GUID");
        }
    }

    pub fn phone(&mut self, path: &str, value: Option<&str>) {
        if let Some(phone) = value {
            if !PHONE_RE.is_match(phone) {
                self.push(path, "must be a phone number like (555) 555-5555");
            }
        }
    }

    pub fn email(&mut self, path: &str, value: Option<&str>) {
        if let Some(email) = value {
            if !EMAIL_RE.is_match(email) {
                self.push(path, "must be an email address");
            }
        }
    }

    pub fn date(&mut self, path: &str, value: Option<&str>) {
        match value {
            Some(text) if NaiveDate::parse_from_str(text, DATE_FORMAT).is_ok() => {}
            Some(_) => self.push(path, "must be a date formatted YYYY-MM-DD"),
            None => self.push(path, "is required"),
        }
    }
}

impl Display for ValidationErrors {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let joined = self
            .issues
            .iter()
            .map(|issue| format!("{} {}", issue.path, issue.message))
            .collect::<Vec<_>>()
            .join("; ");
        write!(f, "{joined}")
    }
}

impl Error for ValidationErrors {}

/// Decides whether a candidate entity may be persisted.
pub trait Validator<E>: Send + Sync {
    fn validate(&self, candidate: &E) -> Result<(), ValidationErrors>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn collects_every_failure() {
        let mut errors = ValidationErrors::new();
        errors.require_text("address.street", None);
        errors.require_text("address.city", Some("  "));
        errors.one_of("hours.from", "FUNDAY", WEEKDAYS);
        assert_eq!(errors.len(), 3);
        assert!(errors.has_path("hours.from"));
        assert_eq!(
            errors.to_string(),
            "address.street is required; address.city must not be empty; \
             hours.from must be one of SUNDAY|MONDAY|TUESDAY|WEDNESDAY|THURSDAY|FRIDAY|SATURDAY"
        );
    }

    #[test]
    fn phone_pattern_accepts_common_layouts() {
        for value in ["(781) 466-4308", "781-466-4308", "781.466.4308", "7814664308"] {
            let mut errors = ValidationErrors::new();
            errors.phone("contact", Some(value));
            assert!(errors.is_empty(), "{value} should be accepted");
        }
        let mut errors = ValidationErrors::new();
        errors.phone("contact", Some("call me"));
        assert!(errors.has_path("contact"));
    }

    #[test]
    fn date_requires_calendar_day() {
        let mut errors = ValidationErrors::new();
        errors.date("revenue[0].date", Some("2016-02-30"));
        errors.date("revenue[1].date", Some("2016-02-28"));
        assert_eq!(errors.len(), 1);
        assert!(errors.has_path("revenue[0].date"));
    }

    #[test]
    fn empty_errors_convert_to_ok() {
        assert!(ValidationErrors::new().into_result().is_ok());
        assert!(ValidationErrors::single("id", "bad").into_result().is_err());
    }
}
