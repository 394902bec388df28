//! Core types shared across the engine.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use serde::{Deserialize, Serialize};

#[cfg(feature = "typescript")]
use ts_rs::TS;

use crate::store::FieldSnapshot;
use crate::value::FieldId;

/// Discriminator naming a kind of form (and its draft slot).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FormType(String);

impl FormType {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for FormType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for FormType {
    fn from(name: &str) -> Self {
        Self(name.to_string())
    }
}

/// Category of a user-facing problem.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[cfg_attr(feature = "typescript", derive(TS))]
#[cfg_attr(feature = "typescript", ts(export))]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// A write was rejected because the value had the wrong type
    TypeMismatch,
    /// Malformed input (digit counts, identifier shapes, unparseable text)
    Format,
    /// Numeric bound violated
    Range,
    /// Missing required (or conditionally required) value
    Required,
    /// Paired values in the wrong order, such as expiry before start
    CrossFieldOrder,
    /// Time checkpoint earlier than its predecessor
    Chronology,
    /// Repeated sub-record with the same identity
    Duplicate,
    /// A staged attachment could not be deleted
    AttachmentDeletion,
    /// The submit call itself failed
    SubmissionNetwork,
}

/// Whether an error prevents submission.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[cfg_attr(feature = "typescript", derive(TS))]
#[cfg_attr(feature = "typescript", ts(export))]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    #[default]
    Blocking,
    Advisory,
}

/// A problem attached to one field path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "typescript", derive(TS))]
#[cfg_attr(feature = "typescript", ts(export))]
pub struct ValidationError {
    /// Field (or member) the error is shown next to
    pub field: FieldId,
    /// Error category
    pub kind: ErrorKind,
    /// Human readable message
    pub message: String,
    /// Blocking or advisory
    pub severity: Severity,
}

impl ValidationError {
    /// Create a blocking error.
    pub fn blocking(field: impl Into<FieldId>, kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            kind,
            message: message.into(),
            severity: Severity::Blocking,
        }
    }

    /// Create an advisory error.
    pub fn advisory(field: impl Into<FieldId>, kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            severity: Severity::Advisory,
            ..Self::blocking(field, kind, message)
        }
    }

    pub fn is_blocking(&self) -> bool {
        self.severity == Severity::Blocking
    }
}

/// Active validation errors keyed by field path.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ErrorMap {
    entries: BTreeMap<FieldId, Vec<ValidationError>>,
}

impl ErrorMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Collect errors into a map.
    pub fn from_errors(errors: impl IntoIterator<Item = ValidationError>) -> Self {
        let mut map = Self::new();
        for error in errors {
            map.push(error);
        }
        map
    }

    /// Add an error under its own field path.
    pub fn push(&mut self, error: ValidationError) {
        self.entries.entry(error.field.clone()).or_default().push(error);
    }

    /// Replace every error inside `scope` with `errors`.
    ///
    /// Paths nested under a scoped field (`contacts[1].mobile` under
    /// `contacts`) are replaced too. Errors outside the scope are kept.
    pub fn replace(&mut self, scope: &BTreeSet<FieldId>, errors: Vec<ValidationError>) {
        self.entries
            .retain(|path, _| !scope.iter().any(|root| path.is_within(root)));
        for error in errors {
            self.push(error);
        }
    }

    /// Errors shown next to `field`.
    pub fn for_field(&self, field: &str) -> &[ValidationError] {
        self.entries.get(field).map(Vec::as_slice).unwrap_or(&[])
    }

    /// All errors, ordered by path.
    pub fn iter(&self) -> impl Iterator<Item = &ValidationError> {
        self.entries.values().flatten()
    }

    /// Paths that currently carry at least one error.
    pub fn fields(&self) -> impl Iterator<Item = &FieldId> {
        self.entries.keys()
    }

    pub fn blocking(&self) -> impl Iterator<Item = &ValidationError> {
        self.iter().filter(|e| e.is_blocking())
    }

    pub fn advisory(&self) -> impl Iterator<Item = &ValidationError> {
        self.iter().filter(|e| !e.is_blocking())
    }

    pub fn blocking_count(&self) -> usize {
        self.blocking().count()
    }

    pub fn has_blocking(&self) -> bool {
        self.blocking().next().is_some()
    }

    /// Total number of errors.
    pub fn len(&self) -> usize {
        self.entries.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

/// Serializable snapshot of an open form.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FormState {
    /// Kind of form
    pub form_type: FormType,
    /// Backend id when editing an existing record
    pub record_id: Option<String>,
    /// Field values and touched flags
    pub fields: FieldSnapshot,
    /// Active errors at capture time
    pub errors: ErrorMap,
    /// File fields whose stored attachment is marked for deletion
    pub staged_deletions: BTreeSet<FieldId>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_replace_clears_nested_paths_only_in_scope() {
        let mut errors = ErrorMap::from_errors([
            ValidationError::blocking("contacts[1]", ErrorKind::Duplicate, "Duplicate contact"),
            ValidationError::blocking("contacts[0].mobile", ErrorKind::Format, "Bad mobile"),
            ValidationError::blocking("opening_km", ErrorKind::Required, "Required"),
        ]);

        let scope = BTreeSet::from([FieldId::from("contacts")]);
        errors.replace(
            &scope,
            vec![ValidationError::blocking("contacts[2]", ErrorKind::Duplicate, "Duplicate contact")],
        );

        assert!(errors.for_field("contacts[1]").is_empty());
        assert!(errors.for_field("contacts[0].mobile").is_empty());
        assert_eq!(errors.for_field("contacts[2]").len(), 1);
        assert_eq!(errors.for_field("opening_km").len(), 1);
    }

    #[test]
    fn test_replace_does_not_accumulate() {
        let mut errors = ErrorMap::new();
        let scope = BTreeSet::from([FieldId::from("closing_km")]);
        for _ in 0..3 {
            errors.replace(
                &scope,
                vec![ValidationError::blocking("closing_km", ErrorKind::Range, "Too low")],
            );
        }
        assert_eq!(errors.len(), 1);
    }

    #[test]
    fn test_severity_split() {
        let errors = ErrorMap::from_errors([
            ValidationError::blocking("a", ErrorKind::Required, "a"),
            ValidationError::advisory("b", ErrorKind::Range, "b"),
        ]);
        assert!(errors.has_blocking());
        assert_eq!(errors.blocking_count(), 1);
        assert_eq!(errors.advisory().count(), 1);
    }
}
