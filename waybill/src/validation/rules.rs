//! Declarative field and cross-field rules.

use std::collections::{BTreeMap, HashSet};

use crate::store::FieldStore;
use crate::types::{ErrorKind, Severity, ValidationError};
use crate::value::{FieldId, FieldKind, FieldValue, Members};

use super::humanize;

/// Display names for fields, falling back to a humanized id.
#[derive(Debug, Clone, Default)]
pub struct Labels(BTreeMap<FieldId, String>);

impl Labels {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, id: impl Into<FieldId>, label: impl Into<String>) {
        self.0.insert(id.into(), label.into());
    }

    pub fn get(&self, id: &FieldId) -> String {
        self.0
            .get(id)
            .cloned()
            .unwrap_or_else(|| humanize(id.as_str()))
    }
}

/// Precondition for a conditionally required field.
#[derive(Debug, Clone, PartialEq)]
pub enum Condition {
    /// The field holds any non-blank value
    Present(FieldId),
    /// The flag field is set to yes
    IsTrue(FieldId),
    /// The field text equals the value, ignoring case
    Equals(FieldId, String),
    /// The field text equals one of the values, ignoring case
    OneOf(FieldId, Vec<String>),
}

impl Condition {
    pub fn field(&self) -> &FieldId {
        match self {
            Condition::Present(id)
            | Condition::IsTrue(id)
            | Condition::Equals(id, _)
            | Condition::OneOf(id, _) => id,
        }
    }

    pub fn holds(&self, store: &FieldStore) -> bool {
        let value = store.get(self.field().as_str());
        let text = || value.scalar_text().unwrap_or_default();
        match self {
            Condition::Present(_) => !value.is_blank(),
            Condition::IsTrue(_) => value.as_flag() == Some(true),
            Condition::Equals(_, expected) => text().eq_ignore_ascii_case(expected),
            Condition::OneOf(_, options) => {
                let text = text();
                options.iter().any(|o| o.eq_ignore_ascii_case(&text))
            }
        }
    }
}

/// What a rule checks.
#[derive(Debug, Clone, PartialEq)]
pub enum Check {
    /// Value must not be blank
    Required,
    /// Number must be at least this
    MinValue(f64),
    /// Number must not exceed this
    MaxValue(f64),
    /// Text must be exactly this many ASCII digits
    Digits(usize),
    /// Text must match a mask: `A` letter, `9` digit, `*` either, anything
    /// else literally
    Shape(String),
    /// Text must look like an email address
    Email,
    /// Text must be one of the options, ignoring case
    OneOf(Vec<String>),
    /// Value is required while the condition holds
    RequiredIf(Condition),
    /// Date must be after the other field's date
    After { other: FieldId, inclusive: bool },
    /// Number must be at least the other field's number
    AtLeast(FieldId),
    /// Number must not exceed the other field's number
    AtMost(FieldId),
    /// List entries must differ on this composite key
    Unique(Vec<String>),
}

impl Check {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Check::Required | Check::RequiredIf(_) => ErrorKind::Required,
            Check::MinValue(_) | Check::MaxValue(_) | Check::AtLeast(_) | Check::AtMost(_) => {
                ErrorKind::Range
            }
            Check::Digits(_) | Check::Shape(_) | Check::Email | Check::OneOf(_) => {
                ErrorKind::Format
            }
            Check::After { .. } => ErrorKind::CrossFieldOrder,
            Check::Unique(_) => ErrorKind::Duplicate,
        }
    }

    fn other(&self) -> Option<&FieldId> {
        match self {
            Check::RequiredIf(condition) => Some(condition.field()),
            Check::After { other, .. } | Check::AtLeast(other) | Check::AtMost(other) => {
                Some(other)
            }
            _ => None,
        }
    }
}

/// A rule bound to a field, or to a member of a structured field.
#[derive(Debug, Clone, PartialEq)]
pub struct Rule {
    /// Field the rule belongs to
    pub field: FieldId,
    /// Member key when the rule targets a group member or every list entry
    pub member: Option<String>,
    pub check: Check,
    pub severity: Severity,
    /// Replaces the generated message
    pub message: Option<String>,
}

impl Rule {
    pub fn new(field: impl Into<FieldId>, check: Check) -> Self {
        Self {
            field: field.into(),
            member: None,
            check,
            severity: Severity::Blocking,
            message: None,
        }
    }

    pub fn required(field: impl Into<FieldId>) -> Self {
        Self::new(field, Check::Required)
    }

    pub fn min(field: impl Into<FieldId>, min: f64) -> Self {
        Self::new(field, Check::MinValue(min))
    }

    pub fn max(field: impl Into<FieldId>, max: f64) -> Self {
        Self::new(field, Check::MaxValue(max))
    }

    pub fn digits(field: impl Into<FieldId>, count: usize) -> Self {
        Self::new(field, Check::Digits(count))
    }

    pub fn shape(field: impl Into<FieldId>, mask: impl Into<String>) -> Self {
        Self::new(field, Check::Shape(mask.into()))
    }

    pub fn email(field: impl Into<FieldId>) -> Self {
        Self::new(field, Check::Email)
    }

    pub fn one_of<S: Into<String>>(
        field: impl Into<FieldId>,
        options: impl IntoIterator<Item = S>,
    ) -> Self {
        Self::new(field, Check::OneOf(options.into_iter().map(Into::into).collect()))
    }

    pub fn required_if(field: impl Into<FieldId>, condition: Condition) -> Self {
        Self::new(field, Check::RequiredIf(condition))
    }

    /// Date must be strictly after `other`.
    pub fn after(field: impl Into<FieldId>, other: impl Into<FieldId>) -> Self {
        Self::new(
            field,
            Check::After {
                other: other.into(),
                inclusive: false,
            },
        )
    }

    pub fn at_least(field: impl Into<FieldId>, other: impl Into<FieldId>) -> Self {
        Self::new(field, Check::AtLeast(other.into()))
    }

    pub fn at_most(field: impl Into<FieldId>, other: impl Into<FieldId>) -> Self {
        Self::new(field, Check::AtMost(other.into()))
    }

    pub fn unique<S: Into<String>>(
        field: impl Into<FieldId>,
        keys: impl IntoIterator<Item = S>,
    ) -> Self {
        Self::new(field, Check::Unique(keys.into_iter().map(Into::into).collect()))
    }

    /// Apply the rule to a member of a group, or to that member of every
    /// list entry.
    pub fn on_member(mut self, key: impl Into<String>) -> Self {
        self.member = Some(key.into());
        self
    }

    /// Surface failures without blocking submission.
    pub fn advisory(mut self) -> Self {
        self.severity = Severity::Advisory;
        self
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    pub fn kind(&self) -> ErrorKind {
        self.check.kind()
    }

    /// Top-level fields whose value can change the outcome.
    pub fn reads(&self) -> Vec<&FieldId> {
        let mut reads = vec![&self.field];
        reads.extend(self.check.other());
        reads
    }

    /// Run the rule against the store.
    pub fn evaluate(&self, store: &FieldStore, labels: &Labels) -> Vec<ValidationError> {
        if let Check::Unique(keys) = &self.check {
            return self.duplicates(store, keys, labels);
        }

        self.subjects(store, labels)
            .into_iter()
            .filter_map(|(path, label, value)| {
                self.failure(store, labels, &label, &value)
                    .map(|message| self.error(path, message))
            })
            .collect()
    }

    /// Paths, labels and values the rule is applied to.
    fn subjects(&self, store: &FieldStore, labels: &Labels) -> Vec<(FieldId, String, FieldValue)> {
        let value = store.get(self.field.as_str());
        let Some(key) = &self.member else {
            return vec![(self.field.clone(), labels.get(&self.field), value.clone())];
        };

        let owner = labels.get(&self.field);
        let member_label = humanize(key);
        let member = |members: &Members| members.get(key).cloned().unwrap_or_default();

        match (store.kind(self.field.as_str()), value) {
            (_, FieldValue::List(entries)) => entries
                .iter()
                .enumerate()
                .map(|(i, entry)| {
                    (
                        self.field.entry(i).member(key),
                        format!("{} #{} {}", owner, i + 1, member_label),
                        member(entry),
                    )
                })
                .collect(),
            (_, FieldValue::Group(members)) => vec![(
                self.field.member(key),
                format!("{} {}", owner, member_label),
                member(members),
            )],
            (Some(FieldKind::Group), FieldValue::Blank) => vec![(
                self.field.member(key),
                format!("{} {}", owner, member_label),
                FieldValue::Blank,
            )],
            _ => Vec::new(),
        }
    }

    /// Generated failure message, `None` when the value passes.
    fn failure(
        &self,
        store: &FieldStore,
        labels: &Labels,
        label: &str,
        value: &FieldValue,
    ) -> Option<String> {
        let other_label = || self.check.other().map(|o| labels.get(o)).unwrap_or_default();
        let other_number = |o: &FieldId| store.get(o.as_str()).as_number();

        match &self.check {
            Check::Required => value
                .is_blank()
                .then(|| format!("{} is required", label)),
            Check::RequiredIf(condition) => (value.is_blank() && condition.holds(store))
                .then(|| format!("{} is required", label)),
            Check::MinValue(min) => value
                .as_number()
                .filter(|n| n < min)
                .map(|_| format!("{} must be at least {}", label, min)),
            Check::MaxValue(max) => value
                .as_number()
                .filter(|n| n > max)
                .map(|_| format!("{} must not exceed {}", label, max)),
            Check::Digits(count) => value
                .scalar_text()
                .filter(|t| t.len() != *count || !t.bytes().all(|b| b.is_ascii_digit()))
                .map(|_| format!("{} must be exactly {} digits", label, count)),
            Check::Shape(mask) => value
                .scalar_text()
                .filter(|t| !matches_mask(t, mask))
                .map(|_| format!("{} must match the format {}", label, mask)),
            Check::Email => value
                .scalar_text()
                .filter(|t| !is_email(t))
                .map(|_| format!("{} must be a valid email address", label)),
            Check::OneOf(options) => value
                .scalar_text()
                .filter(|t| !options.iter().any(|o| o.eq_ignore_ascii_case(t)))
                .map(|_| format!("{} must be one of {}", label, options.join(", "))),
            Check::After { other, inclusive } => {
                let own = value.as_date()?;
                let other_date = store.get(other.as_str()).as_date()?;
                let ordered = if *inclusive {
                    own >= other_date
                } else {
                    own > other_date
                };
                (!ordered).then(|| format!("{} must be after {}", label, other_label()))
            }
            Check::AtLeast(other) => {
                let bound = other_number(other)?;
                (value.as_number()? < bound)
                    .then(|| format!("{} cannot be less than {}", label, other_label()))
            }
            Check::AtMost(other) => {
                let bound = other_number(other)?;
                (value.as_number()? > bound)
                    .then(|| format!("{} cannot exceed {}", label, other_label()))
            }
            Check::Unique(_) => None,
        }
    }

    /// Flag every list entry repeating an earlier entry's composite key.
    fn duplicates(
        &self,
        store: &FieldStore,
        keys: &[String],
        labels: &Labels,
    ) -> Vec<ValidationError> {
        let Some(entries) = store.get(self.field.as_str()).as_list() else {
            return Vec::new();
        };
        let owner = labels.get(&self.field);

        let mut seen = HashSet::new();
        let mut errors = Vec::new();
        for (i, entry) in entries.iter().enumerate() {
            let key: Vec<String> = keys
                .iter()
                .map(|k| {
                    entry
                        .get(k)
                        .and_then(FieldValue::scalar_text)
                        .map(|t| t.trim().to_lowercase())
                        .unwrap_or_default()
                })
                .collect();

            if key.iter().all(String::is_empty) {
                continue;
            }
            if !seen.insert(key) {
                errors.push(self.error(
                    self.field.entry(i),
                    format!("{} #{} duplicates an earlier entry", owner, i + 1),
                ));
            }
        }
        errors
    }

    fn error(&self, path: FieldId, generated: String) -> ValidationError {
        ValidationError {
            field: path,
            kind: self.kind(),
            message: self.message.clone().unwrap_or(generated),
            severity: self.severity,
        }
    }
}

fn matches_mask(text: &str, mask: &str) -> bool {
    text.chars().count() == mask.chars().count()
        && text.chars().zip(mask.chars()).all(|(c, m)| match m {
            'A' => c.is_ascii_alphabetic(),
            '9' => c.is_ascii_digit(),
            '*' => c.is_ascii_alphanumeric(),
            literal => c.eq_ignore_ascii_case(&literal),
        })
}

fn is_email(text: &str) -> bool {
    if text.chars().any(char::is_whitespace) {
        return false;
    }
    match text.split_once('@') {
        Some((local, domain)) => {
            !local.is_empty()
                && !domain.contains('@')
                && domain.contains('.')
                && domain.split('.').all(|part| !part.is_empty())
        }
        None => false,
    }
}
