//! Chronological ordering of the trip time checkpoints.

use std::collections::HashSet;

use crate::store::FieldStore;
use crate::types::{ErrorKind, ValidationError};
use crate::value::{ClockTime, FieldId};

/// Number of checkpoints on a trip.
pub const CHECKPOINT_COUNT: usize = 6;

/// Error types for checkpoint configuration.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TimelineError {
    #[error("Expected 6 checkpoints, got {0}")]
    WrongCount(usize),

    #[error("Checkpoint sequence {0} is used twice")]
    DuplicateSequence(u8),

    #[error("Checkpoint field {0} is used twice")]
    DuplicateField(FieldId),
}

/// One trip checkpoint bound to a time field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimeCheckpointSpec {
    pub id: FieldId,
    /// Position on the trip, lower is earlier
    pub sequence: u8,
    /// Name used in messages
    pub label: String,
}

impl TimeCheckpointSpec {
    pub fn new(id: impl Into<FieldId>, sequence: u8, label: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            sequence,
            label: label.into(),
        }
    }
}

/// Checks that no recorded checkpoint is earlier than the previous
/// recorded one.
///
/// Blank checkpoints are skipped, so missing data is never a chronology
/// problem. Each checkpoint is compared with the most recent non-blank
/// checkpoint before it, even when that one is itself out of order. A trip
/// crossing midnight is reported here; the duration formulas wrap on their
/// own.
#[derive(Debug, Clone)]
pub struct TimeSequenceValidator {
    checkpoints: Vec<TimeCheckpointSpec>,
}

impl TimeSequenceValidator {
    pub fn new(mut checkpoints: Vec<TimeCheckpointSpec>) -> Result<Self, TimelineError> {
        if checkpoints.len() != CHECKPOINT_COUNT {
            return Err(TimelineError::WrongCount(checkpoints.len()));
        }

        let mut sequences = HashSet::new();
        let mut ids = HashSet::new();
        for checkpoint in &checkpoints {
            if !sequences.insert(checkpoint.sequence) {
                return Err(TimelineError::DuplicateSequence(checkpoint.sequence));
            }
            if !ids.insert(&checkpoint.id) {
                return Err(TimelineError::DuplicateField(checkpoint.id.clone()));
            }
        }

        checkpoints.sort_by_key(|c| c.sequence);
        Ok(Self { checkpoints })
    }

    /// Checkpoints in sequence order.
    pub fn checkpoints(&self) -> &[TimeCheckpointSpec] {
        &self.checkpoints
    }

    pub fn contains(&self, id: &str) -> bool {
        self.checkpoints.iter().any(|c| c.id.as_str() == id)
    }

    pub fn first(&self) -> Option<&TimeCheckpointSpec> {
        self.checkpoints.first()
    }

    pub fn last(&self) -> Option<&TimeCheckpointSpec> {
        self.checkpoints.last()
    }

    /// Validate the checkpoint values currently in the store.
    pub fn validate(&self, store: &FieldStore) -> Vec<ValidationError> {
        let mut errors = Vec::new();
        let mut previous: Option<(&TimeCheckpointSpec, ClockTime)> = None;

        for checkpoint in &self.checkpoints {
            // Checkpoints are declared as time fields, so anything else is blank
            let Some(time) = store.get(checkpoint.id.as_str()).as_time() else {
                continue;
            };

            if let Some((prev, prev_time)) = previous {
                if time < prev_time {
                    errors.push(ValidationError::blocking(
                        checkpoint.id.clone(),
                        ErrorKind::Chronology,
                        format!("{} cannot be earlier than {}", checkpoint.label, prev.label),
                    ));
                }
            }
            previous = Some((checkpoint, time));
        }

        errors
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::{FieldKind, FieldValue};

    const IDS: [&str; 6] = ["out", "report", "depart", "arrive", "release", "in"];

    fn validator() -> TimeSequenceValidator {
        TimeSequenceValidator::new(
            IDS.iter()
                .enumerate()
                .map(|(i, id)| TimeCheckpointSpec::new(*id, i as u8 + 1, id.to_uppercase()))
                .collect(),
        )
        .unwrap()
    }

    fn store() -> FieldStore {
        let mut store = FieldStore::new();
        for id in IDS {
            store.declare(id, FieldKind::Time);
        }
        store
    }

    #[test]
    fn test_single_violation_is_reported_once() {
        let mut store = store();
        store.set("out", FieldValue::time(6, 0)).unwrap();
        store.set("report", FieldValue::time(7, 0)).unwrap();
        store.set("depart", FieldValue::time(6, 30)).unwrap();
        store.set("arrive", FieldValue::time(9, 0)).unwrap();

        let errors = validator().validate(&store);
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].field.as_str(), "depart");
        assert_eq!(errors[0].kind, ErrorKind::Chronology);
        assert_eq!(errors[0].message, "DEPART cannot be earlier than REPORT");
    }

    #[test]
    fn test_blanks_are_skipped() {
        let mut store = store();
        store.set("out", FieldValue::time(6, 0)).unwrap();
        store.set("arrive", FieldValue::time(5, 0)).unwrap();
        store.set("in", FieldValue::time(8, 0)).unwrap();

        let errors = validator().validate(&store);
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].message, "ARRIVE cannot be earlier than OUT");
    }

    #[test]
    fn test_midnight_crossing_is_a_violation() {
        let mut store = store();
        store.set("out", FieldValue::time(23, 30)).unwrap();
        store.set("in", FieldValue::time(1, 0)).unwrap();

        let errors = validator().validate(&store);
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].field.as_str(), "in");
    }

    #[test]
    fn test_configuration_is_checked() {
        let short = IDS[..5]
            .iter()
            .enumerate()
            .map(|(i, id)| TimeCheckpointSpec::new(*id, i as u8, *id))
            .collect();
        assert_eq!(
            TimeSequenceValidator::new(short).unwrap_err(),
            TimelineError::WrongCount(5)
        );

        let repeated = IDS
            .iter()
            .map(|id| TimeCheckpointSpec::new(*id, 1, *id))
            .collect();
        assert_eq!(
            TimeSequenceValidator::new(repeated).unwrap_err(),
            TimelineError::DuplicateSequence(1)
        );
    }
}
