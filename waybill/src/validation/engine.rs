use std::collections::BTreeSet;

use tracing::debug;

use crate::store::FieldStore;
use crate::timeline::TimeSequenceValidator;
use crate::types::{ErrorMap, ValidationError};
use crate::value::FieldId;

use super::rules::{Labels, Rule};

/// Runs the rules of one form type, exhaustively or for a set of changes.
#[derive(Debug, Clone)]
pub struct ValidationEngine {
    rules: Vec<Rule>,
    timeline: Option<TimeSequenceValidator>,
    labels: Labels,
}

impl ValidationEngine {
    pub fn new(rules: Vec<Rule>, timeline: Option<TimeSequenceValidator>, labels: Labels) -> Self {
        Self {
            rules,
            timeline,
            labels,
        }
    }

    pub fn rules(&self) -> &[Rule] {
        &self.rules
    }

    pub fn timeline(&self) -> Option<&TimeSequenceValidator> {
        self.timeline.as_ref()
    }

    pub fn labels(&self) -> &Labels {
        &self.labels
    }

    /// Display name of a field.
    pub fn label(&self, id: &FieldId) -> String {
        self.labels.get(id)
    }

    /// Evaluate every rule and the checkpoint timeline.
    pub fn validate_all(&self, store: &FieldStore) -> ErrorMap {
        let mut errors: Vec<ValidationError> = self
            .rules
            .iter()
            .flat_map(|rule| rule.evaluate(store, &self.labels))
            .collect();
        if let Some(timeline) = &self.timeline {
            errors.extend(timeline.validate(store));
        }

        let map = ErrorMap::from_errors(errors);
        debug!(
            rules = self.rules.len(),
            errors = map.len(),
            blocking = map.blocking_count(),
            "Validated form"
        );
        map
    }

    /// Fields whose errors may change when `changed` change.
    ///
    /// The changed fields themselves, every field owning a rule that reads
    /// one of them, and all checkpoints once any checkpoint is included.
    pub fn scope_for(&self, changed: &[FieldId]) -> BTreeSet<FieldId> {
        let mut scope: BTreeSet<FieldId> = changed.iter().cloned().collect();

        for rule in &self.rules {
            if rule.reads().into_iter().any(|read| changed.contains(read)) {
                scope.insert(rule.field.clone());
            }
        }

        if let Some(timeline) = &self.timeline {
            if timeline
                .checkpoints()
                .iter()
                .any(|c| scope.contains(&c.id))
            {
                scope.extend(timeline.checkpoints().iter().map(|c| c.id.clone()));
            }
        }
        scope
    }

    /// Evaluate the rules owned by fields in `scope`.
    pub fn validate_scope(
        &self,
        store: &FieldStore,
        scope: &BTreeSet<FieldId>,
    ) -> Vec<ValidationError> {
        let mut errors: Vec<ValidationError> = self
            .rules
            .iter()
            .filter(|rule| scope.contains(&rule.field))
            .flat_map(|rule| rule.evaluate(store, &self.labels))
            .collect();

        if let Some(timeline) = &self.timeline {
            if timeline
                .checkpoints()
                .iter()
                .any(|c| scope.contains(&c.id))
            {
                errors.extend(timeline.validate(store));
            }
        }
        errors
    }

    /// Re-evaluate what `changed` can affect and replace those errors.
    ///
    /// Returns the scope that was replaced.
    pub fn revalidate(
        &self,
        store: &FieldStore,
        changed: &[FieldId],
        errors: &mut ErrorMap,
    ) -> BTreeSet<FieldId> {
        let scope = self.scope_for(changed);
        let fresh = self.validate_scope(store, &scope);
        debug!(
            scope = scope.len(),
            errors = fresh.len(),
            "Revalidated changed fields"
        );
        errors.replace(&scope, fresh);
        scope
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::timeline::TimeCheckpointSpec;
    use crate::types::ErrorKind;
    use crate::value::{FieldKind, FieldValue};

    fn engine() -> ValidationEngine {
        ValidationEngine::new(
            vec![
                Rule::required("opening_km"),
                Rule::min("opening_km", 0.0),
                Rule::at_least("closing_km", "opening_km"),
                Rule::required("remarks"),
            ],
            None,
            Labels::new(),
        )
    }

    fn store() -> FieldStore {
        FieldStore::new()
            .with_field("opening_km", FieldKind::Number)
            .with_field("closing_km", FieldKind::Number)
            .with_field("remarks", FieldKind::Text)
    }

    #[test]
    fn test_scope_follows_rule_reads() {
        let scope = engine().scope_for(&["opening_km".into()]);
        assert!(scope.contains("opening_km"));
        assert!(scope.contains("closing_km"));
        assert!(!scope.contains("remarks"));
    }

    #[test]
    fn test_revalidate_replaces_only_scope() {
        let engine = engine();
        let mut store = store();
        let mut errors = engine.validate_all(&store);
        assert_eq!(errors.for_field("remarks").len(), 1);
        assert_eq!(errors.for_field("opening_km").len(), 1);

        store.set("opening_km", FieldValue::Number(500.0)).unwrap();
        store.set("closing_km", FieldValue::Number(400.0)).unwrap();
        engine.revalidate(
            &store,
            &["opening_km".into(), "closing_km".into()],
            &mut errors,
        );

        assert!(errors.for_field("opening_km").is_empty());
        assert_eq!(errors.for_field("closing_km")[0].kind, ErrorKind::Range);
        // Out of scope, kept untouched
        assert_eq!(errors.for_field("remarks").len(), 1);

        store.set("closing_km", FieldValue::Number(650.0)).unwrap();
        engine.revalidate(&store, &["closing_km".into()], &mut errors);
        assert!(errors.for_field("closing_km").is_empty());
    }

    #[test]
    fn test_checkpoint_change_revalidates_whole_timeline() {
        let ids = ["t1", "t2", "t3", "t4", "t5", "t6"];
        let timeline = TimeSequenceValidator::new(
            ids.iter()
                .enumerate()
                .map(|(i, id)| TimeCheckpointSpec::new(*id, i as u8, *id))
                .collect(),
        )
        .unwrap();
        let engine = ValidationEngine::new(Vec::new(), Some(timeline), Labels::new());

        let mut store = FieldStore::new();
        for id in ids {
            store.declare(id, FieldKind::Time);
        }
        store.set("t1", FieldValue::time(8, 0)).unwrap();
        store.set("t2", FieldValue::time(7, 0)).unwrap();

        let mut errors = ErrorMap::new();
        engine.revalidate(&store, &["t2".into()], &mut errors);
        assert_eq!(errors.for_field("t2").len(), 1);

        // Fixing the earlier checkpoint clears the error on the later one
        store.set("t1", FieldValue::time(6, 0)).unwrap();
        engine.revalidate(&store, &["t1".into()], &mut errors);
        assert!(errors.is_empty());
    }
}
