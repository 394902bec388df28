//! Form schema declaration and the `Form` aggregate.
//!
//! A [`FormSchema`] is built once per form type and shared. A [`Form`] owns
//! the mutable state of one open form: its store, its error map and its
//! staged attachment deletions. Every edit flows through [`Form::set`],
//! which recomputes derived fields and revalidates what the edit affects.

use std::borrow::Cow;
use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::sync::Arc;

use tracing::{debug, warn};

use crate::graph::{DependencyGraph, DerivedFieldSpec, GraphError};
use crate::recompute::RecomputeEngine;
use crate::store::{FieldStore, StoreError};
use crate::timeline::{TimeCheckpointSpec, TimeSequenceValidator, TimelineError};
use crate::types::{ErrorKind, ErrorMap, FormState, FormType, ValidationError};
use crate::validation::{Check, Labels, Rule, ValidationEngine};
use crate::value::{Attachment, FieldId, FieldKind, FieldValue};

/// Error types for schema construction.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SchemaError {
    #[error("Field declared twice: {0}")]
    DuplicateField(FieldId),

    #[error("Unknown field {field} referenced by {context}")]
    UnknownField { field: FieldId, context: String },

    #[error("Rule on {0} addresses a member but the field is not a group or list")]
    NotStructured(FieldId),

    #[error("Lookup target {0} must be a text field that is not derived")]
    LookupTarget(FieldId),

    #[error(transparent)]
    Graph(#[from] GraphError),

    #[error(transparent)]
    Timeline(#[from] TimelineError),
}

/// Declaration of one field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldSpec {
    pub id: FieldId,
    pub kind: FieldKind,
    pub label: String,
}

/// A generated code fetched from the backend whenever its seeds change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LookupBinding {
    /// Fields whose text forms the lookup seed, joined with spaces
    pub seeds: Vec<FieldId>,
    /// Field receiving the generated code
    pub target: FieldId,
}

impl LookupBinding {
    /// Seed text for the current store values, `None` when all seeds are blank.
    pub fn seed(&self, store: &FieldStore) -> Option<String> {
        let parts: Vec<String> = self
            .seeds
            .iter()
            .filter_map(|id| store.get(id.as_str()).scalar_text())
            .collect();
        (!parts.is_empty()).then(|| parts.join(" "))
    }
}

/// Static description of a form type.
#[derive(Debug, Clone)]
pub struct FormSchema {
    form_type: FormType,
    fields: Vec<FieldSpec>,
    graph: DependencyGraph,
    validation: ValidationEngine,
    lookups: Vec<LookupBinding>,
}

impl FormSchema {
    pub fn builder(form_type: impl Into<FormType>) -> FormSchemaBuilder {
        FormSchemaBuilder::new(form_type)
    }

    pub fn form_type(&self) -> &FormType {
        &self.form_type
    }

    pub fn fields(&self) -> &[FieldSpec] {
        &self.fields
    }

    pub fn field(&self, id: &str) -> Option<&FieldSpec> {
        self.fields.iter().find(|f| f.id.as_str() == id)
    }

    pub fn graph(&self) -> &DependencyGraph {
        &self.graph
    }

    pub fn validation(&self) -> &ValidationEngine {
        &self.validation
    }

    pub fn lookups(&self) -> &[LookupBinding] {
        &self.lookups
    }

    /// A store with every field declared and blank.
    pub fn new_store(&self) -> FieldStore {
        let mut store = FieldStore::new();
        for field in &self.fields {
            store.declare(field.id.clone(), field.kind);
        }
        store
    }
}

/// Builder for [`FormSchema`].
#[derive(Debug, Clone)]
pub struct FormSchemaBuilder {
    form_type: FormType,
    fields: Vec<FieldSpec>,
    derived: Vec<DerivedFieldSpec>,
    rules: Vec<Rule>,
    checkpoints: Vec<TimeCheckpointSpec>,
    lookups: Vec<LookupBinding>,
}

impl FormSchemaBuilder {
    pub fn new(form_type: impl Into<FormType>) -> Self {
        Self {
            form_type: form_type.into(),
            fields: Vec::new(),
            derived: Vec::new(),
            rules: Vec::new(),
            checkpoints: Vec::new(),
            lookups: Vec::new(),
        }
    }

    /// Declare an input field.
    pub fn field(mut self, id: &str, kind: FieldKind, label: &str) -> Self {
        self.fields.push(FieldSpec {
            id: id.into(),
            kind,
            label: label.to_string(),
        });
        self
    }

    /// Declare a derived numeric field.
    pub fn derived(mut self, spec: DerivedFieldSpec, label: &str) -> Self {
        self.fields.push(FieldSpec {
            id: spec.id.clone(),
            kind: FieldKind::Number,
            label: label.to_string(),
        });
        self.derived.push(spec);
        self
    }

    /// Declare the next time checkpoint. Sequence follows call order.
    pub fn checkpoint(mut self, id: &str, label: &str) -> Self {
        let sequence = self.checkpoints.len() as u8 + 1;
        self.checkpoints
            .push(TimeCheckpointSpec::new(id, sequence, label));
        self.field(id, FieldKind::Time, label)
    }

    pub fn rule(mut self, rule: Rule) -> Self {
        self.rules.push(rule);
        self
    }

    pub fn rules(mut self, rules: impl IntoIterator<Item = Rule>) -> Self {
        self.rules.extend(rules);
        self
    }

    pub fn lookup<I, S>(mut self, seeds: I, target: &str) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<FieldId>,
    {
        self.lookups.push(LookupBinding {
            seeds: seeds.into_iter().map(Into::into).collect(),
            target: target.into(),
        });
        self
    }

    /// Check every cross reference and assemble the schema.
    pub fn build(self) -> Result<FormSchema, SchemaError> {
        let mut kinds: BTreeMap<&FieldId, FieldKind> = BTreeMap::new();
        for field in &self.fields {
            if kinds.insert(&field.id, field.kind).is_some() {
                return Err(SchemaError::DuplicateField(field.id.clone()));
            }
        }
        let known = |id: &FieldId, context: String| -> Result<FieldKind, SchemaError> {
            kinds
                .get(id)
                .copied()
                .ok_or_else(|| SchemaError::UnknownField {
                    field: id.clone(),
                    context,
                })
        };

        for spec in &self.derived {
            for source in &spec.sources {
                known(source, format!("derived field {}", spec.id))?;
            }
        }

        for rule in &self.rules {
            for read in rule.reads() {
                known(read, format!("a rule on {}", rule.field))?;
            }
            let kind = known(&rule.field, format!("a rule on {}", rule.field))?;
            let structured = matches!(kind, FieldKind::Group | FieldKind::List);
            let needs_list = matches!(rule.check, Check::Unique(_));
            if (rule.member.is_some() && !structured) || (needs_list && kind != FieldKind::List)
            {
                return Err(SchemaError::NotStructured(rule.field.clone()));
            }
        }

        let derived_ids: HashSet<&FieldId> = self.derived.iter().map(|s| &s.id).collect();
        for lookup in &self.lookups {
            for seed in &lookup.seeds {
                known(seed, format!("the lookup for {}", lookup.target))?;
            }
            let kind = known(&lookup.target, "a lookup".to_string())?;
            if kind != FieldKind::Text || derived_ids.contains(&lookup.target) {
                return Err(SchemaError::LookupTarget(lookup.target.clone()));
            }
        }

        let timeline = if self.checkpoints.is_empty() {
            None
        } else {
            Some(TimeSequenceValidator::new(self.checkpoints)?)
        };
        let graph = DependencyGraph::new(self.derived)?;

        let mut labels = Labels::new();
        for field in &self.fields {
            labels.insert(field.id.clone(), field.label.clone());
        }

        debug!(
            form_type = %self.form_type,
            fields = self.fields.len(),
            derived = graph.len(),
            rules = self.rules.len(),
            "Built form schema"
        );

        Ok(FormSchema {
            form_type: self.form_type,
            fields: self.fields,
            graph,
            validation: ValidationEngine::new(self.rules, timeline, labels),
            lookups: self.lookups,
        })
    }
}

/// One open form, fresh or editing an existing record.
#[derive(Debug, Clone)]
pub struct Form {
    schema: Arc<FormSchema>,
    store: FieldStore,
    errors: ErrorMap,
    /// Raw input that failed to parse, kept until the field is written
    input_errors: BTreeMap<FieldId, ValidationError>,
    staged_deletions: BTreeSet<FieldId>,
    record_id: Option<String>,
}

impl Form {
    /// Open a fresh form.
    pub fn new(schema: Arc<FormSchema>) -> Self {
        let mut store = schema.new_store();
        RecomputeEngine::new(schema.graph()).recompute_all(&mut store);
        store.mark_saved();
        Self {
            schema,
            store,
            errors: ErrorMap::new(),
            input_errors: BTreeMap::new(),
            staged_deletions: BTreeSet::new(),
            record_id: None,
        }
    }

    /// Open an existing record for editing.
    pub fn edit(
        schema: Arc<FormSchema>,
        record_id: impl Into<String>,
        values: impl IntoIterator<Item = (FieldId, FieldValue)>,
    ) -> Result<Self, StoreError> {
        let mut form = Self::new(schema);
        form.store.load(values)?;
        RecomputeEngine::new(form.schema.graph()).recompute_all(&mut form.store);
        form.store.mark_saved();
        form.record_id = Some(record_id.into());
        form.errors = form.schema.validation().validate_all(&form.store);
        Ok(form)
    }

    pub fn schema(&self) -> &Arc<FormSchema> {
        &self.schema
    }

    pub fn form_type(&self) -> &FormType {
        self.schema.form_type()
    }

    pub fn record_id(&self) -> Option<&str> {
        self.record_id.as_deref()
    }

    pub fn is_editing(&self) -> bool {
        self.record_id.is_some()
    }

    pub fn store(&self) -> &FieldStore {
        &self.store
    }

    pub fn get(&self, id: &str) -> &FieldValue {
        self.store.get(id)
    }

    pub fn errors(&self) -> &ErrorMap {
        &self.errors
    }

    pub fn is_dirty(&self) -> bool {
        self.store.is_dirty()
    }

    /// Write a user edit.
    ///
    /// Returns every field whose value changed: the edited field followed by
    /// the derived fields it cascaded into. Derived fields are read-only.
    pub fn set(&mut self, id: &str, value: FieldValue) -> Result<Vec<FieldId>, StoreError> {
        if self.schema.graph().is_derived(id) {
            return Err(StoreError::ReadOnly(FieldId::from(id)));
        }

        let changed = self.store.set(id, value)?;
        let had_input_error = self.input_errors.remove(id).is_some();
        if !changed {
            if had_input_error {
                self.revalidate(&[FieldId::from(id)]);
            }
            return Ok(Vec::new());
        }

        let field = FieldId::from(id);
        let report = RecomputeEngine::new(self.schema.graph()).recompute(&mut self.store, &field);
        let mut changed_ids = Vec::with_capacity(report.changed.len() + 1);
        changed_ids.push(field);
        changed_ids.extend(report.changed);

        self.revalidate(&changed_ids);
        Ok(changed_ids)
    }

    /// Parse raw input and write it.
    ///
    /// Input that does not parse leaves the stored value alone and records
    /// a blocking format error on the field.
    pub fn set_input(&mut self, id: &str, raw: &str) -> Result<Vec<FieldId>, StoreError> {
        let (kind, label) = self
            .schema
            .field(id)
            .map(|spec| (spec.kind, spec.label.clone()))
            .ok_or_else(|| StoreError::UnknownField(FieldId::from(id)))?;
        if self.schema.graph().is_derived(id) {
            return Err(StoreError::ReadOnly(FieldId::from(id)));
        }

        match kind.parse(raw) {
            Ok(value) => self.set(id, value),
            Err(e) => {
                let field = FieldId::from(id);
                let message = format!("{}: {}", label, e);
                self.input_errors.insert(
                    field.clone(),
                    ValidationError::blocking(field.clone(), ErrorKind::Format, message),
                );
                self.revalidate(&[field]);
                Ok(Vec::new())
            }
        }
    }

    /// Mark a field as interacted with.
    pub fn touch(&mut self, id: &str) -> Result<(), StoreError> {
        self.store.touch(id)
    }

    /// Stage the stored attachment of a file field for deletion at submit.
    ///
    /// Returns `Ok(false)` when the field holds no stored attachment.
    pub fn stage_deletion(&mut self, id: &str) -> Result<bool, StoreError> {
        let kind = self
            .store
            .kind(id)
            .ok_or_else(|| StoreError::UnknownField(FieldId::from(id)))?;
        if kind != FieldKind::File {
            return Err(StoreError::TypeMismatch {
                field: FieldId::from(id),
                expected: FieldKind::File,
                actual: kind,
            });
        }
        if !matches!(self.store.get(id).as_attachment(), Some(Attachment::Stored(_))) {
            return Ok(false);
        }
        let field = FieldId::from(id);
        let staged = self.staged_deletions.insert(field.clone());
        if staged {
            self.revalidate(&[field]);
        }
        Ok(staged)
    }

    pub fn unstage_deletion(&mut self, id: &str) -> bool {
        let removed = self.staged_deletions.remove(id);
        if removed {
            self.revalidate(&[FieldId::from(id)]);
        }
        removed
    }

    pub fn staged_deletions(&self) -> &BTreeSet<FieldId> {
        &self.staged_deletions
    }

    /// Run every rule and return the complete error map.
    ///
    /// Rules see the form as it will be saved: a stored attachment staged
    /// for deletion counts as blank.
    pub fn validate(&mut self) -> &ErrorMap {
        let view = saved_view(&self.store, &self.staged_deletions);
        self.errors = self.schema.validation().validate_all(&view);
        for error in self.input_errors.values() {
            self.errors.push(error.clone());
        }
        &self.errors
    }

    /// Serializable snapshot of the whole form.
    pub fn state(&self) -> FormState {
        FormState {
            form_type: self.form_type().clone(),
            record_id: self.record_id.clone(),
            fields: self.store.snapshot(),
            errors: self.errors.clone(),
            staged_deletions: self.staged_deletions.clone(),
        }
    }

    /// Apply a captured state.
    ///
    /// Derived fields are recomputed and every edited or touched field is
    /// revalidated, so a state captured by an older schema cannot leave
    /// stale values or errors behind.
    /// Returns the entries that no longer fit the schema.
    pub fn restore(&mut self, state: FormState) -> Result<Vec<FieldId>, StoreError> {
        if &state.form_type != self.form_type() {
            return Err(StoreError::FormTypeMismatch {
                expected: self.form_type().to_string(),
                found: state.form_type.to_string(),
            });
        }

        let skipped = self.store.restore(state.fields);
        RecomputeEngine::new(self.schema.graph()).recompute_all(&mut self.store);

        self.staged_deletions = state
            .staged_deletions
            .into_iter()
            .filter(|id| self.store.kind(id.as_str()) == Some(FieldKind::File))
            .collect();

        self.errors.clear();
        self.input_errors.clear();
        let scope: BTreeSet<FieldId> = self
            .store
            .touched()
            .chain(self.store.dirty_fields())
            .cloned()
            .collect();
        self.revalidate(&scope.into_iter().collect::<Vec<_>>());

        debug!(
            form_type = %self.form_type(),
            skipped = skipped.len(),
            "Restored form state"
        );
        Ok(skipped)
    }

    /// Reset to a fresh, empty form.
    pub fn clear(&mut self) {
        *self = Self::new(self.schema.clone());
    }

    /// Adopt the current values as the saved state of `record_id`.
    ///
    /// Generated fields returned by the backend are written first.
    pub fn mark_saved(
        &mut self,
        record_id: impl Into<String>,
        generated: BTreeMap<FieldId, FieldValue>,
    ) {
        for (id, value) in generated {
            if self.schema.graph().is_derived(id.as_str()) {
                continue;
            }
            if let Err(e) = self.store.set(id.as_str(), value) {
                warn!(field = %id, error = %e, "Ignoring generated field");
            }
        }
        RecomputeEngine::new(self.schema.graph()).recompute_all(&mut self.store);
        self.store.mark_saved();

        self.record_id = Some(record_id.into());
        self.staged_deletions.clear();
        self.input_errors.clear();
        self.errors = self.schema.validation().validate_all(&self.store);
    }

    fn revalidate(&mut self, changed: &[FieldId]) {
        if changed.is_empty() {
            return;
        }
        let view = saved_view(&self.store, &self.staged_deletions);
        let scope = self
            .schema
            .validation()
            .revalidate(&view, changed, &mut self.errors);
        for (id, error) in &self.input_errors {
            if scope.contains(id) {
                self.errors.push(error.clone());
            }
        }
    }
}

/// The store with every staged stored attachment blanked.
///
/// A field whose stored file was already replaced by a pending one keeps
/// the replacement.
fn saved_view<'a>(store: &'a FieldStore, staged: &BTreeSet<FieldId>) -> Cow<'a, FieldStore> {
    let removed: Vec<&FieldId> = staged
        .iter()
        .filter(|id| {
            matches!(
                store.get(id.as_str()).as_attachment(),
                Some(Attachment::Stored(_))
            )
        })
        .collect();
    if removed.is_empty() {
        return Cow::Borrowed(store);
    }

    let mut view = store.clone();
    for id in removed {
        if let Err(e) = view.set(id.as_str(), FieldValue::Blank) {
            warn!(field = %id, error = %e, "Could not blank staged attachment");
        }
    }
    Cow::Owned(view)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::Formula;
    use crate::value::StoredFile;

    fn schema() -> Arc<FormSchema> {
        Arc::new(
            FormSchema::builder("odometer")
                .field("opening_km", FieldKind::Number, "Opening KM")
                .field("closing_km", FieldKind::Number, "Closing KM")
                .field("trip_sheet", FieldKind::File, "Trip Sheet")
                .derived(
                    DerivedFieldSpec::new(
                        "total_km",
                        Formula::Difference {
                            minuend: "closing_km".into(),
                            subtrahend: "opening_km".into(),
                        },
                    ),
                    "Total KM",
                )
                .rule(Rule::required("opening_km"))
                .rule(Rule::at_least("closing_km", "opening_km"))
                .build()
                .unwrap(),
        )
    }

    #[test]
    fn test_set_cascades_and_reports_changes() {
        let mut form = Form::new(schema());
        form.set("opening_km", FieldValue::Number(1000.0)).unwrap();
        let changed = form.set("closing_km", FieldValue::Number(1180.0)).unwrap();

        assert_eq!(changed, vec![FieldId::from("closing_km"), FieldId::from("total_km")]);
        assert_eq!(form.get("total_km").as_number(), Some(180.0));
        assert!(form.is_dirty());
    }

    #[test]
    fn test_derived_fields_are_read_only() {
        let mut form = Form::new(schema());
        assert!(matches!(
            form.set("total_km", FieldValue::Number(5.0)),
            Err(StoreError::ReadOnly(_))
        ));
        assert!(matches!(
            form.set_input("total_km", "5"),
            Err(StoreError::ReadOnly(_))
        ));
    }

    #[test]
    fn test_negative_distance_carries_range_error() {
        let mut form = Form::new(schema());
        form.set("opening_km", FieldValue::Number(900.0)).unwrap();
        form.set("closing_km", FieldValue::Number(850.0)).unwrap();

        assert_eq!(form.get("total_km").as_number(), Some(-50.0));
        let errors = form.errors().for_field("closing_km");
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].kind, ErrorKind::Range);
        assert!(errors[0].is_blocking());
    }

    #[test]
    fn test_unparseable_input_keeps_value_and_records_error() {
        let mut form = Form::new(schema());
        form.set_input("opening_km", "1,000").unwrap();
        form.set_input("opening_km", "ten").unwrap();

        assert_eq!(form.get("opening_km").as_number(), Some(1000.0));
        assert_eq!(form.errors().for_field("opening_km")[0].kind, ErrorKind::Format);

        form.set_input("opening_km", "1000").unwrap();
        assert!(form.errors().for_field("opening_km").is_empty());
    }

    #[test]
    fn test_state_round_trip_into_fresh_form() {
        let mut form = Form::new(schema());
        form.set("opening_km", FieldValue::Number(10.0)).unwrap();
        form.set("closing_km", FieldValue::Number(25.0)).unwrap();
        form.touch("opening_km").unwrap();
        let state = form.state();

        let mut restored = Form::new(schema());
        assert!(restored.restore(state.clone()).unwrap().is_empty());
        assert_eq!(restored.state().fields, state.fields);
        assert_eq!(restored.get("total_km").as_number(), Some(15.0));
    }

    #[test]
    fn test_restore_keeps_errors_on_edited_fields() {
        let mut form = Form::new(schema());
        form.set("opening_km", FieldValue::Number(900.0)).unwrap();
        form.set("closing_km", FieldValue::Number(850.0)).unwrap();
        assert_eq!(form.errors().for_field("closing_km").len(), 1);

        let mut restored = Form::new(schema());
        restored.restore(form.state()).unwrap();
        let errors = restored.errors().for_field("closing_km");
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].kind, ErrorKind::Range);
    }

    #[test]
    fn test_staged_required_attachment_counts_as_blank() {
        let schema = Arc::new(
            FormSchema::builder("odometer")
                .field("trip_sheet", FieldKind::File, "Trip Sheet")
                .rule(Rule::required("trip_sheet"))
                .build()
                .unwrap(),
        );
        let stored = FieldValue::File(Attachment::Stored(StoredFile {
            url: "/files/trip-sheet-17.pdf".to_string(),
            file_name: None,
        }));
        let mut form = Form::edit(schema, "rec-17", [(FieldId::from("trip_sheet"), stored)]).unwrap();
        assert!(form.errors().is_empty());

        form.stage_deletion("trip_sheet").unwrap();
        assert_eq!(form.errors().for_field("trip_sheet")[0].kind, ErrorKind::Required);
        assert!(form.validate().has_blocking());

        // A pending replacement satisfies the rule while the old file stays staged
        let replacement = FieldValue::File(Attachment::Pending(crate::value::PendingFile {
            path: "/tmp/trip-sheet-new.pdf".into(),
            file_name: "trip-sheet-new.pdf".to_string(),
            content_type: None,
        }));
        form.set("trip_sheet", replacement).unwrap();
        assert!(form.staged_deletions().contains("trip_sheet"));
        assert!(!form.validate().has_blocking());

        form.unstage_deletion("trip_sheet");
        assert!(!form.validate().has_blocking());
    }

    #[test]
    fn test_restore_rejects_other_form_type() {
        let mut state = Form::new(schema()).state();
        state.form_type = FormType::from("customer");
        assert!(matches!(
            Form::new(schema()).restore(state),
            Err(StoreError::FormTypeMismatch { .. })
        ));
    }

    #[test]
    fn test_stage_deletion_needs_stored_file() {
        let stored = FieldValue::File(Attachment::Stored(StoredFile {
            url: "/files/trip-sheet-17.pdf".to_string(),
            file_name: Some("trip-sheet-17.pdf".to_string()),
        }));
        let mut form =
            Form::edit(schema(), "rec-17", [(FieldId::from("trip_sheet"), stored)]).unwrap();

        assert!(form.stage_deletion("trip_sheet").unwrap());
        // Staging keeps the attachment in place until submit
        assert!(form.get("trip_sheet").as_attachment().is_some());
        assert!(form.stage_deletion("opening_km").is_err());

        form.clear();
        assert!(!form.stage_deletion("trip_sheet").unwrap());
        assert!(form.staged_deletions().is_empty());
    }

    #[test]
    fn test_build_rejects_unknown_references() {
        let result = FormSchema::builder("broken")
            .field("a", FieldKind::Number, "A")
            .rule(Rule::at_least("a", "b"))
            .build();
        assert!(matches!(result, Err(SchemaError::UnknownField { .. })));

        let result = FormSchema::builder("broken")
            .field("a", FieldKind::Number, "A")
            .rule(Rule::required("a").on_member("x"))
            .build();
        assert!(matches!(result, Err(SchemaError::NotStructured(_))));
    }
}
