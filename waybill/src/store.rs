//! FieldStore - current typed value of every form field.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::value::{FieldId, FieldKind, FieldValue};

static BLANK: FieldValue = FieldValue::Blank;

/// Error types for store writes.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum StoreError {
    /// Field was never declared
    #[error("Unknown field: {0}")]
    UnknownField(FieldId),

    /// Value kind does not match the declared kind
    #[error("Type mismatch on {field}: expected {expected:?}, got {actual:?}")]
    TypeMismatch {
        field: FieldId,
        expected: FieldKind,
        actual: FieldKind,
    },

    /// Derived fields are written by the recompute engine only
    #[error("Field {0} is derived and cannot be edited")]
    ReadOnly(FieldId),

    /// NaN and infinities are never stored
    #[error("Field {0} only accepts finite numbers")]
    NonFinite(FieldId),

    /// A snapshot of another form was offered for restore
    #[error("Cannot restore a {found} snapshot into a {expected} form")]
    FormTypeMismatch { expected: String, found: String },
}

/// Serializable copy of the field values and touched flags.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FieldSnapshot {
    pub values: BTreeMap<FieldId, FieldValue>,
    pub touched: BTreeSet<FieldId>,
}

/// Holds the value of every declared field plus dirty and touched flags.
///
/// Owned by exactly one form; there is no interior mutability.
#[derive(Debug, Clone, Default)]
pub struct FieldStore {
    kinds: BTreeMap<FieldId, FieldKind>,
    values: BTreeMap<FieldId, FieldValue>,
    initial: BTreeMap<FieldId, FieldValue>,
    touched: BTreeSet<FieldId>,
    dirty: BTreeSet<FieldId>,
}

impl FieldStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare a field. It starts blank.
    pub fn declare(&mut self, id: impl Into<FieldId>, kind: FieldKind) {
        let id = id.into();
        self.kinds.insert(id.clone(), kind);
        self.values.insert(id.clone(), FieldValue::Blank);
        self.initial.insert(id, FieldValue::Blank);
    }

    /// Builder: declare a field.
    pub fn with_field(mut self, id: impl Into<FieldId>, kind: FieldKind) -> Self {
        self.declare(id, kind);
        self
    }

    pub fn kind(&self, id: &str) -> Option<FieldKind> {
        self.kinds.get(id).copied()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.kinds.contains_key(id)
    }

    /// Declared field ids in order.
    pub fn ids(&self) -> impl Iterator<Item = &FieldId> {
        self.kinds.keys()
    }

    /// Current value; undeclared fields read as blank.
    pub fn get(&self, id: &str) -> &FieldValue {
        self.values.get(id).unwrap_or(&BLANK)
    }

    /// Write a value.
    ///
    /// Returns `Ok(true)` if the stored value changed. A rejected write
    /// leaves the store untouched.
    pub fn set(&mut self, id: &str, value: FieldValue) -> Result<bool, StoreError> {
        let (field, value) = self.check(id, value)?;

        if self.values.get(id) == Some(&value) {
            return Ok(false);
        }

        if self.initial.get(id) == Some(&value) {
            self.dirty.remove(id);
        } else {
            self.dirty.insert(field.clone());
        }
        self.values.insert(field, value);
        Ok(true)
    }

    /// Load the values of an existing record as the initial state.
    ///
    /// All values are checked before any is applied.
    pub fn load(
        &mut self,
        values: impl IntoIterator<Item = (FieldId, FieldValue)>,
    ) -> Result<(), StoreError> {
        let checked = values
            .into_iter()
            .map(|(id, value)| self.check(id.as_str(), value))
            .collect::<Result<Vec<_>, _>>()?;

        for (id, value) in checked {
            self.initial.insert(id.clone(), value.clone());
            self.values.insert(id, value);
        }
        self.dirty.clear();
        self.touched.clear();
        Ok(())
    }

    /// Mark a field as interacted with.
    pub fn touch(&mut self, id: &str) -> Result<(), StoreError> {
        if !self.contains(id) {
            return Err(StoreError::UnknownField(FieldId::from(id)));
        }
        self.touched.insert(FieldId::from(id));
        Ok(())
    }

    pub fn is_touched(&self, id: &str) -> bool {
        self.touched.contains(id)
    }

    pub fn touched(&self) -> impl Iterator<Item = &FieldId> {
        self.touched.iter()
    }

    /// True if any field differs from its initial value.
    pub fn is_dirty(&self) -> bool {
        !self.dirty.is_empty()
    }

    pub fn dirty_fields(&self) -> impl Iterator<Item = &FieldId> {
        self.dirty.iter()
    }

    /// Copy out values and touched flags.
    pub fn snapshot(&self) -> FieldSnapshot {
        FieldSnapshot {
            values: self.values.clone(),
            touched: self.touched.clone(),
        }
    }

    /// Apply a snapshot.
    ///
    /// Entries for undeclared fields or with a mismatched kind are skipped and
    /// returned; fields missing from the snapshot keep their current value.
    pub fn restore(&mut self, snapshot: FieldSnapshot) -> Vec<FieldId> {
        let mut skipped = Vec::new();

        for (id, value) in snapshot.values {
            match self.check(id.as_str(), value) {
                Ok((id, value)) => {
                    if self.initial.get(&id) == Some(&value) {
                        self.dirty.remove(&id);
                    } else {
                        self.dirty.insert(id.clone());
                    }
                    self.values.insert(id, value);
                }
                Err(e) => {
                    warn!(field = %id, error = %e, "Skipping snapshot entry");
                    skipped.push(id);
                }
            }
        }

        self.touched = snapshot
            .touched
            .into_iter()
            .filter(|id| self.kinds.contains_key(id))
            .collect();

        skipped
    }

    /// Return every field to its initial value.
    pub fn reset(&mut self) {
        self.values = self.initial.clone();
        self.touched.clear();
        self.dirty.clear();
    }

    /// Adopt the current values as the new initial state.
    pub fn mark_saved(&mut self) {
        self.initial = self.values.clone();
        self.touched.clear();
        self.dirty.clear();
    }

    fn check(&self, id: &str, value: FieldValue) -> Result<(FieldId, FieldValue), StoreError> {
        let field = FieldId::from(id);
        let expected = self
            .kinds
            .get(id)
            .copied()
            .ok_or_else(|| StoreError::UnknownField(field.clone()))?;

        let value = match value {
            FieldValue::Text(text) if text.trim().is_empty() => FieldValue::Blank,
            FieldValue::Number(n) if !n.is_finite() => return Err(StoreError::NonFinite(field)),
            other => other,
        };

        match value.kind() {
            Some(actual) if actual != expected => Err(StoreError::TypeMismatch {
                field,
                expected,
                actual,
            }),
            _ => Ok((field, value)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> FieldStore {
        FieldStore::new()
            .with_field("opening_km", FieldKind::Number)
            .with_field("driver_name", FieldKind::Text)
    }

    #[test]
    fn test_set_and_get() {
        let mut store = store();
        assert!(store.get("opening_km").is_blank());
        assert!(store.set("opening_km", FieldValue::Number(1200.0)).unwrap());
        assert_eq!(store.get("opening_km").as_number(), Some(1200.0));
        // Same value again is not a change
        assert!(!store.set("opening_km", FieldValue::Number(1200.0)).unwrap());
    }

    #[test]
    fn test_type_mismatch_leaves_store_unchanged() {
        let mut store = store();
        store.set("opening_km", FieldValue::Number(10.0)).unwrap();

        let result = store.set("opening_km", FieldValue::text("ten"));
        assert!(matches!(result, Err(StoreError::TypeMismatch { .. })));
        assert_eq!(store.get("opening_km").as_number(), Some(10.0));

        assert!(matches!(
            store.set("opening_km", FieldValue::Number(f64::NAN)),
            Err(StoreError::NonFinite(_))
        ));
        assert!(matches!(
            store.set("unknown", FieldValue::Blank),
            Err(StoreError::UnknownField(_))
        ));
    }

    #[test]
    fn test_blank_text_is_stored_as_blank() {
        let mut store = store();
        store.set("driver_name", FieldValue::Text("   ".into())).unwrap();
        assert_eq!(store.get("driver_name"), &FieldValue::Blank);
    }

    #[test]
    fn test_dirty_tracking() {
        let mut store = store();
        store
            .load([(FieldId::from("driver_name"), FieldValue::text("Ravi"))])
            .unwrap();
        assert!(!store.is_dirty());

        store.set("driver_name", FieldValue::text("Suresh")).unwrap();
        assert!(store.is_dirty());

        store.set("driver_name", FieldValue::text("Ravi")).unwrap();
        assert!(!store.is_dirty());
    }

    #[test]
    fn test_snapshot_restore_round_trip() {
        let mut store = store();
        store.set("opening_km", FieldValue::Number(5.0)).unwrap();
        store.touch("opening_km").unwrap();
        let snapshot = store.snapshot();

        let mut fresh = self::store();
        let skipped = fresh.restore(snapshot.clone());
        assert!(skipped.is_empty());
        assert_eq!(fresh.snapshot(), snapshot);
    }

    #[test]
    fn test_restore_skips_mismatched_entries() {
        let mut snapshot = FieldSnapshot::default();
        snapshot
            .values
            .insert(FieldId::from("opening_km"), FieldValue::text("oops"));
        snapshot
            .values
            .insert(FieldId::from("retired_field"), FieldValue::Number(1.0));

        let mut store = store();
        let skipped = store.restore(snapshot);
        assert_eq!(skipped.len(), 2);
        assert!(store.get("opening_km").is_blank());
    }
}
