//! Draft persistence.
//!
//! One draft slot per form type, overwritten on every save. Drafts carry a
//! SHA-256 checksum of their serialized state so a damaged slot is detected
//! at mount and dropped instead of restored.

mod autosave;
mod store;

pub use autosave::DraftAutosaver;
pub use store::{DraftStore, FileDraftStore, MemoryDraftStore};

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use waybill::{DraftConfig, FormState, FormType};

/// Error types for draft persistence.
#[derive(Debug, thiserror::Error)]
pub enum DraftError {
    #[error("Draft storage I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("Draft encoding failed: {0}")]
    Encoding(#[from] serde_json::Error),

    #[error("Draft for {0} failed its integrity check")]
    Corrupt(FormType),

    #[error("Form type {0} cannot name a draft file")]
    InvalidFormType(FormType),
}

/// A saved, unsubmitted form state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Draft {
    pub form_type: FormType,
    pub saved_at: DateTime<Utc>,
    pub state: FormState,
    /// Hex SHA-256 of the serialized state
    pub checksum: String,
}

impl Draft {
    /// Capture a state as a draft stamped now.
    pub fn capture(state: FormState) -> Result<Self, DraftError> {
        Ok(Self {
            form_type: state.form_type.clone(),
            saved_at: Utc::now(),
            checksum: checksum(&state)?,
            state,
        })
    }

    /// True if the state matches its checksum and its own form type.
    pub fn verify(&self) -> bool {
        self.state.form_type == self.form_type
            && checksum(&self.state).is_ok_and(|sum| sum == self.checksum)
    }
}

/// Draft store for a configuration: file-backed when a directory is set.
pub fn open_store(config: &DraftConfig) -> Arc<dyn DraftStore> {
    match &config.directory {
        Some(directory) => Arc::new(FileDraftStore::new(directory.clone())),
        None => Arc::new(MemoryDraftStore::new()),
    }
}

fn checksum(state: &FormState) -> Result<String, serde_json::Error> {
    let bytes = serde_json::to_vec(state)?;
    Ok(hex::encode(Sha256::digest(&bytes)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use waybill::{FieldId, FieldValue};

    fn state() -> FormState {
        let mut state = FormState {
            form_type: FormType::from("vehicle_transaction"),
            record_id: None,
            fields: Default::default(),
            errors: Default::default(),
            staged_deletions: Default::default(),
        };
        state
            .fields
            .values
            .insert(FieldId::from("opening_km"), FieldValue::Number(1234.56));
        state
    }

    #[test]
    fn test_checksum_survives_json_round_trip() {
        let draft = Draft::capture(state()).unwrap();
        assert!(draft.verify());

        let json = serde_json::to_string(&draft).unwrap();
        let parsed: Draft = serde_json::from_str(&json).unwrap();
        assert!(parsed.verify());
        assert_eq!(parsed, draft);
    }

    #[test]
    fn test_tampered_state_fails_verification() {
        let mut draft = Draft::capture(state()).unwrap();
        draft
            .state
            .fields
            .values
            .insert(FieldId::from("opening_km"), FieldValue::Number(1.0));
        assert!(!draft.verify());

        let mut draft = Draft::capture(state()).unwrap();
        draft.form_type = FormType::from("customer");
        assert!(!draft.verify());
    }
}
