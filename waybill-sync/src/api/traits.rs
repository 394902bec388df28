//! Contract of the backend persistence API.
//!
//! The engine only needs four calls. Every failure is non-fatal to local
//! form state: callers log or surface it and keep the form intact.

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use waybill::{FieldId, FieldValue};

use crate::payload::SubmissionPayload;

/// Error types for backend calls.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ApiError {
    /// Transport failure
    #[error("Network error: {0}")]
    Network(String),

    /// The backend refused the request
    #[error("Rejected by server: {message}")]
    Rejected {
        message: String,
        /// Server-side messages keyed by field
        field_errors: BTreeMap<FieldId, String>,
    },

    /// Record or attachment does not exist
    #[error("Not found: {0}")]
    NotFound(String),

    /// No response within the configured timeout
    #[error("Request timed out after {0}ms")]
    Timeout(u64),
}

impl ApiError {
    /// Rejection without field details.
    pub fn rejected(message: impl Into<String>) -> Self {
        ApiError::Rejected {
            message: message.into(),
            field_errors: BTreeMap::new(),
        }
    }
}

/// Result of creating a record.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CreatedRecord {
    /// Backend id of the new record
    pub id: String,
    /// Values filled in by the backend, such as generated codes
    pub generated_fields: BTreeMap<FieldId, FieldValue>,
}

/// Backend persistence API consumed by the engine.
#[async_trait]
pub trait RecordApi: Send + Sync {
    /// Generate a code from seed text.
    async fn lookup_code(&self, seed: &str) -> Result<String, ApiError>;

    /// Create a new record.
    async fn create_record(&self, payload: &SubmissionPayload) -> Result<CreatedRecord, ApiError>;

    /// Update an existing record.
    async fn update_record(&self, id: &str, payload: &SubmissionPayload) -> Result<(), ApiError>;

    /// Delete the stored attachment of one file field.
    async fn delete_attachment(&self, id: &str, field: &FieldId) -> Result<(), ApiError>;
}
