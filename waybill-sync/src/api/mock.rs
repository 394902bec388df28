//! Mock record API for testing.

use std::collections::{BTreeMap, HashSet};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use waybill::{FieldId, FieldValue};

use super::traits::*;
use crate::payload::SubmissionPayload;

/// A call received by the mock.
#[derive(Debug, Clone, PartialEq)]
pub enum ApiCall {
    Lookup(String),
    Create(SubmissionPayload),
    Update { id: String, payload: SubmissionPayload },
    DeleteAttachment { id: String, field: FieldId },
}

/// In-memory backend with configurable failures.
pub struct MockRecordApi {
    calls: Mutex<Vec<ApiCall>>,
    failing_deletions: HashSet<FieldId>,
    update_failure: Option<ApiError>,
    create_failure: Option<ApiError>,
    lookup_delay: Duration,
    generated_fields: BTreeMap<FieldId, FieldValue>,
    lookup_count: AtomicU32,
}

impl MockRecordApi {
    pub fn new() -> Self {
        Self {
            calls: Mutex::new(Vec::new()),
            failing_deletions: HashSet::new(),
            update_failure: None,
            create_failure: None,
            lookup_delay: Duration::ZERO,
            generated_fields: BTreeMap::new(),
            lookup_count: AtomicU32::new(0),
        }
    }

    /// Fail attachment deletions for this field.
    pub fn with_failing_deletion(mut self, field: impl Into<FieldId>) -> Self {
        self.failing_deletions.insert(field.into());
        self
    }

    /// Fail every update with this error.
    pub fn with_update_failure(mut self, error: ApiError) -> Self {
        self.update_failure = Some(error);
        self
    }

    /// Fail every create with this error.
    pub fn with_create_failure(mut self, error: ApiError) -> Self {
        self.create_failure = Some(error);
        self
    }

    /// Delay each lookup response.
    pub fn with_lookup_delay(mut self, delay: Duration) -> Self {
        self.lookup_delay = delay;
        self
    }

    /// Return this field from every create.
    pub fn with_generated_field(mut self, field: impl Into<FieldId>, value: FieldValue) -> Self {
        self.generated_fields.insert(field.into(), value);
        self
    }

    /// All calls received so far.
    pub fn calls(&self) -> Vec<ApiCall> {
        self.lock().clone()
    }

    /// Fields whose attachment deletion was requested.
    pub fn deletion_requests(&self) -> Vec<FieldId> {
        self.lock()
            .iter()
            .filter_map(|call| match call {
                ApiCall::DeleteAttachment { field, .. } => Some(field.clone()),
                _ => None,
            })
            .collect()
    }

    /// Payloads of update calls.
    pub fn updates(&self) -> Vec<SubmissionPayload> {
        self.lock()
            .iter()
            .filter_map(|call| match call {
                ApiCall::Update { payload, .. } => Some(payload.clone()),
                _ => None,
            })
            .collect()
    }

    /// Payloads of create calls.
    pub fn creates(&self) -> Vec<SubmissionPayload> {
        self.lock()
            .iter()
            .filter_map(|call| match call {
                ApiCall::Create(payload) => Some(payload.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn lookup_count(&self) -> u32 {
        self.lookup_count.load(Ordering::SeqCst)
    }

    fn record(&self, call: ApiCall) {
        self.lock().push(call);
    }

    fn lock(&self) -> MutexGuard<'_, Vec<ApiCall>> {
        self.calls.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Default for MockRecordApi {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RecordApi for MockRecordApi {
    async fn lookup_code(&self, seed: &str) -> Result<String, ApiError> {
        let n = self.lookup_count.fetch_add(1, Ordering::SeqCst) + 1;
        self.record(ApiCall::Lookup(seed.to_string()));

        if !self.lookup_delay.is_zero() {
            tokio::time::sleep(self.lookup_delay).await;
        }

        let prefix: String = seed
            .chars()
            .filter(char::is_ascii_alphanumeric)
            .take(4)
            .collect::<String>()
            .to_ascii_uppercase();
        if prefix.is_empty() {
            return Err(ApiError::rejected("Seed has no usable characters"));
        }
        Ok(format!("{}-{:03}", prefix, n))
    }

    async fn create_record(&self, payload: &SubmissionPayload) -> Result<CreatedRecord, ApiError> {
        self.record(ApiCall::Create(payload.clone()));
        if let Some(error) = &self.create_failure {
            return Err(error.clone());
        }
        Ok(CreatedRecord {
            id: uuid::Uuid::new_v4().to_string(),
            generated_fields: self.generated_fields.clone(),
        })
    }

    async fn update_record(&self, id: &str, payload: &SubmissionPayload) -> Result<(), ApiError> {
        self.record(ApiCall::Update {
            id: id.to_string(),
            payload: payload.clone(),
        });
        match &self.update_failure {
            Some(error) => Err(error.clone()),
            None => Ok(()),
        }
    }

    async fn delete_attachment(&self, id: &str, field: &FieldId) -> Result<(), ApiError> {
        self.record(ApiCall::DeleteAttachment {
            id: id.to_string(),
            field: field.clone(),
        });
        if self.failing_deletions.contains(field) {
            return Err(ApiError::Network(format!(
                "connection reset while deleting {}",
                field
            )));
        }
        Ok(())
    }
}
