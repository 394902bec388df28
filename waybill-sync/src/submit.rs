//! Submission coordinator.
//!
//! Submitting runs five steps in order: exhaustive validation, concurrent
//! deletion of staged attachments, payload assembly, the create or update
//! call, and finally the reset of local state. Any failure after
//! validation leaves the form exactly as the user left it.

use std::collections::BTreeMap;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use tracing::{error, info, warn};
use waybill::{
    AfterSave, Attachment, ErrorKind, ErrorMap, FieldId, FieldValue, Form, SubmitConfig,
    ValidationError,
};

use crate::api::{ApiError, RecordApi};
use crate::draft::DraftStore;
use crate::payload::SubmissionPayload;

/// Error types for a submit attempt.
#[derive(Debug, Clone, thiserror::Error)]
pub enum SubmitError {
    #[error("Form has {} blocking validation error(s)", .0.blocking_count())]
    Blocked(ErrorMap),

    #[error("A submission is already in flight")]
    InFlight,

    #[error("Submission failed: {0}")]
    Network(#[from] ApiError),
}

impl SubmitError {
    /// User-facing category, if the error maps to one.
    pub fn kind(&self) -> Option<ErrorKind> {
        match self {
            SubmitError::Network(_) => Some(ErrorKind::SubmissionNetwork),
            _ => None,
        }
    }
}

/// A staged attachment the backend did not delete.
#[derive(Debug, Clone, PartialEq)]
pub struct AttachmentFailure {
    pub field: FieldId,
    pub error: ApiError,
}

/// Outcome of the attachment deletion step.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DeletionReport {
    pub deleted: Vec<FieldId>,
    pub failed: Vec<AttachmentFailure>,
}

impl DeletionReport {
    /// Failed deletions as advisory errors for display.
    pub fn errors(&self) -> Vec<ValidationError> {
        self.failed
            .iter()
            .map(|failure| {
                ValidationError::advisory(
                    failure.field.clone(),
                    ErrorKind::AttachmentDeletion,
                    format!("Could not delete the existing file: {}", failure.error),
                )
            })
            .collect()
    }
}

/// Result of a successful submit.
#[derive(Debug, Clone, PartialEq)]
pub struct SubmitOutcome {
    pub record_id: String,
    /// True when a new record was created
    pub created: bool,
    pub deletions: DeletionReport,
    pub generated_fields: BTreeMap<FieldId, FieldValue>,
}

/// Drives submission against the backend.
pub struct SubmissionCoordinator {
    api: Arc<dyn RecordApi>,
    drafts: Arc<dyn DraftStore>,
    config: SubmitConfig,
    in_flight: AtomicBool,
}

impl SubmissionCoordinator {
    pub fn new(api: Arc<dyn RecordApi>, drafts: Arc<dyn DraftStore>, config: SubmitConfig) -> Self {
        Self {
            api,
            drafts,
            config,
            in_flight: AtomicBool::new(false),
        }
    }

    pub fn config(&self) -> &SubmitConfig {
        &self.config
    }

    /// True while a submit is awaiting the backend.
    pub fn in_flight(&self) -> bool {
        self.in_flight.load(Ordering::SeqCst)
    }

    /// Validate, reconcile deletions, and save the form.
    pub async fn submit(&self, form: &mut Form) -> Result<SubmitOutcome, SubmitError> {
        if self.in_flight.swap(true, Ordering::SeqCst) {
            return Err(SubmitError::InFlight);
        }
        let _guard = InFlightGuard(&self.in_flight);

        let errors = form.validate().clone();
        if errors.has_blocking() {
            info!(
                form_type = %form.form_type(),
                blocking = errors.blocking_count(),
                "Submission blocked by validation"
            );
            return Err(SubmitError::Blocked(errors));
        }

        let deletions = self.delete_staged(form).await;
        let payload = SubmissionPayload::assemble(form, deletions.deleted.clone());
        let timeout = self.config.request_timeout();

        let saved = match form.record_id() {
            Some(id) => {
                let id = id.to_string();
                let result = with_timeout(timeout, self.api.update_record(&id, &payload)).await;
                result.map(|()| (id, false, BTreeMap::new()))
            }
            None => with_timeout(timeout, self.api.create_record(&payload))
                .await
                .map(|created| (created.id, true, created.generated_fields)),
        };

        let (record_id, created, generated_fields) = match saved {
            Ok(saved) => saved,
            Err(e) => {
                error!(
                    form_type = %form.form_type(),
                    record_id = ?form.record_id(),
                    error = %e,
                    "Submission failed"
                );
                return Err(e.into());
            }
        };

        if let Err(e) = self.drafts.delete(form.form_type()).await {
            warn!(form_type = %form.form_type(), error = %e, "Failed to delete draft after submit");
        }

        match self.config.after_save {
            AfterSave::Fresh => form.clear(),
            AfterSave::PostSave => form.mark_saved(record_id.clone(), generated_fields.clone()),
        }

        info!(
            form_type = %form.form_type(),
            record_id = %record_id,
            created,
            deleted = deletions.deleted.len(),
            failed_deletions = deletions.failed.len(),
            "Submission saved"
        );

        Ok(SubmitOutcome {
            record_id,
            created,
            deletions,
            generated_fields,
        })
    }

    /// Delete every staged attachment concurrently.
    ///
    /// Each deletion stands alone: a failure is logged and reported but
    /// neither stops the others nor the save that follows. Fields whose
    /// deletion succeeded are unstaged, and cleared unless the user picked
    /// a replacement file.
    async fn delete_staged(&self, form: &mut Form) -> DeletionReport {
        let mut report = DeletionReport::default();
        let Some(record_id) = form.record_id().map(str::to_string) else {
            return report;
        };
        let staged: Vec<FieldId> = form.staged_deletions().iter().cloned().collect();
        if staged.is_empty() {
            return report;
        }

        let timeout = self.config.request_timeout();
        let results = join_all(staged.iter().map(|field| {
            with_timeout(timeout, self.api.delete_attachment(&record_id, field))
        }))
        .await;

        for (field, result) in staged.into_iter().zip(results) {
            match result {
                Ok(()) => {
                    form.unstage_deletion(field.as_str());
                    // A pending replacement stays and is uploaded with the update
                    let still_stored = matches!(
                        form.get(field.as_str()).as_attachment(),
                        Some(Attachment::Stored(_))
                    );
                    if still_stored {
                        if let Err(e) = form.set(field.as_str(), FieldValue::Blank) {
                            warn!(field = %field, error = %e, "Could not clear deleted attachment");
                        }
                    }
                    report.deleted.push(field);
                }
                Err(error) => {
                    warn!(
                        record_id = %record_id,
                        field = %field,
                        error = %error,
                        "Attachment deletion failed, continuing"
                    );
                    report.failed.push(AttachmentFailure { field, error });
                }
            }
        }
        report
    }
}

struct InFlightGuard<'a>(&'a AtomicBool);

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

async fn with_timeout<T>(
    timeout: Duration,
    call: impl Future<Output = Result<T, ApiError>>,
) -> Result<T, ApiError> {
    match tokio::time::timeout(timeout, call).await {
        Ok(result) => result,
        Err(_) => Err(ApiError::Timeout(timeout.as_millis() as u64)),
    }
}
