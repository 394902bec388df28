//! An open form wired to its async edges.

use std::sync::Arc;

use futures::future::select_all;
use tracing::{debug, info, warn};
use waybill::{FieldId, FieldValue, Form, StoreError, WaybillConfig};

use crate::api::RecordApi;
use crate::draft::{DraftAutosaver, DraftError, DraftStore};
use crate::lookup::CodeLookup;
use crate::submit::{SubmissionCoordinator, SubmitError, SubmitOutcome};

/// One form plus its draft autosaver, code lookups and submitter.
///
/// Every edit goes through the session so that a draft save is scheduled
/// and lookups whose seeds changed are restarted.
pub struct FormSession {
    form: Form,
    autosaver: DraftAutosaver,
    lookups: Vec<CodeLookup>,
    coordinator: SubmissionCoordinator,
}

impl FormSession {
    /// Open a session, applying the stored draft if it belongs to this form.
    ///
    /// A draft saved while editing another record (or while creating, when
    /// this form edits) is left alone.
    pub async fn mount(
        mut form: Form,
        api: Arc<dyn RecordApi>,
        drafts: Arc<dyn DraftStore>,
        config: &WaybillConfig,
    ) -> Result<Self, DraftError> {
        let autosaver = DraftAutosaver::new(
            drafts.clone(),
            form.form_type().clone(),
            config.drafts.quiet_period(),
        );

        match autosaver.restore().await? {
            Some(draft) if draft.state.record_id.as_deref() == form.record_id() => {
                match form.restore(draft.state) {
                    Ok(skipped) if !skipped.is_empty() => {
                        warn!(
                            form_type = %form.form_type(),
                            skipped = ?skipped,
                            "Draft entries no longer fit the form"
                        );
                    }
                    Ok(_) => {}
                    Err(e) => warn!(form_type = %form.form_type(), error = %e, "Could not apply draft"),
                }
            }
            Some(draft) => {
                debug!(
                    form_type = %form.form_type(),
                    draft_record = ?draft.state.record_id,
                    "Draft belongs to another record, not applied"
                );
            }
            None => {}
        }

        let lookups = form
            .schema()
            .lookups()
            .iter()
            .map(|binding| {
                CodeLookup::new(
                    api.clone(),
                    binding.clone(),
                    config.lookup.debounce(),
                    config.submit.request_timeout(),
                )
            })
            .collect();
        let coordinator = SubmissionCoordinator::new(api, drafts, config.submit.clone());

        info!(
            form_type = %form.form_type(),
            record_id = ?form.record_id(),
            "Form session mounted"
        );
        Ok(Self {
            form,
            autosaver,
            lookups,
            coordinator,
        })
    }

    pub fn form(&self) -> &Form {
        &self.form
    }

    pub fn autosaver(&self) -> &DraftAutosaver {
        &self.autosaver
    }

    pub fn coordinator(&self) -> &SubmissionCoordinator {
        &self.coordinator
    }

    pub fn into_form(self) -> Form {
        self.form
    }

    /// Write a typed value.
    pub fn edit(&mut self, id: &str, value: FieldValue) -> Result<Vec<FieldId>, StoreError> {
        let changed = self.form.set(id, value)?;
        self.after_change(&changed);
        Ok(changed)
    }

    /// Write raw input text.
    pub fn edit_input(&mut self, id: &str, raw: &str) -> Result<Vec<FieldId>, StoreError> {
        let changed = self.form.set_input(id, raw)?;
        self.after_change(&changed);
        Ok(changed)
    }

    pub fn touch(&mut self, id: &str) -> Result<(), StoreError> {
        let first = !self.form.store().is_touched(id);
        self.form.touch(id)?;
        if first {
            self.autosaver.schedule(self.form.state());
        }
        Ok(())
    }

    pub fn stage_deletion(&mut self, id: &str) -> Result<bool, StoreError> {
        let staged = self.form.stage_deletion(id)?;
        if staged {
            self.autosaver.schedule(self.form.state());
        }
        Ok(staged)
    }

    pub fn unstage_deletion(&mut self, id: &str) -> bool {
        let removed = self.form.unstage_deletion(id);
        if removed {
            self.autosaver.schedule(self.form.state());
        }
        removed
    }

    /// Wait for the next lookup response and apply it.
    ///
    /// Returns `Ok(None)` when the form has no lookups.
    pub async fn next_lookup(&mut self) -> Result<Option<Vec<FieldId>>, StoreError> {
        if self.lookups.is_empty() {
            return Ok(None);
        }
        let outcome = select_all(self.lookups.iter_mut().map(|lookup| Box::pin(lookup.next())))
            .await
            .0;
        let Some(outcome) = outcome else {
            return Ok(None);
        };

        let changed = outcome.apply(&mut self.form)?;
        self.after_change(&changed);
        Ok(Some(changed))
    }

    /// Save the current state as a draft right away.
    pub async fn save_draft(&self) -> Result<(), DraftError> {
        self.autosaver.flush(self.form.state()).await
    }

    /// Submit the form.
    ///
    /// A failed submit keeps the form and reschedules its draft.
    pub async fn submit(&mut self) -> Result<SubmitOutcome, SubmitError> {
        self.autosaver.cancel();
        let result = self.coordinator.submit(&mut self.form).await;
        match &result {
            Ok(_) => {
                for lookup in &self.lookups {
                    lookup.cancel();
                }
            }
            Err(_) if self.form.is_dirty() => self.autosaver.schedule(self.form.state()),
            Err(_) => {}
        }
        result
    }

    /// Throw away the draft and start over with an empty form.
    pub async fn discard(&mut self) -> Result<(), DraftError> {
        for lookup in &self.lookups {
            lookup.cancel();
        }
        self.autosaver.discard().await?;
        self.form.clear();
        Ok(())
    }

    fn after_change(&mut self, changed: &[FieldId]) {
        if changed.is_empty() {
            return;
        }
        self.autosaver.schedule(self.form.state());
        for lookup in &self.lookups {
            if lookup.is_triggered_by(changed) {
                lookup.request_from(&self.form);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::api::MockRecordApi;
    use crate::draft::MemoryDraftStore;
    use waybill::schemas::customer::fields::*;
    use waybill::{schemas, FormSchema};

    fn config() -> WaybillConfig {
        let mut config = WaybillConfig::default();
        config.drafts.quiet_period_ms = 30;
        config.lookup.debounce_ms = 20;
        config
    }

    fn schema() -> Arc<FormSchema> {
        Arc::new(schemas::customer(&config().customer).unwrap())
    }

    #[tokio::test]
    async fn test_name_edits_fill_customer_code() {
        let api = Arc::new(MockRecordApi::new());
        let mut session = FormSession::mount(
            Form::new(schema()),
            api.clone(),
            Arc::new(MemoryDraftStore::new()),
            &config(),
        )
        .await
        .unwrap();

        session.edit_input(CUSTOMER_NAME, "Ac").unwrap();
        session.edit_input(CUSTOMER_NAME, "Acme Freight").unwrap();

        let changed = tokio::time::timeout(Duration::from_secs(1), session.next_lookup())
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert_eq!(changed, vec![FieldId::from(CUSTOMER_CODE)]);
        assert_eq!(session.form().get(CUSTOMER_CODE).as_text(), Some("ACME-001"));
        assert_eq!(api.lookup_count(), 1);
    }

    #[tokio::test]
    async fn test_draft_restored_on_remount() {
        let drafts = Arc::new(MemoryDraftStore::new());
        let api = Arc::new(MockRecordApi::new());

        let mut session =
            FormSession::mount(Form::new(schema()), api.clone(), drafts.clone(), &config())
                .await
                .unwrap();
        session.edit_input(MOBILE, "98765").unwrap();
        session.touch(MOBILE).unwrap();
        tokio::time::sleep(Duration::from_millis(120)).await;
        assert_eq!(session.autosaver().save_count(), 1);
        drop(session);

        let session = FormSession::mount(Form::new(schema()), api, drafts, &config())
            .await
            .unwrap();
        assert_eq!(session.form().get(MOBILE).as_text(), Some("98765"));
        assert!(session.form().store().is_touched(MOBILE));
        // Touched fields are revalidated on restore
        assert!(!session.form().errors().for_field(MOBILE).is_empty());
    }

    #[tokio::test]
    async fn test_draft_of_new_form_ignored_when_editing() {
        let drafts = Arc::new(MemoryDraftStore::new());
        let api = Arc::new(MockRecordApi::new());

        let mut session =
            FormSession::mount(Form::new(schema()), api.clone(), drafts.clone(), &config())
                .await
                .unwrap();
        session.edit_input(CUSTOMER_NAME, "Draft Name").unwrap();
        session.save_draft().await.unwrap();

        let editing = Form::edit(
            schema(),
            "cust-3",
            [(FieldId::from(CUSTOMER_NAME), FieldValue::text("Saved Name"))],
        )
        .unwrap();
        let session = FormSession::mount(editing, api, drafts.clone(), &config())
            .await
            .unwrap();
        assert_eq!(session.form().get(CUSTOMER_NAME).as_text(), Some("Saved Name"));
        assert_eq!(drafts.len(), 1);
    }

    #[tokio::test]
    async fn test_discard_clears_draft_and_form() {
        let drafts = Arc::new(MemoryDraftStore::new());
        let mut session = FormSession::mount(
            Form::new(schema()),
            Arc::new(MockRecordApi::new()),
            drafts.clone(),
            &config(),
        )
        .await
        .unwrap();
        session.edit_input(EMAIL, "ops@acme.in").unwrap();
        session.save_draft().await.unwrap();

        session.discard().await.unwrap();
        assert!(drafts.is_empty());
        assert!(session.form().get(EMAIL).is_blank());
    }
}
