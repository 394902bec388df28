//! Quiet-period draft writer.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use waybill::{FormState, FormType};

use super::{Draft, DraftError, DraftStore};

/// Writes a form's state to its draft slot once edits go quiet.
///
/// Every [`schedule`](Self::schedule) restarts the quiet period, so a burst
/// of edits produces a single write carrying the last state.
pub struct DraftAutosaver {
    store: Arc<dyn DraftStore>,
    form_type: FormType,
    quiet_period: Duration,
    pending: Mutex<Option<JoinHandle<()>>>,
    saves: Arc<AtomicU64>,
}

impl DraftAutosaver {
    pub fn new(store: Arc<dyn DraftStore>, form_type: FormType, quiet_period: Duration) -> Self {
        Self {
            store,
            form_type,
            quiet_period,
            pending: Mutex::new(None),
            saves: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn form_type(&self) -> &FormType {
        &self.form_type
    }

    pub fn quiet_period(&self) -> Duration {
        self.quiet_period
    }

    /// Schedule a write of `state`, replacing any write still waiting.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn schedule(&self, state: FormState) {
        let store = self.store.clone();
        let saves = self.saves.clone();
        let quiet_period = self.quiet_period;

        let handle = tokio::spawn(async move {
            tokio::time::sleep(quiet_period).await;
            let form_type = state.form_type.clone();
            match save(store.as_ref(), state).await {
                Ok(()) => {
                    saves.fetch_add(1, Ordering::SeqCst);
                    debug!(form_type = %form_type, "Draft saved");
                }
                Err(e) => warn!(form_type = %form_type, error = %e, "Draft save failed"),
            }
        });

        if let Some(previous) = self.pending().replace(handle) {
            previous.abort();
        }
    }

    /// Drop the waiting write, if any.
    pub fn cancel(&self) {
        if let Some(handle) = self.pending().take() {
            handle.abort();
        }
    }

    /// True while a scheduled write has not yet finished.
    pub fn is_pending(&self) -> bool {
        self.pending()
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }

    /// Write `state` now, superseding any waiting write.
    pub async fn flush(&self, state: FormState) -> Result<(), DraftError> {
        self.cancel();
        save(self.store.as_ref(), state).await?;
        self.saves.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    /// Number of drafts written by this autosaver.
    pub fn save_count(&self) -> u64 {
        self.saves.load(Ordering::SeqCst)
    }

    /// Load the draft for this form type.
    ///
    /// A slot that cannot be decoded or fails its checksum is deleted and
    /// treated as empty. Storage I/O failures are returned.
    pub async fn restore(&self) -> Result<Option<Draft>, DraftError> {
        let draft = match self.store.load(&self.form_type).await {
            Ok(Some(draft)) => draft,
            Ok(None) => return Ok(None),
            Err(DraftError::Encoding(e)) => {
                warn!(form_type = %self.form_type, error = %e, "Discarding unreadable draft");
                self.store.delete(&self.form_type).await?;
                return Ok(None);
            }
            Err(e) => return Err(e),
        };

        if draft.form_type != self.form_type || !draft.verify() {
            let e = DraftError::Corrupt(self.form_type.clone());
            warn!(form_type = %self.form_type, error = %e, "Discarding draft");
            self.store.delete(&self.form_type).await?;
            return Ok(None);
        }

        info!(
            form_type = %self.form_type,
            saved_at = %draft.saved_at,
            "Restoring draft"
        );
        Ok(Some(draft))
    }

    /// Cancel any waiting write and delete the stored draft.
    pub async fn discard(&self) -> Result<(), DraftError> {
        self.cancel();
        self.store.delete(&self.form_type).await
    }

    fn pending(&self) -> MutexGuard<'_, Option<JoinHandle<()>>> {
        self.pending
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

async fn save(store: &dyn DraftStore, state: FormState) -> Result<(), DraftError> {
    let draft = Draft::capture(state)?;
    store.save(&draft).await
}
