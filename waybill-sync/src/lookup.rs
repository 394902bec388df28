//! Debounced, cancelable code lookup.
//!
//! A [`CodeLookup`] watches the seed fields of one [`LookupBinding`]. Each
//! seed change bumps a generation counter and restarts the debounce; a
//! response carrying an older generation is dropped before it can reach
//! the form.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};
use waybill::{FieldId, FieldValue, Form, LookupBinding, StoreError};

use crate::api::{ApiError, RecordApi};

/// A resolved lookup, ready to be applied to the form that requested it.
#[derive(Debug, Clone, PartialEq)]
pub struct LookupOutcome {
    pub generation: u64,
    pub target: FieldId,
    pub seed: String,
    pub result: Result<String, ApiError>,
}

impl LookupOutcome {
    /// Write the generated code into the target field.
    ///
    /// A failed lookup leaves the form untouched.
    pub fn apply(self, form: &mut Form) -> Result<Vec<FieldId>, StoreError> {
        match self.result {
            Ok(code) => form.set(self.target.as_str(), FieldValue::text(code)),
            Err(e) => {
                warn!(target_field = %self.target, seed = %self.seed, error = %e, "Code lookup failed");
                Ok(Vec::new())
            }
        }
    }
}

/// Lookup driver for one binding.
pub struct CodeLookup {
    api: Arc<dyn RecordApi>,
    binding: LookupBinding,
    debounce: Duration,
    timeout: Duration,
    generation: Arc<AtomicU64>,
    pending: Mutex<Option<JoinHandle<()>>>,
    tx: mpsc::UnboundedSender<LookupOutcome>,
    rx: mpsc::UnboundedReceiver<LookupOutcome>,
}

impl CodeLookup {
    pub fn new(
        api: Arc<dyn RecordApi>,
        binding: LookupBinding,
        debounce: Duration,
        timeout: Duration,
    ) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            api,
            binding,
            debounce,
            timeout,
            generation: Arc::new(AtomicU64::new(0)),
            pending: Mutex::new(None),
            tx,
            rx,
        }
    }

    pub fn binding(&self) -> &LookupBinding {
        &self.binding
    }

    /// True if any of `changed` is a seed of this lookup.
    pub fn is_triggered_by(&self, changed: &[FieldId]) -> bool {
        changed.iter().any(|id| self.binding.seeds.contains(id))
    }

    /// Start a lookup for `seed`, superseding any earlier request.
    ///
    /// `None` only cancels. Returns the generation of the new request.
    pub fn request(&self, seed: Option<String>) -> u64 {
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let mut pending = self.pending();
        if let Some(previous) = pending.take() {
            previous.abort();
        }

        let Some(seed) = seed else {
            debug!(target_field = %self.binding.target, generation, "Lookup cancelled");
            return generation;
        };

        let api = self.api.clone();
        let current = self.generation.clone();
        let tx = self.tx.clone();
        let target = self.binding.target.clone();
        let debounce = self.debounce;
        let timeout = self.timeout;

        *pending = Some(tokio::spawn(async move {
            tokio::time::sleep(debounce).await;
            if current.load(Ordering::SeqCst) != generation {
                return;
            }

            debug!(target_field = %target, seed = %seed, generation, "Sending code lookup");
            let result = match tokio::time::timeout(timeout, api.lookup_code(&seed)).await {
                Ok(result) => result,
                Err(_) => Err(ApiError::Timeout(timeout.as_millis() as u64)),
            };

            if current.load(Ordering::SeqCst) != generation {
                warn!(target_field = %target, seed = %seed, generation, "Discarding stale lookup response");
                return;
            }
            let _ = tx.send(LookupOutcome {
                generation,
                target,
                seed,
                result,
            });
        }));
        generation
    }

    /// Start a lookup from the form's current seed values.
    pub fn request_from(&self, form: &Form) -> u64 {
        self.request(self.binding.seed(form.store()))
    }

    /// Drop any outstanding request.
    pub fn cancel(&self) {
        self.request(None);
    }

    /// True if `generation` is the latest request.
    pub fn is_current(&self, generation: u64) -> bool {
        self.generation.load(Ordering::SeqCst) == generation
    }

    /// Wait for the next response to the latest request.
    pub async fn next(&mut self) -> Option<LookupOutcome> {
        while let Some(outcome) = self.rx.recv().await {
            if self.is_current(outcome.generation) {
                return Some(outcome);
            }
            warn!(target_field = %outcome.target, generation = outcome.generation, "Discarding stale lookup response");
        }
        None
    }

    /// A response to the latest request, if one has already arrived.
    pub fn try_next(&mut self) -> Option<LookupOutcome> {
        while let Ok(outcome) = self.rx.try_recv() {
            if self.is_current(outcome.generation) {
                return Some(outcome);
            }
        }
        None
    }

    fn pending(&self) -> MutexGuard<'_, Option<JoinHandle<()>>> {
        self.pending
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Drop for CodeLookup {
    fn drop(&mut self) {
        if let Some(handle) = self.pending().take() {
            handle.abort();
        }
    }
}
