//! Waybill Sync - async edges of the waybill form engine
//!
//! Everything in the `waybill` crate is synchronous and owned by one form.
//! This crate adds the parts that wait on timers or the backend:
//!
//! - **Drafts**: debounced autosave to a per-form-type slot, restored at mount
//! - **Lookups**: debounced code generation with stale responses discarded
//! - **Submission**: validation gate, concurrent attachment deletion,
//!   multi-part payload, create or update
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │                       FormSession                        │
//! │                                                          │
//! │  edit ──▶ Form ──┬──▶ DraftAutosaver ──▶ DraftStore      │
//! │                  │                                       │
//! │                  ├──▶ CodeLookup ──────▶ RecordApi       │
//! │                  │        ▲                  │           │
//! │                  │        └──── outcome ◀────┘           │
//! │                  │                                       │
//! │  submit ─────────┴──▶ SubmissionCoordinator ─▶ RecordApi │
//! └──────────────────────────────────────────────────────────┘
//! ```

pub mod api;
pub mod draft;
pub mod lookup;
pub mod payload;
pub mod session;
pub mod submit;

// Re-export main types
pub use api::{ApiCall, ApiError, CreatedRecord, MockRecordApi, RecordApi};
pub use draft::{
    open_store, Draft, DraftAutosaver, DraftError, DraftStore, FileDraftStore, MemoryDraftStore,
};
pub use lookup::{CodeLookup, LookupOutcome};
pub use payload::{Part, SubmissionPayload};
pub use session::FormSession;
pub use submit::{
    AttachmentFailure, DeletionReport, SubmissionCoordinator, SubmitError, SubmitOutcome,
};
