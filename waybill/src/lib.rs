//! Waybill - derived-field and validation engine for back-office forms
//!
//! Keeps a network of typed form fields consistent while the user edits in
//! any order:
//!
//! - **Typed values**: one explicit blank, parsing at the input boundary
//! - **Dependency graph**: derived fields declared once, evaluated in
//!   topological order, blanks propagate instead of becoming zero
//! - **Time checkpoints**: ordering of the six trip checkpoints
//! - **Validation**: field and cross-field rules, advisory or blocking
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────┐
//! │                        Form                          │
//! │                                                      │
//! │  set ──▶ FieldStore ──▶ RecomputeEngine ──▶ ErrorMap │
//! │              │               │                 ▲     │
//! │              │        DependencyGraph          │     │
//! │              └──────▶ ValidationEngine ────────┘     │
//! │                       (rules + timeline)             │
//! └──────────────────────────────────────────────────────┘
//! ```
//!
//! Async concerns (drafts, lookups, submission) live in `waybill-sync`.

pub mod config;
pub mod form;
pub mod graph;
pub mod recompute;
pub mod schemas;
pub mod store;
pub mod timeline;
pub mod types;
pub mod validation;
pub mod value;

// Re-export main types
pub use config::{
    AfterSave, CustomerConfig, DraftConfig, LookupConfig, SubmitConfig, TransactionConfig,
    WaybillConfig,
};
pub use form::{FieldSpec, Form, FormSchema, FormSchemaBuilder, LookupBinding, SchemaError};
pub use graph::{DependencyGraph, DerivedFieldSpec, Formula, GraphError, NullPolicy, Rounding};
pub use recompute::{RecomputeEngine, RecomputeReport};
pub use store::{FieldSnapshot, FieldStore, StoreError};
pub use timeline::{TimeCheckpointSpec, TimeSequenceValidator, TimelineError};
pub use types::*;
pub use validation::{Check, Condition, Rule, ValidationEngine};
pub use value::{
    Attachment, ClockTime, FieldId, FieldKind, FieldValue, Members, ParseError, PendingFile,
    StoredFile,
};
