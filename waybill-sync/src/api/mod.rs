//! Backend API abstraction.
//!
//! - `RecordApi` trait for the persistence backend
//! - Mock implementation for testing

pub mod mock;
pub mod traits;

pub use mock::{ApiCall, MockRecordApi};
pub use traits::{ApiError, CreatedRecord, RecordApi};
