//! Built-in form schemas.

pub mod customer;
pub mod transaction;

pub use customer::customer;
pub use transaction::vehicle_transaction;

/// Form type of the vehicle transaction form.
pub const VEHICLE_TRANSACTION: &str = "vehicle_transaction";

/// Form type of the customer master form.
pub const CUSTOMER: &str = "customer";
