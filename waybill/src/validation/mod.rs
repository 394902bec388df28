//! Field-level and cross-field validation.
//!
//! Rules are plain data evaluated against a [`FieldStore`](crate::store::FieldStore).
//! The [`ValidationEngine`] decides which rules a change can affect and
//! replaces the errors for exactly those fields.

mod engine;
mod rules;

pub use engine::ValidationEngine;
pub use rules::{Check, Condition, Labels, Rule};

/// `billing_address` -> `Billing address`
pub(crate) fn humanize(id: &str) -> String {
    let spaced = id.replace('_', " ");
    let mut chars = spaced.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_humanize() {
        assert_eq!(humanize("billing_address"), "Billing address");
        assert_eq!(humanize("pan"), "Pan");
        assert_eq!(humanize(""), "");
    }
}
