//! Customer master form.

use crate::config::CustomerConfig;
use crate::form::{FormSchema, SchemaError};
use crate::validation::{Condition, Rule};
use crate::value::{FieldId, FieldKind};

use super::CUSTOMER;

/// Field ids of the customer form.
pub mod fields {
    pub const CUSTOMER_NAME: &str = "customer_name";
    pub const CUSTOMER_CODE: &str = "customer_code";
    pub const CUSTOMER_TYPE: &str = "customer_type";
    pub const CONTACT_PERSON: &str = "contact_person";
    pub const MOBILE: &str = "mobile";
    pub const ALTERNATE_MOBILE: &str = "alternate_mobile";
    pub const EMAIL: &str = "email";

    pub const GST_REGISTERED: &str = "gst_registered";
    pub const GST_NUMBER: &str = "gst_number";
    pub const GST_CERTIFICATE: &str = "gst_certificate";
    pub const PAN_NUMBER: &str = "pan_number";
    pub const PAN_CARD: &str = "pan_card";
    pub const AADHAR_NUMBER: &str = "aadhar_number";

    pub const BILLING_ADDRESS: &str = "billing_address";
    pub const ADDITIONAL_CONTACTS: &str = "additional_contacts";
    pub const CREDIT_DAYS: &str = "credit_days";

    pub const AGREEMENT_AVAILABLE: &str = "agreement_available";
    pub const AGREEMENT_START: &str = "agreement_start";
    pub const AGREEMENT_EXPIRY: &str = "agreement_expiry";
    pub const AGREEMENT_COPY: &str = "agreement_copy";

    /// Members of `billing_address`
    pub mod address {
        pub const LINE1: &str = "line1";
        pub const LINE2: &str = "line2";
        pub const CITY: &str = "city";
        pub const STATE: &str = "state";
        pub const PINCODE: &str = "pincode";
    }

    /// Members of each `additional_contacts` entry
    pub mod contact {
        pub const NAME: &str = "name";
        pub const MOBILE: &str = "mobile";
        pub const EMAIL: &str = "email";
        pub const DESIGNATION: &str = "designation";
    }
}

use fields::*;

/// PAN: five letters, four digits, one letter.
pub const PAN_MASK: &str = "AAAAA9999A";
/// GSTIN: state code, PAN, entity number, `Z`, check character.
pub const GSTIN_MASK: &str = "99AAAAA9999A*Z*";

fn rules(config: &CustomerConfig) -> Vec<Rule> {
    let agreement = || Condition::IsTrue(FieldId::from(AGREEMENT_AVAILABLE));
    let gst = || Condition::IsTrue(FieldId::from(GST_REGISTERED));

    vec![
        Rule::required(CUSTOMER_NAME),
        Rule::required(CUSTOMER_TYPE),
        Rule::one_of(CUSTOMER_TYPE, ["Corporate", "Individual"]),
        Rule::required(MOBILE),
        Rule::digits(MOBILE, 10),
        Rule::digits(ALTERNATE_MOBILE, 10),
        Rule::email(EMAIL),
        Rule::required_if(GST_NUMBER, gst()),
        Rule::shape(GST_NUMBER, GSTIN_MASK),
        Rule::required_if(GST_CERTIFICATE, gst()),
        Rule::shape(PAN_NUMBER, PAN_MASK),
        Rule::digits(AADHAR_NUMBER, 12),
        Rule::required(BILLING_ADDRESS).on_member(address::LINE1),
        Rule::required(BILLING_ADDRESS).on_member(address::CITY),
        Rule::digits(BILLING_ADDRESS, 6).on_member(address::PINCODE),
        Rule::digits(ADDITIONAL_CONTACTS, 10).on_member(contact::MOBILE),
        Rule::email(ADDITIONAL_CONTACTS).on_member(contact::EMAIL),
        Rule::unique(
            ADDITIONAL_CONTACTS,
            [contact::NAME, contact::MOBILE, contact::EMAIL],
        )
        .with_message("Duplicate contact: same name, mobile and email as an earlier entry"),
        Rule::min(CREDIT_DAYS, 0.0),
        Rule::max(CREDIT_DAYS, f64::from(config.max_credit_days)),
        Rule::required_if(AGREEMENT_START, agreement()),
        Rule::required_if(AGREEMENT_EXPIRY, agreement()),
        Rule::required_if(AGREEMENT_COPY, agreement()),
        Rule::after(AGREEMENT_EXPIRY, AGREEMENT_START),
    ]
}

/// Build the customer schema. The customer code is generated from the name.
pub fn customer(config: &CustomerConfig) -> Result<FormSchema, SchemaError> {
    FormSchema::builder(CUSTOMER)
        .field(CUSTOMER_NAME, FieldKind::Text, "Customer Name")
        .field(CUSTOMER_CODE, FieldKind::Text, "Customer Code")
        .field(CUSTOMER_TYPE, FieldKind::Text, "Customer Type")
        .field(CONTACT_PERSON, FieldKind::Text, "Contact Person")
        .field(MOBILE, FieldKind::Text, "Mobile")
        .field(ALTERNATE_MOBILE, FieldKind::Text, "Alternate Mobile")
        .field(EMAIL, FieldKind::Text, "Email")
        .field(GST_REGISTERED, FieldKind::Flag, "GST Registered")
        .field(GST_NUMBER, FieldKind::Text, "GST Number")
        .field(GST_CERTIFICATE, FieldKind::File, "GST Certificate")
        .field(PAN_NUMBER, FieldKind::Text, "PAN Number")
        .field(PAN_CARD, FieldKind::File, "PAN Card")
        .field(AADHAR_NUMBER, FieldKind::Text, "Aadhar Number")
        .field(BILLING_ADDRESS, FieldKind::Group, "Billing Address")
        .field(ADDITIONAL_CONTACTS, FieldKind::List, "Additional Contact")
        .field(CREDIT_DAYS, FieldKind::Number, "Credit Days")
        .field(AGREEMENT_AVAILABLE, FieldKind::Flag, "Agreement Available")
        .field(AGREEMENT_START, FieldKind::Date, "Agreement Start Date")
        .field(AGREEMENT_EXPIRY, FieldKind::Date, "Agreement Expiry Date")
        .field(AGREEMENT_COPY, FieldKind::File, "Agreement Copy")
        .rules(rules(config))
        .lookup([CUSTOMER_NAME], CUSTOMER_CODE)
        .build()
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::form::Form;
    use crate::types::ErrorKind;
    use crate::value::{FieldValue, Members};

    fn form() -> Form {
        Form::new(Arc::new(customer(&CustomerConfig::default()).unwrap()))
    }

    fn contact_entry(name: &str, mobile: &str, email: &str) -> Members {
        [
            (contact::NAME, name),
            (contact::MOBILE, mobile),
            (contact::EMAIL, email),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), FieldValue::text(v)))
        .collect()
    }

    #[test]
    fn test_agreement_dates() {
        let mut form = form();
        let errors = form.validate().clone();
        assert!(errors.for_field(AGREEMENT_EXPIRY).is_empty());

        form.set(AGREEMENT_AVAILABLE, FieldValue::Flag(true)).unwrap();
        assert_eq!(
            form.errors().for_field(AGREEMENT_EXPIRY)[0].kind,
            ErrorKind::Required
        );
        assert_eq!(
            form.errors().for_field(AGREEMENT_COPY)[0].kind,
            ErrorKind::Required
        );

        form.set_input(AGREEMENT_START, "01-04-2024").unwrap();
        form.set_input(AGREEMENT_EXPIRY, "31/03/2024").unwrap();
        let expiry = form.errors().for_field(AGREEMENT_EXPIRY);
        assert_eq!(expiry.len(), 1);
        assert_eq!(expiry[0].kind, ErrorKind::CrossFieldOrder);

        // Moving the start date clears the order error on the expiry date
        form.set_input(AGREEMENT_START, "2023-04-01").unwrap();
        assert!(form.errors().for_field(AGREEMENT_EXPIRY).is_empty());
    }

    #[test]
    fn test_identity_formats() {
        let mut form = form();
        form.set(PAN_NUMBER, FieldValue::text("ABCDE1234F")).unwrap();
        form.set(GST_NUMBER, FieldValue::text("29ABCDE1234F1Z5")).unwrap();
        form.set(AADHAR_NUMBER, FieldValue::text("1234 5678 9012")).unwrap();

        assert!(form.errors().for_field(PAN_NUMBER).is_empty());
        assert!(form.errors().for_field(GST_NUMBER).is_empty());
        assert_eq!(
            form.errors().for_field(AADHAR_NUMBER)[0].kind,
            ErrorKind::Format
        );
    }

    #[test]
    fn test_address_member_errors() {
        let mut form = form();
        form.set(
            BILLING_ADDRESS,
            FieldValue::group([
                (address::LINE1, FieldValue::text("14 Ring Road")),
                (address::PINCODE, FieldValue::text("5600")),
            ]),
        )
        .unwrap();

        let errors = form.errors();
        assert!(errors.for_field("billing_address.line1").is_empty());
        assert_eq!(
            errors.for_field("billing_address.city")[0].kind,
            ErrorKind::Required
        );
        assert_eq!(
            errors.for_field("billing_address.pincode")[0].kind,
            ErrorKind::Format
        );
    }

    #[test]
    fn test_duplicate_contacts() {
        let mut form = form();
        form.set(
            ADDITIONAL_CONTACTS,
            FieldValue::List(vec![
                contact_entry("Meera", "9845012345", "meera@acme.in"),
                contact_entry("", "", ""),
                contact_entry("Meera", "9845012345", "meera@acme.in"),
                contact_entry("", "", ""),
            ]),
        )
        .unwrap();

        let duplicates: Vec<_> = form
            .errors()
            .iter()
            .filter(|e| e.kind == ErrorKind::Duplicate)
            .collect();
        assert_eq!(duplicates.len(), 1);
        assert_eq!(duplicates[0].field.as_str(), "additional_contacts[2]");
    }

    #[test]
    fn test_credit_days_bound_comes_from_config() {
        let schema = customer(&CustomerConfig { max_credit_days: 45 }).unwrap();
        let mut form = Form::new(Arc::new(schema));
        form.set(CREDIT_DAYS, FieldValue::Number(60.0)).unwrap();
        assert_eq!(form.errors().for_field(CREDIT_DAYS)[0].kind, ErrorKind::Range);
    }

    #[test]
    fn test_code_lookup_binding() {
        let schema = customer(&CustomerConfig::default()).unwrap();
        let binding = &schema.lookups()[0];
        assert_eq!(binding.target.as_str(), CUSTOMER_CODE);

        let mut form = Form::new(Arc::new(schema.clone()));
        assert_eq!(binding.seed(form.store()), None);
        form.set(CUSTOMER_NAME, FieldValue::text("Acme Logistics")).unwrap();
        assert_eq!(binding.seed(form.store()).as_deref(), Some("Acme Logistics"));
    }
}
