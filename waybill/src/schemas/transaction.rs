//! Vehicle transaction form.
//!
//! Records one trip: vehicle and driver, odometer readings, the six time
//! checkpoints, freight and expenses. Freight depends on the transaction
//! category: Fixed and Replacement trips bill a contracted distance at a
//! fixed rate plus any excess at the extra rate; Adhoc trips bill every
//! kilometre at the adhoc rate.

use crate::config::TransactionConfig;
use crate::form::{FormSchema, SchemaError};
use crate::graph::{DerivedFieldSpec, Formula};
use crate::validation::{Condition, Rule};
use crate::value::{FieldId, FieldKind};

use super::VEHICLE_TRANSACTION;

/// Field ids of the vehicle transaction form.
pub mod fields {
    pub const TRANSACTION_TYPE: &str = "transaction_type";
    pub const TRANSACTION_DATE: &str = "transaction_date";
    pub const VEHICLE_NUMBER: &str = "vehicle_number";
    pub const REPLACED_VEHICLE_NUMBER: &str = "replaced_vehicle_number";
    pub const DRIVER_NAME: &str = "driver_name";
    pub const DRIVER_MOBILE: &str = "driver_mobile";
    pub const CUSTOMER_NAME: &str = "customer_name";
    pub const ROUTE: &str = "route";

    pub const OPENING_KM: &str = "opening_km";
    pub const CLOSING_KM: &str = "closing_km";
    pub const TOTAL_KM: &str = "total_km";

    pub const GARAGE_OUT_TIME: &str = "garage_out_time";
    pub const REPORTING_TIME: &str = "reporting_time";
    pub const DEPARTURE_TIME: &str = "departure_time";
    pub const ARRIVAL_TIME: &str = "arrival_time";
    pub const RELEASE_TIME: &str = "release_time";
    pub const GARAGE_IN_TIME: &str = "garage_in_time";

    pub const DUTY_HOURS: &str = "duty_hours";
    pub const WAITING_HOURS: &str = "waiting_hours";
    pub const TRANSIT_HOURS: &str = "transit_hours";

    pub const FIXED_KM: &str = "fixed_km";
    pub const FIXED_RATE: &str = "fixed_rate";
    pub const EXTRA_KM_RATE: &str = "extra_km_rate";
    pub const ADHOC_RATE: &str = "adhoc_rate";
    pub const TOTAL_FREIGHT: &str = "total_freight";

    pub const VENDOR_COST: &str = "vendor_cost";
    pub const TOLL_CHARGES: &str = "toll_charges";
    pub const PARKING_CHARGES: &str = "parking_charges";
    pub const DRIVER_ALLOWANCE: &str = "driver_allowance";
    pub const OTHER_CHARGES: &str = "other_charges";
    pub const TOTAL_EXPENSES: &str = "total_expenses";

    pub const MARGIN: &str = "margin";
    pub const MARGIN_PERCENTAGE: &str = "margin_percentage";
    pub const ADVANCE_PAID: &str = "advance_paid";
    pub const BALANCE_DUE: &str = "balance_due";

    pub const TRIP_SHEET: &str = "trip_sheet";
    pub const TOLL_RECEIPT: &str = "toll_receipt";
    pub const REMARKS: &str = "remarks";
}

use fields::*;

/// Transaction categories.
pub const CATEGORIES: [&str; 3] = ["Fixed", "Adhoc", "Replacement"];

const CHECKPOINTS: [(&str, &str); 6] = [
    (GARAGE_OUT_TIME, "Garage Out"),
    (REPORTING_TIME, "Reporting"),
    (DEPARTURE_TIME, "Departure"),
    (ARRIVAL_TIME, "Arrival"),
    (RELEASE_TIME, "Release"),
    (GARAGE_IN_TIME, "Garage In"),
];

const CHARGES: [&str; 5] = [
    VENDOR_COST,
    TOLL_CHARGES,
    PARKING_CHARGES,
    DRIVER_ALLOWANCE,
    OTHER_CHARGES,
];

fn id(name: &str) -> FieldId {
    FieldId::from(name)
}

fn clock_hours(start: &str, end: &str) -> Formula {
    Formula::ClockHours {
        start: id(start),
        end: id(end),
    }
}

fn difference(minuend: &str, subtrahend: &str) -> Formula {
    Formula::Difference {
        minuend: id(minuend),
        subtrahend: id(subtrahend),
    }
}

fn freight() -> Formula {
    Formula::ByCategory {
        selector: id(TRANSACTION_TYPE),
        arms: vec![(
            "Adhoc".to_string(),
            Formula::Product(vec![id(TOTAL_KM), id(ADHOC_RATE)]),
        )],
        fallback: Some(Box::new(Formula::Tiered {
            distance: id(TOTAL_KM),
            base_distance: id(FIXED_KM),
            base_rate: id(FIXED_RATE),
            excess_rate: id(EXTRA_KM_RATE),
        })),
    }
}

fn rules(config: &TransactionConfig) -> Vec<Rule> {
    let mut rules: Vec<Rule> = [
        TRANSACTION_TYPE,
        TRANSACTION_DATE,
        VEHICLE_NUMBER,
        DRIVER_NAME,
        CUSTOMER_NAME,
        OPENING_KM,
        CLOSING_KM,
    ]
    .into_iter()
    .chain(CHECKPOINTS.iter().map(|(checkpoint, _)| *checkpoint))
    .map(Rule::required)
    .collect();

    rules.push(Rule::one_of(TRANSACTION_TYPE, CATEGORIES));
    rules.push(Rule::digits(DRIVER_MOBILE, 10));

    for field in [OPENING_KM, CLOSING_KM, FIXED_KM, FIXED_RATE, EXTRA_KM_RATE, ADHOC_RATE, ADVANCE_PAID]
        .into_iter()
        .chain(CHARGES)
    {
        rules.push(Rule::min(field, 0.0));
    }
    rules.push(Rule::at_least(CLOSING_KM, OPENING_KM));

    let contracted = Condition::OneOf(id(TRANSACTION_TYPE), vec!["Fixed".into(), "Replacement".into()]);
    for field in [FIXED_KM, FIXED_RATE, EXTRA_KM_RATE] {
        rules.push(Rule::required_if(field, contracted.clone()));
    }
    rules.push(Rule::required_if(
        REPLACED_VEHICLE_NUMBER,
        Condition::Equals(id(TRANSACTION_TYPE), "Replacement".into()),
    ));
    rules.push(Rule::required_if(
        ADHOC_RATE,
        Condition::Equals(id(TRANSACTION_TYPE), "Adhoc".into()),
    ));

    rules.push(
        Rule::at_most(ADVANCE_PAID, TOTAL_FREIGHT)
            .with_message("Advance paid cannot exceed total freight"),
    );

    rules.push(
        Rule::min(MARGIN, 0.0)
            .advisory()
            .with_message("Margin is negative: expenses exceed freight"),
    );
    rules.push(
        Rule::max(DUTY_HOURS, config.max_duty_hours)
            .advisory()
            .with_message(format!(
                "Duty hours exceed {} hours",
                config.max_duty_hours
            )),
    );

    rules
}

/// Build the vehicle transaction schema.
pub fn vehicle_transaction(config: &TransactionConfig) -> Result<FormSchema, SchemaError> {
    let mut builder = FormSchema::builder(VEHICLE_TRANSACTION)
        .field(TRANSACTION_TYPE, FieldKind::Text, "Transaction Type")
        .field(TRANSACTION_DATE, FieldKind::Date, "Transaction Date")
        .field(VEHICLE_NUMBER, FieldKind::Text, "Vehicle Number")
        .field(REPLACED_VEHICLE_NUMBER, FieldKind::Text, "Replaced Vehicle Number")
        .field(DRIVER_NAME, FieldKind::Text, "Driver Name")
        .field(DRIVER_MOBILE, FieldKind::Text, "Driver Mobile")
        .field(CUSTOMER_NAME, FieldKind::Text, "Customer Name")
        .field(ROUTE, FieldKind::Text, "Route")
        .field(OPENING_KM, FieldKind::Number, "Opening KM")
        .field(CLOSING_KM, FieldKind::Number, "Closing KM")
        .derived(
            DerivedFieldSpec::new(TOTAL_KM, difference(CLOSING_KM, OPENING_KM)),
            "Total KM",
        );

    for (checkpoint, label) in CHECKPOINTS {
        builder = builder.checkpoint(checkpoint, label);
    }

    let builder = builder
        .derived(
            DerivedFieldSpec::new(DUTY_HOURS, clock_hours(GARAGE_OUT_TIME, GARAGE_IN_TIME)).in_cents(),
            "Duty Hours",
        )
        .derived(
            DerivedFieldSpec::new(WAITING_HOURS, clock_hours(REPORTING_TIME, DEPARTURE_TIME))
                .in_cents(),
            "Waiting Hours",
        )
        .derived(
            DerivedFieldSpec::new(TRANSIT_HOURS, clock_hours(DEPARTURE_TIME, ARRIVAL_TIME))
                .in_cents(),
            "Transit Hours",
        )
        .field(FIXED_KM, FieldKind::Number, "Fixed KM")
        .field(FIXED_RATE, FieldKind::Number, "Fixed Rate")
        .field(EXTRA_KM_RATE, FieldKind::Number, "Extra KM Rate")
        .field(ADHOC_RATE, FieldKind::Number, "Adhoc Rate")
        .derived(DerivedFieldSpec::new(TOTAL_FREIGHT, freight()).in_cents(), "Total Freight")
        .field(VENDOR_COST, FieldKind::Number, "Vendor Cost")
        .field(TOLL_CHARGES, FieldKind::Number, "Toll Charges")
        .field(PARKING_CHARGES, FieldKind::Number, "Parking Charges")
        .field(DRIVER_ALLOWANCE, FieldKind::Number, "Driver Allowance")
        .field(OTHER_CHARGES, FieldKind::Number, "Other Charges")
        .derived(
            DerivedFieldSpec::new(TOTAL_EXPENSES, Formula::Sum(CHARGES.map(id).to_vec()))
                .in_cents()
                .skip_blanks(),
            "Total Expenses",
        )
        .derived(
            DerivedFieldSpec::new(MARGIN, difference(TOTAL_FREIGHT, TOTAL_EXPENSES)).in_cents(),
            "Margin",
        )
        .derived(
            DerivedFieldSpec::new(
                MARGIN_PERCENTAGE,
                Formula::Percentage {
                    part: id(MARGIN),
                    whole: id(TOTAL_FREIGHT),
                },
            )
            .in_cents(),
            "Margin %",
        )
        .field(ADVANCE_PAID, FieldKind::Number, "Advance Paid")
        .derived(
            DerivedFieldSpec::new(BALANCE_DUE, difference(TOTAL_FREIGHT, ADVANCE_PAID)).in_cents(),
            "Balance Due",
        )
        .field(TRIP_SHEET, FieldKind::File, "Trip Sheet")
        .field(TOLL_RECEIPT, FieldKind::File, "Toll Receipt")
        .field(REMARKS, FieldKind::Text, "Remarks")
        .rules(rules(config));

    builder.build()
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::form::Form;
    use crate::types::ErrorKind;
    use crate::value::FieldValue;

    fn form() -> Form {
        Form::new(Arc::new(vehicle_transaction(&TransactionConfig::default()).unwrap()))
    }

    fn set_all(form: &mut Form, values: &[(&str, FieldValue)]) {
        for (field, value) in values {
            form.set(field, value.clone()).unwrap();
        }
    }

    #[test]
    fn test_fixed_trip_freight_and_margin() {
        let mut form = form();
        set_all(
            &mut form,
            &[
                (TRANSACTION_TYPE, FieldValue::text("Fixed")),
                (OPENING_KM, FieldValue::Number(12_000.0)),
                (CLOSING_KM, FieldValue::Number(12_340.0)),
                (FIXED_KM, FieldValue::Number(300.0)),
                (FIXED_RATE, FieldValue::Number(18.0)),
                (EXTRA_KM_RATE, FieldValue::Number(22.5)),
                (TOLL_CHARGES, FieldValue::Number(450.0)),
                (DRIVER_ALLOWANCE, FieldValue::Number(600.0)),
                (ADVANCE_PAID, FieldValue::Number(2000.0)),
            ],
        );

        // 300 * 18 + 40 * 22.5
        assert_eq!(form.get(TOTAL_KM).as_number(), Some(340.0));
        assert_eq!(form.get(TOTAL_FREIGHT).as_number(), Some(6300.0));
        assert_eq!(form.get(TOTAL_EXPENSES).as_number(), Some(1050.0));
        assert_eq!(form.get(MARGIN).as_number(), Some(5250.0));
        assert_eq!(form.get(MARGIN_PERCENTAGE).as_number(), Some(83.33));
        assert_eq!(form.get(BALANCE_DUE).as_number(), Some(4300.0));
    }

    #[test]
    fn test_switching_category_recomputes_freight() {
        let mut form = form();
        set_all(
            &mut form,
            &[
                (TRANSACTION_TYPE, FieldValue::text("Fixed")),
                (OPENING_KM, FieldValue::Number(100.0)),
                (CLOSING_KM, FieldValue::Number(220.0)),
                (FIXED_KM, FieldValue::Number(100.0)),
                (FIXED_RATE, FieldValue::Number(10.0)),
                (EXTRA_KM_RATE, FieldValue::Number(12.0)),
                (ADHOC_RATE, FieldValue::Number(15.0)),
            ],
        );
        assert_eq!(form.get(TOTAL_FREIGHT).as_number(), Some(1240.0));

        let changed = form.set(TRANSACTION_TYPE, FieldValue::text("Adhoc")).unwrap();
        assert!(changed.contains(&FieldId::from(TOTAL_FREIGHT)));
        assert_eq!(form.get(TOTAL_FREIGHT).as_number(), Some(1800.0));
    }

    #[test]
    fn test_blank_odometer_blanks_money_chain() {
        let mut form = form();
        set_all(
            &mut form,
            &[
                (TRANSACTION_TYPE, FieldValue::text("Adhoc")),
                (OPENING_KM, FieldValue::Number(100.0)),
                (CLOSING_KM, FieldValue::Number(150.0)),
                (ADHOC_RATE, FieldValue::Number(20.0)),
                (TOLL_CHARGES, FieldValue::Number(100.0)),
            ],
        );
        assert_eq!(form.get(MARGIN).as_number(), Some(900.0));

        form.set(CLOSING_KM, FieldValue::Blank).unwrap();
        assert!(form.get(TOTAL_KM).is_blank());
        assert!(form.get(TOTAL_FREIGHT).is_blank());
        assert!(form.get(MARGIN).is_blank());
        assert!(form.get(MARGIN_PERCENTAGE).is_blank());
        assert_eq!(form.get(TOTAL_EXPENSES).as_number(), Some(100.0));
    }

    #[test]
    fn test_duty_hours_cross_midnight_but_order_is_still_checked() {
        let mut form = form();
        form.set_input(GARAGE_OUT_TIME, "11:30 PM").unwrap();
        form.set_input(GARAGE_IN_TIME, "01:00").unwrap();

        assert_eq!(form.get(DUTY_HOURS).as_number(), Some(1.5));
        let errors = form.errors().for_field(GARAGE_IN_TIME);
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].kind, ErrorKind::Chronology);
        assert_eq!(errors[0].message, "Garage In cannot be earlier than Garage Out");
    }

    #[test]
    fn test_category_requirements() {
        let mut form = form();
        form.set(TRANSACTION_TYPE, FieldValue::text("Replacement")).unwrap();
        let errors = form.validate();

        for field in [FIXED_KM, FIXED_RATE, EXTRA_KM_RATE, REPLACED_VEHICLE_NUMBER] {
            assert_eq!(errors.for_field(field)[0].kind, ErrorKind::Required, "{field}");
        }
        assert!(errors.for_field(ADHOC_RATE).is_empty());

        form.set(TRANSACTION_TYPE, FieldValue::text("Charter")).unwrap();
        assert_eq!(
            form.errors().for_field(TRANSACTION_TYPE)[0].kind,
            ErrorKind::Format
        );
    }

    #[test]
    fn test_advisories_do_not_block() {
        let mut form = form();
        set_all(
            &mut form,
            &[
                (TRANSACTION_TYPE, FieldValue::text("Adhoc")),
                (OPENING_KM, FieldValue::Number(0.0)),
                (CLOSING_KM, FieldValue::Number(10.0)),
                (ADHOC_RATE, FieldValue::Number(10.0)),
                (VENDOR_COST, FieldValue::Number(500.0)),
                (GARAGE_OUT_TIME, FieldValue::time(4, 0)),
                (GARAGE_IN_TIME, FieldValue::time(23, 0)),
            ],
        );

        let margin = form.errors().for_field(MARGIN);
        assert_eq!(margin.len(), 1);
        assert!(!margin[0].is_blocking());
        let duty = form.errors().for_field(DUTY_HOURS);
        assert_eq!(duty.len(), 1);
        assert!(!duty[0].is_blocking());
    }

    #[test]
    fn test_advance_above_freight_blocks() {
        let mut form = form();
        set_all(
            &mut form,
            &[
                (TRANSACTION_TYPE, FieldValue::text("Adhoc")),
                (OPENING_KM, FieldValue::Number(0.0)),
                (CLOSING_KM, FieldValue::Number(10.0)),
                (ADHOC_RATE, FieldValue::Number(10.0)),
                (ADVANCE_PAID, FieldValue::Number(150.0)),
            ],
        );
        assert_eq!(form.get(BALANCE_DUE).as_number(), Some(-50.0));
        let errors = form.errors().for_field(ADVANCE_PAID);
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].kind, ErrorKind::Range);
        assert!(errors[0].is_blocking());
    }
}
