//! Property-based tests for payload building.
//!
//! Generates messy caller input (mixed naming conventions, junk numbers,
//! missing products, repeated keys) and checks the builder invariants hold
//! for every capability combination.
//!
//! Run with: `cargo test --test proptest_payload`

use std::collections::HashSet;
use std::sync::Arc;

use proptest::prelude::*;
use serde_json::{json, Map, Value};

use line_item_sync::{
    CapabilityOverrides, CapabilityRegistry, LineItemInput, LineItemKey, PayloadBuilder,
    TelemetryCounters,
};

// =============================================================================
// Strategies for generating test data
// =============================================================================

/// Small pools so duplicates are common
fn product_strategy() -> impl Strategy<Value = Value> {
    prop_oneof![
        4 => prop::sample::select(vec!["p-1", "p-2", "p-3"]).prop_map(Value::from),
        1 => Just(Value::Null),
        1 => Just(Value::from("  ")),
    ]
}

fn optional_text(pool: Vec<&'static str>) -> impl Strategy<Value = Value> {
    prop_oneof![
        2 => prop::sample::select(pool).prop_map(Value::from),
        1 => Just(Value::Null),
        1 => Just(Value::from("")),
    ]
}

fn number_strategy() -> impl Strategy<Value = Value> {
    prop_oneof![
        (0u32..100).prop_map(Value::from),
        (0.0f64..1000.0).prop_map(|n| json!(n)),
        "[0-9]{1,3}(\\.[0-9]{1,2})?".prop_map(Value::from),
        "[a-z]{1,5}".prop_map(Value::from),
        Just(Value::Null),
    ]
}

fn line_item_strategy() -> impl Strategy<Value = Value> {
    (
        any::<bool>(),
        product_strategy(),
        optional_text(vec!["v-1", "v-2"]),
        number_strategy(),
        number_strategy(),
        optional_text(vec!["2025-04-01", "2025-04-02"]),
        optional_text(vec!["2025-03-01T08:00:00.000Z", "2025-03-01T09:00:00.000Z"]),
        optional_text(vec!["2025-03-01T12:00:00.000Z"]),
        proptest::option::of(any::<bool>()),
        optional_text(vec!["stocked", "customer supplied"]),
    )
        .prop_map(
            |(camel, product, vendor, quantity, price, promised, start, end, requires, reason)| {
                let names: [&str; 10] = if camel {
                    [
                        "productId", "vendorId", "quantity", "unitPrice", "promisedDate",
                        "scheduledStartTime", "scheduledEndTime", "requiresScheduling",
                        "noScheduleReason", "isOffSite",
                    ]
                } else {
                    [
                        "product_id", "vendor_id", "quantity_used", "unit_price", "promised_date",
                        "scheduled_start_time", "scheduled_end_time", "requires_scheduling",
                        "no_schedule_reason", "is_off_site",
                    ]
                };
                let mut obj = Map::new();
                obj.insert(names[0].into(), product);
                obj.insert(names[1].into(), vendor);
                obj.insert(names[2].into(), quantity);
                obj.insert(names[3].into(), price);
                obj.insert(names[4].into(), promised);
                obj.insert(names[5].into(), start);
                obj.insert(names[6].into(), end);
                obj.insert(names[7].into(), requires.map(Value::Bool).unwrap_or(Value::Null));
                obj.insert(names[8].into(), reason);
                obj.insert(names[9].into(), Value::Bool(camel));
                Value::Object(obj)
            },
        )
}

fn overrides_strategy() -> impl Strategy<Value = CapabilityOverrides> {
    (proptest::option::of(Just(false)), proptest::option::of(Just(false))).prop_map(
        |(vendor, scheduling_times)| CapabilityOverrides {
            vendor,
            scheduling_times,
        },
    )
}

fn builder() -> PayloadBuilder {
    let telemetry = Arc::new(TelemetryCounters::disabled());
    PayloadBuilder::new(Arc::new(CapabilityRegistry::new(telemetry)))
}

// =============================================================================
// Properties
// =============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(256))]

    #[test]
    fn keys_are_unique(items in prop::collection::vec(line_item_strategy(), 0..30),
                       overrides in overrides_strategy()) {
        let inputs: Vec<LineItemInput> = items.iter().map(LineItemInput::from_json).collect();
        let records = builder().build("job", &inputs, Some(overrides));

        let keys: HashSet<LineItemKey> = records.iter().map(LineItemKey::of).collect();
        prop_assert_eq!(keys.len(), records.len());
    }

    #[test]
    fn accounting_adds_up(items in prop::collection::vec(line_item_strategy(), 0..30),
                          overrides in overrides_strategy()) {
        let inputs: Vec<LineItemInput> = items.iter().map(LineItemInput::from_json).collect();
        let report = builder().build_with_report("job", &inputs, Some(overrides));

        prop_assert_eq!(report.records.len() + report.dropped + report.merged, inputs.len());
        prop_assert!(report.records.iter().all(|r| !r.product_id.trim().is_empty()));
        prop_assert!(report.records.iter().all(|r| r.job_id == "job"));
    }

    #[test]
    fn quantities_are_conserved(items in prop::collection::vec(line_item_strategy(), 0..30)) {
        let inputs: Vec<LineItemInput> = items.iter().map(LineItemInput::from_json).collect();
        let records = builder().build("job", &inputs, None);

        // Singles are canonicalized one by one, then summed
        let singles: f64 = inputs
            .iter()
            .map(|i| builder().build("job", std::slice::from_ref(i), None))
            .flat_map(|r| r.into_iter().map(|rec| rec.quantity_used))
            .sum();
        let merged: f64 = records.iter().map(|r| r.quantity_used).sum();
        prop_assert!((singles - merged).abs() < 1e-6 * singles.abs().max(1.0));
    }

    #[test]
    fn numbers_are_finite(items in prop::collection::vec(line_item_strategy(), 0..30)) {
        let inputs: Vec<LineItemInput> = items.iter().map(LineItemInput::from_json).collect();
        for record in builder().build("job", &inputs, None) {
            prop_assert!(record.quantity_used.is_finite());
            prop_assert!(record.unit_price.is_finite());
        }
    }

    #[test]
    fn scheduling_exclusivity(items in prop::collection::vec(line_item_strategy(), 0..30)) {
        let inputs: Vec<LineItemInput> = items.iter().map(LineItemInput::from_json).collect();
        for record in builder().build("job", &inputs, None) {
            if record.requires_scheduling {
                prop_assert!(record.no_schedule_reason.is_none());
            } else {
                prop_assert!(record.scheduled_start().is_none());
                prop_assert!(record.scheduled_end().is_none());
            }
        }
    }

    #[test]
    fn disabled_families_never_emit_columns(items in prop::collection::vec(line_item_strategy(), 1..30),
                                            overrides in overrides_strategy()) {
        let inputs: Vec<LineItemInput> = items.iter().map(LineItemInput::from_json).collect();
        let report = builder().build_with_report("job", &inputs, Some(overrides));

        for record in &report.records {
            let columns = record.column_names();
            prop_assert_eq!(columns.contains(&"vendor_id"), report.capabilities.vendor);
            prop_assert_eq!(
                columns.contains(&"scheduled_start_time"),
                report.capabilities.scheduling_times
            );
            prop_assert_eq!(columns, report.records[0].column_names());
        }
    }

    #[test]
    fn first_occurrence_order(items in prop::collection::vec(line_item_strategy(), 0..30)) {
        let inputs: Vec<LineItemInput> = items.iter().map(LineItemInput::from_json).collect();
        let records = builder().build("job", &inputs, None);

        let mut seen = HashSet::new();
        let expected: Vec<LineItemKey> = inputs
            .iter()
            .filter_map(|i| builder().build("job", std::slice::from_ref(i), None).into_iter().next())
            .map(|r| LineItemKey::of(&r))
            .filter(|k| seen.insert(k.clone()))
            .collect();
        let actual: Vec<LineItemKey> = records.iter().map(LineItemKey::of).collect();
        prop_assert_eq!(actual, expected);
    }

    #[test]
    fn arbitrary_json_never_panics(value in any::<i64>().prop_map(Value::from)) {
        let input = LineItemInput::from_json(&value);
        prop_assert!(builder().build("job", &[input], None).is_empty());
    }
}
