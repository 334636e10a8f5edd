// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Canonical payload construction.
//!
//! [`PayloadBuilder`] turns caller input into the exact row set a job should
//! hold. It performs no I/O; the only outside state it reads is the
//! [`CapabilityRegistry`].
//!
//! # Pipeline
//!
//! ```text
//! LineItemInput ─► product check ─► coerce numbers ─► scheduling rules
//!               ─► normalize dates ─► composite key ─► merge duplicates
//! ```
//!
//! Inputs without a product reference are skipped, not rejected. Duplicate
//! keys merge by summing quantity; every other field comes from the first
//! occurrence. Output preserves first-seen order.
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use line_item_sync::{CapabilityRegistry, LineItemInput, PayloadBuilder, TelemetryCounters};
//!
//! let registry = Arc::new(CapabilityRegistry::new(Arc::new(TelemetryCounters::session())));
//! let builder = PayloadBuilder::new(registry);
//!
//! let records = builder.build("job-123", &[
//!     LineItemInput::new("prod-1").with_unit_price(100.0).with_quantity(2.0),
//!     LineItemInput::new("prod-1").with_unit_price(100.0).with_quantity(3.0),
//! ], None);
//!
//! assert_eq!(records.len(), 1);
//! assert_eq!(records[0].quantity_used, 5.0);
//! ```

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;

use crate::capability::{CapabilityOverrides, CapabilityRegistry, CapabilitySet};
use crate::line_item::{CanonicalLineItemRecord, DateValue, LineItemInput};

/// Stand-in for an absent key component.
///
/// "No vendor" and "vendor column disabled" both map here, so they hash the
/// same.
pub const KEY_PLACEHOLDER: &str = "\u{2205}";

/// Quantity used when the input is missing or unparseable.
pub const DEFAULT_QUANTITY: f64 = 1.0;

/// Unit price used when the input is missing or unparseable.
pub const DEFAULT_UNIT_PRICE: f64 = 0.0;

/// Identity of a line item within a job.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct LineItemKey {
    pub job_id: String,
    pub product_id: String,
    pub vendor_id: String,
    pub promised_date: String,
    pub scheduled_start_time: String,
    pub scheduled_end_time: String,
}

impl LineItemKey {
    #[must_use]
    pub fn of(record: &CanonicalLineItemRecord) -> Self {
        fn part(value: Option<&str>) -> String {
            match value {
                Some(v) if !v.is_empty() => v.to_string(),
                _ => KEY_PLACEHOLDER.to_string(),
            }
        }

        Self {
            job_id: record.job_id.clone(),
            product_id: record.product_id.clone(),
            vendor_id: part(record.vendor()),
            promised_date: part(record.promised_date.as_deref()),
            scheduled_start_time: part(record.scheduled_start()),
            scheduled_end_time: part(record.scheduled_end()),
        }
    }
}

impl std::fmt::Display for LineItemKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}|{}|{}|{}|{}|{}",
            self.job_id,
            self.product_id,
            self.vendor_id,
            self.promised_date,
            self.scheduled_start_time,
            self.scheduled_end_time
        )
    }
}

/// Records plus what the builder silently did to get them.
#[derive(Debug, Clone, PartialEq)]
pub struct BuildReport {
    pub records: Vec<CanonicalLineItemRecord>,
    /// Inputs skipped for lack of a product reference.
    pub dropped: usize,
    /// Inputs folded into an earlier record with the same key.
    pub merged: usize,
    /// Column families the records include.
    pub capabilities: CapabilitySet,
}

/// Builds canonical line item rows for a job.
#[derive(Debug, Clone)]
pub struct PayloadBuilder {
    capabilities: Arc<CapabilityRegistry>,
}

impl PayloadBuilder {
    pub fn new(capabilities: Arc<CapabilityRegistry>) -> Self {
        Self { capabilities }
    }

    /// Canonical, deduplicated records for `job_id`.
    #[must_use]
    pub fn build(
        &self,
        job_id: &str,
        inputs: &[LineItemInput],
        overrides: Option<CapabilityOverrides>,
    ) -> Vec<CanonicalLineItemRecord> {
        self.build_with_report(job_id, inputs, overrides).records
    }

    /// Like [`build`](Self::build), also reporting dropped and merged counts.
    #[must_use]
    pub fn build_with_report(
        &self,
        job_id: &str,
        inputs: &[LineItemInput],
        overrides: Option<CapabilityOverrides>,
    ) -> BuildReport {
        let capabilities = overrides
            .unwrap_or_default()
            .apply(self.capabilities.snapshot());

        let mut records: Vec<CanonicalLineItemRecord> = Vec::with_capacity(inputs.len());
        let mut index: HashMap<LineItemKey, usize> = HashMap::with_capacity(inputs.len());
        let mut dropped = 0;
        let mut merged = 0;

        for input in inputs {
            let Some(record) = canonicalize(job_id, input, capabilities) else {
                dropped += 1;
                continue;
            };

            let key = LineItemKey::of(&record);
            match index.get(&key) {
                Some(&pos) => {
                    records[pos].quantity_used += record.quantity_used;
                    merged += 1;
                }
                None => {
                    index.insert(key, records.len());
                    records.push(record);
                }
            }
        }

        BuildReport {
            records,
            dropped,
            merged,
            capabilities,
        }
    }
}

/// Canonicalize one input, or `None` if it has no product reference.
#[must_use]
pub fn canonicalize(
    job_id: &str,
    input: &LineItemInput,
    capabilities: CapabilitySet,
) -> Option<CanonicalLineItemRecord> {
    let product_id = input.product_id.as_ref().filter(|p| !p.trim().is_empty())?;

    let start = input.scheduled_start_time.as_ref().and_then(DateValue::normalize);
    let end = input.scheduled_end_time.as_ref().and_then(DateValue::normalize);

    let requires_scheduling =
        input.requires_scheduling.unwrap_or(false) || start.is_some() || end.is_some();

    let no_schedule_reason = if requires_scheduling {
        None
    } else {
        input
            .no_schedule_reason
            .as_ref()
            .filter(|r| !r.trim().is_empty())
            .cloned()
    };

    let (scheduled_start_time, scheduled_end_time) = if capabilities.scheduling_times {
        if requires_scheduling {
            (Some(start), Some(end))
        } else {
            (Some(None), Some(None))
        }
    } else {
        (None, None)
    };

    let vendor_id = if capabilities.vendor {
        Some(input.vendor_id.clone().filter(|v| !v.trim().is_empty()))
    } else {
        None
    };

    Some(CanonicalLineItemRecord {
        job_id: job_id.to_string(),
        product_id: product_id.clone(),
        vendor_id,
        quantity_used: coerce_number(input.quantity.as_ref(), DEFAULT_QUANTITY),
        unit_price: coerce_number(input.unit_price.as_ref(), DEFAULT_UNIT_PRICE),
        promised_date: input.promised_date.as_ref().and_then(DateValue::normalize),
        requires_scheduling,
        no_schedule_reason,
        is_off_site: input.is_off_site.unwrap_or(false),
        scheduled_start_time,
        scheduled_end_time,
    })
}

/// Finite number from a JSON number or numeric string, else `default`.
fn coerce_number(value: Option<&Value>, default: f64) -> f64 {
    let parsed = match value {
        Some(Value::Number(n)) => n.as_f64(),
        Some(Value::String(s)) => s.trim().parse::<f64>().ok(),
        _ => None,
    };
    parsed.filter(|n| n.is_finite()).unwrap_or(default)
}
