// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Metrics instrumentation for line item sync.
//!
//! Uses the `metrics` crate for backend-agnostic metrics collection.
//! The host application is responsible for choosing the exporter.
//!
//! # Metric Naming Convention
//! - `line_item_sync_` prefix for all metrics
//! - `_total` suffix for counters
//! - `_seconds` suffix for duration histograms
//!
//! # Labels
//! - `operation`: synchronize, delete, insert
//! - `status`: success, error
//! - `family`: vendor, scheduling-times
//! - `kind`: missing_column, missing_table, permission_denied, backend

use metrics::{counter, gauge, histogram};
use std::time::{Duration, Instant};

/// Record a finished sync call.
pub fn record_sync(status: &str) {
    counter!(
        "line_item_sync_operations_total",
        "operation" => "synchronize",
        "status" => status.to_string()
    )
    .increment(1);
}

/// Record operation latency
pub fn record_latency(operation: &str, duration: Duration) {
    histogram!(
        "line_item_sync_operation_seconds",
        "operation" => operation.to_string()
    )
    .record(duration.as_secs_f64());
}

pub fn record_rows_deleted(count: u64) {
    counter!("line_item_sync_rows_deleted_total").increment(count);
}

pub fn record_rows_inserted(count: usize) {
    counter!("line_item_sync_rows_inserted_total").increment(count as u64);
}

/// Inputs discarded for lacking a product id.
pub fn record_dropped(count: usize) {
    counter!("line_item_sync_dropped_total").increment(count as u64);
}

/// Duplicate inputs folded into an earlier record.
pub fn record_merged(count: usize) {
    counter!("line_item_sync_merged_total").increment(count as u64);
}

/// Record payload size per insert
pub fn record_batch_size(count: usize) {
    histogram!("line_item_sync_batch_size").record(count as f64);
}

/// Record a storage failure by kind
pub fn record_storage_error(operation: &str, kind: &str) {
    counter!(
        "line_item_sync_storage_errors_total",
        "operation" => operation.to_string(),
        "kind" => kind.to_string()
    )
    .increment(1);
}

/// A capability family was switched off after a missing-column failure.
pub fn record_capability_fallback(family: &str) {
    counter!(
        "line_item_sync_capability_fallbacks_total",
        "family" => family.to_string()
    )
    .increment(1);
}

/// Insert retried with a narrowed payload.
pub fn record_narrowed_retry(family: &str) {
    counter!(
        "line_item_sync_narrowed_retries_total",
        "family" => family.to_string()
    )
    .increment(1);
}

/// 1 while the family's columns are written, 0 once disabled.
pub fn set_capability_enabled(family: &str, enabled: bool) {
    gauge!(
        "line_item_sync_capability_enabled",
        "family" => family.to_string()
    )
    .set(if enabled { 1.0 } else { 0.0 });
}

/// Mirror of a telemetry counter increment.
pub fn record_telemetry_event(key: &str, count: u64) {
    counter!(
        "line_item_sync_telemetry_events_total",
        "key" => key.to_string()
    )
    .increment(count);
}

/// Timer guard that records latency on drop
pub struct LatencyTimer {
    operation: &'static str,
    start: Instant,
}

impl LatencyTimer {
    /// Start a new latency timer
    pub fn new(operation: &'static str) -> Self {
        Self {
            operation,
            start: Instant::now(),
        }
    }
}

impl Drop for LatencyTimer {
    fn drop(&mut self) {
        record_latency(self.operation, self.start.elapsed());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use metrics_util::debugging::{DebugValue, DebuggingRecorder};

    #[test]
    fn test_record_functions_without_recorder() {
        record_sync("success");
        record_rows_deleted(3);
        record_rows_inserted(2);
        record_dropped(1);
        record_merged(1);
        record_batch_size(2);
        record_storage_error("insert", "missing_column");
        record_capability_fallback("vendor");
        record_narrowed_retry("vendor");
        set_capability_enabled("vendor", false);
        record_telemetry_event("vendor_fallback", 1);
    }

    #[test]
    fn test_counters_reach_recorder() {
        let recorder = DebuggingRecorder::new();
        let snapshotter = recorder.snapshotter();

        metrics::with_local_recorder(&recorder, || {
            record_rows_inserted(4);
            record_rows_inserted(3);
            set_capability_enabled("vendor", false);
        });

        let snapshot = snapshotter.snapshot().into_vec();
        let inserted = snapshot
            .iter()
            .find(|(key, ..)| key.key().name() == "line_item_sync_rows_inserted_total")
            .map(|(.., value)| value.clone());
        assert_eq!(inserted, Some(DebugValue::Counter(7)).as_ref());

        let enabled = snapshot
            .iter()
            .find(|(key, ..)| key.key().name() == "line_item_sync_capability_enabled")
            .map(|(.., value)| value.clone());
        assert!(matches!(enabled, Some(DebugValue::Gauge(g)) if g.into_inner() == 0.0));
    }

    #[test]
    fn test_latency_timer_records_on_drop() {
        let recorder = DebuggingRecorder::new();
        let snapshotter = recorder.snapshotter();

        metrics::with_local_recorder(&recorder, || {
            let _timer = LatencyTimer::new("synchronize");
        });

        let recorded = snapshotter
            .snapshot()
            .into_vec()
            .into_iter()
            .any(|(key, ..)| key.key().name() == "line_item_sync_operation_seconds");
        assert!(recorded);
    }
}
