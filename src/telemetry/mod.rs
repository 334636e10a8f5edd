// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Diagnostic counters for fallback and degradation events.
//!
//! - [`counters`]: [`TelemetryCounters`], the public API
//! - [`backend`]: key-value stores the counters can live in

pub mod backend;
pub mod counters;

pub use backend::{CounterBackend, FileBackend, NoopBackend, SessionBackend, TelemetryError};
pub use counters::{TelemetryCounters, TelemetrySummary, DEFAULT_PREFIX};

/// Well-known counter names.
pub mod keys {
    /// Vendor column missing; payload narrowed.
    pub const VENDOR_FALLBACK: &str = "vendor_fallback";
    /// Scheduled start/end columns missing; payload narrowed.
    pub const SCHEDULING_TIMES_FALLBACK: &str = "scheduling_times_fallback";
    /// Row-level authorization rejected a write.
    pub const PERMISSION_DENIED: &str = "permission_denied";
    /// Inputs skipped for lack of a product reference.
    pub const DROPPED_LINE_ITEMS: &str = "dropped_line_items";
    /// Inputs folded into an earlier duplicate.
    pub const MERGED_LINE_ITEMS: &str = "merged_line_items";
}
