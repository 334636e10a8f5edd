// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Optional-column capability flags.
//!
//! Deployments differ in which optional line item columns exist. The registry
//! starts by assuming every column family is present and narrows when a write
//! reports a missing column. Narrowing is one-way for the life of the
//! registry: `true → false` only. [`CapabilityRegistry::reset_all`] exists for
//! test isolation.
//!
//! Flags are plain atomics. Concurrent disables race harmlessly because
//! clearing an already-cleared flag changes nothing; only the call that
//! actually flips the flag records telemetry.
//!
//! ```
//! use std::sync::Arc;
//! use line_item_sync::{CapabilityFamily, CapabilityRegistry, TelemetryCounters};
//! use line_item_sync::telemetry::keys;
//!
//! let telemetry = Arc::new(TelemetryCounters::session());
//! let registry = CapabilityRegistry::new(telemetry.clone());
//!
//! assert!(registry.is_enabled(CapabilityFamily::Vendor));
//! assert!(registry.disable(CapabilityFamily::Vendor));
//! assert!(!registry.disable(CapabilityFamily::Vendor)); // already off
//!
//! assert!(!registry.is_enabled(CapabilityFamily::Vendor));
//! assert_eq!(telemetry.get(keys::VENDOR_FALLBACK), 1);
//! ```

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde::Serialize;
use tracing::warn;

use crate::telemetry::{keys, TelemetryCounters};

/// A family of optional columns that appear or disappear together.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum CapabilityFamily {
    /// `vendor_id`
    Vendor,
    /// `scheduled_start_time`, `scheduled_end_time`
    SchedulingTimes,
}

impl CapabilityFamily {
    pub const ALL: [Self; 2] = [Self::Vendor, Self::SchedulingTimes];

    /// Storage columns belonging to this family.
    #[must_use]
    pub fn columns(self) -> &'static [&'static str] {
        match self {
            Self::Vendor => &["vendor_id"],
            Self::SchedulingTimes => &["scheduled_start_time", "scheduled_end_time"],
        }
    }

    /// The family owning `column`, if it is an optional column.
    #[must_use]
    pub fn for_column(column: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|family| family.columns().contains(&column))
    }

    /// Telemetry counter bumped when this family is disabled.
    #[must_use]
    pub fn telemetry_key(self) -> &'static str {
        match self {
            Self::Vendor => keys::VENDOR_FALLBACK,
            Self::SchedulingTimes => keys::SCHEDULING_TIMES_FALLBACK,
        }
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Vendor => "vendor",
            Self::SchedulingTimes => "scheduling-times",
        }
    }
}

impl std::fmt::Display for CapabilityFamily {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which optional column families a payload should include.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CapabilitySet {
    pub vendor: bool,
    pub scheduling_times: bool,
}

impl CapabilitySet {
    /// Everything enabled.
    pub const ALL: Self = Self {
        vendor: true,
        scheduling_times: true,
    };

    #[must_use]
    pub fn contains(&self, family: CapabilityFamily) -> bool {
        match family {
            CapabilityFamily::Vendor => self.vendor,
            CapabilityFamily::SchedulingTimes => self.scheduling_times,
        }
    }
}

impl Default for CapabilitySet {
    fn default() -> Self {
        Self::ALL
    }
}

/// Per-call narrowing on top of the registry.
///
/// An override can only remove a family; `Some(true)` never re-enables a
/// family the registry has disabled.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CapabilityOverrides {
    pub vendor: Option<bool>,
    pub scheduling_times: Option<bool>,
}

impl CapabilityOverrides {
    #[must_use]
    pub fn without(family: CapabilityFamily) -> Self {
        Self::default().and_without(family)
    }

    /// Also exclude `family`.
    #[must_use]
    pub fn and_without(mut self, family: CapabilityFamily) -> Self {
        match family {
            CapabilityFamily::Vendor => self.vendor = Some(false),
            CapabilityFamily::SchedulingTimes => self.scheduling_times = Some(false),
        }
        self
    }

    /// Combine with the registry's current view.
    #[must_use]
    pub fn apply(&self, base: CapabilitySet) -> CapabilitySet {
        CapabilitySet {
            vendor: base.vendor && self.vendor.unwrap_or(true),
            scheduling_times: base.scheduling_times && self.scheduling_times.unwrap_or(true),
        }
    }
}

/// Process-wide belief about which optional columns exist.
///
/// Share one instance (behind an `Arc`) between every engine in a process;
/// create a fresh one per test.
#[derive(Debug)]
pub struct CapabilityRegistry {
    vendor: AtomicBool,
    scheduling_times: AtomicBool,
    telemetry: Arc<TelemetryCounters>,
}

impl CapabilityRegistry {
    pub fn new(telemetry: Arc<TelemetryCounters>) -> Self {
        Self {
            vendor: AtomicBool::new(true),
            scheduling_times: AtomicBool::new(true),
            telemetry,
        }
    }

    fn flag(&self, family: CapabilityFamily) -> &AtomicBool {
        match family {
            CapabilityFamily::Vendor => &self.vendor,
            CapabilityFamily::SchedulingTimes => &self.scheduling_times,
        }
    }

    #[must_use]
    pub fn is_enabled(&self, family: CapabilityFamily) -> bool {
        self.flag(family).load(Ordering::Acquire)
    }

    /// Current flags as a value.
    #[must_use]
    pub fn snapshot(&self) -> CapabilitySet {
        CapabilitySet {
            vendor: self.is_enabled(CapabilityFamily::Vendor),
            scheduling_times: self.is_enabled(CapabilityFamily::SchedulingTimes),
        }
    }

    /// Mark `family` as absent.
    ///
    /// Returns `true` if this call flipped the flag. The matching telemetry
    /// counter is incremented exactly once per flip.
    pub fn disable(&self, family: CapabilityFamily) -> bool {
        let flipped = self.flag(family).swap(false, Ordering::AcqRel);
        if flipped {
            warn!(family = %family, columns = ?family.columns(), "Optional columns unavailable, narrowing payloads");
            self.telemetry.increment(family.telemetry_key());
            crate::metrics::record_capability_fallback(family.as_str());
            crate::metrics::set_capability_enabled(family.as_str(), false);
        }
        flipped
    }

    /// Restore every family to enabled. Meant for test isolation.
    pub fn reset_all(&self) {
        for family in CapabilityFamily::ALL {
            self.flag(family).store(true, Ordering::Release);
            crate::metrics::set_capability_enabled(family.as_str(), true);
        }
    }

    /// Telemetry sink shared with this registry.
    #[must_use]
    pub fn telemetry(&self) -> &Arc<TelemetryCounters> {
        &self.telemetry
    }
}
