// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Persistent named counters for degraded code paths.
//!
//! Every public operation is infallible from the caller's point of view:
//! backend failures are logged and swallowed, and with no usable backend the
//! whole API degrades to a no-op.
//!
//! # Example
//!
//! ```
//! use line_item_sync::telemetry::{TelemetryCounters, keys};
//!
//! let telemetry = TelemetryCounters::session();
//! telemetry.increment(keys::VENDOR_FALLBACK);
//! telemetry.increment(keys::VENDOR_FALLBACK);
//! assert_eq!(telemetry.get(keys::VENDOR_FALLBACK), 2);
//!
//! let snapshot = telemetry.export();
//! let restored = TelemetryCounters::session();
//! assert!(restored.import(&snapshot));
//! assert_eq!(restored.get_all(), telemetry.get_all());
//! ```

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, SecondsFormat, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::backend::{CounterBackend, FileBackend, NoopBackend, SessionBackend};
use crate::config::LineItemSyncConfig;

/// Default storage key prefix.
pub const DEFAULT_PREFIX: &str = "telemetry_";

/// Suffix (after the prefix) holding the last full reset timestamp.
const LAST_RESET_SUFFIX: &str = "last_reset";

/// Point-in-time view of all counters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TelemetrySummary {
    pub timestamp: String,
    pub counters: BTreeMap<String, u64>,
    pub backend_in_use: String,
    pub last_reset_at: Option<String>,
    pub seconds_since_reset: Option<i64>,
}

/// Serialized form produced by [`TelemetryCounters::export`].
#[derive(Debug, Clone, Serialize, Deserialize)]
struct TelemetrySnapshot {
    #[serde(default)]
    exported_at: String,
    counters: BTreeMap<String, u64>,
    #[serde(default)]
    last_reset_at: Option<String>,
}

/// Named non-negative counters on a best-effort backend.
pub struct TelemetryCounters {
    active: Arc<dyn CounterBackend>,
    durable: Option<Arc<dyn CounterBackend>>,
    prefix: String,
    /// Serializes read-modify-write within this process.
    write_lock: Mutex<()>,
}

impl std::fmt::Debug for TelemetryCounters {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TelemetryCounters")
            .field("backend", &self.active.name())
            .field("durable", &self.durable.as_ref().map(|d| d.name()))
            .field("prefix", &self.prefix)
            .finish()
    }
}

impl TelemetryCounters {
    /// Pick the first candidate that probes successfully, else [`NoopBackend`].
    ///
    /// `durable` is the target of [`persist_to_durable`](Self::persist_to_durable)
    /// and the source of [`restore_from_durable`](Self::restore_from_durable).
    pub fn select(
        candidates: Vec<Arc<dyn CounterBackend>>,
        durable: Option<Arc<dyn CounterBackend>>,
        prefix: impl Into<String>,
    ) -> Self {
        let active = candidates
            .into_iter()
            .find(|backend| backend.probe())
            .unwrap_or_else(|| Arc::new(NoopBackend));
        let durable = durable.filter(|backend| backend.probe());

        debug!(
            backend = active.name(),
            durable = durable.as_ref().map(|d| d.name()).unwrap_or("none"),
            "Selected telemetry backend"
        );

        Self {
            active,
            durable,
            prefix: prefix.into(),
            write_lock: Mutex::new(()),
        }
    }

    /// Counters held in process memory only.
    #[must_use]
    pub fn session() -> Self {
        Self::select(vec![Arc::new(SessionBackend::new())], None, DEFAULT_PREFIX)
    }

    /// Counters that record nothing.
    #[must_use]
    pub fn disabled() -> Self {
        Self::select(Vec::new(), None, DEFAULT_PREFIX)
    }

    /// Build from config: session store preferred, file store as fallback and
    /// as the durable copy target.
    #[must_use]
    pub fn from_config(config: &LineItemSyncConfig) -> Self {
        let file: Option<Arc<dyn CounterBackend>> = config
            .telemetry_path
            .as_ref()
            .map(|path| Arc::new(FileBackend::new(path)) as Arc<dyn CounterBackend>);

        let mut candidates: Vec<Arc<dyn CounterBackend>> = Vec::new();
        if config.telemetry_session {
            candidates.push(Arc::new(SessionBackend::new()));
        }
        if let Some(ref file) = file {
            candidates.push(file.clone());
        }

        Self::select(candidates, file, config.telemetry_prefix.clone())
    }

    /// Name of the backend in use.
    #[must_use]
    pub fn backend_name(&self) -> &'static str {
        self.active.name()
    }

    fn storage_key(&self, key: &str) -> String {
        format!("{}{}", self.prefix, key)
    }

    fn last_reset_key(&self) -> String {
        self.storage_key(LAST_RESET_SUFFIX)
    }

    fn read(backend: &dyn CounterBackend, storage_key: &str) -> u64 {
        backend
            .get(storage_key)
            .and_then(|raw| raw.trim().parse::<u64>().ok())
            .unwrap_or(0)
    }

    fn write(backend: &dyn CounterBackend, storage_key: &str, value: &str) -> bool {
        match backend.set(storage_key, value) {
            Ok(()) => true,
            Err(e) => {
                warn!(backend = backend.name(), key = storage_key, error = %e, "Telemetry write failed");
                false
            }
        }
    }

    /// Add one to `key`, creating it at 1. Returns the new value.
    pub fn increment(&self, key: &str) -> u64 {
        self.increment_by(key, 1)
    }

    /// Add `n` to `key` with a single backend write. Returns the new value.
    ///
    /// The reset timestamp's name is reserved; incrementing it is ignored.
    pub fn increment_by(&self, key: &str, n: u64) -> u64 {
        if key == LAST_RESET_SUFFIX {
            warn!(key, "Refusing to increment reserved telemetry key");
            return 0;
        }
        let storage_key = self.storage_key(key);
        let next = {
            let _guard = self.write_lock.lock();
            let next = Self::read(self.active.as_ref(), &storage_key).saturating_add(n);
            Self::write(self.active.as_ref(), &storage_key, &next.to_string());
            next
        };
        crate::metrics::record_telemetry_event(key, n);
        next
    }

    /// Current value of `key`; missing or malformed values read as 0.
    #[must_use]
    pub fn get(&self, key: &str) -> u64 {
        Self::read(self.active.as_ref(), &self.storage_key(key))
    }

    /// All counters, keyed by name without the storage prefix.
    #[must_use]
    pub fn get_all(&self) -> BTreeMap<String, u64> {
        Self::collect(self.active.as_ref(), &self.prefix, &self.last_reset_key())
    }

    fn collect(backend: &dyn CounterBackend, prefix: &str, last_reset_key: &str) -> BTreeMap<String, u64> {
        backend
            .keys()
            .into_iter()
            .filter(|k| k.starts_with(prefix) && k != last_reset_key)
            .map(|k| {
                let value = Self::read(backend, &k);
                (k[prefix.len()..].to_string(), value)
            })
            .collect()
    }

    /// Remove a single counter.
    pub fn reset(&self, key: &str) {
        if key == LAST_RESET_SUFFIX {
            return;
        }
        let _guard = self.write_lock.lock();
        if let Err(e) = self.active.remove(&self.storage_key(key)) {
            warn!(key, error = %e, "Telemetry reset failed");
        }
    }

    /// Remove every counter and stamp the reset time.
    pub fn reset_all(&self) {
        let _guard = self.write_lock.lock();
        for name in self.get_all().keys() {
            if let Err(e) = self.active.remove(&self.storage_key(name)) {
                warn!(key = %name, error = %e, "Telemetry reset failed");
            }
        }
        Self::write(self.active.as_ref(), &self.last_reset_key(), &now_rfc3339());
    }

    /// When [`reset_all`](Self::reset_all) last ran, if ever.
    #[must_use]
    pub fn last_reset_at(&self) -> Option<String> {
        self.active.get(&self.last_reset_key())
    }

    #[must_use]
    pub fn summary(&self) -> TelemetrySummary {
        let now = Utc::now();
        let last_reset_at = self.last_reset_at();
        let seconds_since_reset = last_reset_at
            .as_deref()
            .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
            .map(|at| (now - at.with_timezone(&Utc)).num_seconds());

        TelemetrySummary {
            timestamp: now.to_rfc3339_opts(SecondsFormat::Millis, true),
            counters: self.get_all(),
            backend_in_use: self.active.name().to_string(),
            last_reset_at,
            seconds_since_reset,
        }
    }

    /// Serialize all counters to a JSON string.
    #[must_use]
    pub fn export(&self) -> String {
        let snapshot = TelemetrySnapshot {
            exported_at: now_rfc3339(),
            counters: self.get_all(),
            last_reset_at: self.last_reset_at(),
        };
        serde_json::to_string(&snapshot).unwrap_or_else(|e| {
            warn!(error = %e, "Telemetry export failed");
            String::from("{}")
        })
    }

    /// Load counters from [`export`](Self::export) output.
    ///
    /// Imported values overwrite existing ones. Returns `false` if the input
    /// does not parse.
    pub fn import(&self, serialized: &str) -> bool {
        let snapshot: TelemetrySnapshot = match serde_json::from_str(serialized) {
            Ok(s) => s,
            Err(e) => {
                warn!(error = %e, "Telemetry import rejected");
                return false;
            }
        };

        let _guard = self.write_lock.lock();
        for (name, value) in &snapshot.counters {
            if name == LAST_RESET_SUFFIX {
                warn!("Skipping reserved telemetry key in import");
                continue;
            }
            Self::write(self.active.as_ref(), &self.storage_key(name), &value.to_string());
        }
        if let Some(ref at) = snapshot.last_reset_at {
            Self::write(self.active.as_ref(), &self.last_reset_key(), at);
        }
        debug!(counters = snapshot.counters.len(), "Imported telemetry snapshot");
        true
    }

    /// Make the durable backend hold exactly the active backend's counters.
    ///
    /// Returns the number of counters copied (0 when there is no separate
    /// durable backend).
    pub fn persist_to_durable(&self) -> usize {
        match self.durable {
            Some(ref durable) if !Arc::ptr_eq(durable, &self.active) => {
                self.mirror(self.active.as_ref(), durable.as_ref())
            }
            _ => 0,
        }
    }

    /// Make the active backend hold exactly the durable backend's counters.
    pub fn restore_from_durable(&self) -> usize {
        match self.durable {
            Some(ref durable) if !Arc::ptr_eq(durable, &self.active) => {
                self.mirror(durable.as_ref(), self.active.as_ref())
            }
            _ => 0,
        }
    }

    /// Copy prefixed keys from `from` to `to` and remove prefixed keys that
    /// `from` lacks, so resets carry over.
    fn mirror(&self, from: &dyn CounterBackend, to: &dyn CounterBackend) -> usize {
        let _guard = self.write_lock.lock();
        let last_reset_key = self.last_reset_key();
        let counters = Self::collect(from, &self.prefix, &last_reset_key);

        let stale: Vec<String> = Self::collect(to, &self.prefix, &last_reset_key)
            .into_keys()
            .filter(|name| !counters.contains_key(name))
            .collect();
        for name in &stale {
            if let Err(e) = to.remove(&self.storage_key(name)) {
                warn!(backend = to.name(), key = %name, error = %e, "Telemetry remove failed");
            }
        }

        let copied = counters
            .iter()
            .filter(|(name, value)| Self::write(to, &self.storage_key(name), &value.to_string()))
            .count();
        match from.get(&last_reset_key) {
            Some(at) => {
                Self::write(to, &last_reset_key, &at);
            }
            None => {
                if let Err(e) = to.remove(&last_reset_key) {
                    warn!(backend = to.name(), error = %e, "Telemetry remove failed");
                }
            }
        }

        debug!(from = from.name(), to = to.name(), copied, removed = stale.len(), "Mirrored telemetry counters");
        copied
    }
}

impl Default for TelemetryCounters {
    fn default() -> Self {
        Self::session()
    }
}

fn now_rfc3339() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}
