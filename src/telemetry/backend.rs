// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Key-value backends for telemetry counters.
//!
//! Counters are stored as strings so that a value written by an older build
//! (or edited by hand) can be read back defensively.
//!
//! | Backend          | Lifetime        | Probe                          |
//! |------------------|-----------------|--------------------------------|
//! | [`SessionBackend`] | process         | always available               |
//! | [`FileBackend`]    | on disk (JSON)  | parent directory is writable   |
//! | [`NoopBackend`]    | none            | always available, stores nothing |

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use dashmap::DashMap;
use parking_lot::Mutex;
use thiserror::Error;
use tracing::{debug, warn};

#[derive(Error, Debug)]
pub enum TelemetryError {
    #[error("Telemetry backend I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Telemetry serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// A string key-value store that can hold telemetry counters.
pub trait CounterBackend: Send + Sync {
    /// Short name reported in summaries (`"session"`, `"file"`, `"none"`).
    fn name(&self) -> &'static str;

    /// Whether this backend can be used right now.
    fn probe(&self) -> bool;

    fn get(&self, key: &str) -> Option<String>;

    fn set(&self, key: &str, value: &str) -> Result<(), TelemetryError>;

    fn remove(&self, key: &str) -> Result<(), TelemetryError>;

    fn keys(&self) -> Vec<String>;
}

/// Short-lived store scoped to the current process.
#[derive(Debug, Default)]
pub struct SessionBackend {
    data: DashMap<String, String>,
}

impl SessionBackend {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl CounterBackend for SessionBackend {
    fn name(&self) -> &'static str {
        "session"
    }

    fn probe(&self) -> bool {
        true
    }

    fn get(&self, key: &str) -> Option<String> {
        self.data.get(key).map(|v| v.value().clone())
    }

    fn set(&self, key: &str, value: &str) -> Result<(), TelemetryError> {
        self.data.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), TelemetryError> {
        self.data.remove(key);
        Ok(())
    }

    fn keys(&self) -> Vec<String> {
        self.data.iter().map(|e| e.key().clone()).collect()
    }
}

/// Durable store: a flat JSON object on disk.
///
/// The whole map is rewritten on every mutation. Counter volume is tiny, and a
/// torn write only costs diagnostic data.
pub struct FileBackend {
    path: PathBuf,
    cache: Mutex<Option<BTreeMap<String, String>>>,
}

impl FileBackend {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            cache: Mutex::new(None),
        }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Run `f` against the loaded map, loading from disk on first use.
    fn with_map<R>(&self, f: impl FnOnce(&mut BTreeMap<String, String>) -> R) -> R {
        let mut guard = self.cache.lock();
        let map = guard.get_or_insert_with(|| self.load());
        f(map)
    }

    fn load(&self) -> BTreeMap<String, String> {
        match std::fs::read_to_string(&self.path) {
            Ok(raw) => serde_json::from_str(&raw).unwrap_or_else(|e| {
                warn!(path = %self.path.display(), error = %e, "Telemetry file unreadable, starting empty");
                BTreeMap::new()
            }),
            Err(_) => BTreeMap::new(),
        }
    }

    fn flush(&self, map: &BTreeMap<String, String>) -> Result<(), TelemetryError> {
        let raw = serde_json::to_string_pretty(map)?;
        std::fs::write(&self.path, raw)?;
        Ok(())
    }
}

impl CounterBackend for FileBackend {
    fn name(&self) -> &'static str {
        "file"
    }

    fn probe(&self) -> bool {
        let dir = match self.path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p,
            _ => Path::new("."),
        };
        let writable = std::fs::metadata(dir)
            .map(|m| m.is_dir() && !m.permissions().readonly())
            .unwrap_or(false);
        debug!(path = %self.path.display(), writable, "Probed telemetry file backend");
        writable
    }

    fn get(&self, key: &str) -> Option<String> {
        self.with_map(|map| map.get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<(), TelemetryError> {
        self.with_map(|map| {
            map.insert(key.to_string(), value.to_string());
            self.flush(map)
        })
    }

    fn remove(&self, key: &str) -> Result<(), TelemetryError> {
        self.with_map(|map| {
            if map.remove(key).is_some() {
                self.flush(map)
            } else {
                Ok(())
            }
        })
    }

    fn keys(&self) -> Vec<String> {
        self.with_map(|map| map.keys().cloned().collect())
    }
}

/// Stores nothing. Selected when no other backend probes successfully.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopBackend;

impl CounterBackend for NoopBackend {
    fn name(&self) -> &'static str {
        "none"
    }

    fn probe(&self) -> bool {
        true
    }

    fn get(&self, _key: &str) -> Option<String> {
        None
    }

    fn set(&self, _key: &str, _value: &str) -> Result<(), TelemetryError> {
        Ok(())
    }

    fn remove(&self, _key: &str) -> Result<(), TelemetryError> {
        Ok(())
    }

    fn keys(&self) -> Vec<String> {
        Vec::new()
    }
}
