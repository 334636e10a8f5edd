// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Sync engine coordinator.
//!
//! The [`SyncEngine`] makes the stored line items for a job match a desired
//! list:
//!
//! ```text
//! delete_for_job ─→ build payload ─→ insert_batch ─→ done
//!                                        │
//!                         missing optional column?
//!                                        │
//!                  disable family ─→ rebuild narrower ─→ insert_batch (once)
//! ```
//!
//! Delete and insert are separate calls. A crash between them leaves the job
//! with no line items until the next successful save. Callers serialize saves
//! for the same job; the engine takes no per-job lock.
//!
//! # Example
//!
//! ```rust
//! use std::sync::Arc;
//! use line_item_sync::{
//!     CapabilityRegistry, InMemoryLineItemStore, LineItemInput, SyncEngine, TelemetryCounters,
//! };
//!
//! # #[tokio::main]
//! # async fn main() {
//! let registry = Arc::new(CapabilityRegistry::new(Arc::new(TelemetryCounters::session())));
//! let engine = SyncEngine::new(Arc::new(InMemoryLineItemStore::new()), registry);
//!
//! let outcome = engine
//!     .synchronize("job-1", &[
//!         LineItemInput::new("prod-1").with_quantity(2.0),
//!         LineItemInput::new("prod-1").with_quantity(3.0),
//!     ])
//!     .await
//!     .unwrap();
//!
//! assert_eq!(outcome.inserted, 1);
//! assert_eq!(outcome.merged, 1);
//! # }
//! ```

mod types;

pub use types::SyncOutcome;

use std::sync::Arc;

use serde_json::Value;
use tokio::sync::OnceCell;
use tracing::{debug, error, info, info_span, warn, Instrument};

use crate::capability::{CapabilityFamily, CapabilityOverrides, CapabilityRegistry};
use crate::config::LineItemSyncConfig;
use crate::error::SyncError;
use crate::line_item::{CanonicalLineItemRecord, LineItemInput};
use crate::metrics::{self, LatencyTimer};
use crate::payload::{BuildReport, PayloadBuilder};
use crate::storage::memory::InMemoryLineItemStore;
use crate::storage::sql::SqlLineItemStore;
use crate::storage::traits::{LineItemStore, StorageError};
use crate::telemetry::{keys, TelemetryCounters};
use crate::validation::LineItemValidator;

/// Line item synchronizer for one store.
///
/// Cheap to share behind an `Arc`. Engines built with the same
/// [`CapabilityRegistry`] share what they learn about missing columns.
pub struct SyncEngine {
    store: Arc<dyn LineItemStore>,
    capabilities: Arc<CapabilityRegistry>,
    telemetry: Arc<TelemetryCounters>,
    builder: PayloadBuilder,
    /// Compiled on first typed creation call
    validator: OnceCell<LineItemValidator>,
}

impl SyncEngine {
    /// Engine over `store`, recording telemetry through the registry's counters.
    pub fn new(store: Arc<dyn LineItemStore>, capabilities: Arc<CapabilityRegistry>) -> Self {
        let telemetry = capabilities.telemetry().clone();
        Self {
            store,
            builder: PayloadBuilder::new(capabilities.clone()),
            capabilities,
            telemetry,
            validator: OnceCell::new(),
        }
    }

    /// Wire store, registry and telemetry from config.
    ///
    /// Uses the SQL store when `sql_url` is set, otherwise an in-memory table.
    /// Durable telemetry (if configured) is copied into the active store.
    pub async fn from_config(config: &LineItemSyncConfig) -> Result<Self, SyncError> {
        let telemetry = Arc::new(TelemetryCounters::from_config(config));
        let restored = telemetry.restore_from_durable();
        let capabilities = Arc::new(CapabilityRegistry::new(telemetry.clone()));

        let store: Arc<dyn LineItemStore> = match config.sql_url {
            Some(_) => Arc::new(SqlLineItemStore::from_config(config).await?),
            None => Arc::new(InMemoryLineItemStore::with_table(config.table_name.clone())),
        };

        info!(
            table = %config.table_name,
            sql = config.sql_url.is_some(),
            telemetry_backend = telemetry.backend_name(),
            restored_counters = restored,
            "Line item sync engine ready"
        );
        Ok(Self::new(store, capabilities))
    }

    #[must_use]
    pub fn capabilities(&self) -> &Arc<CapabilityRegistry> {
        &self.capabilities
    }

    #[must_use]
    pub fn telemetry(&self) -> &Arc<TelemetryCounters> {
        &self.telemetry
    }

    #[must_use]
    pub fn builder(&self) -> &PayloadBuilder {
        &self.builder
    }

    #[must_use]
    pub fn store(&self) -> &Arc<dyn LineItemStore> {
        &self.store
    }

    /// Families currently written, for diagnostics.
    #[must_use]
    pub fn enabled_families(&self) -> Vec<CapabilityFamily> {
        CapabilityFamily::ALL
            .into_iter()
            .filter(|f| self.capabilities.is_enabled(*f))
            .collect()
    }

    /// Copy telemetry counters to the durable store. Call before shutdown.
    pub fn persist_telemetry(&self) -> usize {
        self.telemetry.persist_to_durable()
    }

    /// Stored rows for `job_id`.
    pub async fn line_items(&self, job_id: &str) -> Result<Vec<CanonicalLineItemRecord>, SyncError> {
        if job_id.trim().is_empty() {
            return Err(SyncError::MissingJobId);
        }
        self.store
            .list_for_job(job_id)
            .await
            .map_err(|e| self.storage_failure("list", job_id, e))
    }

    /// Replace the stored line items for `job_id` with `inputs`.
    ///
    /// Inputs without a product reference are skipped and duplicates merged
    /// (see [`PayloadBuilder`]). An empty payload still deletes.
    pub async fn synchronize(
        &self,
        job_id: &str,
        inputs: &[LineItemInput],
    ) -> Result<SyncOutcome, SyncError> {
        if job_id.trim().is_empty() {
            metrics::record_sync("error");
            return Err(SyncError::MissingJobId);
        }

        let span = info_span!("synchronize", job_id = %job_id, inputs = inputs.len());
        async {
            let _timer = LatencyTimer::new("synchronize");
            let result = self.replace_line_items(job_id, inputs).await;
            match &result {
                Ok(outcome) => {
                    metrics::record_sync("success");
                    debug!(%outcome, "Line items synchronized");
                }
                Err(_) => metrics::record_sync("error"),
            }
            result
        }
        .instrument(span)
        .await
    }

    /// Typed creation path: reject the whole batch on any field error before
    /// touching storage, otherwise synchronize it.
    pub async fn validate_and_synchronize(
        &self,
        job_id: &str,
        items: &[Value],
    ) -> Result<SyncOutcome, SyncError> {
        if job_id.trim().is_empty() {
            metrics::record_sync("error");
            return Err(SyncError::MissingJobId);
        }

        let validator = self
            .validator
            .get_or_try_init(|| async { LineItemValidator::new() })
            .await?;

        if let Err(errors) = validator.validate_batch(items) {
            warn!(job_id, errors = errors.len(), "Rejected line item batch");
            metrics::record_sync("rejected");
            return Err(errors.into());
        }

        let inputs: Vec<LineItemInput> = items.iter().map(LineItemInput::from_json).collect();
        self.synchronize(job_id, &inputs).await
    }

    async fn replace_line_items(
        &self,
        job_id: &str,
        inputs: &[LineItemInput],
    ) -> Result<SyncOutcome, SyncError> {
        let deleted = self
            .store
            .delete_for_job(job_id)
            .await
            .map_err(|e| self.storage_failure("delete", job_id, e))?;
        metrics::record_rows_deleted(deleted);

        let mut report = self.builder.build_with_report(job_id, inputs, None);
        self.record_silent_paths(job_id, &report);

        let mut outcome = SyncOutcome {
            job_id: job_id.to_string(),
            deleted,
            dropped: report.dropped,
            merged: report.merged,
            ..Default::default()
        };

        if report.records.is_empty() {
            debug!(deleted, "No line items to insert");
            return Ok(outcome);
        }

        let mut overrides = CapabilityOverrides::default();
        loop {
            metrics::record_batch_size(report.records.len());
            let err = match self.store.insert_batch(&report.records).await {
                Ok(inserted) => {
                    metrics::record_rows_inserted(inserted);
                    outcome.inserted = inserted;
                    return Ok(outcome);
                }
                Err(err) => err,
            };

            // One narrowed retry per family, and only for a family we sent
            let Some(family) = err
                .capability_family()
                .filter(|f| report.capabilities.contains(*f) && !outcome.narrowed.contains(f))
            else {
                return Err(self.storage_failure("insert", job_id, err));
            };

            metrics::record_storage_error("insert", err.kind());
            self.capabilities.disable(family);
            metrics::record_narrowed_retry(family.as_str());
            warn!(family = %family, error = %err, "Retrying insert without optional columns");

            outcome.narrowed.push(family);
            overrides = overrides.and_without(family);
            report = self.builder.build_with_report(job_id, inputs, Some(overrides));
        }
    }

    /// Telemetry for the builder's silent paths.
    fn record_silent_paths(&self, job_id: &str, report: &BuildReport) {
        if report.dropped > 0 {
            warn!(job_id, dropped = report.dropped, "Dropped line items without a product reference");
            metrics::record_dropped(report.dropped);
            self.telemetry
                .increment_by(keys::DROPPED_LINE_ITEMS, report.dropped as u64);
        }
        if report.merged > 0 {
            debug!(job_id, merged = report.merged, "Merged duplicate line items");
            metrics::record_merged(report.merged);
            self.telemetry
                .increment_by(keys::MERGED_LINE_ITEMS, report.merged as u64);
        }
    }

    fn storage_failure(&self, operation: &str, job_id: &str, err: StorageError) -> SyncError {
        metrics::record_storage_error(operation, err.kind());
        match err {
            StorageError::PermissionDenied { .. } => {
                self.telemetry.increment(keys::PERMISSION_DENIED);
                warn!(job_id, operation, error = %err, "Line item write not permitted");
            }
            _ => error!(job_id, operation, kind = err.kind(), error = %err, "Line item storage failed"),
        }
        SyncError::Storage(err)
    }
}

impl std::fmt::Debug for SyncEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncEngine")
            .field("capabilities", &self.capabilities.snapshot())
            .field("telemetry_backend", &self.telemetry.backend_name())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn engine() -> (SyncEngine, Arc<InMemoryLineItemStore>) {
        let store = Arc::new(InMemoryLineItemStore::new());
        let registry = Arc::new(CapabilityRegistry::new(Arc::new(TelemetryCounters::session())));
        (SyncEngine::new(store.clone(), registry), store)
    }

    #[tokio::test]
    async fn test_missing_job_id_fails_without_storage_calls() {
        let (engine, store) = engine();
        let err = engine
            .synchronize("  ", &[LineItemInput::new("p")])
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::MissingJobId));
        assert_eq!(store.delete_calls(), 0);
        assert_eq!(store.insert_calls(), 0);
    }

    #[tokio::test]
    async fn test_replaces_previous_rows() {
        let (engine, store) = engine();
        engine
            .synchronize("job", &[LineItemInput::new("a"), LineItemInput::new("b")])
            .await
            .unwrap();
        let outcome = engine
            .synchronize("job", &[LineItemInput::new("c")])
            .await
            .unwrap();

        assert_eq!(outcome.deleted, 2);
        let rows = store.list_for_job("job").await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].product_id, "c");
    }

    #[tokio::test]
    async fn test_vendor_drift_narrows_and_retries_once() {
        let (engine, store) = engine();
        store.drop_column("vendor_id");

        let outcome = engine
            .synchronize("job", &[LineItemInput::new("a").with_vendor("v")])
            .await
            .unwrap();

        assert_eq!(outcome.narrowed, vec![CapabilityFamily::Vendor]);
        assert_eq!(store.insert_calls(), 2);
        assert_eq!(engine.telemetry().get(keys::VENDOR_FALLBACK), 1);
        assert_eq!(engine.enabled_families(), vec![CapabilityFamily::SchedulingTimes]);
        assert!(store.list_for_job("job").await.unwrap()[0].vendor_id.is_none());
    }

    #[tokio::test]
    async fn test_both_families_missing() {
        let (engine, store) = engine();
        store.drop_column("vendor_id");
        store.drop_column("scheduled_start_time");

        let outcome = engine
            .synchronize("job", &[LineItemInput::new("a")])
            .await
            .unwrap();

        assert_eq!(
            outcome.narrowed,
            vec![CapabilityFamily::Vendor, CapabilityFamily::SchedulingTimes]
        );
        assert_eq!(store.insert_calls(), 3);
        assert!(engine.enabled_families().is_empty());
    }

    #[tokio::test]
    async fn test_unknown_required_column_is_fatal() {
        let (engine, store) = engine();
        store.drop_column("unit_price");

        let err = engine
            .synchronize("job", &[LineItemInput::new("a")])
            .await
            .unwrap_err();

        assert_eq!(err.storage().map(StorageError::kind), Some("missing_column"));
        assert_eq!(store.insert_calls(), 1);
        assert_eq!(engine.enabled_families().len(), 2);
    }

    #[tokio::test]
    async fn test_silent_paths_are_counted() {
        let (engine, _store) = engine();
        let inputs: Vec<LineItemInput> = vec![
            json!({"productId": "a", "quantity": 1}).into(),
            json!({"productId": "a", "quantity": 2}).into(),
            json!({"vendorId": "v"}).into(),
        ];

        let outcome = engine.synchronize("job", &inputs).await.unwrap();

        assert_eq!((outcome.inserted, outcome.dropped, outcome.merged), (1, 1, 1));
        assert_eq!(engine.telemetry().get(keys::DROPPED_LINE_ITEMS), 1);
        assert_eq!(engine.telemetry().get(keys::MERGED_LINE_ITEMS), 1);
    }

    /// Session store that counts writes.
    #[derive(Default)]
    struct CountingBackend {
        inner: crate::telemetry::SessionBackend,
        writes: std::sync::atomic::AtomicUsize,
    }

    impl crate::telemetry::CounterBackend for CountingBackend {
        fn name(&self) -> &'static str {
            "counting"
        }
        fn probe(&self) -> bool {
            true
        }
        fn get(&self, key: &str) -> Option<String> {
            self.inner.get(key)
        }
        fn set(&self, key: &str, value: &str) -> Result<(), crate::telemetry::TelemetryError> {
            self.writes.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            self.inner.set(key, value)
        }
        fn remove(&self, key: &str) -> Result<(), crate::telemetry::TelemetryError> {
            self.inner.remove(key)
        }
        fn keys(&self) -> Vec<String> {
            self.inner.keys()
        }
    }

    #[tokio::test]
    async fn test_silent_paths_write_once_per_counter() {
        let backend = Arc::new(CountingBackend::default());
        let telemetry = Arc::new(TelemetryCounters::select(
            vec![backend.clone() as Arc<dyn crate::telemetry::CounterBackend>],
            None,
            crate::telemetry::DEFAULT_PREFIX,
        ));
        let engine = SyncEngine::new(
            Arc::new(InMemoryLineItemStore::new()),
            Arc::new(CapabilityRegistry::new(telemetry)),
        );
        let mut inputs: Vec<LineItemInput> = (0..4).map(|_| LineItemInput::new("a")).collect();
        inputs.extend((0..3).map(|_| LineItemInput::from_json(&json!({"vendorId": "v"}))));

        engine.synchronize("job", &inputs).await.unwrap();

        assert_eq!(engine.telemetry().get(keys::DROPPED_LINE_ITEMS), 3);
        assert_eq!(engine.telemetry().get(keys::MERGED_LINE_ITEMS), 3);
        assert_eq!(backend.writes.load(std::sync::atomic::Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_validation_rejects_before_storage() {
        let (engine, store) = engine();
        let err = engine
            .validate_and_synchronize("job", &[json!({"productId": "a"}), json!({"quantity": 1})])
            .await
            .unwrap_err();

        match err {
            SyncError::Validation(errors) => assert_eq!(errors.errors[0].index, 1),
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(store.delete_calls(), 0);
    }

    #[tokio::test]
    async fn test_validated_batch_is_synchronized() {
        let (engine, _store) = engine();
        let outcome = engine
            .validate_and_synchronize(
                "job",
                &[json!({"product_id": "a", "quantity_used": 2, "unit_price": 4.5})],
            )
            .await
            .unwrap();
        assert_eq!(outcome.inserted, 1);

        let rows = engine.line_items("job").await.unwrap();
        assert_eq!(rows[0].quantity_used, 2.0);
        assert_eq!(rows[0].unit_price, 4.5);
    }

    #[tokio::test]
    async fn test_from_default_config_uses_memory_store() {
        let engine = SyncEngine::from_config(&LineItemSyncConfig::default())
            .await
            .unwrap();
        assert_eq!(engine.telemetry().backend_name(), "session");
        engine
            .synchronize("job", &[LineItemInput::new("a")])
            .await
            .unwrap();
        assert_eq!(engine.line_items("job").await.unwrap().len(), 1);
    }
}
