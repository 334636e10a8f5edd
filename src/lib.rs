// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! # Line Item Sync
//!
//! Keeps a job's stored line items equal to the list a caller wants, against a
//! table whose optional columns differ between deployments.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                         SyncEngine                          │
//! │  • delete all rows for the job, then one bulk insert       │
//! │  • missing optional column → narrow + retry once           │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                       PayloadBuilder                        │
//! │  • alias resolution, coercion, date normalization          │
//! │  • dedup by composite key, quantities summed               │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │            CapabilityRegistry → TelemetryCounters           │
//! │  • which optional columns exist (true → false only)        │
//! │  • counters for every degraded path                        │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use line_item_sync::{LineItemInput, LineItemSyncConfig, SyncEngine};
//!
//! #[tokio::main]
//! async fn main() {
//!     let config = LineItemSyncConfig {
//!         sql_url: Some("sqlite:shop.db?mode=rwc".into()),
//!         telemetry_path: Some("telemetry.json".into()),
//!         ..Default::default()
//!     };
//!     let engine = SyncEngine::from_config(&config).await.expect("Failed to start");
//!
//!     let items = vec![
//!         LineItemInput::new("brake-pads").with_vendor("acme").with_quantity(2.0),
//!         LineItemInput::new("labour").with_unit_price(95.0),
//!     ];
//!     match engine.synchronize("job-42", &items).await {
//!         Ok(outcome) => println!("{outcome}"),
//!         Err(e) => eprintln!("{}", e.user_message()),
//!     }
//!
//!     engine.persist_telemetry();
//! }
//! ```
//!
//! ## Modules
//!
//! - [`coordinator`]: [`SyncEngine`] and [`SyncOutcome`]
//! - [`payload`]: [`PayloadBuilder`], canonicalization and dedup
//! - [`line_item`]: input and record shapes, the field alias table
//! - [`capability`]: optional column families and the registry
//! - [`telemetry`]: degradation counters and their backends
//! - [`storage`]: store trait, error classification, memory and SQL stores
//! - [`validation`]: JSON Schema check for typed creation
//! - [`resilience`]: startup retry

pub mod capability;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod line_item;
pub mod metrics;
pub mod payload;
pub mod resilience;
pub mod storage;
pub mod telemetry;
pub mod validation;

// Note: We don't expose a `tracing` module to avoid conflict with the tracing crate

pub use capability::{CapabilityFamily, CapabilityOverrides, CapabilityRegistry, CapabilitySet};
pub use config::LineItemSyncConfig;
pub use coordinator::{SyncEngine, SyncOutcome};
pub use error::SyncError;
pub use line_item::{CanonicalLineItemRecord, DateValue, LineItemInput};
pub use payload::{BuildReport, LineItemKey, PayloadBuilder};
pub use resilience::retry::RetryConfig;
pub use storage::memory::InMemoryLineItemStore;
pub use storage::sql::{SqlLineItemStore, SqlSchemaOptions};
pub use storage::traits::{LineItemStore, StorageError};
pub use telemetry::{TelemetryCounters, TelemetrySummary};
pub use validation::{FieldError, LineItemValidator, ValidationErrors};
pub use crate::metrics::LatencyTimer;
