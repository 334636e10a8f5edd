//! SQL store against real SQLite files.
//!
//! Each test gets its own database in a temp directory. Schema drift is
//! reproduced by creating the table without the optional columns.

use std::sync::Arc;

use tempfile::TempDir;

use line_item_sync::telemetry::keys;
use line_item_sync::{
    CapabilityFamily, CapabilityRegistry, LineItemInput, LineItemStore, LineItemSyncConfig,
    SqlLineItemStore, SqlSchemaOptions, StorageError, SyncEngine, TelemetryCounters,
};

fn sqlite_url(dir: &TempDir, name: &str) -> String {
    format!("sqlite://{}?mode=rwc", dir.path().join(name).display())
}

async fn store(dir: &TempDir, options: SqlSchemaOptions) -> Arc<SqlLineItemStore> {
    let store = SqlLineItemStore::new(&sqlite_url(dir, "items.db"), "line_items", 2)
        .await
        .expect("connect");
    store.init_schema(options).await.expect("schema");
    Arc::new(store)
}

fn engine(store: Arc<SqlLineItemStore>) -> SyncEngine {
    let registry = Arc::new(CapabilityRegistry::new(Arc::new(TelemetryCounters::session())));
    SyncEngine::new(store, registry)
}

#[tokio::test]
async fn test_full_schema_round_trip() {
    let dir = TempDir::new().unwrap();
    let store = store(&dir, SqlSchemaOptions::default()).await;
    let engine = engine(store.clone());

    let inputs = vec![
        LineItemInput::new("prod-1")
            .with_vendor("v-1")
            .with_quantity(2.5)
            .with_unit_price(19.99)
            .with_promised_date("2025-04-01")
            .with_off_site(true),
        LineItemInput::new("prod-2").with_schedule("2025-03-01T08:00:00.000Z", "2025-03-01T12:00:00.000Z"),
        LineItemInput::new("prod-3").with_no_schedule_reason("in stock"),
    ];
    engine.synchronize("job-1", &inputs).await.unwrap();

    let rows = store.list_for_job("job-1").await.unwrap();
    assert_eq!(rows.len(), 3);

    assert_eq!(rows[0].vendor(), Some("v-1"));
    assert_eq!(rows[0].quantity_used, 2.5);
    assert_eq!(rows[0].unit_price, 19.99);
    assert_eq!(rows[0].promised_date.as_deref(), Some("2025-04-01"));
    assert!(rows[0].is_off_site);
    assert_eq!(rows[0].scheduled_start_time, Some(None));

    assert!(rows[1].requires_scheduling);
    assert_eq!(rows[1].scheduled_start(), Some("2025-03-01T08:00:00.000Z"));
    assert_eq!(rows[1].vendor_id, Some(None));

    assert!(!rows[2].requires_scheduling);
    assert_eq!(rows[2].no_schedule_reason.as_deref(), Some("in stock"));
}

#[tokio::test]
async fn test_resync_is_idempotent() {
    let dir = TempDir::new().unwrap();
    let store = store(&dir, SqlSchemaOptions::default()).await;
    let engine = engine(store.clone());
    let inputs = vec![
        LineItemInput::new("a").with_quantity(1.0),
        LineItemInput::new("b").with_vendor("v"),
    ];

    engine.synchronize("job", &inputs).await.unwrap();
    let first = store.list_for_job("job").await.unwrap();
    engine.synchronize("job", &inputs).await.unwrap();
    let second = store.list_for_job("job").await.unwrap();

    assert_eq!(first, second);
    assert_eq!(second.len(), 2);
}

#[tokio::test]
async fn test_jobs_are_isolated() {
    let dir = TempDir::new().unwrap();
    let store = store(&dir, SqlSchemaOptions::default()).await;
    let engine = engine(store.clone());

    engine.synchronize("job-a", &[LineItemInput::new("a")]).await.unwrap();
    engine.synchronize("job-b", &[LineItemInput::new("b")]).await.unwrap();
    engine.synchronize("job-a", &[]).await.unwrap();

    assert!(store.list_for_job("job-a").await.unwrap().is_empty());
    assert_eq!(store.list_for_job("job-b").await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_vendor_column_drift() {
    let dir = TempDir::new().unwrap();
    let store = store(
        &dir,
        SqlSchemaOptions {
            vendor_column: false,
            scheduling_columns: true,
        },
    )
    .await;
    let engine = engine(store.clone());

    let outcome = engine
        .synchronize("job", &[LineItemInput::new("a").with_vendor("v-1")])
        .await
        .unwrap();

    assert_eq!(outcome.narrowed, vec![CapabilityFamily::Vendor]);
    assert_eq!(engine.telemetry().get(keys::VENDOR_FALLBACK), 1);

    let rows = store.list_for_job("job").await.unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].vendor_id, None);
    assert_eq!(rows[0].scheduled_start_time, Some(None));
}

#[tokio::test]
async fn test_legacy_schema_without_optional_columns() {
    let dir = TempDir::new().unwrap();
    let store = store(
        &dir,
        SqlSchemaOptions {
            vendor_column: false,
            scheduling_columns: false,
        },
    )
    .await;
    let engine = engine(store.clone());
    let inputs = vec![
        LineItemInput::new("a").with_vendor("v").with_schedule("2025-03-01", "2025-03-02"),
    ];

    let outcome = engine.synchronize("job", &inputs).await.unwrap();
    assert_eq!(outcome.narrowed.len(), 2);

    // Fully narrowed from the start now
    let outcome = engine.synchronize("job", &inputs).await.unwrap();
    assert!(!outcome.was_narrowed());
    assert_eq!(store.list_for_job("job").await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_missing_table_is_classified() {
    let dir = TempDir::new().unwrap();
    let store = SqlLineItemStore::new(&sqlite_url(&dir, "empty.db"), "line_items", 1)
        .await
        .unwrap();

    let err = store.delete_for_job("job").await.unwrap_err();
    assert!(matches!(err, StorageError::MissingTable { .. }), "{err:?}");
}

#[tokio::test]
async fn test_large_batch_spans_chunks() {
    let dir = TempDir::new().unwrap();
    let store = store(&dir, SqlSchemaOptions::default()).await;
    let engine = engine(store.clone());

    let inputs: Vec<LineItemInput> = (0..250).map(|i| LineItemInput::new(format!("p-{i}"))).collect();
    let outcome = engine.synchronize("job", &inputs).await.unwrap();

    assert_eq!(outcome.inserted, 250);
    let rows = store.list_for_job("job").await.unwrap();
    assert_eq!(rows.len(), 250);
    assert_eq!(rows[249].product_id, "p-249");
}

#[tokio::test]
async fn test_invalid_table_name_rejected() {
    let dir = TempDir::new().unwrap();
    let result = SqlLineItemStore::new(&sqlite_url(&dir, "x.db"), "items; --", 1).await;
    assert!(matches!(result, Err(StorageError::Backend(_))));
}

#[tokio::test]
async fn test_engine_from_config() {
    let dir = TempDir::new().unwrap();
    let telemetry_path = dir.path().join("telemetry.json");
    let config = LineItemSyncConfig {
        sql_url: Some(sqlite_url(&dir, "shop.db")),
        table_name: "job_parts".into(),
        telemetry_path: Some(telemetry_path.display().to_string()),
        ..Default::default()
    };

    let engine = SyncEngine::from_config(&config).await.unwrap();
    engine
        .synchronize("job", &[LineItemInput::new("a"), LineItemInput::new("a")])
        .await
        .unwrap();
    assert_eq!(engine.line_items("job").await.unwrap()[0].quantity_used, 2.0);

    // Counters survive a restart through the durable file
    assert!(engine.persist_telemetry() > 0);
    let restarted = SyncEngine::from_config(&config).await.unwrap();
    assert_eq!(restarted.telemetry().get(keys::MERGED_LINE_ITEMS), 1);
}
