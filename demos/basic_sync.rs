// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Basic line-item-sync usage example.
//!
//! Demonstrates:
//! 1. Building an engine over a SQLite file whose table predates the vendor column
//! 2. Saving line items in both naming conventions, with duplicates and junk
//! 3. The vendor fallback kicking in on the first save
//! 4. Rejecting a bad batch on the typed creation path
//! 5. Telemetry summary and metrics dump
//!
//! # Run
//!
//! ```bash
//! cargo run --example basic_sync
//! ```

use std::sync::Arc;

use metrics_util::debugging::{DebugValue, DebuggingRecorder, Snapshotter};
use serde_json::json;
use line_item_sync::{
    CapabilityRegistry, LineItemInput, SqlLineItemStore, SqlSchemaOptions, SyncEngine,
    TelemetryCounters,
};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let recorder = DebuggingRecorder::new();
    let snapshotter = recorder.snapshotter();
    recorder.install().expect("failed to install metrics recorder");

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_target(false)
        .compact()
        .init();

    // ─────────────────────────────────────────────────────────────────────────
    // 1. A deployment that never got the vendor_id migration
    // ─────────────────────────────────────────────────────────────────────────
    let dir = tempfile::tempdir()?;
    let url = format!("sqlite://{}?mode=rwc", dir.path().join("shop.db").display());
    let store = SqlLineItemStore::new(&url, "job_parts", 2).await?;
    store
        .init_schema(SqlSchemaOptions {
            vendor_column: false,
            scheduling_columns: true,
        })
        .await?;

    let telemetry = Arc::new(TelemetryCounters::session());
    let registry = Arc::new(CapabilityRegistry::new(telemetry.clone()));
    let engine = SyncEngine::new(Arc::new(store), registry);

    // ─────────────────────────────────────────────────────────────────────────
    // 2. Save a messy list
    // ─────────────────────────────────────────────────────────────────────────
    let inputs: Vec<LineItemInput> = vec![
        json!({"productId": "brake-pads", "vendorId": "acme", "quantity": 2, "unitPrice": "45.50"}).into(),
        json!({"product_id": "brake-pads", "vendor_id": "acme", "quantity_used": 2}).into(),
        json!({"productId": "labour", "unitPrice": 95, "scheduledStartTime": "2025-03-01T08:00:00.000Z"}).into(),
        json!({"vendorId": "acme", "quantity": 1}).into(),
    ];

    println!("\n💾 Saving {} inputs for job-42...", inputs.len());
    let outcome = engine.synchronize("job-42", &inputs).await?;
    println!("   {outcome}");

    // ─────────────────────────────────────────────────────────────────────────
    // 3. Saving again starts narrow
    // ─────────────────────────────────────────────────────────────────────────
    let outcome = engine.synchronize("job-42", &inputs).await?;
    println!("   {outcome}");

    for row in engine.line_items("job-42").await? {
        println!(
            "   • {:<12} qty={:<4} price={:<6} scheduled={}",
            row.product_id,
            row.quantity_used,
            row.unit_price,
            row.scheduled_start().unwrap_or("-")
        );
    }

    // ─────────────────────────────────────────────────────────────────────────
    // 4. Typed creation path
    // ─────────────────────────────────────────────────────────────────────────
    println!("\n🔎 Validating a bad batch...");
    match engine
        .validate_and_synchronize("job-43", &[json!({"productId": "wipers", "quantity": -1})])
        .await
    {
        Ok(outcome) => println!("   unexpected success: {outcome}"),
        Err(e) => println!("   rejected: {}", e.user_message()),
    }

    // ─────────────────────────────────────────────────────────────────────────
    // 5. Telemetry and metrics
    // ─────────────────────────────────────────────────────────────────────────
    println!("\n📊 Telemetry:");
    println!("{}", serde_json::to_string_pretty(&telemetry.summary())?);

    dump_metrics(&snapshotter);
    Ok(())
}

fn dump_metrics(snapshotter: &Snapshotter) {
    let mut lines: Vec<String> = snapshotter
        .snapshot()
        .into_vec()
        .into_iter()
        .map(|(composite_key, _, _, value)| {
            let (_, key) = composite_key.into_parts();
            let labels: Vec<_> = key.labels().map(|l| format!("{}={}", l.key(), l.value())).collect();
            let label_str = if labels.is_empty() { String::new() } else { format!("{{{}}}", labels.join(",")) };
            let shown = match value {
                DebugValue::Counter(v) => v.to_string(),
                DebugValue::Gauge(v) => format!("{:.0}", v.into_inner()),
                DebugValue::Histogram(samples) => format!("{} samples", samples.len()),
            };
            format!("   {}{} = {}", key.name(), label_str, shown)
        })
        .collect();
    lines.sort();

    println!("\n📈 Metrics:");
    for line in lines {
        println!("{line}");
    }
}
