// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! SQL line item table (SQLite or MySQL via the sqlx `Any` driver).
//!
//! Schema, with the optional columns marked:
//! ```sql
//! CREATE TABLE line_items (
//!   id INTEGER PRIMARY KEY AUTOINCREMENT,
//!   job_id TEXT NOT NULL,
//!   product_id TEXT NOT NULL,
//!   vendor_id TEXT,                 -- optional (vendor family)
//!   quantity_used REAL NOT NULL,
//!   unit_price REAL NOT NULL,
//!   promised_date TEXT,
//!   requires_scheduling INTEGER NOT NULL,
//!   no_schedule_reason TEXT,
//!   is_off_site INTEGER NOT NULL,
//!   scheduled_start_time TEXT,      -- optional (scheduling-times family)
//!   scheduled_end_time TEXT         -- optional (scheduling-times family)
//! )
//! ```
//!
//! Older deployments lack the optional columns. [`SqlSchemaOptions`] lets the
//! store create such a table, which is how drift is reproduced in tests.
//!
//! ## sqlx Any driver quirks
//!
//! - Booleans are stored as integers and bound as `i64`.
//! - MySQL TEXT can come back as bytes, so text reads fall back to `Vec<u8>`.

use std::sync::Once;
use std::time::Duration;

use async_trait::async_trait;
use sqlx::any::{AnyPoolOptions, AnyRow};
use sqlx::{AnyPool, Row};
use tracing::{debug, info};

use super::traits::{LineItemStore, StorageError};
use crate::config::LineItemSyncConfig;
use crate::line_item::{CanonicalLineItemRecord, ColumnValue};
use crate::resilience::retry::{retry_if, RetryConfig};

// SQLx `Any` driver requires runtime installation
static INSTALL_DRIVERS: Once = Once::new();

fn install_drivers() {
    INSTALL_DRIVERS.call_once(|| {
        sqlx::any::install_default_drivers();
    });
}

/// Rows per INSERT statement. Keeps bind counts under SQLite's 999 limit.
const INSERT_CHUNK_ROWS: usize = 80;

fn backend_error(e: sqlx::Error) -> StorageError {
    StorageError::classify(e.to_string())
}

/// Which optional columns `init_schema` creates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SqlSchemaOptions {
    pub vendor_column: bool,
    pub scheduling_columns: bool,
}

impl Default for SqlSchemaOptions {
    fn default() -> Self {
        Self {
            vendor_column: true,
            scheduling_columns: true,
        }
    }
}

pub struct SqlLineItemStore {
    pool: AnyPool,
    table: String,
    is_sqlite: bool,
}

impl SqlLineItemStore {
    /// Connect with startup retry. Does not touch the schema.
    pub async fn new(
        connection_string: &str,
        table: &str,
        max_connections: u32,
    ) -> Result<Self, StorageError> {
        install_drivers();
        validate_identifier(table)?;

        let is_sqlite = connection_string.starts_with("sqlite:");
        // Every connection to an in-memory SQLite database is a separate database
        let max_connections = if connection_string.contains(":memory:") {
            1
        } else {
            max_connections.max(1)
        };

        let pool = retry_if(
            "sql_connect",
            &RetryConfig::startup(),
            StorageError::is_transient,
            || async {
                AnyPoolOptions::new()
                    .max_connections(max_connections)
                    .acquire_timeout(Duration::from_secs(10))
                    .idle_timeout(Duration::from_secs(300))
                    .connect(connection_string)
                    .await
                    .map_err(backend_error)
            },
        )
        .await?;

        let store = Self {
            pool,
            table: table.to_string(),
            is_sqlite,
        };

        if is_sqlite && !connection_string.contains(":memory:") {
            store.enable_wal_mode().await?;
        }

        info!(table = %store.table, sqlite = is_sqlite, "Connected line item store");
        Ok(store)
    }

    /// Connect using `config.sql_url`, creating the full table if configured.
    pub async fn from_config(config: &LineItemSyncConfig) -> Result<Self, StorageError> {
        let url = config
            .sql_url
            .as_deref()
            .ok_or_else(|| StorageError::Backend("sql_url is not configured".into()))?;

        let store = Self::new(url, &config.table_name, config.sql_max_connections).await?;
        if config.create_schema {
            store.init_schema(SqlSchemaOptions::default()).await?;
        }
        Ok(store)
    }

    #[must_use]
    pub fn pool(&self) -> AnyPool {
        self.pool.clone()
    }

    #[must_use]
    pub fn table(&self) -> &str {
        &self.table
    }

    async fn enable_wal_mode(&self) -> Result<(), StorageError> {
        sqlx::query("PRAGMA journal_mode = WAL")
            .execute(&self.pool)
            .await
            .map_err(|e| StorageError::Backend(format!("Failed to enable WAL mode: {}", e)))?;
        Ok(())
    }

    /// `CREATE TABLE IF NOT EXISTS` with the requested optional columns.
    pub async fn init_schema(&self, options: SqlSchemaOptions) -> Result<(), StorageError> {
        let (id, text, key, real, flag) = if self.is_sqlite {
            ("id INTEGER PRIMARY KEY AUTOINCREMENT", "TEXT", "TEXT", "REAL", "INTEGER")
        } else {
            ("id BIGINT AUTO_INCREMENT PRIMARY KEY", "TEXT", "VARCHAR(64)", "DOUBLE", "BIGINT")
        };

        let mut columns = vec![
            id.to_string(),
            format!("job_id {key} NOT NULL"),
            format!("product_id {key} NOT NULL"),
        ];
        if options.vendor_column {
            columns.push(format!("vendor_id {key}"));
        }
        columns.extend([
            format!("quantity_used {real} NOT NULL DEFAULT 1"),
            format!("unit_price {real} NOT NULL DEFAULT 0"),
            format!("promised_date {text}"),
            format!("requires_scheduling {flag} NOT NULL DEFAULT 0"),
            format!("no_schedule_reason {text}"),
            format!("is_off_site {flag} NOT NULL DEFAULT 0"),
        ]);
        if options.scheduling_columns {
            columns.push(format!("scheduled_start_time {text}"));
            columns.push(format!("scheduled_end_time {text}"));
        }
        if !self.is_sqlite {
            columns.push(format!("INDEX idx_{}_job (job_id)", self.table));
        }

        let create = format!(
            "CREATE TABLE IF NOT EXISTS {} ({})",
            self.table,
            columns.join(", ")
        );

        retry_if(
            "sql_init_schema",
            &RetryConfig::startup(),
            StorageError::is_transient,
            || async {
                sqlx::query(&create)
                    .execute(&self.pool)
                    .await
                    .map_err(backend_error)
            },
        )
        .await?;

        if self.is_sqlite {
            let index = format!(
                "CREATE INDEX IF NOT EXISTS idx_{0}_job ON {0} (job_id)",
                self.table
            );
            sqlx::query(&index)
                .execute(&self.pool)
                .await
                .map_err(backend_error)?;
        }

        info!(table = %self.table, ?options, "Line item schema ready");
        Ok(())
    }

    async fn insert_chunk(
        &self,
        tx: &mut sqlx::Transaction<'static, sqlx::Any>,
        columns: &[&'static str],
        chunk: &[CanonicalLineItemRecord],
    ) -> Result<(), StorageError> {
        let row_placeholder = format!("({})", vec!["?"; columns.len()].join(", "));
        let sql = format!(
            "INSERT INTO {} ({}) VALUES {}",
            self.table,
            columns.join(", "),
            vec![row_placeholder.as_str(); chunk.len()].join(", ")
        );

        let mut query = sqlx::query(&sql);
        for record in chunk {
            for (_, value) in record.columns() {
                query = match value {
                    ColumnValue::Text(text) => query.bind(text),
                    ColumnValue::Real(n) => query.bind(n),
                    ColumnValue::Bool(b) => query.bind(i64::from(b)),
                };
            }
        }

        query.execute(&mut **tx).await.map_err(backend_error)?;
        Ok(())
    }
}

/// Table names are interpolated into SQL, so keep them to plain identifiers.
fn validate_identifier(name: &str) -> Result<(), StorageError> {
    let mut chars = name.chars();
    let valid = chars
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_');
    if valid {
        Ok(())
    } else {
        Err(StorageError::Backend(format!("Invalid table name '{}'", name)))
    }
}

/// Read a text column. `Ok(None)` means the column is not in the row.
fn optional_text(row: &AnyRow, column: &str) -> Result<Option<Option<String>>, StorageError> {
    if !row.columns().iter().any(|c| sqlx::Column::name(c) == column) {
        return Ok(None);
    }
    Ok(Some(text(row, column)?))
}

fn text(row: &AnyRow, column: &str) -> Result<Option<String>, StorageError> {
    match row.try_get::<Option<String>, _>(column) {
        Ok(v) => Ok(v),
        Err(_) => row
            .try_get::<Option<Vec<u8>>, _>(column)
            .map(|bytes| bytes.and_then(|b| String::from_utf8(b).ok()))
            .map_err(backend_error),
    }
}

fn flag(row: &AnyRow, column: &str) -> Result<bool, StorageError> {
    row.try_get::<i64, _>(column)
        .map(|v| v != 0)
        .map_err(backend_error)
}

fn record_from_row(row: &AnyRow) -> Result<CanonicalLineItemRecord, StorageError> {
    Ok(CanonicalLineItemRecord {
        job_id: text(row, "job_id")?.unwrap_or_default(),
        product_id: text(row, "product_id")?.unwrap_or_default(),
        vendor_id: optional_text(row, "vendor_id")?,
        quantity_used: row.try_get::<f64, _>("quantity_used").map_err(backend_error)?,
        unit_price: row.try_get::<f64, _>("unit_price").map_err(backend_error)?,
        promised_date: text(row, "promised_date")?,
        requires_scheduling: flag(row, "requires_scheduling")?,
        no_schedule_reason: text(row, "no_schedule_reason")?,
        is_off_site: flag(row, "is_off_site")?,
        scheduled_start_time: optional_text(row, "scheduled_start_time")?,
        scheduled_end_time: optional_text(row, "scheduled_end_time")?,
    })
}

#[async_trait]
impl LineItemStore for SqlLineItemStore {
    async fn delete_for_job(&self, job_id: &str) -> Result<u64, StorageError> {
        let sql = format!("DELETE FROM {} WHERE job_id = ?", self.table);
        let result = sqlx::query(&sql)
            .bind(job_id.to_string())
            .execute(&self.pool)
            .await
            .map_err(backend_error)?;
        debug!(job_id, deleted = result.rows_affected(), "Deleted line items");
        Ok(result.rows_affected())
    }

    /// All chunks go in one transaction, so a batch lands whole or not at all.
    async fn insert_batch(&self, records: &[CanonicalLineItemRecord]) -> Result<usize, StorageError> {
        let Some(first) = records.first() else {
            return Ok(0);
        };

        let columns = first.column_names();
        if records.iter().any(|r| r.column_names() != columns) {
            return Err(StorageError::Backend(
                "Line item batch mixes column sets".to_string(),
            ));
        }

        let mut tx = self.pool.begin().await.map_err(backend_error)?;
        for chunk in records.chunks(INSERT_CHUNK_ROWS) {
            self.insert_chunk(&mut tx, &columns, chunk).await?;
        }
        tx.commit().await.map_err(backend_error)?;

        debug!(rows = records.len(), table = %self.table, "Inserted line items");
        Ok(records.len())
    }

    async fn list_for_job(&self, job_id: &str) -> Result<Vec<CanonicalLineItemRecord>, StorageError> {
        let sql = format!("SELECT * FROM {} WHERE job_id = ? ORDER BY id", self.table);
        let rows = sqlx::query(&sql)
            .bind(job_id.to_string())
            .fetch_all(&self.pool)
            .await
            .map_err(backend_error)?;

        rows.iter().map(record_from_row).collect()
    }
}
