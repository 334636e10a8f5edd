// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::RwLock;

use super::traits::{LineItemStore, StorageError};
use crate::line_item::CanonicalLineItemRecord;

/// In-process line item table.
///
/// Can simulate schema drift: a dropped column makes inserts that include it
/// fail the way a PostgREST-fronted table does.
pub struct InMemoryLineItemStore {
    table: String,
    rows: DashMap<String, Vec<CanonicalLineItemRecord>>,
    missing_columns: RwLock<HashSet<String>>,
    delete_calls: AtomicU64,
    insert_calls: AtomicU64,
}

impl InMemoryLineItemStore {
    #[must_use]
    pub fn new() -> Self {
        Self::with_table("line_items")
    }

    pub fn with_table(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            rows: DashMap::new(),
            missing_columns: RwLock::new(HashSet::new()),
            delete_calls: AtomicU64::new(0),
            insert_calls: AtomicU64::new(0),
        }
    }

    /// Pretend `column` does not exist in this deployment.
    pub fn drop_column(&self, column: &str) {
        self.missing_columns.write().insert(column.to_string());
    }

    /// Total rows across all jobs.
    #[must_use]
    pub fn len(&self) -> usize {
        self.rows.iter().map(|e| e.value().len()).sum()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[must_use]
    pub fn delete_calls(&self) -> u64 {
        self.delete_calls.load(Ordering::Relaxed)
    }

    /// Insert attempts, including failed ones.
    #[must_use]
    pub fn insert_calls(&self) -> u64 {
        self.insert_calls.load(Ordering::Relaxed)
    }

    pub fn clear(&self) {
        self.rows.clear();
    }
}

impl Default for InMemoryLineItemStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl LineItemStore for InMemoryLineItemStore {
    async fn delete_for_job(&self, job_id: &str) -> Result<u64, StorageError> {
        self.delete_calls.fetch_add(1, Ordering::Relaxed);
        Ok(self
            .rows
            .remove(job_id)
            .map(|(_, rows)| rows.len() as u64)
            .unwrap_or(0))
    }

    async fn insert_batch(&self, records: &[CanonicalLineItemRecord]) -> Result<usize, StorageError> {
        self.insert_calls.fetch_add(1, Ordering::Relaxed);

        {
            let missing = self.missing_columns.read();
            if let Some(column) = records
                .iter()
                .flat_map(|r| r.column_names())
                .find(|c| missing.contains(*c))
            {
                return Err(StorageError::classify(format!(
                    "Could not find the '{}' column of '{}' in the schema cache",
                    column, self.table
                )));
            }
        }

        // All-or-nothing, like a single multi-row INSERT
        for record in records {
            self.rows
                .entry(record.job_id.clone())
                .or_default()
                .push(record.clone());
        }
        Ok(records.len())
    }

    async fn list_for_job(&self, job_id: &str) -> Result<Vec<CanonicalLineItemRecord>, StorageError> {
        Ok(self
            .rows
            .get(job_id)
            .map(|r| r.value().clone())
            .unwrap_or_default())
    }
}
