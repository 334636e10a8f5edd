// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

use async_trait::async_trait;
use thiserror::Error;

use crate::capability::CapabilityFamily;
use crate::line_item::CanonicalLineItemRecord;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum StorageError {
    /// A referenced column does not exist in this deployment.
    #[error("Unknown column{}: {message}", .column.as_deref().map(|c| format!(" '{c}'")).unwrap_or_default())]
    MissingColumn {
        column: Option<String>,
        family: Option<CapabilityFamily>,
        message: String,
    },
    #[error("Table missing: {message}")]
    MissingTable { message: String },
    /// Row-level authorization rejected the operation.
    #[error("Permission denied: {message}")]
    PermissionDenied { message: String },
    #[error("Storage backend error: {0}")]
    Backend(String),
}

/// Phrases different backends use for an unknown column.
const MISSING_COLUMN_PATTERNS: &[&str] = &[
    "no such column",      // SQLite (SELECT/UPDATE)
    "has no column named", // SQLite (INSERT)
    "unknown column",      // MySQL
];

const MISSING_TABLE_PATTERNS: &[&str] = &[
    "no such table",
    "doesn't exist",
    "could not find the table",
];

const PERMISSION_PATTERNS: &[&str] = &[
    "permission denied",
    "row-level security",
    "row level security",
    "insufficient privilege",
    "access denied",
];

impl StorageError {
    /// Map backend error text onto the error taxonomy.
    ///
    /// Missing columns are checked before missing tables: PostgreSQL and
    /// PostgREST phrase both as "does not exist" / "could not find the".
    pub fn classify(message: impl Into<String>) -> Self {
        let message = message.into();
        let lower = message.to_lowercase();

        if Self::mentions_missing_column(&lower) {
            let column = Self::extract_column(&message);
            let family = column.as_deref().and_then(CapabilityFamily::for_column);
            return Self::MissingColumn { column, family, message };
        }
        if MISSING_TABLE_PATTERNS.iter().any(|p| lower.contains(p))
            || (lower.contains("relation") && lower.contains("does not exist"))
        {
            return Self::MissingTable { message };
        }
        if PERMISSION_PATTERNS.iter().any(|p| lower.contains(p)) {
            return Self::PermissionDenied { message };
        }
        Self::Backend(message)
    }

    fn mentions_missing_column(lower: &str) -> bool {
        let postgrest = lower.contains("could not find the") && lower.contains(" column ");
        let postgres = lower.contains("column") && lower.contains("does not exist");
        MISSING_COLUMN_PATTERNS.iter().any(|p| lower.contains(p)) || postgrest || postgres
    }

    /// Best-effort column name: the SQLite marker, then the first quoted
    /// identifier, then any whole word naming a known optional column.
    fn extract_column(message: &str) -> Option<String> {
        // SQLite: "table x has no column named y" / "no such column: y"
        let marked = ["has no column named ", "no such column: "]
            .iter()
            .find_map(|marker| {
                message.find(marker).map(|at| {
                    message[at + marker.len()..]
                        .split(|c: char| c.is_whitespace() || c == ',')
                        .next()
                        .unwrap_or_default()
                })
            })
            .filter(|s| !s.is_empty());
        if let Some(ident) = marked {
            return Some(unqualified(ident));
        }

        for quote in ['\'', '"', '`'] {
            let mut parts = message.split(quote);
            parts.next();
            if let Some(ident) = parts.next().filter(|s| !s.is_empty()) {
                return Some(unqualified(ident));
            }
        }

        message
            .split(|c: char| !(c.is_ascii_alphanumeric() || c == '_'))
            .find(|word| CapabilityFamily::for_column(word).is_some())
            .map(str::to_string)
    }

    /// Capability family to disable, for a missing optional column.
    #[must_use]
    pub fn capability_family(&self) -> Option<CapabilityFamily> {
        match self {
            Self::MissingColumn { family, .. } => *family,
            _ => None,
        }
    }

    /// Short label for metrics and logs.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::MissingColumn { .. } => "missing_column",
            Self::MissingTable { .. } => "missing_table",
            Self::PermissionDenied { .. } => "permission_denied",
            Self::Backend(_) => "backend",
        }
    }

    /// Whether retrying the same call could plausibly succeed.
    ///
    /// Schema and authorization failures are static.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Backend(_))
    }
}

/// `table.column` → `column`
fn unqualified(ident: &str) -> String {
    ident.rsplit('.').next().unwrap_or(ident).to_string()
}

/// Remote table holding line item rows, keyed by job.
///
/// Implementations do not retry delete or insert: the engine decides what a
/// failure means.
#[async_trait]
pub trait LineItemStore: Send + Sync {
    /// Delete every row for `job_id`, returning the number removed.
    async fn delete_for_job(&self, job_id: &str) -> Result<u64, StorageError>;

    /// Insert `records` in one call. Every record in a batch carries the same
    /// column set.
    async fn insert_batch(&self, records: &[CanonicalLineItemRecord]) -> Result<usize, StorageError>;

    /// Current rows for `job_id`, in insertion order.
    async fn list_for_job(&self, job_id: &str) -> Result<Vec<CanonicalLineItemRecord>, StorageError>;
}
