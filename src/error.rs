// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

use thiserror::Error;

use crate::storage::traits::StorageError;
use crate::validation::{SchemaError, ValidationErrors};

/// Failure of a sync call.
///
/// Schema drift on an optional column never shows up here unless the
/// narrowed retry also fails.
#[derive(Error, Debug, Clone)]
pub enum SyncError {
    /// Caller bug: no job to synchronize.
    #[error("Job id is required")]
    MissingJobId,
    #[error("Validation failed: {0}")]
    Validation(#[from] ValidationErrors),
    #[error(transparent)]
    Schema(#[from] SchemaError),
    #[error(transparent)]
    Storage(#[from] StorageError),
}

impl SyncError {
    /// Text suitable for showing to an end user.
    #[must_use]
    pub fn user_message(&self) -> String {
        match self {
            Self::MissingJobId => "This job has not been saved yet.".to_string(),
            Self::Validation(errors) => {
                format!("Some line items are invalid: {}", errors)
            }
            Self::Schema(_) => "Line items could not be checked. Please try again later.".to_string(),
            Self::Storage(StorageError::PermissionDenied { .. }) => {
                "You do not have permission to change line items for this job.".to_string()
            }
            Self::Storage(StorageError::MissingTable { .. }) => {
                "Line items are not available in this workspace.".to_string()
            }
            Self::Storage(_) => "Line items could not be saved. Please try again.".to_string(),
        }
    }

    /// The underlying storage failure, if any.
    #[must_use]
    pub fn storage(&self) -> Option<&StorageError> {
        match self {
            Self::Storage(e) => Some(e),
            _ => None,
        }
    }
}
