// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Public types for the sync engine coordinator.

use serde::Serialize;

use crate::capability::CapabilityFamily;

/// What one `synchronize` call did.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub struct SyncOutcome {
    pub job_id: String,
    /// Rows removed by the delete phase
    pub deleted: u64,
    /// Rows written by the insert phase (0 when it was skipped)
    pub inserted: usize,
    /// Inputs skipped for lack of a product reference
    pub dropped: usize,
    /// Inputs merged into an earlier duplicate
    pub merged: usize,
    /// Families disabled during this call after a missing-column failure
    pub narrowed: Vec<CapabilityFamily>,
}

impl SyncOutcome {
    /// True if the payload had to be narrowed to succeed.
    #[must_use]
    pub fn was_narrowed(&self) -> bool {
        !self.narrowed.is_empty()
    }
}

impl std::fmt::Display for SyncOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "job {}: -{} +{} (dropped {}, merged {})",
            self.job_id, self.deleted, self.inserted, self.dropped, self.merged
        )?;
        if self.was_narrowed() {
            let families: Vec<&str> = self.narrowed.iter().map(|f| f.as_str()).collect();
            write!(f, ", narrowed {}", families.join(","))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display() {
        let outcome = SyncOutcome {
            job_id: "job-1".into(),
            deleted: 2,
            inserted: 3,
            dropped: 1,
            merged: 0,
            narrowed: vec![CapabilityFamily::Vendor],
        };
        assert!(outcome.was_narrowed());
        assert_eq!(
            outcome.to_string(),
            "job job-1: -2 +3 (dropped 1, merged 0), narrowed vendor"
        );
    }
}
