// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Line item storage backends.
//!
//! - [`traits`]: the [`LineItemStore`](traits::LineItemStore) seam and error classification
//! - [`memory`]: in-process table with simulated schema drift
//! - [`sql`]: SQLite/MySQL via sqlx

pub mod memory;
pub mod sql;
pub mod traits;
