//! Tunables for the sync core.
//!
//! Two presets are provided: [`SyncConfig::interactive`] for edits made while a
//! user waits, and [`SyncConfig::batch`] for imports and scripted runs.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Grid and workbook bounds enforced by the mutation engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Limits {
    pub max_rows: u32,
    pub max_cols: u32,
    pub max_sheets: usize,
    pub max_sheet_name_len: usize,
    /// Largest range a single fill or format may touch.
    pub max_range_cells: u64,
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            max_rows: 1_048_576,
            max_cols: 16_384,
            max_sheets: 255,
            max_sheet_name_len: 31,
            max_range_cells: 1_000_000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SyncConfig {
    pub limits: Limits,
    /// Wall-clock budget for one hydration or recompute.
    pub compute_timeout_ms: u64,
    /// Ranges larger than this are not expanded by the static cycle scan.
    pub max_scan_range_cells: u64,
    /// Stamped into `computedBy` of every cached value.
    pub computed_by: String,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self::interactive()
    }
}

impl SyncConfig {
    pub fn interactive() -> Self {
        Self {
            limits: Limits::default(),
            compute_timeout_ms: 5_000,
            max_scan_range_cells: 10_000,
            computed_by: "cellsync".to_string(),
        }
    }

    pub fn batch() -> Self {
        Self {
            compute_timeout_ms: 120_000,
            max_scan_range_cells: 1_000_000,
            ..Self::interactive()
        }
    }

    pub fn compute_timeout(&self) -> Duration {
        Duration::from_millis(self.compute_timeout_ms)
    }
}
