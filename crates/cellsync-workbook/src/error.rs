//! Error types of the workbook core.
//!
//! Only misuse of the core itself surfaces as `Err`. Edit validation failures
//! are returned as [`ValidationError`] values inside the batch outcome, formula
//! faults are cached on the cell, and engine trouble during a pass becomes a
//! [`Warning`](crate::diagnostics::Warning).

use serde::Serialize;

use crate::engine::{EngineError, EngineSheetId};

#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    #[error("hydration handle has been disposed")]
    HandleDisposed,
    #[error("handle belongs to document '{handle}', not '{document}'")]
    DocumentMismatch { handle: String, document: String },
    #[error(transparent)]
    Hydration(#[from] HydrationError),
    #[error(transparent)]
    Fault(#[from] crate::guard::Fault),
}

#[derive(Debug, thiserror::Error)]
pub enum HydrationError {
    #[error("document '{0}' has no sheets")]
    NoSheets(String),
    #[error("engine sheet id {engine_id} for '{sheet}' is already assigned to '{owner}'")]
    SheetIdCollision {
        sheet: String,
        owner: String,
        engine_id: EngineSheetId,
    },
    #[error("engine refused sheet '{sheet}': {source}")]
    Engine { sheet: String, source: EngineError },
    #[error("hydration was interrupted: {0}")]
    Interrupted(String),
}

/// Why a single operation of a batch was rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum ValidationErrorKind {
    UnknownSheet,
    InvalidAddress,
    InvalidRange,
    OutOfBounds,
    MissingFormulaPrefix,
    ConflictingContent,
    MissingContent,
    DuplicateSheetName,
    InvalidSheetName,
    SheetLimit,
    LastSheet,
    MergeConflict,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, thiserror::Error)]
#[serde(rename_all = "camelCase")]
#[error("operation {op_index}: {message}")]
pub struct ValidationError {
    pub op_index: usize,
    pub kind: ValidationErrorKind,
    pub message: String,
}

impl ValidationError {
    pub fn new(op_index: usize, kind: ValidationErrorKind, message: impl Into<String>) -> Self {
        Self {
            op_index,
            kind,
            message: message.into(),
        }
    }
}
