//! The seam between the core and a formula engine.
//!
//! The core never looks inside an engine: it loads sheets, cells and names,
//! asks for a recalculation, and reads values back as JSON. Values may come
//! back in any of the shapes [`crate::recompute`] knows how to normalise.

mod calc;

use std::sync::atomic::AtomicBool;

pub use calc::{CalcEngine, CalcEngineFactory};

use crate::document::RawValue;

/// Engine-side sheet handle.
pub type EngineSheetId = u32;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EngineError {
    #[error("unknown engine sheet {0}")]
    UnknownSheet(EngineSheetId),
    #[error("engine rejected the request: {0}")]
    Rejected(String),
    #[error("evaluation was cancelled")]
    Cancelled,
    #[error("engine failure: {0}")]
    Internal(String),
}

pub trait EvaluationEngine: Send {
    /// Identifies the build whose results end up in `engineVersion`.
    fn version(&self) -> &str;

    fn add_sheet(&mut self, name: &str) -> Result<EngineSheetId, EngineError>;

    fn sheet_id(&self, name: &str) -> Option<EngineSheetId>;

    fn set_cell_formula(
        &mut self,
        sheet: EngineSheetId,
        row: u32,
        col: u32,
        formula: &str,
    ) -> Result<(), EngineError>;

    fn set_cell_value(
        &mut self,
        sheet: EngineSheetId,
        row: u32,
        col: u32,
        value: &RawValue,
    ) -> Result<(), EngineError>;

    /// `scope` is `None` for workbook-level names.
    fn define_name(
        &mut self,
        name: &str,
        expression: &str,
        scope: Option<EngineSheetId>,
    ) -> Result<(), EngineError>;

    /// Recalculate everything. Implementations poll `cancel` and return
    /// [`EngineError::Cancelled`] once it is raised.
    fn recalculate(&mut self, cancel: &AtomicBool) -> Result<(), EngineError>;

    fn cell_value(
        &self,
        sheet: EngineSheetId,
        row: u32,
        col: u32,
    ) -> Result<serde_json::Value, EngineError>;

    /// `(rows, cols)` spanned by the sheet's content.
    fn sheet_dimensions(&self, sheet: EngineSheetId) -> Result<(u32, u32), EngineError>;

    /// Cells whose formulas read `(sheet, row, col)` directly.
    fn dependents(
        &self,
        sheet: EngineSheetId,
        row: u32,
        col: u32,
    ) -> Result<Vec<(EngineSheetId, u32, u32)>, EngineError>;
}

/// Creates fresh engine contexts; hydration asks for one per build.
pub trait EngineFactory: Send + Sync {
    fn create(&self) -> Box<dyn EvaluationEngine>;

    fn version(&self) -> String;
}
