//! Reference evaluation engine: sheets, defined names and full recalculation.

pub mod eval;
pub mod graph;
pub mod named_range;
pub mod scheduler;
pub mod sheet_registry;

#[cfg(test)]
mod tests;

use std::time::Duration;

use cellsync_common::{CellCoord, LiteralValue};
use cellsync_parse::{ParserError, is_name_like, parse};
use rustc_hash::FxHashMap;

pub use named_range::{NameScope, NamedRange};
pub use scheduler::{Layer, Schedule, Scheduler};
pub use sheet_registry::{CellContent, FormulaCell, Sheet, SheetRegistry};

use crate::reference::SheetId;
use named_range::name_key;

/// Identifies this engine build; stamped onto every cached value.
pub const ENGINE_VERSION: &str = concat!("cellsync-eval/", env!("CARGO_PKG_VERSION"));

#[derive(Debug, Clone)]
pub struct EvalConfig {
    /// Vertices evaluated between two polls of the cancellation flag.
    pub cancel_check_interval: usize,
    /// Maximum nesting of names referring to names.
    pub max_name_depth: usize,
    /// Ranges larger than this evaluate to `#REF!` instead of materialising.
    pub max_range_cells: u64,
}

impl Default for EvalConfig {
    fn default() -> Self {
        Self {
            cancel_check_interval: 256,
            max_name_depth: 16,
            max_range_cells: 1_000_000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EvalResult {
    pub computed_vertices: usize,
    pub cycle_errors: usize,
    pub elapsed: Duration,
}

#[derive(Debug, thiserror::Error)]
pub enum EvalError {
    #[error("a sheet named '{0}' already exists")]
    DuplicateSheet(String),
    #[error("sheet limit reached")]
    TooManySheets,
    #[error("unknown sheet '{0}'")]
    UnknownSheet(String),
    #[error("unknown sheet id {0}")]
    UnknownSheetId(SheetId),
    #[error("'{0}' is not a valid name")]
    InvalidName(String),
    #[error("name '{name}' has an invalid expression: {source}")]
    InvalidNameExpression { name: String, source: ParserError },
    #[error("names cannot be defined before any sheet exists")]
    NoSheets,
}

pub struct Engine {
    pub config: EvalConfig,
    sheets: SheetRegistry,
    names: FxHashMap<(NameScope, String), NamedRange>,
    dependency_index: Option<graph::DependencyIndex>,
}

impl Default for Engine {
    fn default() -> Self {
        Self::new(EvalConfig::default())
    }
}

impl Engine {
    pub fn new(config: EvalConfig) -> Self {
        Self {
            config,
            sheets: SheetRegistry::default(),
            names: FxHashMap::default(),
            dependency_index: None,
        }
    }

    pub fn add_sheet(&mut self, name: &str) -> Result<SheetId, EvalError> {
        if self.sheets.id_of(name).is_some() {
            return Err(EvalError::DuplicateSheet(name.to_string()));
        }
        let id = self.sheets.add(name).ok_or(EvalError::TooManySheets)?;
        #[cfg(feature = "tracing")]
        tracing::trace!(sheet = name, id, "added sheet");
        Ok(id)
    }

    pub fn sheet_id(&self, name: &str) -> Option<SheetId> {
        self.sheets.id_of(name)
    }

    pub fn sheet_name(&self, id: SheetId) -> Option<&str> {
        self.sheets.get(id).map(|s| s.name.as_str())
    }

    pub fn sheets(&self) -> &SheetRegistry {
        &self.sheets
    }

    fn sheet_mut(&mut self, id: SheetId) -> Result<&mut Sheet, EvalError> {
        self.dependency_index = None;
        self.sheets.get_mut(id).ok_or(EvalError::UnknownSheetId(id))
    }

    /// Store a constant. `Empty` removes the cell.
    pub fn set_cell_value(
        &mut self,
        sheet: SheetId,
        row: u32,
        col: u32,
        value: LiteralValue,
    ) -> Result<(), EvalError> {
        let at = CellCoord::new(row, col);
        let sheet = self.sheet_mut(sheet)?;
        if value == LiteralValue::Empty {
            sheet.cells.remove(&at);
        } else {
            sheet.cells.insert(at, CellContent::Value(value));
        }
        Ok(())
    }

    /// Store a formula. Text that fails to parse is kept and evaluates to `#ERROR!`.
    pub fn set_cell_formula(
        &mut self,
        sheet: SheetId,
        row: u32,
        col: u32,
        formula: &str,
    ) -> Result<(), EvalError> {
        let ast = parse(formula).map_err(|e| e.to_string());
        let cell = FormulaCell {
            source: formula.to_string(),
            ast,
            result: LiteralValue::Empty,
        };
        self.sheet_mut(sheet)?
            .cells
            .insert(CellCoord::new(row, col), CellContent::Formula(cell));
        Ok(())
    }

    pub fn clear_cell(&mut self, sheet: SheetId, row: u32, col: u32) -> Result<(), EvalError> {
        self.sheet_mut(sheet)?
            .cells
            .remove(&CellCoord::new(row, col));
        Ok(())
    }

    /// Current value of a cell; `Empty` when nothing is stored.
    pub fn get_cell_value(&self, sheet: SheetId, row: u32, col: u32) -> Option<LiteralValue> {
        self.sheets
            .get(sheet)
            .map(|s| s.value(CellCoord::new(row, col)))
    }

    pub fn get_cell_formula(&self, sheet: SheetId, row: u32, col: u32) -> Option<&str> {
        match self.sheets.get(sheet)?.cells.get(&CellCoord::new(row, col))? {
            CellContent::Formula(f) => Some(f.source.as_str()),
            CellContent::Value(_) => None,
        }
    }

    /// `(rows, cols)` spanned by the sheet's occupied cells.
    pub fn sheet_dimensions(&self, sheet: SheetId) -> Option<(u32, u32)> {
        self.sheets.get(sheet).map(Sheet::dimensions)
    }

    /// Define `name` as `expression` (a reference such as `Sheet1!$A$1:$B$2`,
    /// or any formula body). Redefining replaces the previous definition.
    pub fn define_name(
        &mut self,
        name: &str,
        expression: &str,
        scope: NameScope,
    ) -> Result<(), EvalError> {
        if !is_name_like(name) || cellsync_common::parse_address(name).is_ok() {
            return Err(EvalError::InvalidName(name.to_string()));
        }
        let home_sheet = match scope {
            NameScope::Sheet(id) => {
                self.sheets.get(id).ok_or(EvalError::UnknownSheetId(id))?;
                id
            }
            NameScope::Workbook if self.sheets.is_empty() => return Err(EvalError::NoSheets),
            NameScope::Workbook => 0,
        };
        let body = expression.trim();
        let body = body.strip_prefix('=').unwrap_or(body);
        let ast = parse(format!("={body}")).map_err(|source| EvalError::InvalidNameExpression {
            name: name.to_string(),
            source,
        })?;
        for reference in ast.references() {
            if let Some(sheet) = reference.sheet()
                && self.sheets.id_of(sheet).is_none()
            {
                return Err(EvalError::UnknownSheet(sheet.to_string()));
            }
        }
        self.dependency_index = None;
        self.names.insert(
            name_key(scope, name),
            NamedRange {
                name: name.to_string(),
                scope,
                expression: body.to_string(),
                ast,
                home_sheet,
            },
        );
        Ok(())
    }

    /// Sheet scope shadows workbook scope.
    pub fn resolve_name(&self, name: &str, current_sheet: SheetId) -> Option<&NamedRange> {
        self.names
            .get(&name_key(NameScope::Sheet(current_sheet), name))
            .or_else(|| self.names.get(&name_key(NameScope::Workbook, name)))
    }

    pub fn named_ranges(&self) -> impl Iterator<Item = &NamedRange> {
        self.names.values()
    }
}
