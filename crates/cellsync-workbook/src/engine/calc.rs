//! [`EvaluationEngine`] backed by the bundled `cellsync-eval` engine.

use std::sync::atomic::AtomicBool;

use cellsync_common::{ExcelErrorKind, LiteralValue};
use cellsync_eval::{CellRef, ENGINE_VERSION, Engine, EvalConfig, EvalError, NameScope, SheetId};
use serde_json::{Value, json};

use super::{EngineError, EngineFactory, EngineSheetId, EvaluationEngine};
use crate::document::RawValue;

pub struct CalcEngine {
    engine: Engine,
}

impl CalcEngine {
    pub fn new(config: EvalConfig) -> Self {
        Self {
            engine: Engine::new(config),
        }
    }

    pub fn inner(&self) -> &Engine {
        &self.engine
    }

    fn sheet(&self, id: EngineSheetId) -> Result<SheetId, EngineError> {
        SheetId::try_from(id)
            .ok()
            .filter(|sid| self.engine.sheet_name(*sid).is_some())
            .ok_or(EngineError::UnknownSheet(id))
    }
}

impl Default for CalcEngine {
    fn default() -> Self {
        Self::new(EvalConfig::default())
    }
}

fn rejected(e: EvalError) -> EngineError {
    EngineError::Rejected(e.to_string())
}

fn literal(value: &RawValue) -> LiteralValue {
    match value {
        RawValue::Bool(b) => LiteralValue::Boolean(*b),
        RawValue::Number(n) => LiteralValue::Number(*n),
        RawValue::Text(s) => LiteralValue::Text(s.clone()),
    }
}

/// Wire form: plain JSON scalars, with dates and errors as tagged objects.
fn to_json(value: LiteralValue) -> Value {
    match value {
        LiteralValue::Number(n) => json!(n),
        LiteralValue::Text(s) => Value::String(s),
        LiteralValue::Boolean(b) => Value::Bool(b),
        LiteralValue::Empty => Value::Null,
        LiteralValue::DateTime(_) => json!({
            "type": "DATE",
            "serial": value.as_serial_number(),
        }),
        LiteralValue::Error(e) => json!({
            "type": "ERROR",
            "value": e.kind.marker(),
            "message": e.message_or_default(),
        }),
        LiteralValue::Array(_) => to_json(value.into_scalar()),
    }
}

impl EvaluationEngine for CalcEngine {
    fn version(&self) -> &str {
        ENGINE_VERSION
    }

    fn add_sheet(&mut self, name: &str) -> Result<EngineSheetId, EngineError> {
        self.engine
            .add_sheet(name)
            .map(EngineSheetId::from)
            .map_err(rejected)
    }

    fn sheet_id(&self, name: &str) -> Option<EngineSheetId> {
        self.engine.sheet_id(name).map(EngineSheetId::from)
    }

    fn set_cell_formula(
        &mut self,
        sheet: EngineSheetId,
        row: u32,
        col: u32,
        formula: &str,
    ) -> Result<(), EngineError> {
        let sheet = self.sheet(sheet)?;
        self.engine
            .set_cell_formula(sheet, row, col, formula)
            .map_err(rejected)
    }

    fn set_cell_value(
        &mut self,
        sheet: EngineSheetId,
        row: u32,
        col: u32,
        value: &RawValue,
    ) -> Result<(), EngineError> {
        let sheet = self.sheet(sheet)?;
        self.engine
            .set_cell_value(sheet, row, col, literal(value))
            .map_err(rejected)
    }

    fn define_name(
        &mut self,
        name: &str,
        expression: &str,
        scope: Option<EngineSheetId>,
    ) -> Result<(), EngineError> {
        let scope = match scope {
            Some(id) => NameScope::Sheet(self.sheet(id)?),
            None => NameScope::Workbook,
        };
        self.engine
            .define_name(name, expression, scope)
            .map_err(rejected)
    }

    fn recalculate(&mut self, cancel: &AtomicBool) -> Result<(), EngineError> {
        match self.engine.evaluate_all_cancellable(cancel) {
            Ok(_) => Ok(()),
            Err(e) if e.kind == ExcelErrorKind::Cancelled => Err(EngineError::Cancelled),
            Err(e) => Err(EngineError::Internal(e.to_string())),
        }
    }

    fn cell_value(
        &self,
        sheet: EngineSheetId,
        row: u32,
        col: u32,
    ) -> Result<Value, EngineError> {
        let sheet = self.sheet(sheet)?;
        self.engine
            .get_cell_value(sheet, row, col)
            .map(to_json)
            .ok_or(EngineError::UnknownSheet(EngineSheetId::from(sheet)))
    }

    fn sheet_dimensions(&self, sheet: EngineSheetId) -> Result<(u32, u32), EngineError> {
        let sheet = self.sheet(sheet)?;
        self.engine
            .sheet_dimensions(sheet)
            .ok_or(EngineError::UnknownSheet(EngineSheetId::from(sheet)))
    }

    fn dependents(
        &self,
        sheet: EngineSheetId,
        row: u32,
        col: u32,
    ) -> Result<Vec<(EngineSheetId, u32, u32)>, EngineError> {
        let sheet = self.sheet(sheet)?;
        Ok(self
            .engine
            .dependents(CellRef::new(sheet, row, col))
            .into_iter()
            .map(|c| (EngineSheetId::from(c.sheet), c.coord.row, c.coord.col))
            .collect())
    }
}

#[derive(Debug, Clone, Default)]
pub struct CalcEngineFactory {
    pub config: EvalConfig,
}

impl EngineFactory for CalcEngineFactory {
    fn create(&self) -> Box<dyn EvaluationEngine> {
        Box::new(CalcEngine::new(self.config.clone()))
    }

    fn version(&self) -> String {
        ENGINE_VERSION.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn values_cross_the_seam_as_json() {
        let mut engine = CalcEngine::default();
        let s = engine.add_sheet("Sheet1").unwrap();
        engine
            .set_cell_value(s, 0, 0, &RawValue::Number(4.0))
            .unwrap();
        engine.set_cell_formula(s, 0, 1, "=A1/0").unwrap();
        engine.set_cell_formula(s, 0, 2, "=DATE(2024,3,1)").unwrap();
        engine.set_cell_formula(s, 0, 3, "=A1*2").unwrap();
        engine.recalculate(&AtomicBool::new(false)).unwrap();

        assert_eq!(engine.cell_value(s, 0, 3).unwrap(), json!(8.0));
        let err = engine.cell_value(s, 0, 1).unwrap();
        assert_eq!(err["type"], "ERROR");
        assert_eq!(err["value"], "#DIV/0!");
        let date = engine.cell_value(s, 0, 2).unwrap();
        assert_eq!(date["type"], "DATE");
        assert_eq!(date["serial"], 45352.0);
        assert_eq!(engine.cell_value(s, 9, 9).unwrap(), Value::Null);
        assert_eq!(engine.dependents(s, 0, 0).unwrap(), vec![(s, 0, 1), (s, 0, 3)]);
    }

    #[test]
    fn unknown_sheet_ids_are_errors() {
        let engine = CalcEngine::default();
        assert_eq!(
            engine.sheet_dimensions(7),
            Err(EngineError::UnknownSheet(7))
        );
    }

    #[test]
    fn raised_flag_reports_cancellation() {
        let mut engine = CalcEngine::default();
        let s = engine.add_sheet("Sheet1").unwrap();
        engine.set_cell_formula(s, 0, 0, "=1+1").unwrap();
        assert_eq!(
            engine.recalculate(&AtomicBool::new(true)),
            Err(EngineError::Cancelled)
        );
    }
}
