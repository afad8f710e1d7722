use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

use cellsync_common::{ExcelError, ExcelErrorKind, LiteralValue};

use super::scheduler::Scheduler;
use super::{CellContent, Engine, EvalResult};
use crate::interpreter::Interpreter;
use crate::reference::CellRef;

impl Engine {
    pub fn evaluate_all(&mut self) -> Result<EvalResult, ExcelError> {
        self.evaluate_all_cancellable(&AtomicBool::new(false))
    }

    /// Recalculate every formula. Cycle members are set to `#CIRC!`; the rest
    /// are evaluated layer by layer. The flag is polled between cycles, between
    /// layers and every `cancel_check_interval` vertices; a cancelled pass
    /// returns `#CANCELLED!` and leaves already-computed results in place.
    pub fn evaluate_all_cancellable(
        &mut self,
        cancel_flag: &AtomicBool,
    ) -> Result<EvalResult, ExcelError> {
        let start = Instant::now();
        let mut computed_vertices = 0;
        let mut cycle_errors = 0;

        let to_evaluate = self.formula_cells();
        if to_evaluate.is_empty() {
            self.rebuild_dependency_index();
            return Ok(EvalResult {
                computed_vertices,
                cycle_errors,
                elapsed: start.elapsed(),
            });
        }

        let edges = self.precedent_map(&to_evaluate);
        let schedule = Scheduler::new(&edges).create_schedule(&to_evaluate);

        for cycle in &schedule.cycles {
            check_cancelled(cancel_flag, "during cycle handling")?;
            cycle_errors += 1;
            let circ = LiteralValue::Error(
                ExcelError::new(ExcelErrorKind::Circ).with_message("Circular dependency detected"),
            );
            for &cell in cycle {
                self.store_result(cell, circ.clone());
            }
        }

        let interval = self.config.cancel_check_interval.max(1);
        for layer in &schedule.layers {
            check_cancelled(cancel_flag, "between layers")?;
            for &cell in &layer.vertices {
                if computed_vertices % interval == 0 {
                    check_cancelled(cancel_flag, "inside a layer")?;
                }
                let value = self.evaluate_cell(cell);
                self.store_result(cell, value);
                computed_vertices += 1;
            }
        }

        self.rebuild_dependency_index();

        #[cfg(feature = "tracing")]
        tracing::debug!(
            computed_vertices,
            cycle_errors,
            elapsed_ms = start.elapsed().as_millis() as u64,
            "evaluation pass finished"
        );

        Ok(EvalResult {
            computed_vertices,
            cycle_errors,
            elapsed: start.elapsed(),
        })
    }

    fn evaluate_cell(&self, cell: CellRef) -> LiteralValue {
        let Some(sheet) = self.sheets.get(cell.sheet) else {
            return LiteralValue::Error(ExcelError::new(ExcelErrorKind::Ref));
        };
        match sheet.cells.get(&cell.coord) {
            Some(CellContent::Formula(f)) => match &f.ast {
                Ok(ast) => Interpreter::new(self, cell.sheet).evaluate_formula(ast),
                Err(msg) => LiteralValue::Error(
                    ExcelError::new(ExcelErrorKind::Error)
                        .with_message(format!("Formula could not be parsed: {msg}")),
                ),
            },
            Some(CellContent::Value(v)) => v.clone(),
            None => LiteralValue::Empty,
        }
    }

    fn store_result(&mut self, cell: CellRef, value: LiteralValue) {
        if let Some(sheet) = self.sheets.get_mut(cell.sheet)
            && let Some(CellContent::Formula(f)) = sheet.cells.get_mut(&cell.coord)
        {
            f.result = value;
        }
    }
}

fn check_cancelled(flag: &AtomicBool, phase: &str) -> Result<(), ExcelError> {
    if flag.load(Ordering::Relaxed) {
        return Err(ExcelError::new(ExcelErrorKind::Cancelled)
            .with_message(format!("Evaluation cancelled {phase}")));
    }
    Ok(())
}
