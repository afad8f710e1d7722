//! Common test helpers
use cellsync_common::{LiteralValue, parse_address};

use crate::engine::Engine;
use crate::reference::{CellRef, SheetId};

pub fn engine_with_sheet() -> (Engine, SheetId) {
    let mut engine = Engine::default();
    let id = engine.add_sheet("Sheet1").unwrap();
    (engine, id)
}

pub fn at(sheet: SheetId, addr: &str) -> CellRef {
    let c = parse_address(addr).unwrap();
    CellRef::new(sheet, c.row, c.col)
}

pub fn set_num(engine: &mut Engine, sheet: SheetId, addr: &str, n: f64) {
    let c = parse_address(addr).unwrap();
    engine
        .set_cell_value(sheet, c.row, c.col, LiteralValue::Number(n))
        .unwrap();
}

pub fn set_formula(engine: &mut Engine, sheet: SheetId, addr: &str, formula: &str) {
    let c = parse_address(addr).unwrap();
    engine
        .set_cell_formula(sheet, c.row, c.col, formula)
        .unwrap();
}

pub fn value(engine: &Engine, sheet: SheetId, addr: &str) -> LiteralValue {
    let c = parse_address(addr).unwrap();
    engine.get_cell_value(sheet, c.row, c.col).unwrap()
}
