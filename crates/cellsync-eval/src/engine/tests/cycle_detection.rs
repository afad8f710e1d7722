use cellsync_common::{ExcelErrorKind, LiteralValue};

use super::common::*;

fn is_circ(v: &LiteralValue) -> bool {
    matches!(v, LiteralValue::Error(e) if e.kind == ExcelErrorKind::Circ)
}

#[test]
fn two_cell_cycle_marks_both_cells() {
    let (mut engine, s) = engine_with_sheet();
    set_formula(&mut engine, s, "A1", "=A2+1");
    set_formula(&mut engine, s, "A2", "=A1+1");

    let result = engine.evaluate_all().unwrap();
    assert_eq!(result.cycle_errors, 1);
    assert!(is_circ(&value(&engine, s, "A1")));
    assert!(is_circ(&value(&engine, s, "A2")));
}

#[test]
fn self_reference_is_a_cycle() {
    let (mut engine, s) = engine_with_sheet();
    set_formula(&mut engine, s, "B2", "=B2*2");
    engine.evaluate_all().unwrap();
    assert!(is_circ(&value(&engine, s, "B2")));
}

#[test]
fn cycle_through_range_is_detected() {
    let (mut engine, s) = engine_with_sheet();
    set_num(&mut engine, s, "A1", 1.0);
    set_formula(&mut engine, s, "A3", "=SUM(A1:A2)");
    set_formula(&mut engine, s, "A2", "=A3");
    engine.evaluate_all().unwrap();
    assert!(is_circ(&value(&engine, s, "A2")));
    assert!(is_circ(&value(&engine, s, "A3")));
}

#[test]
fn acyclic_branch_still_evaluates() {
    let (mut engine, s) = engine_with_sheet();
    set_formula(&mut engine, s, "A1", "=B1");
    set_formula(&mut engine, s, "B1", "=A1");
    set_num(&mut engine, s, "D1", 42.0);
    set_formula(&mut engine, s, "C1", "=D1*2");

    engine.evaluate_all().unwrap();
    assert!(is_circ(&value(&engine, s, "A1")));
    assert_eq!(value(&engine, s, "C1"), LiteralValue::Number(84.0));
}

#[test]
fn downstream_of_cycle_sees_the_error() {
    let (mut engine, s) = engine_with_sheet();
    set_formula(&mut engine, s, "A1", "=A2");
    set_formula(&mut engine, s, "A2", "=A1");
    set_formula(&mut engine, s, "A3", "=A1+1");
    engine.evaluate_all().unwrap();
    assert!(is_circ(&value(&engine, s, "A3")));
}
