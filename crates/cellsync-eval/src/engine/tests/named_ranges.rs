use cellsync_common::{ExcelErrorKind, LiteralValue};

use super::common::*;
use crate::engine::{EvalError, NameScope};

#[test]
fn workbook_name_over_a_range() {
    let (mut engine, s) = engine_with_sheet();
    set_num(&mut engine, s, "A1", 2.0);
    set_num(&mut engine, s, "A2", 3.0);
    engine
        .define_name("Prices", "Sheet1!$A$1:$A$2", NameScope::Workbook)
        .unwrap();
    set_formula(&mut engine, s, "B1", "=SUM(Prices)*10");
    engine.evaluate_all().unwrap();
    assert_eq!(value(&engine, s, "B1"), LiteralValue::Number(50.0));
    assert_eq!(engine.dependents(at(s, "A2")), vec![at(s, "B1")]);
}

#[test]
fn sheet_scope_shadows_workbook_scope() {
    let (mut engine, s1) = engine_with_sheet();
    let s2 = engine.add_sheet("Other").unwrap();
    set_num(&mut engine, s1, "A1", 1.0);
    set_num(&mut engine, s2, "A1", 99.0);
    engine
        .define_name("Rate", "Sheet1!A1", NameScope::Workbook)
        .unwrap();
    engine
        .define_name("Rate", "Other!A1", NameScope::Sheet(s2))
        .unwrap();
    set_formula(&mut engine, s1, "B1", "=Rate");
    set_formula(&mut engine, s2, "B1", "=Rate");
    engine.evaluate_all().unwrap();
    assert_eq!(value(&engine, s1, "B1"), LiteralValue::Number(1.0));
    assert_eq!(value(&engine, s2, "B1"), LiteralValue::Number(99.0));
}

#[test]
fn names_are_case_insensitive_and_redefinable() {
    let (mut engine, s) = engine_with_sheet();
    set_num(&mut engine, s, "A1", 4.0);
    set_num(&mut engine, s, "A2", 8.0);
    engine.define_name("Total", "A1", NameScope::Workbook).unwrap();
    set_formula(&mut engine, s, "B1", "=total");
    engine.evaluate_all().unwrap();
    assert_eq!(value(&engine, s, "B1"), LiteralValue::Number(4.0));

    engine.define_name("TOTAL", "A2", NameScope::Workbook).unwrap();
    engine.evaluate_all().unwrap();
    assert_eq!(value(&engine, s, "B1"), LiteralValue::Number(8.0));
    assert_eq!(engine.named_ranges().count(), 1);
}

#[test]
fn unknown_name_is_name_error() {
    let (mut engine, s) = engine_with_sheet();
    set_formula(&mut engine, s, "A1", "=Nope+1");
    engine.evaluate_all().unwrap();
    assert!(matches!(value(&engine, s, "A1"), LiteralValue::Error(e) if e.kind == ExcelErrorKind::Name));
}

#[test]
fn self_referential_names_stop_at_depth_limit() {
    let (mut engine, s) = engine_with_sheet();
    engine.define_name("Loop", "Loop+1", NameScope::Workbook).unwrap();
    set_formula(&mut engine, s, "A1", "=Loop");
    engine.evaluate_all().unwrap();
    assert!(matches!(value(&engine, s, "A1"), LiteralValue::Error(e) if e.kind == ExcelErrorKind::Circ));
}

#[test]
fn invalid_definitions_are_rejected() {
    let (mut engine, _) = engine_with_sheet();
    assert!(matches!(
        engine.define_name("A1", "B2", NameScope::Workbook),
        Err(EvalError::InvalidName(_))
    ));
    assert!(matches!(
        engine.define_name("Ghost", "Nowhere!A1", NameScope::Workbook),
        Err(EvalError::UnknownSheet(_))
    ));
    assert!(matches!(
        engine.define_name("Broken", "1+(", NameScope::Workbook),
        Err(EvalError::InvalidNameExpression { .. })
    ));
}

#[test]
fn names_need_a_sheet() {
    let mut engine = crate::engine::Engine::default();
    assert!(matches!(
        engine.define_name("X", "1", NameScope::Workbook),
        Err(EvalError::NoSheets)
    ));
}
