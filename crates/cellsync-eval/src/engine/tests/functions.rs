use cellsync_common::{ExcelErrorKind, LiteralValue};
use chrono::NaiveDate;

use super::common::*;

fn eval(formula: &str) -> LiteralValue {
    let (mut engine, s) = engine_with_sheet();
    set_num(&mut engine, s, "A1", 1.0);
    set_num(&mut engine, s, "A2", 2.0);
    set_num(&mut engine, s, "A3", 3.0);
    let c = cellsync_common::parse_address("A4").unwrap();
    engine
        .set_cell_value(s, c.row, c.col, LiteralValue::Text("x".into()))
        .unwrap();
    set_formula(&mut engine, s, "Z1", formula);
    engine.evaluate_all().unwrap();
    value(&engine, s, "Z1")
}

fn num(formula: &str) -> f64 {
    match eval(formula) {
        LiteralValue::Number(n) => n,
        other => panic!("{formula}: expected number, got {other:?}"),
    }
}

fn err_kind(formula: &str) -> ExcelErrorKind {
    match eval(formula) {
        LiteralValue::Error(e) => e.kind,
        other => panic!("{formula}: expected error, got {other:?}"),
    }
}

#[test]
fn aggregates_skip_text_in_ranges() {
    assert_eq!(num("=SUM(A1:A4)"), 6.0);
    assert_eq!(num("=AVERAGE(A1:A4)"), 2.0);
    assert_eq!(num("=COUNT(A1:A4)"), 3.0);
    assert_eq!(num("=COUNTA(A1:A10)"), 4.0);
    assert_eq!(num("=MIN(A1:A3, -1)"), -1.0);
    assert_eq!(num("=MAX(A1:A3)"), 3.0);
    assert_eq!(num("=PRODUCT(A1:A3, 2)"), 12.0);
    assert_eq!(num("=SUM(\"4\", TRUE)"), 5.0);
}

#[test]
fn aggregate_edge_cases() {
    assert_eq!(num("=MAX(B1:B5)"), 0.0);
    assert_eq!(err_kind("=AVERAGE(B1:B5)"), ExcelErrorKind::Div);
    assert_eq!(err_kind("=SUM(A1, 1/0)"), ExcelErrorKind::Div);
    assert_eq!(err_kind("=SUM(\"abc\")"), ExcelErrorKind::Value);
}

#[test]
fn rounding_and_math() {
    assert_eq!(num("=ROUND(2.5)"), 3.0);
    assert_eq!(num("=ROUND(-2.5)"), -3.0);
    assert_eq!(num("=ROUND(1234.5678, 2)"), 1234.57);
    assert_eq!(num("=ROUND(1234.5678, -2)"), 1200.0);
    assert_eq!(num("=ABS(-7)"), 7.0);
    assert_eq!(num("=MOD(-3, 2)"), 1.0);
    assert_eq!(err_kind("=MOD(1, 0)"), ExcelErrorKind::Div);
}

#[test]
fn logical_functions() {
    assert_eq!(eval("=IF(A1>0, \"pos\", \"neg\")"), LiteralValue::Text("pos".into()));
    assert_eq!(eval("=IF(A1>5, 1)"), LiteralValue::Boolean(false));
    // Untaken branch is not evaluated
    assert_eq!(num("=IF(TRUE, 1, 1/0)"), 1.0);
    assert_eq!(eval("=AND(A1:A3)"), LiteralValue::Boolean(true));
    assert_eq!(eval("=OR(0, FALSE)"), LiteralValue::Boolean(false));
    assert_eq!(eval("=NOT(0)"), LiteralValue::Boolean(true));
    assert_eq!(num("=IFERROR(1/0, 9)"), 9.0);
    assert_eq!(err_kind("=AND(\"maybe\")"), ExcelErrorKind::Value);
}

#[test]
fn text_functions() {
    assert_eq!(eval("=CONCAT(\"a\", A1, \"b\")"), LiteralValue::Text("a1b".into()));
    assert_eq!(eval("=CONCATENATE(A1:A3)"), LiteralValue::Text("123".into()));
    assert_eq!(num("=LEN(\"héllo\")"), 5.0);
    assert_eq!(eval("=UPPER(A4)"), LiteralValue::Text("X".into()));
    assert_eq!(eval("=LOWER(\"AbC\")"), LiteralValue::Text("abc".into()));
    assert_eq!(eval("=TRIM(\"  a   b \")"), LiteralValue::Text("a b".into()));
}

#[test]
fn date_functions() {
    let expected = NaiveDate::from_ymd_opt(2024, 3, 1)
        .unwrap()
        .and_hms_opt(0, 0, 0)
        .unwrap();
    assert_eq!(eval("=DATE(2024, 3, 1)"), LiteralValue::DateTime(expected));
    // Month overflow rolls into the next year
    assert_eq!(num("=YEAR(DATE(2023, 13, 1))"), 2024.0);
    // Day overflow rolls into the next month
    assert_eq!(num("=MONTH(DATE(2024, 2, 30))"), 3.0);
    assert_eq!(num("=DAY(45352)"), 1.0);
    assert_eq!(num("=DATE(2024, 3, 1)+1"), 45353.0);
    assert_eq!(err_kind("=DATE(10000, 1, 1)"), ExcelErrorKind::Num);
}

#[test]
fn unknown_function_is_name_error() {
    assert_eq!(err_kind("=FROBNICATE(1)"), ExcelErrorKind::Name);
}
