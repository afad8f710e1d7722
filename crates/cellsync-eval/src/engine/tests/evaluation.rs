use cellsync_common::{ExcelErrorKind, LiteralValue};

use super::common::*;

#[test]
fn simple_sum_recomputes_after_edit() {
    let (mut engine, s) = engine_with_sheet();
    set_num(&mut engine, s, "A1", 10.0);
    set_num(&mut engine, s, "A2", 5.0);
    set_formula(&mut engine, s, "B1", "=A1+A2");
    engine.evaluate_all().unwrap();
    assert_eq!(value(&engine, s, "B1"), LiteralValue::Number(15.0));

    set_num(&mut engine, s, "A1", 20.0);
    engine.evaluate_all().unwrap();
    assert_eq!(value(&engine, s, "B1"), LiteralValue::Number(25.0));
}

#[test]
fn chains_evaluate_in_dependency_order() {
    let (mut engine, s) = engine_with_sheet();
    // Declared out of order on purpose
    set_formula(&mut engine, s, "A4", "=A3*2");
    set_formula(&mut engine, s, "A3", "=A2+1");
    set_formula(&mut engine, s, "A2", "=A1+1");
    set_num(&mut engine, s, "A1", 1.0);

    let result = engine.evaluate_all().unwrap();
    assert_eq!(result.computed_vertices, 3);
    assert_eq!(value(&engine, s, "A4"), LiteralValue::Number(6.0));
}

#[test]
fn division_by_zero_and_propagation() {
    let (mut engine, s) = engine_with_sheet();
    set_formula(&mut engine, s, "A1", "=1/0");
    set_formula(&mut engine, s, "A2", "=A1+1");
    engine.evaluate_all().unwrap();
    for addr in ["A1", "A2"] {
        match value(&engine, s, addr) {
            LiteralValue::Error(e) => assert_eq!(e.kind, ExcelErrorKind::Div),
            other => panic!("expected #DIV/0!, got {other:?}"),
        }
    }
}

#[test]
fn unparseable_formula_evaluates_to_error() {
    let (mut engine, s) = engine_with_sheet();
    set_formula(&mut engine, s, "A1", "=1+(");
    engine.evaluate_all().unwrap();
    assert!(matches!(value(&engine, s, "A1"), LiteralValue::Error(e) if e.kind == ExcelErrorKind::Error));
    assert_eq!(engine.get_cell_formula(s, 0, 0), Some("=1+("));
}

#[test]
fn text_concatenation_and_comparison() {
    let (mut engine, s) = engine_with_sheet();
    let c = cellsync_common::parse_address("A1").unwrap();
    engine
        .set_cell_value(s, c.row, c.col, LiteralValue::Text("Hello".into()))
        .unwrap();
    set_formula(&mut engine, s, "B1", "=A1&\" world\"");
    set_formula(&mut engine, s, "C1", "=A1=\"hello\"");
    set_formula(&mut engine, s, "D1", "=5>\"a\"");
    engine.evaluate_all().unwrap();
    assert_eq!(value(&engine, s, "B1"), LiteralValue::Text("Hello world".into()));
    assert_eq!(value(&engine, s, "C1"), LiteralValue::Boolean(true));
    assert_eq!(value(&engine, s, "D1"), LiteralValue::Boolean(false));
}

#[test]
fn empty_cells_read_as_zero() {
    let (mut engine, s) = engine_with_sheet();
    set_formula(&mut engine, s, "A1", "=Z99+2");
    engine.evaluate_all().unwrap();
    assert_eq!(value(&engine, s, "A1"), LiteralValue::Number(2.0));
}

#[test]
fn dimensions_track_occupied_cells() {
    let (mut engine, s) = engine_with_sheet();
    set_num(&mut engine, s, "C5", 1.0);
    assert_eq!(engine.sheet_dimensions(s), Some((5, 3)));
    engine.clear_cell(s, 4, 2).unwrap();
    assert_eq!(engine.sheet_dimensions(s), Some((0, 0)));
}

mod props {
    use proptest::prelude::*;

    use super::*;

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(32))]

        /// Each row adds a constant to one earlier row; the engine must agree
        /// with a straight top-down fold no matter how the graph is shaped.
        #[test]
        fn random_dag_matches_sequential_fold(
            edges in prop::collection::vec((any::<prop::sample::Index>(), 0i32..100), 1..40)
        ) {
            let (mut engine, s) = engine_with_sheet();
            set_num(&mut engine, s, "A1", 1.0);
            let mut expected = vec![1.0f64];
            for (i, (pick, k)) in edges.iter().enumerate() {
                let src = pick.index(expected.len());
                let row = i + 2;
                set_formula(&mut engine, s, &format!("A{row}"), &format!("=A{}+{k}", src + 1));
                expected.push(expected[src] + f64::from(*k));
            }
            engine.evaluate_all().unwrap();
            for (i, want) in expected.iter().enumerate() {
                prop_assert_eq!(value(&engine, s, &format!("A{}", i + 1)), LiteralValue::Number(*want));
            }
        }
    }
}
