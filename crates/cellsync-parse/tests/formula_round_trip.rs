use cellsync_parse::{ReferenceType, Tokenizer, extract_references, parse, shift_formula};
use proptest::prelude::*;

#[test]
fn render_preserves_source_text() {
    let formulas = [
        "=A1+B2",
        "=SUM( A1:A10 , 2 )",
        "='Q1 Data'!B7*1.5E-2",
        "=IF(A1<>\"\",\"x\"\"y\",#N/A)",
        "={1,2;3,4}",
        "not a formula",
    ];
    for formula in formulas {
        assert_eq!(Tokenizer::new(formula).unwrap().render(), formula);
    }
}

#[test]
fn shifted_formula_still_parses() {
    let shifted = shift_formula("=SUM($A1:B2)*C$3", 4, 2).unwrap();
    assert_eq!(shifted, "=SUM($A5:D6)*E$3");
    let refs: Vec<String> = parse(&shifted)
        .unwrap()
        .references()
        .into_iter()
        .map(ToString::to_string)
        .collect();
    assert_eq!(refs, ["A5:D6", "E3"]);
}

#[test]
fn references_keep_sheet_qualifiers() {
    let refs = extract_references("=Data!A1+'Other Sheet'!B2:C3").unwrap();
    assert_eq!(refs[0].sheet(), Some("Data"));
    assert!(matches!(&refs[1], ReferenceType::Range { sheet: Some(s), .. } if s == "Other Sheet"));
}

proptest! {
    #[test]
    fn shift_then_unshift_is_identity(r in 0u32..200, c in 0u32..200, dr in 0i64..50, dc in 0i64..50) {
        let formula = format!("={}+1", cellsync_common::to_address(r, c));
        let there = shift_formula(&formula, dr, dc).unwrap();
        let back = shift_formula(&there, -dr, -dc).unwrap();
        prop_assert_eq!(back, formula);
    }
}
