//! Token-level reference utilities that work without building a full AST.

use cellsync_common::{AnchoredCoord, parse_anchored_address};

use crate::parser::ReferenceType;
use crate::tokenizer::{TokenSubType, TokenType, Tokenizer, TokenizerError};

/// References named in a formula, in source order.
///
/// Operands that are neither addresses nor name-like are skipped, so this is
/// usable on formulas the parser would reject for other reasons.
pub fn extract_references(formula: &str) -> Result<Vec<ReferenceType>, TokenizerError> {
    let tokenizer = Tokenizer::new(formula)?;
    Ok(tokenizer
        .items
        .iter()
        .filter(|t| t.token_type == TokenType::Operand && t.subtype == TokenSubType::Range)
        .filter_map(|t| ReferenceType::from_string(&t.value).ok())
        .collect())
}

/// Move every relative cell reference in `formula` by `(drow, dcol)`.
///
/// `$`-anchored parts stay fixed, names are untouched and references pushed off
/// the grid become `#REF!`. Non-formula text is returned as-is.
pub fn shift_formula(formula: &str, drow: i64, dcol: i64) -> Result<String, TokenizerError> {
    let tokenizer = Tokenizer::new(formula)?;
    let mut out = String::with_capacity(formula.len() + 8);
    let mut cursor = 0;
    for token in &tokenizer.items {
        if token.token_type != TokenType::Operand || token.subtype != TokenSubType::Range {
            continue;
        }
        if let Some(replacement) = shift_reference_text(&token.value, drow, dcol) {
            out.push_str(&formula[cursor..token.start]);
            out.push_str(&replacement);
            cursor = token.end;
        }
    }
    out.push_str(&formula[cursor..]);
    Ok(out)
}

/// `None` when the text is not an address (names, malformed operands).
fn shift_reference_text(text: &str, drow: i64, dcol: i64) -> Option<String> {
    let (prefix, body) = match text.rfind('!') {
        Some(bang) => text.split_at(bang + 1),
        None => ("", text),
    };
    let parts: Vec<AnchoredCoord> = body
        .split(':')
        .map(parse_anchored_address)
        .collect::<Result<_, _>>()
        .ok()?;
    let mut shifted = Vec::with_capacity(parts.len());
    for part in parts {
        match part.shifted(drow, dcol) {
            Some(moved) => shifted.push(moved.to_string()),
            None => return Some("#REF!".to_string()),
        }
    }
    Some(format!("{prefix}{}", shifted.join(":")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use cellsync_common::CellCoord;

    #[test]
    fn shifts_relative_parts_only() {
        assert_eq!(shift_formula("=A1+$B$2", 2, 1).unwrap(), "=B3+$B$2");
        assert_eq!(shift_formula("=SUM(A$1:A3)", 1, 0).unwrap(), "=SUM(A$1:A4)");
        assert_eq!(
            shift_formula("='My Sheet'!C3*Rate", 0, 2).unwrap(),
            "='My Sheet'!E3*Rate"
        );
        assert_eq!(shift_formula("=\"A1\"&A1", 1, 0).unwrap(), "=\"A1\"&A2");
    }

    #[test]
    fn off_grid_references_become_ref_errors() {
        assert_eq!(shift_formula("=A1*2", -1, 0).unwrap(), "=#REF!*2");
        assert_eq!(shift_formula("plain text", 3, 3).unwrap(), "plain text");
    }

    #[test]
    fn extraction_skips_literals() {
        let refs = extract_references("=IF(A1>0, Sheet2!B1:B4, \"C9\") + Total").unwrap();
        assert_eq!(refs.len(), 3);
        assert_eq!(
            refs[0],
            ReferenceType::Cell {
                sheet: None,
                coord: CellCoord::new(0, 0)
            }
        );
        assert_eq!(refs[2], ReferenceType::NamedRange("Total".into()));
    }
}
