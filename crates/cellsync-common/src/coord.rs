//! Coordinate mapping between A1-style document addresses and engine coordinates.
//!
//! Documents key their cells by canonical A1 text (`"A1"`, `"AA100"`), engines address
//! cells by 0-based `(row, col)`. `parse_address` and `to_address` convert between the
//! two and are exact inverses for every canonical address: columns use an unbounded
//! bijective base-26 alphabet (`A..Z`, `AA..ZZ`, `AAA..`) and rows are 1-based in text.
//! The only limit is `u32` overflow.

use core::fmt;
use std::str::FromStr;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Largest 0-based row index whose 1-based text form still fits in `u32`.
pub const MAX_ROW_INDEX: u32 = u32::MAX - 1;

/// Why a piece of text is not a cell address.
#[derive(Clone, Debug, Eq, PartialEq, thiserror::Error)]
pub enum AddressError {
    #[error("address is empty")]
    Empty,
    #[error("address '{0}' has no column letters")]
    MissingColumn(String),
    #[error("address '{0}' has no row number")]
    MissingRow(String),
    #[error("address '{0}' contains unexpected characters")]
    Malformed(String),
    #[error("address '{0}' uses row 0; rows are 1-based")]
    ZeroRow(String),
    #[error("address '{0}' is outside the supported coordinate space")]
    Overflow(String),
}

/// Absolute 0-based grid coordinate as used by evaluation engines.
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, PartialOrd, Ord)]
pub struct CellCoord {
    pub row: u32,
    pub col: u32,
}

impl CellCoord {
    pub const fn new(row: u32, col: u32) -> Self {
        Self { row, col }
    }

    /// Shift by signed deltas, returning `None` when the result leaves the grid.
    pub fn offset(self, drow: i64, dcol: i64) -> Option<Self> {
        let row = i64::from(self.row) + drow;
        let col = i64::from(self.col) + dcol;
        if row < 0 || col < 0 || row > i64::from(MAX_ROW_INDEX) || col > i64::from(u32::MAX) {
            return None;
        }
        Some(Self::new(row as u32, col as u32))
    }

    pub fn to_address(self) -> String {
        to_address(self.row, self.col)
    }
}

impl fmt::Display for CellCoord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", column_to_letters(self.col), u64::from(self.row) + 1)
    }
}

impl FromStr for CellCoord {
    type Err = AddressError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        parse_address(s)
    }
}

/// A coordinate that remembers its `$` anchors, needed when rewriting formulas.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub struct AnchoredCoord {
    pub coord: CellCoord,
    pub row_abs: bool,
    pub col_abs: bool,
}

impl AnchoredCoord {
    /// Move relative parts by the given deltas; anchored parts stay put.
    pub fn shifted(self, drow: i64, dcol: i64) -> Option<Self> {
        let drow = if self.row_abs { 0 } else { drow };
        let dcol = if self.col_abs { 0 } else { dcol };
        self.coord.offset(drow, dcol).map(|coord| Self { coord, ..self })
    }
}

impl fmt::Display for AnchoredCoord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.col_abs {
            f.write_str("$")?;
        }
        f.write_str(&column_to_letters(self.coord.col))?;
        if self.row_abs {
            f.write_str("$")?;
        }
        write!(f, "{}", u64::from(self.coord.row) + 1)
    }
}

/// Parse an A1 address into a 0-based coordinate.
///
/// Accepts lowercase letters and `$` anchors; the anchors are discarded.
pub fn parse_address(text: &str) -> Result<CellCoord, AddressError> {
    parse_anchored_address(text).map(|a| a.coord)
}

/// Render a 0-based coordinate as a canonical A1 address.
pub fn to_address(row: u32, col: u32) -> String {
    CellCoord::new(row, col).to_string()
}

/// Canonical form of an address (`"$b$2"` -> `"B2"`).
pub fn canonical_address(text: &str) -> Result<String, AddressError> {
    parse_address(text).map(CellCoord::to_address)
}

/// Parse an A1 address, keeping the `$` anchor flags.
pub fn parse_anchored_address(text: &str) -> Result<AnchoredCoord, AddressError> {
    let s = text.trim();
    if s.is_empty() {
        return Err(AddressError::Empty);
    }
    let bytes = s.as_bytes();
    let mut i = 0;

    let col_abs = bytes[i] == b'$';
    if col_abs {
        i += 1;
    }
    let letters_start = i;
    while i < bytes.len() && bytes[i].is_ascii_alphabetic() {
        i += 1;
    }
    if i == letters_start {
        return Err(AddressError::MissingColumn(text.to_string()));
    }
    let letters = s[letters_start..i].to_ascii_uppercase();

    let row_abs = i < bytes.len() && bytes[i] == b'$';
    if row_abs {
        i += 1;
    }
    let digits_start = i;
    while i < bytes.len() && bytes[i].is_ascii_digit() {
        i += 1;
    }
    if i == digits_start {
        return Err(AddressError::MissingRow(text.to_string()));
    }
    if i != bytes.len() {
        return Err(AddressError::Malformed(text.to_string()));
    }

    let col = letters_to_column(&letters).ok_or_else(|| AddressError::Overflow(text.to_string()))?;
    let row: u32 = s[digits_start..]
        .parse()
        .map_err(|_| AddressError::Overflow(text.to_string()))?;
    if row == 0 {
        return Err(AddressError::ZeroRow(text.to_string()));
    }

    Ok(AnchoredCoord {
        coord: CellCoord::new(row - 1, col),
        row_abs,
        col_abs,
    })
}

/// `0 -> "A"`, `25 -> "Z"`, `26 -> "AA"`.
pub fn column_to_letters(mut col: u32) -> String {
    let mut buf = Vec::with_capacity(4);
    loop {
        let rem = (col % 26) as u8;
        buf.push(b'A' + rem);
        col /= 26;
        if col == 0 {
            break;
        }
        col -= 1;
    }
    buf.reverse();
    buf.into_iter().map(char::from).collect()
}

/// Inverse of [`column_to_letters`]. Uppercase ASCII only.
pub fn letters_to_column(s: &str) -> Option<u32> {
    if s.is_empty() {
        return None;
    }
    let mut col: u32 = 0;
    for (idx, ch) in s.bytes().enumerate() {
        if !ch.is_ascii_uppercase() {
            return None;
        }
        let val = u32::from(ch - b'A');
        col = col.checked_mul(26)?;
        col = col.checked_add(val)?;
        if idx != s.len() - 1 {
            col = col.checked_add(1)?;
        }
    }
    Some(col)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn letter_boundaries() {
        for (col, letters) in [
            (0, "A"),
            (25, "Z"),
            (26, "AA"),
            (51, "AZ"),
            (701, "ZZ"),
            (702, "AAA"),
            (16_383, "XFD"),
        ] {
            assert_eq!(column_to_letters(col), letters);
            assert_eq!(letters_to_column(letters), Some(col));
        }
    }

    #[test]
    fn canonical_round_trip_boundaries() {
        for addr in ["A1", "Z1", "AA1", "ZZ1", "AAA1", "XFD1048576", "B22"] {
            let coord = parse_address(addr).unwrap();
            assert_eq!(to_address(coord.row, coord.col), addr);
        }
    }

    #[test]
    fn anchors_and_case_are_accepted() {
        let a = parse_anchored_address("$b$7").unwrap();
        assert_eq!(a.coord, CellCoord::new(6, 1));
        assert!(a.row_abs && a.col_abs);
        assert_eq!(a.to_string(), "$B$7");
        assert_eq!(canonical_address("c$3").unwrap(), "C3");
    }

    #[test]
    fn malformed_addresses_are_errors() {
        assert_eq!(parse_address(""), Err(AddressError::Empty));
        assert!(matches!(parse_address("12"), Err(AddressError::MissingColumn(_))));
        assert!(matches!(parse_address("AB"), Err(AddressError::MissingRow(_))));
        assert!(matches!(parse_address("A0"), Err(AddressError::ZeroRow(_))));
        assert!(matches!(parse_address("A1B"), Err(AddressError::Malformed(_))));
        assert!(matches!(parse_address("A-1"), Err(AddressError::MissingRow(_))));
        assert!(matches!(
            parse_address("A99999999999"),
            Err(AddressError::Overflow(_))
        ));
        assert!(matches!(
            parse_address("ZZZZZZZZ1"),
            Err(AddressError::Overflow(_))
        ));
    }

    #[test]
    fn anchored_shift_respects_dollars() {
        let a = parse_anchored_address("$A2").unwrap();
        let moved = a.shifted(3, 5).unwrap();
        assert_eq!(moved.to_string(), "$A5");
        assert!(parse_anchored_address("A1").unwrap().shifted(-1, 0).is_none());
    }

    proptest! {
        #[test]
        fn to_then_parse_is_identity(row in 0u32..5_000_000, col in 0u32..500_000) {
            let text = to_address(row, col);
            prop_assert_eq!(parse_address(&text).unwrap(), CellCoord::new(row, col));
        }

        #[test]
        fn parse_then_to_is_identity(col in 0u32..20_000, row in 1u32..2_000_000) {
            let text = format!("{}{}", column_to_letters(col), row);
            let coord = parse_address(&text).unwrap();
            prop_assert_eq!(coord.to_address(), text);
        }
    }
}
