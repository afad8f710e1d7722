//! Rectangular ranges and sheet-qualified references (`Sheet1!A1:B2`).

use core::fmt;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::coord::{AddressError, CellCoord, parse_address};

/// Inclusive rectangle of cells with normalised corners.
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct CellRange {
    pub start: CellCoord,
    pub end: CellCoord,
}

impl CellRange {
    /// Build from any two corners; the result is ordered top-left to bottom-right.
    pub fn new(a: CellCoord, b: CellCoord) -> Self {
        Self {
            start: CellCoord::new(a.row.min(b.row), a.col.min(b.col)),
            end: CellCoord::new(a.row.max(b.row), a.col.max(b.col)),
        }
    }

    pub fn single(at: CellCoord) -> Self {
        Self { start: at, end: at }
    }

    /// Parse `A1:B3` or a lone `A1`. Anchors and lowercase are accepted.
    pub fn parse(text: &str) -> Result<Self, AddressError> {
        match text.split_once(':') {
            Some((a, b)) => Ok(Self::new(parse_address(a)?, parse_address(b)?)),
            None => parse_address(text).map(Self::single),
        }
    }

    pub fn height(&self) -> u64 {
        u64::from(self.end.row - self.start.row) + 1
    }

    pub fn width(&self) -> u64 {
        u64::from(self.end.col - self.start.col) + 1
    }

    pub fn cell_count(&self) -> u64 {
        self.height().saturating_mul(self.width())
    }

    pub fn contains(&self, at: CellCoord) -> bool {
        (self.start.row..=self.end.row).contains(&at.row)
            && (self.start.col..=self.end.col).contains(&at.col)
    }

    pub fn intersects(&self, other: &CellRange) -> bool {
        self.start.row <= other.end.row
            && other.start.row <= self.end.row
            && self.start.col <= other.end.col
            && other.start.col <= self.end.col
    }

    /// Row-major iteration over every cell in the range.
    pub fn iter(&self) -> impl Iterator<Item = CellCoord> + '_ {
        let (c0, c1) = (self.start.col, self.end.col);
        (self.start.row..=self.end.row)
            .flat_map(move |r| (c0..=c1).map(move |c| CellCoord::new(r, c)))
    }
}

impl fmt::Display for CellRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.start == self.end {
            write!(f, "{}", self.start)
        } else {
            write!(f, "{}:{}", self.start, self.end)
        }
    }
}

/// A range optionally qualified by a sheet name.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct SheetRef {
    pub sheet: Option<String>,
    pub range: CellRange,
}

impl SheetRef {
    /// Parse `A1`, `Sheet1!A1:B2` or `'My Sheet'!A1`.
    pub fn parse(text: &str) -> Result<Self, AddressError> {
        let text = text.trim();
        let Some(bang) = text.rfind('!') else {
            return Ok(Self {
                sheet: None,
                range: CellRange::parse(text)?,
            });
        };
        let (sheet_part, range_part) = (&text[..bang], &text[bang + 1..]);
        let sheet = unquote_sheet_name(sheet_part);
        if sheet.is_empty() {
            return Err(AddressError::Malformed(text.to_string()));
        }
        Ok(Self {
            sheet: Some(sheet),
            range: CellRange::parse(range_part)?,
        })
    }
}

impl fmt::Display for SheetRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(sheet) = &self.sheet {
            write!(f, "{}!", quote_sheet_name(sheet))?;
        }
        write!(f, "{}", self.range)
    }
}

/// Strip surrounding quotes and collapse doubled `''`.
pub fn unquote_sheet_name(s: &str) -> String {
    let s = s.trim();
    if s.len() >= 2 && s.starts_with('\'') && s.ends_with('\'') {
        s[1..s.len() - 1].replace("''", "'")
    } else {
        s.to_string()
    }
}

/// Quote a sheet name when it would not survive a round-trip through a formula.
pub fn quote_sheet_name(name: &str) -> String {
    let plain = !name.is_empty()
        && name
            .chars()
            .next()
            .is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
        && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '.')
        && !looks_like_address(name);
    if plain {
        name.to_string()
    } else {
        format!("'{}'", name.replace('\'', "''"))
    }
}

/// Rows and columns of the largest grid a formula author can address.
const GRID_ROWS: u32 = 1_048_576;
const GRID_COLS: u32 = 16_384;

/// `AB12` must be quoted; `Sheet1` (column SHEET is off the grid) need not be.
fn looks_like_address(name: &str) -> bool {
    parse_address(name).is_ok_and(|at| at.row < GRID_ROWS && at.col < GRID_COLS)
}

/// `Sheet!A1` key used by caches and dependency maps.
pub fn qualified_key(sheet: &str, address: &str) -> String {
    format!("{sheet}!{address}")
}

/// Split a `Sheet!A1` key produced by [`qualified_key`].
pub fn split_qualified_key(key: &str) -> Option<(&str, &str)> {
    key.rsplit_once('!')
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn ranges_normalise_corners() {
        let r = CellRange::parse("C3:a1").unwrap();
        assert_eq!(r.to_string(), "A1:C3");
        assert_eq!(r.cell_count(), 9);
        assert!(r.contains(CellCoord::new(1, 1)));
        assert!(!r.contains(CellCoord::new(3, 0)));
        assert_eq!(CellRange::parse("B2").unwrap().to_string(), "B2");
        assert!(CellRange::parse("A1:").is_err());
    }

    #[test]
    fn sheet_refs_quote_when_needed() {
        let r = SheetRef::parse("'My Sheet'!A1:B2").unwrap();
        assert_eq!(r.sheet.as_deref(), Some("My Sheet"));
        assert_eq!(r.to_string(), "'My Sheet'!A1:B2");

        let r = SheetRef::parse("Sheet1!$A$1").unwrap();
        assert_eq!(r.to_string(), "Sheet1!A1");

        assert_eq!(quote_sheet_name("it's"), "'it''s'");
        assert_eq!(quote_sheet_name("AB12"), "'AB12'");
        assert_eq!(quote_sheet_name("XFD1048576"), "'XFD1048576'");
        assert_eq!(quote_sheet_name("Sheet1"), "Sheet1");
        assert_eq!(quote_sheet_name("XFE1"), "XFE1");
        assert_eq!(unquote_sheet_name("'it''s'"), "it's");
        assert!(SheetRef::parse("!A1").is_err());
    }

    #[test]
    fn qualified_keys_split_on_last_bang() {
        let key = qualified_key("Data", "B7");
        assert_eq!(key, "Data!B7");
        assert_eq!(split_qualified_key(&key), Some(("Data", "B7")));
    }

    proptest! {
        #[test]
        fn iteration_visits_every_cell_once(r0 in 0u32..50, c0 in 0u32..50, h in 0u32..8, w in 0u32..8) {
            let range = CellRange::new(CellCoord::new(r0, c0), CellCoord::new(r0 + h, c0 + w));
            let cells: Vec<_> = range.iter().collect();
            prop_assert_eq!(cells.len() as u64, range.cell_count());
            prop_assert!(cells.iter().all(|c| range.contains(*c)));
            let mut dedup = cells.clone();
            dedup.dedup();
            prop_assert_eq!(dedup.len(), cells.len());
        }
    }
}
