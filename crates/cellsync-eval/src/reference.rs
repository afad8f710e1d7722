//! Sheet-resolved cell and range references used inside the engine.
//!
//! Parsed formulas name sheets by text; once linked against the engine's sheet
//! registry every reference carries a [`SheetId`] instead.

use core::fmt;

use cellsync_common::{CellCoord, CellRange};

/// Index into the engine's sheet list.
pub type SheetId = u16;

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub struct CellRef {
    pub sheet: SheetId,
    pub coord: CellCoord,
}

impl CellRef {
    #[inline]
    pub const fn new(sheet: SheetId, row: u32, col: u32) -> Self {
        Self {
            sheet,
            coord: CellCoord::new(row, col),
        }
    }
}

impl fmt::Display for CellRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}!{}", self.sheet, self.coord)
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub struct RangeRef {
    pub sheet: SheetId,
    pub range: CellRange,
}

impl RangeRef {
    pub fn contains(&self, cell: CellRef) -> bool {
        self.sheet == cell.sheet && self.range.contains(cell.coord)
    }
}

/// What a formula reads, after sheet names and defined names are resolved.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum ResolvedRef {
    Cell(CellRef),
    Range(RangeRef),
}

impl ResolvedRef {
    pub fn contains(&self, cell: CellRef) -> bool {
        match self {
            ResolvedRef::Cell(c) => *c == cell,
            ResolvedRef::Range(r) => r.contains(cell),
        }
    }
}
