use cellsync_common::{CellCoord, LiteralValue};
use cellsync_parse::ASTNode;
use rustc_hash::FxHashMap;

use crate::reference::SheetId;

/// Stored content of one cell.
#[derive(Debug, Clone)]
pub enum CellContent {
    Value(LiteralValue),
    Formula(FormulaCell),
}

#[derive(Debug, Clone)]
pub struct FormulaCell {
    pub source: String,
    /// `Err` holds the parse failure message; the cell evaluates to `#ERROR!`.
    pub ast: Result<ASTNode, String>,
    pub result: LiteralValue,
}

#[derive(Debug, Default)]
pub struct Sheet {
    pub name: String,
    pub cells: FxHashMap<CellCoord, CellContent>,
}

impl Sheet {
    pub fn value(&self, at: CellCoord) -> LiteralValue {
        match self.cells.get(&at) {
            Some(CellContent::Value(v)) => v.clone(),
            Some(CellContent::Formula(f)) => f.result.clone(),
            None => LiteralValue::Empty,
        }
    }

    pub fn formula_coords(&self) -> impl Iterator<Item = CellCoord> + '_ {
        self.cells
            .iter()
            .filter(|(_, c)| matches!(c, CellContent::Formula(_)))
            .map(|(at, _)| *at)
    }

    /// `(rows, cols)` spanned by occupied cells.
    pub fn dimensions(&self) -> (u32, u32) {
        self.cells.keys().fold((0, 0), |(r, c), at| {
            (r.max(at.row.saturating_add(1)), c.max(at.col.saturating_add(1)))
        })
    }
}

/// Ordered sheets with case-insensitive name lookup.
#[derive(Debug, Default)]
pub struct SheetRegistry {
    sheets: Vec<Sheet>,
    by_name: FxHashMap<String, SheetId>,
}

impl SheetRegistry {
    pub fn add(&mut self, name: &str) -> Option<SheetId> {
        let key = name.to_lowercase();
        if self.by_name.contains_key(&key) {
            return None;
        }
        let id = SheetId::try_from(self.sheets.len()).ok()?;
        self.sheets.push(Sheet {
            name: name.to_string(),
            cells: FxHashMap::default(),
        });
        self.by_name.insert(key, id);
        Some(id)
    }

    pub fn id_of(&self, name: &str) -> Option<SheetId> {
        self.by_name.get(&name.to_lowercase()).copied()
    }

    pub fn get(&self, id: SheetId) -> Option<&Sheet> {
        self.sheets.get(usize::from(id))
    }

    pub fn get_mut(&mut self, id: SheetId) -> Option<&mut Sheet> {
        self.sheets.get_mut(usize::from(id))
    }

    pub fn len(&self) -> usize {
        self.sheets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sheets.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (SheetId, &Sheet)> {
        self.sheets
            .iter()
            .enumerate()
            .map(|(i, s)| (i as SheetId, s))
    }
}
