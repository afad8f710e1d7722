//! Reference resolution and the formula dependency graph.
//!
//! Edges are derived from formula ASTs on demand rather than stored, so cell
//! edits never have to patch an edge list.

use cellsync_common::{CellCoord, ExcelError, ExcelErrorKind};
use cellsync_parse::{ASTNode, ReferenceType};
use rustc_hash::{FxHashMap, FxHashSet};

use super::scheduler::PrecedentMap;
use super::{CellContent, Engine};
use crate::reference::{CellRef, RangeRef, ResolvedRef, SheetId};

/// Reverse edges: single-cell reads are hashed, range reads are scanned.
#[derive(Debug, Default)]
pub struct DependencyIndex {
    cells: FxHashMap<CellRef, Vec<CellRef>>,
    ranges: Vec<(RangeRef, CellRef)>,
}

impl DependencyIndex {
    fn dependents(&self, cell: CellRef) -> Vec<CellRef> {
        let mut out: Vec<CellRef> = self.cells.get(&cell).cloned().unwrap_or_default();
        out.extend(
            self.ranges
                .iter()
                .filter(|(r, _)| r.contains(cell))
                .map(|(_, f)| *f),
        );
        out.sort();
        out.dedup();
        out
    }
}

impl Engine {
    pub(crate) fn resolve_sheet(
        &self,
        sheet: Option<&str>,
        current: SheetId,
    ) -> Result<SheetId, ExcelError> {
        match sheet {
            None => Ok(current),
            Some(name) => self.sheet_id(name).ok_or_else(|| {
                ExcelError::new(ExcelErrorKind::Ref).with_message(format!("Unknown sheet '{name}'"))
            }),
        }
    }

    /// Resolve a parsed reference to the cells it reads. Names are followed
    /// through their definitions up to `max_name_depth`.
    pub fn resolve_reference(
        &self,
        reference: &ReferenceType,
        current: SheetId,
    ) -> Result<Vec<ResolvedRef>, ExcelError> {
        let mut out = Vec::new();
        self.resolve_into(reference, current, 0, &mut out)?;
        Ok(out)
    }

    fn resolve_into(
        &self,
        reference: &ReferenceType,
        current: SheetId,
        depth: usize,
        out: &mut Vec<ResolvedRef>,
    ) -> Result<(), ExcelError> {
        match reference {
            ReferenceType::Cell { sheet, coord } => {
                let sheet = self.resolve_sheet(sheet.as_deref(), current)?;
                out.push(ResolvedRef::Cell(CellRef {
                    sheet,
                    coord: *coord,
                }));
            }
            ReferenceType::Range { sheet, range } => {
                let sheet = self.resolve_sheet(sheet.as_deref(), current)?;
                out.push(ResolvedRef::Range(RangeRef {
                    sheet,
                    range: *range,
                }));
            }
            ReferenceType::NamedRange(name) => {
                if depth >= self.config.max_name_depth {
                    return Err(ExcelError::new(ExcelErrorKind::Circ)
                        .with_message(format!("Name '{name}' refers to itself")));
                }
                let named = self.resolve_name(name, current).ok_or_else(|| {
                    ExcelError::new(ExcelErrorKind::Name)
                        .with_message(format!("Unknown name '{name}'"))
                })?;
                for inner in named.ast.references() {
                    self.resolve_into(inner, named.home_sheet, depth + 1, out)?;
                }
            }
        }
        Ok(())
    }

    /// Everything a formula AST reads. Unresolvable references are skipped;
    /// they surface as error values during evaluation instead.
    pub fn ast_precedents(&self, ast: &ASTNode, current: SheetId) -> Vec<ResolvedRef> {
        let mut out = Vec::new();
        for reference in ast.references() {
            let _ = self.resolve_into(reference, current, 0, &mut out);
        }
        out
    }

    pub(crate) fn formula_cells(&self) -> Vec<CellRef> {
        let mut cells: Vec<CellRef> = self
            .sheets
            .iter()
            .flat_map(|(id, sheet)| {
                sheet
                    .formula_coords()
                    .map(move |coord| CellRef { sheet: id, coord })
            })
            .collect();
        cells.sort();
        cells
    }

    fn formula_ast(&self, cell: CellRef) -> Option<&ASTNode> {
        match self.sheets.get(cell.sheet)?.cells.get(&cell.coord)? {
            CellContent::Formula(f) => f.ast.as_ref().ok(),
            CellContent::Value(_) => None,
        }
    }

    /// Direct precedents of a formula cell, as resolved references.
    pub fn precedents(&self, cell: CellRef) -> Vec<ResolvedRef> {
        self.formula_ast(cell)
            .map(|ast| self.ast_precedents(ast, cell.sheet))
            .unwrap_or_default()
    }

    /// Formula cells that read `cell` directly (through a reference, a range or a name).
    pub fn dependents(&self, cell: CellRef) -> Vec<CellRef> {
        if let Some(index) = &self.dependency_index {
            return index.dependents(cell);
        }
        self.formula_cells()
            .into_iter()
            .filter(|f| self.precedents(*f).iter().any(|r| r.contains(cell)))
            .collect()
    }

    /// Build the reverse index used by [`Engine::dependents`] until the next edit.
    pub fn rebuild_dependency_index(&mut self) {
        let mut index = DependencyIndex::default();
        for f in self.formula_cells() {
            for r in self.precedents(f) {
                match r {
                    ResolvedRef::Cell(c) => index.cells.entry(c).or_default().push(f),
                    ResolvedRef::Range(rr) => index.ranges.push((rr, f)),
                }
            }
        }
        self.dependency_index = Some(index);
    }

    /// Formula-to-formula edges used for scheduling.
    pub(crate) fn precedent_map(&self, formulas: &[CellRef]) -> PrecedentMap {
        let formula_set: FxHashSet<CellRef> = formulas.iter().copied().collect();
        let mut per_sheet: FxHashMap<SheetId, Vec<CellCoord>> = FxHashMap::default();
        for f in formulas {
            per_sheet.entry(f.sheet).or_default().push(f.coord);
        }

        let mut map = PrecedentMap::default();
        for &f in formulas {
            let mut edges = Vec::new();
            for r in self.precedents(f) {
                match r {
                    ResolvedRef::Cell(c) => {
                        if formula_set.contains(&c) {
                            edges.push(c);
                        }
                    }
                    ResolvedRef::Range(rr) => {
                        let Some(candidates) = per_sheet.get(&rr.sheet) else {
                            continue;
                        };
                        if rr.range.cell_count() <= candidates.len() as u64 {
                            edges.extend(
                                rr.range
                                    .iter()
                                    .map(|coord| CellRef {
                                        sheet: rr.sheet,
                                        coord,
                                    })
                                    .filter(|c| formula_set.contains(c)),
                            );
                        } else {
                            edges.extend(
                                candidates
                                    .iter()
                                    .filter(|coord| rr.range.contains(**coord))
                                    .map(|coord| CellRef {
                                        sheet: rr.sheet,
                                        coord: *coord,
                                    }),
                            );
                        }
                    }
                }
            }
            edges.sort();
            edges.dedup();
            map.insert(f, edges);
        }
        map
    }
}
