//! Atomic batch application of [`Operation`]s.
//!
//! A batch is applied to a staged copy of the document. Every operation is
//! validated and applied in order; if any of them fails the copy is thrown
//! away, the caller's document is untouched and every failure is reported.
//! On success the copy replaces the document, one [`Action`] per operation is
//! appended to the log and `modifiedAt` advances.
//!
//! Inverses are computed while applying, from the staged state each operation
//! actually saw, so replaying a batch's inverses in reverse order restores the
//! document exactly.

use std::collections::BTreeMap;

use cellsync_common::{CellCoord, CellRange, parse_address, qualified_key};
use cellsync_parse::shift_formula;
use serde::Serialize;

use crate::config::Limits;
use crate::document::{Action, Cell, CellStyle, Document, RawValue, Sheet, now_millis};
use crate::error::{ValidationError, ValidationErrorKind as Kind};
use crate::operations::Operation;

const FORBIDDEN_NAME_CHARS: &[char] = &['[', ']', ':', '*', '?', '/', '\\'];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum DiffKind {
    CellsChanged,
    StylesChanged,
    RowsInserted,
    RowsDeleted,
    ColumnsInserted,
    ColumnsDeleted,
    SheetAdded,
    SheetRenamed,
    SheetDeleted,
    CellsMerged,
    CellsUnmerged,
    Restored,
}

/// What one committed operation did, for display.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Diff {
    pub op_index: usize,
    pub kind: DiffKind,
    /// Id of the sheet the operation touched.
    pub affected_sheet: String,
    pub human_summary: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ApplyOutcome {
    pub committed: bool,
    /// One entry per operation when committed, empty otherwise.
    pub diffs: Vec<Diff>,
    pub errors: Vec<ValidationError>,
}

/// Apply `ops` to `doc` as one all-or-nothing batch.
pub fn apply_operations(doc: &mut Document, ops: &[Operation], limits: &Limits) -> ApplyOutcome {
    apply_batch(doc, ops, limits, true)
}

/// Shared by edits (`record = true`) and undo, which replays inverses
/// without logging them.
pub(crate) fn apply_batch(
    doc: &mut Document,
    ops: &[Operation],
    limits: &Limits,
    record: bool,
) -> ApplyOutcome {
    if ops.is_empty() {
        return ApplyOutcome {
            committed: true,
            ..ApplyOutcome::default()
        };
    }
    #[cfg(feature = "tracing")]
    let start = std::time::Instant::now();

    // The log only grows on commit; keep it out of the staged copy.
    let log = std::mem::take(&mut doc.action_log);
    let mut staged = doc.clone();
    doc.action_log = log;

    let mut diffs = Vec::with_capacity(ops.len());
    let mut logged = Vec::with_capacity(if record { ops.len() } else { 0 });
    let mut errors = Vec::new();
    for (i, op) in ops.iter().enumerate() {
        match apply_one(&mut staged, i, op, limits) {
            Ok(applied) => {
                diffs.push(applied.diff);
                if record {
                    logged.push((applied.payload, applied.inverse));
                }
            }
            Err(e) => errors.push(e),
        }
    }

    if !errors.is_empty() {
        #[cfg(feature = "tracing")]
        tracing::debug!(
            document = %doc.id,
            ops = ops.len(),
            errors = errors.len(),
            "rejected batch"
        );
        return ApplyOutcome {
            committed: false,
            diffs: Vec::new(),
            errors,
        };
    }

    let ts = now_millis();
    staged.action_log = std::mem::take(&mut doc.action_log);
    staged
        .action_log
        .extend(logged.into_iter().map(|(payload, inverse)| Action {
            kind: payload.kind_name().to_string(),
            payload,
            inverse,
            ts,
        }));
    staged.touch();
    *doc = staged;

    #[cfg(feature = "tracing")]
    tracing::info!(
        document = %doc.id,
        ops = ops.len(),
        recorded = record,
        elapsed_ms = start.elapsed().as_millis() as u64,
        "committed batch"
    );
    ApplyOutcome {
        committed: true,
        diffs,
        errors: Vec::new(),
    }
}

struct Applied {
    /// The operation as logged: sheet ids instead of names, canonical addresses.
    payload: Operation,
    inverse: Vec<Operation>,
    diff: Diff,
}

fn apply_one(
    doc: &mut Document,
    i: usize,
    op: &Operation,
    limits: &Limits,
) -> Result<Applied, ValidationError> {
    match op {
        Operation::SetCell {
            sheet,
            address,
            value,
            formula,
        } => set_cell(doc, i, sheet, address, content(i, value, formula)?, limits),
        Operation::ClearCell { sheet, address } => clear_cell(doc, i, sheet, address, limits),
        Operation::FillRange {
            sheet,
            range,
            value,
            formula,
        } => fill_range(doc, i, sheet, range, content(i, value, formula)?, limits),
        Operation::FormatRange {
            sheet,
            range,
            style,
        } => format_range(doc, i, sheet, range, style, limits),
        Operation::SetStyle {
            sheet,
            address,
            style,
        } => set_style(doc, i, sheet, address, style.as_ref(), limits),
        Operation::InsertRows { sheet, at, count } => {
            structural(doc, i, sheet, Axis::Rows, true, *at, *count, limits)
        }
        Operation::DeleteRows { sheet, at, count } => {
            structural(doc, i, sheet, Axis::Rows, false, *at, *count, limits)
        }
        Operation::InsertColumns { sheet, at, count } => {
            structural(doc, i, sheet, Axis::Columns, true, *at, *count, limits)
        }
        Operation::DeleteColumns { sheet, at, count } => {
            structural(doc, i, sheet, Axis::Columns, false, *at, *count, limits)
        }
        Operation::AddSheet {
            name,
            sheet_id,
            index,
        } => add_sheet(doc, i, name, sheet_id.as_deref(), *index, limits),
        Operation::RenameSheet { sheet, name } => rename_sheet(doc, i, sheet, name, limits),
        Operation::DeleteSheet { sheet } => delete_sheet(doc, i, sheet),
        Operation::MergeCells { sheet, range } => merge_cells(doc, i, sheet, range, limits),
        Operation::UnmergeCells { sheet, range } => unmerge_cells(doc, i, sheet, range),
        Operation::RestoreCells {
            sheet,
            cells,
            styles,
            merges,
        } => restore_cells(doc, i, sheet, cells, styles, merges.as_ref()),
        Operation::RestoreSheet { snapshot, index } => {
            restore_sheet(doc, i, snapshot, *index, limits)
        }
    }
}

enum Content {
    Value(RawValue),
    Formula(String),
}

impl Content {
    fn describe(&self) -> String {
        match self {
            Content::Value(RawValue::Text(s)) => format!("{s:?}"),
            Content::Value(RawValue::Number(n)) => n.to_string(),
            Content::Value(RawValue::Bool(b)) => b.to_string().to_uppercase(),
            Content::Formula(f) => f.clone(),
        }
    }

    fn into_parts(self) -> (Option<RawValue>, Option<String>) {
        match self {
            Content::Value(v) => (Some(v), None),
            Content::Formula(f) => (None, Some(f)),
        }
    }
}

fn content(
    i: usize,
    value: &Option<RawValue>,
    formula: &Option<String>,
) -> Result<Content, ValidationError> {
    match (value, formula) {
        (Some(_), Some(_)) => Err(ValidationError::new(
            i,
            Kind::ConflictingContent,
            "a cell takes either a value or a formula, not both",
        )),
        (None, Some(f)) if !f.starts_with('=') => Err(ValidationError::new(
            i,
            Kind::MissingFormulaPrefix,
            format!("formula '{f}' must start with '='"),
        )),
        (None, Some(f)) => Ok(Content::Formula(f.clone())),
        (Some(v), None) => Ok(Content::Value(v.clone())),
        (None, None) => Err(ValidationError::new(
            i,
            Kind::MissingContent,
            "either a value or a formula is required",
        )),
    }
}

fn sheet_index(doc: &Document, i: usize, key: &str) -> Result<usize, ValidationError> {
    doc.sheet_index(key)
        .ok_or_else(|| ValidationError::new(i, Kind::UnknownSheet, format!("no sheet '{key}'")))
}

fn check_bounds(
    i: usize,
    at: CellCoord,
    text: &str,
    limits: &Limits,
) -> Result<(), ValidationError> {
    if at.row >= limits.max_rows || at.col >= limits.max_cols {
        return Err(ValidationError::new(
            i,
            Kind::OutOfBounds,
            format!(
                "'{text}' is outside the {} x {} grid",
                limits.max_rows, limits.max_cols
            ),
        ));
    }
    Ok(())
}

fn cell_at(i: usize, text: &str, limits: &Limits) -> Result<CellCoord, ValidationError> {
    let at = parse_address(text)
        .map_err(|e| ValidationError::new(i, Kind::InvalidAddress, e.to_string()))?;
    check_bounds(i, at, text, limits)?;
    Ok(at)
}

fn range_at(i: usize, text: &str, limits: &Limits) -> Result<CellRange, ValidationError> {
    let range = CellRange::parse(text)
        .map_err(|e| ValidationError::new(i, Kind::InvalidRange, e.to_string()))?;
    check_bounds(i, range.end, text, limits)?;
    let cells = range.cell_count();
    if cells > limits.max_range_cells {
        return Err(ValidationError::new(
            i,
            Kind::OutOfBounds,
            format!(
                "range {range} covers {cells} cells; at most {} are allowed",
                limits.max_range_cells
            ),
        ));
    }
    Ok(range)
}

fn check_sheet_name(
    doc: &Document,
    i: usize,
    name: &str,
    except: Option<&str>,
    limits: &Limits,
) -> Result<(), ValidationError> {
    let invalid = |msg: String| Err(ValidationError::new(i, Kind::InvalidSheetName, msg));
    if name.trim().is_empty() {
        return invalid("sheet name cannot be empty".to_string());
    }
    let len = name.chars().count();
    if len > limits.max_sheet_name_len {
        return invalid(format!(
            "sheet name '{name}' is {len} characters; the limit is {}",
            limits.max_sheet_name_len
        ));
    }
    if let Some(c) = name.chars().find(|c| FORBIDDEN_NAME_CHARS.contains(c)) {
        return invalid(format!("sheet name '{name}' contains '{c}'"));
    }
    if name.starts_with('\'') || name.ends_with('\'') {
        return invalid(format!(
            "sheet name '{name}' cannot start or end with an apostrophe"
        ));
    }
    let lower = name.to_lowercase();
    if doc
        .sheets
        .iter()
        .any(|s| Some(s.id.as_str()) != except && s.name.to_lowercase() == lower)
    {
        return Err(ValidationError::new(
            i,
            Kind::DuplicateSheetName,
            format!("a sheet named '{name}' already exists"),
        ));
    }
    Ok(())
}

fn diff(i: usize, kind: DiffKind, sheet: &Sheet, human_summary: String) -> Diff {
    Diff {
        op_index: i,
        kind,
        affected_sheet: sheet.id.clone(),
        human_summary,
    }
}

fn plural(n: u64, word: &str) -> String {
    if n == 1 {
        format!("1 {word}")
    } else {
        format!("{n} {word}s")
    }
}

fn set_cell(
    doc: &mut Document,
    i: usize,
    key: &str,
    address: &str,
    content: Content,
    limits: &Limits,
) -> Result<Applied, ValidationError> {
    let idx = sheet_index(doc, i, key)?;
    let at = cell_at(i, address, limits)?;
    let sheet = &mut doc.sheets[idx];
    let address = at.to_address();
    let summary = format!(
        "Set {} to {}",
        qualified_key(&sheet.name, &address),
        content.describe()
    );
    let (value, formula) = content.into_parts();
    let cell = Cell {
        raw: value.clone(),
        formula: formula.clone(),
        computed: None,
    };

    let inverse = match sheet.cells.insert(address.clone(), cell) {
        Some(prev) if prev.has_content() => Operation::RestoreCells {
            sheet: sheet.id.clone(),
            cells: BTreeMap::from([(address.clone(), Some(prev))]),
            styles: BTreeMap::new(),
            merges: None,
        },
        _ => Operation::ClearCell {
            sheet: sheet.id.clone(),
            address: address.clone(),
        },
    };
    Ok(Applied {
        payload: Operation::SetCell {
            sheet: sheet.id.clone(),
            address,
            value,
            formula,
        },
        inverse: vec![inverse],
        diff: diff(i, DiffKind::CellsChanged, sheet, summary),
    })
}

fn clear_cell(
    doc: &mut Document,
    i: usize,
    key: &str,
    address: &str,
    limits: &Limits,
) -> Result<Applied, ValidationError> {
    let idx = sheet_index(doc, i, key)?;
    let at = cell_at(i, address, limits)?;
    let sheet = &mut doc.sheets[idx];
    let address = at.to_address();
    let location = qualified_key(&sheet.name, &address);
    let prev = sheet.cells.remove(&address);
    let summary = match &prev {
        Some(_) => format!("Cleared {location}"),
        None => format!("{location} was already empty"),
    };
    Ok(Applied {
        payload: Operation::ClearCell {
            sheet: sheet.id.clone(),
            address: address.clone(),
        },
        inverse: vec![Operation::RestoreCells {
            sheet: sheet.id.clone(),
            cells: prev.map(|c| (address, Some(c))).into_iter().collect(),
            styles: BTreeMap::new(),
            merges: None,
        }],
        diff: diff(i, DiffKind::CellsChanged, sheet, summary),
    })
}

fn fill_range(
    doc: &mut Document,
    i: usize,
    key: &str,
    range_text: &str,
    content: Content,
    limits: &Limits,
) -> Result<Applied, ValidationError> {
    let idx = sheet_index(doc, i, key)?;
    let range = range_at(i, range_text, limits)?;
    let sheet = &mut doc.sheets[idx];
    let origin = range.start;

    let mut before = BTreeMap::new();
    for at in range.iter() {
        let cell = match &content {
            Content::Value(v) => Cell::raw(v.clone()),
            Content::Formula(f) => {
                let drow = i64::from(at.row) - i64::from(origin.row);
                let dcol = i64::from(at.col) - i64::from(origin.col);
                if drow == 0 && dcol == 0 {
                    Cell::formula(f.clone())
                } else {
                    // Untokenizable text is copied as-is; the engine reports it.
                    Cell::formula(shift_formula(f, drow, dcol).unwrap_or_else(|_| f.clone()))
                }
            }
        };
        let address = at.to_address();
        let prev = sheet.cells.insert(address.clone(), cell);
        before.insert(address, prev);
    }

    let summary = format!(
        "Filled {} in range {range}",
        plural(range.cell_count(), "cell")
    );
    let (value, formula) = content.into_parts();
    Ok(Applied {
        payload: Operation::FillRange {
            sheet: sheet.id.clone(),
            range: range.to_string(),
            value,
            formula,
        },
        inverse: vec![Operation::RestoreCells {
            sheet: sheet.id.clone(),
            cells: before,
            styles: BTreeMap::new(),
            merges: None,
        }],
        diff: diff(i, DiffKind::CellsChanged, sheet, summary),
    })
}

fn format_range(
    doc: &mut Document,
    i: usize,
    key: &str,
    range_text: &str,
    style: &CellStyle,
    limits: &Limits,
) -> Result<Applied, ValidationError> {
    let idx = sheet_index(doc, i, key)?;
    let range = range_at(i, range_text, limits)?;
    let sheet = &mut doc.sheets[idx];

    let mut before = BTreeMap::new();
    for at in range.iter() {
        let address = at.to_address();
        let prev = sheet.styles.remove(&address);
        let next = prev.clone().unwrap_or_default().merged_with(style);
        if !next.is_empty() {
            sheet.styles.insert(address.clone(), next);
        }
        before.insert(address, prev);
    }

    let summary = format!(
        "Formatted {} in range {range}",
        plural(range.cell_count(), "cell")
    );
    Ok(Applied {
        payload: Operation::FormatRange {
            sheet: sheet.id.clone(),
            range: range.to_string(),
            style: style.clone(),
        },
        inverse: vec![Operation::RestoreCells {
            sheet: sheet.id.clone(),
            cells: BTreeMap::new(),
            styles: before,
            merges: None,
        }],
        diff: diff(i, DiffKind::StylesChanged, sheet, summary),
    })
}

fn set_style(
    doc: &mut Document,
    i: usize,
    key: &str,
    address: &str,
    style: Option<&CellStyle>,
    limits: &Limits,
) -> Result<Applied, ValidationError> {
    let idx = sheet_index(doc, i, key)?;
    let at = cell_at(i, address, limits)?;
    let sheet = &mut doc.sheets[idx];
    let address = at.to_address();
    let location = qualified_key(&sheet.name, &address);

    let style = style.filter(|s| !s.is_empty()).cloned();
    let prev = match &style {
        Some(s) => sheet.styles.insert(address.clone(), s.clone()),
        None => sheet.styles.remove(&address),
    };
    let summary = match &style {
        Some(_) => format!("Styled {location}"),
        None => format!("Cleared the style of {location}"),
    };
    Ok(Applied {
        payload: Operation::SetStyle {
            sheet: sheet.id.clone(),
            address: address.clone(),
            style,
        },
        inverse: vec![Operation::RestoreCells {
            sheet: sheet.id.clone(),
            cells: BTreeMap::new(),
            styles: BTreeMap::from([(address, prev)]),
            merges: None,
        }],
        diff: diff(i, DiffKind::StylesChanged, sheet, summary),
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Axis {
    Rows,
    Columns,
}

impl Axis {
    fn pos(self, at: CellCoord) -> u32 {
        match self {
            Axis::Rows => at.row,
            Axis::Columns => at.col,
        }
    }

    fn moved(self, at: CellCoord, pos: u32) -> CellCoord {
        match self {
            Axis::Rows => CellCoord::new(pos, at.col),
            Axis::Columns => CellCoord::new(at.row, pos),
        }
    }

    fn bound(self, limits: &Limits) -> u32 {
        match self {
            Axis::Rows => limits.max_rows,
            Axis::Columns => limits.max_cols,
        }
    }

    fn noun(self) -> &'static str {
        match self {
            Axis::Rows => "row",
            Axis::Columns => "column",
        }
    }

    /// 1-based position as the user sees it: `row 2`, `column C`.
    fn label(self, at: u32) -> String {
        match self {
            Axis::Rows => format!("row {at}"),
            Axis::Columns => format!(
                "column {}",
                cellsync_common::column_to_letters(at.saturating_sub(1))
            ),
        }
    }

    fn op(self, insert: bool, sheet: String, at: u32, count: u32) -> Operation {
        match (self, insert) {
            (Axis::Rows, true) => Operation::InsertRows { sheet, at, count },
            (Axis::Rows, false) => Operation::DeleteRows { sheet, at, count },
            (Axis::Columns, true) => Operation::InsertColumns { sheet, at, count },
            (Axis::Columns, false) => Operation::DeleteColumns { sheet, at, count },
        }
    }

    fn diff_kind(self, insert: bool) -> DiffKind {
        match (self, insert) {
            (Axis::Rows, true) => DiffKind::RowsInserted,
            (Axis::Rows, false) => DiffKind::RowsDeleted,
            (Axis::Columns, true) => DiffKind::ColumnsInserted,
            (Axis::Columns, false) => DiffKind::ColumnsDeleted,
        }
    }
}

/// One insert or delete along an axis; `pivot` is 0-based.
#[derive(Debug, Clone, Copy)]
struct Shift {
    axis: Axis,
    insert: bool,
    pivot: u32,
    count: u32,
    bound: u32,
}

impl Shift {
    /// New position of `pos`, or `None` when it is deleted or pushed past the bound.
    fn position(&self, pos: u32) -> Option<u32> {
        if pos < self.pivot {
            return Some(pos);
        }
        if self.insert {
            pos.checked_add(self.count).filter(|p| *p < self.bound)
        } else if pos < self.pivot.saturating_add(self.count) {
            None
        } else {
            Some(pos - self.count)
        }
    }

    /// Re-key entries at or beyond the pivot. Returns what was removed,
    /// under its original key.
    fn rekey<T>(&self, map: &mut BTreeMap<String, T>) -> BTreeMap<String, Option<T>> {
        let mut removed = BTreeMap::new();
        for (key, value) in std::mem::take(map) {
            let Ok(at) = parse_address(&key) else {
                map.insert(key, value);
                continue;
            };
            let pos = self.axis.pos(at);
            if pos < self.pivot {
                map.insert(key, value);
                continue;
            }
            match self.position(pos) {
                Some(p) => {
                    map.insert(self.axis.moved(at, p).to_address(), value);
                }
                None => {
                    removed.insert(key, Some(value));
                }
            }
        }
        removed
    }

    /// Shift, stretch or shrink a merged span. Spans that fall off the grid,
    /// vanish, or end up a single cell are dropped.
    fn span(&self, a: u32, b: u32) -> Option<(u32, u32)> {
        if self.insert {
            let a = if a >= self.pivot { a.checked_add(self.count)? } else { a };
            let b = if b >= self.pivot { b.checked_add(self.count)? } else { b };
            return (b < self.bound).then_some((a, b));
        }
        let end = self.pivot.saturating_add(self.count);
        if a >= self.pivot && b < end {
            return None;
        }
        let a = match a {
            a if a < self.pivot => a,
            a if a >= end => a - self.count,
            _ => self.pivot,
        };
        let b = match b {
            b if b < self.pivot => b,
            b if b >= end => b - self.count,
            _ => self.pivot - 1,
        };
        Some((a, b))
    }

    fn merges(&self, merges: &[String]) -> Vec<String> {
        merges
            .iter()
            .filter_map(|text| {
                let Ok(range) = CellRange::parse(text) else {
                    return Some(text.clone());
                };
                let (a, b) = self.span(self.axis.pos(range.start), self.axis.pos(range.end))?;
                let out = CellRange::new(
                    self.axis.moved(range.start, a),
                    self.axis.moved(range.end, b),
                );
                (out.cell_count() > 1).then(|| out.to_string())
            })
            .collect()
    }
}

#[allow(clippy::too_many_arguments)]
fn structural(
    doc: &mut Document,
    i: usize,
    key: &str,
    axis: Axis,
    insert: bool,
    at: u32,
    count: u32,
    limits: &Limits,
) -> Result<Applied, ValidationError> {
    let idx = sheet_index(doc, i, key)?;
    let bound = axis.bound(limits);
    let noun = axis.noun();
    if at == 0 || at > bound {
        return Err(ValidationError::new(
            i,
            Kind::OutOfBounds,
            format!("{noun} {at} is outside 1..={bound}"),
        ));
    }
    if count == 0 || count > bound {
        return Err(ValidationError::new(
            i,
            Kind::OutOfBounds,
            format!("{noun} count {count} is outside 1..={bound}"),
        ));
    }

    let shift = Shift {
        axis,
        insert,
        pivot: at - 1,
        count,
        bound,
    };
    let sheet = &mut doc.sheets[idx];
    let merges_before = sheet.merges.clone();
    let cells = shift.rekey(&mut sheet.cells);
    let styles = shift.rekey(&mut sheet.styles);
    sheet.merges = shift.merges(&merges_before);

    let mut summary = format!(
        "{} {} at {} on {}",
        if insert { "Inserted" } else { "Deleted" },
        plural(u64::from(count), noun),
        axis.label(at),
        sheet.name
    );
    if insert && !cells.is_empty() {
        summary.push_str(&format!(
            ", dropping {} past the last {noun}",
            plural(cells.len() as u64, "cell")
        ));
    }

    let id = sheet.id.clone();
    Ok(Applied {
        payload: axis.op(insert, id.clone(), at, count),
        inverse: vec![
            axis.op(!insert, id.clone(), at, count),
            Operation::RestoreCells {
                sheet: id,
                cells,
                styles,
                merges: Some(merges_before),
            },
        ],
        diff: diff(i, axis.diff_kind(insert), sheet, summary),
    })
}

fn add_sheet(
    doc: &mut Document,
    i: usize,
    name: &str,
    sheet_id: Option<&str>,
    index: Option<usize>,
    limits: &Limits,
) -> Result<Applied, ValidationError> {
    if doc.sheets.len() >= limits.max_sheets {
        return Err(ValidationError::new(
            i,
            Kind::SheetLimit,
            format!("a document holds at most {} sheets", limits.max_sheets),
        ));
    }
    check_sheet_name(doc, i, name, None, limits)?;
    let id = match sheet_id {
        Some(id) if doc.sheet_by_id(id).is_some() => {
            return Err(ValidationError::new(
                i,
                Kind::InvalidSheetName,
                format!("sheet id '{id}' is already in use"),
            ));
        }
        Some(id) if id.trim().is_empty() => {
            return Err(ValidationError::new(
                i,
                Kind::InvalidSheetName,
                "sheet id cannot be empty",
            ));
        }
        Some(id) => id.to_string(),
        None => doc.next_sheet_id(),
    };
    let index = match index {
        Some(n) if n > doc.sheets.len() => {
            return Err(ValidationError::new(
                i,
                Kind::OutOfBounds,
                format!(
                    "sheet position {n} is past the end of {} sheets",
                    doc.sheets.len()
                ),
            ));
        }
        Some(n) => n,
        None => doc.sheets.len(),
    };

    doc.sheets.insert(index, Sheet::new(id.clone(), name));
    let sheet = &doc.sheets[index];
    Ok(Applied {
        payload: Operation::AddSheet {
            name: name.to_string(),
            sheet_id: Some(id.clone()),
            index: Some(index),
        },
        inverse: vec![Operation::DeleteSheet { sheet: id }],
        diff: diff(i, DiffKind::SheetAdded, sheet, format!("Added sheet {name}")),
    })
}

fn rename_sheet(
    doc: &mut Document,
    i: usize,
    key: &str,
    name: &str,
    limits: &Limits,
) -> Result<Applied, ValidationError> {
    let idx = sheet_index(doc, i, key)?;
    let id = doc.sheets[idx].id.clone();
    check_sheet_name(doc, i, name, Some(&id), limits)?;
    let sheet = &mut doc.sheets[idx];
    let old = std::mem::replace(&mut sheet.name, name.to_string());
    Ok(Applied {
        payload: Operation::RenameSheet {
            sheet: id.clone(),
            name: name.to_string(),
        },
        inverse: vec![Operation::RenameSheet {
            sheet: id,
            name: old.clone(),
        }],
        diff: diff(
            i,
            DiffKind::SheetRenamed,
            sheet,
            format!("Renamed sheet {old} to {name}"),
        ),
    })
}

fn delete_sheet(doc: &mut Document, i: usize, key: &str) -> Result<Applied, ValidationError> {
    let idx = sheet_index(doc, i, key)?;
    if doc.sheets.len() == 1 {
        return Err(ValidationError::new(
            i,
            Kind::LastSheet,
            "the last sheet of a document cannot be deleted",
        ));
    }
    let sheet = doc.sheets.remove(idx);
    let d = diff(
        i,
        DiffKind::SheetDeleted,
        &sheet,
        format!("Deleted sheet {}", sheet.name),
    );
    Ok(Applied {
        payload: Operation::DeleteSheet {
            sheet: sheet.id.clone(),
        },
        inverse: vec![Operation::RestoreSheet {
            snapshot: Box::new(sheet),
            index: idx,
        }],
        diff: d,
    })
}

fn merge_cells(
    doc: &mut Document,
    i: usize,
    key: &str,
    range_text: &str,
    limits: &Limits,
) -> Result<Applied, ValidationError> {
    let idx = sheet_index(doc, i, key)?;
    let range = range_at(i, range_text, limits)?;
    if range.cell_count() < 2 {
        return Err(ValidationError::new(
            i,
            Kind::InvalidRange,
            format!("cannot merge the single cell {range}"),
        ));
    }
    let sheet = &mut doc.sheets[idx];
    if let Some(existing) = sheet
        .merges
        .iter()
        .find(|m| CellRange::parse(m).is_ok_and(|r| r.intersects(&range)))
    {
        return Err(ValidationError::new(
            i,
            Kind::MergeConflict,
            format!("{range} overlaps the merged range {existing}"),
        ));
    }
    let text = range.to_string();
    sheet.merges.push(text.clone());
    Ok(Applied {
        payload: Operation::MergeCells {
            sheet: sheet.id.clone(),
            range: text.clone(),
        },
        inverse: vec![Operation::UnmergeCells {
            sheet: sheet.id.clone(),
            range: text.clone(),
        }],
        diff: diff(
            i,
            DiffKind::CellsMerged,
            sheet,
            format!("Merged {text} on {}", sheet.name),
        ),
    })
}

fn unmerge_cells(
    doc: &mut Document,
    i: usize,
    key: &str,
    range_text: &str,
) -> Result<Applied, ValidationError> {
    let idx = sheet_index(doc, i, key)?;
    let range = CellRange::parse(range_text)
        .map_err(|e| ValidationError::new(i, Kind::InvalidRange, e.to_string()))?;
    let sheet = &mut doc.sheets[idx];
    let Some(pos) = sheet
        .merges
        .iter()
        .position(|m| CellRange::parse(m).is_ok_and(|r| r == range))
    else {
        return Err(ValidationError::new(
            i,
            Kind::MergeConflict,
            format!("{range} is not a merged range on {}", sheet.name),
        ));
    };
    let text = sheet.merges.remove(pos);
    Ok(Applied {
        payload: Operation::UnmergeCells {
            sheet: sheet.id.clone(),
            range: range.to_string(),
        },
        inverse: vec![Operation::MergeCells {
            sheet: sheet.id.clone(),
            range: text,
        }],
        diff: diff(
            i,
            DiffKind::CellsUnmerged,
            sheet,
            format!("Unmerged {range} on {}", sheet.name),
        ),
    })
}

/// Write each snapshot under its key (`None` removes) and return the
/// snapshots it replaced.
fn swap_in<T>(
    map: &mut BTreeMap<String, T>,
    snapshots: &BTreeMap<String, Option<T>>,
) -> BTreeMap<String, Option<T>>
where
    T: Clone,
{
    snapshots
        .iter()
        .map(|(key, snapshot)| {
            let prev = match snapshot {
                Some(v) => map.insert(key.clone(), v.clone()),
                None => map.remove(key),
            };
            (key.clone(), prev)
        })
        .collect()
}

fn restore_cells(
    doc: &mut Document,
    i: usize,
    key: &str,
    cells: &BTreeMap<String, Option<Cell>>,
    styles: &BTreeMap<String, Option<CellStyle>>,
    merges: Option<&Vec<String>>,
) -> Result<Applied, ValidationError> {
    let idx = sheet_index(doc, i, key)?;
    if let Some(bad) = cells
        .keys()
        .chain(styles.keys())
        .find(|k| parse_address(k).is_err())
    {
        return Err(ValidationError::new(
            i,
            Kind::InvalidAddress,
            format!("'{bad}' is not a cell address"),
        ));
    }
    let sheet = &mut doc.sheets[idx];
    let cells_before = swap_in(&mut sheet.cells, cells);
    let styles_before = swap_in(&mut sheet.styles, styles);
    let merges_before = merges.map(|m| std::mem::replace(&mut sheet.merges, m.clone()));

    let summary = format!(
        "Restored {} on {}",
        plural(cells.len() as u64, "cell"),
        sheet.name
    );
    Ok(Applied {
        payload: Operation::RestoreCells {
            sheet: sheet.id.clone(),
            cells: cells.clone(),
            styles: styles.clone(),
            merges: merges.cloned(),
        },
        inverse: vec![Operation::RestoreCells {
            sheet: sheet.id.clone(),
            cells: cells_before,
            styles: styles_before,
            merges: merges_before,
        }],
        diff: diff(i, DiffKind::Restored, sheet, summary),
    })
}

fn restore_sheet(
    doc: &mut Document,
    i: usize,
    snapshot: &Sheet,
    index: usize,
    limits: &Limits,
) -> Result<Applied, ValidationError> {
    if doc.sheets.len() >= limits.max_sheets {
        return Err(ValidationError::new(
            i,
            Kind::SheetLimit,
            format!("a document holds at most {} sheets", limits.max_sheets),
        ));
    }
    if doc.sheet_by_id(&snapshot.id).is_some() {
        return Err(ValidationError::new(
            i,
            Kind::InvalidSheetName,
            format!("sheet id '{}' is already in use", snapshot.id),
        ));
    }
    check_sheet_name(doc, i, &snapshot.name, None, limits)?;
    let index = index.min(doc.sheets.len());
    doc.sheets.insert(index, snapshot.clone());
    let sheet = &doc.sheets[index];
    Ok(Applied {
        payload: Operation::RestoreSheet {
            snapshot: Box::new(snapshot.clone()),
            index,
        },
        inverse: vec![Operation::DeleteSheet {
            sheet: snapshot.id.clone(),
        }],
        diff: diff(
            i,
            DiffKind::SheetAdded,
            sheet,
            format!("Restored sheet {}", sheet.name),
        ),
    })
}
