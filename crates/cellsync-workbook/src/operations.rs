//! Edit operations accepted by the mutation engine.
//!
//! Operations serialise as `{"type": "setCell", ...}`. Rows and columns in
//! structural operations are 1-based, as the user sees them. `sheet` accepts a
//! sheet id or a sheet name; committed payloads always carry the id.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::document::{Cell, CellStyle, RawValue, Sheet};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum Operation {
    SetCell {
        sheet: String,
        address: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        value: Option<RawValue>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        formula: Option<String>,
    },
    ClearCell {
        sheet: String,
        address: String,
    },
    /// Write one value, or one formula with relative references shifted per cell.
    FillRange {
        sheet: String,
        range: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        value: Option<RawValue>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        formula: Option<String>,
    },
    /// Overlay `style` onto every cell of the range.
    FormatRange {
        sheet: String,
        range: String,
        style: CellStyle,
    },
    InsertRows {
        sheet: String,
        at: u32,
        count: u32,
    },
    DeleteRows {
        sheet: String,
        at: u32,
        count: u32,
    },
    InsertColumns {
        sheet: String,
        at: u32,
        count: u32,
    },
    DeleteColumns {
        sheet: String,
        at: u32,
        count: u32,
    },
    AddSheet {
        name: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        sheet_id: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        index: Option<usize>,
    },
    RenameSheet {
        sheet: String,
        name: String,
    },
    DeleteSheet {
        sheet: String,
    },
    MergeCells {
        sheet: String,
        range: String,
    },
    UnmergeCells {
        sheet: String,
        range: String,
    },
    /// Replace a cell's style; `None` removes it.
    SetStyle {
        sheet: String,
        address: String,
        #[serde(default)]
        style: Option<CellStyle>,
    },
    /// Put back exact cell and style snapshots (`None` means absent) and,
    /// when given, the full merge list.
    RestoreCells {
        sheet: String,
        #[serde(default)]
        cells: BTreeMap<String, Option<Cell>>,
        #[serde(default)]
        styles: BTreeMap<String, Option<CellStyle>>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        merges: Option<Vec<String>>,
    },
    RestoreSheet {
        snapshot: Box<Sheet>,
        index: usize,
    },
}

impl Operation {
    /// The serialised `type` tag.
    pub fn kind_name(&self) -> &'static str {
        match self {
            Operation::SetCell { .. } => "setCell",
            Operation::ClearCell { .. } => "clearCell",
            Operation::FillRange { .. } => "fillRange",
            Operation::FormatRange { .. } => "formatRange",
            Operation::InsertRows { .. } => "insertRows",
            Operation::DeleteRows { .. } => "deleteRows",
            Operation::InsertColumns { .. } => "insertColumns",
            Operation::DeleteColumns { .. } => "deleteColumns",
            Operation::AddSheet { .. } => "addSheet",
            Operation::RenameSheet { .. } => "renameSheet",
            Operation::DeleteSheet { .. } => "deleteSheet",
            Operation::MergeCells { .. } => "mergeCells",
            Operation::UnmergeCells { .. } => "unmergeCells",
            Operation::SetStyle { .. } => "setStyle",
            Operation::RestoreCells { .. } => "restoreCells",
            Operation::RestoreSheet { .. } => "restoreSheet",
        }
    }

    /// The sheet key this operation targets, if it targets an existing sheet.
    pub fn sheet_key(&self) -> Option<&str> {
        match self {
            Operation::SetCell { sheet, .. }
            | Operation::ClearCell { sheet, .. }
            | Operation::FillRange { sheet, .. }
            | Operation::FormatRange { sheet, .. }
            | Operation::InsertRows { sheet, .. }
            | Operation::DeleteRows { sheet, .. }
            | Operation::InsertColumns { sheet, .. }
            | Operation::DeleteColumns { sheet, .. }
            | Operation::RenameSheet { sheet, .. }
            | Operation::DeleteSheet { sheet }
            | Operation::MergeCells { sheet, .. }
            | Operation::UnmergeCells { sheet, .. }
            | Operation::SetStyle { sheet, .. }
            | Operation::RestoreCells { sheet, .. } => Some(sheet),
            Operation::AddSheet { .. } | Operation::RestoreSheet { .. } => None,
        }
    }

    pub fn set_value(
        sheet: impl Into<String>,
        address: impl Into<String>,
        value: impl Into<RawValue>,
    ) -> Self {
        Operation::SetCell {
            sheet: sheet.into(),
            address: address.into(),
            value: Some(value.into()),
            formula: None,
        }
    }

    pub fn set_formula(
        sheet: impl Into<String>,
        address: impl Into<String>,
        formula: impl Into<String>,
    ) -> Self {
        Operation::SetCell {
            sheet: sheet.into(),
            address: address.into(),
            value: None,
            formula: Some(formula.into()),
        }
    }

    pub fn clear(sheet: impl Into<String>, address: impl Into<String>) -> Self {
        Operation::ClearCell {
            sheet: sheet.into(),
            address: address.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn wire_format_is_tagged_camel_case() {
        let op = Operation::AddSheet {
            name: "Budget".into(),
            sheet_id: Some("sheet-2".into()),
            index: None,
        };
        assert_eq!(
            serde_json::to_value(&op).unwrap(),
            json!({"type": "addSheet", "name": "Budget", "sheetId": "sheet-2"})
        );

        let parsed: Operation = serde_json::from_value(json!({
            "type": "setCell", "sheet": "Sheet1", "address": "A1", "value": 50
        }))
        .unwrap();
        assert_eq!(parsed, Operation::set_value("Sheet1", "A1", 50.0));
        assert_eq!(parsed.kind_name(), "setCell");
        assert_eq!(parsed.sheet_key(), Some("Sheet1"));
    }

    #[test]
    fn restore_cells_keeps_absent_markers() {
        let mut cells = BTreeMap::new();
        cells.insert("A1".to_string(), None);
        cells.insert("A2".to_string(), Some(Cell::raw("Bob")));
        let op = Operation::RestoreCells {
            sheet: "sheet-1".into(),
            cells,
            styles: BTreeMap::new(),
            merges: None,
        };
        let json = serde_json::to_value(&op).unwrap();
        assert_eq!(json["cells"]["A1"], serde_json::Value::Null);
        assert_eq!(json["cells"]["A2"]["raw"], "Bob");
        let back: Operation = serde_json::from_value(json).unwrap();
        assert_eq!(back, op);
    }
}
