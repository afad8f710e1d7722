//! The persisted document model.
//!
//! Everything here serialises with camelCase keys so the JSON produced by the
//! core is the same shape the browser client stores. Maps are `BTreeMap`s so
//! two documents with the same content serialise to the same bytes.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::operations::Operation;

/// Milliseconds since the Unix epoch.
pub fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Document {
    pub id: String,
    pub sheets: Vec<Sheet>,
    /// Workbook-scoped names.
    #[serde(default)]
    pub named_ranges: Vec<NamedRangeDef>,
    #[serde(default)]
    pub computed: ComputedState,
    #[serde(default)]
    pub action_log: Vec<Action>,
    pub modified_at: i64,
}

impl Document {
    /// A document with a single empty `Sheet1`.
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            sheets: vec![Sheet::new("sheet-1", "Sheet1")],
            named_ranges: Vec::new(),
            computed: ComputedState::default(),
            action_log: Vec::new(),
            modified_at: now_millis(),
        }
    }

    /// Look a sheet up by id, then by name (case-insensitive).
    pub fn sheet_index(&self, key: &str) -> Option<usize> {
        self.sheets
            .iter()
            .position(|s| s.id == key)
            .or_else(|| {
                self.sheets
                    .iter()
                    .position(|s| s.name.eq_ignore_ascii_case(key))
            })
    }

    pub fn sheet(&self, key: &str) -> Option<&Sheet> {
        self.sheet_index(key).map(|i| &self.sheets[i])
    }

    pub fn sheet_mut(&mut self, key: &str) -> Option<&mut Sheet> {
        self.sheet_index(key).map(move |i| &mut self.sheets[i])
    }

    pub fn sheet_by_id(&self, id: &str) -> Option<&Sheet> {
        self.sheets.iter().find(|s| s.id == id)
    }

    /// Name lookup only; used to resolve sheet qualifiers inside formulas.
    pub fn sheet_by_name(&self, name: &str) -> Option<&Sheet> {
        self.sheets
            .iter()
            .find(|s| s.name.eq_ignore_ascii_case(name))
    }

    /// First `sheet-N` id not in use.
    pub fn next_sheet_id(&self) -> String {
        (self.sheets.len() + 1..)
            .map(|n| format!("sheet-{n}"))
            .find(|id| self.sheet_by_id(id).is_none())
            .unwrap_or_else(|| format!("sheet-{}", now_millis()))
    }

    /// Advance `modified_at`; it strictly increases even within one millisecond.
    pub fn touch(&mut self) {
        self.modified_at = now_millis().max(self.modified_at + 1);
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Sheet {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub cells: BTreeMap<String, Cell>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub named_ranges: Vec<NamedRangeDef>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub styles: BTreeMap<String, CellStyle>,
    /// Canonical `A1:B2` ranges.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub merges: Vec<String>,
}

impl Sheet {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            cells: BTreeMap::new(),
            named_ranges: Vec::new(),
            styles: BTreeMap::new(),
            merges: Vec::new(),
        }
    }

    pub fn cell(&self, address: &str) -> Option<&Cell> {
        self.cells.get(address)
    }
}

/// A named reference such as `Prices -> Sheet1!$A$1:$A$10`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NamedRangeDef {
    pub name: String,
    pub reference: String,
}

/// A literal a user typed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RawValue {
    Bool(bool),
    Number(f64),
    Text(String),
}

impl RawValue {
    pub fn as_number(&self) -> Option<f64> {
        match self {
            RawValue::Number(n) => Some(*n),
            _ => None,
        }
    }
}

impl From<f64> for RawValue {
    fn from(n: f64) -> Self {
        RawValue::Number(n)
    }
}

impl From<bool> for RawValue {
    fn from(b: bool) -> Self {
        RawValue::Bool(b)
    }
}

impl From<&str> for RawValue {
    fn from(s: &str) -> Self {
        RawValue::Text(s.to_string())
    }
}

impl From<String> for RawValue {
    fn from(s: String) -> Self {
        RawValue::Text(s)
    }
}

/// Source of truth is `raw` xor `formula`; `computed` is a derived cache.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Cell {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub raw: Option<RawValue>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub formula: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub computed: Option<ComputedValue>,
}

impl Cell {
    pub fn raw(value: impl Into<RawValue>) -> Self {
        Self {
            raw: Some(value.into()),
            ..Self::default()
        }
    }

    pub fn formula(text: impl Into<String>) -> Self {
        Self {
            formula: Some(text.into()),
            ..Self::default()
        }
    }

    pub fn has_content(&self) -> bool {
        self.raw.is_some() || self.formula.is_some()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TypeTag {
    Number,
    Boolean,
    Date,
    Text,
    Error,
    Empty,
}

/// Canonical error stored in the cache: `code` is a marker such as `#DIV/0!`
/// (or the engine's own code when it is not recognised).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CellErrorInfo {
    pub code: String,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ComputedValue {
    pub value: Option<RawValue>,
    pub type_tag: TypeTag,
    pub timestamp: i64,
    pub engine_version: String,
    pub computed_by: String,
    #[serde(default, skip_serializing_if = "is_false")]
    pub stale: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<CellErrorInfo>,
}

/// Flattened per-cell entry of `computed.hfCache`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheEntry {
    pub v: Option<RawValue>,
    pub t: TypeTag,
    pub ts: i64,
    pub engine_version: String,
    pub computed_by: String,
    #[serde(default, skip_serializing_if = "is_false")]
    pub stale: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<CellErrorInfo>,
}

impl From<&ComputedValue> for CacheEntry {
    fn from(c: &ComputedValue) -> Self {
        Self {
            v: c.value.clone(),
            t: c.type_tag,
            ts: c.timestamp,
            engine_version: c.engine_version.clone(),
            computed_by: c.computed_by.clone(),
            stale: c.stale,
            error: c.error.clone(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ComputedState {
    /// `"Sheet!A1"` to the last computed value.
    #[serde(default)]
    pub hf_cache: BTreeMap<String, CacheEntry>,
    /// `"Sheet!A1"` to its precedents.
    #[serde(default)]
    pub dependency_graph: BTreeMap<String, Vec<String>>,
}

/// A committed operation together with the operations that undo it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Action {
    #[serde(rename = "type")]
    pub kind: String,
    pub payload: Operation,
    pub inverse: Vec<Operation>,
    pub ts: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HorizontalAlign {
    Left,
    Center,
    Right,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CellStyle {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bold: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub italic: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub underline: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub font_color: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fill_color: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub align: Option<HorizontalAlign>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub number_format: Option<String>,
}

impl CellStyle {
    pub fn is_empty(&self) -> bool {
        *self == CellStyle::default()
    }

    /// Overlay the fields set in `patch`.
    pub fn merged_with(&self, patch: &CellStyle) -> CellStyle {
        CellStyle {
            bold: patch.bold.or(self.bold),
            italic: patch.italic.or(self.italic),
            underline: patch.underline.or(self.underline),
            font_color: patch.font_color.clone().or_else(|| self.font_color.clone()),
            fill_color: patch.fill_color.clone().or_else(|| self.fill_color.clone()),
            align: patch.align.or(self.align),
            number_format: patch
                .number_format
                .clone()
                .or_else(|| self.number_format.clone()),
        }
    }
}

fn is_false(b: &bool) -> bool {
    !*b
}
