//! Reading evaluated values back out of a hydrated engine.
//!
//! A pass recalculates the engine, reads every formula cell, normalises the
//! engine's value into a [`ComputedValue`], and rebuilds the dependency graph.
//! Constants carrying a computed value are re-stamped for the current engine;
//! cached-only cells left stale by hydration are dropped, since no formula or
//! constant remains to refresh them from.
//! Nothing is written to the document until the whole pass has succeeded, so
//! a cancelled or panicking pass leaves it exactly as it was.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
#[cfg(feature = "tracing")]
use std::time::Instant;

use cellsync_common::{ExcelErrorKind, qualified_key, serial_to_iso};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;
use serde_json::{Map, Value};

use crate::diagnostics::{Warning, WarningCode};
use crate::document::{CacheEntry, CellErrorInfo, ComputedValue, Document, RawValue, TypeTag, now_millis};
use crate::engine::{EngineError, EvaluationEngine};
use crate::error::CoreError;
use crate::hydration::HydrationHandle;

/// Cells read between two polls of the cancellation flag.
const CANCEL_POLL_INTERVAL: usize = 256;

static ERROR_MARKER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^#[A-Za-z0-9_/]+[!?]?$").expect("error marker pattern is valid"));

/// A formula cell whose value is an error, or a pass-level system error.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RecomputeError {
    /// `Sheet!A1`; `None` for system errors.
    pub location: Option<String>,
    pub code: String,
    pub message: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RecomputeResult {
    pub updated_count: usize,
    pub errors: Vec<RecomputeError>,
    pub warnings: Vec<Warning>,
}

#[derive(Debug, thiserror::Error)]
pub enum PassError {
    #[error(transparent)]
    Core(#[from] CoreError),
    #[error("recompute was cancelled")]
    Cancelled,
}

pub fn recompute(
    doc: &mut Document,
    handle: &HydrationHandle,
    computed_by: &str,
) -> Result<RecomputeResult, PassError> {
    recompute_cancellable(doc, handle, computed_by, &AtomicBool::new(false))
}

/// Run one pass, giving up with [`PassError::Cancelled`] once `cancel` is raised.
pub fn recompute_cancellable(
    doc: &mut Document,
    handle: &HydrationHandle,
    computed_by: &str,
    cancel: &AtomicBool,
) -> Result<RecomputeResult, PassError> {
    #[cfg(feature = "tracing")]
    let start = Instant::now();
    let mut guard = handle.live()?;
    let st = &mut *guard;
    if st.document_id != doc.id {
        return Err(CoreError::DocumentMismatch {
            handle: st.document_id.clone(),
            document: doc.id.clone(),
        }
        .into());
    }
    let version = st.engine_version.clone();
    let Some(engine) = st.engine.as_deref_mut() else {
        return Err(CoreError::HandleDisposed.into());
    };

    let mut warnings = Vec::new();
    match engine.recalculate(cancel) {
        Ok(()) => {}
        Err(EngineError::Cancelled) => return Err(PassError::Cancelled),
        Err(e) => warnings.push(Warning::new(
            WarningCode::RecalcFailed,
            format!("recalculation failed; values may be out of date: {e}"),
        )),
    }
    let engine: &dyn EvaluationEngine = engine;
    let maps = &st.maps;
    let ts = now_millis();
    let mut polled = 0usize;
    let mut poll = || {
        polled += 1;
        if polled % CANCEL_POLL_INTERVAL == 0 && cancel.load(Ordering::Relaxed) {
            return Err(PassError::Cancelled);
        }
        Ok(())
    };

    let mut updates: Vec<(usize, String, ComputedValue)> = Vec::new();
    let mut orphans: Vec<(usize, String)> = Vec::new();
    let mut errors = Vec::new();
    let mut graph: BTreeMap<String, Vec<String>> = BTreeMap::new();

    for (si, sheet) in doc.sheets.iter().enumerate() {
        let Some(&eid) = maps.engine_ids.get(&sheet.id) else {
            warnings.push(
                Warning::new(WarningCode::SheetSkipped, "sheet is not hydrated")
                    .at(sheet.name.clone()),
            );
            continue;
        };
        if let Err(e) = engine.sheet_dimensions(eid) {
            warnings.push(
                Warning::new(
                    WarningCode::SheetSkipped,
                    format!("dimension query failed: {e}"),
                )
                .at(sheet.name.clone()),
            );
            continue;
        }
        let addresses = maps.addresses.get(&sheet.id);

        for (key, cell) in &sheet.cells {
            poll()?;
            let Some(mapped) = addresses.and_then(|m| m.get(key)) else {
                if cell.has_content() {
                    warnings.push(
                        Warning::new(WarningCode::CellSkipped, "cell is not in the hydrated context")
                            .at(qualified_key(&sheet.name, key)),
                    );
                }
                continue;
            };
            let location = qualified_key(&sheet.name, &mapped.canonical);
            let (row, col) = (mapped.coord.row, mapped.coord.col);

            if cell.has_content() {
                match engine.dependents(eid, row, col) {
                    Ok(dependents) => {
                        for (dep_sheet, r, c) in dependents {
                            let Some(dep_name) = maps
                                .owners
                                .get(&dep_sheet)
                                .and_then(|id| doc.sheet_by_id(id))
                                .map(|s| s.name.as_str())
                            else {
                                continue;
                            };
                            let dependent =
                                qualified_key(dep_name, &cellsync_common::to_address(r, c));
                            graph.entry(dependent).or_default().push(location.clone());
                        }
                    }
                    Err(e) => warnings.push(
                        Warning::new(WarningCode::DependencyQueryFailed, e.to_string())
                            .at(location.clone()),
                    ),
                }
            }

            if cell.formula.is_none() {
                match (&cell.raw, &cell.computed) {
                    // Constants are their own value; re-stamp for this engine.
                    (Some(raw), Some(_)) => updates.push((
                        si,
                        key.clone(),
                        ComputedValue {
                            value: Some(raw.clone()),
                            type_tag: raw_type(raw),
                            timestamp: ts,
                            engine_version: version.clone(),
                            computed_by: computed_by.to_string(),
                            stale: false,
                            error: None,
                        },
                    )),
                    // A cached result from another engine with nothing to recompute it from.
                    (None, Some(computed)) if computed.stale => orphans.push((si, key.clone())),
                    _ => {}
                }
                continue;
            }
            let raw = match engine.cell_value(eid, row, col) {
                Ok(v) => v,
                Err(e) => {
                    warnings.push(Warning::new(WarningCode::CellSkipped, e.to_string()).at(location));
                    continue;
                }
            };
            let value = normalize(&raw);
            if let Some(err) = &value.error {
                errors.push(RecomputeError {
                    location: Some(location),
                    code: err.code.clone(),
                    message: err.message.clone(),
                });
            }
            updates.push((
                si,
                key.clone(),
                ComputedValue {
                    value: value.value,
                    type_tag: value.type_tag,
                    timestamp: ts,
                    engine_version: version.clone(),
                    computed_by: computed_by.to_string(),
                    stale: false,
                    error: value.error,
                },
            ));
        }
    }
    for precedents in graph.values_mut() {
        precedents.sort();
        precedents.dedup();
    }

    // Commit.
    let updated_count = updates.len();
    for (si, key, computed) in updates {
        if let Some(cell) = doc.sheets[si].cells.get_mut(&key) {
            cell.computed = Some(computed);
        }
    }
    for (si, key) in orphans {
        doc.sheets[si].cells.remove(&key);
    }
    doc.computed.hf_cache = flatten_cache(doc, maps);
    doc.computed.dependency_graph = graph;

    #[cfg(feature = "tracing")]
    tracing::info!(
        document = %doc.id,
        updated = updated_count,
        errors = errors.len(),
        warnings = warnings.len(),
        elapsed_ms = start.elapsed().as_millis() as u64,
        "recomputed document"
    );

    Ok(RecomputeResult {
        updated_count,
        errors,
        warnings,
    })
}

fn raw_type(raw: &RawValue) -> TypeTag {
    match raw {
        RawValue::Number(_) => TypeTag::Number,
        RawValue::Bool(_) => TypeTag::Boolean,
        RawValue::Text(_) => TypeTag::Text,
    }
}

/// `Sheet!A1` view of every cell's computed value.
fn flatten_cache(
    doc: &Document,
    maps: &crate::hydration::SheetMaps,
) -> BTreeMap<String, CacheEntry> {
    let mut cache = BTreeMap::new();
    for sheet in &doc.sheets {
        let addresses = maps.addresses.get(&sheet.id);
        for (key, cell) in &sheet.cells {
            let Some(computed) = &cell.computed else {
                continue;
            };
            let address = addresses
                .and_then(|m| m.get(key))
                .map_or(key.as_str(), |m| m.canonical.as_str());
            cache.insert(qualified_key(&sheet.name, address), CacheEntry::from(computed));
        }
    }
    cache
}

/// An engine value in the document's vocabulary.
#[derive(Debug, Clone, PartialEq)]
pub struct Normalized {
    pub value: Option<RawValue>,
    pub type_tag: TypeTag,
    pub error: Option<CellErrorInfo>,
}

impl Normalized {
    fn of(value: RawValue, type_tag: TypeTag) -> Self {
        Self {
            value: Some(value),
            type_tag,
            error: None,
        }
    }

    fn empty() -> Self {
        Self {
            value: None,
            type_tag: TypeTag::Empty,
            error: None,
        }
    }

    fn error(code: &str, message: Option<&str>) -> Self {
        let info = error_info(code, message);
        Self {
            value: Some(RawValue::Text(info.code.clone())),
            type_tag: TypeTag::Error,
            error: Some(info),
        }
    }
}

/// Canonical `{code, message}`. Known codes and aliases get the fixed
/// message; anything else passes through as given.
pub fn error_info(code: &str, message: Option<&str>) -> CellErrorInfo {
    match ExcelErrorKind::from_code(code) {
        Some(kind) => CellErrorInfo {
            code: kind.marker().to_string(),
            message: kind.default_message().to_string(),
        },
        None => CellErrorInfo {
            code: code.to_string(),
            message: message
                .filter(|m| !m.trim().is_empty())
                .unwrap_or(code)
                .to_string(),
        },
    }
}

fn is_error_marker(s: &str) -> bool {
    ERROR_MARKER.is_match(s)
        && (s.ends_with('!') || s.ends_with('?') || ExcelErrorKind::from_code(s).is_some())
}

/// Classify a value as an engine reports it.
///
/// Accepted shapes: JSON scalars; bare error markers (`"#DIV/0!"`); tagged
/// objects (`{"type": "ERROR", "value": ..}`, `{"type": "DATE", "serial": ..}`);
/// `{"error": ..}`; `{"value": ..}` wrapping any of these; arrays, reduced to
/// their top-left element.
pub fn normalize(value: &Value) -> Normalized {
    match value {
        Value::Null => Normalized::empty(),
        Value::Bool(b) => Normalized::of(RawValue::Bool(*b), TypeTag::Boolean),
        Value::Number(n) => match n.as_f64() {
            Some(f) => Normalized::of(RawValue::Number(f), TypeTag::Number),
            None => Normalized::of(RawValue::Text(n.to_string()), TypeTag::Text),
        },
        Value::String(s) if is_error_marker(s) => Normalized::error(s, None),
        Value::String(s) => Normalized::of(RawValue::Text(s.clone()), TypeTag::Text),
        Value::Array(items) => items.first().map_or_else(Normalized::empty, normalize),
        Value::Object(map) => normalize_object(map),
    }
}

fn normalize_object(map: &Map<String, Value>) -> Normalized {
    let message = map.get("message").and_then(Value::as_str);
    match map.get("type").and_then(Value::as_str) {
        Some(t) if t.eq_ignore_ascii_case("date") => {
            let serial = map
                .get("serial")
                .or_else(|| map.get("value"))
                .and_then(Value::as_f64);
            if let Some(iso) = serial.and_then(serial_to_iso) {
                return Normalized::of(RawValue::Text(iso), TypeTag::Date);
            }
            if let Some(iso) = map.get("value").and_then(Value::as_str) {
                return Normalized::of(RawValue::Text(iso.to_string()), TypeTag::Date);
            }
            return Normalized::error("#VALUE!", None);
        }
        Some(t) if t.eq_ignore_ascii_case("error") => {
            let code = map
                .get("value")
                .or_else(|| map.get("code"))
                .and_then(Value::as_str)
                .unwrap_or("#ERROR!");
            return Normalized::error(code, message);
        }
        _ => {}
    }
    if let Some(err) = map.get("error") {
        return match err {
            Value::String(code) => Normalized::error(code, message),
            Value::Object(inner) => {
                let code = inner
                    .get("code")
                    .or_else(|| inner.get("value"))
                    .or_else(|| inner.get("type"))
                    .and_then(Value::as_str)
                    .unwrap_or("#ERROR!");
                let message = inner.get("message").and_then(Value::as_str).or(message);
                Normalized::error(code, message)
            }
            _ => Normalized::error("#ERROR!", message),
        };
    }
    if let Some(inner) = map.get("value") {
        let out = normalize(inner);
        return match (&out.error, inner) {
            // `{value: "DIV_BY_ZERO"}` only names an error when wrapped.
            (None, Value::String(s)) if ExcelErrorKind::from_code(s).is_some() => {
                Normalized::error(s, message)
            }
            _ => out,
        };
    }
    Normalized::of(RawValue::Text(Value::Object(map.clone()).to_string()), TypeTag::Text)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn code_of(v: Value) -> Option<String> {
        normalize(&v).error.map(|e| e.code)
    }

    #[test]
    fn scalars_classify_by_json_type() {
        assert_eq!(
            normalize(&json!(15.0)),
            Normalized::of(RawValue::Number(15.0), TypeTag::Number)
        );
        assert_eq!(normalize(&json!(true)).type_tag, TypeTag::Boolean);
        assert_eq!(normalize(&json!("hello")).type_tag, TypeTag::Text);
        assert_eq!(normalize(&json!("#hashtag")).type_tag, TypeTag::Text);
        assert_eq!(normalize(&Value::Null), Normalized::empty());
        assert_eq!(normalize(&json!([[7], [8]])).value, Some(RawValue::Number(7.0)));
    }

    #[test]
    fn every_error_shape_normalises_to_one_code() {
        for shape in [
            json!("#DIV/0!"),
            json!({"type": "ERROR", "value": "#DIV/0!", "message": "engine text"}),
            json!({"value": "#DIV/0!"}),
            json!({"value": "DIV_BY_ZERO"}),
            json!({"error": "DIV_BY_ZERO"}),
            json!({"error": {"code": "#div/0!"}}),
        ] {
            let n = normalize(&shape);
            assert_eq!(n.type_tag, TypeTag::Error, "{shape}");
            let err = n.error.unwrap();
            assert_eq!(err.code, "#DIV/0!", "{shape}");
            assert_eq!(err.message, "Division by zero");
        }
        assert_eq!(code_of(json!({"error": "CYCLE"})).as_deref(), Some("#CIRC!"));
        assert_eq!(code_of(json!("#NAME?")).as_deref(), Some("#NAME?"));
        assert_eq!(code_of(json!({"error": "NA"})).as_deref(), Some("#N/A"));
    }

    #[test]
    fn unknown_codes_pass_through_verbatim() {
        let n = normalize(&json!({"type": "ERROR", "value": "#SPILL!", "message": "blocked"}));
        assert_eq!(
            n.error,
            Some(CellErrorInfo {
                code: "#SPILL!".into(),
                message: "blocked".into(),
            })
        );
        let n = normalize(&json!({"error": "QUOTA_EXCEEDED"}));
        assert_eq!(n.error.unwrap().message, "QUOTA_EXCEEDED");
    }

    #[test]
    fn dates_become_iso_text() {
        let n = normalize(&json!({"type": "DATE", "serial": 45352.0}));
        assert_eq!(n.type_tag, TypeTag::Date);
        assert_eq!(n.value, Some(RawValue::Text("2024-03-01".into())));
        let n = normalize(&json!({"type": "DATE", "serial": 45352.25}));
        assert_eq!(n.value, Some(RawValue::Text("2024-03-01T06:00:00".into())));
    }

    #[test]
    fn plain_value_wrappers_unwrap() {
        assert_eq!(normalize(&json!({"value": 3})).value, Some(RawValue::Number(3.0)));
        assert_eq!(normalize(&json!({"foo": 1})).type_tag, TypeTag::Text);
    }
}
