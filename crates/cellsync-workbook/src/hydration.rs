//! Loading a [`Document`] into an evaluation engine.
//!
//! A hydration creates one engine sheet per document sheet, loads every cell
//! (formula, else raw value, else a trusted cached value), then registers
//! named ranges once all sheets exist so qualified references resolve. The
//! result is a [`HydrationHandle`] the caller threads through recompute calls
//! and disposes explicitly.
//!
//! [`HydrationCache`] keeps one handle per document and reuses it while the
//! document's `modifiedAt` is unchanged. The only change it patches instead of
//! rebuilding is a single appended `addSheet` action.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
#[cfg(feature = "tracing")]
use std::time::Instant;

use cellsync_common::{CellCoord, SheetRef, parse_address, qualified_key};
use parking_lot::{Mutex, MutexGuard};
use std::hash::Hasher;

use rustc_hash::{FxHashMap, FxHashSet, FxHasher};

use crate::diagnostics::{Warning, WarningCode};
use crate::document::{Action, Document, NamedRangeDef, Sheet};
use crate::engine::{EngineFactory, EngineSheetId, EvaluationEngine};
use crate::error::{CoreError, HydrationError};
use crate::operations::Operation;

/// Cells loaded between two polls of the cancellation flag.
const CANCEL_POLL_INTERVAL: usize = 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HydrateOptions {
    /// Load cached values for cells without a formula or raw value. Turned
    /// off when rebuilding after a fault.
    pub trust_cached_values: bool,
}

impl Default for HydrateOptions {
    fn default() -> Self {
        Self {
            trust_cached_values: true,
        }
    }
}

/// A cell address as it appears in the document, resolved once at load time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MappedCell {
    pub canonical: String,
    pub coord: CellCoord,
}

#[derive(Debug, Default)]
pub(crate) struct SheetMaps {
    /// Document sheet id to engine sheet id.
    pub(crate) engine_ids: FxHashMap<String, EngineSheetId>,
    /// Engine sheet id to the document sheet id that owns it.
    pub(crate) owners: FxHashMap<EngineSheetId, String>,
    /// Document sheet id to the (possibly suffixed) name used in the engine.
    pub(crate) engine_names: FxHashMap<String, String>,
    /// Per document sheet id: stored address to canonical address.
    pub(crate) addresses: FxHashMap<String, FxHashMap<String, MappedCell>>,
}

pub(crate) struct HandleState {
    pub(crate) engine: Option<Box<dyn EvaluationEngine>>,
    pub(crate) factory: Arc<dyn EngineFactory>,
    pub(crate) document_id: String,
    pub(crate) modified_at: i64,
    pub(crate) action_count: usize,
    /// Digest of the action log as of the last load; an undo followed by new
    /// edits keeps the length but changes the digest.
    pub(crate) log_digest: Option<u64>,
    pub(crate) engine_version: String,
    pub(crate) maps: SheetMaps,
    pub(crate) warnings: Vec<Warning>,
}

/// Shared, explicitly disposed reference to a hydrated engine context.
///
/// Clones share the same context; disposing any clone disposes all of them,
/// and every later use fails with [`CoreError::HandleDisposed`].
#[derive(Clone)]
pub struct HydrationHandle {
    inner: Arc<Mutex<HandleState>>,
}

impl std::fmt::Debug for HydrationHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let st = self.inner.lock();
        f.debug_struct("HydrationHandle")
            .field("document_id", &st.document_id)
            .field("modified_at", &st.modified_at)
            .field("disposed", &st.engine.is_none())
            .finish()
    }
}

impl HydrationHandle {
    fn new(state: HandleState) -> Self {
        Self {
            inner: Arc::new(Mutex::new(state)),
        }
    }

    pub(crate) fn lock(&self) -> MutexGuard<'_, HandleState> {
        self.inner.lock()
    }

    pub fn is_disposed(&self) -> bool {
        self.inner.lock().engine.is_none()
    }

    /// Drop the engine context. Idempotent.
    pub fn dispose(&self) {
        let mut st = self.inner.lock();
        if st.engine.take().is_some() {
            st.maps = SheetMaps::default();
            #[cfg(feature = "tracing")]
            tracing::debug!(document = %st.document_id, "disposed hydration handle");
        }
    }

    pub fn same_context(&self, other: &HydrationHandle) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    pub fn document_id(&self) -> String {
        self.inner.lock().document_id.clone()
    }

    pub fn modified_at(&self) -> i64 {
        self.inner.lock().modified_at
    }

    pub fn engine_version(&self) -> Result<String, CoreError> {
        let st = self.inner.lock();
        st.engine
            .as_ref()
            .map(|_| st.engine_version.clone())
            .ok_or(CoreError::HandleDisposed)
    }

    pub fn engine_sheet_id(&self, sheet_id: &str) -> Result<Option<EngineSheetId>, CoreError> {
        let st = self.live()?;
        Ok(st.maps.engine_ids.get(sheet_id).copied())
    }

    pub fn engine_sheet_name(&self, sheet_id: &str) -> Result<Option<String>, CoreError> {
        let st = self.live()?;
        Ok(st.maps.engine_names.get(sheet_id).cloned())
    }

    pub fn canonical_address(
        &self,
        sheet_id: &str,
        address: &str,
    ) -> Result<Option<MappedCell>, CoreError> {
        let st = self.live()?;
        Ok(st
            .maps
            .addresses
            .get(sheet_id)
            .and_then(|m| m.get(address))
            .cloned())
    }

    /// Warnings accumulated by every hydration into this handle.
    pub fn warnings(&self) -> Vec<Warning> {
        self.inner.lock().warnings.clone()
    }

    pub(crate) fn push_warning(&self, warning: Warning) {
        self.inner.lock().warnings.push(warning);
    }

    /// Lock the state, failing if the handle is disposed.
    pub(crate) fn live(&self) -> Result<MutexGuard<'_, HandleState>, CoreError> {
        let st = self.inner.lock();
        if st.engine.is_none() {
            return Err(CoreError::HandleDisposed);
        }
        Ok(st)
    }

    /// Replace the context with a fresh hydration of `doc`.
    pub(crate) fn rebuild(
        &self,
        doc: &mut Document,
        opts: HydrateOptions,
        cancel: &AtomicBool,
    ) -> Result<(), HydrationError> {
        let factory = Arc::clone(&self.inner.lock().factory);
        let state = build_state(doc, factory, opts, cancel)?;
        *self.inner.lock() = state;
        Ok(())
    }

    /// Bring the context in line with `doc`: nothing to do while `modifiedAt`
    /// is unchanged, a patch when one sheet was appended, a rebuild otherwise.
    pub(crate) fn refresh(
        &self,
        doc: &mut Document,
        opts: HydrateOptions,
        cancel: &AtomicBool,
    ) -> Result<(), HydrationError> {
        match self.freshness(doc) {
            Freshness::Fresh => Ok(()),
            Freshness::OneSheetAdded(sheet_id) => {
                patch_add_sheet(self, doc, &sheet_id, opts).map_err(|e| match e {
                    CoreError::Hydration(h) => h,
                    other => HydrationError::Interrupted(other.to_string()),
                })
            }
            Freshness::Outdated => self.rebuild(doc, opts, cancel),
        }
    }

    fn freshness(&self, doc: &Document) -> Freshness {
        let st = self.inner.lock();
        if st.document_id != doc.id {
            return Freshness::Outdated;
        }
        if st.modified_at == doc.modified_at {
            return Freshness::Fresh;
        }
        if doc.action_log.len() == st.action_count + 1
            && st.log_digest.is_some()
            && log_digest(&doc.action_log[..st.action_count]) == st.log_digest
            && doc.sheets.len() == st.maps.engine_ids.len() + 1
            && let Some(last) = doc.action_log.last()
            && let Operation::AddSheet {
                sheet_id: Some(id), ..
            } = &last.payload
            && !st.maps.engine_ids.contains_key(id)
        {
            return Freshness::OneSheetAdded(id.clone());
        }
        Freshness::Outdated
    }
}

/// Hash of every logged action, `None` if one cannot be serialised.
fn log_digest(actions: &[Action]) -> Option<u64> {
    let mut hasher = FxHasher::default();
    for action in actions {
        hasher.write(&serde_json::to_vec(action).ok()?);
    }
    Some(hasher.finish())
}

enum Freshness {
    Fresh,
    OneSheetAdded(String),
    Outdated,
}

/// Hydrate `doc` into a fresh engine context.
///
/// Cached values whose `engineVersion` differs from the new engine are flagged
/// `stale` in the document and never loaded.
pub fn hydrate(
    doc: &mut Document,
    factory: Arc<dyn EngineFactory>,
    opts: HydrateOptions,
) -> Result<HydrationHandle, HydrationError> {
    hydrate_cancellable(doc, factory, opts, &AtomicBool::new(false))
}

pub fn hydrate_cancellable(
    doc: &mut Document,
    factory: Arc<dyn EngineFactory>,
    opts: HydrateOptions,
    cancel: &AtomicBool,
) -> Result<HydrationHandle, HydrationError> {
    build_state(doc, factory, opts, cancel).map(HydrationHandle::new)
}

/// Add one sheet that was appended to `doc` after `handle` was built.
///
/// A sheet that is already mapped is left alone and reported as a warning.
pub fn patch_add_sheet(
    handle: &HydrationHandle,
    doc: &mut Document,
    sheet_id: &str,
    opts: HydrateOptions,
) -> Result<(), CoreError> {
    let mut guard = handle.live()?;
    let st = &mut *guard;
    if st.document_id != doc.id {
        return Err(CoreError::DocumentMismatch {
            handle: st.document_id.clone(),
            document: doc.id.clone(),
        });
    }
    if st.maps.engine_ids.contains_key(sheet_id) {
        st.warnings.push(Warning::new(
            WarningCode::SheetAlreadyHydrated,
            format!("sheet '{sheet_id}' is already hydrated; ignoring"),
        ));
        return Ok(());
    }
    let Some(idx) = doc.sheets.iter().position(|s| s.id == sheet_id) else {
        st.warnings.push(Warning::new(
            WarningCode::SheetSkipped,
            format!("sheet '{sheet_id}' is not in the document"),
        ));
        return Ok(());
    };
    let Some(engine) = st.engine.as_deref_mut() else {
        return Err(CoreError::HandleDisposed);
    };

    let cancel = AtomicBool::new(false);
    let mut loader = Loader {
        engine,
        version: st.engine_version.clone(),
        opts,
        cancel: &cancel,
        maps: &mut st.maps,
        warnings: &mut st.warnings,
        loaded: 0,
    };
    let sheet = &mut doc.sheets[idx];
    let eid = loader.add_sheet(sheet)?;
    loader.load_cells(sheet, eid)?;
    let added = sheet.name.clone();
    let names = sheet.named_ranges.clone();
    // Workbook names aimed at this sheet were dropped when it did not exist yet.
    for def in doc.named_ranges.iter().filter(|d| targets_sheet(d, &added)) {
        loader.register_name(&doc.sheets, def, None);
    }
    for def in &names {
        loader.register_name(&doc.sheets, def, Some(eid));
    }
    st.modified_at = doc.modified_at;
    st.action_count = doc.action_log.len();
    st.log_digest = log_digest(&doc.action_log);

    #[cfg(feature = "tracing")]
    tracing::debug!(document = %doc.id, sheet = sheet_id, "patched hydration with new sheet");
    Ok(())
}

fn targets_sheet(def: &NamedRangeDef, sheet: &str) -> bool {
    SheetRef::parse(&def.reference)
        .ok()
        .and_then(|r| r.sheet)
        .is_some_and(|target| target.eq_ignore_ascii_case(sheet))
}

fn build_state(
    doc: &mut Document,
    factory: Arc<dyn EngineFactory>,
    opts: HydrateOptions,
    cancel: &AtomicBool,
) -> Result<HandleState, HydrationError> {
    if doc.sheets.is_empty() {
        return Err(HydrationError::NoSheets(doc.id.clone()));
    }
    #[cfg(feature = "tracing")]
    let start = Instant::now();
    let mut engine = factory.create();
    let version = engine.version().to_string();
    let mut maps = SheetMaps::default();
    let mut warnings = Vec::new();

    let mut loader = Loader {
        engine: engine.as_mut(),
        version: version.clone(),
        opts,
        cancel,
        maps: &mut maps,
        warnings: &mut warnings,
        loaded: 0,
    };

    let mut ids = Vec::with_capacity(doc.sheets.len());
    for sheet in &doc.sheets {
        ids.push(loader.add_sheet(sheet)?);
    }
    for (sheet, eid) in doc.sheets.iter_mut().zip(&ids) {
        loader.load_cells(sheet, *eid)?;
    }
    // Names go in last so sheet-qualified references resolve.
    for def in &doc.named_ranges {
        loader.register_name(&doc.sheets, def, None);
    }
    for (sheet, eid) in doc.sheets.iter().zip(&ids) {
        for def in &sheet.named_ranges {
            loader.register_name(&doc.sheets, def, Some(*eid));
        }
    }
    #[cfg(feature = "tracing")]
    let loaded = loader.loaded;

    let mut stale_entries = 0usize;
    for entry in doc.computed.hf_cache.values_mut() {
        if entry.engine_version != version && !entry.stale {
            entry.stale = true;
            stale_entries += 1;
        }
    }
    if stale_entries > 0 {
        warnings.push(Warning::new(
            WarningCode::StaleCache,
            format!("{stale_entries} cached values were produced by another engine version"),
        ));
    }

    #[cfg(feature = "tracing")]
    tracing::info!(
        document = %doc.id,
        sheets = doc.sheets.len(),
        cells = loaded,
        warnings = warnings.len(),
        elapsed_ms = start.elapsed().as_millis() as u64,
        "hydrated document"
    );

    Ok(HandleState {
        engine: Some(engine),
        factory,
        document_id: doc.id.clone(),
        modified_at: doc.modified_at,
        action_count: doc.action_log.len(),
        log_digest: log_digest(&doc.action_log),
        engine_version: version,
        maps,
        warnings,
    })
}

struct Loader<'a> {
    engine: &'a mut dyn EvaluationEngine,
    version: String,
    opts: HydrateOptions,
    cancel: &'a AtomicBool,
    maps: &'a mut SheetMaps,
    warnings: &'a mut Vec<Warning>,
    loaded: usize,
}

impl Loader<'_> {
    /// Create the engine sheet, suffixing `_2`, `_3`, ... on a case-insensitive clash.
    fn add_sheet(&mut self, sheet: &Sheet) -> Result<EngineSheetId, HydrationError> {
        let taken: FxHashSet<String> = self
            .maps
            .engine_names
            .values()
            .map(|n| n.to_lowercase())
            .collect();
        let name = unique_name(&sheet.name, &taken);
        let eid = self
            .engine
            .add_sheet(&name)
            .map_err(|source| HydrationError::Engine {
                sheet: sheet.name.clone(),
                source,
            })?;
        if let Some(owner) = self.maps.owners.get(&eid) {
            return Err(HydrationError::SheetIdCollision {
                sheet: sheet.name.clone(),
                owner: owner.clone(),
                engine_id: eid,
            });
        }
        self.maps.owners.insert(eid, sheet.id.clone());
        self.maps.engine_ids.insert(sheet.id.clone(), eid);
        self.maps.engine_names.insert(sheet.id.clone(), name);
        Ok(eid)
    }

    fn load_cells(&mut self, sheet: &mut Sheet, eid: EngineSheetId) -> Result<(), HydrationError> {
        let mut addresses = FxHashMap::default();
        for (address, cell) in sheet.cells.iter_mut() {
            if self.loaded % CANCEL_POLL_INTERVAL == 0 && self.cancel.load(Ordering::Relaxed) {
                return Err(HydrationError::Interrupted(format!(
                    "cancelled while loading '{}'",
                    sheet.name
                )));
            }
            self.loaded += 1;
            let location = qualified_key(&sheet.name, address);
            let coord = match parse_address(address) {
                Ok(c) => c,
                Err(e) => {
                    self.warnings.push(
                        Warning::new(WarningCode::UnparsableAddress, e.to_string()).at(location),
                    );
                    continue;
                }
            };
            addresses.insert(
                address.clone(),
                MappedCell {
                    canonical: coord.to_address(),
                    coord,
                },
            );

            let mut stale = false;
            if let Some(computed) = cell.computed.as_mut()
                && computed.engine_version != self.version
            {
                computed.stale = true;
                stale = true;
            }

            let result = if let Some(formula) = &cell.formula {
                self.engine
                    .set_cell_formula(eid, coord.row, coord.col, formula)
            } else if let Some(raw) = &cell.raw {
                self.engine.set_cell_value(eid, coord.row, coord.col, raw)
            } else if let Some(computed) = &cell.computed {
                if stale {
                    self.warnings.push(
                        Warning::new(
                            WarningCode::StaleCache,
                            format!(
                                "cached value from engine '{}' was not loaded",
                                computed.engine_version
                            ),
                        )
                        .at(location.clone()),
                    );
                    Ok(())
                } else if self.opts.trust_cached_values
                    && computed.error.is_none()
                    && let Some(value) = &computed.value
                {
                    self.engine.set_cell_value(eid, coord.row, coord.col, value)
                } else {
                    Ok(())
                }
            } else {
                Ok(())
            };
            if let Err(e) = result {
                self.warnings
                    .push(Warning::new(WarningCode::EngineRejected, e.to_string()).at(location));
            }
        }
        self.maps.addresses.insert(sheet.id.clone(), addresses);
        Ok(())
    }

    /// Register one name. Names pointing at a sheet that does not exist, or
    /// that the engine refuses, are dropped with a warning.
    fn register_name(&mut self, sheets: &[Sheet], def: &NamedRangeDef, scope: Option<EngineSheetId>) {
        if let Ok(SheetRef {
            sheet: Some(target),
            ..
        }) = SheetRef::parse(&def.reference)
            && !sheets.iter().any(|s| s.name.eq_ignore_ascii_case(&target))
        {
            self.warnings.push(Warning::new(
                WarningCode::NamedRangeDropped,
                format!(
                    "named range '{}' refers to missing sheet '{target}'",
                    def.name
                ),
            ));
            return;
        }
        if let Err(e) = self.engine.define_name(&def.name, &def.reference, scope) {
            self.warnings.push(Warning::new(
                WarningCode::NamedRangeDropped,
                format!("named range '{}' was rejected: {e}", def.name),
            ));
        }
    }
}

fn unique_name(name: &str, taken: &FxHashSet<String>) -> String {
    if !taken.contains(&name.to_lowercase()) {
        return name.to_string();
    }
    let mut n = 2u32;
    loop {
        let candidate = format!("{name}_{n}");
        if !taken.contains(&candidate.to_lowercase()) {
            return candidate;
        }
        n += 1;
    }
}

/// One hydration handle per document id.
#[derive(Default)]
pub struct HydrationCache {
    entries: FxHashMap<String, HydrationHandle>,
}

impl HydrationCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return a handle that reflects `doc`, reusing, patching or rebuilding the
    /// cached one as needed.
    pub fn hydrate(
        &mut self,
        doc: &mut Document,
        factory: &Arc<dyn EngineFactory>,
        opts: HydrateOptions,
        cancel: &AtomicBool,
    ) -> Result<HydrationHandle, HydrationError> {
        if let Some(handle) = self.entries.get(&doc.id).cloned()
            && !handle.is_disposed()
        {
            return match handle.refresh(doc, opts, cancel) {
                Ok(()) => Ok(handle),
                Err(e) => {
                    handle.dispose();
                    self.entries.remove(&doc.id);
                    Err(e)
                }
            };
        }
        let handle = hydrate_cancellable(doc, Arc::clone(factory), opts, cancel)?;
        self.entries.insert(doc.id.clone(), handle.clone());
        Ok(handle)
    }

    pub fn get(&self, document_id: &str) -> Option<&HydrationHandle> {
        self.entries.get(document_id)
    }

    /// Forget the entry for `document_id`, returning it.
    pub fn evict(&mut self, document_id: &str) -> Option<HydrationHandle> {
        self.entries.remove(document_id)
    }

    /// Dispose `handle` and drop any entry that shares its context.
    pub fn dispose(&mut self, handle: &HydrationHandle) {
        handle.dispose();
        self.entries.retain(|_, h| !h.same_context(handle));
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::{Cell, ComputedValue, RawValue, TypeTag};
    use crate::engine::CalcEngineFactory;

    fn factory() -> Arc<dyn EngineFactory> {
        Arc::new(CalcEngineFactory::default())
    }

    #[test]
    fn zero_sheets_is_a_hard_failure() {
        let mut doc = Document::new("d");
        doc.sheets.clear();
        assert!(matches!(
            hydrate(&mut doc, factory(), HydrateOptions::default()),
            Err(HydrationError::NoSheets(_))
        ));
    }

    #[test]
    fn clashing_sheet_names_get_numeric_suffixes() {
        let mut doc = Document::new("d");
        doc.sheets.push(Sheet::new("sheet-2", "sheet1"));
        doc.sheets.push(Sheet::new("sheet-3", "SHEET1"));
        let handle = hydrate(&mut doc, factory(), HydrateOptions::default()).unwrap();
        assert_eq!(handle.engine_sheet_name("sheet-1").unwrap().as_deref(), Some("Sheet1"));
        assert_eq!(handle.engine_sheet_name("sheet-2").unwrap().as_deref(), Some("sheet1_2"));
        assert_eq!(handle.engine_sheet_name("sheet-3").unwrap().as_deref(), Some("SHEET1_3"));
        let ids: FxHashSet<_> = ["sheet-1", "sheet-2", "sheet-3"]
            .iter()
            .map(|s| handle.engine_sheet_id(s).unwrap().unwrap())
            .collect();
        assert_eq!(ids.len(), 3);
    }

    #[test]
    fn addresses_are_canonicalised_and_bad_ones_warned() {
        let mut doc = Document::new("d");
        let cells = &mut doc.sheets[0].cells;
        cells.insert("$b$2".into(), Cell::raw(1.0));
        cells.insert("nope".into(), Cell::raw(2.0));
        let handle = hydrate(&mut doc, factory(), HydrateOptions::default()).unwrap();
        let mapped = handle.canonical_address("sheet-1", "$b$2").unwrap().unwrap();
        assert_eq!(mapped.canonical, "B2");
        assert_eq!(mapped.coord, CellCoord::new(1, 1));
        assert!(handle
            .warnings()
            .iter()
            .any(|w| w.code == WarningCode::UnparsableAddress));
    }

    #[test]
    fn names_on_missing_sheets_are_dropped() {
        let mut doc = Document::new("d");
        doc.named_ranges.push(NamedRangeDef {
            name: "Ghost".into(),
            reference: "Gone!A1".into(),
        });
        doc.named_ranges.push(NamedRangeDef {
            name: "Here".into(),
            reference: "Sheet1!A1".into(),
        });
        let handle = hydrate(&mut doc, factory(), HydrateOptions::default()).unwrap();
        let dropped: Vec<_> = handle
            .warnings()
            .into_iter()
            .filter(|w| w.code == WarningCode::NamedRangeDropped)
            .collect();
        assert_eq!(dropped.len(), 1);
        assert!(dropped[0].message.contains("Ghost"));
    }

    #[test]
    fn cached_values_need_a_matching_engine_version() {
        let mut doc = Document::new("d");
        let version = CalcEngineFactory::default().version();
        let cached = |engine_version: &str, n: f64| Cell {
            raw: None,
            formula: None,
            computed: Some(ComputedValue {
                value: Some(RawValue::Number(n)),
                type_tag: TypeTag::Number,
                timestamp: 1,
                engine_version: engine_version.to_string(),
                computed_by: "test".into(),
                stale: false,
                error: None,
            }),
        };
        doc.sheets[0].cells.insert("A1".into(), cached(&version, 7.0));
        doc.sheets[0].cells.insert("A2".into(), cached("old-engine/0.1", 9.0));
        doc.sheets[0]
            .cells
            .insert("B1".into(), Cell::formula("=A1+A2"));

        let handle = hydrate(&mut doc, factory(), HydrateOptions::default()).unwrap();
        let a2 = doc.sheets[0].cells["A2"].computed.as_ref().unwrap();
        assert!(a2.stale);
        assert!(!doc.sheets[0].cells["A1"].computed.as_ref().unwrap().stale);
        assert!(handle
            .warnings()
            .iter()
            .any(|w| w.code == WarningCode::StaleCache && w.location.as_deref() == Some("Sheet1!A2")));

        // Only the trusted value reaches the engine.
        let st = handle.lock();
        let engine = st.engine.as_ref().unwrap();
        let sid = st.maps.engine_ids["sheet-1"];
        assert_eq!(engine.cell_value(sid, 0, 0).unwrap(), serde_json::json!(7.0));
        assert_eq!(engine.cell_value(sid, 1, 0).unwrap(), serde_json::Value::Null);
    }

    #[test]
    fn bypassing_the_cache_skips_cached_values() {
        let mut doc = Document::new("d");
        let version = CalcEngineFactory::default().version();
        doc.sheets[0].cells.insert(
            "A1".into(),
            Cell {
                computed: Some(ComputedValue {
                    value: Some(RawValue::Number(3.0)),
                    type_tag: TypeTag::Number,
                    timestamp: 1,
                    engine_version: version,
                    computed_by: "test".into(),
                    stale: false,
                    error: None,
                }),
                ..Cell::default()
            },
        );
        let opts = HydrateOptions {
            trust_cached_values: false,
        };
        let handle = hydrate(&mut doc, factory(), opts).unwrap();
        let st = handle.lock();
        let sid = st.maps.engine_ids["sheet-1"];
        assert_eq!(
            st.engine.as_ref().unwrap().cell_value(sid, 0, 0).unwrap(),
            serde_json::Value::Null
        );
    }

    #[test]
    fn patching_an_existing_sheet_only_warns() {
        let mut doc = Document::new("d");
        let handle = hydrate(&mut doc, factory(), HydrateOptions::default()).unwrap();
        patch_add_sheet(&handle, &mut doc, "sheet-1", HydrateOptions::default()).unwrap();
        assert!(handle
            .warnings()
            .iter()
            .any(|w| w.code == WarningCode::SheetAlreadyHydrated));
        assert_eq!(handle.engine_sheet_id("sheet-1").unwrap(), Some(0));
    }

    #[test]
    fn disposed_handles_fail_fast() {
        let mut doc = Document::new("d");
        let handle = hydrate(&mut doc, factory(), HydrateOptions::default()).unwrap();
        let other = handle.clone();
        handle.dispose();
        assert!(other.is_disposed());
        assert!(matches!(other.engine_version(), Err(CoreError::HandleDisposed)));
        assert!(matches!(
            patch_add_sheet(&other, &mut doc, "sheet-9", HydrateOptions::default()),
            Err(CoreError::HandleDisposed)
        ));
    }

    #[test]
    fn cache_reuses_while_unmodified_and_rebuilds_after() {
        let mut doc = Document::new("d");
        let f = factory();
        let mut cache = HydrationCache::new();
        let cancel = AtomicBool::new(false);
        let first = cache
            .hydrate(&mut doc, &f, HydrateOptions::default(), &cancel)
            .unwrap();
        let again = cache
            .hydrate(&mut doc, &f, HydrateOptions::default(), &cancel)
            .unwrap();
        assert!(first.same_context(&again));
        assert_eq!(cache.len(), 1);

        doc.sheets[0].cells.insert("A1".into(), Cell::raw(1.0));
        doc.touch();
        let rebuilt = cache
            .hydrate(&mut doc, &f, HydrateOptions::default(), &cancel)
            .unwrap();
        assert!(rebuilt.same_context(&first));
        assert_eq!(rebuilt.modified_at(), doc.modified_at);

        cache.dispose(&rebuilt);
        assert!(cache.is_empty());
        assert!(first.is_disposed());
    }
}
