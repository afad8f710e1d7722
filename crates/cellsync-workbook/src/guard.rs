//! Circular-reference scan and time-bounded execution.
//!
//! The scan reads formula text only. It never blocks a recompute: cycles still
//! go to the engine, which marks their cells `#CIRC!`, and the scan turns each
//! cycle it finds into a warning naming the chain.
//!
//! [`run_bounded`] runs a computation with a watchdog that raises a
//! cancellation flag once the budget is spent, and catches panics. After a
//! fault, [`recover`] throws the engine context away and rebuilds it without
//! trusting cached values.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::thread;
use std::time::Duration;

use cellsync_common::{CellCoord, CellRange, SheetRef, qualified_key};
use cellsync_parse::{ReferenceType, extract_references};
use rustc_hash::{FxHashMap, FxHashSet};
use serde::Serialize;
use smallvec::SmallVec;

use crate::diagnostics::{Warning, WarningCode};
use crate::document::Document;
use crate::hydration::{HydrateOptions, HydrationHandle};
use crate::recompute::{RecomputeError, RecomputeResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
}

impl Severity {
    fn classify(len: usize, fan_out: usize) -> Self {
        if len >= 10 || fan_out >= 5 {
            Severity::High
        } else if len >= 3 || fan_out >= 2 {
            Severity::Medium
        } else {
            Severity::Low
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Severity::Low => "low",
            Severity::Medium => "medium",
            Severity::High => "high",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CycleReport {
    /// `Sheet!A1` labels, starting and ending at the same cell.
    pub chain: Vec<String>,
    /// Number of distinct cells in the strongly connected component.
    pub members: usize,
    /// Formulas outside the cycle that read one of its cells.
    pub fan_out: usize,
    pub severity: Severity,
}

impl CycleReport {
    pub fn to_warning(&self) -> Warning {
        let mut message = format!(
            "Circular reference ({}): {}",
            self.severity.as_str(),
            self.chain.join(" -> ")
        );
        if self.fan_out > 0 {
            message.push_str(&format!(", read by {} other formulas", self.fan_out));
        }
        let at = self.chain.first().cloned().unwrap_or_default();
        Warning::new(WarningCode::CircularReference, message).at(at)
    }
}

type Node = (usize, CellCoord);

struct FormulaGraph {
    nodes: Vec<Node>,
    labels: Vec<String>,
    adj: Vec<SmallVec<[usize; 4]>>,
}

impl FormulaGraph {
    /// `None` once `cancel` is raised.
    fn build(doc: &Document, max_range_cells: u64, cancel: &AtomicBool) -> Option<Self> {
        let mut nodes = Vec::new();
        let mut labels = Vec::new();
        let mut formulas = Vec::new();
        let mut index: FxHashMap<Node, usize> = FxHashMap::default();
        let mut by_sheet: Vec<Vec<usize>> = vec![Vec::new(); doc.sheets.len()];

        for (si, sheet) in doc.sheets.iter().enumerate() {
            if cancel.load(Ordering::Relaxed) {
                return None;
            }
            for (key, cell) in &sheet.cells {
                let Some(formula) = &cell.formula else {
                    continue;
                };
                let Ok(at) = cellsync_common::parse_address(key) else {
                    continue;
                };
                if index.contains_key(&(si, at)) {
                    continue;
                }
                let id = nodes.len();
                index.insert((si, at), id);
                nodes.push((si, at));
                labels.push(qualified_key(&sheet.name, &at.to_address()));
                formulas.push(formula.as_str());
                by_sheet[si].push(id);
            }
        }

        let mut adj: Vec<SmallVec<[usize; 4]>> = vec![SmallVec::new(); nodes.len()];
        for (id, formula) in formulas.iter().enumerate() {
            if cancel.load(Ordering::Relaxed) {
                return None;
            }
            let si = nodes[id].0;
            let Ok(refs) = extract_references(formula) else {
                continue;
            };
            let mut targets = FxHashSet::default();
            for reference in refs {
                let Some((target_sheet, range)) = resolve(doc, si, &reference) else {
                    continue;
                };
                if range.cell_count() > max_range_cells {
                    continue;
                }
                let candidates = &by_sheet[target_sheet];
                if range.cell_count() <= candidates.len() as u64 {
                    targets.extend(
                        range
                            .iter()
                            .filter_map(|at| index.get(&(target_sheet, at)).copied()),
                    );
                } else {
                    targets.extend(
                        candidates
                            .iter()
                            .copied()
                            .filter(|n| range.contains(nodes[*n].1)),
                    );
                }
            }
            let mut targets: Vec<_> = targets.into_iter().collect();
            targets.sort_unstable();
            adj[id].extend(targets);
        }
        Some(Self { nodes, labels, adj })
    }

    /// Strongly connected components, iterative Tarjan.
    fn components(&self) -> Vec<Vec<usize>> {
        let n = self.adj.len();
        let mut index = vec![usize::MAX; n];
        let mut low = vec![0usize; n];
        let mut on_stack = vec![false; n];
        let mut stack = Vec::new();
        let mut call: Vec<(usize, usize)> = Vec::new();
        let mut next = 0usize;
        let mut out = Vec::new();

        for root in 0..n {
            if index[root] != usize::MAX {
                continue;
            }
            index[root] = next;
            low[root] = next;
            next += 1;
            stack.push(root);
            on_stack[root] = true;
            call.push((root, 0));

            while let Some(frame) = call.last_mut() {
                let v = frame.0;
                if let Some(&w) = self.adj[v].get(frame.1) {
                    frame.1 += 1;
                    if index[w] == usize::MAX {
                        index[w] = next;
                        low[w] = next;
                        next += 1;
                        stack.push(w);
                        on_stack[w] = true;
                        call.push((w, 0));
                    } else if on_stack[w] {
                        low[v] = low[v].min(index[w]);
                    }
                    continue;
                }
                call.pop();
                if let Some(&(parent, _)) = call.last() {
                    low[parent] = low[parent].min(low[v]);
                }
                if low[v] == index[v] {
                    let mut component = Vec::new();
                    while let Some(w) = stack.pop() {
                        on_stack[w] = false;
                        component.push(w);
                        if w == v {
                            break;
                        }
                    }
                    out.push(component);
                }
            }
        }
        out
    }

    /// Shortest path from `start` back to itself inside `members`.
    fn shortest_cycle(&self, start: usize, members: &FxHashSet<usize>) -> Vec<usize> {
        let mut parent: FxHashMap<usize, usize> = FxHashMap::default();
        let mut queue = std::collections::VecDeque::from([start]);
        while let Some(v) = queue.pop_front() {
            for &w in &self.adj[v] {
                if w == start {
                    let mut tail = Vec::new();
                    let mut cur = v;
                    while cur != start {
                        tail.push(cur);
                        match parent.get(&cur) {
                            Some(&p) => cur = p,
                            None => break,
                        }
                    }
                    tail.reverse();
                    let mut path = Vec::with_capacity(tail.len() + 2);
                    path.push(start);
                    path.extend(tail);
                    path.push(start);
                    return path;
                }
                if members.contains(&w) && !parent.contains_key(&w) {
                    parent.insert(w, v);
                    queue.push_back(w);
                }
            }
        }
        vec![start, start]
    }
}

/// Resolve a reference to a sheet index and a range on it.
fn resolve(doc: &Document, current: usize, reference: &ReferenceType) -> Option<(usize, CellRange)> {
    let sheet_of = |name: &Option<String>| match name {
        Some(n) => doc.sheets.iter().position(|s| s.name.eq_ignore_ascii_case(n)),
        None => Some(current),
    };
    match reference {
        ReferenceType::Cell { sheet, coord } => Some((sheet_of(sheet)?, CellRange::single(*coord))),
        ReferenceType::Range { sheet, range } => Some((sheet_of(sheet)?, *range)),
        ReferenceType::NamedRange(name) => {
            let def = doc.sheets[current]
                .named_ranges
                .iter()
                .chain(&doc.named_ranges)
                .find(|d| d.name.eq_ignore_ascii_case(name))?;
            let target = SheetRef::parse(def.reference.trim_start_matches('=')).ok()?;
            Some((sheet_of(&target.sheet)?, target.range))
        }
    }
}

/// Find every reference cycle among the document's formulas.
///
/// Ranges larger than `max_range_cells` are not expanded, so cycles that
/// only close through such a range go unreported.
pub fn scan_cycles(doc: &Document, max_range_cells: u64) -> Vec<CycleReport> {
    scan_cycles_until(doc, max_range_cells, &AtomicBool::new(false)).unwrap_or_default()
}

/// [`scan_cycles`] that gives up with `None` once `cancel` is raised.
pub fn scan_cycles_until(
    doc: &Document,
    max_range_cells: u64,
    cancel: &AtomicBool,
) -> Option<Vec<CycleReport>> {
    let graph = FormulaGraph::build(doc, max_range_cells, cancel)?;
    let mut reports = Vec::new();
    for component in graph.components() {
        if cancel.load(Ordering::Relaxed) {
            return None;
        }
        let cyclic = component.len() > 1
            || component
                .first()
                .is_some_and(|&v| graph.adj[v].contains(&v));
        if !cyclic {
            continue;
        }
        let members: FxHashSet<usize> = component.iter().copied().collect();
        let Some(&start) = component.iter().min_by_key(|&&v| graph.nodes[v]) else {
            continue;
        };
        let chain = graph
            .shortest_cycle(start, &members)
            .into_iter()
            .map(|v| graph.labels[v].clone())
            .collect();
        let readers: FxHashSet<usize> = (0..graph.adj.len())
            .filter(|v| !members.contains(v))
            .filter(|v| graph.adj[*v].iter().any(|w| members.contains(w)))
            .collect();
        reports.push(CycleReport {
            chain,
            members: members.len(),
            fan_out: readers.len(),
            severity: Severity::classify(members.len(), readers.len()),
        });
    }
    reports.sort_by(|a, b| a.chain.first().cmp(&b.chain.first()));
    Some(reports)
}

/// Why a bounded computation did not produce a value.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Fault {
    #[error("computation exceeded its {} ms budget", .0.as_millis())]
    Timeout(Duration),
    #[error("computation panicked: {0}")]
    Panic(String),
}

impl Fault {
    pub fn code(&self) -> &'static str {
        match self {
            Fault::Timeout(_) => "TIMEOUT",
            Fault::Panic(_) => "SYSTEM",
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string())
}

/// Run `work` with a cancellation flag that a watchdog raises after `budget`.
///
/// `work` is expected to poll the flag and return early once it is set; what
/// it returns then is passed through, so callers map their own "cancelled"
/// value to [`Fault::Timeout`]. A panic inside `work` becomes [`Fault::Panic`].
pub fn run_bounded<T, F>(budget: Duration, work: F) -> Result<T, Fault>
where
    F: FnOnce(&AtomicBool) -> T,
{
    let cancel = Arc::new(AtomicBool::new(false));
    let (done, finished) = mpsc::channel::<()>();
    let flag = Arc::clone(&cancel);
    let watchdog = thread::Builder::new()
        .name("cellsync-watchdog".to_string())
        .spawn(move || {
            if let Err(RecvTimeoutError::Timeout) = finished.recv_timeout(budget) {
                flag.store(true, Ordering::Relaxed);
            }
        });
    if let Err(_e) = &watchdog {
        #[cfg(feature = "tracing")]
        tracing::warn!(error = %_e, "could not start watchdog; running without a time budget");
    }

    let outcome = panic::catch_unwind(AssertUnwindSafe(|| work(&cancel)));
    drop(done);
    if let Ok(handle) = watchdog {
        let _ = handle.join();
    }
    outcome.map_err(|payload| Fault::Panic(panic_message(payload.as_ref())))
}

/// Discard the context behind `handle` after `fault`, rebuild it from `doc`
/// without cached values, and describe what happened.
///
/// The result always holds exactly one system error and one rebuild warning.
/// If the rebuild itself fails the handle is disposed.
pub fn recover(
    doc: &mut Document,
    handle: &HydrationHandle,
    fault: &Fault,
    budget: Duration,
) -> RecomputeResult {
    #[cfg(feature = "tracing")]
    tracing::warn!(document = %doc.id, %fault, "computation faulted; rebuilding engine context");

    let opts = HydrateOptions {
        trust_cached_values: false,
    };
    let rebuilt = run_bounded(budget, |cancel| handle.rebuild(doc, opts, cancel));
    let warning = match rebuilt {
        Ok(Ok(())) => Warning::new(
            WarningCode::ContextRebuilt,
            "engine context was discarded and rebuilt without cached values",
        ),
        Ok(Err(e)) => {
            handle.dispose();
            Warning::new(
                WarningCode::ContextRebuilt,
                format!("engine context was discarded; rebuilding it failed: {e}"),
            )
        }
        Err(again) => {
            handle.dispose();
            Warning::new(
                WarningCode::ContextRebuilt,
                format!("engine context was discarded; rebuilding it failed: {again}"),
            )
        }
    };
    handle.push_warning(warning.clone());

    RecomputeResult {
        updated_count: 0,
        errors: vec![RecomputeError {
            location: None,
            code: fault.code().to_string(),
            message: fault.to_string(),
        }],
        warnings: vec![warning],
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::{Cell, NamedRangeDef, Sheet};

    fn doc_with(formulas: &[(&str, &str)]) -> Document {
        let mut doc = Document::new("d");
        for (addr, f) in formulas {
            doc.sheets[0]
                .cells
                .insert((*addr).to_string(), Cell::formula(*f));
        }
        doc
    }

    #[test]
    fn two_cell_cycle_is_low_severity() {
        let doc = doc_with(&[("A1", "=A2+1"), ("A2", "=A1+1")]);
        let reports = scan_cycles(&doc, 10_000);
        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0].chain, vec!["Sheet1!A1", "Sheet1!A2", "Sheet1!A1"]);
        assert_eq!(reports[0].severity, Severity::Low);
        assert_eq!(
            reports[0].to_warning().message,
            "Circular reference (low): Sheet1!A1 -> Sheet1!A2 -> Sheet1!A1"
        );
    }

    #[test]
    fn self_reference_and_acyclic_chains() {
        let doc = doc_with(&[("B1", "=B1*2"), ("C1", "=D1"), ("D1", "=E1")]);
        let reports = scan_cycles(&doc, 10_000);
        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0].chain, vec!["Sheet1!B1", "Sheet1!B1"]);
    }

    #[test]
    fn ranges_names_and_other_sheets_close_cycles() {
        let mut doc = doc_with(&[("A1", "=SUM(B1:B3)"), ("Z9", "=Other!A1")]);
        let mut other = Sheet::new("sheet-2", "Other");
        other.cells.insert("A1".into(), Cell::formula("=Total"));
        doc.sheets.push(other);
        doc.sheets[0]
            .cells
            .insert("B2".into(), Cell::formula("=Sheet1!A1"));
        doc.named_ranges.push(NamedRangeDef {
            name: "Total".into(),
            reference: "Sheet1!Z9".into(),
        });

        let reports = scan_cycles(&doc, 10_000);
        assert_eq!(reports.len(), 2);
        assert_eq!(reports[0].chain, vec!["Sheet1!A1", "Sheet1!B2", "Sheet1!A1"]);
        assert_eq!(
            reports[1].chain,
            vec!["Sheet1!Z9", "Other!A1", "Sheet1!Z9"]
        );
    }

    #[test]
    fn large_ranges_are_not_expanded() {
        let doc = doc_with(&[("A1", "=SUM(A2:A500)"), ("A2", "=A1")]);
        assert!(scan_cycles(&doc, 100).is_empty());
        assert_eq!(scan_cycles(&doc, 1_000).len(), 1);
    }

    #[test]
    fn fan_out_raises_severity() {
        let doc = doc_with(&[
            ("A1", "=A2"),
            ("A2", "=A1"),
            ("B1", "=A1"),
            ("B2", "=A1"),
            ("B3", "=A2"),
        ]);
        let reports = scan_cycles(&doc, 10_000);
        assert_eq!(reports[0].fan_out, 3);
        assert_eq!(reports[0].severity, Severity::Medium);
        assert!(reports[0].to_warning().message.ends_with("read by 3 other formulas"));
    }

    #[test]
    fn a_raised_flag_stops_the_scan() {
        let doc = doc_with(&[("A1", "=A2+1"), ("A2", "=A1+1")]);
        assert!(scan_cycles_until(&doc, 10_000, &AtomicBool::new(true)).is_none());
        let reports = scan_cycles_until(&doc, 10_000, &AtomicBool::new(false)).unwrap();
        assert_eq!(reports.len(), 1);
    }

    #[test]
    fn bounded_work_returns_its_value() {
        let out = run_bounded(Duration::from_secs(5), |cancel| {
            assert!(!cancel.load(Ordering::Relaxed));
            42
        });
        assert_eq!(out, Ok(42));
    }

    #[test]
    fn the_watchdog_raises_the_flag() {
        let out = run_bounded(Duration::from_millis(20), |cancel| {
            while !cancel.load(Ordering::Relaxed) {
                thread::sleep(Duration::from_millis(1));
            }
            "stopped"
        });
        assert_eq!(out, Ok("stopped"));
    }

    #[test]
    fn panics_are_caught() {
        let out: Result<(), Fault> = run_bounded(Duration::from_secs(5), |_| panic!("boom"));
        assert_eq!(out, Err(Fault::Panic("boom".into())));
    }
}
