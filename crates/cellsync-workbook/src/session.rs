//! The entry points a UI or automation layer calls.
//!
//! [`SyncSession`] ties configuration, an engine factory and the per-document
//! hydration cache together. Hydration and recompute run under the configured
//! time budget; edits and undo are synchronous.

use std::sync::Arc;

use crate::config::SyncConfig;
use crate::diagnostics::{Warning, WarningCode};
use crate::document::{Action, Document};
use crate::engine::{CalcEngineFactory, EngineFactory};
use crate::error::{CoreError, HydrationError};
use crate::guard::{self, CycleReport, Fault, run_bounded};
use crate::hydration::{HydrateOptions, HydrationCache, HydrationHandle};
use crate::mutation::{self, ApplyOutcome};
use crate::operations::Operation;
use crate::recompute::{PassError, RecomputeResult, recompute_cancellable};
use crate::undo::{self, UndoOutcome};

pub struct SyncSession {
    config: SyncConfig,
    factory: Arc<dyn EngineFactory>,
    cache: HydrationCache,
}

impl Default for SyncSession {
    fn default() -> Self {
        Self::new(SyncConfig::default())
    }
}

impl SyncSession {
    /// A session backed by the bundled calculation engine.
    pub fn new(config: SyncConfig) -> Self {
        Self::with_factory(config, Arc::new(CalcEngineFactory::default()))
    }

    pub fn with_factory(config: SyncConfig, factory: Arc<dyn EngineFactory>) -> Self {
        Self {
            config,
            factory,
            cache: HydrationCache::new(),
        }
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    pub fn cache(&self) -> &HydrationCache {
        &self.cache
    }

    pub fn apply_operations(&self, doc: &mut Document, ops: &[Operation]) -> ApplyOutcome {
        mutation::apply_operations(doc, ops, &self.config.limits)
    }

    /// Return a handle reflecting `doc`, reusing the cached one when possible.
    ///
    /// If the first attempt times out or panics, the cached context is
    /// discarded and the document is hydrated once more with cached values
    /// bypassed; the returned handle then carries a rebuild warning.
    pub fn hydrate(&mut self, doc: &mut Document) -> Result<HydrationHandle, CoreError> {
        let budget = self.config.compute_timeout();
        let factory = Arc::clone(&self.factory);
        let cache = &mut self.cache;
        let fault = match run_bounded(budget, |cancel| {
            cache.hydrate(doc, &factory, HydrateOptions::default(), cancel)
        }) {
            Ok(Ok(handle)) => return Ok(handle),
            Ok(Err(HydrationError::Interrupted(_))) => Fault::Timeout(budget),
            Ok(Err(e)) => return Err(e.into()),
            Err(fault) => fault,
        };

        #[cfg(feature = "tracing")]
        tracing::warn!(document = %doc.id, %fault, "hydration faulted; retrying without cached values");
        if let Some(stale) = self.cache.evict(&doc.id) {
            stale.dispose();
        }
        let opts = HydrateOptions {
            trust_cached_values: false,
        };
        let cache = &mut self.cache;
        match run_bounded(budget, |cancel| cache.hydrate(doc, &factory, opts, cancel)) {
            Ok(Ok(handle)) => {
                handle.push_warning(Warning::new(
                    WarningCode::ContextRebuilt,
                    format!("{fault}; hydrated again without cached values"),
                ));
                Ok(handle)
            }
            Ok(Err(e)) => Err(e.into()),
            Err(again) => Err(again.into()),
        }
    }

    /// Recompute every formula cell of `doc` through `handle`.
    ///
    /// The handle is first brought up to date with any edits made since it
    /// was hydrated. A static cycle scan, run under the same budget, adds one
    /// warning per reference cycle.
    /// On timeout or panic the result is the synthetic one from
    /// [`guard::recover`].
    pub fn recompute(
        &self,
        doc: &mut Document,
        handle: &HydrationHandle,
    ) -> Result<RecomputeResult, CoreError> {
        if handle.is_disposed() {
            return Err(CoreError::HandleDisposed);
        }
        let owner = handle.document_id();
        if owner != doc.id {
            return Err(CoreError::DocumentMismatch {
                handle: owner,
                document: doc.id.clone(),
            });
        }

        let budget = self.config.compute_timeout();
        let computed_by = self.config.computed_by.as_str();
        let max_scan = self.config.max_scan_range_cells;
        let outcome = run_bounded(
            budget,
            |cancel| -> Result<(Vec<CycleReport>, RecomputeResult), PassError> {
                let cycles =
                    guard::scan_cycles_until(doc, max_scan, cancel).ok_or(PassError::Cancelled)?;
                handle
                    .refresh(doc, HydrateOptions::default(), cancel)
                    .map_err(|e| match e {
                        HydrationError::Interrupted(_) => PassError::Cancelled,
                        other => PassError::Core(other.into()),
                    })?;
                Ok((cycles, recompute_cancellable(doc, handle, computed_by, cancel)?))
            },
        );
        let (cycles, result) = match outcome {
            Ok(Ok(done)) => done,
            Ok(Err(PassError::Core(e))) => return Err(e),
            Ok(Err(PassError::Cancelled)) => {
                return Ok(guard::recover(doc, handle, &Fault::Timeout(budget), budget));
            }
            Err(fault) => return Ok(guard::recover(doc, handle, &fault, budget)),
        };

        #[cfg(feature = "tracing")]
        {
            if !cycles.is_empty() {
                tracing::debug!(document = %doc.id, cycles = cycles.len(), "reference cycles found");
            }
        }
        let RecomputeResult {
            updated_count,
            errors,
            warnings: pass_warnings,
        } = result;
        let mut warnings: Vec<Warning> = cycles.iter().map(CycleReport::to_warning).collect();
        warnings.extend(pass_warnings);
        Ok(RecomputeResult {
            updated_count,
            errors,
            warnings,
        })
    }

    pub fn undo(&self, doc: &mut Document) -> UndoOutcome {
        undo::undo(doc, &self.config.limits)
    }

    pub fn redo(&self, doc: &mut Document, action: &Action) -> ApplyOutcome {
        undo::redo(doc, action, &self.config.limits)
    }

    /// Dispose `handle` and forget any cached entry sharing its context.
    pub fn dispose_hydration(&mut self, handle: &HydrationHandle) {
        self.cache.dispose(handle);
    }
}
