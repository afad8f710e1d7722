pub mod config;
pub mod diagnostics;
pub mod document;
pub mod engine;
pub mod error;
pub mod guard;
pub mod hydration;
pub mod mutation;
pub mod operations;
pub mod recompute;
pub mod session;
pub mod undo;

pub use config::{Limits, SyncConfig};
pub use diagnostics::{Warning, WarningCode};
pub use document::{
    Action, CacheEntry, Cell, CellErrorInfo, CellStyle, ComputedState, ComputedValue, Document,
    HorizontalAlign, NamedRangeDef, RawValue, Sheet, TypeTag,
};
pub use engine::{
    CalcEngine, CalcEngineFactory, EngineError, EngineFactory, EngineSheetId, EvaluationEngine,
};
pub use error::{CoreError, HydrationError, ValidationError, ValidationErrorKind};
pub use guard::{CycleReport, Fault, Severity, run_bounded, scan_cycles, scan_cycles_until};
pub use hydration::{
    HydrateOptions, HydrationCache, HydrationHandle, MappedCell, hydrate, hydrate_cancellable,
    patch_add_sheet,
};
pub use mutation::{ApplyOutcome, Diff, DiffKind, apply_operations};
pub use operations::Operation;
pub use recompute::{
    Normalized, PassError, RecomputeError, RecomputeResult, error_info, normalize, recompute,
    recompute_cancellable,
};
pub use session::SyncSession;
pub use undo::{UndoOutcome, redo, undo, undo_depth};

// Re-export for convenience
pub use cellsync_common::{CellCoord, CellRange, parse_address, to_address};
