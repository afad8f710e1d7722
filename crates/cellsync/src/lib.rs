//! Meta crate that re-exports the cellsync layers. Depend on this crate and
//! pick layers with feature flags; the underlying crates stay reachable for
//! deeper integration.

#[cfg(feature = "common")]
pub use cellsync_common as common;

#[cfg(feature = "parse")]
pub use cellsync_parse as parse;

#[cfg(feature = "eval")]
pub use cellsync_eval as eval;

#[cfg(feature = "workbook")]
pub use cellsync_workbook as workbook;

#[cfg(feature = "workbook")]
pub use cellsync_workbook::{
    ApplyOutcome, Cell, Document, Operation, RecomputeResult, Sheet, SyncConfig, SyncSession,
    UndoOutcome, Warning,
};
