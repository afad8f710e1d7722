//! Reference formula engine for cellsync.
//!
//! [`Engine`] stores per-sheet constants and formulas, resolves defined names,
//! orders formulas with a Tarjan/Kahn scheduler and evaluates them with the
//! builtin function library. Circular groups evaluate to `#CIRC!` and a pass can
//! be cancelled through an [`AtomicBool`](std::sync::atomic::AtomicBool).

pub mod builtins;
pub mod coercion;
pub mod engine;
pub mod interpreter;
pub mod reference;

pub use engine::{
    ENGINE_VERSION, Engine, EvalConfig, EvalError, EvalResult, NameScope, NamedRange,
};
pub use interpreter::Interpreter;
pub use reference::{CellRef, RangeRef, ResolvedRef, SheetId};

pub use cellsync_common::{ExcelError, ExcelErrorKind, LiteralValue};
