//! Builtin function library.
//!
//! Functions receive unevaluated argument nodes so that `IF` and `IFERROR` can
//! short-circuit; helpers in [`utils`] evaluate and flatten arguments for the rest.

pub mod datetime;
pub mod logical;
pub mod math;
pub mod text;
pub mod utils;

use cellsync_common::{ExcelError, LiteralValue};
use cellsync_parse::ASTNode;
use once_cell::sync::Lazy;
use rustc_hash::FxHashMap;

use crate::interpreter::Interpreter;

pub type BuiltinFn = fn(&Interpreter<'_>, &[ASTNode]) -> Result<LiteralValue, ExcelError>;

static REGISTRY: Lazy<FxHashMap<&'static str, BuiltinFn>> = Lazy::new(|| {
    let mut m: FxHashMap<&'static str, BuiltinFn> = FxHashMap::default();
    math::register(&mut m);
    logical::register(&mut m);
    text::register(&mut m);
    datetime::register(&mut m);
    m
});

/// Look up a builtin by (already upper-cased) name.
pub fn lookup(name: &str) -> Option<BuiltinFn> {
    REGISTRY.get(name).copied()
}

pub fn names() -> impl Iterator<Item = &'static str> {
    REGISTRY.keys().copied()
}
