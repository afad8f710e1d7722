use cellsync_common::{ExcelError, ExcelErrorKind, LiteralValue};
use cellsync_parse::ASTNode;
use rustc_hash::FxHashMap;

use super::BuiltinFn;
use super::utils::{check_arity, flatten_arg, scalar_arg};
use crate::coercion::to_bool;
use crate::interpreter::Interpreter;

pub(super) fn register(m: &mut FxHashMap<&'static str, BuiltinFn>) {
    m.insert("IF", if_fn);
    m.insert("AND", and_fn);
    m.insert("OR", or_fn);
    m.insert("NOT", not_fn);
    m.insert("IFERROR", iferror_fn);
    m.insert("TRUE", |_, _| Ok(LiteralValue::Boolean(true)));
    m.insert("FALSE", |_, _| Ok(LiteralValue::Boolean(false)));
}

/* ─────────────────────────── IF() ─────────────────────────── */

fn if_fn(interp: &Interpreter<'_>, args: &[ASTNode]) -> Result<LiteralValue, ExcelError> {
    check_arity("IF", args, 2, 3)?;
    let cond = to_bool(&scalar_arg(interp, &args[0])?)?;
    match (cond, args.get(2)) {
        (true, _) => interp.evaluate_ast(&args[1]),
        (false, Some(otherwise)) => interp.evaluate_ast(otherwise),
        (false, None) => Ok(LiteralValue::Boolean(false)),
    }
}

/* ─────────────────────────── AND() / OR() ─────────────────────────── */

/// Logical values of all arguments. Text and blanks inside ranges are ignored.
fn logical_values(
    interp: &Interpreter<'_>,
    args: &[ASTNode],
) -> Result<Vec<bool>, ExcelError> {
    let mut out = Vec::new();
    for arg in args {
        let flat = flatten_arg(interp, arg)?;
        for v in flat.values {
            match v {
                LiteralValue::Error(e) => return Err(e),
                LiteralValue::Text(_) | LiteralValue::Empty if flat.from_reference => {}
                other => out.push(to_bool(&other)?),
            }
        }
    }
    if out.is_empty() {
        return Err(ExcelError::new(ExcelErrorKind::Value)
            .with_message("No logical values to evaluate"));
    }
    Ok(out)
}

fn and_fn(interp: &Interpreter<'_>, args: &[ASTNode]) -> Result<LiteralValue, ExcelError> {
    check_arity("AND", args, 1, 255)?;
    Ok(LiteralValue::Boolean(
        logical_values(interp, args)?.into_iter().all(|b| b),
    ))
}

fn or_fn(interp: &Interpreter<'_>, args: &[ASTNode]) -> Result<LiteralValue, ExcelError> {
    check_arity("OR", args, 1, 255)?;
    Ok(LiteralValue::Boolean(
        logical_values(interp, args)?.into_iter().any(|b| b),
    ))
}

fn not_fn(interp: &Interpreter<'_>, args: &[ASTNode]) -> Result<LiteralValue, ExcelError> {
    check_arity("NOT", args, 1, 1)?;
    Ok(LiteralValue::Boolean(!to_bool(&scalar_arg(interp, &args[0])?)?))
}

/* ─────────────────────────── IFERROR() ─────────────────────────── */

fn iferror_fn(interp: &Interpreter<'_>, args: &[ASTNode]) -> Result<LiteralValue, ExcelError> {
    check_arity("IFERROR", args, 2, 2)?;
    match interp.evaluate_ast(&args[0]) {
        Ok(LiteralValue::Error(_)) | Err(_) => interp.evaluate_ast(&args[1]),
        Ok(v) => Ok(v),
    }
}
