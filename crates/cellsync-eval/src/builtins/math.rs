use cellsync_common::{ExcelError, ExcelErrorKind, LiteralValue};
use cellsync_parse::ASTNode;
use rustc_hash::FxHashMap;

use super::BuiltinFn;
use super::utils::{check_arity, collect_numbers, flatten_arg, number_arg, round_to_precision};
use crate::interpreter::Interpreter;

pub(super) fn register(m: &mut FxHashMap<&'static str, BuiltinFn>) {
    m.insert("SUM", sum_fn);
    m.insert("AVERAGE", average_fn);
    m.insert("MIN", min_fn);
    m.insert("MAX", max_fn);
    m.insert("COUNT", count_fn);
    m.insert("COUNTA", counta_fn);
    m.insert("PRODUCT", product_fn);
    m.insert("ABS", abs_fn);
    m.insert("ROUND", round_fn);
    m.insert("MOD", mod_fn);
}

/* ─────────────────────────── reductions ─────────────────────────── */

fn sum_fn(interp: &Interpreter<'_>, args: &[ASTNode]) -> Result<LiteralValue, ExcelError> {
    check_arity("SUM", args, 1, 255)?;
    Ok(LiteralValue::Number(collect_numbers(interp, args)?.iter().sum()))
}

fn product_fn(interp: &Interpreter<'_>, args: &[ASTNode]) -> Result<LiteralValue, ExcelError> {
    check_arity("PRODUCT", args, 1, 255)?;
    let nums = collect_numbers(interp, args)?;
    if nums.is_empty() {
        return Ok(LiteralValue::Number(0.0));
    }
    Ok(LiteralValue::Number(nums.iter().product()))
}

fn average_fn(interp: &Interpreter<'_>, args: &[ASTNode]) -> Result<LiteralValue, ExcelError> {
    check_arity("AVERAGE", args, 1, 255)?;
    let nums = collect_numbers(interp, args)?;
    if nums.is_empty() {
        return Err(ExcelError::new(ExcelErrorKind::Div));
    }
    Ok(LiteralValue::Number(nums.iter().sum::<f64>() / nums.len() as f64))
}

fn min_fn(interp: &Interpreter<'_>, args: &[ASTNode]) -> Result<LiteralValue, ExcelError> {
    check_arity("MIN", args, 1, 255)?;
    let nums = collect_numbers(interp, args)?;
    Ok(LiteralValue::Number(
        nums.into_iter().reduce(f64::min).unwrap_or(0.0),
    ))
}

fn max_fn(interp: &Interpreter<'_>, args: &[ASTNode]) -> Result<LiteralValue, ExcelError> {
    check_arity("MAX", args, 1, 255)?;
    let nums = collect_numbers(interp, args)?;
    Ok(LiteralValue::Number(
        nums.into_iter().reduce(f64::max).unwrap_or(0.0),
    ))
}

/// Counts numbers; errors and text are skipped rather than propagated.
fn count_fn(interp: &Interpreter<'_>, args: &[ASTNode]) -> Result<LiteralValue, ExcelError> {
    check_arity("COUNT", args, 1, 255)?;
    let mut n = 0usize;
    for arg in args {
        let flat = flatten_arg(interp, arg)?;
        n += flat
            .values
            .iter()
            .filter(|v| match v {
                LiteralValue::Number(_) | LiteralValue::DateTime(_) => true,
                LiteralValue::Text(s) if !flat.from_reference => s.trim().parse::<f64>().is_ok(),
                LiteralValue::Boolean(_) => !flat.from_reference,
                _ => false,
            })
            .count();
    }
    Ok(LiteralValue::Number(n as f64))
}

fn counta_fn(interp: &Interpreter<'_>, args: &[ASTNode]) -> Result<LiteralValue, ExcelError> {
    check_arity("COUNTA", args, 1, 255)?;
    let mut n = 0usize;
    for arg in args {
        let flat = flatten_arg(interp, arg)?;
        n += flat
            .values
            .iter()
            .filter(|v| !matches!(v, LiteralValue::Empty))
            .count();
    }
    Ok(LiteralValue::Number(n as f64))
}

/* ─────────────────────────── scalar math ─────────────────────────── */

fn abs_fn(interp: &Interpreter<'_>, args: &[ASTNode]) -> Result<LiteralValue, ExcelError> {
    check_arity("ABS", args, 1, 1)?;
    Ok(LiteralValue::Number(number_arg(interp, &args[0])?.abs()))
}

fn round_fn(interp: &Interpreter<'_>, args: &[ASTNode]) -> Result<LiteralValue, ExcelError> {
    check_arity("ROUND", args, 1, 2)?;
    let n = number_arg(interp, &args[0])?;
    let digits = match args.get(1) {
        Some(d) => number_arg(interp, d)?.trunc() as i32,
        None => 0,
    };
    Ok(LiteralValue::Number(round_to_precision(n, digits)))
}

/// Result takes the sign of the divisor.
fn mod_fn(interp: &Interpreter<'_>, args: &[ASTNode]) -> Result<LiteralValue, ExcelError> {
    check_arity("MOD", args, 2, 2)?;
    let n = number_arg(interp, &args[0])?;
    let d = number_arg(interp, &args[1])?;
    if d == 0.0 {
        return Err(ExcelError::new(ExcelErrorKind::Div));
    }
    Ok(LiteralValue::Number(n - d * (n / d).floor()))
}
