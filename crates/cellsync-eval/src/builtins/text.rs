use cellsync_common::{ExcelError, LiteralValue};
use cellsync_parse::ASTNode;
use rustc_hash::FxHashMap;

use super::BuiltinFn;
use super::utils::{check_arity, flatten_arg, scalar_arg};
use crate::coercion::to_text;
use crate::interpreter::Interpreter;

pub(super) fn register(m: &mut FxHashMap<&'static str, BuiltinFn>) {
    m.insert("CONCAT", concat_fn);
    m.insert("CONCATENATE", concat_fn);
    m.insert("LEN", len_fn);
    m.insert("UPPER", upper_fn);
    m.insert("LOWER", lower_fn);
    m.insert("TRIM", trim_fn);
}

fn text_arg(interp: &Interpreter<'_>, node: &ASTNode) -> Result<String, ExcelError> {
    to_text(&scalar_arg(interp, node)?)
}

fn concat_fn(interp: &Interpreter<'_>, args: &[ASTNode]) -> Result<LiteralValue, ExcelError> {
    check_arity("CONCAT", args, 1, 255)?;
    let mut out = String::new();
    for arg in args {
        for v in flatten_arg(interp, arg)?.values {
            out.push_str(&to_text(&v)?);
        }
    }
    Ok(LiteralValue::Text(out))
}

fn len_fn(interp: &Interpreter<'_>, args: &[ASTNode]) -> Result<LiteralValue, ExcelError> {
    check_arity("LEN", args, 1, 1)?;
    Ok(LiteralValue::Number(
        text_arg(interp, &args[0])?.chars().count() as f64,
    ))
}

fn upper_fn(interp: &Interpreter<'_>, args: &[ASTNode]) -> Result<LiteralValue, ExcelError> {
    check_arity("UPPER", args, 1, 1)?;
    Ok(LiteralValue::Text(text_arg(interp, &args[0])?.to_uppercase()))
}

fn lower_fn(interp: &Interpreter<'_>, args: &[ASTNode]) -> Result<LiteralValue, ExcelError> {
    check_arity("LOWER", args, 1, 1)?;
    Ok(LiteralValue::Text(text_arg(interp, &args[0])?.to_lowercase()))
}

/// Strips leading/trailing spaces and collapses inner runs to one space.
fn trim_fn(interp: &Interpreter<'_>, args: &[ASTNode]) -> Result<LiteralValue, ExcelError> {
    check_arity("TRIM", args, 1, 1)?;
    let s = text_arg(interp, &args[0])?;
    Ok(LiteralValue::Text(
        s.split(' ').filter(|p| !p.is_empty()).collect::<Vec<_>>().join(" "),
    ))
}
