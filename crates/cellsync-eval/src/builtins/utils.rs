use cellsync_common::{ExcelError, ExcelErrorKind, LiteralValue};
use cellsync_parse::{ASTNode, ASTNodeType};

use crate::coercion::to_number;
use crate::interpreter::Interpreter;

pub fn check_arity(name: &str, args: &[ASTNode], min: usize, max: usize) -> Result<(), ExcelError> {
    if args.len() < min || args.len() > max {
        return Err(ExcelError::new(ExcelErrorKind::Value).with_message(format!(
            "{name} expects {} arguments, got {}",
            if min == max {
                min.to_string()
            } else {
                format!("{min} to {max}")
            },
            args.len()
        )));
    }
    Ok(())
}

/// One evaluated argument, reduced to a scalar.
pub fn scalar_arg(interp: &Interpreter<'_>, node: &ASTNode) -> Result<LiteralValue, ExcelError> {
    match interp.evaluate_ast(node)? {
        LiteralValue::Error(e) => Err(e),
        v => Ok(v.into_scalar()),
    }
}

pub fn number_arg(interp: &Interpreter<'_>, node: &ASTNode) -> Result<f64, ExcelError> {
    to_number(&scalar_arg(interp, node)?)
}

/// An argument's values, flattened row-major. `from_reference` is true when
/// the values came from a range or array rather than a direct scalar.
pub struct Flattened {
    pub values: Vec<LiteralValue>,
    pub from_reference: bool,
}

pub fn flatten_arg(interp: &Interpreter<'_>, node: &ASTNode) -> Result<Flattened, ExcelError> {
    let is_reference = matches!(node.node_type, ASTNodeType::Reference { .. });
    Ok(match interp.evaluate_ast(node)? {
        LiteralValue::Array(rows) => Flattened {
            values: rows.into_iter().flatten().collect(),
            from_reference: true,
        },
        v => Flattened {
            values: vec![v],
            from_reference: is_reference,
        },
    })
}

/// Numbers for aggregate functions: references contribute only numeric
/// cells, direct arguments are coerced. Errors propagate.
pub fn collect_numbers(interp: &Interpreter<'_>, args: &[ASTNode]) -> Result<Vec<f64>, ExcelError> {
    let mut out = Vec::new();
    for arg in args {
        let flat = flatten_arg(interp, arg)?;
        for v in flat.values {
            match v {
                LiteralValue::Error(e) => return Err(e),
                LiteralValue::Number(n) => out.push(n),
                LiteralValue::DateTime(_) => out.extend(v.as_serial_number()),
                _ if flat.from_reference => {}
                LiteralValue::Empty => {}
                other => out.push(to_number(&other)?),
            }
        }
    }
    Ok(out)
}

/// Round half away from zero; negative digits round to tens, hundreds, ...
pub fn round_to_precision(n: f64, digits: i32) -> f64 {
    let factor = 10f64.powi(digits);
    (n * factor).round() / factor
}
