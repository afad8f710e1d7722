use std::cmp::Ordering;

use cellsync_common::{ExcelError, ExcelErrorKind, LiteralValue};
use cellsync_parse::{ASTNode, ASTNodeType, ReferenceType};

use crate::builtins;
use crate::coercion::{to_number, to_text};
use crate::engine::Engine;
use crate::reference::{RangeRef, ResolvedRef, SheetId};

pub struct Interpreter<'a> {
    pub engine: &'a Engine,
    current_sheet: SheetId,
    name_depth: usize,
}

impl<'a> Interpreter<'a> {
    pub fn new(engine: &'a Engine, current_sheet: SheetId) -> Self {
        Self {
            engine,
            current_sheet,
            name_depth: 0,
        }
    }

    pub fn current_sheet(&self) -> SheetId {
        self.current_sheet
    }

    /// Evaluate a whole formula to the value stored in its cell.
    pub fn evaluate_formula(&self, node: &ASTNode) -> LiteralValue {
        match self.evaluate_ast(node) {
            Ok(LiteralValue::Array(rows)) => LiteralValue::Array(rows).into_scalar(),
            Ok(v) => v,
            Err(e) => LiteralValue::Error(e),
        }
    }

    pub fn evaluate_ast(&self, node: &ASTNode) -> Result<LiteralValue, ExcelError> {
        match &node.node_type {
            ASTNodeType::Literal(v) => Ok(v.clone()),
            ASTNodeType::Reference { reference, .. } => self.eval_reference(reference),
            ASTNodeType::UnaryOp { op, expr } => self.eval_unary(op, expr),
            ASTNodeType::BinaryOp { op, left, right } => self.eval_binary(op, left, right),
            ASTNodeType::Function { name, args } => self.eval_function(name, args),
            ASTNodeType::Array(rows) => self.eval_array_literal(rows),
        }
    }

    /* ===================  reference  =================== */
    fn eval_reference(&self, reference: &ReferenceType) -> Result<LiteralValue, ExcelError> {
        if let ReferenceType::NamedRange(name) = reference {
            return self.eval_name(name);
        }
        let resolved = self.engine.resolve_reference(reference, self.current_sheet)?;
        match resolved.first() {
            Some(ResolvedRef::Cell(c)) => Ok(self
                .engine
                .get_cell_value(c.sheet, c.coord.row, c.coord.col)
                .unwrap_or(LiteralValue::Empty)),
            Some(ResolvedRef::Range(r)) => self.read_range(r),
            None => Err(ExcelError::new(ExcelErrorKind::Ref)),
        }
    }

    fn eval_name(&self, name: &str) -> Result<LiteralValue, ExcelError> {
        if self.name_depth >= self.engine.config.max_name_depth {
            return Err(ExcelError::new(ExcelErrorKind::Circ)
                .with_message(format!("Name '{name}' refers to itself")));
        }
        let named = self
            .engine
            .resolve_name(name, self.current_sheet)
            .ok_or_else(|| {
                ExcelError::new(ExcelErrorKind::Name).with_message(format!("Unknown name '{name}'"))
            })?;
        let inner = Interpreter {
            engine: self.engine,
            current_sheet: named.home_sheet,
            name_depth: self.name_depth + 1,
        };
        inner.evaluate_ast(&named.ast)
    }

    fn read_range(&self, r: &RangeRef) -> Result<LiteralValue, ExcelError> {
        if r.range.cell_count() > self.engine.config.max_range_cells {
            return Err(ExcelError::new(ExcelErrorKind::Ref)
                .with_message(format!("Range {} is too large to evaluate", r.range)));
        }
        let sheet = self
            .engine
            .sheets()
            .get(r.sheet)
            .ok_or_else(|| ExcelError::new(ExcelErrorKind::Ref))?;
        let mut rows = Vec::with_capacity(r.range.height() as usize);
        for row in r.range.start.row..=r.range.end.row {
            let cols: Vec<LiteralValue> = (r.range.start.col..=r.range.end.col)
                .map(|col| sheet.value(cellsync_common::CellCoord::new(row, col)))
                .collect();
            rows.push(cols);
        }
        if rows.len() == 1 && rows[0].len() == 1 {
            return Ok(rows.remove(0).remove(0));
        }
        Ok(LiteralValue::Array(rows))
    }

    /* ===================  unary ops  =================== */
    fn eval_unary(&self, op: &str, expr: &ASTNode) -> Result<LiteralValue, ExcelError> {
        let v = self.evaluate_ast(expr)?;
        map_scalar(v, |cell| {
            let n = to_number(&cell)?;
            let out = match op {
                "+" => n,
                "-" => -n,
                "%" => n / 100.0,
                _ => {
                    return Err(ExcelError::new(ExcelErrorKind::Value)
                        .with_message(format!("Unsupported operator '{op}'")));
                }
            };
            sanitize(out)
        })
    }

    /* ===================  binary ops  =================== */
    fn eval_binary(
        &self,
        op: &str,
        left: &ASTNode,
        right: &ASTNode,
    ) -> Result<LiteralValue, ExcelError> {
        let l = self.evaluate_ast(left)?;
        let r = self.evaluate_ast(right)?;
        zip_scalars(l, r, |a, b| binary_scalar(op, a, b))
    }

    /* ===================  function calls  =================== */
    fn eval_function(&self, name: &str, args: &[ASTNode]) -> Result<LiteralValue, ExcelError> {
        match builtins::lookup(name) {
            Some(f) => f(self, args),
            None => Err(ExcelError::new(ExcelErrorKind::Name)
                .with_message(format!("Unknown function {name}"))),
        }
    }

    fn eval_array_literal(&self, rows: &[Vec<ASTNode>]) -> Result<LiteralValue, ExcelError> {
        let mut out = Vec::with_capacity(rows.len());
        for row in rows {
            let mut r = Vec::with_capacity(row.len());
            for cell in row {
                r.push(self.evaluate_ast(cell)?);
            }
            out.push(r);
        }
        Ok(LiteralValue::Array(out))
    }
}

fn sanitize(n: f64) -> Result<LiteralValue, ExcelError> {
    if n.is_finite() {
        Ok(LiteralValue::Number(n))
    } else {
        Err(ExcelError::new(ExcelErrorKind::Num))
    }
}

fn map_scalar<F>(v: LiteralValue, f: F) -> Result<LiteralValue, ExcelError>
where
    F: Fn(LiteralValue) -> Result<LiteralValue, ExcelError>,
{
    match v {
        LiteralValue::Array(rows) => Ok(LiteralValue::Array(
            rows.into_iter()
                .map(|row| {
                    row.into_iter()
                        .map(|cell| f(cell).unwrap_or_else(LiteralValue::Error))
                        .collect()
                })
                .collect(),
        )),
        other => f(other),
    }
}

/// Element-wise application with scalar broadcast. Mismatched shapes are `#VALUE!`.
fn zip_scalars<F>(l: LiteralValue, r: LiteralValue, f: F) -> Result<LiteralValue, ExcelError>
where
    F: Fn(LiteralValue, LiteralValue) -> Result<LiteralValue, ExcelError>,
{
    match (l, r) {
        (LiteralValue::Array(a), LiteralValue::Array(b)) => {
            let same_shape =
                a.len() == b.len() && a.iter().zip(&b).all(|(x, y)| x.len() == y.len());
            if !same_shape {
                return Err(ExcelError::new(ExcelErrorKind::Value)
                    .with_message("Array operands have different shapes"));
            }
            Ok(LiteralValue::Array(
                a.into_iter()
                    .zip(b)
                    .map(|(ra, rb)| {
                        ra.into_iter()
                            .zip(rb)
                            .map(|(x, y)| f(x, y).unwrap_or_else(LiteralValue::Error))
                            .collect()
                    })
                    .collect(),
            ))
        }
        (LiteralValue::Array(a), scalar) => map_scalar(LiteralValue::Array(a), |x| f(x, scalar.clone())),
        (scalar, LiteralValue::Array(b)) => map_scalar(LiteralValue::Array(b), |y| f(scalar.clone(), y)),
        (a, b) => f(a, b),
    }
}

fn binary_scalar(op: &str, l: LiteralValue, r: LiteralValue) -> Result<LiteralValue, ExcelError> {
    if let LiteralValue::Error(e) = l {
        return Err(e);
    }
    if let LiteralValue::Error(e) = r {
        return Err(e);
    }
    match op {
        "+" => sanitize(to_number(&l)? + to_number(&r)?),
        "-" => sanitize(to_number(&l)? - to_number(&r)?),
        "*" => sanitize(to_number(&l)? * to_number(&r)?),
        "/" => {
            let (a, b) = (to_number(&l)?, to_number(&r)?);
            if b == 0.0 {
                return Err(ExcelError::new(ExcelErrorKind::Div));
            }
            sanitize(a / b)
        }
        "^" => {
            let (a, b) = (to_number(&l)?, to_number(&r)?);
            if a == 0.0 && b < 0.0 {
                return Err(ExcelError::new(ExcelErrorKind::Div));
            }
            sanitize(a.powf(b))
        }
        "&" => Ok(LiteralValue::Text(format!("{}{}", to_text(&l)?, to_text(&r)?))),
        "=" | "<>" | "<" | ">" | "<=" | ">=" => {
            let ord = compare(&l, &r);
            let result = match op {
                "=" => ord == Ordering::Equal,
                "<>" => ord != Ordering::Equal,
                "<" => ord == Ordering::Less,
                ">" => ord == Ordering::Greater,
                "<=" => ord != Ordering::Greater,
                _ => ord != Ordering::Less,
            };
            Ok(LiteralValue::Boolean(result))
        }
        _ => Err(ExcelError::new(ExcelErrorKind::Value)
            .with_message(format!("Unsupported operator '{op}'"))),
    }
}

/// Spreadsheet ordering: numbers < text < booleans; text compares case-insensitively.
/// An empty cell takes the zero value of the other side's type.
pub fn compare(l: &LiteralValue, r: &LiteralValue) -> Ordering {
    fn rank(v: &LiteralValue) -> u8 {
        match v {
            LiteralValue::Text(_) => 1,
            LiteralValue::Boolean(_) => 2,
            _ => 0,
        }
    }
    let l = empty_as(l, r);
    let r = empty_as(r, &l);
    match (&l, &r) {
        (LiteralValue::Text(a), LiteralValue::Text(b)) => a.to_lowercase().cmp(&b.to_lowercase()),
        (LiteralValue::Boolean(a), LiteralValue::Boolean(b)) => a.cmp(b),
        _ if rank(&l) != rank(&r) => rank(&l).cmp(&rank(&r)),
        _ => {
            let a = l.as_serial_number().unwrap_or(0.0);
            let b = r.as_serial_number().unwrap_or(0.0);
            a.partial_cmp(&b).unwrap_or(Ordering::Equal)
        }
    }
}

fn empty_as(v: &LiteralValue, other: &LiteralValue) -> LiteralValue {
    match (v, other) {
        (LiteralValue::Empty, LiteralValue::Text(_)) => LiteralValue::Text(String::new()),
        (LiteralValue::Empty, LiteralValue::Boolean(_)) => LiteralValue::Boolean(false),
        (LiteralValue::Empty, _) => LiteralValue::Number(0.0),
        _ => v.clone(),
    }
}
