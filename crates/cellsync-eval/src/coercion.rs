//! Scalar coercions shared by operators and builtins.

use cellsync_common::{ExcelError, ExcelErrorKind, LiteralValue};

pub fn to_number(v: &LiteralValue) -> Result<f64, ExcelError> {
    match v {
        LiteralValue::Number(n) => Ok(*n),
        LiteralValue::Boolean(b) => Ok(if *b { 1.0 } else { 0.0 }),
        LiteralValue::Empty => Ok(0.0),
        LiteralValue::DateTime(_) => v
            .as_serial_number()
            .ok_or_else(|| ExcelError::new(ExcelErrorKind::Value)),
        LiteralValue::Text(s) => s.trim().parse::<f64>().map_err(|_| {
            ExcelError::new(ExcelErrorKind::Value)
                .with_message(format!("'{s}' is not a number"))
        }),
        LiteralValue::Error(e) => Err(e.clone()),
        LiteralValue::Array(_) => to_number(&v.clone().into_scalar()),
    }
}

pub fn to_text(v: &LiteralValue) -> Result<String, ExcelError> {
    match v {
        LiteralValue::Error(e) => Err(e.clone()),
        LiteralValue::Array(_) => to_text(&v.clone().into_scalar()),
        LiteralValue::DateTime(_) => Ok(v
            .as_serial_number()
            .map(|n| n.to_string())
            .unwrap_or_default()),
        other => Ok(other.to_string()),
    }
}

pub fn to_bool(v: &LiteralValue) -> Result<bool, ExcelError> {
    match v {
        LiteralValue::Boolean(b) => Ok(*b),
        LiteralValue::Number(n) => Ok(*n != 0.0),
        LiteralValue::Empty => Ok(false),
        LiteralValue::Text(s) if s.eq_ignore_ascii_case("TRUE") => Ok(true),
        LiteralValue::Text(s) if s.eq_ignore_ascii_case("FALSE") => Ok(false),
        LiteralValue::Text(s) => Err(ExcelError::new(ExcelErrorKind::Value)
            .with_message(format!("'{s}' is not a logical value"))),
        LiteralValue::DateTime(_) => Ok(true),
        LiteralValue::Error(e) => Err(e.clone()),
        LiteralValue::Array(_) => to_bool(&v.clone().into_scalar()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn numbers_from_text_and_booleans() {
        assert_eq!(to_number(&LiteralValue::Text(" 2.5 ".into())).unwrap(), 2.5);
        assert_eq!(to_number(&LiteralValue::Boolean(true)).unwrap(), 1.0);
        assert!(to_number(&LiteralValue::Text("abc".into())).is_err());
    }

    #[test]
    fn text_rendering() {
        assert_eq!(to_text(&LiteralValue::Number(3.0)).unwrap(), "3");
        assert_eq!(to_text(&LiteralValue::Boolean(false)).unwrap(), "FALSE");
        assert_eq!(to_text(&LiteralValue::Empty).unwrap(), "");
    }

    #[test]
    fn logical_coercion() {
        assert!(to_bool(&LiteralValue::Text("true".into())).unwrap());
        assert!(!to_bool(&LiteralValue::Number(0.0)).unwrap());
        assert!(to_bool(&LiteralValue::Text("maybe".into())).is_err());
    }
}
