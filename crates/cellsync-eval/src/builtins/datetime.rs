use cellsync_common::{ExcelError, ExcelErrorKind, LiteralValue, serial_to_datetime};
use cellsync_parse::ASTNode;
use chrono::{Datelike, Duration, Months, NaiveDate, NaiveTime};
use rustc_hash::FxHashMap;

use super::BuiltinFn;
use super::utils::{check_arity, number_arg};
use crate::interpreter::Interpreter;

pub(super) fn register(m: &mut FxHashMap<&'static str, BuiltinFn>) {
    m.insert("DATE", date_fn);
    m.insert("YEAR", year_fn);
    m.insert("MONTH", month_fn);
    m.insert("DAY", day_fn);
}

fn num_err() -> ExcelError {
    ExcelError::new(ExcelErrorKind::Num)
}

/// DATE(year, month, day). Years 0..1899 are offset from 1900; month and day
/// overflow roll into the next month or year.
fn date_fn(interp: &Interpreter<'_>, args: &[ASTNode]) -> Result<LiteralValue, ExcelError> {
    check_arity("DATE", args, 3, 3)?;
    let mut year = number_arg(interp, &args[0])?.trunc() as i64;
    let month = number_arg(interp, &args[1])?.trunc() as i64;
    let day = number_arg(interp, &args[2])?.trunc() as i64;
    if (0..1900).contains(&year) {
        year += 1900;
    }
    if !(1900..=9999).contains(&year) {
        return Err(num_err());
    }
    let base = NaiveDate::from_ymd_opt(year as i32, 1, 1).ok_or_else(num_err)?;
    let month_offset = month - 1;
    let shifted = if month_offset >= 0 {
        base.checked_add_months(Months::new(month_offset as u32))
    } else {
        base.checked_sub_months(Months::new(month_offset.unsigned_abs() as u32))
    }
    .ok_or_else(num_err)?;
    let date = shifted
        .checked_add_signed(Duration::try_days(day - 1).ok_or_else(num_err)?)
        .ok_or_else(num_err)?;
    Ok(LiteralValue::DateTime(date.and_time(NaiveTime::MIN)))
}

fn date_part(
    interp: &Interpreter<'_>,
    args: &[ASTNode],
    name: &str,
    part: fn(NaiveDate) -> u32,
) -> Result<LiteralValue, ExcelError> {
    check_arity(name, args, 1, 1)?;
    let serial = number_arg(interp, &args[0])?;
    if serial < 0.0 {
        return Err(num_err());
    }
    let dt = serial_to_datetime(serial).ok_or_else(num_err)?;
    Ok(LiteralValue::Number(f64::from(part(dt.date()))))
}

fn year_fn(interp: &Interpreter<'_>, args: &[ASTNode]) -> Result<LiteralValue, ExcelError> {
    date_part(interp, args, "YEAR", |d| d.year() as u32)
}

fn month_fn(interp: &Interpreter<'_>, args: &[ASTNode]) -> Result<LiteralValue, ExcelError> {
    date_part(interp, args, "MONTH", |d| d.month())
}

fn day_fn(interp: &Interpreter<'_>, args: &[ASTNode]) -> Result<LiteralValue, ExcelError> {
    date_part(interp, args, "DAY", |d| d.day())
}
