use chrono::{Duration as ChronoDur, NaiveDate, NaiveDateTime, NaiveTime, Timelike};
use std::fmt::{self, Display};

use crate::ExcelError;

/* ───────────────────── date-serial utilities ───────────────────
Serial 1  = 1900-01-01
Serial 60 = 1900-02-29 (phantom day kept for compatibility)
Serial 61 = 1900-03-01
Time is the fractional part of a day, no timezone.
--------------------------------------------------------------- */

const SERIAL_EPOCH: NaiveDate = match NaiveDate::from_ymd_opt(1899, 12, 31) {
    Some(d) => d,
    None => NaiveDate::MIN,
};

const PHANTOM_LEAP_END: NaiveDate = match NaiveDate::from_ymd_opt(1900, 3, 1) {
    Some(d) => d,
    None => NaiveDate::MIN,
};

pub fn datetime_to_serial(dt: &NaiveDateTime) -> f64 {
    let days = (dt.date() - SERIAL_EPOCH).num_days();
    let serial_days = if dt.date() >= PHANTOM_LEAP_END {
        days + 1
    } else {
        days
    };
    let secs_in_day = f64::from(dt.time().num_seconds_from_midnight());
    serial_days as f64 + secs_in_day / 86_400.0
}

/// `None` for non-finite serials or dates chrono cannot represent.
pub fn serial_to_datetime(serial: f64) -> Option<NaiveDateTime> {
    if !serial.is_finite() {
        return None;
    }
    let days = serial.trunc() as i64;
    let frac_secs = (serial.fract() * 86_400.0).round() as i64;

    let date = if days == 60 {
        NaiveDate::from_ymd_opt(1900, 2, 28)?
    } else {
        let offset = if days < 60 { days } else { days - 1 };
        SERIAL_EPOCH.checked_add_signed(ChronoDur::try_days(offset)?)?
    };
    let time = NaiveTime::from_num_seconds_from_midnight_opt(frac_secs.rem_euclid(86_400) as u32, 0)?;
    Some(date.and_time(time))
}

/// ISO-8601 text for a serial: `2024-03-01` at midnight, `2024-03-01T06:00:00` otherwise.
pub fn serial_to_iso(serial: f64) -> Option<String> {
    let dt = serial_to_datetime(serial)?;
    if dt.time() == NaiveTime::MIN {
        Some(dt.date().format("%Y-%m-%d").to_string())
    } else {
        Some(dt.format("%Y-%m-%dT%H:%M:%S").to_string())
    }
}

/// A value produced while evaluating a formula.
#[derive(Debug, Clone, PartialEq)]
pub enum LiteralValue {
    Number(f64),
    Text(String),
    Boolean(bool),
    /// A date or date-time. Arithmetic treats it as its serial number.
    DateTime(NaiveDateTime),
    /// A rectangular block produced by a range reference.
    Array(Vec<Vec<LiteralValue>>),
    Empty,
    Error(ExcelError),
}

impl Display for LiteralValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LiteralValue::Number(n) => write!(f, "{n}"),
            LiteralValue::Text(s) => write!(f, "{s}"),
            LiteralValue::Boolean(b) => f.write_str(if *b { "TRUE" } else { "FALSE" }),
            LiteralValue::DateTime(dt) => write!(f, "{dt}"),
            LiteralValue::Array(a) => write!(f, "{a:?}"),
            LiteralValue::Empty => Ok(()),
            LiteralValue::Error(e) => write!(f, "{}", e.kind),
        }
    }
}

impl LiteralValue {
    pub fn as_serial_number(&self) -> Option<f64> {
        match self {
            LiteralValue::DateTime(dt) => Some(datetime_to_serial(dt)),
            LiteralValue::Number(n) => Some(*n),
            LiteralValue::Boolean(b) => Some(if *b { 1.0 } else { 0.0 }),
            _ => None,
        }
    }

    pub fn from_serial_number(serial: f64) -> Option<Self> {
        serial_to_datetime(serial).map(LiteralValue::DateTime)
    }

    pub fn is_truthy(&self) -> bool {
        match self {
            LiteralValue::Boolean(b) => *b,
            LiteralValue::Number(n) => *n != 0.0,
            LiteralValue::Text(s) => !s.is_empty(),
            LiteralValue::DateTime(_) => true,
            LiteralValue::Array(arr) => !arr.is_empty(),
            LiteralValue::Error(_) | LiteralValue::Empty => false,
        }
    }

    /// Top-left element of an array, or the value itself.
    pub fn into_scalar(self) -> LiteralValue {
        match self {
            LiteralValue::Array(rows) => rows
                .into_iter()
                .next()
                .and_then(|r| r.into_iter().next())
                .unwrap_or(LiteralValue::Empty),
            other => other,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serial_round_trip_and_phantom_day() {
        let dt = NaiveDate::from_ymd_opt(2024, 3, 1)
            .unwrap()
            .and_hms_opt(0, 0, 0)
            .unwrap();
        let serial = datetime_to_serial(&dt);
        assert_eq!(serial, 45352.0);
        assert_eq!(serial_to_datetime(serial), Some(dt));
        assert_eq!(
            serial_to_datetime(60.0).map(|d| d.date()),
            NaiveDate::from_ymd_opt(1900, 2, 28)
        );
        assert_eq!(serial_to_datetime(f64::NAN), None);
    }

    #[test]
    fn iso_rendering() {
        assert_eq!(serial_to_iso(45352.0).as_deref(), Some("2024-03-01"));
        assert_eq!(serial_to_iso(45352.25).as_deref(), Some("2024-03-01T06:00:00"));
    }

    #[test]
    fn truthiness_and_scalar() {
        assert!(LiteralValue::Number(2.0).is_truthy());
        assert!(!LiteralValue::Empty.is_truthy());
        let arr = LiteralValue::Array(vec![vec![LiteralValue::Number(7.0)]]);
        assert_eq!(arr.into_scalar(), LiteralValue::Number(7.0));
    }
}
