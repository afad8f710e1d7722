//! Spreadsheet error codes shared by the engine and the document cache.
//!
//! - **`ExcelErrorKind`**: the canonical codes, rendered exactly as users see them
//! - **`ExcelError`**: a kind plus an optional human message and origin cell
//!
//! Engines are free to report errors with their own spellings (`DIV_BY_ZERO`,
//! `CYCLE`, lowercase markers). [`ExcelErrorKind::from_code`] folds the known
//! aliases onto the canonical set so cached errors always carry one spelling.

use std::{error::Error, fmt};

use crate::LiteralValue;

/// Recognised error codes.
///
/// Names are CamelCase while `Display` renders the marker (`#DIV/0!`, ...).
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum ExcelErrorKind {
    Null,
    Ref,
    Name,
    Value,
    Div,
    Na,
    Num,
    Error,
    Circ,
    Cancelled,
}

impl fmt::Display for ExcelErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.marker())
    }
}

impl ExcelErrorKind {
    pub const ALL: [ExcelErrorKind; 10] = [
        Self::Null,
        Self::Ref,
        Self::Name,
        Self::Value,
        Self::Div,
        Self::Na,
        Self::Num,
        Self::Error,
        Self::Circ,
        Self::Cancelled,
    ];

    pub const fn marker(self) -> &'static str {
        match self {
            Self::Null => "#NULL!",
            Self::Ref => "#REF!",
            Self::Name => "#NAME?",
            Self::Value => "#VALUE!",
            Self::Div => "#DIV/0!",
            Self::Na => "#N/A",
            Self::Num => "#NUM!",
            Self::Error => "#ERROR!",
            Self::Circ => "#CIRC!",
            Self::Cancelled => "#CANCELLED!",
        }
    }

    /// Message shown next to a cell holding this error.
    pub const fn default_message(self) -> &'static str {
        match self {
            Self::Null => "The ranges in this formula do not intersect",
            Self::Ref => "This formula refers to a cell that does not exist",
            Self::Name => "This formula uses a name or function that is not recognised",
            Self::Value => "A value in this formula has the wrong type",
            Self::Div => "Division by zero",
            Self::Na => "A value is not available to this formula",
            Self::Num => "This formula produced an invalid number",
            Self::Error => "This formula could not be evaluated",
            Self::Circ => "Circular reference detected",
            Self::Cancelled => "Calculation was cancelled",
        }
    }

    /// Parse a canonical marker such as `#DIV/0!` (case-insensitive).
    pub fn parse(s: &str) -> Option<Self> {
        let needle = s.trim();
        Self::ALL
            .into_iter()
            .find(|k| k.marker().eq_ignore_ascii_case(needle))
    }

    /// Parse a marker or one of the symbolic aliases engines commonly emit.
    pub fn from_code(s: &str) -> Option<Self> {
        if let Some(kind) = Self::parse(s) {
            return Some(kind);
        }
        let upper = s.trim().trim_start_matches('#').to_ascii_uppercase();
        let kind = match upper.as_str() {
            "DIV_BY_ZERO" | "DIV0" | "DIV/0" => Self::Div,
            "NAME" => Self::Name,
            "REF" => Self::Ref,
            "VALUE" => Self::Value,
            "NA" | "N/A" => Self::Na,
            "NUM" => Self::Num,
            "NULL" => Self::Null,
            "CYCLE" | "CIRC" | "CIRCULAR" => Self::Circ,
            "ERROR" => Self::Error,
            "CANCELLED" | "TIMEOUT" => Self::Cancelled,
            _ => return None,
        };
        Some(kind)
    }
}

/// Where an error was raised, in engine coordinates.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct ErrorContext {
    pub sheet: Option<String>,
    pub row: Option<u32>,
    pub col: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ExcelError {
    pub kind: ExcelErrorKind,
    pub message: Option<String>,
    pub context: Option<ErrorContext>,
}

impl From<ExcelErrorKind> for ExcelError {
    fn from(kind: ExcelErrorKind) -> Self {
        Self {
            kind,
            message: None,
            context: None,
        }
    }
}

impl ExcelError {
    pub fn new(kind: ExcelErrorKind) -> Self {
        kind.into()
    }

    /// Attach a human-readable explanation.
    pub fn with_message<S: Into<String>>(mut self, msg: S) -> Self {
        self.message = Some(msg.into());
        self
    }

    pub fn with_location(mut self, sheet: Option<String>, row: u32, col: u32) -> Self {
        self.context = Some(ErrorContext {
            sheet,
            row: Some(row),
            col: Some(col),
        });
        self
    }

    /// The explicit message, or the kind's default one.
    pub fn message_or_default(&self) -> &str {
        self.message
            .as_deref()
            .unwrap_or_else(|| self.kind.default_message())
    }
}

impl fmt::Display for ExcelError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.kind)?;
        if let Some(ref msg) = self.message {
            write!(f, ": {msg}")?;
        }
        if let Some(ErrorContext {
            row: Some(r),
            col: Some(c),
            ref sheet,
        }) = self.context
        {
            match sheet {
                Some(s) => write!(f, " ({s}!R{}C{})", r + 1, c + 1)?,
                None => write!(f, " (R{}C{})", r + 1, c + 1)?,
            }
        }
        Ok(())
    }
}

impl Error for ExcelError {}

impl From<ExcelError> for LiteralValue {
    fn from(error: ExcelError) -> Self {
        LiteralValue::Error(error)
    }
}

impl PartialEq<str> for ExcelErrorKind {
    fn eq(&self, other: &str) -> bool {
        self.marker() == other
    }
}

impl PartialEq<&str> for ExcelError {
    fn eq(&self, other: &&str) -> bool {
        self.kind.marker() == *other
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn markers_round_trip() {
        for kind in ExcelErrorKind::ALL {
            assert_eq!(ExcelErrorKind::parse(&kind.to_string()), Some(kind));
        }
        assert_eq!(ExcelErrorKind::parse("#div/0!"), Some(ExcelErrorKind::Div));
        assert_eq!(ExcelErrorKind::parse("#WHAT?"), None);
    }

    #[test]
    fn aliases_fold_onto_canonical_kinds() {
        assert_eq!(ExcelErrorKind::from_code("DIV_BY_ZERO"), Some(ExcelErrorKind::Div));
        assert_eq!(ExcelErrorKind::from_code("CYCLE"), Some(ExcelErrorKind::Circ));
        assert_eq!(ExcelErrorKind::from_code("na"), Some(ExcelErrorKind::Na));
        assert_eq!(ExcelErrorKind::from_code("#NAME"), Some(ExcelErrorKind::Name));
        assert_eq!(ExcelErrorKind::from_code("SPILL_BLOCKED"), None);
    }

    #[test]
    fn display_includes_message_and_location() {
        let e = ExcelError::new(ExcelErrorKind::Div)
            .with_message("bad")
            .with_location(Some("Sheet1".into()), 0, 1);
        assert_eq!(e.to_string(), "#DIV/0!: bad (Sheet1!R1C2)");
        assert_eq!(e.message_or_default(), "bad");
        assert_eq!(
            ExcelError::new(ExcelErrorKind::Circ).message_or_default(),
            "Circular reference detected"
        );
    }
}
