//! Byte-oriented formula tokenizer.
//!
//! Produces a flat token stream with byte spans so callers can rewrite parts of
//! the source (reference shifting) without re-rendering the whole formula.

use std::fmt::{self, Display};

use cellsync_common::ExcelErrorKind;

const TOKEN_ENDERS: &[u8] = b",;}) +-*/^&=><%";

const fn build_token_enders() -> [bool; 256] {
    let mut tbl = [false; 256];
    let mut i = 0;
    while i < TOKEN_ENDERS.len() {
        tbl[TOKEN_ENDERS[i] as usize] = true;
        i += 1;
    }
    tbl
}
static TOKEN_ENDERS_TABLE: [bool; 256] = build_token_enders();

#[inline(always)]
fn is_token_ender(c: u8) -> bool {
    TOKEN_ENDERS_TABLE[c as usize]
}

#[derive(Debug, PartialEq, Eq)]
pub enum Associativity {
    Left,
    Right,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{message} (at byte {pos})")]
pub struct TokenizerError {
    pub message: String,
    pub pos: usize,
}

impl TokenizerError {
    fn at(pos: usize, message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            pos,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TokenType {
    Literal,
    Operand,
    Func,
    Array,
    Paren,
    Sep,
    OpPrefix,
    OpInfix,
    OpPostfix,
    Whitespace,
}

impl Display for TokenType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{self:?}")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TokenSubType {
    None,
    Text,
    Number,
    Logical,
    Error,
    Range,
    Open,
    Close,
    Arg,
    Row,
}

/// A token and the byte span it was read from.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Token {
    pub value: String,
    pub token_type: TokenType,
    pub subtype: TokenSubType,
    pub start: usize,
    pub end: usize,
}

impl Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<{} {:?} {}>", self.token_type, self.subtype, self.value)
    }
}

impl Token {
    fn from_slice(
        source: &str,
        token_type: TokenType,
        subtype: TokenSubType,
        start: usize,
        end: usize,
    ) -> Self {
        Token {
            value: source[start..end].to_string(),
            token_type,
            subtype,
            start,
            end,
        }
    }

    fn operand_from_slice(source: &str, start: usize, end: usize) -> Self {
        let text = &source[start..end];
        let subtype = if text.starts_with('"') {
            TokenSubType::Text
        } else if text.starts_with('#') {
            TokenSubType::Error
        } else if text.eq_ignore_ascii_case("TRUE") || text.eq_ignore_ascii_case("FALSE") {
            TokenSubType::Logical
        } else if text.parse::<f64>().is_ok() {
            TokenSubType::Number
        } else {
            TokenSubType::Range
        };
        Token::from_slice(source, TokenType::Operand, subtype, start, end)
    }

    pub fn is_operator(&self) -> bool {
        matches!(
            self.token_type,
            TokenType::OpPrefix | TokenType::OpInfix | TokenType::OpPostfix
        )
    }

    /// Binding power of an operator token; prefix operators bind tighter than `^`.
    pub fn precedence(&self) -> Option<(u8, Associativity)> {
        if self.token_type == TokenType::OpPrefix {
            return Some((7, Associativity::Right));
        }
        match self.value.as_str() {
            "%" => Some((6, Associativity::Left)),
            "^" => Some((5, Associativity::Left)),
            "*" | "/" => Some((4, Associativity::Left)),
            "+" | "-" => Some((3, Associativity::Left)),
            "&" => Some((2, Associativity::Left)),
            "=" | "<" | ">" | "<=" | ">=" | "<>" => Some((1, Associativity::Left)),
            _ => None,
        }
    }
}

/// Tokenizes a formula string on construction.
pub struct Tokenizer {
    formula: String,
    pub items: Vec<Token>,
    token_stack: Vec<Token>,
    offset: usize,
    token_start: usize,
    token_end: usize,
}

impl Tokenizer {
    pub fn new(formula: &str) -> Result<Self, TokenizerError> {
        let mut tokenizer = Tokenizer {
            formula: formula.to_string(),
            items: Vec::with_capacity(formula.len() / 2),
            token_stack: Vec::with_capacity(8),
            offset: 0,
            token_start: 0,
            token_end: 0,
        };
        tokenizer.run()?;
        Ok(tokenizer)
    }

    #[inline]
    fn byte_at(&self, i: usize) -> Option<u8> {
        self.formula.as_bytes().get(i).copied()
    }

    #[inline]
    fn has_token(&self) -> bool {
        self.token_end > self.token_start
    }

    #[inline]
    fn start_token(&mut self) {
        self.token_start = self.offset;
        self.token_end = self.offset;
    }

    fn run(&mut self) -> Result<(), TokenizerError> {
        if self.formula.is_empty() {
            return Ok(());
        }
        if self.byte_at(0) != Some(b'=') {
            self.items.push(Token::from_slice(
                &self.formula,
                TokenType::Literal,
                TokenSubType::None,
                0,
                self.formula.len(),
            ));
            return Ok(());
        }

        self.offset = 1;
        self.start_token();

        while let Some(curr) = self.byte_at(self.offset) {
            if self.consume_exponent_sign(curr) {
                continue;
            }
            if is_token_ender(curr) && self.has_token() {
                self.save_token();
                self.start_token();
            }
            match curr {
                b'"' | b'\'' => self.read_string(curr)?,
                b'[' => self.read_brackets()?,
                b'#' => self.read_error()?,
                b' ' | b'\n' | b'\t' => self.read_whitespace(),
                b'+' | b'-' | b'*' | b'/' | b'^' | b'&' | b'=' | b'>' | b'<' | b'%' => {
                    self.read_operator(curr)
                }
                b'{' | b'(' => self.read_opener(curr),
                b')' | b'}' => self.read_closer(curr)?,
                b';' | b',' => self.read_separator(curr),
                _ => {
                    if !self.has_token() {
                        self.start_token();
                    }
                    self.offset += 1;
                    self.token_end = self.offset;
                }
            }
        }

        self.save_token();

        if !self.token_stack.is_empty() {
            return Err(TokenizerError::at(
                self.offset,
                "Unmatched opening parenthesis or bracket",
            ));
        }
        Ok(())
    }

    /// `1.5E+3`: the sign after an exponent marker belongs to the number.
    fn consume_exponent_sign(&mut self, curr: u8) -> bool {
        if !(curr == b'+' || curr == b'-') || !self.has_token() {
            return false;
        }
        let slice = &self.formula.as_bytes()[self.token_start..self.token_end];
        let Some((&last, rest)) = slice.split_last() else {
            return false;
        };
        if !(last == b'E' || last == b'e') || rest.is_empty() || !rest[0].is_ascii_digit() {
            return false;
        }
        let mut dot_seen = false;
        for &ch in &rest[1..] {
            match ch {
                b'0'..=b'9' => {}
                b'.' if !dot_seen => dot_seen = true,
                _ => return false,
            }
        }
        self.offset += 1;
        self.token_end = self.offset;
        true
    }

    fn save_token(&mut self) {
        if self.has_token() {
            self.items.push(Token::operand_from_slice(
                &self.formula,
                self.token_start,
                self.token_end,
            ));
        }
    }

    /// `"text"` becomes its own operand; `'quoted sheet'` joins the current token.
    fn read_string(&mut self, delim: u8) -> Result<(), TokenizerError> {
        if delim == b'"' && self.has_token() {
            self.save_token();
            self.start_token();
        }
        let string_start = if delim == b'\'' && self.has_token() {
            self.token_start
        } else {
            self.offset
        };
        if !self.has_token() {
            self.token_start = self.offset;
        }
        self.offset += 1;

        while let Some(b) = self.byte_at(self.offset) {
            self.offset += 1;
            if b != delim {
                continue;
            }
            if self.byte_at(self.offset) == Some(delim) {
                self.offset += 1;
                continue;
            }
            if delim == b'"' {
                self.items.push(Token::operand_from_slice(
                    &self.formula,
                    string_start,
                    self.offset,
                ));
                self.start_token();
            } else {
                self.token_start = string_start;
                self.token_end = self.offset;
            }
            return Ok(());
        }
        Err(TokenizerError::at(
            self.offset,
            "Reached end of formula while parsing string",
        ))
    }

    fn read_brackets(&mut self) -> Result<(), TokenizerError> {
        if !self.has_token() {
            self.start_token();
        }
        let mut depth = 0usize;
        while let Some(b) = self.byte_at(self.offset) {
            self.offset += 1;
            match b {
                b'[' => depth += 1,
                b']' => {
                    depth -= 1;
                    if depth == 0 {
                        self.token_end = self.offset;
                        return Ok(());
                    }
                }
                _ => {}
            }
        }
        Err(TokenizerError::at(self.offset, "Encountered unmatched '['"))
    }

    /// Error literal such as `#DIV/0!`, possibly prefixed by `Sheet!`.
    fn read_error(&mut self) -> Result<(), TokenizerError> {
        if self.has_token() && self.byte_at(self.token_end - 1) != Some(b'!') {
            self.save_token();
            self.start_token();
        }
        let error_start = if self.has_token() {
            self.token_start
        } else {
            self.offset
        };
        let rest = &self.formula.as_bytes()[self.offset..];
        for kind in ExcelErrorKind::ALL {
            let code = kind.marker().as_bytes();
            if rest.len() >= code.len() && rest[..code.len()].eq_ignore_ascii_case(code) {
                let end = self.offset + code.len();
                self.items
                    .push(Token::operand_from_slice(&self.formula, error_start, end));
                self.offset = end;
                self.start_token();
                return Ok(());
            }
        }
        Err(TokenizerError::at(self.offset, "Invalid error code"))
    }

    fn read_whitespace(&mut self) {
        self.save_token();
        let ws_start = self.offset;
        while matches!(self.byte_at(self.offset), Some(b' ' | b'\n' | b'\t')) {
            self.offset += 1;
        }
        self.items.push(Token::from_slice(
            &self.formula,
            TokenType::Whitespace,
            TokenSubType::None,
            ws_start,
            self.offset,
        ));
        self.start_token();
    }

    fn read_operator(&mut self, curr: u8) {
        self.save_token();

        let next = self.byte_at(self.offset + 1);
        let two_char = matches!(
            (curr, next),
            (b'>', Some(b'=')) | (b'<', Some(b'=')) | (b'<', Some(b'>'))
        );
        let width = if two_char { 2 } else { 1 };

        let token_type = match curr {
            b'%' => TokenType::OpPostfix,
            b'+' | b'-' if !two_char => {
                let prev = self
                    .items
                    .iter()
                    .rev()
                    .find(|t| t.token_type != TokenType::Whitespace);
                match prev {
                    Some(p)
                        if p.subtype == TokenSubType::Close
                            || p.token_type == TokenType::OpPostfix
                            || p.token_type == TokenType::Operand =>
                    {
                        TokenType::OpInfix
                    }
                    _ => TokenType::OpPrefix,
                }
            }
            _ => TokenType::OpInfix,
        };

        self.items.push(Token::from_slice(
            &self.formula,
            token_type,
            TokenSubType::None,
            self.offset,
            self.offset + width,
        ));
        self.offset += width;
        self.start_token();
    }

    fn read_opener(&mut self, curr: u8) {
        let token = if curr == b'{' {
            self.save_token();
            Token::from_slice(
                &self.formula,
                TokenType::Array,
                TokenSubType::Open,
                self.offset,
                self.offset + 1,
            )
        } else if self.has_token() {
            // NAME( starts a function call
            Token::from_slice(
                &self.formula,
                TokenType::Func,
                TokenSubType::Open,
                self.token_start,
                self.offset + 1,
            )
        } else {
            Token::from_slice(
                &self.formula,
                TokenType::Paren,
                TokenSubType::Open,
                self.offset,
                self.offset + 1,
            )
        };
        self.items.push(token.clone());
        self.token_stack.push(token);
        self.offset += 1;
        self.start_token();
    }

    fn read_closer(&mut self, curr: u8) -> Result<(), TokenizerError> {
        self.save_token();
        let Some(opener) = self.token_stack.pop() else {
            return Err(TokenizerError::at(self.offset, "No matching opener for closer"));
        };
        let expects_brace = opener.token_type == TokenType::Array;
        if expects_brace != (curr == b'}') {
            return Err(TokenizerError::at(self.offset, "Mismatched ( and { pair"));
        }
        self.items.push(Token::from_slice(
            &self.formula,
            opener.token_type,
            TokenSubType::Close,
            self.offset,
            self.offset + 1,
        ));
        self.offset += 1;
        self.start_token();
        Ok(())
    }

    fn read_separator(&mut self, curr: u8) {
        self.save_token();
        let (token_type, subtype) = if curr == b';' {
            (TokenType::Sep, TokenSubType::Row)
        } else if self
            .token_stack
            .last()
            .is_some_and(|t| matches!(t.token_type, TokenType::Func | TokenType::Array))
        {
            (TokenType::Sep, TokenSubType::Arg)
        } else {
            (TokenType::OpInfix, TokenSubType::None)
        };
        self.items.push(Token::from_slice(
            &self.formula,
            token_type,
            subtype,
            self.offset,
            self.offset + 1,
        ));
        self.offset += 1;
        self.start_token();
    }

    /// Reassemble the formula from its tokens.
    pub fn render(&self) -> String {
        match self.items.first() {
            None => String::new(),
            Some(t) if t.token_type == TokenType::Literal => t.value.clone(),
            Some(_) => {
                let body: String = self.items.iter().map(|t| t.value.as_str()).collect();
                format!("={body}")
            }
        }
    }

    pub fn source(&self) -> &str {
        &self.formula
    }
}

impl TryFrom<&str> for Tokenizer {
    type Error = TokenizerError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        Tokenizer::new(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(formula: &str) -> Vec<(TokenType, TokenSubType, String)> {
        Tokenizer::new(formula)
            .unwrap()
            .items
            .into_iter()
            .filter(|t| t.token_type != TokenType::Whitespace)
            .map(|t| (t.token_type, t.subtype, t.value))
            .collect()
    }

    #[test]
    fn literal_without_equals() {
        let t = Tokenizer::new("hello").unwrap();
        assert_eq!(t.items.len(), 1);
        assert_eq!(t.items[0].token_type, TokenType::Literal);
    }

    #[test]
    fn operators_and_references() {
        let toks = kinds("=A1+-B$2*3%");
        let values: Vec<_> = toks.iter().map(|t| t.2.as_str()).collect();
        assert_eq!(values, ["A1", "+", "-", "B$2", "*", "3", "%"]);
        assert_eq!(toks[1].0, TokenType::OpInfix);
        assert_eq!(toks[2].0, TokenType::OpPrefix);
        assert_eq!(toks[3].1, TokenSubType::Range);
        assert_eq!(toks[6].0, TokenType::OpPostfix);
    }

    #[test]
    fn functions_strings_and_quoted_sheets() {
        let toks = kinds("=SUM('My Sheet'!A1:B2, \"x\"\"y\")");
        assert_eq!(toks[0].0, TokenType::Func);
        assert_eq!(toks[0].2, "SUM(");
        assert_eq!(toks[1].2, "'My Sheet'!A1:B2");
        assert_eq!(toks[1].1, TokenSubType::Range);
        assert_eq!(toks[2].1, TokenSubType::Arg);
        assert_eq!(toks[3].1, TokenSubType::Text);
        assert_eq!(toks[4].1, TokenSubType::Close);
    }

    #[test]
    fn spans_point_into_source() {
        let f = "=Sheet1!C3 * 2";
        let t = Tokenizer::new(f).unwrap();
        let r = &t.items[0];
        assert_eq!(&f[r.start..r.end], "Sheet1!C3");
    }

    #[test]
    fn exponent_and_comparison() {
        let toks = kinds("=1.5E+3>=A1");
        assert_eq!(toks[0].2, "1.5E+3");
        assert_eq!(toks[0].1, TokenSubType::Number);
        assert_eq!(toks[1].2, ">=");
    }

    #[test]
    fn error_literals_and_failures() {
        let toks = kinds("=#DIV/0!+1");
        assert_eq!(toks[0].1, TokenSubType::Error);
        assert!(Tokenizer::new("=SUM(1,2").is_err());
        assert!(Tokenizer::new("=(1}").is_err());
        assert!(Tokenizer::new("=\"open").is_err());
        assert!(Tokenizer::new("=#BOGUS").is_err());
    }

    #[test]
    fn render_round_trips() {
        let f = "=IF(A1>0, \"pos\", {1,2;3,4})";
        assert_eq!(Tokenizer::new(f).unwrap().render(), f);
    }
}
