use std::fmt::{self, Display};

use cellsync_common::{
    AddressError, CellCoord, CellRange, ExcelError, ExcelErrorKind, LiteralValue, SheetRef,
    quote_sheet_name,
};

use crate::tokenizer::{Associativity, Token, TokenSubType, TokenType, Tokenizer, TokenizerError};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParserError {
    #[error(transparent)]
    Tokenizer(#[from] TokenizerError),
    #[error("parse error at token {position}: {message}")]
    Syntax { message: String, position: usize },
    #[error("invalid reference '{text}': {source}")]
    Reference { text: String, source: AddressError },
}

impl ParserError {
    fn syntax(position: usize, message: impl Into<String>) -> Self {
        ParserError::Syntax {
            message: message.into(),
            position,
        }
    }
}

/// A reference to something outside the formula's own cell.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ReferenceType {
    Cell {
        sheet: Option<String>,
        coord: CellCoord,
    },
    Range {
        sheet: Option<String>,
        range: CellRange,
    },
    NamedRange(String),
}

impl ReferenceType {
    /// Classify operand text: `A1`, `Sheet!A1:B2`, or a bare name.
    pub fn from_string(text: &str) -> Result<Self, AddressError> {
        match SheetRef::parse(text) {
            Ok(SheetRef { sheet, range }) if range.start == range.end && !text.contains(':') => {
                Ok(ReferenceType::Cell {
                    sheet,
                    coord: range.start,
                })
            }
            Ok(SheetRef { sheet, range }) => Ok(ReferenceType::Range { sheet, range }),
            Err(err) => {
                if !text.contains('!') && is_name_like(text) {
                    Ok(ReferenceType::NamedRange(text.to_string()))
                } else {
                    Err(err)
                }
            }
        }
    }

    pub fn sheet(&self) -> Option<&str> {
        match self {
            ReferenceType::Cell { sheet, .. } | ReferenceType::Range { sheet, .. } => {
                sheet.as_deref()
            }
            ReferenceType::NamedRange(_) => None,
        }
    }
}

impl Display for ReferenceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (sheet, body) = match self {
            ReferenceType::Cell { sheet, coord } => (sheet, coord.to_string()),
            ReferenceType::Range { sheet, range } => (sheet, range.to_string()),
            ReferenceType::NamedRange(name) => return f.write_str(name),
        };
        if let Some(s) = sheet {
            write!(f, "{}!", quote_sheet_name(s))?;
        }
        f.write_str(&body)
    }
}

/// Names start with a letter, `_` or `\` and continue with word characters or dots.
pub fn is_name_like(text: &str) -> bool {
    let mut chars = text.chars();
    chars
        .next()
        .is_some_and(|c| c.is_alphabetic() || c == '_' || c == '\\')
        && chars.all(|c| c.is_alphanumeric() || c == '_' || c == '.')
}

#[derive(Debug, Clone, PartialEq)]
pub enum ASTNodeType {
    Literal(LiteralValue),
    Reference {
        original: String,
        reference: ReferenceType,
    },
    UnaryOp {
        op: String,
        expr: Box<ASTNode>,
    },
    BinaryOp {
        op: String,
        left: Box<ASTNode>,
        right: Box<ASTNode>,
    },
    Function {
        name: String,
        args: Vec<ASTNode>,
    },
    Array(Vec<Vec<ASTNode>>),
}

#[derive(Debug, Clone, PartialEq)]
pub struct ASTNode {
    pub node_type: ASTNodeType,
    pub source_token: Option<Token>,
}

impl ASTNode {
    pub fn new(node_type: ASTNodeType, source_token: Option<Token>) -> Self {
        ASTNode {
            node_type,
            source_token,
        }
    }

    /// Every reference in the tree, in source order.
    pub fn references(&self) -> Vec<&ReferenceType> {
        let mut out = Vec::new();
        self.collect_references(&mut out);
        out
    }

    fn collect_references<'a>(&'a self, out: &mut Vec<&'a ReferenceType>) {
        match &self.node_type {
            ASTNodeType::Reference { reference, .. } => out.push(reference),
            ASTNodeType::UnaryOp { expr, .. } => expr.collect_references(out),
            ASTNodeType::BinaryOp { left, right, .. } => {
                left.collect_references(out);
                right.collect_references(out);
            }
            ASTNodeType::Function { args, .. } => {
                args.iter().for_each(|a| a.collect_references(out))
            }
            ASTNodeType::Array(rows) => rows
                .iter()
                .flatten()
                .for_each(|a| a.collect_references(out)),
            ASTNodeType::Literal(_) => {}
        }
    }
}

/// Pratt parser over a token stream (whitespace dropped).
pub struct Parser {
    tokens: Vec<Token>,
    position: usize,
}

impl Parser {
    pub fn new(tokens: Vec<Token>) -> Self {
        Parser {
            tokens: tokens
                .into_iter()
                .filter(|t| t.token_type != TokenType::Whitespace)
                .collect(),
            position: 0,
        }
    }

    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.position)
    }

    fn next_is(&self, token_type: TokenType, subtype: TokenSubType) -> bool {
        self.peek()
            .is_some_and(|t| t.token_type == token_type && t.subtype == subtype)
    }

    fn bump(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.position).cloned();
        if token.is_some() {
            self.position += 1;
        }
        token
    }

    pub fn parse(&mut self) -> Result<ASTNode, ParserError> {
        let Some(first) = self.peek() else {
            return Err(ParserError::syntax(0, "No tokens to parse"));
        };
        if first.token_type == TokenType::Literal {
            let token = first.clone();
            return Ok(ASTNode::new(
                ASTNodeType::Literal(LiteralValue::Text(token.value.clone())),
                Some(token),
            ));
        }
        let ast = self.parse_binary_op(0)?;
        if let Some(extra) = self.peek() {
            return Err(ParserError::syntax(
                self.position,
                format!("Unexpected token {extra}"),
            ));
        }
        Ok(ast)
    }

    fn parse_binary_op(&mut self, min_precedence: u8) -> Result<ASTNode, ParserError> {
        let mut left = self.parse_unary_op()?;

        while let Some(token) = self.peek() {
            if token.token_type != TokenType::OpInfix {
                break;
            }
            let Some((precedence, associativity)) = token.precedence() else {
                return Err(ParserError::syntax(
                    self.position,
                    format!("Unsupported operator '{}'", token.value),
                ));
            };
            if precedence < min_precedence {
                break;
            }
            let op_token = token.clone();
            self.position += 1;

            let next_min = match associativity {
                Associativity::Left => precedence + 1,
                Associativity::Right => precedence,
            };
            let right = self.parse_binary_op(next_min)?;
            left = ASTNode::new(
                ASTNodeType::BinaryOp {
                    op: op_token.value.clone(),
                    left: Box::new(left),
                    right: Box::new(right),
                },
                Some(op_token),
            );
        }
        Ok(left)
    }

    fn parse_unary_op(&mut self) -> Result<ASTNode, ParserError> {
        if self
            .peek()
            .is_some_and(|t| t.token_type == TokenType::OpPrefix)
        {
            let op_token = self.bump();
            let expr = self.parse_unary_op()?;
            let op = op_token.as_ref().map(|t| t.value.clone()).unwrap_or_default();
            return Ok(ASTNode::new(
                ASTNodeType::UnaryOp {
                    op,
                    expr: Box::new(expr),
                },
                op_token,
            ));
        }
        self.parse_postfix_op()
    }

    fn parse_postfix_op(&mut self) -> Result<ASTNode, ParserError> {
        let mut expr = self.parse_primary()?;
        while self
            .peek()
            .is_some_and(|t| t.token_type == TokenType::OpPostfix)
        {
            let op_token = self.bump();
            let op = op_token.as_ref().map(|t| t.value.clone()).unwrap_or_default();
            expr = ASTNode::new(
                ASTNodeType::UnaryOp {
                    op,
                    expr: Box::new(expr),
                },
                op_token,
            );
        }
        Ok(expr)
    }

    fn parse_primary(&mut self) -> Result<ASTNode, ParserError> {
        let position = self.position;
        let Some(token) = self.bump() else {
            return Err(ParserError::syntax(position, "Unexpected end of formula"));
        };
        match (token.token_type, token.subtype) {
            (TokenType::Operand, _) => self.parse_operand(token),
            (TokenType::Func, TokenSubType::Open) => self.parse_function(token),
            (TokenType::Paren, TokenSubType::Open) => {
                let expr = self.parse_binary_op(0)?;
                if !self.next_is(TokenType::Paren, TokenSubType::Close) {
                    return Err(ParserError::syntax(
                        self.position,
                        "Expected closing parenthesis",
                    ));
                }
                self.position += 1;
                Ok(expr)
            }
            (TokenType::Array, TokenSubType::Open) => self.parse_array(),
            _ => Err(ParserError::syntax(
                position,
                format!("Unexpected token {token}"),
            )),
        }
    }

    fn parse_operand(&mut self, token: Token) -> Result<ASTNode, ParserError> {
        let node_type = match token.subtype {
            TokenSubType::Number => {
                let value = token.value.parse::<f64>().map_err(|_| {
                    ParserError::syntax(self.position, format!("Invalid number: {}", token.value))
                })?;
                ASTNodeType::Literal(LiteralValue::Number(value))
            }
            TokenSubType::Text => {
                let inner = token
                    .value
                    .strip_prefix('"')
                    .and_then(|s| s.strip_suffix('"'))
                    .unwrap_or(&token.value);
                ASTNodeType::Literal(LiteralValue::Text(inner.replace("\"\"", "\"")))
            }
            TokenSubType::Logical => {
                ASTNodeType::Literal(LiteralValue::Boolean(token.value.eq_ignore_ascii_case("TRUE")))
            }
            TokenSubType::Error => {
                // Sheet1!#REF! keeps only the marker
                let marker = &token.value[token.value.rfind('#').unwrap_or(0)..];
                let kind = ExcelErrorKind::parse(marker).unwrap_or(ExcelErrorKind::Error);
                ASTNodeType::Literal(LiteralValue::Error(ExcelError::new(kind)))
            }
            _ => {
                let reference = ReferenceType::from_string(&token.value).map_err(|source| {
                    ParserError::Reference {
                        text: token.value.clone(),
                        source,
                    }
                })?;
                ASTNodeType::Reference {
                    original: token.value.clone(),
                    reference,
                }
            }
        };
        Ok(ASTNode::new(node_type, Some(token)))
    }

    fn parse_function(&mut self, func_token: Token) -> Result<ASTNode, ParserError> {
        let name = func_token
            .value
            .trim_end_matches('(')
            .to_ascii_uppercase();
        let mut args = Vec::new();

        if self.next_is(TokenType::Func, TokenSubType::Close) {
            self.position += 1;
            return Ok(ASTNode::new(
                ASTNodeType::Function { name, args },
                Some(func_token),
            ));
        }

        loop {
            // Empty argument slot, e.g. IF(A1,,2)
            if self.next_is(TokenType::Sep, TokenSubType::Arg)
                || self.next_is(TokenType::Func, TokenSubType::Close)
            {
                args.push(ASTNode::new(ASTNodeType::Literal(LiteralValue::Empty), None));
            } else {
                args.push(self.parse_binary_op(0)?);
            }

            match self.bump() {
                Some(t) if t.token_type == TokenType::Sep && t.subtype == TokenSubType::Arg => {}
                Some(t) if t.token_type == TokenType::Func && t.subtype == TokenSubType::Close => {
                    break;
                }
                other => {
                    return Err(ParserError::syntax(
                        self.position,
                        format!(
                            "Expected ',' or ')' in arguments to {name}, got {}",
                            other.map(|t| t.value).unwrap_or_else(|| "end".into())
                        ),
                    ));
                }
            }
        }

        Ok(ASTNode::new(
            ASTNodeType::Function { name, args },
            Some(func_token),
        ))
    }

    fn parse_array(&mut self) -> Result<ASTNode, ParserError> {
        let mut rows = Vec::new();
        if self.next_is(TokenType::Array, TokenSubType::Close) {
            self.position += 1;
            return Ok(ASTNode::new(ASTNodeType::Array(rows), None));
        }

        let mut current_row = vec![self.parse_binary_op(0)?];
        loop {
            match self.bump() {
                Some(t) if t.token_type == TokenType::Sep && t.subtype == TokenSubType::Arg => {
                    current_row.push(self.parse_binary_op(0)?);
                }
                Some(t) if t.token_type == TokenType::Sep && t.subtype == TokenSubType::Row => {
                    rows.push(std::mem::take(&mut current_row));
                    current_row.push(self.parse_binary_op(0)?);
                }
                Some(t) if t.token_type == TokenType::Array && t.subtype == TokenSubType::Close => {
                    rows.push(current_row);
                    break;
                }
                _ => {
                    return Err(ParserError::syntax(
                        self.position,
                        "Unexpected token in array literal",
                    ));
                }
            }
        }
        Ok(ASTNode::new(ASTNodeType::Array(rows), None))
    }
}

/// Tokenize and parse a formula (`=...`) into an AST.
pub fn parse<T: AsRef<str>>(formula: T) -> Result<ASTNode, ParserError> {
    let tokenizer = Tokenizer::new(formula.as_ref())?;
    Parser::new(tokenizer.items).parse()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn binary(node: &ASTNode) -> (&str, &ASTNode, &ASTNode) {
        match &node.node_type {
            ASTNodeType::BinaryOp { op, left, right } => (op.as_str(), left, right),
            other => panic!("expected binary op, got {other:?}"),
        }
    }

    #[test]
    fn precedence_binds_multiplication_tighter() {
        let ast = parse("=1+2*3").unwrap();
        let (op, left, right) = binary(&ast);
        assert_eq!(op, "+");
        assert_eq!(left.node_type, ASTNodeType::Literal(LiteralValue::Number(1.0)));
        assert_eq!(binary(right).0, "*");
    }

    #[test]
    fn unary_minus_and_percent() {
        let ast = parse("=-A1%").unwrap();
        match ast.node_type {
            ASTNodeType::UnaryOp { op, expr } => {
                assert_eq!(op, "-");
                assert!(matches!(expr.node_type, ASTNodeType::UnaryOp { ref op, .. } if op == "%"));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn references_are_classified() {
        let ast = parse("=SUM(Sheet2!A1:B3, C4, TaxRate)").unwrap();
        let refs = ast.references();
        assert_eq!(refs.len(), 3);
        assert!(matches!(refs[0], ReferenceType::Range { sheet: Some(s), .. } if s == "Sheet2"));
        assert!(matches!(refs[1], ReferenceType::Cell { sheet: None, coord } if *coord == CellCoord::new(3, 2)));
        assert_eq!(refs[2], &ReferenceType::NamedRange("TaxRate".into()));
        assert_eq!(refs[0].to_string(), "Sheet2!A1:B3");
    }

    #[test]
    fn functions_allow_empty_arguments() {
        let ast = parse("=if(A1,,2)").unwrap();
        match ast.node_type {
            ASTNodeType::Function { name, args } => {
                assert_eq!(name, "IF");
                assert_eq!(args.len(), 3);
                assert_eq!(args[1].node_type, ASTNodeType::Literal(LiteralValue::Empty));
            }
            other => panic!("unexpected {other:?}"),
        }
        assert!(matches!(
            parse("=NOW()").unwrap().node_type,
            ASTNodeType::Function { ref args, .. } if args.is_empty()
        ));
    }

    #[test]
    fn arrays_and_errors() {
        let ast = parse("={1,2;3,4}").unwrap();
        assert!(matches!(ast.node_type, ASTNodeType::Array(ref rows) if rows.len() == 2 && rows[1].len() == 2));
        let ast = parse("=#N/A").unwrap();
        assert!(matches!(
            ast.node_type,
            ASTNodeType::Literal(LiteralValue::Error(ref e)) if e.kind == ExcelErrorKind::Na
        ));
    }

    #[test]
    fn malformed_formulas_are_errors() {
        assert!(parse("=1+").is_err());
        assert!(parse("=(1+2").is_err());
        assert!(parse("=1 2").is_err());
        assert!(matches!(parse("=Sheet1!ZZ"), Err(ParserError::Reference { .. })));
    }
}
