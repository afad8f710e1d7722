pub mod parser;
pub mod references;
pub mod tokenizer;

pub use parser::{ASTNode, ASTNodeType, Parser, ParserError, ReferenceType, is_name_like, parse};
pub use references::{extract_references, shift_formula};
pub use tokenizer::{Token, TokenSubType, TokenType, Tokenizer, TokenizerError};

pub use cellsync_common::{ExcelError, ExcelErrorKind, LiteralValue};
