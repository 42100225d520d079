//! Lexical analysis for the Lua subset.

mod error;
mod lexer;


pub use error::{offset_to_position, CompileError, Position, Span};
pub use lexer::{tokenize, Lexer, Token, TokenKind};
