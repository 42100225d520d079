use std::collections::HashMap;

use once_cell::sync::Lazy;

use crate::token::{CompileError, Position, Span};

#[derive(Debug, Clone, PartialEq)]
pub enum TokenKind {
    // Keywords
    And,
    Break,
    Do,
    Else,
    Elseif,
    End,
    False,
    For,
    Function,
    Goto,
    If,
    In,
    Local,
    Nil,
    Not,
    Or,
    Repeat,
    Return,
    Then,
    True,
    Until,
    While,
    // Symbols
    Plus,         // +
    Minus,        // -
    Star,         // *
    Slash,        // /
    DoubleSlash,  // //
    Percent,      // %
    Caret,        // ^
    Hash,         // #
    Ampersand,    // &
    Tilde,        // ~
    Pipe,         // |
    LtLt,         // <<
    GtGt,         // >>
    Eq,           // ==
    Ne,           // ~=
    Le,           // <=
    Ge,           // >=
    Lt,           // <
    Gt,           // >
    Assign,       // =
    LParen,       // (
    RParen,       // )
    LBrace,       // {
    RBrace,       // }
    LBracket,     // [
    RBracket,     // ]
    DoubleColon,  // ::
    Semicolon,    // ;
    Colon,        // :
    Comma,        // ,
    Dot,          // .
    Concat,       // ..
    Ellipsis,     // ...
    // Literals
    Int(i64),
    Float(f64),
    Str(String),
    Name(String),
    Eof,
}

impl TokenKind {
    /// Spelling used in diagnostics.
    pub fn describe(&self) -> String {
        match self {
            TokenKind::Int(n) => format!("'{}'", n),
            TokenKind::Float(n) => format!("'{}'", n),
            TokenKind::Str(_) => "string literal".to_string(),
            TokenKind::Name(n) => format!("'{}'", n),
            TokenKind::Eof => "<eof>".to_string(),
            other => format!("'{}'", other.symbol()),
        }
    }

    fn symbol(&self) -> &'static str {
        match self {
            TokenKind::And => "and",
            TokenKind::Break => "break",
            TokenKind::Do => "do",
            TokenKind::Else => "else",
            TokenKind::Elseif => "elseif",
            TokenKind::End => "end",
            TokenKind::False => "false",
            TokenKind::For => "for",
            TokenKind::Function => "function",
            TokenKind::Goto => "goto",
            TokenKind::If => "if",
            TokenKind::In => "in",
            TokenKind::Local => "local",
            TokenKind::Nil => "nil",
            TokenKind::Not => "not",
            TokenKind::Or => "or",
            TokenKind::Repeat => "repeat",
            TokenKind::Return => "return",
            TokenKind::Then => "then",
            TokenKind::True => "true",
            TokenKind::Until => "until",
            TokenKind::While => "while",
            TokenKind::Plus => "+",
            TokenKind::Minus => "-",
            TokenKind::Star => "*",
            TokenKind::Slash => "/",
            TokenKind::DoubleSlash => "//",
            TokenKind::Percent => "%",
            TokenKind::Caret => "^",
            TokenKind::Hash => "#",
            TokenKind::Ampersand => "&",
            TokenKind::Tilde => "~",
            TokenKind::Pipe => "|",
            TokenKind::LtLt => "<<",
            TokenKind::GtGt => ">>",
            TokenKind::Eq => "==",
            TokenKind::Ne => "~=",
            TokenKind::Le => "<=",
            TokenKind::Ge => ">=",
            TokenKind::Lt => "<",
            TokenKind::Gt => ">",
            TokenKind::Assign => "=",
            TokenKind::LParen => "(",
            TokenKind::RParen => ")",
            TokenKind::LBrace => "{",
            TokenKind::RBrace => "}",
            TokenKind::LBracket => "[",
            TokenKind::RBracket => "]",
            TokenKind::DoubleColon => "::",
            TokenKind::Semicolon => ";",
            TokenKind::Colon => ":",
            TokenKind::Comma => ",",
            TokenKind::Dot => ".",
            TokenKind::Concat => "..",
            TokenKind::Ellipsis => "...",
            _ => "?",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub kind: TokenKind,
    pub span: Span,
}

static KEYWORDS: Lazy<HashMap<&'static str, TokenKind>> = Lazy::new(|| {
    let mut m = HashMap::new();
    m.insert("and", TokenKind::And);
    m.insert("break", TokenKind::Break);
    m.insert("do", TokenKind::Do);
    m.insert("else", TokenKind::Else);
    m.insert("elseif", TokenKind::Elseif);
    m.insert("end", TokenKind::End);
    m.insert("false", TokenKind::False);
    m.insert("for", TokenKind::For);
    m.insert("function", TokenKind::Function);
    m.insert("goto", TokenKind::Goto);
    m.insert("if", TokenKind::If);
    m.insert("in", TokenKind::In);
    m.insert("local", TokenKind::Local);
    m.insert("nil", TokenKind::Nil);
    m.insert("not", TokenKind::Not);
    m.insert("or", TokenKind::Or);
    m.insert("repeat", TokenKind::Repeat);
    m.insert("return", TokenKind::Return);
    m.insert("then", TokenKind::Then);
    m.insert("true", TokenKind::True);
    m.insert("until", TokenKind::Until);
    m.insert("while", TokenKind::While);
    m
});

pub struct Lexer<'a> {
    src: &'a [u8],
    chunk_name: &'a str,
    pos: usize,
    line: u32,
    column: u32,
}

/// Tokenize a whole chunk. The final token is always `Eof`.
pub fn tokenize(source: &str, chunk_name: &str) -> Result<Vec<Token>, CompileError> {
    Lexer::new(source, chunk_name).run()
}

impl<'a> Lexer<'a> {
    pub fn new(source: &'a str, chunk_name: &'a str) -> Self {
        Self {
            src: source.as_bytes(),
            chunk_name,
            pos: 0,
            line: 1,
            column: 1,
        }
    }

    pub fn run(mut self) -> Result<Vec<Token>, CompileError> {
        let mut tokens = Vec::new();
        loop {
            let token = self.next_token()?;
            let done = token.kind == TokenKind::Eof;
            tokens.push(token);
            if done {
                return Ok(tokens);
            }
        }
    }

    fn position(&self) -> Position {
        Position::new(self.line, self.column, self.pos)
    }

    fn error(&self, message: impl Into<String>, pos: Position) -> CompileError {
        CompileError::new(message, self.chunk_name, pos)
    }

    fn peek(&self) -> Option<u8> {
        self.src.get(self.pos).copied()
    }

    fn peek_at(&self, ahead: usize) -> Option<u8> {
        self.src.get(self.pos + ahead).copied()
    }

    fn bump(&mut self) -> Option<u8> {
        let c = self.peek()?;
        self.pos += 1;
        if c == b'\n' {
            self.line += 1;
            self.column = 1;
        } else {
            self.column += 1;
        }
        Some(c)
    }

    fn eat(&mut self, expected: u8) -> bool {
        if self.peek() == Some(expected) {
            self.bump();
            true
        } else {
            false
        }
    }

    fn skip_trivia(&mut self) -> Result<(), CompileError> {
        loop {
            match self.peek() {
                Some(b' ' | b'\t' | b'\r' | b'\n' | 0x0B | 0x0C) => {
                    self.bump();
                }
                Some(b'-') if self.peek_at(1) == Some(b'-') => {
                    let start = self.position();
                    self.bump();
                    self.bump();
                    if self.peek() == Some(b'[') {
                        if let Some(level) = self.long_bracket_level() {
                            self.read_long_bracket(level, start)?;
                            continue;
                        }
                    }
                    while let Some(c) = self.peek() {
                        if c == b'\n' {
                            break;
                        }
                        self.bump();
                    }
                }
                _ => return Ok(()),
            }
        }
    }

    /// Count `=` signs of a long bracket opener at the cursor, without consuming.
    fn long_bracket_level(&self) -> Option<usize> {
        if self.peek() != Some(b'[') {
            return None;
        }
        let mut level = 0;
        while self.peek_at(1 + level) == Some(b'=') {
            level += 1;
        }
        if self.peek_at(1 + level) == Some(b'[') {
            Some(level)
        } else {
            None
        }
    }

    fn read_long_bracket(&mut self, level: usize, start: Position) -> Result<String, CompileError> {
        // Consume the opener.
        for _ in 0..level + 2 {
            self.bump();
        }
        // A newline immediately after the opener is skipped (Lua rule).
        if self.peek() == Some(b'\n') {
            self.bump();
        }
        let mut out = Vec::new();
        loop {
            match self.peek() {
                None => return Err(self.error("unterminated long bracket", start)),
                Some(b']') => {
                    let mut eqs = 0;
                    while self.peek_at(1 + eqs) == Some(b'=') {
                        eqs += 1;
                    }
                    if eqs == level && self.peek_at(1 + eqs) == Some(b']') {
                        for _ in 0..level + 2 {
                            self.bump();
                        }
                        return Ok(String::from_utf8_lossy(&out).into_owned());
                    }
                    out.push(b']');
                    self.bump();
                }
                Some(c) => {
                    out.push(c);
                    self.bump();
                }
            }
        }
    }

    fn next_token(&mut self) -> Result<Token, CompileError> {
        self.skip_trivia()?;
        let start = self.position();
        let kind = match self.peek() {
            None => TokenKind::Eof,
            Some(c) => match c {
                b'0'..=b'9' => self.read_number(start)?,
                b'.' if matches!(self.peek_at(1), Some(b'0'..=b'9')) => self.read_number(start)?,
                b'a'..=b'z' | b'A'..=b'Z' | b'_' => self.read_name(),
                b'"' | b'\'' => self.read_short_string(start)?,
                b'[' => {
                    if let Some(level) = self.long_bracket_level() {
                        TokenKind::Str(self.read_long_bracket(level, start)?)
                    } else {
                        self.bump();
                        TokenKind::LBracket
                    }
                }
                _ => self.read_symbol(start)?,
            },
        };
        let end = self.position();
        Ok(Token {
            kind,
            span: Span::new(start, end),
        })
    }

    fn read_name(&mut self) -> TokenKind {
        let begin = self.pos;
        while let Some(c) = self.peek() {
            if c.is_ascii_alphanumeric() || c == b'_' {
                self.bump();
            } else {
                break;
            }
        }
        let text = std::str::from_utf8(&self.src[begin..self.pos]).unwrap_or_default();
        match KEYWORDS.get(text) {
            Some(kw) => kw.clone(),
            None => TokenKind::Name(text.to_string()),
        }
    }

    fn read_number(&mut self, start: Position) -> Result<TokenKind, CompileError> {
        let begin = self.pos;
        if self.peek() == Some(b'0') && matches!(self.peek_at(1), Some(b'x' | b'X')) {
            self.bump();
            self.bump();
            let hex_begin = self.pos;
            while matches!(self.peek(), Some(c) if c.is_ascii_hexdigit()) {
                self.bump();
            }
            if self.pos == hex_begin {
                return Err(self.error("malformed number near '0x'", start));
            }
            let text = std::str::from_utf8(&self.src[hex_begin..self.pos]).unwrap_or_default();
            let value = i64::from_str_radix(text, 16)
                .map_err(|_| self.error(format!("malformed number near '0x{}'", text), start))?;
            return Ok(TokenKind::Int(value));
        }

        let mut is_float = false;
        while matches!(self.peek(), Some(c) if c.is_ascii_digit()) {
            self.bump();
        }
        if self.peek() == Some(b'.') && self.peek_at(1) != Some(b'.') {
            is_float = true;
            self.bump();
            while matches!(self.peek(), Some(c) if c.is_ascii_digit()) {
                self.bump();
            }
        }
        if matches!(self.peek(), Some(b'e' | b'E')) {
            is_float = true;
            self.bump();
            if matches!(self.peek(), Some(b'+' | b'-')) {
                self.bump();
            }
            let exp_begin = self.pos;
            while matches!(self.peek(), Some(c) if c.is_ascii_digit()) {
                self.bump();
            }
            if self.pos == exp_begin {
                return Err(self.error("malformed number: missing exponent digits", start));
            }
        }
        let text = std::str::from_utf8(&self.src[begin..self.pos]).unwrap_or_default();
        if is_float {
            let value = text
                .parse::<f64>()
                .map_err(|_| self.error(format!("malformed number near '{}'", text), start))?;
            Ok(TokenKind::Float(value))
        } else {
            match text.parse::<i64>() {
                Ok(value) => Ok(TokenKind::Int(value)),
                // Integer literals past i64 range fall back to float, like Lua.
                Err(_) => text
                    .parse::<f64>()
                    .map(TokenKind::Float)
                    .map_err(|_| self.error(format!("malformed number near '{}'", text), start)),
            }
        }
    }

    fn read_short_string(&mut self, start: Position) -> Result<TokenKind, CompileError> {
        let quote = self.bump().expect("caller checked quote");
        let mut out = Vec::new();
        loop {
            match self.bump() {
                None => return Err(self.error("unterminated string", start)),
                Some(b'\n') => return Err(self.error("unterminated string", start)),
                Some(c) if c == quote => break,
                Some(b'\\') => {
                    let esc_pos = self.position();
                    match self.bump() {
                        None => return Err(self.error("unterminated string", start)),
                        Some(b'n') => out.push(b'\n'),
                        Some(b't') => out.push(b'\t'),
                        Some(b'r') => out.push(b'\r'),
                        Some(b'a') => out.push(0x07),
                        Some(b'b') => out.push(0x08),
                        Some(b'f') => out.push(0x0C),
                        Some(b'v') => out.push(0x0B),
                        Some(b'\\') => out.push(b'\\'),
                        Some(b'"') => out.push(b'"'),
                        Some(b'\'') => out.push(b'\''),
                        Some(b'\n') => out.push(b'\n'),
                        Some(b'x') => {
                            let mut value: u32 = 0;
                            let mut digits = 0;
                            while digits < 2 {
                                match self.peek() {
                                    Some(c) if c.is_ascii_hexdigit() => {
                                        value = value * 16 + (c as char).to_digit(16).unwrap();
                                        self.bump();
                                        digits += 1;
                                    }
                                    _ => break,
                                }
                            }
                            if digits == 0 {
                                return Err(self.error("hexadecimal digit expected", esc_pos));
                            }
                            out.push(value as u8);
                        }
                        Some(d @ b'0'..=b'9') => {
                            let mut value: u32 = (d - b'0') as u32;
                            let mut digits = 1;
                            while digits < 3 {
                                match self.peek() {
                                    Some(c) if c.is_ascii_digit() => {
                                        value = value * 10 + (c - b'0') as u32;
                                        self.bump();
                                        digits += 1;
                                    }
                                    _ => break,
                                }
                            }
                            if value > 255 {
                                return Err(self.error("decimal escape too large", esc_pos));
                            }
                            out.push(value as u8);
                        }
                        Some(other) => {
                            return Err(self.error(
                                format!("invalid escape sequence '\\{}'", other as char),
                                esc_pos,
                            ));
                        }
                    }
                }
                Some(c) => out.push(c),
            }
        }
        Ok(TokenKind::Str(String::from_utf8_lossy(&out).into_owned()))
    }

    fn read_symbol(&mut self, start: Position) -> Result<TokenKind, CompileError> {
        let c = self.bump().expect("caller checked symbol");
        let kind = match c {
            b'+' => TokenKind::Plus,
            b'-' => TokenKind::Minus,
            b'*' => TokenKind::Star,
            b'/' => {
                if self.eat(b'/') {
                    TokenKind::DoubleSlash
                } else {
                    TokenKind::Slash
                }
            }
            b'%' => TokenKind::Percent,
            b'^' => TokenKind::Caret,
            b'#' => TokenKind::Hash,
            b'&' => TokenKind::Ampersand,
            b'~' => {
                if self.eat(b'=') {
                    TokenKind::Ne
                } else {
                    TokenKind::Tilde
                }
            }
            b'|' => TokenKind::Pipe,
            b'<' => {
                if self.eat(b'=') {
                    TokenKind::Le
                } else if self.eat(b'<') {
                    TokenKind::LtLt
                } else {
                    TokenKind::Lt
                }
            }
            b'>' => {
                if self.eat(b'=') {
                    TokenKind::Ge
                } else if self.eat(b'>') {
                    TokenKind::GtGt
                } else {
                    TokenKind::Gt
                }
            }
            b'=' => {
                if self.eat(b'=') {
                    TokenKind::Eq
                } else {
                    TokenKind::Assign
                }
            }
            b'(' => TokenKind::LParen,
            b')' => TokenKind::RParen,
            b'{' => TokenKind::LBrace,
            b'}' => TokenKind::RBrace,
            b']' => TokenKind::RBracket,
            b':' => {
                if self.eat(b':') {
                    TokenKind::DoubleColon
                } else {
                    TokenKind::Colon
                }
            }
            b';' => TokenKind::Semicolon,
            b',' => TokenKind::Comma,
            b'.' => {
                if self.eat(b'.') {
                    if self.eat(b'.') {
                        TokenKind::Ellipsis
                    } else {
                        TokenKind::Concat
                    }
                } else {
                    TokenKind::Dot
                }
            }
            other => {
                return Err(self.error(
                    format!("unexpected symbol near '{}'", other as char),
                    start,
                ));
            }
        };
        Ok(kind)
    }
}
