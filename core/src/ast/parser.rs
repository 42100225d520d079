use crate::ast::*;
use crate::token::{tokenize, CompileError, Span, Token, TokenKind};

/// Parse a chunk of Lua source into an AST.
pub fn parse(source: &str, chunk_name: &str) -> Result<Chunk, CompileError> {
    let tokens = tokenize(source, chunk_name)?;
    Parser::new(tokens, chunk_name).parse_chunk()
}

pub struct Parser {
    tokens: Vec<Token>,
    pos: usize,
    chunk_name: String,
    next_fn_id: usize,
}

impl Parser {
    pub fn new(tokens: Vec<Token>, chunk_name: &str) -> Self {
        Self {
            tokens,
            pos: 0,
            chunk_name: chunk_name.to_string(),
            next_fn_id: 0,
        }
    }

    pub fn parse_chunk(mut self) -> Result<Chunk, CompileError> {
        let body = self.parse_block()?;
        self.expect_kind(&TokenKind::Eof)?;
        Ok(Chunk { body })
    }

    // ------------------------------------------------------------ cursor

    fn peek(&self) -> &TokenKind {
        &self.tokens[self.pos.min(self.tokens.len() - 1)].kind
    }

    fn peek_span(&self) -> Span {
        self.tokens[self.pos.min(self.tokens.len() - 1)].span
    }

    fn advance(&mut self) -> TokenKind {
        let token = self.tokens[self.pos.min(self.tokens.len() - 1)].kind.clone();
        if self.pos < self.tokens.len() - 1 {
            self.pos += 1;
        }
        token
    }

    fn check(&self, kind: &TokenKind) -> bool {
        self.peek() == kind
    }

    fn eat(&mut self, kind: &TokenKind) -> bool {
        if self.check(kind) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn error(&self, message: impl Into<String>) -> CompileError {
        CompileError::new(message, &self.chunk_name, self.peek_span().start)
    }

    fn expect_kind(&mut self, kind: &TokenKind) -> Result<(), CompileError> {
        if self.eat(kind) {
            Ok(())
        } else {
            Err(self.error(format!(
                "{} expected near {}",
                kind.describe(),
                self.peek().describe()
            )))
        }
    }

    fn expect_name(&mut self) -> Result<String, CompileError> {
        match self.peek().clone() {
            TokenKind::Name(n) => {
                self.advance();
                Ok(n)
            }
            other => Err(self.error(format!("<name> expected near {}", other.describe()))),
        }
    }

    fn fresh_fn_id(&mut self) -> usize {
        let id = self.next_fn_id;
        self.next_fn_id += 1;
        id
    }

    fn stmt(&self, kind: StmtKind, span: Span) -> Stmt {
        Stmt {
            kind,
            line: span.start.line,
            col: span.start.column,
        }
    }

    fn expr(&self, kind: ExprKind, span: Span) -> Expr {
        Expr {
            kind,
            line: span.start.line,
            col: span.start.column,
        }
    }

    // ------------------------------------------------------------ blocks

    fn block_ends(&self) -> bool {
        matches!(
            self.peek(),
            TokenKind::Eof
                | TokenKind::End
                | TokenKind::Else
                | TokenKind::Elseif
                | TokenKind::Until
        )
    }

    fn parse_block(&mut self) -> Result<Block, CompileError> {
        let mut stmts = Vec::new();
        loop {
            if self.block_ends() {
                return Ok(Block { stmts });
            }
            if self.eat(&TokenKind::Semicolon) {
                continue;
            }
            if self.check(&TokenKind::Return) {
                stmts.push(self.parse_return()?);
                // `return` closes the block; allow a trailing semicolon.
                self.eat(&TokenKind::Semicolon);
                return Ok(Block { stmts });
            }
            stmts.push(self.parse_statement()?);
        }
    }

    fn parse_return(&mut self) -> Result<Stmt, CompileError> {
        let span = self.peek_span();
        self.expect_kind(&TokenKind::Return)?;
        let values = if self.block_ends() || self.check(&TokenKind::Semicolon) {
            Vec::new()
        } else {
            self.parse_expr_list()?
        };
        Ok(self.stmt(StmtKind::Return(values), span))
    }

    // ------------------------------------------------------------ statements

    fn parse_statement(&mut self) -> Result<Stmt, CompileError> {
        let span = self.peek_span();
        match self.peek().clone() {
            TokenKind::Local => self.parse_local(span),
            TokenKind::If => self.parse_if(span),
            TokenKind::While => self.parse_while(span),
            TokenKind::Repeat => self.parse_repeat(span),
            TokenKind::For => self.parse_for(span),
            TokenKind::Function => self.parse_function_stmt(span),
            TokenKind::Do => {
                self.advance();
                let body = self.parse_block()?;
                self.expect_kind(&TokenKind::End)?;
                Ok(self.stmt(StmtKind::Do(body), span))
            }
            TokenKind::Break => {
                self.advance();
                Ok(self.stmt(StmtKind::Break, span))
            }
            TokenKind::Goto => {
                self.advance();
                let label = self.expect_name()?;
                Ok(self.stmt(StmtKind::Goto(label), span))
            }
            TokenKind::DoubleColon => {
                self.advance();
                let label = self.expect_name()?;
                self.expect_kind(&TokenKind::DoubleColon)?;
                Ok(self.stmt(StmtKind::Label(label), span))
            }
            _ => self.parse_expr_statement(span),
        }
    }

    fn parse_local(&mut self, span: Span) -> Result<Stmt, CompileError> {
        self.expect_kind(&TokenKind::Local)?;
        if self.eat(&TokenKind::Function) {
            let name = self.expect_name()?;
            let body = self.parse_function_body(span.start.line)?;
            return Ok(self.stmt(StmtKind::LocalFunction { name, body }, span));
        }
        let mut names = vec![self.expect_name()?];
        while self.eat(&TokenKind::Comma) {
            names.push(self.expect_name()?);
        }
        let values = if self.eat(&TokenKind::Assign) {
            self.parse_expr_list()?
        } else {
            Vec::new()
        };
        Ok(self.stmt(StmtKind::Local { names, values }, span))
    }

    fn parse_if(&mut self, span: Span) -> Result<Stmt, CompileError> {
        self.expect_kind(&TokenKind::If)?;
        let mut arms = Vec::new();
        let cond = self.parse_expr()?;
        self.expect_kind(&TokenKind::Then)?;
        arms.push((cond, self.parse_block()?));
        let mut else_body = None;
        loop {
            if self.eat(&TokenKind::Elseif) {
                let cond = self.parse_expr()?;
                self.expect_kind(&TokenKind::Then)?;
                arms.push((cond, self.parse_block()?));
            } else if self.eat(&TokenKind::Else) {
                else_body = Some(self.parse_block()?);
                self.expect_kind(&TokenKind::End)?;
                break;
            } else {
                self.expect_kind(&TokenKind::End)?;
                break;
            }
        }
        Ok(self.stmt(StmtKind::If { arms, else_body }, span))
    }

    fn parse_while(&mut self, span: Span) -> Result<Stmt, CompileError> {
        self.expect_kind(&TokenKind::While)?;
        let cond = self.parse_expr()?;
        self.expect_kind(&TokenKind::Do)?;
        let body = self.parse_block()?;
        self.expect_kind(&TokenKind::End)?;
        Ok(self.stmt(StmtKind::While { cond, body }, span))
    }

    fn parse_repeat(&mut self, span: Span) -> Result<Stmt, CompileError> {
        self.expect_kind(&TokenKind::Repeat)?;
        let body = self.parse_block()?;
        self.expect_kind(&TokenKind::Until)?;
        let cond = self.parse_expr()?;
        Ok(self.stmt(StmtKind::Repeat { body, cond }, span))
    }

    fn parse_for(&mut self, span: Span) -> Result<Stmt, CompileError> {
        self.expect_kind(&TokenKind::For)?;
        let first = self.expect_name()?;
        if self.eat(&TokenKind::Assign) {
            let start = self.parse_expr()?;
            self.expect_kind(&TokenKind::Comma)?;
            let limit = self.parse_expr()?;
            let step = if self.eat(&TokenKind::Comma) {
                Some(self.parse_expr()?)
            } else {
                None
            };
            self.expect_kind(&TokenKind::Do)?;
            let body = self.parse_block()?;
            self.expect_kind(&TokenKind::End)?;
            return Ok(self.stmt(
                StmtKind::NumericFor {
                    var: first,
                    start,
                    limit,
                    step,
                    body,
                },
                span,
            ));
        }
        let mut names = vec![first];
        while self.eat(&TokenKind::Comma) {
            names.push(self.expect_name()?);
        }
        self.expect_kind(&TokenKind::In)?;
        let exprs = self.parse_expr_list()?;
        self.expect_kind(&TokenKind::Do)?;
        let body = self.parse_block()?;
        self.expect_kind(&TokenKind::End)?;
        Ok(self.stmt(StmtKind::GenericFor { names, exprs, body }, span))
    }

    fn parse_function_stmt(&mut self, span: Span) -> Result<Stmt, CompileError> {
        self.expect_kind(&TokenKind::Function)?;
        let base = self.expect_name()?;
        let mut path = Vec::new();
        while self.eat(&TokenKind::Dot) {
            path.push(self.expect_name()?);
        }
        let method = if self.eat(&TokenKind::Colon) {
            Some(self.expect_name()?)
        } else {
            None
        };
        let name = FunctionName { base, path, method };
        let mut body = self.parse_function_body(span.start.line)?;
        if name.method.is_some() {
            body.params.insert(0, "self".to_string());
        }
        Ok(self.stmt(StmtKind::Function { name, body }, span))
    }

    fn parse_function_body(&mut self, line: u32) -> Result<FunctionBody, CompileError> {
        let fn_id = self.fresh_fn_id();
        self.expect_kind(&TokenKind::LParen)?;
        let mut params = Vec::new();
        let mut is_vararg = false;
        if !self.check(&TokenKind::RParen) {
            loop {
                if self.eat(&TokenKind::Ellipsis) {
                    is_vararg = true;
                    break;
                }
                params.push(self.expect_name()?);
                if !self.eat(&TokenKind::Comma) {
                    break;
                }
            }
        }
        self.expect_kind(&TokenKind::RParen)?;
        let body = self.parse_block()?;
        self.expect_kind(&TokenKind::End)?;
        Ok(FunctionBody {
            fn_id,
            params,
            is_vararg,
            body,
            line,
        })
    }

    fn parse_expr_statement(&mut self, span: Span) -> Result<Stmt, CompileError> {
        let first = self.parse_prefix_expr()?;
        if self.check(&TokenKind::Assign) || self.check(&TokenKind::Comma) {
            let mut targets = vec![first];
            while self.eat(&TokenKind::Comma) {
                targets.push(self.parse_prefix_expr()?);
            }
            for target in &targets {
                if !matches!(target.kind, ExprKind::Name(_) | ExprKind::Index { .. }) {
                    return Err(CompileError::at_line(
                        "cannot assign to this expression",
                        &self.chunk_name,
                        target.line,
                        target.col,
                    ));
                }
            }
            self.expect_kind(&TokenKind::Assign)?;
            let values = self.parse_expr_list()?;
            return Ok(self.stmt(StmtKind::Assign { targets, values }, span));
        }
        if !matches!(first.kind, ExprKind::Call { .. } | ExprKind::MethodCall { .. }) {
            return Err(self.error("syntax error: expression is not a statement"));
        }
        Ok(self.stmt(StmtKind::ExprStmt(first), span))
    }

    // ------------------------------------------------------------ expressions

    fn parse_expr_list(&mut self) -> Result<Vec<Expr>, CompileError> {
        let mut exprs = vec![self.parse_expr()?];
        while self.eat(&TokenKind::Comma) {
            exprs.push(self.parse_expr()?);
        }
        Ok(exprs)
    }

    pub fn parse_expr(&mut self) -> Result<Expr, CompileError> {
        self.parse_binary(0)
    }

    fn parse_binary(&mut self, min_prec: u8) -> Result<Expr, CompileError> {
        let mut lhs = self.parse_unary()?;
        while let Some((op, prec, right_assoc)) = binary_op(self.peek()) {
            if prec < min_prec {
                break;
            }
            let span = self.peek_span();
            self.advance();
            let next_min = if right_assoc { prec } else { prec + 1 };
            let rhs = self.parse_binary(next_min)?;
            lhs = self.expr(
                ExprKind::Binary {
                    op,
                    lhs: Box::new(lhs),
                    rhs: Box::new(rhs),
                },
                span,
            );
        }
        Ok(lhs)
    }

    fn parse_unary(&mut self) -> Result<Expr, CompileError> {
        let span = self.peek_span();
        let op = match self.peek() {
            TokenKind::Not => Some(UnOp::Not),
            TokenKind::Minus => Some(UnOp::Neg),
            TokenKind::Hash => Some(UnOp::Len),
            TokenKind::Tilde => Some(UnOp::BNot),
            _ => None,
        };
        if let Some(op) = op {
            self.advance();
            // Unary binds tighter than any binary operator except `^`.
            let operand = self.parse_binary(UNARY_PRECEDENCE)?;
            return Ok(self.expr(
                ExprKind::Unary {
                    op,
                    operand: Box::new(operand),
                },
                span,
            ));
        }
        self.parse_power()
    }

    fn parse_power(&mut self) -> Result<Expr, CompileError> {
        let base = self.parse_simple_expr()?;
        if self.check(&TokenKind::Caret) {
            let span = self.peek_span();
            self.advance();
            // `^` is right-associative and binds tighter than unary on its right.
            let exponent = self.parse_unary()?;
            return Ok(self.expr(
                ExprKind::Binary {
                    op: BinOp::Pow,
                    lhs: Box::new(base),
                    rhs: Box::new(exponent),
                },
                span,
            ));
        }
        Ok(base)
    }

    fn parse_simple_expr(&mut self) -> Result<Expr, CompileError> {
        let span = self.peek_span();
        let kind = match self.peek().clone() {
            TokenKind::Nil => {
                self.advance();
                ExprKind::Nil
            }
            TokenKind::True => {
                self.advance();
                ExprKind::True
            }
            TokenKind::False => {
                self.advance();
                ExprKind::False
            }
            TokenKind::Int(n) => {
                self.advance();
                ExprKind::Int(n)
            }
            TokenKind::Float(n) => {
                self.advance();
                ExprKind::Float(n)
            }
            TokenKind::Str(s) => {
                self.advance();
                ExprKind::Str(s)
            }
            TokenKind::Ellipsis => {
                self.advance();
                ExprKind::Vararg
            }
            TokenKind::Function => {
                self.advance();
                ExprKind::Function(self.parse_function_body(span.start.line)?)
            }
            TokenKind::LBrace => return self.parse_table(span),
            _ => return self.parse_prefix_expr(),
        };
        Ok(self.expr(kind, span))
    }

    fn parse_table(&mut self, span: Span) -> Result<Expr, CompileError> {
        self.expect_kind(&TokenKind::LBrace)?;
        let mut fields = Vec::new();
        while !self.check(&TokenKind::RBrace) {
            match self.peek().clone() {
                TokenKind::LBracket => {
                    self.advance();
                    let key = self.parse_expr()?;
                    self.expect_kind(&TokenKind::RBracket)?;
                    self.expect_kind(&TokenKind::Assign)?;
                    let value = self.parse_expr()?;
                    fields.push(TableField::Keyed(key, value));
                }
                TokenKind::Name(name) if self.tokens[self.pos + 1].kind == TokenKind::Assign => {
                    self.advance();
                    self.advance();
                    let value = self.parse_expr()?;
                    fields.push(TableField::Named(name, value));
                }
                _ => {
                    fields.push(TableField::Positional(self.parse_expr()?));
                }
            }
            if !self.eat(&TokenKind::Comma) && !self.eat(&TokenKind::Semicolon) {
                break;
            }
        }
        self.expect_kind(&TokenKind::RBrace)?;
        Ok(self.expr(ExprKind::Table(fields), span))
    }

    fn parse_prefix_expr(&mut self) -> Result<Expr, CompileError> {
        let span = self.peek_span();
        let mut expr = match self.peek().clone() {
            TokenKind::Name(name) => {
                self.advance();
                self.expr(ExprKind::Name(name), span)
            }
            TokenKind::LParen => {
                self.advance();
                let inner = self.parse_expr()?;
                self.expect_kind(&TokenKind::RParen)?;
                self.expr(ExprKind::Paren(Box::new(inner)), span)
            }
            other => {
                return Err(self.error(format!("unexpected symbol near {}", other.describe())));
            }
        };

        loop {
            let span = self.peek_span();
            match self.peek().clone() {
                TokenKind::Dot => {
                    self.advance();
                    let name = self.expect_name()?;
                    let key = self.expr(ExprKind::Str(name), span);
                    expr = self.expr(
                        ExprKind::Index {
                            obj: Box::new(expr),
                            key: Box::new(key),
                        },
                        span,
                    );
                }
                TokenKind::LBracket => {
                    self.advance();
                    let key = self.parse_expr()?;
                    self.expect_kind(&TokenKind::RBracket)?;
                    expr = self.expr(
                        ExprKind::Index {
                            obj: Box::new(expr),
                            key: Box::new(key),
                        },
                        span,
                    );
                }
                TokenKind::Colon => {
                    self.advance();
                    let name = self.expect_name()?;
                    let args = self.parse_call_args()?;
                    expr = self.expr(
                        ExprKind::MethodCall {
                            obj: Box::new(expr),
                            name,
                            args,
                        },
                        span,
                    );
                }
                TokenKind::LParen | TokenKind::Str(_) | TokenKind::LBrace => {
                    let args = self.parse_call_args()?;
                    expr = self.expr(
                        ExprKind::Call {
                            callee: Box::new(expr),
                            args,
                        },
                        span,
                    );
                }
                _ => return Ok(expr),
            }
        }
    }

    fn parse_call_args(&mut self) -> Result<Vec<Expr>, CompileError> {
        let span = self.peek_span();
        match self.peek().clone() {
            TokenKind::LParen => {
                self.advance();
                let args = if self.check(&TokenKind::RParen) {
                    Vec::new()
                } else {
                    self.parse_expr_list()?
                };
                self.expect_kind(&TokenKind::RParen)?;
                Ok(args)
            }
            TokenKind::Str(s) => {
                self.advance();
                Ok(vec![self.expr(ExprKind::Str(s), span)])
            }
            TokenKind::LBrace => Ok(vec![self.parse_table(span)?]),
            other => Err(self.error(format!("function arguments expected near {}", other.describe()))),
        }
    }
}

const UNARY_PRECEDENCE: u8 = 12;

/// Returns (operator, precedence, right-associative).
fn binary_op(token: &TokenKind) -> Option<(BinOp, u8, bool)> {
    let entry = match token {
        TokenKind::Or => (BinOp::Or, 1, false),
        TokenKind::And => (BinOp::And, 2, false),
        TokenKind::Lt => (BinOp::Lt, 3, false),
        TokenKind::Gt => (BinOp::Gt, 3, false),
        TokenKind::Le => (BinOp::Le, 3, false),
        TokenKind::Ge => (BinOp::Ge, 3, false),
        TokenKind::Ne => (BinOp::Ne, 3, false),
        TokenKind::Eq => (BinOp::Eq, 3, false),
        TokenKind::Pipe => (BinOp::BOr, 4, false),
        TokenKind::Tilde => (BinOp::BXor, 5, false),
        TokenKind::Ampersand => (BinOp::BAnd, 6, false),
        TokenKind::LtLt => (BinOp::Shl, 7, false),
        TokenKind::GtGt => (BinOp::Shr, 7, false),
        TokenKind::Concat => (BinOp::Concat, 9, true),
        TokenKind::Plus => (BinOp::Add, 10, false),
        TokenKind::Minus => (BinOp::Sub, 10, false),
        TokenKind::Star => (BinOp::Mul, 11, false),
        TokenKind::Slash => (BinOp::Div, 11, false),
        TokenKind::DoubleSlash => (BinOp::IDiv, 11, false),
        TokenKind::Percent => (BinOp::Mod, 11, false),
        _ => return None,
    };
    Some(entry)
}
