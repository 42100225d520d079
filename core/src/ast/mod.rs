//! AST for the Lua subset, produced by the parser and consumed by the
//! capture analyzer and the bytecode compiler.

mod parser;


pub use parser::{parse, Parser};

#[derive(Debug, Clone)]
pub struct Chunk {
    pub body: Block,
}

#[derive(Debug, Clone, Default)]
pub struct Block {
    pub stmts: Vec<Stmt>,
}

#[derive(Debug, Clone)]
pub struct Stmt {
    pub kind: StmtKind,
    pub line: u32,
    pub col: u32,
}

#[derive(Debug, Clone)]
pub enum StmtKind {
    /// `local a, b = e1, e2` — names may outnumber values.
    Local { names: Vec<String>, values: Vec<Expr> },
    /// `a, t[k], b.c = e1, e2` — targets are Name/Index expressions.
    Assign { targets: Vec<Expr>, values: Vec<Expr> },
    ExprStmt(Expr),
    Do(Block),
    While { cond: Expr, body: Block },
    Repeat { body: Block, cond: Expr },
    If { arms: Vec<(Expr, Block)>, else_body: Option<Block> },
    NumericFor {
        var: String,
        start: Expr,
        limit: Expr,
        step: Option<Expr>,
        body: Block,
    },
    GenericFor {
        names: Vec<String>,
        exprs: Vec<Expr>,
        body: Block,
    },
    /// `function a.b.c:m(...) ... end`
    Function { name: FunctionName, body: FunctionBody },
    LocalFunction { name: String, body: FunctionBody },
    Return(Vec<Expr>),
    Break,
    Goto(String),
    Label(String),
}

/// Target of a `function` statement: `base(.path)*(:method)?`.
#[derive(Debug, Clone)]
pub struct FunctionName {
    pub base: String,
    pub path: Vec<String>,
    pub method: Option<String>,
}

impl FunctionName {
    pub fn display(&self) -> String {
        let mut out = self.base.clone();
        for part in &self.path {
            out.push('.');
            out.push_str(part);
        }
        if let Some(m) = &self.method {
            out.push(':');
            out.push_str(m);
        }
        out
    }
}

#[derive(Debug, Clone)]
pub struct FunctionBody {
    /// Unique per chunk; keys the capture-analysis table.
    pub fn_id: usize,
    pub params: Vec<String>,
    pub is_vararg: bool,
    pub body: Block,
    pub line: u32,
}

#[derive(Debug, Clone)]
pub struct Expr {
    pub kind: ExprKind,
    pub line: u32,
    pub col: u32,
}

#[derive(Debug, Clone)]
pub enum ExprKind {
    Nil,
    True,
    False,
    Int(i64),
    Float(f64),
    Str(String),
    Vararg,
    Name(String),
    /// `t[k]`; field access `t.k` is sugar with a string key.
    Index { obj: Box<Expr>, key: Box<Expr> },
    Call { callee: Box<Expr>, args: Vec<Expr> },
    /// `obj:name(args)` — obj is evaluated once and passed as first argument.
    MethodCall {
        obj: Box<Expr>,
        name: String,
        args: Vec<Expr>,
    },
    Function(FunctionBody),
    Table(Vec<TableField>),
    Binary {
        op: BinOp,
        lhs: Box<Expr>,
        rhs: Box<Expr>,
    },
    Unary { op: UnOp, operand: Box<Expr> },
    /// `(e)` — truncates a multi-value expression to one value.
    Paren(Box<Expr>),
}

impl Expr {
    /// Whether the expression may yield multiple values in tail position.
    pub fn is_multi(&self) -> bool {
        matches!(
            self.kind,
            ExprKind::Call { .. } | ExprKind::MethodCall { .. } | ExprKind::Vararg
        )
    }
}

#[derive(Debug, Clone)]
pub enum TableField {
    Positional(Expr),
    Named(String, Expr),
    Keyed(Expr, Expr),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    IDiv,
    Mod,
    Pow,
    Concat,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    And,
    Or,
    BAnd,
    BOr,
    BXor,
    Shl,
    Shr,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnOp {
    Neg,
    Not,
    Len,
    BNot,
}
