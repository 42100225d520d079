//! Closure-capture analysis: free-variable detection and upvalue lists.
//!
//! One pass over the AST builds a [`FunctionInfo`] per function scope.
//! A name referenced by an inner function marks the declaring function's
//! local as *captured* (it gets cell storage) and joins the inner
//! function's upvalue list in first-use order.

use std::collections::{HashMap, HashSet};

use crate::ast::{Block, Chunk, Expr, ExprKind, FunctionBody, Stmt, StmtKind, TableField};

#[derive(Debug, Clone, Default)]
pub struct FunctionInfo {
    /// Locals of this function referenced by inner functions; stored in
    /// cells instead of plain registers.
    pub captured: HashSet<String>,
    /// Free names resolved in enclosing functions, in first-use order.
    pub upvalues: Vec<String>,
    pub is_vararg: bool,
}

/// Per-function lexical scope during the walk. Locals are tracked flat per
/// function: capture analysis only needs name-level precision, since
/// storage decisions are made per declaration by the compiler.
struct Scope {
    locals: HashSet<String>,
    captured: HashSet<String>,
    free_order: Vec<String>,
    free_set: HashSet<String>,
}

impl Scope {
    fn new() -> Self {
        Self {
            locals: HashSet::new(),
            captured: HashSet::new(),
            free_order: Vec::new(),
            free_set: HashSet::new(),
        }
    }

    fn declare(&mut self, name: &str) {
        self.locals.insert(name.to_string());
    }

    fn use_name(&mut self, name: &str) {
        if self.locals.contains(name) {
            return;
        }
        if self.free_set.insert(name.to_string()) {
            self.free_order.push(name.to_string());
        }
    }

    /// A child function's upvalues either capture our locals or pass
    /// through as our own free names.
    fn propagate_child_upvalues(&mut self, names: &[String]) {
        for name in names {
            if self.locals.contains(name) {
                self.captured.insert(name.clone());
            } else {
                self.use_name(name);
            }
        }
    }
}

pub struct Analysis {
    pub functions: HashMap<usize, FunctionInfo>,
    pub root: FunctionInfo,
}

pub fn analyze(chunk: &Chunk) -> Analysis {
    let mut mapping = HashMap::new();
    let mut scopes = vec![Scope::new()];
    analyze_block(&chunk.body, &mut scopes, &mut mapping);
    let root_scope = scopes.pop().expect("root scope");
    let root = FunctionInfo {
        captured: root_scope.captured,
        upvalues: Vec::new(),
        is_vararg: true,
    };
    Analysis {
        functions: mapping,
        root,
    }
}

fn analyze_function(
    body: &FunctionBody,
    scopes: &mut Vec<Scope>,
    mapping: &mut HashMap<usize, FunctionInfo>,
) {
    let mut child = Scope::new();
    for param in &body.params {
        child.declare(param);
    }
    scopes.push(child);
    analyze_block(&body.body, scopes, mapping);
    let child = scopes.pop().expect("function scope");

    let upvalues: Vec<String> = child
        .free_order
        .iter()
        .filter(|name| resolved_in_parents_with(scopes, name))
        .cloned()
        .collect();
    let info = FunctionInfo {
        captured: child.captured,
        upvalues: upvalues.clone(),
        is_vararg: body.is_vararg,
    };
    mapping.insert(body.fn_id, info);
    scopes
        .last_mut()
        .expect("parent scope")
        .propagate_child_upvalues(&upvalues);
}

fn resolved_in_parents_with(scopes: &[Scope], name: &str) -> bool {
    scopes
        .iter()
        .rev()
        .any(|scope| scope.locals.contains(name) || scope.captured.contains(name))
}

fn analyze_block(block: &Block, scopes: &mut Vec<Scope>, mapping: &mut HashMap<usize, FunctionInfo>) {
    for stmt in &block.stmts {
        analyze_stmt(stmt, scopes, mapping);
    }
}

fn analyze_stmt(stmt: &Stmt, scopes: &mut Vec<Scope>, mapping: &mut HashMap<usize, FunctionInfo>) {
    match &stmt.kind {
        StmtKind::Local { names, values } => {
            for value in values {
                analyze_expr(value, scopes, mapping);
            }
            for name in names {
                scopes.last_mut().unwrap().declare(name);
            }
        }
        StmtKind::Assign { targets, values } => {
            for target in targets {
                analyze_expr(target, scopes, mapping);
            }
            for value in values {
                analyze_expr(value, scopes, mapping);
            }
        }
        StmtKind::ExprStmt(expr) => analyze_expr(expr, scopes, mapping),
        StmtKind::Do(body) => analyze_block(body, scopes, mapping),
        StmtKind::While { cond, body } => {
            analyze_expr(cond, scopes, mapping);
            analyze_block(body, scopes, mapping);
        }
        StmtKind::Repeat { body, cond } => {
            analyze_block(body, scopes, mapping);
            analyze_expr(cond, scopes, mapping);
        }
        StmtKind::If { arms, else_body } => {
            for (cond, body) in arms {
                analyze_expr(cond, scopes, mapping);
                analyze_block(body, scopes, mapping);
            }
            if let Some(body) = else_body {
                analyze_block(body, scopes, mapping);
            }
        }
        StmtKind::NumericFor {
            var,
            start,
            limit,
            step,
            body,
        } => {
            analyze_expr(start, scopes, mapping);
            analyze_expr(limit, scopes, mapping);
            if let Some(step) = step {
                analyze_expr(step, scopes, mapping);
            }
            scopes.last_mut().unwrap().declare(var);
            analyze_block(body, scopes, mapping);
        }
        StmtKind::GenericFor { names, exprs, body } => {
            for expr in exprs {
                analyze_expr(expr, scopes, mapping);
            }
            for name in names {
                scopes.last_mut().unwrap().declare(name);
            }
            analyze_block(body, scopes, mapping);
        }
        StmtKind::Function { name, body } => {
            scopes.last_mut().unwrap().use_name(&name.base);
            analyze_function(body, scopes, mapping);
        }
        StmtKind::LocalFunction { name, body } => {
            scopes.last_mut().unwrap().declare(name);
            analyze_function(body, scopes, mapping);
        }
        StmtKind::Return(values) => {
            for value in values {
                analyze_expr(value, scopes, mapping);
            }
        }
        StmtKind::Break | StmtKind::Goto(_) | StmtKind::Label(_) => {}
    }
}

fn analyze_expr(expr: &Expr, scopes: &mut Vec<Scope>, mapping: &mut HashMap<usize, FunctionInfo>) {
    match &expr.kind {
        ExprKind::Name(name) => scopes.last_mut().unwrap().use_name(name),
        ExprKind::Index { obj, key } => {
            analyze_expr(obj, scopes, mapping);
            analyze_expr(key, scopes, mapping);
        }
        ExprKind::Call { callee, args } => {
            analyze_expr(callee, scopes, mapping);
            for arg in args {
                analyze_expr(arg, scopes, mapping);
            }
        }
        ExprKind::MethodCall { obj, args, .. } => {
            analyze_expr(obj, scopes, mapping);
            for arg in args {
                analyze_expr(arg, scopes, mapping);
            }
        }
        ExprKind::Function(body) => analyze_function(body, scopes, mapping),
        ExprKind::Table(fields) => {
            for field in fields {
                match field {
                    TableField::Positional(value) => analyze_expr(value, scopes, mapping),
                    TableField::Named(_, value) => analyze_expr(value, scopes, mapping),
                    TableField::Keyed(key, value) => {
                        analyze_expr(key, scopes, mapping);
                        analyze_expr(value, scopes, mapping);
                    }
                }
            }
        }
        ExprKind::Binary { lhs, rhs, .. } => {
            analyze_expr(lhs, scopes, mapping);
            analyze_expr(rhs, scopes, mapping);
        }
        ExprKind::Unary { operand, .. } => analyze_expr(operand, scopes, mapping),
        ExprKind::Paren(inner) => analyze_expr(inner, scopes, mapping),
        ExprKind::Nil
        | ExprKind::True
        | ExprKind::False
        | ExprKind::Int(_)
        | ExprKind::Float(_)
        | ExprKind::Str(_)
        | ExprKind::Vararg => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::parse;

    fn analyze_src(src: &str) -> Analysis {
        analyze(&parse(src, "test.lua").expect("parse"))
    }

    #[test]
    fn test_counter_capture() {
        let analysis = analyze_src(
            "function mk() local x = 0 return function() x = x + 1 return x end end",
        );
        // Outer function (fn_id 0) has x captured; inner (fn_id 1) lists it
        // as an upvalue.
        let outer = &analysis.functions[&0];
        assert!(outer.captured.contains("x"));
        let inner = &analysis.functions[&1];
        assert_eq!(inner.upvalues, vec!["x".to_string()]);
    }

    #[test]
    fn test_globals_are_not_upvalues() {
        let analysis = analyze_src("local f = function() return print end");
        let inner = &analysis.functions[&0];
        assert!(inner.upvalues.is_empty());
    }

    #[test]
    fn test_upvalue_order_is_first_use() {
        let analysis = analyze_src(
            "local a, b = 1, 2 local f = function() return b + a end",
        );
        let inner = &analysis.functions[&0];
        assert_eq!(inner.upvalues, vec!["b".to_string(), "a".to_string()]);
    }

    #[test]
    fn test_capture_through_two_levels() {
        let analysis = analyze_src(
            "local x = 1 local f = function() return function() return x end end",
        );
        assert!(analysis.root.captured.contains("x"));
        // The middle function passes x through as its own upvalue.
        let middle = &analysis.functions[&0];
        assert!(middle.upvalues.contains(&"x".to_string()));
        let inner = &analysis.functions[&1];
        assert!(inner.upvalues.contains(&"x".to_string()));
    }

    #[test]
    fn test_for_var_capture_marks_root() {
        let analysis = analyze_src(
            "local t = {} for i = 1, 3 do t[i] = function() return i end end",
        );
        assert!(analysis.root.captured.contains("i"));
    }
}
