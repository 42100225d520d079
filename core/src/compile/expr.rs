//! Expression lowering: single-value evaluation, multi-value contexts,
//! call-site encoding, and short-circuit branching.

use crate::ast::{BinOp, Expr, ExprKind, TableField, UnOp};
use crate::compile::compiler::Compiler;
use crate::token::CompileError;
use crate::val::Value;
use crate::vm::Op;

/// How a call site consumes results.
enum CallResults {
    Discard,
    Single(String),
    List(String),
}

impl Compiler {
    /// Evaluate an expression into a register holding exactly one value.
    pub(crate) fn eval(&mut self, expr: &Expr) -> Result<String, CompileError> {
        self.set_pos(expr.line, expr.col);
        match &expr.kind {
            ExprKind::Nil => Ok(self.load_nil()),
            ExprKind::True => Ok(self.load_const(Value::Bool(true))),
            ExprKind::False => Ok(self.load_const(Value::Bool(false))),
            ExprKind::Int(n) => {
                let reg = self.fresh_temp();
                self.emit(Op::LoadImm(reg.clone(), *n));
                Ok(reg)
            }
            ExprKind::Float(f) => Ok(self.load_const(Value::Float(*f))),
            ExprKind::Str(s) => Ok(self.load_str(s)),
            ExprKind::Vararg => {
                let va = self.vararg_register()?;
                let dst = self.fresh_temp();
                self.emit(Op::VarargFirst(dst.clone(), va));
                Ok(dst)
            }
            ExprKind::Name(name) => {
                let name = name.clone();
                Ok(self.read_var(&name))
            }
            ExprKind::Index { obj, key } => {
                let obj = self.eval(obj)?;
                let key = self.eval(key)?;
                let dst = self.fresh_temp();
                self.emit(Op::TableGet(dst.clone(), obj, key));
                Ok(dst)
            }
            ExprKind::Call { .. } | ExprKind::MethodCall { .. } => {
                let dst = self.fresh_temp();
                self.emit_call(expr, CallResults::Single(dst.clone()))?;
                Ok(dst)
            }
            ExprKind::Function(body) => {
                let (label, cells) = self.compile_function(body, None)?;
                let dst = self.fresh_temp();
                self.emit(Op::Closure(dst.clone(), label, cells));
                Ok(dst)
            }
            ExprKind::Table(fields) => self.eval_table(fields),
            ExprKind::Binary { op, lhs, rhs } => self.eval_binary(*op, lhs, rhs),
            ExprKind::Unary { op, operand } => {
                let src = self.eval(operand)?;
                let dst = self.fresh_temp();
                match op {
                    UnOp::Neg => self.emit(Op::Neg(dst.clone(), src)),
                    UnOp::Not => self.emit(Op::Not(dst.clone(), src)),
                    UnOp::Len => self.emit(Op::Len(dst.clone(), src)),
                    UnOp::BNot => self.emit(Op::NotBit(dst.clone(), src)),
                }
                Ok(dst)
            }
            ExprKind::Paren(inner) => self.eval(inner),
        }
    }

    fn vararg_register(&mut self) -> Result<String, CompileError> {
        self.fns
            .last()
            .and_then(|f| f.vararg_reg.clone())
            .ok_or_else(|| self.err("cannot use '...' outside a vararg function"))
    }

    /// Evaluate a multi-value expression (call or `...`) into a List
    /// register carrying all of its values.
    pub(crate) fn eval_to_list(&mut self, expr: &Expr) -> Result<String, CompileError> {
        self.set_pos(expr.line, expr.col);
        match &expr.kind {
            ExprKind::Call { .. } | ExprKind::MethodCall { .. } => {
                let dst = self.fresh_temp();
                self.emit_call(expr, CallResults::List(dst.clone()))?;
                Ok(dst)
            }
            ExprKind::Vararg => self.vararg_register(),
            _ => {
                // Single-value expression in a list context: route it
                // through the (empty) parameter queue to build a
                // one-element list.
                let reg = self.eval(expr)?;
                self.emit(Op::Param(reg));
                let dst = self.fresh_temp();
                self.emit(Op::Vararg(dst.clone()));
                Ok(dst)
            }
        }
    }

    /// Evaluate an expression list into exactly `want` registers, with the
    /// last expression multi-expanded and missing slots padded with nil.
    pub(crate) fn eval_list_aligned(&mut self, exprs: &[Expr], want: usize) -> Result<Vec<String>, CompileError> {
        let mut regs = Vec::with_capacity(want);
        if exprs.is_empty() {
            for _ in 0..want {
                regs.push(self.load_nil());
            }
            return Ok(regs);
        }
        for expr in &exprs[..exprs.len() - 1] {
            regs.push(self.eval(expr)?);
        }
        let last = exprs.last().expect("non-empty");
        if last.is_multi() && exprs.len() <= want {
            let list = self.eval_to_list(last)?;
            let remaining = want - (exprs.len() - 1);
            for index in 0..remaining {
                let idx = self.fresh_temp();
                self.emit(Op::LoadImm(idx.clone(), index as i64));
                let dst = self.fresh_temp();
                self.emit(Op::ListGet(dst.clone(), list.clone(), idx));
                regs.push(dst);
            }
        } else {
            regs.push(self.eval(last)?);
            while regs.len() < want {
                regs.push(self.load_nil());
            }
        }
        regs.truncate(want);
        Ok(regs)
    }

    pub(crate) fn emit_call_discard(&mut self, expr: &Expr) -> Result<(), CompileError> {
        self.emit_call(expr, CallResults::Discard)
    }

    /// Call-site encoding: arguments evaluate to registers first, then PARAM
    /// in order (PARAM_EXPAND for a trailing multi-value), then CALL_VALUE.
    fn emit_call(&mut self, expr: &Expr, results: CallResults) -> Result<(), CompileError> {
        let (callee_reg, self_reg, args) = match &expr.kind {
            ExprKind::Call { callee, args } => (self.eval(callee)?, None, args),
            ExprKind::MethodCall { obj, name, args } => {
                let obj_reg = self.eval(obj)?;
                let key = self.load_str(name);
                let method = self.fresh_temp();
                self.emit(Op::TableGet(method.clone(), obj_reg.clone(), key));
                (method, Some(obj_reg), args)
            }
            _ => return Err(self.err("internal: not a call expression")),
        };

        let mut arg_regs: Vec<(String, bool)> = Vec::with_capacity(args.len());
        for (index, arg) in args.iter().enumerate() {
            if index == args.len() - 1 && arg.is_multi() {
                arg_regs.push((self.eval_to_list(arg)?, true));
            } else {
                arg_regs.push((self.eval(arg)?, false));
            }
        }

        if let Some(obj) = self_reg {
            self.emit(Op::Param(obj));
        }
        for (reg, expand) in arg_regs {
            if expand {
                self.emit(Op::ParamExpand(reg));
            } else {
                self.emit(Op::Param(reg));
            }
        }
        self.emit(Op::CallValue(callee_reg));
        match results {
            CallResults::Discard => {}
            CallResults::Single(dst) => self.emit(Op::Result(dst)),
            CallResults::List(dst) => self.emit(Op::ResultList(dst)),
        }
        Ok(())
    }

    fn eval_table(&mut self, fields: &[TableField]) -> Result<String, CompileError> {
        let table = self.fresh_temp();
        self.emit(Op::TableNew(table.clone()));
        for (index, field) in fields.iter().enumerate() {
            match field {
                TableField::Positional(value) => {
                    if index == fields.len() - 1 && value.is_multi() {
                        let list = self.eval_to_list(value)?;
                        self.emit(Op::TableExtend(table.clone(), list));
                    } else {
                        let reg = self.eval(value)?;
                        self.emit(Op::TableAppend(table.clone(), reg));
                    }
                }
                TableField::Named(name, value) => {
                    let key = self.load_str(name);
                    let reg = self.eval(value)?;
                    self.emit(Op::TableSet(table.clone(), key, reg));
                }
                TableField::Keyed(key, value) => {
                    let key = self.eval(key)?;
                    let reg = self.eval(value)?;
                    self.emit(Op::TableSet(table.clone(), key, reg));
                }
            }
        }
        Ok(table)
    }

    fn eval_binary(&mut self, op: BinOp, lhs: &Expr, rhs: &Expr) -> Result<String, CompileError> {
        // Short-circuit forms return the deciding operand itself; the
        // AND/OR opcodes (coerced booleans) are not used here.
        match op {
            BinOp::And => {
                let dst = self.fresh_temp();
                let done = self.fresh_label("and");
                let lhs_reg = self.eval(lhs)?;
                self.emit(Op::Mov(dst.clone(), lhs_reg));
                self.emit(Op::Jz(dst.clone(), done.clone()));
                let rhs_reg = self.eval(rhs)?;
                self.emit(Op::Mov(dst.clone(), rhs_reg));
                self.emit(Op::Label(done));
                return Ok(dst);
            }
            BinOp::Or => {
                let dst = self.fresh_temp();
                let done = self.fresh_label("or");
                let lhs_reg = self.eval(lhs)?;
                self.emit(Op::Mov(dst.clone(), lhs_reg));
                self.emit(Op::Jnz(dst.clone(), done.clone()));
                let rhs_reg = self.eval(rhs)?;
                self.emit(Op::Mov(dst.clone(), rhs_reg));
                self.emit(Op::Label(done));
                return Ok(dst);
            }
            _ => {}
        }

        let lhs_reg = self.eval(lhs)?;
        let rhs_reg = self.eval(rhs)?;
        let dst = self.fresh_temp();
        match op {
            BinOp::Add => self.emit(Op::Add(dst.clone(), lhs_reg, rhs_reg)),
            BinOp::Sub => self.emit(Op::Sub(dst.clone(), lhs_reg, rhs_reg)),
            BinOp::Mul => self.emit(Op::Mul(dst.clone(), lhs_reg, rhs_reg)),
            BinOp::Div => {
                // `/` always produces a float; the DIV opcode floor-divides
                // integer pairs, so the dividend is coerced to float first.
                let one = self.load_const(Value::Float(1.0));
                let coerced = self.fresh_temp();
                self.emit(Op::Mul(coerced.clone(), lhs_reg, one));
                self.emit(Op::Div(dst.clone(), coerced, rhs_reg));
            }
            BinOp::IDiv => self.emit(Op::IDiv(dst.clone(), lhs_reg, rhs_reg)),
            BinOp::Mod => self.emit(Op::Mod(dst.clone(), lhs_reg, rhs_reg)),
            BinOp::Pow => self.emit(Op::Pow(dst.clone(), lhs_reg, rhs_reg)),
            BinOp::Concat => self.emit(Op::Concat(dst.clone(), lhs_reg, rhs_reg)),
            BinOp::Eq => self.emit(Op::Eq(dst.clone(), lhs_reg, rhs_reg)),
            BinOp::Ne => {
                let tmp = self.fresh_temp();
                self.emit(Op::Eq(tmp.clone(), lhs_reg, rhs_reg));
                self.emit(Op::Not(dst.clone(), tmp));
            }
            BinOp::Lt => self.emit(Op::Lt(dst.clone(), lhs_reg, rhs_reg)),
            BinOp::Gt => self.emit(Op::Gt(dst.clone(), lhs_reg, rhs_reg)),
            BinOp::Le => {
                // a <= b  ==  not (b < a)
                let tmp = self.fresh_temp();
                self.emit(Op::Gt(tmp.clone(), lhs_reg, rhs_reg));
                self.emit(Op::Not(dst.clone(), tmp));
            }
            BinOp::Ge => {
                let tmp = self.fresh_temp();
                self.emit(Op::Lt(tmp.clone(), lhs_reg, rhs_reg));
                self.emit(Op::Not(dst.clone(), tmp));
            }
            BinOp::BAnd => self.emit(Op::AndBit(dst.clone(), lhs_reg, rhs_reg)),
            BinOp::BOr => self.emit(Op::OrBit(dst.clone(), lhs_reg, rhs_reg)),
            BinOp::BXor => self.emit(Op::Xor(dst.clone(), lhs_reg, rhs_reg)),
            BinOp::Shl => self.emit(Op::Shl(dst.clone(), lhs_reg, rhs_reg)),
            BinOp::Shr => self.emit(Op::Shr(dst.clone(), lhs_reg, rhs_reg)),
            BinOp::And | BinOp::Or => unreachable!("handled above"),
        }
        Ok(dst)
    }
}
