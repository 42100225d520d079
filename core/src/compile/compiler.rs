//! The bytecode compiler: scope stack, cell-based captured locals,
//! goto/label resolution, and loop lowering.

use std::collections::HashMap;
use std::rc::Rc;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::ast::{Block, Chunk, Expr, ExprKind, FunctionBody, FunctionName, Stmt, StmtKind};
use crate::compile::analysis::{Analysis, FunctionInfo};
use crate::token::CompileError;
use crate::val::Value;
use crate::vm::{DebugInfo, FunctionMeta, Instruction, Label, Op, Program};

/// Chunk ids are process-global so labels from separately compiled chunks
/// never collide inside one VM (`load` attaches chunks at runtime).
static CHUNK_COUNTER: AtomicU64 = AtomicU64::new(0);

#[derive(Debug, Clone)]
pub(crate) enum Storage {
    /// Plain register; the variable is only read in its own frame.
    Reg(String),
    /// Register holding a Cell; reads and writes go through the cell.
    Cell(String),
}

pub(crate) struct LabelRec {
    name: String,
    target: Label,
    locals_before: usize,
}

pub(crate) struct GotoRec {
    name: String,
    placeholder: Label,
    locals_at: usize,
    line: u32,
    col: u32,
}

#[derive(Default)]
pub(crate) struct BlockCtx {
    labels: Vec<LabelRec>,
    gotos: Vec<GotoRec>,
    locals_count: usize,
}

pub(crate) struct FnCtx {
    pub(crate) label: Label,
    pub(crate) info: FunctionInfo,
    pub(crate) code: Vec<Instruction>,
    pub(crate) scopes: Vec<HashMap<String, Storage>>,
    pub(crate) loops: Vec<Label>,
    pub(crate) vararg_reg: Option<String>,
    blocks: Vec<BlockCtx>,
    goto_fixups: HashMap<Label, Label>,
    pending_gotos: Vec<GotoRec>,
}

#[derive(PartialEq, Eq, Hash)]
enum ConstKey {
    Nil,
    True,
    False,
    Float(u64),
    Str(String),
}

pub struct Compiler {
    source: Rc<str>,
    chunk_id: u64,
    analysis: Analysis,
    consts: Vec<Value>,
    const_slots: HashMap<ConstKey, u16>,
    functions: HashMap<Label, FunctionMeta>,
    /// Completed nested function bodies, appended after the chunk body.
    blocks_out: Vec<Vec<Instruction>>,
    pub(crate) fns: Vec<FnCtx>,
    temp_counter: u64,
    label_counter: u64,
    pub(crate) cur_line: u32,
    pub(crate) cur_col: u32,
}

impl Compiler {
    pub fn new(source_name: &str, analysis: Analysis) -> Self {
        Self {
            source: Rc::from(source_name),
            chunk_id: CHUNK_COUNTER.fetch_add(1, Ordering::Relaxed),
            analysis,
            consts: Vec::new(),
            const_slots: HashMap::new(),
            functions: HashMap::new(),
            blocks_out: Vec::new(),
            fns: Vec::new(),
            temp_counter: 0,
            label_counter: 0,
            cur_line: 0,
            cur_col: 0,
        }
    }

    pub fn compile(mut self, chunk: &Chunk) -> Result<Program, CompileError> {
        let chunk_label: Label = Rc::from(format!("__chunk_{}", self.chunk_id));
        let root_info = self.analysis.root.clone();
        self.push_fn(chunk_label.clone(), root_info);
        self.emit(Op::Label(chunk_label.clone()));
        let va = self.fresh_temp();
        self.emit(Op::Vararg(va.clone()));
        self.ctx().vararg_reg = Some(va);

        self.enter_block();
        self.compile_block(&chunk.body)?;
        self.exit_block()?;
        self.emit(Op::Return(None));

        let code = self.pop_fn()?;
        self.functions.insert(
            chunk_label.clone(),
            FunctionMeta {
                label: chunk_label.clone(),
                name: Rc::from("main chunk"),
                param_count: 0,
                is_vararg: true,
                line: 1,
            },
        );

        let mut all_code = code;
        for block in std::mem::take(&mut self.blocks_out) {
            all_code.extend(block);
        }
        Program::link(
            all_code,
            self.consts,
            self.functions,
            Some(chunk_label),
            self.source.as_ref(),
        )
    }

    // ------------------------------------------------------------ plumbing

    pub(crate) fn ctx(&mut self) -> &mut FnCtx {
        self.fns.last_mut().expect("inside a function")
    }

    pub(crate) fn err(&self, message: impl Into<String>) -> CompileError {
        CompileError::at_line(message, self.source.as_ref(), self.cur_line, self.cur_col)
    }

    pub(crate) fn set_pos(&mut self, line: u32, col: u32) {
        self.cur_line = line;
        self.cur_col = col;
    }

    pub(crate) fn emit(&mut self, op: Op) {
        let debug = DebugInfo {
            file: self.source.clone(),
            line: self.cur_line,
            col: self.cur_col,
            function: self.fns.last().expect("inside a function").label.clone(),
        };
        self.ctx().code.push(Instruction::with_debug(op, debug));
    }

    pub(crate) fn fresh_temp(&mut self) -> String {
        let name = format!("__t{}", self.temp_counter);
        self.temp_counter += 1;
        name
    }

    pub(crate) fn fresh_label(&mut self, kind: &str) -> Label {
        let label = format!("__{}_{}_{}", kind, self.chunk_id, self.label_counter);
        self.label_counter += 1;
        Rc::from(label)
    }

    pub(crate) fn const_slot(&mut self, value: Value) -> u16 {
        let key = match &value {
            Value::Nil => ConstKey::Nil,
            Value::Bool(true) => ConstKey::True,
            Value::Bool(false) => ConstKey::False,
            Value::Float(f) => ConstKey::Float(f.to_bits()),
            Value::Str(s) => ConstKey::Str(s.to_string()),
            _ => {
                let slot = self.consts.len() as u16;
                self.consts.push(value);
                return slot;
            }
        };
        if let Some(slot) = self.const_slots.get(&key) {
            return *slot;
        }
        let slot = self.consts.len() as u16;
        self.consts.push(value);
        self.const_slots.insert(key, slot);
        slot
    }

    pub(crate) fn load_const(&mut self, value: Value) -> String {
        let slot = self.const_slot(value);
        let reg = self.fresh_temp();
        self.emit(Op::LoadConst(reg.clone(), slot));
        reg
    }

    pub(crate) fn load_nil(&mut self) -> String {
        self.load_const(Value::Nil)
    }

    pub(crate) fn load_str(&mut self, text: &str) -> String {
        self.load_const(Value::str(text))
    }

    // ------------------------------------------------------------ scopes

    fn push_fn(&mut self, label: Label, info: FunctionInfo) {
        self.fns.push(FnCtx {
            label,
            info,
            code: Vec::new(),
            scopes: vec![HashMap::new()],
            loops: Vec::new(),
            vararg_reg: None,
            blocks: vec![BlockCtx::default()],
            goto_fixups: HashMap::new(),
            pending_gotos: Vec::new(),
        });
    }

    fn pop_fn(&mut self) -> Result<Vec<Instruction>, CompileError> {
        let mut ctx = self.fns.pop().expect("function to pop");
        let mut leftover = Vec::new();
        for block in &mut ctx.blocks {
            leftover.append(&mut block.gotos);
        }
        ctx.pending_gotos.extend(leftover);
        if let Some(goto) = ctx.pending_gotos.first() {
            return Err(CompileError::at_line(
                format!("no visible label '{}' for goto", goto.name),
                self.source.as_ref(),
                goto.line,
                goto.col,
            ));
        }
        let fixups = ctx.goto_fixups;
        let mut code = ctx.code;
        for instr in &mut code {
            if let Op::Jmp(target) = &instr.op {
                if let Some(resolved) = fixups.get(target) {
                    instr.op = Op::Jmp(resolved.clone());
                }
            }
        }
        Ok(code)
    }

    pub(crate) fn enter_block(&mut self) {
        let ctx = self.ctx();
        ctx.scopes.push(HashMap::new());
        ctx.blocks.push(BlockCtx::default());
    }

    pub(crate) fn exit_block(&mut self) -> Result<(), CompileError> {
        let source = self.source.clone();
        let ctx = self.fns.last_mut().expect("inside a function");
        ctx.scopes.pop();
        let block = ctx.blocks.pop().expect("block to pop");
        for goto in block.gotos {
            if let Some(label) = block.labels.iter().find(|l| l.name == goto.name) {
                if label.locals_before > goto.locals_at {
                    return Err(CompileError::at_line(
                        format!("'goto {}' jumps into the scope of a local", goto.name),
                        source.as_ref(),
                        goto.line,
                        goto.col,
                    ));
                }
                ctx.goto_fixups.insert(goto.placeholder, label.target.clone());
            } else if let Some(parent) = ctx.blocks.last_mut() {
                let locals_at = parent.locals_count;
                parent.gotos.push(GotoRec { locals_at, ..goto });
            } else {
                ctx.pending_gotos.push(goto);
            }
        }
        Ok(())
    }

    /// Declare a local over a freshly evaluated value. Captured names get a
    /// fresh cell per declaration, which is what makes per-iteration
    /// captures observable.
    pub(crate) fn declare_local(&mut self, name: &str, value_reg: &str) {
        let depth = self.fns.last().unwrap().scopes.len();
        let reg = format!("L_{}_{}_{}", depth, name, self.temp_counter);
        self.temp_counter += 1;
        let captured = self.fns.last().unwrap().info.captured.contains(name);
        if captured {
            self.emit(Op::MakeCell(reg.clone(), value_reg.to_string()));
        } else {
            self.emit(Op::Mov(reg.clone(), value_reg.to_string()));
        }
        let ctx = self.ctx();
        let storage = if captured {
            Storage::Cell(reg)
        } else {
            Storage::Reg(reg)
        };
        ctx.scopes.last_mut().unwrap().insert(name.to_string(), storage);
        ctx.blocks.last_mut().unwrap().locals_count += 1;
    }

    /// Bind a name to existing storage without emitting anything (params,
    /// upvalue prolog registers).
    pub(crate) fn bind_name(&mut self, name: &str, storage: Storage) {
        let ctx = self.ctx();
        ctx.scopes.last_mut().unwrap().insert(name.to_string(), storage);
    }

    pub(crate) fn resolve(&self, name: &str) -> Option<Storage> {
        let ctx = self.fns.last()?;
        for scope in ctx.scopes.iter().rev() {
            if let Some(storage) = scope.get(name) {
                return Some(storage.clone());
            }
        }
        None
    }

    /// Evaluate a variable read into a value register.
    pub(crate) fn read_var(&mut self, name: &str) -> String {
        match self.resolve(name) {
            Some(Storage::Reg(reg)) => reg,
            Some(Storage::Cell(cell)) => {
                let dst = self.fresh_temp();
                self.emit(Op::CellGet(dst.clone(), cell));
                dst
            }
            None => {
                let key = self.load_str(name);
                let dst = self.fresh_temp();
                self.emit(Op::TableGet(dst.clone(), crate::vm::ENV_REG.to_string(), key));
                dst
            }
        }
    }

    pub(crate) fn write_var(&mut self, name: &str, value_reg: &str) {
        match self.resolve(name) {
            Some(Storage::Reg(reg)) => self.emit(Op::Mov(reg, value_reg.to_string())),
            Some(Storage::Cell(cell)) => self.emit(Op::CellSet(cell, value_reg.to_string())),
            None => {
                let key = self.load_str(name);
                self.emit(Op::TableSet(
                    crate::vm::ENV_REG.to_string(),
                    key,
                    value_reg.to_string(),
                ));
            }
        }
    }

    // ------------------------------------------------------------ functions

    /// Compile a function literal into its own code block. Returns the entry
    /// label and the outer registers holding the cells to capture, in
    /// upvalue order.
    pub(crate) fn compile_function(
        &mut self,
        body: &FunctionBody,
        display_name: Option<String>,
    ) -> Result<(Label, Vec<String>), CompileError> {
        let info = self
            .analysis
            .functions
            .get(&body.fn_id)
            .cloned()
            .unwrap_or_default();
        let label: Label = Rc::from(format!("__fn_{}_{}", self.chunk_id, body.fn_id));
        let name: Rc<str> = match display_name {
            Some(name) => Rc::from(name),
            None => Rc::from(format!("<anonymous:{}>", body.line)),
        };
        self.functions.insert(
            label.clone(),
            FunctionMeta {
                label: label.clone(),
                name,
                param_count: body.params.len(),
                is_vararg: body.is_vararg,
                line: body.line,
            },
        );
        let upvalues = info.upvalues.clone();

        self.push_fn(label.clone(), info);
        self.emit(Op::Label(label.clone()));

        // Prolog: ARG for each parameter, cell-wrapping captured ones,
        // then BIND_UPVALUE for each capture, then VARARG.
        let params: Vec<String> = body.params.clone();
        for param in &params {
            let depth = self.fns.last().unwrap().scopes.len();
            let reg = format!("L_{}_{}_{}", depth, param, self.temp_counter);
            self.temp_counter += 1;
            self.emit(Op::Arg(reg.clone()));
            let captured = self.fns.last().unwrap().info.captured.contains(param);
            if captured {
                self.emit(Op::MakeCell(reg.clone(), reg.clone()));
                self.bind_name(param, Storage::Cell(reg));
            } else {
                self.bind_name(param, Storage::Reg(reg));
            }
        }
        for (index, upvalue) in upvalues.iter().enumerate() {
            let reg = format!("U_{}_{}", index, self.temp_counter);
            self.temp_counter += 1;
            self.emit(Op::BindUpvalue(reg.clone(), index as u16));
            self.bind_name(upvalue, Storage::Cell(reg));
        }
        // Every prolog drains the remaining queue: into the vararg list, or
        // into a discard slot so surplus arguments never leak into calls
        // made by the body.
        let va = self.fresh_temp();
        self.emit(Op::Vararg(va.clone()));
        if body.is_vararg {
            self.ctx().vararg_reg = Some(va);
        }

        self.enter_block();
        self.compile_block(&body.body)?;
        self.exit_block()?;
        self.emit(Op::Return(None));

        let code = self.pop_fn()?;
        self.blocks_out.push(code);

        // Resolve the captured cells in the *enclosing* function.
        let mut cell_regs = Vec::with_capacity(upvalues.len());
        for upvalue in &upvalues {
            match self.resolve(upvalue) {
                Some(Storage::Cell(reg)) => cell_regs.push(reg),
                other => {
                    return Err(self.err(format!(
                        "internal: upvalue '{}' has no cell storage ({:?})",
                        upvalue, other
                    )));
                }
            }
        }
        Ok((label, cell_regs))
    }

    // ------------------------------------------------------------ statements

    pub(crate) fn compile_block(&mut self, block: &Block) -> Result<(), CompileError> {
        for stmt in &block.stmts {
            self.compile_stmt(stmt)?;
        }
        Ok(())
    }

    fn compile_scoped_block(&mut self, block: &Block) -> Result<(), CompileError> {
        self.enter_block();
        self.compile_block(block)?;
        self.exit_block()
    }

    fn compile_stmt(&mut self, stmt: &Stmt) -> Result<(), CompileError> {
        self.set_pos(stmt.line, stmt.col);
        match &stmt.kind {
            StmtKind::Local { names, values } => {
                let regs = self.eval_list_aligned(values, names.len())?;
                for (name, reg) in names.iter().zip(&regs) {
                    self.declare_local(name, reg);
                }
                Ok(())
            }
            StmtKind::Assign { targets, values } => self.compile_assign(targets, values),
            StmtKind::ExprStmt(expr) => match &expr.kind {
                ExprKind::Call { .. } | ExprKind::MethodCall { .. } => {
                    self.emit_call_discard(expr)
                }
                _ => {
                    self.eval(expr)?;
                    Ok(())
                }
            },
            StmtKind::Do(body) => self.compile_scoped_block(body),
            StmtKind::While { cond, body } => self.compile_while(cond, body),
            StmtKind::Repeat { body, cond } => self.compile_repeat(body, cond),
            StmtKind::If { arms, else_body } => self.compile_if(arms, else_body.as_ref()),
            StmtKind::NumericFor {
                var,
                start,
                limit,
                step,
                body,
            } => self.compile_numeric_for(var, start, limit, step.as_ref(), body),
            StmtKind::GenericFor { names, exprs, body } => {
                self.compile_generic_for(names, exprs, body)
            }
            StmtKind::Function { name, body } => self.compile_function_stmt(name, body),
            StmtKind::LocalFunction { name, body } => self.compile_local_function(name, body),
            StmtKind::Return(values) => self.compile_return(values),
            StmtKind::Break => {
                let target = self
                    .fns
                    .last()
                    .and_then(|f| f.loops.last().cloned())
                    .ok_or_else(|| self.err("break outside a loop"))?;
                self.emit(Op::Jmp(target));
                Ok(())
            }
            StmtKind::Goto(name) => {
                let placeholder = self.fresh_label("goto");
                self.emit(Op::Jmp(placeholder.clone()));
                let (line, col) = (self.cur_line, self.cur_col);
                let ctx = self.ctx();
                let locals_at = ctx.blocks.last().unwrap().locals_count;
                ctx.blocks.last_mut().unwrap().gotos.push(GotoRec {
                    name: name.clone(),
                    placeholder,
                    locals_at,
                    line,
                    col,
                });
                Ok(())
            }
            StmtKind::Label(name) => {
                let target = self.fresh_label("user");
                let duplicate = self
                    .fns
                    .last()
                    .unwrap()
                    .blocks
                    .last()
                    .unwrap()
                    .labels
                    .iter()
                    .any(|l| l.name == *name);
                if duplicate {
                    return Err(self.err(format!("label '{}' already defined", name)));
                }
                self.emit(Op::Label(target.clone()));
                let ctx = self.ctx();
                let locals_before = ctx.blocks.last().unwrap().locals_count;
                ctx.blocks.last_mut().unwrap().labels.push(LabelRec {
                    name: name.clone(),
                    target,
                    locals_before,
                });
                Ok(())
            }
        }
    }

    fn compile_assign(&mut self, targets: &[Expr], values: &[Expr]) -> Result<(), CompileError> {
        // Index-target prefixes evaluate first, left to right; then the
        // right-hand side; then all stores.
        enum Slot {
            Var(String),
            Index { obj: String, key: String },
        }
        let mut slots = Vec::with_capacity(targets.len());
        for target in targets {
            match &target.kind {
                ExprKind::Name(name) => slots.push(Slot::Var(name.clone())),
                ExprKind::Index { obj, key } => {
                    let obj = self.eval(obj)?;
                    let key = self.eval(key)?;
                    slots.push(Slot::Index { obj, key });
                }
                _ => return Err(self.err("cannot assign to this expression")),
            }
        }
        let regs = self.eval_list_aligned(values, targets.len())?;
        // Snapshot into fresh temps: a store must not clobber a register
        // another store still reads (`a, b = b, a`).
        let snapshots: Vec<String> = regs
            .into_iter()
            .map(|reg| {
                let temp = self.fresh_temp();
                self.emit(Op::Mov(temp.clone(), reg));
                temp
            })
            .collect();
        for (slot, reg) in slots.into_iter().zip(snapshots) {
            match slot {
                Slot::Var(name) => self.write_var(&name, &reg),
                Slot::Index { obj, key } => self.emit(Op::TableSet(obj, key, reg)),
            }
        }
        Ok(())
    }

    fn compile_if(&mut self, arms: &[(Expr, Block)], else_body: Option<&Block>) -> Result<(), CompileError> {
        let end = self.fresh_label("endif");
        for (cond, body) in arms {
            let next = self.fresh_label("else");
            let cond_reg = self.eval(cond)?;
            self.emit(Op::Jz(cond_reg, next.clone()));
            self.compile_scoped_block(body)?;
            self.emit(Op::Jmp(end.clone()));
            self.emit(Op::Label(next));
        }
        if let Some(body) = else_body {
            self.compile_scoped_block(body)?;
        }
        self.emit(Op::Label(end));
        Ok(())
    }

    fn compile_while(&mut self, cond: &Expr, body: &Block) -> Result<(), CompileError> {
        let start = self.fresh_label("while");
        let end = self.fresh_label("wend");
        self.emit(Op::Label(start.clone()));
        let cond_reg = self.eval(cond)?;
        self.emit(Op::Jz(cond_reg, end.clone()));
        self.ctx().loops.push(end.clone());
        self.compile_scoped_block(body)?;
        self.ctx().loops.pop();
        self.emit(Op::Jmp(start));
        self.emit(Op::Label(end));
        Ok(())
    }

    fn compile_repeat(&mut self, body: &Block, cond: &Expr) -> Result<(), CompileError> {
        let start = self.fresh_label("repeat");
        let end = self.fresh_label("rend");
        self.emit(Op::Label(start.clone()));
        // The until condition sees the body's locals, so the scope closes
        // after the condition.
        self.enter_block();
        self.ctx().loops.push(end.clone());
        self.compile_block(body)?;
        self.ctx().loops.pop();
        let cond_reg = self.eval(cond)?;
        self.exit_block()?;
        self.emit(Op::Jz(cond_reg, start));
        self.emit(Op::Label(end));
        Ok(())
    }

    /// `for i = s, e, step` lowers to a while loop over three hidden
    /// slots, with the sign of the step tested once up front. The user
    /// variable is a fresh local per iteration, so captures observe
    /// distinct cells.
    fn compile_numeric_for(
        &mut self,
        var: &str,
        start: &Expr,
        limit: &Expr,
        step: Option<&Expr>,
        body: &Block,
    ) -> Result<(), CompileError> {
        self.enter_block();

        let start_reg = self.eval(start)?;
        let i = self.fresh_temp();
        self.emit(Op::Mov(i.clone(), start_reg));
        let limit_val = self.eval(limit)?;
        let lim = self.fresh_temp();
        self.emit(Op::Mov(lim.clone(), limit_val));
        let step_reg = match step {
            Some(expr) => {
                let value = self.eval(expr)?;
                let reg = self.fresh_temp();
                self.emit(Op::Mov(reg.clone(), value));
                reg
            }
            None => {
                let reg = self.fresh_temp();
                self.emit(Op::LoadImm(reg.clone(), 1));
                reg
            }
        };

        // sign = not (step < 0), computed once.
        let zero = self.fresh_temp();
        self.emit(Op::LoadImm(zero.clone(), 0));
        let below = self.fresh_temp();
        self.emit(Op::Lt(below.clone(), step_reg.clone(), zero));
        let sign = self.fresh_temp();
        self.emit(Op::Not(sign.clone(), below));

        let loop_start = self.fresh_label("for");
        let end = self.fresh_label("fend");
        let descending = self.fresh_label("fdesc");
        let cond_done = self.fresh_label("fcond");
        let cond = self.fresh_temp();

        self.emit(Op::Label(loop_start.clone()));
        // Ascending: continue while i <= limit; descending: while i >= limit.
        self.emit(Op::Jz(sign.clone(), descending.clone()));
        let above = self.fresh_temp();
        self.emit(Op::Gt(above.clone(), i.clone(), lim.clone()));
        self.emit(Op::Not(cond.clone(), above));
        self.emit(Op::Jmp(cond_done.clone()));
        self.emit(Op::Label(descending));
        let under = self.fresh_temp();
        self.emit(Op::Lt(under.clone(), i.clone(), lim.clone()));
        self.emit(Op::Not(cond.clone(), under));
        self.emit(Op::Label(cond_done));
        self.emit(Op::Jz(cond, end.clone()));

        self.ctx().loops.push(end.clone());
        self.enter_block();
        self.declare_local(var, &i.clone());
        self.compile_block(body)?;
        self.exit_block()?;
        self.ctx().loops.pop();

        self.emit(Op::Add(i.clone(), i.clone(), step_reg));
        self.emit(Op::Jmp(loop_start));
        self.emit(Op::Label(end));

        self.exit_block()
    }

    /// `for k, v in explist` desugars to a while loop calling the iterator
    /// with (state, control) and exiting when the control value is nil.
    fn compile_generic_for(
        &mut self,
        names: &[String],
        exprs: &[Expr],
        body: &Block,
    ) -> Result<(), CompileError> {
        self.enter_block();

        let regs = self.eval_list_aligned(exprs, 3)?;
        let iter = self.fresh_temp();
        self.emit(Op::Mov(iter.clone(), regs[0].clone()));
        let state = self.fresh_temp();
        self.emit(Op::Mov(state.clone(), regs[1].clone()));
        let ctrl = self.fresh_temp();
        self.emit(Op::Mov(ctrl.clone(), regs[2].clone()));

        let start = self.fresh_label("forin");
        let end = self.fresh_label("forin_end");

        self.emit(Op::Label(start.clone()));
        self.emit(Op::Param(state.clone()));
        self.emit(Op::Param(ctrl.clone()));
        self.emit(Op::CallValue(iter.clone()));
        let mut results = vec![ctrl.clone()];
        let extras: Vec<String> = (1..names.len()).map(|_| self.fresh_temp()).collect();
        results.extend(extras.iter().cloned());
        self.emit(Op::ResultMulti(results));
        let is_done = self.fresh_temp();
        self.emit(Op::IsNull(is_done.clone(), ctrl.clone()));
        self.emit(Op::Jnz(is_done, end.clone()));

        self.ctx().loops.push(end.clone());
        self.enter_block();
        self.declare_local(&names[0], &ctrl.clone());
        for (name, reg) in names.iter().skip(1).zip(&extras) {
            self.declare_local(name, reg);
        }
        self.compile_block(body)?;
        self.exit_block()?;
        self.ctx().loops.pop();

        self.emit(Op::Jmp(start));
        self.emit(Op::Label(end));

        self.exit_block()
    }

    fn compile_function_stmt(&mut self, name: &FunctionName, body: &FunctionBody) -> Result<(), CompileError> {
        let (label, cells) = self.compile_function(body, Some(name.display()))?;
        let closure = self.fresh_temp();
        self.emit(Op::Closure(closure.clone(), label, cells));

        if name.path.is_empty() && name.method.is_none() {
            self.write_var(&name.base, &closure);
            return Ok(());
        }
        let mut obj = self.read_var(&name.base);
        let mut segments: Vec<&str> = name.path.iter().map(|s| s.as_str()).collect();
        if let Some(method) = &name.method {
            segments.push(method);
        }
        let (last, inner) = segments.split_last().expect("at least one segment");
        for segment in inner {
            let key = self.load_str(segment);
            let next = self.fresh_temp();
            self.emit(Op::TableGet(next.clone(), obj, key));
            obj = next;
        }
        let key = self.load_str(last);
        self.emit(Op::TableSet(obj, key, closure));
        Ok(())
    }

    fn compile_local_function(&mut self, name: &str, body: &FunctionBody) -> Result<(), CompileError> {
        // Declare the name before compiling the body so the function can
        // recurse through its own cell.
        let nil = self.load_nil();
        self.declare_local(name, &nil);
        let (label, cells) = self.compile_function(body, Some(name.to_string()))?;
        let closure = self.fresh_temp();
        self.emit(Op::Closure(closure.clone(), label, cells));
        self.write_var(name, &closure);
        Ok(())
    }

    fn compile_return(&mut self, values: &[Expr]) -> Result<(), CompileError> {
        if values.is_empty() {
            self.emit(Op::Return(None));
            return Ok(());
        }
        let mut regs = Vec::with_capacity(values.len());
        for (index, value) in values.iter().enumerate() {
            if index == values.len() - 1 && value.is_multi() {
                let list = self.eval_to_list(value)?;
                regs.push(list);
            } else {
                regs.push(self.eval(value)?);
            }
        }
        self.emit(Op::ReturnMulti(regs));
        Ok(())
    }
}
