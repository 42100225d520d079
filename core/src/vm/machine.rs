//! The register VM: dispatch loop, call protocol, and host entry points.

use std::cell::RefCell;
use std::collections::{HashMap, VecDeque};
use std::rc::Rc;

use crate::val::{tostring, Closure, ForeignFunction, LuaTable, TableRef, Value};
use crate::vm::bytecode::{FunctionMeta, Instruction, Label, Op, Program};
use crate::vm::coroutine::{Coroutine, CoroutineRef};
use crate::vm::error::{RuntimeError, TraceFrame};
use crate::vm::events::{CoroutineSnapshot, Event, EventBuffer, TraceMode, VmSnapshot};
use crate::vm::frame::{CallFrame, ExecState, Frame, ForeignFrame};

/// Register holding the environment table; seeded at every frame entry.
pub const ENV_REG: &str = "_ENV";

/// How deep `__index`/`__newindex`/`__call` chains may recurse.
const META_CHAIN_LIMIT: usize = 200;

#[derive(Debug)]
pub enum RunOutcome {
    Halted,
    Returned,
    Yielded(Vec<Value>),
}

enum Flow {
    Next,
    Jump,
    Returned,
}

#[derive(Debug, Default)]
pub struct RunOptions {
    /// Script arguments; they become the entry chunk's vararg.
    pub args: Vec<Value>,
    /// Environment override for the entry chunk (`_ENV`).
    pub env: Option<TableRef>,
}

#[derive(Debug)]
pub struct RunOutput {
    pub output: Vec<Value>,
    pub last_return: Vec<Value>,
}

pub struct Vm {
    code: Rc<Vec<Instruction>>,
    labels: HashMap<Label, usize>,
    consts: Vec<Value>,
    pub(crate) functions: HashMap<Label, FunctionMeta>,
    entry: Option<Label>,
    source_name: Rc<str>,

    pub(crate) state: ExecState,
    globals: TableRef,
    string_meta: Option<TableRef>,
    output: Vec<Value>,
    pub(crate) events: EventBuffer,
    pub(crate) pending_yield: Option<Vec<Value>>,

    pub(crate) coroutines: Vec<CoroutineRef>,
    pub(crate) current: CoroutineRef,
    pub(crate) next_coroutine_id: u32,
}

impl Vm {
    pub fn new(program: Program) -> Self {
        let main = Rc::new(RefCell::new(Coroutine::main()));
        let globals = Rc::new(RefCell::new(LuaTable::new()));
        let mut vm = Self {
            code: Rc::new(program.code),
            labels: program.labels,
            consts: program.consts,
            functions: program.functions,
            entry: program.entry,
            source_name: program.source_name,
            state: ExecState::new(),
            globals: globals.clone(),
            string_meta: None,
            output: Vec::new(),
            events: EventBuffer::new(),
            pending_yield: None,
            coroutines: vec![main.clone()],
            current: main,
            next_coroutine_id: 1,
        };
        let g = Value::Table(globals.clone());
        globals
            .borrow_mut()
            .raw_set_unchecked(Value::str("_G"), g);
        vm.state
            .registers
            .insert(ENV_REG.to_string(), Value::Table(vm.globals.clone()));
        vm
    }

    // ------------------------------------------------------------ accessors

    pub fn globals(&self) -> TableRef {
        self.globals.clone()
    }

    pub fn source_name(&self) -> &str {
        &self.source_name
    }

    pub fn output(&self) -> &[Value] {
        &self.output
    }

    pub fn take_output(&mut self) -> Vec<Value> {
        std::mem::take(&mut self.output)
    }

    pub fn push_output(&mut self, value: Value) {
        self.output.push(value);
    }

    pub fn set_trace_mode(&mut self, mode: TraceMode) {
        self.events.set_mode(mode);
    }

    pub fn drain_events(&mut self) -> Vec<Event> {
        self.events.drain()
    }

    /// Shared metatable for string values (`__index` points at the string
    /// library once the stdlib is installed).
    pub fn set_string_metatable(&mut self, meta: TableRef) {
        self.string_meta = Some(meta);
    }

    pub fn string_metatable(&self) -> Option<TableRef> {
        self.string_meta.clone()
    }

    pub fn snapshot(&self) -> VmSnapshot {
        VmSnapshot {
            pc: self.state.pc,
            current_coroutine_id: self.current.borrow().id,
            stack_depth: self.state.frames.len(),
            coroutines: self
                .coroutines
                .iter()
                .map(|co| {
                    let co = co.borrow();
                    CoroutineSnapshot {
                        id: co.id,
                        status: co.status.as_str(),
                        function_name: co.function_name.clone(),
                        last_yield: co.last_yield.iter().map(tostring).collect(),
                        last_error: co.last_error.as_ref().map(|e| e.message()),
                    }
                })
                .collect(),
        }
    }

    /// Register a host callable under a global name.
    pub fn register_foreign<F>(&mut self, name: &str, func: F)
    where
        F: Fn(&[Value], &mut Vm) -> Result<Vec<Value>, RuntimeError> + 'static,
    {
        let value = Value::Foreign(Rc::new(ForeignFunction::new(name, func)));
        self.globals
            .borrow_mut()
            .raw_set_unchecked(Value::str(name), value);
    }

    pub fn set_global(&mut self, name: &str, value: Value) {
        self.globals
            .borrow_mut()
            .raw_set_unchecked(Value::str(name), value);
    }

    pub fn get_global(&self, name: &str) -> Value {
        self.globals.borrow().raw_get(&Value::str(name))
    }

    // ------------------------------------------------------------ programs

    /// Append another linked program (a `load`ed chunk) and return a closure
    /// for its entry point.
    pub fn load_program(&mut self, program: Program, env: Option<TableRef>) -> Result<Rc<Closure>, RuntimeError> {
        let entry = program
            .entry
            .clone()
            .ok_or_else(|| RuntimeError::msg("program has no entry chunk"))?;
        self.attach(program)?;
        let meta = self
            .functions
            .get(&entry)
            .ok_or_else(|| RuntimeError::msg("entry chunk has no metadata"))?;
        Ok(Rc::new(Closure {
            label: entry.clone(),
            upvalues: Vec::new(),
            param_count: meta.param_count,
            is_vararg: meta.is_vararg,
            env,
        }))
    }

    fn attach(&mut self, program: Program) -> Result<(), RuntimeError> {
        let pc_base = self.code.len();
        let const_base = self.consts.len() as u16;
        for (label, pc) in &program.labels {
            if self.labels.contains_key(label) {
                return Err(RuntimeError::msg(format!("duplicate label '{}' across chunks", label)));
            }
            self.labels.insert(label.clone(), pc_base + pc);
        }
        self.functions.extend(program.functions);
        self.consts.extend(program.consts);
        let code = Rc::make_mut(&mut self.code);
        code.extend(program.code.into_iter().map(|mut instr| {
            if let Op::LoadConst(_, slot) = &mut instr.op {
                *slot += const_base;
            }
            instr
        }));
        Ok(())
    }

    /// Execute the program's entry chunk. Raw bytecode programs without an
    /// entry start at PC 0 and run until HALT.
    pub fn run(&mut self, options: RunOptions) -> Result<RunOutput, RuntimeError> {
        tracing::debug!(source = %self.source_name, "run");
        let last_return = match self.entry.clone() {
            Some(entry) => {
                let meta = self.functions.get(&entry);
                let closure = Rc::new(Closure {
                    label: entry,
                    upvalues: Vec::new(),
                    param_count: meta.map(|m| m.param_count).unwrap_or(0),
                    is_vararg: meta.map(|m| m.is_vararg).unwrap_or(true),
                    env: options.env,
                });
                if let Some(env) = closure.env.clone() {
                    self.state
                        .registers
                        .insert(ENV_REG.to_string(), Value::Table(env));
                }
                self.call_function(&Value::Closure(closure), options.args)?
            }
            None => {
                self.state.pending = options.args.into();
                self.run_until(0)?;
                std::mem::take(&mut self.state.last_return)
            }
        };
        Ok(RunOutput {
            output: std::mem::take(&mut self.output),
            last_return,
        })
    }

    // ------------------------------------------------------------ calls

    /// Reentrant call used by the run loop and by foreign functions
    /// (pcall, sort comparators, wrap adapters). Restores the caller's
    /// state whether the callee returns or raises.
    pub fn call_function(&mut self, callee: &Value, args: Vec<Value>) -> Result<Vec<Value>, RuntimeError> {
        self.call_function_depth(callee, args, 0)
    }

    fn call_function_depth(
        &mut self,
        callee: &Value,
        args: Vec<Value>,
        depth: usize,
    ) -> Result<Vec<Value>, RuntimeError> {
        if depth > META_CHAIN_LIMIT {
            return Err(self.error("'__call' chain too long; possible loop"));
        }
        match callee {
            Value::Foreign(f) => {
                self.state.frames.push(Frame::Foreign(ForeignFrame { name: f.name.clone() }));
                let result = f.invoke(&args, self);
                self.state.frames.pop();
                result
            }
            Value::Closure(closure) => {
                let base = self.state.frames.len();
                let saved_pc = self.state.pc;
                let saved_pending = std::mem::take(&mut self.state.pending);
                self.state.pending = args.into();
                let outcome = self
                    .push_closure_frame(closure, saved_pc.saturating_add(1), true)
                    .and_then(|_| self.run_until(base));
                self.state.pc = saved_pc;
                self.state.pending = saved_pending;
                match outcome {
                    Ok(_) => Ok(std::mem::take(&mut self.state.last_return)),
                    Err(err) => Err(err),
                }
            }
            Value::Table(_) => {
                let handler = self
                    .metamethod(callee, "__call")
                    .ok_or_else(|| self.type_error("call", callee))?;
                let mut with_self = Vec::with_capacity(args.len() + 1);
                with_self.push(callee.clone());
                with_self.extend(args);
                self.call_function_depth(&handler, with_self, depth + 1)
            }
            other => Err(self.type_error("call", other)),
        }
    }

    /// Push a bytecode frame for `closure` and jump to its entry label.
    /// The callee's prolog consumes the pending queue via ARG/VARARG and
    /// binds upvalue cells via BIND_UPVALUE.
    pub(crate) fn push_closure_frame(
        &mut self,
        closure: &Rc<Closure>,
        return_pc: usize,
        is_entry: bool,
    ) -> Result<(), RuntimeError> {
        let target = self
            .labels
            .get(&closure.label)
            .copied()
            .ok_or_else(|| self.error(format!("undefined function label '{}'", closure.label)))?;
        let frame = CallFrame {
            return_pc,
            saved_registers: std::mem::take(&mut self.state.registers),
            saved_upvalues: std::mem::replace(&mut self.state.upvalues, closure.upvalues.clone()),
            saved_pending: VecDeque::new(),
            function_label: closure.label.clone(),
            is_entry,
        };
        let env = closure
            .env
            .clone()
            .unwrap_or_else(|| self.globals.clone());
        self.state
            .registers
            .insert(ENV_REG.to_string(), Value::Table(env));
        self.state.frames.push(Frame::Call(frame));
        self.state.pc = target;
        Ok(())
    }

    fn do_return(&mut self, values: Vec<Value>) -> Flow {
        self.state.last_return = values;
        match self.state.frames.pop() {
            Some(Frame::Call(frame)) => {
                self.state.registers = frame.saved_registers;
                self.state.upvalues = frame.saved_upvalues;
                self.state.pending = frame.saved_pending;
                self.state.pc = frame.return_pc;
                Flow::Returned
            }
            Some(other) => {
                // RETURN outside any call frame ends the program.
                self.state.frames.push(other);
                self.state.halted = true;
                Flow::Returned
            }
            None => {
                self.state.halted = true;
                Flow::Returned
            }
        }
    }

    // ------------------------------------------------------------ the loop

    /// Execute until the frame stack drops back to `base`, the program
    /// halts, or a yield reaches this loop's resume boundary.
    pub(crate) fn run_until(&mut self, base: usize) -> Result<RunOutcome, RuntimeError> {
        loop {
            if self.state.halted {
                return Ok(RunOutcome::Halted);
            }
            let code = self.code.clone();
            let pc = self.state.pc;
            if pc >= code.len() {
                self.state.halted = true;
                return Ok(RunOutcome::Halted);
            }
            let instr = &code[pc];
            let coroutine_id = self.current.borrow().id;
            self.events.step(coroutine_id, pc, instr.op.mnemonic());

            match self.exec_op(&instr.op) {
                Ok(Flow::Next) => self.state.pc = pc + 1,
                Ok(Flow::Jump) => {}
                Ok(Flow::Returned) => {
                    if self.state.halted || self.state.frames.len() <= base {
                        return Ok(if self.state.halted {
                            RunOutcome::Halted
                        } else {
                            RunOutcome::Returned
                        });
                    }
                }
                Err(mut err) => {
                    if err.traceback.is_empty() {
                        err.traceback = self.capture_traceback();
                    }
                    self.unwind_to(base);
                    return Err(err);
                }
            }

            if let Some(values) = self.pending_yield.take() {
                return Ok(RunOutcome::Yielded(values));
            }
        }
    }

    fn unwind_to(&mut self, base: usize) {
        while self.state.frames.len() > base {
            if let Some(Frame::Call(frame)) = self.state.frames.pop() {
                self.state.registers = frame.saved_registers;
                self.state.upvalues = frame.saved_upvalues;
                self.state.pending = frame.saved_pending;
                self.state.pc = frame.return_pc;
            }
        }
    }

    // ------------------------------------------------------------ dispatch

    fn exec_op(&mut self, op: &Op) -> Result<Flow, RuntimeError> {
        match op {
            Op::LoadImm(dst, value) => {
                self.set_reg(dst, Value::Int(*value));
                Ok(Flow::Next)
            }
            Op::LoadConst(dst, slot) => {
                let value = self
                    .consts
                    .get(*slot as usize)
                    .ok_or_else(|| self.error(format!("bad constant slot {}", slot)))?
                    .deep_copy();
                self.set_reg(dst, value);
                Ok(Flow::Next)
            }
            Op::Mov(dst, src) => {
                let value = self.get_reg(src);
                self.set_reg(dst, value);
                Ok(Flow::Next)
            }
            Op::Clr(dst) => {
                self.set_reg(dst, Value::Int(0));
                Ok(Flow::Next)
            }
            Op::CmpImm(dst, src, imm) => {
                let value = self.get_reg(src);
                let number = crate::val::tonumber(&value)
                    .ok_or_else(|| self.type_error("compare", &value))?
                    .as_f64();
                let other = *imm as f64;
                let ordering = if number < other {
                    -1
                } else if number > other {
                    1
                } else {
                    0
                };
                self.set_reg(dst, Value::Int(ordering));
                Ok(Flow::Next)
            }

            Op::Add(dst, a, b) => {
                self.binary_arith(dst, a, b, "__add", "add")?;
                Ok(Flow::Next)
            }
            Op::Sub(dst, a, b) => {
                self.binary_arith(dst, a, b, "__sub", "sub")?;
                Ok(Flow::Next)
            }
            Op::Mul(dst, a, b) => {
                self.binary_arith(dst, a, b, "__mul", "mul")?;
                Ok(Flow::Next)
            }
            Op::Div(dst, a, b) => {
                self.binary_arith(dst, a, b, "__div", "div")?;
                Ok(Flow::Next)
            }
            Op::IDiv(dst, a, b) => {
                self.binary_arith(dst, a, b, "__idiv", "idiv")?;
                Ok(Flow::Next)
            }
            Op::Mod(dst, a, b) => {
                self.binary_arith(dst, a, b, "__mod", "mod")?;
                Ok(Flow::Next)
            }
            Op::Pow(dst, a, b) => {
                self.binary_arith(dst, a, b, "__pow", "pow")?;
                Ok(Flow::Next)
            }
            Op::Neg(dst, src) => {
                let value = self.get_reg(src);
                let result = self.arith_neg(&value)?;
                self.set_reg(dst, result);
                Ok(Flow::Next)
            }
            Op::Concat(dst, a, b) => {
                let lhs = self.get_reg(a);
                let rhs = self.get_reg(b);
                let result = self.concat_values(&lhs, &rhs)?;
                self.set_reg(dst, result);
                Ok(Flow::Next)
            }

            Op::Eq(dst, a, b) => {
                let lhs = self.get_reg(a);
                let rhs = self.get_reg(b);
                let result = self.values_equal(&lhs, &rhs)?;
                self.set_reg(dst, Value::Bool(result));
                Ok(Flow::Next)
            }
            Op::Lt(dst, a, b) => {
                let lhs = self.get_reg(a);
                let rhs = self.get_reg(b);
                let result = self.values_less(&lhs, &rhs)?;
                self.set_reg(dst, Value::Bool(result));
                Ok(Flow::Next)
            }
            Op::Gt(dst, a, b) => {
                // GT is LT with operands swapped.
                let lhs = self.get_reg(a);
                let rhs = self.get_reg(b);
                let result = self.values_less(&rhs, &lhs)?;
                self.set_reg(dst, Value::Bool(result));
                Ok(Flow::Next)
            }
            Op::And(dst, a, b) => {
                let result = self.get_reg(a).truthy() && self.get_reg(b).truthy();
                self.set_reg(dst, Value::Bool(result));
                Ok(Flow::Next)
            }
            Op::Or(dst, a, b) => {
                let result = self.get_reg(a).truthy() || self.get_reg(b).truthy();
                self.set_reg(dst, Value::Bool(result));
                Ok(Flow::Next)
            }
            Op::Not(dst, src) => {
                let result = !self.get_reg(src).truthy();
                self.set_reg(dst, Value::Bool(result));
                Ok(Flow::Next)
            }

            Op::AndBit(dst, a, b) => {
                self.binary_bits(dst, a, b, |x, y| Ok(x & y))?;
                Ok(Flow::Next)
            }
            Op::OrBit(dst, a, b) => {
                self.binary_bits(dst, a, b, |x, y| Ok(x | y))?;
                Ok(Flow::Next)
            }
            Op::Xor(dst, a, b) => {
                self.binary_bits(dst, a, b, |x, y| Ok(x ^ y))?;
                Ok(Flow::Next)
            }
            Op::NotBit(dst, src) => {
                let value = self.get_reg(src);
                let int = self.expect_integer(&value)?;
                self.set_reg(dst, Value::Int(!int));
                Ok(Flow::Next)
            }
            Op::Shl(dst, a, b) => {
                self.binary_bits(dst, a, b, |x, y| {
                    if y < 0 {
                        Err("negative shift amount")
                    } else if y >= 64 {
                        Ok(0)
                    } else {
                        Ok(((x as u64) << y) as i64)
                    }
                })?;
                Ok(Flow::Next)
            }
            Op::Shr(dst, a, b) => {
                self.binary_bits(dst, a, b, |x, y| {
                    if y < 0 {
                        Err("negative shift amount")
                    } else if y >= 32 {
                        Ok(0)
                    } else {
                        // Logical shift over the low 32 bits.
                        Ok((((x as u64) & 0xFFFF_FFFF) >> y) as i64)
                    }
                })?;
                Ok(Flow::Next)
            }
            Op::Sar(dst, a, b) => {
                self.binary_bits(dst, a, b, |x, y| {
                    if y < 0 {
                        Err("negative shift amount")
                    } else {
                        Ok(x >> y.min(63))
                    }
                })?;
                Ok(Flow::Next)
            }

            Op::Label(_) => Ok(Flow::Next),
            Op::Jmp(label) => {
                self.state.pc = self.label_target(label)?;
                Ok(Flow::Jump)
            }
            Op::Jz(cond, label) => {
                if !self.get_reg(cond).truthy() {
                    self.state.pc = self.label_target(label)?;
                    Ok(Flow::Jump)
                } else {
                    Ok(Flow::Next)
                }
            }
            Op::Jnz(cond, label) => {
                if self.get_reg(cond).truthy() {
                    self.state.pc = self.label_target(label)?;
                    Ok(Flow::Jump)
                } else {
                    Ok(Flow::Next)
                }
            }
            Op::JmpRel(offset) => {
                let target = self.state.pc as i64 + offset;
                if target < 0 || target as usize > self.code.len() {
                    return Err(self.error(format!("relative jump out of range ({})", offset)));
                }
                self.state.pc = target as usize;
                Ok(Flow::Jump)
            }

            Op::Param(src) => {
                let value = self.get_reg(src);
                self.state.pending.push_back(value);
                Ok(Flow::Next)
            }
            Op::ParamExpand(src) => {
                let value = self.get_reg(src);
                match value {
                    Value::List(items) => {
                        for item in items.iter() {
                            self.state.pending.push_back(item.clone());
                        }
                    }
                    other => self.state.pending.push_back(other),
                }
                Ok(Flow::Next)
            }
            Op::Call(label) => {
                let target = self.label_target(label)?;
                let env = self.get_reg(ENV_REG);
                let frame = CallFrame {
                    return_pc: self.state.pc + 1,
                    saved_registers: std::mem::take(&mut self.state.registers),
                    saved_upvalues: std::mem::take(&mut self.state.upvalues),
                    saved_pending: VecDeque::new(),
                    function_label: label.clone(),
                    is_entry: false,
                };
                self.state.registers.insert(ENV_REG.to_string(), env);
                self.state.frames.push(Frame::Call(frame));
                self.state.pc = target;
                Ok(Flow::Jump)
            }
            Op::CallValue(reg) => {
                let callee = self.get_reg(reg);
                self.dispatch_call_value(callee, 0)
            }
            Op::Arg(dst) => {
                let value = self.state.pending.pop_front().unwrap_or(Value::Nil);
                self.set_reg(dst, value);
                Ok(Flow::Next)
            }
            Op::Return(src) => {
                let values = match src {
                    Some(reg) => vec![self.get_reg(reg)],
                    None => Vec::new(),
                };
                Ok(self.do_return(values))
            }
            Op::ReturnMulti(regs) => {
                let mut values = Vec::with_capacity(regs.len());
                for (index, reg) in regs.iter().enumerate() {
                    let value = self.get_reg(reg);
                    if index == regs.len() - 1 {
                        if let Value::List(items) = &value {
                            values.extend(items.iter().cloned());
                            continue;
                        }
                    }
                    values.push(value);
                }
                Ok(self.do_return(values))
            }
            Op::Result(dst) => {
                let value = self.state.last_return.first().cloned().unwrap_or(Value::Nil);
                self.set_reg(dst, value);
                Ok(Flow::Next)
            }
            Op::ResultMulti(dsts) => {
                let values: Vec<Value> = dsts
                    .iter()
                    .enumerate()
                    .map(|(i, _)| self.state.last_return.get(i).cloned().unwrap_or(Value::Nil))
                    .collect();
                for (dst, value) in dsts.iter().zip(values) {
                    self.set_reg(dst, value);
                }
                Ok(Flow::Next)
            }
            Op::ResultList(dst) => {
                let list = Value::List(Rc::new(self.state.last_return.clone()));
                self.set_reg(dst, list);
                Ok(Flow::Next)
            }
            Op::Vararg(dst) => {
                let rest: Vec<Value> = self.state.pending.drain(..).collect();
                self.set_reg(dst, Value::List(Rc::new(rest)));
                Ok(Flow::Next)
            }
            Op::VarargFirst(dst, src) => {
                let value = match self.get_reg(src) {
                    Value::List(items) => items.first().cloned().unwrap_or(Value::Nil),
                    other => other,
                };
                self.set_reg(dst, value);
                Ok(Flow::Next)
            }
            Op::BindUpvalue(dst, index) => {
                let cell = self
                    .state
                    .upvalues
                    .get(*index as usize)
                    .cloned()
                    .ok_or_else(|| self.error(format!("missing upvalue {}", index)))?;
                self.set_reg(dst, Value::Cell(cell));
                Ok(Flow::Next)
            }

            Op::MakeCell(dst, src) => {
                let value = self.get_reg(src);
                self.set_reg(dst, Value::Cell(Value::new_cell(value)));
                Ok(Flow::Next)
            }
            Op::CellGet(dst, cell) => {
                let value = match self.get_reg(cell) {
                    Value::Cell(c) => c.borrow().clone(),
                    other => return Err(self.error(format!("CELL_GET on non-cell ({})", other.type_name()))),
                };
                self.set_reg(dst, value);
                Ok(Flow::Next)
            }
            Op::CellSet(cell, src) => {
                let value = self.get_reg(src);
                match self.get_reg(cell) {
                    Value::Cell(c) => *c.borrow_mut() = value,
                    other => return Err(self.error(format!("CELL_SET on non-cell ({})", other.type_name()))),
                }
                Ok(Flow::Next)
            }
            Op::Closure(dst, label, cell_regs) => {
                let mut upvalues = Vec::with_capacity(cell_regs.len());
                for reg in cell_regs {
                    match self.get_reg(reg) {
                        Value::Cell(c) => upvalues.push(c),
                        other => {
                            return Err(self.error(format!(
                                "CLOSURE capture '{}' is not a cell ({})",
                                reg,
                                other.type_name()
                            )));
                        }
                    }
                }
                let meta = self.functions.get(label);
                let env = match self.get_reg(ENV_REG) {
                    Value::Table(t) => Some(t),
                    _ => None,
                };
                let closure = Closure {
                    label: label.clone(),
                    upvalues,
                    param_count: meta.map(|m| m.param_count).unwrap_or(0),
                    is_vararg: meta.map(|m| m.is_vararg).unwrap_or(false),
                    env,
                };
                self.set_reg(dst, Value::Closure(Rc::new(closure)));
                Ok(Flow::Next)
            }

            Op::TableNew(dst) => {
                self.set_reg(dst, Value::table(LuaTable::new()));
                Ok(Flow::Next)
            }
            Op::TableSet(table, key, value) => {
                let t = self.get_reg(table);
                let k = self.get_reg(key);
                let v = self.get_reg(value);
                self.newindex_value(&t, k, v, 0)?;
                Ok(Flow::Next)
            }
            Op::TableGet(dst, table, key) => {
                let t = self.get_reg(table);
                let k = self.get_reg(key);
                let value = self.index_value(&t, &k, 0)?;
                self.set_reg(dst, value);
                Ok(Flow::Next)
            }
            Op::TableAppend(table, value) => {
                let t = self.get_reg(table);
                let v = self.get_reg(value);
                match t {
                    Value::Table(t) => {
                        t.borrow_mut().push(v);
                        Ok(Flow::Next)
                    }
                    other => Err(self.type_error("append to", &other)),
                }
            }
            Op::TableExtend(table, list) => {
                let t = self.get_reg(table);
                let l = self.get_reg(list);
                let t = match &t {
                    Value::Table(t) => t.clone(),
                    _ => return Err(self.type_error("extend", &t)),
                };
                match l {
                    Value::List(items) => t.borrow_mut().extend(items.iter().cloned()),
                    Value::Table(src) => {
                        let values: Vec<Value> = src.borrow().array_part().to_vec();
                        t.borrow_mut().extend(values);
                    }
                    other => return Err(self.type_error("extend with", &other)),
                }
                Ok(Flow::Next)
            }
            Op::ListGet(dst, list, index) => {
                let l = self.get_reg(list);
                let i = self.get_reg(index);
                let idx = self.expect_index(&i)?;
                let value = match l {
                    Value::List(items) => {
                        if idx < 0 {
                            Value::Nil
                        } else {
                            items.get(idx as usize).cloned().unwrap_or(Value::Nil)
                        }
                    }
                    other => return Err(self.error(format!("LIST_GET on {}", other.type_name()))),
                };
                self.set_reg(dst, value);
                Ok(Flow::Next)
            }

            Op::ArrInit(dst, _capacity) => {
                self.set_reg(dst, Value::table(LuaTable::new()));
                Ok(Flow::Next)
            }
            Op::ArrSet(table, index, value) => {
                let t = self.get_reg(table);
                let i = self.get_reg(index);
                let v = self.get_reg(value);
                let idx = self.expect_index(&i)?;
                let t = match &t {
                    Value::Table(t) => t.clone(),
                    _ => return Err(self.type_error("index", &t)),
                };
                let len = t.borrow().array_len() as i64;
                if idx < 0 || idx > len {
                    return Err(self.error(format!("array index {} out of range", idx)));
                }
                // Zero-based view over the dense part.
                t.borrow_mut().raw_set_unchecked(Value::Int(idx + 1), v);
                Ok(Flow::Next)
            }
            Op::ArrGet(dst, table, index) => {
                let t = self.get_reg(table);
                let i = self.get_reg(index);
                let idx = self.expect_index(&i)?;
                let value = match t {
                    Value::Table(t) => t.borrow().raw_get(&Value::Int(idx + 1)),
                    Value::List(items) => {
                        if idx < 0 {
                            Value::Nil
                        } else {
                            items.get(idx as usize).cloned().unwrap_or(Value::Nil)
                        }
                    }
                    other => return Err(self.type_error("index", &other)),
                };
                self.set_reg(dst, value);
                Ok(Flow::Next)
            }
            Op::ArrCopy(dst, src, start, length) => {
                let source = self.get_reg(src);
                let start = self.expect_index(&self.get_reg(start))?;
                let length = self.expect_index(&self.get_reg(length))?;
                let source = match &source {
                    Value::Table(source) => source.clone(),
                    _ => return Err(self.type_error("copy", &source)),
                };
                let mut out = LuaTable::new();
                {
                    let source = source.borrow();
                    let array = source.array_part();
                    for offset in 0..length.max(0) {
                        let idx = start + offset;
                        if idx < 0 || idx as usize >= array.len() {
                            break;
                        }
                        out.push(array[idx as usize].clone());
                    }
                }
                self.set_reg(dst, Value::table(out));
                Ok(Flow::Next)
            }
            Op::Len(dst, src) => {
                let value = self.get_reg(src);
                let result = self.length_of(&value)?;
                self.set_reg(dst, result);
                Ok(Flow::Next)
            }
            Op::Push(src) => {
                let value = self.get_reg(src);
                self.state.stack.push(value);
                Ok(Flow::Next)
            }
            Op::Pop(dst) => {
                let value = self
                    .state
                    .stack
                    .pop()
                    .ok_or_else(|| self.error("POP from empty stack"))?;
                self.set_reg(dst, value);
                Ok(Flow::Next)
            }

            Op::IsObj(dst, src) => {
                let value = self.get_reg(src);
                let is_obj = matches!(&value, Value::Table(t) if t.borrow().array_len() == 0);
                self.set_reg(dst, Value::Bool(is_obj));
                Ok(Flow::Next)
            }
            Op::IsArr(dst, src) => {
                let value = self.get_reg(src);
                let is_arr = match &value {
                    Value::List(_) => true,
                    Value::Table(t) => {
                        let t = t.borrow();
                        t.hash_len() == 0 && t.array_len() > 0
                    }
                    _ => false,
                };
                self.set_reg(dst, Value::Bool(is_arr));
                Ok(Flow::Next)
            }
            Op::IsNull(dst, src) => {
                let is_null = matches!(self.get_reg(src), Value::Nil);
                self.set_reg(dst, Value::Bool(is_null));
                Ok(Flow::Next)
            }
            Op::Coalesce(dst, a, b) => {
                let lhs = self.get_reg(a);
                let value = if matches!(lhs, Value::Nil) { self.get_reg(b) } else { lhs };
                self.set_reg(dst, value);
                Ok(Flow::Next)
            }

            Op::Print(src) => {
                let value = self.get_reg(src);
                self.output.push(value);
                Ok(Flow::Next)
            }
            Op::Halt => {
                self.state.halted = true;
                Ok(Flow::Returned)
            }
        }
    }

    fn dispatch_call_value(&mut self, callee: Value, depth: usize) -> Result<Flow, RuntimeError> {
        if depth > META_CHAIN_LIMIT {
            return Err(self.error("'__call' chain too long; possible loop"));
        }
        match callee {
            Value::Closure(closure) => {
                self.push_closure_frame(&closure, self.state.pc + 1, false)?;
                Ok(Flow::Jump)
            }
            Value::Foreign(f) => {
                let args: Vec<Value> = self.state.pending.drain(..).collect();
                self.state
                    .frames
                    .push(Frame::Foreign(ForeignFrame { name: f.name.clone() }));
                let result = f.invoke(&args, self);
                self.state.frames.pop();
                self.state.last_return = result?;
                Ok(Flow::Next)
            }
            Value::Table(_) => {
                let handler = self
                    .metamethod(&callee, "__call")
                    .ok_or_else(|| self.type_error("call", &callee))?;
                self.state.pending.push_front(callee);
                self.dispatch_call_value(handler, depth + 1)
            }
            other => Err(self.type_error("call", &other)),
        }
    }

    // ------------------------------------------------------------ registers

    pub(crate) fn get_reg(&self, name: &str) -> Value {
        self.state.registers.get(name).cloned().unwrap_or(Value::Nil)
    }

    pub(crate) fn set_reg(&mut self, name: &str, value: Value) {
        self.state.registers.insert(name.to_string(), value);
    }

    fn label_target(&self, label: &str) -> Result<usize, RuntimeError> {
        self.labels
            .get(label)
            .copied()
            .ok_or_else(|| self.error(format!("undefined label '{}'", label)))
    }

    // ------------------------------------------------------------ errors

    /// Raise with the current source location prefixed, Lua style.
    pub fn error(&self, message: impl AsRef<str>) -> RuntimeError {
        let (file, line) = self.current_location();
        RuntimeError::msg(format!("{}:{}: {}", file, line, message.as_ref()))
            .with_traceback(self.capture_traceback())
    }

    /// Raise an arbitrary value (the `error()` builtin path).
    pub fn raise_value(&self, value: Value) -> RuntimeError {
        RuntimeError::new(value).with_traceback(self.capture_traceback())
    }

    pub(crate) fn type_error(&self, action: &str, value: &Value) -> RuntimeError {
        self.error(format!("attempt to {} a {} value", action, value.type_name()))
    }

    /// File/line of the instruction at the current PC.
    pub fn current_location(&self) -> (String, u32) {
        self.location_at(self.state.pc)
    }

    fn location_at(&self, pc: usize) -> (String, u32) {
        match self.code.get(pc).and_then(|i| i.debug.as_ref()) {
            Some(debug) => (debug.file.to_string(), debug.line),
            None => (self.source_name.to_string(), 0),
        }
    }

    /// Source location `level` call frames up from the current point:
    /// level 1 is the running function, level 2 its caller, and so on.
    /// Foreign frames do not count as levels.
    pub fn location_of_level(&self, level: usize) -> Option<(String, u32)> {
        if level <= 1 {
            return Some(self.current_location());
        }
        let mut remaining = level - 1;
        for frame in self.state.frames.iter().rev() {
            match frame {
                Frame::Call(cf) => {
                    remaining -= 1;
                    if remaining == 0 {
                        return Some(self.location_at(cf.return_pc.saturating_sub(1)));
                    }
                }
                Frame::Foreign(_) => {}
                Frame::ResumeBoundary { .. } => return None,
            }
        }
        None
    }

    fn display_name(&self, label: &Label) -> String {
        match self.functions.get(label) {
            Some(meta) if meta.name.as_ref() == "main chunk" => "main chunk".to_string(),
            Some(meta) if meta.name.starts_with('<') => format!("function {}", meta.name),
            Some(meta) => format!("function '{}'", meta.name),
            None => format!("function '{}'", label),
        }
    }

    /// Walk the live frame stack innermost-first, stopping at the current
    /// coroutine's resume boundary.
    pub fn capture_traceback(&self) -> Vec<TraceFrame> {
        self.traceback_of_state(&self.state, self.current.borrow().id)
    }

    pub(crate) fn traceback_of_state(&self, state: &ExecState, coroutine_id: u32) -> Vec<TraceFrame> {
        let mut frames = Vec::new();
        let mut pc = state.pc;
        for frame in state.frames.iter().rev() {
            match frame {
                Frame::Call(cf) => {
                    let (file, line) = self.location_at(pc);
                    frames.push(TraceFrame {
                        name: self.display_name(&cf.function_label),
                        file,
                        line,
                        pc,
                        coroutine_id,
                        is_foreign: false,
                    });
                    pc = cf.return_pc.saturating_sub(1);
                }
                Frame::Foreign(ff) => {
                    frames.push(TraceFrame {
                        name: ff.name.to_string(),
                        file: "[C]".to_string(),
                        line: 0,
                        pc,
                        coroutine_id,
                        is_foreign: true,
                    });
                }
                Frame::ResumeBoundary { .. } => return frames,
            }
        }
        // Raw programs execute top-level code outside any frame; entry
        // chunks already appear as their own call frame.
        let bottom_is_entry = matches!(state.frames.first(), Some(Frame::Call(cf)) if cf.is_entry);
        if !bottom_is_entry {
            let (file, line) = self.location_at(pc);
            frames.push(TraceFrame {
                name: "main chunk".to_string(),
                file,
                line,
                pc,
                coroutine_id,
                is_foreign: false,
            });
        }
        frames
    }

    /// Traceback over a suspended coroutine's saved frames.
    pub fn traceback_of_coroutine(&self, co: &CoroutineRef) -> Vec<TraceFrame> {
        let target = co.borrow();
        if let Some(saved) = &target.saved {
            self.traceback_of_state(saved, target.id)
        } else if let Some(err) = &target.last_error {
            err.traceback.clone()
        } else {
            Vec::new()
        }
    }
}
