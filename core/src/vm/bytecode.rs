//! Instruction set, debug records, and the linked program form.

use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;

use crate::token::CompileError;
use crate::val::Value;

/// Symbolic register name. The register file is a name-keyed map, which keeps
/// compiled programs debuggable at the bytecode level.
pub type Reg = String;

pub type Label = Rc<str>;

#[derive(Clone)]
pub enum Op {
    // Load/move
    LoadImm(Reg, i64),
    /// Constants are deep-copied on load so literal tables stay independent.
    LoadConst(Reg, u16),
    Mov(Reg, Reg),
    /// Sets the register to integer 0, not nil (legacy semantics).
    Clr(Reg),
    /// Writes -1/0/1 comparing a register to an immediate.
    CmpImm(Reg, Reg, i64),
    // Arithmetic
    Add(Reg, Reg, Reg),
    Sub(Reg, Reg, Reg),
    Mul(Reg, Reg, Reg),
    Div(Reg, Reg, Reg),
    IDiv(Reg, Reg, Reg),
    Mod(Reg, Reg, Reg),
    Pow(Reg, Reg, Reg),
    Neg(Reg, Reg),
    Concat(Reg, Reg, Reg),
    // Compare/logic
    Eq(Reg, Reg, Reg),
    Lt(Reg, Reg, Reg),
    Gt(Reg, Reg, Reg),
    And(Reg, Reg, Reg),
    Or(Reg, Reg, Reg),
    Not(Reg, Reg),
    // Bitwise
    AndBit(Reg, Reg, Reg),
    OrBit(Reg, Reg, Reg),
    Xor(Reg, Reg, Reg),
    NotBit(Reg, Reg),
    Shl(Reg, Reg, Reg),
    /// Logical right shift; masks the operand to 32 bits first.
    Shr(Reg, Reg, Reg),
    /// Arithmetic right shift.
    Sar(Reg, Reg, Reg),
    // Jumps
    Label(Label),
    Jmp(Label),
    Jz(Reg, Label),
    Jnz(Reg, Label),
    JmpRel(i64),
    // Calls/returns
    Param(Reg),
    ParamExpand(Reg),
    Call(Label),
    CallValue(Reg),
    Arg(Reg),
    Return(Option<Reg>),
    /// The last operand is expanded if it holds a List.
    ReturnMulti(Vec<Reg>),
    Result(Reg),
    ResultMulti(Vec<Reg>),
    ResultList(Reg),
    Vararg(Reg),
    VarargFirst(Reg, Reg),
    BindUpvalue(Reg, u16),
    // Closure/cell
    MakeCell(Reg, Reg),
    CellGet(Reg, Reg),
    CellSet(Reg, Reg),
    Closure(Reg, Label, Vec<Reg>),
    // Tables
    TableNew(Reg),
    TableSet(Reg, Reg, Reg),
    TableGet(Reg, Reg, Reg),
    TableAppend(Reg, Reg),
    TableExtend(Reg, Reg),
    ListGet(Reg, Reg, Reg),
    // Legacy collections (kept for the assembly/jq front-ends)
    ArrInit(Reg, u32),
    ArrSet(Reg, Reg, Reg),
    ArrGet(Reg, Reg, Reg),
    ArrCopy(Reg, Reg, Reg, Reg),
    Len(Reg, Reg),
    Push(Reg),
    Pop(Reg),
    // Predicates/coalesce
    IsObj(Reg, Reg),
    IsArr(Reg, Reg),
    IsNull(Reg, Reg),
    Coalesce(Reg, Reg, Reg),
    // Output/halt
    Print(Reg),
    Halt,
}

impl Op {
    /// Uppercase mnemonic, used by the event stream and disassembly.
    pub fn mnemonic(&self) -> &'static str {
        match self {
            Op::LoadImm(..) => "LOAD_IMM",
            Op::LoadConst(..) => "LOAD_CONST",
            Op::Mov(..) => "MOV",
            Op::Clr(..) => "CLR",
            Op::CmpImm(..) => "CMP_IMM",
            Op::Add(..) => "ADD",
            Op::Sub(..) => "SUB",
            Op::Mul(..) => "MUL",
            Op::Div(..) => "DIV",
            Op::IDiv(..) => "IDIV",
            Op::Mod(..) => "MOD",
            Op::Pow(..) => "POW",
            Op::Neg(..) => "NEG",
            Op::Concat(..) => "CONCAT",
            Op::Eq(..) => "EQ",
            Op::Lt(..) => "LT",
            Op::Gt(..) => "GT",
            Op::And(..) => "AND",
            Op::Or(..) => "OR",
            Op::Not(..) => "NOT",
            Op::AndBit(..) => "AND_BIT",
            Op::OrBit(..) => "OR_BIT",
            Op::Xor(..) => "XOR",
            Op::NotBit(..) => "NOT_BIT",
            Op::Shl(..) => "SHL",
            Op::Shr(..) => "SHR",
            Op::Sar(..) => "SAR",
            Op::Label(..) => "LABEL",
            Op::Jmp(..) => "JMP",
            Op::Jz(..) => "JZ",
            Op::Jnz(..) => "JNZ",
            Op::JmpRel(..) => "JMP_REL",
            Op::Param(..) => "PARAM",
            Op::ParamExpand(..) => "PARAM_EXPAND",
            Op::Call(..) => "CALL",
            Op::CallValue(..) => "CALL_VALUE",
            Op::Arg(..) => "ARG",
            Op::Return(..) => "RETURN",
            Op::ReturnMulti(..) => "RETURN_MULTI",
            Op::Result(..) => "RESULT",
            Op::ResultMulti(..) => "RESULT_MULTI",
            Op::ResultList(..) => "RESULT_LIST",
            Op::Vararg(..) => "VARARG",
            Op::VarargFirst(..) => "VARARG_FIRST",
            Op::BindUpvalue(..) => "BIND_UPVALUE",
            Op::MakeCell(..) => "MAKE_CELL",
            Op::CellGet(..) => "CELL_GET",
            Op::CellSet(..) => "CELL_SET",
            Op::Closure(..) => "CLOSURE",
            Op::TableNew(..) => "TABLE_NEW",
            Op::TableSet(..) => "TABLE_SET",
            Op::TableGet(..) => "TABLE_GET",
            Op::TableAppend(..) => "TABLE_APPEND",
            Op::TableExtend(..) => "TABLE_EXTEND",
            Op::ListGet(..) => "LIST_GET",
            Op::ArrInit(..) => "ARR_INIT",
            Op::ArrSet(..) => "ARR_SET",
            Op::ArrGet(..) => "ARR_GET",
            Op::ArrCopy(..) => "ARR_COPY",
            Op::Len(..) => "LEN",
            Op::Push(..) => "PUSH",
            Op::Pop(..) => "POP",
            Op::IsObj(..) => "IS_OBJ",
            Op::IsArr(..) => "IS_ARR",
            Op::IsNull(..) => "IS_NULL",
            Op::Coalesce(..) => "COALESCE",
            Op::Print(..) => "PRINT",
            Op::Halt => "HALT",
        }
    }
}

impl fmt::Debug for Op {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Op::LoadImm(d, v) => write!(f, "LOAD_IMM {}, {}", d, v),
            Op::LoadConst(d, k) => write!(f, "LOAD_CONST {}, k{}", d, k),
            Op::Mov(d, s) => write!(f, "MOV {}, {}", d, s),
            Op::Clr(d) => write!(f, "CLR {}", d),
            Op::CmpImm(d, s, imm) => write!(f, "CMP_IMM {}, {}, {}", d, s, imm),
            Op::Add(d, a, b) => write!(f, "ADD {}, {}, {}", d, a, b),
            Op::Sub(d, a, b) => write!(f, "SUB {}, {}, {}", d, a, b),
            Op::Mul(d, a, b) => write!(f, "MUL {}, {}, {}", d, a, b),
            Op::Div(d, a, b) => write!(f, "DIV {}, {}, {}", d, a, b),
            Op::IDiv(d, a, b) => write!(f, "IDIV {}, {}, {}", d, a, b),
            Op::Mod(d, a, b) => write!(f, "MOD {}, {}, {}", d, a, b),
            Op::Pow(d, a, b) => write!(f, "POW {}, {}, {}", d, a, b),
            Op::Neg(d, s) => write!(f, "NEG {}, {}", d, s),
            Op::Concat(d, a, b) => write!(f, "CONCAT {}, {}, {}", d, a, b),
            Op::Eq(d, a, b) => write!(f, "EQ {}, {}, {}", d, a, b),
            Op::Lt(d, a, b) => write!(f, "LT {}, {}, {}", d, a, b),
            Op::Gt(d, a, b) => write!(f, "GT {}, {}, {}", d, a, b),
            Op::And(d, a, b) => write!(f, "AND {}, {}, {}", d, a, b),
            Op::Or(d, a, b) => write!(f, "OR {}, {}, {}", d, a, b),
            Op::Not(d, s) => write!(f, "NOT {}, {}", d, s),
            Op::AndBit(d, a, b) => write!(f, "AND_BIT {}, {}, {}", d, a, b),
            Op::OrBit(d, a, b) => write!(f, "OR_BIT {}, {}, {}", d, a, b),
            Op::Xor(d, a, b) => write!(f, "XOR {}, {}, {}", d, a, b),
            Op::NotBit(d, s) => write!(f, "NOT_BIT {}, {}", d, s),
            Op::Shl(d, a, b) => write!(f, "SHL {}, {}, {}", d, a, b),
            Op::Shr(d, a, b) => write!(f, "SHR {}, {}, {}", d, a, b),
            Op::Sar(d, a, b) => write!(f, "SAR {}, {}, {}", d, a, b),
            Op::Label(l) => write!(f, "LABEL {}", l),
            Op::Jmp(l) => write!(f, "JMP {}", l),
            Op::Jz(r, l) => write!(f, "JZ {}, {}", r, l),
            Op::Jnz(r, l) => write!(f, "JNZ {}, {}", r, l),
            Op::JmpRel(o) => write!(f, "JMP_REL {}", o),
            Op::Param(r) => write!(f, "PARAM {}", r),
            Op::ParamExpand(r) => write!(f, "PARAM_EXPAND {}", r),
            Op::Call(l) => write!(f, "CALL {}", l),
            Op::CallValue(r) => write!(f, "CALL_VALUE {}", r),
            Op::Arg(d) => write!(f, "ARG {}", d),
            Op::Return(Some(r)) => write!(f, "RETURN {}", r),
            Op::Return(None) => write!(f, "RETURN"),
            Op::ReturnMulti(rs) => write!(f, "RETURN_MULTI {}", rs.join(", ")),
            Op::Result(d) => write!(f, "RESULT {}", d),
            Op::ResultMulti(ds) => write!(f, "RESULT_MULTI {}", ds.join(", ")),
            Op::ResultList(d) => write!(f, "RESULT_LIST {}", d),
            Op::Vararg(d) => write!(f, "VARARG {}", d),
            Op::VarargFirst(d, s) => write!(f, "VARARG_FIRST {}, {}", d, s),
            Op::BindUpvalue(d, i) => write!(f, "BIND_UPVALUE {}, {}", d, i),
            Op::MakeCell(d, s) => write!(f, "MAKE_CELL {}, {}", d, s),
            Op::CellGet(d, c) => write!(f, "CELL_GET {}, {}", d, c),
            Op::CellSet(c, s) => write!(f, "CELL_SET {}, {}", c, s),
            Op::Closure(d, l, cells) => {
                write!(f, "CLOSURE {}, {}", d, l)?;
                for cell in cells {
                    write!(f, ", {}", cell)?;
                }
                Ok(())
            }
            Op::TableNew(d) => write!(f, "TABLE_NEW {}", d),
            Op::TableSet(t, k, v) => write!(f, "TABLE_SET {}, {}, {}", t, k, v),
            Op::TableGet(d, t, k) => write!(f, "TABLE_GET {}, {}, {}", d, t, k),
            Op::TableAppend(t, v) => write!(f, "TABLE_APPEND {}, {}", t, v),
            Op::TableExtend(t, l) => write!(f, "TABLE_EXTEND {}, {}", t, l),
            Op::ListGet(d, l, i) => write!(f, "LIST_GET {}, {}, {}", d, l, i),
            Op::ArrInit(d, n) => write!(f, "ARR_INIT {}, {}", d, n),
            Op::ArrSet(t, i, v) => write!(f, "ARR_SET {}, {}, {}", t, i, v),
            Op::ArrGet(d, t, i) => write!(f, "ARR_GET {}, {}, {}", d, t, i),
            Op::ArrCopy(d, s, b, n) => write!(f, "ARR_COPY {}, {}, {}, {}", d, s, b, n),
            Op::Len(d, s) => write!(f, "LEN {}, {}", d, s),
            Op::Push(r) => write!(f, "PUSH {}", r),
            Op::Pop(d) => write!(f, "POP {}", d),
            Op::IsObj(d, s) => write!(f, "IS_OBJ {}, {}", d, s),
            Op::IsArr(d, s) => write!(f, "IS_ARR {}, {}", d, s),
            Op::IsNull(d, s) => write!(f, "IS_NULL {}, {}", d, s),
            Op::Coalesce(d, a, b) => write!(f, "COALESCE {}, {}, {}", d, a, b),
            Op::Print(r) => write!(f, "PRINT {}", r),
            Op::Halt => write!(f, "HALT"),
        }
    }
}

/// Source provenance attached to one instruction.
#[derive(Debug, Clone)]
pub struct DebugInfo {
    pub file: Rc<str>,
    pub line: u32,
    pub col: u32,
    pub function: Label,
}

#[derive(Debug, Clone)]
pub struct Instruction {
    pub op: Op,
    pub debug: Option<DebugInfo>,
}

impl Instruction {
    pub fn new(op: Op) -> Self {
        Self { op, debug: None }
    }

    pub fn with_debug(op: Op, debug: DebugInfo) -> Self {
        Self {
            op,
            debug: Some(debug),
        }
    }
}

/// Per-function metadata keyed by entry label; drives closure construction
/// and traceback display names.
#[derive(Debug, Clone)]
pub struct FunctionMeta {
    pub label: Label,
    /// User-declared name, or `<anonymous:LINE>`.
    pub name: Rc<str>,
    pub param_count: usize,
    pub is_vararg: bool,
    pub line: u32,
}

/// A linked program: linear code, label→PC table, constant pool, and
/// function metadata.
#[derive(Debug, Clone, Default)]
pub struct Program {
    pub code: Vec<Instruction>,
    pub labels: HashMap<Label, usize>,
    pub consts: Vec<Value>,
    pub functions: HashMap<Label, FunctionMeta>,
    /// Entry chunk label; raw bytecode programs without one start at PC 0.
    pub entry: Option<Label>,
    pub source_name: Rc<str>,
}

impl Program {
    /// Resolve LABEL markers to PCs, rejecting duplicates and validating
    /// every jump/call target.
    pub fn link(
        code: Vec<Instruction>,
        consts: Vec<Value>,
        functions: HashMap<Label, FunctionMeta>,
        entry: Option<Label>,
        source_name: impl Into<Rc<str>>,
    ) -> Result<Program, CompileError> {
        let source_name: Rc<str> = source_name.into();
        let mut labels: HashMap<Label, usize> = HashMap::new();
        for (pc, instr) in code.iter().enumerate() {
            if let Op::Label(name) = &instr.op {
                if labels.insert(name.clone(), pc).is_some() {
                    let (line, col) = debug_pos(instr);
                    return Err(CompileError::at_line(
                        format!("duplicate label '{}'", name),
                        source_name.as_ref(),
                        line,
                        col,
                    ));
                }
            }
        }
        for instr in &code {
            let target = match &instr.op {
                Op::Jmp(l) | Op::Jz(_, l) | Op::Jnz(_, l) | Op::Call(l) | Op::Closure(_, l, _) => l,
                _ => continue,
            };
            if !labels.contains_key(target) {
                let (line, col) = debug_pos(instr);
                return Err(CompileError::at_line(
                    format!("undefined label '{}'", target),
                    source_name.as_ref(),
                    line,
                    col,
                ));
            }
        }
        Ok(Program {
            code,
            labels,
            consts,
            functions,
            entry,
            source_name,
        })
    }

    pub fn label_pc(&self, label: &str) -> Option<usize> {
        self.labels.get(label).copied()
    }

    pub fn disassemble(&self) -> String {
        let mut out = String::new();
        for (pc, instr) in self.code.iter().enumerate() {
            out.push_str(&format!("{:4}  {:?}\n", pc, instr.op));
        }
        out
    }
}

fn debug_pos(instr: &Instruction) -> (u32, u32) {
    instr
        .debug
        .as_ref()
        .map(|d| (d.line, d.col))
        .unwrap_or((0, 0))
}
