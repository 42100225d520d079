//! Call frames and the swappable execution state.

use std::collections::{HashMap, VecDeque};

use crate::val::{CellRef, Value};
use crate::vm::bytecode::Label;

/// One entry on the frame stack. `Foreign` marks a host callable in
/// progress (the yield barrier); `ResumeBoundary` marks where a coroutine
/// was entered.
#[derive(Debug)]
pub enum Frame {
    Call(CallFrame),
    Foreign(ForeignFrame),
    ResumeBoundary { coroutine_id: u32 },
}

#[derive(Debug)]
pub struct CallFrame {
    pub return_pc: usize,
    pub saved_registers: HashMap<String, Value>,
    pub saved_upvalues: Vec<CellRef>,
    /// Caller's leftover parameter queue, restored on return. Callers drain
    /// the queue into the callee at CALL, so this is empty in compiled code;
    /// the field keeps hand-written bytecode honest.
    pub saved_pending: VecDeque<Value>,
    pub function_label: Label,
    /// Pushed by the host (`call_function`/resume) rather than by a CALL
    /// instruction; the stack below it belongs to the host caller.
    pub is_entry: bool,
}

#[derive(Debug)]
pub struct ForeignFrame {
    pub name: std::rc::Rc<str>,
}

/// Everything a coroutine owns while suspended, and the VM's live state
/// while it runs. Resume/yield swap this struct in one move.
#[derive(Debug, Default)]
pub struct ExecState {
    pub pc: usize,
    pub registers: HashMap<String, Value>,
    /// Pending-parameter queue: PARAM pushes, ARG pops, VARARG drains.
    pub pending: VecDeque<Value>,
    pub last_return: Vec<Value>,
    /// Data stack for PUSH/POP.
    pub stack: Vec<Value>,
    pub upvalues: Vec<CellRef>,
    pub frames: Vec<Frame>,
    pub halted: bool,
}

impl ExecState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Depth counting only bytecode call frames, for traceback sizing.
    pub fn call_depth(&self) -> usize {
        self.frames
            .iter()
            .filter(|f| matches!(f, Frame::Call(_)))
            .count()
    }

    /// Innermost bytecode function label, if any frame is live.
    pub fn current_function(&self) -> Option<&Label> {
        self.frames.iter().rev().find_map(|f| match f {
            Frame::Call(cf) => Some(&cf.function_label),
            _ => None,
        })
    }
}
