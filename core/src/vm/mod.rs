//! Register bytecode VM: instruction set, dispatch loop, coroutine
//! scheduler, events, and the runtime error model.

mod bytecode;
mod coroutine;
mod error;
mod events;
mod frame;
mod machine;
mod meta;

#[cfg(test)]
mod vm_test;

pub use bytecode::{DebugInfo, FunctionMeta, Instruction, Label, Op, Program, Reg};
pub use coroutine::{Coroutine, CoroutineRef, CoroutineStatus, ResumeResult};
pub use error::{LuaError, RuntimeError, TraceFrame};
pub use events::{CoroutineSnapshot, Event, EventBuffer, EventKind, TraceMode, VmSnapshot};
pub use frame::{CallFrame, ExecState, Frame};
pub use machine::{RunOptions, RunOutcome, RunOutput, Vm, ENV_REG};
