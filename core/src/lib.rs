//! Luma core: a teaching-grade register bytecode VM with a Lua-subset
//! front-end.
//!
//! Programs flow `source → tokens → AST → bytecode → VM`. The [`compile`]
//! function covers the front half; [`vm::Vm`] executes the linked
//! [`vm::Program`] with cooperative coroutines, an event stream, and
//! Lua-style tracebacks.

pub mod ast;
pub mod compile;
pub mod token;
pub mod val;
pub mod vm;

pub use compile::compile;
pub use token::CompileError;
pub use vm::{LuaError, RunOptions, RunOutput, RuntimeError, Vm};

/// Compile and run a chunk in one shot with default options.
pub fn run_source(source: &str, source_name: &str) -> Result<RunOutput, LuaError> {
    let program = compile(source, source_name)?;
    let mut vm = Vm::new(program);
    vm.run(RunOptions::default()).map_err(LuaError::from)
}
