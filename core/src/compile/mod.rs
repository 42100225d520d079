//! AST → bytecode lowering.

mod analysis;
mod compiler;
mod expr;

#[cfg(test)]
mod compiler_test;

pub use analysis::{analyze, Analysis, FunctionInfo};
pub use compiler::Compiler;

use crate::ast::parse;
use crate::token::CompileError;
use crate::vm::Program;

/// Compile a source chunk into a linked program. No implicit globals are
/// read at compile time; the chunk resolves globals through `_ENV` when run.
pub fn compile(source: &str, source_name: &str) -> Result<Program, CompileError> {
    let chunk = parse(source, source_name)?;
    let analysis = analyze(&chunk);
    tracing::debug!(source = source_name, functions = analysis.functions.len(), "compile");
    Compiler::new(source_name, analysis).compile(&chunk)
}
