//! Runtime error values and Lua-style traceback formatting.

use std::fmt;

use thiserror::Error;

use crate::token::CompileError;
use crate::val::{tostring, Value};

/// One frame captured at the raise point, innermost first.
#[derive(Debug, Clone)]
pub struct TraceFrame {
    /// Display name: `function 'foo'`, `function <anonymous:3>`, `main chunk`,
    /// or a foreign callable name.
    pub name: String,
    pub file: String,
    pub line: u32,
    pub pc: usize,
    pub coroutine_id: u32,
    pub is_foreign: bool,
}

impl TraceFrame {
    pub fn format_line(&self) -> String {
        if self.is_foreign {
            format!("\t[C]: in function '{}'", self.name)
        } else {
            format!("\t{}:{}: in {}", self.file, self.line, self.name)
        }
    }
}

/// A raised Lua error: an arbitrary value plus the frames live at the raise
/// point. Everything except compile errors flows through this type.
#[derive(Clone)]
pub struct RuntimeError {
    pub value: Value,
    pub traceback: Vec<TraceFrame>,
}

impl RuntimeError {
    pub fn new(value: Value) -> Self {
        Self {
            value,
            traceback: Vec::new(),
        }
    }

    pub fn msg(message: impl AsRef<str>) -> Self {
        Self::new(Value::str(message.as_ref()))
    }

    pub fn with_traceback(mut self, frames: Vec<TraceFrame>) -> Self {
        if self.traceback.is_empty() {
            self.traceback = frames;
        }
        self
    }

    /// The error value rendered as a message string.
    pub fn message(&self) -> String {
        tostring(&self.value)
    }

    /// `<message>\nstack traceback:\n\t...`
    pub fn format_with_traceback(&self) -> String {
        let mut out = self.message();
        out.push_str("\nstack traceback:");
        for frame in &self.traceback {
            out.push('\n');
            out.push_str(&frame.format_line());
        }
        out
    }
}

impl fmt::Display for RuntimeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message())
    }
}

impl fmt::Debug for RuntimeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RuntimeError({})", self.message())
    }
}

impl std::error::Error for RuntimeError {}

/// Top-level error surface: compile stage or runtime stage. The CLI maps
/// these to exit codes 2 and 1 respectively.
#[derive(Debug, Error)]
pub enum LuaError {
    #[error(transparent)]
    Compile(#[from] CompileError),
    #[error("{}", .0.message())]
    Runtime(#[from] RuntimeError),
}
