//! The `debug` library: traceback formatting over live or suspended
//! coroutine frames.

use luma_core::val::Value;
use luma_core::vm::TraceFrame;
use luma_core::{RuntimeError, Vm};

use crate::support::{new_library, set_fn};

pub fn install(vm: &mut Vm) {
    let lib = new_library(vm, "debug");
    set_fn(&lib, "debug", "traceback", debug_traceback);
}

/// `debug.traceback([thread,] [message [, level]])`.
fn debug_traceback(args: &[Value], vm: &mut Vm) -> Result<Vec<Value>, RuntimeError> {
    let mut index = 0;
    let thread = match args.first() {
        Some(Value::Coroutine(co)) => {
            index += 1;
            Some(co.clone())
        }
        _ => None,
    };
    let message = match args.get(index) {
        Some(Value::Str(s)) => {
            index += 1;
            Some(s.to_string())
        }
        Some(Value::Nil) | None => {
            index += 1;
            None
        }
        // A non-string, non-nil message is returned unchanged, like Lua.
        Some(other) => return Ok(vec![other.clone()]),
    };
    let level = match args.get(index) {
        Some(value) => luma_core::val::tointeger(value).unwrap_or(0).max(0) as usize,
        None => 0,
    };

    let frames: Vec<TraceFrame> = match &thread {
        Some(co) => vm.traceback_of_coroutine(co),
        None => vm.capture_traceback(),
    };

    let mut out = String::new();
    if let Some(message) = message {
        out.push_str(&message);
        out.push('\n');
    }
    out.push_str("stack traceback:");
    for frame in frames.iter().skip(level) {
        out.push('\n');
        out.push_str(&frame.format_line());
    }
    Ok(vec![Value::str(out)])
}
