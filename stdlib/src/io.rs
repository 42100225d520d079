//! Sandboxed `io` library: writes land in the VM output buffer, never on
//! the host filesystem.

use std::cell::RefCell;
use std::rc::Rc;

use luma_core::val::{LuaTable, TableRef, Value};
use luma_core::{RuntimeError, Vm};

use crate::support::{foreign, new_library, set_member};

pub fn install(vm: &mut Vm) {
    let lib = new_library(vm, "io");
    set_member(&lib, "write", foreign("io.write", io_write));
    set_member(&lib, "type", foreign("io.type", io_type));
    set_member(&lib, "stdout", Value::Table(stream_handle("stdout")));
    set_member(&lib, "stderr", Value::Table(stream_handle("stderr")));
}

/// Append every argument to the output buffer as one unseparated string.
fn io_write(args: &[Value], vm: &mut Vm) -> Result<Vec<Value>, RuntimeError> {
    let mut text = String::new();
    for value in args {
        match value {
            Value::Str(_) | Value::Int(_) | Value::Float(_) => {
                text.push_str(&luma_core::val::tostring(value));
            }
            other => {
                return Err(RuntimeError::msg(format!(
                    "bad argument to 'write' (string expected, got {})",
                    other.type_name()
                )));
            }
        }
    }
    vm.push_output(Value::str(text));
    Ok(Vec::new())
}

/// A file-like handle table with a `write` method; the marker field drives
/// `io.type`.
fn stream_handle(name: &'static str) -> TableRef {
    let handle = Rc::new(RefCell::new(LuaTable::new()));
    handle
        .borrow_mut()
        .raw_set_unchecked(Value::str("__stream"), Value::str(name));
    let write = foreign(&format!("io.{}.write", name), |args, vm| {
        // Skip the self argument from method-call syntax.
        let rest = if matches!(args.first(), Some(Value::Table(_))) {
            &args[1..]
        } else {
            args
        };
        io_write(rest, vm)?;
        Ok(vec![args.first().cloned().unwrap_or(Value::Nil)])
    });
    handle.borrow_mut().raw_set_unchecked(Value::str("write"), write);
    handle
}

fn io_type(args: &[Value], _vm: &mut Vm) -> Result<Vec<Value>, RuntimeError> {
    match args.first() {
        Some(Value::Table(t)) => {
            let marker = t.borrow().raw_get(&Value::str("__stream"));
            if matches!(marker, Value::Str(_)) {
                Ok(vec![Value::str("file")])
            } else {
                Ok(vec![Value::Nil])
            }
        }
        _ => Ok(vec![Value::Nil]),
    }
}
