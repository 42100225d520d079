//! Argument checking and registration helpers shared by the libraries.

use std::cell::RefCell;
use std::rc::Rc;

use luma_core::val::{tointeger, tonumber, ForeignFunction, LuaTable, Number, TableRef, Value};
use luma_core::vm::CoroutineRef;
use luma_core::{RuntimeError, Vm};

/// Wrap a Rust closure as a foreign callable value.
pub fn foreign<F>(name: &str, func: F) -> Value
where
    F: Fn(&[Value], &mut Vm) -> Result<Vec<Value>, RuntimeError> + 'static,
{
    Value::Foreign(Rc::new(ForeignFunction::new(name, func)))
}

/// Create a library table, register it under a global name, and return it
/// for member registration.
pub fn new_library(vm: &mut Vm, name: &str) -> TableRef {
    let table = Rc::new(RefCell::new(LuaTable::new()));
    vm.set_global(name, Value::Table(table.clone()));
    table
}

pub fn set_member(table: &TableRef, name: &str, value: Value) {
    table.borrow_mut().raw_set_unchecked(Value::str(name), value);
}

pub fn set_fn<F>(table: &TableRef, lib: &str, name: &str, func: F)
where
    F: Fn(&[Value], &mut Vm) -> Result<Vec<Value>, RuntimeError> + 'static,
{
    set_member(table, name, foreign(&format!("{}.{}", lib, name), func));
}

pub fn bad_argument(index: usize, fname: &str, expected: &str, got: &Value) -> RuntimeError {
    RuntimeError::msg(format!(
        "bad argument #{} to '{}' ({} expected, got {})",
        index,
        fname,
        expected,
        got.type_name()
    ))
}

pub fn arg(args: &[Value], index: usize) -> Value {
    args.get(index).cloned().unwrap_or(Value::Nil)
}

pub fn check_number(args: &[Value], index: usize, fname: &str) -> Result<Number, RuntimeError> {
    let value = arg(args, index);
    tonumber(&value).ok_or_else(|| bad_argument(index + 1, fname, "number", &value))
}

pub fn check_int(args: &[Value], index: usize, fname: &str) -> Result<i64, RuntimeError> {
    let value = arg(args, index);
    tointeger(&value).ok_or_else(|| bad_argument(index + 1, fname, "number", &value))
}

pub fn opt_int(args: &[Value], index: usize, default: i64, fname: &str) -> Result<i64, RuntimeError> {
    match args.get(index) {
        None | Some(Value::Nil) => Ok(default),
        Some(value) => tointeger(value).ok_or_else(|| bad_argument(index + 1, fname, "number", value)),
    }
}

pub fn check_str(args: &[Value], index: usize, fname: &str) -> Result<Rc<str>, RuntimeError> {
    match arg(args, index) {
        Value::Str(s) => Ok(s),
        // Numbers coerce to strings where a string is expected.
        Value::Int(i) => Ok(Rc::from(i.to_string().as_str())),
        Value::Float(f) => Ok(Rc::from(luma_core::val::float_to_display(f).as_str())),
        other => Err(bad_argument(index + 1, fname, "string", &other)),
    }
}

pub fn check_table(args: &[Value], index: usize, fname: &str) -> Result<TableRef, RuntimeError> {
    match arg(args, index) {
        Value::Table(t) => Ok(t),
        other => Err(bad_argument(index + 1, fname, "table", &other)),
    }
}

pub fn check_coroutine(args: &[Value], index: usize, fname: &str) -> Result<CoroutineRef, RuntimeError> {
    match arg(args, index) {
        Value::Coroutine(co) => Ok(co),
        other => Err(bad_argument(index + 1, fname, "coroutine", &other)),
    }
}

pub fn check_callable(args: &[Value], index: usize, fname: &str) -> Result<Value, RuntimeError> {
    match arg(args, index) {
        value @ (Value::Closure(_) | Value::Foreign(_)) => Ok(value),
        other => Err(bad_argument(index + 1, fname, "function", &other)),
    }
}
