//! Base globals: print, type conversion, iteration, raw access,
//! metatables, and the protected-call family.

use luma_core::val::{tonumber_base, Number, Value};
use luma_core::{RuntimeError, Vm};

use crate::support::{arg, bad_argument, check_callable, check_int, check_table, foreign};

pub fn install(vm: &mut Vm) {
    vm.register_foreign("print", lua_print);
    vm.register_foreign("type", lua_type);
    vm.register_foreign("tostring", lua_tostring);
    vm.register_foreign("tonumber", lua_tonumber);
    vm.register_foreign("ipairs", lua_ipairs);
    vm.register_foreign("pairs", lua_pairs);
    vm.register_foreign("next", lua_next);
    vm.register_foreign("select", lua_select);
    vm.register_foreign("rawget", lua_rawget);
    vm.register_foreign("rawset", lua_rawset);
    vm.register_foreign("rawequal", lua_rawequal);
    vm.register_foreign("rawlen", lua_rawlen);
    vm.register_foreign("setmetatable", lua_setmetatable);
    vm.register_foreign("getmetatable", lua_getmetatable);
    vm.register_foreign("assert", lua_assert);
    vm.register_foreign("error", lua_error);
    vm.register_foreign("pcall", lua_pcall);
    vm.register_foreign("xpcall", lua_xpcall);
}

fn lua_print(args: &[Value], vm: &mut Vm) -> Result<Vec<Value>, RuntimeError> {
    let mut parts = Vec::with_capacity(args.len());
    for value in args {
        parts.push(vm.lua_tostring(value)?);
    }
    vm.push_output(Value::str(parts.join("\t")));
    Ok(Vec::new())
}

fn lua_type(args: &[Value], _vm: &mut Vm) -> Result<Vec<Value>, RuntimeError> {
    Ok(vec![Value::str(arg(args, 0).type_name())])
}

fn lua_tostring(args: &[Value], vm: &mut Vm) -> Result<Vec<Value>, RuntimeError> {
    let text = vm.lua_tostring(&arg(args, 0))?;
    Ok(vec![Value::str(text)])
}

fn lua_tonumber(args: &[Value], _vm: &mut Vm) -> Result<Vec<Value>, RuntimeError> {
    let value = arg(args, 0);
    match args.get(1) {
        None | Some(Value::Nil) => Ok(vec![luma_core::val::tonumber(&value)
            .map(Number::into_value)
            .unwrap_or(Value::Nil)]),
        Some(base) => {
            let base = luma_core::val::tointeger(base)
                .filter(|b| (2..=36).contains(b))
                .ok_or_else(|| RuntimeError::msg("bad argument #2 to 'tonumber' (base out of range)"))?;
            Ok(vec![tonumber_base(&value, base as u32)
                .map(Value::Int)
                .unwrap_or(Value::Nil)])
        }
    }
}

fn lua_ipairs(args: &[Value], _vm: &mut Vm) -> Result<Vec<Value>, RuntimeError> {
    let table = arg(args, 0);
    let iter = foreign("ipairs.iterator", |args, vm| {
        let table = arg(args, 0);
        let index = check_int(args, 1, "ipairs")? + 1;
        let value = vm.table_get(&table, &Value::Int(index))?;
        if matches!(value, Value::Nil) {
            Ok(vec![Value::Nil])
        } else {
            Ok(vec![Value::Int(index), value])
        }
    });
    Ok(vec![iter, table, Value::Int(0)])
}

fn lua_pairs(args: &[Value], vm: &mut Vm) -> Result<Vec<Value>, RuntimeError> {
    let table = arg(args, 0);
    let next = vm.get_global("next");
    Ok(vec![next, table, Value::Nil])
}

fn lua_next(args: &[Value], _vm: &mut Vm) -> Result<Vec<Value>, RuntimeError> {
    let table = check_table(args, 0, "next")?;
    let key = arg(args, 1);
    let key = if matches!(key, Value::Nil) { None } else { Some(key) };
    let result = table.borrow().next_entry(key.as_ref());
    match result {
        Some((k, v)) => Ok(vec![k, v]),
        None => Ok(vec![Value::Nil]),
    }
}

fn lua_select(args: &[Value], _vm: &mut Vm) -> Result<Vec<Value>, RuntimeError> {
    let selector = arg(args, 0);
    let rest = &args[1.min(args.len())..];
    if let Value::Str(s) = &selector {
        if s.as_ref() == "#" {
            return Ok(vec![Value::Int(rest.len() as i64)]);
        }
    }
    let n = luma_core::val::tointeger(&selector)
        .ok_or_else(|| bad_argument(1, "select", "number", &selector))?;
    if n < 0 {
        let from = rest.len() as i64 + n;
        if from < 0 {
            return Err(RuntimeError::msg("bad argument #1 to 'select' (index out of range)"));
        }
        return Ok(rest[from as usize..].to_vec());
    }
    if n == 0 {
        return Err(RuntimeError::msg("bad argument #1 to 'select' (index out of range)"));
    }
    Ok(rest[(n as usize - 1).min(rest.len())..].to_vec())
}

fn lua_rawget(args: &[Value], _vm: &mut Vm) -> Result<Vec<Value>, RuntimeError> {
    let table = check_table(args, 0, "rawget")?;
    let value = table.borrow().raw_get(&arg(args, 1));
    Ok(vec![value])
}

fn lua_rawset(args: &[Value], _vm: &mut Vm) -> Result<Vec<Value>, RuntimeError> {
    let table = check_table(args, 0, "rawset")?;
    table
        .borrow_mut()
        .raw_set(arg(args, 1), arg(args, 2))
        .map_err(RuntimeError::msg)?;
    Ok(vec![arg(args, 0)])
}

fn lua_rawequal(args: &[Value], _vm: &mut Vm) -> Result<Vec<Value>, RuntimeError> {
    Ok(vec![Value::Bool(arg(args, 0).raw_eq(&arg(args, 1)))])
}

fn lua_rawlen(args: &[Value], _vm: &mut Vm) -> Result<Vec<Value>, RuntimeError> {
    match arg(args, 0) {
        Value::Table(t) => Ok(vec![Value::Int(t.borrow().lua_len())]),
        Value::Str(s) => Ok(vec![Value::Int(s.len() as i64)]),
        other => Err(bad_argument(1, "rawlen", "table or string", &other)),
    }
}

fn lua_setmetatable(args: &[Value], _vm: &mut Vm) -> Result<Vec<Value>, RuntimeError> {
    let table = check_table(args, 0, "setmetatable")?;
    match arg(args, 1) {
        Value::Table(meta) => table.borrow_mut().set_metatable(Some(meta)),
        Value::Nil => table.borrow_mut().set_metatable(None),
        other => return Err(bad_argument(2, "setmetatable", "nil or table", &other)),
    }
    Ok(vec![arg(args, 0)])
}

fn lua_getmetatable(args: &[Value], _vm: &mut Vm) -> Result<Vec<Value>, RuntimeError> {
    match arg(args, 0) {
        Value::Table(t) => {
            let meta = t.borrow().metatable();
            Ok(vec![meta.map(Value::Table).unwrap_or(Value::Nil)])
        }
        _ => Ok(vec![Value::Nil]),
    }
}

fn lua_assert(args: &[Value], vm: &mut Vm) -> Result<Vec<Value>, RuntimeError> {
    if arg(args, 0).truthy() {
        return Ok(args.to_vec());
    }
    match args.get(1) {
        Some(message) => Err(vm.raise_value(message.clone())),
        None => Err(vm.raise_value(Value::str("assertion failed!"))),
    }
}

/// `error(v, level)`: string values get a `file:line:` prefix taken from
/// the `level`-th calling frame; `level = 0` suppresses it.
fn lua_error(args: &[Value], vm: &mut Vm) -> Result<Vec<Value>, RuntimeError> {
    let value = arg(args, 0);
    let level = match args.get(1) {
        None | Some(Value::Nil) => 1,
        Some(v) => luma_core::val::tointeger(v).unwrap_or(1),
    };
    let value = match (&value, level) {
        (Value::Str(message), level) if level >= 1 => {
            match vm.location_of_level(level as usize) {
                Some((file, line)) => Value::str(format!("{}:{}: {}", file, line, message)),
                None => value.clone(),
            }
        }
        _ => value,
    };
    Err(vm.raise_value(value))
}

fn lua_pcall(args: &[Value], vm: &mut Vm) -> Result<Vec<Value>, RuntimeError> {
    let f = arg(args, 0);
    match vm.call_function(&f, args[1.min(args.len())..].to_vec()) {
        Ok(mut values) => {
            let mut out = vec![Value::Bool(true)];
            out.append(&mut values);
            Ok(out)
        }
        Err(err) => Ok(vec![Value::Bool(false), err.value]),
    }
}

/// Like pcall, but the handler runs inside the protected region and its
/// result replaces the error value.
fn lua_xpcall(args: &[Value], vm: &mut Vm) -> Result<Vec<Value>, RuntimeError> {
    let f = arg(args, 0);
    let handler = check_callable(args, 1, "xpcall")?;
    match vm.call_function(&f, args[2.min(args.len())..].to_vec()) {
        Ok(mut values) => {
            let mut out = vec![Value::Bool(true)];
            out.append(&mut values);
            Ok(out)
        }
        Err(err) => match vm.call_function(&handler, vec![err.value]) {
            Ok(handled) => Ok(vec![
                Value::Bool(false),
                handled.into_iter().next().unwrap_or(Value::Nil),
            ]),
            Err(handler_err) => Ok(vec![Value::Bool(false), handler_err.value]),
        },
    }
}

