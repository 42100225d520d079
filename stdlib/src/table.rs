//! The `table` library: insert/remove, concat, stable sort, pack/unpack,
//! move.

use luma_core::val::{tostring, LuaTable, Value};
use luma_core::{RuntimeError, Vm};

use crate::support::{arg, check_int, check_str, check_table, new_library, opt_int, set_fn};

pub fn install(vm: &mut Vm) {
    let lib = new_library(vm, "table");
    set_fn(&lib, "table", "insert", table_insert);
    set_fn(&lib, "table", "remove", table_remove);
    set_fn(&lib, "table", "concat", table_concat);
    set_fn(&lib, "table", "sort", table_sort);
    set_fn(&lib, "table", "pack", table_pack);
    set_fn(&lib, "table", "unpack", table_unpack);
    set_fn(&lib, "table", "move", table_move);
    // `unpack` is also reachable as a base global, Lua 5.1 style.
    let unpack = lib.borrow().raw_get(&Value::str("unpack"));
    vm.set_global("unpack", unpack);
}

fn table_insert(args: &[Value], _vm: &mut Vm) -> Result<Vec<Value>, RuntimeError> {
    let table = check_table(args, 0, "insert")?;
    match args.len() {
        0..=1 => Err(RuntimeError::msg("wrong number of arguments to 'insert'")),
        2 => {
            table.borrow_mut().push(arg(args, 1));
            Ok(Vec::new())
        }
        _ => {
            let pos = check_int(args, 1, "insert")?;
            table.borrow_mut().insert_at(pos, arg(args, 2));
            Ok(Vec::new())
        }
    }
}

fn table_remove(args: &[Value], _vm: &mut Vm) -> Result<Vec<Value>, RuntimeError> {
    let table = check_table(args, 0, "remove")?;
    let pos = match args.get(1) {
        None | Some(Value::Nil) => None,
        Some(_) => Some(check_int(args, 1, "remove")?),
    };
    let removed = table.borrow_mut().remove_at(pos);
    Ok(vec![removed])
}

fn table_concat(args: &[Value], _vm: &mut Vm) -> Result<Vec<Value>, RuntimeError> {
    let table = check_table(args, 0, "concat")?;
    let sep = match args.get(1) {
        None | Some(Value::Nil) => String::new(),
        Some(_) => check_str(args, 1, "concat")?.to_string(),
    };
    let len = table.borrow().lua_len();
    let from = opt_int(args, 2, 1, "concat")?;
    let to = opt_int(args, 3, len, "concat")?;
    let mut parts = Vec::new();
    for index in from..=to {
        let value = table.borrow().raw_get(&Value::Int(index));
        match value {
            Value::Str(_) | Value::Int(_) | Value::Float(_) => parts.push(tostring(&value)),
            other => {
                return Err(RuntimeError::msg(format!(
                    "invalid value (at index {}) in table for 'concat' ({})",
                    index,
                    other.type_name()
                )));
            }
        }
    }
    Ok(vec![Value::str(parts.join(&sep))])
}

/// Stable merge sort. The comparator (or `<`) observes a snapshot of the
/// array part taken at entry, so a misbehaving comparator cannot corrupt
/// the table mid-sort.
fn table_sort(args: &[Value], vm: &mut Vm) -> Result<Vec<Value>, RuntimeError> {
    let table = check_table(args, 0, "sort")?;
    let comparator = args.get(1).filter(|v| !matches!(v, Value::Nil)).cloned();

    let mut items: Vec<Value> = table.borrow().array_part().to_vec();
    let mut less = |vm: &mut Vm, a: &Value, b: &Value| -> Result<bool, RuntimeError> {
        match &comparator {
            Some(cmp) => {
                let result = vm.call_function(cmp, vec![a.clone(), b.clone()])?;
                Ok(result.first().map(Value::truthy).unwrap_or(false))
            }
            None => vm.lua_less(a, b),
        }
    };
    merge_sort(vm, &mut items, &mut less)?;

    let mut target = table.borrow_mut();
    for (index, value) in items.into_iter().enumerate() {
        target
            .raw_set(Value::Int(index as i64 + 1), value)
            .map_err(RuntimeError::msg)?;
    }
    Ok(Vec::new())
}

fn merge_sort<F>(vm: &mut Vm, items: &mut Vec<Value>, less: &mut F) -> Result<(), RuntimeError>
where
    F: FnMut(&mut Vm, &Value, &Value) -> Result<bool, RuntimeError>,
{
    let len = items.len();
    if len <= 1 {
        return Ok(());
    }
    let mut right = items.split_off(len / 2);
    merge_sort(vm, items, less)?;
    merge_sort(vm, &mut right, less)?;

    let left = std::mem::take(items);
    let mut merged = Vec::with_capacity(left.len() + right.len());
    let mut li = left.into_iter().peekable();
    let mut ri = right.into_iter().peekable();
    loop {
        match (li.peek(), ri.peek()) {
            (Some(a), Some(b)) => {
                // Stability: take from the left unless the right is
                // strictly smaller.
                if less(vm, b, a)? {
                    merged.push(ri.next().unwrap());
                } else {
                    merged.push(li.next().unwrap());
                }
            }
            (Some(_), None) => merged.push(li.next().unwrap()),
            (None, Some(_)) => merged.push(ri.next().unwrap()),
            (None, None) => break,
        }
    }
    *items = merged;
    Ok(())
}

fn table_pack(args: &[Value], _vm: &mut Vm) -> Result<Vec<Value>, RuntimeError> {
    let mut packed = LuaTable::new();
    for value in args {
        packed.push(value.clone());
    }
    packed.raw_set_unchecked(Value::str("n"), Value::Int(args.len() as i64));
    Ok(vec![Value::table(packed)])
}

fn table_unpack(args: &[Value], _vm: &mut Vm) -> Result<Vec<Value>, RuntimeError> {
    let table = check_table(args, 0, "unpack")?;
    let len = table.borrow().lua_len();
    let from = opt_int(args, 1, 1, "unpack")?;
    let to = opt_int(args, 2, len, "unpack")?;
    let mut values = Vec::new();
    for index in from..=to {
        values.push(table.borrow().raw_get(&Value::Int(index)));
    }
    Ok(values)
}

fn table_move(args: &[Value], _vm: &mut Vm) -> Result<Vec<Value>, RuntimeError> {
    let source = check_table(args, 0, "move")?;
    let from = check_int(args, 1, "move")?;
    let to = check_int(args, 2, "move")?;
    let dest_start = check_int(args, 3, "move")?;
    let dest = match args.get(4) {
        None | Some(Value::Nil) => source.clone(),
        Some(_) => check_table(args, 4, "move")?,
    };
    if to >= from {
        // Copy through a snapshot so overlapping ranges in the same table
        // behave.
        let window: Vec<Value> = (from..=to)
            .map(|i| source.borrow().raw_get(&Value::Int(i)))
            .collect();
        let mut target = dest.borrow_mut();
        for (offset, value) in window.into_iter().enumerate() {
            target
                .raw_set(Value::Int(dest_start + offset as i64), value)
                .map_err(RuntimeError::msg)?;
        }
    }
    Ok(vec![Value::Table(dest)])
}
