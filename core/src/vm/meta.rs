//! Arithmetic, comparison, and table access with metamethod dispatch.

use crate::val::{tonumber, tostring, Number, TableRef, Value};
use crate::vm::bytecode::Reg;
use crate::vm::error::RuntimeError;
use crate::vm::machine::Vm;

/// How deep `__index`/`__newindex` chains may walk before the VM assumes a
/// loop.
const INDEX_CHAIN_LIMIT: usize = 200;

impl Vm {
    /// `t[k]` with the full `__index` chain.
    pub fn table_get(&mut self, obj: &Value, key: &Value) -> Result<Value, RuntimeError> {
        self.index_value(obj, key, 0)
    }

    /// `t[k] = v` with `__newindex` dispatch.
    pub fn table_set_value(&mut self, obj: &Value, key: Value, value: Value) -> Result<(), RuntimeError> {
        self.newindex_value(obj, key, value, 0)
    }

    /// `a == b` with `__eq` dispatch.
    pub fn lua_equals(&mut self, lhs: &Value, rhs: &Value) -> Result<bool, RuntimeError> {
        self.values_equal(lhs, rhs)
    }

    /// `a < b` with `__lt` dispatch.
    pub fn lua_less(&mut self, lhs: &Value, rhs: &Value) -> Result<bool, RuntimeError> {
        self.values_less(lhs, rhs)
    }

    /// `#v` with `__len` dispatch.
    pub fn lua_len(&mut self, value: &Value) -> Result<Value, RuntimeError> {
        self.length_of(value)
    }

    /// `tostring(v)` honoring a `__tostring` metamethod.
    pub fn lua_tostring(&mut self, value: &Value) -> Result<String, RuntimeError> {
        if let Some(handler) = self.metamethod(value, "__tostring") {
            let results = self.call_function(&handler, vec![value.clone()])?;
            return Ok(crate::val::tostring(results.first().unwrap_or(&Value::Nil)));
        }
        Ok(crate::val::tostring(value))
    }

    pub(crate) fn value_metatable(&self, value: &Value) -> Option<TableRef> {
        match value {
            Value::Table(t) => t.borrow().metatable(),
            Value::Str(_) => self.string_metatable(),
            _ => None,
        }
    }

    /// Look up a metamethod on a value, if its metatable defines one.
    pub fn metamethod(&self, value: &Value, name: &str) -> Option<Value> {
        let meta = self.value_metatable(value)?;
        let method = meta.borrow().raw_get(&Value::str(name));
        if matches!(method, Value::Nil) {
            None
        } else {
            Some(method)
        }
    }

    /// Binary metamethod dispatch: left operand's metatable first, then the
    /// right's.
    fn binary_metamethod(
        &mut self,
        event: &str,
        lhs: &Value,
        rhs: &Value,
    ) -> Option<Result<Value, RuntimeError>> {
        let handler = self
            .metamethod(lhs, event)
            .or_else(|| self.metamethod(rhs, event))?;
        Some(
            self.call_function(&handler, vec![lhs.clone(), rhs.clone()])
                .map(|values| values.into_iter().next().unwrap_or(Value::Nil)),
        )
    }

    pub(crate) fn binary_arith(
        &mut self,
        dst: &Reg,
        a: &Reg,
        b: &Reg,
        event: &str,
        op_name: &str,
    ) -> Result<(), RuntimeError> {
        let lhs = self.get_reg(a);
        let rhs = self.get_reg(b);
        let result = self.arith_values(event, op_name, &lhs, &rhs)?;
        self.set_reg(dst, result);
        Ok(())
    }

    pub(crate) fn arith_values(
        &mut self,
        event: &str,
        op_name: &str,
        lhs: &Value,
        rhs: &Value,
    ) -> Result<Value, RuntimeError> {
        if let (Some(x), Some(y)) = (tonumber(lhs), tonumber(rhs)) {
            return self.arith_numbers(event, x, y);
        }
        match self.binary_metamethod(event, lhs, rhs) {
            Some(result) => result,
            None => {
                let offender = if tonumber(lhs).is_none() { lhs } else { rhs };
                Err(self.error(format!(
                    "attempt to perform arithmetic ({}) on a {} value",
                    op_name,
                    offender.type_name()
                )))
            }
        }
    }

    fn arith_numbers(&self, event: &str, x: Number, y: Number) -> Result<Value, RuntimeError> {
        let value = match event {
            "__add" => match (x, y) {
                (Number::Int(a), Number::Int(b)) => Value::Int(a.wrapping_add(b)),
                _ => Value::Float(x.as_f64() + y.as_f64()),
            },
            "__sub" => match (x, y) {
                (Number::Int(a), Number::Int(b)) => Value::Int(a.wrapping_sub(b)),
                _ => Value::Float(x.as_f64() - y.as_f64()),
            },
            "__mul" => match (x, y) {
                (Number::Int(a), Number::Int(b)) => Value::Int(a.wrapping_mul(b)),
                _ => Value::Float(x.as_f64() * y.as_f64()),
            },
            // DIV floor-divides integer pairs; anything else is float
            // division. The Lua front-end coerces its dividend to float to
            // get `/` semantics, so only raw bytecode observes the int path.
            "__div" => match (x, y) {
                (Number::Int(a), Number::Int(b)) => {
                    if b == 0 {
                        return Err(self.error("attempt to perform 'n//0'"));
                    }
                    Value::Int(floor_div(a, b))
                }
                _ => Value::Float(x.as_f64() / y.as_f64()),
            },
            "__idiv" => match (x, y) {
                (Number::Int(a), Number::Int(b)) => {
                    if b == 0 {
                        return Err(self.error("attempt to perform 'n//0'"));
                    }
                    Value::Int(floor_div(a, b))
                }
                _ => Value::Float((x.as_f64() / y.as_f64()).floor()),
            },
            "__mod" => match (x, y) {
                (Number::Int(a), Number::Int(b)) => {
                    if b == 0 {
                        return Err(self.error("attempt to perform 'n%%0'"));
                    }
                    Value::Int(floor_mod(a, b))
                }
                _ => {
                    let (a, b) = (x.as_f64(), y.as_f64());
                    Value::Float(a - (a / b).floor() * b)
                }
            },
            "__pow" => Value::Float(x.as_f64().powf(y.as_f64())),
            _ => unreachable!("unknown arithmetic event {event}"),
        };
        Ok(value)
    }

    pub(crate) fn arith_neg(&mut self, value: &Value) -> Result<Value, RuntimeError> {
        match tonumber(value) {
            Some(Number::Int(i)) => Ok(Value::Int(i.wrapping_neg())),
            Some(Number::Float(f)) => Ok(Value::Float(-f)),
            None => match self.metamethod(value, "__unm") {
                Some(handler) => self
                    .call_function(&handler, vec![value.clone(), value.clone()])
                    .map(|values| values.into_iter().next().unwrap_or(Value::Nil)),
                None => Err(self.error(format!(
                    "attempt to perform arithmetic (unm) on a {} value",
                    value.type_name()
                ))),
            },
        }
    }

    /// CONCAT coerces numbers, booleans, and nil; tables and functions need
    /// `__concat`.
    pub(crate) fn concat_values(&mut self, lhs: &Value, rhs: &Value) -> Result<Value, RuntimeError> {
        let concatenable =
            |v: &Value| matches!(v, Value::Str(_) | Value::Int(_) | Value::Float(_) | Value::Bool(_) | Value::Nil);
        if concatenable(lhs) && concatenable(rhs) {
            return Ok(Value::str(format!("{}{}", tostring(lhs), tostring(rhs))));
        }
        match self.binary_metamethod("__concat", lhs, rhs) {
            Some(result) => result,
            None => {
                let offender = if concatenable(lhs) { rhs } else { lhs };
                Err(self.error(format!("attempt to concatenate a {} value", offender.type_name())))
            }
        }
    }

    /// EQ: raw equality first; `__eq` only when both operands are tables and
    /// at least one side defines it.
    pub(crate) fn values_equal(&mut self, lhs: &Value, rhs: &Value) -> Result<bool, RuntimeError> {
        if lhs.raw_eq(rhs) {
            return Ok(true);
        }
        if !matches!((lhs, rhs), (Value::Table(_), Value::Table(_))) {
            return Ok(false);
        }
        match self.binary_metamethod("__eq", lhs, rhs) {
            Some(result) => Ok(result?.truthy()),
            None => Ok(false),
        }
    }

    /// LT over numbers and strings; `__lt` otherwise. GT is compiled as LT
    /// with swapped operands.
    pub(crate) fn values_less(&mut self, lhs: &Value, rhs: &Value) -> Result<bool, RuntimeError> {
        match (lhs, rhs) {
            (Value::Int(a), Value::Int(b)) => return Ok(a < b),
            (Value::Str(a), Value::Str(b)) => return Ok(a < b),
            _ => {}
        }
        if let (Some(x), Some(y)) = (numeric_only(lhs), numeric_only(rhs)) {
            return Ok(x < y);
        }
        match self.binary_metamethod("__lt", lhs, rhs) {
            Some(result) => Ok(result?.truthy()),
            None => Err(self.error(format!(
                "attempt to compare {} with {}",
                lhs.type_name(),
                rhs.type_name()
            ))),
        }
    }

    /// LEN: byte length for strings, `__len` then border for tables.
    pub(crate) fn length_of(&mut self, value: &Value) -> Result<Value, RuntimeError> {
        match value {
            Value::Str(s) => Ok(Value::Int(s.len() as i64)),
            Value::List(items) => Ok(Value::Int(items.len() as i64)),
            Value::Table(t) => {
                if let Some(handler) = self.metamethod(value, "__len") {
                    let values = self.call_function(&handler, vec![value.clone()])?;
                    return Ok(values.into_iter().next().unwrap_or(Value::Nil));
                }
                Ok(Value::Int(t.borrow().lua_len()))
            }
            other => Err(self.error(format!("attempt to get length of a {} value", other.type_name()))),
        }
    }

    /// TABLE_GET with the `__index` chain (tables and functions), bounded
    /// by the chain limit.
    pub(crate) fn index_value(&mut self, obj: &Value, key: &Value, depth: usize) -> Result<Value, RuntimeError> {
        if depth > INDEX_CHAIN_LIMIT {
            return Err(self.error("'__index' chain too long; possible loop"));
        }
        match obj {
            Value::Table(t) => {
                let raw = t.borrow().raw_get(key);
                if !matches!(raw, Value::Nil) {
                    return Ok(raw);
                }
                match self.metamethod(obj, "__index") {
                    Some(Value::Table(next)) => self.index_value(&Value::Table(next), key, depth + 1),
                    Some(handler @ (Value::Closure(_) | Value::Foreign(_))) => {
                        let values = self.call_function(&handler, vec![obj.clone(), key.clone()])?;
                        Ok(values.into_iter().next().unwrap_or(Value::Nil))
                    }
                    _ => Ok(Value::Nil),
                }
            }
            Value::Str(_) => match self.metamethod(obj, "__index") {
                Some(Value::Table(next)) => self.index_value(&Value::Table(next), key, depth + 1),
                Some(handler @ (Value::Closure(_) | Value::Foreign(_))) => {
                    let values = self.call_function(&handler, vec![obj.clone(), key.clone()])?;
                    Ok(values.into_iter().next().unwrap_or(Value::Nil))
                }
                _ => Err(self.type_error("index", obj)),
            },
            other => Err(self.type_error("index", other)),
        }
    }

    /// TABLE_SET honoring `__newindex` when the raw slot is empty.
    pub(crate) fn newindex_value(
        &mut self,
        obj: &Value,
        key: Value,
        value: Value,
        depth: usize,
    ) -> Result<(), RuntimeError> {
        if depth > INDEX_CHAIN_LIMIT {
            return Err(self.error("'__newindex' chain too long; possible loop"));
        }
        match obj {
            Value::Table(t) => {
                let has_raw = !matches!(t.borrow().raw_get(&key), Value::Nil);
                if !has_raw {
                    match self.metamethod(obj, "__newindex") {
                        Some(Value::Table(next)) => {
                            return self.newindex_value(&Value::Table(next), key, value, depth + 1);
                        }
                        Some(handler @ (Value::Closure(_) | Value::Foreign(_))) => {
                            self.call_function(&handler, vec![obj.clone(), key, value])?;
                            return Ok(());
                        }
                        _ => {}
                    }
                }
                t.borrow_mut()
                    .raw_set(key, value)
                    .map_err(|msg| self.error(msg))
            }
            other => Err(self.type_error("index", other)),
        }
    }

    pub(crate) fn expect_integer(&self, value: &Value) -> Result<i64, RuntimeError> {
        crate::val::tointeger(value).ok_or_else(|| {
            self.error(format!(
                "attempt to perform bitwise operation on a {} value",
                value.type_name()
            ))
        })
    }

    pub(crate) fn expect_index(&self, value: &Value) -> Result<i64, RuntimeError> {
        crate::val::tointeger(value)
            .ok_or_else(|| self.error(format!("expected integer index, got {}", value.type_name())))
    }

    pub(crate) fn binary_bits(
        &mut self,
        dst: &Reg,
        a: &Reg,
        b: &Reg,
        op: impl Fn(i64, i64) -> Result<i64, &'static str>,
    ) -> Result<(), RuntimeError> {
        let lhs = self.get_reg(a);
        let rhs = self.get_reg(b);
        let x = self.expect_integer(&lhs)?;
        let y = self.expect_integer(&rhs)?;
        let result = op(x, y).map_err(|msg| self.error(msg))?;
        self.set_reg(dst, Value::Int(result));
        Ok(())
    }
}

fn numeric_only(value: &Value) -> Option<f64> {
    match value {
        Value::Int(i) => Some(*i as f64),
        Value::Float(f) => Some(*f),
        _ => None,
    }
}

/// Floored integer division (rounds toward negative infinity).
pub(crate) fn floor_div(a: i64, b: i64) -> i64 {
    let q = a.wrapping_div(b);
    if (a % b != 0) && ((a < 0) != (b < 0)) {
        q - 1
    } else {
        q
    }
}

/// Floored remainder; the result takes the divisor's sign.
pub(crate) fn floor_mod(a: i64, b: i64) -> i64 {
    let r = a % b;
    if r != 0 && (r < 0) != (b < 0) {
        r + b
    } else {
        r
    }
}
