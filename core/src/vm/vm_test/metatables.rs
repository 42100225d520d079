//! Metamethod dispatch through the VM.

use super::*;

#[test]
fn test_add_metamethod_both_sides() {
    let values = returns(
        "local t = setmetatable({}, {__add = function(a, b) return 42 end}) \
         return t + 1, 1 + t",
    );
    assert_eq!(values, vec![Value::Int(42), Value::Int(42)]);
}

#[test]
fn test_sub_and_unm_metamethods() {
    let values = returns(
        "local mt = {__sub = function() return 'sub' end, __unm = function() return 'unm' end} \
         local t = setmetatable({}, mt) \
         return t - 1, -t",
    );
    assert_eq!(values, vec![Value::str("sub"), Value::str("unm")]);
}

#[test]
fn test_index_table_chain() {
    let values = returns(
        "local base = {greeting = 'hello'} \
         local mid = setmetatable({}, {__index = base}) \
         local leaf = setmetatable({}, {__index = mid}) \
         return leaf.greeting",
    );
    assert_eq!(values, vec![Value::str("hello")]);
}

#[test]
fn test_index_function() {
    let values = returns(
        "local t = setmetatable({}, {__index = function(t, k) return k .. '!' end}) \
         return t.name",
    );
    assert_eq!(values, vec![Value::str("name!")]);
}

#[test]
fn test_index_raw_hit_skips_metamethod() {
    let values = returns(
        "local t = setmetatable({x = 1}, {__index = function() return 99 end}) \
         return t.x, t.y",
    );
    assert_eq!(values, vec![Value::Int(1), Value::Int(99)]);
}

#[test]
fn test_newindex_function_intercepts_fresh_keys() {
    let values = returns(
        "local log = {} \
         local t = setmetatable({}, {__newindex = function(t, k, v) log[#log + 1] = k end}) \
         t.a = 1 \
         t.b = 2 \
         return #log, log[1], log[2], t.a",
    );
    assert_eq!(
        values,
        vec![Value::Int(2), Value::str("a"), Value::str("b"), Value::Nil]
    );
}

#[test]
fn test_newindex_skipped_for_existing_keys() {
    let values = returns(
        "local t = setmetatable({x = 1}, {__newindex = function() end}) \
         t.x = 2 \
         return t.x",
    );
    assert_eq!(values, vec![Value::Int(2)]);
}

#[test]
fn test_eq_metamethod_same_type_only() {
    let values = returns(
        "local mt = {__eq = function(a, b) return true end} \
         local a = setmetatable({}, mt) \
         local b = setmetatable({}, mt) \
         return a == b, a == 1",
    );
    assert_eq!(values, vec![Value::Bool(true), Value::Bool(false)]);
}

#[test]
fn test_lt_metamethod_drives_comparisons() {
    let values = returns(
        "local mt = {__lt = function(a, b) return a.rank < b.rank end} \
         local a = setmetatable({rank = 1}, mt) \
         local b = setmetatable({rank = 2}, mt) \
         return a < b, b < a, a > b",
    );
    assert_eq!(
        values,
        vec![Value::Bool(true), Value::Bool(false), Value::Bool(false)]
    );
}

#[test]
fn test_len_metamethod() {
    let values = returns(
        "local t = setmetatable({1, 2}, {__len = function() return 99 end}) \
         return #t",
    );
    assert_eq!(values, vec![Value::Int(99)]);
}

#[test]
fn test_concat_metamethod() {
    let values = returns(
        "local t = setmetatable({}, {__concat = function(a, b) return 'joined' end}) \
         return t .. 'x', 'x' .. t",
    );
    assert_eq!(values, vec![Value::str("joined"), Value::str("joined")]);
}

#[test]
fn test_call_metamethod() {
    let values = returns(
        "local t = setmetatable({base = 10}, {__call = function(self, n) return self.base + n end}) \
         return t(5)",
    );
    assert_eq!(values, vec![Value::Int(15)]);
}

#[test]
fn test_missing_metamethod_raises_typed_error() {
    let err = run_err("local t = {} return t + 1");
    assert!(err.message().contains("attempt to perform arithmetic"));
    let err = run_err("return {} < {}");
    assert!(err.message().contains("attempt to compare"));
}

#[test]
fn test_index_chain_depth_is_bounded() {
    // A table whose __index loops back to itself through a second table
    // must hit the chain limit instead of hanging.
    let err = run_err(
        "local a = {} local b = {} \
         setmetatable(a, {__index = b}) \
         setmetatable(b, {__index = a}) \
         return a.missing",
    );
    assert!(err.message().contains("__index"));
}
