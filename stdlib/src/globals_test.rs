use luma_core::val::Value;

use crate::testutil::{output_lines, returns, run_err};

#[test]
fn test_print_joins_with_tabs() {
    let lines = output_lines("print('a', 1, true, nil)");
    assert_eq!(lines, vec!["a\t1\ttrue\tnil"]);
}

#[test]
fn test_type_names() {
    let values = returns("return type(nil), type(1), type('s'), type({}), type(print)");
    assert_eq!(
        values,
        vec![
            Value::str("nil"),
            Value::str("number"),
            Value::str("string"),
            Value::str("table"),
            Value::str("function"),
        ]
    );
}

#[test]
fn test_tostring_and_tonumber() {
    let values = returns("return tostring(1.0), tostring(nil), tonumber('42'), tonumber('0x10'), tonumber('zz'), tonumber('ff', 16)");
    assert_eq!(
        values,
        vec![
            Value::str("1.0"),
            Value::str("nil"),
            Value::Int(42),
            Value::Int(16),
            Value::Nil,
            Value::Int(255),
        ]
    );
}

#[test]
fn test_tostring_honors_metamethod() {
    let values = returns(
        "local t = setmetatable({}, {__tostring = function() return 'custom' end}) \
         return tostring(t)",
    );
    assert_eq!(values, vec![Value::str("custom")]);
}

#[test]
fn test_ipairs_stops_at_hole() {
    let values = returns(
        "local t = {10, 20, 30} t[5] = 50 \
         local count = 0 \
         for i, v in ipairs(t) do count = count + v end \
         return count",
    );
    assert_eq!(values, vec![Value::Int(60)]);
}

#[test]
fn test_pairs_visits_all_entries() {
    let values = returns(
        "local t = {1, 2, x = 3, y = 4} \
         local sum = 0 \
         for k, v in pairs(t) do sum = sum + v end \
         return sum",
    );
    assert_eq!(values, vec![Value::Int(10)]);
}

#[test]
fn test_select() {
    let values = returns("return select('#', 'a', 'b', 'c'), select(2, 'a', 'b', 'c')");
    assert_eq!(
        values,
        vec![Value::Int(3), Value::str("b"), Value::str("c")]
    );
}

#[test]
fn test_rawget_bypasses_index() {
    let values = returns(
        "local t = setmetatable({}, {__index = function() return 'meta' end}) \
         return t.k, rawget(t, 'k')",
    );
    assert_eq!(values, vec![Value::str("meta"), Value::Nil]);
}

#[test]
fn test_rawequal_and_rawlen() {
    let values = returns(
        "local a = {1, 2} \
         return rawequal(a, a), rawequal(a, {1, 2}), rawlen(a), rawlen('abc')",
    );
    assert_eq!(
        values,
        vec![Value::Bool(true), Value::Bool(false), Value::Int(2), Value::Int(3)]
    );
}

#[test]
fn test_assert_passes_values_through() {
    let values = returns("return assert(1, 'unused')");
    assert_eq!(values, vec![Value::Int(1), Value::str("unused")]);
}

#[test]
fn test_assert_raises_with_message() {
    let err = run_err("assert(false, 'expected failure')");
    assert_eq!(err.message(), "expected failure");
    let err = run_err("assert(nil)");
    assert!(err.message().contains("assertion failed!"));
}

#[test]
fn test_error_prefixes_location() {
    let values = returns("local ok, err = pcall(function() error('boom') end) return err");
    match &values[0] {
        Value::Str(msg) => {
            assert!(msg.starts_with("test.lua:"), "got {}", msg);
            assert!(msg.ends_with("boom"), "got {}", msg);
        }
        other => panic!("expected string, got {:?}", other),
    }
}

#[test]
fn test_error_level_zero_suppresses_prefix() {
    let values = returns("local ok, err = pcall(function() error('bare', 0) end) return err");
    assert_eq!(values, vec![Value::str("bare")]);
}

#[test]
fn test_error_with_table_value() {
    let values = returns(
        "local ok, err = pcall(function() error({code = 7}) end) return ok, err.code",
    );
    assert_eq!(values, vec![Value::Bool(false), Value::Int(7)]);
}

#[test]
fn test_pcall_returns_results() {
    let values = returns("return pcall(function(a, b) return a + b, a * b end, 3, 4)");
    assert_eq!(
        values,
        vec![Value::Bool(true), Value::Int(7), Value::Int(12)]
    );
}

#[test]
fn test_xpcall_runs_handler() {
    let values = returns(
        "local ok, result = xpcall(function() error('inner') end, function(e) return 'handled: ' .. e end) \
         return ok, result",
    );
    assert_eq!(values[0], Value::Bool(false));
    match &values[1] {
        Value::Str(msg) => assert!(msg.starts_with("handled: "), "got {}", msg),
        other => panic!("expected string, got {:?}", other),
    }
}

#[test]
fn test_setmetatable_returns_table() {
    let values = returns(
        "local t = setmetatable({}, {__index = function() return 1 end}) \
         return getmetatable(t) ~= nil, t.anything",
    );
    assert_eq!(values, vec![Value::Bool(true), Value::Int(1)]);
}

#[test]
fn test_globals_table_is_reachable() {
    let values = returns("x = 5 return _G.x");
    assert_eq!(values, vec![Value::Int(5)]);
}
