use luma_core::val::Value;

use crate::testutil::{returns, run_err};

#[test]
fn test_producer_consumer_scenario() {
    let values = returns(
        "local co = coroutine.create(function() \
           coroutine.yield('apple') \
           coroutine.yield('banana') \
           coroutine.yield('orange') \
         end) \
         local r = {} \
         for i = 1, 5 do \
           local ok, value = coroutine.resume(co) \
           r[#r + 1] = tostring(ok) .. ':' .. tostring(value) \
         end \
         return r[1], r[2], r[3], r[4], r[5]",
    );
    assert_eq!(
        values,
        vec![
            Value::str("true:apple"),
            Value::str("true:banana"),
            Value::str("true:orange"),
            Value::str("true:nil"),
            Value::str("false:cannot resume dead coroutine"),
        ]
    );
}

#[test]
fn test_status_transitions() {
    let values = returns(
        "local co = coroutine.create(function() coroutine.yield() end) \
         local s1 = coroutine.status(co) \
         coroutine.resume(co) \
         local s2 = coroutine.status(co) \
         coroutine.resume(co) \
         local s3 = coroutine.status(co) \
         return s1, s2, s3",
    );
    assert_eq!(
        values,
        vec![
            Value::str("suspended"),
            Value::str("suspended"),
            Value::str("dead"),
        ]
    );
}

#[test]
fn test_running_status_inside_body() {
    let values = returns(
        "local co \
         co = coroutine.create(function() return coroutine.status(co) end) \
         local ok, status = coroutine.resume(co) \
         return status",
    );
    assert_eq!(values, vec![Value::str("running")]);
}

#[test]
fn test_resume_passes_and_returns_values() {
    let values = returns(
        "local co = coroutine.create(function(a, b) \
           local c = coroutine.yield(a + b) \
           return c - 1 \
         end) \
         local _, sum = coroutine.resume(co, 4, 6) \
         local _, final = coroutine.resume(co, 100) \
         return sum, final",
    );
    assert_eq!(values, vec![Value::Int(10), Value::Int(99)]);
}

#[test]
fn test_wrap_returns_values_directly() {
    let values = returns(
        "local gen = coroutine.wrap(function() \
           coroutine.yield(1) \
           coroutine.yield(2) \
         end) \
         return gen(), gen()",
    );
    assert_eq!(values, vec![Value::Int(1), Value::Int(2)]);
}

#[test]
fn test_wrap_reraises_errors() {
    let values = returns(
        "local f = coroutine.wrap(function() error('inside') end) \
         local ok, err = pcall(f) \
         return ok, err",
    );
    assert_eq!(values[0], Value::Bool(false));
    match &values[1] {
        Value::Str(msg) => assert!(msg.ends_with("inside"), "got {}", msg),
        other => panic!("expected string, got {:?}", other),
    }
}

#[test]
fn test_yield_across_pcall_scenario() {
    let values = returns(
        "local co = coroutine.create(function() \
           local ok, err = pcall(function() coroutine.yield(1) end) \
           return ok, err \
         end) \
         local resumed, ok, err = coroutine.resume(co) \
         return resumed, ok, err, coroutine.status(co)",
    );
    assert_eq!(values[0], Value::Bool(true));
    assert_eq!(values[1], Value::Bool(false));
    match &values[2] {
        Value::Str(msg) => assert!(
            msg.ends_with("attempt to yield across a C-call boundary"),
            "got {}",
            msg
        ),
        other => panic!("expected message, got {:?}", other),
    }
    assert_eq!(values[3], Value::str("dead"));
}

#[test]
fn test_isyieldable() {
    let values = returns(
        "local inside \
         local co = coroutine.create(function() inside = coroutine.isyieldable() end) \
         coroutine.resume(co) \
         return coroutine.isyieldable(), inside",
    );
    assert_eq!(values, vec![Value::Bool(false), Value::Bool(true)]);
}

#[test]
fn test_running_from_main() {
    let values = returns("local co, is_main = coroutine.running() return is_main, type(co)");
    assert_eq!(values, vec![Value::Bool(true), Value::str("thread")]);
}

#[test]
fn test_running_inside_coroutine() {
    let values = returns(
        "local co = coroutine.create(function() \
           local this, is_main = coroutine.running() \
           coroutine.yield(is_main) \
         end) \
         local _, is_main = coroutine.resume(co) \
         return is_main",
    );
    assert_eq!(values, vec![Value::Bool(false)]);
}

#[test]
fn test_nested_coroutines_normal_status() {
    let values = returns(
        "local outer \
         local inner = coroutine.create(function() \
           coroutine.yield(coroutine.status(outer)) \
         end) \
         outer = coroutine.create(function() \
           local _, status = coroutine.resume(inner) \
           coroutine.yield(status) \
         end) \
         local _, status = coroutine.resume(outer) \
         return status",
    );
    assert_eq!(values, vec![Value::str("normal")]);
}

#[test]
fn test_close_suspended() {
    let values = returns(
        "local co = coroutine.create(function() coroutine.yield() end) \
         coroutine.resume(co) \
         local ok = coroutine.close(co) \
         return ok, coroutine.status(co)",
    );
    assert_eq!(values, vec![Value::Bool(true), Value::str("dead")]);
}

#[test]
fn test_resume_non_function_errors() {
    let err = run_err("coroutine.create(42)");
    assert!(err.message().contains("bad argument"));
}

#[test]
fn test_generator_loop_with_wrap() {
    let values = returns(
        "local function range(n) \
           return coroutine.wrap(function() \
             for i = 1, n do coroutine.yield(i) end \
           end) \
         end \
         local sum = 0 \
         for i in range(5) do sum = sum + i end \
         return sum",
    );
    assert_eq!(values, vec![Value::Int(15)]);
}
