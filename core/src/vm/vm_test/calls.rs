//! Call protocol: multi-return, vararg, method calls, recursion.

use super::*;

#[test]
fn test_multi_return_alignment_pads_with_nil() {
    let values = returns(
        "local function f() return 1, 2 end local a, b, c = f() return a, b, c",
    );
    assert_eq!(values, vec![Value::Int(1), Value::Int(2), Value::Nil]);
}

#[test]
fn test_surplus_returns_discarded() {
    let values = returns(
        "local function f() return 1, 2, 3 end local a = f() return a",
    );
    assert_eq!(values, vec![Value::Int(1)]);
}

#[test]
fn test_vararg_identity() {
    let values = returns("local function id(...) return ... end return id(10, 20, 30)");
    assert_eq!(values, vec![Value::Int(10), Value::Int(20), Value::Int(30)]);
}

#[test]
fn test_vararg_first_in_single_context() {
    let values = returns("local function first(...) local x = ... return x end return first(7, 8)");
    assert_eq!(values, vec![Value::Int(7)]);
}

#[test]
fn test_call_in_middle_of_list_truncates_to_one() {
    let values = returns(
        "local function f() return 1, 2 end return f(), 9",
    );
    assert_eq!(values, vec![Value::Int(1), Value::Int(9)]);
}

#[test]
fn test_trailing_call_expands() {
    let values = returns(
        "local function f() return 1, 2 end return 9, f()",
    );
    assert_eq!(values, vec![Value::Int(9), Value::Int(1), Value::Int(2)]);
}

#[test]
fn test_paren_truncates_multi_value() {
    let values = returns(
        "local function f() return 1, 2 end return (f())",
    );
    assert_eq!(values, vec![Value::Int(1)]);
}

#[test]
fn test_vararg_forwarding_through_call() {
    let values = returns(
        "local function pass(...) return ... end \
         local function wrap(...) return pass(...) end \
         return wrap(1, 2, 3)",
    );
    assert_eq!(values, vec![Value::Int(1), Value::Int(2), Value::Int(3)]);
}

#[test]
fn test_missing_arguments_bind_nil() {
    let values = returns("local function f(a, b) return a, b end return f(1)");
    assert_eq!(values, vec![Value::Int(1), Value::Nil]);
}

#[test]
fn test_method_call_passes_self() {
    let values = returns(
        "local obj = {value = 41} \
         function obj:bump() self.value = self.value + 1 return self.value end \
         return obj:bump()",
    );
    assert_eq!(values, vec![Value::Int(42)]);
}

#[test]
fn test_local_function_recursion() {
    let values = returns(
        "local function fib(n) if n < 2 then return n end return fib(n - 1) + fib(n - 2) end \
         return fib(10)",
    );
    assert_eq!(values, vec![Value::Int(55)]);
}

#[test]
fn test_mutual_recursion_via_globals() {
    let values = returns(
        "function even(n) if n == 0 then return true end return odd(n - 1) end \
         function odd(n) if n == 0 then return false end return even(n - 1) end \
         return even(10), odd(10)",
    );
    assert_eq!(values, vec![Value::Bool(true), Value::Bool(false)]);
}

#[test]
fn test_multiple_assignment_rhs_before_stores() {
    let values = returns("local a, b = 1, 2 a, b = b, a return a, b");
    assert_eq!(values, vec![Value::Int(2), Value::Int(1)]);
}

#[test]
fn test_call_nil_raises_type_error() {
    let err = run_err("local f return f()");
    assert!(err.message().contains("attempt to call a nil value"));
}

#[test]
fn test_pcall_catches_and_restores() {
    let values = returns(
        "local ok, err = pcall(function() return nil + 1 end) \
         local fine, v = pcall(function() return 7 end) \
         return ok, fine, v",
    );
    assert_eq!(values[0], Value::Bool(false));
    assert_eq!(values[1], Value::Bool(true));
    assert_eq!(values[2], Value::Int(7));
}

#[test]
fn test_traceback_depth_matches_frames() {
    let err = run_err(
        "local function inner() return missing() end \
         local function outer() return inner() end \
         return outer()",
    );
    // inner frame, outer frame, main chunk.
    assert_eq!(err.traceback.len(), 3);
    let formatted = err.format_with_traceback();
    assert!(formatted.contains("stack traceback:"));
    assert!(formatted.contains("function 'inner'"));
    assert!(formatted.contains("main chunk"));
}

#[test]
fn test_error_location_prefix() {
    let err = run_err("local x = nil\nreturn x.field");
    assert!(err.message().starts_with("test.lua:2:"), "got {}", err.message());
}
