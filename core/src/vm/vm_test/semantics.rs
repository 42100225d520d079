//! Source-level semantics: closures, loops, truthiness, tables.

use super::*;

#[test]
fn test_counters_share_nothing() {
    let values = returns(
        "function mk() local x = 0 return function() x = x + 1 return x end end \
         local a = mk() local b = mk() return a(), a(), b()",
    );
    assert_eq!(values, vec![Value::Int(1), Value::Int(2), Value::Int(1)]);
}

#[test]
fn test_two_closures_share_one_cell() {
    let values = returns(
        "local x = 0 \
         local function inc() x = x + 1 end \
         local function get() return x end \
         inc() inc() return get()",
    );
    assert_eq!(values, vec![Value::Int(2)]);
}

#[test]
fn test_numeric_for_captures_fresh_cell_per_iteration() {
    let values = returns(
        "local t = {} for i = 1, 3 do t[i] = function() return i end end \
         return t[1](), t[2](), t[3]()",
    );
    assert_eq!(values, vec![Value::Int(1), Value::Int(2), Value::Int(3)]);
}

#[test]
fn test_numeric_for_step_and_direction() {
    assert_eq!(
        returns("local s = 0 for i = 1, 7, 2 do s = s + i end return s"),
        vec![Value::Int(16)]
    );
    assert_eq!(
        returns("local s = 0 for i = 3, 1, -1 do s = s + i end return s"),
        vec![Value::Int(6)]
    );
    // Zero-trip loop when the direction never reaches the limit.
    assert_eq!(
        returns("local s = 0 for i = 3, 1 do s = s + i end return s"),
        vec![Value::Int(0)]
    );
}

#[test]
fn test_truthiness_double_negation() {
    let values = returns("return not (not nil), not (not false), not (not 0), not (not '')");
    assert_eq!(
        values,
        vec![
            Value::Bool(false),
            Value::Bool(false),
            Value::Bool(true),
            Value::Bool(true),
        ]
    );
}

#[test]
fn test_short_circuit_returns_operand() {
    let values = returns("return 1 and 2, nil and 2, false or 'x', 3 or 4");
    assert_eq!(
        values,
        vec![Value::Int(2), Value::Nil, Value::str("x"), Value::Int(3)]
    );
}

#[test]
fn test_short_circuit_skips_rhs_effects() {
    let values = returns(
        "local n = 0 \
         local function bump() n = n + 1 return true end \
         local a = false and bump() \
         local b = true or bump() \
         return n",
    );
    assert_eq!(values, vec![Value::Int(0)]);
}

#[test]
fn test_arith_operators() {
    let values = returns("return 7 // 2, 7 % 2, 2 ^ 10, 7 / 2, -7 // 2");
    assert_eq!(
        values,
        vec![
            Value::Int(3),
            Value::Int(1),
            Value::Float(1024.0),
            Value::Float(3.5),
            Value::Int(-4),
        ]
    );
}

#[test]
fn test_division_always_float() {
    assert_eq!(returns("return 8 / 2"), vec![Value::Float(4.0)]);
}

#[test]
fn test_concat_coerces_numbers() {
    assert_eq!(returns("return 1 .. 2"), vec![Value::str("12")]);
    assert_eq!(returns("return 'v' .. 1.5"), vec![Value::str("v1.5")]);
}

#[test]
fn test_comparisons() {
    let values = returns("return 1 < 2, 2 <= 2, 'a' < 'b', 3 ~= 4, 1 == 1.0");
    assert!(values.iter().all(|v| v == &Value::Bool(true)));
}

#[test]
fn test_while_and_repeat() {
    assert_eq!(
        returns("local i = 0 while i < 5 do i = i + 1 end return i"),
        vec![Value::Int(5)]
    );
    assert_eq!(
        returns("local i = 0 repeat i = i + 1 until i >= 5 return i"),
        vec![Value::Int(5)]
    );
}

#[test]
fn test_break() {
    assert_eq!(
        returns("local i = 0 while true do i = i + 1 if i == 3 then break end end return i"),
        vec![Value::Int(3)]
    );
}

#[test]
fn test_goto_backward_loop() {
    assert_eq!(
        returns("local i = 0 ::top:: i = i + 1 if i < 3 then goto top end return i"),
        vec![Value::Int(3)]
    );
}

#[test]
fn test_goto_forward_skip() {
    assert_eq!(
        returns("local x = 1 do goto done end x = 2 ::done:: return x"),
        vec![Value::Int(1)]
    );
}

#[test]
fn test_table_constructor_and_length() {
    let values = returns("local t = {10, 20, 30, x = 'y', [99] = 1} return #t, t[2], t.x, t[99]");
    assert_eq!(
        values,
        vec![Value::Int(3), Value::Int(20), Value::str("y"), Value::Int(1)]
    );
}

#[test]
fn test_table_length_tracks_border() {
    let values = returns(
        "local t = {} t[1] = 'a' t[2] = 'b' t[3] = 'c' t[3] = nil return #t",
    );
    assert_eq!(values, vec![Value::Int(2)]);
}

#[test]
fn test_table_constructor_expands_trailing_call() {
    let values = returns(
        "local function f() return 2, 3 end local t = {1, f()} return #t, t[3]",
    );
    assert_eq!(values, vec![Value::Int(3), Value::Int(3)]);
}

#[test]
fn test_generic_for_over_iterator() {
    let values = returns(
        "local function range(n) \
           local i = 0 \
           return function() i = i + 1 if i <= n then return i, i * i end end \
         end \
         local s = 0 \
         for i, sq in range(4) do s = s + sq end \
         return s",
    );
    assert_eq!(values, vec![Value::Int(30)]);
}

#[test]
fn test_nested_field_assignment() {
    let values = returns(
        "local t = {inner = {}} t.inner.value = 42 return t.inner.value",
    );
    assert_eq!(values, vec![Value::Int(42)]);
}

#[test]
fn test_global_read_of_undefined_is_nil() {
    assert_eq!(returns("return missing_global"), vec![Value::Nil]);
}

#[test]
fn test_determinism_of_event_trace() {
    let src = "local s = 0 for i = 1, 5 do s = s + i end return s";
    let trace_a = trace_of(src);
    let trace_b = trace_of(src);
    assert_eq!(trace_a, trace_b);
    assert!(!trace_a.is_empty());
}

fn trace_of(src: &str) -> Vec<(u64, usize, String)> {
    let mut vm = vm_for(src);
    vm.set_trace_mode(TraceMode::All);
    vm.run(RunOptions::default()).expect("run");
    vm.drain_events()
        .into_iter()
        .map(|e| (e.tick, e.pc, e.describe()))
        .collect()
}
