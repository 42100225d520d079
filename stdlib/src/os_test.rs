use luma_core::val::Value;

use crate::testutil::{output_lines, returns};

#[test]
fn test_clock_is_monotonic() {
    let values = returns(
        "local a = os.clock() \
         local x = 0 \
         for i = 1, 1000 do x = x + i end \
         local b = os.clock() \
         return a >= 0, b >= a",
    );
    assert_eq!(values, vec![Value::Bool(true), Value::Bool(true)]);
}

#[test]
fn test_time_and_difftime() {
    let values = returns(
        "local t = os.time() \
         return t > 0, os.difftime(t + 5, t)",
    );
    assert_eq!(values, vec![Value::Bool(true), Value::Float(5.0)]);
}

#[test]
fn test_time_from_table() {
    let values = returns(
        "local t = os.time({year = 2020, month = 1, day = 1}) \
         return t > 0",
    );
    assert_eq!(values, vec![Value::Bool(true)]);
}

#[test]
fn test_date_formats() {
    let values = returns("return os.date('%Y', 0), os.date('!%Y-%m-%d', 86400)");
    assert_eq!(values[1], Value::str("1970-01-02"));
}

#[test]
fn test_date_table_form() {
    let values = returns(
        "local d = os.date('*t', os.time({year = 2021, month = 6, day = 15})) \
         return d.year, d.month, d.day",
    );
    assert_eq!(
        values,
        vec![Value::Int(2021), Value::Int(6), Value::Int(15)]
    );
}

#[test]
fn test_io_write_appends_without_newline() {
    let lines = output_lines("io.write('a', 'b') io.write(1)");
    assert_eq!(lines, vec!["ab", "1"]);
}

#[test]
fn test_io_stdout_handle() {
    let lines = output_lines("io.stdout:write('via handle')");
    assert_eq!(lines, vec!["via handle"]);
    let values = returns("return io.type(io.stdout), io.type({})");
    assert_eq!(values, vec![Value::str("file"), Value::Nil]);
}

#[test]
fn test_debug_traceback_shape() {
    let values = returns(
        "local function level2() return debug.traceback('trouble') end \
         local function level1() return level2() end \
         return level1()",
    );
    match &values[0] {
        Value::Str(text) => {
            assert!(text.starts_with("trouble\n"), "got {}", text);
            assert!(text.contains("stack traceback:"), "got {}", text);
            assert!(text.contains("level2"), "got {}", text);
            assert!(text.contains("level1"), "got {}", text);
        }
        other => panic!("expected string, got {:?}", other),
    }
}

#[test]
fn test_debug_traceback_of_suspended_coroutine() {
    let values = returns(
        "local co = coroutine.create(function() coroutine.yield() end) \
         coroutine.resume(co) \
         local text = debug.traceback(co) \
         return type(text)",
    );
    assert_eq!(values, vec![Value::str("string")]);
}
