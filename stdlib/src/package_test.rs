use std::fs;
use std::path::PathBuf;

use luma_core::val::Value;

use crate::testutil::{returns, run_err, vm_for};
use luma_core::RunOptions;

#[test]
fn test_require_from_preload() {
    let values = returns(
        "package.preload['answer'] = function() return {value = 42} end \
         local m = require('answer') \
         return m.value",
    );
    assert_eq!(values, vec![Value::Int(42)]);
}

#[test]
fn test_require_caches_result() {
    let values = returns(
        "local count = 0 \
         package.preload['mod'] = function() count = count + 1 return {tag = 'm'} end \
         local a = require('mod') \
         local b = require('mod') \
         return count, a == b, package.loaded['mod'] == a",
    );
    assert_eq!(
        values,
        vec![Value::Int(1), Value::Bool(true), Value::Bool(true)]
    );
}

#[test]
fn test_require_missing_module_lists_searcher_errors() {
    let err = run_err("require('definitely_not_here')");
    let message = err.message();
    assert!(message.contains("module 'definitely_not_here' not found"), "got {}", message);
    assert!(message.contains("no field package.preload"), "got {}", message);
}

#[test]
fn test_loader_returning_nothing_caches_true() {
    let values = returns(
        "package.preload['sideeffect'] = function() end \
         local m = require('sideeffect') \
         return m",
    );
    assert_eq!(values, vec![Value::Bool(true)]);
}

#[test]
fn test_load_compiles_chunk() {
    let values = returns("local f = load('return 1 + 1') return f()");
    assert_eq!(values, vec![Value::Int(2)]);
}

#[test]
fn test_load_reports_compile_errors() {
    let values = returns("local f, err = load('return +') return f == nil, err ~= nil");
    assert_eq!(values, vec![Value::Bool(true), Value::Bool(true)]);
}

#[test]
fn test_load_with_environment() {
    let values = returns(
        "local env = {x = 10} \
         local f = load('return x', 'sandboxed', env) \
         return f()",
    );
    assert_eq!(values, vec![Value::Int(10)]);
}

#[test]
fn test_load_env_isolates_globals() {
    let values = returns(
        "y = 'global' \
         local f = load('return y', 'chunk', {}) \
         return f()",
    );
    assert_eq!(values, vec![Value::Nil]);
}

#[test]
fn test_load_env_writes_stay_in_env() {
    let values = returns(
        "local env = {} \
         local f = load('z = 9 return z', 'chunk', env) \
         local result = f() \
         return result, env.z, z",
    );
    assert_eq!(values, vec![Value::Int(9), Value::Int(9), Value::Nil]);
}

#[test]
fn test_readonly_environment_rejects_writes() {
    // A read-only env raises on assignment; reads still work.
    let mut vm = vm_for(
        "local f = load('w = 1', 'chunk', frozen) \
         local ok, err = pcall(f) \
         return ok, err",
    );
    let frozen = std::rc::Rc::new(std::cell::RefCell::new(luma_core::val::LuaTable::new()));
    frozen.borrow_mut().set_readonly(true);
    vm.set_global("frozen", Value::Table(frozen));
    let out = vm.run(RunOptions::default()).expect("run");
    assert_eq!(out.last_return[0], Value::Bool(false));
    match &out.last_return[1] {
        Value::Str(msg) => assert!(msg.contains("read-only"), "got {}", msg),
        other => panic!("expected message, got {:?}", other),
    }
}

fn temp_module_dir(tag: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!("luma-pkg-test-{}-{}", tag, std::process::id()));
    let _ = fs::create_dir_all(&dir);
    dir
}

#[test]
fn test_require_from_file_on_path() {
    let dir = temp_module_dir("file");
    fs::write(dir.join("greeter.lua"), "return {hello = function() return 'hi' end}")
        .expect("write module");

    let src = format!(
        "package.path = '{}/?.lua' \
         local m = require('greeter') \
         return m.hello()",
        dir.display()
    );
    let values = returns(&src);
    assert_eq!(values, vec![Value::str("hi")]);
    let _ = fs::remove_dir_all(&dir);
}

#[test]
fn test_sandboxed_module_environment() {
    let dir = temp_module_dir("sandbox");
    fs::write(dir.join("boxed.lua"), "return flag").expect("write module");

    let src = format!(
        "package.path = '{}/?.lua' \
         package.sandbox('boxed', {{flag = 'sandboxed'}}, false) \
         return require('boxed')",
        dir.display()
    );
    let values = returns(&src);
    assert_eq!(values, vec![Value::str("sandboxed")]);
    let _ = fs::remove_dir_all(&dir);
}

#[test]
fn test_sandbox_inherit_copies_globals() {
    let dir = temp_module_dir("inherit");
    fs::write(dir.join("inheriting.lua"), "return type(print)").expect("write module");

    let src = format!(
        "package.path = '{}/?.lua' \
         package.sandbox('inheriting', {{}}, true) \
         return require('inheriting')",
        dir.display()
    );
    let values = returns(&src);
    assert_eq!(values, vec![Value::str("function")]);
    let _ = fs::remove_dir_all(&dir);
}

#[test]
fn test_dofile_runs_chunk() {
    let dir = temp_module_dir("dofile");
    let file = dir.join("script.lua");
    fs::write(&file, "return 6 * 7").expect("write script");

    let src = format!("return dofile('{}')", file.display());
    let values = returns(&src);
    assert_eq!(values, vec![Value::Int(42)]);
    let _ = fs::remove_dir_all(&dir);
}

#[test]
fn test_loadfile_missing_returns_nil_and_message() {
    let values = returns("local f, err = loadfile('/nonexistent/file.lua') return f == nil, err ~= nil");
    assert_eq!(values, vec![Value::Bool(true), Value::Bool(true)]);
}
