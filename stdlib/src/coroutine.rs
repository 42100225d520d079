//! The `coroutine` library over the core scheduler.

use luma_core::val::Value;
use luma_core::{RuntimeError, Vm};

use crate::support::{arg, bad_argument, check_coroutine, foreign, new_library, set_fn};

pub fn install(vm: &mut Vm) {
    let lib = new_library(vm, "coroutine");
    set_fn(&lib, "coroutine", "create", co_create);
    set_fn(&lib, "coroutine", "resume", co_resume);
    set_fn(&lib, "coroutine", "yield", co_yield);
    set_fn(&lib, "coroutine", "status", co_status);
    set_fn(&lib, "coroutine", "wrap", co_wrap);
    set_fn(&lib, "coroutine", "running", co_running);
    set_fn(&lib, "coroutine", "isyieldable", co_isyieldable);
    set_fn(&lib, "coroutine", "close", co_close);
}

fn entry_closure(args: &[Value], fname: &str) -> Result<std::rc::Rc<luma_core::val::Closure>, RuntimeError> {
    match arg(args, 0) {
        Value::Closure(c) => Ok(c),
        other => Err(bad_argument(1, fname, "function", &other)),
    }
}

fn co_create(args: &[Value], vm: &mut Vm) -> Result<Vec<Value>, RuntimeError> {
    let f = entry_closure(args, "create")?;
    Ok(vec![Value::Coroutine(vm.create_coroutine(f))])
}

fn co_resume(args: &[Value], vm: &mut Vm) -> Result<Vec<Value>, RuntimeError> {
    let co = check_coroutine(args, 0, "resume")?;
    let rest = args.get(1..).unwrap_or(&[]).to_vec();
    let result = vm.resume_coroutine(&co, rest);
    let mut out = vec![Value::Bool(result.success)];
    out.extend(result.values);
    Ok(out)
}

fn co_yield(args: &[Value], vm: &mut Vm) -> Result<Vec<Value>, RuntimeError> {
    vm.request_yield(args.to_vec())?;
    Ok(Vec::new())
}

fn co_status(args: &[Value], _vm: &mut Vm) -> Result<Vec<Value>, RuntimeError> {
    let co = check_coroutine(args, 0, "status")?;
    let status = co.borrow().status.as_str();
    Ok(vec![Value::str(status)])
}

/// `wrap(f)`: a callable that resumes the hidden coroutine; resume failures
/// re-raise in the caller with the coroutine's traceback attached.
fn co_wrap(args: &[Value], vm: &mut Vm) -> Result<Vec<Value>, RuntimeError> {
    let f = entry_closure(args, "wrap")?;
    let co = vm.create_coroutine(f);
    let adapter = foreign("coroutine.wrap", move |args, vm| {
        let result = vm.resume_coroutine(&co, args.to_vec());
        if result.success {
            Ok(result.values)
        } else {
            match result.error {
                Some(err) => Err(err),
                None => Err(RuntimeError::new(
                    result.values.into_iter().next().unwrap_or(Value::Nil),
                )),
            }
        }
    });
    Ok(vec![adapter])
}

fn co_running(_args: &[Value], vm: &mut Vm) -> Result<Vec<Value>, RuntimeError> {
    let (handle, is_main) = vm.running_coroutine();
    Ok(vec![Value::Coroutine(handle), Value::Bool(is_main)])
}

fn co_isyieldable(_args: &[Value], vm: &mut Vm) -> Result<Vec<Value>, RuntimeError> {
    Ok(vec![Value::Bool(vm.is_yieldable())])
}

fn co_close(args: &[Value], vm: &mut Vm) -> Result<Vec<Value>, RuntimeError> {
    let co = check_coroutine(args, 0, "close")?;
    vm.close_coroutine(&co)
}
