pub(super) use crate::compile::compile;
pub(super) use crate::val::Value;
pub(super) use crate::vm::{Op, Program, RunOptions, RunOutput, RuntimeError, TraceMode, Vm};

mod bytecode;
mod calls;
mod coroutines;
mod metatables;
mod semantics;

pub(super) fn compile_src(src: &str) -> Program {
    compile(src, "test.lua").expect("compile")
}

/// Fresh VM with the test builtins installed: `yield`, `pcall`,
/// `setmetatable`, and thin coroutine hooks over the scheduler API.
pub(super) fn vm_for(src: &str) -> Vm {
    let mut vm = Vm::new(compile_src(src));
    install_test_builtins(&mut vm);
    vm
}

pub(super) fn run_src(src: &str) -> RunOutput {
    vm_for(src).run(RunOptions::default()).expect("run")
}

pub(super) fn returns(src: &str) -> Vec<Value> {
    run_src(src).last_return
}

pub(super) fn run_err(src: &str) -> RuntimeError {
    vm_for(src)
        .run(RunOptions::default())
        .expect_err("expected runtime error")
}

pub(super) fn install_test_builtins(vm: &mut Vm) {
    vm.register_foreign("yield", |args, vm| {
        vm.request_yield(args.to_vec())?;
        Ok(Vec::new())
    });
    vm.register_foreign("pcall", |args, vm| {
        let f = args.first().cloned().unwrap_or(Value::Nil);
        match vm.call_function(&f, args[1.min(args.len())..].to_vec()) {
            Ok(mut values) => {
                let mut out = vec![Value::Bool(true)];
                out.append(&mut values);
                Ok(out)
            }
            Err(err) => Ok(vec![Value::Bool(false), err.value]),
        }
    });
    vm.register_foreign("setmetatable", |args, _vm| match (args.first(), args.get(1)) {
        (Some(Value::Table(t)), Some(Value::Table(m))) => {
            t.borrow_mut().set_metatable(Some(m.clone()));
            Ok(vec![args[0].clone()])
        }
        _ => Err(RuntimeError::msg("setmetatable expects (table, table)")),
    });
    vm.register_foreign("cocreate", |args, vm| match args.first() {
        Some(Value::Closure(c)) => Ok(vec![Value::Coroutine(vm.create_coroutine(c.clone()))]),
        _ => Err(RuntimeError::msg("cocreate expects a function")),
    });
    vm.register_foreign("coresume", |args, vm| match args.first() {
        Some(Value::Coroutine(co)) => {
            let co = co.clone();
            let result = vm.resume_coroutine(&co, args[1..].to_vec());
            let mut out = vec![Value::Bool(result.success)];
            out.extend(result.values);
            Ok(out)
        }
        _ => Err(RuntimeError::msg("coresume expects a coroutine")),
    });
    vm.register_foreign("costatus", |args, _vm| match args.first() {
        Some(Value::Coroutine(co)) => Ok(vec![Value::str(co.borrow().status.as_str())]),
        _ => Err(RuntimeError::msg("costatus expects a coroutine")),
    });
    vm.register_foreign("coisyieldable", |_args, vm| {
        Ok(vec![Value::Bool(vm.is_yieldable())])
    });
}
