//! Coroutine scheduling through the VM API and through bytecode.

use super::*;
use crate::vm::CoroutineStatus;

fn first_closure(vm: &mut Vm) -> std::rc::Rc<crate::val::Closure> {
    let out = vm.run(RunOptions::default()).expect("run");
    match out.last_return.into_iter().next() {
        Some(Value::Closure(c)) => c,
        other => panic!("expected closure, got {:?}", other),
    }
}

#[test]
fn test_producer_consumer_lifecycle() {
    let mut vm = vm_for(
        "return function() yield('apple') yield('banana') yield('orange') end",
    );
    let producer = first_closure(&mut vm);
    let co = vm.create_coroutine(producer);

    let r1 = vm.resume_coroutine(&co, vec![]);
    assert!(r1.success);
    assert_eq!(r1.values, vec![Value::str("apple")]);

    let r2 = vm.resume_coroutine(&co, vec![]);
    assert_eq!(r2.values, vec![Value::str("banana")]);

    let r3 = vm.resume_coroutine(&co, vec![]);
    assert_eq!(r3.values, vec![Value::str("orange")]);

    let r4 = vm.resume_coroutine(&co, vec![]);
    assert!(r4.success);
    assert!(r4.values.is_empty());
    assert_eq!(co.borrow().status, CoroutineStatus::Dead);

    let r5 = vm.resume_coroutine(&co, vec![]);
    assert!(!r5.success);
    assert_eq!(r5.values, vec![Value::str("cannot resume dead coroutine")]);
}

#[test]
fn test_resume_args_and_yield_values_round_trip() {
    let mut vm = vm_for(
        "return function(a, b) \
           local c = yield(a + b) \
           return c * 2 \
         end",
    );
    let f = first_closure(&mut vm);
    let co = vm.create_coroutine(f);

    let r1 = vm.resume_coroutine(&co, vec![Value::Int(2), Value::Int(3)]);
    assert!(r1.success);
    assert_eq!(r1.values, vec![Value::Int(5)]);

    let r2 = vm.resume_coroutine(&co, vec![Value::Int(10)]);
    assert!(r2.success);
    assert_eq!(r2.values, vec![Value::Int(20)]);
    assert_eq!(co.borrow().status, CoroutineStatus::Dead);
}

#[test]
fn test_status_monotonic_lifecycle() {
    let mut vm = vm_for("return function() yield() end");
    let f = first_closure(&mut vm);
    let co = vm.create_coroutine(f);
    assert_eq!(co.borrow().status, CoroutineStatus::Suspended);
    vm.resume_coroutine(&co, vec![]);
    assert_eq!(co.borrow().status, CoroutineStatus::Suspended);
    vm.resume_coroutine(&co, vec![]);
    assert_eq!(co.borrow().status, CoroutineStatus::Dead);
}

#[test]
fn test_error_in_coroutine_kills_it() {
    let mut vm = vm_for("return function() local x = nil return x.y end");
    let f = first_closure(&mut vm);
    let co = vm.create_coroutine(f);
    let r = vm.resume_coroutine(&co, vec![]);
    assert!(!r.success);
    assert_eq!(co.borrow().status, CoroutineStatus::Dead);
    assert!(co.borrow().last_error.is_some());
}

#[test]
fn test_yield_across_pcall_is_forbidden() {
    // pcall catches the violation inside the coroutine; the coroutine then
    // finishes normally.
    let mut vm = vm_for(
        "return function() \
           local ok, err = pcall(function() yield(1) end) \
           return ok, err \
         end",
    );
    let f = first_closure(&mut vm);
    let co = vm.create_coroutine(f);
    let r = vm.resume_coroutine(&co, vec![]);
    assert!(r.success, "coroutine itself completes normally");
    assert_eq!(co.borrow().status, CoroutineStatus::Dead);
    assert_eq!(r.values[0], Value::Bool(false));
    match &r.values[1] {
        Value::Str(msg) => {
            assert!(
                msg.ends_with("attempt to yield across a C-call boundary"),
                "got {}",
                msg
            );
        }
        other => panic!("expected message string, got {:?}", other),
    }
}

#[test]
fn test_yield_from_main_thread_is_an_error() {
    let err = run_err("yield(1)");
    assert!(err.message().contains("attempt to yield from outside a coroutine"));
}

#[test]
fn test_isyieldable_positions() {
    // Inside a coroutine body: yieldable. On the main thread: not.
    let values = returns("return coisyieldable()");
    assert_eq!(values, vec![Value::Bool(false)]);

    let mut vm = vm_for("return function() return coisyieldable() end");
    let f = first_closure(&mut vm);
    let co = vm.create_coroutine(f);
    let r = vm.resume_coroutine(&co, vec![]);
    assert_eq!(r.values, vec![Value::Bool(true)]);
}

#[test]
fn test_nested_resume_marks_caller_normal() {
    let values = returns(
        "local inner = cocreate(function() \
           yield(costatus(outerco)) \
         end) \
         outerco = cocreate(function() \
           local ok, status = coresume(inner) \
           yield(status) \
         end) \
         local ok, status = coresume(outerco) \
         return status",
    );
    assert_eq!(values, vec![Value::str("normal")]);
}

#[test]
fn test_running_identifies_main_thread() {
    let mut vm = vm_for("return 1");
    vm.run(RunOptions::default()).expect("run");
    let (handle, is_main) = vm.running_coroutine();
    assert!(is_main);
    assert!(handle.borrow().is_main);
}

#[test]
fn test_close_suspended_coroutine() {
    let mut vm = vm_for("return function() yield() end");
    let f = first_closure(&mut vm);
    let co = vm.create_coroutine(f);
    vm.resume_coroutine(&co, vec![]);
    assert_eq!(co.borrow().status, CoroutineStatus::Suspended);
    let result = vm.close_coroutine(&co).expect("close");
    assert_eq!(result, vec![Value::Bool(true)]);
    assert_eq!(co.borrow().status, CoroutineStatus::Dead);
}

#[test]
fn test_coroutine_event_stream() {
    let mut vm = vm_for("return function() yield(1) end");
    vm.set_trace_mode(TraceMode::Coroutine);
    let f = first_closure(&mut vm);
    let co = vm.create_coroutine(f);
    vm.resume_coroutine(&co, vec![]);
    vm.resume_coroutine(&co, vec![]);

    let kinds: Vec<String> = vm
        .drain_events()
        .into_iter()
        .map(|e| e.describe())
        .collect();
    assert!(kinds[0].starts_with("created #1"));
    assert!(kinds[1].starts_with("resume #1"));
    assert!(kinds[2].starts_with("yield #1"));
    assert!(kinds[3].starts_with("resume #1"));
    assert!(kinds[4].contains("completed"));
}

#[test]
fn test_snapshot_reports_coroutines() {
    let mut vm = vm_for("return function() yield() end");
    let f = first_closure(&mut vm);
    let co = vm.create_coroutine(f);
    vm.resume_coroutine(&co, vec![]);
    let snapshot = vm.snapshot();
    assert_eq!(snapshot.current_coroutine_id, 0);
    assert_eq!(snapshot.coroutines.len(), 2);
    assert_eq!(snapshot.coroutines[1].status, "suspended");
    drop(co);
}

#[test]
fn test_traceback_of_suspended_coroutine() {
    let mut vm = vm_for("return function() yield() end");
    let f = first_closure(&mut vm);
    let co = vm.create_coroutine(f);
    vm.resume_coroutine(&co, vec![]);
    let frames = vm.traceback_of_coroutine(&co);
    assert!(!frames.is_empty());
    assert!(frames.iter().all(|f| f.coroutine_id == 1));
}
