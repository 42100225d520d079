//! Standard library for the Luma VM: base globals plus the `coroutine`,
//! `table`, `string`, `math`, `io`, `os`, `debug`, and `package` libraries,
//! all registered as foreign functions over the core VM's handle API.

pub mod coroutine;
pub mod debug;
pub mod globals;
pub mod io;
pub mod math;
pub mod os;
pub mod package;
pub mod pattern;
pub mod string;
pub mod support;
pub mod table;

#[cfg(test)]
mod coroutine_test;
#[cfg(test)]
mod globals_test;
#[cfg(test)]
mod os_test;
#[cfg(test)]
mod package_test;

use luma_core::Vm;

/// Install every library into the VM's global environment.
pub fn install_stdlib(vm: &mut Vm) {
    tracing::debug!("installing stdlib");
    globals::install(vm);
    coroutine::install(vm);
    table::install(vm);
    string::install(vm);
    math::install(vm);
    io::install(vm);
    os::install(vm);
    debug::install(vm);
    package::install(vm);
}

#[cfg(test)]
pub(crate) mod testutil {
    use luma_core::val::Value;
    use luma_core::{compile, RunOptions, RunOutput, RuntimeError, Vm};

    pub(crate) fn vm_for(src: &str) -> Vm {
        let program = compile(src, "test.lua").expect("compile");
        let mut vm = Vm::new(program);
        crate::install_stdlib(&mut vm);
        vm
    }

    pub(crate) fn run(src: &str) -> RunOutput {
        vm_for(src).run(RunOptions::default()).expect("run")
    }

    pub(crate) fn returns(src: &str) -> Vec<Value> {
        run(src).last_return
    }

    pub(crate) fn run_err(src: &str) -> RuntimeError {
        vm_for(src)
            .run(RunOptions::default())
            .expect_err("expected runtime error")
    }

    pub(crate) fn output_lines(src: &str) -> Vec<String> {
        run(src)
            .output
            .iter()
            .map(luma_core::val::tostring)
            .collect()
    }
}
