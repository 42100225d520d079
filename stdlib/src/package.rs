//! The `package` library: require with a searcher chain, module caching,
//! chunk loading, and sandboxed module environments.

use std::cell::RefCell;
use std::collections::HashMap;
use std::path::PathBuf;
use std::rc::Rc;

use luma_core::val::{LuaTable, TableRef, Value};
use luma_core::{compile, RuntimeError, Vm};

use crate::support::{arg, bad_argument, check_str, foreign, set_member};

type ModuleEnvs = Rc<RefCell<HashMap<String, TableRef>>>;

const DEFAULT_PATH: &str = "./?.lua;./?/init.lua";

pub fn install(vm: &mut Vm) {
    let package = Rc::new(RefCell::new(LuaTable::new()));
    let loaded = Rc::new(RefCell::new(LuaTable::new()));
    let preload = Rc::new(RefCell::new(LuaTable::new()));
    let searchers = Rc::new(RefCell::new(LuaTable::new()));
    let envs: ModuleEnvs = Rc::new(RefCell::new(HashMap::new()));

    set_member(&package, "loaded", Value::Table(loaded.clone()));
    set_member(&package, "preload", Value::Table(preload.clone()));
    set_member(&package, "searchers", Value::Table(searchers.clone()));
    set_member(&package, "path", Value::str(DEFAULT_PATH));
    set_member(&package, "config", Value::str("/\n;\n?\n!\n-"));

    // Searcher 1: package.preload.
    let preload_for_searcher = preload.clone();
    searchers.borrow_mut().push(foreign("searcher.preload", move |args, _vm| {
        let name = check_str(args, 0, "searcher")?;
        let loader = preload_for_searcher.borrow().raw_get(&Value::str(&name));
        if matches!(loader, Value::Nil) {
            Ok(vec![
                Value::Nil,
                Value::str(format!("no field package.preload['{}']", name)),
            ])
        } else {
            Ok(vec![loader, Value::str(format!("preload:{}", name))])
        }
    }));

    // Searcher 2: files on package.path.
    let package_for_searcher = package.clone();
    let envs_for_searcher = envs.clone();
    searchers.borrow_mut().push(foreign("searcher.lua", move |args, _vm| {
        let name = check_str(args, 0, "searcher")?;
        let module_path = name.replace('.', "/");
        let path_value = package_for_searcher.borrow().raw_get(&Value::str("path"));
        let path_string = match &path_value {
            Value::Str(s) => s.to_string(),
            _ => DEFAULT_PATH.to_string(),
        };
        for template in path_string.split(';') {
            let template = template.trim();
            if template.is_empty() {
                continue;
            }
            let candidate = PathBuf::from(template.replace('?', &module_path));
            if candidate.is_file() {
                let envs = envs_for_searcher.clone();
                let module_name = name.to_string();
                let file = candidate.clone();
                let loader = foreign("module.loader", move |_args, vm| {
                    execute_module_file(vm, &file, &module_name, &envs)
                });
                return Ok(vec![loader, Value::str(candidate.to_string_lossy())]);
            }
        }
        Ok(vec![Value::Nil, Value::str(format!("no file '{}'", module_path))])
    }));

    // package.sandbox(name, env, inherit): registers the environment used
    // the next time `name` is required.
    let envs_for_sandbox = envs.clone();
    set_member(
        &package,
        "sandbox",
        foreign("package.sandbox", move |args, vm| {
            let name = check_str(args, 0, "sandbox")?;
            let env = match arg(args, 1) {
                Value::Table(t) => t,
                other => return Err(bad_argument(2, "sandbox", "table", &other)),
            };
            let inherit = arg(args, 2).truthy();
            if inherit {
                let globals = vm.globals();
                let snapshot: Vec<(Value, Value)> = {
                    let globals = globals.borrow();
                    let array: Vec<(Value, Value)> = globals
                        .array_part()
                        .iter()
                        .enumerate()
                        .map(|(i, v)| (Value::Int(i as i64 + 1), v.clone()))
                        .collect();
                    array
                        .into_iter()
                        .chain(globals.hash_entries().map(|(k, v)| (k.clone(), v.clone())))
                        .collect()
                };
                let mut env_mut = env.borrow_mut();
                for (key, value) in snapshot {
                    if let Value::Str(name) = &key {
                        if matches!(name.as_ref(), "_G" | "_ENV") {
                            continue;
                        }
                    }
                    if matches!(env_mut.raw_get(&key), Value::Nil) {
                        env_mut.raw_set_unchecked(key, value);
                    }
                }
            }
            envs_for_sandbox.borrow_mut().insert(name.to_string(), env);
            Ok(Vec::new())
        }),
    );

    vm.set_global("package", Value::Table(package.clone()));

    // require walks the searchers in order and caches the first loader's
    // result; identical names hit the cache.
    let package_for_require = package.clone();
    vm.set_global(
        "require",
        foreign("require", move |args, vm| {
            let name = check_str(args, 0, "require")?;
            lua_require(vm, &package_for_require, &name)
        }),
    );

    vm.set_global(
        "load",
        foreign("load", |args, vm| {
            let chunk = match arg(args, 0) {
                Value::Str(s) => s.to_string(),
                other => return Err(bad_argument(1, "load", "string", &other)),
            };
            let chunkname = match args.get(1) {
                Some(Value::Str(s)) => s.to_string(),
                _ => "<load>".to_string(),
            };
            let env = match args.get(2) {
                Some(Value::Table(t)) => Some(t.clone()),
                _ => None,
            };
            match load_chunk(vm, &chunk, &chunkname, env) {
                Ok(closure) => Ok(vec![closure]),
                Err(err) => Ok(vec![Value::Nil, Value::str(err.message())]),
            }
        }),
    );

    vm.set_global(
        "loadfile",
        foreign("loadfile", |args, vm| {
            let path = check_str(args, 0, "loadfile")?;
            let env = match args.get(1) {
                Some(Value::Table(t)) => Some(t.clone()),
                _ => None,
            };
            match load_file(vm, path.as_ref(), env) {
                Ok(closure) => Ok(vec![closure]),
                Err(err) => Ok(vec![Value::Nil, Value::str(err.message())]),
            }
        }),
    );

    vm.set_global(
        "dofile",
        foreign("dofile", |args, vm| {
            let path = check_str(args, 0, "dofile")?;
            let closure = load_file(vm, path.as_ref(), None)?;
            vm.call_function(&closure, Vec::new())
        }),
    );
}

fn lua_require(vm: &mut Vm, package: &TableRef, name: &str) -> Result<Vec<Value>, RuntimeError> {
    let loaded = match package.borrow().raw_get(&Value::str("loaded")) {
        Value::Table(t) => t,
        _ => return Err(RuntimeError::msg("package.loaded is not a table")),
    };
    let cached = loaded.borrow().raw_get(&Value::str(name));
    if !matches!(cached, Value::Nil) {
        return Ok(vec![cached]);
    }

    let searchers = match package.borrow().raw_get(&Value::str("searchers")) {
        Value::Table(t) => t,
        _ => return Err(RuntimeError::msg("package.searchers is not a table")),
    };
    let count = searchers.borrow().lua_len();
    let mut errors: Vec<String> = Vec::new();

    for index in 1..=count {
        let searcher = searchers.borrow().raw_get(&Value::Int(index));
        if matches!(searcher, Value::Nil) {
            continue;
        }
        let results = vm.call_function(&searcher, vec![Value::str(name)])?;
        let loader = results.first().cloned().unwrap_or(Value::Nil);
        let extra = results.get(1).cloned().unwrap_or(Value::Nil);
        match loader {
            Value::Closure(_) | Value::Foreign(_) => {
                // Mark as in-progress first so cyclic requires terminate.
                loaded
                    .borrow_mut()
                    .raw_set(Value::str(name), Value::Bool(true))
                    .map_err(RuntimeError::msg)?;
                let values = match vm.call_function(&loader, vec![Value::str(name), extra]) {
                    Ok(values) => values,
                    Err(err) => {
                        let _ = loaded.borrow_mut().raw_set(Value::str(name), Value::Nil);
                        return Err(err);
                    }
                };
                let module_value = match values.into_iter().next() {
                    Some(Value::Nil) | None => Value::Bool(true),
                    Some(value) => value,
                };
                loaded
                    .borrow_mut()
                    .raw_set(Value::str(name), module_value.clone())
                    .map_err(RuntimeError::msg)?;
                return Ok(vec![module_value]);
            }
            _ => {
                if let Value::Str(message) = extra {
                    errors.push(message.to_string());
                }
            }
        }
    }

    let mut message = format!("module '{}' not found", name);
    if !errors.is_empty() {
        message.push_str(": ");
        message.push_str(&errors.join("; "));
    }
    Err(RuntimeError::msg(message))
}

fn load_chunk(vm: &mut Vm, source: &str, chunkname: &str, env: Option<TableRef>) -> Result<Value, RuntimeError> {
    let program = compile(source, chunkname).map_err(|e| RuntimeError::msg(e.to_string()))?;
    let closure = vm.load_program(program, env)?;
    Ok(Value::Closure(closure))
}

fn load_file(vm: &mut Vm, path: &str, env: Option<TableRef>) -> Result<Value, RuntimeError> {
    let source = std::fs::read_to_string(path)
        .map_err(|e| RuntimeError::msg(format!("cannot open {}: {}", path, e)))?;
    load_chunk(vm, &source, path, env)
}

fn execute_module_file(
    vm: &mut Vm,
    path: &std::path::Path,
    name: &str,
    envs: &ModuleEnvs,
) -> Result<Vec<Value>, RuntimeError> {
    let env = envs.borrow().get(name).cloned();
    let closure = load_file(vm, &path.to_string_lossy(), env)?;
    vm.call_function(&closure, vec![Value::str(name)])
}
