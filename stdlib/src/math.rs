//! The `math` library. `random`/`randomseed` share one seeded generator so
//! seeded runs reproduce.

use std::cell::RefCell;
use std::rc::Rc;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use luma_core::val::{Number, Value};
use luma_core::{RuntimeError, Vm};

use crate::support::{check_int, check_number, foreign, new_library, set_fn, set_member};

pub fn install(vm: &mut Vm) {
    let lib = new_library(vm, "math");
    set_member(&lib, "pi", Value::Float(std::f64::consts::PI));
    set_member(&lib, "huge", Value::Float(f64::INFINITY));
    set_member(&lib, "maxinteger", Value::Int(i64::MAX));
    set_member(&lib, "mininteger", Value::Int(i64::MIN));

    set_fn(&lib, "math", "abs", math_abs);
    set_fn(&lib, "math", "floor", math_floor);
    set_fn(&lib, "math", "ceil", math_ceil);
    set_fn(&lib, "math", "sqrt", unary(f64::sqrt));
    set_fn(&lib, "math", "sin", unary(f64::sin));
    set_fn(&lib, "math", "cos", unary(f64::cos));
    set_fn(&lib, "math", "tan", unary(f64::tan));
    set_fn(&lib, "math", "asin", unary(f64::asin));
    set_fn(&lib, "math", "acos", unary(f64::acos));
    set_fn(&lib, "math", "atan", unary(f64::atan));
    set_fn(&lib, "math", "exp", unary(f64::exp));
    set_fn(&lib, "math", "deg", unary(f64::to_degrees));
    set_fn(&lib, "math", "rad", unary(f64::to_radians));
    set_fn(&lib, "math", "log", math_log);
    set_fn(&lib, "math", "modf", math_modf);
    set_fn(&lib, "math", "pow", math_pow);
    set_fn(&lib, "math", "min", math_min);
    set_fn(&lib, "math", "max", math_max);
    set_fn(&lib, "math", "tointeger", math_tointeger);

    let rng = Rc::new(RefCell::new(StdRng::seed_from_u64(0)));
    let random_rng = rng.clone();
    set_member(
        &lib,
        "random",
        foreign("math.random", move |args, _vm| math_random(args, &random_rng)),
    );
    set_member(
        &lib,
        "randomseed",
        foreign("math.randomseed", move |args, _vm| {
            let seed = check_int(args, 0, "randomseed")?;
            *rng.borrow_mut() = StdRng::seed_from_u64(seed as u64);
            Ok(Vec::new())
        }),
    );
}

fn unary(f: fn(f64) -> f64) -> impl Fn(&[Value], &mut Vm) -> Result<Vec<Value>, RuntimeError> {
    move |args, _vm| {
        let x = check_number(args, 0, "math")?.as_f64();
        Ok(vec![Value::Float(f(x))])
    }
}

fn math_abs(args: &[Value], _vm: &mut Vm) -> Result<Vec<Value>, RuntimeError> {
    match check_number(args, 0, "abs")? {
        Number::Int(i) => Ok(vec![Value::Int(i.wrapping_abs())]),
        Number::Float(f) => Ok(vec![Value::Float(f.abs())]),
    }
}

fn math_floor(args: &[Value], _vm: &mut Vm) -> Result<Vec<Value>, RuntimeError> {
    match check_number(args, 0, "floor")? {
        Number::Int(i) => Ok(vec![Value::Int(i)]),
        Number::Float(f) => Ok(vec![Value::Int(f.floor() as i64)]),
    }
}

fn math_ceil(args: &[Value], _vm: &mut Vm) -> Result<Vec<Value>, RuntimeError> {
    match check_number(args, 0, "ceil")? {
        Number::Int(i) => Ok(vec![Value::Int(i)]),
        Number::Float(f) => Ok(vec![Value::Int(f.ceil() as i64)]),
    }
}

fn math_log(args: &[Value], _vm: &mut Vm) -> Result<Vec<Value>, RuntimeError> {
    let x = check_number(args, 0, "log")?.as_f64();
    let result = match args.get(1) {
        None | Some(Value::Nil) => x.ln(),
        Some(_) => {
            let base = check_number(args, 1, "log")?.as_f64();
            x.log(base)
        }
    };
    Ok(vec![Value::Float(result)])
}

fn math_modf(args: &[Value], _vm: &mut Vm) -> Result<Vec<Value>, RuntimeError> {
    let x = check_number(args, 0, "modf")?.as_f64();
    Ok(vec![Value::Float(x.trunc()), Value::Float(x.fract())])
}

fn math_pow(args: &[Value], _vm: &mut Vm) -> Result<Vec<Value>, RuntimeError> {
    let base = check_number(args, 0, "pow")?.as_f64();
    let exponent = check_number(args, 1, "pow")?.as_f64();
    Ok(vec![Value::Float(base.powf(exponent))])
}

fn math_min(args: &[Value], _vm: &mut Vm) -> Result<Vec<Value>, RuntimeError> {
    fold_extremum(args, "min", |a, b| a < b)
}

fn math_max(args: &[Value], _vm: &mut Vm) -> Result<Vec<Value>, RuntimeError> {
    fold_extremum(args, "max", |a, b| a > b)
}

fn fold_extremum(
    args: &[Value],
    fname: &str,
    wins: fn(f64, f64) -> bool,
) -> Result<Vec<Value>, RuntimeError> {
    if args.is_empty() {
        return Err(RuntimeError::msg(format!(
            "bad argument #1 to '{}' (value expected)",
            fname
        )));
    }
    let mut best = args[0].clone();
    let mut best_n = check_number(args, 0, fname)?.as_f64();
    for index in 1..args.len() {
        let n = check_number(args, index, fname)?.as_f64();
        if wins(n, best_n) {
            best_n = n;
            best = args[index].clone();
        }
    }
    Ok(vec![best])
}

fn math_tointeger(args: &[Value], _vm: &mut Vm) -> Result<Vec<Value>, RuntimeError> {
    Ok(vec![luma_core::val::tointeger(args.first().unwrap_or(&Value::Nil))
        .map(Value::Int)
        .unwrap_or(Value::Nil)])
}

fn math_random(args: &[Value], rng: &Rc<RefCell<StdRng>>) -> Result<Vec<Value>, RuntimeError> {
    let mut rng = rng.borrow_mut();
    match args.len() {
        0 => Ok(vec![Value::Float(rng.gen::<f64>())]),
        1 => {
            let upper = check_int(args, 0, "random")?;
            if upper < 1 {
                return Err(RuntimeError::msg("bad argument #1 to 'random' (interval is empty)"));
            }
            Ok(vec![Value::Int(rng.gen_range(1..=upper))])
        }
        _ => {
            let lower = check_int(args, 0, "random")?;
            let upper = check_int(args, 1, "random")?;
            if lower > upper {
                return Err(RuntimeError::msg("bad argument #2 to 'random' (interval is empty)"));
            }
            Ok(vec![Value::Int(rng.gen_range(lower..=upper))])
        }
    }
}
