//! Minimal `os` library: clock/time/date/difftime only, no filesystem or
//! process control.

use std::time::Instant;

use chrono::{DateTime, Datelike, Local, TimeZone, Timelike, Utc};
use once_cell::sync::Lazy;

use luma_core::val::{LuaTable, Value};
use luma_core::{RuntimeError, Vm};

use crate::support::{check_number, new_library, opt_int, set_fn};

static PROCESS_START: Lazy<Instant> = Lazy::new(Instant::now);

pub fn install(vm: &mut Vm) {
    // Touch the start instant so os.clock measures from install time at the
    // latest.
    Lazy::force(&PROCESS_START);
    let lib = new_library(vm, "os");
    set_fn(&lib, "os", "clock", os_clock);
    set_fn(&lib, "os", "time", os_time);
    set_fn(&lib, "os", "date", os_date);
    set_fn(&lib, "os", "difftime", os_difftime);
}

fn os_clock(_args: &[Value], _vm: &mut Vm) -> Result<Vec<Value>, RuntimeError> {
    Ok(vec![Value::Float(PROCESS_START.elapsed().as_secs_f64())])
}

fn os_time(args: &[Value], _vm: &mut Vm) -> Result<Vec<Value>, RuntimeError> {
    match args.first() {
        None | Some(Value::Nil) => Ok(vec![Value::Int(Utc::now().timestamp())]),
        Some(Value::Table(t)) => {
            let t = t.borrow();
            let field = |name: &str, default: i64| -> i64 {
                luma_core::val::tointeger(&t.raw_get(&Value::str(name))).unwrap_or(default)
            };
            let timestamp = Local
                .with_ymd_and_hms(
                    field("year", 1970) as i32,
                    field("month", 1) as u32,
                    field("day", 1) as u32,
                    field("hour", 12) as u32,
                    field("min", 0) as u32,
                    field("sec", 0) as u32,
                )
                .single()
                .ok_or_else(|| RuntimeError::msg("time result cannot be represented"))?;
            Ok(vec![Value::Int(timestamp.timestamp())])
        }
        Some(other) => Err(RuntimeError::msg(format!(
            "bad argument #1 to 'time' (table expected, got {})",
            other.type_name()
        ))),
    }
}

fn os_date(args: &[Value], _vm: &mut Vm) -> Result<Vec<Value>, RuntimeError> {
    let format = match args.first() {
        None | Some(Value::Nil) => "%c".to_string(),
        Some(Value::Str(s)) => s.to_string(),
        Some(other) => {
            return Err(RuntimeError::msg(format!(
                "bad argument #1 to 'date' (string expected, got {})",
                other.type_name()
            )));
        }
    };
    let when = opt_int(args, 1, Utc::now().timestamp(), "date")?;

    let (format, utc) = match format.strip_prefix('!') {
        Some(rest) => (rest.to_string(), true),
        None => (format, false),
    };

    if format.starts_with("*t") {
        let dt = Local
            .timestamp_opt(when, 0)
            .single()
            .ok_or_else(|| RuntimeError::msg("date result cannot be represented"))?;
        return Ok(vec![date_table(&dt)]);
    }

    let rendered = if utc {
        let dt = Utc
            .timestamp_opt(when, 0)
            .single()
            .ok_or_else(|| RuntimeError::msg("date result cannot be represented"))?;
        dt.format(&format).to_string()
    } else {
        let dt = Local
            .timestamp_opt(when, 0)
            .single()
            .ok_or_else(|| RuntimeError::msg("date result cannot be represented"))?;
        dt.format(&format).to_string()
    };
    Ok(vec![Value::str(rendered)])
}

fn date_table(dt: &DateTime<Local>) -> Value {
    let mut t = LuaTable::new();
    t.raw_set_unchecked(Value::str("year"), Value::Int(dt.year() as i64));
    t.raw_set_unchecked(Value::str("month"), Value::Int(dt.month() as i64));
    t.raw_set_unchecked(Value::str("day"), Value::Int(dt.day() as i64));
    t.raw_set_unchecked(Value::str("hour"), Value::Int(dt.hour() as i64));
    t.raw_set_unchecked(Value::str("min"), Value::Int(dt.minute() as i64));
    t.raw_set_unchecked(Value::str("sec"), Value::Int(dt.second() as i64));
    t.raw_set_unchecked(
        Value::str("wday"),
        Value::Int(dt.weekday().num_days_from_sunday() as i64 + 1),
    );
    t.raw_set_unchecked(Value::str("yday"), Value::Int(dt.ordinal() as i64));
    t.raw_set_unchecked(Value::str("isdst"), Value::Bool(false));
    Value::table(t)
}

fn os_difftime(args: &[Value], _vm: &mut Vm) -> Result<Vec<Value>, RuntimeError> {
    let t2 = check_number(args, 0, "difftime")?.as_f64();
    let t1 = match args.get(1) {
        None | Some(Value::Nil) => 0.0,
        Some(_) => check_number(args, 1, "difftime")?.as_f64(),
    };
    Ok(vec![Value::Float(t2 - t1)])
}
