//! String/number conversions and the numeric coercion ladder.

use std::rc::Rc;

use crate::val::Value;

/// A value successfully coerced to a number, keeping the int/float split.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Number {
    Int(i64),
    Float(f64),
}

impl Number {
    pub fn as_f64(self) -> f64 {
        match self {
            Number::Int(i) => i as f64,
            Number::Float(f) => f,
        }
    }

    pub fn into_value(self) -> Value {
        match self {
            Number::Int(i) => Value::Int(i),
            Number::Float(f) => Value::Float(f),
        }
    }
}

/// Render a float the way Lua does: integral finite floats keep a trailing
/// `.0` so they stay visually distinct from integers.
pub fn float_to_display(f: f64) -> String {
    if f.is_nan() {
        return "nan".to_string();
    }
    if f.is_infinite() {
        return if f > 0.0 { "inf".to_string() } else { "-inf".to_string() };
    }
    if f == f.trunc() && f.abs() < 1e15 {
        format!("{:.1}", f)
    } else {
        format!("{}", f)
    }
}

/// `tostring` without metamethod involvement.
pub fn tostring(value: &Value) -> String {
    match value {
        Value::Nil => "nil".to_string(),
        Value::Bool(true) => "true".to_string(),
        Value::Bool(false) => "false".to_string(),
        Value::Int(i) => i.to_string(),
        Value::Float(f) => float_to_display(*f),
        Value::Str(s) => s.to_string(),
        Value::Table(_) => format!("table: 0x{:012x}", value.identity().unwrap_or(0)),
        Value::Closure(_) | Value::Foreign(_) => {
            format!("function: 0x{:012x}", value.identity().unwrap_or(0))
        }
        Value::Coroutine(_) => format!("thread: 0x{:012x}", value.identity().unwrap_or(0)),
        Value::Cell(c) => format!("cell({})", tostring(&c.borrow())),
        Value::List(items) => {
            let rendered: Vec<String> = items.iter().map(tostring).collect();
            format!("({})", rendered.join(", "))
        }
    }
}

/// `tonumber` for numbers and numeric strings; anything else is `None`.
pub fn tonumber(value: &Value) -> Option<Number> {
    match value {
        Value::Int(i) => Some(Number::Int(*i)),
        Value::Float(f) => Some(Number::Float(*f)),
        Value::Str(s) => parse_number(s),
        _ => None,
    }
}

/// Parse a numeric string: decimal int, hex int (`0x`), or float.
pub fn parse_number(text: &str) -> Option<Number> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return None;
    }
    let (negative, body) = match trimmed.strip_prefix('-') {
        Some(rest) => (true, rest.trim_start()),
        None => (false, trimmed),
    };
    let apply_sign_int = |v: i64| if negative { -v } else { v };
    let apply_sign_float = |v: f64| if negative { -v } else { v };

    if let Some(hex) = body.strip_prefix("0x").or_else(|| body.strip_prefix("0X")) {
        return i64::from_str_radix(hex, 16)
            .ok()
            .map(|v| Number::Int(apply_sign_int(v)));
    }
    if let Ok(int) = body.parse::<i64>() {
        return Some(Number::Int(apply_sign_int(int)));
    }
    body.parse::<f64>()
        .ok()
        .filter(|f| f.is_finite() || body.contains("inf"))
        .map(|f| Number::Float(apply_sign_float(f)))
}

/// `tonumber(v, base)` for explicit bases 2..=36; accepts string digits only.
pub fn tonumber_base(value: &Value, base: u32) -> Option<i64> {
    let text: Rc<str> = match value {
        Value::Str(s) => s.clone(),
        Value::Int(i) => Rc::from(i.to_string().as_str()),
        _ => return None,
    };
    i64::from_str_radix(text.trim(), base).ok()
}

/// Integer coercion for bitwise operators: ints, integral floats, and
/// numeric strings qualify.
pub fn tointeger(value: &Value) -> Option<i64> {
    match tonumber(value)? {
        Number::Int(i) => Some(i),
        Number::Float(f) if f == f.trunc() && f.is_finite() => Some(f as i64),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_float_display_keeps_point() {
        assert_eq!(float_to_display(1.0), "1.0");
        assert_eq!(float_to_display(2.5), "2.5");
        assert_eq!(float_to_display(f64::INFINITY), "inf");
    }

    #[test]
    fn test_parse_number_forms() {
        assert_eq!(parse_number("42"), Some(Number::Int(42)));
        assert_eq!(parse_number("  -7 "), Some(Number::Int(-7)));
        assert_eq!(parse_number("0x10"), Some(Number::Int(16)));
        assert_eq!(parse_number("3.5"), Some(Number::Float(3.5)));
        assert_eq!(parse_number("1e2"), Some(Number::Float(100.0)));
        assert_eq!(parse_number("zzz"), None);
    }

    #[test]
    fn test_tointeger_accepts_integral_floats() {
        assert_eq!(tointeger(&Value::Float(4.0)), Some(4));
        assert_eq!(tointeger(&Value::Float(4.5)), None);
        assert_eq!(tointeger(&Value::str("12")), Some(12));
    }
}
