//! The `string` library, including Lua pattern find/match/gmatch/gsub.

use std::cell::RefCell;
use std::rc::Rc;

use luma_core::val::{tostring, LuaTable, Value};
use luma_core::{RuntimeError, Vm};

use crate::pattern::{self, Capture};
use crate::support::{arg, bad_argument, check_int, check_str, foreign, new_library, opt_int, set_fn};

pub fn install(vm: &mut Vm) {
    let lib = new_library(vm, "string");
    set_fn(&lib, "string", "len", str_len);
    set_fn(&lib, "string", "sub", str_sub);
    set_fn(&lib, "string", "upper", str_upper);
    set_fn(&lib, "string", "lower", str_lower);
    set_fn(&lib, "string", "rep", str_rep);
    set_fn(&lib, "string", "reverse", str_reverse);
    set_fn(&lib, "string", "byte", str_byte);
    set_fn(&lib, "string", "char", str_char);
    set_fn(&lib, "string", "format", str_format);
    set_fn(&lib, "string", "find", str_find);
    set_fn(&lib, "string", "match", str_match);
    set_fn(&lib, "string", "gmatch", str_gmatch);
    set_fn(&lib, "string", "gsub", str_gsub);

    // Strings share one metatable whose __index is the library, enabling
    // `("x"):upper()` method syntax.
    let meta = Rc::new(RefCell::new(LuaTable::new()));
    meta.borrow_mut()
        .raw_set_unchecked(Value::str("__index"), Value::Table(lib));
    vm.set_string_metatable(meta);
}

/// Translate a 1-based (possibly negative) Lua index to a byte offset.
fn lower_bound(index: i64, len: usize) -> usize {
    if index > 0 {
        (index as usize - 1).min(len)
    } else if index == 0 {
        0
    } else {
        len.saturating_sub((-index) as usize)
    }
}

fn upper_bound(index: i64, len: usize) -> usize {
    if index > 0 {
        (index as usize).min(len)
    } else if index == 0 {
        0
    } else {
        let back = (-index) as usize;
        if back >= len {
            0
        } else {
            len - back + 1
        }
    }
}

fn str_len(args: &[Value], _vm: &mut Vm) -> Result<Vec<Value>, RuntimeError> {
    let s = check_str(args, 0, "len")?;
    Ok(vec![Value::Int(s.len() as i64)])
}

fn str_sub(args: &[Value], _vm: &mut Vm) -> Result<Vec<Value>, RuntimeError> {
    let s = check_str(args, 0, "sub")?;
    let bytes = s.as_bytes();
    let from = lower_bound(opt_int(args, 1, 1, "sub")?, bytes.len());
    let to = upper_bound(opt_int(args, 2, -1, "sub")?, bytes.len());
    if from >= to {
        return Ok(vec![Value::str("")]);
    }
    Ok(vec![Value::str(String::from_utf8_lossy(&bytes[from..to]))])
}

fn str_upper(args: &[Value], _vm: &mut Vm) -> Result<Vec<Value>, RuntimeError> {
    let s = check_str(args, 0, "upper")?;
    Ok(vec![Value::str(s.to_uppercase())])
}

fn str_lower(args: &[Value], _vm: &mut Vm) -> Result<Vec<Value>, RuntimeError> {
    let s = check_str(args, 0, "lower")?;
    Ok(vec![Value::str(s.to_lowercase())])
}

fn str_rep(args: &[Value], _vm: &mut Vm) -> Result<Vec<Value>, RuntimeError> {
    let s = check_str(args, 0, "rep")?;
    let count = check_int(args, 1, "rep")?;
    let sep = match args.get(2) {
        None | Some(Value::Nil) => String::new(),
        Some(_) => check_str(args, 2, "rep")?.to_string(),
    };
    if count <= 0 {
        return Ok(vec![Value::str("")]);
    }
    let mut out = String::with_capacity(s.len() * count as usize);
    for i in 0..count {
        if i > 0 {
            out.push_str(&sep);
        }
        out.push_str(&s);
    }
    Ok(vec![Value::str(out)])
}

fn str_reverse(args: &[Value], _vm: &mut Vm) -> Result<Vec<Value>, RuntimeError> {
    let s = check_str(args, 0, "reverse")?;
    let reversed: Vec<u8> = s.as_bytes().iter().rev().copied().collect();
    Ok(vec![Value::str(String::from_utf8_lossy(&reversed))])
}

fn str_byte(args: &[Value], _vm: &mut Vm) -> Result<Vec<Value>, RuntimeError> {
    let s = check_str(args, 0, "byte")?;
    let bytes = s.as_bytes();
    let from = opt_int(args, 1, 1, "byte")?;
    let to = opt_int(args, 2, from, "byte")?;
    let from = lower_bound(from, bytes.len());
    let to = upper_bound(to, bytes.len());
    Ok(bytes[from.min(to)..to]
        .iter()
        .map(|b| Value::Int(*b as i64))
        .collect())
}

fn str_char(args: &[Value], _vm: &mut Vm) -> Result<Vec<Value>, RuntimeError> {
    let mut out = Vec::with_capacity(args.len());
    for (index, value) in args.iter().enumerate() {
        let code = luma_core::val::tointeger(value)
            .filter(|c| (0..=255).contains(c))
            .ok_or_else(|| bad_argument(index + 1, "char", "value out of range", value))?;
        out.push(code as u8);
    }
    Ok(vec![Value::str(String::from_utf8_lossy(&out))])
}

/// `string.format` with the usual directives: d, i, u, x, X, o, c, f, g, e,
/// s, q, and %%, plus flags/width/precision.
fn str_format(args: &[Value], vm: &mut Vm) -> Result<Vec<Value>, RuntimeError> {
    let fmt = check_str(args, 0, "format")?;
    let mut out = String::with_capacity(fmt.len());
    let bytes = fmt.as_bytes();
    let mut i = 0;
    let mut next_arg = 1;
    while i < bytes.len() {
        if bytes[i] != b'%' {
            out.push(bytes[i] as char);
            i += 1;
            continue;
        }
        i += 1;
        if i < bytes.len() && bytes[i] == b'%' {
            out.push('%');
            i += 1;
            continue;
        }
        let spec_start = i;
        while i < bytes.len() && matches!(bytes[i], b'-' | b'+' | b' ' | b'#' | b'0') {
            i += 1;
        }
        while i < bytes.len() && bytes[i].is_ascii_digit() {
            i += 1;
        }
        let mut precision: Option<usize> = None;
        if i < bytes.len() && bytes[i] == b'.' {
            i += 1;
            let p_start = i;
            while i < bytes.len() && bytes[i].is_ascii_digit() {
                i += 1;
            }
            precision = std::str::from_utf8(&bytes[p_start..i]).ok().and_then(|s| s.parse().ok());
        }
        let spec: String = String::from_utf8_lossy(&bytes[spec_start..i]).into_owned();
        let (flags, width) = parse_spec(&spec);
        let conv = *bytes
            .get(i)
            .ok_or_else(|| RuntimeError::msg("invalid format string to 'format'"))?;
        i += 1;
        let value = arg(args, next_arg);
        next_arg += 1;

        let rendered = match conv {
            b'd' | b'i' => format_integer(&value, 10, false, &flags, precision)?,
            b'u' => format_integer(&value, 10, false, &flags, precision)?,
            b'x' => format_integer(&value, 16, false, &flags, precision)?,
            b'X' => format_integer(&value, 16, true, &flags, precision)?,
            b'o' => format_integer(&value, 8, false, &flags, precision)?,
            b'c' => {
                let code = luma_core::val::tointeger(&value)
                    .ok_or_else(|| bad_argument(next_arg - 1, "format", "number", &value))?;
                ((code as u8) as char).to_string()
            }
            b'f' | b'F' => {
                let n = luma_core::val::tonumber(&value)
                    .ok_or_else(|| bad_argument(next_arg - 1, "format", "number", &value))?
                    .as_f64();
                format!("{:.*}", precision.unwrap_or(6), n)
            }
            b'e' => {
                let n = luma_core::val::tonumber(&value)
                    .ok_or_else(|| bad_argument(next_arg - 1, "format", "number", &value))?
                    .as_f64();
                format!("{:.*e}", precision.unwrap_or(6), n)
            }
            b'g' | b'G' => {
                let n = luma_core::val::tonumber(&value)
                    .ok_or_else(|| bad_argument(next_arg - 1, "format", "number", &value))?
                    .as_f64();
                format!("{}", n)
            }
            b's' => {
                let mut text = vm.lua_tostring(&value)?;
                if let Some(p) = precision {
                    text.truncate(p);
                }
                text
            }
            b'q' => quote_string(&tostring(&value)),
            other => {
                return Err(RuntimeError::msg(format!(
                    "invalid conversion '%{}' to 'format'",
                    other as char
                )));
            }
        };
        out.push_str(&pad(&rendered, &flags, width));
    }
    Ok(vec![Value::str(out)])
}

#[derive(Default)]
struct Flags {
    minus: bool,
    zero: bool,
    plus: bool,
}

fn parse_spec(spec: &str) -> (Flags, usize) {
    let mut flags = Flags::default();
    let mut width = String::new();
    for (idx, ch) in spec.chars().enumerate() {
        match ch {
            '-' => flags.minus = true,
            '+' => flags.plus = true,
            '0' if width.is_empty() && idx < spec.len() => {
                // A leading zero before digits is the zero-pad flag.
                if width.is_empty() && !spec[idx + 1..].starts_with('.') {
                    flags.zero = true;
                } else {
                    width.push(ch);
                }
            }
            '#' | ' ' => {}
            '.' => break,
            d if d.is_ascii_digit() => width.push(d),
            _ => break,
        }
    }
    (flags, width.parse().unwrap_or(0))
}

fn format_integer(
    value: &Value,
    base: u32,
    upper: bool,
    flags: &Flags,
    precision: Option<usize>,
) -> Result<String, RuntimeError> {
    let n = luma_core::val::tointeger(value)
        .ok_or_else(|| RuntimeError::msg(format!("bad argument to 'format' (number expected, got {})", value.type_name())))?;
    let mut digits = match base {
        16 if upper => format!("{:X}", n),
        16 => format!("{:x}", n),
        8 => format!("{:o}", n),
        _ => n.abs().to_string(),
    };
    if base == 10 {
        if let Some(p) = precision {
            while digits.len() < p {
                digits.insert(0, '0');
            }
        }
        if n < 0 {
            digits.insert(0, '-');
        } else if flags.plus {
            digits.insert(0, '+');
        }
    }
    Ok(digits)
}

fn pad(text: &str, flags: &Flags, width: usize) -> String {
    if text.len() >= width {
        return text.to_string();
    }
    let fill = width - text.len();
    if flags.minus {
        format!("{}{}", text, " ".repeat(fill))
    } else if flags.zero {
        if let Some(rest) = text.strip_prefix('-') {
            format!("-{}{}", "0".repeat(fill), rest)
        } else {
            format!("{}{}", "0".repeat(fill), text)
        }
    } else {
        format!("{}{}", " ".repeat(fill), text)
    }
}

fn quote_string(text: &str) -> String {
    let mut out = String::with_capacity(text.len() + 2);
    out.push('"');
    for ch in text.chars() {
        match ch {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\0' => out.push_str("\\0"),
            c => out.push(c),
        }
    }
    out.push('"');
    out
}

fn capture_value(source: &[u8], capture: &Capture) -> Value {
    match capture {
        Capture::Span(start, end) => Value::str(String::from_utf8_lossy(&source[*start..*end])),
        Capture::Position(pos) => Value::Int(*pos as i64),
    }
}

fn str_find(args: &[Value], _vm: &mut Vm) -> Result<Vec<Value>, RuntimeError> {
    let s = check_str(args, 0, "find")?;
    let pat = check_str(args, 1, "find")?;
    let init = normalize_init(opt_int(args, 2, 1, "find")?, s.len());
    let plain = args.get(3).map(Value::truthy).unwrap_or(false);

    if plain {
        let haystack = &s.as_bytes()[init.min(s.len())..];
        let needle = pat.as_bytes();
        let found = haystack
            .windows(needle.len().max(1))
            .position(|w| w == needle)
            .map(|at| at + init);
        return Ok(match found {
            Some(at) => vec![
                Value::Int(at as i64 + 1),
                Value::Int((at + needle.len()) as i64),
            ],
            None => vec![Value::Nil],
        });
    }

    match pattern::find(s.as_bytes(), pat.as_bytes(), init)? {
        Some(m) => {
            let mut out = vec![Value::Int(m.start as i64 + 1), Value::Int(m.end as i64)];
            for capture in &m.captures {
                out.push(capture_value(s.as_bytes(), capture));
            }
            Ok(out)
        }
        None => Ok(vec![Value::Nil]),
    }
}

fn str_match(args: &[Value], _vm: &mut Vm) -> Result<Vec<Value>, RuntimeError> {
    let s = check_str(args, 0, "match")?;
    let pat = check_str(args, 1, "match")?;
    let init = normalize_init(opt_int(args, 2, 1, "match")?, s.len());
    match pattern::find(s.as_bytes(), pat.as_bytes(), init)? {
        Some(m) => Ok(m
            .effective_captures()
            .iter()
            .map(|c| capture_value(s.as_bytes(), c))
            .collect()),
        None => Ok(vec![Value::Nil]),
    }
}

fn normalize_init(init: i64, len: usize) -> usize {
    if init > 0 {
        (init as usize - 1).min(len)
    } else if init == 0 {
        0
    } else {
        len.saturating_sub((-init) as usize)
    }
}

/// `gmatch` keeps its cursor in the returned iterator closure.
fn str_gmatch(args: &[Value], _vm: &mut Vm) -> Result<Vec<Value>, RuntimeError> {
    let s = check_str(args, 0, "gmatch")?;
    let pat = check_str(args, 1, "gmatch")?;
    let position = Rc::new(RefCell::new(0usize));
    let iter = foreign("string.gmatch", move |_args, _vm| {
        let start = *position.borrow();
        if start > s.len() {
            return Ok(vec![Value::Nil]);
        }
        match pattern::find(s.as_bytes(), pat.as_bytes(), start)? {
            Some(m) => {
                // Always advance, even over empty matches.
                *position.borrow_mut() = if m.end > start { m.end } else { start + 1 };
                Ok(m.effective_captures()
                    .iter()
                    .map(|c| capture_value(s.as_bytes(), c))
                    .collect())
            }
            None => {
                *position.borrow_mut() = s.len() + 1;
                Ok(vec![Value::Nil])
            }
        }
    });
    Ok(vec![iter])
}

/// `gsub(s, pattern, repl, n?)`: replacement may be a string with `%n`
/// back-substitutions, a table keyed by the first capture, or a function.
fn str_gsub(args: &[Value], vm: &mut Vm) -> Result<Vec<Value>, RuntimeError> {
    let s = check_str(args, 0, "gsub")?;
    let pat = check_str(args, 1, "gsub")?;
    let repl = arg(args, 2);
    let max = match args.get(3) {
        None | Some(Value::Nil) => i64::MAX,
        Some(_) => check_int(args, 3, "gsub")?,
    };

    let source = s.as_bytes();
    let mut out: Vec<u8> = Vec::with_capacity(source.len());
    let mut cursor = 0usize;
    let mut count = 0i64;

    while cursor <= source.len() && count < max {
        let Some(m) = pattern::find(source, pat.as_bytes(), cursor)? else {
            break;
        };
        out.extend_from_slice(&source[cursor..m.start]);
        let whole = Value::str(String::from_utf8_lossy(&source[m.start..m.end]));
        let captures = m.effective_captures();

        let replacement = match &repl {
            Value::Str(template) => {
                expand_template(template.as_bytes(), source, &m.start, &m.end, &captures)?
            }
            Value::Table(t) => {
                let key = capture_value(source, &captures[0]);
                let value = t.borrow().raw_get(&key);
                replacement_text(&value, &whole)?
            }
            callable @ (Value::Closure(_) | Value::Foreign(_)) => {
                let call_args: Vec<Value> =
                    captures.iter().map(|c| capture_value(source, c)).collect();
                let results = vm.call_function(callable, call_args)?;
                replacement_text(results.first().unwrap_or(&Value::Nil), &whole)?
            }
            other => {
                return Err(bad_argument(3, "gsub", "string/function/table", other));
            }
        };
        out.extend_from_slice(replacement.as_bytes());
        count += 1;
        cursor = if m.end > cursor { m.end } else {
            if cursor < source.len() {
                out.push(source[cursor]);
            }
            cursor + 1
        };
    }
    if cursor <= source.len() {
        out.extend_from_slice(&source[cursor.min(source.len())..]);
    }
    Ok(vec![
        Value::str(String::from_utf8_lossy(&out)),
        Value::Int(count),
    ])
}

fn replacement_text(value: &Value, whole: &Value) -> Result<String, RuntimeError> {
    match value {
        Value::Nil | Value::Bool(false) => Ok(tostring(whole)),
        Value::Str(s) => Ok(s.to_string()),
        Value::Int(_) | Value::Float(_) => Ok(tostring(value)),
        other => Err(RuntimeError::msg(format!(
            "invalid replacement value (a {})",
            other.type_name()
        ))),
    }
}

/// `%0` is the whole match; `%1`..`%9` are captures; `%%` is a literal.
fn expand_template(
    template: &[u8],
    source: &[u8],
    start: &usize,
    end: &usize,
    captures: &[Capture],
) -> Result<String, RuntimeError> {
    let mut out = String::new();
    let mut i = 0;
    while i < template.len() {
        if template[i] == b'%' && i + 1 < template.len() {
            let next = template[i + 1];
            if next == b'%' {
                out.push('%');
            } else if next.is_ascii_digit() {
                let index = (next - b'0') as usize;
                if index == 0 {
                    out.push_str(&String::from_utf8_lossy(&source[*start..*end]));
                } else {
                    let capture = captures.get(index - 1).ok_or_else(|| {
                        RuntimeError::msg(format!("invalid capture index %{} in replacement", index))
                    })?;
                    match capture_value(source, capture) {
                        Value::Str(s) => out.push_str(&s),
                        other => out.push_str(&tostring(&other)),
                    }
                }
            } else {
                out.push(next as char);
            }
            i += 2;
        } else {
            out.push(template[i] as char);
            i += 1;
        }
    }
    Ok(out)
}
