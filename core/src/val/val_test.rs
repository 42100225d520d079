use super::*;

#[test]
fn test_truthiness() {
    assert!(!Value::Nil.truthy());
    assert!(!Value::Bool(false).truthy());
    assert!(Value::Bool(true).truthy());
    assert!(Value::Int(0).truthy());
    assert!(Value::str("").truthy());
}

#[test]
fn test_scalar_equality_crosses_int_float() {
    assert_eq!(Value::Int(1), Value::Float(1.0));
    assert_ne!(Value::Int(1), Value::Float(1.5));
    assert_eq!(Value::str("a"), Value::str("a"));
    assert_ne!(Value::Nil, Value::Bool(false));
}

#[test]
fn test_handle_equality_is_identity() {
    let t1 = Value::table(LuaTable::new());
    let t2 = Value::table(LuaTable::new());
    assert_eq!(t1, t1.clone());
    assert_ne!(t1, t2);

    let cell = Value::Cell(Value::new_cell(Value::Int(1)));
    assert_eq!(cell, cell.clone());
}

#[test]
fn test_table_array_and_hash() {
    let mut t = LuaTable::new();
    t.push(Value::Int(10));
    t.push(Value::Int(20));
    t.raw_set(Value::str("k"), Value::str("v")).unwrap();
    assert_eq!(t.lua_len(), 2);
    assert_eq!(t.raw_get(&Value::Int(1)), Value::Int(10));
    assert_eq!(t.raw_get(&Value::str("k")), Value::str("v"));
    assert_eq!(t.raw_get(&Value::Int(3)), Value::Nil);
}

#[test]
fn test_table_set_nil_removes() {
    let mut t = LuaTable::new();
    t.raw_set(Value::str("k"), Value::Int(1)).unwrap();
    t.raw_set(Value::str("k"), Value::Nil).unwrap();
    assert_eq!(t.raw_get(&Value::str("k")), Value::Nil);
    assert_eq!(t.hash_len(), 0);
}

#[test]
fn test_table_border_after_tail_removal() {
    let mut t = LuaTable::new();
    for i in 1..=3 {
        t.push(Value::Int(i));
    }
    t.raw_set(Value::Int(3), Value::Nil).unwrap();
    assert_eq!(t.lua_len(), 2);
}

#[test]
fn test_table_rejects_nil_and_nan_keys() {
    let mut t = LuaTable::new();
    assert!(t.raw_set(Value::Nil, Value::Int(1)).is_err());
    assert!(t.raw_set(Value::Float(f64::NAN), Value::Int(1)).is_err());
}

#[test]
fn test_integral_float_key_aliases_int() {
    let mut t = LuaTable::new();
    t.raw_set(Value::Float(2.0), Value::str("x")).unwrap();
    // 2.0 lands outside the (empty) array part, so it lives in the hash part
    // under the normalized Int(2) key.
    assert_eq!(t.raw_get(&Value::Int(2)), Value::str("x"));
}

#[test]
fn test_append_migrates_hash_keys() {
    let mut t = LuaTable::new();
    t.raw_set(Value::Int(2), Value::str("b")).unwrap();
    assert_eq!(t.lua_len(), 0);
    t.push(Value::str("a"));
    assert_eq!(t.lua_len(), 2);
    assert_eq!(t.raw_get(&Value::Int(2)), Value::str("b"));
}

#[test]
fn test_next_entry_iterates_all() {
    let mut t = LuaTable::new();
    t.push(Value::Int(10));
    t.push(Value::Int(20));
    t.raw_set(Value::str("a"), Value::Int(1)).unwrap();
    t.raw_set(Value::str("b"), Value::Int(2)).unwrap();

    let mut seen = Vec::new();
    let mut key: Option<Value> = None;
    while let Some((k, v)) = t.next_entry(key.as_ref()) {
        seen.push((k.clone(), v));
        key = Some(k);
    }
    assert_eq!(seen.len(), 4);
    assert_eq!(seen[0].0, Value::Int(1));
    assert_eq!(seen[1].0, Value::Int(2));
    assert_eq!(seen[2].0, Value::str("a"));
    assert_eq!(seen[3].0, Value::str("b"));
}

#[test]
fn test_readonly_table_rejects_writes() {
    let mut t = LuaTable::new();
    t.raw_set(Value::str("k"), Value::Int(1)).unwrap();
    t.set_readonly(true);
    assert!(t.raw_set(Value::str("k"), Value::Int(2)).is_err());
    assert_eq!(t.raw_get(&Value::str("k")), Value::Int(1));
}

#[test]
fn test_deep_copy_is_independent() {
    let mut inner = LuaTable::new();
    inner.push(Value::Int(1));
    let original = Value::table(inner);
    let copy = original.deep_copy();
    if let (Value::Table(a), Value::Table(b)) = (&original, &copy) {
        b.borrow_mut().push(Value::Int(2));
        assert_eq!(a.borrow().lua_len(), 1);
        assert_eq!(b.borrow().lua_len(), 2);
    } else {
        panic!("expected tables");
    }
}

#[test]
fn test_tostring_rendering() {
    assert_eq!(tostring(&Value::Int(3)), "3");
    assert_eq!(tostring(&Value::Float(3.0)), "3.0");
    assert_eq!(tostring(&Value::Nil), "nil");
    assert!(tostring(&Value::table(LuaTable::new())).starts_with("table: 0x"));
}
