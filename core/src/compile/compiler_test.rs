use super::compile;
use crate::vm::Op;

fn compile_err(src: &str) -> String {
    compile(src, "test.lua").unwrap_err().to_string()
}

#[test]
fn test_goto_into_local_scope_rejected() {
    let err = compile_err("goto skip local x = 1 ::skip:: return x");
    assert!(err.contains("skip"), "got {}", err);
    assert!(err.contains("jumps into the scope"), "got {}", err);
}

#[test]
fn test_goto_without_label_rejected() {
    let err = compile_err("goto nowhere");
    assert!(err.contains("no visible label 'nowhere'"), "got {}", err);
}

#[test]
fn test_goto_cannot_enter_nested_block() {
    let err = compile_err("goto inside do ::inside:: end");
    assert!(err.contains("no visible label"), "got {}", err);
}

#[test]
fn test_duplicate_label_in_block_rejected() {
    let err = compile_err("::twice:: ::twice::");
    assert!(err.contains("already defined"), "got {}", err);
}

#[test]
fn test_goto_out_of_nested_block_allowed() {
    assert!(compile("do do goto out end end ::out::", "test.lua").is_ok());
}

#[test]
fn test_break_outside_loop_rejected() {
    let err = compile_err("break");
    assert!(err.contains("break outside a loop"), "got {}", err);
}

#[test]
fn test_vararg_outside_vararg_function_rejected() {
    let err = compile_err("local f = function(a) return ... end");
    assert!(err.contains("outside a vararg function"), "got {}", err);
}

#[test]
fn test_error_positions_are_reported() {
    let err = compile("local x =\n= 2", "chunk.lua").unwrap_err();
    assert_eq!(err.file, "chunk.lua");
    assert_eq!(err.line, 2);
}

#[test]
fn test_division_lowered_with_float_coercion() {
    let program = compile("return 1 / 2", "test.lua").expect("compile");
    let has_div = program.code.iter().any(|i| matches!(i.op, Op::Div(..)));
    let has_mul = program.code.iter().any(|i| matches!(i.op, Op::Mul(..)));
    assert!(has_div && has_mul, "DIV should be preceded by a float coercion");
}

#[test]
fn test_short_circuit_compiles_to_branches() {
    // `and`/`or` lower to branches; the boolean-coercing AND/OR opcodes are
    // reserved for raw bytecode.
    let program = compile("return a and b or c", "test.lua").expect("compile");
    assert!(!program.code.iter().any(|i| matches!(i.op, Op::And(..) | Op::Or(..))));
    assert!(program.code.iter().any(|i| matches!(i.op, Op::Jz(..))));
    assert!(program.code.iter().any(|i| matches!(i.op, Op::Jnz(..))));
}

#[test]
fn test_captured_local_gets_cell_storage() {
    let program = compile(
        "local x = 0 local f = function() x = 1 end",
        "test.lua",
    )
    .expect("compile");
    assert!(program.code.iter().any(|i| matches!(i.op, Op::MakeCell(..))));
    assert!(program.code.iter().any(|i| matches!(i.op, Op::Closure(..))));
    assert!(program.code.iter().any(|i| matches!(i.op, Op::BindUpvalue(..))));
}

#[test]
fn test_uncaptured_local_stays_in_register() {
    let program = compile("local x = 0 return x + 1", "test.lua").expect("compile");
    assert!(!program.code.iter().any(|i| matches!(i.op, Op::MakeCell(..))));
}

#[test]
fn test_debug_info_carries_lines() {
    let program = compile("local a = 1\nlocal b = 2\nreturn a + b", "test.lua").expect("compile");
    let lines: Vec<u32> = program
        .code
        .iter()
        .filter_map(|i| i.debug.as_ref().map(|d| d.line))
        .collect();
    assert!(lines.contains(&1));
    assert!(lines.contains(&2));
    assert!(lines.contains(&3));
}

#[test]
fn test_entry_chunk_is_registered() {
    let program = compile("return 1", "test.lua").expect("compile");
    let entry = program.entry.clone().expect("entry label");
    assert!(program.labels.contains_key(&entry));
    let meta = &program.functions[&entry];
    assert!(meta.is_vararg);
    assert_eq!(meta.name.as_ref(), "main chunk");
}

#[test]
fn test_anonymous_functions_get_line_names() {
    let program = compile("local f = function() end", "test.lua").expect("compile");
    assert!(program
        .functions
        .values()
        .any(|meta| meta.name.starts_with("<anonymous:")));
}

#[test]
fn test_method_definition_compiles_table_store() {
    let program = compile("local t = {} function t:m() end", "test.lua").expect("compile");
    assert!(program.code.iter().any(|i| matches!(i.op, Op::TableSet(..))));
}
