//! Direct bytecode tests over the raw instruction set, with no Lua
//! front-end involved.

use std::collections::HashMap;

use super::*;
use crate::vm::Instruction;

fn program(ops: Vec<Op>) -> Program {
    let code = ops.into_iter().map(Instruction::new).collect();
    Program::link(code, Vec::new(), HashMap::new(), None, "asm").expect("link")
}

fn run_ops(ops: Vec<Op>) -> RunOutput {
    let mut vm = Vm::new(program(ops));
    vm.run(RunOptions::default()).expect("run")
}

fn r(name: &str) -> String {
    name.to_string()
}

#[test]
fn test_arithmetic_group() {
    let out = run_ops(vec![
        Op::LoadImm(r("a"), 10),
        Op::LoadImm(r("b"), 3),
        Op::Add(r("c"), r("a"), r("b")),
        Op::Sub(r("d"), r("a"), r("b")),
        Op::Mul(r("e"), r("a"), r("b")),
        Op::Div(r("f"), r("a"), r("b")),
        Op::Mod(r("g"), r("a"), r("b")),
        Op::Neg(r("h"), r("b")),
        Op::Print(r("c")),
        Op::Print(r("d")),
        Op::Print(r("e")),
        Op::Print(r("f")),
        Op::Print(r("g")),
        Op::Print(r("h")),
        Op::Halt,
    ]);
    let expected = [13, 7, 30, 3, 1, -3];
    assert_eq!(out.output.len(), expected.len());
    for (value, want) in out.output.iter().zip(expected) {
        assert_eq!(value, &Value::Int(want));
    }
}

#[test]
fn test_div_floors_integer_pairs() {
    let out = run_ops(vec![
        Op::LoadImm(r("a"), -7),
        Op::LoadImm(r("b"), 2),
        Op::Div(r("q"), r("a"), r("b")),
        Op::Print(r("q")),
        Op::Halt,
    ]);
    assert_eq!(out.output[0], Value::Int(-4));
}

#[test]
fn test_bitwise_group() {
    let out = run_ops(vec![
        Op::LoadImm(r("a"), 6),
        Op::LoadImm(r("b"), 3),
        Op::AndBit(r("r1"), r("a"), r("b")),
        Op::OrBit(r("r2"), r("a"), r("b")),
        Op::Xor(r("r3"), r("a"), r("b")),
        Op::NotBit(r("r4"), r("a")),
        Op::Shl(r("r5"), r("a"), r("b")),
        Op::Shr(r("r6"), r("a"), r("b")),
        Op::Sar(r("r7"), r("a"), r("b")),
        Op::Print(r("r1")),
        Op::Print(r("r2")),
        Op::Print(r("r3")),
        Op::Print(r("r4")),
        Op::Print(r("r5")),
        Op::Print(r("r6")),
        Op::Print(r("r7")),
        Op::Halt,
    ]);
    let expected = [2, 7, 5, -7, 48, 0, 0];
    for (value, want) in out.output.iter().zip(expected) {
        assert_eq!(value, &Value::Int(want));
    }
}

#[test]
fn test_shr_masks_to_32_bits() {
    let out = run_ops(vec![
        Op::LoadImm(r("a"), -1),
        Op::LoadImm(r("b"), 4),
        Op::Shr(r("q"), r("a"), r("b")),
        Op::Print(r("q")),
        Op::Halt,
    ]);
    // -1 masked to 32 bits is 0xFFFFFFFF; >> 4 gives 0x0FFFFFFF.
    assert_eq!(out.output[0], Value::Int(0x0FFF_FFFF));
}

#[test]
fn test_jumps_and_labels() {
    let out = run_ops(vec![
        Op::LoadImm(r("i"), 0),
        Op::LoadImm(r("one"), 1),
        Op::LoadImm(r("limit"), 3),
        Op::Label(std::rc::Rc::from("loop")),
        Op::Eq(r("done"), r("i"), r("limit")),
        Op::Jnz(r("done"), std::rc::Rc::from("exit")),
        Op::Add(r("i"), r("i"), r("one")),
        Op::Jmp(std::rc::Rc::from("loop")),
        Op::Label(std::rc::Rc::from("exit")),
        Op::Print(r("i")),
        Op::Halt,
    ]);
    assert_eq!(out.output[0], Value::Int(3));
}

#[test]
fn test_cmp_imm_ordering() {
    let out = run_ops(vec![
        Op::LoadImm(r("a"), 5),
        Op::CmpImm(r("lo"), r("a"), 9),
        Op::CmpImm(r("eq"), r("a"), 5),
        Op::CmpImm(r("hi"), r("a"), 2),
        Op::Print(r("lo")),
        Op::Print(r("eq")),
        Op::Print(r("hi")),
        Op::Halt,
    ]);
    assert_eq!(out.output, vec![Value::Int(-1), Value::Int(0), Value::Int(1)]);
}

#[test]
fn test_jmp_rel() {
    let out = run_ops(vec![
        Op::LoadImm(r("a"), 1),
        Op::JmpRel(2),
        Op::LoadImm(r("a"), 99),
        Op::Print(r("a")),
        Op::Halt,
    ]);
    assert_eq!(out.output[0], Value::Int(1));
}

#[test]
fn test_stack_push_pop() {
    let out = run_ops(vec![
        Op::LoadImm(r("a"), 1),
        Op::LoadImm(r("b"), 2),
        Op::Push(r("a")),
        Op::Push(r("b")),
        Op::Pop(r("x")),
        Op::Pop(r("y")),
        Op::Print(r("x")),
        Op::Print(r("y")),
        Op::Halt,
    ]);
    assert_eq!(out.output, vec![Value::Int(2), Value::Int(1)]);
}

#[test]
fn test_clr_sets_zero_not_nil() {
    let out = run_ops(vec![Op::Clr(r("a")), Op::Print(r("a")), Op::Halt]);
    assert_eq!(out.output[0], Value::Int(0));
}

#[test]
fn test_coalesce_and_predicates() {
    let out = run_ops(vec![
        Op::LoadImm(r("x"), 5),
        Op::Coalesce(r("a"), r("nilreg"), r("x")),
        Op::IsNull(r("b"), r("nilreg")),
        Op::TableNew(r("t")),
        Op::IsObj(r("c"), r("t")),
        Op::TableAppend(r("t"), r("x")),
        Op::IsArr(r("d"), r("t")),
        Op::Print(r("a")),
        Op::Print(r("b")),
        Op::Print(r("c")),
        Op::Print(r("d")),
        Op::Halt,
    ]);
    assert_eq!(
        out.output,
        vec![
            Value::Int(5),
            Value::Bool(true),
            Value::Bool(true),
            Value::Bool(true),
        ]
    );
}

#[test]
fn test_array_group() {
    let out = run_ops(vec![
        Op::ArrInit(r("a"), 4),
        Op::LoadImm(r("i0"), 0),
        Op::LoadImm(r("i1"), 1),
        Op::LoadImm(r("v1"), 10),
        Op::LoadImm(r("v2"), 20),
        Op::ArrSet(r("a"), r("i0"), r("v1")),
        Op::ArrSet(r("a"), r("i1"), r("v2")),
        Op::ArrGet(r("x"), r("a"), r("i1")),
        Op::LoadImm(r("len"), 2),
        Op::ArrCopy(r("b"), r("a"), r("i0"), r("len")),
        Op::Len(r("n"), r("b")),
        Op::Print(r("x")),
        Op::Print(r("n")),
        Op::Halt,
    ]);
    assert_eq!(out.output, vec![Value::Int(20), Value::Int(2)]);
}

#[test]
fn test_table_group() {
    let out = run_ops(vec![
        Op::TableNew(r("t")),
        Op::LoadImm(r("k"), 1),
        Op::LoadImm(r("v"), 42),
        Op::TableSet(r("t"), r("k"), r("v")),
        Op::TableGet(r("x"), r("t"), r("k")),
        Op::Len(r("n"), r("t")),
        Op::Print(r("x")),
        Op::Print(r("n")),
        Op::Halt,
    ]);
    assert_eq!(out.output, vec![Value::Int(42), Value::Int(1)]);
}

#[test]
fn test_call_arg_result_protocol() {
    let out = run_ops(vec![
        Op::LoadImm(r("x"), 20),
        Op::LoadImm(r("y"), 22),
        Op::Param(r("x")),
        Op::Param(r("y")),
        Op::Call(std::rc::Rc::from("add2")),
        Op::Result(r("sum")),
        Op::Print(r("sum")),
        Op::Halt,
        Op::Label(std::rc::Rc::from("add2")),
        Op::Arg(r("a")),
        Op::Arg(r("b")),
        Op::Add(r("c"), r("a"), r("b")),
        Op::Return(Some(r("c"))),
    ]);
    assert_eq!(out.output, vec![Value::Int(42)]);
}

#[test]
fn test_duplicate_label_rejected() {
    let code = vec![
        Instruction::new(Op::Label(std::rc::Rc::from("x"))),
        Instruction::new(Op::Label(std::rc::Rc::from("x"))),
    ];
    let err = Program::link(code, Vec::new(), HashMap::new(), None, "asm").unwrap_err();
    assert!(err.to_string().contains("duplicate label"));
}

#[test]
fn test_undefined_jump_target_rejected() {
    let code = vec![Instruction::new(Op::Jmp(std::rc::Rc::from("nowhere")))];
    let err = Program::link(code, Vec::new(), HashMap::new(), None, "asm").unwrap_err();
    assert!(err.to_string().contains("undefined label"));
}
