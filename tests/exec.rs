//! End-to-end execution: variables, arithmetic fast paths, loops, calls.

mod common;

use common::{as_str, run};
use quill_vm::consts::INTEGER_NUMBER_MAX;
use quill_vm::prelude::*;

// var x = 1; x + 2
#[test]
fn var_and_addition() {
    let mut b = CodeUnitBuilder::new(0, 0);
    let x = b.ident("x");

    let mut asm = Asm::new();
    asm.op(Opcode::CreateVarBinding).lit(x);
    asm.op(Opcode::PushPosByte).byte(1);
    asm.op(Opcode::InitBinding).lit(x);
    asm.op(Opcode::PushLiteral).lit(x);
    asm.op(Opcode::PushPosByte).byte(2);
    asm.op(Opcode::Add);
    asm.op(Opcode::PopBlock);
    asm.op(Opcode::ReturnWithBlock);

    assert_eq!(run(b.finish(asm.finish())).unwrap(), Value::Int(3));
}

// var n = 0; for (var i = 0; i < 5; i++) n += i; n
#[test]
fn for_loop_accumulates() {
    let mut b = CodeUnitBuilder::new(0, 0);
    let n = b.ident("n");
    let i = b.ident("i");

    let mut asm = Asm::new();
    asm.op(Opcode::CreateVarBinding).lit(n);
    asm.op(Opcode::PushZero);
    asm.op(Opcode::InitBinding).lit(n);
    asm.op(Opcode::CreateVarBinding).lit(i);
    asm.op(Opcode::PushZero);
    asm.op(Opcode::InitBinding).lit(i);

    let end = asm.label();
    let cond = asm.here();
    asm.op(Opcode::PushLiteral).lit(i);
    asm.op(Opcode::PushPosByte).byte(5);
    asm.op(Opcode::Less);
    asm.branch(Opcode::BranchIfFalseForward, end);

    asm.op(Opcode::IdentReference).lit(n);
    asm.op(Opcode::PushLiteral).lit(i);
    asm.op(Opcode::Add);
    asm.op(Opcode::Assign);

    asm.op(Opcode::IdentReference).lit(i);
    asm.op(Opcode::PostIncr);
    asm.branch(Opcode::JumpBackward, cond);
    asm.bind(end);

    asm.op(Opcode::PushLiteral).lit(n);
    asm.op(Opcode::PopBlock);
    asm.op(Opcode::ReturnWithBlock);

    assert_eq!(run(b.finish(asm.finish())).unwrap(), Value::Int(10));
}

// var i = 0; do { i++ } while (i < 3); i  — exercises the fused
// less-then-backward-branch step.
#[test]
fn do_while_with_fused_comparison() {
    let mut b = CodeUnitBuilder::new(0, 0);
    let i = b.ident("i");

    let mut asm = Asm::new();
    asm.op(Opcode::CreateVarBinding).lit(i);
    asm.op(Opcode::PushZero);
    asm.op(Opcode::InitBinding).lit(i);

    let body = asm.here();
    asm.op(Opcode::IdentReference).lit(i);
    asm.op(Opcode::PostIncr);
    asm.op(Opcode::PushLiteral).lit(i);
    asm.op(Opcode::PushPosByte).byte(3);
    asm.op(Opcode::Less);
    asm.branch(Opcode::BranchIfTrueBackward, body);

    asm.op(Opcode::PushLiteral).lit(i);
    asm.op(Opcode::PopBlock);
    asm.op(Opcode::ReturnWithBlock);

    assert_eq!(run(b.finish(asm.finish())).unwrap(), Value::Int(3));
}

// typeof missing
#[test]
fn typeof_unresolved_name_is_undefined_string() {
    let mut b = CodeUnitBuilder::new(0, 0);
    let missing = b.ident("missing");

    let mut asm = Asm::new();
    asm.op(Opcode::TypeofIdent).lit(missing);
    asm.op(Opcode::PopBlock);
    asm.op(Opcode::ReturnWithBlock);

    let result = run(b.finish(asm.finish())).unwrap();
    assert_eq!(as_str(&result), "undefined");
}

// true || missing — the right-hand side would raise ReferenceError if
// evaluated.
#[test]
fn logical_or_short_circuits() {
    let mut b = CodeUnitBuilder::new(0, 0);
    let missing = b.ident("missing");

    let mut asm = Asm::new();
    let done = asm.label();
    asm.op(Opcode::PushTrue);
    asm.branch(Opcode::BranchIfLogicalTrue, done);
    asm.op(Opcode::PushLiteral).lit(missing);
    asm.bind(done);
    asm.op(Opcode::PopBlock);
    asm.op(Opcode::ReturnWithBlock);

    assert_eq!(run(b.finish(asm.finish())).unwrap(), Value::Bool(true));
}

// Tagged-integer overflow promotes to a boxed float.
#[test]
fn integer_overflow_promotes_to_float() {
    let mut b = CodeUnitBuilder::new(0, 0);
    let max = b.number(INTEGER_NUMBER_MAX as f64);

    let mut asm = Asm::new();
    asm.op(Opcode::PushLiteral).lit(max);
    asm.op(Opcode::PushPosByte).byte(1);
    asm.op(Opcode::Add);
    asm.op(Opcode::PopBlock);
    asm.op(Opcode::ReturnWithBlock);

    assert_eq!(
        run(b.finish(asm.finish())).unwrap(),
        Value::Float((INTEGER_NUMBER_MAX as f64) + 1.0)
    );
}

// "a" + 1
#[test]
fn addition_concatenates_strings() {
    let mut b = CodeUnitBuilder::new(0, 0);
    let a = b.string("a");

    let mut asm = Asm::new();
    asm.op(Opcode::PushLiteral).lit(a);
    asm.op(Opcode::PushPosByte).byte(1);
    asm.op(Opcode::Add);
    asm.op(Opcode::PopBlock);
    asm.op(Opcode::ReturnWithBlock);

    let result = run(b.finish(asm.finish())).unwrap();
    assert_eq!(as_str(&result), "a1");
}

// switch (2) { case 1: 10; break; case 2: 20; break; default: 30 }
#[test]
fn switch_dispatch_through_strict_equal_branches() {
    let mut b = CodeUnitBuilder::new(0, 0);

    let mut asm = Asm::new();
    let case1 = asm.label();
    let case2 = asm.label();
    let end = asm.label();

    asm.op(Opcode::PushPosByte).byte(2);
    asm.op(Opcode::PushPosByte).byte(1);
    asm.branch(Opcode::BranchIfStrictEqual, case1);
    asm.op(Opcode::PushPosByte).byte(2);
    asm.branch(Opcode::BranchIfStrictEqual, case2);
    asm.op(Opcode::Pop);
    asm.op(Opcode::PushPosByte).byte(30);
    asm.op(Opcode::PopBlock);
    asm.branch(Opcode::JumpForward, end);

    asm.bind(case1);
    asm.op(Opcode::PushPosByte).byte(10);
    asm.op(Opcode::PopBlock);
    asm.branch(Opcode::JumpForward, end);

    asm.bind(case2);
    asm.op(Opcode::PushPosByte).byte(20);
    asm.op(Opcode::PopBlock);
    asm.branch(Opcode::JumpForward, end);

    asm.bind(end);
    asm.op(Opcode::ReturnWithBlock);

    assert_eq!(run(b.finish(asm.finish())).unwrap(), Value::Int(20));
}

// function f(a, ...rest) { return rest.length + a }  f(7, 1, 2, 3)
#[test]
fn rest_parameter_collects_surplus_arguments() {
    let mut fb = CodeUnitBuilder::new(2, 2);
    let length = fb.string("length");
    let mut fasm = Asm::new();
    fasm.op(Opcode::PushLiteral).lit(1);
    fasm.op(Opcode::PushLiteral).lit(length);
    fasm.op(Opcode::PropGet);
    fasm.op(Opcode::PushLiteral).lit(0);
    fasm.op(Opcode::Add);
    fasm.op(Opcode::Return);
    let f = fb
        .flags(CodeFlags::IS_FUNCTION | CodeFlags::REST_PARAMETER)
        .finish(fasm.finish());

    let mut b = CodeUnitBuilder::new(0, 0);
    let f_lit = b.function(f);

    let mut asm = Asm::new();
    asm.op(Opcode::PushLiteral).lit(f_lit);
    asm.op(Opcode::PushPosByte).byte(7);
    asm.op(Opcode::PushPosByte).byte(1);
    asm.op(Opcode::PushPosByte).byte(2);
    asm.op(Opcode::PushPosByte).byte(3);
    asm.op(Opcode::CallNBlock).byte(4);
    asm.op(Opcode::ReturnWithBlock);

    assert_eq!(run(b.finish(asm.finish())).unwrap(), Value::Int(10));
}

// f(...[1, 2, 3]) — spread arguments materialize one collection.
#[test]
fn spread_call_expands_an_iterable() {
    // function f(a, b, c) { return a * 100 + b * 10 + c }
    let mut fb = CodeUnitBuilder::new(3, 3);
    let mut fasm = Asm::new();
    fasm.op(Opcode::PushLiteral).lit(0);
    fasm.op(Opcode::PushPosByte).byte(100);
    fasm.op(Opcode::Mul);
    fasm.op(Opcode::PushLiteral).lit(1);
    fasm.op(Opcode::PushPosByte).byte(10);
    fasm.op(Opcode::Mul);
    fasm.op(Opcode::Add);
    fasm.op(Opcode::PushLiteral).lit(2);
    fasm.op(Opcode::Add);
    fasm.op(Opcode::Return);
    let f = fb.flags(CodeFlags::IS_FUNCTION).finish(fasm.finish());

    let mut b = CodeUnitBuilder::new(0, 0);
    let arr = b.ident("arr");
    let f_lit = b.function(f);

    let mut asm = Asm::new();
    // arr = [1, 2, 3]
    asm.op(Opcode::CreateVarBinding).lit(arr);
    asm.op(Opcode::PushArray);
    asm.op(Opcode::PushPosByte).byte(1);
    asm.op(Opcode::PushPosByte).byte(2);
    asm.op(Opcode::PushPosByte).byte(3);
    asm.op(Opcode::AppendArray).byte(3);
    asm.op(Opcode::InitBinding).lit(arr);

    // f(...arr)
    asm.op(Opcode::PushLiteral).lit(f_lit);
    asm.ext(ExtOpcode::PushSpreadElement);
    asm.op(Opcode::PushLiteral).lit(arr);
    asm.ext(ExtOpcode::SpreadArguments).byte(2);
    asm.ext(ExtOpcode::SpreadCall);
    asm.op(Opcode::PopBlock);
    asm.op(Opcode::ReturnWithBlock);

    assert_eq!(run(b.finish(asm.finish())).unwrap(), Value::Int(123));
}

// Unresolved identifier reads raise ReferenceError.
#[test]
fn unresolved_read_raises_reference_error() {
    let mut b = CodeUnitBuilder::new(0, 0);
    let missing = b.ident("missing");

    let mut asm = Asm::new();
    asm.op(Opcode::PushLiteral).lit(missing);
    asm.op(Opcode::PopBlock);
    asm.op(Opcode::ReturnWithBlock);

    let mut vm = Interpreter::new();
    let err = common::run_in(&mut vm, b.finish(asm.finish())).unwrap_err();
    assert_eq!(
        common::uncaught_kind(&vm, &err),
        Some(ErrorKind::Reference)
    );
}

// run_eval / run_module entry points share the executor.
#[test]
fn eval_and_module_entry_points() {
    use std::rc::Rc;

    let mut vm = Interpreter::new();

    // Indirect eval with a lexical-block wrapper: let-style binding stays
    // out of the global scope.
    let mut b = CodeUnitBuilder::new(0, 0);
    let t = b.ident("t");
    let mut asm = Asm::new();
    asm.op(Opcode::CreateLetBinding).lit(t);
    asm.op(Opcode::PushPosByte).byte(4);
    asm.op(Opcode::AssignLetConst).lit(t);
    asm.op(Opcode::PushLiteral).lit(t);
    asm.op(Opcode::PushPosByte).byte(1);
    asm.op(Opcode::Add);
    asm.op(Opcode::PopBlock);
    asm.op(Opcode::ReturnWithBlock);
    let unit = b.flags(CodeFlags::LEXICAL_BLOCK).finish(asm.finish());
    assert_eq!(
        vm.run_eval(Rc::new(unit), Value::Undefined, None).unwrap(),
        Value::Int(5)
    );
    // The eval-scoped binding did not leak onto the global object.
    let leak = vm
        .heap()
        .get(vm.global_object())
        .own_property(&PropertyKey::from_str_key("t"))
        .is_some();
    assert!(!leak);

    // Module top-level: vars land in the module environment.
    let mut b = CodeUnitBuilder::new(0, 0);
    let x = b.ident("x");
    let mut asm = Asm::new();
    asm.op(Opcode::CreateVarBinding).lit(x);
    asm.op(Opcode::PushPosByte).byte(9);
    asm.op(Opcode::InitBinding).lit(x);
    asm.op(Opcode::PushLiteral).lit(x);
    asm.op(Opcode::PopBlock);
    asm.op(Opcode::ReturnWithBlock);
    let unit = b.flags(CodeFlags::MODULE).finish(asm.finish());
    assert_eq!(vm.run_module(Rc::new(unit), None).unwrap(), Value::Int(9));
}

// Modulo of a negative dividend with zero remainder is -0.0 (boxed).
#[test]
fn negative_zero_modulo_stays_boxed() {
    let mut b = CodeUnitBuilder::new(0, 0);
    let minus_four = b.number(-4.0);

    let mut asm = Asm::new();
    asm.op(Opcode::PushLiteral).lit(minus_four);
    asm.op(Opcode::PushPosByte).byte(2);
    asm.op(Opcode::Mod);
    asm.op(Opcode::PopBlock);
    asm.op(Opcode::ReturnWithBlock);

    let result = run(b.finish(asm.finish())).unwrap();
    assert!(matches!(result, Value::Float(f) if f == 0.0 && f.is_sign_negative()));
}
