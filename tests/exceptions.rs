//! Try/catch/finally semantics, deferred continuations, aborts.

mod common;

use common::{as_str, run, run_in, uncaught_kind};
use quill_vm::prelude::*;

// try { throw 42 } catch (e) { e + 1 } finally { "done" }
#[test]
fn catch_then_finally_runs_once() {
    let mut b = CodeUnitBuilder::new(0, 0);
    let done = b.string("done");

    let mut asm = Asm::new();
    let handler = asm.label();
    let finally = asm.label();
    let end = asm.label();

    asm.branch(Opcode::TryCreateContext, handler);
    asm.op(Opcode::PushPosByte).byte(42);
    asm.op(Opcode::Throw);

    asm.bind(handler);
    asm.branch(Opcode::Catch, finally);
    // catch body; the unwinder pushed the exception
    asm.op(Opcode::PushPosByte).byte(1);
    asm.op(Opcode::Add);
    asm.op(Opcode::PopBlock);

    asm.bind(finally);
    asm.branch(Opcode::Finally, end);
    asm.op(Opcode::PushLiteral).lit(done);
    asm.op(Opcode::Pop);
    asm.op(Opcode::ContextEnd);

    asm.bind(end);
    asm.op(Opcode::ReturnWithBlock);

    assert_eq!(run(b.finish(asm.finish())).unwrap(), Value::Int(43));
}

// function f() { try { return 1 } finally { return 2 } }  f()
#[test]
fn finally_return_overrides_try_return() {
    let mut fb = CodeUnitBuilder::new(0, 0);
    let mut fasm = Asm::new();
    let finally = fasm.label();
    let end = fasm.label();

    fasm.branch(Opcode::TryCreateContext, finally);
    fasm.op(Opcode::PushPosByte).byte(1);
    fasm.op(Opcode::Return);

    fasm.bind(finally);
    fasm.branch(Opcode::Finally, end);
    fasm.op(Opcode::PushPosByte).byte(2);
    fasm.op(Opcode::Return);
    fasm.op(Opcode::ContextEnd);

    fasm.bind(end);
    fasm.op(Opcode::PushUndefined);
    fasm.op(Opcode::Return);
    let f = fb.flags(CodeFlags::IS_FUNCTION).finish(fasm.finish());

    let mut b = CodeUnitBuilder::new(0, 0);
    let f_lit = b.function(f);
    let mut asm = Asm::new();
    asm.op(Opcode::PushLiteral).lit(f_lit);
    asm.op(Opcode::Call0Block);
    asm.op(Opcode::ReturnWithBlock);

    assert_eq!(run(b.finish(asm.finish())).unwrap(), Value::Int(2));
}

// var log = "";
// try { try { throw "x" } finally { log += "f1;" } } catch (e) { log += "c:" + e }
// log
#[test]
fn throw_runs_inner_finally_before_outer_catch() {
    let mut b = CodeUnitBuilder::new(0, 0);
    let log = b.ident("log");
    let e = b.ident("e");
    let empty = b.string("");
    let x = b.string("x");
    let f1 = b.string("f1;");
    let c = b.string("c:");

    let mut asm = Asm::new();
    asm.op(Opcode::CreateVarBinding).lit(log);
    asm.op(Opcode::PushLiteral).lit(empty);
    asm.op(Opcode::InitBinding).lit(log);
    asm.op(Opcode::CreateVarBinding).lit(e);

    let outer_handler = asm.label();
    let inner_handler = asm.label();
    let inner_end = asm.label();
    let outer_end = asm.label();

    asm.branch(Opcode::TryCreateContext, outer_handler);

    // inner try/finally
    asm.branch(Opcode::TryCreateContext, inner_handler);
    asm.op(Opcode::PushLiteral).lit(x);
    asm.op(Opcode::Throw);
    asm.bind(inner_handler);
    asm.branch(Opcode::Finally, inner_end);
    asm.op(Opcode::IdentReference).lit(log);
    asm.op(Opcode::PushLiteral).lit(f1);
    asm.op(Opcode::Add);
    asm.op(Opcode::Assign);
    asm.op(Opcode::ContextEnd);
    asm.bind(inner_end);

    asm.bind(outer_handler);
    asm.branch(Opcode::Catch, outer_end);
    // catch body: e is on the stack; log += "c:" + e
    asm.op(Opcode::AssignSetIdent).lit(e);
    asm.op(Opcode::IdentReference).lit(log);
    asm.op(Opcode::PushLiteral).lit(c);
    asm.op(Opcode::PushLiteral).lit(e);
    asm.op(Opcode::Add);
    asm.op(Opcode::Add);
    asm.op(Opcode::Assign);

    asm.bind(outer_end);
    asm.op(Opcode::ContextEnd);
    asm.op(Opcode::PushLiteral).lit(log);
    asm.op(Opcode::PopBlock);
    asm.op(Opcode::ReturnWithBlock);

    let result = run(b.finish(asm.finish())).unwrap();
    assert_eq!(as_str(&result), "f1;c:x");
}

// break out of a try with finally: the finally runs before the jump lands.
#[test]
fn jump_out_of_protected_region_discharges_finally() {
    let mut b = CodeUnitBuilder::new(0, 0);
    let log = b.ident("log");
    let empty = b.string("");
    let f = b.string("f");

    let mut asm = Asm::new();
    asm.op(Opcode::CreateVarBinding).lit(log);
    asm.op(Opcode::PushLiteral).lit(empty);
    asm.op(Opcode::InitBinding).lit(log);

    let handler = asm.label();
    let end = asm.label();
    let out = asm.label();

    asm.branch(Opcode::TryCreateContext, handler);
    asm.branch(Opcode::JumpForward, out);

    asm.bind(handler);
    asm.branch(Opcode::Finally, end);
    asm.op(Opcode::IdentReference).lit(log);
    asm.op(Opcode::PushLiteral).lit(f);
    asm.op(Opcode::Add);
    asm.op(Opcode::Assign);
    asm.op(Opcode::ContextEnd);
    asm.bind(end);

    asm.bind(out);
    asm.op(Opcode::PushLiteral).lit(log);
    asm.op(Opcode::PopBlock);
    asm.op(Opcode::ReturnWithBlock);

    let result = run(b.finish(asm.finish())).unwrap();
    assert_eq!(as_str(&result), "f");
}

// Uncaught exceptions surface the thrown value.
#[test]
fn uncaught_throw_escapes_run() {
    let mut b = CodeUnitBuilder::new(0, 0);
    let mut asm = Asm::new();
    asm.op(Opcode::PushPosByte).byte(7);
    asm.op(Opcode::Throw);

    let err = run(b.finish(asm.finish())).unwrap_err();
    assert!(matches!(err, InterpreterError::Uncaught(Value::Int(7))));
}

fn infinite_loop_in_try_catch() -> CodeUnit {
    let mut b = CodeUnitBuilder::new(0, 0);
    let mut asm = Asm::new();
    let handler = asm.label();
    let end = asm.label();

    asm.branch(Opcode::TryCreateContext, handler);
    let spin = asm.here();
    asm.branch(Opcode::JumpBackward, spin);

    asm.bind(handler);
    asm.branch(Opcode::Catch, end);
    asm.op(Opcode::PopBlock);
    asm.bind(end);
    asm.op(Opcode::ContextEnd);
    asm.op(Opcode::ReturnWithBlock);
    b.finish(asm.finish())
}

// A throwing stop-callback result is an ordinary catchable exception.
#[test]
fn stop_callback_throw_is_catchable() {
    let mut vm = Interpreter::new();
    vm.context_mut()
        .set_stop_callback(1, Box::new(|| StopSignal::Throw(Value::Int(99))));

    let result = run_in(&mut vm, infinite_loop_in_try_catch()).unwrap();
    assert_eq!(result, Value::Int(99));
}

// An aborting stop-callback result bypasses catch handlers entirely.
#[test]
fn stop_callback_abort_bypasses_catch() {
    let mut vm = Interpreter::new();
    vm.context_mut()
        .set_stop_callback(1, Box::new(|| StopSignal::Abort(Value::Int(1))));

    let err = run_in(&mut vm, infinite_loop_in_try_catch()).unwrap_err();
    assert!(matches!(err, InterpreterError::Aborted(Value::Int(1))));
}

// The callback only fires on backward branches, at the configured
// frequency.
#[test]
fn stop_callback_respects_frequency() {
    let mut vm = Interpreter::new();
    vm.context_mut()
        .set_stop_callback(10, Box::new(|| StopSignal::Throw(Value::Int(5))));

    // Three backward branches only: never reaches the frequency.
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

    assert_eq!(run_in(&mut vm, b.finish(asm.finish())).unwrap(), Value::Int(3));
}

// TypeError from calling a non-callable reports the right kind.
#[test]
fn calling_non_callable_raises_type_error() {
    let mut b = CodeUnitBuilder::new(0, 0);
    let mut asm = Asm::new();
    asm.op(Opcode::PushPosByte).byte(4);
    asm.op(Opcode::Call0Push);
    asm.op(Opcode::PopBlock);
    asm.op(Opcode::ReturnWithBlock);

    let mut vm = Interpreter::new();
    let err = run_in(&mut vm, b.finish(asm.finish())).unwrap_err();
    assert_eq!(uncaught_kind(&vm, &err), Some(ErrorKind::Type));
}
