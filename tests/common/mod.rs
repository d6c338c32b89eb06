#![allow(dead_code)]

use std::rc::Rc;

use quill_vm::prelude::*;

/// Run a hand-assembled unit as global code in a fresh realm.
pub fn run(unit: CodeUnit) -> Result<Value, InterpreterError> {
    Interpreter::new().run_global(Rc::new(unit))
}

/// Run a unit in an existing realm.
pub fn run_in(vm: &mut Interpreter, unit: CodeUnit) -> Result<Value, InterpreterError> {
    vm.run_global(Rc::new(unit))
}

/// Unwrap an uncaught script exception and report its error kind.
pub fn uncaught_kind(vm: &Interpreter, error: &InterpreterError) -> Option<ErrorKind> {
    match error {
        InterpreterError::Uncaught(value) => vm.error_kind_of(value),
        _ => None,
    }
}

/// String payload of a value, for observable-result assertions.
pub fn as_str(value: &Value) -> &str {
    match value {
        Value::Str(s) => s,
        other => panic!("expected a string, got {other:?}"),
    }
}
