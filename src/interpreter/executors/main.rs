//! Frame executor and public entry points.
//!
//! `execute` drives `dispatch` until the frame completes, suspends or
//! defers an invocation; deferred calls are performed here and dispatch is
//! re-entered, so no opcode body recurses into the dispatcher. The entry
//! points (`run`, `run_global`, `run_eval`, `run_module`) differ only in
//! how they seed the frame's scope and `this` binding.

use std::rc::Rc;

use quill_asm::{CodeFlags, CodeUnit};

use crate::env;
use crate::error::InterpreterError;
use crate::heap::ObjectId;
use crate::interpreter::unwind::Unwound;
use crate::interpreter::{Frame, Interpreter};
use crate::state::{ExecuteState, ProgramState};
use crate::value::Value;

impl Interpreter {
    /// Drive one frame to quiescence, performing deferred call operations
    /// between dispatch entries.
    pub(crate) fn execute(&mut self, frame: &mut Frame) -> Result<ProgramState, crate::error::RuntimeError> {
        loop {
            match self.dispatch(frame)? {
                ExecuteState::Return(value) => {
                    debug_assert!(
                        frame.is_balanced(),
                        "normal return leaves contexts or operands live"
                    );
                    return Ok(ProgramState::Completed(value));
                }
                ExecuteState::Yield(value) => return Ok(ProgramState::Suspended(value)),
                ExecuteState::CreateGenerator => return Ok(ProgramState::Generator),
                ExecuteState::Call {
                    kind,
                    argc,
                    spread,
                    put,
                } => {
                    if let Err(error) = self.perform_call(frame, kind, argc, spread, put) {
                        match self.unwind(frame, error)? {
                            Unwound::Resumed => {}
                            Unwound::Completed(value) => {
                                return Ok(ProgramState::Completed(value));
                            }
                        }
                    }
                }
            }
        }
    }

    /// `run(code, this, env, args)`: top-level entry over an explicit
    /// scope.
    pub fn run(
        &mut self,
        code: Rc<CodeUnit>,
        this: Value,
        env: ObjectId,
        args: &[Value],
    ) -> Result<Value, InterpreterError> {
        let mut frame = Box::new(Frame::new(code, this, env));
        self.init_exec(&mut frame, args);
        let state = self.execute(&mut frame)?;
        Ok(state.into_value())
    }

    /// `run_global(code)`: global `this` and global scope, with the
    /// lexical-block wrapper when the unit declares one.
    pub fn run_global(&mut self, code: Rc<CodeUnit>) -> Result<Value, InterpreterError> {
        let env = self.scope_for(&code, self.global_env);
        self.run(code, Value::Object(self.global_object), env, &[])
    }

    /// `run_eval(code, this, env)`: direct eval executes in the caller's
    /// scope (`Some`), indirect eval in the global scope (`None`). Strict
    /// mode and the block-environment wrapper come from the unit's status
    /// flags.
    pub fn run_eval(
        &mut self,
        code: Rc<CodeUnit>,
        this: Value,
        env: Option<ObjectId>,
    ) -> Result<Value, InterpreterError> {
        let outer = env.unwrap_or(self.global_env);
        let scope = self.scope_for(&code, outer);
        let this = match env {
            Some(_) => this,
            None => Value::Object(self.global_object),
        };
        self.run(code, this, scope, &[])
    }

    /// `run_module(code, env)`: module scope over the global environment,
    /// recorded in the shared context while the module initializes.
    pub fn run_module(
        &mut self,
        code: Rc<CodeUnit>,
        env: Option<ObjectId>,
    ) -> Result<Value, InterpreterError> {
        let outer = env.unwrap_or(self.global_env);
        let module_env = env::create_decl_lex_env(&mut self.heap, Some(outer), false);
        let saved = self.context.module_env.replace(module_env);
        let scope = self.scope_for(&code, module_env);
        let result = self.run(code, Value::Undefined, scope, &[]);
        self.context.module_env = saved;
        result
    }

    /// Apply the unit's lexical-block wrapper to an outer scope.
    fn scope_for(&mut self, code: &CodeUnit, outer: ObjectId) -> ObjectId {
        if code.flags.contains(CodeFlags::LEXICAL_BLOCK) {
            env::create_decl_lex_env(&mut self.heap, Some(outer), true)
        } else {
            outer
        }
    }
}
