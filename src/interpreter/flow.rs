//! Invocation protocol: `function_call`, `function_construct`, `super(...)`
//! sequencing, spread-argument materialization, generator launch/resume and
//! the deferred-call execution the dispatch loop hands back to the
//! executor.

use std::rc::Rc;

use quill_asm::{CodeFlags, CodeUnit, ErrorKind, PutDisposition};

use super::{Frame, Interpreter};
use crate::env::{self, Binding};
use crate::error::RuntimeError;
use crate::heap::ObjectId;
use crate::object::{
    FunctionData, FunctionKind, GeneratorState, Object, ObjectKind, PromiseState, Property,
    PropertyFlags, PropertyKey,
};
use crate::state::{CallKind, ProgramState};
use crate::value::Value;

impl Interpreter {
    /// `object_is_callable` over a value.
    pub fn is_callable(&self, value: &Value) -> bool {
        match value {
            Value::Object(id) => self.heap.get(*id).is_callable(),
            _ => false,
        }
    }

    /// `object_is_constructor` over a value.
    pub fn is_constructor(&self, value: &Value) -> bool {
        match value {
            Value::Object(id) => self.heap.get(*id).is_constructor(),
            _ => false,
        }
    }

    /// Create a closure over the frame's current environment.
    pub(crate) fn create_function(
        &mut self,
        frame: &Frame,
        code: Rc<CodeUnit>,
        name: Option<Rc<str>>,
    ) -> Value {
        let kind = if code.is_generator() {
            FunctionKind::Generator
        } else if code.is_async() {
            FunctionKind::Async
        } else if code.is_arrow() {
            FunctionKind::Arrow
        } else {
            FunctionKind::Normal
        };
        let lexical_this = matches!(kind, FunctionKind::Arrow)
            .then(|| Box::new(frame.this.clone()));
        let data = FunctionData {
            code,
            scope: frame.lex_env,
            kind,
            home_object: None,
            lexical_this,
            name,
        };
        let id = self.heap.alloc(Object::new(ObjectKind::Function(data), None));

        if kind != FunctionKind::Arrow {
            let prototype = self.heap.alloc_plain(None);
            self.heap.define_property(
                prototype,
                PropertyKey::from_str_key("constructor"),
                Property::Data {
                    value: Value::Object(id),
                    flags: PropertyFlags::WRITABLE | PropertyFlags::CONFIGURABLE,
                },
            );
            self.heap.define_property(
                id,
                PropertyKey::from_str_key("prototype"),
                Property::Data {
                    value: Value::Object(prototype),
                    flags: PropertyFlags::WRITABLE,
                },
            );
        }
        Value::Object(id)
    }

    /// `PushNamedFuncExpr`: the expression's own name binds immutably in a
    /// private environment the closure captures.
    pub(crate) fn create_named_func_expr(
        &mut self,
        frame: &Frame,
        code: Rc<CodeUnit>,
        name: Rc<str>,
    ) -> Value {
        let private_env = env::create_decl_lex_env(&mut self.heap, Some(frame.lex_env), true);
        let mut inner = Frame::new(frame.code.clone(), frame.this.clone(), private_env);
        inner.function = frame.function;
        let function = self.create_function(&inner, code, Some(name.clone()));
        env::env_record_mut(&mut self.heap, private_env)
            .set_binding(name, Binding::immutable(function.clone()));
        function
    }

    /// `init_exec`: seed the argument registers (truncating surplus, or
    /// collecting it into the rest array when the unit declares one) and
    /// leave the remaining registers undefined.
    pub(crate) fn init_exec(&mut self, frame: &mut Frame, args: &[Value]) {
        let argument_end = frame.code.argument_end as usize;
        if frame.code.flags.contains(CodeFlags::REST_PARAMETER) && argument_end > 0 {
            let formals = argument_end - 1;
            for i in 0..formals {
                frame.registers[i] = args.get(i).cloned().unwrap_or_default();
            }
            let rest: Vec<Value> = args.get(formals..).unwrap_or(&[]).to_vec();
            let rest = self.heap.alloc_array(rest);
            frame.registers[formals] = Value::Object(rest);
        } else {
            for i in 0..argument_end {
                frame.registers[i] = args.get(i).cloned().unwrap_or_default();
            }
        }
    }

    /// Build the activation for a byte-code callee.
    fn make_frame(
        &mut self,
        id: ObjectId,
        data: &FunctionData,
        this: Value,
        args: &[Value],
    ) -> Box<Frame> {
        let lex_env = env::create_decl_lex_env(&mut self.heap, Some(data.scope), false);
        let mut frame = Box::new(Frame::new(data.code.clone(), this, lex_env));
        frame.function = Some(id);
        self.init_exec(&mut frame, args);
        frame
    }

    /// `function_call(func, this, args, n)`.
    pub fn function_call(
        &mut self,
        callee: &Value,
        this: Value,
        args: &[Value],
    ) -> Result<Value, RuntimeError> {
        let id = match callee.as_object() {
            Some(id) if self.heap.get(id).is_callable() => id,
            _ => {
                return Err(self.throw(
                    ErrorKind::Type,
                    format!("{callee} is not a function"),
                ));
            }
        };
        match &self.heap.get(id).kind {
            ObjectKind::NativeFunction { func, .. } => {
                let func = *func;
                func(self, this, args)
            }
            ObjectKind::Bound {
                target,
                bound_this,
                bound_args,
            } => {
                let target = Value::Object(*target);
                let bound_this = bound_this.clone();
                let combined: Vec<Value> =
                    bound_args.iter().chain(args.iter()).cloned().collect();
                self.function_call(&target, bound_this, &combined)
            }
            ObjectKind::Function(data) => {
                let data = data.clone();
                if matches!(
                    data.kind,
                    FunctionKind::BaseConstructor | FunctionKind::DerivedConstructor
                ) {
                    return Err(self.throw(
                        ErrorKind::Type,
                        "class constructor cannot be invoked without 'new'".into(),
                    ));
                }
                let this = self.resolve_call_this(&data, this);
                let mut frame = self.make_frame(id, &data, this, args);

                // Calling a generator function launches nothing; the body's
                // CreateGenerator prologue packages the frame immediately.
                let saved_target =
                    std::mem::replace(&mut self.context.new_target, Value::Undefined);
                let state = self.execute(&mut frame);
                self.context.new_target = saved_target;

                match state {
                    Ok(ProgramState::Completed(value)) => Ok(value),
                    Ok(ProgramState::Generator) => Ok(self.make_generator(frame, false)),
                    Ok(ProgramState::Suspended(_)) => {
                        unreachable!("fresh frames suspend only through CreateGenerator")
                    }
                    Err(RuntimeError::Throw(error)) if data.kind == FunctionKind::Async => {
                        Ok(self.make_promise(PromiseState::Rejected(error)))
                    }
                    Err(other) => Err(other),
                }
            }
            _ => unreachable!("is_callable covers the callable kinds"),
        }
    }

    /// `this` seen by an ordinary callee: arrows use their captured value,
    /// sloppy functions coerce `undefined`/`null` to the global object and
    /// primitives to wrappers.
    fn resolve_call_this(&mut self, data: &FunctionData, this: Value) -> Value {
        match data.kind {
            FunctionKind::Arrow => data
                .lexical_this
                .as_deref()
                .cloned()
                .unwrap_or_default(),
            _ if data.code.is_strict() => this,
            _ => match this {
                Value::Undefined | Value::Null => Value::Object(self.global_object),
                Value::Object(_) => this,
                primitive => match self.to_object(&primitive) {
                    Ok(id) => Value::Object(id),
                    Err(_) => Value::Undefined,
                },
            },
        }
    }

    /// `function_construct(func, new_target, args, n)`.
    pub fn function_construct(
        &mut self,
        callee: &Value,
        args: &[Value],
        new_target: Value,
    ) -> Result<Value, RuntimeError> {
        let id = match callee.as_object() {
            Some(id) if self.heap.get(id).is_constructor() => id,
            _ => {
                return Err(self.throw(
                    ErrorKind::Type,
                    format!("{callee} is not a constructor"),
                ));
            }
        };
        match &self.heap.get(id).kind {
            ObjectKind::NativeFunction { func, .. } => {
                let func = *func;
                func(self, Value::Undefined, args)
            }
            ObjectKind::Bound {
                target,
                bound_args,
                ..
            } => {
                let target = Value::Object(*target);
                let combined: Vec<Value> =
                    bound_args.iter().chain(args.iter()).cloned().collect();
                let new_target = if new_target == *callee {
                    target.clone()
                } else {
                    new_target
                };
                self.function_construct(&target, &combined, new_target)
            }
            ObjectKind::Function(data) => {
                let data = data.clone();
                let derived = data.kind == FunctionKind::DerivedConstructor;

                let this = if derived {
                    Value::Uninitialized
                } else {
                    let prototype = self.object_get(
                        match new_target.as_object() {
                            Some(nt) => nt,
                            None => id,
                        },
                        &PropertyKey::from_str_key("prototype"),
                        &new_target,
                    )?;
                    let proto_id = prototype.as_object();
                    Value::Object(self.heap.alloc_plain(proto_id))
                };

                let mut frame = self.make_frame(id, &data, this.clone(), args);
                let frame_env = frame.lex_env;
                if derived {
                    env::env_record_mut(&mut self.heap, frame_env)
                        .set_binding(Rc::from("this"), Binding::uninitialized(true));
                }

                let saved_target =
                    std::mem::replace(&mut self.context.new_target, new_target);
                let result = self.execute(&mut frame);
                self.context.new_target = saved_target;

                let completion = match result {
                    Ok(state) => state.into_value(),
                    Err(e) => return Err(e),
                };
                if completion.is_object() {
                    return Ok(completion);
                }
                if derived {
                    let binding = env::env_record(&self.heap, frame_env)
                        .binding("this")
                        .cloned();
                    return match binding {
                        Some(b) if b.is_initialized() => Ok(b.value),
                        _ => Err(self.throw(
                            ErrorKind::Reference,
                            "must call super constructor before returning from derived \
                             constructor"
                                .into(),
                        )),
                    };
                }
                Ok(this)
            }
            _ => unreachable!("is_constructor covers the constructable kinds"),
        }
    }

    /// `super(...)`: one-shot `this` initialization with new-target
    /// inheritance.
    pub(crate) fn super_call(
        &mut self,
        frame: &mut Frame,
        args: &[Value],
    ) -> Result<(), RuntimeError> {
        let function = match frame.function {
            Some(id) => id,
            None => {
                return Err(self.throw(
                    ErrorKind::Syntax,
                    "'super' keyword unexpected here".into(),
                ));
            }
        };
        let super_ctor = match self.heap.get(function).prototype {
            Some(p) if self.heap.get(p).is_constructor() => p,
            _ => {
                return Err(self.throw(
                    ErrorKind::Type,
                    "Super constructor is not a constructor".into(),
                ));
            }
        };

        let this_env = match self.find_this_env(frame.lex_env) {
            Some(env) => env,
            None => {
                return Err(self.throw(
                    ErrorKind::Syntax,
                    "'super' keyword unexpected here".into(),
                ));
            }
        };
        let initialized = env::env_record(&self.heap, this_env)
            .binding("this")
            .is_some_and(|b| b.is_initialized());
        if initialized {
            return Err(self.throw(
                ErrorKind::Reference,
                "Super constructor may only be called once".into(),
            ));
        }

        let new_target = match &self.context.new_target {
            Value::Undefined => Value::Object(function),
            other => other.clone(),
        };
        let result =
            self.function_construct(&Value::Object(super_ctor), args, new_target)?;

        env::env_record_mut(&mut self.heap, this_env)
            .binding_mut("this")
            .expect("derived constructor frames bind 'this'")
            .value = result.clone();
        frame.this = result;
        Ok(())
    }

    /// Nearest environment carrying a `this` binding.
    pub(crate) fn find_this_env(&self, mut env: ObjectId) -> Option<ObjectId> {
        loop {
            let record = env::env_record(&self.heap, env);
            if record.binding("this").is_some() {
                return Some(env);
            }
            env = record.outer?;
        }
    }

    /// Perform a deferred call state produced by dispatch, routing the
    /// result per the opcode's put disposition.
    pub(crate) fn perform_call(
        &mut self,
        frame: &mut Frame,
        kind: CallKind,
        argc: u16,
        spread: bool,
        put: PutDisposition,
    ) -> Result<(), RuntimeError> {
        let args: Vec<Value> = if spread {
            let collection = frame.pop();
            match collection.as_object().map(|id| &self.heap.get(id).kind) {
                Some(ObjectKind::Collection { items }) => items.clone(),
                _ => unreachable!("spread calls consume a collection"),
            }
        } else {
            frame.pop_many(argc as usize)
        };

        let result = match kind {
            CallKind::Call => {
                let callee = frame.pop();
                self.function_call(&callee, Value::Undefined, &args)?
            }
            CallKind::CallProp => {
                let prop = frame.pop();
                let base = frame.pop();
                let callee = self.get_value(&base, &prop)?;
                self.function_call(&callee, base, &args)?
            }
            CallKind::CallRef => {
                let callee = frame.pop();
                let _prop = frame.pop();
                let receiver = frame.pop();
                let this = match receiver {
                    Value::RegisterRef(_) => Value::Undefined,
                    other => other,
                };
                self.function_call(&callee, this, &args)?
            }
            CallKind::Construct => {
                let callee = frame.pop();
                self.function_construct(&callee, &args, callee.clone())?
            }
            CallKind::SuperCall => {
                self.super_call(frame, &args)?;
                Value::Undefined
            }
        };

        match put {
            PutDisposition::Stack => frame.push(result),
            PutDisposition::Block => frame.block_result = result,
            PutDisposition::None => {}
            _ => unreachable!("call opcodes route to stack or block result"),
        }
        Ok(())
    }

    /// `SpreadArguments`: collapse the top `count` stack values into a
    /// collection, expanding iterables behind spread-element markers.
    pub(crate) fn spread_arguments(
        &mut self,
        frame: &mut Frame,
        count: usize,
    ) -> Result<Value, RuntimeError> {
        let raw = frame.pop_many(count);
        let mut items = Vec::with_capacity(raw.len());
        let mut spread_next = false;
        for value in raw {
            match value {
                Value::SpreadElement => spread_next = true,
                value if spread_next => {
                    spread_next = false;
                    self.iterate_collect(&value, &mut items)?;
                }
                value => items.push(value),
            }
        }
        let collection = self
            .heap
            .alloc(Object::new(ObjectKind::Collection { items }, None));
        Ok(Value::Object(collection))
    }

    /// Package a frame into a suspended generator object with `next` and
    /// `return` methods.
    pub(crate) fn make_generator(&mut self, frame: Box<Frame>, started: bool) -> Value {
        let generator = self.heap.alloc(Object::new(
            ObjectKind::Generator(GeneratorState::Suspended { frame, started }),
            None,
        ));
        let next_fn = self.heap_native("next", generator_next);
        self.heap.define_property(
            generator,
            PropertyKey::from_str_key("next"),
            Property::Data {
                value: Value::Object(next_fn),
                flags: PropertyFlags::WRITABLE | PropertyFlags::CONFIGURABLE,
            },
        );
        let return_fn = self.heap_native("return", generator_return);
        self.heap.define_property(
            generator,
            PropertyKey::from_str_key("return"),
            Property::Data {
                value: Value::Object(return_fn),
                flags: PropertyFlags::WRITABLE | PropertyFlags::CONFIGURABLE,
            },
        );
        Value::Object(generator)
    }

    fn heap_native(&mut self, name: &'static str, func: crate::object::NativeFn) -> ObjectId {
        self.heap
            .alloc(Object::new(ObjectKind::NativeFunction { func, name }, None))
    }

    /// `{ value, done }` iterator-result object.
    pub(crate) fn make_iter_result(&mut self, value: Value, done: bool) -> Value {
        let result = self.heap.alloc_plain(None);
        self.heap
            .define_property(result, PropertyKey::from_str_key("value"), Property::data(value));
        self.heap.define_property(
            result,
            PropertyKey::from_str_key("done"),
            Property::data(Value::Bool(done)),
        );
        Value::Object(result)
    }

    /// Settled promise record (see `ReturnPromise`).
    pub(crate) fn make_promise(&mut self, state: PromiseState) -> Value {
        Value::Object(self.heap.alloc(Object::new(ObjectKind::Promise(state), None)))
    }

    /// Drive a suspended generator until its next yield or completion.
    pub(crate) fn resume_generator(
        &mut self,
        id: ObjectId,
        sent: Value,
    ) -> Result<Value, RuntimeError> {
        let state = match &mut self.heap.get_mut(id).kind {
            ObjectKind::Generator(state) => std::mem::replace(state, GeneratorState::Running),
            _ => {
                return Err(self.throw(
                    ErrorKind::Type,
                    "generator method called on a non-generator".into(),
                ));
            }
        };
        match state {
            GeneratorState::Running => Err(self.throw(
                ErrorKind::Type,
                "generator is already running".into(),
            )),
            GeneratorState::Done => Ok(self.make_iter_result(Value::Undefined, true)),
            GeneratorState::Suspended { mut frame, started } => {
                if started {
                    // The sent value becomes the result of the yield
                    // expression.
                    frame.push(sent);
                }
                match self.execute(&mut frame) {
                    Ok(ProgramState::Completed(value)) => {
                        self.set_generator_state(id, GeneratorState::Done);
                        Ok(self.make_iter_result(value, true))
                    }
                    Ok(ProgramState::Suspended(yielded)) => {
                        self.set_generator_state(
                            id,
                            GeneratorState::Suspended {
                                frame,
                                started: true,
                            },
                        );
                        Ok(self.make_iter_result(yielded, false))
                    }
                    Ok(ProgramState::Generator) => {
                        unreachable!("fresh frames suspend only through CreateGenerator")
                    }
                    Err(e) => {
                        self.set_generator_state(id, GeneratorState::Done);
                        Err(e)
                    }
                }
            }
        }
    }

    fn set_generator_state(&mut self, id: ObjectId, state: GeneratorState) {
        if let ObjectKind::Generator(slot) = &mut self.heap.get_mut(id).kind {
            *slot = state;
        }
    }

}

fn generator_next(
    vm: &mut Interpreter,
    this: Value,
    args: &[Value],
) -> Result<Value, RuntimeError> {
    let id = match this.as_object() {
        Some(id) => id,
        None => {
            return Err(vm.throw(
                ErrorKind::Type,
                "generator method called on a non-generator".into(),
            ));
        }
    };
    let sent = args.first().cloned().unwrap_or_default();
    vm.resume_generator(id, sent)
}

fn generator_return(
    vm: &mut Interpreter,
    this: Value,
    args: &[Value],
) -> Result<Value, RuntimeError> {
    let id = match this.as_object() {
        Some(id) => id,
        None => {
            return Err(vm.throw(
                ErrorKind::Type,
                "generator method called on a non-generator".into(),
            ));
        }
    };
    if let ObjectKind::Generator(state) = &mut vm.heap_mut().get_mut(id).kind {
        *state = GeneratorState::Done;
    }
    let value = args.first().cloned().unwrap_or_default();
    Ok(vm.make_iter_result(value, true))
}
