//! Class construction and `super` references.
//!
//! The class body runs inside its own block-scoped environment holding the
//! class binding; `InitClass` wires the constructor/prototype pair and the
//! heritage chains, member definition opcodes target the prototype (or the
//! constructor for static members), and `FinalizeClass` initializes the
//! binding and leaves the scope.

use quill_asm::ErrorKind;

use super::frame::{ContextKind, ContextRecord};
use super::{Frame, Interpreter};
use crate::env::{self, Binding};
use crate::error::RuntimeError;
use crate::object::{FunctionKind, ObjectKind, Property, PropertyFlags, PropertyKey};
use crate::value::Value;

impl Interpreter {
    /// `PushClassEnvironment`: enter the class scope, binding the class
    /// name in the temporal dead zone. The record's protected range is
    /// unbounded; class bodies contain no outward jumps.
    pub(crate) fn push_class_environment(&mut self, frame: &mut Frame, index: u16) {
        let name = self.ident_name(frame, index);
        let class_env = env::create_decl_lex_env(&mut self.heap, Some(frame.lex_env), true);
        env::env_record_mut(&mut self.heap, class_env)
            .set_binding(name, Binding::uninitialized(false));

        frame.contexts.push(ContextRecord {
            kind: ContextKind::Block,
            entry: frame.pc,
            end: usize::MAX,
            stack_depth: frame.stack_depth(),
            has_lex_env: true,
        });
        frame.push(Value::ReleaseLexEnv);
        frame.lex_env = class_env;
    }

    /// `InitClass`: pop the optional heritage and the constructor function,
    /// wire prototype/constructor/home-object and the static inheritance
    /// chain, and push the finished constructor.
    pub(crate) fn init_class(
        &mut self,
        frame: &mut Frame,
        has_heritage: bool,
    ) -> Result<Value, RuntimeError> {
        let ctor_value = frame.pop();
        let heritage = if has_heritage {
            Some(frame.pop())
        } else {
            None
        };

        let ctor = match ctor_value.as_object() {
            Some(id) if self.heap.get(id).function_data().is_some() => id,
            _ => {
                return Err(self.throw(
                    ErrorKind::Type,
                    "class constructor must be a function".into(),
                ));
            }
        };

        // Resolve the two prototype chains from the heritage clause.
        let (parent_ctor, parent_proto) = match &heritage {
            None => (None, None),
            Some(Value::Null) => (None, None),
            Some(value @ Value::Object(id)) => {
                if !self.heap.get(*id).is_constructor() {
                    return Err(self.throw(
                        ErrorKind::Type,
                        format!("class heritage {value} is not a constructor"),
                    ));
                }
                let proto = self.object_get(
                    *id,
                    &PropertyKey::from_str_key("prototype"),
                    value,
                )?;
                (Some(*id), proto.as_object())
            }
            Some(other) => {
                return Err(self.throw(
                    ErrorKind::Type,
                    format!("class heritage {other} is not a constructor"),
                ));
            }
        };

        let prototype = self.heap.alloc_plain(parent_proto);
        self.heap.define_property(
            prototype,
            PropertyKey::from_str_key("constructor"),
            Property::Data {
                value: Value::Object(ctor),
                flags: PropertyFlags::WRITABLE | PropertyFlags::CONFIGURABLE,
            },
        );
        self.heap.define_property(
            ctor,
            PropertyKey::from_str_key("prototype"),
            Property::Data {
                value: Value::Object(prototype),
                flags: PropertyFlags::empty(),
            },
        );

        // Static inheritance and super-constructor resolution both go
        // through the constructor's own prototype slot.
        self.heap.get_mut(ctor).prototype = parent_ctor;

        if let ObjectKind::Function(data) = &mut self.heap.get_mut(ctor).kind {
            data.kind = if heritage.is_some() && !matches!(heritage, Some(Value::Null)) {
                FunctionKind::DerivedConstructor
            } else {
                FunctionKind::BaseConstructor
            };
            data.home_object = Some(prototype);
        }

        Ok(Value::Object(ctor))
    }

    /// `PushImplicitCtor`: synthesize the default constructor body; its
    /// base/derived classification is fixed by `InitClass`.
    pub(crate) fn push_implicit_ctor(&mut self, frame: &Frame, has_heritage: bool) -> Value {
        let code = if has_heritage {
            self.implicit_ctor_derived.clone()
        } else {
            self.implicit_ctor_base.clone()
        };
        self.create_function(frame, code, None)
    }

    /// `FinalizeClass`: initialize the class binding and leave the class
    /// scope, keeping the constructor on the stack.
    pub(crate) fn finalize_class(&mut self, frame: &mut Frame, index: u16) {
        let ctor = frame.pop();
        let name = self.ident_name(frame, index);

        let record = frame
            .contexts
            .pop()
            .expect("class scope record missing");
        debug_assert!(matches!(record.kind, ContextKind::Block));
        let class_env = frame.lex_env;
        env::env_record_mut(&mut self.heap, class_env)
            .binding_mut(&name)
            .expect("class binding missing")
            .value = ctor.clone();

        // Leave the class environment; the marker slot goes with it.
        frame.drain_stack_to(record.stack_depth);
        frame.lex_env = env::env_record(&self.heap, class_env)
            .outer
            .expect("class scope requires an outer scope");
        frame.push(ctor);
    }

    /// Member definition target shared by the property/getter/setter
    /// opcodes. Object literals define on the object at the stack top;
    /// inside class bodies (the stack top is the constructor) non-static
    /// members land on the prototype, static members on the constructor.
    /// The boolean reports whether a class body is being defined, which
    /// controls member enumerability.
    pub(crate) fn member_target(
        &mut self,
        frame: &Frame,
        non_static: bool,
    ) -> Result<(crate::heap::ObjectId, bool), RuntimeError> {
        let holder = match frame.peek() {
            Value::Object(id) => *id,
            other => {
                return Err(self.throw(
                    ErrorKind::Type,
                    format!("cannot define a property on {other}"),
                ));
            }
        };
        let is_class = self.heap.get(holder).function_data().is_some();
        if !is_class || !non_static {
            return Ok((holder, is_class));
        }
        let prototype = self.object_get(
            holder,
            &PropertyKey::from_str_key("prototype"),
            &Value::Object(holder),
        )?;
        match prototype.as_object() {
            Some(proto) => Ok((proto, true)),
            None => Err(self.throw(
                ErrorKind::Type,
                "class prototype was replaced with a non-object".into(),
            )),
        }
    }

    /// `PushSuperConstructor`: `[[GetPrototypeOf]]` of the active function.
    pub(crate) fn push_super_constructor(
        &mut self,
        frame: &Frame,
    ) -> Result<Value, RuntimeError> {
        let function = match frame.function {
            Some(id) => id,
            None => {
                return Err(self.throw(
                    ErrorKind::Syntax,
                    "'super' keyword unexpected here".into(),
                ));
            }
        };
        match self.heap.get(function).prototype {
            Some(parent) => Ok(Value::Object(parent)),
            None => Err(self.throw(
                ErrorKind::Type,
                "Super constructor is not a constructor".into(),
            )),
        }
    }

    /// `SuperReference`: push the reference triple `(this, name, value)`
    /// with the value looked up through the home object's prototype.
    pub(crate) fn super_reference(
        &mut self,
        frame: &mut Frame,
        this: Value,
        index: u16,
    ) -> Result<(), RuntimeError> {
        let name = self.ident_name(frame, index);
        let home = frame
            .function
            .and_then(|f| self.heap.get(f).function_data())
            .and_then(|data| data.home_object);
        let start = match home {
            Some(home) => self.heap.get(home).prototype,
            None => {
                return Err(self.throw(
                    ErrorKind::Syntax,
                    "'super' keyword unexpected here".into(),
                ));
            }
        };
        let value = match start {
            Some(proto) => {
                let key = PropertyKey::from_rc_str(name.clone());
                self.object_get(proto, &key, &this)?
            }
            None => Value::Undefined,
        };
        frame.push(this);
        frame.push(Value::Str(name));
        frame.push(value);
        Ok(())
    }

    /// `ResolveLexicalThis`: the environment `this` binding when one exists
    /// (temporal-dead-zone checked), the frame `this` otherwise.
    pub(crate) fn resolve_lexical_this(&mut self, frame: &Frame) -> Result<Value, RuntimeError> {
        match self.find_this_env(frame.lex_env) {
            Some(env) => {
                let binding = env::env_record(&self.heap, env)
                    .binding("this")
                    .expect("find_this_env returned a binding holder");
                if binding.is_initialized() {
                    Ok(binding.value.clone())
                } else {
                    Err(self.throw(
                        ErrorKind::Reference,
                        "must call super constructor before accessing 'this'".into(),
                    ))
                }
            }
            None => Ok(frame.this.clone()),
        }
    }
}
