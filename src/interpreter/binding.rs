//! Identifier resolution and binding management.
//!
//! Covers the binding opcode family (create/init/check/assign), the
//! reference triples produced by `IdentReference`, direct-eval `var`
//! installation past block scopes, and the `PUT_IDENT` write path shared by
//! the dispatch loop's result routing.

use std::rc::Rc;

use quill_asm::ErrorKind;

use super::{Frame, Interpreter};
use crate::consts::SCOPE_CHAIN_LIMIT;
use crate::convert::type_of;
use crate::env::{self, Binding, EnvKind};
use crate::error::RuntimeError;
use crate::heap::ObjectId;
use crate::object::{Property, PropertyFlags, PropertyKey};
use crate::value::Value;

/// Where an identifier resolved.
#[derive(Debug, Clone, Copy)]
pub(crate) enum BindingLocation {
    /// Named binding of a declarative record.
    Declarative(ObjectId),
    /// Property of an object-bound record's object. `with` records expose
    /// their object as the implicit receiver; the global record does not.
    Object {
        env: ObjectId,
        object: ObjectId,
        with: bool,
    },
}

/// Binding kinds created by the `Create*Binding` opcodes, with their
/// per-kind attribute sets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum BindingKind {
    Var,
    Let,
    Const,
}

impl Interpreter {
    /// Walk the environment chain for `name`. Raises `RangeError` when the
    /// chain exceeds the scope-chain limit.
    pub(crate) fn resolve_binding(
        &mut self,
        mut env: ObjectId,
        name: &str,
    ) -> Result<Option<BindingLocation>, RuntimeError> {
        for _ in 0..SCOPE_CHAIN_LIMIT {
            let record = env::env_record(&self.heap, env);
            match &record.kind {
                EnvKind::Declarative { .. } => {
                    if record.binding(name).is_some() {
                        return Ok(Some(BindingLocation::Declarative(env)));
                    }
                }
                EnvKind::ObjectBound { object, with } => {
                    if self.has_property(*object, &PropertyKey::from_str_key(name)) {
                        return Ok(Some(BindingLocation::Object {
                            env,
                            object: *object,
                            with: *with,
                        }));
                    }
                }
            }
            match record.outer {
                Some(outer) => env = outer,
                None => return Ok(None),
            }
        }
        Err(self.throw(ErrorKind::Range, "scope chain index overflow".into()))
    }

    /// Read through a binding location; temporal-dead-zone reads raise
    /// `ReferenceError`.
    pub(crate) fn get_binding_value(
        &mut self,
        location: BindingLocation,
        name: &str,
    ) -> Result<Value, RuntimeError> {
        match location {
            BindingLocation::Declarative(env) => {
                let binding = env::env_record(&self.heap, env)
                    .binding(name)
                    .expect("resolved binding disappeared");
                if binding.is_initialized() {
                    Ok(binding.value.clone())
                } else {
                    Err(self.throw(
                        ErrorKind::Reference,
                        format!("cannot access '{name}' before initialization"),
                    ))
                }
            }
            BindingLocation::Object { object, .. } => {
                let receiver = Value::Object(object);
                self.object_get(object, &PropertyKey::from_str_key(name), &receiver)
            }
        }
    }

    /// `set_mutable_binding` starting at `env`: immutable bindings raise
    /// `TypeError`, TDZ writes raise `ReferenceError`, unresolved names
    /// raise `ReferenceError` in strict code and install a global property
    /// otherwise.
    pub(crate) fn set_mutable_binding(
        &mut self,
        env: ObjectId,
        name: &str,
        value: Value,
        strict: bool,
    ) -> Result<(), RuntimeError> {
        match self.resolve_binding(env, name)? {
            Some(BindingLocation::Declarative(found)) => {
                let binding = env::env_record(&self.heap, found)
                    .binding(name)
                    .expect("resolved binding disappeared");
                if !binding.is_initialized() {
                    return Err(self.throw(
                        ErrorKind::Reference,
                        format!("cannot access '{name}' before initialization"),
                    ));
                }
                if !binding.mutable {
                    return Err(self.throw(
                        ErrorKind::Type,
                        format!("assignment to constant variable '{name}'"),
                    ));
                }
                env::env_record_mut(&mut self.heap, found)
                    .binding_mut(name)
                    .expect("resolved binding disappeared")
                    .value = value;
                Ok(())
            }
            Some(BindingLocation::Object { object, .. }) => {
                let receiver = Value::Object(object);
                self.object_put_with_receiver(
                    object,
                    &PropertyKey::from_str_key(name),
                    value,
                    &receiver,
                    strict,
                )
            }
            None if strict => Err(self.throw(
                ErrorKind::Reference,
                format!("'{name}' is not defined"),
            )),
            None => {
                let receiver = Value::Object(self.global_object);
                self.object_put_with_receiver(
                    self.global_object,
                    &PropertyKey::from_str_key(name),
                    value,
                    &receiver,
                    false,
                )
            }
        }
    }

    /// `IdentReference`: push the three-slot reference, either register-
    /// backed or environment-backed.
    pub(crate) fn ident_reference(
        &mut self,
        frame: &mut Frame,
        index: u16,
    ) -> Result<(), RuntimeError> {
        if frame.code.is_register_index(index) {
            let value = frame.registers[index as usize].clone();
            frame.push(Value::RegisterRef(index));
            frame.push(Value::Int(index as i32));
            frame.push(value);
            return Ok(());
        }
        let name = self.ident_name(frame, index);
        match self.resolve_binding(frame.lex_env, &name)? {
            Some(location @ BindingLocation::Declarative(env)) => {
                let value = self.get_binding_value(location, &name)?;
                frame.push(Value::Object(env));
                frame.push(Value::Str(name));
                frame.push(value);
                Ok(())
            }
            Some(location @ BindingLocation::Object { env, object, with }) => {
                let value = self.get_binding_value(location, &name)?;
                // A `with` base supplies the implicit receiver; other
                // object-bound records stay behind the environment cell so
                // call resolution sees no receiver.
                let base = if with {
                    Value::Object(object)
                } else {
                    Value::Object(env)
                };
                frame.push(base);
                frame.push(Value::Str(name));
                frame.push(value);
                Ok(())
            }
            None => Err(self.throw(
                ErrorKind::Reference,
                format!("'{name}' is not defined"),
            )),
        }
    }

    /// `typeof identifier`: unresolvable names yield `"undefined"` without
    /// raising.
    pub(crate) fn typeof_ident(
        &mut self,
        frame: &Frame,
        index: u16,
    ) -> Result<Value, RuntimeError> {
        if frame.code.is_register_index(index) {
            let value = frame.registers[index as usize].clone();
            return Ok(Value::from(type_of(&self.heap, &value)));
        }
        let name = self.ident_name(frame, index);
        match self.resolve_binding(frame.lex_env, &name)? {
            Some(location) => {
                let value = self.get_binding_value(location, &name)?;
                Ok(Value::from(type_of(&self.heap, &value)))
            }
            None => Ok(Value::from("undefined")),
        }
    }

    /// Identifier-name literal of the frame's code unit.
    pub(crate) fn ident_name(&self, frame: &Frame, index: u16) -> Rc<str> {
        frame
            .code
            .ident_name(index)
            .expect("literal index outside the identifier region")
            .clone()
    }

    /// `Create{Var,Let,Const}Binding` with the per-kind attribute sets.
    pub(crate) fn create_binding(
        &mut self,
        frame: &Frame,
        index: u16,
        kind: BindingKind,
    ) -> Result<(), RuntimeError> {
        let name = self.ident_name(frame, index);
        let env = frame.lex_env;
        match &env::env_record(&self.heap, env).kind {
            EnvKind::Declarative { .. } => {
                let exists = env::env_record(&self.heap, env).binding(&name).is_some();
                // Repeated `var` declarations share one binding.
                if exists && kind == BindingKind::Var {
                    return Ok(());
                }
                let binding = match kind {
                    BindingKind::Var => Binding::mutable(Value::Undefined),
                    BindingKind::Let => Binding::uninitialized(true),
                    BindingKind::Const => Binding::uninitialized(false),
                };
                env::env_record_mut(&mut self.heap, env).set_binding(name, binding);
                Ok(())
            }
            EnvKind::ObjectBound { object, .. } => {
                let object = *object;
                let key = PropertyKey::from_rc_str(name);
                if kind == BindingKind::Var && self.has_property(object, &key) {
                    return Ok(());
                }
                let (value, flags) = match kind {
                    // Global `var`: non-configurable data property.
                    BindingKind::Var => (
                        Value::Undefined,
                        PropertyFlags::WRITABLE | PropertyFlags::ENUMERABLE,
                    ),
                    BindingKind::Let => (
                        Value::Uninitialized,
                        PropertyFlags::WRITABLE | PropertyFlags::ENUMERABLE,
                    ),
                    BindingKind::Const => (Value::Uninitialized, PropertyFlags::ENUMERABLE),
                };
                self.heap
                    .define_property(object, key, Property::Data { value, flags });
                Ok(())
            }
        }
    }

    /// `InitBinding`: initialize (creating if necessary) with the popped
    /// value; used for function declarations and parameter seeding.
    pub(crate) fn init_binding(
        &mut self,
        frame: &Frame,
        index: u16,
        value: Value,
    ) -> Result<(), RuntimeError> {
        let name = self.ident_name(frame, index);
        let env = frame.lex_env;
        match &env::env_record(&self.heap, env).kind {
            EnvKind::Declarative { .. } => {
                let record = env::env_record_mut(&mut self.heap, env);
                match record.binding_mut(&name) {
                    Some(binding) => binding.value = value,
                    None => record.set_binding(name, Binding::mutable(value)),
                }
                Ok(())
            }
            EnvKind::ObjectBound { object, .. } => {
                let object = *object;
                let receiver = Value::Object(object);
                self.object_put_with_receiver(
                    object,
                    &PropertyKey::from_rc_str(name),
                    value,
                    &receiver,
                    false,
                )
            }
        }
    }

    /// `AssignLetConst`: fill an uninitialized slot in the current
    /// environment.
    pub(crate) fn assign_let_const(&mut self, frame: &Frame, index: u16, value: Value) {
        let name = self.ident_name(frame, index);
        let record = env::env_record_mut(&mut self.heap, frame.lex_env);
        let binding = record
            .binding_mut(&name)
            .expect("let/const binding was not created");
        debug_assert!(!binding.is_initialized());
        binding.value = value;
    }

    /// `CheckVar`: a conflicting lexical binding at the current scope
    /// raises `SyntaxError`.
    pub(crate) fn check_var(&mut self, frame: &Frame, index: u16) -> Result<(), RuntimeError> {
        let name = self.ident_name(frame, index);
        if let Some(binding) = env::env_record(&self.heap, frame.lex_env).binding(&name) {
            if !binding.is_initialized() || !binding.mutable {
                return Err(self.throw(
                    ErrorKind::Syntax,
                    format!("identifier '{name}' has already been declared"),
                ));
            }
        }
        Ok(())
    }

    /// `CheckLet`: any existing binding (or global own property at the
    /// global block scope) raises `SyntaxError`.
    pub(crate) fn check_let(&mut self, frame: &Frame, index: u16) -> Result<(), RuntimeError> {
        let name = self.ident_name(frame, index);
        let record = env::env_record(&self.heap, frame.lex_env);
        let conflicts = record.binding(&name).is_some()
            || (record.outer == Some(self.global_env)
                && self
                    .heap
                    .get(self.global_object)
                    .own_property(&PropertyKey::from_str_key(&name))
                    .is_some());
        if conflicts {
            return Err(self.throw(
                ErrorKind::Syntax,
                format!("identifier '{name}' has already been declared"),
            ));
        }
        Ok(())
    }

    /// `ThrowConstError`.
    pub(crate) fn throw_const_error(
        &mut self,
        frame: &Frame,
        index: u16,
    ) -> RuntimeError {
        let name = self.ident_name(frame, index);
        self.throw(
            ErrorKind::Type,
            format!("assignment to constant variable '{name}'"),
        )
    }

    /// `VarEval`: walk outward past block scopes and install a deletable
    /// `var` (non-enumerable when it lands on the global object).
    pub(crate) fn var_eval(
        &mut self,
        frame: &Frame,
        index: u16,
        init: Option<Value>,
    ) -> Result<(), RuntimeError> {
        let name = self.ident_name(frame, index);
        let scope = env::var_scope(&self.heap, frame.lex_env);
        match &env::env_record(&self.heap, scope).kind {
            EnvKind::Declarative { .. } => {
                let exists = env::env_record(&self.heap, scope).binding(&name).is_some();
                if !exists || init.is_some() {
                    let mut binding = Binding::mutable(init.unwrap_or_default());
                    binding.deletable = true;
                    env::env_record_mut(&mut self.heap, scope).set_binding(name, binding);
                }
                Ok(())
            }
            EnvKind::ObjectBound { object, .. } => {
                let object = *object;
                let key = PropertyKey::from_rc_str(name);
                let exists = self.heap.get(object).own_property(&key).is_some();
                if !exists || init.is_some() {
                    self.heap.define_property(
                        object,
                        key,
                        Property::Data {
                            value: init.unwrap_or_default(),
                            flags: PropertyFlags::WRITABLE | PropertyFlags::CONFIGURABLE,
                        },
                    );
                }
                Ok(())
            }
        }
    }

    /// `delete identifier` (non-strict only; the parser rejects it in
    /// strict code).
    pub(crate) fn delete_ident(
        &mut self,
        frame: &Frame,
        index: u16,
    ) -> Result<Value, RuntimeError> {
        let name = self.ident_name(frame, index);
        match self.resolve_binding(frame.lex_env, &name)? {
            None => Ok(Value::Bool(true)),
            Some(BindingLocation::Declarative(env)) => {
                let record = env::env_record(&self.heap, env);
                let deletable = record.binding(&name).is_some_and(|b| b.deletable);
                if deletable {
                    env::env_record_mut(&mut self.heap, env).remove_binding(&name);
                    Ok(Value::Bool(true))
                } else {
                    Ok(Value::Bool(false))
                }
            }
            Some(BindingLocation::Object { object, .. }) => {
                let base = Value::Object(object);
                let deleted =
                    self.delete_property_value(&base, &Value::Str(Rc::from(&*name)), false)?;
                Ok(Value::Bool(deleted))
            }
        }
    }

    /// `PUT_IDENT` routing: write `value` into the register or environment
    /// binding named by a literal index.
    pub(crate) fn put_ident_value(
        &mut self,
        frame: &mut Frame,
        index: u16,
        value: Value,
    ) -> Result<(), RuntimeError> {
        if frame.code.is_register_index(index) {
            frame.registers[index as usize] = value;
            return Ok(());
        }
        let name = self.ident_name(frame, index);
        let strict = frame.code.is_strict();
        self.set_mutable_binding(frame.lex_env, &name, value, strict)
    }
}
