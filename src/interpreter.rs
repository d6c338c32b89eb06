//! [`Interpreter`] implementation

use std::rc::Rc;
use quill_asm::{CodeUnit, ErrorKind};

use crate::context::Context;
use crate::heap::{Heap, ObjectId};
use crate::object::{Object, ObjectKind, Property, PropertyFlags, PropertyKey};
use crate::value::Value;

#[cfg(feature = "lookup-cache")]
use crate::cache::LookupCache;

mod accessors;
mod alu;
mod binding;
mod class;
mod constructors;
mod context_stack;
mod executors;
mod flow;
mod frame;
mod iteration;
mod unwind;

pub use frame::{ContextKind, ContextRecord, Frame};

/// VM interpreter.
///
/// Owns the heap arena, the shared execution context and the realm roots
/// (global object and global environment). One interpreter is one
/// single-threaded execution context; frames are created per call and
/// driven by the executors.
#[derive(Debug)]
pub struct Interpreter {
    heap: Heap,
    context: Context,
    global_object: ObjectId,
    global_env: ObjectId,
    #[cfg(feature = "lookup-cache")]
    cache: LookupCache,
    /// Synthesized `constructor(){}` body.
    implicit_ctor_base: Rc<CodeUnit>,
    /// Synthesized `constructor(...args){super(...args)}` body.
    implicit_ctor_derived: Rc<CodeUnit>,
}

impl Interpreter {
    /// Returns the heap arena.
    pub fn heap(&self) -> &Heap {
        &self.heap
    }

    pub fn heap_mut(&mut self) -> &mut Heap {
        &mut self.heap
    }

    /// Shared execution context slots.
    pub fn context(&self) -> &Context {
        &self.context
    }

    pub fn context_mut(&mut self) -> &mut Context {
        &mut self.context
    }

    /// The realm's global object.
    pub const fn global_object(&self) -> ObjectId {
        self.global_object
    }

    /// The realm's global (object-bound) environment.
    pub const fn global_env(&self) -> ObjectId {
        self.global_env
    }

    /// Define a global binding, the hook hosts use to install collaborator
    /// objects before running code.
    pub fn set_global(&mut self, name: &str, value: Value) {
        self.heap.define_property(
            self.global_object,
            PropertyKey::from_str_key(name),
            Property::data(value),
        );
    }

    /// Allocate an error object of `kind`; the message is carried only when
    /// error messages are enabled.
    pub fn error_value(&mut self, kind: ErrorKind, message: String) -> Value {
        let error = self.heap.alloc(Object::new(ObjectKind::Error { kind }, None));
        self.heap.define_property(
            error,
            PropertyKey::from_str_key("name"),
            Property::Data {
                value: Value::from(kind.constructor_name()),
                flags: PropertyFlags::WRITABLE | PropertyFlags::CONFIGURABLE,
            },
        );
        #[cfg(feature = "error-messages")]
        self.heap.define_property(
            error,
            PropertyKey::from_str_key("message"),
            Property::Data {
                value: Value::from(message.as_str()),
                flags: PropertyFlags::WRITABLE | PropertyFlags::CONFIGURABLE,
            },
        );
        #[cfg(not(feature = "error-messages"))]
        let _ = message;
        Value::Object(error)
    }

    /// Raise a script error of `kind`; shorthand used throughout dispatch.
    pub(crate) fn throw(&mut self, kind: ErrorKind, message: String) -> crate::error::RuntimeError {
        let value = self.error_value(kind, message);
        crate::error::RuntimeError::Throw(value)
    }

    /// Kind of an error cell, when the value is one.
    pub fn error_kind_of(&self, value: &Value) -> Option<ErrorKind> {
        match value {
            Value::Object(id) => match self.heap.get(*id).kind {
                ObjectKind::Error { kind } => Some(kind),
                _ => None,
            },
            _ => None,
        }
    }
}
