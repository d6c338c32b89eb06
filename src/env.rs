//! Lexical environment records.
//!
//! Environments are object-typed heap cells ([`crate::object::ObjectKind::Environment`]).
//! Two kinds exist: declarative records hold named bindings for function,
//! block and class scopes; object-bound records wrap an object for `with`
//! statements and the global scope. Each record points at its outer record;
//! the root's outer is `None`. Block-flagged declarative records are
//! transparent to `var` hoisting.

use std::rc::Rc;

use crate::heap::{Heap, ObjectId};
use crate::object::{Object, ObjectKind};
use crate::value::Value;

/// A single named binding of a declarative record.
#[derive(Debug, Clone)]
pub struct Binding {
    /// [`Value::Uninitialized`] marks the temporal dead zone.
    pub value: Value,
    pub mutable: bool,
    /// Surfaced through `delete` in non-strict code (direct-eval vars).
    pub deletable: bool,
}

impl Binding {
    pub const fn mutable(value: Value) -> Self {
        Self {
            value,
            mutable: true,
            deletable: false,
        }
    }

    pub const fn immutable(value: Value) -> Self {
        Self {
            value,
            mutable: false,
            deletable: false,
        }
    }

    /// Declared but not yet initialized (let/const, derived `this`).
    pub const fn uninitialized(mutable: bool) -> Self {
        Self {
            value: Value::Uninitialized,
            mutable,
            deletable: false,
        }
    }

    pub const fn is_initialized(&self) -> bool {
        !matches!(self.value, Value::Uninitialized)
    }
}

/// Environment record payload.
#[derive(Debug)]
pub struct EnvRecord {
    pub outer: Option<ObjectId>,
    pub kind: EnvKind,
}

#[derive(Debug)]
pub enum EnvKind {
    Declarative {
        bindings: Vec<(Rc<str>, Binding)>,
        /// Block scopes are skipped when hoisting `var` declarations.
        block: bool,
    },
    ObjectBound {
        object: ObjectId,
        /// `with` environments supply their object as the implicit receiver.
        with: bool,
    },
}

impl EnvRecord {
    pub fn declarative(outer: Option<ObjectId>, block: bool) -> Self {
        Self {
            outer,
            kind: EnvKind::Declarative {
                bindings: Vec::new(),
                block,
            },
        }
    }

    pub fn object_bound(outer: Option<ObjectId>, object: ObjectId, with: bool) -> Self {
        Self {
            outer,
            kind: EnvKind::ObjectBound { object, with },
        }
    }

    pub fn binding(&self, name: &str) -> Option<&Binding> {
        match &self.kind {
            EnvKind::Declarative { bindings, .. } => bindings
                .iter()
                .find(|(n, _)| n.as_ref() == name)
                .map(|(_, b)| b),
            EnvKind::ObjectBound { .. } => None,
        }
    }

    pub fn binding_mut(&mut self, name: &str) -> Option<&mut Binding> {
        match &mut self.kind {
            EnvKind::Declarative { bindings, .. } => bindings
                .iter_mut()
                .find(|(n, _)| n.as_ref() == name)
                .map(|(_, b)| b),
            EnvKind::ObjectBound { .. } => None,
        }
    }

    /// Install a binding, replacing any previous one of the same name.
    pub fn set_binding(&mut self, name: Rc<str>, binding: Binding) {
        match &mut self.kind {
            EnvKind::Declarative { bindings, .. } => {
                match bindings.iter_mut().find(|(n, _)| *n == name) {
                    Some((_, slot)) => *slot = binding,
                    None => bindings.push((name, binding)),
                }
            }
            EnvKind::ObjectBound { .. } => {
                unreachable!("named bindings live on the wrapped object")
            }
        }
    }

    pub fn remove_binding(&mut self, name: &str) -> bool {
        match &mut self.kind {
            EnvKind::Declarative { bindings, .. } => {
                let before = bindings.len();
                bindings.retain(|(n, _)| n.as_ref() != name);
                bindings.len() != before
            }
            EnvKind::ObjectBound { .. } => false,
        }
    }

    pub const fn is_block(&self) -> bool {
        matches!(self.kind, EnvKind::Declarative { block: true, .. })
    }
}

/// Allocate a declarative environment cell.
pub fn create_decl_lex_env(heap: &mut Heap, outer: Option<ObjectId>, block: bool) -> ObjectId {
    heap.alloc(Object::new(
        ObjectKind::Environment(EnvRecord::declarative(outer, block)),
        None,
    ))
}

/// Allocate an object-bound environment cell.
pub fn create_object_lex_env(
    heap: &mut Heap,
    outer: Option<ObjectId>,
    object: ObjectId,
    with: bool,
) -> ObjectId {
    heap.alloc(Object::new(
        ObjectKind::Environment(EnvRecord::object_bound(outer, object, with)),
        None,
    ))
}

/// Environment record of a cell known to be an environment.
pub fn env_record(heap: &Heap, env: ObjectId) -> &EnvRecord {
    match &heap.get(env).kind {
        ObjectKind::Environment(record) => record,
        _ => unreachable!("value is not a lexical environment"),
    }
}

pub fn env_record_mut(heap: &mut Heap, env: ObjectId) -> &mut EnvRecord {
    match &mut heap.get_mut(env).kind {
        ObjectKind::Environment(record) => record,
        _ => unreachable!("value is not a lexical environment"),
    }
}

/// Nearest enclosing record that hoists `var` declarations: skips
/// block-flagged declarative records.
pub fn var_scope(heap: &Heap, mut env: ObjectId) -> ObjectId {
    loop {
        let record = env_record(heap, env);
        if !record.is_block() {
            return env;
        }
        env = record.outer.expect("block scope requires an outer scope");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn var_scope_skips_block_environments() {
        let mut heap = Heap::new();
        let root = create_decl_lex_env(&mut heap, None, false);
        let block = create_decl_lex_env(&mut heap, Some(root), true);
        let inner_block = create_decl_lex_env(&mut heap, Some(block), true);

        assert_eq!(var_scope(&heap, inner_block), root);
        assert_eq!(var_scope(&heap, root), root);
    }

    #[test]
    fn bindings_replace_in_place() {
        let mut record = EnvRecord::declarative(None, false);
        record.set_binding(Rc::from("x"), Binding::uninitialized(true));
        assert!(!record.binding("x").unwrap().is_initialized());

        record.binding_mut("x").unwrap().value = Value::Int(3);
        assert!(record.binding("x").unwrap().is_initialized());

        record.set_binding(Rc::from("x"), Binding::immutable(Value::Int(9)));
        let binding = record.binding("x").unwrap();
        assert!(!binding.mutable);
        assert_eq!(binding.value, Value::Int(9));
    }
}
