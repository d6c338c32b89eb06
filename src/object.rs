//! Object cells and property storage.
//!
//! Property storage internals stay behind the accessor surface the
//! interpreter consumes (`object_get`, `object_put_with_receiver`, …, in
//! `interpreter/accessors.rs`); this module only defines the cells and
//! their shape-level operations. Properties keep insertion order; canonical
//! array indices are normalized into [`PropertyKey::Index`] so `o[0]` and
//! `o["0"]` address one slot.

use std::rc::Rc;

use quill_asm::{CodeUnit, ErrorKind};

use crate::env::EnvRecord;
use crate::error::RuntimeError;
use crate::heap::ObjectId;
use crate::interpreter::Frame;
use crate::value::{Symbol, Value};

bitflags::bitflags! {
    /// Property attribute set.
    pub struct PropertyFlags: u8 {
        const WRITABLE = 0x01;
        const ENUMERABLE = 0x02;
        const CONFIGURABLE = 0x04;
    }
}

impl PropertyFlags {
    /// Attributes of an ordinary assignment or literal property.
    pub const fn data_default() -> Self {
        Self::from_bits_truncate(0x07)
    }
}

/// Property key, canonicalized: strings that spell a uint32 index become
/// [`PropertyKey::Index`].
#[derive(Debug, Clone, PartialEq)]
pub enum PropertyKey {
    Index(u32),
    Str(Rc<str>),
    Sym(Symbol),
}

impl PropertyKey {
    /// Key from a string, collapsing canonical numeric forms.
    pub fn from_str_key(s: &str) -> Self {
        match s.parse::<u32>() {
            // "00" and "+1" parse but are not canonical index spellings.
            Ok(i) if i.to_string() == s => Self::Index(i),
            _ => Self::Str(Rc::from(s)),
        }
    }

    pub fn from_rc_str(s: Rc<str>) -> Self {
        match s.parse::<u32>() {
            Ok(i) if i.to_string() == s.as_ref() => Self::Index(i),
            _ => Self::Str(s),
        }
    }

    /// Script-observable name of this key.
    pub fn to_value(&self) -> Value {
        match self {
            Self::Index(i) => Value::Str(Rc::from(i.to_string().as_str())),
            Self::Str(s) => Value::Str(s.clone()),
            Self::Sym(sym) => Value::Sym(sym.clone()),
        }
    }
}

/// An own property: plain data or an accessor pair.
#[derive(Debug, Clone)]
pub enum Property {
    Data {
        value: Value,
        flags: PropertyFlags,
    },
    Accessor {
        get: Option<ObjectId>,
        set: Option<ObjectId>,
        flags: PropertyFlags,
    },
}

impl Property {
    pub fn data(value: Value) -> Self {
        Self::Data {
            value,
            flags: PropertyFlags::data_default(),
        }
    }

    pub const fn flags(&self) -> PropertyFlags {
        match self {
            Self::Data { flags, .. } | Self::Accessor { flags, .. } => *flags,
        }
    }

    pub const fn is_enumerable(&self) -> bool {
        self.flags().contains(PropertyFlags::ENUMERABLE)
    }
}

/// Classification of a function cell.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FunctionKind {
    /// Ordinary function or method.
    Normal,
    /// Arrow function: no own `this`, not constructable.
    Arrow,
    /// Generator body: calls package a suspended frame.
    Generator,
    /// Async body: completions settle a promise record.
    Async,
    /// Base class constructor.
    BaseConstructor,
    /// Derived class constructor: `this` stays uninitialized until
    /// `super()` runs.
    DerivedConstructor,
}

/// Byte-code function cell.
#[derive(Debug, Clone)]
pub struct FunctionData {
    pub code: Rc<CodeUnit>,
    /// Closure environment captured at creation.
    pub scope: ObjectId,
    pub kind: FunctionKind,
    /// `[[HomeObject]]` for `super` references.
    pub home_object: Option<ObjectId>,
    /// Captured `this` for arrow functions.
    pub lexical_this: Option<Box<Value>>,
    pub name: Option<Rc<str>>,
}

/// Host function signature. The interpreter is passed back in so hooks can
/// allocate and re-enter script code.
pub type NativeFn = fn(
    &mut crate::interpreter::Interpreter,
    Value,
    &[Value],
) -> Result<Value, RuntimeError>;

/// Execution state of a generator object.
#[derive(Debug)]
pub enum GeneratorState {
    /// Waiting for the next resumption; owns the saved frame. `started`
    /// distinguishes the first resumption (which enters the body) from a
    /// resumption at a `yield` (which receives the sent value).
    Suspended { frame: Box<Frame>, started: bool },
    /// Currently executing; re-entry raises TypeError.
    Running,
    Done,
}

/// Settled state of a minimal promise record (see `ReturnPromise`).
#[derive(Debug, Clone)]
pub enum PromiseState {
    Fulfilled(Value),
    Rejected(Value),
}

/// Cell subtype, stored in the cell header.
#[derive(Debug)]
pub enum ObjectKind {
    Plain,
    /// Wrapper produced by coercing a primitive base.
    PrimitiveWrapper(Value),
    /// Fast array: dense integer-indexed slots, possibly holding
    /// [`Value::ArrayHole`].
    Array { elements: Vec<Value> },
    Function(FunctionData),
    NativeFunction { func: NativeFn, name: &'static str },
    Bound {
        target: ObjectId,
        bound_this: Value,
        bound_args: Vec<Value>,
    },
    /// Lexical environment record (declarative or object-bound).
    Environment(EnvRecord),
    Proxy { target: ObjectId, handler: ObjectId },
    Error { kind: ErrorKind },
    Generator(GeneratorState),
    /// Internal iterator over a fast array (`for-of`, destructuring).
    ArrayIterator { array: ObjectId, index: u32 },
    /// Ordered value buffer backing spread-call argument materialization.
    Collection { items: Vec<Value> },
    Promise(PromiseState),
}

/// A heap cell.
#[derive(Debug)]
pub struct Object {
    pub kind: ObjectKind,
    pub prototype: Option<ObjectId>,
    pub extensible: bool,
    props: Vec<(PropertyKey, Property)>,
}

impl Object {
    pub fn new(kind: ObjectKind, prototype: Option<ObjectId>) -> Self {
        Self {
            kind,
            prototype,
            extensible: true,
            props: Vec::new(),
        }
    }

    pub fn own_property(&self, key: &PropertyKey) -> Option<&Property> {
        self.props.iter().find(|(k, _)| k == key).map(|(_, p)| p)
    }

    pub fn own_property_mut(&mut self, key: &PropertyKey) -> Option<&mut Property> {
        self.props
            .iter_mut()
            .find(|(k, _)| k == key)
            .map(|(_, p)| p)
    }

    /// Insert or overwrite an own property; returns `true` when the shape
    /// changed (a new slot was created).
    pub fn define(&mut self, key: PropertyKey, property: Property) -> bool {
        match self.own_property_mut(&key) {
            Some(slot) => {
                *slot = property;
                false
            }
            None => {
                self.props.push((key, property));
                true
            }
        }
    }

    /// Remove an own property; returns whether one existed.
    pub fn remove(&mut self, key: &PropertyKey) -> bool {
        let before = self.props.len();
        self.props.retain(|(k, _)| k != key);
        self.props.len() != before
    }

    /// Own property slot position, used by the lookup cache.
    pub fn slot_of(&self, key: &PropertyKey) -> Option<usize> {
        self.props.iter().position(|(k, _)| k == key)
    }

    /// Property stored at a cached slot position.
    pub fn property_at(&self, slot: usize) -> Option<&(PropertyKey, Property)> {
        self.props.get(slot)
    }

    /// Own enumerable keys in property order; fast-array element indices
    /// come first.
    pub fn own_enumerable_keys(&self) -> Vec<PropertyKey> {
        let mut keys = Vec::new();
        if let ObjectKind::Array { elements } = &self.kind {
            for (i, element) in elements.iter().enumerate() {
                if !matches!(element, Value::ArrayHole) {
                    keys.push(PropertyKey::Index(i as u32));
                }
            }
        }
        keys.extend(
            self.props
                .iter()
                .filter(|(_, p)| p.is_enumerable())
                .filter(|(k, _)| !matches!(k, PropertyKey::Sym(_)))
                .map(|(k, _)| k.clone()),
        );
        keys
    }

    /// Whether this cell can be invoked.
    pub fn is_callable(&self) -> bool {
        matches!(
            self.kind,
            ObjectKind::Function(_) | ObjectKind::NativeFunction { .. } | ObjectKind::Bound { .. }
        )
    }

    /// Whether this cell can be a `new` target.
    pub fn is_constructor(&self) -> bool {
        match &self.kind {
            ObjectKind::Function(data) => !matches!(
                data.kind,
                FunctionKind::Arrow | FunctionKind::Generator | FunctionKind::Async
            ),
            ObjectKind::NativeFunction { .. } | ObjectKind::Bound { .. } => true,
            _ => false,
        }
    }

    /// Fast-array elements, when this is a fast array.
    pub fn elements(&self) -> Option<&Vec<Value>> {
        match &self.kind {
            ObjectKind::Array { elements } => Some(elements),
            _ => None,
        }
    }

    pub fn elements_mut(&mut self) -> Option<&mut Vec<Value>> {
        match &mut self.kind {
            ObjectKind::Array { elements } => Some(elements),
            _ => None,
        }
    }

    pub fn function_data(&self) -> Option<&FunctionData> {
        match &self.kind {
            ObjectKind::Function(data) => Some(data),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn string_keys_collapse_to_canonical_indices() {
        assert_eq!(PropertyKey::from_str_key("0"), PropertyKey::Index(0));
        assert_eq!(PropertyKey::from_str_key("42"), PropertyKey::Index(42));
        assert!(matches!(PropertyKey::from_str_key("00"), PropertyKey::Str(_)));
        assert!(matches!(PropertyKey::from_str_key("+1"), PropertyKey::Str(_)));
        assert!(matches!(PropertyKey::from_str_key("-0"), PropertyKey::Str(_)));
        assert!(matches!(PropertyKey::from_str_key("x"), PropertyKey::Str(_)));
    }

    #[test]
    fn properties_keep_insertion_order() {
        let mut object = Object::new(ObjectKind::Plain, None);
        object.define(PropertyKey::from_str_key("b"), Property::data(Value::Int(1)));
        object.define(PropertyKey::from_str_key("a"), Property::data(Value::Int(2)));
        object.define(PropertyKey::Index(0), Property::data(Value::Int(3)));

        let keys = object.own_enumerable_keys();
        assert_eq!(keys[0], PropertyKey::from_str_key("b"));
        assert_eq!(keys[1], PropertyKey::from_str_key("a"));
        assert_eq!(keys[2], PropertyKey::Index(0));
    }

    #[test]
    fn redefinition_keeps_the_original_slot() {
        let mut object = Object::new(ObjectKind::Plain, None);
        assert!(object.define(PropertyKey::from_str_key("x"), Property::data(Value::Int(1))));
        assert!(!object.define(PropertyKey::from_str_key("x"), Property::data(Value::Int(2))));
        assert_eq!(object.slot_of(&PropertyKey::from_str_key("x")), Some(0));
    }

    #[test]
    fn array_element_keys_precede_named_keys() {
        let mut object = Object::new(
            ObjectKind::Array {
                elements: vec![Value::Int(10), Value::ArrayHole, Value::Int(30)],
            },
            None,
        );
        object.define(PropertyKey::from_str_key("tag"), Property::data(Value::Null));

        let keys = object.own_enumerable_keys();
        assert_eq!(
            keys,
            vec![
                PropertyKey::Index(0),
                PropertyKey::Index(2),
                PropertyKey::from_str_key("tag"),
            ]
        );
    }
}
