//! Object arena.
//!
//! Objects (plain objects, arrays, functions, lexical environments,
//! proxies, generators) live in a flat arena addressed by [`ObjectId`];
//! values reference them by index, which keeps identity comparisons cheap
//! and sidesteps pointer lifetimes in cyclic object/environment graphs.
//! Cycle collection is the embedder's concern: the arena only grows within
//! one execution, mirroring the external-GC contract.

use core::fmt;

use crate::object::{Object, ObjectKind, Property, PropertyKey};
use crate::value::Value;

/// Index of a heap cell.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectId(u32);

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

impl ObjectId {
    /// Raw index, used by the lookup cache to derive slot hashes.
    pub const fn index(self) -> usize {
        self.0 as usize
    }
}

/// Arena of object cells.
#[derive(Debug, Default)]
pub struct Heap {
    cells: Vec<Object>,
    /// Bumped on every property deletion or shape mutation; the lookup
    /// cache treats entries from older versions as stale.
    version: u64,
}

impl Heap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn alloc(&mut self, object: Object) -> ObjectId {
        let id = ObjectId(self.cells.len() as u32);
        self.cells.push(object);
        id
    }

    pub fn get(&self, id: ObjectId) -> &Object {
        &self.cells[id.index()]
    }

    pub fn get_mut(&mut self, id: ObjectId) -> &mut Object {
        &mut self.cells[id.index()]
    }

    pub const fn version(&self) -> u64 {
        self.version
    }

    /// Record a shape mutation (property insertion order change, deletion,
    /// attribute flip) for cache invalidation.
    pub fn bump_version(&mut self) {
        self.version += 1;
    }

    /// Fresh plain object.
    pub fn alloc_plain(&mut self, prototype: Option<ObjectId>) -> ObjectId {
        self.alloc(Object::new(ObjectKind::Plain, prototype))
    }

    /// Fresh empty fast array.
    pub fn alloc_array(&mut self, elements: Vec<Value>) -> ObjectId {
        self.alloc(Object::new(ObjectKind::Array { elements }, None))
    }

    /// Define a data property, bumping the version when the shape changes.
    pub fn define_property(&mut self, id: ObjectId, key: PropertyKey, property: Property) {
        let fresh = self.get_mut(id).define(key, property);
        if fresh {
            self.bump_version();
        }
    }

    /// Delete an own property; returns whether one was removed.
    pub fn delete_property(&mut self, id: ObjectId, key: &PropertyKey) -> bool {
        let removed = self.get_mut(id).remove(key);
        if removed {
            self.bump_version();
        }
        removed
    }
}
