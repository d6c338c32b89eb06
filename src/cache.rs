//! Direct-mapped property lookup cache.
//!
//! Keyed by (object cell, property name); a hit short-circuits the own-
//! property scan in `get_value` for data properties. Entries are validated
//! against the heap version: any shape mutation or deletion anywhere
//! invalidates the whole cache, which keeps correctness trivial at the cost
//! of extra misses after writes.

#![cfg(feature = "lookup-cache")]

use std::rc::Rc;

use crate::consts::LOOKUP_CACHE_SIZE;
use crate::heap::ObjectId;

#[derive(Debug, Clone)]
struct CacheEntry {
    object: ObjectId,
    name: Rc<str>,
    /// Own-property slot position recorded at fill time.
    slot: usize,
    version: u64,
}

/// The cache proper; one per interpreter.
#[derive(Debug)]
pub struct LookupCache {
    entries: Vec<Option<CacheEntry>>,
}

impl Default for LookupCache {
    fn default() -> Self {
        Self {
            entries: vec![None; LOOKUP_CACHE_SIZE],
        }
    }
}

impl LookupCache {
    fn bucket(object: ObjectId, name: &str) -> usize {
        let mut hash = object.index().wrapping_mul(0x9E37_79B9);
        for b in name.as_bytes() {
            hash = hash.wrapping_mul(31).wrapping_add(*b as usize);
        }
        hash % LOOKUP_CACHE_SIZE
    }

    /// Cached own-property slot for (object, name), if still valid.
    pub fn lookup(&self, object: ObjectId, name: &str, version: u64) -> Option<usize> {
        let entry = self.entries[Self::bucket(object, name)].as_ref()?;
        (entry.version == version && entry.object == object && entry.name.as_ref() == name)
            .then_some(entry.slot)
    }

    /// Record a successful data-property lookup.
    pub fn fill(&mut self, object: ObjectId, name: Rc<str>, slot: usize, version: u64) {
        let bucket = Self::bucket(object, &name);
        self.entries[bucket] = Some(CacheEntry {
            object,
            name,
            slot,
            version,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::heap::Heap;

    #[test]
    fn hit_requires_matching_version() {
        let mut heap = Heap::new();
        let id = heap.alloc_plain(None);
        let mut cache = LookupCache::default();
        let name: Rc<str> = Rc::from("x");

        cache.fill(id, name.clone(), 3, heap.version());
        assert_eq!(cache.lookup(id, "x", heap.version()), Some(3));

        heap.bump_version();
        assert_eq!(cache.lookup(id, "x", heap.version()), None);
    }

    #[test]
    fn collisions_replace_the_bucket() {
        let mut heap = Heap::new();
        let id = heap.alloc_plain(None);
        let mut cache = LookupCache::default();

        cache.fill(id, Rc::from("x"), 0, heap.version());
        cache.fill(id, Rc::from("x"), 5, heap.version());
        assert_eq!(cache.lookup(id, "x", heap.version()), Some(5));
    }
}
