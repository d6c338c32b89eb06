//! Iteration support: the iterator protocol consumed by `for-of`, spread
//! and destructuring, plus the `for-in` property-name snapshot.
//!
//! Fast arrays and strings iterate through an internal array iterator
//! without observable method calls; generators iterate through their own
//! resumption path; anything else duck-types on a callable `next` (the
//! builtin `@@iterator` machinery lives outside the core).

use itertools::Itertools;

use quill_asm::ErrorKind;

use super::Interpreter;
use crate::convert::to_boolean;
use crate::error::RuntimeError;
use crate::heap::ObjectId;
use crate::object::{Object, ObjectKind, PropertyKey};
use crate::value::Value;

impl Interpreter {
    /// `get_iterator` collaborator.
    pub(crate) fn get_iterator(&mut self, value: &Value) -> Result<Value, RuntimeError> {
        match value {
            Value::Object(id) => match &self.heap.get(*id).kind {
                ObjectKind::Array { .. } | ObjectKind::Collection { .. } => {
                    let iterator = self.heap.alloc(Object::new(
                        ObjectKind::ArrayIterator {
                            array: *id,
                            index: 0,
                        },
                        None,
                    ));
                    Ok(Value::Object(iterator))
                }
                ObjectKind::Generator(_) => Ok(value.clone()),
                _ => {
                    let next = self.object_get(*id, &PropertyKey::from_str_key("next"), value)?;
                    if self.is_callable(&next) {
                        Ok(value.clone())
                    } else {
                        Err(self.throw(
                            ErrorKind::Type,
                            format!("{value} is not iterable"),
                        ))
                    }
                }
            },
            Value::Str(s) => {
                let chars: Vec<Value> = s
                    .chars()
                    .map(|c| Value::from(c.to_string().as_str()))
                    .collect();
                let array = self.heap.alloc_array(chars);
                let iterator = self.heap.alloc(Object::new(
                    ObjectKind::ArrayIterator {
                        array,
                        index: 0,
                    },
                    None,
                ));
                Ok(Value::Object(iterator))
            }
            other => Err(self.throw(ErrorKind::Type, format!("{other} is not iterable"))),
        }
    }

    /// `iterator_step` + `iterator_value`: `None` when the iterator is
    /// exhausted.
    pub(crate) fn iterator_step(
        &mut self,
        iterator: &Value,
    ) -> Result<Option<Value>, RuntimeError> {
        let id = match iterator {
            Value::Object(id) => *id,
            other => {
                return Err(self.throw(ErrorKind::Type, format!("{other} is not an iterator")));
            }
        };
        if let ObjectKind::ArrayIterator { array, index } = &self.heap.get(id).kind {
            let (array, index) = (*array, *index);
            let element = self.collection_element(array, index);
            return Ok(match element {
                Some(value) => {
                    if let ObjectKind::ArrayIterator { index, .. } =
                        &mut self.heap.get_mut(id).kind
                    {
                        *index += 1;
                    }
                    Some(value)
                }
                None => None,
            });
        }

        let next = self.object_get(id, &PropertyKey::from_str_key("next"), iterator)?;
        if !self.is_callable(&next) {
            return Err(self.throw(
                ErrorKind::Type,
                format!("{iterator} is not an iterator"),
            ));
        }
        let result = self.function_call(&next, iterator.clone(), &[])?;
        let result_id = match result.as_object() {
            Some(rid) => rid,
            None => {
                return Err(self.throw(
                    ErrorKind::Type,
                    "iterator result is not an object".into(),
                ));
            }
        };
        let done = self.object_get(result_id, &PropertyKey::from_str_key("done"), &result)?;
        if to_boolean(&done) {
            return Ok(None);
        }
        let value = self.object_get(result_id, &PropertyKey::from_str_key("value"), &result)?;
        Ok(Some(value))
    }

    /// `iterator_close`: invoked by unwinding through a live `for-of` or
    /// destructuring iterator. Thrown errors from `return` are swallowed
    /// (the abrupt completion in flight wins); aborts propagate.
    pub(crate) fn iterator_close(&mut self, iterator: &Value) -> Result<(), RuntimeError> {
        let id = match iterator {
            Value::Object(id) => *id,
            _ => return Ok(()),
        };
        if matches!(self.heap.get(id).kind, ObjectKind::ArrayIterator { .. }) {
            return Ok(());
        }
        let ret = self.object_get(id, &PropertyKey::from_str_key("return"), iterator)?;
        if self.is_callable(&ret) {
            match self.function_call(&ret, iterator.clone(), &[]) {
                Ok(_) | Err(RuntimeError::Throw(_)) => {}
                Err(fatal) => return Err(fatal),
            }
        }
        Ok(())
    }

    /// Dense element of a fast array or collection cell.
    fn collection_element(&self, id: ObjectId, index: u32) -> Option<Value> {
        let items = match &self.heap.get(id).kind {
            ObjectKind::Array { elements } => elements,
            ObjectKind::Collection { items } => items,
            _ => return None,
        };
        items.get(index as usize).map(|value| match value {
            Value::ArrayHole => Value::Undefined,
            other => other.clone(),
        })
    }

    /// Drain an iterable into a vector (spread arguments, rest elements).
    pub(crate) fn iterate_collect(
        &mut self,
        value: &Value,
        out: &mut Vec<Value>,
    ) -> Result<(), RuntimeError> {
        let iterator = self.get_iterator(value)?;
        while let Some(item) = self.iterator_step(&iterator)? {
            out.push(item);
        }
        Ok(())
    }

    /// `for-in` snapshot: enumerable string-keyed property names of the
    /// object and its prototype chain, shadowed names deduplicated,
    /// in property order. `None` skips the loop entirely.
    pub(crate) fn for_in_snapshot(
        &mut self,
        value: &Value,
    ) -> Result<Option<(Vec<PropertyKey>, Value)>, RuntimeError> {
        if value.is_undefined() || value.is_null() {
            return Ok(None);
        }
        let id = self.to_object(value)?;
        let object_value = Value::Object(id);

        let mut keys = Vec::new();
        let mut current = Some(id);
        while let Some(cid) = current {
            let object = self.heap.get(cid);
            keys.extend(object.own_enumerable_keys());
            current = match &object.kind {
                ObjectKind::Proxy { target, .. } => Some(*target),
                _ => object.prototype,
            };
        }

        let keys = keys
            .into_iter()
            .unique_by(|key| match key {
                PropertyKey::Index(i) => i.to_string(),
                PropertyKey::Str(s) => s.to_string(),
                PropertyKey::Sym(_) => unreachable!("symbols are never enumerated"),
            })
            .collect();
        Ok(Some((keys, object_value)))
    }

    /// Advance a `for-in` snapshot past names no longer present on the
    /// object; returns the next name to visit.
    pub(crate) fn for_in_advance(
        &mut self,
        keys: &[PropertyKey],
        index: &mut usize,
        object: &Value,
    ) -> Option<PropertyKey> {
        let id = object.as_object()?;
        while let Some(key) = keys.get(*index) {
            *index += 1;
            if self.has_property(id, key) {
                return Some(key.clone());
            }
        }
        None
    }
}
