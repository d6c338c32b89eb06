//! Value accessors: `get_value` / `set_value` and the object-op surface
//! they sit on (`object_get`, `object_put_with_receiver`, `has_property`).
//!
//! Fast paths first — tagged-integer indices into fast arrays, the lookup
//! cache for named data properties — then the general prototype-chain walk
//! handling accessors and proxy traps. Property access on `null` or
//! `undefined` raises `TypeError` with the base and property embedded in
//! the message when error messages are enabled.

use quill_asm::ErrorKind;

use super::Interpreter;
use crate::convert::{to_prop_key, to_string};
use crate::error::RuntimeError;
use crate::heap::ObjectId;
use crate::object::{Object, ObjectKind, Property, PropertyFlags, PropertyKey};
use crate::value::Value;

/// Outcome of one chain-walk step, copied out of the heap borrow.
enum Step {
    Value(Value),
    Getter(Option<ObjectId>),
    Setter {
        set: Option<ObjectId>,
    },
    DataSlot {
        holder: ObjectId,
        writable: bool,
    },
    Proxy {
        target: ObjectId,
        handler: ObjectId,
    },
    Continue(Option<ObjectId>),
}

impl Interpreter {
    /// `HasProperty`: own-or-inherited, data walk; proxies forward to their
    /// target.
    pub fn has_property(&self, mut id: ObjectId, key: &PropertyKey) -> bool {
        loop {
            let object = self.heap.get(id);
            match &object.kind {
                ObjectKind::Proxy { target, .. } => {
                    id = *target;
                    continue;
                }
                ObjectKind::Array { elements } => {
                    match key {
                        PropertyKey::Index(i) => {
                            if let Some(element) = elements.get(*i as usize) {
                                if !matches!(element, Value::ArrayHole) {
                                    return true;
                                }
                            }
                        }
                        PropertyKey::Str(s) if s.as_ref() == "length" => return true,
                        _ => {}
                    }
                }
                _ => {}
            }
            if object.own_property(key).is_some() {
                return true;
            }
            match object.prototype {
                Some(proto) => id = proto,
                None => return false,
            }
        }
    }

    /// `[[Get]]` with an explicit receiver for accessor and proxy
    /// re-dispatch.
    pub fn object_get(
        &mut self,
        id: ObjectId,
        key: &PropertyKey,
        receiver: &Value,
    ) -> Result<Value, RuntimeError> {
        let mut current = id;
        loop {
            let step = self.classify_get(current, key);
            match step {
                Step::Value(value) => return Ok(value),
                Step::Getter(Some(getter)) => {
                    let getter = Value::Object(getter);
                    return self.function_call(&getter, receiver.clone(), &[]);
                }
                Step::Getter(None) => return Ok(Value::Undefined),
                Step::Proxy { target, handler } => {
                    let trap = self.object_get(
                        handler,
                        &PropertyKey::from_str_key("get"),
                        &Value::Object(handler),
                    )?;
                    if trap.is_undefined() {
                        current = target;
                        continue;
                    }
                    let args = [Value::Object(target), key.to_value(), receiver.clone()];
                    return self.function_call(&trap, Value::Object(handler), &args);
                }
                Step::Continue(Some(proto)) => current = proto,
                Step::Continue(None) => return Ok(Value::Undefined),
                Step::DataSlot { .. } | Step::Setter { .. } => unreachable!("get classification"),
            }
        }
    }

    fn classify_get(&self, id: ObjectId, key: &PropertyKey) -> Step {
        let object = self.heap.get(id);
        match &object.kind {
            ObjectKind::Proxy { target, handler } => {
                return Step::Proxy {
                    target: *target,
                    handler: *handler,
                };
            }
            ObjectKind::Array { elements } => match key {
                PropertyKey::Index(i) => {
                    if let Some(element) = elements.get(*i as usize) {
                        // Holes defer to the prototype chain.
                        if !matches!(element, Value::ArrayHole) {
                            return Step::Value(element.clone());
                        }
                    }
                }
                PropertyKey::Str(s) if s.as_ref() == "length" => {
                    return Step::Value(Value::make_int32(elements.len() as i32));
                }
                _ => {}
            },
            ObjectKind::Collection { items } => {
                if let PropertyKey::Index(i) = key {
                    if let Some(item) = items.get(*i as usize) {
                        return Step::Value(item.clone());
                    }
                }
            }
            _ => {}
        }
        match object.own_property(key) {
            Some(Property::Data { value, .. }) => Step::Value(value.clone()),
            Some(Property::Accessor { get, .. }) => Step::Getter(*get),
            None => Step::Continue(object.prototype),
        }
    }

    /// `[[Set]]` with receiver semantics: inherited writable data slots and
    /// missing properties create an own property on the receiver.
    pub fn object_put_with_receiver(
        &mut self,
        id: ObjectId,
        key: &PropertyKey,
        value: Value,
        receiver: &Value,
        strict: bool,
    ) -> Result<(), RuntimeError> {
        let mut current = id;
        loop {
            let step = self.classify_put(current, key);
            match step {
                Step::Setter { set: Some(setter) } => {
                    let setter = Value::Object(setter);
                    self.function_call(&setter, receiver.clone(), &[value])?;
                    return Ok(());
                }
                Step::Setter { set: None } => {
                    return if strict {
                        Err(self.throw(
                            ErrorKind::Type,
                            format!("cannot set property {} (getter only)", key.to_value()),
                        ))
                    } else {
                        Ok(())
                    };
                }
                Step::DataSlot { holder, writable } => {
                    if !writable {
                        return if strict {
                            Err(self.throw(
                                ErrorKind::Type,
                                format!("cannot assign to read-only property {}", key.to_value()),
                            ))
                        } else {
                            Ok(())
                        };
                    }
                    let receiver_id = match receiver.as_object() {
                        Some(rid) => rid,
                        None => return Ok(()),
                    };
                    if holder == receiver_id {
                        self.write_own(holder, key, value);
                        return Ok(());
                    }
                    return self.create_own_data(receiver_id, key, value, strict);
                }
                Step::Proxy { target, handler } => {
                    let trap = self.object_get(
                        handler,
                        &PropertyKey::from_str_key("set"),
                        &Value::Object(handler),
                    )?;
                    if trap.is_undefined() {
                        current = target;
                        continue;
                    }
                    let args = [
                        Value::Object(target),
                        key.to_value(),
                        value,
                        receiver.clone(),
                    ];
                    self.function_call(&trap, Value::Object(handler), &args)?;
                    return Ok(());
                }
                Step::Continue(Some(proto)) => current = proto,
                Step::Continue(None) => {
                    let receiver_id = match receiver.as_object() {
                        Some(rid) => rid,
                        None => return Ok(()),
                    };
                    return self.create_own_data(receiver_id, key, value, strict);
                }
                Step::Value(_) | Step::Getter(_) => unreachable!("put classification"),
            }
        }
    }

    fn classify_put(&self, id: ObjectId, key: &PropertyKey) -> Step {
        let object = self.heap.get(id);
        match &object.kind {
            ObjectKind::Proxy { target, handler } => {
                return Step::Proxy {
                    target: *target,
                    handler: *handler,
                };
            }
            ObjectKind::Array { elements } => match key {
                PropertyKey::Index(i) if (*i as usize) < elements.len() => {
                    return Step::DataSlot {
                        holder: id,
                        writable: true,
                    };
                }
                PropertyKey::Str(s) if s.as_ref() == "length" => {
                    return Step::DataSlot {
                        holder: id,
                        writable: true,
                    };
                }
                _ => {}
            },
            _ => {}
        }
        match object.own_property(key) {
            Some(Property::Data { flags, .. }) => Step::DataSlot {
                holder: id,
                writable: flags.contains(PropertyFlags::WRITABLE),
            },
            Some(Property::Accessor { set, .. }) => Step::Setter { set: *set },
            None => Step::Continue(object.prototype),
        }
    }

    /// Unconditional own write: array element storage (including appends
    /// past the dense end and `length` resizes) or a named data slot.
    fn write_own(&mut self, id: ObjectId, key: &PropertyKey, value: Value) {
        if let PropertyKey::Index(i) = key {
            if let Some(elements) = self.heap.get_mut(id).elements_mut() {
                let index = *i as usize;
                if index < elements.len() {
                    elements[index] = value;
                } else {
                    elements.resize(index, Value::ArrayHole);
                    elements.push(value);
                }
                return;
            }
        }
        if let PropertyKey::Str(s) = key {
            if s.as_ref() == "length" && self.array_length_write(id, &value).is_some() {
                return;
            }
        }
        if let Some(Property::Data { value: slot, .. }) =
            self.heap.get_mut(id).own_property_mut(key)
        {
            *slot = value;
        } else {
            self.heap.define_property(id, key.clone(), Property::data(value));
        }
    }

    /// Install an own data property on the receiver; new slots require an
    /// extensible receiver.
    fn create_own_data(
        &mut self,
        id: ObjectId,
        key: &PropertyKey,
        value: Value,
        strict: bool,
    ) -> Result<(), RuntimeError> {
        let exists = self.heap.get(id).own_property(key).is_some()
            || matches!(
                (&self.heap.get(id).kind, key),
                (ObjectKind::Array { .. }, PropertyKey::Index(_))
            );
        if !exists && !self.heap.get(id).extensible {
            return if strict {
                Err(self.throw(
                    ErrorKind::Type,
                    format!("cannot add property {}, object is not extensible", key.to_value()),
                ))
            } else {
                Ok(())
            };
        }
        self.write_own(id, key, value);
        Ok(())
    }

    /// Handle `length` assignment on fast arrays; `None` when `id` is not
    /// an array.
    fn array_length_write(&mut self, id: ObjectId, value: &Value) -> Option<usize> {
        let new_len = value.as_number()? as usize;
        let elements = self.heap.get_mut(id).elements_mut()?;
        if new_len <= elements.len() {
            elements.truncate(new_len);
        } else {
            elements.resize(new_len, Value::ArrayHole);
        }
        Some(new_len)
    }

    /// `ToObject`: wrapper cells for primitives, `TypeError` for
    /// `null`/`undefined`.
    pub fn to_object(&mut self, value: &Value) -> Result<ObjectId, RuntimeError> {
        match value {
            Value::Object(id) => Ok(*id),
            Value::Undefined | Value::Null => Err(self.throw(
                ErrorKind::Type,
                format!("cannot convert {value} to object"),
            )),
            primitive => Ok(self.heap.alloc(Object::new(
                ObjectKind::PrimitiveWrapper(primitive.clone()),
                None,
            ))),
        }
    }

    /// `get_value(object, property)`: fast array path, cached named
    /// lookup, then the general object read.
    pub fn get_value(&mut self, base: &Value, prop: &Value) -> Result<Value, RuntimeError> {
        if let Value::Object(id) = base {
            // Tagged-int index into a fast array.
            if let Some(index) = prop.as_array_index() {
                if let Some(elements) = self.heap.get(*id).elements() {
                    if let Some(element) = elements.get(index as usize) {
                        if !matches!(element, Value::ArrayHole) {
                            return Ok(element.clone());
                        }
                    }
                }
            }
            let key = to_prop_key(&self.heap, prop);
            #[cfg(feature = "lookup-cache")]
            if let PropertyKey::Str(name) = &key {
                if let Some(value) = self.cache_lookup(*id, name) {
                    return Ok(value);
                }
            }
            let value = self.object_get(*id, &key, base)?;
            #[cfg(feature = "lookup-cache")]
            self.cache_fill(*id, &key);
            return Ok(value);
        }

        if base.is_undefined() || base.is_null() {
            return Err(self.throw(
                ErrorKind::Type,
                format!("cannot read property {prop} of {base}"),
            ));
        }

        self.get_value_primitive_base(base, prop)
    }

    /// Property reads on primitive bases; without the builtin library only
    /// string length/indexing observe anything.
    fn get_value_primitive_base(
        &mut self,
        base: &Value,
        prop: &Value,
    ) -> Result<Value, RuntimeError> {
        if let Value::Str(s) = base {
            let key = to_prop_key(&self.heap, prop);
            match key {
                PropertyKey::Str(name) if name.as_ref() == "length" => {
                    return Ok(Value::make_int32(s.chars().count() as i32));
                }
                PropertyKey::Index(i) => {
                    return Ok(s
                        .chars()
                        .nth(i as usize)
                        .map(|c| Value::from(c.to_string().as_str()))
                        .unwrap_or_default());
                }
                _ => {}
            }
        }
        Ok(Value::Undefined)
    }

    #[cfg(feature = "lookup-cache")]
    fn cache_lookup(&self, id: ObjectId, name: &str) -> Option<Value> {
        let slot = self.cache.lookup(id, name, self.heap.version())?;
        let (key, property) = self.heap.get(id).property_at(slot)?;
        match (key, property) {
            (PropertyKey::Str(s), Property::Data { value, .. }) if s.as_ref() == name => {
                Some(value.clone())
            }
            _ => None,
        }
    }

    #[cfg(feature = "lookup-cache")]
    fn cache_fill(&mut self, id: ObjectId, key: &PropertyKey) {
        if let PropertyKey::Str(name) = key {
            if let Some(slot) = self.heap.get(id).slot_of(key) {
                if matches!(
                    self.heap.get(id).property_at(slot),
                    Some((_, Property::Data { .. }))
                ) {
                    self.cache.fill(id, name.clone(), slot, self.heap.version());
                }
            }
        }
    }

    /// `set_value(base, property, value, strict)`. Lexical
    /// environment bases route to `set_mutable_binding`; primitive bases
    /// coerce to a non-extensible wrapper so the write cannot stick.
    pub fn set_value(
        &mut self,
        base: &Value,
        prop: &Value,
        value: Value,
        strict: bool,
    ) -> Result<(), RuntimeError> {
        match base {
            Value::Object(id) => {
                if matches!(self.heap.get(*id).kind, ObjectKind::Environment(_)) {
                    let name = to_string(&self.heap, prop);
                    return self.set_mutable_binding(*id, &name, value, strict);
                }
                let key = to_prop_key(&self.heap, prop);
                self.object_put_with_receiver(*id, &key, value, base, strict)
            }
            Value::Undefined | Value::Null => Err(self.throw(
                ErrorKind::Type,
                format!("cannot set property {prop} of {base}"),
            )),
            primitive => {
                let wrapper = self.to_object(primitive)?;
                self.heap.get_mut(wrapper).extensible = false;
                let key = to_prop_key(&self.heap, prop);
                let receiver = Value::Object(wrapper);
                self.object_put_with_receiver(wrapper, &key, value, &receiver, strict)
            }
        }
    }

    /// `delete base[prop]`; non-configurable properties fail (throwing in
    /// strict mode).
    pub fn delete_property_value(
        &mut self,
        base: &Value,
        prop: &Value,
        strict: bool,
    ) -> Result<bool, RuntimeError> {
        let id = match base {
            Value::Object(id) => *id,
            Value::Undefined | Value::Null => {
                return Err(self.throw(
                    ErrorKind::Type,
                    format!("cannot delete property {prop} of {base}"),
                ));
            }
            _ => return Ok(true),
        };
        let key = to_prop_key(&self.heap, prop);

        if let PropertyKey::Index(i) = key {
            if let Some(elements) = self.heap.get_mut(id).elements_mut() {
                if let Some(slot) = elements.get_mut(i as usize) {
                    *slot = Value::ArrayHole;
                    self.heap.bump_version();
                    return Ok(true);
                }
            }
        }

        match self.heap.get(id).own_property(&key) {
            None => Ok(true),
            Some(property) if property.flags().contains(PropertyFlags::CONFIGURABLE) => {
                Ok(self.heap.delete_property(id, &key))
            }
            Some(_) => {
                if strict {
                    Err(self.throw(
                        ErrorKind::Type,
                        format!("cannot delete non-configurable property {}", key.to_value()),
                    ))
                } else {
                    Ok(false)
                }
            }
        }
    }

    /// `instanceof`: walk the left prototype chain towards the callee's
    /// `prototype`.
    pub fn instanceof_value(
        &mut self,
        left: &Value,
        right: &Value,
    ) -> Result<bool, RuntimeError> {
        let ctor = match right.as_object() {
            Some(id) if self.heap.get(id).is_callable() => id,
            _ => {
                return Err(self.throw(
                    ErrorKind::Type,
                    format!("right-hand side of instanceof ({right}) is not callable"),
                ));
            }
        };
        let prototype = self.object_get(
            ctor,
            &PropertyKey::from_str_key("prototype"),
            &Value::Object(ctor),
        )?;
        let target = match prototype.as_object() {
            Some(id) => id,
            None => return Ok(false),
        };
        let mut current = match left.as_object() {
            Some(id) => self.heap.get(id).prototype,
            None => return Ok(false),
        };
        while let Some(id) = current {
            if id == target {
                return Ok(true);
            }
            current = self.heap.get(id).prototype;
        }
        Ok(false)
    }

    /// `in`: `HasProperty` on an object right-hand side.
    pub fn in_value(&mut self, left: &Value, right: &Value) -> Result<bool, RuntimeError> {
        match right.as_object() {
            Some(id) => {
                let key = to_prop_key(&self.heap, left);
                Ok(self.has_property(id, &key))
            }
            None => Err(self.throw(
                ErrorKind::Type,
                format!("cannot use 'in' operator on {right}"),
            )),
        }
    }
}
