// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright (c) 2025 Pegasus Heavy Industries, LLC

//! Object model shared by every packaged module
//!
//! Exports are plain [`Value`]s. Objects carry an insertion-ordered property
//! table where each property is either a data slot or a lazily evaluated
//! getter, plus an optional parent level (the prototype) that the interop
//! walk follows.

use crate::async_module::AsyncModuleValue;
use crate::config::BaseLevel;
use crate::deferred::Deferred;
use crate::exports::ReexportView;
use indexmap::IndexMap;
use parking_lot::RwLock;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

/// Unique ID generator for objects
static OBJECT_ID_COUNTER: AtomicU64 = AtomicU64::new(1);

/// A lazily evaluated export accessor
pub type Getter = Arc<dyn Fn() -> Value + Send + Sync>;

/// Wrap a closure as a [`Getter`]
pub fn getter<F, V>(f: F) -> Getter
where
    F: Fn() -> V + Send + Sync + 'static,
    V: Into<Value>,
{
    Arc::new(move || f().into())
}

/// A single own property
#[derive(Clone)]
pub enum Property {
    /// Plain value slot
    Data {
        /// Stored value
        value: Value,
        /// Whether the property shows up in key enumeration
        enumerable: bool,
    },
    /// Getter-backed slot, evaluated on every read
    Accessor {
        /// The getter
        getter: Getter,
        /// Whether the property shows up in key enumeration
        enumerable: bool,
    },
}

impl Property {
    fn enumerable(&self) -> bool {
        match self {
            Property::Data { enumerable, .. } | Property::Accessor { enumerable, .. } => *enumerable,
        }
    }

    fn read(&self) -> Value {
        match self {
            Property::Data { value, .. } => value.clone(),
            Property::Accessor { getter, .. } => getter(),
        }
    }
}

impl fmt::Debug for Property {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Property::Data { value, .. } => write!(f, "{:?}", value),
            Property::Accessor { .. } => write!(f, "[Getter]"),
        }
    }
}

/// What kind of base an object is
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ObjectKind {
    /// Ordinary object
    Ordinary,
    /// Array (indexed properties plus a hidden `length`)
    Array,
    /// Function object; only its properties are modeled
    Function,
}

struct Object {
    id: u64,
    kind: ObjectKind,
    proto: Option<ObjectRef>,
    properties: IndexMap<String, Property>,
}

/// Shared handle to an object
#[derive(Clone)]
pub struct ObjectRef(Arc<RwLock<Object>>);

impl ObjectRef {
    /// Create an object of the given kind with the given parent level
    pub fn new(kind: ObjectKind, proto: Option<ObjectRef>) -> Self {
        Self(Arc::new(RwLock::new(Object {
            id: OBJECT_ID_COUNTER.fetch_add(1, Ordering::SeqCst),
            kind,
            proto,
            properties: IndexMap::new(),
        })))
    }

    /// Create an ordinary object with no parent level
    pub fn null_prototype() -> Self {
        Self::new(ObjectKind::Ordinary, None)
    }

    /// Unique object identity
    pub fn id(&self) -> u64 {
        self.0.read().id
    }

    /// The object's kind
    pub fn kind(&self) -> ObjectKind {
        self.0.read().kind
    }

    /// The parent level, if any
    pub fn prototype(&self) -> Option<ObjectRef> {
        self.0.read().proto.clone()
    }

    /// Identity comparison
    pub fn ptr_eq(&self, other: &ObjectRef) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }

    /// Whether the object owns a property of this name
    pub fn has_own(&self, key: &str) -> bool {
        self.0.read().properties.contains_key(key)
    }

    /// All own property names in insertion order, enumerable or not
    pub fn own_keys(&self) -> Vec<String> {
        self.0.read().properties.keys().cloned().collect()
    }

    /// Own enumerable property names in insertion order
    pub fn keys(&self) -> Vec<String> {
        self.0
            .read()
            .properties
            .iter()
            .filter(|(_, prop)| prop.enumerable())
            .map(|(key, _)| key.clone())
            .collect()
    }

    /// Read an own property, evaluating its getter
    pub fn get_own(&self, key: &str) -> Option<Value> {
        // Getters may read this same object; release the lock first.
        let prop = self.0.read().properties.get(key).cloned();
        prop.map(|prop| prop.read())
    }

    /// Read a property, following the parent chain
    pub fn get(&self, key: &str) -> Value {
        let mut current = Some(self.clone());
        while let Some(obj) = current {
            if let Some(value) = obj.get_own(key) {
                return value;
            }
            current = obj.prototype();
        }
        Value::Undefined
    }

    /// Assign an enumerable data property
    ///
    /// Returns false when the name is held by an own getter, which has no
    /// setter and is left untouched.
    pub fn set(&self, key: impl Into<String>, value: impl Into<Value>) -> bool {
        let key = key.into();
        let mut obj = self.0.write();
        if let Some(Property::Accessor { .. }) = obj.properties.get(&key) {
            return false;
        }
        obj.properties.insert(
            key,
            Property::Data {
                value: value.into(),
                enumerable: true,
            },
        );
        true
    }

    /// Define (or redefine) a getter-backed property
    pub fn define_getter(&self, key: impl Into<String>, getter: Getter, enumerable: bool) {
        self.0
            .write()
            .properties
            .insert(key.into(), Property::Accessor { getter, enumerable });
    }

    /// Define a non-enumerable data property
    pub fn define_hidden(&self, key: impl Into<String>, value: impl Into<Value>) {
        self.0.write().properties.insert(
            key.into(),
            Property::Data {
                value: value.into(),
                enumerable: false,
            },
        );
    }
}

impl fmt::Debug for ObjectRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let obj = self.0.read();
        f.debug_struct("Object")
            .field("id", &obj.id)
            .field("kind", &obj.kind)
            .field("keys", &obj.properties.keys().collect::<Vec<_>>())
            .finish()
    }
}

/// A runtime value as seen by module bodies
#[derive(Clone, Default)]
pub enum Value {
    /// undefined
    #[default]
    Undefined,
    /// null
    Null,
    /// Boolean value
    Boolean(bool),
    /// Number (IEEE 754 double)
    Number(f64),
    /// String
    String(String),
    /// Object reference
    Object(ObjectRef),
    /// Re-export view over a primary exports object and its sources
    View(ReexportView),
    /// Plain deferred value
    Deferred(Deferred),
    /// Deferred value carrying async module capabilities
    AsyncModule(AsyncModuleValue),
}

impl Value {
    /// Returns true if this value is undefined.
    pub fn is_undefined(&self) -> bool {
        matches!(self, Value::Undefined)
    }

    /// Returns true if this value is nullish (null or undefined).
    pub fn is_nullish(&self) -> bool {
        matches!(self, Value::Undefined | Value::Null)
    }

    /// Returns true for values that hold properties (objects and views).
    pub fn is_object_like(&self) -> bool {
        matches!(self, Value::Object(_) | Value::View(_))
    }

    /// Returns true for deferred values, async-capable or not.
    pub fn is_deferred(&self) -> bool {
        matches!(self, Value::Deferred(_) | Value::AsyncModule(_))
    }

    /// Returns true for deferred values that have not settled yet.
    pub fn is_pending(&self) -> bool {
        self.as_deferred().is_some_and(|d| d.is_pending())
    }

    /// The underlying deferred value, if any.
    pub fn as_deferred(&self) -> Option<&Deferred> {
        match self {
            Value::Deferred(deferred) => Some(deferred),
            Value::AsyncModule(module) => Some(module.deferred()),
            _ => None,
        }
    }

    /// The async module capabilities, if any.
    pub fn as_async_module(&self) -> Option<&AsyncModuleValue> {
        match self {
            Value::AsyncModule(module) => Some(module),
            _ => None,
        }
    }

    /// The object, if this is one.
    pub fn as_object(&self) -> Option<&ObjectRef> {
        match self {
            Value::Object(obj) => Some(obj),
            _ => None,
        }
    }

    /// Read a property. Non-object values have no properties.
    pub fn get(&self, key: &str) -> Value {
        match self {
            Value::Object(obj) => obj.get(key),
            Value::View(view) => view.get(key),
            _ => Value::Undefined,
        }
    }

    /// Own enumerable keys. Non-object values have none.
    pub fn keys(&self) -> Vec<String> {
        match self {
            Value::Object(obj) => obj.keys(),
            Value::View(view) => view.keys(),
            _ => Vec::new(),
        }
    }

    /// Whether the value carries the namespace-convention marker.
    pub fn has_module_marker(&self) -> bool {
        self.get(crate::exports::MODULE_MARKER).to_boolean()
    }

    /// Converts the value to a boolean (ToBoolean).
    pub fn to_boolean(&self) -> bool {
        match self {
            Value::Undefined | Value::Null => false,
            Value::Boolean(b) => *b,
            Value::Number(n) => !n.is_nan() && *n != 0.0,
            Value::String(s) => !s.is_empty(),
            Value::Object(_) | Value::View(_) | Value::Deferred(_) | Value::AsyncModule(_) => true,
        }
    }

    /// Returns the type of this value as a string.
    pub fn type_of(&self) -> &'static str {
        match self {
            Value::Undefined => "undefined",
            Value::Null => "object",
            Value::Boolean(_) => "boolean",
            Value::Number(_) => "number",
            Value::String(_) => "string",
            Value::Object(obj) if obj.kind() == ObjectKind::Function => "function",
            Value::Object(_) | Value::View(_) | Value::Deferred(_) | Value::AsyncModule(_) => {
                "object"
            }
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Undefined, Value::Undefined) => true,
            (Value::Null, Value::Null) => true,
            (Value::Boolean(a), Value::Boolean(b)) => a == b,
            (Value::Number(a), Value::Number(b)) => a == b,
            (Value::String(a), Value::String(b)) => a == b,
            (Value::Object(a), Value::Object(b)) => a.ptr_eq(b),
            (Value::View(a), Value::View(b)) => a.ptr_eq(b),
            (Value::Deferred(a), Value::Deferred(b)) => a.ptr_eq(b),
            (Value::AsyncModule(a), Value::AsyncModule(b)) => a.deferred().ptr_eq(b.deferred()),
            _ => false,
        }
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Undefined => write!(f, "undefined"),
            Value::Null => write!(f, "null"),
            Value::Boolean(b) => write!(f, "{}", b),
            Value::Number(n) => write!(f, "{}", n),
            Value::String(s) => write!(f, "{:?}", s),
            Value::Object(obj) => write!(f, "{:?}", obj),
            Value::View(view) => write!(f, "{:?}", view),
            Value::Deferred(deferred) => write!(f, "{:?}", deferred),
            Value::AsyncModule(module) => write!(f, "AsyncModule({:?})", module.deferred()),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Undefined => write!(f, "undefined"),
            Value::Null => write!(f, "null"),
            Value::Boolean(b) => write!(f, "{}", b),
            Value::Number(n) => write!(f, "{}", n),
            Value::String(s) => write!(f, "{}", s),
            Value::Object(obj) if obj.kind() == ObjectKind::Function => write!(f, "[Function]"),
            Value::Object(obj) if obj.kind() == ObjectKind::Array => write!(f, "[Array]"),
            Value::Object(_) | Value::View(_) => write!(f, "[object Object]"),
            Value::Deferred(_) | Value::AsyncModule(_) => write!(f, "[object Promise]"),
        }
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Boolean(b)
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Value::Number(n)
    }
}

impl From<i32> for Value {
    fn from(n: i32) -> Self {
        Value::Number(n as f64)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

impl From<ObjectRef> for Value {
    fn from(obj: ObjectRef) -> Self {
        Value::Object(obj)
    }
}

impl From<Deferred> for Value {
    fn from(deferred: Deferred) -> Self {
        Value::Deferred(deferred)
    }
}

/// The base levels every object chain ends in
///
/// Objects created through the realm inherit from one of these. The interop
/// walk stops at whichever of them the configuration names.
#[derive(Debug, Clone)]
pub struct Realm {
    object_prototype: ObjectRef,
    array_prototype: ObjectRef,
    function_prototype: ObjectRef,
}

impl Realm {
    /// Create a realm with fresh base levels
    pub fn new() -> Self {
        let object_prototype = ObjectRef::null_prototype();
        let array_prototype = ObjectRef::new(ObjectKind::Array, Some(object_prototype.clone()));
        let function_prototype =
            ObjectRef::new(ObjectKind::Function, Some(object_prototype.clone()));
        Self {
            object_prototype,
            array_prototype,
            function_prototype,
        }
    }

    /// The base object for a level
    pub fn base(&self, level: BaseLevel) -> &ObjectRef {
        match level {
            BaseLevel::Object => &self.object_prototype,
            BaseLevel::Array => &self.array_prototype,
            BaseLevel::Function => &self.function_prototype,
        }
    }

    /// Create an empty ordinary object
    pub fn new_object(&self) -> ObjectRef {
        ObjectRef::new(ObjectKind::Ordinary, Some(self.object_prototype.clone()))
    }

    /// Create an ordinary object inheriting from `proto`
    pub fn new_object_with_proto(&self, proto: &ObjectRef) -> ObjectRef {
        ObjectRef::new(ObjectKind::Ordinary, Some(proto.clone()))
    }

    /// Create an array holding `items`
    pub fn new_array(&self, items: impl IntoIterator<Item = Value>) -> ObjectRef {
        let array = ObjectRef::new(ObjectKind::Array, Some(self.array_prototype.clone()));
        let mut len = 0;
        for (index, item) in items.into_iter().enumerate() {
            array.set(index.to_string(), item);
            len = index + 1;
        }
        array.define_hidden("length", len as f64);
        array
    }

    /// Create a function object (only its properties are modeled)
    pub fn new_function(&self) -> ObjectRef {
        ObjectRef::new(ObjectKind::Function, Some(self.function_prototype.clone()))
    }
}

impl Default for Realm {
    fn default() -> Self {
        Self::new()
    }
}
