// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright (c) 2025 Pegasus Heavy Industries, LLC

//! Context requirer
//!
//! A glob import is compiled into a static map from request keys to module
//! descriptors. [`ModuleContext`] exposes that map as a callable dictionary;
//! nothing is ever scanned at runtime.

use crate::deferred::Deferred;
use crate::error::{Result, RuntimeError};
use crate::module::{ModuleId, ModuleRef};
use crate::runtime::BundleRuntime;
use crate::value::Value;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Descriptor of one module reachable through a context
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContextEntry {
    /// Module id the key maps to
    pub id: ModuleId,
}

impl ContextEntry {
    /// Create a descriptor
    pub fn new(id: impl Into<ModuleId>) -> Self {
        Self { id: id.into() }
    }
}

/// Static context map, in the order the packager emitted it
pub type ContextMap = IndexMap<String, ContextEntry>;

/// Callable dictionary over a [`ContextMap`]
#[derive(Clone)]
pub struct ModuleContext {
    runtime: BundleRuntime,
    source: ModuleRef,
    map: Arc<ContextMap>,
}

impl ModuleContext {
    /// Create a context for `source`
    pub fn new(runtime: BundleRuntime, source: ModuleRef, map: ContextMap) -> Self {
        Self {
            runtime,
            source,
            map: Arc::new(map),
        }
    }

    fn entry(&self, key: &str) -> Result<&ContextEntry> {
        self.map
            .get(key)
            .ok_or_else(|| RuntimeError::ContextKeyNotFound(key.to_string()))
    }

    /// Require the module behind `key`
    pub fn call(&self, key: &str) -> Result<Value> {
        let entry = self.entry(key)?;
        tracing::trace!("Context require '{}' -> {}", key, entry.id);
        self.runtime
            .registry()
            .context_require(&self.runtime, entry, &self.source)
    }

    /// Every key, in map order
    pub fn keys(&self) -> Vec<String> {
        self.map.keys().cloned().collect()
    }

    /// The module id behind `key`, without instantiating it
    pub fn resolve(&self, key: &str) -> Result<ModuleId> {
        Ok(self.entry(key)?.id.clone())
    }

    /// Require the module behind `key` as a deferred value
    ///
    /// Lookup and module failures reject; deferred exports are adopted.
    pub fn import(&self, key: &str) -> Deferred {
        match self.call(key) {
            Ok(exports) => match exports.as_deferred() {
                Some(deferred) => deferred.map(|value| value),
                None => Deferred::resolved(exports),
            },
            Err(err) => Deferred::rejected(err),
        }
    }

    /// Whether `key` is in the map
    pub fn contains(&self, key: &str) -> bool {
        self.map.contains_key(key)
    }

    /// Number of keys
    pub fn len(&self) -> usize {
        self.map.len()
    }

    /// Whether the map is empty
    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }
}

impl std::fmt::Debug for ModuleContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModuleContext")
            .field("source", &self.source.read().id)
            .field("keys", &self.map.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{BundleRegistry, RuntimeConfig, context_map};

    fn fixture() -> (Arc<BundleRegistry>, BundleRuntime, ModuleRef) {
        let registry = Arc::new(BundleRegistry::new());
        registry.register("./x", |scope| scope.set_exports_value(Value::from("x")));
        registry.register("./y", |scope| scope.set_exports_value(Value::from("y")));
        registry.register("entry", |_| Ok(()));
        let runtime = BundleRuntime::new(registry.clone(), RuntimeConfig::default());
        let entry = runtime.instantiate(&ModuleId::from("entry"), None).unwrap();
        (registry, runtime, entry)
    }

    #[test]
    fn test_keys_in_map_order() {
        let (_, runtime, entry) = fixture();
        let context = runtime.build_context(&entry, context_map! { "./y" => "./y", "./x" => "./x" });
        assert_eq!(context.keys(), vec!["./y", "./x"]);
        assert_eq!(context.len(), 2);
    }

    #[test]
    fn test_call_requires_module() {
        let (_, runtime, entry) = fixture();
        let context = runtime.build_context(&entry, context_map! { "./x" => "./x" });
        assert_eq!(context.call("./x").unwrap(), Value::from("x"));
        assert!(entry.read().children.contains(&ModuleId::from("./x")));
    }

    #[test]
    fn test_unknown_key_is_lookup_error() {
        let (_, runtime, entry) = fixture();
        let context = runtime.build_context(&entry, context_map! { "./x" => "./x" });
        let err = context.call("./z").unwrap_err();
        assert!(err.is_lookup_error());
        assert_eq!(err.to_string(), "Cannot find module './z'");
        assert_eq!(context.resolve("./z").unwrap_err(), err);
    }

    #[test]
    fn test_resolve_does_not_instantiate() {
        let (registry, runtime, entry) = fixture();
        let context = runtime.build_context(&entry, context_map! { "./x" => "./x" });
        assert_eq!(context.resolve("./x").unwrap(), ModuleId::from("./x"));
        assert!(registry.module(&ModuleId::from("./x")).is_none());
    }

    #[test]
    fn test_import_settles() {
        let (_, runtime, entry) = fixture();
        let context = runtime.build_context(&entry, context_map! { "./y" => "./y" });
        assert_eq!(context.import("./y").peek(), Some(Ok(Value::from("y"))));
        let missing = context.import("./nope").peek().unwrap();
        assert!(missing.unwrap_err().is_lookup_error());
    }
}
