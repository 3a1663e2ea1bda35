// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright (c) 2025 Pegasus Heavy Industries, LLC

//! Module registry
//!
//! The runtime never creates module records itself. It asks a
//! [`ModuleRegistry`] to turn an id into an instantiated record.
//! [`BundleRegistry`] is the in-memory implementation: module factories
//! registered by id, backed by a [`ModuleCache`].

use crate::context::ContextEntry;
use crate::error::{Result, RuntimeError};
use crate::module::{Module, ModuleId, ModuleRef};
use crate::runtime::{BundleRuntime, ModuleScope};
use crate::value::Value;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use std::sync::Arc;

/// Source of instantiated module records
pub trait ModuleRegistry: Send + Sync {
    /// Return the record for `id`, instantiating it on first reference
    ///
    /// Fails with a lookup error for unknown ids. A failure raised while the
    /// module body ran is captured on the record, not returned.
    fn instantiate(
        &self,
        runtime: &BundleRuntime,
        id: &ModuleId,
        parent: Option<&ModuleRef>,
    ) -> Result<ModuleRef>;

    /// Require the module behind a context descriptor
    fn context_require(
        &self,
        runtime: &BundleRuntime,
        entry: &ContextEntry,
        parent: &ModuleRef,
    ) -> Result<Value> {
        let module = self.instantiate(runtime, &entry.id, Some(parent))?;
        let module = module.read();
        if let Some(err) = &module.error {
            return Err(err.clone());
        }
        Ok(module.exports())
    }
}

/// Thread-safe cache of instantiated modules
pub struct ModuleCache {
    modules: DashMap<ModuleId, ModuleRef>,
}

impl ModuleCache {
    /// Create a new empty cache
    pub fn new() -> Self {
        Self {
            modules: DashMap::new(),
        }
    }

    /// Get a cached module
    pub fn get(&self, id: &ModuleId) -> Option<ModuleRef> {
        self.modules.get(id).map(|entry| Arc::clone(entry.value()))
    }

    /// Return the cached module, or insert the one `create` builds
    ///
    /// The flag tells whether this call inserted it.
    pub fn get_or_insert_with(
        &self,
        id: &ModuleId,
        create: impl FnOnce() -> ModuleRef,
    ) -> (ModuleRef, bool) {
        match self.modules.entry(id.clone()) {
            Entry::Occupied(entry) => (Arc::clone(entry.get()), false),
            Entry::Vacant(entry) => {
                let module = create();
                entry.insert(Arc::clone(&module));
                (module, true)
            }
        }
    }

    /// Clear the entire cache
    pub fn clear(&self) {
        self.modules.clear();
    }

    /// Get the number of cached modules
    pub fn len(&self) -> usize {
        self.modules.len()
    }

    /// Check if the cache is empty
    pub fn is_empty(&self) -> bool {
        self.modules.is_empty()
    }
}

impl Default for ModuleCache {
    fn default() -> Self {
        Self::new()
    }
}

/// Body of a packaged module
pub type ModuleFactory = Arc<dyn Fn(&ModuleScope) -> Result<()> + Send + Sync>;

/// In-memory registry of module factories
#[derive(Default)]
pub struct BundleRegistry {
    factories: DashMap<ModuleId, ModuleFactory>,
    cache: ModuleCache,
}

impl BundleRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the body of module `id`, replacing any earlier one
    pub fn register<F>(&self, id: impl Into<ModuleId>, factory: F)
    where
        F: Fn(&ModuleScope) -> Result<()> + Send + Sync + 'static,
    {
        let id = id.into();
        tracing::trace!("Registered module factory {}", id);
        self.factories.insert(id, Arc::new(factory));
    }

    /// Whether a factory is registered for `id`
    pub fn is_registered(&self, id: &ModuleId) -> bool {
        self.factories.contains_key(id)
    }

    /// Registered ids, sorted
    pub fn ids(&self) -> Vec<ModuleId> {
        let mut ids: Vec<ModuleId> = self.factories.iter().map(|f| f.key().clone()).collect();
        ids.sort();
        ids
    }

    /// The instantiated record for `id`, if any
    pub fn module(&self, id: &ModuleId) -> Option<ModuleRef> {
        self.cache.get(id)
    }

    /// The module cache
    pub fn cache(&self) -> &ModuleCache {
        &self.cache
    }

    /// Drop every instantiated record; factories stay registered
    pub fn clear(&self) {
        tracing::debug!("Clearing {} instantiated module(s)", self.cache.len());
        self.cache.clear();
    }
}

fn link(parent: Option<&ModuleRef>, module: &ModuleRef) {
    let Some(parent) = parent else {
        return;
    };
    if Arc::ptr_eq(parent, module) {
        return;
    }
    let child_id = module.read().id.clone();
    let parent_id = {
        let mut parent = parent.write();
        if !parent.children.contains(&child_id) {
            parent.children.push(child_id);
        }
        parent.id.clone()
    };
    let mut module = module.write();
    if !module.parents.contains(&parent_id) {
        module.parents.push(parent_id);
    }
}

impl ModuleRegistry for BundleRegistry {
    fn instantiate(
        &self,
        runtime: &BundleRuntime,
        id: &ModuleId,
        parent: Option<&ModuleRef>,
    ) -> Result<ModuleRef> {
        if let Some(module) = self.cache.get(id) {
            link(parent, &module);
            return Ok(module);
        }

        let factory = self
            .factories
            .get(id)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or_else(|| RuntimeError::module_not_found(id))?;

        let exports = runtime.realm().new_object();
        let (module, created) = self.cache.get_or_insert_with(id, || {
            Module::new(id.clone(), Value::Object(exports.clone())).into_ref()
        });
        link(parent, &module);
        if !created {
            return Ok(module);
        }

        tracing::debug!("Instantiating module {}", id);
        let scope = ModuleScope::new(runtime.clone(), Arc::clone(&module), exports);
        if let Err(err) = factory(&scope) {
            tracing::debug!("Module {} failed: {}", id, err);
            module.write().error = Some(err);
        }
        module.write().loaded = true;
        Ok(module)
    }
}
