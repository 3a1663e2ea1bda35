// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright (c) 2025 Pegasus Heavy Industries, LLC

//! Bundle runtime and the calling contract exposed to module bodies

use crate::async_module::{AsyncModuleHandle, AsyncModuleValue, begin_async_module};
use crate::config::RuntimeConfig;
use crate::context::{ContextMap, ModuleContext};
use crate::error::Result;
use crate::exports::{self, Getters};
use crate::interop::{BaseSentinels, interop_exports, to_namespace};
use crate::module::{ModuleId, ModuleRef};
use crate::registry::ModuleRegistry;
use crate::value::{ObjectRef, Realm, Value};
use std::fmt;
use std::sync::Arc;

struct RuntimeInner {
    registry: Arc<dyn ModuleRegistry>,
    realm: Realm,
    sentinels: BaseSentinels,
    config: RuntimeConfig,
}

/// Shared runtime state for one bundle
///
/// Cheap to clone; clones share the registry, realm and configuration.
#[derive(Clone)]
pub struct BundleRuntime {
    inner: Arc<RuntimeInner>,
}

impl BundleRuntime {
    /// Create a runtime over `registry`
    pub fn new(registry: Arc<dyn ModuleRegistry>, config: RuntimeConfig) -> Self {
        let realm = Realm::new();
        let sentinels = BaseSentinels::from_realm(&realm, &config.interop.base_levels);
        tracing::debug!(
            "Bundle runtime created ({} interop base level(s))",
            sentinels.len()
        );
        Self {
            inner: Arc::new(RuntimeInner {
                registry,
                realm,
                sentinels,
                config,
            }),
        }
    }

    /// The module registry
    pub fn registry(&self) -> &Arc<dyn ModuleRegistry> {
        &self.inner.registry
    }

    /// The realm every module object is created in
    pub fn realm(&self) -> &Realm {
        &self.inner.realm
    }

    /// Levels the interop walk stops at
    pub fn sentinels(&self) -> &BaseSentinels {
        &self.inner.sentinels
    }

    /// The configuration
    pub fn config(&self) -> &RuntimeConfig {
        &self.inner.config
    }

    /// Instantiate `id` through the registry
    pub fn instantiate(&self, id: &ModuleId, parent: Option<&ModuleRef>) -> Result<ModuleRef> {
        self.inner.registry.instantiate(self, id, parent)
    }

    fn instantiate_checked(&self, id: &ModuleId, parent: Option<&ModuleRef>) -> Result<ModuleRef> {
        let module = self.instantiate(id, parent)?;
        if let Some(err) = module.read().error.clone() {
            return Err(err);
        }
        Ok(module)
    }

    /// Load an entry module and return its raw exports
    pub fn require(&self, id: impl Into<ModuleId>) -> Result<Value> {
        let module = self.instantiate_checked(&id.into(), None)?;
        let exports = module.read().exports();
        Ok(exports)
    }

    /// Namespace-style import of `id` from `source`
    ///
    /// The namespace is computed once and cached on the target. Pending
    /// exports yield a derived deferred namespace, cached the same way.
    pub fn import_namespace(&self, source: &ModuleRef, id: impl Into<ModuleId>) -> Result<Value> {
        let module = self.instantiate_checked(&id.into(), Some(source))?;
        let raw = {
            let record = module.read();
            if let Some(namespace) = record.namespace_object() {
                return Ok(namespace);
            }
            record.exports()
        };

        let namespace = if raw.is_pending() {
            interop_exports(&raw, self.sentinels())
        } else {
            Value::Object(to_namespace(&raw, raw.has_module_marker(), self.sentinels()))
        };
        let mut record = module.write();
        if let Some(existing) = record.namespace_object() {
            return Ok(existing);
        }
        record.set_namespace_object(namespace.clone());
        Ok(namespace)
    }

    /// Foreign-convention import of `id` from `source`: raw exports, no interop
    pub fn import_common_js(&self, source: &ModuleRef, id: impl Into<ModuleId>) -> Result<Value> {
        let module = self.instantiate_checked(&id.into(), Some(source))?;
        let exports = module.read().exports();
        Ok(exports)
    }

    /// Context requirer over a static map
    pub fn build_context(&self, source: &ModuleRef, map: ContextMap) -> ModuleContext {
        ModuleContext::new(self.clone(), Arc::clone(source), map)
    }

    /// Wrap `module` as an async module and run `body`
    pub fn begin_async_module<F>(
        &self,
        module: &ModuleRef,
        body: F,
        has_suspension_point: bool,
    ) -> AsyncModuleValue
    where
        F: FnOnce(AsyncModuleHandle),
    {
        begin_async_module(
            module,
            body,
            has_suspension_point,
            self.config().trace_unhandled_rejections,
        )
    }
}

impl fmt::Debug for BundleRuntime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BundleRuntime")
            .field("config", &self.inner.config)
            .finish()
    }
}

/// What a module body sees while it runs
///
/// Every operation acts on the module being initialized.
#[derive(Clone)]
pub struct ModuleScope {
    runtime: BundleRuntime,
    module: ModuleRef,
    exports: ObjectRef,
}

impl ModuleScope {
    /// Create a scope for `module` whose initial exports object is `exports`
    pub fn new(runtime: BundleRuntime, module: ModuleRef, exports: ObjectRef) -> Self {
        Self {
            runtime,
            module,
            exports,
        }
    }

    /// The runtime
    pub fn runtime(&self) -> &BundleRuntime {
        &self.runtime
    }

    /// The module record
    pub fn module(&self) -> &ModuleRef {
        &self.module
    }

    /// The module's id
    pub fn id(&self) -> ModuleId {
        self.module.read().id.clone()
    }

    /// The initial exports object
    pub fn exports(&self) -> &ObjectRef {
        &self.exports
    }

    /// The realm
    pub fn realm(&self) -> &Realm {
        self.runtime.realm()
    }

    /// Install export getters on the exports object
    pub fn install_exports(&self, getters: &Getters) {
        exports::install_exports(&self.exports, getters);
    }

    /// Install export getters and publish the exports object as namespace
    pub fn publish_namespace(&self, getters: &Getters) -> Result<()> {
        exports::publish_namespace(&self.module, &self.exports, getters)
    }

    /// Add an `export * from` source
    pub fn merge_reexport(&self, source: Value) {
        exports::merge_reexport(&self.module, &self.exports, source);
    }

    /// Replace the exports with an arbitrary value
    pub fn set_exports_value(&self, value: Value) -> Result<()> {
        exports::set_exports_value(&self.module, value)
    }

    /// Replace the exports with a ready-made namespace
    pub fn set_exports_as_namespace(&self, namespace: Value) -> Result<()> {
        exports::set_exports_as_namespace(&self.module, namespace)
    }

    /// Namespace-style import
    pub fn import_namespace(&self, id: impl Into<ModuleId>) -> Result<Value> {
        self.runtime.import_namespace(&self.module, id)
    }

    /// Foreign-convention import
    pub fn import_common_js(&self, id: impl Into<ModuleId>) -> Result<Value> {
        self.runtime.import_common_js(&self.module, id)
    }

    /// Context requirer over a static map
    pub fn build_context(&self, map: ContextMap) -> ModuleContext {
        self.runtime.build_context(&self.module, map)
    }

    /// Wrap this module as an async module and run `body`
    pub fn async_module<F>(&self, has_suspension_point: bool, body: F) -> AsyncModuleValue
    where
        F: FnOnce(AsyncModuleHandle),
    {
        self.runtime
            .begin_async_module(&self.module, body, has_suspension_point)
    }
}

impl fmt::Debug for ModuleScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModuleScope")
            .field("module", &self.module.read().id)
            .finish()
    }
}
