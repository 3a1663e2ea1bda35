// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright (c) 2025 Pegasus Heavy Industries, LLC

//! Export namespace builder
//!
//! Module bodies emitted in the namespace convention populate their exports
//! through [`publish_namespace`]; `export * from` sources are layered on with
//! [`merge_reexport`]. Bodies in the foreign convention assign their exports
//! directly through [`set_exports_value`] or [`set_exports_as_namespace`].

use crate::async_module::map_exports;
use crate::error::Result;
use crate::module::{ExportConvention, ModuleRef};
use crate::value::{Getter, ObjectRef, Value};
use indexmap::IndexMap;
use parking_lot::RwLock;
use std::fmt;
use std::sync::Arc;

/// Property that marks an exports object as namespace-convention
pub const MODULE_MARKER: &str = "__esModule";

/// Ordered table of export getters
pub type Getters = IndexMap<String, Getter>;

/// Install lazily evaluated export accessors on `target`
///
/// A getter is installed only when `target` does not already own a property
/// of that name, so repeated calls never clobber anything. The namespace
/// marker is stamped once.
pub fn install_exports(target: &ObjectRef, getters: &Getters) {
    if !target.has_own(MODULE_MARKER) {
        target.define_hidden(MODULE_MARKER, true);
    }
    for (name, getter) in getters {
        if !target.has_own(name) {
            target.define_getter(name.clone(), Arc::clone(getter), true);
        }
    }
}

/// Populate `exports` with `getters` and cache it as the module's namespace
pub fn publish_namespace(module: &ModuleRef, exports: &ObjectRef, getters: &Getters) -> Result<()> {
    module.write().claim_convention(ExportConvention::Namespace)?;
    install_exports(exports, getters);

    let mut module = module.write();
    if module.namespace_object().is_none() {
        module.set_namespace_object(Value::Object(exports.clone()));
    }
    Ok(())
}

/// Replace the module's exports with an arbitrary value
pub fn set_exports_value(module: &ModuleRef, value: Value) -> Result<()> {
    let mut module = module.write();
    module.claim_convention(ExportConvention::Value)?;
    module.set_exports(value);
    Ok(())
}

/// Replace the module's exports with a ready-made namespace
pub fn set_exports_as_namespace(module: &ModuleRef, namespace: Value) -> Result<()> {
    let mut module = module.write();
    module.claim_convention(ExportConvention::ForeignNamespace)?;
    module.set_exports(namespace.clone());
    module.set_namespace_object(namespace);
    Ok(())
}

/// Add `source` as an `export * from` source of `module`
///
/// The first call swaps the module's exports for a [`ReexportView`] over
/// `primary`; later calls only append to the view's source list. If the
/// module's exports are still pending, the swapped-in exports are a derived
/// deferred value that settles with the view and keeps the original's async
/// capabilities.
pub fn merge_reexport(module: &ModuleRef, primary: &ObjectRef, source: Value) {
    let mut record = module.write();
    let (sources, created) = record.ensure_reexport_sources();
    if created {
        let view = ReexportView::new(primary.clone(), Arc::clone(&sources));
        let exports = record.exports();
        if exports.is_deferred() {
            let pending = exports.is_pending();
            let settled_view = view.clone();
            let derived = map_exports(&exports, move |_| Value::View(settled_view));
            if let (true, Value::AsyncModule(module)) = (pending, &derived) {
                module.set_exports_snapshot(Value::View(view));
            }
            record.set_exports(derived.clone());
            record.set_namespace_object(derived);
        } else {
            record.set_exports(Value::View(view.clone()));
            record.set_namespace_object(Value::View(view));
        }
        tracing::trace!("Module {} switched to re-export view", record.id);
    }
    drop(record);

    if source.is_object_like() {
        sources.write().push(source);
    } else {
        tracing::trace!("Ignoring non-object re-export source {:?}", source);
    }
}

/// Namespace view over a primary exports object and ordered fallback sources
///
/// Lookups hit the primary object first; names it does not own resolve to
/// the first source, in registration order, that yields a defined value.
#[derive(Clone)]
pub struct ReexportView {
    primary: ObjectRef,
    sources: Arc<RwLock<Vec<Value>>>,
}

impl ReexportView {
    /// Create a view; `sources` may keep growing after creation
    pub fn new(primary: ObjectRef, sources: Arc<RwLock<Vec<Value>>>) -> Self {
        Self { primary, sources }
    }

    /// The primary exports object
    pub fn primary(&self) -> &ObjectRef {
        &self.primary
    }

    /// Number of registered sources
    pub fn source_count(&self) -> usize {
        self.sources.read().len()
    }

    /// Resolve a name
    pub fn get(&self, key: &str) -> Value {
        if self.primary.has_own(key) || key == "default" || key == MODULE_MARKER {
            return self.primary.get(key);
        }
        let sources = self.sources.read().clone();
        sources
            .iter()
            .map(|source| source.get(key))
            .find(|value| !value.is_undefined())
            .unwrap_or_default()
    }

    /// Enumerable names: the primary's first, then every source's except
    /// `default`, without duplicates
    pub fn keys(&self) -> Vec<String> {
        let mut keys = self.primary.keys();
        let sources = self.sources.read().clone();
        for source in &sources {
            for key in source.keys() {
                if key != "default" && !keys.contains(&key) {
                    keys.push(key);
                }
            }
        }
        keys
    }

    /// Identity comparison
    pub fn ptr_eq(&self, other: &ReexportView) -> bool {
        self.primary.ptr_eq(&other.primary) && Arc::ptr_eq(&self.sources, &other.sources)
    }
}

impl fmt::Debug for ReexportView {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReexportView")
            .field("primary", &self.primary)
            .field("sources", &self.source_count())
            .finish()
    }
}
